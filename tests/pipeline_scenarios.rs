//! End-to-end request scenarios: an axum router wrapped by the session pipeline,
//! backed by the in-process store so failures can be injected.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::Path;
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{Request, Response, StatusCode};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tower::ServiceExt;

use remote_session::{AttrValue, AttributeCodec, KvBackend, MemoryBackend, Session, SessionConfig, SessionContext, SessionError, SessionHandle, SessionPipeline};

struct Socket;

type Captured = Arc<Mutex<Option<SessionHandle>>>;

async fn get_color(session: SessionHandle) -> Json<Value> {
    let color = session.get_attribute("color").unwrap().and_then(|v| v.as_str().map(str::to_string));
    Json(json!({"id": session.id(), "color": color, "is_new": session.is_new().unwrap()}))
}

async fn set_color(session: SessionHandle, Path(color): Path<String>) -> &'static str {
    session.set_attribute("color", color).unwrap();
    "ok"
}

async fn put_socket(session: SessionHandle) -> &'static str {
    session.set_attribute("color", "green").unwrap();
    session.set_attribute("socket", AttrValue::object(Socket)).unwrap();
    "ok"
}

async fn logout(ctx: SessionContext) -> &'static str {
    let session = ctx.get_session(false).await.unwrap().expect("pipeline attached a session");
    session.invalidate().await.unwrap();
    session.invalidate().await.unwrap();
    "bye"
}

async fn boom(session: SessionHandle) -> &'static str {
    session.set_attribute("seen", true).unwrap();
    panic!("handler exploded");
}

async fn stall(session: SessionHandle) -> &'static str {
    session.set_attribute("pending", 1i64).unwrap();
    tokio::time::sleep(Duration::from_secs(3600)).await;
    "late"
}

async fn set_ttl(session: SessionHandle, Path(secs): Path<u32>) -> Json<Value> {
    let applied = session.set_max_inactive_interval(secs).await.unwrap();
    Json(json!({"applied": applied}))
}

async fn capture(session: SessionHandle, Extension(slot): Extension<Captured>) -> &'static str {
    *slot.lock() = Some(session);
    "ok"
}

async fn probe(ctx: SessionContext, Path(create): Path<bool>) -> Json<Value> {
    match ctx.get_session(create).await {
        Ok(Some(h)) => Json(json!({"session": h.id()})),
        Ok(None) => Json(json!({"session": null})),
        Err(e) => Json(json!({"error": e.code_str()})),
    }
}

/// Shorten the remote TTL behind the pipeline's back, then retrieve the session again.
async fn retouch(ctx: SessionContext, Extension(mem): Extension<MemoryBackend>) -> Json<Value> {
    let first = ctx.get_session(false).await.unwrap().unwrap();
    let before = first.last_accessed_time().unwrap();
    let key = format!("session:{}", first.id());
    assert!(mem.expire(&key, 5).await.unwrap());
    let lowered = mem.ttl(&key).unwrap().as_secs();
    let again = ctx.get_session(false).await.unwrap().unwrap();
    Json(json!({
        "lowered": lowered,
        "restored": mem.ttl(&key).unwrap().as_secs(),
        "before": before,
        "after": again.last_accessed_time().unwrap(),
    }))
}

fn routes() -> Router {
    Router::new()
        .route("/color", get(get_color))
        .route("/color/{color}", post(set_color))
        .route("/socket", post(put_socket))
        .route("/logout", post(logout))
        .route("/boom", get(boom))
        .route("/stall", get(stall))
        .route("/ttl/{secs}", post(set_ttl))
        .route("/capture", get(capture))
        .route("/probe/{create}", get(probe))
        .route("/retouch", get(retouch))
}

fn setup() -> (MemoryBackend, SessionPipeline, Router, Captured) {
    let mem = MemoryBackend::new();
    let pipeline = SessionPipeline::with_backend(Arc::new(mem.clone()), AttributeCodec::new(), &SessionConfig::default()).unwrap();
    let captured: Captured = Arc::new(Mutex::new(None));
    let app = pipeline.attach(routes().layer(Extension(captured.clone())).layer(Extension(mem.clone())));
    (mem, pipeline, app, captured)
}

fn request(method: &str, uri: &str, sid: Option<&str>) -> Request<Body> {
    let mut b = Request::builder().method(method).uri(uri);
    if let Some(sid) = sid {
        b = b.header(COOKIE, format!("theme=dark; JSESSIONID={}", sid));
    }
    b.body(Body::empty()).unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> Response<Body> {
    app.clone().oneshot(req).await.unwrap()
}

fn set_cookies(resp: &Response<Body>) -> Vec<String> {
    resp.headers().get_all(SET_COOKIE).iter().map(|v| v.to_str().unwrap().to_string()).collect()
}

async fn body_json(resp: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn seed(pipeline: &SessionPipeline, id: &str, color: &str) {
    let mut s = Session::new(id, 1800);
    s.set_attribute("color", Some(color.into())).unwrap();
    assert!(pipeline.store().save(&mut s).await);
}

#[tokio::test]
async fn first_request_mints_cookie_and_persists_empty_session() {
    let (mem, _p, app, _) = setup();
    let resp = send(&app, request("GET", "/color", None)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let cookies = set_cookies(&resp);
    remote_session::tprintln!("set-cookie: {:?}", cookies);
    assert_eq!(cookies.len(), 1);
    let cookie = &cookies[0];
    assert!(cookie.starts_with("JSESSIONID="));
    assert!(cookie.contains("Max-Age=1800"));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("Path=/"));

    let body = body_json(resp).await;
    assert_eq!(body["is_new"], json!(true));
    assert_eq!(body["color"], Value::Null);
    let id = body["id"].as_str().unwrap().to_string();
    assert!(cookie.starts_with(&format!("JSESSIONID={};", id)));
    let fields = mem.fields(&format!("session:{}", id)).expect("empty session persisted");
    assert_eq!(fields.len(), 1, "only the metadata field");
}

#[tokio::test]
async fn existing_session_is_loaded_without_new_cookie() {
    let (mem, p, app, _) = setup();
    seed(&p, "X", "blue").await;
    let resp = send(&app, request("GET", "/color", Some("X"))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(set_cookies(&resp).is_empty());
    let body = body_json(resp).await;
    assert_eq!(body["color"], json!("blue"));
    assert_eq!(body["is_new"], json!(false));
    assert!(mem.ttl("session:X").unwrap() > Duration::from_secs(1700));
}

#[tokio::test]
async fn attribute_change_is_saved_at_completion() {
    let (_mem, p, app, _) = setup();
    seed(&p, "X", "blue").await;
    let resp = send(&app, request("POST", "/color/red", Some("X"))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let mut loaded = p.store().load("X").await.unwrap();
    assert_eq!(loaded.get_attribute("color").unwrap(), Some(AttrValue::from("red")));
    assert_eq!(p.active_sessions(), 0);
}

#[tokio::test]
async fn unencodable_attribute_is_skipped_and_request_succeeds() {
    let (mem, p, app, _) = setup();
    seed(&p, "X", "blue").await;
    let resp = send(&app, request("POST", "/socket", Some("X"))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let fields = mem.fields("session:X").unwrap();
    assert!(fields.contains_key("color"));
    assert!(!fields.contains_key("socket"));
}

#[tokio::test]
async fn store_outage_still_serves_the_request() {
    let (mem, _p, app, _) = setup();
    mem.set_online(false);
    let resp = send(&app, request("POST", "/color/red", None)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(set_cookies(&resp).len(), 1);
    let resp = send(&app, request("GET", "/color", Some("whatever"))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["is_new"], json!(true));
    mem.set_online(true);
    assert!(mem.is_empty());
}

#[tokio::test]
async fn invalidation_deletes_key_and_expires_cookie() {
    let (_mem, p, app, _) = setup();
    seed(&p, "X", "blue").await;
    let resp = send(&app, request("POST", "/logout", Some("X"))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let cookies = set_cookies(&resp);
    assert_eq!(cookies, vec!["ABC=; Max-Age=0; Path=/".to_string()]);
    assert!(p.store().load("X").await.is_none());
}

#[tokio::test]
async fn stale_cookie_gets_a_fresh_id() {
    let (mem, _p, app, _) = setup();
    let resp = send(&app, request("GET", "/color", Some("gone"))).await;
    let cookies = set_cookies(&resp);
    assert_eq!(cookies.len(), 1);
    assert!(!cookies[0].starts_with("JSESSIONID=gone"));
    let body = body_json(resp).await;
    assert_eq!(body["is_new"], json!(true));
    assert!(mem.fields("session:gone").is_none());
}

#[tokio::test]
async fn handler_panic_still_persists_and_returns_500() {
    let (mem, p, app, _) = setup();
    seed(&p, "X", "blue").await;
    let resp = send(&app, request("GET", "/boom", Some("X"))).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(resp).await;
    assert_eq!(body["code"], json!("internal_panic"));
    assert!(mem.fields("session:X").unwrap().contains_key("seen"));
    assert_eq!(p.active_sessions(), 0);
}

#[tokio::test]
async fn abandoned_request_saves_in_background() {
    let (mem, p, app, _) = setup();
    seed(&p, "X", "blue").await;
    let fut = app.clone().oneshot(request("GET", "/stall", Some("X")));
    assert!(tokio::time::timeout(Duration::from_millis(50), fut).await.is_err());
    for _ in 0..100 {
        if mem.fields("session:X").map(|f| f.contains_key("pending")).unwrap_or(false) { break; }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(mem.fields("session:X").unwrap().contains_key("pending"));
    assert_eq!(p.active_sessions(), 0);
}

#[tokio::test]
async fn custom_timeout_is_persisted_and_reannounced() {
    let (mem, p, app, _) = setup();
    seed(&p, "X", "blue").await;
    let resp = send(&app, request("POST", "/ttl/60", Some("X"))).await;
    assert_eq!(set_cookies(&resp), vec!["JSESSIONID=X; Max-Age=60; Path=/; HttpOnly".to_string()]);
    assert_eq!(body_json(resp).await["applied"], json!(true));
    assert!(mem.ttl("session:X").unwrap() <= Duration::from_secs(60));

    // next hit carries the custom TTL from the store and reissues the cookie once
    let resp = send(&app, request("GET", "/color", Some("X"))).await;
    assert_eq!(set_cookies(&resp), vec!["JSESSIONID=X; Max-Age=60; Path=/; HttpOnly".to_string()]);
    assert_eq!(body_json(resp).await["color"], json!("blue"));
    assert_eq!(p.store().load("X").await.unwrap().max_inactive_interval(), 60);
}

#[tokio::test]
async fn handle_is_unusable_after_its_request() {
    let (_mem, _p, app, captured) = setup();
    let _ = send(&app, request("GET", "/capture", None)).await;
    let handle = captured.lock().take().unwrap();
    let err = handle.get_attribute("color").unwrap_err();
    assert!(matches!(err, SessionError::IllegalUse(_)));
}

#[tokio::test]
async fn concurrent_requests_for_one_id_do_not_interfere() {
    let (_mem, p, app, _) = setup();
    seed(&p, "X", "blue").await;
    let (a, b) = tokio::join!(
        send(&app, request("POST", "/color/red", Some("X"))),
        send(&app, request("POST", "/color/green", Some("X"))),
    );
    assert_eq!(a.status(), StatusCode::OK);
    assert_eq!(b.status(), StatusCode::OK);
    assert_eq!(p.active_sessions(), 0);
    let color = p.store().load("X").await.unwrap().get_attribute("color").unwrap().unwrap();
    assert!(color == AttrValue::from("red") || color == AttrValue::from("green"));
}

#[tokio::test]
async fn without_pipeline_get_session_finds_nothing() {
    let app = routes().layer(Extension::<Captured>(Arc::new(Mutex::new(None))));
    let body = body_json(send(&app, request("GET", "/probe/false", None)).await).await;
    assert_eq!(body["session"], Value::Null);
    let body = body_json(send(&app, request("GET", "/probe/true", None)).await).await;
    assert_eq!(body["error"], json!("illegal_use"));
    // extracting a handle directly is the create=true path
    let resp = send(&app, request("GET", "/color", None)).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn probe_with_pipeline_returns_the_session() {
    let (_mem, p, app, _) = setup();
    seed(&p, "X", "blue").await;
    let body = body_json(send(&app, request("GET", "/probe/false", Some("X"))).await).await;
    assert_eq!(body["session"], json!("X"));
}

#[tokio::test]
async fn retrieving_the_session_refreshes_ttl_and_last_access() {
    let (_mem, p, app, _) = setup();
    seed(&p, "X", "blue").await;
    let resp = send(&app, request("GET", "/retouch", Some("X"))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert!(body["lowered"].as_u64().unwrap() <= 5);
    assert!(body["restored"].as_u64().unwrap() > 1700, "got {}", body);
    assert!(body["after"].as_i64().unwrap() >= body["before"].as_i64().unwrap());
}

fn session_cookies(resp: &Response<Body>) -> Vec<String> {
    set_cookies(resp).into_iter().filter(|c| c.starts_with("JSESSIONID=")).collect()
}

#[tokio::test]
async fn timeout_change_on_fresh_session_sends_one_cookie() {
    let (_mem, _p, app, _) = setup();
    let resp = send(&app, request("POST", "/ttl/60", None)).await;
    let cookies = session_cookies(&resp);
    assert_eq!(cookies.len(), 1, "got {:?}", cookies);
    assert!(cookies[0].contains("Max-Age=60;"));
    assert_eq!(set_cookies(&resp).len(), 1);
}

#[tokio::test]
async fn timeout_change_on_custom_ttl_hit_sends_one_cookie() {
    let (_mem, p, app, _) = setup();
    let mut s = Session::new("X", 600);
    assert!(p.store().save(&mut s).await);
    let resp = send(&app, request("POST", "/ttl/60", Some("X"))).await;
    assert_eq!(session_cookies(&resp), vec!["JSESSIONID=X; Max-Age=60; Path=/; HttpOnly".to_string()]);
}
