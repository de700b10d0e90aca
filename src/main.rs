use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use remote_session::{AttrValue, AttributeCodec, MemoryBackend, SessionConfig, SessionContext, SessionError, SessionHandle, SessionPipeline};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Cart {
    items: Vec<String>,
}

fn error_response(e: SessionError) -> (StatusCode, Json<serde_json::Value>) {
    let status = StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(serde_json::json!({"status":"error","code": e.code_str(),"message": e.to_string()})))
}

async fn visits(session: SessionHandle) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let count = session.get_attribute("visits").map_err(error_response)?.and_then(|v| v.as_i64()).unwrap_or(0) + 1;
    session.set_attribute("visits", count).map_err(error_response)?;
    Ok(Json(serde_json::json!({
        "status": "ok",
        "id": session.id(),
        "visits": count,
        "is_new": session.is_new().map_err(error_response)?,
    })))
}

async fn add_to_cart(session: SessionHandle, Path(item): Path<String>) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let mut cart = session
        .get_attribute("cart")
        .map_err(error_response)?
        .and_then(|v| v.downcast_ref::<Cart>().cloned())
        .unwrap_or_default();
    cart.items.push(item);
    let items = cart.items.clone();
    session.set_attribute("cart", AttrValue::object(cart)).map_err(error_response)?;
    Ok(Json(serde_json::json!({"status":"ok","items": items})))
}

async fn set_ttl(session: SessionHandle, Path(secs): Path<u32>) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let applied = session.set_max_inactive_interval(secs).await.map_err(error_response)?;
    Ok(Json(serde_json::json!({"status":"ok","ttl": secs,"applied": applied})))
}

async fn logout(ctx: SessionContext) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    if let Some(session) = ctx.get_session(false).await.map_err(error_response)? {
        session.invalidate().await.map_err(error_response)?;
    }
    Ok(Json(serde_json::json!({"status":"ok"})))
}

async fn build_pipeline(codec: AttributeCodec) -> anyhow::Result<SessionPipeline> {
    let backend_kind = std::env::var("SESSION_STORE").unwrap_or_else(|_| "redis".to_string());
    if backend_kind.eq_ignore_ascii_case("memory") {
        let mem = MemoryBackend::new();
        // Background sweeper for expired keys
        {
            let mem = mem.clone();
            tokio::spawn(async move {
                loop {
                    let removed = mem.sweep();
                    if removed > 0 { tracing::debug!(removed = removed, "session_sweep"); }
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            });
        }
        warn!(target: "session_demo", "using the in-process memory store; sessions are not shared between instances");
        let mut cfg = SessionConfig::default();
        if let Ok(raw) = std::env::var("SESSION_TIMEOUT_SECS") {
            cfg.default_ttl_secs = raw.trim().parse().map_err(|_| anyhow::anyhow!("SESSION_TIMEOUT_SECS must be a number"))?;
        }
        return Ok(SessionPipeline::with_backend(Arc::new(mem), codec, &cfg)?);
    }
    let cfg = SessionConfig::from_env()?;
    Ok(SessionPipeline::connect(cfg, codec).await?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    let addr: SocketAddr = std::env::var("SESSION_DEMO_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string()).parse()?;
    info!(target: "session_demo", "session demo starting: RUST_LOG='{}', addr={}", rust_log, addr);

    let codec = AttributeCodec::new().with_type::<Cart>("demo.cart");
    let pipeline = build_pipeline(codec).await?;

    let app = Router::new()
        .route("/visits", get(visits))
        .route("/cart/{item}", post(add_to_cart))
        .route("/ttl/{secs}", post(set_ttl))
        .route("/logout", post(logout));
    let app = pipeline.attach(app);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!(target: "session_demo", "shutdown signal received");
        })
        .await?;
    pipeline.shutdown();
    Ok(())
}
