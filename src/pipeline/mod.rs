//!
//! Session pipeline
//! ----------------
//! Request middleware that resolves the session before the handler runs and
//! persists it afterwards.
//!
//! Per request:
//! 1. Look up the session cookie (first match wins) and load from the store.
//!    A hit is re-associated and its remote TTL refreshed; a non-default TTL
//!    reissues the cookie so the client keeps it as long as the store does.
//! 2. On a miss, mint a fresh id, set the cookie and save the empty session at
//!    once so its key exists.
//! 3. Park the session in the arena and attach a `SessionContext`.
//! 4. Run the handler. A panic becomes a 500, it does not skip step 5.
//! 5. Take the session back, save it if dirty and valid, and emit the
//!    expiring cookie if it was invalidated.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use base64::Engine;
use futures_util::FutureExt; // for catch_unwind on the inner service future
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::codec::AttributeCodec;
use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::session::Session;
use crate::store::{KvBackend, RedisBackend, SessionStore};

mod context;
pub mod cookies;
mod guard;

pub use context::{RequestSessionExt, SessionContext, SessionHandle, SessionRejection};
use context::{SessionArena, Slot};
use guard::PersistGuard;

pub(crate) struct PipelineInner {
    pub(crate) store: SessionStore,
    pub(crate) arena: SessionArena,
    cookie_name: String,
    invalidation_cookie_name: String,
    default_ttl: u32,
}

#[derive(Clone)]
pub struct SessionPipeline {
    pub(crate) inner: Arc<PipelineInner>,
}

/// Opaque, URL-safe, 128 bits of randomness.
pub fn generate_session_id() -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(Uuid::new_v4().as_bytes())
}

struct Resolved {
    slot: Slot,
    id: String,
    /// At most one session cookie per response; a later reissue replaces it.
    session_cookie: Option<HeaderValue>,
    /// Max-Age the client was last told, so a TTL change can be re-announced.
    advertised_ttl: u32,
}

impl SessionPipeline {
    /// Build the Redis-backed pipeline. Fails fast when the settings are invalid
    /// or the store cannot be reached.
    pub async fn connect(config: SessionConfig, codec: AttributeCodec) -> SessionResult<Self> {
        let backend = RedisBackend::from_config(&config)?;
        if let Err(e) = backend.ping().await {
            return Err(SessionError::config(format!("cannot reach session store at {}: {}", backend.describe(), e)));
        }
        info!(target: "remote_session::pipeline", "session store ready at {} (pool max_size={}, ttl={}s)", backend.describe(), config.max_pool_size, config.default_ttl_secs);
        Self::with_backend(Arc::new(backend), codec, &config)
    }

    /// Pipeline over any backend. Only the session-level settings of `config` apply.
    pub fn with_backend(backend: Arc<dyn KvBackend>, codec: AttributeCodec, config: &SessionConfig) -> SessionResult<Self> {
        config.validate_session()?;
        let store = SessionStore::new(backend, codec, config.default_ttl_secs);
        Ok(Self {
            inner: Arc::new(PipelineInner {
                store,
                arena: SessionArena::default(),
                cookie_name: config.cookie_name.clone(),
                invalidation_cookie_name: config.invalidation_cookie_name.clone(),
                default_ttl: config.default_ttl_secs,
            }),
        })
    }

    pub fn store(&self) -> &SessionStore { &self.inner.store }

    /// Sessions currently associated with in-flight requests.
    pub fn active_sessions(&self) -> usize { self.inner.arena.len() }

    /// Wrap every route of `router` with session resolution.
    pub fn attach<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.layer(middleware::from_fn_with_state(self.clone(), session_middleware))
    }

    /// Release pooled store connections.
    pub fn shutdown(&self) {
        self.inner.store.backend().close();
        info!(target: "remote_session::pipeline", "session pipeline shut down");
    }

    async fn resolve(&self, headers: &HeaderMap) -> Resolved {
        let inner = &self.inner;
        if let Some(id) = cookies::parse_cookie(headers, &inner.cookie_name) {
            if let Some(mut session) = inner.store.load(&id).await {
                session.associate();
                inner.store.refresh_expiration(&session).await;
                let ttl = session.max_inactive_interval();
                let mut session_cookie = None;
                let mut advertised_ttl = inner.default_ttl;
                if ttl != inner.default_ttl {
                    session_cookie = cookies::session_cookie(&inner.cookie_name, &id, ttl);
                    advertised_ttl = ttl;
                }
                debug!(target: "remote_session::pipeline", "Loaded existing session with ID {}", id);
                let slot = inner.arena.insert(session);
                return Resolved { slot, id, session_cookie, advertised_ttl };
            }
            debug!(target: "remote_session::pipeline", "Session {} not found or expired; creating a new one", id);
        }

        let id = generate_session_id();
        let mut session = Session::new(&id, inner.default_ttl);
        let session_cookie = cookies::session_cookie(&inner.cookie_name, &id, inner.default_ttl);
        inner.store.save(&mut session).await;
        debug!(target: "remote_session::pipeline", "Created new session with ID {}", id);
        let slot = inner.arena.insert(session);
        Resolved { slot, id, session_cookie, advertised_ttl: inner.default_ttl }
    }
}

fn panic_response(payload: Box<dyn std::any::Any + Send>) -> Response {
    let msg = if let Some(s) = payload.downcast_ref::<&str>() { *s }
              else if let Some(s) = payload.downcast_ref::<String>() { s.as_str() }
              else { "panic" };
    error!(target: "panic", "HTTP handler panic: {}", msg);
    (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({
        "status": "error",
        "code": "internal_panic",
        "message": "internal server error"
    }))).into_response()
}

/// The middleware itself; `SessionPipeline::attach` installs it.
pub async fn session_middleware(State(pipeline): State<SessionPipeline>, mut req: Request, next: Next) -> Response {
    let Resolved { slot, id, mut session_cookie, advertised_ttl } = pipeline.resolve(req.headers()).await;
    let inner = pipeline.inner.clone();
    let guard = PersistGuard::new(inner.clone(), slot);
    req.extensions_mut().insert(SessionContext::attached(SessionHandle::new(inner.clone(), slot, &id)));

    let mut response = match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(r) => r,
        Err(payload) => panic_response(payload),
    };

    let mut expiring_cookie = None;
    if let Some(session) = guard.complete().await {
        if !session.is_valid() {
            expiring_cookie = cookies::expired_cookie(&inner.invalidation_cookie_name);
        } else if session.max_inactive_interval() != advertised_ttl {
            session_cookie = cookies::session_cookie(&inner.cookie_name, &id, session.max_inactive_interval());
        }
    }
    let headers = response.headers_mut();
    for c in session_cookie.into_iter().chain(expiring_cookie) {
        headers.append(SET_COOKIE, c);
    }
    response
}
