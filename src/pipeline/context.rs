//! Request-side view of the resolved session.
//!
//! Sessions associated with in-flight requests live in the pipeline's arena,
//! keyed by an association slot. Handlers only ever hold a `SessionHandle`,
//! a (pipeline, slot) pair, so nothing outside the arena owns a session and a
//! handle that outlives its request simply finds the slot gone.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::PipelineInner;
use crate::codec::AttrValue;
use crate::error::{SessionError, SessionResult};
use crate::session::Session;

pub(crate) type Slot = u64;

#[derive(Default)]
pub(crate) struct SessionArena {
    next: AtomicU64,
    slots: RwLock<HashMap<Slot, Mutex<Session>>>,
}

impl SessionArena {
    pub(crate) fn insert(&self, session: Session) -> Slot {
        let slot = self.next.fetch_add(1, Ordering::Relaxed);
        self.slots.write().insert(slot, Mutex::new(session));
        slot
    }

    pub(crate) fn with<R>(&self, slot: Slot, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let slots = self.slots.read();
        let cell = slots.get(&slot)?;
        let mut session = cell.lock();
        Some(f(&mut *session))
    }

    pub(crate) fn take(&self, slot: Slot) -> Option<Session> {
        self.slots.write().remove(&slot).map(Mutex::into_inner)
    }

    pub(crate) fn len(&self) -> usize { self.slots.read().len() }
}

/// Non-owning handle to the session associated with the current request.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<PipelineInner>,
    slot: Slot,
    id: Arc<str>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle").field("id", &self.id).field("slot", &self.slot).finish()
    }
}

impl SessionHandle {
    pub(crate) fn new(inner: Arc<PipelineInner>, slot: Slot, id: &str) -> Self {
        Self { inner, slot, id: Arc::from(id) }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Session) -> SessionResult<R>) -> SessionResult<R> {
        self.inner
            .arena
            .with(self.slot, f)
            .unwrap_or_else(|| Err(SessionError::illegal(format!("session {} is no longer attached to a request", self.id))))
    }

    pub fn id(&self) -> &str { &self.id }
    pub fn creation_time(&self) -> SessionResult<i64> { self.with(|s| Ok(s.creation_time())) }
    pub fn last_accessed_time(&self) -> SessionResult<i64> { self.with(|s| Ok(s.last_accessed_time())) }
    pub fn max_inactive_interval(&self) -> SessionResult<u32> { self.with(|s| Ok(s.max_inactive_interval())) }
    pub fn is_new(&self) -> SessionResult<bool> { self.with(|s| Ok(s.is_new())) }
    pub fn is_valid(&self) -> SessionResult<bool> { self.with(|s| Ok(s.is_valid())) }
    pub fn is_dirty(&self) -> SessionResult<bool> { self.with(|s| Ok(s.is_dirty())) }

    pub fn get_attribute(&self, name: &str) -> SessionResult<Option<AttrValue>> { self.with(|s| s.get_attribute(name)) }

    pub fn attribute_names(&self) -> SessionResult<Vec<String>> { self.with(|s| s.attribute_names()) }

    pub fn set_attribute(&self, name: &str, value: impl Into<AttrValue>) -> SessionResult<()> {
        let value = value.into();
        self.with(|s| s.set_attribute(name, Some(value)))
    }

    /// `None` removes the attribute, same as `remove_attribute`.
    pub fn set_or_remove(&self, name: &str, value: Option<AttrValue>) -> SessionResult<()> {
        self.with(|s| s.set_attribute(name, value))
    }

    pub fn remove_attribute(&self, name: &str) -> SessionResult<Option<AttrValue>> { self.with(|s| s.remove_attribute(name)) }

    /// Change the timeout and push it to the store right away. Returns whether
    /// the remote TTL was actually updated.
    pub async fn set_max_inactive_interval(&self, secs: u32) -> SessionResult<bool> {
        self.with(|s| {
            if !s.is_valid() { return Err(SessionError::illegal(format!("session {} has been invalidated", s.id()))); }
            s.set_max_inactive_interval(secs);
            Ok(())
        })?;
        Ok(self.inner.store.expire(&self.id, secs).await)
    }

    /// Clear the session and delete it from the store. The response will carry
    /// an expiring cookie. Calling it again is a no-op.
    pub async fn invalidate(&self) -> SessionResult<()> {
        let first = self.with(|s| Ok(s.invalidate()))?;
        if first {
            let removed = self.inner.store.delete_id(&self.id).await;
            debug!(target: "remote_session::pipeline", "Invalidated session {} (remote key removed={})", self.id, removed);
        }
        Ok(())
    }

    /// Re-touch on retrieval from the request: bump last-accessed and extend the remote TTL.
    pub(crate) async fn touch(&self) -> SessionResult<()> {
        let ttl = self.with(|s| {
            s.access();
            Ok(if s.is_valid() { Some(s.max_inactive_interval()) } else { None })
        })?;
        if let Some(ttl) = ttl {
            self.inner.store.expire(&self.id, ttl).await;
        }
        Ok(())
    }
}

/// What the pipeline attaches to each request. Also usable as an extractor; on a
/// request that did not pass through the pipeline it is simply empty.
#[derive(Clone, Default, Debug)]
pub struct SessionContext {
    handle: Option<SessionHandle>,
}

impl SessionContext {
    pub(crate) fn attached(handle: SessionHandle) -> Self { Self { handle: Some(handle) } }

    /// Resolve the request's session. Without one, `create = false` yields
    /// `Ok(None)` and `create = true` is an `IllegalUse` error: sessions are
    /// only ever created by the pipeline.
    pub async fn get_session(&self, create: bool) -> SessionResult<Option<SessionHandle>> {
        match &self.handle {
            Some(h) => {
                h.touch().await?;
                Ok(Some(h.clone()))
            }
            None if create => Err(SessionError::illegal("creation of a new session must be handled by the session pipeline")),
            None => Ok(None),
        }
    }

    pub async fn session(&self) -> SessionResult<SessionHandle> {
        self.get_session(true)
            .await?
            .ok_or_else(|| SessionError::illegal("no session attached to this request"))
    }
}

pub trait RequestSessionExt {
    fn session_context(&self) -> SessionContext;
}

impl<B> RequestSessionExt for Request<B> {
    fn session_context(&self) -> SessionContext { self.extensions().get::<SessionContext>().cloned().unwrap_or_default() }
}

impl RequestSessionExt for Parts {
    fn session_context(&self) -> SessionContext { self.extensions.get::<SessionContext>().cloned().unwrap_or_default() }
}

impl<S: Send + Sync> FromRequestParts<S> for SessionContext {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.session_context())
    }
}

/// Extracting a `SessionHandle` directly is `get_session(true)`.
impl<S: Send + Sync> FromRequestParts<S> for SessionHandle {
    type Rejection = SessionRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.session_context().session().await.map_err(SessionRejection)
    }
}

#[derive(Debug)]
pub struct SessionRejection(pub SessionError);

impl IntoResponse for SessionRejection {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(serde_json::json!({"status": "error", "code": self.0.code_str(), "message": self.0.to_string()}))).into_response()
    }
}
