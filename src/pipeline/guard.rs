//! Completion guard for one request's session.
//!
//! The session is taken out of the arena exactly once: either by `complete` on
//! the normal path (which also covers handler panics, since those are caught
//! before completion) or by `Drop` when the request future is abandoned
//! mid-flight. Either way a dirty, valid session gets one save attempt.

use std::sync::Arc;

use tracing::{debug, error, warn};

use super::context::Slot;
use super::PipelineInner;
use crate::session::Session;
use crate::store::SessionStore;

pub(crate) struct PersistGuard {
    inner: Arc<PipelineInner>,
    slot: Slot,
    armed: bool,
}

fn needs_save(session: &Session) -> bool { session.is_valid() && session.is_dirty() }

async fn persist(store: SessionStore, mut session: Session) -> Session {
    if store.save(&mut session).await {
        debug!(target: "remote_session::pipeline", "Saved session with ID {}", session.id());
    }
    session
}

impl PersistGuard {
    pub(crate) fn new(inner: Arc<PipelineInner>, slot: Slot) -> Self { Self { inner, slot, armed: true } }

    /// Release the slot and persist if needed. The save runs on its own task so
    /// cancelling the caller cannot interrupt it.
    pub(crate) async fn complete(mut self) -> Option<Session> {
        self.armed = false;
        let session = self.inner.arena.take(self.slot)?;
        if !needs_save(&session) {
            return Some(session);
        }
        let id = session.id().to_string();
        match tokio::spawn(persist(self.inner.store.clone(), session)).await {
            Ok(session) => Some(session),
            Err(e) => {
                error!(target: "remote_session::pipeline", "save task for session {} failed: {}", id, e);
                None
            }
        }
    }
}

impl Drop for PersistGuard {
    fn drop(&mut self) {
        if !self.armed { return; }
        let Some(session) = self.inner.arena.take(self.slot) else { return };
        if !needs_save(&session) { return; }
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                warn!(target: "remote_session::pipeline", "request for session {} ended early; saving in background", session.id());
                rt.spawn(persist(self.inner.store.clone(), session));
            }
            Err(_) => {
                error!(target: "remote_session::pipeline", "no runtime to persist session {}; changes lost", session.id());
            }
        }
    }
}
