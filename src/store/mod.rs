//!
//! Session store
//! -------------
//! The only bridge between `Session` values and the remote key-value service.
//! A session lives in one hash at `session:<id>`: one field per attribute (value
//! encoded by `AttributeCodec`) plus the reserved metadata field carrying the
//! creation time and TTL. The key's native expiration is the session timeout.
//!
//! Failure policy:
//! - Store outages never escape. Every public operation logs the failure and
//!   degrades to a no-op; callers get `None`/`false` and the in-memory session
//!   stays consistent (a failed save leaves `dirty` set).
//! - A single attribute that cannot be encoded or decoded is dropped and
//!   logged; the rest of the save/load proceeds.
//! - No retries. Each call makes at most one attempt against the store.

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::codec::AttributeCodec;
use crate::error::{SessionError, SessionResult};
use crate::session::{self, Session, META_FIELD};

mod backend;
mod memory;
mod redis;

pub use backend::KvBackend;
pub use memory::MemoryBackend;
pub use self::redis::RedisBackend;

/// Persisted alongside the attributes so a session keeps its identity data and
/// custom timeout across requests.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
struct SessionMeta {
    creation_time: i64,
    max_inactive_interval: u32,
}

impl SessionMeta {
    fn encode(&self) -> SessionResult<String> {
        let bytes = bincode::serialize(self).map_err(|e| SessionError::Serialization {
            key: META_FIELD.to_string(),
            type_name: "SessionMeta".to_string(),
            reason: e.to_string(),
        })?;
        Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    fn decode(text: &str) -> SessionResult<Self> {
        let fail = |reason: String| SessionError::Deserialization { key: META_FIELD.to_string(), reason };
        let bytes = base64::engine::general_purpose::STANDARD.decode(text.trim()).map_err(|e| fail(e.to_string()))?;
        bincode::deserialize(&bytes).map_err(|e| fail(e.to_string()))
    }
}

#[derive(Clone)]
pub struct SessionStore {
    backend: Arc<dyn KvBackend>,
    codec: Arc<AttributeCodec>,
    default_ttl: u32,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn KvBackend>, codec: AttributeCodec, default_ttl: u32) -> Self {
        Self { backend, codec: Arc::new(codec), default_ttl }
    }

    pub fn codec(&self) -> &AttributeCodec { &self.codec }
    pub fn default_ttl(&self) -> u32 { self.default_ttl }
    pub fn backend(&self) -> &Arc<dyn KvBackend> { &self.backend }

    /// Reconstruct the session stored under `id`. `None` when the key is absent,
    /// has no fields, or the store is unreachable.
    pub async fn load(&self, id: &str) -> Option<Session> {
        let key = session::store_key(id);
        let data = match self.backend.hash_get_all(&key).await {
            Ok(d) => d,
            Err(e) => {
                error!(target: "remote_session::store", "Error loading session {} from {}: {}", id, self.backend.describe(), e);
                return None;
            }
        };
        if data.is_empty() {
            debug!(target: "remote_session::store", "Session {} not found in store", id);
            return None;
        }
        Some(self.materialize(id, data))
    }

    fn materialize(&self, id: &str, mut data: HashMap<String, String>) -> Session {
        let meta = data.remove(META_FIELD).and_then(|text| match SessionMeta::decode(&text) {
            Ok(m) => Some(m),
            Err(e) => {
                warn!(target: "remote_session::store", "session {}: ignoring unreadable metadata: {}", id, e);
                None
            }
        });
        let mut attributes = HashMap::with_capacity(data.len());
        for (key, encoded) in data {
            match self.codec.decode(&key, &encoded) {
                Ok(v) => { attributes.insert(key, v); }
                Err(e) => {
                    warn!(target: "remote_session::store", "session {}: dropping attribute '{}': {}", id, key, e);
                    warn!(target: "remote_session::store", "session {}: problematic encoded value: [{}]", id, encoded);
                }
            }
        }
        let (creation_time, ttl) = match meta {
            Some(m) => (m.creation_time, m.max_inactive_interval),
            None => (session::now_ms(), self.default_ttl),
        };
        Session::restore(id, creation_time, ttl, attributes)
    }

    /// Encode every attribute, skipping the ones the codec rejects.
    fn flatten(&self, session: &Session) -> Vec<(String, String)> {
        let mut fields = Vec::with_capacity(session.len() + 1);
        for (key, value) in session.attributes() {
            match self.codec.encode(key, value) {
                Ok(text) => fields.push((key.clone(), text)),
                Err(e) => {
                    // best-effort diagnostic: the type name is all we can say about the value
                    warn!(target: "remote_session::store", type_name = value.type_name(), "session {}: not persisting attribute '{}': {}", session.id(), key, e);
                }
            }
        }
        let meta = SessionMeta { creation_time: session.creation_time(), max_inactive_interval: session.max_inactive_interval() };
        match meta.encode() {
            Ok(text) => fields.push((META_FIELD.to_string(), text)),
            Err(e) => warn!(target: "remote_session::store", "session {}: {}", session.id(), e),
        }
        fields
    }

    /// Persist the session and (re)set its TTL. A dirty session replaces the
    /// whole hash so removed attributes disappear; a clean one is upserted.
    /// Clears `dirty` and returns true only when the write went through.
    pub async fn save(&self, session: &mut Session) -> bool {
        if !session.is_valid() {
            debug!(target: "remote_session::store", "not saving invalidated session {}", session.id());
            return false;
        }
        let fields = self.flatten(session);
        let key = session.store_key();
        match self.backend.hash_write(&key, &fields, session.is_dirty(), session.max_inactive_interval()).await {
            Ok(()) => {
                session.mark_persisted();
                debug!(target: "remote_session::store", "saved session {} ({} fields, ttl={}s)", session.id(), fields.len(), session.max_inactive_interval());
                true
            }
            Err(e) => {
                error!(target: "remote_session::store", "Error saving session {} to {}: {}", session.id(), self.backend.describe(), e);
                false
            }
        }
    }

    /// Extend the remote key's TTL to the session's current timeout.
    pub async fn refresh_expiration(&self, session: &Session) -> bool {
        self.expire(session.id(), session.max_inactive_interval()).await
    }

    pub(crate) async fn expire(&self, id: &str, ttl_secs: u32) -> bool {
        match self.backend.expire(&session::store_key(id), ttl_secs).await {
            Ok(applied) => applied,
            Err(e) => {
                error!(target: "remote_session::store", "Error updating expiration of session {}: {}", id, e);
                false
            }
        }
    }

    /// Remove the session's key entirely. Only invalidation calls this.
    pub async fn delete(&self, session: &Session) -> bool {
        self.delete_id(session.id()).await
    }

    pub(crate) async fn delete_id(&self, id: &str) -> bool {
        match self.backend.delete(&session::store_key(id)).await {
            Ok(removed) => removed,
            Err(e) => {
                error!(target: "remote_session::store", "Error deleting session {}: {}", id, e);
                false
            }
        }
    }
}
