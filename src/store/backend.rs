use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::SessionResult;

/// The remote key-value service as the session store sees it: one hash per key
/// plus native key expiration. Every error a backend returns is treated as a
/// connectivity failure by `SessionStore`.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// All fields of the hash at `key`; empty when the key does not exist.
    async fn hash_get_all(&self, key: &str) -> SessionResult<HashMap<String, String>>;

    /// Write `fields` into the hash at `key` and set its TTL. With `replace` the
    /// previous hash is dropped first, atomically with the write.
    async fn hash_write(&self, key: &str, fields: &[(String, String)], replace: bool, ttl_secs: u32) -> SessionResult<()>;

    /// Set the TTL of an existing key. Returns false when the key does not exist.
    async fn expire(&self, key: &str, ttl_secs: u32) -> SessionResult<bool>;

    /// Remove the key. Returns false when it did not exist.
    async fn delete(&self, key: &str) -> SessionResult<bool>;

    async fn ping(&self) -> SessionResult<()>;

    /// Release pooled resources at shutdown.
    fn close(&self) {}

    /// Short label for logs.
    fn describe(&self) -> String;
}
