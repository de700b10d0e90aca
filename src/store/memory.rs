//! In-process stand-in for the remote store.
//!
//! Keeps one field map per key with an optional expiry instant, pruned lazily on
//! access and in bulk by `sweep`. Used by tests and by the demo binary when no
//! Redis is around. `set_online(false)` makes every call fail the way an
//! unreachable store would.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::backend::KvBackend;
use crate::error::{SessionError, SessionResult};

#[derive(Clone, Debug)]
struct Entry {
    fields: HashMap<String, String>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool { self.expires_at.map(|exp| now >= exp).unwrap_or(false) }
}

#[derive(Clone)]
pub struct MemoryBackend {
    map: Arc<RwLock<HashMap<String, Entry>>>,
    online: Arc<AtomicBool>,
    calls: Arc<AtomicU64>,
}

impl Default for MemoryBackend {
    fn default() -> Self { Self::new() }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self { map: Arc::new(RwLock::new(HashMap::new())), online: Arc::new(AtomicBool::new(true)), calls: Arc::new(AtomicU64::new(0)) }
    }

    /// Toggle simulated reachability.
    pub fn set_online(&self, online: bool) { self.online.store(online, Ordering::SeqCst); }

    /// Number of store operations attempted so far, successful or not.
    pub fn calls(&self) -> u64 { self.calls.load(Ordering::SeqCst) }

    fn check(&self) -> SessionResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.online.load(Ordering::SeqCst) { Ok(()) } else { Err(SessionError::store("connection refused (memory backend offline)")) }
    }

    fn ttl_instant(ttl_secs: u32) -> Instant { Instant::now() + Duration::from_secs(ttl_secs as u64) }

    /// Direct read for inspection; ignores the online flag.
    pub fn fields(&self, key: &str) -> Option<HashMap<String, String>> {
        let r = self.map.read();
        r.get(key).filter(|e| !e.expired(Instant::now())).map(|e| e.fields.clone())
    }

    /// Remaining TTL of a live key.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let r = self.map.read();
        let ent = r.get(key)?;
        let exp = ent.expires_at?;
        exp.checked_duration_since(Instant::now())
    }

    /// Seed raw fields under a key, bypassing the codec.
    pub fn insert_raw(&self, key: &str, fields: &[(&str, &str)], ttl_secs: Option<u32>) {
        let fields = fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        self.map.write().insert(key.to_string(), Entry { fields, expires_at: ttl_secs.map(Self::ttl_instant) });
    }

    pub fn len(&self) -> usize { self.map.read().len() }
    pub fn is_empty(&self) -> bool { self.map.read().is_empty() }

    /// Remove expired keys. Returns number removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut w = self.map.write();
        let before = w.len();
        w.retain(|_, e| !e.expired(now));
        before - w.len()
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn hash_get_all(&self, key: &str) -> SessionResult<HashMap<String, String>> {
        self.check()?;
        let now = Instant::now();
        let mut w = self.map.write();
        match w.get(key).map(|e| e.expired(now)) {
            Some(true) => { w.remove(key); Ok(HashMap::new()) }
            Some(false) => Ok(w.get(key).map(|e| e.fields.clone()).unwrap_or_default()),
            None => Ok(HashMap::new()),
        }
    }

    async fn hash_write(&self, key: &str, fields: &[(String, String)], replace: bool, ttl_secs: u32) -> SessionResult<()> {
        self.check()?;
        let now = Instant::now();
        let mut w = self.map.write();
        if replace || w.get(key).map(|e| e.expired(now)).unwrap_or(false) {
            w.remove(key);
        }
        if !fields.is_empty() {
            let ent = w.entry(key.to_string()).or_insert_with(|| Entry { fields: HashMap::new(), expires_at: None });
            for (k, v) in fields { ent.fields.insert(k.clone(), v.clone()); }
        }
        // EXPIRE semantics: 0 deletes, absent keys are left absent
        if ttl_secs == 0 {
            w.remove(key);
        } else if let Some(ent) = w.get_mut(key) {
            ent.expires_at = Some(Self::ttl_instant(ttl_secs));
        }
        Ok(())
    }

    async fn expire(&self, key: &str, ttl_secs: u32) -> SessionResult<bool> {
        self.check()?;
        let now = Instant::now();
        let mut w = self.map.write();
        match w.get(key).map(|e| e.expired(now)) {
            Some(false) => {
                if ttl_secs == 0 {
                    w.remove(key);
                } else if let Some(e) = w.get_mut(key) {
                    e.expires_at = Some(Self::ttl_instant(ttl_secs));
                }
                Ok(true)
            }
            Some(true) => { w.remove(key); Ok(false) }
            None => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> SessionResult<bool> {
        self.check()?;
        Ok(self.map.write().remove(key).is_some())
    }

    async fn ping(&self) -> SessionResult<()> { self.check() }

    fn describe(&self) -> String { "memory".to_string() }
}
