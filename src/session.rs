//! The session entity: identity, timestamps, attributes and lifecycle flags.
//!
//! A `Session` is plain in-memory state. It never talks to the remote store on
//! its own; `SessionStore` flattens it for persistence and clears `dirty` after a
//! confirmed write, and the request pipeline drives TTL refreshes and deletion.

use std::collections::HashMap;

use crate::codec::AttrValue;
use crate::error::{SessionError, SessionResult};

/// Hash field reserved for session metadata next to the attribute fields.
pub const META_FIELD: &str = "__session_meta__";

/// Prefix of the remote hash key for a session id.
pub const KEY_PREFIX: &str = "session:";

pub fn store_key(id: &str) -> String { format!("{}{}", KEY_PREFIX, id) }

pub(crate) fn now_ms() -> i64 { chrono::Utc::now().timestamp_millis() }

#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    creation_time: i64,
    last_accessed_time: i64,
    attributes: HashMap<String, AttrValue>,
    max_inactive_interval: u32,
    is_new: bool,
    is_valid: bool,
    dirty: bool,
}

impl Session {
    /// A freshly minted session: new, clean and empty.
    pub fn new(id: impl Into<String>, max_inactive_interval: u32) -> Self {
        let now = now_ms();
        Self {
            id: id.into(),
            creation_time: now,
            last_accessed_time: now,
            attributes: HashMap::new(),
            max_inactive_interval,
            is_new: true,
            is_valid: true,
            dirty: false,
        }
    }

    /// Rebuild a session from stored state. Loaded sessions are never new.
    pub fn restore(id: impl Into<String>, creation_time: i64, max_inactive_interval: u32, attributes: HashMap<String, AttrValue>) -> Self {
        let now = now_ms();
        Self {
            id: id.into(),
            creation_time: creation_time.min(now),
            last_accessed_time: now,
            attributes,
            max_inactive_interval,
            is_new: false,
            is_valid: true,
            dirty: false,
        }
    }

    pub fn id(&self) -> &str { &self.id }
    pub fn store_key(&self) -> String { store_key(&self.id) }
    pub fn creation_time(&self) -> i64 { self.creation_time }
    pub fn last_accessed_time(&self) -> i64 { self.last_accessed_time }
    pub fn max_inactive_interval(&self) -> u32 { self.max_inactive_interval }
    pub fn is_new(&self) -> bool { self.is_new }
    pub fn is_valid(&self) -> bool { self.is_valid }
    pub fn is_dirty(&self) -> bool { self.dirty }
    pub fn len(&self) -> usize { self.attributes.len() }
    pub fn is_empty(&self) -> bool { self.attributes.is_empty() }

    fn touch(&mut self) {
        // wall clock may step backwards; never report an access before creation
        self.last_accessed_time = now_ms().max(self.creation_time);
    }

    fn ensure_valid(&self) -> SessionResult<()> {
        if self.is_valid { Ok(()) } else { Err(SessionError::illegal(format!("session {} has been invalidated", self.id))) }
    }

    /// Re-associate with an inbound request: bump last-accessed and clear `is_new`.
    pub fn associate(&mut self) {
        self.touch();
        self.is_new = false;
    }

    /// Access from the request: bump last-accessed only.
    pub fn access(&mut self) { self.touch(); }

    pub fn get_attribute(&mut self, name: &str) -> SessionResult<Option<AttrValue>> {
        self.ensure_valid()?;
        self.touch();
        Ok(self.attributes.get(name).cloned())
    }

    pub fn attribute_names(&mut self) -> SessionResult<Vec<String>> {
        self.ensure_valid()?;
        self.touch();
        let mut names: Vec<String> = self.attributes.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// `None` removes the attribute.
    pub fn set_attribute(&mut self, name: &str, value: Option<AttrValue>) -> SessionResult<()> {
        let Some(value) = value else { return self.remove_attribute(name).map(|_| ()); };
        self.ensure_valid()?;
        if name == META_FIELD {
            return Err(SessionError::illegal(format!("attribute name '{}' is reserved", META_FIELD)));
        }
        self.attributes.insert(name.to_string(), value);
        self.dirty = true;
        self.touch();
        Ok(())
    }

    pub fn remove_attribute(&mut self, name: &str) -> SessionResult<Option<AttrValue>> {
        self.ensure_valid()?;
        let prev = self.attributes.remove(name);
        self.dirty = true;
        self.touch();
        Ok(prev)
    }

    /// A changed timeout marks the session dirty so the stored metadata follows.
    pub fn set_max_inactive_interval(&mut self, secs: u32) {
        if secs != self.max_inactive_interval {
            self.max_inactive_interval = secs;
            self.dirty = true;
        }
    }

    /// Terminal transition. Returns false when the session was already invalid.
    pub fn invalidate(&mut self) -> bool {
        if !self.is_valid { return false; }
        self.is_valid = false;
        self.attributes.clear();
        true
    }

    pub(crate) fn attributes(&self) -> &HashMap<String, AttrValue> { &self.attributes }

    /// Called by the store after a confirmed write.
    pub(crate) fn mark_persisted(&mut self) { self.dirty = false; }
}
