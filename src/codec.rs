//!
//! Attribute codec
//! ---------------
//! Session attributes are stored as individual hash fields in the remote store.
//! Each value is wrapped in a tagged envelope, serialized with bincode and then
//! base64-encoded so the field value is plain text.
//!
//! Built-in variants (strings, integers, floats, booleans, raw bytes and JSON)
//! always round-trip. Arbitrary Rust values travel as `AttrValue::Object` and are
//! only encodable when their concrete type has been registered on the codec
//! under a stable tag; an unregistered object is reported as a serialization
//! failure carrying its type name so the caller can drop just that attribute.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use base64::Engine;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::error::{SessionError, SessionResult};

type SharedAny = Arc<dyn Any + Send + Sync>;

/// An arbitrary in-memory value held by an `AttrValue::Object`.
#[derive(Clone)]
pub struct ObjectValue {
    type_id: TypeId,
    type_name: &'static str,
    value: SharedAny,
}

impl ObjectValue {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self { type_id: TypeId::of::<T>(), type_name: std::any::type_name::<T>(), value: Arc::new(value) }
    }

    pub fn type_name(&self) -> &'static str { self.type_name }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> { self.value.downcast_ref::<T>() }
}

impl fmt::Debug for ObjectValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object<{}>", self.type_name)
    }
}

/// Value variants a session attribute may hold.
#[derive(Debug, Clone)]
pub enum AttrValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    Json(JsonValue),
    Object(ObjectValue),
}

impl AttrValue {
    pub fn object<T: Any + Send + Sync>(value: T) -> Self { AttrValue::Object(ObjectValue::new(value)) }

    /// Type name used in diagnostics when the value cannot be encoded.
    pub fn type_name(&self) -> &'static str {
        match self {
            AttrValue::Str(_) => "String",
            AttrValue::Int(_) => "i64",
            AttrValue::Float(_) => "f64",
            AttrValue::Bool(_) => "bool",
            AttrValue::Bytes(_) => "Vec<u8>",
            AttrValue::Json(_) => "serde_json::Value",
            AttrValue::Object(o) => o.type_name(),
        }
    }

    pub fn as_str(&self) -> Option<&str> { if let AttrValue::Str(s) = self { Some(s) } else { None } }
    pub fn as_i64(&self) -> Option<i64> { if let AttrValue::Int(i) = self { Some(*i) } else { None } }
    pub fn as_f64(&self) -> Option<f64> { if let AttrValue::Float(v) = self { Some(*v) } else { None } }
    pub fn as_bool(&self) -> Option<bool> { if let AttrValue::Bool(b) = self { Some(*b) } else { None } }
    pub fn as_bytes(&self) -> Option<&[u8]> { if let AttrValue::Bytes(b) = self { Some(b) } else { None } }
    pub fn as_json(&self) -> Option<&JsonValue> { if let AttrValue::Json(j) = self { Some(j) } else { None } }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            AttrValue::Object(o) => o.downcast_ref::<T>(),
            _ => None,
        }
    }
}

/// Objects compare equal only when they share the same allocation; compare decoded
/// objects through `downcast_ref` instead.
impl PartialEq for AttrValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (AttrValue::Str(a), AttrValue::Str(b)) => a == b,
            (AttrValue::Int(a), AttrValue::Int(b)) => a == b,
            (AttrValue::Float(a), AttrValue::Float(b)) => a == b,
            (AttrValue::Bool(a), AttrValue::Bool(b)) => a == b,
            (AttrValue::Bytes(a), AttrValue::Bytes(b)) => a == b,
            (AttrValue::Json(a), AttrValue::Json(b)) => a == b,
            (AttrValue::Object(a), AttrValue::Object(b)) => a.type_id == b.type_id && Arc::ptr_eq(&a.value, &b.value),
            _ => false,
        }
    }
}

impl From<String> for AttrValue { fn from(v: String) -> Self { AttrValue::Str(v) } }
impl From<&str> for AttrValue { fn from(v: &str) -> Self { AttrValue::Str(v.to_string()) } }
impl From<i64> for AttrValue { fn from(v: i64) -> Self { AttrValue::Int(v) } }
impl From<i32> for AttrValue { fn from(v: i32) -> Self { AttrValue::Int(v as i64) } }
impl From<f64> for AttrValue { fn from(v: f64) -> Self { AttrValue::Float(v) } }
impl From<bool> for AttrValue { fn from(v: bool) -> Self { AttrValue::Bool(v) } }
impl From<Vec<u8>> for AttrValue { fn from(v: Vec<u8>) -> Self { AttrValue::Bytes(v) } }
impl From<JsonValue> for AttrValue { fn from(v: JsonValue) -> Self { AttrValue::Json(v) } }

/// On-the-wire envelope. JSON is carried as bytes since bincode cannot drive
/// `serde_json::Value`'s self-describing deserializer.
#[derive(Serialize, Deserialize)]
enum Wire {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    Json(Vec<u8>),
    Object { tag: String, payload: Vec<u8> },
}

type EncodeFn = fn(&(dyn Any + Send + Sync)) -> Result<Vec<u8>, String>;
type DecodeFn = fn(&[u8]) -> Result<SharedAny, String>;

#[derive(Clone)]
struct Registered {
    tag: String,
    encode: EncodeFn,
    decode: DecodeFn,
}

fn encode_as<T: Serialize + 'static>(value: &(dyn Any + Send + Sync)) -> Result<Vec<u8>, String> {
    match value.downcast_ref::<T>() {
        Some(v) => bincode::serialize(v).map_err(|e| e.to_string()),
        None => Err(format!("value is not a {}", std::any::type_name::<T>())),
    }
}

fn decode_as<T: DeserializeOwned + Send + Sync + 'static>(bytes: &[u8]) -> Result<SharedAny, String> {
    bincode::deserialize::<T>(bytes)
        .map(|v| Arc::new(v) as SharedAny)
        .map_err(|e| e.to_string())
}

/// Reversible attribute <-> text conversion with an explicit type registry.
#[derive(Clone, Default)]
pub struct AttributeCodec {
    by_type: HashMap<TypeId, Registered>,
    by_tag: HashMap<String, (TypeId, &'static str)>,
}

impl AttributeCodec {
    pub fn new() -> Self { Self::default() }

    /// Register a concrete type so `AttrValue::Object` values of it can be stored.
    /// The tag is written into the stored payload and must stay stable across deploys.
    pub fn with_type<T>(mut self, tag: &str) -> Self
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let type_id = TypeId::of::<T>();
        if let Some((prev, prev_name)) = self.by_tag.get(tag).copied() {
            if prev != type_id {
                // the previous owner loses the tag and becomes unregistered
                self.by_type.remove(&prev);
                warn!(target: "remote_session::codec", "codec tag '{}' moved from {} to {}", tag, prev_name, std::any::type_name::<T>());
            }
        }
        if let Some(old) = self.by_type.remove(&type_id) {
            self.by_tag.remove(&old.tag);
        }
        self.by_type.insert(type_id, Registered { tag: tag.to_string(), encode: encode_as::<T>, decode: decode_as::<T> });
        self.by_tag.insert(tag.to_string(), (type_id, std::any::type_name::<T>()));
        self
    }

    pub fn is_registered<T: Any>(&self) -> bool { self.by_type.contains_key(&TypeId::of::<T>()) }

    /// Encode one attribute. `key` is only used to label the error.
    pub fn encode(&self, key: &str, value: &AttrValue) -> SessionResult<String> {
        let fail = |reason: String| SessionError::Serialization {
            key: key.to_string(),
            type_name: value.type_name().to_string(),
            reason,
        };
        let wire = match value {
            AttrValue::Str(s) => Wire::Str(s.clone()),
            AttrValue::Int(i) => Wire::Int(*i),
            AttrValue::Float(f) => Wire::Float(*f),
            AttrValue::Bool(b) => Wire::Bool(*b),
            AttrValue::Bytes(b) => Wire::Bytes(b.clone()),
            AttrValue::Json(j) => Wire::Json(serde_json::to_vec(j).map_err(|e| fail(e.to_string()))?),
            AttrValue::Object(o) => {
                let reg = self.by_type.get(&o.type_id).ok_or_else(|| fail("type is not registered with the attribute codec".to_string()))?;
                let payload = (reg.encode)(o.value.as_ref()).map_err(fail)?;
                Wire::Object { tag: reg.tag.clone(), payload }
            }
        };
        let bytes = bincode::serialize(&wire).map_err(|e| fail(e.to_string()))?;
        Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    /// Decode one stored field back into an attribute value.
    pub fn decode(&self, key: &str, text: &str) -> SessionResult<AttrValue> {
        let fail = |reason: String| SessionError::Deserialization { key: key.to_string(), reason };
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(text.trim())
            .map_err(|e| fail(format!("malformed base64: {}", e)))?;
        let wire: Wire = bincode::deserialize(&bytes).map_err(|e| fail(format!("corrupted payload: {}", e)))?;
        Ok(match wire {
            Wire::Str(s) => AttrValue::Str(s),
            Wire::Int(i) => AttrValue::Int(i),
            Wire::Float(f) => AttrValue::Float(f),
            Wire::Bool(b) => AttrValue::Bool(b),
            Wire::Bytes(b) => AttrValue::Bytes(b),
            Wire::Json(b) => AttrValue::Json(serde_json::from_slice(&b).map_err(|e| fail(format!("corrupted json: {}", e)))?),
            Wire::Object { tag, payload } => {
                let (type_id, type_name) = self.by_tag.get(&tag).copied().ok_or_else(|| fail(format!("unknown type tag '{}'", tag)))?;
                let reg = self.by_type.get(&type_id).ok_or_else(|| fail(format!("unknown type tag '{}'", tag)))?;
                let value = (reg.decode)(&payload).map_err(|e| fail(format!("corrupted {} payload: {}", type_name, e)))?;
                AttrValue::Object(ObjectValue { type_id, type_name, value })
            }
        })
    }
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod codec_tests;
