//! Error taxonomy for the session subsystem.
//! Only `Configuration` is ever fatal. Store and codec failures are absorbed at
//! the `SessionStore` boundary, and `IllegalUse` flags a caller bug.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Remote store unreachable, timed out, or the pool could not hand out a connection.
    #[error("session store unavailable: {0}")]
    StoreConnectivity(String),
    /// A single attribute value could not be encoded.
    #[error("cannot serialize attribute '{key}' of type {type_name}: {reason}")]
    Serialization { key: String, type_name: String, reason: String },
    /// A single stored attribute could not be decoded.
    #[error("cannot deserialize attribute '{key}': {reason}")]
    Deserialization { key: String, reason: String },
    /// Missing or invalid store/session settings at startup.
    #[error("invalid session configuration: {0}")]
    Configuration(String),
    /// The session API was used along a path that must not reach it.
    #[error("illegal session use: {0}")]
    IllegalUse(String),
}

impl SessionError {
    pub fn store<S: Into<String>>(msg: S) -> Self { SessionError::StoreConnectivity(msg.into()) }
    pub fn config<S: Into<String>>(msg: S) -> Self { SessionError::Configuration(msg.into()) }
    pub fn illegal<S: Into<String>>(msg: S) -> Self { SessionError::IllegalUse(msg.into()) }

    pub fn code_str(&self) -> &'static str {
        match self {
            SessionError::StoreConnectivity(_) => "store_unavailable",
            SessionError::Serialization { .. } => "attribute_serialization",
            SessionError::Deserialization { .. } => "attribute_deserialization",
            SessionError::Configuration(_) => "configuration",
            SessionError::IllegalUse(_) => "illegal_use",
        }
    }

    /// Map to HTTP status code when a handler chooses to surface the error.
    pub fn http_status(&self) -> u16 {
        match self {
            SessionError::StoreConnectivity(_) => 503,
            SessionError::Serialization { .. } | SessionError::Deserialization { .. } => 422,
            SessionError::Configuration(_) | SessionError::IllegalUse(_) => 500,
        }
    }

    /// Store outages are recovered locally; everything else is reported to the caller.
    pub fn is_connectivity(&self) -> bool { matches!(self, SessionError::StoreConnectivity(_)) }
}

impl From<deadpool_redis::redis::RedisError> for SessionError {
    fn from(err: deadpool_redis::redis::RedisError) -> Self {
        SessionError::StoreConnectivity(err.to_string())
    }
}

impl From<deadpool_redis::PoolError> for SessionError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        SessionError::StoreConnectivity(format!("pool: {}", err))
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping() {
        assert_eq!(SessionError::store("down").http_status(), 503);
        assert_eq!(SessionError::config("no host").http_status(), 500);
        assert_eq!(SessionError::illegal("create").http_status(), 500);
        let ser = SessionError::Serialization { key: "k".into(), type_name: "T".into(), reason: "x".into() };
        assert_eq!(ser.http_status(), 422);
    }

    #[test]
    fn codes_and_display() {
        let e = SessionError::Deserialization { key: "color".into(), reason: "bad base64".into() };
        assert_eq!(e.code_str(), "attribute_deserialization");
        assert_eq!(e.to_string(), "cannot deserialize attribute 'color': bad base64");
        assert!(SessionError::store("refused").is_connectivity());
        assert!(!SessionError::illegal("x").is_connectivity());
    }
}
