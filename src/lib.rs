//! Remote-backed HTTP sessions for axum.
//!
//! Session state lives in a Redis hash (`session:<id>`) rather than in process
//! memory, so any server instance can pick up any request. `SessionPipeline`
//! is the middleware, `SessionStore` the persistence layer and `AttributeCodec`
//! turns attribute values into the text stored in each hash field.

pub mod codec;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod store;

pub use codec::{AttrValue, AttributeCodec};
pub use config::SessionConfig;
pub use error::{SessionError, SessionResult};
pub use pipeline::{RequestSessionExt, SessionContext, SessionHandle, SessionPipeline};
pub use session::Session;
pub use store::{KvBackend, MemoryBackend, RedisBackend, SessionStore};

// Test-only printing helper: expands to eprintln! during tests and is absent otherwise.
#[cfg(any(test, debug_assertions))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ( eprintln!($($arg)*) );
}

#[cfg(not(any(test, debug_assertions)))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ({
        if false { let _ = format!($($arg)*); }
    });
}
