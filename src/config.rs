use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{SessionError, SessionResult};

pub const DEFAULT_REDIS_PORT: u16 = 6379;
pub const DEFAULT_SESSION_TIMEOUT_SECS: u32 = 30 * 60;
pub const DEFAULT_MAX_POOL_SIZE: usize = 128;
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 2_000;
pub const SESSION_COOKIE_NAME: &str = "JSESSIONID";
/// Name of the expiring cookie sent when a session is invalidated.
pub const INVALIDATION_COOKIE_NAME: &str = "ABC";

/// Store connection and session settings recognized by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// TTL in seconds for new sessions.
    pub default_ttl_secs: u32,
    /// Upper bound on pooled store connections.
    pub max_pool_size: usize,
    /// Pool wait/connect timeout in milliseconds.
    pub timeout_ms: u64,
    pub cookie_name: String,
    pub invalidation_cookie_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_REDIS_PORT,
            username: None,
            password: None,
            default_ttl_secs: DEFAULT_SESSION_TIMEOUT_SECS,
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            timeout_ms: DEFAULT_STORE_TIMEOUT_MS,
            cookie_name: SESSION_COOKIE_NAME.to_string(),
            invalidation_cookie_name: INVALIDATION_COOKIE_NAME.to_string(),
        }
    }
}

/// (init parameter, environment variable) pairs.
const KEYS: &[(&str, &str)] = &[
    ("redis.host", "SESSION_REDIS_HOST"),
    ("redis.port", "SESSION_REDIS_PORT"),
    ("redis.username", "SESSION_REDIS_USERNAME"),
    ("redis.password", "SESSION_REDIS_PASSWORD"),
    ("session.timeout", "SESSION_TIMEOUT_SECS"),
    ("pool.max_size", "SESSION_POOL_MAX_SIZE"),
    ("pool.timeout_ms", "SESSION_POOL_TIMEOUT_MS"),
    ("cookie.name", "SESSION_COOKIE_NAME"),
    ("cookie.invalidation_name", "SESSION_INVALIDATION_COOKIE_NAME"),
];

fn parse_num<T: std::str::FromStr>(param: &str, raw: &str) -> SessionResult<T> {
    raw.trim().parse::<T>().map_err(|_| SessionError::config(format!("{} must be a number, got '{}'", param, raw)))
}

fn non_empty(raw: &str) -> Option<String> {
    let t = raw.trim();
    if t.is_empty() { None } else { Some(t.to_string()) }
}

impl SessionConfig {
    /// Build from init-style parameters (`redis.host`, `redis.port`, ...).
    /// Unknown keys are ignored; empty values fall back to defaults.
    pub fn from_params(params: &HashMap<String, String>) -> SessionResult<Self> {
        let mut cfg = Self::default();
        for (param, _) in KEYS {
            if let Some(raw) = params.get(*param) {
                cfg.apply(param, raw)?;
            }
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build from `SESSION_*` environment variables.
    pub fn from_env() -> SessionResult<Self> {
        let params: HashMap<String, String> = KEYS
            .iter()
            .filter_map(|(param, var)| std::env::var(var).ok().map(|v| (param.to_string(), v)))
            .collect();
        Self::from_params(&params)
    }

    fn apply(&mut self, param: &str, raw: &str) -> SessionResult<()> {
        if raw.trim().is_empty() { return Ok(()); }
        match param {
            "redis.host" => self.host = raw.trim().to_string(),
            "redis.port" => self.port = parse_num(param, raw)?,
            "redis.username" => self.username = non_empty(raw),
            "redis.password" => self.password = Some(raw.to_string()),
            "session.timeout" => self.default_ttl_secs = parse_num(param, raw)?,
            "pool.max_size" => self.max_pool_size = parse_num(param, raw)?,
            "pool.timeout_ms" => self.timeout_ms = parse_num(param, raw)?,
            "cookie.name" => self.cookie_name = raw.trim().to_string(),
            "cookie.invalidation_name" => self.invalidation_cookie_name = raw.trim().to_string(),
            _ => {}
        }
        Ok(())
    }

    pub fn validate(&self) -> SessionResult<()> {
        if self.host.trim().is_empty() { return Err(SessionError::config("redis.host is required")); }
        if self.port == 0 { return Err(SessionError::config("redis.port must be > 0")); }
        if self.max_pool_size == 0 { return Err(SessionError::config("pool.max_size must be > 0")); }
        if self.timeout_ms == 0 { return Err(SessionError::config("pool.timeout_ms must be > 0")); }
        self.validate_session()
    }

    /// Checks that do not involve the store connection.
    pub fn validate_session(&self) -> SessionResult<()> {
        if self.default_ttl_secs == 0 { return Err(SessionError::config("session.timeout must be > 0")); }
        for name in [&self.cookie_name, &self.invalidation_cookie_name] {
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.') {
                return Err(SessionError::config(format!("invalid cookie name '{}'", name)));
            }
        }
        if self.cookie_name == self.invalidation_cookie_name {
            return Err(SessionError::config("session and invalidation cookie names must differ"));
        }
        Ok(())
    }

    /// `redis://[user[:password]@]host:port` with credentials percent-encoded.
    pub fn redis_url(&self) -> String {
        let user = self.username.as_deref().map(|u| urlencoding::encode(u).into_owned()).unwrap_or_default();
        let auth = match self.password.as_deref() {
            Some(p) => format!("{}:{}@", user, urlencoding::encode(p)),
            None if !user.is_empty() => format!("{}@", user),
            None => String::new(),
        };
        format!("redis://{}{}:{}", auth, self.host, self.port)
    }
}
