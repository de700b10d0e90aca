//! Redis backend over a bounded `deadpool-redis` pool.
//!
//! Each operation checks one connection out of the pool right before its round
//! trip; the `Connection` guard returns it to the pool when it goes out of scope,
//! whether or not the command succeeded.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{redis, Config as RedisPoolConfig, Connection, Pool, PoolConfig, Runtime, Timeouts};
use tracing::{debug, info};

use super::backend::KvBackend;
use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};

#[derive(Clone)]
pub struct RedisBackend {
    pool: Pool,
    label: String,
}

impl RedisBackend {
    /// Build the pool from validated configuration. Does not connect yet.
    pub fn from_config(cfg: &SessionConfig) -> SessionResult<Self> {
        cfg.validate()?;
        let mut pool_cfg = RedisPoolConfig::from_url(cfg.redis_url());
        let wait = Duration::from_millis(cfg.timeout_ms);
        pool_cfg.pool = Some(PoolConfig {
            max_size: cfg.max_pool_size,
            timeouts: Timeouts { wait: Some(wait), create: Some(wait), recycle: Some(wait) },
            ..Default::default()
        });
        let pool = pool_cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| SessionError::config(format!("cannot build redis pool: {}", e)))?;
        let label = format!("redis://{}:{}", cfg.host, cfg.port);
        debug!(target: "remote_session::store", "redis pool created for {} (max_size={})", label, cfg.max_pool_size);
        Ok(Self { pool, label })
    }

    /// Wrap an existing pool (shared with other parts of an application).
    pub fn from_pool(pool: Pool, label: impl Into<String>) -> Self { Self { pool, label: label.into() } }

    async fn conn(&self) -> SessionResult<Connection> {
        Ok(self.pool.get().await?)
    }
}

#[async_trait]
impl KvBackend for RedisBackend {
    async fn hash_get_all(&self, key: &str) -> SessionResult<HashMap<String, String>> {
        let mut conn = self.conn().await?;
        let map: HashMap<String, String> = redis::cmd("HGETALL").arg(key).query_async(&mut conn).await?;
        Ok(map)
    }

    async fn hash_write(&self, key: &str, fields: &[(String, String)], replace: bool, ttl_secs: u32) -> SessionResult<()> {
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        if replace {
            pipe.cmd("DEL").arg(key).ignore();
        }
        if !fields.is_empty() {
            let hset = pipe.cmd("HSET").arg(key);
            for (field, value) in fields {
                hset.arg(field).arg(value);
            }
            hset.ignore();
        }
        pipe.cmd("EXPIRE").arg(key).arg(ttl_secs).ignore();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl_secs: u32) -> SessionResult<bool> {
        let mut conn = self.conn().await?;
        let applied: i64 = redis::cmd("EXPIRE").arg(key).arg(ttl_secs).query_async(&mut conn).await?;
        Ok(applied == 1)
    }

    async fn delete(&self, key: &str) -> SessionResult<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn ping(&self) -> SessionResult<()> {
        let mut conn = self.conn().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        debug!(target: "remote_session::store", "{} answered {}", self.label, pong);
        Ok(())
    }

    fn close(&self) {
        self.pool.close();
        info!(target: "remote_session::store", "closed redis pool for {}", self.label);
    }

    fn describe(&self) -> String { self.label.clone() }
}
