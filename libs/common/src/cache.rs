//! Ephemeral key-value store shared by the platform services
//!
//! This module defines the [`KeyValueStore`] contract used for session state
//! and its Redis implementation. Every mutation goes through
//! [`KeyValueStore::atomic`], which applies a batch of [`CacheOp`]s as a
//! single MULTI/EXEC transaction.

use async_trait::async_trait;
use redis::{AsyncCommands, Client, Value, aio::MultiplexedConnection};
use tracing::info;

use crate::error::CacheResult;

/// Configuration for Redis connection
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
}

impl RedisConfig {
    /// Create a new RedisConfig from environment variables
    ///
    /// # Environment Variables
    /// - `REDIS_URL`: Redis connection URL (default: "redis://localhost:6379")
    /// - `REDIS_MAX_CONNECTIONS`: Maximum number of connections (default: 10)
    pub fn from_env() -> anyhow::Result<Self> {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let max_connections = std::env::var("REDIS_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);

        Ok(RedisConfig {
            url,
            max_connections,
        })
    }
}

/// A single write inside an atomic batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOp {
    /// `SET key value EX ttl`
    SetEx {
        key: String,
        value: String,
        ttl_seconds: u64,
    },
    /// `SET key value XX EX ttl` - only applied when the key is still present
    SetIfExists {
        key: String,
        value: String,
        ttl_seconds: u64,
    },
    /// `SADD key member`
    SetAdd { key: String, member: String },
    /// `SREM key member`
    SetRemove { key: String, member: String },
    /// `EXPIRE key ttl`
    Expire { key: String, ttl_seconds: u64 },
    /// `DEL key`
    Delete { key: String },
}

/// Ephemeral, TTL-bound key-value store
///
/// Implementations must apply an [`atomic`](KeyValueStore::atomic) batch as a
/// whole: concurrent readers observe either none or all of its effects.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get a string value
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Get several string values, positionally aligned with `keys`
    async fn get_many(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>>;

    /// Check whether a key is present
    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// List the members of a set (empty when the set does not exist)
    async fn members(&self, key: &str) -> CacheResult<Vec<String>>;

    /// Overwrite an existing value without touching its remaining TTL
    ///
    /// Returns `false` when the key no longer exists.
    async fn replace_keep_ttl(&self, key: &str, value: &str) -> CacheResult<bool>;

    /// Apply every operation in one transaction
    ///
    /// The returned flags are aligned with `ops`; a flag is `true` when the
    /// operation changed the store (a key was written, a member added or
    /// removed, a TTL set, a key deleted).
    async fn atomic(&self, ops: Vec<CacheOp>) -> CacheResult<Vec<bool>>;

    /// Check if the store is reachable
    async fn health_check(&self) -> CacheResult<bool>;
}

/// Redis connection pool
#[derive(Clone)]
pub struct RedisPool {
    connection: MultiplexedConnection,
}

impl RedisPool {
    /// Initialize a new Redis connection pool
    pub async fn new(config: &RedisConfig) -> CacheResult<Self> {
        let client = Client::open(config.url.clone())?;
        let connection = client.get_multiplexed_async_connection().await?;
        info!("Redis client initialized with URL: {}", config.url);
        Ok(RedisPool { connection })
    }

    /// Get a connection from the pool
    fn connection(&self) -> MultiplexedConnection {
        self.connection.clone()
    }
}

/// Interpret a transaction reply as "did this operation change anything"
fn reply_applied(reply: &Value) -> bool {
    match reply {
        Value::Nil => false,
        Value::Int(n) => *n > 0,
        _ => true,
    }
}

#[async_trait]
impl KeyValueStore for RedisPool {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.connection();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn get_many(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.connection();
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await?;
        Ok(values)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.connection();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn members(&self, key: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.connection();
        let members: Vec<String> = conn.smembers(key).await?;
        Ok(members)
    }

    async fn replace_keep_ttl(&self, key: &str, value: &str) -> CacheResult<bool> {
        let mut conn = self.connection();
        let reply: Value = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("XX")
            .arg("KEEPTTL")
            .query_async(&mut conn)
            .await?;
        Ok(reply_applied(&reply))
    }

    async fn atomic(&self, ops: Vec<CacheOp>) -> CacheResult<Vec<bool>> {
        if ops.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in &ops {
            match op {
                CacheOp::SetEx {
                    key,
                    value,
                    ttl_seconds,
                } => {
                    pipe.set_ex(key, value, *ttl_seconds);
                }
                CacheOp::SetIfExists {
                    key,
                    value,
                    ttl_seconds,
                } => {
                    pipe.cmd("SET")
                        .arg(key)
                        .arg(value)
                        .arg("XX")
                        .arg("EX")
                        .arg(*ttl_seconds);
                }
                CacheOp::SetAdd { key, member } => {
                    pipe.sadd(key, member);
                }
                CacheOp::SetRemove { key, member } => {
                    pipe.srem(key, member);
                }
                CacheOp::Expire { key, ttl_seconds } => {
                    pipe.expire(key, *ttl_seconds as i64);
                }
                CacheOp::Delete { key } => {
                    pipe.del(key);
                }
            }
        }

        let mut conn = self.connection();
        let replies: Vec<Value> = pipe.query_async(&mut conn).await?;
        Ok(replies.iter().map(reply_applied).collect())
    }

    async fn health_check(&self) -> CacheResult<bool> {
        let mut conn = self.connection();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong == "PONG")
    }
}
