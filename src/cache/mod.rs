//! Shared external cache tier.
//!
//! [`SharedCache`] is the small set of key-value and sorted-set primitives the
//! delivery store needs from a cache that outlives the process and is visible
//! to every server instance. [`RedisCache`] is the production backend;
//! [`MemoryCache`] keeps the same semantics (including TTLs) inside one
//! process for tests and single-node runs.

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::AppError;

pub use self::memory::MemoryCache;
pub use self::redis::RedisCache;

#[async_trait]
pub trait SharedCache: Send + Sync {
    /// Stores `value` under `key`, replacing any previous value and resetting its TTL.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AppError>;

    async fn get(&self, key: &str) -> Result<Option<String>, AppError>;

    async fn delete(&self, key: &str) -> Result<(), AppError>;

    /// Sets the TTL of an existing key. Missing keys are left alone.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), AppError>;

    /// Adds `member` to the sorted set at `key` with `score`, then trims the
    /// set to the `cap` highest-scored members.
    async fn push_capped(&self, key: &str, score: i64, member: &str, cap: usize) -> Result<(), AppError>;

    /// Up to `limit` members of the sorted set, highest score first.
    async fn newest(&self, key: &str, limit: usize) -> Result<Vec<String>, AppError>;
}
