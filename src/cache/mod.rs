//! # Cache Backend Module
//!
//! This module defines the key/value store that backs rate-limit counters, block
//! records, the persisted rate-limit policy and the token blacklist.
//!
//! ## Features
//!
//! - **Single Capability Trait**: `CacheBackend` exposes get/set/delete/keys/ttl and nothing else
//! - **Redis Implementation**: `RedisCache` for production deployments
//! - **In-Memory Implementation**: `MemoryCache` for tests and single-node development runs
//! - **Housekeeping**: `sweeper` removes rate-limit keys that lost their expiry
//!
//! ## TTL Semantics
//!
//! `set` takes an `Option<Duration>`: `None` stores the value without expiry.
//! `ttl` answers `Ok(None)` for a key without expiry and `Err(CacheError::NotFound)`
//! for a key that does not exist (or has already lapsed).

pub mod memory;
pub mod redis_cache;
pub mod sweeper;
#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

///////////////////////////////////////////////////////////////////////////////
//****                         Public Types                              ****//
///////////////////////////////////////////////////////////////////////////////

/// Shared handle to whichever backend the server was started with
pub type SharedCache = Arc<dyn CacheBackend>;

/// Errors returned by cache backends
#[derive(Debug, Error)]
pub enum CacheError {
    /// The key does not exist or has expired
    #[error("key not found")]
    NotFound,

    /// The backend could not be reached (connection refused, dropped, ...)
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    /// The call did not complete within the configured bound
    #[error("cache operation timed out")]
    Timeout,

    /// The backend answered with an error
    #[error("cache backend error: {0}")]
    Backend(String),
}

impl CacheError {
    /// True when the error means the backend itself is unusable rather than a
    /// single command failing
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CacheError::Unavailable(_) | CacheError::Timeout)
    }
}

/// Key/value store with per-key expiry
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Read a value; `CacheError::NotFound` when absent
    async fn get(&self, key: &str) -> Result<String, CacheError>;

    /// Write a value, replacing any previous value and expiry
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Remove a key; removing an absent key is not an error
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// List keys matching a glob pattern (`*` wildcard)
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError>;

    /// Remaining time to live; `Ok(None)` when the key never expires
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError>;

    /// Round-trip check used by the health endpoint
    async fn ping(&self) -> Result<(), CacheError>;
}

///////////////////////////////////////////////////////////////////////////////
//****                       Public Functions                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Open the backend named by a URL.
///
/// `memory://` selects the in-process store; anything else is handed to Redis.
pub async fn connect(url: &str) -> Result<SharedCache, CacheError> {
    if url.starts_with("memory://") {
        return Ok(Arc::new(memory::MemoryCache::new()));
    }
    let cache = redis_cache::RedisCache::connect(url).await?;
    Ok(Arc::new(cache))
}

/// Bound a cache call; an elapsed deadline becomes `CacheError::Timeout`
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, CacheError>
where
    F: Future<Output = Result<T, CacheError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(CacheError::Timeout))
}

/// Match `key` against a glob pattern where `*` matches any run of characters
pub(crate) fn glob_match(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];
    if !key.starts_with(first) || key.len() < first.len() + last.len() || !key.ends_with(last) {
        return false;
    }

    let mut rest = &key[first.len()..key.len() - last.len()];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    true
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////
