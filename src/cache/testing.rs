//! Faulty backends for exercising fail-open paths in tests.

use super::memory::MemoryCache;
use super::{CacheBackend, CacheError};
use async_trait::async_trait;
use std::time::Duration;

fn refused() -> CacheError {
    CacheError::Unavailable("connection refused".into())
}

/// Every call fails as if the server were unreachable
pub struct DownCache;

#[async_trait]
impl CacheBackend for DownCache {
    async fn get(&self, _key: &str) -> Result<String, CacheError> {
        Err(refused())
    }
    async fn set(&self, _: &str, _: &str, _: Option<Duration>) -> Result<(), CacheError> {
        Err(refused())
    }
    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Err(refused())
    }
    async fn keys(&self, _pattern: &str) -> Result<Vec<String>, CacheError> {
        Err(refused())
    }
    async fn ttl(&self, _key: &str) -> Result<Option<Duration>, CacheError> {
        Err(refused())
    }
    async fn ping(&self) -> Result<(), CacheError> {
        Err(refused())
    }
}

/// Reads are served from memory, writes always fail
#[derive(Default)]
pub struct ReadOnlyCache {
    pub inner: MemoryCache,
}

#[async_trait]
impl CacheBackend for ReadOnlyCache {
    async fn get(&self, key: &str) -> Result<String, CacheError> {
        self.inner.get(key).await
    }
    async fn set(&self, _: &str, _: &str, _: Option<Duration>) -> Result<(), CacheError> {
        Err(CacheError::Backend("READONLY You can't write against a read only replica".into()))
    }
    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Err(CacheError::Backend("READONLY You can't write against a read only replica".into()))
    }
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        self.inner.keys(pattern).await
    }
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        self.inner.ttl(key).await
    }
    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Every call stalls far longer than any sane operation timeout
pub struct StalledCache;

impl StalledCache {
    async fn stall<T>() -> Result<T, CacheError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(CacheError::Timeout)
    }
}

#[async_trait]
impl CacheBackend for StalledCache {
    async fn get(&self, _key: &str) -> Result<String, CacheError> {
        Self::stall().await
    }
    async fn set(&self, _: &str, _: &str, _: Option<Duration>) -> Result<(), CacheError> {
        Self::stall().await
    }
    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Self::stall().await
    }
    async fn keys(&self, _pattern: &str) -> Result<Vec<String>, CacheError> {
        Self::stall().await
    }
    async fn ttl(&self, _key: &str) -> Result<Option<Duration>, CacheError> {
        Self::stall().await
    }
    async fn ping(&self) -> Result<(), CacheError> {
        Self::stall().await
    }
}
