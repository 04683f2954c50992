//! Revoked-token store backed by the cache.
//!
//! A revoked token is kept under `token_blacklist:<token>` for as long as the
//! token itself would still validate. Lookups fail open: when the backend is
//! missing or faulted the token is treated as not revoked.

use super::types::AuthError;
use crate::cache::{CacheError, SharedCache, with_timeout};
use crate::metrics::Metrics;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const BLACKLIST_PREFIX: &str = "token_blacklist:";

pub fn blacklist_key(token: &str) -> String {
    format!("{}{}", BLACKLIST_PREFIX, token)
}

#[derive(Clone)]
pub struct TokenBlacklist {
    cache: Option<SharedCache>,
    metrics: Arc<Metrics>,
    op_timeout: Duration,
}

impl TokenBlacklist {
    pub fn new(cache: Option<SharedCache>, metrics: Arc<Metrics>, op_timeout: Duration) -> Self {
        Self {
            cache,
            metrics,
            op_timeout,
        }
    }

    /// Revoke `token` for `remaining` (its leftover lifetime)
    pub async fn revoke(&self, token: &str, remaining: Duration) -> Result<(), AuthError> {
        let cache = self
            .cache
            .as_ref()
            .ok_or_else(|| AuthError::Blacklist("no cache backend configured".to_string()))?;

        if remaining.is_zero() {
            // already expired, nothing left to revoke
            return Ok(());
        }

        let revoked_at = chrono::Utc::now().to_rfc3339();
        with_timeout(
            self.op_timeout,
            cache.set(&blacklist_key(token), &revoked_at, Some(remaining)),
        )
        .await
        .map_err(|e| {
            self.metrics.record_cache_error("set");
            AuthError::Blacklist(e.to_string())
        })?;

        self.metrics.record_token_revoked();
        info!(ttl_secs = remaining.as_secs(), "Token revoked");
        Ok(())
    }

    /// True only when the backend positively reports the token as revoked
    pub async fn is_revoked(&self, token: &str) -> bool {
        let Some(cache) = self.cache.as_ref() else {
            return false;
        };

        match with_timeout(self.op_timeout, cache.get(&blacklist_key(token))).await {
            Ok(_) => true,
            Err(CacheError::NotFound) => false,
            Err(e) => {
                self.metrics.record_cache_error("get");
                warn!(error = %e, "Token blacklist lookup failed, accepting token");
                false
            }
        }
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::MemoryCache;
    use crate::cache::testing::DownCache;

    fn blacklist(cache: Option<SharedCache>) -> (TokenBlacklist, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new().unwrap());
        (
            TokenBlacklist::new(cache, metrics.clone(), Duration::from_secs(1)),
            metrics,
        )
    }

    #[tokio::test]
    async fn test_revoke_then_lookup() {
        let cache: SharedCache = Arc::new(MemoryCache::new());
        let (blacklist, _) = blacklist(Some(cache.clone()));

        assert!(!blacklist.is_revoked("abc").await);
        blacklist.revoke("abc", Duration::from_secs(600)).await.unwrap();
        assert!(blacklist.is_revoked("abc").await);

        let ttl = cache.ttl("token_blacklist:abc").await.unwrap().unwrap();
        assert!(ttl <= Duration::from_secs(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_revocation_expires_with_token() {
        let cache: SharedCache = Arc::new(MemoryCache::new());
        let (blacklist, _) = blacklist(Some(cache));

        blacklist.revoke("short", Duration::from_secs(30)).await.unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(!blacklist.is_revoked("short").await);
    }

    #[tokio::test]
    async fn test_lookup_fails_open() {
        let (blacklist, metrics) = blacklist(Some(Arc::new(DownCache)));
        assert!(!blacklist.is_revoked("abc").await);
        assert_eq!(metrics.cache_error_count("get"), 1);

        let (no_backend, _) = self::blacklist(None);
        assert!(!no_backend.is_revoked("abc").await);
    }

    #[tokio::test]
    async fn test_revoke_reports_backend_failure() {
        let (blacklist, _) = blacklist(Some(Arc::new(DownCache)));
        let result = blacklist.revoke("abc", Duration::from_secs(60)).await;
        assert!(matches!(result, Err(AuthError::Blacklist(_))));

        let (no_backend, _) = self::blacklist(None);
        assert!(no_backend.revoke("abc", Duration::from_secs(60)).await.is_err());
    }
}
