//! Periodic housekeeping for rate-limit and blacklist keys.
//!
//! Counter and block keys must always carry an expiry. A key that lost it
//! (or whose expiry lapsed on a store that does not evict promptly) would
//! otherwise pin a requester at its old count forever, so the sweeper deletes
//! anything under `rate_limit:*` that has no positive TTL left. Revoked
//! tokens are only removed once their expiry has lapsed; a revocation without
//! expiry is left alone.
//!
//! Every backend call is bounded by the operation timeout, and a sweep in
//! progress is abandoned as soon as shutdown is signalled.

use super::{CacheError, SharedCache, with_timeout};
use crate::auth::blacklist::BLACKLIST_PREFIX;
use crate::server::shutdown::{ShutdownAwareTask, ShutdownCoordinator};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Pattern covering counter and block keys; the policy key sits outside it
pub const SWEEP_PATTERN: &str = "rate_limit:*";

///////////////////////////////////////////////////////////////////////////////
//****                       Public Functions                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Run one sweep over every swept prefix, returning the number of keys deleted
pub async fn sweep_once(cache: &SharedCache, op_timeout: Duration) -> Result<usize, CacheError> {
    let blacklist_pattern = format!("{}*", BLACKLIST_PREFIX);
    let mut removed = sweep_pattern(cache, SWEEP_PATTERN, true, op_timeout).await?;
    removed += sweep_pattern(cache, &blacklist_pattern, false, op_timeout).await?;
    Ok(removed)
}

/// Spawn the sweeper loop; it exits once the coordinator broadcasts shutdown
pub fn spawn_sweeper(
    cache: SharedCache,
    interval: Duration,
    op_timeout: Duration,
    coordinator: &ShutdownCoordinator,
) -> JoinHandle<()> {
    let mut task = ShutdownAwareTask::new(coordinator);

    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Cache sweeper started");
        while !task.wait_or_shutdown(interval).await {
            match task.run_or_shutdown(sweep_once(&cache, op_timeout)).await {
                None => break,
                Some(Ok(0)) => {}
                Some(Ok(removed)) => info!(removed, "Cache sweep removed stale keys"),
                Some(Err(e)) => warn!(error = %e, "Cache sweep failed"),
            }
        }
        info!("Cache sweeper stopped");
    })
}

///////////////////////////////////////////////////////////////////////////////
//****                        Private Functions                          ****//
///////////////////////////////////////////////////////////////////////////////

/// Delete keys matching `pattern` whose TTL lapsed; `unexpiring` also
/// removes keys that never had one
async fn sweep_pattern(
    cache: &SharedCache,
    pattern: &str,
    unexpiring: bool,
    op_timeout: Duration,
) -> Result<usize, CacheError> {
    let keys = with_timeout(op_timeout, cache.keys(pattern)).await?;
    let mut removed = 0;

    for key in keys {
        let stale = match with_timeout(op_timeout, cache.ttl(&key)).await {
            Ok(Some(remaining)) => remaining.is_zero(),
            Ok(None) => unexpiring,
            Err(CacheError::NotFound) => true,
            Err(e) => {
                warn!(key = %key, error = %e, "Could not read TTL during sweep");
                continue;
            }
        };

        if stale {
            match with_timeout(op_timeout, cache.delete(&key)).await {
                Ok(()) => {
                    debug!(key = %key, "Swept stale key");
                    removed += 1;
                }
                Err(e) => warn!(key = %key, error = %e, "Could not delete stale key"),
            }
        }
    }

    Ok(removed)
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::blacklist::blacklist_key;
    use crate::cache::memory::MemoryCache;
    use crate::cache::testing::StalledCache;
    use std::sync::Arc;

    const OP_TIMEOUT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn test_sweep_removes_keys_without_expiry() {
        let cache: SharedCache = Arc::new(MemoryCache::new());
        cache
            .set("rate_limit:unauth:1.2.3.4:count", "9", None)
            .await
            .unwrap();
        cache
            .set(
                "rate_limit:auth:client:42:count",
                "3",
                Some(Duration::from_secs(60)),
            )
            .await
            .unwrap();
        cache.set("rate_limit_config", "{}", None).await.unwrap();

        assert_eq!(sweep_once(&cache, OP_TIMEOUT).await.unwrap(), 1);

        assert!(cache.get("rate_limit:unauth:1.2.3.4:count").await.is_err());
        assert_eq!(
            cache.get("rate_limit:auth:client:42:count").await.unwrap(),
            "3"
        );
        assert_eq!(cache.get("rate_limit_config").await.unwrap(), "{}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_lapsed_keys() {
        let memory = MemoryCache::new();
        let cache: SharedCache = Arc::new(memory.clone());
        cache
            .set("rate_limit:block:5.6.7.8", "x", Some(Duration::from_secs(60)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(memory.len().await, 1);

        assert_eq!(sweep_once(&cache, OP_TIMEOUT).await.unwrap(), 1);
        assert_eq!(memory.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_lapsed_revocations() {
        let memory = MemoryCache::new();
        let cache: SharedCache = Arc::new(memory.clone());
        let lapsed = blacklist_key("expired.token.value");
        let live = blacklist_key("live.token.value");
        cache
            .set(&lapsed, "revoked", Some(Duration::from_secs(30)))
            .await
            .unwrap();
        cache
            .set(&live, "revoked", Some(Duration::from_secs(3600)))
            .await
            .unwrap();
        let unexpiring = blacklist_key("unexpiring.token.value");
        cache.set(&unexpiring, "revoked", None).await.unwrap();

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(sweep_once(&cache, OP_TIMEOUT).await.unwrap(), 1);

        assert_eq!(memory.len().await, 2);
        assert!(cache.get(&live).await.is_ok());
        assert!(cache.get(&unexpiring).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_against_stalled_backend_times_out() {
        let cache: SharedCache = Arc::new(StalledCache);
        let result = sweep_once(&cache, OP_TIMEOUT).await;
        assert!(matches!(result, Err(CacheError::Timeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_and_stops_on_shutdown() {
        let memory = MemoryCache::new();
        let cache: SharedCache = Arc::new(memory.clone());
        cache.set("rate_limit:block:9.9.9.9", "x", None).await.unwrap();

        let coordinator = ShutdownCoordinator::new();
        let handle = spawn_sweeper(cache, Duration::from_secs(300), OP_TIMEOUT, &coordinator);

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert_eq!(memory.len().await, 0);

        coordinator.initiate_shutdown();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_sweep_stops_promptly_on_shutdown() {
        let cache: SharedCache = Arc::new(StalledCache);
        let coordinator = ShutdownCoordinator::new();
        // operation timeout far beyond the shutdown window
        let handle = spawn_sweeper(
            cache,
            Duration::from_secs(10),
            Duration::from_secs(600),
            &coordinator,
        );

        // sweep is now in flight against the stalled backend
        tokio::time::sleep(Duration::from_secs(11)).await;
        coordinator.initiate_shutdown();

        tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .expect("sweeper should abandon the sweep")
            .unwrap();
    }
}
