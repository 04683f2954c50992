//! Rate limiter core.
//!
//! Every decision round-trips through the cache backend; the limiter keeps no
//! per-client state of its own, so any number of parcelgate instances can
//! share one backend. Read-then-write of a counter is not atomic: two
//! concurrent requests from one identity may both read N and both write N+1.
//! That under-count is accepted.
//!
//! The window is fixed, not rolling. Only the write that creates a counter
//! sets the full window as TTL; later writes reapply whatever TTL is left.

use super::identity::ClientIdentity;
use super::policy::{RateLimitConfig, RateLimitPolicy};
use super::{block_key, counter_key};
use crate::cache::{CacheError, SharedCache, with_timeout};
use crate::metrics::{Metrics, Outcome, Scope};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Length of one counting window
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Bound on each individual cache call
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(2);

///////////////////////////////////////////////////////////////////////////////
//****                         Public Structs                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Budget information for an allowed request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allowance {
    /// Not counted: no backend, or the backend faulted
    Unlimited,
    Counted { limit: u32, remaining: u32 },
}

/// Outcome of one rate-limit evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The client IP has a live block record
    Blocked { retry_after_secs: u64 },
    Allowed(Allowance),
    /// The counter went over the scope's limit in this window
    Rejected { limit: u32, retry_after_secs: u64 },
}

/// Counter key and budget resolved for one request
struct Bucket {
    key: String,
    limit: u32,
    scope: Scope,
}

pub struct RateLimiter {
    cache: Option<SharedCache>,
    policy: Arc<RateLimitPolicy>,
    metrics: Arc<Metrics>,
    window: Duration,
    op_timeout: Duration,
}

impl RateLimiter {
    pub fn new(
        cache: Option<SharedCache>,
        policy: Arc<RateLimitPolicy>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            cache,
            policy,
            metrics,
            window: DEFAULT_WINDOW,
            op_timeout: DEFAULT_OP_TIMEOUT,
        }
    }

    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    /// Decide whether `identity` may proceed, counting the request if so
    pub async fn check(&self, identity: &ClientIdentity) -> Decision {
        let Some(cache) = self.cache.as_ref() else {
            self.metrics.record_decision(Outcome::Unrestricted, Scope::None);
            return Decision::Allowed(Allowance::Unlimited);
        };
        let config = self.policy.snapshot().await;

        // An existing block record rejects without touching any counter
        let block = block_key(&identity.ip);
        match with_timeout(self.op_timeout, cache.get(&block)).await {
            Ok(_) => {
                let retry_after_secs = config.block_duration().as_secs();
                info!(client_ip = %identity.ip, retry_after_secs, "Request from blocked client rejected");
                self.metrics.record_decision(Outcome::Blocked, Scope::None);
                return Decision::Blocked { retry_after_secs };
            }
            Err(CacheError::NotFound) => {}
            Err(e) if e.is_unavailable() => return self.fail_open("get", Scope::None, &e),
            Err(e) => {
                // not a reachability problem; carry on as unblocked
                self.metrics.record_cache_error("get");
                warn!(key = %block, error = %e, "Block lookup failed, treating client as unblocked");
            }
        }

        let bucket = self.bucket(identity, &config);

        let previous = match with_timeout(self.op_timeout, cache.get(&bucket.key)).await {
            // limits are u32, so anything larger is as good as garbage
            Ok(raw) => raw.trim().parse::<u32>().map(u64::from).unwrap_or_else(|_| {
                warn!(key = %bucket.key, value = %raw, "Unparseable counter, restarting at zero");
                0
            }),
            Err(CacheError::NotFound) => 0,
            Err(e) if e.is_unavailable() => return self.fail_open("get", bucket.scope, &e),
            Err(e) => {
                self.metrics.record_cache_error("get");
                warn!(key = %bucket.key, error = %e, "Counter read failed, restarting at zero");
                0
            }
        };

        let mut count = previous.saturating_add(1);
        let ttl = if previous == 0 {
            self.window
        } else {
            match with_timeout(self.op_timeout, cache.ttl(&bucket.key)).await {
                Ok(Some(remaining)) if !remaining.is_zero() => remaining,
                Ok(Some(_)) | Err(CacheError::NotFound) => {
                    // window lapsed between read and write
                    count = 1;
                    self.window
                }
                Ok(None) => {
                    warn!(key = %bucket.key, "Counter had no expiry, restoring full window");
                    self.window
                }
                Err(e) => return self.fail_open("ttl", bucket.scope, &e),
            }
        };

        if let Err(e) = with_timeout(
            self.op_timeout,
            cache.set(&bucket.key, &count.to_string(), Some(ttl)),
        )
        .await
        {
            error!(key = %bucket.key, error = %e, "Failed to persist rate limit counter");
            return self.fail_open("set", bucket.scope, &e);
        }

        if count <= u64::from(bucket.limit) {
            let remaining = (u64::from(bucket.limit) - count) as u32;
            debug!(
                client_ip = %identity.ip,
                key = %bucket.key,
                count,
                limit = bucket.limit,
                remaining,
                "Rate limit check passed"
            );
            self.metrics.record_decision(Outcome::Allowed, bucket.scope);
            return Decision::Allowed(Allowance::Counted {
                limit: bucket.limit,
                remaining,
            });
        }

        info!(
            client_ip = %identity.ip,
            key = %bucket.key,
            count,
            limit = bucket.limit,
            "Rate limit exceeded"
        );
        if identity.auth.is_none() {
            self.plant_block(cache, &block, count, bucket.limit, &config).await;
        }
        self.metrics.record_decision(Outcome::Rejected, bucket.scope);
        Decision::Rejected {
            limit: bucket.limit,
            retry_after_secs: self.window.as_secs(),
        }
    }

    /// Remove the block record for `ip`
    pub async fn unblock(&self, ip: &str) -> Result<(), CacheError> {
        let cache = self
            .cache
            .as_ref()
            .ok_or_else(|| CacheError::Unavailable("no cache backend configured".to_string()))?;
        with_timeout(self.op_timeout, cache.delete(&block_key(ip))).await?;
        info!(client_ip = %ip, "Block record removed");
        Ok(())
    }

    fn bucket(&self, identity: &ClientIdentity, config: &RateLimitConfig) -> Bucket {
        match &identity.auth {
            Some(context) => {
                let (role, limit) = config.authenticated_limit(context.role.as_deref());
                Bucket {
                    key: counter_key(&format!("auth:{}", role), &context.user_id.to_string()),
                    limit,
                    scope: Scope::Authenticated,
                }
            }
            None => Bucket {
                key: counter_key("unauth", &identity.ip),
                limit: config.unauthenticated_limit,
                scope: Scope::Unauthenticated,
            },
        }
    }

    async fn plant_block(
        &self,
        cache: &SharedCache,
        key: &str,
        count: u64,
        limit: u32,
        config: &RateLimitConfig,
    ) {
        let duration = config.block_duration();
        if duration.is_zero() {
            return;
        }

        let record = format!(
            "count={} limit={} at={}",
            count,
            limit,
            chrono::Utc::now().to_rfc3339()
        );
        match with_timeout(self.op_timeout, cache.set(key, &record, Some(duration))).await {
            Ok(()) => {
                self.metrics.record_block();
                info!(key = %key, block_secs = duration.as_secs(), "Client blocked");
            }
            Err(e) => {
                self.metrics.record_cache_error("set");
                error!(key = %key, error = %e, "Failed to write block record");
            }
        }
    }

    fn fail_open(&self, operation: &str, scope: Scope, err: &CacheError) -> Decision {
        self.metrics.record_cache_error(operation);
        self.metrics.record_decision(Outcome::Unrestricted, scope);
        warn!(operation, error = %err, "Cache backend fault, passing request unrestricted");
        Decision::Allowed(Allowance::Unlimited)
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthContext;
    use crate::cache::memory::MemoryCache;
    use crate::cache::testing::{DownCache, ReadOnlyCache, StalledCache};

    fn limiter_with(cache: Option<SharedCache>, config: RateLimitConfig) -> (RateLimiter, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new().unwrap());
        let policy = Arc::new(RateLimitPolicy::new(config, cache.clone(), DEFAULT_OP_TIMEOUT));
        (RateLimiter::new(cache, policy, metrics.clone()), metrics)
    }

    fn limiter(cache: &SharedCache) -> (RateLimiter, Arc<Metrics>) {
        limiter_with(Some(cache.clone()), RateLimitConfig::default())
    }

    fn memory() -> SharedCache {
        Arc::new(MemoryCache::new())
    }

    fn client(user_id: i64, role: Option<&str>) -> ClientIdentity {
        ClientIdentity::authenticated(
            "1.2.3.4",
            AuthContext::new(user_id, role.map(str::to_string)),
        )
    }

    #[tokio::test]
    async fn test_first_request_allowed() {
        let cache = memory();
        let (limiter, metrics) = limiter(&cache);

        let decision = limiter.check(&ClientIdentity::anonymous("8.8.8.8")).await;
        assert_eq!(
            decision,
            Decision::Allowed(Allowance::Counted { limit: 15, remaining: 14 })
        );
        assert_eq!(
            cache.get("rate_limit:unauth:8.8.8.8:count").await.unwrap(),
            "1"
        );
        assert_eq!(
            metrics.decision_count(Outcome::Allowed, Scope::Unauthenticated),
            1
        );
    }

    #[tokio::test]
    async fn test_remaining_strictly_decreases() {
        let cache = memory();
        let (limiter, _) = limiter(&cache);
        let identity = client(3, Some("courier"));

        let mut last = u32::MAX;
        for _ in 0..20 {
            match limiter.check(&identity).await {
                Decision::Allowed(Allowance::Counted { limit, remaining }) => {
                    assert_eq!(limit, 137);
                    assert!(remaining < last);
                    last = remaining;
                }
                other => panic!("unexpected decision {:?}", other),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_anonymous_scenario_escalates_to_block() {
        let cache = memory();
        let (limiter, metrics) = limiter(&cache);
        let identity = ClientIdentity::anonymous("1.2.3.4");

        for n in 1..=15u32 {
            assert_eq!(
                limiter.check(&identity).await,
                Decision::Allowed(Allowance::Counted { limit: 15, remaining: 15 - n })
            );
        }

        assert_eq!(
            limiter.check(&identity).await,
            Decision::Rejected { limit: 15, retry_after_secs: 60 }
        );
        let record = cache.get("rate_limit:block:1.2.3.4").await.unwrap();
        assert!(record.starts_with("count=16 limit=15 at="));
        assert_eq!(
            cache.ttl("rate_limit:block:1.2.3.4").await.unwrap(),
            Some(Duration::from_secs(60))
        );
        assert_eq!(metrics.block_count(), 1);

        assert_eq!(
            limiter.check(&identity).await,
            Decision::Blocked { retry_after_secs: 60 }
        );
        // blocked requests are not counted
        assert_eq!(cache.get("rate_limit:unauth:1.2.3.4:count").await.unwrap(), "16");
    }

    #[tokio::test]
    async fn test_authenticated_scenario_never_blocks() {
        let cache = memory();
        let (limiter, metrics) = limiter(&cache);
        let identity = client(42, Some("client"));

        for n in 1..=30u32 {
            assert_eq!(
                limiter.check(&identity).await,
                Decision::Allowed(Allowance::Counted { limit: 30, remaining: 30 - n })
            );
        }
        assert_eq!(
            limiter.check(&identity).await,
            Decision::Rejected { limit: 30, retry_after_secs: 60 }
        );

        assert!(matches!(
            cache.get("rate_limit:block:1.2.3.4").await,
            Err(CacheError::NotFound)
        ));
        assert_eq!(
            cache.get("rate_limit:auth:client:42:count").await.unwrap(),
            "31"
        );
        assert_eq!(metrics.block_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_role_uses_client_rate_per_user() {
        let cache = memory();
        let (limiter, _) = limiter(&cache);

        for _ in 0..3 {
            limiter.check(&client(7, Some("dispatcher"))).await;
        }
        let decision = limiter.check(&client(8, None)).await;

        assert_eq!(
            decision,
            Decision::Allowed(Allowance::Counted { limit: 30, remaining: 29 })
        );
        assert_eq!(cache.get("rate_limit:auth:client:7:count").await.unwrap(), "3");
        assert_eq!(cache.get("rate_limit:auth:client:8:count").await.unwrap(), "1");
    }

    #[tokio::test]
    async fn test_block_applies_regardless_of_counter() {
        let cache = memory();
        let (limiter, _) = limiter(&cache);
        cache
            .set("rate_limit:block:1.2.3.4", "manual", Some(Duration::from_secs(60)))
            .await
            .unwrap();

        // even an authenticated caller behind a blocked IP is refused
        for _ in 0..3 {
            assert!(matches!(
                limiter.check(&client(42, Some("client"))).await,
                Decision::Blocked { .. }
            ));
        }
        assert!(cache.get("rate_limit:auth:client:42:count").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_is_not_extended_by_later_requests() {
        let cache = memory();
        let (limiter, _) = limiter(&cache);
        let identity = ClientIdentity::anonymous("2.2.2.2");
        let key = "rate_limit:unauth:2.2.2.2:count";

        limiter.check(&identity).await;
        tokio::time::advance(Duration::from_secs(30)).await;
        limiter.check(&identity).await;

        assert_eq!(cache.get(key).await.unwrap(), "2");
        assert_eq!(cache.ttl(key).await.unwrap(), Some(Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_resets_after_window() {
        let cache = memory();
        let (limiter, _) = limiter(&cache);
        let identity = client(5, Some("client"));

        for _ in 0..10 {
            limiter.check(&identity).await;
        }
        tokio::time::advance(Duration::from_secs(61)).await;

        assert_eq!(
            limiter.check(&identity).await,
            Decision::Allowed(Allowance::Counted { limit: 30, remaining: 29 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_lapses() {
        let cache = memory();
        let (limiter, _) = limiter(&cache);
        let identity = ClientIdentity::anonymous("3.3.3.3");

        for _ in 0..16 {
            limiter.check(&identity).await;
        }
        assert!(matches!(limiter.check(&identity).await, Decision::Blocked { .. }));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(
            limiter.check(&identity).await,
            Decision::Allowed(Allowance::Counted { limit: 15, remaining: 14 })
        );
    }

    #[tokio::test]
    async fn test_zero_limit_always_rejects() {
        let cache = memory();
        let mut config = RateLimitConfig::default();
        config.authenticated_limits.insert("courier".to_string(), 0);
        let (limiter, _) = limiter_with(Some(cache.clone()), config);

        assert_eq!(
            limiter.check(&client(9, Some("courier"))).await,
            Decision::Rejected { limit: 0, retry_after_secs: 60 }
        );
    }

    #[tokio::test]
    async fn test_zero_block_duration_plants_nothing() {
        let cache = memory();
        let config = RateLimitConfig {
            unauthenticated_limit: 1,
            block_duration_minutes: 0,
            ..RateLimitConfig::default()
        };
        let (limiter, _) = limiter_with(Some(cache.clone()), config);
        let identity = ClientIdentity::anonymous("4.4.4.4");

        limiter.check(&identity).await;
        assert!(matches!(limiter.check(&identity).await, Decision::Rejected { .. }));
        assert!(cache.get("rate_limit:block:4.4.4.4").await.is_err());
    }

    #[tokio::test]
    async fn test_unparseable_counter_restarts() {
        let cache = memory();
        let (limiter, _) = limiter(&cache);
        cache
            .set("rate_limit:unauth:5.5.5.5:count", "banana", Some(Duration::from_secs(60)))
            .await
            .unwrap();

        assert_eq!(
            limiter.check(&ClientIdentity::anonymous("5.5.5.5")).await,
            Decision::Allowed(Allowance::Counted { limit: 15, remaining: 14 })
        );
    }

    #[tokio::test]
    async fn test_out_of_range_counter_restarts() {
        let cache = memory();
        let (limiter, _) = limiter(&cache);
        let key = "rate_limit:unauth:9.9.9.9:count";
        cache
            .set(key, &u64::MAX.to_string(), Some(Duration::from_secs(60)))
            .await
            .unwrap();

        assert_eq!(
            limiter.check(&ClientIdentity::anonymous("9.9.9.9")).await,
            Decision::Allowed(Allowance::Counted { limit: 15, remaining: 14 })
        );
        assert_eq!(cache.get(key).await.unwrap(), "1");
    }

    #[tokio::test]
    async fn test_counter_at_u32_max_is_rejected_without_overflow() {
        let cache = memory();
        let (limiter, _) = limiter(&cache);
        cache
            .set(
                "rate_limit:unauth:9.9.9.8:count",
                &u32::MAX.to_string(),
                Some(Duration::from_secs(60)),
            )
            .await
            .unwrap();

        assert!(matches!(
            limiter.check(&ClientIdentity::anonymous("9.9.9.8")).await,
            Decision::Rejected { limit: 15, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_without_expiry_is_repaired() {
        let cache = memory();
        let (limiter, _) = limiter(&cache);
        let key = "rate_limit:unauth:6.6.6.6:count";
        cache.set(key, "4", None).await.unwrap();

        limiter.check(&ClientIdentity::anonymous("6.6.6.6")).await;
        assert_eq!(cache.get(key).await.unwrap(), "5");
        assert_eq!(cache.ttl(key).await.unwrap(), Some(DEFAULT_WINDOW));
    }

    #[tokio::test]
    async fn test_no_backend_is_unrestricted() {
        let (limiter, metrics) = limiter_with(None, RateLimitConfig::default());
        let identity = ClientIdentity::anonymous("1.2.3.4");

        for _ in 0..100 {
            assert_eq!(
                limiter.check(&identity).await,
                Decision::Allowed(Allowance::Unlimited)
            );
        }
        assert_eq!(metrics.decision_count(Outcome::Unrestricted, Scope::None), 100);
    }

    #[tokio::test]
    async fn test_unreachable_backend_fails_open() {
        let cache: SharedCache = Arc::new(DownCache);
        let (limiter, metrics) = limiter(&cache);

        for _ in 0..50 {
            assert_eq!(
                limiter.check(&ClientIdentity::anonymous("1.2.3.4")).await,
                Decision::Allowed(Allowance::Unlimited)
            );
        }
        assert_eq!(metrics.cache_error_count("get"), 50);
    }

    #[tokio::test]
    async fn test_write_failure_fails_open() {
        let cache: SharedCache = Arc::new(ReadOnlyCache::default());
        let (limiter, metrics) = limiter(&cache);

        assert_eq!(
            limiter.check(&ClientIdentity::anonymous("1.2.3.4")).await,
            Decision::Allowed(Allowance::Unlimited)
        );
        assert_eq!(metrics.cache_error_count("set"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_backend_times_out_open() {
        let cache: SharedCache = Arc::new(StalledCache);
        let (limiter, _) = limiter(&cache);

        let decision = limiter.check(&ClientIdentity::anonymous("1.2.3.4")).await;
        assert_eq!(decision, Decision::Allowed(Allowance::Unlimited));
    }

    #[tokio::test]
    async fn test_unblock() {
        let cache = memory();
        let (limiter, _) = limiter(&cache);
        cache.set("rate_limit:block:7.7.7.7", "x", None).await.unwrap();

        limiter.unblock("7.7.7.7").await.unwrap();
        assert!(matches!(
            limiter.check(&ClientIdentity::anonymous("7.7.7.7")).await,
            Decision::Allowed(_)
        ));

        let (without_backend, _) = limiter_with(None, RateLimitConfig::default());
        assert!(without_backend.unblock("7.7.7.7").await.is_err());
    }
}
