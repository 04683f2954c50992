//! Rate limit policy: per-role budgets, the anonymous budget and the block
//! duration, persisted as JSON under `rate_limit_config`.
//!
//! A missing persisted config is normal on first boot and leaves the
//! in-memory config alone. A present but unreadable one is reported to the
//! caller, who decides whether to keep running on the current config.
//!
//! A running server re-reads the persisted config on an interval, so changes
//! made from the CLI or through another instance reach it without a restart.

use crate::auth::types::ROLE_CLIENT;
use crate::cache::{CacheError, SharedCache, with_timeout};
use crate::server::shutdown::{ShutdownAwareTask, ShutdownCoordinator};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Cache key holding the persisted policy
pub const CONFIG_KEY: &str = "rate_limit_config";

/// Role used when a caller's role is unknown or missing
pub const FALLBACK_ROLE: &str = ROLE_CLIENT;

/// Budget for authenticated callers when the map has no `client` entry
pub const DEFAULT_AUTHENTICATED_LIMIT: u32 = 30;

///////////////////////////////////////////////////////////////////////////////
//****                         Public Structs                            ****//
///////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("no cache backend configured")]
    NoBackend,

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("stored rate limit config is corrupt: {0}")]
    Corrupt(#[source] serde_json::Error),

    #[error("failed to serialize rate limit config: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Requests-per-window budgets and the anonymous block duration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub authenticated_limits: BTreeMap<String, u32>,
    pub unauthenticated_limit: u32,
    #[serde(rename = "block_duration")]
    pub block_duration_minutes: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let mut authenticated_limits = BTreeMap::new();
        authenticated_limits.insert("client".to_string(), 30);
        authenticated_limits.insert("courier".to_string(), 137);

        Self {
            authenticated_limits,
            unauthenticated_limit: 15,
            block_duration_minutes: 1,
        }
    }
}

impl RateLimitConfig {
    /// Resolve the role used for scoping and its budget.
    ///
    /// Roles missing from the map (or no role at all) fall back to `client`.
    pub fn authenticated_limit<'a>(&'a self, role: Option<&'a str>) -> (&'a str, u32) {
        if let Some(role) = role {
            if let Some(limit) = self.authenticated_limits.get(role) {
                return (role, *limit);
            }
        }
        let limit = self
            .authenticated_limits
            .get(FALLBACK_ROLE)
            .copied()
            .unwrap_or(DEFAULT_AUTHENTICATED_LIMIT);
        (FALLBACK_ROLE, limit)
    }

    pub fn block_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.block_duration_minutes) * 60)
    }
}

/// Live policy shared by the limiter, the operator endpoints and the CLI
pub struct RateLimitPolicy {
    config: RwLock<RateLimitConfig>,
    /// Held by every writer of `config`, so a swap and its save (or a reload)
    /// never interleave with another writer
    updates: Mutex<()>,
    cache: Option<SharedCache>,
    op_timeout: Duration,
}

impl RateLimitPolicy {
    pub fn new(config: RateLimitConfig, cache: Option<SharedCache>, op_timeout: Duration) -> Self {
        Self {
            config: RwLock::new(config),
            updates: Mutex::new(()),
            cache,
            op_timeout,
        }
    }

    /// Copy of the current config for one evaluation
    pub async fn snapshot(&self) -> RateLimitConfig {
        self.config.read().await.clone()
    }

    /// Replace the in-memory config with the persisted one, if any
    pub async fn load_from_backend(&self) -> Result<(), PolicyError> {
        let Some(cache) = self.cache.as_ref() else {
            debug!("No cache backend, keeping in-memory rate limit config");
            return Ok(());
        };

        let _writer = self.updates.lock().await;
        let raw = match with_timeout(self.op_timeout, cache.get(CONFIG_KEY)).await {
            Ok(raw) => raw,
            Err(CacheError::NotFound) => {
                debug!("No persisted rate limit config, keeping in-memory config");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let loaded: RateLimitConfig = serde_json::from_str(&raw).map_err(PolicyError::Corrupt)?;
        let mut current = self.config.write().await;
        if *current != loaded {
            *current = loaded;
            info!("Applied persisted rate limit config");
        }
        Ok(())
    }

    /// Load the persisted config, keeping the current one on any failure
    pub async fn refresh(&self) {
        match self.load_from_backend().await {
            Ok(()) => {}
            Err(e @ PolicyError::Corrupt(_)) => {
                error!(error = %e, "Ignoring corrupt persisted rate limit config");
            }
            Err(e) => {
                warn!(error = %e, "Could not load persisted rate limit config");
            }
        }
    }

    /// Persist the in-memory config without expiry
    pub async fn save_to_backend(&self) -> Result<(), PolicyError> {
        let cache = self.cache.as_ref().ok_or(PolicyError::NoBackend)?;
        let raw = serde_json::to_string(&*self.config.read().await).map_err(PolicyError::Serialize)?;
        with_timeout(self.op_timeout, cache.set(CONFIG_KEY, &raw, None)).await?;
        debug!("Persisted rate limit config");
        Ok(())
    }

    /// Swap in `new_config`, then persist it.
    ///
    /// A persistence failure is returned but the swap stays applied.
    pub async fn update(&self, new_config: RateLimitConfig) -> Result<(), PolicyError> {
        let _writer = self.updates.lock().await;
        *self.config.write().await = new_config;
        info!("Rate limit config updated");
        self.save_to_backend().await
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                       Public Functions                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Spawn the reload loop; it exits once the coordinator broadcasts shutdown
pub fn spawn_reloader(
    policy: Arc<RateLimitPolicy>,
    interval: Duration,
    coordinator: &ShutdownCoordinator,
) -> JoinHandle<()> {
    let mut task = ShutdownAwareTask::new(coordinator);

    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Rate limit policy reloader started");
        while !task.wait_or_shutdown(interval).await {
            policy.refresh().await;
        }
        info!("Rate limit policy reloader stopped");
    })
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////
