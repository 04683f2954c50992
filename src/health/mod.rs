//! # Health Check Module
//!
//! Readiness reporting for Parcelgate. The service depends on two things:
//! the SQLite pool holding the parcel data and the cache backend holding
//! rate-limit counters, block records and revoked tokens.
//!
//! ## Features
//!
//! - **Database Probe**: `SELECT 1` against the pool
//! - **Cache Probe**: `PING` against the backend, bounded by the cache timeout
//! - **Degraded Mode**: A missing or failing cache only degrades the report, since
//!   the rate limiter fails open without it
//!
//! ## Status Rules
//!
//! | database | cache               | status        |
//! |----------|---------------------|---------------|
//! | up       | up or disabled      | `ok`          |
//! | up       | down                | `degraded`    |
//! | down     | any                 | `unavailable` |

use crate::cache::{SharedCache, with_timeout};
use crate::database;
use serde::Serialize;
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::warn;

///////////////////////////////////////////////////////////////////////////////
//****                         Public Structs                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Health of a single dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Up,
    Down,
    Disabled, // No backend configured
}

/// Overall readiness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub database: ComponentStatus,
    pub cache: ComponentStatus,
}

impl HealthReport {
    pub fn from_components(database: ComponentStatus, cache: ComponentStatus) -> Self {
        let status = match (database, cache) {
            (ComponentStatus::Up, ComponentStatus::Down) => HealthStatus::Degraded,
            (ComponentStatus::Up, _) => HealthStatus::Ok,
            _ => HealthStatus::Unavailable,
        };
        Self {
            status,
            database,
            cache,
        }
    }

    pub fn is_serving(&self) -> bool {
        self.status != HealthStatus::Unavailable
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                       Public Functions                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Probe every dependency once
pub async fn check(
    pool: &SqlitePool,
    cache: Option<&SharedCache>,
    cache_timeout: Duration,
) -> HealthReport {
    let database = match database::ping(pool).await {
        Ok(()) => ComponentStatus::Up,
        Err(e) => {
            warn!(error = %e, "database health probe failed");
            ComponentStatus::Down
        }
    };

    let cache = match cache {
        None => ComponentStatus::Disabled,
        Some(cache) => match with_timeout(cache_timeout, cache.ping()).await {
            Ok(()) => ComponentStatus::Up,
            Err(e) => {
                warn!(error = %e, "cache health probe failed");
                ComponentStatus::Down
            }
        },
    };

    HealthReport::from_components(database, cache)
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////
