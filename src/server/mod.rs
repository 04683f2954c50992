//! Server module for Parcelgate.
//!
//! This module wires the shared state together and runs the HTTP server until
//! a shutdown signal arrives.
//!
//! # Features
//!
//! - **State Assembly**: Metrics registry, rate limit policy, limiter and authenticator built once and shared by `Arc`
//! - **Degraded Start**: An unreachable cache backend is logged and the server runs without one
//! - **Background Services**: Cache housekeeping sweeper and rate limit policy reloader, tracked by the shutdown coordinator
//! - **Graceful Shutdown**: SIGINT/SIGTERM drain in-flight requests, then background tasks get a bounded grace period
//!
//! # Startup Order
//!
//! 1. Open (and create if needed) the SQLite database, create the schema
//! 2. Connect the cache backend
//! 3. Build the shared state and load the persisted rate limit policy
//! 4. Spawn background services
//! 5. Bind and serve with client address information

pub mod shutdown;

use self::shutdown::ShutdownCoordinator;
use crate::AppState;
use crate::auth::{AuthError, Authenticator, TokenBlacklist, jwt::JwtConfig};
use crate::cache::{self, SharedCache, sweeper};
use crate::database::DatabaseManager;
use crate::env::AppConfig;
use crate::metrics::Metrics;
use crate::rate_limiter::policy::spawn_reloader;
use crate::rate_limiter::{RateLimitConfig, RateLimitPolicy, RateLimiter};
use crate::routing::router::create_router;
use sqlx::SqlitePool;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Grace period for background tasks after the server stops accepting requests
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

///////////////////////////////////////////////////////////////////////////////
//****                         Public Structs                            ****//
///////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JWT configuration error: {0}")]
    Jwt(#[from] AuthError),

    #[error("metrics registry error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

///////////////////////////////////////////////////////////////////////////////
//****                       Public Functions                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Open the configured database and make sure the schema exists
pub async fn open_database(config: &AppConfig) -> Result<SqlitePool, StartupError> {
    let manager = DatabaseManager::connect_with_file_creation(&config.database_url).await?;
    manager.initialize().await?;
    Ok(manager.into_pool())
}

/// Connect the configured cache backend, or run without one
pub async fn connect_cache(config: &AppConfig) -> Option<SharedCache> {
    let url = config.redis_url.as_deref()?;
    match cache::with_timeout(config.cache_timeout, cache::connect(url)).await {
        Ok(backend) => {
            info!(url = %url, "Cache backend connected");
            Some(backend)
        }
        Err(e) => {
            warn!(
                url = %url,
                error = %e,
                "Cache backend unreachable, rate limiting and token revocation are disabled"
            );
            None
        }
    }
}

/// Token settings from the validated environment
pub fn jwt_config(config: &AppConfig) -> Result<JwtConfig, AuthError> {
    JwtConfig::new(config.jwt_secret.clone(), config.jwt_issuer.clone())
        .with_algorithm(&config.jwt_algorithm)
}

/// Build the shared state without touching the network
pub fn build_state(
    db: SqlitePool,
    cache: Option<SharedCache>,
    config: AppConfig,
) -> Result<AppState, StartupError> {
    let metrics = Arc::new(Metrics::new()?);

    let policy = Arc::new(RateLimitPolicy::new(
        RateLimitConfig::default(),
        cache.clone(),
        config.cache_timeout,
    ));
    let rate_limiter = Arc::new(
        RateLimiter::new(cache.clone(), policy.clone(), metrics.clone())
            .with_op_timeout(config.cache_timeout),
    );

    let blacklist = TokenBlacklist::new(cache.clone(), metrics.clone(), config.cache_timeout);
    let jwt = jwt_config(&config)?;
    let authenticator = Arc::new(Authenticator::new(jwt, blacklist));

    Ok(AppState {
        db,
        cache,
        rate_limiter,
        policy,
        authenticator,
        metrics,
        config,
    })
}

/// Start Parcelgate and block until it has shut down
pub async fn start_server(config: AppConfig) -> Result<(), StartupError> {
    let shutdown_coordinator = ShutdownCoordinator::new();

    let pool = open_database(&config).await?;
    let cache = connect_cache(&config).await;
    let state = build_state(pool, cache, config.clone())?;
    state.policy.refresh().await;

    start_background_services(&state, &shutdown_coordinator).await;

    let app = create_router(state.clone());
    let listener = tokio::net::TcpListener::bind(config.bind_address)
        .await
        .map_err(|source| StartupError::Bind {
            addr: config.bind_address,
            source,
        })?;
    info!("Parcelgate running on http://{}", config.bind_address);

    let shutdown_for_server = shutdown_coordinator.clone();
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_for_server.wait_for_shutdown_signal().await;
    })
    .await;

    // Background tasks are told to stop even if the server itself failed
    shutdown_coordinator.initiate_shutdown();
    shutdown_coordinator
        .wait_for_tasks_completion(TASK_SHUTDOWN_TIMEOUT)
        .await;
    state.db.close().await;

    match served {
        Ok(()) => {
            info!("Parcelgate shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!("Parcelgate server error: {}", e);
            Err(StartupError::Serve(e))
        }
    }
}

/// Start all background services with shutdown awareness
async fn start_background_services(state: &AppState, shutdown_coordinator: &ShutdownCoordinator) {
    let Some(cache) = state.cache.clone() else {
        info!("No cache backend, housekeeping sweeper and policy reloader not started");
        return;
    };

    let sweeper = sweeper::spawn_sweeper(
        cache,
        state.config.cache_sweep_interval,
        state.config.cache_timeout,
        shutdown_coordinator,
    );
    shutdown_coordinator.track("cache-sweeper", sweeper).await;

    let reloader = spawn_reloader(
        state.policy.clone(),
        state.config.policy_reload_interval,
        shutdown_coordinator,
    );
    shutdown_coordinator.track("policy-reloader", reloader).await;
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////
