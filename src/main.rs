//! # Parcelgate
//!
//! Parcel delivery REST service with a cache-backed rate limiter in front of
//! every API route.
//!
//! ## Features
//!
//! - **Parcel Domain**: Customers, couriers, parcels and deliveries in SQLite
//! - **Rate Limiting**: Fixed-window counters per user or per IP, with temporary IP blocks for anonymous abusers
//! - **Authentication**: HMAC-signed bearer tokens with logout-driven revocation
//! - **Fail-open**: A missing or failing cache backend never takes the API down
//! - **Observability**: Structured `tracing` logs and a Prometheus `/metrics` endpoint
//!
//! See the `cli` module for the available commands.

mod auth;
mod cache;
mod cli;
mod database;
mod env;
mod error;
mod health;
mod logging;
mod metrics;
mod rate_limiter;
mod routing;
mod server;

use crate::auth::Authenticator;
use crate::cache::SharedCache;
use crate::env::AppConfig;
use crate::metrics::Metrics;
use crate::rate_limiter::{RateLimitPolicy, RateLimiter};
use sqlx::SqlitePool;
use std::process::ExitCode;
use std::sync::Arc;

///////////////////////////////////////////////////////////////////////////////
//****                         Public Structs                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// `None` when no backend is configured or it was unreachable at startup
    pub cache: Option<SharedCache>,
    pub rate_limiter: Arc<RateLimiter>,
    pub policy: Arc<RateLimitPolicy>,
    pub authenticator: Arc<Authenticator>,
    pub metrics: Arc<Metrics>,
    pub config: AppConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init_tracing();

    match cli::parse_cli_commands().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
