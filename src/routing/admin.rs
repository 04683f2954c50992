//! Operator endpoints for the live rate limit policy and IP blocks.

use super::handlers::require_admin;
use crate::AppState;
use crate::auth::RequireAuth;
use crate::error::{ApiError, ApiResult};
use crate::rate_limiter::RateLimitConfig;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Serialize)]
pub struct PolicyUpdateResponse {
    pub config: RateLimitConfig,
    /// False when the new config is live in this process but could not be written to the backend
    pub persisted: bool,
}

pub async fn get_rate_limits(State(state): State<AppState>) -> Json<RateLimitConfig> {
    Json(state.policy.snapshot().await)
}

pub async fn put_rate_limits(
    State(state): State<AppState>,
    RequireAuth(caller): RequireAuth,
    Json(config): Json<RateLimitConfig>,
) -> ApiResult<Json<PolicyUpdateResponse>> {
    require_admin(&caller)?;

    let persisted = match state.policy.update(config).await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Rate limit config applied but not persisted");
            false
        }
    };
    info!(admin_id = caller.user_id, persisted, "Rate limit config replaced");

    Ok(Json(PolicyUpdateResponse {
        config: state.policy.snapshot().await,
        persisted,
    }))
}

pub async fn delete_block(
    State(state): State<AppState>,
    RequireAuth(caller): RequireAuth,
    Path(ip): Path<String>,
) -> ApiResult<StatusCode> {
    require_admin(&caller)?;

    state
        .rate_limiter
        .unblock(&ip)
        .await
        .map_err(|e| ApiError::ServiceUnavailable(format!("could not remove block: {}", e)))?;
    info!(client_ip = %ip, admin_id = caller.user_id, "Block lifted by operator");
    Ok(StatusCode::NO_CONTENT)
}
