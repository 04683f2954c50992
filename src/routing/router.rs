//! # Router Module
//!
//! Builds the axum `Router` for Parcelgate.
//!
//! ## Architecture
//!
//! The router is layered from the outside in:
//! 1. HTTP tracing (`TraceLayer`) around everything
//! 2. `/health` and `/metrics`, which are never rate limited
//! 3. `/api/v1`, wrapped in the authentication context middleware and then
//!    the rate limiter, so the limiter sees the resolved caller before it counts
//!
//! Axum applies the last `.layer` call outermost, which is why the auth layer
//! is added after the rate limit layer.

use super::{admin, handlers};
use crate::AppState;
use crate::auth::auth_context_middleware;
use crate::rate_limiter::rate_limit_middleware;
use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{delete, get, patch, post},
};
use tower_http::trace::TraceLayer;

///////////////////////////////////////////////////////////////////////////////
//****                       Public Functions                            ****//
///////////////////////////////////////////////////////////////////////////////

pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/auth/logout", post(handlers::logout))
        .route(
            "/customers",
            post(handlers::create_customer).get(handlers::list_customers),
        )
        .route(
            "/customers/{id}",
            get(handlers::get_customer).delete(handlers::delete_customer),
        )
        .route(
            "/couriers",
            post(handlers::create_courier).get(handlers::list_couriers),
        )
        .route(
            "/couriers/{id}",
            get(handlers::get_courier).delete(handlers::delete_courier),
        )
        .route(
            "/parcels",
            post(handlers::create_parcel).get(handlers::list_parcels),
        )
        .route("/parcels/{id}", get(handlers::get_parcel))
        .route(
            "/deliveries",
            post(handlers::create_delivery).get(handlers::list_deliveries),
        )
        .route("/deliveries/{id}", get(handlers::get_delivery))
        .route(
            "/deliveries/{id}/status",
            patch(handlers::update_delivery_status),
        )
        .route(
            "/admin/rate-limits",
            get(admin::get_rate_limits).put(admin::put_rate_limits),
        )
        .route("/admin/blocks/{ip}", delete(admin::delete_block))
        .layer(from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(from_fn_with_state(
            state.authenticator.clone(),
            auth_context_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_export))
        .nest("/api/v1", api)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////
