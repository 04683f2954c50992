//! # Routing Handlers Module
//!
//! REST handlers for the parcel domain. Every handler under `/api/v1` runs
//! behind `auth_context_middleware` and `rate_limit_middleware`, so by the
//! time a handler is called the request has already been counted.
//!
//! ## Access Rules
//!
//! - **Public**: listing and fetching customers, couriers, parcels and deliveries; creating customers
//! - **Authenticated**: registering parcels, logging out
//! - **Courier or Admin**: advancing a delivery's status
//! - **Admin**: creating couriers and deliveries, deleting customers and couriers
//!
//! ## Error Handling
//!
//! - Missing rows (404)
//! - Validation failures and invalid status transitions (400)
//! - Missing or rejected bearer token (401)
//! - Wrong role (403)
//! - Duplicate email, or deleting a row still referenced elsewhere (409)

use crate::AppState;
use crate::auth::{
    AuthContext, RequireAuth, RequireBearer,
    types::{AuthError, ROLE_COURIER},
};
use crate::database::{
    models::{
        Courier, Customer, Delivery, DeliveryStatusUpdate, NewCourier, NewCustomer, NewDelivery,
        NewParcel, Parcel, ParcelStatus,
    },
    queries,
};
use crate::error::{ApiError, ApiResult};
use crate::health::{self, HealthReport};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header::CONTENT_TYPE},
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

///////////////////////////////////////////////////////////////////////////////
//****                         Public Structs                            ****//
///////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Default, Deserialize)]
pub struct ParcelFilter {
    pub customer_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeliveryFilter {
    pub courier_id: Option<i64>,
}

///////////////////////////////////////////////////////////////////////////////
//****                       Service Endpoints                           ****//
///////////////////////////////////////////////////////////////////////////////

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = health::check(&state.db, state.cache.as_ref(), state.config.cache_timeout).await;
    let status = if report.is_serving() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

/// Prometheus text exposition of the registry
pub async fn metrics_export(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let body = state
        .metrics
        .render()
        .map_err(|e| ApiError::Internal(format!("failed to render metrics: {}", e)))?;
    Ok(([(CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}

/// Revoke the bearer token that authenticated this request
pub async fn logout(
    State(state): State<AppState>,
    RequireAuth(caller): RequireAuth,
    RequireBearer(bearer): RequireBearer,
) -> ApiResult<StatusCode> {
    let remaining = (bearer.expires_at - Utc::now().timestamp()).max(0) as u64;

    state
        .authenticator
        .blacklist()
        .revoke(&bearer.token, Duration::from_secs(remaining))
        .await
        .map_err(|e| match e {
            AuthError::Blacklist(msg) => ApiError::ServiceUnavailable(msg),
            other => ApiError::Internal(other.to_string()),
        })?;

    info!(user_id = caller.user_id, "User logged out, token revoked");
    Ok(StatusCode::NO_CONTENT)
}

///////////////////////////////////////////////////////////////////////////////
//****                           Customers                               ****//
///////////////////////////////////////////////////////////////////////////////

pub async fn create_customer(
    State(state): State<AppState>,
    Json(new): Json<NewCustomer>,
) -> ApiResult<(StatusCode, Json<Customer>)> {
    require_non_empty("name", &new.name)?;
    if !new.email.contains('@') {
        return Err(ApiError::BadRequest(format!(
            "'{}' is not a valid email address",
            new.email
        )));
    }

    let customer = queries::insert_customer(&state.db, &new)
        .await
        .map_err(|e| {
            ApiError::from_constraint(e, || {
                format!("customer with email {} already exists", new.email)
            })
        })?;
    info!(customer_id = customer.id, "Customer created");
    Ok((StatusCode::CREATED, Json(customer)))
}

pub async fn list_customers(State(state): State<AppState>) -> ApiResult<Json<Vec<Customer>>> {
    Ok(Json(queries::fetch_all_customers(&state.db).await?))
}

pub async fn get_customer(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Customer>> {
    queries::fetch_customer(&state.db, id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("customer {}", id)))
}

pub async fn delete_customer(
    State(state): State<AppState>,
    RequireAuth(caller): RequireAuth,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    require_admin(&caller)?;
    let deleted = queries::delete_customer(&state.db, id)
        .await
        .map_err(|e| ApiError::from_constraint(e, || format!("customer {} still has parcels", id)))?;
    if !deleted {
        return Err(ApiError::NotFound(format!("customer {}", id)));
    }
    info!(customer_id = id, admin_id = caller.user_id, "Customer deleted");
    Ok(StatusCode::NO_CONTENT)
}

///////////////////////////////////////////////////////////////////////////////
//****                            Couriers                               ****//
///////////////////////////////////////////////////////////////////////////////

pub async fn create_courier(
    State(state): State<AppState>,
    RequireAuth(caller): RequireAuth,
    Json(new): Json<NewCourier>,
) -> ApiResult<(StatusCode, Json<Courier>)> {
    require_admin(&caller)?;
    require_non_empty("name", &new.name)?;

    let courier = queries::insert_courier(&state.db, &new).await?;
    info!(courier_id = courier.id, "Courier created");
    Ok((StatusCode::CREATED, Json(courier)))
}

pub async fn list_couriers(State(state): State<AppState>) -> ApiResult<Json<Vec<Courier>>> {
    Ok(Json(queries::fetch_all_couriers(&state.db).await?))
}

pub async fn get_courier(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Courier>> {
    queries::fetch_courier(&state.db, id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("courier {}", id)))
}

pub async fn delete_courier(
    State(state): State<AppState>,
    RequireAuth(caller): RequireAuth,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    require_admin(&caller)?;
    let deleted = queries::delete_courier(&state.db, id)
        .await
        .map_err(|e| {
            ApiError::from_constraint(e, || format!("courier {} still has deliveries", id))
        })?;
    if !deleted {
        return Err(ApiError::NotFound(format!("courier {}", id)));
    }
    info!(courier_id = id, admin_id = caller.user_id, "Courier deleted");
    Ok(StatusCode::NO_CONTENT)
}

///////////////////////////////////////////////////////////////////////////////
//****                             Parcels                               ****//
///////////////////////////////////////////////////////////////////////////////

pub async fn create_parcel(
    State(state): State<AppState>,
    RequireAuth(caller): RequireAuth,
    Json(new): Json<NewParcel>,
) -> ApiResult<(StatusCode, Json<Parcel>)> {
    require_non_empty("description", &new.description)?;
    if new.weight_grams <= 0 {
        return Err(ApiError::BadRequest("weight_grams must be positive".into()));
    }
    if queries::fetch_customer(&state.db, new.customer_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("customer {}", new.customer_id)));
    }

    let parcel = queries::insert_parcel(&state.db, &new).await?;
    info!(
        parcel_id = parcel.id,
        customer_id = parcel.customer_id,
        registered_by = caller.user_id,
        "Parcel registered"
    );
    Ok((StatusCode::CREATED, Json(parcel)))
}

pub async fn list_parcels(
    State(state): State<AppState>,
    Query(filter): Query<ParcelFilter>,
) -> ApiResult<Json<Vec<Parcel>>> {
    Ok(Json(queries::fetch_parcels(&state.db, filter.customer_id).await?))
}

pub async fn get_parcel(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Parcel>> {
    queries::fetch_parcel(&state.db, id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("parcel {}", id)))
}

///////////////////////////////////////////////////////////////////////////////
//****                           Deliveries                              ****//
///////////////////////////////////////////////////////////////////////////////

pub async fn create_delivery(
    State(state): State<AppState>,
    RequireAuth(caller): RequireAuth,
    Json(new): Json<NewDelivery>,
) -> ApiResult<(StatusCode, Json<Delivery>)> {
    require_admin(&caller)?;
    require_non_empty("pickup_address", &new.pickup_address)?;
    require_non_empty("dropoff_address", &new.dropoff_address)?;

    let parcel = queries::fetch_parcel(&state.db, new.parcel_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("parcel {}", new.parcel_id)))?;
    if parcel.status != ParcelStatus::Registered {
        return Err(ApiError::Conflict(format!(
            "parcel {} is not awaiting delivery",
            parcel.id
        )));
    }

    let courier = queries::fetch_courier(&state.db, new.courier_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("courier {}", new.courier_id)))?;
    if !courier.active {
        return Err(ApiError::BadRequest(format!("courier {} is not active", courier.id)));
    }

    let delivery = queries::insert_delivery(&state.db, &new).await?;
    info!(
        delivery_id = delivery.id,
        parcel_id = delivery.parcel_id,
        courier_id = delivery.courier_id,
        "Delivery assigned"
    );
    Ok((StatusCode::CREATED, Json(delivery)))
}

pub async fn list_deliveries(
    State(state): State<AppState>,
    Query(filter): Query<DeliveryFilter>,
) -> ApiResult<Json<Vec<Delivery>>> {
    Ok(Json(queries::fetch_deliveries(&state.db, filter.courier_id).await?))
}

pub async fn get_delivery(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Delivery>> {
    queries::fetch_delivery(&state.db, id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("delivery {}", id)))
}

pub async fn update_delivery_status(
    State(state): State<AppState>,
    RequireAuth(caller): RequireAuth,
    Path(id): Path<i64>,
    Json(update): Json<DeliveryStatusUpdate>,
) -> ApiResult<Json<Delivery>> {
    if !(caller.is_admin() || caller.has_role(ROLE_COURIER)) {
        return Err(ApiError::Forbidden(
            "only couriers and admins may update deliveries".into(),
        ));
    }

    let delivery = queries::fetch_delivery(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("delivery {}", id)))?;
    if !delivery.status.can_transition_to(update.status) {
        warn!(
            delivery_id = id,
            from = %delivery.status,
            to = %update.status,
            "Rejected delivery status transition"
        );
        return Err(ApiError::BadRequest(format!(
            "cannot move delivery from {} to {}",
            delivery.status, update.status
        )));
    }

    let updated = queries::update_delivery_status(&state.db, &delivery, update.status).await?;
    info!(
        delivery_id = id,
        status = %updated.status,
        updated_by = caller.user_id,
        "Delivery status updated"
    );
    Ok(Json(updated))
}

///////////////////////////////////////////////////////////////////////////////
//****                        Private Functions                          ****//
///////////////////////////////////////////////////////////////////////////////

pub(crate) fn require_admin(caller: &AuthContext) -> ApiResult<()> {
    if caller.is_admin() {
        Ok(())
    } else {
        Err(ApiError::Forbidden("admin role required".into()))
    }
}

fn require_non_empty(field: &str, value: &str) -> ApiResult<()> {
    if value.trim().is_empty() {
        Err(ApiError::BadRequest(format!("{} must not be empty", field)))
    } else {
        Ok(())
    }
}
