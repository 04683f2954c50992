//! # Routing Module
//!
//! HTTP surface of Parcelgate.
//!
//! - `router`: builds the axum `Router` and layers the middleware stack
//! - `handlers`: parcel-domain REST handlers plus `/health`, `/metrics` and logout
//! - `admin`: operator endpoints for the rate limit policy and IP blocks

pub mod admin;
pub mod handlers;
pub mod router;
