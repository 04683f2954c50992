//! # Rate Limiter Module
//!
//! This module limits requests per client over a fixed 60 second window, with
//! all counting state held in the shared cache backend.
//!
//! ## Features
//!
//! - **Scoped Counters**: authenticated callers are counted per user id under
//!   `auth:<role>`, anonymous callers per IP under `unauth`
//! - **Role Budgets**: per-role limits from the live `RateLimitPolicy`, with unknown
//!   roles falling back to the `client` budget
//! - **IP Blocking**: an anonymous client that goes over its limit is blocked for
//!   the configured number of minutes
//! - **Fail Open**: a missing, unreachable or slow backend never rejects a request;
//!   only an existing block record does
//! - **Axum Integration**: `rate_limit_middleware` adds `X-RateLimit-*` headers and
//!   answers 429 with `Retry-After`
//!
//! ## Keys
//!
//! | Key | Value | Expiry |
//! |-----|-------|--------|
//! | `rate_limit:<scope>:<identity>:count` | request count | end of the window |
//! | `rate_limit:block:<ip>` | diagnostic text | block duration |
//! | `rate_limit_config` | policy JSON | none |

pub mod identity;
pub mod limiter;
pub mod middleware;
pub mod policy;

pub use identity::ClientIdentity;
pub use limiter::{Allowance, Decision, RateLimiter};
pub use middleware::rate_limit_middleware;
pub use policy::{PolicyError, RateLimitConfig, RateLimitPolicy};

/// Counter key for a scope (`unauth`, `auth:<role>`) and identity (IP or user id)
pub fn counter_key(scope: &str, identity: &str) -> String {
    format!("rate_limit:{}:{}:count", scope, identity)
}

/// Block record key for a client IP
pub fn block_key(ip: &str) -> String {
    format!("rate_limit:block:{}", ip)
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////
