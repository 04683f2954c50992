//! Axum adapter around `RateLimiter::check`.

use super::identity;
use super::limiter::{Allowance, Decision, RateLimiter};
use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header::RETRY_AFTER},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Count the request and either forward it or answer 429
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let client = identity::resolve(request.headers(), request.extensions());

    match limiter.check(&client).await {
        Decision::Allowed(allowance) => {
            let mut response = next.run(request).await;
            if let Allowance::Counted { limit, remaining } = allowance {
                set_limit_headers(response.headers_mut(), limit, remaining);
            }
            response
        }
        Decision::Rejected {
            limit,
            retry_after_secs,
        } => {
            let mut response = too_many_requests(retry_after_secs, "Too Many Requests");
            set_limit_headers(response.headers_mut(), limit, 0);
            response
        }
        Decision::Blocked { retry_after_secs } => too_many_requests(
            retry_after_secs,
            "Too Many Requests: client temporarily blocked",
        ),
    }
}

fn set_limit_headers(headers: &mut HeaderMap, limit: u32, remaining: u32) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(remaining));
}

fn too_many_requests(retry_after_secs: u64, body: &'static str) -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(RETRY_AFTER, HeaderValue::from(retry_after_secs))],
        body,
    )
        .into_response()
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////
