//! Request-scoped authentication.
//!
//! `auth_context_middleware` never rejects a request. A valid, unrevoked
//! bearer token attaches `AuthContext` and `BearerToken` extensions; anything
//! else leaves the request anonymous so the rate limiter scopes it by IP.
//! Handlers that need a caller extract `RequireAuth`.

use super::blacklist::TokenBlacklist;
use super::jwt::{JwtConfig, validate_jwt_token};
use super::types::{AuthContext, AuthError, BearerToken};
use crate::error::ApiError;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::debug;

///////////////////////////////////////////////////////////////////////////////
//****                         Public Structs                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Token validation plus revocation lookup
#[derive(Clone)]
pub struct Authenticator {
    jwt: JwtConfig,
    blacklist: TokenBlacklist,
}

impl Authenticator {
    pub fn new(jwt: JwtConfig, blacklist: TokenBlacklist) -> Self {
        Self { jwt, blacklist }
    }

    pub fn jwt(&self) -> &JwtConfig {
        &self.jwt
    }

    pub fn blacklist(&self) -> &TokenBlacklist {
        &self.blacklist
    }

    /// Resolve a raw bearer token into the caller it identifies
    pub async fn authenticate(&self, token: &str) -> Result<(AuthContext, BearerToken), AuthError> {
        let claims = validate_jwt_token(token, &self.jwt)?;
        if self.blacklist.is_revoked(token).await {
            return Err(AuthError::Revoked);
        }

        let context = AuthContext::new(claims.user_id()?, claims.role.clone());
        let bearer = BearerToken {
            token: token.to_string(),
            expires_at: claims.exp as i64,
        };
        Ok((context, bearer))
    }
}

/// Extractor for handlers that require an authenticated caller; answers 401 otherwise
#[derive(Debug, Clone)]
pub struct RequireAuth(pub AuthContext);

impl<S> FromRequestParts<S> for RequireAuth
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .map(RequireAuth)
            .ok_or(ApiError::Unauthorized)
    }
}

/// Extractor for the raw token behind the request's `AuthContext`
#[derive(Debug, Clone)]
pub struct RequireBearer(pub BearerToken);

impl<S> FromRequestParts<S> for RequireBearer
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<BearerToken>()
            .cloned()
            .map(RequireBearer)
            .ok_or(ApiError::Unauthorized)
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                       Public Functions                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Pull the token out of an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}

/// Attach `AuthContext` for requests carrying a valid bearer token
pub async fn auth_context_middleware(
    State(authenticator): State<Arc<Authenticator>>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(token) = bearer_token(request.headers()).map(str::to_string) {
        match authenticator.authenticate(&token).await {
            Ok((context, bearer)) => {
                debug!(user_id = context.user_id, role = ?context.role, "Request authenticated");
                request.extensions_mut().insert(context);
                request.extensions_mut().insert(bearer);
            }
            Err(e) => {
                debug!(error = %e, "Bearer token not accepted, treating request as anonymous");
            }
        }
    }

    next.run(request).await
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////
