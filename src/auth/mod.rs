//! # Authentication Module
//!
//! This module turns bearer tokens into a typed caller identity for the rest
//! of parcelgate. Authentication is advisory at the middleware layer: an
//! anonymous request is still served (and rate limited by IP); handlers that
//! need a caller opt in with the `RequireAuth` extractor.
//!
//! ## Features
//!
//! - **JWT Validation**: HMAC-signed tokens carrying a numeric user id and optional role
//! - **Token Blacklist**: logout revokes a token for the rest of its lifetime
//! - **Typed Context**: `AuthContext` request extension instead of stringly-typed lookups
//!
//! ## Sub-modules
//!
//! - `types`: `AuthContext`, `BearerToken`, role names and `AuthError`
//! - `jwt`: token validation and issuance
//! - `blacklist`: revoked-token store in the cache backend
//! - `middleware`: `auth_context_middleware`, `Authenticator` and the `RequireAuth`/`RequireBearer` extractors

pub mod blacklist;
pub mod jwt;
pub mod middleware;
pub mod types;

pub use blacklist::TokenBlacklist;
pub use middleware::{Authenticator, RequireAuth, RequireBearer, auth_context_middleware};
pub use types::{AuthContext, AuthError, BearerToken};
