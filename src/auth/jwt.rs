//! JWT (JSON Web Token) handling for parcelgate
//!
//! Bearer tokens carry the caller's numeric user id in `sub` and an optional
//! `role` claim; both feed the rate limiter's authenticated scopes.
//!
//! # Supported Features
//!
//! - **Algorithms**: HS256, HS384, HS512 (HMAC-based symmetric key algorithms)
//! - **Claims**: subject (sub), role, expiration (exp), issued at (iat), issuer (iss)
//! - **Validation**: expiry always enforced, issuer enforced when configured
//! - **Issuance**: `issue_token` mints tokens for operators and local development
//!
//! # Example Usage
//!
//! ```rust
//! let config = JwtConfig::new("secret", None);
//! let token = issue_token(&config, 42, Some("courier"), Duration::from_secs(3600))?;
//! let claims = validate_jwt_token(&token, &config)?;
//! assert_eq!(claims.user_id()?, 42);
//! ```

use super::types::AuthError;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

///////////////////////////////////////////////////////////////////////////////
//****                         Public Structs                            ****//
///////////////////////////////////////////////////////////////////////////////

/// JWT Claims structure for token validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,          // numeric user id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub exp: usize,           // Expiration time (as UTC timestamp)
    pub iat: usize,           // Issued at (as UTC timestamp)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

impl JwtClaims {
    /// Parse the subject as a user id
    pub fn user_id(&self) -> Result<i64, AuthError> {
        self.sub
            .parse::<i64>()
            .map_err(|_| AuthError::InvalidSubject(self.sub.clone()))
    }
}

/// JWT Configuration structure
#[derive(Debug, Clone)]
pub struct JwtConfig {
    secret: String,
    algorithm: Algorithm,
    issuer: Option<String>,
}

impl JwtConfig {
    /// HS256 configuration
    pub fn new(secret: impl Into<String>, issuer: Option<String>) -> Self {
        Self {
            secret: secret.into(),
            algorithm: Algorithm::HS256,
            issuer,
        }
    }

    /// Switch to another HMAC algorithm (HS256, HS384, HS512)
    pub fn with_algorithm(mut self, name: &str) -> Result<Self, AuthError> {
        self.algorithm = match name {
            "HS256" => Algorithm::HS256,
            "HS384" => Algorithm::HS384,
            "HS512" => Algorithm::HS512,
            alg => {
                return Err(AuthError::InvalidToken(format!(
                    "Unsupported JWT algorithm: {}",
                    alg
                )));
            }
        };
        Ok(self)
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                       Public Functions                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Validate JWT token and extract claims
pub fn validate_jwt_token(token: &str, jwt_config: &JwtConfig) -> Result<JwtClaims, AuthError> {
    let mut validation = Validation::new(jwt_config.algorithm);

    // Set issuer validation if provided
    if let Some(ref issuer) = jwt_config.issuer {
        validation.iss = Some(HashSet::from([issuer.clone()]));
    }

    let decoding_key = DecodingKey::from_secret(jwt_config.secret.as_ref());
    let token_data = decode::<JwtClaims>(token, &decoding_key, &validation)
        .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
    let claims = token_data.claims;

    // reject early so the limiter never sees a non-numeric identity
    claims.user_id()?;

    debug!(
        "JWT token validated successfully for subject: {}",
        claims.sub
    );
    Ok(claims)
}

/// Mint a signed token for `user_id` valid for `ttl`
pub fn issue_token(
    jwt_config: &JwtConfig,
    user_id: i64,
    role: Option<&str>,
    ttl: Duration,
) -> Result<String, AuthError> {
    let now = chrono::Utc::now().timestamp() as usize;
    let claims = JwtClaims {
        sub: user_id.to_string(),
        role: role.map(str::to_string),
        exp: now + ttl.as_secs() as usize,
        iat: now,
        iss: jwt_config.issuer.clone(),
    };

    let encoding_key = EncodingKey::from_secret(jwt_config.secret.as_ref());
    encode(&Header::new(jwt_config.algorithm), &claims, &encoding_key)
        .map_err(|e| AuthError::Encoding(e.to_string()))
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////
