use thiserror::Error;

/// Role names with special meaning to the REST handlers
pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_COURIER: &str = "courier";
pub const ROLE_CLIENT: &str = "client";

/// Authenticated caller, attached to the request by `auth_context_middleware`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: i64,
    pub role: Option<String>,
}

impl AuthContext {
    pub fn new(user_id: i64, role: Option<String>) -> Self {
        Self { user_id, role }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.role.as_deref() == Some(role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(ROLE_ADMIN)
    }
}

/// Raw bearer token that produced the request's `AuthContext`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerToken {
    pub token: String,
    /// Expiry as a UTC unix timestamp
    pub expires_at: i64,
}

/// Errors raised while validating or issuing tokens
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token subject is not a numeric user id: {0}")]
    InvalidSubject(String),

    #[error("token has been revoked")]
    Revoked,

    #[error("failed to encode token: {0}")]
    Encoding(String),

    #[error("token blacklist unavailable: {0}")]
    Blacklist(String),
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_checks() {
        let admin = AuthContext::new(1, Some(ROLE_ADMIN.to_string()));
        let anonymous_role = AuthContext::new(2, None);

        assert!(admin.is_admin());
        assert!(!admin.has_role(ROLE_COURIER));
        assert!(!anonymous_role.is_admin());
        assert!(!anonymous_role.has_role(ROLE_CLIENT));
    }
}
