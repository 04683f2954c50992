//! Resolve who is making a request: client IP plus the authenticated caller,
//! if the auth middleware attached one.

use crate::auth::AuthContext;
use axum::extract::ConnectInfo;
use axum::http::{Extensions, HeaderMap};
use std::net::SocketAddr;

const UNKNOWN_IP: &str = "unknown";

/// Requester as seen by the rate limiter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub ip: String,
    pub auth: Option<AuthContext>,
}

impl ClientIdentity {
    pub fn anonymous(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            auth: None,
        }
    }

    pub fn authenticated(ip: impl Into<String>, context: AuthContext) -> Self {
        Self {
            ip: ip.into(),
            auth: Some(context),
        }
    }
}

/// Build the identity from request headers and extensions; never fails
pub fn resolve(headers: &HeaderMap, extensions: &Extensions) -> ClientIdentity {
    let peer = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string());

    ClientIdentity {
        ip: client_ip(headers, peer.as_deref()),
        auth: extensions.get::<AuthContext>().cloned(),
    }
}

/// Client IP: first X-Forwarded-For entry, then X-Real-IP, then the peer address
pub fn client_ip(headers: &HeaderMap, peer: Option<&str>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|list| list.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    match peer {
        Some(raw) => strip_port(raw),
        None => UNKNOWN_IP.to_string(),
    }
}

/// Drop the port from a peer address, keeping the raw string if it does not parse
fn strip_port(raw: &str) -> String {
    raw.parse::<SocketAddr>()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|_| raw.to_string())
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////
