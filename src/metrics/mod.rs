//! # Metrics Module
//!
//! This module owns the Prometheus registry for parcelgate. A single `Metrics`
//! value is built at startup and handed by `Arc` to every component that
//! records something; there are no process-wide metric statics.
//!
//! ## Features
//!
//! - **Rate Limit Decisions**: `parcelgate_rate_limit_decisions_total{outcome, scope}`
//! - **Block Records**: `parcelgate_rate_limit_blocks_total` counts blocks planted
//! - **Cache Faults**: `parcelgate_cache_errors_total{operation}` counts fail-open backend faults
//! - **Token Revocation**: `parcelgate_tokens_revoked_total` counts logouts
//! - **Exposition**: `render` produces the text format served at `GET /metrics`
//!
//! ## Usage
//!
//! ```rust
//! let metrics = Arc::new(Metrics::new()?);
//! metrics.record_decision(Outcome::Allowed, Scope::Unauthenticated);
//! let body = metrics.render()?;
//! ```

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

///////////////////////////////////////////////////////////////////////////////
//****                         Public Structs                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Outcome label for a rate-limit decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Allowed,
    Rejected,
    Blocked,
    /// Passed without counting because the backend was absent or faulted
    Unrestricted,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Allowed => "allowed",
            Outcome::Rejected => "rejected",
            Outcome::Blocked => "blocked",
            Outcome::Unrestricted => "unrestricted",
        }
    }
}

/// Scope label for a rate-limit decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Authenticated,
    Unauthenticated,
    /// Decided before a scope was resolved
    None,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Authenticated => "auth",
            Scope::Unauthenticated => "unauth",
            Scope::None => "none",
        }
    }
}

/// Registry plus every counter parcelgate exports
#[derive(Clone, Debug)]
pub struct Metrics {
    registry: Arc<Registry>,
    decisions: IntCounterVec,
    blocks: IntCounter,
    cache_errors: IntCounterVec,
    tokens_revoked: IntCounter,
}

impl Metrics {
    /// Build a fresh registry and register all counters into it
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    /// Register all counters into a caller-provided registry
    pub fn with_registry<R: Into<Arc<Registry>>>(registry: R) -> Result<Self, prometheus::Error> {
        let registry = registry.into();

        let decisions = IntCounterVec::new(
            Opts::new(
                "parcelgate_rate_limit_decisions_total",
                "Rate limit decisions by outcome and scope",
            ),
            &["outcome", "scope"],
        )?;
        let blocks = IntCounter::new(
            "parcelgate_rate_limit_blocks_total",
            "Block records planted for anonymous clients",
        )?;
        let cache_errors = IntCounterVec::new(
            Opts::new(
                "parcelgate_cache_errors_total",
                "Cache backend faults handled by failing open",
            ),
            &["operation"],
        )?;
        let tokens_revoked = IntCounter::new(
            "parcelgate_tokens_revoked_total",
            "Bearer tokens added to the blacklist",
        )?;

        registry.register(Box::new(decisions.clone()))?;
        registry.register(Box::new(blocks.clone()))?;
        registry.register(Box::new(cache_errors.clone()))?;
        registry.register(Box::new(tokens_revoked.clone()))?;

        Ok(Self {
            registry,
            decisions,
            blocks,
            cache_errors,
            tokens_revoked,
        })
    }

    pub fn record_decision(&self, outcome: Outcome, scope: Scope) {
        self.decisions
            .with_label_values(&[outcome.as_str(), scope.as_str()])
            .inc();
    }

    pub fn record_block(&self) {
        self.blocks.inc();
    }

    pub fn record_cache_error(&self, operation: &str) {
        self.cache_errors.with_label_values(&[operation]).inc();
    }

    pub fn record_token_revoked(&self) {
        self.tokens_revoked.inc();
    }

    /// Render the registry in the Prometheus text exposition format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    pub fn decision_count(&self, outcome: Outcome, scope: Scope) -> u64 {
        self.decisions
            .with_label_values(&[outcome.as_str(), scope.as_str()])
            .get()
    }

    pub fn block_count(&self) -> u64 {
        self.blocks.get()
    }

    pub fn cache_error_count(&self, operation: &str) -> u64 {
        self.cache_errors.with_label_values(&[operation]).get()
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_render() {
        let metrics = Metrics::new().unwrap();
        metrics.record_decision(Outcome::Allowed, Scope::Unauthenticated);
        metrics.record_decision(Outcome::Allowed, Scope::Unauthenticated);
        metrics.record_decision(Outcome::Blocked, Scope::None);
        metrics.record_block();
        metrics.record_cache_error("get");
        metrics.record_token_revoked();

        assert_eq!(
            metrics.decision_count(Outcome::Allowed, Scope::Unauthenticated),
            2
        );
        assert_eq!(metrics.block_count(), 1);
        assert_eq!(metrics.cache_error_count("get"), 1);

        let body = metrics.render().unwrap();
        assert!(body.contains(
            "parcelgate_rate_limit_decisions_total{outcome=\"allowed\",scope=\"unauth\"} 2"
        ));
        assert!(body.contains("parcelgate_rate_limit_blocks_total 1"));
        assert!(body.contains("parcelgate_tokens_revoked_total 1"));
    }

    #[test]
    fn test_registries_are_independent() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();
        first.record_block();

        assert_eq!(first.block_count(), 1);
        assert_eq!(second.block_count(), 0);
    }

    #[test]
    fn test_shared_registry_rejects_duplicate_registration() {
        let registry = Arc::new(Registry::new());
        assert!(Metrics::with_registry(registry.clone()).is_ok());
        assert!(Metrics::with_registry(registry).is_err());
    }
}
