//! # CLI Module
//!
//! This module provides the command-line interface for Parcelgate. It starts
//! the server and gives operators direct access to the rate limit policy and
//! IP blocks stored in the cache backend, without going through the REST API.
//!
//! ## Commands
//!
//! ### Server Operations
//! - `start`: Launch the Parcelgate server
//!
//! ### Configuration
//! - `validate-env`: Validate environment variables and print the resulting configuration
//! - `env-example`: Print an annotated example `.env` file
//!
//! ### Tokens
//! - `issue-token`: Mint a bearer token signed with the configured secret
//!
//! ### Rate Limiting
//! - `rate-limits show`: Print the persisted policy (defaults if none is stored)
//! - `rate-limits set-role`: Change the per-window budget for one role
//! - `rate-limits set-unauthenticated`: Change the per-window budget for anonymous clients
//! - `rate-limits set-block-duration`: Change how long an over-limit IP stays blocked
//! - `unblock`: Remove the block record for an IP
//!
//! ## Usage Example
//!
//! ```bash
//! # Give couriers a larger budget
//! PARCELGATE_REDIS_URL=redis://localhost:6379 parcelgate rate-limits set-role --role courier --limit 200
//!
//! # Lift a block early
//! PARCELGATE_REDIS_URL=redis://localhost:6379 parcelgate unblock --ip 203.0.113.9
//!
//! # Token for local testing
//! parcelgate issue-token --user-id 1 --role admin
//! ```

use crate::auth::{AuthError, jwt::issue_token};
use crate::cache::{CacheError, SharedCache};
use crate::env::{self, AppConfig};
use crate::metrics::Metrics;
use crate::rate_limiter::{PolicyError, RateLimitConfig, RateLimitPolicy, RateLimiter};
use crate::server::{self, StartupError};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

///////////////////////////////////////////////////////////////////////////////
//****                        Private Structs                            ****//
///////////////////////////////////////////////////////////////////////////////

#[derive(Parser, Debug)]
#[command(name = "parcelgate")]
#[command(about = "Parcelgate parcel delivery service CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

///////////////////////////////////////////////////////////////////////////////
//****                         Private Types                             ****//
///////////////////////////////////////////////////////////////////////////////

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the Parcelgate server
    #[command(name = "start")]
    Start,
    /// Validate environment variables and print the configuration
    #[command(name = "validate-env")]
    ValidateEnv,
    /// Print an example environment file
    #[command(name = "env-example")]
    EnvExample,
    /// Mint a bearer token signed with PARCELGATE_JWT_SECRET
    #[command(name = "issue-token")]
    IssueToken {
        #[arg(long)]
        user_id: i64,
        #[arg(long)]
        role: Option<String>,
        #[arg(long, default_value_t = 3600, help = "Token lifetime in seconds")]
        ttl_secs: u64,
    },
    /// Inspect or change the persisted rate limit policy
    #[command(name = "rate-limits")]
    RateLimits {
        #[command(subcommand)]
        action: RateLimitAction,
    },
    /// Remove the block record for a client IP
    #[command(name = "unblock")]
    Unblock {
        #[arg(long)]
        ip: String,
    },
}

#[derive(Subcommand, Debug)]
enum RateLimitAction {
    /// Print the current policy as JSON
    Show,
    /// Set the requests-per-window budget for a role
    SetRole {
        #[arg(long)]
        role: String,
        #[arg(long)]
        limit: u32,
    },
    /// Set the requests-per-window budget for unauthenticated clients
    SetUnauthenticated {
        #[arg(long)]
        limit: u32,
    },
    /// Set how many minutes an over-limit IP stays blocked (0 disables blocking)
    SetBlockDuration {
        #[arg(long)]
        minutes: u32,
    },
}

///////////////////////////////////////////////////////////////////////////////
//****                         Public Structs                            ****//
///////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Error)]
pub enum CliError {
    #[error("environment validation failed")]
    InvalidEnvironment,

    #[error("no cache backend configured or reachable; set PARCELGATE_REDIS_URL")]
    NoCacheBackend,

    #[error(transparent)]
    Startup(#[from] StartupError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("failed to render output: {0}")]
    Output(#[from] serde_json::Error),
}

///////////////////////////////////////////////////////////////////////////////
//****                       Public Functions                            ****//
///////////////////////////////////////////////////////////////////////////////

pub async fn parse_cli_commands() -> Result<(), CliError> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            server::start_server(env::get_config()).await?;
        }
        Commands::ValidateEnv => {
            let result = env::validate_environment();
            env::print_validation_results(&result);
            if result.is_err() {
                return Err(CliError::InvalidEnvironment);
            }
        }
        Commands::EnvExample => {
            print!("{}", env::generate_env_example());
        }
        Commands::IssueToken {
            user_id,
            role,
            ttl_secs,
        } => {
            let config = env::get_config();
            let jwt = server::jwt_config(&config)?;
            let token = issue_token(&jwt, user_id, role.as_deref(), Duration::from_secs(ttl_secs))?;
            info!(user_id, role = ?role, ttl_secs, "Issued bearer token");
            println!("{}", token);
        }
        Commands::RateLimits { action } => {
            let config = env::get_config();
            let cache = require_cache(&config).await?;
            let policy = load_policy(cache, config.cache_timeout, &action).await?;
            handle_rate_limit_action(&policy, action).await?;
        }
        Commands::Unblock { ip } => {
            let config = env::get_config();
            let cache = require_cache(&config).await?;
            let policy = Arc::new(RateLimitPolicy::new(
                RateLimitConfig::default(),
                Some(cache.clone()),
                config.cache_timeout,
            ));
            let metrics = Arc::new(Metrics::new().map_err(StartupError::from)?);
            let limiter =
                RateLimiter::new(Some(cache), policy, metrics).with_op_timeout(config.cache_timeout);
            limiter.unblock(&ip).await?;
            println!("Unblocked {}", ip);
        }
    }

    Ok(())
}

///////////////////////////////////////////////////////////////////////////////
//****                        Private Functions                          ****//
///////////////////////////////////////////////////////////////////////////////

async fn require_cache(config: &AppConfig) -> Result<SharedCache, CliError> {
    let cache = server::connect_cache(config)
        .await
        .ok_or(CliError::NoCacheBackend)?;
    if config.redis_url.as_deref() == Some("memory://") {
        warn!("memory:// backend is private to this process, changes will not reach a running server");
    }
    Ok(cache)
}

/// Policy backed by the cache, holding whatever is persisted there.
///
/// A corrupt stored config fails `show`, but the `set-*` actions start from
/// defaults so the operator can overwrite it.
async fn load_policy(
    cache: SharedCache,
    op_timeout: Duration,
    action: &RateLimitAction,
) -> Result<RateLimitPolicy, CliError> {
    let policy = RateLimitPolicy::new(RateLimitConfig::default(), Some(cache), op_timeout);
    match policy.load_from_backend().await {
        Ok(()) => {}
        Err(e @ PolicyError::Corrupt(_)) if !matches!(action, RateLimitAction::Show) => {
            warn!(error = %e, "Stored rate limit config is corrupt, starting from defaults");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(policy)
}

async fn handle_rate_limit_action(
    policy: &RateLimitPolicy,
    action: RateLimitAction,
) -> Result<(), CliError> {
    let mut config = policy.snapshot().await;

    match action {
        RateLimitAction::Show => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            return Ok(());
        }
        RateLimitAction::SetRole { role, limit } => {
            println!("Role '{}' limit set to {} requests per window", role, limit);
            config.authenticated_limits.insert(role, limit);
        }
        RateLimitAction::SetUnauthenticated { limit } => {
            config.unauthenticated_limit = limit;
            println!("Unauthenticated limit set to {} requests per window", limit);
        }
        RateLimitAction::SetBlockDuration { minutes } => {
            config.block_duration_minutes = minutes;
            println!("Block duration set to {} minute(s)", minutes);
        }
    }

    policy.update(config).await?;
    Ok(())
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::MemoryCache;
    use crate::rate_limiter::policy::CONFIG_KEY;

    #[test]
    fn test_parse_set_role() {
        let cli = Cli::try_parse_from([
            "parcelgate",
            "rate-limits",
            "set-role",
            "--role",
            "courier",
            "--limit",
            "200",
        ])
        .unwrap();
        match cli.command {
            Commands::RateLimits {
                action: RateLimitAction::SetRole { role, limit },
            } => {
                assert_eq!(role, "courier");
                assert_eq!(limit, 200);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_issue_token_defaults() {
        let cli = Cli::try_parse_from(["parcelgate", "issue-token", "--user-id", "42"]).unwrap();
        match cli.command {
            Commands::IssueToken {
                user_id,
                role,
                ttl_secs,
            } => {
                assert_eq!(user_id, 42);
                assert!(role.is_none());
                assert_eq!(ttl_secs, 3600);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_unblock_requires_ip() {
        assert!(Cli::try_parse_from(["parcelgate", "unblock"]).is_err());
    }

    #[tokio::test]
    async fn test_rate_limit_actions_persist() {
        let cache: SharedCache = Arc::new(MemoryCache::new());
        let policy = RateLimitPolicy::new(
            RateLimitConfig::default(),
            Some(cache.clone()),
            Duration::from_secs(1),
        );

        handle_rate_limit_action(
            &policy,
            RateLimitAction::SetRole {
                role: "courier".into(),
                limit: 200,
            },
        )
        .await
        .unwrap();
        handle_rate_limit_action(&policy, RateLimitAction::SetBlockDuration { minutes: 0 })
            .await
            .unwrap();

        let stored: RateLimitConfig =
            serde_json::from_str(&cache.get(CONFIG_KEY).await.unwrap()).unwrap();
        assert_eq!(stored.authenticated_limits["courier"], 200);
        assert_eq!(stored.authenticated_limits["client"], 30);
        assert_eq!(stored.block_duration_minutes, 0);
    }

    #[tokio::test]
    async fn test_set_actions_overwrite_corrupt_config() {
        let cache: SharedCache = Arc::new(MemoryCache::new());
        cache.set(CONFIG_KEY, "{not json", None).await.unwrap();

        let show = load_policy(cache.clone(), Duration::from_secs(1), &RateLimitAction::Show).await;
        assert!(matches!(show, Err(CliError::Policy(PolicyError::Corrupt(_)))));

        let action = RateLimitAction::SetUnauthenticated { limit: 5 };
        let policy = load_policy(cache.clone(), Duration::from_secs(1), &action)
            .await
            .unwrap();
        handle_rate_limit_action(&policy, action).await.unwrap();

        let stored: RateLimitConfig =
            serde_json::from_str(&cache.get(CONFIG_KEY).await.unwrap()).unwrap();
        assert_eq!(
            stored,
            RateLimitConfig {
                unauthenticated_limit: 5,
                ..RateLimitConfig::default()
            }
        );
    }

    #[tokio::test]
    async fn test_show_does_not_persist() {
        let cache: SharedCache = Arc::new(MemoryCache::new());
        let policy = RateLimitPolicy::new(
            RateLimitConfig::default(),
            Some(cache.clone()),
            Duration::from_secs(1),
        );

        handle_rate_limit_action(&policy, RateLimitAction::Show)
            .await
            .unwrap();
        assert!(matches!(cache.get(CONFIG_KEY).await, Err(CacheError::NotFound)));
    }
}
