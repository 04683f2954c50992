//! Environment variable validation and configuration module for parcelgate
//!
//! This module provides centralized validation and configuration management
//! for all environment variables used by the parcelgate service.
//!
//! # Supported Environment Variables
//!
//! ## Database Configuration
//! - `PARCELGATE_DB_URL`: Database connection URL (default: "sqlite://parcelgate.db")
//!
//! ## Server Configuration
//! - `PARCELGATE_HOST`: Server bind address (default: "0.0.0.0")
//! - `PARCELGATE_PORT`: Server port (default: "8080")
//!
//! ## Logging Configuration
//! - `PARCELGATE_LOG_LEVEL`: Application log filter, takes precedence over `RUST_LOG`
//! - `RUST_LOG`: Standard Rust logging configuration
//!
//! ## Cache Configuration
//! - `PARCELGATE_REDIS_URL`: Cache backend URL; unset disables rate limiting and
//!   token revocation, `memory://` selects the in-process store
//! - `PARCELGATE_CACHE_TIMEOUT_MS`: Bound on every cache call (default: "2000")
//! - `PARCELGATE_CACHE_SWEEP_INTERVAL_SECS`: Housekeeping sweep interval (default: "300")
//! - `PARCELGATE_POLICY_RELOAD_INTERVAL_SECS`: How often the persisted rate limit policy is re-read (default: "30")
//!
//! ## Security Configuration
//! - `PARCELGATE_JWT_SECRET`: HMAC secret for bearer tokens (development default with a warning)
//! - `PARCELGATE_JWT_ISSUER`: Required `iss` claim, when set
//! - `PARCELGATE_JWT_ALGORITHM`: HS256, HS384 or HS512 (default: "HS256")
//!
//! # Usage
//!
//! ```rust
//! let config = parcelgate::env::get_config();
//! println!("Server will bind to {}", config.bind_address);
//! ```

use std::collections::HashMap;
use std::env;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_LOG_FILTER: &str = "parcelgate=info,tower_http=debug";
pub const DEV_JWT_SECRET: &str = "parcelgate-dev-secret-change-me";
const JWT_ALGORITHMS: [&str; 3] = ["HS256", "HS384", "HS512"];

const REDIS_SCHEMES: [&str; 5] = ["redis://", "rediss://", "redis+unix://", "unix://", "memory://"];

/// Environment validation errors
#[derive(Debug, Clone)]
pub struct EnvValidationError {
    pub variable: String,
    pub message: String,
    pub severity: ErrorSeverity,
}

/// Severity level for environment validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorSeverity {
    /// Critical errors that prevent application startup
    Critical,
    /// Warnings about missing optional variables or suboptimal configurations
    Warning,
    /// Informational messages about default values being used
    Info,
}

/// Validated application configuration derived from environment variables
#[derive(Debug, Clone)]
pub struct AppConfig {
    // Database
    pub database_url: String,

    // Server
    pub host: String,
    pub port: u16,
    pub bind_address: SocketAddr,

    // Logging
    pub log_level: String,

    // Cache
    pub redis_url: Option<String>,
    pub cache_timeout: Duration,
    pub cache_sweep_interval: Duration,
    pub policy_reload_interval: Duration,

    // Security
    pub jwt_secret: String,
    pub jwt_issuer: Option<String>,
    pub jwt_algorithm: String,
}

/// Validate all environment variables and return configuration or errors
pub fn validate_environment() -> Result<AppConfig, Vec<EnvValidationError>> {
    let vars: HashMap<String, String> = env::vars().collect();
    validate_from(|name| vars.get(name).cloned())
}

/// Validate configuration from an arbitrary variable source
pub fn validate_from<F>(lookup: F) -> Result<AppConfig, Vec<EnvValidationError>>
where
    F: Fn(&str) -> Option<String>,
{
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    // Database configuration
    let database_url = lookup("PARCELGATE_DB_URL").unwrap_or_else(|| {
        warnings.push(info_msg(
            "PARCELGATE_DB_URL",
            "Using default database URL 'sqlite://parcelgate.db'",
        ));
        crate::database::PARCELGATE_DB_URL.to_string()
    });

    // Server configuration
    let host = lookup("PARCELGATE_HOST").unwrap_or_else(|| {
        warnings.push(info_msg("PARCELGATE_HOST", "Using default host '0.0.0.0'"));
        "0.0.0.0".to_string()
    });

    let host_ip = match IpAddr::from_str(&host) {
        Ok(ip) => ip,
        Err(_) => {
            errors.push(critical("PARCELGATE_HOST", format!("Invalid IP address: {}", host)));
            IpAddr::from([0, 0, 0, 0])
        }
    };

    let port = match lookup("PARCELGATE_PORT") {
        Some(port_str) => match port_str.parse::<u16>() {
            Ok(port) => {
                if port < 1024 && port != 0 {
                    warnings.push(EnvValidationError {
                        variable: "PARCELGATE_PORT".to_string(),
                        message: format!(
                            "Using privileged port {}, may require root privileges",
                            port
                        ),
                        severity: ErrorSeverity::Warning,
                    });
                }
                port
            }
            Err(_) => {
                errors.push(critical(
                    "PARCELGATE_PORT",
                    format!("Invalid port number: {}", port_str),
                ));
                8080
            }
        },
        None => {
            warnings.push(info_msg("PARCELGATE_PORT", "Using default port 8080"));
            8080
        }
    };

    let bind_address = SocketAddr::new(host_ip, port);

    // Logging configuration
    let log_level = lookup("PARCELGATE_LOG_LEVEL")
        .or_else(|| lookup("RUST_LOG"))
        .unwrap_or_else(|| {
            warnings.push(info_msg(
                "RUST_LOG/PARCELGATE_LOG_LEVEL",
                format!("Using default log level '{}'", DEFAULT_LOG_FILTER),
            ));
            DEFAULT_LOG_FILTER.to_string()
        });

    // Cache configuration
    let redis_url = lookup("PARCELGATE_REDIS_URL").filter(|url| !url.trim().is_empty());
    match &redis_url {
        Some(url) if !REDIS_SCHEMES.iter().any(|scheme| url.starts_with(scheme)) => {
            errors.push(critical(
                "PARCELGATE_REDIS_URL",
                format!("Unsupported cache URL scheme: {}", url),
            ));
        }
        Some(url) if url.starts_with("memory://") => warnings.push(EnvValidationError {
            variable: "PARCELGATE_REDIS_URL".to_string(),
            message: "In-memory cache selected; counters are not shared between instances"
                .to_string(),
            severity: ErrorSeverity::Warning,
        }),
        Some(_) => {}
        None => warnings.push(EnvValidationError {
            variable: "PARCELGATE_REDIS_URL".to_string(),
            message: "No cache backend configured; rate limiting and token revocation are disabled"
                .to_string(),
            severity: ErrorSeverity::Warning,
        }),
    }

    let cache_timeout_ms: u64 =
        parse_positive_with_default(&lookup, "PARCELGATE_CACHE_TIMEOUT_MS", 2000, &mut warnings);
    let sweep_interval_secs: u64 = parse_positive_with_default(
        &lookup,
        "PARCELGATE_CACHE_SWEEP_INTERVAL_SECS",
        300,
        &mut warnings,
    );
    let reload_interval_secs: u64 = parse_positive_with_default(
        &lookup,
        "PARCELGATE_POLICY_RELOAD_INTERVAL_SECS",
        30,
        &mut warnings,
    );

    // Security configuration
    let jwt_secret = match lookup("PARCELGATE_JWT_SECRET") {
        Some(secret) if !secret.is_empty() => {
            if secret.len() < 32 {
                warnings.push(EnvValidationError {
                    variable: "PARCELGATE_JWT_SECRET".to_string(),
                    message: "JWT secret is shorter than 32 characters".to_string(),
                    severity: ErrorSeverity::Warning,
                });
            }
            secret
        }
        _ => {
            warnings.push(EnvValidationError {
                variable: "PARCELGATE_JWT_SECRET".to_string(),
                message: "Using the built-in development JWT secret; set a real secret in production"
                    .to_string(),
                severity: ErrorSeverity::Warning,
            });
            DEV_JWT_SECRET.to_string()
        }
    };
    let jwt_issuer = lookup("PARCELGATE_JWT_ISSUER").filter(|iss| !iss.is_empty());
    let jwt_algorithm = match lookup("PARCELGATE_JWT_ALGORITHM") {
        Some(alg) if JWT_ALGORITHMS.contains(&alg.as_str()) => alg,
        Some(alg) => {
            errors.push(critical(
                "PARCELGATE_JWT_ALGORITHM",
                format!("Unsupported JWT algorithm '{}', expected one of HS256, HS384, HS512", alg),
            ));
            String::new()
        }
        None => "HS256".to_string(),
    };

    // Add all warnings to errors for reporting
    errors.extend(warnings);

    if errors.iter().any(|e| e.severity == ErrorSeverity::Critical) {
        return Err(errors);
    }

    // Log non-critical issues
    for error in &errors {
        match error.severity {
            ErrorSeverity::Warning => warn!("{}: {}", error.variable, error.message),
            ErrorSeverity::Info => info!("{}: {}", error.variable, error.message),
            ErrorSeverity::Critical => {}
        }
    }

    Ok(AppConfig {
        database_url,
        host,
        port,
        bind_address,
        log_level,
        redis_url,
        cache_timeout: Duration::from_millis(cache_timeout_ms),
        cache_sweep_interval: Duration::from_secs(sweep_interval_secs),
        policy_reload_interval: Duration::from_secs(reload_interval_secs),
        jwt_secret,
        jwt_issuer,
        jwt_algorithm,
    })
}

/// Get the validated configuration, exiting the process if validation fails
pub fn get_config() -> AppConfig {
    match validate_environment() {
        Ok(config) => config,
        Err(errors) => {
            eprintln!("Environment validation failed:");
            for error in errors {
                let label = match error.severity {
                    ErrorSeverity::Critical => "CRITICAL",
                    ErrorSeverity::Warning => "WARNING",
                    ErrorSeverity::Info => "INFO",
                };
                eprintln!("{} - {}: {}", label, error.variable, error.message);
            }
            std::process::exit(1);
        }
    }
}

/// Print environment validation results in a user-friendly format
pub fn print_validation_results(result: &Result<AppConfig, Vec<EnvValidationError>>) {
    match result {
        Ok(config) => {
            println!("Environment validation successful");
            println!("Configuration:");
            println!("  Database URL: {}", config.database_url);
            println!("  Server: {}", config.bind_address);
            println!("  Log Level: {}", config.log_level);
            println!(
                "  Cache Backend: {}",
                config.redis_url.as_deref().unwrap_or("disabled")
            );
            println!("  Cache Timeout: {}ms", config.cache_timeout.as_millis());
            println!(
                "  Cache Sweep Interval: {}s",
                config.cache_sweep_interval.as_secs()
            );
            println!(
                "  Policy Reload Interval: {}s",
                config.policy_reload_interval.as_secs()
            );
            println!(
                "  JWT Issuer: {}",
                config.jwt_issuer.as_deref().unwrap_or("(not enforced)")
            );
            println!("  JWT Algorithm: {}", config.jwt_algorithm);
        }
        Err(errors) => {
            let count = |severity: ErrorSeverity| errors.iter().filter(|e| e.severity == severity).count();
            eprintln!(
                "Environment validation failed with {} critical error(s), {} warning(s), {} info message(s):",
                count(ErrorSeverity::Critical),
                count(ErrorSeverity::Warning),
                count(ErrorSeverity::Info)
            );

            for error in errors {
                let prefix = match error.severity {
                    ErrorSeverity::Critical => "CRITICAL",
                    ErrorSeverity::Warning => "WARNING",
                    ErrorSeverity::Info => "INFO",
                };
                eprintln!("  {} - {}: {}", prefix, error.variable, error.message);
            }
        }
    }
}

/// Generate example environment configuration file
pub fn generate_env_example() -> String {
    format!(
        r#"# Parcelgate Environment Configuration
# Copy this file to .env and customize the values for your deployment

# =============================================================================
# Database Configuration
# =============================================================================

# Database connection URL
# Default: sqlite://parcelgate.db
PARCELGATE_DB_URL=sqlite://parcelgate.db

# =============================================================================
# Server Configuration
# =============================================================================

# Server bind address
# Default: 0.0.0.0 (bind to all interfaces)
PARCELGATE_HOST=0.0.0.0

# Server port
# Default: 8080
PARCELGATE_PORT=8080

# =============================================================================
# Logging Configuration
# =============================================================================

# Log filter, PARCELGATE_LOG_LEVEL wins over RUST_LOG
# Default: {default_filter}
RUST_LOG={default_filter}

# =============================================================================
# Cache Configuration
# =============================================================================

# Cache backend for rate limiting and token revocation
# Unset: no backend, every request passes unrestricted
# Examples:
#   PARCELGATE_REDIS_URL=redis://127.0.0.1:6379
#   PARCELGATE_REDIS_URL=memory://     # single instance, development only
PARCELGATE_REDIS_URL=redis://127.0.0.1:6379

# Upper bound on each cache call in milliseconds; a slower call fails open
# Default: 2000
PARCELGATE_CACHE_TIMEOUT_MS=2000

# Interval between housekeeping sweeps of rate limit keys, in seconds
# Default: 300
PARCELGATE_CACHE_SWEEP_INTERVAL_SECS=300

# How often a running server re-reads the persisted rate limit policy, in seconds
# Default: 30
PARCELGATE_POLICY_RELOAD_INTERVAL_SECS=30

# =============================================================================
# Security Configuration
# =============================================================================

# HMAC secret used to sign and validate bearer tokens
# Generate with: openssl rand -base64 32
# PARCELGATE_JWT_SECRET=your-super-secret-jwt-key-here

# Required issuer claim; tokens from other issuers are ignored
# PARCELGATE_JWT_ISSUER=parcelgate

# HMAC algorithm for bearer tokens: HS256, HS384 or HS512
# Default: HS256
PARCELGATE_JWT_ALGORITHM=HS256
"#,
        default_filter = DEFAULT_LOG_FILTER
    )
}

fn info_msg(variable: &str, message: impl Into<String>) -> EnvValidationError {
    EnvValidationError {
        variable: variable.to_string(),
        message: message.into(),
        severity: ErrorSeverity::Info,
    }
}

fn critical(variable: &str, message: String) -> EnvValidationError {
    EnvValidationError {
        variable: variable.to_string(),
        message,
        severity: ErrorSeverity::Critical,
    }
}

/// Parse a positive integer variable, falling back to `default` with a note
fn parse_positive_with_default<F>(
    lookup: &F,
    var_name: &str,
    default: u64,
    warnings: &mut Vec<EnvValidationError>,
) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var_name) {
        Some(value_str) => match value_str.parse::<u64>() {
            Ok(value) if value > 0 => value,
            Ok(_) => {
                warnings.push(EnvValidationError {
                    variable: var_name.to_string(),
                    message: format!("Value must be positive. Using default: {}", default),
                    severity: ErrorSeverity::Warning,
                });
                default
            }
            Err(e) => {
                warnings.push(EnvValidationError {
                    variable: var_name.to_string(),
                    message: format!(
                        "Invalid value '{}': {}. Using default: {}",
                        value_str, e, default
                    ),
                    severity: ErrorSeverity::Warning,
                });
                default
            }
        },
        None => {
            warnings.push(info_msg(var_name, format!("Using default value: {}", default)));
            default
        }
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////
