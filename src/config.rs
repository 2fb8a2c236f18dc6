//! Application configuration loaded from environment variables.
//!
//! All configuration is loaded from environment variables with defaults
//! suitable for development. A `.env` file is honoured when present.
//!
//! # Rate Limiting
//!
//! - `RATE_LIMIT_ENABLED`: Toggle admission control (default: true)
//! - `RATE_LIMIT_RPS`: Default tokens per second (default: 100, may be fractional)
//! - `RATE_LIMIT_BURST`: Default bucket capacity (default: 50, must be > 0)
//! - `RATE_LIMIT_OPERATIONS`: Per-operation overrides, `METHOD:/path=rate:burst;...`
//! - `RATE_LIMIT_SWEEP_INTERVAL_SECS`: Bucket sweep period (default: 600)
//! - `RATE_LIMIT_EVICTION`: `full` clears every bucket on sweep, `idle` only
//!   those unused for `RATE_LIMIT_IDLE_TTL_SECS` (default: full)
//!
//! # Logging
//!
//! - `LOG_REQUEST_REDACT` / `LOG_RESPONSE_REDACT`: Comma-separated redaction paths
//! - `LOG_MAX_BODY_BYTES`: Largest body buffered for logging (default: 64KiB)
//!
//! # Security
//!
//! - `BASIC_AUTH_USERNAME` / `BASIC_AUTH_PASSWORD`: Enable basic authentication
//! - `JWT_SECRET`, `JWT_ISSUER`: Enable bearer token issuance and checks
//! - `CORS_ALLOWED_ORIGINS`: Comma-separated list of allowed origins (default: `*`)

use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use crate::auth::JwtSettings;
use crate::error::{ConfigError, ConfigResult};
use crate::limiter::{DEFAULT_SWEEP_INTERVAL, EvictionPolicy, RateConfig, RateLimitConfig};
use crate::middleware::LogOptions;
use crate::middleware::log::DEFAULT_MAX_BODY_BYTES;
use crate::redact::RedactionRules;

const DEFAULT_ISSUER: &str = "request_pipeline";

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 3000)
    pub port: u16,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    pub rate_limit_enabled: bool,

    /// Default refill rate in tokens per second (default: 100)
    pub rate_limit_rps: f64,

    /// Default bucket capacity (default: 50)
    pub rate_limit_burst: u32,

    /// Overrides keyed by `METHOD:path`
    pub rate_limit_operations: HashMap<String, RateConfig>,

    pub rate_limit_sweep_interval: Duration,

    pub rate_limit_eviction: EvictionPolicy,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Paths redacted from the request half of each log record
    pub log_request_redact: Vec<String>,

    /// Paths redacted from the response half of each log record
    pub log_response_redact: Vec<String>,

    pub log_max_body_bytes: usize,

    // =========================================================================
    // Security Configuration
    // =========================================================================
    pub basic_auth_username: Option<String>,
    pub basic_auth_password: Option<String>,

    /// HMAC secret for bearer tokens. Token routes are disabled when unset.
    pub jwt_secret: Option<String>,
    pub jwt_issuer: String,

    /// Use "*" to allow all origins (not recommended for production)
    pub cors_allowed_origins: Vec<String>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with defaults.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when a value does not parse or the values
    /// are inconsistent with each other.
    pub fn from_env() -> ConfigResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or(defaults.host),
            port: Self::parse_env("PORT", defaults.port)?,

            // Rate limiting
            rate_limit_enabled: Self::parse_env("RATE_LIMIT_ENABLED", defaults.rate_limit_enabled)?,
            rate_limit_rps: Self::parse_env("RATE_LIMIT_RPS", defaults.rate_limit_rps)?,
            rate_limit_burst: Self::parse_env("RATE_LIMIT_BURST", defaults.rate_limit_burst)?,
            rate_limit_operations: match env::var("RATE_LIMIT_OPERATIONS") {
                Ok(raw) => parse_operations(&raw)?,
                Err(_) => defaults.rate_limit_operations,
            },
            rate_limit_sweep_interval: Duration::from_secs(Self::parse_env(
                "RATE_LIMIT_SWEEP_INTERVAL_SECS",
                defaults.rate_limit_sweep_interval.as_secs(),
            )?),
            rate_limit_eviction: Self::parse_eviction()?,

            // Logging
            log_request_redact: parse_list("LOG_REQUEST_REDACT").unwrap_or_default(),
            log_response_redact: parse_list("LOG_RESPONSE_REDACT").unwrap_or_default(),
            log_max_body_bytes: Self::parse_env("LOG_MAX_BODY_BYTES", defaults.log_max_body_bytes)?,

            // Security
            basic_auth_username: non_empty_var("BASIC_AUTH_USERNAME"),
            basic_auth_password: non_empty_var("BASIC_AUTH_PASSWORD"),
            jwt_secret: non_empty_var("JWT_SECRET"),
            jwt_issuer: non_empty_var("JWT_ISSUER").unwrap_or(defaults.jwt_issuer),
            cors_allowed_origins: parse_list("CORS_ALLOWED_ORIGINS")
                .unwrap_or(defaults.cors_allowed_origins),

            // Observability
            metrics_port: Self::parse_env("METRICS_PORT", defaults.metrics_port)?,
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    pub fn validate(&self) -> ConfigResult<()> {
        validate_rate("RATE_LIMIT_RPS/RATE_LIMIT_BURST", &self.default_rate())?;
        for config in self.rate_limit_operations.values() {
            validate_rate("RATE_LIMIT_OPERATIONS", config)?;
        }

        if self.rate_limit_sweep_interval.is_zero() {
            return Err(ConfigError::Invalid {
                name: "RATE_LIMIT_SWEEP_INTERVAL_SECS",
                reason: "must be greater than 0".to_string(),
            });
        }

        if let EvictionPolicy::Idle(ttl) = self.rate_limit_eviction
            && ttl.is_zero()
        {
            return Err(ConfigError::Invalid {
                name: "RATE_LIMIT_IDLE_TTL_SECS",
                reason: "must be greater than 0".to_string(),
            });
        }

        if self.log_max_body_bytes == 0 {
            return Err(ConfigError::Invalid {
                name: "LOG_MAX_BODY_BYTES",
                reason: "must be greater than 0".to_string(),
            });
        }

        if self.basic_auth_username.is_some() != self.basic_auth_password.is_some() {
            return Err(ConfigError::Inconsistent(
                "BASIC_AUTH_USERNAME and BASIC_AUTH_PASSWORD must be set together".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn default_rate(&self) -> RateConfig {
        RateConfig::new(self.rate_limit_rps, self.rate_limit_burst)
    }

    /// Default limits plus per-operation overrides.
    pub fn rate_limit_config(&self) -> RateLimitConfig {
        self.rate_limit_operations.iter().fold(
            RateLimitConfig::new(self.default_rate()),
            |config, (operation, rate)| config.with_operation(operation.clone(), *rate),
        )
    }

    pub fn redaction(&self) -> RedactionRules {
        RedactionRules::new(
            self.log_request_redact.clone(),
            self.log_response_redact.clone(),
        )
    }

    pub fn log_options(&self) -> LogOptions {
        LogOptions {
            redaction: self.redaction(),
            max_body_bytes: self.log_max_body_bytes,
        }
    }

    /// Basic credentials, when both halves are configured.
    pub fn basic_credentials(&self) -> Option<(&str, &str)> {
        Some((
            self.basic_auth_username.as_deref()?,
            self.basic_auth_password.as_deref()?,
        ))
    }

    pub fn jwt_settings(&self) -> JwtSettings {
        JwtSettings {
            issuer: self.jwt_issuer.clone(),
            ..JwtSettings::default()
        }
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_enabled()
            .then(|| SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &'static str, default: T) -> ConfigResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                reason: e.to_string(),
            }),
            Err(_) => Ok(default),
        }
    }

    fn parse_eviction() -> ConfigResult<EvictionPolicy> {
        let mode = env::var("RATE_LIMIT_EVICTION").unwrap_or_default();
        match mode.trim().to_ascii_lowercase().as_str() {
            "" | "full" => Ok(EvictionPolicy::Full),
            "idle" => {
                let ttl = Self::parse_env("RATE_LIMIT_IDLE_TTL_SECS", DEFAULT_SWEEP_INTERVAL.as_secs())?;
                Ok(EvictionPolicy::Idle(Duration::from_secs(ttl)))
            }
            other => Err(ConfigError::Invalid {
                name: "RATE_LIMIT_EVICTION",
                reason: format!("expected `full` or `idle`, got `{other}`"),
            }),
        }
    }
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 3000,
            // Rate limiting
            rate_limit_enabled: true,
            rate_limit_rps: 100.0,
            rate_limit_burst: 50,
            rate_limit_operations: HashMap::new(),
            rate_limit_sweep_interval: DEFAULT_SWEEP_INTERVAL,
            rate_limit_eviction: EvictionPolicy::Full,
            // Logging
            log_request_redact: Vec::new(),
            log_response_redact: Vec::new(),
            log_max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            // Security
            basic_auth_username: None,
            basic_auth_password: None,
            jwt_secret: None,
            jwt_issuer: DEFAULT_ISSUER.to_string(),
            cors_allowed_origins: vec!["*".to_string()],
            // Observability
            metrics_port: 9090,
        }
    }
}

fn validate_rate(name: &'static str, config: &RateConfig) -> ConfigResult<()> {
    if !config.rate_per_second.is_finite() || config.rate_per_second < 0.0 {
        return Err(ConfigError::Invalid {
            name,
            reason: format!("rate must be a non-negative number, got {}", config.rate_per_second),
        });
    }
    if config.burst == 0 {
        return Err(ConfigError::Invalid {
            name,
            reason: "burst must be greater than 0".to_string(),
        });
    }
    Ok(())
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Comma-separated list. `None` when the variable is unset.
fn parse_list(name: &str) -> Option<Vec<String>> {
    env::var(name).ok().map(|raw| {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

/// Parse `METHOD:/path=rate:burst;...`.
fn parse_operations(raw: &str) -> ConfigResult<HashMap<String, RateConfig>> {
    let invalid = |reason: String| ConfigError::Invalid {
        name: "RATE_LIMIT_OPERATIONS",
        reason,
    };

    raw.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (operation, limits) = entry
                .rsplit_once('=')
                .ok_or_else(|| invalid(format!("`{entry}` is missing `=rate:burst`")))?;
            let (rate, burst) = limits
                .split_once(':')
                .ok_or_else(|| invalid(format!("`{limits}` is not `rate:burst`")))?;
            let rate = rate
                .trim()
                .parse::<f64>()
                .map_err(|e| invalid(format!("rate in `{entry}`: {e}")))?;
            let burst = burst
                .trim()
                .parse::<u32>()
                .map_err(|e| invalid(format!("burst in `{entry}`: {e}")))?;
            Ok((operation.trim().to_string(), RateConfig::new(rate, burst)))
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert!(config.rate_limit_enabled);
        assert_eq!(config.rate_limit_sweep_interval, Duration::from_secs(600));
        assert_eq!(config.rate_limit_eviction, EvictionPolicy::Full);
        assert!(config.basic_credentials().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_server_addr_format() {
        let config = Config {
            host: "localhost".to_string(),
            port: 8080,
            ..Config::default()
        };

        assert_eq!(config.server_addr(), "localhost:8080");
    }

    #[test]
    fn test_parse_operations() {
        let ops = parse_operations("GET:/me=0.5:2; POST:/tokens=1:3;").unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops["GET:/me"], RateConfig::new(0.5, 2));
        assert_eq!(ops["POST:/tokens"], RateConfig::new(1.0, 3));
    }

    #[test]
    fn test_parse_operations_rejects_garbage() {
        let err = parse_operations("GET:/me=fast").unwrap_err();
        assert!(err.to_string().contains("RATE_LIMIT_OPERATIONS"));

        assert!(parse_operations("GET:/me").is_err());
        assert!(parse_operations("GET:/me=1:-1").is_err());
    }

    #[test]
    fn test_rate_limit_config_uses_overrides() {
        let config = Config {
            rate_limit_operations: HashMap::from([("GET:/me".to_string(), RateConfig::new(1.0, 1))]),
            ..Config::default()
        };
        let limits = config.rate_limit_config();
        assert_eq!(limits.for_operation("GET:/me").burst, 1);
        assert_eq!(limits.for_operation("POST:/echo").burst, 50);
    }

    #[test]
    fn test_validate_zero_burst() {
        let config = Config {
            rate_limit_burst: 0,
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("burst must be greater than 0"));
    }

    #[test]
    fn test_validate_zero_rate_allowed_with_burst() {
        let config = Config {
            rate_limit_rps: 0.0,
            rate_limit_burst: 5,
            ..Config::default()
        };
        assert!(config.validate().is_ok());

        let config = Config {
            rate_limit_rps: f64::NAN,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_idle_ttl_zero() {
        let config = Config {
            rate_limit_eviction: EvictionPolicy::Idle(Duration::ZERO),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_basic_credentials_pair() {
        let config = Config {
            basic_auth_username: Some("admin".to_string()),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Inconsistent(_))));

        let config = Config {
            basic_auth_username: Some("admin".to_string()),
            basic_auth_password: Some("secret".to_string()),
            ..Config::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.basic_credentials(), Some(("admin", "secret")));
    }

    #[test]
    fn test_redaction_and_metrics_addr() {
        let config = Config {
            log_request_redact: vec!["headers.authorization".to_string()],
            metrics_port: 0,
            ..Config::default()
        };
        assert_eq!(config.redaction().request_paths, ["headers.authorization"]);
        assert!(config.metrics_addr().is_none());
    }
}
