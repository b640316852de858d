//! services/ussd_gateway/src/config.rs
//!
//! Defines the gateway's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use crms_ussd_core::RateLimitStrategy;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Where the ephemeral session and counter state lives. Officer bindings,
/// records and the query log are always read from PostgreSQL.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StoreBackend {
    /// Shared PostgreSQL tables; safe for any number of gateway processes.
    #[default]
    Postgres,
    /// In-process maps. Single worker only.
    Memory,
}

impl StoreBackend {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "postgres" => Some(StoreBackend::Postgres),
            "memory" => Some(StoreBackend::Memory),
            _ => None,
        }
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub db_max_connections: u32,
    pub log_level: Level,
    pub store_backend: StoreBackend,
    pub session_idle_timeout: Duration,
    pub rate_window: Duration,
    pub default_daily_limit: u32,
    pub rate_limit_strategy: RateLimitStrategy,
    pub response_budget: Duration,
    pub gateway_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 3000)),
            database_url: "postgres://localhost:5432/crms".to_string(),
            db_max_connections: 5,
            log_level: Level::INFO,
            store_backend: StoreBackend::default(),
            session_idle_timeout: Duration::from_secs(180),
            rate_window: Duration::from_secs(86_400),
            default_daily_limit: 50,
            rate_limit_strategy: RateLimitStrategy::CheckThenIncrement,
            response_budget: Duration::from_millis(4_000),
            gateway_token: None,
        }
    }
}

fn parse_var<T, F>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        None => Ok(default),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any variable source. Unset variables take
    /// the same values as `Config::default()`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        // --- Load Server and Database Settings ---
        let bind_address = parse_var(&lookup, "BIND_ADDRESS", defaults.bind_address)?;

        let store_backend = match lookup("USSD_STORE_BACKEND") {
            Some(raw) => StoreBackend::parse(&raw).ok_or_else(|| {
                ConfigError::InvalidValue(
                    "USSD_STORE_BACKEND".to_string(),
                    format!("'{}' is not one of postgres, memory", raw),
                )
            })?,
            None => defaults.store_backend,
        };

        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;
        let db_max_connections =
            parse_var(&lookup, "DB_MAX_CONNECTIONS", defaults.db_max_connections)?;

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Load Engine Settings ---
        let session_idle_timeout = Duration::from_secs(parse_var(
            &lookup,
            "USSD_SESSION_IDLE_SECS",
            defaults.session_idle_timeout.as_secs(),
        )?);
        let rate_window = Duration::from_secs(parse_var(
            &lookup,
            "USSD_RATE_WINDOW_SECS",
            defaults.rate_window.as_secs(),
        )?);
        let default_daily_limit = parse_var(
            &lookup,
            "USSD_DEFAULT_DAILY_LIMIT",
            defaults.default_daily_limit,
        )?;
        if default_daily_limit == 0 {
            return Err(ConfigError::InvalidValue(
                "USSD_DEFAULT_DAILY_LIMIT".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let rate_limit_strategy = match lookup("USSD_RATE_LIMIT_STRATEGY") {
            Some(raw) => RateLimitStrategy::parse(&raw).ok_or_else(|| {
                ConfigError::InvalidValue(
                    "USSD_RATE_LIMIT_STRATEGY".to_string(),
                    format!(
                        "'{}' is not one of check_then_increment, increment_then_compare",
                        raw
                    ),
                )
            })?,
            None => defaults.rate_limit_strategy,
        };

        let response_budget = Duration::from_millis(parse_var(
            &lookup,
            "USSD_RESPONSE_BUDGET_MS",
            defaults.response_budget.as_millis() as u64,
        )?);
        let gateway_token = lookup("USSD_GATEWAY_TOKEN").filter(|token| !token.is_empty());

        Ok(Self {
            bind_address,
            database_url,
            db_max_connections,
            log_level,
            store_backend,
            session_idle_timeout,
            rate_window,
            default_daily_limit,
            rate_limit_strategy,
            response_budget,
            gateway_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const DB: &str = "postgres://crms:secret@db:5432/crms";

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    fn rejected_var(result: Result<Config, ConfigError>) -> String {
        match result {
            Err(ConfigError::InvalidValue(name, _)) | Err(ConfigError::MissingVar(name)) => name,
            Ok(_) => panic!("configuration was accepted"),
        }
    }

    #[test]
    fn unset_variables_match_the_defaults() {
        let config = load(&[("DATABASE_URL", DB)]).unwrap();
        let defaults = Config::default();

        assert_eq!(config.database_url, DB);
        assert_eq!(config.bind_address, defaults.bind_address);
        assert_eq!(config.store_backend, StoreBackend::Postgres);
        assert_eq!(config.store_backend, defaults.store_backend);
        assert_eq!(config.session_idle_timeout, Duration::from_secs(180));
        assert_eq!(config.rate_window, Duration::from_secs(86_400));
        assert_eq!(config.default_daily_limit, 50);
        assert_eq!(config.rate_limit_strategy, RateLimitStrategy::CheckThenIncrement);
        assert_eq!(config.response_budget, Duration::from_millis(4_000));
        assert_eq!(config.db_max_connections, defaults.db_max_connections);
        assert_eq!(config.log_level, Level::INFO);
        assert!(config.gateway_token.is_none());
    }

    #[test]
    fn overrides_are_applied() {
        let config = load(&[
            ("DATABASE_URL", DB),
            ("BIND_ADDRESS", "127.0.0.1:8080"),
            ("USSD_STORE_BACKEND", "Memory"),
            ("USSD_RATE_LIMIT_STRATEGY", "increment_then_compare"),
            ("USSD_DEFAULT_DAILY_LIMIT", "20"),
            ("USSD_RESPONSE_BUDGET_MS", "2500"),
            ("USSD_GATEWAY_TOKEN", "s3cret"),
            ("RUST_LOG", "debug"),
        ])
        .unwrap();

        assert_eq!(config.bind_address, SocketAddr::from(([127, 0, 0, 1], 8080)));
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(
            config.rate_limit_strategy,
            RateLimitStrategy::IncrementThenCompare
        );
        assert_eq!(config.default_daily_limit, 20);
        assert_eq!(config.response_budget, Duration::from_millis(2_500));
        assert_eq!(config.gateway_token.as_deref(), Some("s3cret"));
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    fn database_url_is_required_for_every_backend() {
        assert_eq!(rejected_var(load(&[])), "DATABASE_URL");
        assert_eq!(
            rejected_var(load(&[("USSD_STORE_BACKEND", "memory")])),
            "DATABASE_URL"
        );
    }

    #[test]
    fn unknown_backend_and_strategy_are_rejected() {
        assert_eq!(
            rejected_var(load(&[("DATABASE_URL", DB), ("USSD_STORE_BACKEND", "redis")])),
            "USSD_STORE_BACKEND"
        );
        assert_eq!(
            rejected_var(load(&[
                ("DATABASE_URL", DB),
                ("USSD_RATE_LIMIT_STRATEGY", "sliding_window"),
            ])),
            "USSD_RATE_LIMIT_STRATEGY"
        );
    }

    #[test]
    fn zero_daily_limit_is_rejected() {
        assert_eq!(
            rejected_var(load(&[("DATABASE_URL", DB), ("USSD_DEFAULT_DAILY_LIMIT", "0")])),
            "USSD_DEFAULT_DAILY_LIMIT"
        );
    }

    #[test]
    fn malformed_numbers_name_their_variable() {
        assert_eq!(
            rejected_var(load(&[("DATABASE_URL", DB), ("USSD_SESSION_IDLE_SECS", "soon")])),
            "USSD_SESSION_IDLE_SECS"
        );
    }
}
