//! Application configuration loaded from environment variables.
//!
//! Nothing here is secret: the remote store authenticates through the
//! ambient Google credentials (or the emulator), not through config values.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port
    pub port: u16,
    /// GCP project ID
    pub gcp_project_id: String,
    /// Frontend origin allowed by CORS
    pub frontend_url: String,
    /// Directory holding the local cache
    pub cache_dir: PathBuf,
    /// Upper bound on any single remote store call
    pub gateway_timeout: Duration,
    /// Rows fetched from the leaderboard collection before ranking
    pub leaderboard_population_cap: usize,
    /// Rows returned when a leaderboard request names no limit
    pub leaderboard_default_limit: usize,
    /// Skip connecting to the remote store; every write stays pending
    pub offline_mode: bool,
}

impl Default for Config {
    /// Default config for testing only.
    fn default() -> Self {
        Self {
            port: 8080,
            gcp_project_id: "test-project".to_string(),
            frontend_url: "http://localhost:5173".to_string(),
            cache_dir: PathBuf::from(".questlog-cache"),
            gateway_timeout: Duration::from_millis(5000),
            leaderboard_population_cap: 1000,
            leaderboard_default_limit: 10,
            offline_mode: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Every variable has a default; a `.env` file is read if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let cache_dir = env::var("QUESTLOG_CACHE_DIR")
            .unwrap_or_else(|_| ".questlog-cache".to_string());
        if cache_dir.trim().is_empty() {
            return Err(ConfigError::Invalid {
                name: "QUESTLOG_CACHE_DIR",
                reason: "must not be empty".to_string(),
            });
        }

        Ok(Self {
            port: parse_or("PORT", 8080)?,
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            cache_dir: PathBuf::from(cache_dir),
            gateway_timeout: Duration::from_millis(parse_or("GATEWAY_TIMEOUT_MS", 5000)?),
            leaderboard_population_cap: parse_or("LEADERBOARD_POPULATION_CAP", 1000)?,
            leaderboard_default_limit: parse_or("LEADERBOARD_DEFAULT_LIMIT", 10)?,
            offline_mode: parse_or("OFFLINE_MODE", false)?,
        })
    }
}

/// Parse `name` if set, otherwise use `default`.
fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}
