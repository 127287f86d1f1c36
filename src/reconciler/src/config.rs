//! Configuration loading from environment variables.

use std::env;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
}

/// Application configuration loaded from environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL
    pub database_url: String,

    /// IPFS HTTP gateway base URL
    pub ipfs_gateway_url: String,

    /// Timeout for a single IPFS fetch in seconds
    pub ipfs_timeout_secs: u64,

    /// Block feed poll interval in seconds
    pub poll_interval_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required variables:
    /// - DATABASE_URL: PostgreSQL connection string
    ///
    /// Optional variables (with defaults):
    /// - IPFS_GATEWAY_URL: IPFS gateway base URL (default: https://ipfs.io)
    /// - IPFS_TIMEOUT_SECS: Fetch timeout (default: 10)
    /// - POLL_INTERVAL_SECS: Block feed poll interval (default: 5)
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present
        dotenvy::dotenv().ok();
        Self::from_env_only()
    }

    /// Load configuration from environment variables only (no .env file).
    /// Useful for testing.
    pub fn from_env_only() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let ipfs_gateway_url =
            env::var("IPFS_GATEWAY_URL").unwrap_or_else(|_| "https://ipfs.io".to_string());
        Url::parse(&ipfs_gateway_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", ipfs_gateway_url, e)))?;

        let ipfs_timeout_secs = env::var("IPFS_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        let poll_interval_secs = env::var("POLL_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        Ok(Self {
            database_url,
            ipfs_gateway_url,
            ipfs_timeout_secs,
            poll_interval_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear() {
        for var in [
            "DATABASE_URL",
            "IPFS_GATEWAY_URL",
            "IPFS_TIMEOUT_SECS",
            "POLL_INTERVAL_SECS",
        ] {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_config_missing_database_url() {
        clear();

        // Use from_env_only to avoid .env file loading
        let result = Config::from_env_only();
        assert!(result.is_err());

        if let Err(ConfigError::MissingVar(var)) = result {
            assert_eq!(var, "DATABASE_URL");
        } else {
            panic!("Expected MissingVar error");
        }
    }

    #[test]
    #[serial]
    fn test_config_with_defaults() {
        clear();
        env::set_var("DATABASE_URL", "postgres://localhost/test");

        let config = Config::from_env_only().unwrap();

        assert_eq!(config.database_url, "postgres://localhost/test");
        assert_eq!(config.ipfs_gateway_url, "https://ipfs.io");
        assert_eq!(config.ipfs_timeout_secs, 10);
        assert_eq!(config.poll_interval_secs, 5);

        clear();
    }

    #[test]
    #[serial]
    fn test_config_overrides_and_invalid_numbers() {
        clear();
        env::set_var("DATABASE_URL", "postgres://localhost/test");
        env::set_var("IPFS_GATEWAY_URL", "http://127.0.0.1:8080");
        env::set_var("IPFS_TIMEOUT_SECS", "30");
        env::set_var("POLL_INTERVAL_SECS", "soon");

        let config = Config::from_env_only().unwrap();

        assert_eq!(config.ipfs_gateway_url, "http://127.0.0.1:8080");
        assert_eq!(config.ipfs_timeout_secs, 30);
        assert_eq!(config.poll_interval_secs, 5); // Falls back to default

        clear();
    }

    #[test]
    #[serial]
    fn test_config_invalid_gateway_url() {
        clear();
        env::set_var("DATABASE_URL", "postgres://localhost/test");
        env::set_var("IPFS_GATEWAY_URL", "not a url");

        assert!(matches!(
            Config::from_env_only(),
            Err(ConfigError::InvalidUrl(_))
        ));

        clear();
    }
}
