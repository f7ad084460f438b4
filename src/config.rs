//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration files (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub keys: KeysConfig,
    pub storage: StorageConfig,
    pub federation: FederationConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 3000)
    pub port: u16,
    /// Fixed public base URL (e.g., "https://inbox.example.com").
    ///
    /// When unset the public host is derived per request from the
    /// `X-Forwarded-Proto`, `X-Forwarded-Host` and `Host` headers.
    pub public_url: Option<String>,
}

impl ServerConfig {
    /// Configured public base URL without a trailing slash
    pub fn public_base_url(&self) -> Option<String> {
        self.public_url
            .as_deref()
            .map(|url| url.trim_end_matches('/').to_string())
    }
}

/// Location of this service's RSA key pair
#[derive(Debug, Clone, Deserialize)]
pub struct KeysConfig {
    pub private_key_path: PathBuf,
    pub public_key_path: PathBuf,
}

/// Follower and message document locations
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub followers_path: PathBuf,
    pub messages_path: PathBuf,
}

/// Outbound federation settings
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// User-Agent sent on every outbound request
    pub user_agent: String,
    /// Timeout for a single outbound HTTP request
    pub request_timeout_seconds: u64,
    /// Deadline for one complete delivery (resolve + sign + POST)
    pub delivery_timeout_seconds: u64,
    /// Upper bound on concurrent deliveries during a broadcast
    pub max_concurrent_deliveries: usize,
    /// Allow fetching from / delivering to loopback and private networks
    pub allow_private_hosts: bool,
}

impl FederationConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_seconds)
    }
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("inboxd/{}", env!("CARGO_PKG_VERSION")),
            request_timeout_seconds: 30,
            delivery_timeout_seconds: 30,
            max_concurrent_deliveries: 10,
            allow_private_hosts: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (INBOXD__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .set_default("keys.private_key_path", "data/private.pem")?
            .set_default("keys.public_key_path", "data/public.pem")?
            .set_default("storage.followers_path", "data/followers.json")?
            .set_default("storage.messages_path", "data/messages.json")?
            .set_default(
                "federation.user_agent",
                format!("inboxd/{}", env!("CARGO_PKG_VERSION")),
            )?
            .set_default("federation.request_timeout_seconds", 30)?
            .set_default("federation.delivery_timeout_seconds", 30)?
            .set_default("federation.max_concurrent_deliveries", 10)?
            .set_default("federation.allow_private_hosts", false)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("INBOXD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    fn validate(&self) -> Result<(), crate::error::AppError> {
        if let Some(public_url) = &self.server.public_url {
            let parsed = url::Url::parse(public_url).map_err(|e| {
                crate::error::AppError::Config(format!("server.public_url is invalid: {}", e))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
                return Err(crate::error::AppError::Config(
                    "server.public_url must be an absolute http(s) URL".to_string(),
                ));
            }
        }

        if self.federation.max_concurrent_deliveries == 0 {
            return Err(crate::error::AppError::Config(
                "federation.max_concurrent_deliveries must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
