//! Configuration module for tgstate-relay
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion, environment overrides and validation.
//!
//! The resulting [`Config`] is built once at startup and handed to the
//! components that need it. Request handling never reads the process
//! environment.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

mod loader;

pub use loader::ConfigLoader;

/// Environment variable overriding `relay.base_url`
pub const ENV_BASE_URL: &str = "BASE_URL";
/// Environment variable overriding `relay.backend_endpoint`
pub const ENV_BACKEND_ENDPOINT: &str = "TGSTATE_API_URL";
/// Environment variable overriding `relay.backend_secret`
pub const ENV_BACKEND_SECRET: &str = "TGSTATE_PASS";
/// Environment variable overriding `store.path`
pub const ENV_STORE_PATH: &str = "DB_PATH";
/// Environment variable overriding `server.address`
pub const ENV_ADDRESS: &str = "RELAY_ADDRESS";

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// Variable names must start with an uppercase letter or underscore and
/// contain only uppercase letters, digits, and underscores.
///
/// # Examples
///
/// ```ignore
/// std::env::set_var("MY_VAR", "value");
/// let result = expand_env_vars("prefix-${MY_VAR}-suffix");
/// assert_eq!(result, "prefix-value-suffix");
///
/// let result = expand_env_vars("${MISSING:-default}");
/// assert_eq!(result, "default");
/// ```
pub(crate) fn expand_env_vars(s: &str) -> String {
    let Ok(re) = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}") else {
        return s.to_string();
    };

    re.replace_all(s, |cap: &regex_lite::Captures<'_>| {
        match std::env::var(&cap[1]) {
            Ok(value) => value,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                // No env var and no default. Keep the original placeholder.
                None => cap[0].to_string(),
            },
        }
    })
    .into_owned()
}

// ============================================================================
// Validation Helpers
// ============================================================================

/// Validate that a URL starts with http:// or https:// and parses
fn is_valid_http_url(url: &str) -> bool {
    (url.starts_with("http://") || url.starts_with("https://")) && Url::parse(url).is_ok()
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub relay: RelayConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a file, then apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Build configuration from defaults and the process environment only
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self {
            server: ServerConfig::default(),
            relay: RelayConfig::default(),
            store: StoreConfig::default(),
            metrics: MetricsConfig::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Override settings with the deployment environment variables when set.
    ///
    /// Empty values are ignored, except for the backend secret where an
    /// empty value explicitly disables the credential cookie.
    pub fn apply_env_overrides(&mut self) {
        if let Some(base_url) = non_empty_env(ENV_BASE_URL) {
            self.relay.base_url = base_url;
        }
        if let Some(endpoint) = non_empty_env(ENV_BACKEND_ENDPOINT) {
            self.relay.backend_endpoint = Some(endpoint);
        }
        if let Ok(secret) = std::env::var(ENV_BACKEND_SECRET) {
            self.relay.backend_secret = Some(secret);
        }
        if let Some(path) = non_empty_env(ENV_STORE_PATH) {
            self.store.path = PathBuf::from(path);
        }
        if let Some(address) = non_empty_env(ENV_ADDRESS) {
            self.server.address = address;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_http_url(&self.relay.base_url) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid base_url '{}': must be an http:// or https:// URL",
                self.relay.base_url
            )));
        }

        if let Some(ref endpoint) = self.relay.backend_endpoint {
            if !is_valid_http_url(endpoint) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid backend_endpoint '{}': must be an http:// or https:// URL",
                    endpoint
                )));
            }
        }

        if self.relay.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "relay.timeout_secs must be greater than zero".into(),
            ));
        }

        if self.store.path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "store.path cannot be empty".into(),
            ));
        }

        if self.store.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "store.max_connections must be greater than zero".into(),
            ));
        }

        if self.server.max_upload_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "server.max_upload_bytes must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_address")]
    pub address: String,
    /// Upper bound on an inbound request body, in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_upload_bytes() -> u64 {
    104857600 // 100MB
}

/// Backend relay configuration
///
/// # Example
///
/// ```yaml
/// relay:
///   base_url: "https://files.example.com"
///   backend_endpoint: "${TGSTATE_API_URL:-https://files.example.com/api}"
///   backend_secret: "${TGSTATE_PASS}"
///   timeout_secs: 60
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Public root that generated links are resolved against
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Upload endpoint of the backend. Defaults to `<base_url>/api`
    #[serde(default)]
    pub backend_endpoint: Option<String>,
    /// Secret sent as the `p` cookie. Empty disables the cookie
    #[serde(default)]
    pub backend_secret: Option<String>,
    /// Upper bound on a single backend call, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            backend_endpoint: None,
            backend_secret: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl RelayConfig {
    /// Effective backend endpoint, derived from the base URL unless overridden
    pub fn endpoint(&self) -> String {
        match self.backend_endpoint {
            Some(ref endpoint) => endpoint.clone(),
            None => format!("{}/api", self.base_url.trim_end_matches('/')),
        }
    }

    /// Configured secret, treating an empty value as absent
    pub fn secret(&self) -> Option<&str> {
        self.backend_secret.as_deref().filter(|s| !s.is_empty())
    }

    /// Parsed base URL
    pub fn base(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.base_url).map_err(|e| {
            ConfigError::ValidationError(format!("Invalid base_url '{}': {}", self.base_url, e))
        })
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

/// History store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("files.db")
}

fn default_max_connections() -> u32 {
    4
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Serve Prometheus metrics on `/metrics`. Default: true
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}
