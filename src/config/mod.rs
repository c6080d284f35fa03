//! Configuration management for the AppBuilder client
//!
//! Supports configuration via:
//! 1. Config file (~/.config/appbuilder/config.toml)
//! 2. Environment variables (APPBUILDER_TOKEN, GATEWAY_URL_V2, etc.)
//! 3. CLI arguments (override file/env settings)
//!
//! Every client takes its [`Config`] explicitly; nothing is process-wide.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::api::DEFAULT_MAX_LINE_BYTES;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid service URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Gateway location and console API path
    pub service: ServiceSettings,

    /// Credentials
    pub auth: AuthSettings,

    /// HTTP transport settings
    pub http: HttpSettings,

    /// Event stream settings
    pub stream: StreamSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Gateway base URL (can also use GATEWAY_URL_V2 env var)
    pub gateway_url: String,

    /// Console OpenAPI version path segment
    pub openapi_version: String,

    /// Optional path prefix placed before the version
    pub openapi_prefix: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            gateway_url: "https://qianfan.baidubce.com".to_string(),
            openapi_version: "/v2".to_string(),
            openapi_prefix: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Secret key (can also use APPBUILDER_TOKEN env var)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,

    /// Scheme placed before the key in the Authorization header
    pub secret_key_prefix: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            secret_key: None,
            secret_key_prefix: "Bearer".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Whole-request timeout, including reading a streamed body
    pub timeout_secs: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self { timeout_secs: 300 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// Longest SSE line accepted before the stream fails
    pub max_line_bytes: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

impl Config {
    /// Get default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("appbuilder")
            .join("config.toml")
    }

    /// Load config from default location
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::default_path())
    }

    /// Load config from specific path
    pub fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default().with_env_overrides());
        }

        let content = std::fs::read_to_string(&path)?;
        let config: Config = toml::from_str(&content)?;

        Ok(config.with_env_overrides())
    }

    /// Apply environment variable overrides
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable lookup
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(key) = lookup("APPBUILDER_TOKEN") {
            self.auth.secret_key = Some(key);
        }
        if let Some(prefix) = lookup("SECRET_KEY_PREFIX") {
            self.auth.secret_key_prefix = prefix;
        }
        if let Some(url) = lookup("GATEWAY_URL_V2") {
            self.service.gateway_url = url;
        }
        if let Some(version) = lookup("CONSOLE_OPENAPI_VERSION") {
            self.service.openapi_version = version;
        }
        if let Some(prefix) = lookup("CONSOLE_OPENAPI_PREFIX") {
            self.service.openapi_prefix = prefix;
        }

        self
    }

    /// Save config to default location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(Self::default_path())
    }

    /// Save config to specific path
    pub fn save_to(&self, path: PathBuf) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.secret_key.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::MissingRequired(
                "secret key (set APPBUILDER_TOKEN or auth.secret_key)".to_string(),
            ));
        }
        self.service_url("")?;
        Ok(())
    }

    /// Value of the Authorization header, with the scheme prefix applied once
    pub fn authorization(&self) -> Option<String> {
        let key = self.auth.secret_key.as_deref()?.trim();
        let prefix = self.auth.secret_key_prefix.trim();
        if prefix.is_empty() || key.starts_with(prefix) {
            Some(key.to_string())
        } else {
            Some(format!("{} {}", prefix, key))
        }
    }

    /// Full URL of a console endpoint, e.g. `/app/conversation`
    pub fn service_url(&self, suffix: &str) -> Result<Url, ConfigError> {
        let raw = format!(
            "{}{}{}{}",
            self.service.gateway_url.trim_end_matches('/'),
            self.service.openapi_prefix,
            self.service.openapi_version,
            suffix
        );
        Url::parse(&raw).map_err(|e| ConfigError::InvalidUrl {
            url: raw.clone(),
            reason: e.to_string(),
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }

    /// Generate example config content
    pub fn example() -> String {
        let example = Config::default();
        toml::to_string_pretty(&example).unwrap_or_default()
    }
}

/// Builder for creating Config programmatically
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn secret_key(mut self, key: impl Into<String>) -> Self {
        self.config.auth.secret_key = Some(key.into());
        self
    }

    pub fn secret_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.auth.secret_key_prefix = prefix.into();
        self
    }

    pub fn gateway_url(mut self, url: impl Into<String>) -> Self {
        self.config.service.gateway_url = url.into();
        self
    }

    pub fn openapi_version(mut self, version: impl Into<String>) -> Self {
        self.config.service.openapi_version = version.into();
        self
    }

    pub fn openapi_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.service.openapi_prefix = prefix.into();
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.http.timeout_secs = secs;
        self
    }

    pub fn max_line_bytes(mut self, bytes: usize) -> Self {
        self.config.stream.max_line_bytes = bytes;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service.gateway_url, "https://qianfan.baidubce.com");
        assert_eq!(config.service.openapi_version, "/v2");
        assert_eq!(config.stream.max_line_bytes, 1024 * 1024);
        assert_eq!(config.timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .secret_key("test-key")
            .gateway_url("http://localhost:8080")
            .max_line_bytes(4096)
            .build();

        assert_eq!(config.auth.secret_key, Some("test-key".to_string()));
        assert_eq!(config.service.gateway_url, "http://localhost:8080");
        assert_eq!(config.stream.max_line_bytes, 4096);
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("APPBUILDER_TOKEN", "env-key"),
            ("GATEWAY_URL_V2", "http://gateway.local"),
            ("CONSOLE_OPENAPI_PREFIX", "/api"),
        ]
        .into_iter()
        .collect();

        let config = Config::default().with_overrides(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(config.auth.secret_key.as_deref(), Some("env-key"));
        assert_eq!(
            config.service_url("/apps").unwrap().as_str(),
            "http://gateway.local/api/v2/apps"
        );
    }

    #[test]
    fn test_authorization_prefix_applied_once() {
        let config = ConfigBuilder::new().secret_key("abc").build();
        assert_eq!(config.authorization().as_deref(), Some("Bearer abc"));

        let config = ConfigBuilder::new().secret_key("Bearer abc").build();
        assert_eq!(config.authorization().as_deref(), Some("Bearer abc"));

        assert!(Config::default().authorization().is_none());
    }

    #[test]
    fn test_service_url_keeps_query() {
        let config = ConfigBuilder::new().gateway_url("http://host:1/").build();
        let url = config.service_url("/app?Action=DescribeApps").unwrap();
        assert_eq!(url.path(), "/v2/app");
        assert_eq!(url.query(), Some("Action=DescribeApps"));
    }

    #[test]
    fn test_validate() {
        assert!(matches!(
            Config::default().validate(),
            Err(ConfigError::MissingRequired(_))
        ));

        let bad_url = ConfigBuilder::new().secret_key("k").gateway_url("not a url").build();
        assert!(matches!(bad_url.validate(), Err(ConfigError::InvalidUrl { .. })));

        assert!(ConfigBuilder::new().secret_key("k").build().validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir()
            .join(format!("appbuilder-{}", uuid::Uuid::new_v4()))
            .join("config.toml");
        let config = ConfigBuilder::new().openapi_version("/v3").timeout_secs(5).build();
        config.save_to(path.clone()).unwrap();

        let loaded: Config = toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.service.openapi_version, "/v3");
        assert_eq!(loaded.http.timeout_secs, 5);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_example_config() {
        let example = Config::example();
        assert!(example.contains("[service]"));
        assert!(example.contains("[auth]"));
        assert!(example.contains("[stream]"));
    }
}
