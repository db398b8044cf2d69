//! Configuration loading for ojeomd.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. `--config <path>` (CLI flag)
//! 2. `~/.ojeomneo/config.toml` (user)
//! 3. `/etc/ojeomneo/config.toml` (system)
//!
//! Every key has a default, so a missing implicit file is not an error.
//! The LLM API key is never read from the file; it comes from `LLM_API_KEY`.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use http::{HeaderName, Method};
use tracing::info;

use crate::{EdgeError, RateLimitConfig, ReasoningCacheConfig, ResponseCacheConfig, Result};

/// Environment variable holding the LLM API key.
pub const LLM_API_KEY_ENV: &str = "LLM_API_KEY";

/// Server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub rate_limit: RateLimitSection,
    #[serde(default)]
    pub response_cache: ResponseCacheSection,
    #[serde(default)]
    pub reasoning: ReasoningSection,
    #[serde(default)]
    pub llm: LlmConfig,
}

/// Server network configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to (default: 0.0.0.0:3000).
    #[serde(default = "default_address")]
    pub address: String,
    /// Prefix of every route (default: /ojeomneo/v1).
    #[serde(default = "default_base_path")]
    pub base_path: String,
    /// Request timeout in seconds (default: 30).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            base_path: default_base_path(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_address() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_base_path() -> String {
    "/ojeomneo/v1".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

/// Backing store connection. Without a URL the server runs on an in-memory store.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    #[serde(default = "default_retries")]
    pub retries: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            connection_timeout_ms: default_connection_timeout_ms(),
            retries: default_retries(),
        }
    }
}

fn default_connection_timeout_ms() -> u64 {
    500
}

fn default_retries() -> usize {
    1
}

/// `[rate_limit]` section. Unset fields keep [`RateLimitConfig`] defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub window_secs: Option<u64>,
    #[serde(default)]
    pub max_requests: Option<u64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub skip_paths: Option<Vec<String>>,
    #[serde(default)]
    pub client_ip_headers: Option<Vec<String>>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: None,
            max_requests: None,
            message: None,
            scope: None,
            skip_paths: None,
            client_ip_headers: None,
            timeout_ms: None,
        }
    }
}

/// `[response_cache]` section. Unset fields keep [`ResponseCacheConfig`] defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseCacheSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub default_ttl_secs: Option<u64>,
    #[serde(default)]
    pub methods: Option<Vec<String>>,
    #[serde(default)]
    pub skip_paths: Option<Vec<String>>,
    #[serde(default)]
    pub key_prefix: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_body_bytes: Option<usize>,
    /// Replaces the built-in path rules when present.
    #[serde(default)]
    pub path_ttl_secs: Option<BTreeMap<String, u64>>,
}

impl Default for ResponseCacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: None,
            methods: None,
            skip_paths: None,
            key_prefix: None,
            timeout_ms: None,
            max_body_bytes: None,
            path_ttl_secs: None,
        }
    }
}

/// `[reasoning]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ReasoningSection {
    #[serde(default = "default_reason_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_generation_timeout_ms")]
    pub generation_timeout_ms: u64,
}

impl Default for ReasoningSection {
    fn default() -> Self {
        Self {
            ttl_secs: default_reason_ttl(),
            max_entries: default_max_entries(),
            sweep_interval_secs: default_sweep_interval(),
            generation_timeout_ms: default_generation_timeout_ms(),
        }
    }
}

fn default_reason_ttl() -> u64 {
    3600
}

fn default_max_entries() -> usize {
    1000
}

fn default_sweep_interval() -> u64 {
    600
}

fn default_generation_timeout_ms() -> u64 {
    4000
}

/// `[llm]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided, must exist)
    /// 2. `~/.ojeomneo/config.toml`
    /// 3. `/etc/ojeomneo/config.toml`
    ///
    /// Falls back to defaults when no implicit file exists. The result is
    /// validated before it is returned.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let config = match Self::resolve_config_path(explicit_path)? {
            Some(path) => {
                let content = fs::read_to_string(&path).map_err(|e| {
                    EdgeError::Configuration(format!("Failed to read config file {path:?}: {e}"))
                })?;
                let config = Self::parse(&content).map_err(|e| match e {
                    EdgeError::Configuration(msg) => {
                        EdgeError::Configuration(format!("{path:?}: {msg}"))
                    }
                    other => other,
                })?;
                info!(path = %path.display(), "loaded configuration");
                config
            }
            None => {
                info!("no config file found, using defaults");
                Self::default()
            }
        };
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| EdgeError::Configuration(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config file path.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(EdgeError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".ojeomneo").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/ojeomneo/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }

    /// Check every section by building the component configs from it.
    pub fn validate(&self) -> Result<()> {
        self.server
            .address
            .parse::<std::net::SocketAddr>()
            .map_err(|e| EdgeError::Configuration(format!("Invalid address: {e}")))?;
        if !self.server.base_path.starts_with('/') || self.server.base_path.ends_with('/') {
            return Err(EdgeError::Configuration(format!(
                "base_path must start with '/' and not end with one: {}",
                self.server.base_path
            )));
        }
        if self.server.request_timeout_secs == 0 {
            return Err(EdgeError::Configuration(
                "request_timeout_secs must be non-zero".into(),
            ));
        }
        if self.reasoning.generation_timeout_ms == 0 {
            return Err(EdgeError::Configuration(
                "generation_timeout_ms must be non-zero".into(),
            ));
        }
        self.rate_limit_config()?.validate()?;
        self.response_cache_config()?;
        crate::ReasoningCache::new(self.reasoning_cache_config())?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.reasoning.generation_timeout_ms)
    }

    pub fn store_connection_timeout(&self) -> Duration {
        Duration::from_millis(self.store.connection_timeout_ms)
    }

    /// Rate limiter settings with file overrides applied.
    pub fn rate_limit_config(&self) -> Result<RateLimitConfig> {
        let section = &self.rate_limit;
        let mut config = RateLimitConfig::default();
        if let Some(secs) = section.window_secs {
            config = config.window(Duration::from_secs(secs));
        }
        if let Some(max) = section.max_requests {
            config = config.max_requests(max);
        }
        if let Some(message) = &section.message {
            config = config.message(message.clone());
        }
        if let Some(scope) = &section.scope {
            config = config.scope(scope.clone());
        }
        if let Some(paths) = &section.skip_paths {
            config = config.skip_paths(paths.clone());
        }
        if let Some(names) = &section.client_ip_headers {
            let headers = names
                .iter()
                .map(|name| {
                    HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                        EdgeError::Configuration(format!("Invalid header name {name:?}: {e}"))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            config = config.client_ip_headers(headers);
        }
        if let Some(ms) = section.timeout_ms {
            config = config.timeout(Duration::from_millis(ms));
        }
        Ok(config)
    }

    /// Response cache settings with file overrides applied.
    pub fn response_cache_config(&self) -> Result<ResponseCacheConfig> {
        let section = &self.response_cache;
        let mut config = ResponseCacheConfig::default();
        if let Some(secs) = section.default_ttl_secs {
            config = config.default_ttl(Duration::from_secs(secs));
        }
        if let Some(methods) = &section.methods {
            let methods = methods
                .iter()
                .map(|m| {
                    Method::from_bytes(m.to_ascii_uppercase().as_bytes()).map_err(|e| {
                        EdgeError::Configuration(format!("Invalid method {m:?}: {e}"))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            config = config.methods(methods);
        }
        if let Some(paths) = &section.skip_paths {
            config = config.skip_paths(paths.clone());
        }
        if let Some(prefix) = &section.key_prefix {
            config = config.key_prefix(prefix.clone());
        }
        if let Some(ms) = section.timeout_ms {
            config = config.timeout(Duration::from_millis(ms));
        }
        if let Some(bytes) = section.max_body_bytes {
            config = config.max_body_bytes(bytes);
        }
        if let Some(rules) = &section.path_ttl_secs {
            config = config.path_ttls(
                rules
                    .iter()
                    .map(|(prefix, secs)| (prefix.clone(), Duration::from_secs(*secs)))
                    .collect(),
            );
        }
        config.validate()?;
        Ok(config)
    }

    /// Reasoning cache settings.
    pub fn reasoning_cache_config(&self) -> ReasoningCacheConfig {
        ReasoningCacheConfig::new()
            .ttl(Duration::from_secs(self.reasoning.ttl_secs))
            .max_entries(self.reasoning.max_entries)
            .sweep_interval(Duration::from_secs(self.reasoning.sweep_interval_secs))
    }

    /// API key from the environment. Empty values count as unset.
    pub fn llm_api_key() -> Option<String> {
        std::env::var(LLM_API_KEY_ENV)
            .ok()
            .filter(|key| !key.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.server.address, "0.0.0.0:3000");
        assert_eq!(config.server.base_path, "/ojeomneo/v1");
        assert_eq!(config.server.request_timeout_secs, 30);
        assert!(config.store.url.is_none());
        assert!(config.rate_limit.enabled);
        assert!(config.response_cache.enabled);
        assert_eq!(config.reasoning.max_entries, 1000);
        assert_eq!(config.generation_timeout(), Duration::from_secs(4));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_minimal_config() {
        let config = Config::parse(
            r#"
            [server]
            address = "127.0.0.1:8080"
        "#,
        )
        .unwrap();
        assert_eq!(config.server.address, "127.0.0.1:8080");
        // Defaults preserved
        assert_eq!(config.rate_limit_config().unwrap().max_requests, 100);
    }

    #[test]
    fn parse_full_config() {
        let config = Config::parse(
            r#"
            [server]
            address = "0.0.0.0:3000"
            base_path = "/api"
            request_timeout_secs = 10

            [store]
            url = "redis://cache:6379/1"
            connection_timeout_ms = 250
            retries = 3

            [rate_limit]
            window_secs = 30
            max_requests = 20
            skip_paths = ["/api/healthcheck"]
            client_ip_headers = ["x-real-ip"]
            timeout_ms = 1500

            [response_cache]
            default_ttl_secs = 60
            methods = ["get", "HEAD"]
            key_prefix = "cache:menus"

            [response_cache.path_ttl_secs]
            "/api/menus" = 600
            "/api/menus/categories" = 900

            [reasoning]
            ttl_secs = 120
            max_entries = 10
            sweep_interval_secs = 30
            generation_timeout_ms = 2500

            [llm]
            base_url = "http://localhost:8081/v1"
            model = "test-model"
        "#,
        )
        .unwrap();

        assert_eq!(config.store.url.as_deref(), Some("redis://cache:6379/1"));
        assert_eq!(config.store_connection_timeout(), Duration::from_millis(250));
        assert_eq!(config.store.retries, 3);

        let limits = config.rate_limit_config().unwrap();
        assert_eq!(limits.window, Duration::from_secs(30));
        assert_eq!(limits.max_requests, 20);
        assert_eq!(limits.skip_paths, vec!["/api/healthcheck".to_string()]);
        assert_eq!(limits.client_ip_headers, vec![HeaderName::from_static("x-real-ip")]);
        assert_eq!(limits.timeout, Duration::from_millis(1500));

        let cache = config.response_cache_config().unwrap();
        assert_eq!(cache.default_ttl, Duration::from_secs(60));
        assert_eq!(cache.methods, vec![Method::GET, Method::HEAD]);
        assert_eq!(cache.key_prefix, "cache:menus");
        assert_eq!(cache.path_ttls.len(), 2);

        let reasoning = config.reasoning_cache_config();
        assert_eq!(reasoning.ttl, Duration::from_secs(120));
        assert_eq!(reasoning.max_entries, 10);
        assert_eq!(config.generation_timeout(), Duration::from_millis(2500));
        assert_eq!(config.llm.model, "test-model");
    }

    #[test]
    fn zero_window_rejected() {
        let err = Config::parse("[rate_limit]\nwindow_secs = 0\n").unwrap_err();
        assert!(matches!(err, EdgeError::Configuration(_)));
    }

    #[test]
    fn zero_path_ttl_rejected() {
        let err = Config::parse("[response_cache.path_ttl_secs]\n\"/x\" = 0\n").unwrap_err();
        assert!(matches!(err, EdgeError::Configuration(_)));
    }

    #[test]
    fn invalid_header_name_rejected() {
        let err = Config::parse("[rate_limit]\nclient_ip_headers = [\"bad header\"]\n").unwrap_err();
        assert!(err.to_string().contains("Invalid header name"));
    }

    #[test]
    fn invalid_address_rejected() {
        let err = Config::parse("[server]\naddress = \"not-an-address\"\n").unwrap_err();
        assert!(err.to_string().contains("Invalid address"));
    }

    #[test]
    fn trailing_slash_base_path_rejected() {
        assert!(Config::parse("[server]\nbase_path = \"/api/\"\n").is_err());
    }

    #[test]
    fn load_from_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[rate_limit]\nmax_requests = 5").unwrap();
        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.rate_limit.max_requests, Some(5));
    }

    #[test]
    fn load_reports_path_on_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[rate_limit\nmax_requests = 5").unwrap();
        let err = Config::load(Some(file.path())).unwrap_err().to_string();
        assert!(err.contains("Failed to parse config"));
    }

    #[test]
    fn config_not_found_returns_error() {
        let result = Config::load(Some(Path::new("/nonexistent/config.toml")));
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Config file not found"));
    }
}
