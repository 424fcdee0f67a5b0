//! Weave configuration
//!
//! Configuration is read from a TOML file and then overridden from the
//! environment. Every section has defaults so a missing file is valid.
//!
//! ```toml
//! [server]
//! port = 8080
//!
//! [redis]
//! url = "redis://127.0.0.1:6379"
//!
//! [event_log]
//! base_url = "http://localhost:8082"
//! workflow_topic = "workflows.command"
//!
//! [retry]
//! min_range_ms = 100
//! max_range_ms = 500
//! offset_ms = 50
//! max_attempts = 10
//! deadline_ms = 20000
//!
//! [oauth.providers.googlesheets]
//! auth_url = "https://accounts.google.com/o/oauth2/auth"
//! token_url = "https://oauth2.googleapis.com/token"
//! scopes = ["https://www.googleapis.com/auth/spreadsheets.readonly"]
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use wv_common::{BackoffConfig, RetryPolicy};

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "WEAVE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "weave.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: {value} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Default values for configuration
mod defaults {
    use std::collections::HashMap;

    use super::OAuthProviderConfig;

    pub fn port() -> u16 {
        8080
    }
    pub fn bind_addr() -> String {
        "0.0.0.0".to_string()
    }

    pub fn redis_url() -> String {
        "redis://127.0.0.1:6379".to_string()
    }

    pub fn event_log_url() -> String {
        "http://localhost:8082".to_string()
    }
    pub fn workflow_topic() -> String {
        "workflows.command".to_string()
    }
    pub fn action_topic() -> String {
        "actions.command".to_string()
    }
    pub fn credential_topic() -> String {
        "credentials.command".to_string()
    }
    pub fn request_timeout_ms() -> u64 {
        5_000
    }

    pub fn query_url() -> String {
        "http://localhost:8123".to_string()
    }

    pub fn execution_url() -> String {
        "http://localhost:4020".to_string()
    }

    pub fn min_range_ms() -> u64 {
        100
    }
    pub fn max_range_ms() -> u64 {
        500
    }
    pub fn offset_ms() -> u64 {
        50
    }
    pub fn max_attempts() -> u32 {
        10
    }
    pub fn deadline_ms() -> u64 {
        20_000
    }

    pub fn create_ttl_ms() -> u64 {
        20_000
    }
    pub fn update_ttl_ms() -> u64 {
        10_000
    }
    pub fn read_ttl_ms() -> u64 {
        10_000
    }
    pub fn credential_ttl_ms() -> u64 {
        5_000
    }

    pub fn providers() -> HashMap<String, OAuthProviderConfig> {
        let mut providers = HashMap::new();
        providers.insert(
            "googlesheets".to_string(),
            OAuthProviderConfig {
                auth_url: "https://accounts.google.com/o/oauth2/auth".to_string(),
                token_url: "https://oauth2.googleapis.com/token".to_string(),
                scopes: vec!["https://www.googleapis.com/auth/spreadsheets.readonly".to_string()],
            },
        );
        providers
    }
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: defaults::port(),
            bind_addr: defaults::bind_addr(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self { url: defaults::redis_url() }
    }
}

/// Event log (REST proxy in front of the partitioned log)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLogConfig {
    pub base_url: String,
    pub workflow_topic: String,
    pub action_topic: String,
    pub credential_topic: String,
    pub request_timeout_ms: u64,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::event_log_url(),
            workflow_topic: defaults::workflow_topic(),
            action_topic: defaults::action_topic(),
            credential_topic: defaults::credential_topic(),
            request_timeout_ms: defaults::request_timeout_ms(),
        }
    }
}

impl EventLogConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Read path serving materialized rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub base_url: String,
    pub token: String,
    pub request_timeout_ms: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::query_url(),
            token: String::new(),
            request_timeout_ms: defaults::request_timeout_ms(),
        }
    }
}

/// Downstream execution service for actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub base_url: String,
    /// When the log already forwards to the execution service over HTTP,
    /// actions are not sent synchronously
    pub http_sink_enabled: bool,
    pub service_token: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::execution_url(),
            http_sink_enabled: false,
            service_token: None,
            request_timeout_ms: defaults::request_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub min_range_ms: u64,
    pub max_range_ms: u64,
    pub offset_ms: u64,
    pub max_attempts: u32,
    pub deadline_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_range_ms: defaults::min_range_ms(),
            max_range_ms: defaults::max_range_ms(),
            offset_ms: defaults::offset_ms(),
            max_attempts: defaults::max_attempts(),
            deadline_ms: defaults::deadline_ms(),
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig::new(
            Duration::from_millis(self.min_range_ms),
            Duration::from_millis(self.max_range_ms),
            Duration::from_millis(self.offset_ms),
        )
    }

    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.backoff())
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

/// Lock TTLs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub create_ttl_ms: u64,
    pub update_ttl_ms: u64,
    pub read_ttl_ms: u64,
    pub credential_ttl_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            create_ttl_ms: defaults::create_ttl_ms(),
            update_ttl_ms: defaults::update_ttl_ms(),
            read_ttl_ms: defaults::read_ttl_ms(),
            credential_ttl_ms: defaults::credential_ttl_ms(),
        }
    }
}

impl LockConfig {
    pub fn create_ttl(&self) -> Duration {
        Duration::from_millis(self.create_ttl_ms)
    }

    pub fn update_ttl(&self) -> Duration {
        Duration::from_millis(self.update_ttl_ms)
    }

    pub fn read_ttl(&self) -> Duration {
        Duration::from_millis(self.read_ttl_ms)
    }

    pub fn credential_ttl(&self) -> Duration {
        Duration::from_millis(self.credential_ttl_ms)
    }
}

/// Endpoints of one OAuth provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthProviderConfig {
    pub auth_url: String,
    pub token_url: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// Keyed by credential type, e.g. `googlesheets`. Entries from a file
    /// are added to the built-in providers, replacing one of the same name.
    #[serde(deserialize_with = "with_default_providers")]
    pub providers: HashMap<String, OAuthProviderConfig>,
    /// Timeout for calls to provider token endpoints
    pub request_timeout_ms: u64,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            providers: defaults::providers(),
            request_timeout_ms: defaults::request_timeout_ms(),
        }
    }
}

impl OAuthConfig {
    pub fn provider(&self, credential_type: &str) -> Option<&OAuthProviderConfig> {
        self.providers.get(credential_type)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn with_default_providers<'de, D>(
    deserializer: D,
) -> Result<HashMap<String, OAuthProviderConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    let configured = HashMap::<String, OAuthProviderConfig>::deserialize(deserializer)?;
    let mut providers = defaults::providers();
    providers.extend(configured);
    Ok(providers)
}

// ============================================================================
// Root
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaveConfig {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub event_log: EventLogConfig,
    pub query: QueryConfig,
    pub execution: ExecutionConfig,
    pub retry: RetryConfig,
    pub locks: LockConfig,
    pub oauth: OAuthConfig,
}

impl WeaveConfig {
    /// Load from `WEAVE_CONFIG` (or `weave.toml`) and apply environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::from_file_or_default(Path::new(&path))?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a TOML file; a missing file yields defaults
    pub fn from_file_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config = Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply `WEAVE_*` overrides from an arbitrary lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("WEAVE_REDIS_URL") {
            self.redis.url = url;
        }
        if let Some(url) = lookup("WEAVE_EVENT_LOG_URL") {
            self.event_log.base_url = url;
        }
        if let Some(url) = lookup("WEAVE_QUERY_URL") {
            self.query.base_url = url;
        }
        if let Some(token) = lookup("WEAVE_QUERY_TOKEN") {
            self.query.token = token;
        }
        if let Some(url) = lookup("WEAVE_EXECUTION_URL") {
            self.execution.base_url = url;
        }
        if let Some(token) = lookup("WEAVE_SERVICE_TOKEN") {
            self.execution.service_token = Some(token);
        }
        if let Some(value) = lookup("WEAVE_HTTP_SINK_ENABLED") {
            self.execution.http_sink_enabled = parse_flag("WEAVE_HTTP_SINK_ENABLED", &value)?;
        }
        if let Some(value) = lookup("WEAVE_PORT") {
            self.server.port = value.parse().map_err(|e| ConfigError::InvalidValue {
                key: "WEAVE_PORT".to_string(),
                value: value.clone(),
                reason: format!("must be a valid port number: {}", e),
            })?;
        }

        debug!(port = self.server.port, redis = %self.redis.url, "Applied environment overrides");
        Ok(())
    }
}

/// Accepts the `y`/`n` form used by connector settings as well as booleans
fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "true" | "1" => Ok(true),
        "n" | "no" | "false" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: "expected y/n or true/false".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = WeaveConfig::default();
        assert_eq!(config.retry.max_attempts, 10);
        assert_eq!(config.retry.deadline(), Duration::from_secs(20));
        assert_eq!(config.locks.create_ttl(), Duration::from_secs(20));
        assert_eq!(config.locks.update_ttl(), Duration::from_secs(10));
        assert_eq!(config.locks.credential_ttl(), Duration::from_secs(5));
        assert_eq!(config.event_log.workflow_topic, "workflows.command");
        assert!(!config.execution.http_sink_enabled);
        assert!(config.oauth.provider("googlesheets").is_some());
    }

    #[test]
    fn test_retry_policy_from_config() {
        let policy = RetryConfig::default().policy();
        assert_eq!(policy, RetryPolicy::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[redis]
url = "redis://cache:6380"

[retry]
max_attempts = 3

[oauth.providers.notion]
auth_url = "https://api.notion.com/v1/oauth/authorize"
token_url = "https://api.notion.com/v1/oauth/token"
"#
        )
        .unwrap();

        let config = WeaveConfig::from_file_or_default(file.path()).unwrap();
        assert_eq!(config.redis.url, "redis://cache:6380");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.min_range_ms, 100);
        assert_eq!(config.server.port, 8080);

        let notion = config.oauth.provider("notion").unwrap();
        assert!(notion.scopes.is_empty());
        assert!(config.oauth.provider("googlesheets").is_some());
    }

    #[test]
    fn test_file_provider_replaces_builtin_of_same_name() {
        let config = WeaveConfig::from_toml(
            r#"
[oauth]
request_timeout_ms = 2500

[oauth.providers.googlesheets]
auth_url = "https://sso.internal/authorize"
token_url = "https://sso.internal/token"
"#,
        )
        .unwrap();

        let sheets = config.oauth.provider("googlesheets").unwrap();
        assert_eq!(sheets.token_url, "https://sso.internal/token");
        assert!(sheets.scopes.is_empty());
        assert_eq!(config.oauth.providers.len(), 1);
        assert_eq!(config.oauth.request_timeout(), Duration::from_millis(2500));
        assert_eq!(config.event_log.request_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = WeaveConfig::from_file_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, WeaveConfig::default());
    }

    #[test]
    fn test_malformed_file_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[retry\nmax_attempts = ").unwrap();

        let err = WeaveConfig::from_file_or_default(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_environment_overrides() {
        let mut config = WeaveConfig::default();
        config
            .apply_overrides(lookup_from(&[
                ("WEAVE_REDIS_URL", "redis://override:6379"),
                ("WEAVE_HTTP_SINK_ENABLED", "y"),
                ("WEAVE_PORT", "9090"),
                ("WEAVE_SERVICE_TOKEN", "svc-token"),
            ]))
            .unwrap();

        assert_eq!(config.redis.url, "redis://override:6379");
        assert!(config.execution.http_sink_enabled);
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.execution.service_token.as_deref(), Some("svc-token"));
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let mut config = WeaveConfig::default();
        let err = config
            .apply_overrides(lookup_from(&[("WEAVE_PORT", "not-a-port")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "WEAVE_PORT"));

        let err = config
            .apply_overrides(lookup_from(&[("WEAVE_HTTP_SINK_ENABLED", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
