//! Configuration for Lexflow

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV_VAR: &str = "LEXFLOW_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Approval batch and token settings
    #[serde(default)]
    pub approval: ApprovalConfig,

    /// Action executor settings
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Approval notification delivery
    #[serde(default)]
    pub notification: NotificationConfig,

    /// External action targets
    #[serde(default)]
    pub targets: TargetsConfig,

    /// Inbound mail ingestion
    #[serde(default)]
    pub ingestion: IngestionConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// HTTP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Externally reachable base URL, used to build approval and edit links
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            public_base_url: default_public_base_url(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_public_base_url() -> String {
    "http://localhost:8080".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database backend: only "postgres" is supported
    #[serde(default = "default_db_backend")]
    pub backend: String,

    /// Database URL
    pub url: Option<String>,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_db_backend() -> String {
    "postgres".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ApiConfig {
    /// Operator API keys
    #[serde(default)]
    pub keys: Vec<ApiKeyConfig>,

    /// CORS allowed origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// A single operator API key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    /// Human-readable key name
    pub name: String,

    /// Lowercase hex SHA-256 digest of the raw key
    pub key_sha256: String,

    /// Operator identity (usually an email address) the key acts as
    pub identity: String,
}

/// Approval batch and quick-approval token settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Minutes between batch creation and quick-link expiry
    #[serde(default = "default_window_minutes")]
    pub window_minutes: i64,

    /// Random bytes per token
    #[serde(default = "default_token_bytes")]
    pub token_bytes: usize,

    /// Hours after `expires_at` before the sweeper marks a pending batch expired
    #[serde(default = "default_stale_after_hours")]
    pub stale_after_hours: i64,

    /// Sweeper interval in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            window_minutes: default_window_minutes(),
            token_bytes: default_token_bytes(),
            stale_after_hours: default_stale_after_hours(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_window_minutes() -> i64 {
    60
}

fn default_token_bytes() -> usize {
    32
}

fn default_stale_after_hours() -> i64 {
    168
}

fn default_sweep_interval() -> u64 {
    300
}

/// Action executor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Retries for idempotent handlers after a retryable failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff step in milliseconds (attempt n waits n * step)
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// Per-call timeout for external targets
    #[serde(default = "default_handler_timeout")]
    pub handler_timeout_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff(),
            handler_timeout_secs: default_handler_timeout(),
        }
    }
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff() -> u64 {
    250
}

fn default_handler_timeout() -> u64 {
    15
}

/// Notification (and send_email action) SMTP settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Send approval request emails
    #[serde(default)]
    pub enabled: bool,

    /// SMTP relay host
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,

    /// SMTP relay port
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    pub smtp_username: Option<String>,

    pub smtp_password: Option<String>,

    /// Use STARTTLS
    #[serde(default = "default_starttls")]
    pub starttls: bool,

    /// Envelope and header sender
    #[serde(default = "default_from_address")]
    pub from_address: String,

    /// Approver used when a rule does not name one
    pub default_approver: Option<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            smtp_username: None,
            smtp_password: None,
            starttls: default_starttls(),
            from_address: default_from_address(),
            default_approver: None,
        }
    }
}

fn default_smtp_host() -> String {
    "localhost".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_starttls() -> bool {
    true
}

fn default_from_address() -> String {
    "automation@localhost".to_string()
}

/// One webhook-backed external target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookTargetConfig {
    /// Endpoint receiving action payloads
    pub endpoint: String,

    /// HMAC-SHA256 signing secret
    pub secret: Option<String>,
}

/// External action targets; an absent target leaves its actions skipped
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TargetsConfig {
    pub tasks: Option<WebhookTargetConfig>,
    pub billing: Option<WebhookTargetConfig>,
    pub calendar: Option<WebhookTargetConfig>,
    pub files: Option<WebhookTargetConfig>,
    pub alerts: Option<WebhookTargetConfig>,

    /// Base URL of the case/client directory service
    pub case_directory_url: Option<String>,
}

/// Inbound mail ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Directory polled for `.eml` files
    pub spool_dir: Option<PathBuf>,

    /// Poll interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            spool_dir: None,
            poll_interval_secs: default_poll_interval(),
        }
    }
}

fn default_poll_interval() -> u64 {
    30
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML document
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `LEXFLOW_CONFIG` or the default locations
    pub fn load() -> crate::Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::from_file(Path::new(&path));
        }

        let paths = [
            PathBuf::from("./lexflow.toml"),
            PathBuf::from("/etc/lexflow/lexflow.toml"),
        ];

        for path in paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Err(crate::Error::Config(
            "No configuration file found".to_string(),
        ))
    }

    /// Check cross-field constraints serde cannot express
    pub fn validate(&self) -> crate::Result<()> {
        if self.database.backend != "postgres" {
            return Err(crate::Error::Config(format!(
                "Unsupported database backend: {}",
                self.database.backend
            )));
        }
        if self.database.url.is_none() {
            return Err(crate::Error::Config(
                "Database URL required for PostgreSQL".to_string(),
            ));
        }
        if self.approval.window_minutes <= 0 {
            return Err(crate::Error::Config(
                "approval.window_minutes must be positive".to_string(),
            ));
        }
        if self.approval.token_bytes < 16 {
            return Err(crate::Error::Config(
                "approval.token_bytes must be at least 16".to_string(),
            ));
        }
        for key in &self.api.keys {
            if key.key_sha256.len() != 64 || !key.key_sha256.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(crate::Error::Config(format!(
                    "API key '{}' must carry a hex SHA-256 digest",
                    key.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[database]
url = "postgres://localhost/lexflow"
"#;

    #[test]
    fn test_default_config() {
        let config = Config::from_toml(MINIMAL).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.approval.window_minutes, 60);
        assert_eq!(config.approval.token_bytes, 32);
        assert_eq!(config.executor.max_retries, 2);
        assert_eq!(config.logging.format, "json");
        assert!(!config.notification.enabled);
        assert!(config.targets.billing.is_none());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
port = 9000
public_base_url = "https://firm.example.com"

[database]
backend = "postgres"
url = "postgres://localhost/lexflow"

[approval]
window_minutes = 30

[[api.keys]]
name = "desk"
key_sha256 = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
identity = "paralegal@firm.example.com"

[targets.billing]
endpoint = "https://ledger.example.com/hooks/lexflow"
secret = "s3cret"
"#;

        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.approval.window_minutes, 30);
        assert_eq!(config.api.keys[0].identity, "paralegal@firm.example.com");
        assert_eq!(
            config.targets.billing.unwrap().endpoint,
            "https://ledger.example.com/hooks/lexflow"
        );
    }

    #[test]
    fn test_rejects_missing_database_url() {
        let err = Config::from_toml("[database]\nbackend = \"postgres\"\n").unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_rejects_bad_key_digest() {
        let toml = r#"
[database]
url = "postgres://localhost/lexflow"

[[api.keys]]
name = "bad"
key_sha256 = "not-a-digest"
identity = "x@example.com"
"#;
        assert!(Config::from_toml(toml).is_err());
    }
}
