use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub token: TokenConfig,
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind the HTTP API on
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// PostgreSQL connection URL (postgres backend only)
    #[serde(default)]
    pub database_url: Option<String>,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Interval between expired-row sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_max_connections() -> u32 {
    5
}

fn default_sweep_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    /// HMAC secret for upload tokens
    pub secret: String,
    /// Lifetime of an upload token
    pub expire_minutes: i64,
    /// How long a blacklist entry (and the issued-token registry) survives
    pub blacklist_ttl_hours: i64,
}

impl TokenConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.expire_minutes)
    }

    pub fn blacklist_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.blacklist_ttl_hours)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub peer_registry_url: String,
    pub edge_service_url: String,
    /// Path prefix handed to peers as the upload callback (`{prefix}/{catalog_id}`)
    pub upload_path_prefix: String,
    pub pending_request_ttl_hours: i64,
    pub max_screenshots_per_request: usize,
    /// Timeout for every outbound collaborator call
    pub http_timeout_ms: u64,
}

impl ServiceConfig {
    pub fn pending_request_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.pending_request_ttl_hours)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory screenshots are written under
    pub root_dir: String,
    /// Base URL objects are served from
    pub public_base_url: String,
    /// Secret used to sign object URLs
    pub url_signing_secret: String,
    /// Lifetime of a presigned URL
    #[serde(default = "default_url_expiry")]
    pub url_expiry_secs: u64,
}

fn default_url_expiry() -> u64 {
    3600
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    /// Capacity of the inbound event channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Where `screenshots-completed` events are POSTed, if anywhere
    #[serde(default)]
    pub completion_webhook_url: Option<String>,
}

fn default_channel_capacity() -> usize {
    1024
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            completion_webhook_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for daily rolling log files
    #[serde(default)]
    pub dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8000)?
            .set_default("store.backend", "memory")?
            .set_default("store.max_connections", 5)?
            .set_default("store.sweep_interval_secs", 60)?
            .set_default("token.expire_minutes", 30)?
            .set_default("token.blacklist_ttl_hours", 24)?
            .set_default("service.peer_registry_url", "http://peer-registry:8000")?
            .set_default("service.edge_service_url", "http://edge-service:8000")?
            .set_default("service.upload_path_prefix", "/api/screenshot")?
            .set_default("service.pending_request_ttl_hours", 24)?
            .set_default("service.max_screenshots_per_request", 10)?
            .set_default("service.http_timeout_ms", 5000)?
            .set_default("storage.root_dir", "data/screenshots")?
            .set_default("storage.public_base_url", "http://localhost:8000/objects")?
            .set_default("storage.url_expiry_secs", 3600)?
            .set_default("bus.channel_capacity", 1024)?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("SCREENSHOT_BROKER_ENV")
                        .unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (SCREENSHOT_BROKER__TOKEN__SECRET, etc.)
            .add_source(
                Environment::with_prefix("SCREENSHOT_BROKER")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Create a default configuration for local development
    pub fn default_config(secret: &str) -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
            },
            store: StoreConfig {
                backend: StoreBackend::Memory,
                database_url: None,
                max_connections: 5,
                sweep_interval_secs: 60,
            },
            token: TokenConfig {
                secret: secret.to_string(),
                expire_minutes: 30,
                blacklist_ttl_hours: 24,
            },
            service: ServiceConfig {
                peer_registry_url: "http://peer-registry:8000".to_string(),
                edge_service_url: "http://edge-service:8000".to_string(),
                upload_path_prefix: "/api/screenshot".to_string(),
                pending_request_ttl_hours: 24,
                max_screenshots_per_request: 10,
                http_timeout_ms: 5000,
            },
            storage: StorageConfig {
                root_dir: "data/screenshots".to_string(),
                public_base_url: "http://localhost:8000/objects".to_string(),
                url_signing_secret: secret.to_string(),
                url_expiry_secs: 3600,
            },
            bus: BusConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.token.secret.is_empty() {
            errors.push("token.secret must be set".to_string());
        }
        if self.storage.url_signing_secret.is_empty() {
            errors.push("storage.url_signing_secret must be set".to_string());
        }
        if self.token.expire_minutes <= 0 {
            errors.push("token.expire_minutes must be positive".to_string());
        }
        if self.token.blacklist_ttl_hours <= 0 {
            errors.push("token.blacklist_ttl_hours must be positive".to_string());
        }
        // A blacklist entry that lapses before its token does would let the token be replayed
        if self.token.blacklist_ttl() < self.token.window() {
            errors.push(
                "token.blacklist_ttl_hours must cover token.expire_minutes".to_string(),
            );
        }
        if self.service.pending_request_ttl_hours <= 0 {
            errors.push("service.pending_request_ttl_hours must be positive".to_string());
        }
        if self.service.max_screenshots_per_request == 0 {
            errors.push("service.max_screenshots_per_request must be at least 1".to_string());
        }
        if self.service.http_timeout_ms == 0 {
            errors.push("service.http_timeout_ms must be positive".to_string());
        }
        for (name, raw) in [
            ("service.peer_registry_url", &self.service.peer_registry_url),
            ("service.edge_service_url", &self.service.edge_service_url),
            ("storage.public_base_url", &self.storage.public_base_url),
        ] {
            if let Err(e) = url::Url::parse(raw) {
                errors.push(format!("{name} is not a valid URL ({e}): {raw}"));
            }
        }
        if let Some(ref hook) = self.bus.completion_webhook_url {
            if let Err(e) = url::Url::parse(hook) {
                errors.push(format!("bus.completion_webhook_url is not a valid URL ({e})"));
            }
        }
        if self.store.backend == StoreBackend::Postgres && self.store.database_url.is_none() {
            errors.push("store.database_url is required for the postgres backend".to_string());
        }
        if self.bus.channel_capacity == 0 {
            errors.push("bus.channel_capacity must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = AppConfig::default_config("dev-secret-dev-secret-dev-secret");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_collects_every_problem() {
        let mut cfg = AppConfig::default_config("");
        cfg.storage.url_signing_secret = "x".to_string();
        cfg.service.max_screenshots_per_request = 0;
        cfg.service.edge_service_url = "not a url".to_string();
        cfg.store.backend = StoreBackend::Postgres;

        let errors = cfg.validate().unwrap_err();
        assert_eq!(errors.len(), 4, "{errors:?}");
    }

    #[test]
    fn test_blacklist_ttl_must_outlive_token() {
        let mut cfg = AppConfig::default_config("secret");
        cfg.token.expire_minutes = 120;
        cfg.token.blacklist_ttl_hours = 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.toml"),
            r#"
[token]
secret = "from-file"

[storage]
url_signing_secret = "url-secret"

[service]
max_screenshots_per_request = 3
"#,
        )
        .unwrap();

        let cfg = AppConfig::load_from(dir.path()).unwrap();
        assert_eq!(cfg.token.secret, "from-file");
        assert_eq!(cfg.token.expire_minutes, 30);
        assert_eq!(cfg.service.max_screenshots_per_request, 3);
        assert_eq!(cfg.store.backend, StoreBackend::Memory);
        assert_eq!(cfg.bus.channel_capacity, 1024);
    }
}
