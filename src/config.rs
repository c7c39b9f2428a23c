//! Configuration management for errand-pay
//!
//! Configuration is loaded from TOML files and environment variables.
//!
//! # Example Configuration File
//!
//! ```toml
//! [marketplace]
//! name = "errand-pay"
//! network = "regtest"
//! data_dir = "/var/lib/errand-pay"
//!
//! [lightning]
//! mode = "mock"
//! timeout_seconds = 20
//! invoice_expiry_seconds = 3600
//!
//! [webhook]
//! shared_secret = "change-me"
//! freshness_window_seconds = 300
//!
//! [api]
//! bind_address = "0.0.0.0:8080"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Marketplace identity configuration
    #[serde(default)]
    pub marketplace: MarketplaceConfig,

    /// Lightning backend configuration
    #[serde(default)]
    pub lightning: LightningConfig,

    /// Webhook authentication configuration
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// API server configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Marketplace identity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketplaceConfig {
    /// Service display name, used in invoice memos
    #[serde(default = "default_marketplace_name")]
    pub name: String,

    /// Data directory for storing service state
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Network to run on (mainnet, testnet, signet, regtest)
    #[serde(default = "default_network")]
    pub network: String,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            name: default_marketplace_name(),
            data_dir: default_data_dir(),
            network: default_network(),
        }
    }
}

fn default_marketplace_name() -> String {
    "errand-pay".to_string()
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("errand-pay"))
        .unwrap_or_else(|| PathBuf::from("./data"))
}

fn default_network() -> String {
    "regtest".to_string()
}

/// Lightning backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightningConfig {
    /// Backend mode: "mock" for the deterministic in-process backend,
    /// "remote" for an external node gateway
    #[serde(default = "default_lightning_mode")]
    pub mode: String,

    /// Seed for the mock backend's deterministic preimages (any string)
    pub mock_seed: Option<String>,

    /// Remote gateway address (required when mode = "remote")
    pub gateway_address: Option<String>,

    /// Timeout for backend calls in seconds
    #[serde(default = "default_lightning_timeout")]
    pub timeout_seconds: u64,

    /// Expiry applied to freshly issued invoices, in seconds
    #[serde(default = "default_invoice_expiry")]
    pub invoice_expiry_seconds: u64,
}

impl Default for LightningConfig {
    fn default() -> Self {
        Self {
            mode: default_lightning_mode(),
            mock_seed: None,
            gateway_address: None,
            timeout_seconds: default_lightning_timeout(),
            invoice_expiry_seconds: default_invoice_expiry(),
        }
    }
}

fn default_lightning_mode() -> String {
    "mock".to_string()
}

fn default_lightning_timeout() -> u64 {
    20
}

fn default_invoice_expiry() -> u64 {
    3600
}

/// Webhook authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Shared secret for HMAC-SHA256 signature validation
    #[serde(default)]
    pub shared_secret: String,

    /// Maximum allowed timestamp skew in seconds (applied in both directions)
    #[serde(default = "default_freshness_window")]
    pub freshness_window_seconds: i64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            shared_secret: String::new(),
            freshness_window_seconds: default_freshness_window(),
        }
    }
}

fn default_freshness_window() -> i64 {
    300 // 5 minutes either side
}

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Address to bind the API server to
    #[serde(default = "default_api_bind")]
    pub bind_address: String,

    /// API request timeout in seconds
    #[serde(default = "default_api_timeout")]
    pub timeout_seconds: u64,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_api_bind(),
            timeout_seconds: default_api_timeout(),
            enable_cors: true,
        }
    }
}

fn default_api_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_api_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL or path
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "sqlite:errand-pay.db".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, compact, json)
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
    "pretty".to_string()
}

impl Config {
    /// Resolve the database URL, making it relative to data_dir if needed
    pub fn resolve_database_url(&self) -> String {
        let url = &self.database.url;

        // If it's already an absolute path or :memory:, use as-is
        if url.starts_with("sqlite:/") || url == "sqlite::memory:" {
            return url.clone();
        }

        // Extract the path part
        let path = if url.starts_with("sqlite:") {
            url.strip_prefix("sqlite:").unwrap_or(url)
        } else {
            url
        };

        // If it's already absolute, use as-is
        if std::path::Path::new(path).is_absolute() {
            return url.clone();
        }

        // Make it relative to data_dir
        let db_path = self.marketplace.data_dir.join(path);
        format!("sqlite:{}", db_path.display())
    }

    /// Get the API bind address
    pub fn api_bind_address(&self) -> String {
        self.api.bind_address.clone()
    }

    /// Check if running on mainnet
    pub fn is_mainnet(&self) -> bool {
        self.marketplace.network == "mainnet"
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        // Validate network
        let valid_networks = ["mainnet", "testnet", "signet", "regtest"];
        if !valid_networks.contains(&self.marketplace.network.as_str()) {
            return Err(format!(
                "Invalid network: {}. Must be one of: {:?}",
                self.marketplace.network, valid_networks
            ));
        }

        // Validate lightning backend mode. "remote" is reserved for the
        // node-gateway backend and rejected here until that backend ships,
        // so a config that validates is always a config that starts.
        match self.lightning.mode.as_str() {
            "mock" => {}
            "remote" => {
                return Err(
                    "lightning.mode = \"remote\" is not supported yet; use \"mock\"".to_string(),
                );
            }
            other => {
                return Err(format!(
                    "Invalid lightning mode: {}. Must be \"mock\" or \"remote\"",
                    other
                ));
            }
        }

        // A slow backend call must not stall HTTP workers indefinitely
        if self.lightning.timeout_seconds == 0 || self.lightning.timeout_seconds > 60 {
            return Err("lightning.timeout_seconds must be between 1 and 60".to_string());
        }

        if self.lightning.invoice_expiry_seconds == 0 {
            return Err("lightning.invoice_expiry_seconds cannot be 0".to_string());
        }

        // The webhook is a trust boundary; refuse to run on mainnet without a secret
        if self.is_mainnet() && self.webhook.shared_secret.is_empty() {
            return Err("webhook.shared_secret is required on mainnet".to_string());
        }

        if self.webhook.freshness_window_seconds <= 0 {
            return Err("webhook.freshness_window_seconds must be positive".to_string());
        }

        Ok(())
    }
}
