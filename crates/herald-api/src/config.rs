//! Configuration management for the herald service.

use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use herald_delivery::{ClientConfig, RetryPolicy, ScannerConfig};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "config.toml";

/// Upper bound on `retry_max_delay_ms`: one day.
const MAX_RETRY_DELAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Complete service configuration with defaults, file, and environment
/// overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables (highest priority)
/// 2. Configuration file (`config.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// Environment variable names are the upper-cased field names, e.g.
/// `DATABASE_URL`, `PORT` or `RETRY_INTERVAL_MS`.
///
/// # Example
///
/// ```no_run
/// use herald_api::Config;
///
/// let config = Config::load().expect("Failed to load configuration");
/// println!("Server will bind to {}:{}", config.host, config.port);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Database
    /// PostgreSQL connection URL. In-memory stores are used when unset.
    #[serde(default)]
    pub database_url: Option<String>,
    /// Maximum number of database connections in the pool.
    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,

    // Server
    /// Server bind address.
    #[serde(default = "default_host")]
    pub host: String,
    /// Server bind port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Static API key required on event routes. Unprotected when unset.
    #[serde(default)]
    pub api_key: Option<String>,

    // Retry
    /// Retry ceiling for events without their own `max_retries`.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Cap on the backoff delay in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Jitter factor for retry timing (0.0 to 1.0).
    #[serde(default = "default_jitter_factor")]
    pub retry_jitter_factor: f64,

    // Scanner
    /// Time between pending scans in milliseconds.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// Whether the periodic pending scanner runs at all.
    #[serde(default = "default_enable_retry_job")]
    pub enable_retry_job: bool,
    /// Target for events that carry no `webhook_url` of their own.
    #[serde(default)]
    pub fallback_webhook_url: Option<String>,
    /// Deliveries in flight within one scan.
    #[serde(default = "default_scan_concurrency")]
    pub scan_concurrency: usize,

    // Client
    /// Per-request webhook timeout in milliseconds.
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,

    // Logging
    /// Tracing filter directive. Environment variable: `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub rust_log: String,
}

impl Config {
    /// Load configuration from defaults, config file, and environment
    /// variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the merged values
    /// fail validation.
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(""));

        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Convert to retry policy.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            jitter_factor: self.retry_jitter_factor,
        }
    }

    /// Convert to client configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_millis(self.delivery_timeout_ms),
            ..ClientConfig::default()
        }
    }

    /// Convert to pending scanner configuration.
    pub fn to_scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            interval: Duration::from_millis(self.retry_interval_ms),
            fallback_webhook_url: self.fallback_webhook_url.clone(),
            concurrency: self.scan_concurrency,
        }
    }

    /// Parse server socket address from host and port configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn parse_server_addr(&self) -> Result<SocketAddr> {
        let addr_str = format!("{}:{}", self.host, self.port);
        SocketAddr::from_str(&addr_str).context("Invalid server address")
    }

    /// Get database URL with password masked for logging.
    pub fn database_url_masked(&self) -> Option<String> {
        let url = self.database_url.as_ref()?;
        if let Some(at_pos) = url.find('@') {
            if let Some(colon_pos) = url[..at_pos].rfind(':') {
                let mut masked = url.clone();
                masked.replace_range(colon_pos + 1..at_pos, "***");
                return Some(masked);
            }
        }
        Some(url.clone())
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must be greater than 0");
        }

        if self.database_max_connections == 0 {
            anyhow::bail!("database_max_connections must be greater than 0");
        }

        if self.retry_base_delay_ms == 0 {
            anyhow::bail!("retry_base_delay_ms must be greater than 0");
        }

        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            anyhow::bail!("retry_base_delay_ms cannot exceed retry_max_delay_ms");
        }

        if self.retry_max_delay_ms > MAX_RETRY_DELAY_MS {
            anyhow::bail!("retry_max_delay_ms cannot exceed {MAX_RETRY_DELAY_MS}");
        }

        if !(0.0..=1.0).contains(&self.retry_jitter_factor) {
            anyhow::bail!("retry_jitter_factor must be between 0.0 and 1.0");
        }

        if self.retry_interval_ms == 0 {
            anyhow::bail!("retry_interval_ms must be greater than 0");
        }

        if self.delivery_timeout_ms == 0 {
            anyhow::bail!("delivery_timeout_ms must be greater than 0");
        }

        if self.scan_concurrency == 0 {
            anyhow::bail!("scan_concurrency must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            database_max_connections: default_max_connections(),
            host: default_host(),
            port: default_port(),
            api_key: None,
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_base_delay_ms(),
            retry_max_delay_ms: default_max_delay_ms(),
            retry_jitter_factor: default_jitter_factor(),
            retry_interval_ms: default_retry_interval_ms(),
            enable_retry_job: default_enable_retry_job(),
            fallback_webhook_url: None,
            scan_concurrency: default_scan_concurrency(),
            delivery_timeout_ms: default_delivery_timeout_ms(),
            rust_log: default_log_level(),
        }
    }
}

fn default_max_connections() -> u32 {
    10
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_jitter_factor() -> f64 {
    0.2
}

fn default_retry_interval_ms() -> u64 {
    60_000
}

fn default_enable_retry_job() -> bool {
    true
}

fn default_scan_concurrency() -> usize {
    1
}

fn default_delivery_timeout_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info,herald=debug,tower_http=debug".to_string()
}
