//! Daemon configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (CHARGEWATCH_*)
//! - TOML configuration file

use anyhow::{bail, Context, Result};
use chargewatch_client::{Credentials, RateLimitConfig};
use chargewatch_core::EngineConfig;
use chargewatch_protocol::Coordinates;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Upstream API access.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Position used for the station directory query.
    #[serde(default)]
    pub location: LocationConfig,

    /// Poll timing.
    #[serde(default)]
    pub polling: PollingConfig,

    /// Upstream request budget.
    #[serde(default)]
    pub rate_limit: RateLimitSection,

    /// Status HTTP server.
    #[serde(default)]
    pub http: HttpConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Stations to watch from startup.
    #[serde(default, rename = "watch")]
    pub watches: Vec<WatchConfig>,
}

/// Upstream API access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the API.
    #[serde(default = "default_upstream_host")]
    pub host: String,

    /// Account openid.
    #[serde(default = "default_openid")]
    pub openid: String,

    /// Account phone number.
    #[serde(default = "default_phonenumber")]
    pub phonenumber: String,
}

/// Directory query position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    #[serde(default = "default_longitude")]
    pub longitude: f64,

    #[serde(default = "default_latitude")]
    pub latitude: f64,
}

/// Poll timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Seconds between polls of one station.
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,

    /// Seconds a cached state stays fresh.
    #[serde(default = "default_expire")]
    pub expire_secs: u64,
}

/// Upstream request budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSection {
    /// Minimum seconds between two requests.
    #[serde(default = "default_min_interval")]
    pub min_interval_secs: u64,

    /// Requests allowed per sliding minute.
    #[serde(default = "default_max_requests")]
    pub max_requests_per_minute: usize,

    /// Seconds before the access token is renewed.
    #[serde(default = "default_reauth_interval")]
    pub reauth_interval_secs: u64,

    /// Failures in a row that force a fresh login.
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
}

/// Status HTTP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// A threshold watch registered at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Station name as listed in the directory.
    pub station: String,

    /// Free piles that trigger the watch.
    #[serde(default = "default_threshold")]
    pub threshold: usize,

    /// Minutes before the watch expires.
    #[serde(default = "default_expire_minutes")]
    pub expire_minutes: u64,
}

// Default value functions
fn env_or(name: &str, fallback: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| fallback.to_string())
}

fn env_parsed<T: std::str::FromStr>(name: &str, fallback: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

fn default_upstream_host() -> String {
    env_or("CHARGEWATCH_UPSTREAM_HOST", "")
}

fn default_openid() -> String {
    env_or("CHARGEWATCH_OPENID", "")
}

fn default_phonenumber() -> String {
    env_or("CHARGEWATCH_PHONENUMBER", "")
}

fn default_longitude() -> f64 {
    env_parsed("CHARGEWATCH_LONGITUDE", 0.0)
}

fn default_latitude() -> f64 {
    env_parsed("CHARGEWATCH_LATITUDE", 0.0)
}

fn default_poll_interval() -> u64 {
    15
}

fn default_expire() -> u64 {
    30
}

fn default_min_interval() -> u64 {
    5
}

fn default_max_requests() -> usize {
    15
}

fn default_reauth_interval() -> u64 {
    24 * 60 * 60
}

fn default_max_consecutive_errors() -> u32 {
    5
}

fn default_host() -> String {
    env_or("CHARGEWATCH_HOST", "127.0.0.1")
}

fn default_port() -> u16 {
    env_parsed("CHARGEWATCH_PORT", 8080)
}

fn default_true() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_threshold() -> usize {
    1
}

fn default_expire_minutes() -> u64 {
    24 * 60
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            host: default_upstream_host(),
            openid: default_openid(),
            phonenumber: default_phonenumber(),
        }
    }
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            longitude: default_longitude(),
            latitude: default_latitude(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval(),
            expire_secs: default_expire(),
        }
    }
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            min_interval_secs: default_min_interval(),
            max_requests_per_minute: default_max_requests(),
            reauth_interval_secs: default_reauth_interval(),
            max_consecutive_errors: default_max_consecutive_errors(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// `CHARGEWATCH_CONFIG` names an explicit file; otherwise the first
    /// existing default path is used.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, or
    /// the result is incomplete.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var("CHARGEWATCH_CONFIG") {
            let expanded = shellexpand::tilde(&path);
            return Self::from_file(expanded.as_ref());
        }

        let config_paths = [
            "chargewatch.toml",
            "/etc/chargewatch/chargewatch.toml",
            "~/.config/chargewatch/chargewatch.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    /// Check the settings that have no usable default.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first missing setting.
    pub fn validate(&self) -> Result<()> {
        if self.upstream.host.is_empty() {
            bail!("upstream.host is not set (or CHARGEWATCH_UPSTREAM_HOST)");
        }
        if self.upstream.openid.is_empty() || self.upstream.phonenumber.is_empty() {
            bail!("upstream.openid and upstream.phonenumber are required");
        }
        Ok(())
    }

    /// Upstream login credentials.
    #[must_use]
    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.upstream.openid, &self.upstream.phonenumber)
    }

    /// Directory query position.
    #[must_use]
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.location.longitude, self.location.latitude)
    }

    /// Session rate limits.
    #[must_use]
    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            min_interval: Duration::from_secs(self.rate_limit.min_interval_secs),
            max_requests: self.rate_limit.max_requests_per_minute,
            reauth_interval: Duration::from_secs(self.rate_limit.reauth_interval_secs),
            max_consecutive_errors: self.rate_limit.max_consecutive_errors,
            ..RateLimitConfig::default()
        }
    }

    /// Engine timing.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            poll_interval: Duration::from_secs(self.polling.interval_secs),
            expire_time: Duration::from_secs(self.polling.expire_secs),
        }
    }

    /// Get the socket address to bind the status server to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form an address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.http.host, self.http.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.http.host, self.http.port))
    }
}
