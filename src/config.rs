//! Configuration management
//!
//! Handles loading and validating node configuration from TOML files.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

use crate::transport::{ServiceRecord, DEFAULT_SERVICE_NAME, DEFAULT_SERVICE_UUID};

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Advertised service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Human-readable service name
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Stable service identifier
    #[serde(default = "default_service_uuid")]
    pub uuid: Uuid,
    /// Address the listener binds to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
}

impl ServiceConfig {
    /// Record advertised by the listener
    pub fn record(&self) -> ServiceRecord {
        ServiceRecord {
            name: self.name.clone(),
            uuid: self.uuid,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            uuid: default_service_uuid(),
            bind_addr: default_bind_addr(),
        }
    }
}

/// Session I/O configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Size of the read loop buffer in bytes
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// Outbound dial timeout in seconds
    #[serde(default = "default_dial_timeout")]
    pub dial_timeout_secs: u64,
}

impl SessionConfig {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: default_read_buffer_size(),
            dial_timeout_secs: default_dial_timeout(),
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics endpoint
    #[serde(default)]
    pub enabled: bool,
    /// Metrics server bind address
    #[serde(default = "default_metrics_addr")]
    pub bind_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: default_metrics_addr(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format: "json" or "pretty"
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

// Default value functions
fn default_service_name() -> String { DEFAULT_SERVICE_NAME.to_string() }
fn default_service_uuid() -> Uuid { DEFAULT_SERVICE_UUID }
fn default_bind_addr() -> SocketAddr { SocketAddr::from(([0, 0, 0, 0], 7420)) }
fn default_read_buffer_size() -> usize { 1024 }
fn default_dial_timeout() -> u64 { 10 }
fn default_metrics_addr() -> SocketAddr { SocketAddr::from(([127, 0, 0, 1], 9090)) }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "pretty".to_string() }

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::parse(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .with_context(|| "Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.service.name.trim().is_empty() {
            anyhow::bail!("service.name must not be empty");
        }
        if self.session.read_buffer_size == 0 {
            anyhow::bail!("read_buffer_size must be > 0");
        }
        if self.session.dial_timeout_secs == 0 {
            anyhow::bail!("dial_timeout_secs must be > 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.service.record(), ServiceRecord::default());
        assert_eq!(config.service.bind_addr.port(), 7420);
        assert_eq!(config.session.read_buffer_size, 1024);
        assert_eq!(config.session.dial_timeout(), Duration::from_secs(10));
        assert!(!config.metrics.enabled);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_overrides() {
        let config = Config::parse(
            r#"
            [service]
            name = "Garden"
            uuid = "00000000-0000-0000-0000-000000000001"
            bind_addr = "127.0.0.1:9000"

            [session]
            read_buffer_size = 4096

            [logging]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.service.name, "Garden");
        assert_eq!(config.service.uuid.as_u128(), 1);
        assert_eq!(config.service.bind_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.session.read_buffer_size, 4096);
        assert_eq!(config.session.dial_timeout_secs, 10);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(Config::parse("[session]\nread_buffer_size = 0").is_err());
        assert!(Config::parse("[session]\ndial_timeout_secs = 0").is_err());
        assert!(Config::parse("[service]\nname = \"  \"").is_err());
        assert!(Config::parse("[service]\nuuid = \"not-a-uuid\"").is_err());
    }
}
