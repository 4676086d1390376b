//! Layered gateway configuration.
//!
//! Priority, lowest to highest: built-in defaults, an optional TOML file
//! (path from `GATEWAY_CONFIG_FILE`, else `./gateway.toml` if present),
//! then `GATEWAY_*` environment variables. Built with `figment` the same
//! way layered config is assembled elsewhere in this codebase's demos.

use std::env;
use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};
use crate::types::SerialParity;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub tcp_host: String,
    pub tcp_port: u16,
    pub serial_port: String,
    pub serial_baud: u32,
    pub serial_bytesize: u8,
    pub serial_parity: String,
    pub serial_stopbits: u8,
    pub serial_timeout_ms: u64,
    pub rtu_turnaround_ms: u64,
    pub dedup_ttl_ms: u64,
    pub dedup_max_entries: usize,
    pub gateway_timeout_ms: u64,
    pub queue_bound: usize,
    pub reconnect_max_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub serial_open_retry_delay_ms: u64,
    pub log_level: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            tcp_host: "0.0.0.0".to_string(),
            tcp_port: 502,
            serial_port: "/dev/ttyUSB0".to_string(),
            serial_baud: 9600,
            serial_bytesize: 8,
            serial_parity: "N".to_string(),
            serial_stopbits: 1,
            serial_timeout_ms: 500,
            rtu_turnaround_ms: 10,
            dedup_ttl_ms: 200,
            dedup_max_entries: 4096,
            gateway_timeout_ms: 2000,
            queue_bound: 1024,
            reconnect_max_attempts: 3,
            reconnect_delay_ms: 500,
            serial_open_retry_delay_ms: 100,
            log_level: "info".to_string(),
        }
    }
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tcp_port == 0 {
            return Err(GatewayError::InvalidConfig {
                reason: "tcp_port must be non-zero".into(),
            });
        }
        if self.serial_port.trim().is_empty() {
            return Err(GatewayError::InvalidConfig {
                reason: "serial_port must not be empty".into(),
            });
        }
        if self.serial_baud == 0 {
            return Err(GatewayError::InvalidConfig {
                reason: "serial_baud must be non-zero".into(),
            });
        }
        self.parsed_parity()?;
        if !matches!(self.serial_bytesize, 5 | 6 | 7 | 8) {
            return Err(GatewayError::InvalidConfig {
                reason: format!(
                    "serial_bytesize must be one of 5, 6, 7, 8 (got {})",
                    self.serial_bytesize
                ),
            });
        }
        if self.dedup_ttl_ms == 0 {
            return Err(GatewayError::InvalidConfig {
                reason: "dedup_ttl_ms must be non-zero".into(),
            });
        }
        if self.queue_bound == 0 {
            return Err(GatewayError::InvalidConfig {
                reason: "queue_bound must be non-zero".into(),
            });
        }
        if self.rtu_turnaround_ms < 10 {
            return Err(GatewayError::InvalidConfig {
                reason: "rtu_turnaround_ms must be at least 10ms for RS-485 half-duplex turnaround"
                    .into(),
            });
        }
        Ok(())
    }

    pub fn parsed_parity(&self) -> Result<SerialParity> {
        self.serial_parity
            .parse()
            .map_err(|reason: String| GatewayError::InvalidConfig { reason })
    }

    /// Path the TCP frontend should bind. Falls back to 1502 at the
    /// gateway layer only after a bind attempt on `tcp_port` actually
    /// fails with a permission error; this getter just reports the
    /// configured preference.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.tcp_host, self.tcp_port)
    }
}

/// Resolves the optional config file path: `GATEWAY_CONFIG_FILE` env var if
/// set, else `./gateway.toml` if it exists, else no file overlay at all.
fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = env::var("GATEWAY_CONFIG_FILE") {
        return Some(PathBuf::from(path));
    }
    let default_path = Path::new("gateway.toml");
    if default_path.exists() {
        return Some(default_path.to_path_buf());
    }
    None
}

/// Loads configuration from defaults, an optional TOML file, then
/// `GATEWAY_*` environment variables, and validates the result.
pub fn load() -> Result<GatewayConfig> {
    let mut figment = Figment::from(Serialized::defaults(GatewayConfig::default()));

    if let Some(path) = config_file_path() {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("GATEWAY_"));

    let config: GatewayConfig = figment
        .extract()
        .map_err(|e| GatewayError::InvalidConfig { reason: e.to_string() })?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        GatewayConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_tcp_port_is_invalid() {
        let mut config = GatewayConfig::default();
        config.tcp_port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn turnaround_below_ten_ms_is_invalid() {
        let mut config = GatewayConfig::default();
        config.rtu_turnaround_ms = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_parity_string_is_invalid() {
        let mut config = GatewayConfig::default();
        config.serial_parity = "Q".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn bind_addr_combines_host_and_port() {
        let config = GatewayConfig::default();
        assert_eq!(config.bind_addr(), "0.0.0.0:502");
    }

    #[test]
    fn unsupported_serial_bytesize_is_invalid() {
        let mut config = GatewayConfig::default();
        config.serial_bytesize = 9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn supported_serial_bytesizes_are_valid() {
        for bytesize in [5, 6, 7, 8] {
            let mut config = GatewayConfig::default();
            config.serial_bytesize = bytesize;
            assert!(config.validate().is_ok());
        }
    }
}
