//! Server configuration

use crate::protocol::DEFAULT_MAX_LINE_LENGTH;
use crate::share::{TransferSettings, DEFAULT_CHUNK_SIZE};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Default number of connections served at the same time
pub const DEFAULT_MAX_CONNECTIONS: usize = 32;

/// Settings for [`FileShareServer`](crate::server::FileShareServer)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the listener binds to
    pub bind_ip: IpAddr,
    /// Preferred port; when unset the previously persisted port is tried
    pub port: Option<u16>,
    /// Display name announced to paired devices (defaults to the hostname)
    pub device_name: Option<String>,
    /// Connections handled concurrently before accepting waits
    pub max_connections: usize,
    pub max_line_length: usize,
    /// How long a transfer waits for a save decision
    pub resolve_timeout_secs: u64,
    pub chunk_size: usize,
    pub close_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: None,
            device_name: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            resolve_timeout_secs: 300,
            chunk_size: DEFAULT_CHUNK_SIZE,
            close_grace_ms: 1000,
        }
    }
}

impl ServerConfig {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_device_name(mut self, name: &str) -> Self {
        self.device_name = Some(name.to_string());
        self
    }

    pub fn transfer_settings(&self) -> TransferSettings {
        TransferSettings {
            chunk_size: self.chunk_size.max(1),
            max_line_length: self.max_line_length,
            resolve_timeout: Duration::from_secs(self.resolve_timeout_secs),
            close_grace: Duration::from_millis(self.close_grace_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert!(config.bind_ip.is_unspecified());
        assert!(config.port.is_none());
        assert_eq!(config.chunk_size, 64 * 1024);
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ServerConfig = serde_json::from_str(r#"{"port":5000}"#).unwrap();
        assert_eq!(config.port, Some(5000));
        assert_eq!(config.close_grace_ms, 1000);
    }

    #[test]
    fn test_transfer_settings() {
        let config = ServerConfig {
            resolve_timeout_secs: 5,
            close_grace_ms: 250,
            chunk_size: 0,
            ..ServerConfig::default()
        };

        let settings = config.transfer_settings();
        assert_eq!(settings.resolve_timeout, Duration::from_secs(5));
        assert_eq!(settings.close_grace, Duration::from_millis(250));
        assert_eq!(settings.chunk_size, 1);
    }

    #[test]
    fn test_builders() {
        let config = ServerConfig::default().with_port(4000).with_device_name("desk");
        assert_eq!(config.port, Some(4000));
        assert_eq!(config.device_name.as_deref(), Some("desk"));
    }
}
