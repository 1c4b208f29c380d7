//! Server identity persistence
//!
//! Keeps this device's pairing credentials (address, port, token and display
//! name) stable across restarts.

use crate::error::{LanshareError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File name of the persisted identity inside the data directory
pub const IDENTITY_FILE_NAME: &str = "server_info.json";

/// Public address used to pick the outbound interface. Nothing is sent to it.
const ROUTE_PROBE_ADDR: (Ipv4Addr, u16) = (Ipv4Addr::new(8, 8, 8, 8), 65530);

/// This host's pairing credentials
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerIdentity {
    #[serde(rename = "Ip")]
    pub address: String,
    #[serde(rename = "Port")]
    pub port: u16,
    #[serde(rename = "Token")]
    pub token: String,
    #[serde(rename = "DeviceName")]
    pub display_name: String,
}

impl ServerIdentity {
    /// True when a usable token has been recorded
    pub fn has_token(&self) -> bool {
        !self.token.trim().is_empty()
    }
}

/// Reads and writes the persisted [`ServerIdentity`]
#[derive(Debug, Clone)]
pub struct IdentityStore {
    path: PathBuf,
}

impl IdentityStore {
    /// Create a store backed by an explicit file (useful for testing)
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create a store at the per-user application data location
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(Self::default_path()?))
    }

    /// Get the default identity file path
    pub fn default_path() -> Result<PathBuf> {
        Ok(data_dir()?.join(IDENTITY_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored identity.
    ///
    /// Never fails: a missing or unreadable file degrades to empty/zero
    /// values, and so does any single missing or unusable field.
    pub fn load(&self) -> ServerIdentity {
        if !self.path.exists() {
            debug!("No stored identity at {}", self.path.display());
            return ServerIdentity::default();
        }

        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Failed to read identity from {}: {}", self.path.display(), e);
                return ServerIdentity::default();
            }
        };

        let value: Value = match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to parse identity file {}: {}", self.path.display(), e);
                return ServerIdentity::default();
            }
        };

        let identity = ServerIdentity {
            address: string_field(&value, "Ip"),
            port: value
                .get("Port")
                .and_then(Value::as_u64)
                .and_then(|port| u16::try_from(port).ok())
                .unwrap_or_default(),
            token: string_field(&value, "Token"),
            display_name: string_field(&value, "DeviceName"),
        };

        if value.get("Port").is_some() && identity.port == 0 {
            warn!("Ignoring unusable port in {}", self.path.display());
        }

        identity
    }

    /// Persist the identity, rewriting the file wholesale
    pub fn save(&self, identity: &ServerIdentity) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                LanshareError::Storage(format!(
                    "Failed to create {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let content = serde_json::to_string_pretty(identity)?;
        fs::write(&self.path, content).map_err(|e| {
            LanshareError::Storage(format!(
                "Failed to write identity to {}: {}",
                self.path.display(),
                e
            ))
        })?;

        Ok(())
    }
}

/// Each field is read on its own so one bad value does not discard the rest
fn string_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_default()
}

/// Per-user application data directory shared by all persisted state
pub fn data_dir() -> Result<PathBuf> {
    ProjectDirs::from("com", "lanshare", "lanshare")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| {
            LanshareError::Storage("Could not determine application data directory".to_string())
        })
}

/// Generate a fresh pairing token
pub fn generate_token() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Find the address of the interface that routes to the outside world.
///
/// Connecting a UDP socket only asks the OS for a route; no packet leaves the
/// host. Falls back to loopback when there is no route.
pub fn probe_local_address() -> IpAddr {
    match probe_route() {
        Ok(ip) => ip,
        Err(e) => {
            warn!("Could not determine local address, using loopback: {}", e);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

fn probe_route() -> std::io::Result<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect(ROUTE_PROBE_ADDR)?;
    let ip = socket.local_addr()?.ip();
    if ip.is_unspecified() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            "no interface selected",
        ));
    }
    Ok(ip)
}

/// Get non-loopback local IP addresses
pub fn local_addresses() -> Vec<IpAddr> {
    let mut addresses = Vec::new();

    if let Ok(ifaces) = local_ip_address::list_afinet_netifas() {
        for (_, ip) in ifaces {
            if !ip.is_loopback() {
                addresses.push(ip);
            }
        }
    }

    addresses
}

/// Get the current hostname
pub fn hostname() -> String {
    hostname::get()
        .map(|h: std::ffi::OsString| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_identity() -> ServerIdentity {
        ServerIdentity {
            address: "192.168.1.20".to_string(),
            port: 40123,
            token: generate_token(),
            display_name: "desk".to_string(),
        }
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = IdentityStore::new(temp_dir.path().join("server_info.json"));

        let identity = store.load();
        assert_eq!(identity, ServerIdentity::default());
        assert!(!identity.has_token());
        assert_eq!(identity.port, 0);
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = IdentityStore::new(temp_dir.path().join("nested/server_info.json"));
        let identity = sample_identity();

        store.save(&identity).unwrap();
        assert_eq!(store.load(), identity);
    }

    #[test]
    fn test_persisted_field_names() {
        let temp_dir = TempDir::new().unwrap();
        let store = IdentityStore::new(temp_dir.path().join("server_info.json"));
        store.save(&sample_identity()).unwrap();

        let content = fs::read_to_string(store.path()).unwrap();
        for field in ["\"Ip\"", "\"Port\"", "\"Token\"", "\"DeviceName\""] {
            assert!(content.contains(field), "missing {}", field);
        }
    }

    #[test]
    fn test_missing_fields_degrade_to_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("server_info.json");
        fs::write(&path, r#"{"Token":"abc"}"#).unwrap();

        let identity = IdentityStore::new(path).load();
        assert_eq!(identity.token, "abc");
        assert_eq!(identity.port, 0);
        assert!(identity.address.is_empty());
        assert!(identity.display_name.is_empty());
    }

    #[test]
    fn test_unusable_field_keeps_the_others() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("server_info.json");
        let store = IdentityStore::new(&path);

        for port in ["70000", "\"x\"", "-1", "null"] {
            fs::write(
                &path,
                format!(
                    r#"{{"Ip":"10.0.0.5","Port":{},"Token":"keep-me","DeviceName":"desk"}}"#,
                    port
                ),
            )
            .unwrap();

            let identity = store.load();
            assert_eq!(identity.token, "keep-me");
            assert_eq!(identity.address, "10.0.0.5");
            assert_eq!(identity.display_name, "desk");
            assert_eq!(identity.port, 0);
        }

        fs::write(&path, r#"{"Ip":"10.0.0.5","Port":4000,"Token":null,"DeviceName":7}"#).unwrap();
        let identity = store.load();
        assert_eq!(identity.port, 4000);
        assert_eq!(identity.address, "10.0.0.5");
        assert!(!identity.has_token());
        assert!(identity.display_name.is_empty());
    }

    #[test]
    fn test_corrupt_file_degrades_to_empty() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("server_info.json");
        fs::write(&path, "not json at all").unwrap();

        assert_eq!(IdentityStore::new(path).load(), ServerIdentity::default());
    }

    #[test]
    fn test_save_into_unwritable_location_fails() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("file");
        fs::write(&blocker, "x").unwrap();

        // Parent "directory" is a regular file
        let store = IdentityStore::new(blocker.join("server_info.json"));
        let err = store.save(&sample_identity()).unwrap_err();
        assert!(matches!(err, LanshareError::Storage(_)));
    }

    #[test]
    fn test_generate_token_is_uuid_shaped() {
        let token = generate_token();
        assert_eq!(token.len(), 36);
        assert_eq!(token.matches('-').count(), 4);
        assert_ne!(token, generate_token());
    }

    #[test]
    fn test_probe_local_address_never_unspecified() {
        let ip = probe_local_address();
        assert!(!ip.is_unspecified());
    }

    #[test]
    fn test_hostname() {
        assert!(!hostname().is_empty());
    }
}
