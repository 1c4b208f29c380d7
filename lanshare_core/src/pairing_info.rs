//! Pairing payload presented out of band (for example as a QR code)

use crate::error::{LanshareError, Result};
use crate::identity::ServerIdentity;
use serde::{Deserialize, Serialize};

/// Everything a remote device needs to pair with this host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingInfo {
    #[serde(rename = "Ip")]
    pub ip: String,
    #[serde(rename = "Port")]
    pub port: u16,
    #[serde(rename = "Token")]
    pub token: String,
    #[serde(rename = "DeviceName")]
    pub device_name: String,
}

impl PairingInfo {
    /// Compact JSON suitable for encoding into a scannable image
    pub fn to_payload(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_payload(payload: &str) -> Result<Self> {
        let info: PairingInfo = serde_json::from_str(payload.trim())?;
        if info.ip.is_empty() || info.port == 0 || info.token.is_empty() {
            return Err(LanshareError::Protocol(
                "Pairing payload is incomplete".to_string(),
            ));
        }
        Ok(info)
    }

    /// `ip:port` for connecting
    pub fn address(&self) -> String {
        match self.ip.parse::<std::net::Ipv6Addr>() {
            Ok(_) => format!("[{}]:{}", self.ip, self.port),
            Err(_) => format!("{}:{}", self.ip, self.port),
        }
    }
}

impl From<&ServerIdentity> for PairingInfo {
    fn from(identity: &ServerIdentity) -> Self {
        Self {
            ip: identity.address.clone(),
            port: identity.port,
            token: identity.token.clone(),
            device_name: identity.display_name.clone(),
        }
    }
}
