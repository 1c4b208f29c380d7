//! Pairing handshake handler
//!
//! Runs after the `PAIR` mode line: one JSON request line in, one JSON
//! response line out.

use crate::error::Result;
use crate::identity::ServerIdentity;
use crate::protocol::{read_line, PairRequest, PairResponse, PairingFailure};
use crate::registry::{DeviceRegistry, PairedDevice};
use std::net::IpAddr;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

/// Result of one pairing handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingOutcome {
    Paired(PairedDevice),
    Rejected(PairingFailure),
}

/// Validate a pairing request and register the device on success.
///
/// `peer_ip` must come from the transport; the request carries no address.
/// The registry is mutated at most once, and only when every check passes.
pub async fn handle_pairing<R, W>(
    reader: &mut R,
    writer: &mut W,
    peer_ip: IpAddr,
    identity: &ServerIdentity,
    registry: &DeviceRegistry,
    max_line_length: usize,
) -> Result<PairingOutcome>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let line = read_line(reader, max_line_length).await?;

    let device = match validate(line.as_deref(), identity, registry) {
        Ok(device) => PairedDevice {
            device_ip: peer_ip.to_string(),
            ..device
        },
        Err(failure) => {
            debug!("Pairing from {} rejected: {}", peer_ip, failure);
            send(writer, &PairResponse::failed(failure)).await?;
            return Ok(PairingOutcome::Rejected(failure));
        }
    };

    // A concurrent handshake may have registered the same id since the check
    if !registry.add(device.clone()) {
        let failure = PairingFailure::AlreadyPaired;
        debug!("Pairing from {} rejected: {}", peer_ip, failure);
        send(writer, &PairResponse::failed(failure)).await?;
        return Ok(PairingOutcome::Rejected(failure));
    }

    info!(
        "Device paired: {} ({}) from {}",
        device.device_name, device.device_id, peer_ip
    );
    send(writer, &PairResponse::success(&identity.display_name)).await?;

    Ok(PairingOutcome::Paired(device))
}

fn validate(
    line: Option<&str>,
    identity: &ServerIdentity,
    registry: &DeviceRegistry,
) -> std::result::Result<PairedDevice, PairingFailure> {
    let line = match line {
        Some(line) if !line.trim().is_empty() => line,
        _ => return Err(PairingFailure::EmptyRequest),
    };

    // `null` parses to None and counts as missing fields
    let request: Option<PairRequest> =
        serde_json::from_str(line).map_err(|_| PairingFailure::MalformedJson)?;
    let request = request.unwrap_or_default();

    let (token, device_id, device_name) =
        match (request.token, request.device_id, request.device_name) {
            (Some(token), Some(device_id), Some(device_name))
                if !token.trim().is_empty()
                    && !device_id.trim().is_empty()
                    && !device_name.trim().is_empty() =>
            {
                (token, device_id, device_name)
            }
            _ => return Err(PairingFailure::MissingFields),
        };

    if token != identity.token {
        return Err(PairingFailure::InvalidToken);
    }

    if registry.is_paired(&device_id) {
        return Err(PairingFailure::AlreadyPaired);
    }

    Ok(PairedDevice {
        device_id,
        device_name,
        device_ip: String::new(),
    })
}

async fn send<W>(writer: &mut W, response: &PairResponse) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(response.to_json()?.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{PairStatus, DEFAULT_MAX_LINE_LENGTH};
    use crate::registry::REGISTRY_FILE_NAME;
    use tempfile::TempDir;
    use tokio::io::BufReader;

    const TOKEN: &str = "5f8a9c1e-2b3d-4e5f-8a9b-0c1d2e3f4a5b";

    fn identity() -> ServerIdentity {
        ServerIdentity {
            address: "192.168.1.20".to_string(),
            port: 40000,
            token: TOKEN.to_string(),
            display_name: "desk".to_string(),
        }
    }

    async fn run(input: &str, registry: &DeviceRegistry) -> (PairingOutcome, PairResponse) {
        run_bytes(input.as_bytes(), registry).await
    }

    async fn run_bytes(input: &[u8], registry: &DeviceRegistry) -> (PairingOutcome, PairResponse) {
        let mut reader = BufReader::new(input);
        let mut output = Vec::new();
        let outcome = handle_pairing(
            &mut reader,
            &mut output,
            "192.168.1.77".parse().unwrap(),
            &identity(),
            registry,
            DEFAULT_MAX_LINE_LENGTH,
        )
        .await
        .unwrap();

        let response = PairResponse::from_json(std::str::from_utf8(&output).unwrap()).unwrap();
        (outcome, response)
    }

    fn registry_in(temp_dir: &TempDir) -> DeviceRegistry {
        DeviceRegistry::open(temp_dir.path().join(REGISTRY_FILE_NAME))
    }

    fn request(token: &str, device_id: &str, device_name: &str) -> String {
        PairRequest::new(token, device_id, device_name).to_json().unwrap()
    }

    #[tokio::test]
    async fn test_successful_pairing_records_transport_ip() {
        let temp_dir = TempDir::new().unwrap();
        let registry = registry_in(&temp_dir);

        let (outcome, response) = run(&request(TOKEN, "phone-1", "Pixel"), &registry).await;

        assert_eq!(response, PairResponse::success("desk"));
        assert_eq!(
            outcome,
            PairingOutcome::Paired(PairedDevice::new("phone-1", "Pixel", "192.168.1.77"))
        );
        assert_eq!(registry.all().len(), 1);
        assert_eq!(registry.get("phone-1").unwrap().device_ip, "192.168.1.77");
    }

    #[tokio::test]
    async fn test_empty_request() {
        let temp_dir = TempDir::new().unwrap();
        let registry = registry_in(&temp_dir);

        for input in ["", "\n", "   \n"] {
            let (outcome, response) = run(input, &registry).await;
            assert_eq!(outcome, PairingOutcome::Rejected(PairingFailure::EmptyRequest));
            assert_eq!(response.reason.as_deref(), Some("Empty request"));
        }
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_json() {
        let temp_dir = TempDir::new().unwrap();
        let registry = registry_in(&temp_dir);

        for input in ["{not json\n", "\"just a string\"\n", "{\"token\":42}\n"] {
            let (outcome, response) = run(input, &registry).await;
            assert_eq!(outcome, PairingOutcome::Rejected(PairingFailure::MalformedJson));
            assert_eq!(response.status, PairStatus::Failed);
            assert_eq!(response.reason.as_deref(), Some("Malformed JSON"));
        }
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_answered() {
        let temp_dir = TempDir::new().unwrap();
        let registry = registry_in(&temp_dir);

        let (outcome, response) = run_bytes(b"\xff\xfe{\"token\":1}\n", &registry).await;
        assert_eq!(outcome, PairingOutcome::Rejected(PairingFailure::MalformedJson));
        assert_eq!(response.reason.as_deref(), Some("Malformed JSON"));

        let input = b"{\"token\":\"\xff\xfe\",\"deviceId\":\"phone-1\",\"deviceName\":\"Pixel\"}\n";
        let (outcome, response) = run_bytes(input, &registry).await;
        assert_eq!(outcome, PairingOutcome::Rejected(PairingFailure::InvalidToken));
        assert_eq!(response.status, PairStatus::Failed);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_missing_fields() {
        let temp_dir = TempDir::new().unwrap();
        let registry = registry_in(&temp_dir);

        let inputs = [
            "null\n".to_string(),
            "{}\n".to_string(),
            format!("{{\"token\":\"{}\",\"deviceId\":\"phone-1\"}}\n", TOKEN),
            request(TOKEN, "  ", "Pixel"),
            request(TOKEN, "phone-1", ""),
            request("", "phone-1", "Pixel"),
        ];
        for input in inputs {
            let (outcome, response) = run(&input, &registry).await;
            assert_eq!(outcome, PairingOutcome::Rejected(PairingFailure::MissingFields));
            assert_eq!(response.reason.as_deref(), Some("Missing fields"));
        }
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_token() {
        let temp_dir = TempDir::new().unwrap();
        let registry = registry_in(&temp_dir);

        let padded = format!(" {}", TOKEN);
        for token in ["wrong-token", padded.as_str()] {
            let (outcome, response) = run(&request(token, "phone-1", "Pixel"), &registry).await;
            assert_eq!(outcome, PairingOutcome::Rejected(PairingFailure::InvalidToken));
            assert_eq!(response.reason.as_deref(), Some("Invalid token"));
        }
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_already_paired() {
        let temp_dir = TempDir::new().unwrap();
        let registry = registry_in(&temp_dir);

        let (first, _) = run(&request(TOKEN, "phone-1", "Pixel"), &registry).await;
        assert!(matches!(first, PairingOutcome::Paired(_)));

        let (second, response) = run(&request(TOKEN, "phone-1", "Pixel"), &registry).await;
        assert_eq!(second, PairingOutcome::Rejected(PairingFailure::AlreadyPaired));
        assert_eq!(response.reason.as_deref(), Some("Device already paired"));
        assert!(response.server_name.is_none());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_token_checked_before_registry() {
        let temp_dir = TempDir::new().unwrap();
        let registry = registry_in(&temp_dir);
        registry.add(PairedDevice::new("phone-1", "Pixel", "10.0.0.2"));

        let (outcome, _) = run(&request("wrong", "phone-1", "Pixel"), &registry).await;
        assert_eq!(outcome, PairingOutcome::Rejected(PairingFailure::InvalidToken));
    }
}
