//! Connection dispatcher
//!
//! Owns the listening socket. Each accepted connection sends one mode line
//! and is then handed to the pairing or file receive handler on its own task.

use crate::config::ServerConfig;
use crate::error::{LanshareError, Result};
use crate::identity::{generate_token, hostname, probe_local_address, IdentityStore, ServerIdentity};
use crate::pairing::{handle_pairing, PairingOutcome};
use crate::pairing_info::PairingInfo;
use crate::protocol::{read_line, Mode};
use crate::registry::{DeviceRegistry, PairedDevice};
use crate::resolver::SavePathResolver;
use crate::share::{receive_file, ShareOutcome, TransferSettings};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Events emitted by the server
#[derive(Debug, Clone)]
pub enum ServerEvent {
    Started { address: SocketAddr },
    ClientConnected { address: SocketAddr },
    DevicePaired { device: PairedDevice },
    PairingRejected { address: SocketAddr, reason: String },
    FileReceived {
        file_name: String,
        path: PathBuf,
        bytes: u64,
        complete: bool,
    },
    TransferCancelled { file_name: String },
    TransferRejected { file_name: String, reason: String },
    Error { address: SocketAddr, message: String },
    Stopped,
}

/// State shared by every connection task
struct ConnectionContext {
    identity: ServerIdentity,
    registry: Arc<DeviceRegistry>,
    resolver: Arc<dyn SavePathResolver>,
    settings: TransferSettings,
    abort: CancellationToken,
}

/// Stops a running server and tracks its in-flight connections
#[derive(Clone)]
pub struct ShutdownHandle {
    stop: CancellationToken,
    abort: CancellationToken,
    tracker: TaskTracker,
}

impl ShutdownHandle {
    /// Stop accepting and release the listening socket.
    ///
    /// Connections already accepted keep running.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Number of connection handlers still running
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for in-flight handlers to finish. Returns `false` on timeout.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.tracker.close();
        tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok()
    }

    /// Cancel every in-flight handler at its next suspension point
    pub fn abort_in_flight(&self) {
        self.abort.cancel();
    }
}

/// Listens for `PAIR` and `SHARE` connections
pub struct FileShareServer {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    context: Arc<ConnectionContext>,
    max_connections: usize,
    shutdown: ShutdownHandle,
}

impl FileShareServer {
    /// Establish the identity and bind the listening socket.
    ///
    /// The persisted token is reused when present. The preferred port (the
    /// configured one, else the persisted one) is used if it can be bound,
    /// otherwise the OS picks one. The resulting identity is persisted
    /// best-effort.
    pub async fn bind(
        config: ServerConfig,
        store: &IdentityStore,
        registry: Arc<DeviceRegistry>,
        resolver: Arc<dyn SavePathResolver>,
    ) -> Result<Self> {
        let stored = store.load();

        let token = if stored.has_token() {
            stored.token
        } else {
            info!("No pairing token stored, generating a new one");
            generate_token()
        };

        let preferred_port = config.port.unwrap_or(stored.port);
        let listener = bind_listener(config.bind_ip, preferred_port).await?;
        let local_addr = listener.local_addr()?;

        let display_name = config
            .device_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(hostname);

        let identity = ServerIdentity {
            address: probe_local_address().to_string(),
            port: local_addr.port(),
            token,
            display_name,
        };

        if let Err(e) = store.save(&identity) {
            warn!("Failed to persist server identity, continuing in memory: {}", e);
        }

        info!(
            "File share server bound on {} (advertised as {}:{})",
            local_addr, identity.address, identity.port
        );

        let abort = CancellationToken::new();
        let shutdown = ShutdownHandle {
            stop: CancellationToken::new(),
            abort: abort.clone(),
            tracker: TaskTracker::new(),
        };

        Ok(Self {
            listener: Some(listener),
            local_addr,
            context: Arc::new(ConnectionContext {
                identity,
                registry,
                resolver,
                settings: config.transfer_settings(),
                abort,
            }),
            max_connections: config.max_connections.max(1),
            shutdown,
        })
    }

    pub fn identity(&self) -> &ServerIdentity {
        &self.context.identity
    }

    /// Payload to present out of band for pairing
    pub fn pairing_info(&self) -> PairingInfo {
        PairingInfo::from(&self.context.identity)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.context.registry
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Accept and handle incoming connections until stopped
    pub async fn run(&mut self, event_tx: mpsc::Sender<ServerEvent>) -> Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| LanshareError::Network("Server not started".to_string()))?;

        let addr = listener.local_addr()?;
        info!("Listening for connections on {}", addr);
        let _ = event_tx.send(ServerEvent::Started { address: addr }).await;

        let slots = Arc::new(Semaphore::new(self.max_connections));
        let stop = self.shutdown.stop.clone();

        loop {
            let permit = tokio::select! {
                _ = stop.cancelled() => break,
                permit = Arc::clone(&slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let (stream, peer_addr) = tokio::select! {
                _ = stop.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            info!("Client connected from {}", peer_addr);
            let _ = event_tx
                .send(ServerEvent::ClientConnected { address: peer_addr })
                .await;

            let context = Arc::clone(&self.context);
            let event_tx = event_tx.clone();

            self.shutdown.tracker.spawn(async move {
                let _permit = permit;
                tokio::select! {
                    _ = context.abort.cancelled() => {
                        debug!("Connection from {} aborted by shutdown", peer_addr);
                    }
                    result = handle_connection(stream, peer_addr, &context, &event_tx) => {
                        report(result, peer_addr, &event_tx).await;
                    }
                }
            });
        }

        drop(listener);
        info!("Stopped listening on {}", addr);
        let _ = event_tx.send(ServerEvent::Stopped).await;

        Ok(())
    }

    /// Handle a single connection inline (useful for one-shot mode)
    pub async fn handle_one(&mut self, event_tx: mpsc::Sender<ServerEvent>) -> Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| LanshareError::Network("Server not started".to_string()))?;

        let addr = listener.local_addr()?;
        let _ = event_tx.send(ServerEvent::Started { address: addr }).await;

        let (stream, peer_addr) = listener.accept().await?;
        drop(listener);
        info!("Client connected from {}", peer_addr);
        let _ = event_tx
            .send(ServerEvent::ClientConnected { address: peer_addr })
            .await;

        let result = handle_connection(stream, peer_addr, &self.context, &event_tx).await;
        report(result, peer_addr, &event_tx).await;

        Ok(())
    }
}

async fn bind_listener(ip: IpAddr, preferred_port: u16) -> Result<TcpListener> {
    if preferred_port != 0 {
        match TcpListener::bind((ip, preferred_port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) => warn!(
                "Port {} is unavailable ({}), falling back to an ephemeral port",
                preferred_port, e
            ),
        }
    }

    TcpListener::bind((ip, 0))
        .await
        .map_err(|e| LanshareError::Network(format!("Failed to bind: {}", e)))
}

async fn report(result: Result<()>, peer_addr: SocketAddr, event_tx: &mpsc::Sender<ServerEvent>) {
    if let Err(e) = result {
        error!("Error handling client {}: {}", peer_addr, e);
        let _ = event_tx
            .send(ServerEvent::Error {
                address: peer_addr,
                message: e.to_string(),
            })
            .await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    context: &ConnectionContext,
    event_tx: &mpsc::Sender<ServerEvent>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let max_line = context.settings.max_line_length;

    let mode_line = match read_line(&mut reader, max_line).await? {
        Some(line) => line,
        None => {
            debug!("{} closed without sending a mode", peer_addr);
            return Ok(());
        }
    };

    match Mode::parse(&mode_line) {
        Some(Mode::Pair) => {
            let peer_ip = peer_addr.ip().to_canonical();
            let outcome = handle_pairing(
                &mut reader,
                &mut writer,
                peer_ip,
                &context.identity,
                &context.registry,
                max_line,
            )
            .await?;

            let event = match outcome {
                PairingOutcome::Paired(device) => ServerEvent::DevicePaired { device },
                PairingOutcome::Rejected(failure) => ServerEvent::PairingRejected {
                    address: peer_addr,
                    reason: failure.reason().to_string(),
                },
            };
            let _ = event_tx.send(event).await;
        }
        Some(Mode::Share) => {
            let outcome = receive_file(
                &mut reader,
                &mut writer,
                context.resolver.as_ref(),
                &context.settings,
            )
            .await?;

            let event = match outcome {
                ShareOutcome::Received {
                    file_name,
                    path,
                    bytes_written,
                    expected_size,
                } => ServerEvent::FileReceived {
                    file_name,
                    path,
                    bytes: bytes_written,
                    complete: bytes_written == expected_size,
                },
                ShareOutcome::Cancelled { file_name } => ServerEvent::TransferCancelled { file_name },
                ShareOutcome::InvalidFileSize {
                    file_name,
                    size_line,
                } => ServerEvent::TransferRejected {
                    file_name,
                    reason: format!("Invalid file size {:?}", size_line),
                },
            };
            let _ = event_tx.send(event).await;
        }
        None => {
            warn!("Unknown mode {:?} from {}, closing", mode_line, peer_addr);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::REGISTRY_FILE_NAME;
    use crate::resolver::DirectoryResolver;
    use tempfile::TempDir;

    fn test_config() -> ServerConfig {
        ServerConfig {
            bind_ip: "127.0.0.1".parse().unwrap(),
            close_grace_ms: 0,
            ..ServerConfig::default()
        }
        .with_device_name("Test Server")
    }

    async fn bind_in(temp_dir: &TempDir, config: ServerConfig) -> FileShareServer {
        let store = IdentityStore::new(temp_dir.path().join("server_info.json"));
        let registry = Arc::new(DeviceRegistry::open(temp_dir.path().join(REGISTRY_FILE_NAME)));
        let resolver = Arc::new(DirectoryResolver::new(temp_dir.path().join("downloads")));
        FileShareServer::bind(config, &store, registry, resolver)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_bind_generates_and_persists_identity() {
        let temp_dir = TempDir::new().unwrap();
        let server = bind_in(&temp_dir, test_config()).await;

        let identity = server.identity().clone();
        assert!(identity.has_token());
        assert_eq!(identity.display_name, "Test Server");
        assert_eq!(identity.port, server.local_addr().port());
        assert!(identity.port > 0);

        let stored = IdentityStore::new(temp_dir.path().join("server_info.json")).load();
        assert_eq!(stored, identity);
    }

    #[tokio::test]
    async fn test_bind_keeps_token_when_stored_port_is_unusable() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join("server_info.json"),
            r#"{"Ip":"10.0.0.5","Port":70000,"Token":"keep-me","DeviceName":"desk"}"#,
        )
        .unwrap();

        let server = bind_in(&temp_dir, test_config()).await;
        assert_eq!(server.identity().token, "keep-me");
        assert!(server.local_addr().port() > 0);
    }

    #[tokio::test]
    async fn test_display_name_defaults_to_hostname() {
        let temp_dir = TempDir::new().unwrap();
        let config = ServerConfig {
            device_name: Some("   ".to_string()),
            ..test_config()
        };
        let server = bind_in(&temp_dir, config).await;
        assert_eq!(server.identity().display_name, hostname());
    }

    #[tokio::test]
    async fn test_busy_preferred_port_falls_back() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let busy_port = blocker.local_addr().unwrap().port();

        let server = bind_in(&temp_dir, test_config().with_port(busy_port)).await;
        assert_ne!(server.local_addr().port(), busy_port);
        assert_eq!(server.identity().port, server.local_addr().port());
    }

    #[tokio::test]
    async fn test_run_twice_fails() {
        let temp_dir = TempDir::new().unwrap();
        let mut server = bind_in(&temp_dir, test_config()).await;
        let handle = server.shutdown_handle();
        handle.stop();

        let (event_tx, _event_rx) = mpsc::channel(16);
        server.run(event_tx.clone()).await.unwrap();
        assert!(server.run(event_tx).await.is_err());
    }

    #[tokio::test]
    async fn test_stop_releases_socket() {
        let temp_dir = TempDir::new().unwrap();
        let mut server = bind_in(&temp_dir, test_config()).await;
        let addr = server.local_addr();
        let handle = server.shutdown_handle();

        let (event_tx, mut event_rx) = mpsc::channel(16);
        let task = tokio::spawn(async move { server.run(event_tx).await });

        assert!(matches!(event_rx.recv().await, Some(ServerEvent::Started { .. })));
        handle.stop();
        task.await.unwrap().unwrap();
        assert!(handle.is_stopped());
        assert!(matches!(event_rx.recv().await, Some(ServerEvent::Stopped)));

        TcpListener::bind(addr).await.unwrap();
    }
}
