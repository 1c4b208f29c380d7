//! Clients for the pairing and file share protocols

use crate::error::{LanshareError, Result};
use crate::protocol::{
    read_line, write_line, Mode, PairRequest, PairResponse, PairStatus, ShareSignal,
    DEFAULT_MAX_LINE_LENGTH,
};
use crate::share::DEFAULT_CHUNK_SIZE;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Default limit for establishing a connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default limit for the pairing response
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of a successful pairing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingResult {
    pub server_name: String,
}

/// Client for pairing with a server
pub struct PairingClient {
    device_id: String,
    device_name: String,
    connect_timeout: Duration,
    response_timeout: Duration,
}

impl PairingClient {
    /// Create a new pairing client
    pub fn new(device_id: &str, device_name: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            device_name: device_name.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }

    /// Limit both connecting and waiting for the response
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self.response_timeout = timeout;
        self
    }

    /// Connect to a server and present the pairing token
    pub async fn pair(&self, address: &str, token: &str) -> Result<PairingResult> {
        let stream = connect(address, self.connect_timeout).await?;

        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        write_line(&mut writer, Mode::Pair.as_str()).await?;
        let request = PairRequest::new(token, &self.device_id, &self.device_name);
        writer.write_all(request.to_json()?.as_bytes()).await?;

        let line = tokio::time::timeout(
            self.response_timeout,
            read_line(&mut reader, DEFAULT_MAX_LINE_LENGTH),
        )
        .await
        .map_err(|_| LanshareError::Timeout(format!("No pairing response from {}", address)))??
        .ok_or_else(|| {
            LanshareError::Protocol("Server closed the connection without a response".to_string())
        })?;
        let response = PairResponse::from_json(&line)?;

        match response.status {
            PairStatus::Success => Ok(PairingResult {
                server_name: response.server_name.unwrap_or_default(),
            }),
            PairStatus::Failed => Err(LanshareError::Pairing(
                response.reason.unwrap_or_else(|| "Unknown reason".to_string()),
            )),
        }
    }
}

/// Result of offering a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered { bytes: u64 },
    Cancelled,
    Rejected,
}

type ProgressCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// Client for pushing a file to a server
pub struct FileSender {
    progress: Option<ProgressCallback>,
    connect_timeout: Duration,
}

impl Default for FileSender {
    fn default() -> Self {
        Self {
            progress: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl FileSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit establishing the connection. The receiver's decision is not
    /// bounded here; the receiver applies its own limit.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Report the running byte count after each chunk
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    /// Send a file from disk, offering its own file name
    pub async fn send_file(&self, address: &str, path: &Path) -> Result<SendOutcome> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                LanshareError::Transfer(format!("{} has no file name", path.display()))
            })?;

        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();

        self.send(address, &file_name, size, file).await
    }

    /// Offer `size` bytes from `source` under `file_name`
    pub async fn send<S>(
        &self,
        address: &str,
        file_name: &str,
        size: u64,
        mut source: S,
    ) -> Result<SendOutcome>
    where
        S: AsyncRead + Unpin,
    {
        let stream = connect(address, self.connect_timeout).await?;

        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        write_line(&mut writer, Mode::Share.as_str()).await?;
        expect_signal(&mut reader, ShareSignal::ReadyForFile).await?;

        write_line(&mut writer, file_name).await?;
        write_line(&mut writer, &size.to_string()).await?;

        match next_signal(&mut reader).await? {
            ShareSignal::ReadyToReceiveFile => {}
            ShareSignal::UserCancelled => {
                info!("Receiver declined {}", file_name);
                return Ok(SendOutcome::Cancelled);
            }
            ShareSignal::InvalidFileSize => return Ok(SendOutcome::Rejected),
            other => {
                return Err(LanshareError::Protocol(format!(
                    "Unexpected signal {}",
                    other
                )))
            }
        }

        let mut buffer = vec![0u8; DEFAULT_CHUNK_SIZE];
        let mut sent = 0u64;
        while sent < size {
            let want = (size - sent).min(buffer.len() as u64) as usize;
            let read = source.read(&mut buffer[..want]).await?;
            if read == 0 {
                return Err(LanshareError::Transfer(format!(
                    "Source ended after {} of {} bytes",
                    sent, size
                )));
            }
            writer.write_all(&buffer[..read]).await?;
            sent += read as u64;

            if let Some(progress) = &self.progress {
                progress(sent);
            }
        }
        writer.flush().await?;
        debug!("Sent {} bytes of {}", sent, file_name);

        expect_signal(&mut reader, ShareSignal::FileReceived).await?;
        Ok(SendOutcome::Delivered { bytes: sent })
    }
}

async fn connect(address: &str, timeout: Duration) -> Result<TcpStream> {
    tokio::time::timeout(timeout, TcpStream::connect(address))
        .await
        .map_err(|_| LanshareError::Timeout(format!("Connecting to {} timed out", address)))?
        .map_err(|e| LanshareError::Network(format!("Failed to connect: {}", e)))
}

async fn next_signal<R>(reader: &mut BufReader<R>) -> Result<ShareSignal>
where
    R: AsyncRead + Unpin,
{
    let line = read_line(reader, DEFAULT_MAX_LINE_LENGTH)
        .await?
        .ok_or_else(|| LanshareError::Protocol("Server closed the connection".to_string()))?;

    ShareSignal::parse(&line)
        .ok_or_else(|| LanshareError::Protocol(format!("Unexpected response {:?}", line)))
}

async fn expect_signal<R>(reader: &mut BufReader<R>, expected: ShareSignal) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let signal = next_signal(reader).await?;
    if signal != expected {
        return Err(LanshareError::Protocol(format!(
            "Expected {}, got {}",
            expected, signal
        )));
    }
    Ok(())
}
