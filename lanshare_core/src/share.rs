//! File receive handler
//!
//! Runs after the `SHARE` mode line:
//!
//! ```text
//! server: READY_FOR_FILE
//! client: <file name>
//! client: <file size in bytes>
//! server: INVALID_FILE_SIZE | USER_CANCELLED | READY_TO_RECEIVE_FILE
//! client: <raw bytes>
//! server: FILE_RECEIVED
//! ```

use crate::error::{LanshareError, Result};
use crate::protocol::{read_line, write_line, ShareSignal, DEFAULT_MAX_LINE_LENGTH};
use crate::resolver::SavePathResolver;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Default size of a single read from the connection
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Name used when the peer's suggestion has nothing usable left
pub const FALLBACK_FILE_NAME: &str = "received_file";

/// Tunables for a single transfer
#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub chunk_size: usize,
    pub max_line_length: usize,
    /// Upper bound on waiting for the save path decision
    pub resolve_timeout: Duration,
    /// Delay after `FILE_RECEIVED` so the peer can read it before close
    pub close_grace: Duration,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            resolve_timeout: Duration::from_secs(300),
            close_grace: Duration::from_secs(1),
        }
    }
}

/// Result of one share session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareOutcome {
    InvalidFileSize {
        file_name: String,
        size_line: String,
    },
    Cancelled {
        file_name: String,
    },
    Received {
        file_name: String,
        path: PathBuf,
        bytes_written: u64,
        expected_size: u64,
    },
}

impl ShareOutcome {
    /// True for a transfer that delivered every declared byte
    pub fn is_complete(&self) -> bool {
        matches!(
            self,
            ShareOutcome::Received { bytes_written, expected_size, .. } if bytes_written == expected_size
        )
    }
}

/// Reduce a peer supplied name to a single safe path component
pub fn sanitize_file_name(name: &str) -> String {
    let last = name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();

    let cleaned: String = last
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        FALLBACK_FILE_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Negotiate a destination and stream the file into it.
///
/// An early end of stream is not an error: the transfer ends with whatever
/// arrived and the outcome reports the short byte count.
pub async fn receive_file<R, W>(
    reader: &mut R,
    writer: &mut W,
    resolver: &dyn SavePathResolver,
    settings: &TransferSettings,
) -> Result<ShareOutcome>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    write_line(writer, ShareSignal::ReadyForFile.as_str()).await?;

    let raw_name = read_line(reader, settings.max_line_length)
        .await?
        .ok_or_else(|| LanshareError::Protocol("Connection closed before file name".to_string()))?;
    let size_line = read_line(reader, settings.max_line_length)
        .await?
        .ok_or_else(|| LanshareError::Protocol("Connection closed before file size".to_string()))?;

    let file_name = sanitize_file_name(&raw_name);
    debug!("Offered file {:?} (sent as {:?}), size line {:?}", file_name, raw_name, size_line);

    let expected_size = match size_line.trim().parse::<u64>() {
        Ok(size) => size,
        Err(_) => {
            warn!("Invalid file size {:?} for {}", size_line, file_name);
            write_line(writer, ShareSignal::InvalidFileSize.as_str()).await?;
            return Ok(ShareOutcome::InvalidFileSize {
                file_name,
                size_line,
            });
        }
    };

    let decision = tokio::time::timeout(
        settings.resolve_timeout,
        resolver.resolve_save_path(&file_name),
    )
    .await;

    let path = match decision {
        Ok(Some(path)) => path,
        Ok(None) => {
            info!("Transfer of {} cancelled", file_name);
            write_line(writer, ShareSignal::UserCancelled.as_str()).await?;
            return Ok(ShareOutcome::Cancelled { file_name });
        }
        Err(_) => {
            warn!(
                "No save decision for {} within {:?}, cancelling",
                file_name, settings.resolve_timeout
            );
            write_line(writer, ShareSignal::UserCancelled.as_str()).await?;
            return Ok(ShareOutcome::Cancelled { file_name });
        }
    };

    write_line(writer, ShareSignal::ReadyToReceiveFile.as_str()).await?;

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .await
        .map_err(|e| {
            LanshareError::Transfer(format!("Cannot create {}: {}", path.display(), e))
        })?;

    let mut buffer = vec![0u8; settings.chunk_size.max(1)];
    let mut remaining = expected_size;

    while remaining > 0 {
        let want = remaining.min(buffer.len() as u64) as usize;
        let read = reader.read(&mut buffer[..want]).await?;
        if read == 0 {
            warn!(
                "Peer closed early: {} of {} bytes of {} received",
                expected_size - remaining,
                expected_size,
                file_name
            );
            break;
        }

        file.write_all(&buffer[..read]).await?;
        remaining -= read as u64;
    }

    file.flush().await?;
    drop(file);

    let bytes_written = expected_size - remaining;
    info!(
        "Received {} ({} bytes) into {}",
        file_name,
        bytes_written,
        path.display()
    );

    if let Err(e) = write_line(writer, ShareSignal::FileReceived.as_str()).await {
        debug!("Could not confirm receipt of {}: {}", file_name, e);
    } else {
        tokio::time::sleep(settings.close_grace).await;
    }

    Ok(ShareOutcome::Received {
        file_name,
        path,
        bytes_written,
        expected_size,
    })
}
