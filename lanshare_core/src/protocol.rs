//! Wire protocol for LanShare
//!
//! Every connection starts with a mode line (`PAIR` or `SHARE`). Pairing is a
//! single JSON request/response pair. Sharing is a sequence of newline
//! terminated control lines followed by the raw file bytes.

use crate::error::{LanshareError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default upper bound for a single control line, in bytes
pub const DEFAULT_MAX_LINE_LENGTH: usize = 8 * 1024;

/// Sub-protocol selected by the first line of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Pair,
    Share,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Pair => "PAIR",
            Mode::Share => "SHARE",
        }
    }

    /// Parse a mode line; anything unrecognised yields `None`
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            "PAIR" => Some(Mode::Pair),
            "SHARE" => Some(Mode::Share),
            _ => None,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pairing request sent by the remote device.
///
/// Fields are optional so that an absent field can be told apart from a
/// malformed document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairRequest {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub device_name: Option<String>,
}

impl PairRequest {
    pub fn new(token: &str, device_id: &str, device_name: &str) -> Self {
        Self {
            token: Some(token.to_string()),
            device_id: Some(device_id.to_string()),
            device_name: Some(device_name.to_string()),
        }
    }

    /// Serialize request to JSON with newline
    pub fn to_json(&self) -> Result<String> {
        let json = serde_json::to_string(self)?;
        Ok(format!("{}\n", json))
    }
}

/// Outcome reported in a [`PairResponse`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairStatus {
    Success,
    Failed,
}

/// Pairing response sent back to the remote device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairResponse {
    pub status: PairStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PairResponse {
    pub fn success(server_name: &str) -> Self {
        Self {
            status: PairStatus::Success,
            server_name: Some(server_name.to_string()),
            reason: None,
        }
    }

    pub fn failed(failure: PairingFailure) -> Self {
        Self {
            status: PairStatus::Failed,
            server_name: None,
            reason: Some(failure.reason().to_string()),
        }
    }

    /// Serialize response to JSON with newline
    pub fn to_json(&self) -> Result<String> {
        let json = serde_json::to_string(self)?;
        Ok(format!("{}\n", json))
    }

    /// Deserialize response from JSON
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s.trim())?)
    }
}

/// Reasons a pairing request is refused, in validation order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingFailure {
    EmptyRequest,
    MalformedJson,
    MissingFields,
    InvalidToken,
    AlreadyPaired,
}

impl PairingFailure {
    pub fn reason(&self) -> &'static str {
        match self {
            PairingFailure::EmptyRequest => "Empty request",
            PairingFailure::MalformedJson => "Malformed JSON",
            PairingFailure::MissingFields => "Missing fields",
            PairingFailure::InvalidToken => "Invalid token",
            PairingFailure::AlreadyPaired => "Device already paired",
        }
    }
}

impl fmt::Display for PairingFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// Control lines exchanged during a file share
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareSignal {
    ReadyForFile,
    InvalidFileSize,
    UserCancelled,
    ReadyToReceiveFile,
    FileReceived,
}

impl ShareSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShareSignal::ReadyForFile => "READY_FOR_FILE",
            ShareSignal::InvalidFileSize => "INVALID_FILE_SIZE",
            ShareSignal::UserCancelled => "USER_CANCELLED",
            ShareSignal::ReadyToReceiveFile => "READY_TO_RECEIVE_FILE",
            ShareSignal::FileReceived => "FILE_RECEIVED",
        }
    }

    pub fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            "READY_FOR_FILE" => Some(ShareSignal::ReadyForFile),
            "INVALID_FILE_SIZE" => Some(ShareSignal::InvalidFileSize),
            "USER_CANCELLED" => Some(ShareSignal::UserCancelled),
            "READY_TO_RECEIVE_FILE" => Some(ShareSignal::ReadyToReceiveFile),
            "FILE_RECEIVED" => Some(ShareSignal::FileReceived),
            _ => None,
        }
    }
}

impl fmt::Display for ShareSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read one newline terminated line of at most `max_len` bytes.
///
/// Returns `None` on a clean end of stream. The line terminator (`\n` or
/// `\r\n`) is stripped. Invalid UTF-8 is replaced with U+FFFD rather than
/// failing, so callers can answer malformed input instead of dropping it.
pub async fn read_line<R>(reader: &mut R, max_len: usize) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut bytes = Vec::new();
    let read = (&mut *reader)
        .take(max_len as u64 + 1)
        .read_until(b'\n', &mut bytes)
        .await?;

    if read == 0 {
        return Ok(None);
    }

    if bytes.last() == Some(&b'\n') {
        bytes.pop();
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
    } else if bytes.len() > max_len {
        return Err(LanshareError::Protocol(format!(
            "Line exceeds {} bytes",
            max_len
        )));
    }

    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

/// Write a single line followed by `\n`
pub async fn write_line<W>(writer: &mut W, text: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = String::with_capacity(text.len() + 1);
    buf.push_str(text);
    buf.push('\n');
    writer.write_all(buf.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
