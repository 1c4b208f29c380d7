//! LanShare Core Library
//!
//! This crate provides the core functionality for LanShare: a host that
//! pairs with devices on the local network using a shared token and then
//! accepts files pushed by them over plain TCP.
//!
//! # Architecture
//!
//! - [`identity`]: persisted address, port, token and display name of this host
//! - [`registry`]: the durable list of paired devices
//! - [`protocol`]: line framing and the messages exchanged on the wire
//! - [`pairing`]: the server side of the `PAIR` exchange
//! - [`share`]: the server side of the `SHARE` exchange (file receive)
//! - [`resolver`]: where received files are stored, decided per transfer
//! - [`server`]: the listener that dispatches each connection by its mode line
//! - [`pairing_info`]: the out-of-band payload a device scans to pair
//! - [`client`]: the device side of both exchanges
//!
//! # Example
//!
//! ```no_run
//! use lanshare_core::{
//!     DeviceRegistry, DirectoryResolver, FileShareServer, IdentityStore, ServerConfig,
//! };
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! async fn run_server() -> lanshare_core::Result<()> {
//!     let store = IdentityStore::open_default()?;
//!     let registry = Arc::new(DeviceRegistry::open_default()?);
//!     let resolver = Arc::new(DirectoryResolver::new("/tmp/lanshare"));
//!
//!     let mut server =
//!         FileShareServer::bind(ServerConfig::default(), &store, registry, resolver).await?;
//!     println!("Pair with: {}", server.pairing_info().to_payload()?);
//!
//!     let (event_tx, mut event_rx) = mpsc::channel(32);
//!     tokio::spawn(async move {
//!         while let Some(event) = event_rx.recv().await {
//!             println!("{:?}", event);
//!         }
//!     });
//!     server.run(event_tx).await
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod identity;
pub mod pairing;
pub mod pairing_info;
pub mod protocol;
pub mod registry;
pub mod resolver;
pub mod server;
pub mod share;

// Re-export commonly used types
pub use client::{FileSender, PairingClient, PairingResult, SendOutcome};
pub use config::ServerConfig;
pub use error::{LanshareError, Result};
pub use identity::{IdentityStore, ServerIdentity};
pub use pairing_info::PairingInfo;
pub use protocol::{Mode, PairingFailure, ShareSignal};
pub use registry::{DeviceRegistry, PairedDevice};
pub use resolver::{ChannelResolver, DirectoryResolver, SavePathResolver, SaveRequest};
pub use server::{FileShareServer, ServerEvent, ShutdownHandle};
pub use share::ShareOutcome;

/// Get the version of the lanshare_core library
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Get the hostname of this device
pub fn hostname() -> String {
    identity::hostname()
}
