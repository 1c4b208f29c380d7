//! Paired device registry
//!
//! Tracks devices that completed the pairing handshake. Every mutation is
//! written through to a JSON file, and every access first picks up what other
//! handles on the same file wrote. The in-memory list stays authoritative
//! while a write has failed.

use crate::error::{LanshareError, Result};
use crate::identity::data_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// File name of the paired device list inside the data directory
pub const REGISTRY_FILE_NAME: &str = "paired_devices.json";

/// A remote device this host trusts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairedDevice {
    #[serde(rename = "DeviceId")]
    pub device_id: String,
    #[serde(rename = "DeviceName")]
    pub device_name: String,
    /// Address observed when the device last paired
    #[serde(rename = "DeviceIp")]
    pub device_ip: String,
}

impl PairedDevice {
    pub fn new(device_id: &str, device_name: &str, device_ip: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            device_name: device_name.to_string(),
            device_ip: device_ip.to_string(),
        }
    }
}

type PairedObserver = Arc<dyn Fn(&PairedDevice) + Send + Sync>;

struct RegistryState {
    devices: Vec<PairedDevice>,
    /// Set while memory holds changes the file does not
    unsaved: bool,
}

/// Ordered, persisted set of paired devices
pub struct DeviceRegistry {
    path: PathBuf,
    state: Mutex<RegistryState>,
    observers: Mutex<Vec<PairedObserver>>,
}

impl DeviceRegistry {
    /// Open a registry backed by an explicit file (useful for testing)
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let devices = read_devices(&path).unwrap_or_default();
        debug!("Loaded {} paired device(s) from {}", devices.len(), path.display());

        Self {
            path,
            state: Mutex::new(RegistryState {
                devices,
                unsaved: false,
            }),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Open the registry at the per-user application data location
    pub fn open_default() -> Result<Self> {
        Ok(Self::open(Self::default_path()?))
    }

    /// Get the default registry file path
    pub fn default_path() -> Result<PathBuf> {
        Ok(data_dir()?.join(REGISTRY_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Register a callback fired after each successful [`add`](Self::add)
    pub fn on_device_paired<F>(&self, callback: F)
    where
        F: Fn(&PairedDevice) + Send + Sync + 'static,
    {
        lock(&self.observers).push(Arc::new(callback));
    }

    pub fn is_paired(&self, device_id: &str) -> bool {
        self.synced()
            .devices
            .iter()
            .any(|d| d.device_id == device_id)
    }

    /// Add a device unless its id is already registered.
    ///
    /// The file is re-read, then the duplicate check, the insertion and the
    /// write-through happen under one lock. Observers run after the lock is
    /// released, so they see the new device in [`all`](Self::all). Returns
    /// `false` if the id was present.
    pub fn add(&self, device: PairedDevice) -> bool {
        {
            let mut state = self.synced();
            if state.devices.iter().any(|d| d.device_id == device.device_id) {
                debug!("Device {} already paired, not adding", device.device_id);
                return false;
            }
            state.devices.push(device.clone());
            self.persist(&mut state);
        }

        info!("Paired device added: {} ({})", device.device_name, device.device_id);

        let observers: Vec<PairedObserver> = lock(&self.observers).clone();
        for observer in observers {
            observer(&device);
        }

        true
    }

    /// Remove a device by id. Returns `true` if it was present.
    pub fn delete(&self, device_id: &str) -> bool {
        let mut state = self.synced();
        let before = state.devices.len();
        state.devices.retain(|d| d.device_id != device_id);
        if state.devices.len() == before {
            return false;
        }

        info!("Deleting paired device {}", device_id);
        self.persist(&mut state);

        true
    }

    /// Snapshot of all paired devices in insertion order
    pub fn all(&self) -> Vec<PairedDevice> {
        self.synced().devices.clone()
    }

    pub fn get(&self, device_id: &str) -> Option<PairedDevice> {
        self.synced()
            .devices
            .iter()
            .find(|d| d.device_id == device_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.synced().devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lock the state after picking up changes other handles wrote to the
    /// file. Memory is kept when it holds unsaved changes or the file cannot
    /// be read.
    fn synced(&self) -> MutexGuard<'_, RegistryState> {
        let mut state = lock(&self.state);
        if !state.unsaved {
            if let Some(stored) = read_devices(&self.path) {
                state.devices = stored;
            }
        }
        state
    }

    fn persist(&self, state: &mut RegistryState) {
        match save_devices(&self.path, &state.devices) {
            Ok(()) => state.unsaved = false,
            Err(e) => {
                warn!("Failed to persist paired devices: {}", e);
                state.unsaved = true;
            }
        }
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("DeviceRegistry")
            .field("path", &self.path)
            .field("devices", &state.devices.len())
            .field("unsaved", &state.unsaved)
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// `None` when the file is absent or unusable
fn read_devices(path: &Path) -> Option<Vec<PairedDevice>> {
    if !path.exists() {
        return None;
    }

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!("Failed to read paired devices from {}: {}", path.display(), e);
            return None;
        }
    };

    match serde_json::from_str(&content) {
        Ok(devices) => Some(devices),
        Err(e) => {
            warn!("Failed to parse paired devices file {}: {}", path.display(), e);
            None
        }
    }
}

fn save_devices(path: &Path, devices: &[PairedDevice]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            LanshareError::Storage(format!("Failed to create {}: {}", parent.display(), e))
        })?;
    }

    let content = serde_json::to_string_pretty(devices)?;
    fs::write(path, content).map_err(|e| {
        LanshareError::Storage(format!(
            "Failed to write paired devices to {}: {}",
            path.display(),
            e
        ))
    })
}
