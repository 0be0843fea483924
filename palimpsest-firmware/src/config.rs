//! Device configuration persistence
//!
//! Loads the controller configuration from the flash store at boot and
//! saves updates through a RAM-staged commit so the stored copy only ever
//! changes atomically. Falls back to defaults when nothing valid is stored.

use defmt::*;
use heapless::Vec;
use serde::{Deserialize, Serialize};

use palimpsest_hal_rp2040::flash::XipFlash;
use palimpsest_hal_rp2040::gate::CoreGate;
use palimpsest_hal_rp2040::watchdog::HardwareWatchdog;
use palimpsest_store::{StagedFile, Store, StoreError};

/// The engine instance as wired on this board
pub type FlashStore = Store<XipFlash<'static>, CoreGate, HardwareWatchdog>;

/// Stored filename of the device configuration
pub const CONFIG_FILE: &str = "config";

/// Allocation for the configuration file (one sector)
pub const CONFIG_ALLOC: u32 = 4096;

/// Maximum serialized config size
const MAX_CONFIG_SIZE: usize = 1024;

const CONFIG_VERSION: u8 = 1;

/// Configuration persistence errors
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Store operation failed
    Store(StoreError),
    /// Deserialization failed
    Deserialize,
    /// Serialization failed
    Serialize,
    /// Config version mismatch
    VersionMismatch,
}

impl From<StoreError> for ConfigError {
    fn from(e: StoreError) -> Self {
        ConfigError::Store(e)
    }
}

/// One output port's settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PortConfig {
    pub enabled: bool,
    pub inverted: bool,
    /// Level driven at power-on before any expression runs
    pub initial_level: u8,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            inverted: false,
            initial_level: 0,
        }
    }
}

/// Controller configuration persisted across power cycles
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceConfig {
    pub version: u8,
    /// Input poll interval in milliseconds
    pub poll_interval_ms: u16,
    /// Button debounce window in milliseconds
    pub debounce_ms: u8,
    pub ports: Vec<PortConfig, 8>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        let mut ports = Vec::new();
        for _ in 0..8 {
            let _ = ports.push(PortConfig::default());
        }
        Self {
            version: CONFIG_VERSION,
            poll_interval_ms: 10,
            debounce_ms: 20,
            ports,
        }
    }
}

/// Load the device configuration, falling back to defaults
pub fn load(store: &mut FlashStore) -> DeviceConfig {
    match load_inner(store) {
        Ok(config) => {
            info!("loaded configuration from flash");
            config
        }
        Err(ConfigError::Store(StoreError::NotFound)) => {
            debug!("no stored configuration, using defaults");
            DeviceConfig::default()
        }
        Err(e) => {
            warn!("failed to load configuration: {:?}, using defaults", e);
            DeviceConfig::default()
        }
    }
}

fn load_inner(store: &mut FlashStore) -> Result<DeviceConfig, ConfigError> {
    let file = store.open_read(CONFIG_FILE)?;
    debug!("read {} bytes of configuration", file.len());

    let config: DeviceConfig =
        postcard::from_bytes(file.data).map_err(|_| ConfigError::Deserialize)?;
    if config.version != CONFIG_VERSION {
        warn!(
            "configuration version mismatch: found {}, expected {}",
            config.version, CONFIG_VERSION
        );
        return Err(ConfigError::VersionMismatch);
    }
    Ok(config)
}

/// Persist the device configuration atomically
pub fn save(store: &mut FlashStore, config: &DeviceConfig) -> Result<(), ConfigError> {
    let mut buffer = [0u8; MAX_CONFIG_SIZE];
    let bytes = postcard::to_slice(config, &mut buffer).map_err(|_| ConfigError::Serialize)?;

    let mut staged: StagedFile<4> = StagedFile::new();
    staged.write(0, bytes)?;
    staged.commit(store, CONFIG_FILE, CONFIG_ALLOC)?;

    info!("saved {} bytes of configuration", bytes.len());
    Ok(())
}
