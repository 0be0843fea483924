//! Palimpsest - flash configuration store firmware
//!
//! Firmware shell for RP2040-based programmable I/O controllers. Brings up
//! the flash storage engine against the onboard QSPI flash, loads the
//! device configuration through it, and keeps a persistence task running
//! for atomic configuration commits.
//!
//! Named after the Greek "palimpsestos", "scraped again" - a manuscript
//! overwritten without discarding what lay beneath, which is how the store
//! updates files.

#![no_std]
#![no_main]

use defmt::*;
use embassy_executor::Spawner;
use embassy_rp::watchdog::Watchdog as RpWatchdog;
use embassy_time::Timer;
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

use palimpsest_hal_rp2040::flash::XipFlash;
use palimpsest_hal_rp2040::gate::CoreGate;
use palimpsest_hal_rp2040::watchdog::HardwareWatchdog;
use palimpsest_store::Store;

use crate::config::FlashStore;
use crate::tasks::ConfigUpdates;

mod config;
mod tasks;

/// Bottom of the content area; the program image is linked below this.
/// Keep in sync with the FLASH region in memory.x.
const PROGRAM_RESERVED: u32 = 512 * 1024;

/// Central directory size (one sector, 128 entries)
const DIRECTORY_BYTES: u32 = 4096;

/// Base watchdog feed period
const WATCHDOG_PERIOD_MS: u32 = 5000;

static STORE: StaticCell<FlashStore> = StaticCell::new();
static CONFIG_UPDATES: ConfigUpdates = ConfigUpdates::new();

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("palimpsest firmware starting");

    let p = embassy_rp::init(Default::default());

    let mut watchdog = RpWatchdog::new(p.WATCHDOG);
    watchdog.start(embassy_time::Duration::from_millis(WATCHDOG_PERIOD_MS as u64));

    let store = STORE.init(Store::new(
        XipFlash::new(p.FLASH),
        CoreGate::new(),
        HardwareWatchdog::new(watchdog, WATCHDOG_PERIOD_MS),
        PROGRAM_RESERVED,
    ));

    // Mount validates the directory and reformats it on any corruption;
    // consumers regenerate defaults after a reformat, so boot continues
    // either way
    if let Err(e) = store.mount(DIRECTORY_BYTES) {
        error!("flash store unavailable: {:?}", e);
    }

    let device_config = config::load(store);
    debug!(
        "poll {} ms, debounce {} ms, {} ports",
        device_config.poll_interval_ms,
        device_config.debounce_ms,
        device_config.ports.len()
    );

    let status = store.status();
    info!(
        "store: {} file(s), {} bytes allocated, {} bytes free",
        status.files.len(),
        status.bytes_allocated,
        status.bytes_free
    );

    spawner
        .spawn(tasks::persist_task(store, &CONFIG_UPDATES))
        .unwrap();

    info!("firmware running");

    // Input scanning, port expressions, and the USB interface live in
    // their own tasks; the main task has nothing left to do
    loop {
        Timer::after_secs(60).await;
    }
}
