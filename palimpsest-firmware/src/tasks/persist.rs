//! Configuration persistence task
//!
//! Owns the flash store after boot. Other tasks send updated configurations
//! over the channel; each one is committed as a single atomic file update.
//! Between commits the task keeps the shared watchdog fed.

use defmt::*;
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Timer};

use crate::config::{self, DeviceConfig, FlashStore};

/// Pending configuration updates from the rest of the firmware
pub type ConfigUpdates = Channel<CriticalSectionRawMutex, DeviceConfig, 2>;

/// Watchdog feed cadence while idle
const FEED_INTERVAL: Duration = Duration::from_millis(1500);

#[embassy_executor::task]
pub async fn persist_task(store: &'static mut FlashStore, updates: &'static ConfigUpdates) {
    info!("persist task running");
    loop {
        match select(updates.receive(), Timer::after(FEED_INTERVAL)).await {
            Either::First(config) => match config::save(store, &config) {
                Ok(()) => {}
                Err(e) => warn!("configuration commit failed: {:?}", e),
            },
            Either::Second(()) => store.watchdog_mut().keep_alive(),
        }
    }
}
