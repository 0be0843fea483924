//! Firmware tasks

pub mod persist;

pub use persist::{persist_task, ConfigUpdates};
