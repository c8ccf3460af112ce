// Library exports for the Warden process watchdog

mod cancel;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod process;
pub mod schedule;
pub mod state;
pub mod watchdog;

pub use error::{Result, WardenError};
pub use watchdog::{Watchdog, WatchdogTimings};
