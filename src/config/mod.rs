use crate::error::{Result, WardenError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How often a calendar restart repeats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Frequency {
    #[default]
    Daily,
    Weekly,
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frequency::Daily => write!(f, "Daily"),
            Frequency::Weekly => write!(f, "Weekly"),
        }
    }
}

/// Wall-clock time (and weekday, for weekly schedules) of a calendar restart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartSchedule {
    #[serde(default)]
    pub frequency: Frequency,

    /// Hour of day, 0-23
    #[serde(default = "default_schedule_hour")]
    pub hour: u32,

    /// Minute of hour, 0-59
    #[serde(default = "default_schedule_minute")]
    pub minute: u32,

    /// Day of week, 0 = Sunday .. 6 = Saturday. Only used by weekly schedules.
    #[serde(default)]
    pub day_of_week: u32,
}

fn default_schedule_hour() -> u32 {
    23
}

fn default_schedule_minute() -> u32 {
    30
}

impl Default for RestartSchedule {
    fn default() -> Self {
        Self {
            frequency: Frequency::Daily,
            hour: default_schedule_hour(),
            minute: default_schedule_minute(),
            day_of_week: 0,
        }
    }
}

impl RestartSchedule {
    pub fn daily(hour: u32, minute: u32) -> Self {
        Self {
            frequency: Frequency::Daily,
            hour,
            minute,
            day_of_week: 0,
        }
    }

    pub fn weekly(day_of_week: u32, hour: u32, minute: u32) -> Self {
        Self {
            frequency: Frequency::Weekly,
            hour,
            minute,
            day_of_week,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.hour > 23 {
            return Err(WardenError::ConfigValidationError(format!(
                "restart hour must be 0-23, got {}",
                self.hour
            )));
        }
        if self.minute > 59 {
            return Err(WardenError::ConfigValidationError(format!(
                "restart minute must be 0-59, got {}",
                self.minute
            )));
        }
        if self.day_of_week > 6 {
            return Err(WardenError::ConfigValidationError(format!(
                "restart day_of_week must be 0-6 (0 = Sunday), got {}",
                self.day_of_week
            )));
        }
        Ok(())
    }
}

/// Global supervision settings.
///
/// Treated as an immutable snapshot: readers get a clone, writers replace
/// the whole value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSettings {
    /// Seconds between health checks of a process
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Seconds to wait before relaunching a stopped process
    #[serde(default = "default_restart_delay")]
    pub restart_delay_secs: u64,

    /// Seconds to wait before the very first monitoring pass
    #[serde(default)]
    pub boot_delay_secs: u64,

    /// Restarts allowed before auto restart is switched off
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    #[serde(default = "default_true")]
    pub check_for_hanging_process: bool,

    /// Whether supervision begins as soon as the watchdog is opened
    #[serde(default = "default_true")]
    pub auto_start_on_launch: bool,

    #[serde(default)]
    pub enable_system_restart: bool,

    #[serde(default)]
    pub system_restart: RestartSchedule,
}

// Default value functions for serde
fn default_check_interval() -> u64 {
    5
}

fn default_restart_delay() -> u64 {
    3
}

fn default_max_restarts() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            restart_delay_secs: default_restart_delay(),
            boot_delay_secs: 0,
            max_restarts: default_max_restarts(),
            check_for_hanging_process: true,
            auto_start_on_launch: true,
            enable_system_restart: false,
            system_restart: RestartSchedule::default(),
        }
    }
}

impl GlobalSettings {
    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        if self.check_interval_secs == 0 {
            return Err(WardenError::ConfigValidationError(
                "check_interval_secs must be at least 1".to_string(),
            ));
        }

        if self.max_restarts == 0 {
            return Err(WardenError::ConfigValidationError(
                "max_restarts must be at least 1".to_string(),
            ));
        }

        self.system_restart.validate()
    }

    pub fn boot_delay(&self) -> Duration {
        Duration::from_secs(self.boot_delay_secs)
    }
}
