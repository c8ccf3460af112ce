use crate::config::GlobalSettings;
use crate::process::types::ProcessRecord;
use std::time::Duration;

/// Settings that apply to one process after resolving its overrides
/// against the global snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectivePolicy {
    pub check_interval_secs: u64,
    pub restart_delay_secs: u64,
    pub boot_delay_secs: u64,
    pub check_for_hanging: bool,
    pub max_restarts: u32,
}

impl EffectivePolicy {
    /// Resolve the effective policy: the override when present, else the global value
    pub fn resolve(record: &ProcessRecord, global: &GlobalSettings) -> Self {
        let overrides = &record.overrides;
        Self {
            check_interval_secs: overrides
                .check_interval_secs
                .unwrap_or(global.check_interval_secs)
                .max(1),
            restart_delay_secs: overrides
                .restart_delay_secs
                .unwrap_or(global.restart_delay_secs),
            boot_delay_secs: overrides.boot_delay_secs.unwrap_or(global.boot_delay_secs),
            check_for_hanging: overrides
                .check_for_hanging
                .unwrap_or(global.check_for_hanging_process),
            max_restarts: overrides.max_restarts.unwrap_or(global.max_restarts),
        }
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }

    pub fn boot_delay(&self) -> Duration {
        Duration::from_secs(self.boot_delay_secs)
    }

    /// Decide what to do with a process that was found not running
    pub fn decide(&self, record: &ProcessRecord) -> RestartDecision {
        if !record.auto_restart_enabled {
            return RestartDecision::AutoRestartDisabled;
        }

        if record.restart_count < self.max_restarts {
            RestartDecision::Restart {
                delay: self.restart_delay(),
            }
        } else {
            RestartDecision::LimitExceeded {
                restarts: record.restart_count,
                max_restarts: self.max_restarts,
            }
        }
    }
}

/// Outcome of the restart policy for a stopped process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Relaunch after waiting `delay`
    Restart { delay: Duration },
    /// Budget used up; auto restart gets switched off
    LimitExceeded { restarts: u32, max_restarts: u32 },
    AutoRestartDisabled,
}
