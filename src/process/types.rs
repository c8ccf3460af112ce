use crate::config::RestartSchedule;
use crate::error::{Result, WardenError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Observable run state of a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessStatus {
    Running,
    Stopped,
}

impl ProcessStatus {
    pub fn from_running(running: bool) -> Self {
        if running {
            ProcessStatus::Running
        } else {
            ProcessStatus::Stopped
        }
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessStatus::Running => write!(f, "running"),
            ProcessStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Per-process overrides of the global settings. `None` inherits the global value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_interval_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_delay_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_delay_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_for_hanging: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_restarts: Option<u32>,
}

/// Calendar restart configuration of a single process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledRestart {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub schedule: RestartSchedule,
}

/// A supervised process: identity, runtime state, overrides and schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRecord {
    /// Unique, case-insensitive key
    pub name: String,

    pub executable_path: PathBuf,

    #[serde(default)]
    pub arguments: Vec<String>,

    /// Defaults to the executable's directory when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,

    #[serde(default = "default_auto_restart")]
    pub auto_restart_enabled: bool,

    #[serde(default)]
    pub is_running: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    #[serde(default)]
    pub restart_count: u32,

    /// Ticks since the last health check
    #[serde(skip)]
    pub check_counter: u64,

    /// Held by the health engine from claiming a restart until the launch
    /// outcome is recorded
    #[serde(skip)]
    pub launch_pending: bool,

    /// Held by the restart scheduler while it kills and relaunches the
    /// process; health checks leave the record alone meanwhile
    #[serde(skip)]
    pub scheduled_restart_active: bool,

    // Tables go last so the record also encodes as TOML
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_restart_at: Option<SystemTime>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scheduled_restart_at: Option<SystemTime>,

    #[serde(default)]
    pub overrides: ProcessOverrides,

    #[serde(default)]
    pub scheduled_restart: ScheduledRestart,
}

fn default_auto_restart() -> bool {
    true
}

impl ProcessRecord {
    pub fn new(name: impl Into<String>, executable_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            executable_path: executable_path.into(),
            arguments: Vec::new(),
            working_directory: None,
            auto_restart_enabled: true,
            is_running: false,
            pid: None,
            last_restart_at: None,
            restart_count: 0,
            check_counter: 0,
            launch_pending: false,
            scheduled_restart_active: false,
            overrides: ProcessOverrides::default(),
            scheduled_restart: ScheduledRestart::default(),
            last_scheduled_restart_at: None,
        }
    }

    /// Whether another task currently owns a launch of this process
    pub fn is_busy(&self) -> bool {
        self.launch_pending || self.scheduled_restart_active
    }

    /// Registry key for this record
    pub fn key(&self) -> String {
        name_key(&self.name)
    }

    /// Base name used to find the live OS process: the executable's file
    /// stem, or the record name when the path has none.
    pub fn image_name(&self) -> String {
        self.executable_path
            .file_stem()
            .or_else(|| Path::new(&self.name).file_stem())
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name.clone())
    }

    /// Directory the process is launched in
    pub fn launch_directory(&self) -> Option<PathBuf> {
        match &self.working_directory {
            Some(dir) if !dir.as_os_str().is_empty() => Some(dir.clone()),
            _ => self
                .executable_path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf),
        }
    }

    pub fn status(&self) -> ProcessStatus {
        ProcessStatus::from_running(self.is_running)
    }

    /// Clear the restart budget and turn auto restart back on
    pub fn reset_restart_budget(&mut self) {
        self.restart_count = 0;
        self.auto_restart_enabled = true;
    }

    /// Validate the record
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(WardenError::MissingConfigField("name".to_string()));
        }

        if self.executable_path.as_os_str().is_empty() {
            return Err(WardenError::MissingConfigField(
                "executable_path".to_string(),
            ));
        }

        if self.overrides.check_interval_secs == Some(0) {
            return Err(WardenError::ConfigValidationError(format!(
                "{}: check_interval_secs override must be at least 1",
                self.name
            )));
        }

        if self.overrides.max_restarts == Some(0) {
            return Err(WardenError::ConfigValidationError(format!(
                "{}: max_restarts override must be at least 1",
                self.name
            )));
        }

        self.scheduled_restart.schedule.validate()
    }
}

/// Normalize a process name into its registry key
pub fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}
