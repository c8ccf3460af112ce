// CLI module - User-facing command-line interface

mod output;

use crate::config::{Frequency, GlobalSettings, RestartSchedule};
use crate::error::{Result, WardenError};
use crate::process::ProcessRecord;
use crate::state::SettingsStore;
use crate::watchdog::Watchdog;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Settings document used when `--config` is not given
pub const DEFAULT_SETTINGS_FILE: &str = "warden.json";

/// Warden - keeps your processes alive
#[derive(Parser)]
#[command(name = "warden")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Settings document (.json or .toml)
    #[arg(short, long, global = true, default_value = DEFAULT_SETTINGS_FILE)]
    config: PathBuf,

    /// Log at debug level, ignoring RUST_LOG
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Supervise the configured processes in the foreground until Ctrl-C
    Run {
        /// Start monitoring even if auto start on launch is disabled
        #[arg(long)]
        start: bool,
    },

    /// Add a process to the settings document
    Add(AddArgs),

    /// Remove a process
    Remove {
        /// Process name
        name: String,
    },

    /// Clear a process's restart count and re-enable auto restart
    Reset {
        /// Process name
        name: String,
    },

    /// List configured processes
    List,

    /// Show upcoming scheduled restarts
    NextRestart {
        /// Only show this process
        name: Option<String>,
    },

    /// Show or change the global settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommands,
    },
}

#[derive(Args)]
struct AddArgs {
    /// Unique process name
    name: String,

    /// Path to the executable
    executable: PathBuf,

    /// Working directory (defaults to the executable's directory)
    #[arg(short = 'd', long)]
    cwd: Option<PathBuf>,

    /// Leave the process stopped when it exits
    #[arg(long)]
    no_auto_restart: bool,

    /// Seconds between health checks
    #[arg(long)]
    check_interval: Option<u64>,

    /// Seconds to wait before a restart
    #[arg(long)]
    restart_delay: Option<u64>,

    /// Seconds to wait before the first launch
    #[arg(long)]
    boot_delay: Option<u64>,

    /// Restarts allowed before auto restart is switched off
    #[arg(long)]
    max_restarts: Option<u32>,

    /// Kill and restart the process when it stops responding
    #[arg(long)]
    hang_check: Option<bool>,

    /// Restart the process every day at this time
    #[arg(long, value_name = "HH:MM")]
    restart_at: Option<ClockTime>,

    /// Make the scheduled restart weekly, on this day
    #[arg(long, value_name = "DAY", requires = "restart_at")]
    restart_day: Option<DayOfWeek>,

    /// Overwrite a process with the same name
    #[arg(long)]
    replace: bool,

    /// Arguments passed to the executable
    #[arg(last = true)]
    args: Vec<String>,
}

impl AddArgs {
    fn into_record(self) -> Result<ProcessRecord> {
        let mut record = ProcessRecord::new(self.name, self.executable);
        record.arguments = self.args;
        record.working_directory = self.cwd;
        record.auto_restart_enabled = !self.no_auto_restart;

        record.overrides.check_interval_secs = self.check_interval;
        record.overrides.restart_delay_secs = self.restart_delay;
        record.overrides.boot_delay_secs = self.boot_delay;
        record.overrides.max_restarts = self.max_restarts;
        record.overrides.check_for_hanging = self.hang_check;

        if let Some(time) = self.restart_at {
            record.scheduled_restart.enabled = true;
            record.scheduled_restart.schedule = time.schedule(self.restart_day);
        }

        record.validate()?;
        Ok(record)
    }
}

#[derive(Subcommand)]
enum SettingsCommands {
    /// Print the current settings
    Show,

    /// Change one or more settings
    Set(SettingsArgs),
}

#[derive(Args)]
struct SettingsArgs {
    /// Seconds between health checks
    #[arg(long)]
    check_interval: Option<u64>,

    /// Seconds to wait before a restart
    #[arg(long)]
    restart_delay: Option<u64>,

    /// Seconds to wait before the first monitoring pass
    #[arg(long)]
    boot_delay: Option<u64>,

    /// Restarts allowed before auto restart is switched off
    #[arg(long)]
    max_restarts: Option<u32>,

    /// Kill and restart processes that stop responding
    #[arg(long)]
    hang_check: Option<bool>,

    /// Start monitoring as soon as `run` opens the settings
    #[arg(long)]
    auto_start: Option<bool>,

    /// Reboot the host on a schedule
    #[arg(long)]
    system_restart: Option<bool>,

    /// Time of the host reboot; daily unless a day is given
    #[arg(long, value_name = "HH:MM")]
    system_restart_at: Option<ClockTime>,

    /// Make the host reboot weekly, on this day
    #[arg(long, value_name = "DAY")]
    system_restart_day: Option<DayOfWeek>,
}

impl SettingsArgs {
    fn apply(&self, settings: &mut GlobalSettings) {
        if let Some(secs) = self.check_interval {
            settings.check_interval_secs = secs;
        }
        if let Some(secs) = self.restart_delay {
            settings.restart_delay_secs = secs;
        }
        if let Some(secs) = self.boot_delay {
            settings.boot_delay_secs = secs;
        }
        if let Some(max) = self.max_restarts {
            settings.max_restarts = max;
        }
        if let Some(enabled) = self.hang_check {
            settings.check_for_hanging_process = enabled;
        }
        if let Some(enabled) = self.auto_start {
            settings.auto_start_on_launch = enabled;
        }
        if let Some(enabled) = self.system_restart {
            settings.enable_system_restart = enabled;
        }

        match (self.system_restart_at, self.system_restart_day) {
            (Some(time), day) => settings.system_restart = time.schedule(day),
            (None, Some(day)) => {
                settings.system_restart.frequency = Frequency::Weekly;
                settings.system_restart.day_of_week = day.0;
            }
            (None, None) => {}
        }
    }
}

/// Wall-clock time given as `HH:MM`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockTime {
    pub hour: u32,
    pub minute: u32,
}

impl ClockTime {
    fn schedule(self, day: Option<DayOfWeek>) -> RestartSchedule {
        match day {
            Some(day) => RestartSchedule::weekly(day.0, self.hour, self.minute),
            None => RestartSchedule::daily(self.hour, self.minute),
        }
    }
}

impl FromStr for ClockTime {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = || format!("Invalid time '{}'. Expected HH:MM", s);

        let (hour, minute) = s.trim().split_once(':').ok_or_else(invalid)?;
        let hour: u32 = hour.parse().map_err(|_| invalid())?;
        let minute: u32 = minute.parse().map_err(|_| invalid())?;

        if hour > 23 || minute > 59 {
            return Err(invalid());
        }
        Ok(Self { hour, minute })
    }
}

/// Day of week as a name (`sun`, `monday`) or a number (0 = Sunday)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayOfWeek(pub u32);

impl FromStr for DayOfWeek {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        const NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];
        let value = s.trim().to_lowercase();

        if let Ok(index) = value.parse::<u32>() {
            if index < 7 {
                return Ok(Self(index));
            }
        }

        NAMES
            .iter()
            .position(|name| value.starts_with(name))
            .map(|index| Self(index as u32))
            .ok_or_else(|| format!("Invalid day '{}'. Expected sun..sat or 0-6", s))
    }
}

impl Cli {
    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn config_path(&self) -> &PathBuf {
        &self.config
    }

    /// Execute the parsed command
    pub async fn execute(self) -> Result<()> {
        let store = SettingsStore::new(&self.config)?;

        match self.command {
            Commands::Run { start } => run_foreground(store, start).await,

            Commands::Add(args) => {
                let watchdog = Watchdog::load(store)?;
                let name = args.name.clone();

                if !args.replace && watchdog.supervisor().process(&name).is_some() {
                    return Err(WardenError::ConfigValidationError(format!(
                        "Process '{}' already exists (use --replace to overwrite it)",
                        name
                    )));
                }

                let record = args.into_record()?;
                let scheduled = record.scheduled_restart.enabled;
                watchdog.add_process(record)?;
                watchdog.supervisor().save()?;

                output::print_success_msg(&format!("Process '{}' added", name));
                if scheduled {
                    if let Some(next) = watchdog.describe_next(&name) {
                        output::print_info(&format!("Next scheduled restart: {}", next));
                    }
                }
                Ok(())
            }

            Commands::Remove { name } => {
                let watchdog = Watchdog::load(store)?;
                if !watchdog.remove_process(&name) {
                    return Err(WardenError::ProcessNotFound(name));
                }
                watchdog.supervisor().save()?;

                output::print_success_msg(&format!("Process '{}' removed", name));
                Ok(())
            }

            Commands::Reset { name } => {
                let watchdog = Watchdog::load(store)?;
                watchdog.reset_process(&name)?;
                watchdog.supervisor().save()?;

                output::print_success_msg(&format!(
                    "Restart budget of '{}' cleared, auto restart enabled",
                    name
                ));
                Ok(())
            }

            Commands::List => {
                let watchdog = Watchdog::load(store)?;
                output::print_process_table(&watchdog.processes(), &watchdog.settings());
                Ok(())
            }

            Commands::NextRestart { name } => {
                let watchdog = Watchdog::load(store)?;
                match name {
                    Some(name) => {
                        let next = watchdog
                            .describe_next(&name)
                            .ok_or_else(|| WardenError::ProcessNotFound(name.clone()))?;
                        println!("{}: {}", name, next);
                    }
                    None => {
                        println!("{}", watchdog.describe_all());
                        println!("{}", watchdog.describe_host());
                    }
                }
                Ok(())
            }

            Commands::Settings { command } => {
                let watchdog = Watchdog::load(store)?;
                match command {
                    SettingsCommands::Show => output::print_settings(&watchdog.settings()),
                    SettingsCommands::Set(args) => {
                        let mut settings = watchdog.settings();
                        args.apply(&mut settings);
                        watchdog.update_settings(settings)?;
                        watchdog.supervisor().save()?;

                        output::print_success_msg("Settings updated");
                        output::print_settings(&watchdog.settings());
                    }
                }
                Ok(())
            }
        }
    }
}

/// Run every engine until Ctrl-C, then stop them and save the state
async fn run_foreground(store: SettingsStore, force_start: bool) -> Result<()> {
    let watchdog = Watchdog::open(store);

    let shutdown = CancellationToken::new();
    let handler_token = shutdown.clone();
    ctrlc::set_handler(move || handler_token.cancel()).map_err(|e| {
        WardenError::Internal(format!("Failed to install Ctrl-C handler: {}", e))
    })?;

    let mut events = watchdog.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => output::print_event(&event),
                Err(RecvError::Lagged(missed)) => {
                    debug!("Event printer missed {} events", missed)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    if force_start {
        watchdog.start().await;
    } else {
        watchdog.launch().await;
    }

    output::print_info("Press Ctrl-C to stop");
    shutdown.cancelled().await;

    output::print_info("Shutting down...");
    watchdog.shutdown().await;
    printer.abort();

    Ok(())
}

/// Report a failed command the way the rest of the output looks
pub fn report_error(error: &str) {
    output::print_error(error);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SettingsDocument;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_clock_time() {
        assert_eq!(
            "04:30".parse::<ClockTime>().unwrap(),
            ClockTime { hour: 4, minute: 30 }
        );
        assert!("24:00".parse::<ClockTime>().is_err());
        assert!("12:60".parse::<ClockTime>().is_err());
        assert!("noon".parse::<ClockTime>().is_err());
    }

    #[test]
    fn test_day_of_week() {
        assert_eq!("sun".parse::<DayOfWeek>().unwrap(), DayOfWeek(0));
        assert_eq!("Wednesday".parse::<DayOfWeek>().unwrap(), DayOfWeek(3));
        assert_eq!("6".parse::<DayOfWeek>().unwrap(), DayOfWeek(6));
        assert!("7".parse::<DayOfWeek>().is_err());
        assert!("someday".parse::<DayOfWeek>().is_err());
    }

    #[test]
    fn test_add_args_into_record() {
        let cli = parse(&[
            "warden",
            "add",
            "worker",
            "/opt/app/worker",
            "--max-restarts",
            "3",
            "--hang-check",
            "false",
            "--restart-at",
            "04:15",
            "--restart-day",
            "mon",
            "--",
            "--port",
            "8080",
        ]);

        let Commands::Add(args) = cli.command else {
            panic!("expected add");
        };
        let record = args.into_record().unwrap();

        assert_eq!(record.arguments, vec!["--port", "8080"]);
        assert_eq!(record.overrides.max_restarts, Some(3));
        assert_eq!(record.overrides.check_for_hanging, Some(false));
        assert_eq!(record.overrides.restart_delay_secs, None);
        assert!(record.scheduled_restart.enabled);
        assert_eq!(
            record.scheduled_restart.schedule,
            RestartSchedule::weekly(1, 4, 15)
        );
    }

    #[test]
    fn test_restart_day_requires_time() {
        assert!(Cli::try_parse_from([
            "warden",
            "add",
            "worker",
            "/opt/app/worker",
            "--restart-day",
            "mon"
        ])
        .is_err());
    }

    #[test]
    fn test_settings_args_apply() {
        let cli = parse(&[
            "warden",
            "settings",
            "set",
            "--check-interval",
            "9",
            "--system-restart",
            "true",
            "--system-restart-at",
            "03:00",
        ]);
        let Commands::Settings {
            command: SettingsCommands::Set(args),
        } = cli.command
        else {
            panic!("expected settings set");
        };

        let mut settings = GlobalSettings::default();
        args.apply(&mut settings);

        assert_eq!(settings.check_interval_secs, 9);
        assert!(settings.enable_system_restart);
        assert_eq!(settings.system_restart, RestartSchedule::daily(3, 0));
        assert_eq!(settings.max_restarts, 10);
    }

    #[tokio::test]
    async fn test_offline_editing() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("warden.toml");
        let config = path.to_str().unwrap();

        parse(&["warden", "-c", config, "add", "worker", "/bin/sleep", "--", "30"])
            .execute()
            .await
            .unwrap();

        // a second add without --replace is refused
        assert!(parse(&["warden", "-c", config, "add", "Worker", "/bin/true"])
            .execute()
            .await
            .is_err());

        parse(&["warden", "-c", config, "settings", "set", "--max-restarts", "4"])
            .execute()
            .await
            .unwrap();

        let document: SettingsDocument = SettingsStore::new(&path).unwrap().load().unwrap();
        assert_eq!(document.processes.len(), 1);
        assert_eq!(document.processes[0].arguments, vec!["30"]);
        assert_eq!(document.settings.max_restarts, 4);

        parse(&["warden", "-c", config, "remove", "worker"])
            .execute()
            .await
            .unwrap();
        assert!(matches!(
            parse(&["warden", "-c", config, "remove", "worker"])
                .execute()
                .await,
            Err(WardenError::ProcessNotFound(_))
        ));
    }
}
