use crate::config::{Frequency, GlobalSettings};
use crate::error::{Result, WardenError};
use crate::events::EventBus;
use crate::schedule::{describe_next, due_target, weekday, FiredTargets};
use chrono::{Local, NaiveDateTime};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Dedup key of the host schedule
const HOST_KEY: &str = "system";

/// Seam over the operating system's reboot facility
pub trait HostRebooter: Send + Sync + 'static {
    fn reboot(&self) -> Result<()>;
}

/// Reboots the machine with the platform `shutdown` command
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRebooter;

impl SystemRebooter {
    fn command() -> Command {
        let mut command = Command::new("shutdown");

        #[cfg(windows)]
        command.args(["/r", "/t", "0", "/c", "Scheduled restart by warden"]);

        #[cfg(not(windows))]
        command.args(["-r", "now"]);

        command
    }
}

impl HostRebooter for SystemRebooter {
    fn reboot(&self) -> Result<()> {
        let status = Self::command()
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| {
                WardenError::HostRestartError(format!("failed to run shutdown: {}", e))
            })?;

        if !status.success() {
            return Err(WardenError::HostRestartError(format!(
                "shutdown exited with {}",
                status
            )));
        }
        Ok(())
    }
}

/// Timing knobs of the host scheduler
#[derive(Debug, Clone)]
pub struct HostTimings {
    pub tick_interval: Duration,
    /// Seconds announced before the reboot
    pub countdown_secs: u32,
    /// Real time between two countdown lines
    pub countdown_step: Duration,
}

impl Default for HostTimings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            countdown_secs: 10,
            countdown_step: Duration::from_secs(1),
        }
    }
}

#[derive(Default)]
struct Lifecycle {
    running: bool,
    ticker: Option<CancellationToken>,
}

struct Shared {
    settings: Mutex<GlobalSettings>,
    rebooter: Arc<dyn HostRebooter>,
    events: EventBus,
    timings: HostTimings,
    fired: Mutex<FiredTargets>,
    lifecycle: Mutex<Lifecycle>,
}

/// Reboots the host at the globally configured calendar time
#[derive(Clone)]
pub struct HostRestartScheduler {
    shared: Arc<Shared>,
}

impl HostRestartScheduler {
    pub fn new(
        settings: GlobalSettings,
        rebooter: Arc<dyn HostRebooter>,
        events: EventBus,
    ) -> Self {
        Self::with_timings(settings, rebooter, events, HostTimings::default())
    }

    pub fn with_timings(
        settings: GlobalSettings,
        rebooter: Arc<dyn HostRebooter>,
        events: EventBus,
        timings: HostTimings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                settings: Mutex::new(settings),
                rebooter,
                events,
                timings,
                fired: Mutex::new(FiredTargets::new()),
                lifecycle: Mutex::new(Lifecycle::default()),
            }),
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.shared
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn settings(&self) -> GlobalSettings {
        self.shared.settings_snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle().running
    }

    /// Whether the minute ticker is active, i.e. running with host restarts enabled
    pub fn is_armed(&self) -> bool {
        self.lifecycle().ticker.is_some()
    }

    pub fn start(&self) {
        let mut lifecycle = self.lifecycle();
        self.start_locked(&mut lifecycle);
    }

    pub fn stop(&self) {
        let mut lifecycle = self.lifecycle();
        self.stop_locked(&mut lifecycle);
    }

    /// Swap in new settings; a running scheduler is restarted with them
    pub fn update_settings(&self, settings: GlobalSettings) {
        let mut lifecycle = self.lifecycle();

        *self
            .shared
            .settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = settings;
        self.shared
            .events
            .info("System restart settings updated.");

        if lifecycle.running {
            self.stop_locked(&mut lifecycle);
            self.start_locked(&mut lifecycle);
        }
    }

    fn start_locked(&self, lifecycle: &mut Lifecycle) {
        if lifecycle.running {
            return;
        }
        lifecycle.running = true;

        let settings = self.shared.settings_snapshot();
        if !settings.enable_system_restart {
            self.shared.events.info("System restart is disabled.");
            return;
        }

        let schedule = &settings.system_restart;
        self.shared.events.info(format!(
            "System restart scheduler started. Type: {}, Time: {:02}:{:02}",
            schedule.frequency, schedule.hour, schedule.minute
        ));
        if schedule.frequency == Frequency::Weekly {
            if let Some(day) = weekday(schedule.day_of_week) {
                self.shared
                    .events
                    .info(format!("Weekly restart day: {}", day));
            }
        }

        let token = CancellationToken::new();
        lifecycle.ticker = Some(token.clone());

        let scheduler = self.clone();
        let period = self.shared.timings.tick_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        scheduler.check_restart_time(Local::now().naive_local());
                    }
                }
            }
        });
    }

    fn stop_locked(&self, lifecycle: &mut Lifecycle) {
        if !lifecycle.running {
            return;
        }
        lifecycle.running = false;

        if let Some(token) = lifecycle.ticker.take() {
            token.cancel();
        }
        self.shared
            .events
            .info("System restart scheduler stopped.");
    }

    /// Fire the reboot if the schedule is due at `now` and has not fired
    /// for this target yet
    pub fn check_restart_time(&self, now: NaiveDateTime) -> Option<JoinHandle<()>> {
        let settings = self.shared.settings_snapshot();
        if !settings.enable_system_restart {
            return None;
        }

        let target = due_target(&settings.system_restart, now)?;

        let first = self
            .shared
            .fired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_mark(HOST_KEY, target, now);
        if !first {
            return None;
        }

        let shared = Arc::clone(&self.shared);
        Some(tokio::spawn(async move { shared.execute().await }))
    }

    /// Next host restart, or a note that host restarts are off
    pub fn describe_next(&self) -> String {
        describe_host(&self.shared.settings_snapshot(), Local::now().naive_local())
    }
}

impl Shared {
    fn settings_snapshot(&self) -> GlobalSettings {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn execute(&self) {
        self.events.warn("=== SYSTEM RESTART INITIATED ===");
        self.events.info(format!(
            "Scheduled restart time reached: {}",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        ));

        for remaining in (1..=self.timings.countdown_secs).rev() {
            self.events
                .warn(format!("System will restart in {} seconds...", remaining));
            sleep(self.timings.countdown_step).await;
        }

        self.events.info("Executing system restart now.");

        let rebooter = Arc::clone(&self.rebooter);
        let outcome = match tokio::task::spawn_blocking(move || rebooter.reboot()).await {
            Ok(result) => result,
            Err(e) => Err(WardenError::Internal(format!("reboot task failed: {}", e))),
        };

        if let Err(e) = outcome {
            self.events
                .error(format!("Failed to execute system restart: {}", e));
            self.events.error(
                "Please check if the program has sufficient privileges to restart the system.",
            );
        }
    }
}

/// Next host restart for `settings`
pub fn describe_host(settings: &GlobalSettings, now: NaiveDateTime) -> String {
    if !settings.enable_system_restart {
        return "System restart is disabled.".to_string();
    }
    format!(
        "Next system restart: {}",
        describe_next(&settings.system_restart, now)
    )
}
