use crate::events::{EventBus, SupervisorEvent};
use crate::process::{wait_for_exit, ProcessDriver, ProcessRecord, ProcessRegistry};
use crate::schedule::{describe_next, due_target, FiredTargets};
use chrono::{Local, NaiveDateTime};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::{sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Timing knobs of the process scheduler
#[derive(Debug, Clone)]
pub struct ScheduleTimings {
    /// How often schedules are evaluated
    pub tick_interval: Duration,
    /// How long a killed process may take to exit
    pub kill_grace: Duration,
    /// Pause between the kill and the relaunch
    pub settle: Duration,
    /// Delay before confirming that the new instance is still alive
    pub confirm: Duration,
}

impl Default for ScheduleTimings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            kill_grace: Duration::from_secs(10),
            settle: Duration::from_secs(2),
            confirm: Duration::from_secs(1),
        }
    }
}

struct Shared {
    registry: Arc<ProcessRegistry>,
    driver: Arc<dyn ProcessDriver>,
    events: EventBus,
    timings: ScheduleTimings,
    fired: Mutex<FiredTargets>,
    ticker: Mutex<Option<CancellationToken>>,
}

/// Kills and relaunches processes at their configured calendar times.
///
/// Works off the same registry as the health engine but only ever writes
/// `last_scheduled_restart_at` and its own `scheduled_restart_active` marker,
/// which keeps health checks away from the record while it is restarted.
#[derive(Clone)]
pub struct ProcessRestartScheduler {
    shared: Arc<Shared>,
}

impl ProcessRestartScheduler {
    pub fn new(
        registry: Arc<ProcessRegistry>,
        driver: Arc<dyn ProcessDriver>,
        events: EventBus,
    ) -> Self {
        Self::with_timings(registry, driver, events, ScheduleTimings::default())
    }

    pub fn with_timings(
        registry: Arc<ProcessRegistry>,
        driver: Arc<dyn ProcessDriver>,
        events: EventBus,
        timings: ScheduleTimings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry,
                driver,
                events,
                timings,
                fired: Mutex::new(FiredTargets::new()),
                ticker: Mutex::new(None),
            }),
        }
    }

    fn ticker(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.shared
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.ticker().is_some()
    }

    /// Start the ticker. The first evaluation happens immediately.
    pub fn start(&self) {
        let mut ticker = self.ticker();
        if ticker.is_some() {
            return;
        }

        let token = CancellationToken::new();
        *ticker = Some(token.clone());
        drop(ticker);

        self.shared
            .events
            .info("Process restart scheduler started.");
        self.log_scheduled_processes();

        let scheduler = self.clone();
        let period = self.shared.timings.tick_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        scheduler.check_schedules(Local::now().naive_local());
                    }
                }
            }
        });
    }

    /// Stop the ticker. Restarts already under way run to completion.
    pub fn stop(&self) {
        let Some(token) = self.ticker().take() else {
            return;
        };
        token.cancel();
        self.shared
            .events
            .info("Process restart scheduler stopped.");
    }

    /// Evaluate every enabled schedule against `now` and spawn a restart for
    /// each one that is due and has not fired yet for this target.
    pub fn check_schedules(&self, now: NaiveDateTime) -> Vec<JoinHandle<()>> {
        let mut started = Vec::new();

        for record in self.shared.registry.snapshot() {
            if !record.scheduled_restart.enabled {
                continue;
            }

            let Some(target) = due_target(&record.scheduled_restart.schedule, now) else {
                continue;
            };

            let first = self
                .shared
                .fired
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .try_mark(&record.name, target, now);
            if !first {
                continue;
            }

            let shared = Arc::clone(&self.shared);
            started.push(tokio::spawn(async move {
                shared.execute(record.name).await;
            }));
        }

        started
    }

    /// Next restart of one process, or `None` if it is unknown
    pub fn describe_next(&self, name: &str) -> Option<String> {
        self.shared
            .registry
            .get(name)
            .map(|record| describe_record(&record, Local::now().naive_local()))
    }

    /// Summary of every process with a scheduled restart
    pub fn describe_all(&self) -> String {
        describe_scheduled(
            &self.shared.registry.snapshot(),
            Local::now().naive_local(),
        )
    }

    fn log_scheduled_processes(&self) {
        let now = Local::now().naive_local();
        let scheduled: Vec<ProcessRecord> = self
            .shared
            .registry
            .snapshot()
            .into_iter()
            .filter(|r| r.scheduled_restart.enabled)
            .collect();

        if scheduled.is_empty() {
            self.shared
                .events
                .info("No processes have scheduled restart enabled.");
            return;
        }

        self.shared.events.info(format!(
            "Found {} process(es) with scheduled restart:",
            scheduled.len()
        ));
        for record in &scheduled {
            self.shared.events.info(format!(
                "  - {}: {}",
                record.name,
                describe_record(record, now)
            ));
        }
    }
}

/// Marks a record as owned by a scheduled restart until dropped
struct ActiveRestart<'a> {
    registry: &'a ProcessRegistry,
    name: &'a str,
}

impl Drop for ActiveRestart<'_> {
    fn drop(&mut self) {
        self.registry
            .update(self.name, |r| r.scheduled_restart_active = false);
    }
}

impl Shared {
    async fn execute(&self, name: String) {
        let Some(record) = self.registry.update(&name, |r| {
            r.scheduled_restart_active = true;
            r.clone()
        }) else {
            return;
        };
        let _active = ActiveRestart {
            registry: &self.registry,
            name: &record.name,
        };

        self.events
            .info(format!("=== SCHEDULED RESTART: {} ===", record.name));
        self.events.info(format!(
            "Scheduled restart time reached: {}",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        ));

        match self.driver.find_by_image_name(&record.image_name()) {
            Some(live) => {
                self.events.info(format!(
                    "Terminating current process: {} (PID: {})",
                    record.name, live.pid
                ));

                match self.driver.kill(live.pid) {
                    Ok(()) => {
                        let grace = self.timings.kill_grace;
                        if wait_for_exit(self.driver.as_ref(), live.pid, grace).await {
                            self.events.info(format!(
                                "Process {} terminated successfully",
                                record.name
                            ));
                        } else {
                            self.events.warn(format!(
                                "Process {} did not exit within {} seconds",
                                record.name,
                                grace.as_secs()
                            ));
                        }
                    }
                    Err(e) => self.events.error(format!(
                        "Error terminating process {}: {}",
                        record.name, e
                    )),
                }
            }
            None => self.events.info(format!(
                "Process {} is not currently running",
                record.name
            )),
        }

        sleep(self.timings.settle).await;

        match self.relaunch(&record).await {
            Some(pid) => {
                self.registry.update(&record.name, |r| {
                    r.last_scheduled_restart_at = Some(SystemTime::now());
                });

                self.events.info(format!(
                    "Scheduled restart completed successfully: {}",
                    record.name
                ));
                self.events.emit(SupervisorEvent::ScheduledRestartCompleted {
                    name: record.name.clone(),
                    pid,
                });
                self.events.info(format!(
                    "Next scheduled restart for {}: {}",
                    record.name,
                    describe_record(&record, Local::now().naive_local())
                ));
            }
            None => self
                .events
                .error(format!("Scheduled restart failed: {}", record.name)),
        }
    }

    /// Launch a new instance and make sure it survives its first moments
    async fn relaunch(&self, record: &ProcessRecord) -> Option<u32> {
        self.events
            .info(format!("Starting process: {}", record.name));

        let pid = match self.driver.launch(record) {
            Ok(pid) => pid,
            Err(e) => {
                self.events.error(format!(
                    "Error starting process {}: {}",
                    record.name, e
                ));
                return None;
            }
        };

        sleep(self.timings.confirm).await;

        if !self.driver.is_alive(pid) {
            self.events.error(format!(
                "Process {} started but exited immediately",
                record.name
            ));
            return None;
        }

        self.events.info(format!(
            "Process started successfully: {} (PID: {})",
            record.name, pid
        ));
        Some(pid)
    }
}

/// Next restart of one record, or a note that its schedule is off
pub fn describe_record(record: &ProcessRecord, now: NaiveDateTime) -> String {
    if !record.scheduled_restart.enabled {
        return "Scheduled restart is disabled".to_string();
    }
    describe_next(&record.scheduled_restart.schedule, now)
}

/// One line per process with a scheduled restart
pub fn describe_scheduled(records: &[ProcessRecord], now: NaiveDateTime) -> String {
    let scheduled: Vec<&ProcessRecord> = records
        .iter()
        .filter(|r| r.scheduled_restart.enabled)
        .collect();

    if scheduled.is_empty() {
        return "No processes have scheduled restart enabled.".to_string();
    }

    let mut info = format!("Scheduled restarts ({} processes):", scheduled.len());
    for record in scheduled {
        info.push_str(&format!(
            "\n• {}: {}",
            record.name,
            describe_record(record, now)
        ));
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RestartSchedule;
    use crate::process::testing::ScriptedDriver;
    use chrono::NaiveDate;

    fn fast_timings() -> ScheduleTimings {
        ScheduleTimings {
            tick_interval: Duration::from_secs(60),
            kill_grace: Duration::from_millis(300),
            settle: Duration::ZERO,
            confirm: Duration::ZERO,
        }
    }

    fn sunday(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 10)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn scheduled(name: &str, schedule: RestartSchedule) -> ProcessRecord {
        let mut record = ProcessRecord::new(name, format!("/opt/app/{}", name));
        record.scheduled_restart.enabled = true;
        record.scheduled_restart.schedule = schedule;
        record
    }

    fn setup() -> (
        Arc<ProcessRegistry>,
        Arc<ScriptedDriver>,
        ProcessRestartScheduler,
    ) {
        let registry = Arc::new(ProcessRegistry::new());
        let driver = Arc::new(ScriptedDriver::new());
        let scheduler = ProcessRestartScheduler::with_timings(
            registry.clone(),
            driver.clone(),
            EventBus::new(),
            fast_timings(),
        );
        (registry, driver, scheduler)
    }

    async fn join_all(handles: Vec<JoinHandle<()>>) -> usize {
        let count = handles.len();
        for handle in handles {
            handle.await.unwrap();
        }
        count
    }

    #[tokio::test]
    async fn test_due_schedule_kills_and_relaunches() {
        let (registry, driver, scheduler) = setup();
        let old_pid = driver.start_external("worker");
        let mut record = scheduled("worker", RestartSchedule::daily(23, 30));
        record.restart_count = 4;
        registry.insert(record);
        let mut rx = scheduler.shared.events.subscribe();

        let fired = join_all(scheduler.check_schedules(sunday(23, 30, 10))).await;

        assert_eq!(fired, 1);
        assert_eq!(driver.kills(), vec![old_pid]);
        assert_eq!(driver.launch_count("worker"), 1);

        let record = registry.get("worker").unwrap();
        assert!(record.last_scheduled_restart_at.is_some());
        // the health engine's bookkeeping is untouched
        assert_eq!(record.restart_count, 4);
        assert!(!record.scheduled_restart_active);

        let mut completed = false;
        while let Ok(event) = rx.try_recv() {
            if let SupervisorEvent::ScheduledRestartCompleted { name, pid } = event {
                assert_eq!(name, "worker");
                assert_ne!(pid, old_pid);
                completed = true;
            }
        }
        assert!(completed);
    }

    #[tokio::test]
    async fn test_fires_once_per_target_minute() {
        let (registry, driver, scheduler) = setup();
        registry.insert(scheduled("worker", RestartSchedule::daily(23, 30)));

        assert_eq!(
            join_all(scheduler.check_schedules(sunday(23, 29, 30))).await,
            1
        );
        assert_eq!(
            join_all(scheduler.check_schedules(sunday(23, 30, 29))).await,
            0
        );
        assert_eq!(driver.launch_count("worker"), 1);
    }

    #[tokio::test]
    async fn test_not_due_outside_window_or_when_disabled() {
        let (registry, driver, scheduler) = setup();
        registry.insert(scheduled("worker", RestartSchedule::daily(23, 30)));
        let mut off = scheduled("idle", RestartSchedule::daily(23, 30));
        off.scheduled_restart.enabled = false;
        registry.insert(off);

        assert!(scheduler.check_schedules(sunday(22, 0, 0)).is_empty());
        join_all(scheduler.check_schedules(sunday(23, 30, 0))).await;

        assert_eq!(driver.launch_count("worker"), 1);
        assert_eq!(driver.launch_count("idle"), 0);
    }

    #[tokio::test]
    async fn test_weekly_schedule_ignores_other_days() {
        let (registry, _driver, scheduler) = setup();
        registry.insert(scheduled("worker", RestartSchedule::weekly(3, 23, 30)));

        assert!(scheduler.check_schedules(sunday(23, 30, 0)).is_empty());
    }

    #[tokio::test]
    async fn test_process_not_running_is_still_launched() {
        let (registry, driver, scheduler) = setup();
        registry.insert(scheduled("worker", RestartSchedule::daily(23, 30)));

        join_all(scheduler.check_schedules(sunday(23, 30, 0))).await;

        assert!(driver.kills().is_empty());
        assert_eq!(driver.launch_count("worker"), 1);
    }

    #[tokio::test]
    async fn test_immediate_exit_is_a_failure() {
        let (registry, driver, scheduler) = setup();
        driver.exit_on_launch("worker");
        registry.insert(scheduled("worker", RestartSchedule::daily(23, 30)));

        join_all(scheduler.check_schedules(sunday(23, 30, 0))).await;

        assert_eq!(driver.launch_count("worker"), 1);
        let record = registry.get("worker").unwrap();
        assert!(record.last_scheduled_restart_at.is_none());
        // released on failure too
        assert!(!record.scheduled_restart_active);
    }

    #[tokio::test]
    async fn test_stubborn_process_still_relaunched() {
        let (registry, driver, scheduler) = setup();
        let pid = driver.start_external("worker");
        driver.ignore_kill(pid);
        registry.insert(scheduled("worker", RestartSchedule::daily(23, 30)));

        join_all(scheduler.check_schedules(sunday(23, 30, 0))).await;

        assert_eq!(driver.kills(), vec![pid]);
        assert_eq!(driver.launch_count("worker"), 1);
    }

    #[test]
    fn test_describe_scheduled() {
        let now = sunday(21, 15, 0);
        let mut off = ProcessRecord::new("idle", "/opt/app/idle");
        off.scheduled_restart.enabled = false;

        assert_eq!(
            describe_scheduled(&[off.clone()], now),
            "No processes have scheduled restart enabled."
        );
        assert_eq!(describe_record(&off, now), "Scheduled restart is disabled");

        let records = vec![off, scheduled("worker", RestartSchedule::daily(23, 30))];
        assert_eq!(
            describe_scheduled(&records, now),
            "Scheduled restarts (1 processes):\n• worker: 2024-03-10 23:30:00 (Daily) - in 0d 2h 15m"
        );
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let (_registry, _driver, scheduler) = setup();

        scheduler.start();
        scheduler.start();
        assert!(scheduler.is_running());

        scheduler.stop();
        scheduler.stop();
        assert!(!scheduler.is_running());
    }
}
