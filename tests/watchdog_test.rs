// Integration tests for the assembled watchdog: health engine, scheduled
// restarts and persistence working off one registry

use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use warden::config::{GlobalSettings, RestartSchedule};
use warden::events::SupervisorEvent;
use warden::process::testing::ScriptedDriver;
use warden::process::{ProcessRecord, SupervisorConfig};
use warden::schedule::{HostRebooter, HostTimings, ScheduleTimings};
use warden::state::{SettingsDocument, SettingsStore};
use warden::{Result, Watchdog, WatchdogTimings};

struct NoReboot;

impl HostRebooter for NoReboot {
    fn reboot(&self) -> Result<()> {
        Ok(())
    }
}

fn fast_timings() -> WatchdogTimings {
    WatchdogTimings {
        supervisor: SupervisorConfig {
            tick_interval: Duration::from_millis(20),
            drain_timeout: Duration::from_secs(3),
            hang_kill_wait: Duration::ZERO,
        },
        schedule: ScheduleTimings {
            tick_interval: Duration::from_secs(60),
            kill_grace: Duration::from_millis(200),
            settle: Duration::ZERO,
            confirm: Duration::ZERO,
        },
        host: HostTimings {
            tick_interval: Duration::from_secs(60),
            countdown_secs: 0,
            countdown_step: Duration::ZERO,
        },
    }
}

fn document(processes: Vec<ProcessRecord>) -> SettingsDocument {
    let settings = GlobalSettings {
        check_interval_secs: 1,
        restart_delay_secs: 0,
        ..GlobalSettings::default()
    };
    SettingsDocument::new(settings, processes)
}

fn create_watchdog(
    processes: Vec<ProcessRecord>,
    driver: &Arc<ScriptedDriver>,
    store: Option<SettingsStore>,
) -> Watchdog {
    Watchdog::with_parts(
        document(processes),
        driver.clone(),
        Arc::new(NoReboot),
        store,
        fast_timings(),
    )
}

fn drain(rx: &mut broadcast::Receiver<SupervisorEvent>) -> Vec<SupervisorEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_restart_budget_runs_out_then_reset_revives() {
    let driver = Arc::new(ScriptedDriver::new());
    let mut record = ProcessRecord::new("worker", "/opt/app/worker");
    record.overrides.max_restarts = Some(2);

    let watchdog = create_watchdog(vec![record], &driver, None);
    let mut rx = watchdog.subscribe();

    watchdog.supervisor().tick().await;
    driver.crash("worker");
    watchdog.supervisor().tick().await;
    driver.crash("worker");
    watchdog.supervisor().tick().await;

    let restarts = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, SupervisorEvent::Restarted { .. }))
        .count();
    assert_eq!(restarts, 2);
    assert_eq!(driver.launch_count("worker"), 2);

    let record = watchdog.supervisor().process("worker").unwrap();
    assert!(!record.auto_restart_enabled);
    assert!(!record.is_running);
    assert_eq!(record.restart_count, 2);

    // budget exhausted: further passes leave it alone
    watchdog.supervisor().tick().await;
    assert_eq!(driver.launch_count("worker"), 2);

    watchdog.reset_process("worker").unwrap();
    watchdog.supervisor().tick().await;
    assert_eq!(driver.launch_count("worker"), 3);
    assert_eq!(
        watchdog.supervisor().process("worker").unwrap().restart_count,
        1
    );
}

#[tokio::test]
async fn test_already_running_process_is_adopted() {
    let driver = Arc::new(ScriptedDriver::new());
    let pid = driver.start_external("worker");

    let watchdog = create_watchdog(
        vec![ProcessRecord::new("worker", "/opt/app/worker")],
        &driver,
        None,
    );
    watchdog.supervisor().tick().await;

    let record = watchdog.supervisor().process("worker").unwrap();
    assert!(record.is_running);
    assert_eq!(record.pid, Some(pid));
    assert_eq!(record.restart_count, 0);
    assert!(driver.launches().is_empty());
}

#[tokio::test]
async fn test_scheduled_restart_relaunches_once_per_target() {
    let driver = Arc::new(ScriptedDriver::new());
    let old_pid = driver.start_external("worker");

    let mut record = ProcessRecord::new("worker", "/opt/app/worker");
    record.scheduled_restart.enabled = true;
    record.scheduled_restart.schedule = RestartSchedule::daily(4, 0);

    let watchdog = create_watchdog(vec![record], &driver, None);
    let mut rx = watchdog.subscribe();
    let now = NaiveDate::from_ymd_opt(2024, 3, 10)
        .unwrap()
        .and_hms_opt(4, 0, 30)
        .unwrap();

    let handles = watchdog.process_scheduler().check_schedules(now);
    assert_eq!(handles.len(), 1);
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(driver.kills(), vec![old_pid]);
    assert_eq!(driver.launch_count("worker"), 1);

    let new_pid = driver.pids("worker")[0];
    assert!(drain(&mut rx).iter().any(|e| matches!(
        e,
        SupervisorEvent::ScheduledRestartCompleted { name, pid } if name == "worker" && *pid == new_pid
    )));

    let record = watchdog.supervisor().process("worker").unwrap();
    assert!(record.last_scheduled_restart_at.is_some());
    assert_eq!(record.restart_count, 0);

    // same target minute, a little later
    let later = now + chrono::Duration::seconds(20);
    assert!(watchdog.process_scheduler().check_schedules(later).is_empty());
}

#[tokio::test]
async fn test_state_survives_shutdown_and_reload() {
    let temp_dir = TempDir::new().unwrap();
    let store = SettingsStore::new(temp_dir.path().join("warden.toml")).unwrap();
    let driver = Arc::new(ScriptedDriver::new());

    let mut record = ProcessRecord::new("worker", "/opt/app/worker");
    record.arguments = vec!["--port".to_string(), "8080".to_string()];
    record.scheduled_restart.enabled = true;
    record.scheduled_restart.schedule = RestartSchedule::weekly(0, 4, 0);

    let watchdog = create_watchdog(vec![record], &driver, Some(store.clone()));
    watchdog.supervisor().tick().await;

    let settings = GlobalSettings {
        max_restarts: 7,
        ..watchdog.settings()
    };
    watchdog.update_settings(settings).unwrap();
    watchdog.shutdown().await;

    let reloaded = Watchdog::load(store).unwrap();
    assert!(!reloaded.is_running());
    assert_eq!(reloaded.settings().max_restarts, 7);

    let record = reloaded.supervisor().process("worker").unwrap();
    assert_eq!(record.arguments, vec!["--port", "8080"]);
    assert_eq!(
        record.scheduled_restart.schedule,
        RestartSchedule::weekly(0, 4, 0)
    );
    assert!(record.last_restart_at.is_some());
    // runtime state is rediscovered, not trusted from disk
    assert!(!record.is_running);
    assert_eq!(record.pid, None);
    // settings changes keep the restart budget
    assert_eq!(record.restart_count, 1);
}

#[tokio::test]
async fn test_start_and_stop_every_engine() {
    let driver = Arc::new(ScriptedDriver::new());
    let watchdog = create_watchdog(
        vec![ProcessRecord::new("worker", "/opt/app/worker")],
        &driver,
        None,
    );

    watchdog.start().await;
    assert!(watchdog.is_running());
    assert!(watchdog.process_scheduler().is_running());
    assert!(watchdog.host_scheduler().is_running());
    assert!(!watchdog.host_scheduler().is_armed());

    tokio::time::timeout(Duration::from_secs(2), async {
        while driver.launch_count("worker") == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    watchdog.stop().await;
    assert!(!watchdog.is_running());
    assert!(!watchdog.process_scheduler().is_running());
    assert!(!watchdog.host_scheduler().is_running());
}

#[tokio::test(start_paused = true)]
async fn test_health_pass_during_scheduled_restart_keeps_one_instance() {
    let driver = Arc::new(ScriptedDriver::new());
    driver.start_external("worker");

    let mut record = ProcessRecord::new("worker", "/opt/app/worker");
    record.scheduled_restart.enabled = true;
    record.scheduled_restart.schedule = RestartSchedule::daily(4, 0);

    let mut timings = fast_timings();
    timings.schedule.settle = Duration::from_secs(2);
    let watchdog = Watchdog::with_parts(
        document(vec![record]),
        driver.clone(),
        Arc::new(NoReboot),
        None,
        timings,
    );
    let now = NaiveDate::from_ymd_opt(2024, 3, 10)
        .unwrap()
        .and_hms_opt(4, 0, 0)
        .unwrap();

    let handles = watchdog.process_scheduler().check_schedules(now);
    // the old instance is gone and the scheduler is settling
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(driver.pids("worker").is_empty());
    watchdog.supervisor().tick().await;

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(driver.launch_count("worker"), 1);
    let pids = driver.pids("worker");
    assert_eq!(pids.len(), 1);

    // the next pass adopts the scheduler's instance without spending budget
    watchdog.supervisor().tick().await;
    let record = watchdog.supervisor().process("worker").unwrap();
    assert!(record.is_running);
    assert_eq!(record.pid, Some(pids[0]));
    assert_eq!(record.restart_count, 0);
    assert!(!record.scheduled_restart_active);
}

#[tokio::test]
async fn test_shutdown_keeps_edits_made_while_running() {
    let temp_dir = TempDir::new().unwrap();
    let store = SettingsStore::new(temp_dir.path().join("warden.json")).unwrap();
    let driver = Arc::new(ScriptedDriver::new());

    let running = create_watchdog(
        vec![ProcessRecord::new("worker", "/opt/app/worker")],
        &driver,
        Some(store.clone()),
    );
    store.save(&running.supervisor().document()).unwrap();
    running.supervisor().tick().await;

    // a second invocation edits the file meanwhile
    let editor = Watchdog::load(store.clone()).unwrap();
    editor
        .add_process(ProcessRecord::new("added", "/opt/app/added"))
        .unwrap();
    let settings = GlobalSettings {
        max_restarts: 4,
        ..editor.settings()
    };
    editor.update_settings(settings).unwrap();
    editor.supervisor().save().unwrap();

    running.shutdown().await;

    let saved = store.load().unwrap();
    let names: Vec<&str> = saved.processes.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["worker", "added"]);
    assert_eq!(saved.settings.max_restarts, 4);
    // the running instance's bookkeeping still lands
    assert_eq!(saved.processes[0].restart_count, 1);
    assert!(saved.processes[0].last_restart_at.is_some());
}
