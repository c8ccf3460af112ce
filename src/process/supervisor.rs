use crate::cancel::sleep_or_cancel;
use crate::config::GlobalSettings;
use crate::error::{Result, WardenError};
use crate::events::{EventBus, SupervisorEvent};
use crate::process::driver::ProcessDriver;
use crate::process::registry::ProcessRegistry;
use crate::process::restart::{EffectivePolicy, RestartDecision};
use crate::process::types::{ProcessRecord, ProcessStatus};
use crate::state::{SettingsDocument, SettingsStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime};
use tokio::sync::{broadcast, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Period of the monitoring timer. Check intervals are counted in ticks.
    pub tick_interval: Duration,
    /// How long `stop` waits for in-flight work before abandoning it
    pub drain_timeout: Duration,
    /// Pause after killing an unresponsive process
    pub hang_kill_wait: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(3),
            hang_kill_wait: Duration::from_secs(1),
        }
    }
}

/// Builder for [`Supervisor`]
pub struct SupervisorBuilder {
    driver: Arc<dyn ProcessDriver>,
    config: SupervisorConfig,
    events: EventBus,
    store: Option<SettingsStore>,
    document: SettingsDocument,
}

impl SupervisorBuilder {
    pub fn config(mut self, config: SupervisorConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an event bus with other components
    pub fn events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Persist settings and the process list to `store` on every change
    pub fn store(mut self, store: SettingsStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Initial settings and processes
    pub fn document(mut self, document: SettingsDocument) -> Self {
        self.document = document;
        self
    }

    pub fn build(self) -> Supervisor {
        let registry = Arc::new(ProcessRegistry::new());
        registry.replace_all(self.document.processes);

        Supervisor {
            shared: Arc::new(Shared {
                config: self.config,
                registry,
                settings: RwLock::new(self.document.settings),
                driver: self.driver,
                events: self.events,
                store: self.store,
                lifecycle: Mutex::new(Lifecycle::default()),
                running: AtomicBool::new(false),
                pass_active: AtomicBool::new(false),
                token: RwLock::new(CancellationToken::new()),
            }),
        }
    }
}

#[derive(Default)]
struct Lifecycle {
    started_once: bool,
    monitor: Option<JoinHandle<()>>,
}

struct Shared {
    config: SupervisorConfig,
    registry: Arc<ProcessRegistry>,
    settings: RwLock<GlobalSettings>,
    driver: Arc<dyn ProcessDriver>,
    events: EventBus,
    store: Option<SettingsStore>,
    lifecycle: Mutex<Lifecycle>,
    running: AtomicBool,
    /// Set while a monitoring pass is in flight; overlapping ticks are skipped
    pass_active: AtomicBool,
    /// Token of the current run. Replaced on every start.
    token: RwLock<CancellationToken>,
}

/// Outcome of reserving a record for a launch
enum Claim {
    Granted(ProcessRecord),
    Busy,
    Disabled,
    BudgetUsed,
}

/// Clears the in-flight flag when a pass ends, even if it is aborted
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Health and restart engine.
///
/// Cheap to clone; clones share the same registry, settings and lifecycle.
#[derive(Clone)]
pub struct Supervisor {
    shared: Arc<Shared>,
}

impl Supervisor {
    pub fn builder(driver: Arc<dyn ProcessDriver>) -> SupervisorBuilder {
        SupervisorBuilder {
            driver,
            config: SupervisorConfig::default(),
            events: EventBus::new(),
            store: None,
            document: SettingsDocument::default(),
        }
    }

    /// Create a supervisor with default settings and no persistence
    pub fn new(driver: Arc<dyn ProcessDriver>) -> Self {
        Self::builder(driver).build()
    }

    pub fn registry(&self) -> Arc<ProcessRegistry> {
        Arc::clone(&self.shared.registry)
    }

    pub fn driver(&self) -> Arc<dyn ProcessDriver> {
        Arc::clone(&self.shared.driver)
    }

    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.shared.events.subscribe()
    }

    /// Snapshot of the global settings
    pub fn settings(&self) -> GlobalSettings {
        self.shared.settings_snapshot()
    }

    /// Snapshot of every record, in insertion order
    pub fn processes(&self) -> Vec<ProcessRecord> {
        self.shared.registry.snapshot()
    }

    pub fn process(&self, name: &str) -> Option<ProcessRecord> {
        self.shared.registry.get(name)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Add a process, overwriting any record with the same name.
    ///
    /// When monitoring is active the process is checked straight away and
    /// launched if it is not running.
    pub fn add_process(&self, mut record: ProcessRecord) -> Result<()> {
        record.validate()?;
        record.check_counter = 0;

        let settings = self.shared.settings_snapshot();
        let policy = EffectivePolicy::resolve(&record, &settings);

        self.shared.registry.insert(record.clone());
        self.shared.events.info(format!(
            "Process added: {} (Check interval: {}s)",
            record.name, policy.check_interval_secs
        ));
        self.shared.persist();

        if self.is_running() {
            let shared = Arc::clone(&self.shared);
            let token = self.shared.current_token();
            tokio::spawn(async move {
                shared.check_and_start(record, &token).await;
            });
        }

        Ok(())
    }

    /// Remove a process by name. Returns whether it was present.
    pub fn remove_process(&self, name: &str) -> bool {
        match self.shared.registry.remove(name) {
            Some(record) => {
                self.shared
                    .events
                    .info(format!("Process removed: {}", record.name));
                self.shared.persist();
                true
            }
            None => false,
        }
    }

    /// Clear a process's restart count and turn auto restart back on
    pub fn reset_process(&self, name: &str) -> Result<()> {
        self.shared
            .registry
            .update(name, ProcessRecord::reset_restart_budget)
            .ok_or_else(|| WardenError::ProcessNotFound(name.to_string()))?;

        self.shared
            .events
            .info(format!("Restart budget reset: {}", name));
        self.shared.persist();
        Ok(())
    }

    /// Replace the global settings. Check counters restart from zero.
    pub fn update_settings(&self, settings: GlobalSettings) -> Result<()> {
        settings.validate()?;

        *self
            .shared
            .settings
            .write()
            .unwrap_or_else(PoisonError::into_inner) = settings;

        self.shared.registry.update_all(|record| record.check_counter = 0);
        self.shared.events.info("Settings have been updated.");
        self.shared.persist();
        Ok(())
    }

    /// Start monitoring. Returns immediately; a no-op when already running.
    ///
    /// The global boot delay is waited once, before the first pass after the
    /// supervisor was created.
    pub async fn start(&self) {
        let mut lifecycle = self.shared.lifecycle.lock().await;
        if self.is_running() {
            return;
        }

        let token = CancellationToken::new();
        *self
            .shared
            .token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = token.clone();

        let settings = self.shared.settings_snapshot();
        let boot_delay = if !lifecycle.started_once && settings.boot_delay_secs > 0 {
            Some(settings.boot_delay())
        } else {
            None
        };
        lifecycle.started_once = true;

        self.shared.running.store(true, Ordering::Release);
        self.shared.events.info("Watchdog service has been started.");

        let shared = Arc::clone(&self.shared);
        lifecycle.monitor = Some(tokio::spawn(async move {
            monitor_loop(shared, token, boot_delay).await;
        }));
    }

    /// Stop monitoring, waiting a bounded time for in-flight passes
    pub async fn stop(&self) {
        let mut lifecycle = self.shared.lifecycle.lock().await;
        if !self.is_running() {
            return;
        }

        self.shared.running.store(false, Ordering::Release);
        self.shared.current_token().cancel();

        if let Some(mut handle) = lifecycle.monitor.take() {
            match tokio::time::timeout(self.shared.config.drain_timeout, &mut handle).await {
                Ok(Ok(())) => self.shared.events.info("Monitoring tasks completed."),
                Ok(Err(e)) => self
                    .shared
                    .events
                    .warn(format!("Monitoring task ended abnormally: {}", e)),
                Err(_) => {
                    self.shared
                        .events
                        .warn("Monitoring tasks did not complete in time.");
                    handle.abort();
                }
            }
        }

        self.shared.events.info("Watchdog service has been stopped.");
    }

    /// Run a single monitoring pass outside the timer
    pub async fn tick(&self) {
        let token = self.shared.current_token();
        self.shared.run_pass(&token).await;
    }

    /// Current settings and processes as a persistable document
    pub fn document(&self) -> SettingsDocument {
        self.shared.document()
    }

    /// Write the current document to the configured store, if any
    pub fn save(&self) -> Result<()> {
        match &self.shared.store {
            Some(store) => store.save(&self.shared.document()),
            None => Ok(()),
        }
    }

    /// Write back only the restart bookkeeping, on top of whatever the store
    /// holds now, so edits made to the file while running survive.
    ///
    /// Without a file yet the whole document is written.
    pub fn save_runtime(&self) -> Result<()> {
        let Some(store) = &self.shared.store else {
            return Ok(());
        };
        if !store.path().exists() {
            return store.save(&self.shared.document());
        }

        let mut document = store.load()?;
        document.merge_runtime(&self.shared.registry.snapshot());
        store.save(&document)
    }
}

async fn monitor_loop(
    shared: Arc<Shared>,
    token: CancellationToken,
    boot_delay: Option<Duration>,
) {
    if let Some(delay) = boot_delay {
        shared.events.info(format!(
            "Initial boot delay: waiting {} seconds...",
            delay.as_secs()
        ));
        if !sleep_or_cancel(delay, &token).await {
            return;
        }
    }

    shared.events.info("Process monitoring has been started.");

    let mut interval = tokio::time::interval(shared.config.tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => shared.run_pass(&token).await,
        }
    }

    debug!("Monitoring loop exited");
}

impl Shared {
    fn settings_snapshot(&self) -> GlobalSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn current_token(&self) -> CancellationToken {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn document(&self) -> SettingsDocument {
        SettingsDocument::new(self.settings_snapshot(), self.registry.snapshot())
    }

    fn persist(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&self.document()) {
                self.events.error(format!("Settings save failed: {}", e));
            }
        }
    }

    /// One monitoring pass: advance check counters, then evaluate every due
    /// process concurrently and wait for all of them.
    async fn run_pass(self: &Arc<Self>, token: &CancellationToken) {
        if self.pass_active.swap(true, Ordering::AcqRel) {
            debug!("Previous monitoring pass still running, skipping tick");
            return;
        }
        let _guard = PassGuard(&self.pass_active);

        if token.is_cancelled() {
            return;
        }

        let settings = self.settings_snapshot();
        let due = self.registry.collect_due(&settings);
        if due.is_empty() {
            return;
        }

        let mut tasks = JoinSet::new();
        for record in due {
            let shared = Arc::clone(self);
            let token = token.clone();
            let settings = settings.clone();
            tasks.spawn(async move { shared.evaluate(record, &settings, &token).await });
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                self.events
                    .error(format!("Error during monitoring: {}", e));
            }
        }
    }

    async fn evaluate(
        &self,
        record: ProcessRecord,
        settings: &GlobalSettings,
        token: &CancellationToken,
    ) {
        if let Err(e) = self.check_process(&record, settings, token).await {
            self.events.error(format!(
                "Error checking process status: {} - {}",
                record.name, e
            ));
        }
    }

    async fn check_process(
        &self,
        record: &ProcessRecord,
        settings: &GlobalSettings,
        token: &CancellationToken,
    ) -> Result<()> {
        if token.is_cancelled() {
            return Ok(());
        }

        if self.registry.get(&record.name).is_some_and(|r| r.is_busy()) {
            debug!("Restart of {} in progress, skipping its check", record.name);
            return Ok(());
        }

        let policy = EffectivePolicy::resolve(record, settings);
        let mut live = self.driver.find_by_image_name(&record.image_name());

        if let Some(process) = live.filter(|p| policy.check_for_hanging && p.is_hanging()) {
            self.events.warn(format!(
                "Process is not responding: {} (PID: {})",
                record.name, process.pid
            ));

            match self.driver.kill(process.pid) {
                Ok(()) => {
                    sleep_or_cancel(self.config.hang_kill_wait, token).await;
                    self.events.info(format!(
                        "Unresponsive process terminated: {}",
                        record.name
                    ));
                }
                Err(e) => self.events.error(format!(
                    "Failed to terminate process: {} - {}",
                    record.name, e
                )),
            }
            live = None;
        }

        let running = live.is_some();
        let pid = live.map(|p| p.pid);

        let Some((was_running, current)) = self.registry.update(&record.name, |r| {
            let was_running = r.is_running;
            r.is_running = running;
            r.pid = pid;
            (was_running, r.clone())
        }) else {
            debug!("Process {} was removed during its check", record.name);
            return Ok(());
        };

        if was_running != running {
            self.events.emit(SupervisorEvent::StatusChanged {
                name: current.name.clone(),
                status: ProcessStatus::from_running(running),
            });
        }

        if running {
            return Ok(());
        }

        let policy = EffectivePolicy::resolve(&current, settings);
        match policy.decide(&current) {
            RestartDecision::Restart { .. } => {
                self.restart(&current, &policy, token).await;
            }
            RestartDecision::LimitExceeded {
                restarts,
                max_restarts,
            } => {
                self.events.warn(format!(
                    "Maximum restart count exceeded: {} ({}/{})",
                    current.name, restarts, max_restarts
                ));
                self.registry
                    .update(&current.name, |r| r.auto_restart_enabled = false);
            }
            RestartDecision::AutoRestartDisabled => {
                self.events.info(format!(
                    "Process {} is stopped but auto restart is disabled.",
                    current.name
                ));
            }
        }

        Ok(())
    }

    /// Wait the restart delay, then launch a new instance. Returns whether a
    /// new instance was started.
    async fn restart(
        &self,
        record: &ProcessRecord,
        policy: &EffectivePolicy,
        token: &CancellationToken,
    ) -> bool {
        if token.is_cancelled() {
            return false;
        }

        self.events
            .info(format!("Attempting to restart process: {}", record.name));

        if policy.restart_delay_secs > 0 {
            self.events.info(format!(
                "Restart delay: waiting {} seconds...",
                policy.restart_delay_secs
            ));
            if !sleep_or_cancel(policy.restart_delay(), token).await {
                self.events
                    .info(format!("Restart canceled: {}", record.name));
                return false;
            }
        }

        // The record may have changed while we waited
        let claim = self.registry.update(&record.name, |r| {
            if r.is_busy() {
                Claim::Busy
            } else if !r.auto_restart_enabled {
                Claim::Disabled
            } else if r.restart_count >= policy.max_restarts {
                Claim::BudgetUsed
            } else {
                r.launch_pending = true;
                Claim::Granted(r.clone())
            }
        });

        let latest = match claim {
            Some(Claim::Granted(latest)) => latest,
            Some(Claim::Busy) => {
                debug!("Another restart of {} is in progress", record.name);
                return false;
            }
            Some(Claim::Disabled) => {
                self.events.info(format!(
                    "Auto restart is disabled for process: {}",
                    record.name
                ));
                return false;
            }
            Some(Claim::BudgetUsed) => {
                self.events.info(format!(
                    "Restart budget already used: {} ({})",
                    record.name, policy.max_restarts
                ));
                return false;
            }
            None => {
                debug!("Process {} was removed before its restart", record.name);
                return false;
            }
        };

        if let Some(live) = self.driver.find_by_image_name(&latest.image_name()) {
            self.registry.update(&latest.name, |r| {
                r.launch_pending = false;
                r.is_running = true;
                r.pid = Some(live.pid);
            });
            self.events.info(format!(
                "Process is already running: {} (PID: {})",
                latest.name, live.pid
            ));
            return false;
        }

        let pid = match self.driver.launch(&latest) {
            Ok(pid) => pid,
            Err(e) => {
                self.registry
                    .update(&latest.name, |r| r.launch_pending = false);
                self.events.error(format!(
                    "Process restart failed: {} - {}",
                    latest.name, e
                ));
                return false;
            }
        };

        let Some(restart_count) = self.registry.update(&latest.name, |r| {
            r.launch_pending = false;
            r.pid = Some(pid);
            r.is_running = true;
            r.last_restart_at = Some(SystemTime::now());
            r.restart_count += 1;
            r.restart_count
        }) else {
            return false;
        };

        self.events.info(format!(
            "Process restart successful: {} (PID: {}, restart count: {}/{})",
            latest.name, pid, restart_count, policy.max_restarts
        ));
        self.events.emit(SupervisorEvent::Restarted {
            name: latest.name.clone(),
            pid,
        });
        true
    }

    /// Immediate check of a freshly added process
    async fn check_and_start(&self, record: ProcessRecord, token: &CancellationToken) {
        if token.is_cancelled() {
            return;
        }
        if self.registry.get(&record.name).map_or(true, |r| r.is_busy()) {
            return;
        }

        if let Some(live) = self.driver.find_by_image_name(&record.image_name()) {
            self.registry.update(&record.name, |r| {
                r.is_running = true;
                r.pid = Some(live.pid);
            });
            self.events.info(format!(
                "Process is already running: {} (PID: {})",
                record.name, live.pid
            ));
            return;
        }

        if !record.auto_restart_enabled {
            return;
        }

        self.events
            .info(format!("Process is not running: {}", record.name));

        let policy = EffectivePolicy::resolve(&record, &self.settings_snapshot());
        if policy.boot_delay_secs > 0 && record.restart_count == 0 {
            self.events.info(format!(
                "Initial boot delay for {}: waiting {} seconds...",
                record.name, policy.boot_delay_secs
            ));
            if !sleep_or_cancel(policy.boot_delay(), token).await {
                return;
            }
        }

        self.restart(&record, &policy, token).await;
    }
}
