use crate::config::GlobalSettings;
use crate::error::Result;
use crate::events::{EventBus, SupervisorEvent};
use crate::process::{ProcessDriver, ProcessRecord, Supervisor, SupervisorConfig, SystemDriver};
use crate::schedule::host::describe_host;
use crate::schedule::{
    HostRebooter, HostRestartScheduler, HostTimings, ProcessRestartScheduler, ScheduleTimings,
    SystemRebooter,
};
use crate::state::{SettingsDocument, SettingsStore};
use chrono::Local;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Timing knobs of every engine, for tests and tuning
#[derive(Debug, Clone, Default)]
pub struct WatchdogTimings {
    pub supervisor: SupervisorConfig,
    pub schedule: ScheduleTimings,
    pub host: HostTimings,
}

/// The complete watchdog: health engine, process scheduler and host
/// scheduler sharing one registry, one event bus and one settings store
#[derive(Clone)]
pub struct Watchdog {
    supervisor: Supervisor,
    process_scheduler: ProcessRestartScheduler,
    host_scheduler: HostRestartScheduler,
}

impl Watchdog {
    /// Load the document from `store` and wire the engines to the real host.
    ///
    /// A document that fails to load is logged and replaced by the defaults.
    pub fn open(store: SettingsStore) -> Self {
        let document = match store.load() {
            Ok(document) => {
                info!(
                    "Loaded {} process(es) from {}",
                    document.processes.len(),
                    store.path().display()
                );
                document
            }
            Err(e) => {
                warn!("{}; using default settings", e);
                SettingsDocument::default()
            }
        };

        Self::on_host(document, store)
    }

    /// Like [`Watchdog::open`], but a document that fails to load is an error
    pub fn load(store: SettingsStore) -> Result<Self> {
        let document = store.load()?;
        Ok(Self::on_host(document, store))
    }

    fn on_host(document: SettingsDocument, store: SettingsStore) -> Self {
        Self::with_parts(
            document,
            Arc::new(SystemDriver::new()),
            Arc::new(SystemRebooter),
            Some(store),
            WatchdogTimings::default(),
        )
    }

    pub fn with_parts(
        document: SettingsDocument,
        driver: Arc<dyn ProcessDriver>,
        rebooter: Arc<dyn HostRebooter>,
        store: Option<SettingsStore>,
        timings: WatchdogTimings,
    ) -> Self {
        let events = EventBus::new();
        let settings = document.settings.clone();

        let mut builder = Supervisor::builder(Arc::clone(&driver))
            .config(timings.supervisor)
            .events(events.clone())
            .document(document);
        if let Some(store) = store {
            builder = builder.store(store);
        }
        let supervisor = builder.build();

        let process_scheduler = ProcessRestartScheduler::with_timings(
            supervisor.registry(),
            driver,
            events.clone(),
            timings.schedule,
        );
        let host_scheduler =
            HostRestartScheduler::with_timings(settings, rebooter, events, timings.host);

        Self {
            supervisor,
            process_scheduler,
            host_scheduler,
        }
    }

    /// Start every engine if the settings ask for it
    pub async fn launch(&self) {
        if self.settings().auto_start_on_launch {
            self.start().await;
        } else {
            self.events()
                .info("Auto start on launch is disabled; monitoring is not running.");
        }
    }

    pub async fn start(&self) {
        if self.supervisor.is_running() {
            self.events().info("Monitoring is already running.");
            return;
        }

        self.supervisor.start().await;
        self.process_scheduler.start();
        self.host_scheduler.start();
        self.events().info(self.host_scheduler.describe_next());
    }

    pub async fn stop(&self) {
        self.supervisor.stop().await;
        self.process_scheduler.stop();
        self.host_scheduler.stop();
    }

    /// Stop every engine and merge the final restart bookkeeping into the
    /// settings file
    pub async fn shutdown(&self) {
        self.stop().await;
        if let Err(e) = self.supervisor.save_runtime() {
            self.events().error(format!("Settings save failed: {}", e));
        }
    }

    pub fn is_running(&self) -> bool {
        self.supervisor.is_running()
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn events(&self) -> &EventBus {
        self.supervisor.events()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.supervisor.subscribe()
    }

    pub fn processes(&self) -> Vec<ProcessRecord> {
        self.supervisor.processes()
    }

    pub fn add_process(&self, record: ProcessRecord) -> Result<()> {
        self.supervisor.add_process(record)
    }

    pub fn remove_process(&self, name: &str) -> bool {
        self.supervisor.remove_process(name)
    }

    pub fn reset_process(&self, name: &str) -> Result<()> {
        self.supervisor.reset_process(name)
    }

    pub fn settings(&self) -> GlobalSettings {
        self.supervisor.settings()
    }

    /// Replace the global settings in the health engine and the host scheduler
    pub fn update_settings(&self, settings: GlobalSettings) -> Result<()> {
        self.supervisor.update_settings(settings.clone())?;
        self.host_scheduler.update_settings(settings);
        Ok(())
    }

    /// Next scheduled restart of one process
    pub fn describe_next(&self, name: &str) -> Option<String> {
        self.process_scheduler.describe_next(name)
    }

    /// Next scheduled restart of every scheduled process
    pub fn describe_all(&self) -> String {
        self.process_scheduler.describe_all()
    }

    /// Next host restart
    pub fn describe_host(&self) -> String {
        describe_host(&self.settings(), Local::now().naive_local())
    }

    pub fn process_scheduler(&self) -> &ProcessRestartScheduler {
        &self.process_scheduler
    }

    pub fn host_scheduler(&self) -> &HostRestartScheduler {
        &self.host_scheduler
    }
}
