use crate::error::Result;
use crate::process::monitor::{LiveProcess, ProcessMonitor};
use crate::process::spawner::spawn_process;
use crate::process::types::ProcessRecord;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Seam between the engines and the operating system
pub trait ProcessDriver: Send + Sync + 'static {
    /// Find a live process by image name. First match wins.
    fn find_by_image_name(&self, image: &str) -> Option<LiveProcess>;

    fn is_alive(&self, pid: u32) -> bool;

    /// Forcibly terminate a process
    fn kill(&self, pid: u32) -> Result<()>;

    /// Launch a new instance, returning its PID
    fn launch(&self, record: &ProcessRecord) -> Result<u32>;
}

/// Driver for the real host: sysinfo for lookups, tokio for launches
#[derive(Default)]
pub struct SystemDriver {
    monitor: Mutex<ProcessMonitor>,
}

impl SystemDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_monitor<R>(&self, f: impl FnOnce(&mut ProcessMonitor) -> R) -> R {
        let mut monitor = self.monitor.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut monitor)
    }
}

impl ProcessDriver for SystemDriver {
    fn find_by_image_name(&self, image: &str) -> Option<LiveProcess> {
        self.with_monitor(|m| m.find_by_image_name(image))
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.with_monitor(|m| m.is_process_alive(pid))
    }

    fn kill(&self, pid: u32) -> Result<()> {
        self.with_monitor(|m| m.kill(pid))
    }

    fn launch(&self, record: &ProcessRecord) -> Result<u32> {
        spawn_process(record)
    }
}

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Poll until `pid` is gone or `timeout` elapses. Returns whether it exited.
pub async fn wait_for_exit(driver: &dyn ProcessDriver, pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;

    loop {
        if !driver.is_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(EXIT_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::ScriptedDriver;

    #[tokio::test]
    async fn test_system_driver_launch_and_kill() {
        let driver = SystemDriver::new();
        let mut record = ProcessRecord::new("sleeper", "/bin/sleep");
        record.arguments = vec!["30".to_string()];

        let pid = driver.launch(&record).unwrap();
        assert!(driver.is_alive(pid));

        driver.kill(pid).unwrap();
        assert!(wait_for_exit(&driver, pid, Duration::from_secs(5)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_exit_times_out() {
        let driver = ScriptedDriver::new();
        let pid = driver.start_external("stubborn");

        assert!(!wait_for_exit(&driver, pid, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_wait_for_exit_returns_when_gone() {
        let driver = ScriptedDriver::new();
        assert!(wait_for_exit(&driver, 4242, Duration::from_secs(1)).await);
    }
}
