use crate::error::{Result, WardenError};
use std::ffi::OsStr;
use std::path::Path;
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};

/// A live OS process matched by image name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveProcess {
    pub pid: u32,
    /// Whether the process owns a GUI main window
    pub has_main_window: bool,
    /// Whether that window answers the OS. Meaningless without a window.
    pub responding: bool,
}

impl LiveProcess {
    pub fn headless(pid: u32) -> Self {
        Self {
            pid,
            has_main_window: false,
            responding: true,
        }
    }

    /// A process hangs when it has a main window that stopped responding.
    /// Windowless processes never count as hanging.
    pub fn is_hanging(&self) -> bool {
        self.has_main_window && !self.responding
    }
}

/// Process table view backed by sysinfo
pub struct ProcessMonitor {
    /// System information collector
    system: System,
}

impl ProcessMonitor {
    /// Create a new process monitor
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    fn refresh_all(&mut self) {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::new().with_exe(UpdateKind::OnlyIfNotSet),
        );
    }

    /// Find a live process whose image name matches `image` (case-insensitive,
    /// extension ignored).
    ///
    /// When several processes share the name the lowest PID wins. This is a
    /// best-effort, name-based correlation, not PID pinning.
    pub fn find_by_image_name(&mut self, image: &str) -> Option<LiveProcess> {
        self.refresh_all();

        let wanted = image.to_lowercase();
        self.system
            .processes()
            .iter()
            .filter(|(_, process)| !is_defunct(process.status()))
            .filter(|(_, process)| {
                stem_matches(process.name(), &wanted)
                    || process
                        .exe()
                        .map(|exe| stem_matches(exe.as_os_str(), &wanted))
                        .unwrap_or(false)
            })
            .map(|(pid, _)| pid.as_u32())
            .min()
            .map(window_state)
    }

    /// Check if a process is still alive in the system
    pub fn is_process_alive(&mut self, pid: u32) -> bool {
        let sys_pid = Pid::from_u32(pid);
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::new(),
        );
        self.system
            .process(sys_pid)
            .map(|process| !is_defunct(process.status()))
            .unwrap_or(false)
    }

    /// Forcibly terminate a process
    #[cfg(unix)]
    pub fn kill(&mut self, pid: u32) -> Result<()> {
        use nix::sys::signal::{self, Signal};

        let raw = i32::try_from(pid)
            .map_err(|_| WardenError::KillError(pid.to_string(), "PID out of range".to_string()))?;

        signal::kill(nix::unistd::Pid::from_raw(raw), Signal::SIGKILL).map_err(|e| {
            WardenError::KillError(pid.to_string(), format!("Failed to send SIGKILL: {}", e))
        })
    }

    #[cfg(not(unix))]
    pub fn kill(&mut self, pid: u32) -> Result<()> {
        let sys_pid = Pid::from_u32(pid);
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::new(),
        );

        match self.system.process(sys_pid) {
            Some(process) if process.kill() => Ok(()),
            Some(_) => Err(WardenError::KillError(
                pid.to_string(),
                "the operating system refused to terminate the process".to_string(),
            )),
            None => Err(WardenError::ProcessNotFound(pid.to_string())),
        }
    }
}

impl Default for ProcessMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Main window state of `pid`: its first visible, unowned top-level window,
/// checked with `IsHungAppWindow`
#[cfg(windows)]
fn window_state(pid: u32) -> LiveProcess {
    use windows_sys::Win32::Foundation::{BOOL, HWND, LPARAM};
    use windows_sys::Win32::UI::WindowsAndMessaging::{
        EnumWindows, GetWindow, GetWindowThreadProcessId, IsHungAppWindow, IsWindowVisible,
        GW_OWNER,
    };

    struct Search {
        pid: u32,
        window: HWND,
    }

    unsafe extern "system" fn visit(hwnd: HWND, lparam: LPARAM) -> BOOL {
        let search = &mut *(lparam as *mut Search);
        let mut owner = 0u32;
        GetWindowThreadProcessId(hwnd, &mut owner);

        if owner == search.pid && IsWindowVisible(hwnd) != 0 && GetWindow(hwnd, GW_OWNER) == 0 {
            search.window = hwnd;
            return 0;
        }
        1
    }

    let mut search = Search { pid, window: 0 };
    // SAFETY: `search` outlives the synchronous enumeration that borrows it
    unsafe {
        EnumWindows(Some(visit), &mut search as *mut Search as LPARAM);
    }

    if search.window == 0 {
        return LiveProcess::headless(pid);
    }
    LiveProcess {
        pid,
        has_main_window: true,
        // SAFETY: plain query on a window handle; a stale handle reads as not hung
        responding: unsafe { IsHungAppWindow(search.window) } == 0,
    }
}

/// Without a window system API every process counts as headless
#[cfg(not(windows))]
fn window_state(pid: u32) -> LiveProcess {
    LiveProcess::headless(pid)
}

fn is_defunct(status: ProcessStatus) -> bool {
    matches!(status, ProcessStatus::Zombie | ProcessStatus::Dead)
}

/// Compare the file stem of `name` against an already lowercased image name
fn stem_matches(name: &OsStr, wanted: &str) -> bool {
    Path::new(name)
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_lowercase() == wanted)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_live_process_hanging_requires_window() {
        let headless = LiveProcess {
            pid: 1,
            has_main_window: false,
            responding: false,
        };
        assert!(!headless.is_hanging());

        let frozen = LiveProcess {
            pid: 2,
            has_main_window: true,
            responding: false,
        };
        assert!(frozen.is_hanging());

        assert!(!LiveProcess::headless(3).is_hanging());
    }

    #[test]
    fn test_console_process_is_not_hanging() {
        let pid = std::process::id();
        let live = window_state(pid);

        assert_eq!(live.pid, pid);
        assert!(!live.is_hanging());
    }

    #[test]
    fn test_stem_matches() {
        assert!(stem_matches(OsStr::new("Server.exe"), "server"));
        assert!(stem_matches(OsStr::new("/usr/bin/sleep"), "sleep"));
        assert!(!stem_matches(OsStr::new("sleeper"), "sleep"));
    }

    #[tokio::test]
    async fn test_is_process_alive() {
        let mut monitor = ProcessMonitor::new();

        // Spawn a real process
        let mut child = Command::new("/bin/sleep")
            .arg("5")
            .spawn()
            .expect("Failed to spawn process");
        let pid = child.id();

        assert!(monitor.is_process_alive(pid));

        child.kill().expect("Failed to kill process");
        let _ = child.wait();

        // Give system time to update
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        assert!(!monitor.is_process_alive(pid));
    }

    #[tokio::test]
    async fn test_find_and_kill_by_image_name() {
        let mut monitor = ProcessMonitor::new();

        let mut child = Command::new("/bin/sleep")
            .arg("30")
            .spawn()
            .expect("Failed to spawn process");
        let pid = child.id();

        let found = monitor.find_by_image_name("SLEEP");
        assert!(found.is_some());
        assert!(!found.unwrap().is_hanging());

        monitor.kill(pid).expect("Failed to kill process");
        let _ = child.wait();

        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        assert!(!monitor.is_process_alive(pid));
    }

    #[test]
    fn test_find_unknown_image() {
        let mut monitor = ProcessMonitor::default();
        assert!(monitor
            .find_by_image_name("warden-no-such-process-image")
            .is_none());
    }
}
