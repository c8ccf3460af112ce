//! In-memory process driver for tests and dry runs.
//!
//! `ScriptedDriver` keeps a fake process table keyed by image name, so the
//! engines can be exercised without touching the host.

use crate::error::{Result, WardenError};
use crate::process::driver::ProcessDriver;
use crate::process::monitor::LiveProcess;
use crate::process::types::ProcessRecord;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy)]
struct FakeProcess {
    pid: u32,
    image: usize,
    hanging: bool,
}

#[derive(Default)]
struct Table {
    images: Vec<String>,
    processes: Vec<FakeProcess>,
    next_pid: u32,
    launches: Vec<String>,
    kills: Vec<u32>,
    failing: HashSet<String>,
    short_lived: HashSet<String>,
    unkillable: HashSet<u32>,
}

impl Table {
    fn image_index(&mut self, image: &str) -> usize {
        let image = image.to_lowercase();
        match self.images.iter().position(|known| *known == image) {
            Some(index) => index,
            None => {
                self.images.push(image);
                self.images.len() - 1
            }
        }
    }

    fn spawn(&mut self, image: &str) -> u32 {
        let image = self.image_index(image);
        let pid = self.next_pid;
        self.next_pid += 1;
        self.processes.push(FakeProcess {
            pid,
            image,
            hanging: false,
        });
        pid
    }
}

/// Scriptable fake of the host process table
pub struct ScriptedDriver {
    table: Mutex<Table>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(Table {
                next_pid: 1000,
                ..Table::default()
            }),
        }
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a process outside of the supervisor's control
    pub fn start_external(&self, image: &str) -> u32 {
        self.table().spawn(image)
    }

    /// Make every instance of `image` disappear, as if it crashed
    pub fn crash(&self, image: &str) {
        let mut table = self.table();
        let index = table.image_index(image);
        table.processes.retain(|p| p.image != index);
    }

    pub fn set_hanging(&self, pid: u32, hanging: bool) {
        if let Some(process) = self.table().processes.iter_mut().find(|p| p.pid == pid) {
            process.hanging = hanging;
        }
    }

    /// Make launches of `image` fail
    pub fn fail_launches(&self, image: &str, fail: bool) {
        let image = image.to_lowercase();
        let mut table = self.table();
        if fail {
            table.failing.insert(image);
        } else {
            table.failing.remove(&image);
        }
    }

    /// Make launches of `image` succeed but exit straight away
    pub fn exit_on_launch(&self, image: &str) {
        self.table().short_lived.insert(image.to_lowercase());
    }

    /// Make `pid` ignore kill requests
    pub fn ignore_kill(&self, pid: u32) {
        self.table().unkillable.insert(pid);
    }

    /// Images launched so far, in order
    pub fn launches(&self) -> Vec<String> {
        self.table().launches.clone()
    }

    pub fn launch_count(&self, image: &str) -> usize {
        let image = image.to_lowercase();
        self.table().launches.iter().filter(|l| **l == image).count()
    }

    /// PIDs that received a kill request, in order
    pub fn kills(&self) -> Vec<u32> {
        self.table().kills.clone()
    }

    /// Live PIDs of `image`
    pub fn pids(&self, image: &str) -> Vec<u32> {
        let mut table = self.table();
        let index = table.image_index(image);
        table
            .processes
            .iter()
            .filter(|p| p.image == index)
            .map(|p| p.pid)
            .collect()
    }
}

impl Default for ScriptedDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessDriver for ScriptedDriver {
    fn find_by_image_name(&self, image: &str) -> Option<LiveProcess> {
        let mut table = self.table();
        let index = table.image_index(image);
        table
            .processes
            .iter()
            .filter(|p| p.image == index)
            .min_by_key(|p| p.pid)
            .map(|p| LiveProcess {
                pid: p.pid,
                has_main_window: p.hanging,
                responding: !p.hanging,
            })
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.table().processes.iter().any(|p| p.pid == pid)
    }

    fn kill(&self, pid: u32) -> Result<()> {
        let mut table = self.table();
        table.kills.push(pid);

        if table.unkillable.contains(&pid) {
            return Ok(());
        }

        let before = table.processes.len();
        table.processes.retain(|p| p.pid != pid);
        if table.processes.len() == before {
            return Err(WardenError::ProcessNotFound(pid.to_string()));
        }
        Ok(())
    }

    fn launch(&self, record: &ProcessRecord) -> Result<u32> {
        let image = record.image_name().to_lowercase();
        let mut table = self.table();

        if table.failing.contains(&image) {
            return Err(WardenError::SpawnError(format!(
                "Failed to launch process '{}': scripted failure",
                record.name
            )));
        }

        table.launches.push(image.clone());

        if table.short_lived.contains(&image) {
            let pid = table.next_pid;
            table.next_pid += 1;
            return Ok(pid);
        }

        Ok(table.spawn(&image))
    }
}
