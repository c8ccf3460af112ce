// Process module - Supervised process records, OS seam and health engine

pub mod driver;
pub mod monitor;
pub mod registry;
pub mod restart;
pub mod spawner;
pub mod supervisor;
pub mod testing;
pub mod types;

pub use driver::{wait_for_exit, ProcessDriver, SystemDriver};
pub use monitor::{LiveProcess, ProcessMonitor};
pub use registry::ProcessRegistry;
pub use restart::{EffectivePolicy, RestartDecision};
pub use spawner::spawn_process;
pub use supervisor::{Supervisor, SupervisorBuilder, SupervisorConfig};
pub use types::{name_key, ProcessOverrides, ProcessRecord, ProcessStatus, ScheduledRestart};
