use crate::process::ProcessStatus;
use chrono::{DateTime, Local};
use tokio::sync::broadcast;
use tracing::Level;

/// Default capacity of the event channel; slow receivers lose the oldest events
const EVENT_CAPACITY: usize = 256;

/// Events raised by the engines for collaborators (UI, loggers)
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorEvent {
    StatusChanged {
        name: String,
        status: ProcessStatus,
    },
    Restarted {
        name: String,
        pid: u32,
    },
    ScheduledRestartCompleted {
        name: String,
        pid: u32,
    },
    LogMessage {
        text: String,
        timestamp: DateTime<Local>,
    },
}

/// Broadcast hub shared by the supervisor and both schedulers
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SupervisorEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no receivers is not an error.
    pub fn emit(&self, event: SupervisorEvent) {
        let _ = self.tx.send(event);
    }

    /// Write an operator-facing line to the tracing log and mirror it as a
    /// `LogMessage` event
    pub fn log(&self, level: Level, text: impl Into<String>) {
        let text = text.into();

        match level {
            Level::ERROR => tracing::error!("{}", text),
            Level::WARN => tracing::warn!("{}", text),
            Level::INFO => tracing::info!("{}", text),
            Level::DEBUG => tracing::debug!("{}", text),
            Level::TRACE => tracing::trace!("{}", text),
        }

        self.emit(SupervisorEvent::LogMessage {
            text,
            timestamp: Local::now(),
        });
    }

    pub fn info(&self, text: impl Into<String>) {
        self.log(Level::INFO, text);
    }

    pub fn warn(&self, text: impl Into<String>) {
        self.log(Level::WARN, text);
    }

    pub fn error(&self, text: impl Into<String>) {
        self.log(Level::ERROR, text);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_receivers() {
        let bus = EventBus::new();
        bus.emit(SupervisorEvent::Restarted {
            name: "worker".to_string(),
            pid: 1,
        });
        bus.info("nobody is listening");
    }

    #[tokio::test]
    async fn test_log_is_mirrored_as_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.warn("Process restart failed: worker");

        match rx.recv().await.unwrap() {
            SupervisorEvent::LogMessage { text, .. } => {
                assert_eq!(text, "Process restart failed: worker")
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_clones_share_the_channel() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.clone().emit(SupervisorEvent::StatusChanged {
            name: "worker".to_string(),
            status: ProcessStatus::Running,
        });

        assert!(matches!(
            rx.recv().await.unwrap(),
            SupervisorEvent::StatusChanged { .. }
        ));
    }
}
