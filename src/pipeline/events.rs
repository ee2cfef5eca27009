//! Pipeline events
//!
//! Workers never touch shared display state directly. They publish immutable
//! [`PipelineEvent`]s on a channel whose single consumer (the
//! [`StatusBoard`](super::StatusBoard)) owns the status snapshot and the
//! event log.
//!
//! # Event Format
//!
//! One JSON object per line (JSON Lines), tagged by `type`:
//! ```json
//! {"type":"run_started","repository":"api","run_id":"…","mode":"incremental","timestamp":"…"}
//! ```

use std::sync::mpsc::{self, Receiver, Sender};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::extract::ExtractMode;
use crate::findings::SeverityCounts;
use crate::router::AnalysisType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    DaemonStarted {
        repositories: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    DaemonStopping {
        timestamp: DateTime<Utc>,
    },
    /// Repository list replaced by a configuration reload
    ConfigReloaded {
        repositories: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    RunQueued {
        repository: String,
        timestamp: DateTime<Utc>,
    },
    /// A signal arrived while a run was in progress; one re-run is pending
    RunCoalesced {
        repository: String,
        timestamp: DateTime<Utc>,
    },
    RunStarted {
        repository: String,
        run_id: Uuid,
        mode: ExtractMode,
        timestamp: DateTime<Utc>,
    },
    RunSkipped {
        repository: String,
        run_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    RunCompleted {
        repository: String,
        run_id: Uuid,
        analysis_type: AnalysisType,
        counts: SeverityCounts,
        committed: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    RunFailed {
        repository: String,
        run_id: Uuid,
        step: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// Repository went back to idle (after any run, skipped or not)
    RunFinished {
        repository: String,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// Repository the event concerns, if any
    pub fn repository(&self) -> Option<&str> {
        match self {
            Self::RunQueued { repository, .. }
            | Self::RunCoalesced { repository, .. }
            | Self::RunStarted { repository, .. }
            | Self::RunSkipped { repository, .. }
            | Self::RunCompleted { repository, .. }
            | Self::RunFailed { repository, .. }
            | Self::RunFinished { repository, .. } => Some(repository),
            Self::DaemonStarted { .. } | Self::DaemonStopping { .. } | Self::ConfigReloaded { .. } => {
                None
            }
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::DaemonStarted { timestamp, .. }
            | Self::DaemonStopping { timestamp }
            | Self::ConfigReloaded { timestamp, .. }
            | Self::RunQueued { timestamp, .. }
            | Self::RunCoalesced { timestamp, .. }
            | Self::RunStarted { timestamp, .. }
            | Self::RunSkipped { timestamp, .. }
            | Self::RunCompleted { timestamp, .. }
            | Self::RunFailed { timestamp, .. }
            | Self::RunFinished { timestamp, .. } => *timestamp,
        }
    }
}

/// Cloneable publishing end of the event channel
#[derive(Debug, Clone, Default)]
pub struct EventEmitter {
    sender: Option<Sender<PipelineEvent>>,
}

impl EventEmitter {
    /// Emitter that drops every event
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// Emitter plus the receiving end for the single consumer
    pub fn channel() -> (Self, Receiver<PipelineEvent>) {
        let (sender, receiver) = mpsc::channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    pub fn emit(&self, event: PipelineEvent) {
        if let Some(sender) = &self.sender {
            // Consumer gone means the daemon is shutting down
            let _ = sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_is_tagged() {
        let event = PipelineEvent::RunSkipped {
            repository: "api".to_string(),
            run_id: Uuid::nil(),
            reason: "no changed files".to_string(),
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "run_skipped");
        assert_eq!(value["repository"], "api");
        assert_eq!(event.repository(), Some("api"));
    }

    #[test]
    fn test_emitter_channel_delivers_in_order() {
        let (emitter, receiver) = EventEmitter::channel();
        let clone = emitter.clone();
        emitter.emit(PipelineEvent::RunQueued {
            repository: "a".to_string(),
            timestamp: Utc::now(),
        });
        clone.emit(PipelineEvent::RunFinished {
            repository: "a".to_string(),
            timestamp: Utc::now(),
        });
        drop(emitter);
        drop(clone);
        let kinds: Vec<_> = receiver
            .iter()
            .map(|e| serde_json::to_value(e).unwrap()["type"].clone())
            .collect();
        assert_eq!(kinds, vec!["run_queued", "run_finished"]);

        // Disabled emitter is a no-op
        EventEmitter::disabled().emit(PipelineEvent::DaemonStopping {
            timestamp: Utc::now(),
        });
    }
}
