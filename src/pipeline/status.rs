//! StatusBoard: the single consumer of pipeline events
//!
//! Runs on its own thread, appends every event to `events.jsonl` and keeps the
//! daemon status snapshot (`status.json`). Nothing else writes either file.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::events::PipelineEvent;
use crate::error::Result;

pub const EVENTS_FILE: &str = "events.jsonl";
pub const STATUS_FILE: &str = "status.json";

/// Scheduling state as seen from events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryState {
    #[default]
    Idle,
    Queued,
    Running,
    /// Running with one re-run pending
    RunningRerunPending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LastOutcome {
    Completed,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryStatus {
    pub state: RepositoryState,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<LastOutcome>,
    pub last_error: Option<String>,
    pub last_run_id: Option<String>,
    pub runs_completed: u64,
    pub runs_failed: u64,
}

/// Snapshot served to `codewatch status`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub pid: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub repositories: BTreeMap<String, RepositoryStatus>,
}

impl DaemonStatus {
    /// Fold one event into the snapshot
    pub fn apply(&mut self, event: &PipelineEvent) {
        self.updated_at = Some(event.timestamp());
        match event {
            PipelineEvent::DaemonStarted {
                repositories,
                timestamp,
            } => {
                self.started_at = Some(*timestamp);
                for name in repositories {
                    self.repositories.entry(name.clone()).or_default();
                }
            }
            PipelineEvent::ConfigReloaded { repositories, .. } => {
                self.repositories.retain(|name, _| repositories.contains(name));
                for name in repositories {
                    self.repositories.entry(name.clone()).or_default();
                }
            }
            PipelineEvent::DaemonStopping { .. } => {}
            PipelineEvent::RunQueued { repository, .. } => {
                let status = self.repo(repository);
                if status.state == RepositoryState::Idle {
                    status.state = RepositoryState::Queued;
                }
            }
            PipelineEvent::RunCoalesced { repository, .. } => {
                self.repo(repository).state = RepositoryState::RunningRerunPending;
            }
            PipelineEvent::RunStarted {
                repository, run_id, ..
            } => {
                let status = self.repo(repository);
                status.state = RepositoryState::Running;
                status.last_run_id = Some(run_id.to_string());
            }
            PipelineEvent::RunSkipped {
                repository,
                timestamp,
                ..
            } => {
                let status = self.repo(repository);
                status.last_run_at = Some(*timestamp);
                status.last_outcome = Some(LastOutcome::Skipped);
            }
            PipelineEvent::RunCompleted {
                repository,
                timestamp,
                ..
            } => {
                let status = self.repo(repository);
                status.last_run_at = Some(*timestamp);
                status.last_outcome = Some(LastOutcome::Completed);
                status.last_error = None;
                status.runs_completed += 1;
            }
            PipelineEvent::RunFailed {
                repository,
                step,
                error,
                timestamp,
                ..
            } => {
                let status = self.repo(repository);
                status.last_run_at = Some(*timestamp);
                status.last_outcome = Some(LastOutcome::Failed);
                status.last_error = Some(format!("{}: {}", step, error));
                status.runs_failed += 1;
            }
            PipelineEvent::RunFinished { repository, .. } => {
                let status = self.repo(repository);
                status.state = match status.state {
                    RepositoryState::RunningRerunPending => RepositoryState::Queued,
                    _ => RepositoryState::Idle,
                };
            }
        }
    }

    fn repo(&mut self, name: &str) -> &mut RepositoryStatus {
        self.repositories.entry(name.to_string()).or_default()
    }

    /// Read a snapshot written by a running daemon
    pub fn load(state_dir: &Path) -> Result<Option<Self>> {
        let path = state_dir.join(STATUS_FILE);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&fs::read_to_string(path)?)?))
    }
}

/// Read-only view of the live snapshot
#[derive(Debug, Clone)]
pub struct StatusView {
    inner: Arc<RwLock<DaemonStatus>>,
}

impl StatusView {
    pub fn snapshot(&self) -> DaemonStatus {
        self.inner.read().clone()
    }
}

/// Consumer thread handle
pub struct StatusBoard {
    view: StatusView,
    handle: JoinHandle<()>,
}

impl StatusBoard {
    /// Start consuming; the thread ends once every emitter is dropped
    pub fn spawn(receiver: Receiver<PipelineEvent>, state_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&state_dir)?;
        let inner = Arc::new(RwLock::new(DaemonStatus {
            pid: std::process::id(),
            ..DaemonStatus::default()
        }));
        let view = StatusView {
            inner: inner.clone(),
        };

        let handle = std::thread::Builder::new()
            .name("codewatch-status".to_string())
            .spawn(move || consume(receiver, &state_dir, &inner))?;

        Ok(Self { view, handle })
    }

    pub fn view(&self) -> StatusView {
        self.view.clone()
    }

    /// Wait for the consumer to drain
    pub fn join(self) {
        if self.handle.join().is_err() {
            tracing::error!("[STATUS] status thread panicked");
        }
    }
}

fn consume(receiver: Receiver<PipelineEvent>, state_dir: &Path, inner: &RwLock<DaemonStatus>) {
    let events_path = state_dir.join(EVENTS_FILE);
    let status_path = state_dir.join(STATUS_FILE);

    for event in receiver {
        if let Err(e) = append_event(&events_path, &event) {
            tracing::warn!("[STATUS] cannot append to {}: {}", events_path.display(), e);
        }

        let snapshot = {
            let mut status = inner.write();
            status.apply(&event);
            status.clone()
        };
        if let Err(e) = write_status(&status_path, &snapshot) {
            tracing::warn!("[STATUS] cannot write {}: {}", status_path.display(), e);
        }
    }
    tracing::debug!("[STATUS] event channel closed");
}

fn append_event(path: &Path, event: &PipelineEvent) -> Result<()> {
    let line = serde_json::to_string(event)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", line)?;
    Ok(())
}

fn write_status(path: &Path, status: &DaemonStatus) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(status)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
