//! PipelineOrchestrator: worker pool, per-repository lock, coalescing
//!
//! Settle signals and "analyze now" requests become [`Orchestrator::submit`]
//! calls. Each repository moves through a small state machine:
//!
//! ```text
//! Idle --submit--> Queued --worker--> Running --done--> Idle
//!                                      |  ^
//!                               submit |  | (rerun flag set)
//!                                      v  |
//!                               Running{rerun} --done--> Queued
//! ```
//!
//! so any number of signals arriving during a run collapse into one re-run.
//! A bounded queue feeds `max_concurrent_analyses` worker threads; different
//! repositories run concurrently, the same repository never does.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::config::{DaemonSettings, RepositoryConfig};
use crate::error::{CodewatchError, Result};
use crate::pipeline::{EventEmitter, Pipeline, PipelineEvent, RunOptions, RunOutcome};

/// Anything that can run one analysis for a repository
pub trait RepositoryAnalyzer: Send + Sync {
    fn analyze(&self, repo: &RepositoryConfig) -> Result<RunOutcome>;
}

impl RepositoryAnalyzer for Pipeline {
    fn analyze(&self, repo: &RepositoryConfig) -> Result<RunOutcome> {
        self.run(repo, &RunOptions::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum ScheduleState {
    Idle,
    Queued,
    Running { rerun: bool },
}

/// How a submission was absorbed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Submission {
    /// Added to the work queue
    Queued,
    /// Already waiting in the queue
    AlreadyQueued,
    /// A run is in progress; one re-run will follow it
    Coalesced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl From<&DaemonSettings> for OrchestratorConfig {
    fn from(settings: &DaemonSettings) -> Self {
        Self {
            workers: settings.max_concurrent_analyses,
            queue_capacity: settings.queue_capacity,
        }
    }
}

struct RepoSlot {
    config: RwLock<RepositoryConfig>,
    /// Held for the whole duration of a run
    run_lock: Mutex<()>,
    schedule: Mutex<ScheduleState>,
    last_run: RwLock<Option<DateTime<Utc>>>,
}

impl RepoSlot {
    fn new(config: RepositoryConfig) -> Self {
        Self {
            config: RwLock::new(config),
            run_lock: Mutex::new(()),
            schedule: Mutex::new(ScheduleState::Idle),
            last_run: RwLock::new(None),
        }
    }
}

struct Inner {
    analyzer: RwLock<Arc<dyn RepositoryAnalyzer>>,
    slots: RwLock<HashMap<String, Arc<RepoSlot>>>,
    sender: Mutex<Option<SyncSender<String>>>,
    stopping: AtomicBool,
    events: EventEmitter,
}

impl Inner {
    fn slot(&self, name: &str) -> Option<Arc<RepoSlot>> {
        self.slots.read().get(name).cloned()
    }

    /// Caller holds the slot's schedule lock
    fn enqueue(&self, name: &str) -> Result<()> {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(CodewatchError::Control {
                message: "orchestrator is shutting down".to_string(),
            });
        };
        sender.try_send(name.to_string()).map_err(|e| {
            let message = match e {
                TrySendError::Full(_) => "analysis queue is full",
                TrySendError::Disconnected(_) => "analysis workers have stopped",
            };
            CodewatchError::Control {
                message: message.to_string(),
            }
        })?;
        self.events.emit(PipelineEvent::RunQueued {
            repository: name.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }
}

/// Schedules analysis runs across worker threads
pub struct Orchestrator {
    inner: Arc<Inner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn start(
        repositories: Vec<RepositoryConfig>,
        analyzer: Arc<dyn RepositoryAnalyzer>,
        config: OrchestratorConfig,
        events: EventEmitter,
    ) -> Result<Self> {
        let (sender, receiver) = mpsc::sync_channel::<String>(config.queue_capacity.max(1));
        let slots = repositories
            .into_iter()
            .map(|repo| (repo.name.clone(), Arc::new(RepoSlot::new(repo))))
            .collect();

        let inner = Arc::new(Inner {
            analyzer: RwLock::new(analyzer),
            slots: RwLock::new(slots),
            sender: Mutex::new(Some(sender)),
            stopping: AtomicBool::new(false),
            events,
        });

        let receiver = Arc::new(Mutex::new(receiver));
        let mut workers = Vec::with_capacity(config.workers);
        for id in 0..config.workers.max(1) {
            let inner = inner.clone();
            let receiver = receiver.clone();
            let handle = std::thread::Builder::new()
                .name(format!("codewatch-worker-{}", id))
                .spawn(move || worker_loop(id, &inner, &receiver))?;
            workers.push(handle);
        }
        tracing::info!("[ORCHESTRATOR] {} workers started", workers.len());

        Ok(Self {
            inner,
            workers: Mutex::new(workers),
        })
    }

    /// Request an analysis of `repository`; coalesces with pending work
    pub fn submit(&self, repository: &str) -> Result<Submission> {
        let slot = self
            .inner
            .slot(repository)
            .ok_or_else(|| CodewatchError::RepositoryNotFound {
                name: repository.to_string(),
            })?;

        let mut schedule = slot.schedule.lock();
        match *schedule {
            ScheduleState::Idle => {
                self.inner.enqueue(repository)?;
                *schedule = ScheduleState::Queued;
                Ok(Submission::Queued)
            }
            ScheduleState::Queued => Ok(Submission::AlreadyQueued),
            ScheduleState::Running { rerun } => {
                if !rerun {
                    *schedule = ScheduleState::Running { rerun: true };
                    tracing::debug!(
                        "[ORCHESTRATOR] {}: run in progress, re-run scheduled",
                        repository
                    );
                    self.inner.events.emit(PipelineEvent::RunCoalesced {
                        repository: repository.to_string(),
                        timestamp: Utc::now(),
                    });
                }
                Ok(Submission::Coalesced)
            }
        }
    }

    /// When `repository` last finished a run (read-only)
    pub fn last_run(&self, repository: &str) -> Option<DateTime<Utc>> {
        self.inner
            .slot(repository)
            .and_then(|slot| *slot.last_run.read())
    }

    pub fn schedule_state(&self, repository: &str) -> Option<ScheduleState> {
        self.inner
            .slot(repository)
            .map(|slot| *slot.schedule.lock())
    }

    pub fn repositories(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.slots.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Swap in a new repository list and analyzer
    ///
    /// Runs in progress finish with the analyzer they started with. Slots of
    /// repositories that stay configured keep their lock, state and history.
    pub fn reload(&self, repositories: Vec<RepositoryConfig>, analyzer: Arc<dyn RepositoryAnalyzer>) {
        *self.inner.analyzer.write() = analyzer;

        let mut slots = self.inner.slots.write();
        let mut next = HashMap::with_capacity(repositories.len());
        for repo in repositories {
            let name = repo.name.clone();
            let slot = match slots.remove(&name) {
                Some(slot) => {
                    *slot.config.write() = repo;
                    slot
                }
                None => Arc::new(RepoSlot::new(repo)),
            };
            next.insert(name, slot);
        }
        for removed in slots.keys() {
            tracing::info!("[ORCHESTRATOR] {} no longer configured", removed);
        }
        *slots = next;

        let mut names: Vec<String> = slots.keys().cloned().collect();
        names.sort();
        tracing::info!("[ORCHESTRATOR] Reloaded with {} repositories", names.len());
        self.inner.events.emit(PipelineEvent::ConfigReloaded {
            repositories: names,
            timestamp: Utc::now(),
        });
    }

    /// Stop accepting work, let in-flight runs finish, join the workers
    pub fn shutdown(&self) {
        self.inner.stopping.store(true, Ordering::SeqCst);
        self.inner.sender.lock().take();
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if handle.join().is_err() {
                tracing::error!("[ORCHESTRATOR] worker thread panicked");
            }
        }
        tracing::info!("[ORCHESTRATOR] Stopped");
    }
}

fn worker_loop(id: usize, inner: &Inner, receiver: &Mutex<Receiver<String>>) {
    loop {
        let next = receiver.lock().recv();
        let Ok(name) = next else {
            tracing::debug!("[ORCHESTRATOR] worker {} exiting", id);
            return;
        };
        if inner.stopping.load(Ordering::SeqCst) {
            continue;
        }
        let Some(slot) = inner.slot(&name) else {
            tracing::debug!("[ORCHESTRATOR] {} removed before it ran", name);
            continue;
        };
        run_slot(inner, &name, &slot);
    }
}

fn run_slot(inner: &Inner, name: &str, slot: &RepoSlot) {
    {
        let _run = slot.run_lock.lock();
        *slot.schedule.lock() = ScheduleState::Running { rerun: false };

        let analyzer = inner.analyzer.read().clone();
        let repo = slot.config.read().clone();

        match catch_unwind(AssertUnwindSafe(|| analyzer.analyze(&repo))) {
            Ok(Ok(outcome)) => tracing::debug!(
                "[ORCHESTRATOR] {}: run {} finished",
                name,
                outcome.run_id()
            ),
            // The pipeline logs its own abort reason with run id and step
            Ok(Err(e)) => tracing::warn!("[ORCHESTRATOR] {}: run aborted: {}", name, e),
            Err(_) => tracing::error!(
                repository = name,
                step = "pipeline",
                "[ORCHESTRATOR] analysis panicked; repository released"
            ),
        }
        *slot.last_run.write() = Some(Utc::now());
    }

    inner.events.emit(PipelineEvent::RunFinished {
        repository: name.to_string(),
        timestamp: Utc::now(),
    });

    let mut schedule = slot.schedule.lock();
    let rerun = matches!(*schedule, ScheduleState::Running { rerun: true });
    *schedule = ScheduleState::Idle;
    if rerun && !inner.stopping.load(Ordering::SeqCst) {
        match inner.enqueue(name) {
            Ok(()) => *schedule = ScheduleState::Queued,
            Err(e) => tracing::warn!("[ORCHESTRATOR] {}: re-run dropped: {}", name, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};
    use uuid::Uuid;

    /// First call blocks until the gate opens; later calls return at once
    struct GatedAnalyzer {
        calls: AtomicUsize,
        gate: Mutex<Receiver<()>>,
        panic_first: bool,
    }

    impl GatedAnalyzer {
        fn new(panic_first: bool) -> (Arc<Self>, SyncSender<()>) {
            let (tx, rx) = mpsc::sync_channel(1);
            let analyzer = Arc::new(Self {
                calls: AtomicUsize::new(0),
                gate: Mutex::new(rx),
                panic_first,
            });
            (analyzer, tx)
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl RepositoryAnalyzer for GatedAnalyzer {
        fn analyze(&self, _repo: &RepositoryConfig) -> Result<RunOutcome> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n == 1 {
                let _ = self.gate.lock().recv_timeout(Duration::from_secs(10));
                if self.panic_first {
                    panic!("analyzer blew up");
                }
            }
            Ok(RunOutcome::Skipped {
                run_id: Uuid::new_v4(),
                reason: "test".to_string(),
            })
        }
    }

    fn repo(name: &str) -> RepositoryConfig {
        RepositoryConfig {
            name: name.to_string(),
            path: PathBuf::from("."),
            auto_commit: false,
            auto_push: false,
            analysis_triggers: Vec::new(),
            commit_threshold: 1,
        }
    }

    fn config() -> OrchestratorConfig {
        OrchestratorConfig {
            workers: 2,
            queue_capacity: 8,
        }
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_signals_during_run_coalesce_into_one_rerun() {
        let (analyzer, gate) = GatedAnalyzer::new(false);
        let orch = Orchestrator::start(
            vec![repo("a")],
            analyzer.clone(),
            config(),
            EventEmitter::disabled(),
        )
        .unwrap();

        assert_eq!(orch.submit("a").unwrap(), Submission::Queued);
        wait_until(|| analyzer.calls() == 1);
        assert_eq!(
            orch.schedule_state("a"),
            Some(ScheduleState::Running { rerun: false })
        );

        assert_eq!(orch.submit("a").unwrap(), Submission::Coalesced);
        assert_eq!(orch.submit("a").unwrap(), Submission::Coalesced);
        gate.send(()).unwrap();

        wait_until(|| analyzer.calls() == 2 && orch.schedule_state("a") == Some(ScheduleState::Idle));
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(analyzer.calls(), 2);
        assert!(orch.last_run("a").is_some());
        orch.shutdown();
    }

    #[test]
    fn test_queued_submission_is_not_duplicated() {
        let (analyzer, gate) = GatedAnalyzer::new(false);
        let orch = Orchestrator::start(
            vec![repo("a"), repo("b")],
            analyzer.clone(),
            OrchestratorConfig {
                workers: 1,
                queue_capacity: 8,
            },
            EventEmitter::disabled(),
        )
        .unwrap();

        // The single worker is busy with "a", so "b" waits in the queue
        orch.submit("a").unwrap();
        wait_until(|| analyzer.calls() == 1);
        assert_eq!(orch.submit("b").unwrap(), Submission::Queued);
        assert_eq!(orch.submit("b").unwrap(), Submission::AlreadyQueued);
        gate.send(()).unwrap();

        wait_until(|| orch.schedule_state("b") == Some(ScheduleState::Idle) && analyzer.calls() == 2);
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(analyzer.calls(), 2);
        orch.shutdown();
    }

    #[test]
    fn test_unknown_repository_is_rejected() {
        let (analyzer, _gate) = GatedAnalyzer::new(false);
        let orch =
            Orchestrator::start(vec![repo("a")], analyzer, config(), EventEmitter::disabled())
                .unwrap();
        assert!(matches!(
            orch.submit("nope"),
            Err(CodewatchError::RepositoryNotFound { .. })
        ));
        assert!(orch.last_run("a").is_none());
        orch.shutdown();
    }

    #[test]
    fn test_panicking_run_releases_repository() {
        let (analyzer, gate) = GatedAnalyzer::new(true);
        let orch = Orchestrator::start(
            vec![repo("a")],
            analyzer.clone(),
            OrchestratorConfig {
                workers: 1,
                queue_capacity: 8,
            },
            EventEmitter::disabled(),
        )
        .unwrap();

        orch.submit("a").unwrap();
        wait_until(|| analyzer.calls() == 1);
        gate.send(()).unwrap();
        wait_until(|| orch.schedule_state("a") == Some(ScheduleState::Idle));

        // Same worker is still alive and the lock was released
        orch.submit("a").unwrap();
        wait_until(|| analyzer.calls() == 2);
        orch.shutdown();
    }

    #[test]
    fn test_reload_keeps_history_and_drops_removed() {
        let (analyzer, gate) = GatedAnalyzer::new(false);
        gate.send(()).unwrap();
        let orch = Orchestrator::start(
            vec![repo("a"), repo("b")],
            analyzer.clone(),
            config(),
            EventEmitter::disabled(),
        )
        .unwrap();
        orch.submit("a").unwrap();
        wait_until(|| orch.last_run("a").is_some());

        orch.reload(vec![repo("a"), repo("c")], analyzer);
        assert_eq!(orch.repositories(), vec!["a", "c"]);
        assert!(orch.last_run("a").is_some());
        assert!(orch.submit("b").is_err());
        orch.shutdown();
    }
}
