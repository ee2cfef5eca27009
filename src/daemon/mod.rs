//! Daemon wiring
//!
//! ```text
//! ChangeWatcher (thread per repo) ──submit──> Orchestrator ──> workers ──> Pipeline
//!                                                 ^                          │
//! control server (tokio) ──analyze_now/reload─────┘           PipelineEvent  │
//!                                                                            v
//!                                          StatusBoard ──> events.jsonl, status.json
//! ```
//!
//! Everything that owns a blocking HTTP client (the pipeline) is built and
//! torn down outside the async runtime: [`Daemon::start`] and [`Daemon::stop`]
//! are synchronous, and reloads run on the blocking pool.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::config::Config;
use crate::control::{self, ControlHandler, StatusReply};
use crate::error::{CodewatchError, Result};
use crate::orchestrator::{Orchestrator, Submission};
use crate::pipeline::{EventEmitter, Pipeline, PipelineEvent, StatusBoard, StatusView};
use crate::watcher::{ChangeWatcher, WatcherConfig, WatcherHandle};

pub const PID_FILE: &str = "daemon.pid";
pub const LOG_FILE: &str = "daemon.log";

/// Files the daemon keeps in its state directory
#[derive(Debug, Clone)]
pub struct DaemonPaths {
    pub state_dir: PathBuf,
    pub pid: PathBuf,
    pub log: PathBuf,
    pub events: PathBuf,
    pub status: PathBuf,
}

impl DaemonPaths {
    pub fn new(state_dir: PathBuf) -> Self {
        Self {
            pid: state_dir.join(PID_FILE),
            log: state_dir.join(LOG_FILE),
            events: state_dir.join(crate::pipeline::EVENTS_FILE),
            status: state_dir.join(crate::pipeline::STATUS_FILE),
            state_dir,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.daemon.state_dir())
    }

    /// Pid recorded by a running (or crashed) daemon
    pub fn read_pid(&self) -> Option<u32> {
        fs::read_to_string(&self.pid).ok()?.trim().parse().ok()
    }

    /// Pid of a daemon that is actually alive
    pub fn running_pid(&self) -> Option<u32> {
        self.read_pid().filter(|pid| is_process_alive(*pid))
    }
}

/// Probe a process without signalling it
pub fn is_process_alive(pid: u32) -> bool {
    if cfg!(target_os = "linux") {
        return Path::new(&format!("/proc/{}", pid)).exists();
    }
    Command::new("kill")
        .args(["-0", &pid.to_string()])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Start one watcher per repository
///
/// A repository whose path is missing still gets a watcher, which retries
/// until the path appears; only invalid trigger globs skip a repository.
fn spawn_watchers(config: &Config, orchestrator: &Arc<Orchestrator>) -> Vec<WatcherHandle> {
    let ignored = [
        config.daemon.output_dir.as_path(),
        config.flattener.ignore_file.as_path(),
    ];
    let watcher_config = WatcherConfig {
        debounce_window: config.daemon.debounce_window(),
        ..WatcherConfig::default()
    };

    let mut handles = Vec::with_capacity(config.repositories.len());
    for repo in &config.repositories {
        let watcher = match ChangeWatcher::new(repo, &ignored, watcher_config.clone()) {
            Ok(watcher) => watcher,
            Err(e) => {
                tracing::error!(
                    repository = repo.name.as_str(),
                    step = "watch",
                    "[DAEMON] Not watching {}: {}",
                    repo.path.display(),
                    e
                );
                continue;
            }
        };
        let orchestrator = Arc::clone(orchestrator);
        handles.push(watcher.spawn(move |signal| {
            match orchestrator.submit(&signal.repository) {
                Ok(submission) => tracing::debug!(
                    "[DAEMON] {}: settle signal ({} events) -> {:?}",
                    signal.repository,
                    signal.event_count,
                    submission
                ),
                Err(e) => tracing::warn!(
                    "[DAEMON] {}: settle signal dropped: {}",
                    signal.repository,
                    e
                ),
            }
        }));
    }
    handles
}

/// Control-channel view of the running daemon
struct DaemonControl {
    config_path: PathBuf,
    config: RwLock<Config>,
    orchestrator: Arc<Orchestrator>,
    watchers: Mutex<Vec<WatcherHandle>>,
    status: StatusView,
    events: EventEmitter,
    shutdown: watch::Sender<bool>,
}

impl ControlHandler for DaemonControl {
    fn status(&self) -> StatusReply {
        let schedule = self
            .orchestrator
            .repositories()
            .into_iter()
            .filter_map(|name| {
                let state = self.orchestrator.schedule_state(&name)?;
                Some((name, state))
            })
            .collect();
        StatusReply {
            daemon: self.status.snapshot(),
            schedule,
        }
    }

    fn analyze_now(&self, repository: &str) -> Result<Submission> {
        let name = self.config.read().repository(repository)?.name.clone();
        tracing::info!("[DAEMON] analyze-now requested for {}", name);
        self.orchestrator.submit(&name)
    }

    fn reload_config(&self) -> Result<Vec<String>> {
        let config = Config::load_from(&self.config_path)?;
        let pipeline = Pipeline::from_config(&config)?.with_events(self.events.clone());

        {
            let mut watchers = self.watchers.lock();
            for handle in watchers.drain(..) {
                handle.stop();
            }
        }
        self.orchestrator
            .reload(config.repositories.clone(), Arc::new(pipeline));
        *self.watchers.lock() = spawn_watchers(&config, &self.orchestrator);

        if config.daemon.control_addr != self.config.read().daemon.control_addr {
            tracing::warn!("[DAEMON] control_addr changes take effect after a restart");
        }
        let names = config.repositories.iter().map(|r| r.name.clone()).collect();
        *self.config.write() = config;
        tracing::info!("[DAEMON] Configuration reloaded from {}", self.config_path.display());
        Ok(names)
    }

    fn shutdown(&self) {
        tracing::info!("[DAEMON] Shutdown requested");
        let _ = self.shutdown.send(true);
    }
}

/// The long-lived process
pub struct Daemon {
    control: Arc<DaemonControl>,
    board: StatusBoard,
    paths: DaemonPaths,
    shutdown: watch::Receiver<bool>,
}

impl Daemon {
    /// Load configuration and start watchers, workers and the status board
    ///
    /// Must be called outside the async runtime.
    pub fn start(config_path: PathBuf) -> Result<Self> {
        let config = Config::load_from(&config_path)?;
        let paths = DaemonPaths::from_config(&config);
        fs::create_dir_all(&paths.state_dir)?;
        if let Some(pid) = paths.running_pid() {
            if pid != std::process::id() {
                return Err(CodewatchError::Control {
                    message: format!("daemon already running (pid {})", pid),
                });
            }
        }

        let (events, receiver) = EventEmitter::channel();
        let board = StatusBoard::spawn(receiver, paths.state_dir.clone())?;
        let pipeline = Pipeline::from_config(&config)?.with_events(events.clone());
        let orchestrator = Arc::new(Orchestrator::start(
            config.repositories.clone(),
            Arc::new(pipeline),
            (&config.daemon).into(),
            events.clone(),
        )?);
        let watchers = spawn_watchers(&config, &orchestrator);

        fs::write(&paths.pid, std::process::id().to_string())?;
        events.emit(PipelineEvent::DaemonStarted {
            repositories: config.repositories.iter().map(|r| r.name.clone()).collect(),
            timestamp: Utc::now(),
        });
        tracing::info!(
            "[DAEMON] Started (pid {}) watching {} of {} repositories",
            std::process::id(),
            watchers.len(),
            config.repositories.len()
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let control = Arc::new(DaemonControl {
            config_path,
            config: RwLock::new(config),
            orchestrator,
            watchers: Mutex::new(watchers),
            status: board.view(),
            events,
            shutdown: shutdown_tx,
        });

        Ok(Self {
            control,
            board,
            paths,
            shutdown: shutdown_rx,
        })
    }

    pub fn paths(&self) -> &DaemonPaths {
        &self.paths
    }

    /// Serve the control channel until a shutdown request or signal
    pub async fn serve(&self) -> Result<()> {
        let addr = self.control.config.read().daemon.control_addr.clone();
        let listener = TcpListener::bind(&addr).await.map_err(|e| CodewatchError::Control {
            message: format!("cannot bind control address {}: {}", addr, e),
        })?;

        let handler: Arc<dyn ControlHandler> = self.control.clone();
        let server = tokio::spawn(control::serve(listener, handler, self.shutdown.clone()));

        let mut requested = self.shutdown.clone();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("[DAEMON] Interrupted"),
            _ = terminate_signal() => tracing::info!("[DAEMON] Terminated"),
            _ = requested.changed() => {}
        }
        let _ = self.control.shutdown.send(true);
        if let Err(e) = server.await {
            tracing::error!("[DAEMON] control server task failed: {}", e);
        }
        Ok(())
    }

    /// Stop watchers, drain workers, flush status and remove the pid file
    ///
    /// Must be called outside the async runtime.
    pub fn stop(self) {
        let Self {
            control,
            board,
            paths,
            ..
        } = self;

        for handle in control.watchers.lock().drain(..) {
            handle.stop();
        }
        control.events.emit(PipelineEvent::DaemonStopping {
            timestamp: Utc::now(),
        });
        control.orchestrator.shutdown();
        // Last emitters go with the control state and pipeline
        drop(control);
        board.join();

        if let Err(e) = fs::remove_file(&paths.pid) {
            tracing::warn!("[DAEMON] cannot remove {}: {}", paths.pid.display(), e);
        }
        tracing::info!("[DAEMON] Stopped");
    }
}

#[cfg(unix)]
async fn terminate_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(_) => std::future::pending::<()>().await,
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    std::future::pending::<()>().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_paths_layout() {
        let dir = TempDir::new().unwrap();
        let paths = DaemonPaths::new(dir.path().to_path_buf());
        assert_eq!(paths.pid, dir.path().join("daemon.pid"));
        assert_eq!(paths.events, dir.path().join("events.jsonl"));
        assert_eq!(paths.status, dir.path().join("status.json"));
        assert!(paths.read_pid().is_none());

        fs::write(&paths.pid, format!("{}\n", std::process::id())).unwrap();
        assert_eq!(paths.running_pid(), Some(std::process::id()));

        fs::write(&paths.pid, "not a pid").unwrap();
        assert!(paths.read_pid().is_none());
    }
}
