//! File system watcher that turns bursts of edits into settle signals
//!
//! Uses the `notify` crate (through `notify-debouncer-mini`, which batches raw
//! events into short ticks) and layers a quiet-period tracker on top: a settle
//! signal fires once no relevant event has arrived for the whole debounce window.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌───────────────┐     ┌──────────────┐
//! │   notify    │────>│  debouncer  │────>│ ChangeFilter  │────>│ SettleTracker│──> on_settle
//! │   watcher   │     │  (batching) │     │ (self/ignore) │     │ (quiet gap)  │
//! └─────────────┘     └─────────────┘     └───────────────┘     └──────────────┘
//! ```
//!
//! The watcher thread never does pipeline work; `on_settle` is expected to only
//! enqueue. When the OS watch cannot be established (path missing at start or
//! deleted later, inotify limits) the thread logs and retries with exponential
//! backoff.

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use globset::GlobSet;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use notify::RecursiveMode;
use notify_debouncer_mini::new_debouncer;

use crate::config::RepositoryConfig;
use crate::error::Result;

/// Configuration for the change watcher
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Quiet period required before a settle signal (default: 5s)
    pub debounce_window: Duration,
    /// Whether to respect the repository's .gitignore
    pub respect_gitignore: bool,
    /// First retry delay when the watch cannot be established
    pub initial_backoff: Duration,
    /// Upper bound for the retry delay
    pub max_backoff: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_window: Duration::from_secs(5),
            respect_gitignore: true,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl WatcherConfig {
    /// Batching tick for the underlying debouncer, well below the quiet window
    fn batch_interval(&self) -> Duration {
        (self.debounce_window / 4).clamp(Duration::from_millis(50), Duration::from_millis(500))
    }
}

/// One debounced notification that a repository stopped changing
#[derive(Debug, Clone)]
pub struct SettleSignal {
    pub repository: String,
    pub settled_at: DateTime<Utc>,
    /// Relevant raw events folded into this signal
    pub event_count: usize,
}

/// Quiet-period state machine
///
/// Pure over `Instant`s so it can be driven deterministically in tests.
#[derive(Debug)]
pub struct SettleTracker {
    window: Duration,
    last_event: Option<Instant>,
    pending: usize,
}

impl SettleTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_event: None,
            pending: 0,
        }
    }

    /// Record `count` relevant events observed at `now`
    pub fn record(&mut self, now: Instant, count: usize) {
        if count == 0 {
            return;
        }
        self.last_event = Some(now);
        self.pending += count;
    }

    /// Returns the folded event count once the window has elapsed without events
    pub fn poll(&mut self, now: Instant) -> Option<usize> {
        let last = self.last_event?;
        if now.duration_since(last) < self.window {
            return None;
        }
        self.last_event = None;
        Some(std::mem::take(&mut self.pending))
    }

    pub fn is_pending(&self) -> bool {
        self.last_event.is_some()
    }
}

/// Decides whether a filesystem event path is relevant to analysis
pub struct ChangeFilter {
    repo_root: PathBuf,
    ignored: Vec<PathBuf>,
    gitignore: Option<Gitignore>,
    triggers: Option<GlobSet>,
}

impl ChangeFilter {
    /// Build a filter for `repo`
    ///
    /// `ignored` holds repo-relative paths the pipeline itself writes (the
    /// report directory, the flattening tool's ignore file); events under them
    /// never count.
    pub fn new(repo: &RepositoryConfig, ignored: &[&Path], respect_gitignore: bool) -> Result<Self> {
        let repo_root = repo.path.canonicalize()?;
        let ignored = ignored
            .iter()
            .map(|p| resolve_path(&repo_root.join(p)))
            .collect();

        let gitignore = if respect_gitignore {
            let mut builder = GitignoreBuilder::new(&repo_root);
            let gitignore_path = repo_root.join(".gitignore");
            if gitignore_path.is_file() {
                if let Some(e) = builder.add(&gitignore_path) {
                    tracing::warn!("[WATCHER] {}: unreadable .gitignore: {}", repo.name, e);
                }
            }
            builder.build().ok()
        } else {
            None
        };

        Ok(Self {
            repo_root,
            ignored,
            gitignore,
            triggers: repo.trigger_set()?,
        })
    }

    /// Check whether an event at `path` should count toward a settle signal
    ///
    /// Paths are compared after canonicalisation, component by component, so a
    /// sibling such as `.codewatch-old/` is not mistaken for `.codewatch/`.
    pub fn is_relevant(&self, path: &Path) -> bool {
        let resolved = resolve_path(path);

        let Ok(relative) = resolved.strip_prefix(&self.repo_root) else {
            return false;
        };

        if self.ignored.iter().any(|p| resolved.starts_with(p)) {
            return false;
        }

        if relative
            .components()
            .any(|c| matches!(c, Component::Normal(name) if name == ".git"))
        {
            return false;
        }

        if let Some(gitignore) = &self.gitignore {
            if gitignore
                .matched_path_or_any_parents(relative, resolved.is_dir())
                .is_ignore()
            {
                return false;
            }
        }

        match &self.triggers {
            Some(set) => set.is_match(relative),
            None => true,
        }
    }
}

/// Canonicalise a path that may no longer exist (deleted files, not-yet-created dirs)
fn resolve_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => resolve_path(parent).join(name),
        _ => path.to_path_buf(),
    }
}

/// Watches one repository and emits settle signals
pub struct ChangeWatcher {
    repo: RepositoryConfig,
    ignored: Vec<PathBuf>,
    config: WatcherConfig,
}

impl ChangeWatcher {
    /// Fails only on invalid trigger globs; a repository path that is missing
    /// or unreadable is retried with backoff once the watcher runs
    pub fn new(repo: &RepositoryConfig, ignored: &[&Path], config: WatcherConfig) -> Result<Self> {
        repo.trigger_set()?;
        Ok(Self {
            repo: repo.clone(),
            ignored: ignored.iter().map(|p| p.to_path_buf()).collect(),
            config,
        })
    }

    /// Start the watcher thread; `on_settle` runs on that thread and must not block
    pub fn spawn<F>(self, on_settle: F) -> WatcherHandle
    where
        F: Fn(SettleSignal) + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);
        let name = self.repo.name.clone();

        let spawned = std::thread::Builder::new()
            .name(format!("watch-{}", name))
            .spawn(move || self.run(&thread_running, &on_settle));

        if let Err(e) = spawned {
            tracing::error!("[WATCHER] {}: failed to spawn watcher thread: {}", name, e);
            running.store(false, Ordering::SeqCst);
        }

        WatcherHandle {
            repository: name,
            running,
        }
    }

    fn run(self, running: &AtomicBool, on_settle: &dyn Fn(SettleSignal)) {
        let mut backoff = self.config.initial_backoff;

        while running.load(Ordering::SeqCst) {
            match self.watch_until_broken(running, on_settle) {
                Ok(()) => break,
                Err(reason) => {
                    tracing::warn!(
                        repository = %self.repo.name,
                        "[WATCHER] watch on {} unavailable ({}); retrying in {:?}",
                        self.repo.path.display(),
                        reason,
                        backoff
                    );
                    sleep_while_running(running, backoff);
                    backoff = (backoff * 2).min(self.config.max_backoff);
                }
            }
        }

        tracing::debug!("[WATCHER] {} stopped", self.repo.name);
    }

    /// Runs until stopped (Ok) or until the watch breaks (Err with reason)
    fn watch_until_broken(
        &self,
        running: &AtomicBool,
        on_settle: &dyn Fn(SettleSignal),
    ) -> std::result::Result<(), String> {
        let ignored: Vec<&Path> = self.ignored.iter().map(PathBuf::as_path).collect();
        let filter = ChangeFilter::new(&self.repo, &ignored, self.config.respect_gitignore)
            .map_err(|e| e.to_string())?;
        let repository = self.repo.name.as_str();
        let repo_root = filter.repo_root.as_path();

        let (tx, rx) = std::sync::mpsc::channel();
        let mut debouncer =
            new_debouncer(self.config.batch_interval(), tx).map_err(|e| e.to_string())?;
        debouncer
            .watcher()
            .watch(repo_root, RecursiveMode::Recursive)
            .map_err(|e| e.to_string())?;

        tracing::info!(
            "[WATCHER] Watching {} ({}), window {:?}",
            repository,
            repo_root.display(),
            self.config.debounce_window
        );

        let mut tracker = SettleTracker::new(self.config.debounce_window);
        let poll = self.config.batch_interval();

        while running.load(Ordering::SeqCst) {
            match rx.recv_timeout(poll) {
                Ok(Ok(events)) => {
                    let relevant = events
                        .iter()
                        .filter(|event| filter.is_relevant(&event.path))
                        .count();
                    tracing::debug!(
                        "[WATCHER] {}: {} raw events, {} relevant",
                        repository,
                        events.len(),
                        relevant
                    );
                    tracker.record(Instant::now(), relevant);
                }
                Ok(Err(e)) => {
                    tracing::error!("[WATCHER] {}: watcher error: {:?}", repository, e);
                    if !repo_root.exists() {
                        return Err("repository path disappeared".to_string());
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err("event channel disconnected".to_string());
                }
            }

            if let Some(event_count) = tracker.poll(Instant::now()) {
                tracing::info!(
                    "[WATCHER] {} settled after {} events",
                    repository,
                    event_count
                );
                on_settle(SettleSignal {
                    repository: repository.to_string(),
                    settled_at: Utc::now(),
                    event_count,
                });
            }
        }

        // Keep debouncer alive until the loop exits
        drop(debouncer);
        Ok(())
    }
}

fn sleep_while_running(running: &AtomicBool, total: Duration) {
    let step = Duration::from_millis(100);
    let deadline = Instant::now() + total;
    while running.load(Ordering::SeqCst) && Instant::now() < deadline {
        std::thread::sleep(step);
    }
}

/// Handle for controlling a running watcher
pub struct WatcherHandle {
    repository: String,
    running: Arc<AtomicBool>,
}

impl WatcherHandle {
    /// Stop the watcher
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Check if the watcher is still running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn repo_config(path: &Path, triggers: &[&str]) -> RepositoryConfig {
        RepositoryConfig {
            name: "demo".to_string(),
            path: path.to_path_buf(),
            auto_commit: false,
            auto_push: false,
            analysis_triggers: triggers.iter().map(|s| s.to_string()).collect(),
            commit_threshold: 1,
        }
    }

    #[test]
    fn test_watcher_config_default() {
        let config = WatcherConfig::default();
        assert_eq!(config.debounce_window, Duration::from_secs(5));
        assert!(config.respect_gitignore);
        assert_eq!(config.batch_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_tracker_fires_once_after_quiet_window() {
        let start = Instant::now();
        let mut tracker = SettleTracker::new(Duration::from_secs(5));

        tracker.record(start, 3);
        tracker.record(start + Duration::from_secs(2), 1);
        assert_eq!(tracker.poll(start + Duration::from_secs(6)), None);
        assert_eq!(tracker.poll(start + Duration::from_secs(7)), Some(4));
        assert_eq!(tracker.poll(start + Duration::from_secs(20)), None);
        assert!(!tracker.is_pending());
    }

    #[test]
    fn test_tracker_ignores_empty_batches() {
        let start = Instant::now();
        let mut tracker = SettleTracker::new(Duration::from_millis(10));
        tracker.record(start, 0);
        assert_eq!(tracker.poll(start + Duration::from_secs(1)), None);
    }

    #[test]
    fn test_filter_ignores_output_dir_by_component() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".codewatch/demo")).unwrap();
        fs::create_dir_all(dir.path().join(".codewatch-old")).unwrap();
        let filter =
            ChangeFilter::new(&repo_config(dir.path(), &[]), &[Path::new(".codewatch")], true).unwrap();

        assert!(!filter.is_relevant(&dir.path().join(".codewatch/demo/analysis.json")));
        assert!(filter.is_relevant(&dir.path().join(".codewatch-old/notes.md")));
        assert!(filter.is_relevant(&dir.path().join("src/main.rs")));
    }

    #[test]
    fn test_filter_ignores_flattener_ignore_file() {
        let dir = TempDir::new().unwrap();
        let filter = ChangeFilter::new(
            &repo_config(dir.path(), &[]),
            &[Path::new(".codewatch"), Path::new(".repomixignore")],
            true,
        )
        .unwrap();
        assert!(!filter.is_relevant(&dir.path().join(".repomixignore")));
        assert!(filter.is_relevant(&dir.path().join(".gitignore")));
    }

    #[test]
    fn test_filter_ignores_output_dir_before_it_exists() {
        let dir = TempDir::new().unwrap();
        let filter =
            ChangeFilter::new(&repo_config(dir.path(), &[]), &[Path::new("reports/ai")], true).unwrap();
        assert!(!filter.is_relevant(&dir.path().join("reports/ai/analysis.md")));
        assert!(filter.is_relevant(&dir.path().join("reports/manual.md")));
    }

    #[test]
    fn test_filter_ignores_git_internals_and_gitignored() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".gitignore"), "build/\n*.log\n").unwrap();
        let filter =
            ChangeFilter::new(&repo_config(dir.path(), &[]), &[Path::new(".codewatch")], true).unwrap();

        assert!(!filter.is_relevant(&dir.path().join(".git/index")));
        assert!(!filter.is_relevant(&dir.path().join("build/out.o")));
        assert!(!filter.is_relevant(&dir.path().join("debug.log")));
        assert!(filter.is_relevant(&dir.path().join("lib.py")));
    }

    #[test]
    fn test_filter_applies_triggers() {
        let dir = TempDir::new().unwrap();
        let filter = ChangeFilter::new(
            &repo_config(dir.path(), &["**/*.py", "requirements.txt"]),
            &[Path::new(".codewatch")],
            true,
        )
        .unwrap();

        assert!(filter.is_relevant(&dir.path().join("pkg/mod.py")));
        assert!(filter.is_relevant(&dir.path().join("requirements.txt")));
        assert!(!filter.is_relevant(&dir.path().join("README.md")));
    }

    #[test]
    fn test_filter_rejects_paths_outside_repo() {
        let dir = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let filter =
            ChangeFilter::new(&repo_config(dir.path(), &[]), &[Path::new(".codewatch")], true).unwrap();
        assert!(!filter.is_relevant(&other.path().join("x.rs")));
    }

    #[test]
    fn test_watcher_emits_single_signal_for_burst() {
        let dir = TempDir::new().unwrap();
        let config = WatcherConfig {
            debounce_window: Duration::from_millis(400),
            ..WatcherConfig::default()
        };
        let watcher =
            ChangeWatcher::new(&repo_config(dir.path(), &[]), &[Path::new(".codewatch")], config)
                .unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        let handle = watcher.spawn(move |signal| {
            let _ = tx.send(signal);
        });

        // Give the OS watch a moment to register
        std::thread::sleep(Duration::from_millis(300));
        for i in 0..5 {
            fs::write(dir.path().join(format!("f{}.py", i)), "x = 1\n").unwrap();
        }

        let signal = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(signal.repository, "demo");
        assert!(signal.event_count >= 1);
        assert!(rx.recv_timeout(Duration::from_millis(1500)).is_err());

        handle.stop();
        assert!(!handle.is_running());
    }

    #[test]
    fn test_watcher_waits_for_missing_path() {
        let parent = TempDir::new().unwrap();
        let path = parent.path().join("checkout");
        let config = WatcherConfig {
            debounce_window: Duration::from_millis(300),
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(200),
            ..WatcherConfig::default()
        };
        let watcher =
            ChangeWatcher::new(&repo_config(&path, &[]), &[Path::new(".codewatch")], config)
                .unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        let handle = watcher.spawn(move |signal| {
            let _ = tx.send(signal);
        });

        std::thread::sleep(Duration::from_millis(400));
        assert!(handle.is_running());
        fs::create_dir_all(&path).unwrap();

        // Keep writing until the retried watch picks the directory up
        let deadline = Instant::now() + Duration::from_secs(10);
        let signal = loop {
            fs::write(path.join("app.py"), "x = 1\n").unwrap();
            if let Ok(signal) = rx.recv_timeout(Duration::from_millis(700)) {
                break signal;
            }
            assert!(Instant::now() < deadline, "no settle signal after the path appeared");
        };
        assert_eq!(signal.repository, "demo");

        handle.stop();
    }

    #[test]
    fn test_watcher_rejects_invalid_triggers_up_front() {
        let dir = TempDir::new().unwrap();
        let result = ChangeWatcher::new(
            &repo_config(dir.path(), &["src/[unclosed"]),
            &[Path::new(".codewatch")],
            WatcherConfig::default(),
        );
        assert!(result.is_err());
    }
}
