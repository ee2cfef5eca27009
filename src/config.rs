//! codewatch configuration management.
//!
//! The configuration file is JSON, located at (first match):
//! - `$CODEWATCH_CONFIG`
//! - Linux/macOS: ~/.config/codewatch/config.json
//! - Windows: %APPDATA%\codewatch\config.json
//!
//! Every section rejects unknown fields, and [`Config::validate`] runs at load
//! time so a bad value fails here rather than deep inside a pipeline run.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{CodewatchError, Result};

/// Environment variable overriding the config path
pub const CONFIG_ENV: &str = "CODEWATCH_CONFIG";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Monitored repositories
    pub repositories: Vec<RepositoryConfig>,

    /// Daemon-wide settings
    #[serde(default)]
    pub daemon: DaemonSettings,

    /// LLM endpoint settings
    pub llm: LlmSettings,

    /// Semantic search settings
    #[serde(default)]
    pub semantic: SemanticSettings,

    /// External flattening tool settings
    #[serde(default)]
    pub flattener: FlattenerSettings,
}

/// A single monitored repository
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RepositoryConfig {
    /// Unique repository name
    pub name: String,
    /// Filesystem path to the working tree
    pub path: PathBuf,
    /// Commit updated reports after each successful run
    #[serde(default)]
    pub auto_commit: bool,
    /// Push after committing
    #[serde(default)]
    pub auto_push: bool,
    /// Glob patterns (relative to the repo root) whose changes trigger analysis.
    /// Empty means every non-ignored file triggers.
    #[serde(default)]
    pub analysis_triggers: Vec<String>,
    /// Minimum number of distinct changed files before auto-commit fires
    #[serde(default = "default_commit_threshold")]
    pub commit_threshold: usize,
}

fn default_commit_threshold() -> usize {
    1
}

impl RepositoryConfig {
    /// Filesystem-safe identifier derived from the repository name
    pub fn slug(&self) -> String {
        slugify(&self.name)
    }

    /// Compile `analysis_triggers` into a matcher (None = match everything)
    pub fn trigger_set(&self) -> Result<Option<GlobSet>> {
        if self.analysis_triggers.is_empty() {
            return Ok(None);
        }
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.analysis_triggers {
            let glob = Glob::new(pattern).map_err(|e| {
                CodewatchError::config(format!(
                    "repository '{}': invalid trigger glob '{}': {}",
                    self.name, pattern, e
                ))
            })?;
            builder.add(glob);
        }
        builder.build().map(Some).map_err(|e| {
            CodewatchError::config(format!("repository '{}': {}", self.name, e))
        })
    }
}

/// Lowercase, alphanumeric-and-dash form of a name
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        slug.push_str("repository");
    }
    slug
}

/// Daemon-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonSettings {
    /// Quiet period before a settle signal fires
    #[serde(default = "default_debounce_seconds")]
    pub debounce_seconds: u64,
    /// Number of analysis workers
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_analyses: usize,
    /// Bounded work-queue capacity
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Report directory, relative to each repository root
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Control server address
    #[serde(default = "default_control_addr")]
    pub control_addr: String,
    /// Directory for pid, log, event and status files
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

fn default_debounce_seconds() -> u64 {
    5
}

fn default_max_concurrent() -> usize {
    2
}

fn default_queue_capacity() -> usize {
    64
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".codewatch")
}

fn default_control_addr() -> String {
    "127.0.0.1:7431".to_string()
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            debounce_seconds: default_debounce_seconds(),
            max_concurrent_analyses: default_max_concurrent(),
            queue_capacity: default_queue_capacity(),
            output_dir: default_output_dir(),
            control_addr: default_control_addr(),
            state_dir: None,
        }
    }
}

impl DaemonSettings {
    pub fn debounce_window(&self) -> Duration {
        Duration::from_secs(self.debounce_seconds)
    }

    /// Resolved state directory
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("codewatch")
        })
    }
}

/// LLM endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmSettings {
    /// OpenAI-compatible chat completions URL
    pub endpoint: String,
    /// Model name sent with each request
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Model context window, in tokens
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    /// Maximum payload characters per request
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Base timeout, scaled by analysis type
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_temperature() -> f32 {
    0.2
}

fn default_context_window() -> usize {
    8192
}

fn default_chunk_size() -> usize {
    24_000
}

fn default_request_timeout() -> u64 {
    120
}

/// Which embedding backend to try first
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendPreference {
    #[default]
    Auto,
    EmbeddingModel,
    GeneralModel,
    Lexical,
}

/// Semantic search settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SemanticSettings {
    #[serde(default)]
    pub backend: BackendPreference,
    /// Dedicated embedding model identifier or path, as understood by the endpoint
    #[serde(default)]
    pub model_path: Option<String>,
    /// OpenAI-compatible embeddings URL (derived from the LLM endpoint when absent)
    #[serde(default)]
    pub embedding_endpoint: Option<String>,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// Matches reported per changed block
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Snapshot directory (defaults to the user cache dir)
    #[serde(default)]
    pub index_dir: Option<PathBuf>,
}

fn default_similarity_threshold() -> f32 {
    0.7
}

fn default_max_results() -> usize {
    5
}

impl Default for SemanticSettings {
    fn default() -> Self {
        Self {
            backend: BackendPreference::Auto,
            model_path: None,
            embedding_endpoint: None,
            similarity_threshold: default_similarity_threshold(),
            max_results: default_max_results(),
            index_dir: None,
        }
    }
}

impl SemanticSettings {
    pub fn index_dir(&self) -> PathBuf {
        self.index_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("codewatch")
                .join("index")
        })
    }
}

/// External repository-flattening tool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlattenerSettings {
    /// Program to run (resolved on PATH)
    #[serde(default = "default_flattener_program")]
    pub program: String,
    /// Fixed arguments; the tool must write the bundle to stdout
    #[serde(default = "default_flattener_args")]
    pub args: Vec<String>,
    /// Flag used to pass a comma-separated file list
    #[serde(default = "default_include_flag")]
    pub include_flag: String,
    /// Ignore file the tool reads, relative to the repo root
    #[serde(default = "default_ignore_file")]
    pub ignore_file: PathBuf,
    /// Restrictive ignore-list written for the duration of a call
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,
    /// Include globs for full-tree mode (empty = everything)
    #[serde(default)]
    pub include_patterns: Vec<String>,
    /// Bundles beyond this many characters are truncated with a marker
    #[serde(default = "default_max_bundle_chars")]
    pub max_bundle_chars: usize,
}

fn default_flattener_program() -> String {
    "repomix".to_string()
}

fn default_flattener_args() -> Vec<String> {
    vec![
        "--stdout".to_string(),
        "--style".to_string(),
        "markdown".to_string(),
        "--no-file-summary".to_string(),
    ]
}

fn default_include_flag() -> String {
    "--include".to_string()
}

fn default_ignore_file() -> PathBuf {
    PathBuf::from(".repomixignore")
}

fn default_ignore_patterns() -> Vec<String> {
    [
        ".git/",
        "node_modules/",
        "target/",
        "dist/",
        "build/",
        "__pycache__/",
        ".venv/",
        "venv/",
        "*.min.js",
        "*.map",
        "*.png",
        "*.jpg",
        "*.gif",
        "*.pdf",
        "*.zip",
        "*.lock",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_max_bundle_chars() -> usize {
    200_000
}

impl Default for FlattenerSettings {
    fn default() -> Self {
        Self {
            program: default_flattener_program(),
            args: default_flattener_args(),
            include_flag: default_include_flag(),
            ignore_file: default_ignore_file(),
            ignore_patterns: default_ignore_patterns(),
            include_patterns: Vec::new(),
            max_bundle_chars: default_max_bundle_chars(),
        }
    }
}

impl Config {
    /// Default config location
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("codewatch")
            .join("config.json")
    }

    /// Load and validate configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            CodewatchError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Parse and validate configuration from a JSON string
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| CodewatchError::config(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would otherwise fail deep inside the pipeline
    pub fn validate(&self) -> Result<()> {
        if self.repositories.is_empty() {
            return Err(CodewatchError::config("no repositories configured"));
        }

        let mut names = HashSet::new();
        // Report directories and index snapshots are keyed by slug
        let mut slugs: HashMap<String, &str> = HashMap::new();
        for repo in &self.repositories {
            if repo.name.trim().is_empty() {
                return Err(CodewatchError::config("repository name must not be empty"));
            }
            if !names.insert(repo.name.as_str()) {
                return Err(CodewatchError::config(format!(
                    "duplicate repository name '{}'",
                    repo.name
                )));
            }
            if let Some(other) = slugs.insert(repo.slug(), repo.name.as_str()) {
                return Err(CodewatchError::config(format!(
                    "repositories '{}' and '{}' share the directory name '{}'",
                    other,
                    repo.name,
                    repo.slug()
                )));
            }
            if !repo.path.is_dir() {
                return Err(CodewatchError::config(format!(
                    "repository '{}': path {} is not a directory",
                    repo.name,
                    repo.path.display()
                )));
            }
            if repo.auto_push && !repo.auto_commit {
                return Err(CodewatchError::config(format!(
                    "repository '{}': auto_push requires auto_commit",
                    repo.name
                )));
            }
            repo.trigger_set()?;
        }

        if self.daemon.max_concurrent_analyses == 0 {
            return Err(CodewatchError::config(
                "daemon.max_concurrent_analyses must be at least 1",
            ));
        }
        if self.daemon.queue_capacity == 0 {
            return Err(CodewatchError::config("daemon.queue_capacity must be at least 1"));
        }
        if self.daemon.output_dir.is_absolute() {
            return Err(CodewatchError::config(
                "daemon.output_dir must be relative to the repository root",
            ));
        }

        if self.llm.endpoint.trim().is_empty() || self.llm.model.trim().is_empty() {
            return Err(CodewatchError::config("llm.endpoint and llm.model are required"));
        }
        if self.llm.context_window == 0 || self.llm.chunk_size == 0 {
            return Err(CodewatchError::config(
                "llm.context_window and llm.chunk_size must be positive",
            ));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(CodewatchError::config("llm.temperature must be within [0, 2]"));
        }
        if self.llm.request_timeout_seconds == 0 {
            return Err(CodewatchError::config("llm.request_timeout_seconds must be positive"));
        }

        if !(0.0..=1.0).contains(&self.semantic.similarity_threshold) {
            return Err(CodewatchError::config(
                "semantic.similarity_threshold must be within [0, 1]",
            ));
        }

        if self.flattener.program.trim().is_empty() {
            return Err(CodewatchError::config("flattener.program must not be empty"));
        }
        if self.flattener.max_bundle_chars == 0 {
            return Err(CodewatchError::config("flattener.max_bundle_chars must be positive"));
        }

        Ok(())
    }

    /// Look up a repository by name, falling back to a path match
    pub fn repository(&self, name_or_path: &str) -> Result<&RepositoryConfig> {
        if let Some(repo) = self.repositories.iter().find(|r| r.name == name_or_path) {
            return Ok(repo);
        }
        let wanted = Path::new(name_or_path).canonicalize().ok();
        self.repositories
            .iter()
            .find(|r| wanted.is_some() && r.path.canonicalize().ok() == wanted)
            .ok_or_else(|| CodewatchError::RepositoryNotFound {
                name: name_or_path.to_string(),
            })
    }
}
