//! Shared fixtures for codewatch integration tests
//!
//! - `TestRepo`: a throwaway git working tree
//! - `FakeModel`: a scripted chat model that records every request
//! - a `sh`-based flattening tool that emits `## File:` sections for the
//!   files it is given

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;

use codewatch::config::{FlattenerSettings, LlmSettings, RepositoryConfig, SemanticSettings};
use codewatch::error::{CodewatchError, Result};
use codewatch::llm::{ChatMessage, ChatModel, LlmGateway};
use codewatch::{DiffExtractor, Pipeline, ReportStore, SemanticIndex};

pub const OUTPUT_DIR: &str = ".codewatch";

/// Stand-in for the flattening tool: `sh -c SCRIPT flatten --include a,b`
///
/// Lockfiles are skipped, as the default ignore patterns do for the real tool.
const FLATTEN_SCRIPT: &str = r#"[ "$1" = "--include" ] || exit 0
IFS=,
for f in $2; do
  case "$f" in *.lock) continue ;; esac
  printf '## File: %s\n```\n' "$f"
  cat "$f"
  printf '\n```\n\n'
done
"#;

pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    /// Empty git repository with a committer identity
    pub fn new() -> Self {
        let repo = Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        };
        repo.git(&["init", "-q"]);
        repo.git(&["config", "user.email", "test@test.com"]);
        repo.git(&["config", "user.name", "Test User"]);
        repo.git(&["config", "commit.gpgsign", "false"]);
        repo
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn add_file(&self, relative_path: &str, content: &str) -> &Self {
        let full_path = self.dir.path().join(relative_path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dirs");
        }
        fs::write(&full_path, content).expect("Failed to write file");
        self
    }

    /// Stage everything and commit
    pub fn commit(&self, message: &str) -> &Self {
        self.git(&["add", "-A"]);
        self.git(&["commit", "-q", "-m", message]);
        self
    }

    /// Run git and return stdout, panicking on failure
    pub fn git(&self, args: &[&str]) -> String {
        let output = Command::new("git")
            .current_dir(self.path())
            .args(args)
            .output()
            .expect("Failed to run git");
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).to_string()
    }

    pub fn commit_count(&self) -> usize {
        self.git(&["rev-list", "--count", "HEAD"])
            .trim()
            .parse()
            .expect("Failed to parse commit count")
    }

    pub fn config(&self, name: &str) -> RepositoryConfig {
        RepositoryConfig {
            name: name.to_string(),
            path: self.path().to_path_buf(),
            auto_commit: false,
            auto_push: false,
            analysis_triggers: Vec::new(),
            commit_threshold: 1,
        }
    }

    pub fn report_json(&self, name: &str) -> serde_json::Value {
        let path = self.path().join(OUTPUT_DIR).join(name).join("analysis.json");
        let text = fs::read_to_string(&path).expect("Failed to read report");
        serde_json::from_str(&text).expect("Report is not JSON")
    }
}

pub fn flattener() -> FlattenerSettings {
    FlattenerSettings {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), FLATTEN_SCRIPT.to_string(), "flatten".to_string()],
        include_flag: "--include".to_string(),
        ..FlattenerSettings::default()
    }
}

pub fn llm_settings() -> LlmSettings {
    LlmSettings {
        endpoint: "http://127.0.0.1:9/v1/chat/completions".to_string(),
        model: "test-model".to_string(),
        temperature: 0.2,
        context_window: 8192,
        chunk_size: 24_000,
        request_timeout_seconds: 120,
    }
}

/// Scripted chat model
pub struct FakeModel {
    answer: std::result::Result<String, String>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl FakeModel {
    pub fn answering(text: &str) -> Arc<Self> {
        Arc::new(Self {
            answer: Ok(text.to_string()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            answer: Err(message.to_string()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Concatenated content of every message sent so far
    pub fn sent_text(&self) -> String {
        self.calls
            .lock()
            .iter()
            .flatten()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl ChatModel for FakeModel {
    fn complete(&self, messages: &[ChatMessage], _timeout: Duration) -> Result<String> {
        self.calls.lock().push(messages.to_vec());
        self.answer.clone().map_err(CodewatchError::model)
    }
}

/// Pipeline over the fake tool, a fake model and the given index
pub fn pipeline(model: Arc<FakeModel>, index: Arc<SemanticIndex>) -> Pipeline {
    let output_dir = PathBuf::from(OUTPUT_DIR);
    Pipeline::new(
        DiffExtractor::new(flattener(), output_dir.clone()),
        index,
        LlmGateway::new(model, llm_settings()),
        ReportStore::new(output_dir),
        SemanticSettings::default(),
    )
}

pub const REVIEW: &str = "## Executive Summary
The change adds a lookup helper.

## Critical Issues
- SQL is built by string concatenation in `lookup`.

## Low Priority
- `lookup` could use a more specific name.

## Recommendations
- Use parameterised queries.
";
