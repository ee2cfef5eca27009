//! DiffExtractor: changed files → flattened text bundle
//!
//! The external flattening tool (repomix by default) is invoked with the list
//! of changed files, while the repository's ignore file is temporarily replaced
//! by a restrictive pattern list (see [`IgnoreOverride`]).

mod ignore_guard;

pub use ignore_guard::IgnoreOverride;

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::config::FlattenerSettings;
use crate::error::{CodewatchError, Result};
use crate::git::{self, ChangeType, ChangedFile};

/// Which part of the repository to flatten
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractMode {
    /// Entire tree, subject to include/ignore patterns
    Full,
    /// Working tree vs HEAD, plus untracked files
    #[default]
    Incremental,
    /// Files touched by the HEAD commit
    LastCommit,
}

impl ExtractMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
            Self::LastCommit => "last_commit",
        }
    }
}

/// A bounded bundle plus what went into it
#[derive(Debug, Clone)]
pub struct Bundle {
    pub mode: ExtractMode,
    pub text: String,
    /// Every relevant changed path, deletions included (empty in full mode)
    pub changed_files: Vec<String>,
    /// Paths handed to the flattening tool
    pub flattened_files: Vec<String>,
    /// How many of `changed_files` are new (added or untracked)
    pub added_files: usize,
    /// Character count before truncation
    pub original_chars: usize,
    pub truncated: bool,
}

/// Result of an extraction
#[derive(Debug, Clone)]
pub enum Extraction {
    /// Nothing to analyze; the run short-circuits
    Empty { reason: &'static str },
    Bundle(Bundle),
}

/// Runs the flattening tool against a repository
pub struct DiffExtractor {
    settings: FlattenerSettings,
    output_dir: PathBuf,
}

impl DiffExtractor {
    /// `output_dir` is the report directory relative to each repository root
    pub fn new(settings: FlattenerSettings, output_dir: PathBuf) -> Self {
        Self {
            settings,
            output_dir,
        }
    }

    pub fn extract(&self, repo_root: &Path, mode: ExtractMode) -> Result<Extraction> {
        let (changed_files, flattened_files, added_files) = match mode {
            ExtractMode::Full => (Vec::new(), Vec::new(), 0),
            ExtractMode::Incremental | ExtractMode::LastCommit => {
                let changes = self.changed_files(repo_root, mode)?;
                if changes.is_empty() {
                    tracing::info!(
                        "[EXTRACT] {}: no changes ({})",
                        repo_root.display(),
                        mode.as_str()
                    );
                    return Ok(Extraction::Empty {
                        reason: "no changed files",
                    });
                }
                let flattened: Vec<String> = changes
                    .iter()
                    .filter(|c| c.exists_after())
                    .map(|c| c.path.clone())
                    .collect();
                if flattened.is_empty() {
                    tracing::info!(
                        "[EXTRACT] {}: only deletions ({} files)",
                        repo_root.display(),
                        changes.len()
                    );
                    return Ok(Extraction::Empty {
                        reason: "only deleted files",
                    });
                }
                let added = changes
                    .iter()
                    .filter(|c| c.change_type == ChangeType::Added)
                    .count();
                (changes.into_iter().map(|c| c.path).collect(), flattened, added)
            }
        };

        let text = self.run_tool(repo_root, mode, &flattened_files)?;
        if text.trim().is_empty() {
            tracing::info!(
                "[EXTRACT] {}: flattening tool produced no output",
                repo_root.display()
            );
            return Ok(Extraction::Empty {
                reason: "empty bundle",
            });
        }

        let (text, original_chars, truncated) =
            truncate_bundle(text, self.settings.max_bundle_chars);
        if truncated {
            tracing::warn!(
                "[EXTRACT] {}: bundle truncated to {} of {} characters",
                repo_root.display(),
                self.settings.max_bundle_chars,
                original_chars
            );
        }

        Ok(Extraction::Bundle(Bundle {
            mode,
            text,
            changed_files,
            flattened_files,
            added_files,
            original_chars,
            truncated,
        }))
    }

    /// Relevant changed files, excluding our own output and the ignore file
    fn changed_files(&self, repo_root: &Path, mode: ExtractMode) -> Result<Vec<ChangedFile>> {
        let cwd = Some(repo_root);
        if !git::is_git_repo(cwd) {
            return Err(CodewatchError::ToolInvocation {
                tool: "git".to_string(),
                message: format!("{} is not inside a git work tree", repo_root.display()),
            });
        }
        let changes = match mode {
            ExtractMode::LastCommit => git::get_commit_changed_files("HEAD", cwd),
            _ => git::get_working_tree_changes(cwd),
        }
        .map_err(|e| CodewatchError::ToolInvocation {
            tool: "git".to_string(),
            message: e.to_string(),
        })?;

        Ok(changes
            .into_iter()
            .filter(|c| {
                let path = Path::new(&c.path);
                !path.starts_with(&self.output_dir) && path != self.settings.ignore_file.as_path()
            })
            .collect())
    }

    fn run_tool(&self, repo_root: &Path, mode: ExtractMode, files: &[String]) -> Result<String> {
        let program = which::which(&self.settings.program).map_err(|e| {
            CodewatchError::ToolInvocation {
                tool: self.settings.program.clone(),
                message: format!("not found on PATH: {}", e),
            }
        })?;

        let mut command = Command::new(&program);
        command.args(&self.settings.args).current_dir(repo_root);
        let includes = match mode {
            ExtractMode::Full => self.settings.include_patterns.join(","),
            _ => files.join(","),
        };
        if !includes.is_empty() {
            command.arg(&self.settings.include_flag).arg(includes);
        }

        let guard = IgnoreOverride::acquire(
            &repo_root.join(&self.settings.ignore_file),
            &repo_root.join(&self.output_dir),
            &self.ignore_patterns(),
        )?;

        tracing::debug!(
            "[EXTRACT] Running {} in {} ({} files)",
            program.display(),
            repo_root.display(),
            files.len()
        );
        let output = command.output();
        guard.restore()?;

        let output = output.map_err(|e| CodewatchError::ToolInvocation {
            tool: self.settings.program.clone(),
            message: e.to_string(),
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CodewatchError::ToolInvocation {
                tool: self.settings.program.clone(),
                message: format!("exited with {}: {}", output.status, stderr.trim()),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn ignore_patterns(&self) -> Vec<String> {
        let mut patterns = self.settings.ignore_patterns.clone();
        let own = format!("{}/", self.output_dir.to_string_lossy().trim_end_matches('/'));
        if !patterns.contains(&own) {
            patterns.push(own);
        }
        patterns
    }
}

/// Cut at a line boundary below `max_chars` and append an explicit marker
fn truncate_bundle(text: String, max_chars: usize) -> (String, usize, bool) {
    let total = text.chars().count();
    if total <= max_chars {
        return (text, total, false);
    }

    let cut = text
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let cut = text[..cut].rfind('\n').map(|i| i + 1).unwrap_or(cut);

    let mut out = text[..cut].to_string();
    let shown = out.chars().count();
    out.push_str(&format!(
        "\n[... bundle truncated: {} of {} characters shown ...]\n",
        shown, total
    ));
    (out, total, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::git_command;
    use std::fs;
    use tempfile::TempDir;

    /// Shell script standing in for the flattening tool: prints each included
    /// file as a markdown section and echoes the active ignore file.
    const FLATTEN: &str = r#"
IFS=,
for f in $2; do
  printf '## File: %s\n```\n' "$f"
  cat "$f"
  printf '\n```\n\n'
done
if [ -f .repomixignore ]; then printf '## File: IGNORE\n'; cat .repomixignore; fi
"#;

    fn settings(program: &str, args: &[&str]) -> FlattenerSettings {
        FlattenerSettings {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            ..FlattenerSettings::default()
        }
    }

    fn shell_extractor() -> DiffExtractor {
        DiffExtractor::new(
            settings("sh", &["-c", FLATTEN, "flatten"]),
            PathBuf::from(".codewatch"),
        )
    }

    fn init_repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        let cwd = Some(dir.path());
        for args in [
            vec!["init", "-q"],
            vec!["config", "user.email", "test@example.com"],
            vec!["config", "user.name", "Test"],
        ] {
            git_command(&args, cwd).unwrap();
        }
        fs::write(dir.path().join("base.py"), "def base():\n    return 1\n").unwrap();
        git_command(&["add", "."], cwd).unwrap();
        git_command(&["commit", "-q", "-m", "init"], cwd).unwrap();
        dir
    }

    #[test]
    fn test_clean_tree_is_empty() {
        let repo = init_repo();
        let result = shell_extractor()
            .extract(repo.path(), ExtractMode::Incremental)
            .unwrap();
        assert!(matches!(result, Extraction::Empty { .. }));
    }

    #[test]
    fn test_incremental_bundle_has_only_changed_files() {
        let repo = init_repo();
        fs::write(repo.path().join("new.py"), "def g(y): return y*2\n").unwrap();
        fs::create_dir_all(repo.path().join(".codewatch/demo")).unwrap();
        fs::write(repo.path().join(".codewatch/demo/analysis.json"), "{}").unwrap();

        let Extraction::Bundle(bundle) = shell_extractor()
            .extract(repo.path(), ExtractMode::Incremental)
            .unwrap()
        else {
            panic!("expected bundle");
        };
        assert_eq!(bundle.changed_files, vec!["new.py".to_string()]);
        assert_eq!(bundle.added_files, 1);
        assert!(bundle.text.contains("## File: new.py"));
        assert!(!bundle.text.contains("base.py"));
        // The tool saw the restrictive list, including our output dir
        assert!(bundle.text.contains(".codewatch/"));
        assert!(!bundle.truncated);
        // ...and the override is gone afterwards
        assert!(!repo.path().join(".repomixignore").exists());
    }

    #[test]
    fn test_deleted_files_counted_but_not_flattened() {
        let repo = init_repo();
        fs::remove_file(repo.path().join("base.py")).unwrap();
        let result = shell_extractor()
            .extract(repo.path(), ExtractMode::Incremental)
            .unwrap();
        assert!(matches!(
            result,
            Extraction::Empty {
                reason: "only deleted files"
            }
        ));
    }

    #[test]
    fn test_last_commit_mode() {
        let repo = init_repo();
        let Extraction::Bundle(bundle) = shell_extractor()
            .extract(repo.path(), ExtractMode::LastCommit)
            .unwrap()
        else {
            panic!("expected bundle");
        };
        assert_eq!(bundle.flattened_files, vec!["base.py".to_string()]);
    }

    #[test]
    fn test_plain_directory_needs_git_for_incremental() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("x.py"), "x = 1\n").unwrap();
        let err = shell_extractor()
            .extract(dir.path(), ExtractMode::Incremental)
            .unwrap_err();
        match err {
            CodewatchError::ToolInvocation { tool, message } => {
                assert_eq!(tool, "git");
                assert!(message.contains("not inside a git work tree"), "{}", message);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_missing_tool_is_tool_invocation_error() {
        let repo = init_repo();
        fs::write(repo.path().join("x.py"), "x = 1\n").unwrap();
        let extractor = DiffExtractor::new(
            settings("definitely-not-a-flattener-xyz", &[]),
            PathBuf::from(".codewatch"),
        );
        let err = extractor
            .extract(repo.path(), ExtractMode::Incremental)
            .unwrap_err();
        assert!(matches!(err, CodewatchError::ToolInvocation { .. }));
    }

    #[test]
    fn test_tool_failure_restores_ignore_file() {
        let repo = init_repo();
        fs::write(repo.path().join(".repomixignore"), "mine/\n").unwrap();
        git_command(&["add", ".repomixignore"], Some(repo.path())).unwrap();
        git_command(&["commit", "-q", "-m", "ignore"], Some(repo.path())).unwrap();
        fs::write(repo.path().join("x.py"), "x = 1\n").unwrap();

        let extractor = DiffExtractor::new(settings("false", &[]), PathBuf::from(".codewatch"));
        for _ in 0..2 {
            let err = extractor
                .extract(repo.path(), ExtractMode::Incremental)
                .unwrap_err();
            assert!(matches!(err, CodewatchError::ToolInvocation { .. }));
            assert_eq!(
                fs::read_to_string(repo.path().join(".repomixignore")).unwrap(),
                "mine/\n"
            );
        }
    }

    #[test]
    fn test_truncation_marker() {
        let text = "line one\nline two\nline three\n".to_string();
        let (out, total, truncated) = truncate_bundle(text, 12);
        assert!(truncated);
        assert_eq!(total, 29);
        assert!(out.starts_with("line one\n"));
        assert!(out.contains("[... bundle truncated: 9 of 29 characters shown ...]"));

        let (same, _, truncated) = truncate_bundle("short".to_string(), 100);
        assert_eq!(same, "short");
        assert!(!truncated);
    }
}
