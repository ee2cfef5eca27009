//! Git operations for change detection and report publishing
//!
//! This module provides git integration for listing working-tree changes and
//! for staging, committing and pushing report files. It uses subprocess calls
//! to git for maximum compatibility.

mod branch;
mod commit;
mod diff;

pub use branch::{get_current_branch, get_upstream_branch, has_head, is_git_repo};
pub use commit::{commit_paths, get_head_sha, has_staged_changes, push, stage_paths};
pub use diff::{
    get_commit_changed_files, get_untracked_files, get_working_tree_changes, ChangeType,
    ChangedFile,
};

use std::path::Path;
use std::process::Command;

use crate::error::{CodewatchError, Result};

/// Run a git command and return stdout as string
///
/// Failures are reported as `VersionControl` errors tagged with the git
/// subcommand name.
pub fn git_command(args: &[&str], cwd: Option<&Path>) -> Result<String> {
    let mut cmd = Command::new("git");
    // Paths with non-ASCII bytes come back unquoted
    cmd.args(["-c", "core.quotePath=false"]);
    cmd.args(args);

    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let step = args.first().copied().unwrap_or("git");

    let output = cmd
        .output()
        .map_err(|e| CodewatchError::vcs(step, format!("failed to execute git: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let detail = if stderr.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            stderr.trim().to_string()
        };
        return Err(CodewatchError::vcs(
            step,
            format!("git {} failed: {}", args.join(" "), detail),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Run a git command, returning None if it fails (for optional queries)
pub fn git_command_optional(args: &[&str], cwd: Option<&Path>) -> Option<String> {
    git_command(args, cwd).ok()
}
