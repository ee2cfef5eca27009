//! Working-tree and commit change listing

use std::path::Path;

use super::{git_command, has_head};
use crate::error::{CodewatchError, Result};

/// Type of change to a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    /// File was added (including untracked files)
    Added,
    /// File was modified
    Modified,
    /// File was deleted
    Deleted,
    /// File was renamed
    Renamed,
    /// File was copied
    Copied,
    /// Type changed (e.g., file to symlink)
    TypeChanged,
}

impl ChangeType {
    /// Parse from git status letter
    fn from_status_char(c: char) -> Option<Self> {
        match c {
            'A' => Some(Self::Added),
            'M' => Some(Self::Modified),
            'D' => Some(Self::Deleted),
            'R' => Some(Self::Renamed),
            'C' => Some(Self::Copied),
            'T' => Some(Self::TypeChanged),
            _ => None,
        }
    }
}

/// Information about a changed file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    /// Path to the file (relative to repo root)
    pub path: String,
    /// Original path if renamed/copied
    pub old_path: Option<String>,
    /// Type of change
    pub change_type: ChangeType,
}

impl ChangedFile {
    /// Whether the file still exists in the working tree
    pub fn exists_after(&self) -> bool {
        self.change_type != ChangeType::Deleted
    }
}

/// List tracked and untracked changes in the working tree relative to HEAD
///
/// In a repository without commits every cached or untracked file counts as added.
pub fn get_working_tree_changes(cwd: Option<&Path>) -> Result<Vec<ChangedFile>> {
    if !has_head(cwd) {
        let output = git_command(
            &["ls-files", "--cached", "--others", "--exclude-standard"],
            cwd,
        )?;
        return Ok(as_added(&output));
    }

    let output = git_command(&["diff", "--name-status", "-M", "HEAD"], cwd)?;
    let mut files = parse_name_status_output(&output)?;

    for untracked in get_untracked_files(cwd)? {
        if !files.iter().any(|f| f.path == untracked.path) {
            files.push(untracked);
        }
    }

    Ok(files)
}

/// Untracked, non-ignored files
pub fn get_untracked_files(cwd: Option<&Path>) -> Result<Vec<ChangedFile>> {
    let output = git_command(&["ls-files", "--others", "--exclude-standard"], cwd)?;
    Ok(as_added(&output))
}

/// Get files changed in a specific commit
pub fn get_commit_changed_files(commit: &str, cwd: Option<&Path>) -> Result<Vec<ChangedFile>> {
    let output = git_command(
        &[
            "diff-tree",
            "--no-commit-id",
            "--root",
            "--name-status",
            "-r",
            "-M",
            commit,
        ],
        cwd,
    )?;

    parse_name_status_output(&output)
}

fn as_added(output: &str) -> Vec<ChangedFile> {
    output
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| ChangedFile {
            path: line.to_string(),
            old_path: None,
            change_type: ChangeType::Added,
        })
        .collect()
}

/// Parse the output of git diff --name-status
fn parse_name_status_output(output: &str) -> Result<Vec<ChangedFile>> {
    let mut files = Vec::new();

    for line in output.lines() {
        if line.is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split('\t').collect();
        let status = parts[0];
        let change_type = status
            .chars()
            .next()
            .and_then(ChangeType::from_status_char)
            .ok_or_else(|| CodewatchError::vcs("diff", format!("unknown git status: {}", status)))?;

        let (path, old_path) = match change_type {
            ChangeType::Renamed | ChangeType::Copied if parts.len() >= 3 => {
                (parts[2].to_string(), Some(parts[1].to_string()))
            }
            _ if parts.len() >= 2 => (parts[1].to_string(), None),
            _ => {
                return Err(CodewatchError::vcs(
                    "diff",
                    format!("invalid diff output line: {}", line),
                ));
            }
        };

        files.push(ChangedFile {
            path,
            old_path,
            change_type,
        });
    }

    Ok(files)
}
