//! Staging, committing and pushing

use std::path::Path;

use super::{git_command, git_command_optional};
use crate::error::Result;

/// Stage exactly the given paths (relative to the repo root)
pub fn stage_paths(paths: &[String], cwd: Option<&Path>) -> Result<()> {
    let mut args = vec!["add", "--"];
    args.extend(paths.iter().map(String::as_str));
    git_command(&args, cwd).map(|_| ())
}

/// Whether any of the given paths differ between the index and HEAD
pub fn has_staged_changes(paths: &[String], cwd: Option<&Path>) -> bool {
    let mut args = vec!["diff", "--cached", "--quiet", "--"];
    args.extend(paths.iter().map(String::as_str));
    // --quiet exits 1 when there are differences
    git_command_optional(&args, cwd).is_none()
}

/// Commit only the given paths, leaving anything else the user staged alone
pub fn commit_paths(message: &str, paths: &[String], cwd: Option<&Path>) -> Result<String> {
    let mut args = vec!["commit", "--no-verify", "-q", "-m", message, "--"];
    args.extend(paths.iter().map(String::as_str));
    git_command(&args, cwd)?;
    get_head_sha(cwd)
}

/// Push the current branch to its upstream (or origin when none is set)
pub fn push(cwd: Option<&Path>) -> Result<()> {
    if super::get_upstream_branch(cwd).is_some() {
        git_command(&["push", "-q"], cwd).map(|_| ())
    } else {
        let branch = super::get_current_branch(cwd)?;
        git_command(&["push", "-q", "-u", "origin", &branch], cwd).map(|_| ())
    }
}

/// Full SHA of HEAD
pub fn get_head_sha(cwd: Option<&Path>) -> Result<String> {
    git_command(&["rev-parse", "HEAD"], cwd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn init_repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        for args in [
            vec!["init", "-q"],
            vec!["config", "user.email", "test@example.com"],
            vec!["config", "user.name", "Test"],
        ] {
            git_command(&args, Some(dir.path())).unwrap();
        }
        dir
    }

    #[test]
    fn test_commit_only_named_paths() {
        let repo = init_repo();
        let cwd = Some(repo.path());
        fs::write(repo.path().join("README"), "hello").unwrap();
        stage_paths(&["README".to_string()], cwd).unwrap();
        commit_paths("init", &["README".to_string()], cwd).unwrap();

        fs::write(repo.path().join("report.json"), "{}").unwrap();
        fs::write(repo.path().join("user.txt"), "wip").unwrap();
        git_command(&["add", "user.txt"], cwd).unwrap();

        let paths = vec!["report.json".to_string()];
        stage_paths(&paths, cwd).unwrap();
        assert!(has_staged_changes(&paths, cwd));

        let sha = commit_paths("codewatch: report", &paths, cwd).unwrap();
        assert_eq!(sha.len(), 40);

        let subject = git_command(&["log", "-1", "--format=%s"], cwd).unwrap();
        assert_eq!(subject, "codewatch: report");
        assert!(!has_staged_changes(&paths, cwd));
        // user.txt remains staged and uncommitted
        assert!(has_staged_changes(&["user.txt".to_string()], cwd));
    }

    #[test]
    fn test_push_without_remote_fails() {
        let repo = init_repo();
        let cwd = Some(repo.path());
        fs::write(repo.path().join("a"), "1").unwrap();
        stage_paths(&["a".to_string()], cwd).unwrap();
        commit_paths("init", &["a".to_string()], cwd).unwrap();

        assert!(push(cwd).is_err());
    }
}
