//! Repository and branch state queries

use std::path::Path;

use super::{git_command, git_command_optional};
use crate::error::Result;

/// Check if the directory is inside a git work tree
pub fn is_git_repo(cwd: Option<&Path>) -> bool {
    git_command_optional(&["rev-parse", "--is-inside-work-tree"], cwd)
        .map(|s| s == "true")
        .unwrap_or(false)
}

/// Check whether HEAD resolves to a commit (false in a freshly initialised repo)
pub fn has_head(cwd: Option<&Path>) -> bool {
    git_command_optional(&["rev-parse", "--verify", "--quiet", "HEAD"], cwd).is_some()
}

/// Get the current branch name
pub fn get_current_branch(cwd: Option<&Path>) -> Result<String> {
    git_command(&["rev-parse", "--abbrev-ref", "HEAD"], cwd)
}

/// Get the upstream branch for the current branch (if any)
pub fn get_upstream_branch(cwd: Option<&Path>) -> Option<String> {
    git_command_optional(&["rev-parse", "--abbrev-ref", "@{upstream}"], cwd)
}
