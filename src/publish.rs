//! GitPublisher: commit the refreshed reports back to the repository
//!
//! Stage, commit and push are guarded independently. A failed stage or commit
//! is returned to the caller (the reports on disk stay valid); a failed push is
//! logged and recorded on the [`CommitRecord`] without unwinding the commit.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::git;
use crate::report::{AnalysisReport, ReportPaths};

/// What the publisher did for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub repository: String,
    /// `run_id` of the report that was committed
    pub run_reference: String,
    pub message: String,
    pub files_staged: Vec<String>,
    pub sha: String,
    pub pushed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_error: Option<String>,
}

/// Commit message summarising finding counts by severity
pub fn commit_message(report: &AnalysisReport) -> String {
    let findings = &report.ai_analysis.structured_findings;
    let counts = findings.counts();
    let mut message = format!(
        "codewatch: {} analysis for {} ({} critical, {} high, {} medium, {} low)",
        report.metadata.analysis_type,
        report.metadata.project_name,
        counts.critical,
        counts.high,
        counts.medium,
        counts.low
    );

    message.push_str(&format!("\n\nRun: {}", report.metadata.run_id));
    if let Some(lang) = &report.project_context.primary_language {
        message.push_str(&format!("\nPrimary language: {}", lang));
    }
    message.push_str(&format!(
        "\nFiles changed: {}",
        report.code_metrics.files_changed
    ));
    if !findings.recommendations.is_empty() {
        message.push_str(&format!(
            "\nRecommendations: {}",
            findings.recommendations.len()
        ));
    }
    message
}

/// Stages and commits exactly the report documents of a run
#[derive(Debug, Clone, Copy, Default)]
pub struct GitPublisher {
    push: bool,
}

impl GitPublisher {
    pub fn new(push: bool) -> Self {
        Self { push }
    }

    /// Returns `None` when the reports are identical to what HEAD already has
    pub fn publish(
        &self,
        repo_root: &Path,
        repository: &str,
        paths: &ReportPaths,
        report: &AnalysisReport,
    ) -> Result<Option<CommitRecord>> {
        let cwd = Some(repo_root);
        let files = paths.relative_to(repo_root);

        git::stage_paths(&files, cwd).map_err(|e| {
            tracing::error!(repository, step = "stage", "[PUBLISH] {}", e);
            e
        })?;

        if !git::has_staged_changes(&files, cwd) {
            tracing::info!("[PUBLISH] {}: reports unchanged, nothing to commit", repository);
            return Ok(None);
        }

        let message = commit_message(report);
        let sha = git::commit_paths(&message, &files, cwd).map_err(|e| {
            tracing::error!(repository, step = "commit", "[PUBLISH] {}", e);
            e
        })?;
        tracing::info!(
            "[PUBLISH] {}: committed {} files as {}",
            repository,
            files.len(),
            &sha[..sha.len().min(7)]
        );

        let mut record = CommitRecord {
            repository: repository.to_string(),
            run_reference: report.metadata.run_id.to_string(),
            message,
            files_staged: files,
            sha,
            pushed: false,
            push_error: None,
        };

        if self.push {
            match git::push(cwd) {
                Ok(()) => {
                    record.pushed = true;
                    tracing::info!("[PUBLISH] {}: pushed", repository);
                }
                Err(e) => {
                    tracing::warn!(
                        repository,
                        step = "push",
                        "[PUBLISH] push failed, local commit kept: {}",
                        e
                    );
                    record.push_error = Some(e.to_string());
                }
            }
        }

        Ok(Some(record))
    }
}
