//! One analysis run: extract → preprocess → semantic → route → LLM → findings
//! → report → publish
//!
//! A [`Pipeline`] holds no per-run state; the orchestrator guarantees at most
//! one call to [`Pipeline::run`] per repository at a time.
//!
//! Abort paths:
//! - Flattening tool failure returns `Err` and writes nothing.
//! - An empty diff returns [`RunOutcome::Skipped`] before any model call.
//! - A model failure is recorded as a failed report and never committed.
//! - Publishing failures are logged and recorded; the report stays on disk.

mod events;
mod status;

pub use events::{EventEmitter, PipelineEvent};
pub use status::{
    DaemonStatus, LastOutcome, RepositoryState, RepositoryStatus, StatusBoard, StatusView,
    EVENTS_FILE, STATUS_FILE,
};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::{Config, RepositoryConfig, SemanticSettings};
use crate::error::Result;
use crate::extract::{Bundle, DiffExtractor, ExtractMode, Extraction};
use crate::findings::{self, SeverityCounts};
use crate::llm::{build_prompt, LlmGateway};
use crate::preprocess::{self, BlockKind, CodeBlock};
use crate::publish::{CommitRecord, GitPublisher};
use crate::report::{
    detect_project_context, AiAnalysis, AnalysisReport, CodeMetrics, Metadata, ReportPaths,
    ReportStore, RunStatus, SemanticAnalysis,
};
use crate::router::{classify_with_changes, AnalysisType, ChangeShape};
use crate::semantic::{SemanticIndex, SimilarityReport};

/// Per-run switches (the CLI's `--dry`, `--fast`, `--deep`, `--show-payload`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub mode: ExtractMode,
    /// Stop after building the prompt: no model call, no artifacts, no index writes
    pub dry: bool,
    /// Skip semantic search and index update
    pub fast: bool,
    /// Return the rendered request payloads
    pub show_payload: bool,
}

/// What a dry run would have sent
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub run_id: Uuid,
    pub analysis_type: AnalysisType,
    pub classification: String,
    pub blocks: usize,
    pub requests: usize,
    pub payload: Vec<String>,
}

/// A run that reached the report stage
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub repository: String,
    pub started_at: DateTime<Utc>,
    pub status: RunStatus,
    pub analysis_type: AnalysisType,
    pub input_block_count: usize,
    pub counts: SeverityCounts,
    pub semantic_context_used: bool,
    /// Model failure message for failed runs
    pub error: Option<String>,
    pub report: ReportPaths,
    pub commit: Option<CommitRecord>,
    pub commit_error: Option<String>,
    pub payload: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Skipped { run_id: Uuid, reason: String },
    Planned(RunPlan),
    Recorded(RunRecord),
}

impl RunOutcome {
    pub fn run_id(&self) -> Uuid {
        match self {
            Self::Skipped { run_id, .. } => *run_id,
            Self::Planned(plan) => plan.run_id,
            Self::Recorded(record) => record.run_id,
        }
    }
}

/// The analysis pipeline for all repositories
pub struct Pipeline {
    extractor: DiffExtractor,
    index: Arc<SemanticIndex>,
    gateway: LlmGateway,
    store: ReportStore,
    semantic: SemanticSettings,
    events: EventEmitter,
}

impl Pipeline {
    pub fn new(
        extractor: DiffExtractor,
        index: Arc<SemanticIndex>,
        gateway: LlmGateway,
        store: ReportStore,
        semantic: SemanticSettings,
    ) -> Self {
        Self {
            extractor,
            index,
            gateway,
            store,
            semantic,
            events: EventEmitter::disabled(),
        }
    }

    /// Build every component from configuration
    ///
    /// Creates blocking HTTP clients; call it outside any async runtime.
    pub fn from_config(config: &Config) -> Result<Self> {
        let output_dir = config.daemon.output_dir.clone();
        let index = SemanticIndex::from_settings(&config.semantic, &config.llm);
        let negotiation = index.negotiation();
        tracing::info!(
            "[SEMANTIC] Backend {} ({}) selected, {} higher-priority backends unavailable",
            negotiation.selected.as_str(),
            negotiation.identity,
            negotiation.failed.len()
        );
        Ok(Self::new(
            DiffExtractor::new(config.flattener.clone(), output_dir.clone()),
            Arc::new(index),
            LlmGateway::from_settings(&config.llm)?,
            ReportStore::new(output_dir),
            config.semantic.clone(),
        ))
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    pub fn index(&self) -> &SemanticIndex {
        &self.index
    }

    pub fn store(&self) -> &ReportStore {
        &self.store
    }

    /// Run the pipeline once for `repo`
    pub fn run(&self, repo: &RepositoryConfig, options: &RunOptions) -> Result<RunOutcome> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        let name = repo.name.as_str();

        tracing::info!(
            repository = name,
            run_id = %run_id,
            "[PIPELINE] Run started ({}{}{})",
            options.mode.as_str(),
            if options.dry { ", dry" } else { "" },
            if options.fast { ", fast" } else { "" }
        );
        self.events.emit(PipelineEvent::RunStarted {
            repository: repo.name.clone(),
            run_id,
            mode: options.mode,
            timestamp: started_at,
        });

        let bundle = match self.extractor.extract(&repo.path, options.mode) {
            Ok(Extraction::Bundle(bundle)) => bundle,
            Ok(Extraction::Empty { reason }) => {
                tracing::info!(
                    repository = name,
                    run_id = %run_id,
                    step = "extract",
                    "[PIPELINE] Nothing to analyze: {}",
                    reason
                );
                self.events.emit(PipelineEvent::RunSkipped {
                    repository: repo.name.clone(),
                    run_id,
                    reason: reason.to_string(),
                    timestamp: Utc::now(),
                });
                return Ok(RunOutcome::Skipped {
                    run_id,
                    reason: reason.to_string(),
                });
            }
            Err(e) => return Err(self.abort(repo, run_id, "extract", e)),
        };

        let blocks = preprocess::parse(name, &bundle.text);
        let parse_failed = blocks.is_empty();
        let prompt_blocks = if parse_failed {
            tracing::error!(
                repository = name,
                run_id = %run_id,
                step = "preprocess",
                "[PIPELINE] Parse failure: {} character bundle produced no code blocks, \
                 continuing with the raw bundle and no semantic context",
                bundle.text.len()
            );
            vec![raw_bundle_block(name, &bundle)]
        } else {
            blocks.clone()
        };

        let semantic_enabled = !options.fast && !parse_failed;
        let similarity = if semantic_enabled {
            self.search_similar(repo, run_id, &blocks, options.dry)
        } else {
            SimilarityReport::default()
        };

        let shape = (options.mode != ExtractMode::Full).then(|| ChangeShape {
            changed_files: bundle.changed_files.len(),
            added_files: bundle.added_files,
        });
        let classification = classify_with_changes(&prompt_blocks, shape, &bundle.changed_files);
        tracing::info!(
            repository = name,
            run_id = %run_id,
            "[PIPELINE] {} blocks classified as {} ({})",
            prompt_blocks.len(),
            classification.analysis_type,
            classification.reason
        );

        let context_text = similarity.context_text();
        let prompt = build_prompt(
            classification.analysis_type,
            name,
            &prompt_blocks,
            &context_text,
        );
        let payload = if options.show_payload || options.dry {
            render_payload(&self.gateway, &prompt)
        } else {
            Vec::new()
        };

        if options.dry {
            let requests = payload.len();
            tracing::info!(
                repository = name,
                run_id = %run_id,
                "[PIPELINE] Dry run: {} requests, {} prompt characters",
                requests,
                prompt.total_chars()
            );
            self.events.emit(PipelineEvent::RunSkipped {
                repository: repo.name.clone(),
                run_id,
                reason: "dry run".to_string(),
                timestamp: Utc::now(),
            });
            return Ok(RunOutcome::Planned(RunPlan {
                run_id,
                analysis_type: classification.analysis_type,
                classification: classification.reason,
                blocks: prompt_blocks.len(),
                requests,
                payload: if options.show_payload { payload } else { Vec::new() },
            }));
        }

        let (raw_text, llm_chunks, error) = match self.gateway.analyze(&prompt) {
            Ok(response) => (Some(response.text), response.chunks, None),
            Err(e) => {
                tracing::error!(
                    repository = name,
                    run_id = %run_id,
                    step = "llm",
                    "[PIPELINE] Model call failed, recording a failed run: {}",
                    e
                );
                (None, 0, Some(e.to_string()))
            }
        };
        let structured = raw_text
            .as_deref()
            .map(findings::extract)
            .unwrap_or_default();
        let status = if error.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };

        let report = AnalysisReport {
            metadata: Metadata {
                timestamp: started_at,
                project_name: repo.name.clone(),
                analysis_type: classification.analysis_type,
                run_id,
                status,
                error: error.clone(),
                extract_mode: options.mode,
                classification: classification.reason.clone(),
                duration_ms: clock.elapsed().as_millis() as u64,
            },
            project_context: detect_project_context(&repo.path, &blocks),
            code_metrics: code_metrics(&bundle, &blocks, llm_chunks),
            ai_analysis: AiAnalysis {
                raw_text,
                structured_findings: structured.clone(),
            },
            semantic_analysis: SemanticAnalysis {
                has_similar_code: similarity.has_similar_code(),
                similar_blocks_found: similarity.matches.len(),
                context_text,
                enabled: semantic_enabled,
                backend: self.index.negotiation().selected,
                backend_identity: self.index.negotiation().identity.clone(),
                searched_blocks: similarity.searched,
                passed_threshold: similarity.passed,
            },
        };

        let paths = self
            .store
            .write(repo, &report)
            .map_err(|e| self.abort(repo, run_id, "report", e))?;

        let (commit, commit_error) = if status == RunStatus::Completed {
            self.maybe_publish(repo, run_id, &bundle, &blocks, &paths, &report)
        } else {
            (None, None)
        };

        let counts = structured.counts();
        let duration_ms = clock.elapsed().as_millis() as u64;
        match &error {
            None => {
                tracing::info!(
                    repository = name,
                    run_id = %run_id,
                    "[PIPELINE] Run complete in {}ms: {} critical, {} high, {} medium, {} low",
                    duration_ms,
                    counts.critical,
                    counts.high,
                    counts.medium,
                    counts.low
                );
                self.events.emit(PipelineEvent::RunCompleted {
                    repository: repo.name.clone(),
                    run_id,
                    analysis_type: classification.analysis_type,
                    counts,
                    committed: commit.is_some(),
                    duration_ms,
                    timestamp: Utc::now(),
                });
            }
            Some(message) => self.events.emit(PipelineEvent::RunFailed {
                repository: repo.name.clone(),
                run_id,
                step: "llm".to_string(),
                error: message.clone(),
                timestamp: Utc::now(),
            }),
        }

        Ok(RunOutcome::Recorded(RunRecord {
            run_id,
            repository: repo.name.clone(),
            started_at,
            status,
            analysis_type: classification.analysis_type,
            input_block_count: prompt_blocks.len(),
            counts,
            semantic_context_used: !report.semantic_analysis.context_text.is_empty(),
            error,
            report: paths,
            commit,
            commit_error,
            payload: if options.show_payload { payload } else { Vec::new() },
        }))
    }

    /// Query, then index the new blocks so the next run can find them
    fn search_similar(
        &self,
        repo: &RepositoryConfig,
        run_id: Uuid,
        blocks: &[CodeBlock],
        dry: bool,
    ) -> SimilarityReport {
        let name = repo.name.as_str();
        let report = self
            .index
            .similar(
                name,
                blocks,
                self.semantic.similarity_threshold,
                self.semantic.max_results,
            )
            .unwrap_or_else(|e| {
                tracing::warn!(
                    repository = name,
                    run_id = %run_id,
                    step = "semantic",
                    "[PIPELINE] Similarity search failed, continuing without context: {}",
                    e
                );
                SimilarityReport::default()
            });

        if !dry {
            match self.index.update(name, blocks) {
                Ok(stats) => tracing::debug!(
                    "[SEMANTIC] {}: {} inserted, {} replaced, {} unchanged",
                    name,
                    stats.inserted,
                    stats.replaced,
                    stats.unchanged
                ),
                Err(e) => tracing::warn!(
                    repository = name,
                    run_id = %run_id,
                    step = "semantic",
                    "[PIPELINE] Index update failed: {}",
                    e
                ),
            }
        }
        report
    }

    fn maybe_publish(
        &self,
        repo: &RepositoryConfig,
        run_id: Uuid,
        bundle: &Bundle,
        blocks: &[CodeBlock],
        paths: &ReportPaths,
        report: &AnalysisReport,
    ) -> (Option<CommitRecord>, Option<String>) {
        let name = repo.name.as_str();
        if !repo.auto_commit {
            return (None, None);
        }
        let changed = changed_file_count(bundle, blocks);
        if changed < repo.commit_threshold {
            tracing::info!(
                repository = name,
                run_id = %run_id,
                "[PIPELINE] {} changed files below commit threshold {}, not committing",
                changed,
                repo.commit_threshold
            );
            return (None, None);
        }

        match GitPublisher::new(repo.auto_push).publish(&repo.path, name, paths, report) {
            Ok(commit) => (commit, None),
            Err(e) => {
                tracing::error!(
                    repository = name,
                    run_id = %run_id,
                    step = "publish",
                    "[PIPELINE] Reports written but not committed: {}",
                    e
                );
                (None, Some(e.to_string()))
            }
        }
    }

    fn abort(
        &self,
        repo: &RepositoryConfig,
        run_id: Uuid,
        step: &str,
        error: crate::error::CodewatchError,
    ) -> crate::error::CodewatchError {
        tracing::error!(
            repository = repo.name.as_str(),
            run_id = %run_id,
            step,
            "[PIPELINE] Run aborted: {}",
            error
        );
        self.events.emit(PipelineEvent::RunFailed {
            repository: repo.name.clone(),
            run_id,
            step: step.to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
        });
        error
    }
}

/// Distinct changed files in the triggering diff; in full mode, distinct files
/// in the bundle
fn changed_file_count(bundle: &Bundle, blocks: &[CodeBlock]) -> usize {
    if bundle.mode == ExtractMode::Full {
        blocks
            .iter()
            .map(|b| b.file_path.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    } else {
        bundle.changed_files.len()
    }
}

fn code_metrics(bundle: &Bundle, blocks: &[CodeBlock], llm_chunks: usize) -> CodeMetrics {
    let mut blocks_by_kind = BTreeMap::new();
    let mut blocks_by_language = BTreeMap::new();
    for block in blocks {
        *blocks_by_kind
            .entry(block.kind.as_str().to_string())
            .or_insert(0) += 1;
        *blocks_by_language
            .entry(block.language.clone())
            .or_insert(0) += 1;
    }
    let files_flattened = if bundle.mode == ExtractMode::Full {
        changed_file_count(bundle, blocks)
    } else {
        bundle.flattened_files.len()
    };
    CodeMetrics {
        files_changed: changed_file_count(bundle, blocks),
        files_added: bundle.added_files,
        files_flattened,
        blocks_total: blocks.len(),
        blocks_by_kind,
        blocks_by_language,
        bundle_chars: bundle.original_chars,
        bundle_truncated: bundle.truncated,
        llm_chunks,
    }
}

/// Whole bundle as one block when nothing could be parsed out of it
fn raw_bundle_block(repository: &str, bundle: &Bundle) -> CodeBlock {
    CodeBlock::new(
        repository,
        "(bundle)",
        "text",
        BlockKind::Unknown,
        "bundle".to_string(),
        bundle.text.clone(),
        1,
    )
}

fn render_payload(gateway: &LlmGateway, prompt: &crate::llm::Prompt) -> Vec<String> {
    gateway
        .plan(prompt)
        .requests
        .iter()
        .map(|messages| {
            messages
                .iter()
                .map(|m| format!("[{}]\n{}", m.role, m.content))
                .collect::<Vec<_>>()
                .join("\n\n")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(mode: ExtractMode, changed: &[&str]) -> Bundle {
        Bundle {
            mode,
            text: "x".to_string(),
            changed_files: changed.iter().map(|s| s.to_string()).collect(),
            flattened_files: changed.iter().map(|s| s.to_string()).collect(),
            added_files: 0,
            original_chars: 1,
            truncated: false,
        }
    }

    fn block(path: &str, kind: BlockKind) -> CodeBlock {
        CodeBlock::new("r", path, "python", kind, "f".to_string(), "pass".to_string(), 1)
    }

    #[test]
    fn test_changed_file_count_per_mode() {
        let blocks = vec![
            block("a.py", BlockKind::Function),
            block("a.py", BlockKind::Class),
            block("b.py", BlockKind::Function),
        ];
        // Deleted files count toward the diff even without blocks
        let incremental = bundle(ExtractMode::Incremental, &["a.py", "gone.py"]);
        assert_eq!(changed_file_count(&incremental, &blocks), 2);
        let full = bundle(ExtractMode::Full, &[]);
        assert_eq!(changed_file_count(&full, &blocks), 2);
    }

    #[test]
    fn test_code_metrics_groups_blocks() {
        let blocks = vec![
            block("a.py", BlockKind::Function),
            block("a.py", BlockKind::Function),
            block("b.py", BlockKind::Class),
        ];
        let metrics = code_metrics(&bundle(ExtractMode::Incremental, &["a.py", "b.py"]), &blocks, 2);
        assert_eq!(metrics.blocks_total, 3);
        assert_eq!(metrics.blocks_by_kind["function"], 2);
        assert_eq!(metrics.blocks_by_kind["class"], 1);
        assert_eq!(metrics.blocks_by_language["python"], 3);
        assert_eq!(metrics.llm_chunks, 2);
    }
}
