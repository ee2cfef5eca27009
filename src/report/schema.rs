//! Persisted JSON report schema
//!
//! One [`AnalysisReport`] is the durable form of one analysis run. Field order
//! follows the on-disk layout (`serde_json` is built with `preserve_order`).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::extract::ExtractMode;
use crate::findings::StructuredFindings;
use crate::router::AnalysisType;
use crate::semantic::BackendKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub metadata: Metadata,
    pub project_context: ProjectContext,
    pub code_metrics: CodeMetrics,
    pub ai_analysis: AiAnalysis,
    pub semantic_analysis: SemanticAnalysis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub timestamp: DateTime<Utc>,
    pub project_name: String,
    pub analysis_type: AnalysisType,
    pub run_id: Uuid,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub extract_mode: ExtractMode,
    /// Why the router picked `analysis_type`
    pub classification: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectContext {
    pub primary_language: Option<String>,
    pub framework: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeMetrics {
    pub files_changed: usize,
    pub files_added: usize,
    pub files_flattened: usize,
    pub blocks_total: usize,
    pub blocks_by_kind: BTreeMap<String, usize>,
    pub blocks_by_language: BTreeMap<String, usize>,
    pub bundle_chars: usize,
    pub bundle_truncated: bool,
    pub llm_chunks: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiAnalysis {
    /// Model output; null when the model call failed
    pub raw_text: Option<String>,
    pub structured_findings: StructuredFindings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticAnalysis {
    pub has_similar_code: bool,
    pub similar_blocks_found: usize,
    pub context_text: String,
    /// False when semantic search was skipped for this run
    pub enabled: bool,
    pub backend: BackendKind,
    pub backend_identity: String,
    pub searched_blocks: usize,
    pub passed_threshold: usize,
}

impl AnalysisReport {
    pub fn is_failed(&self) -> bool {
        self.metadata.status == RunStatus::Failed
    }

    /// One line for status listings
    pub fn headline(&self) -> String {
        let when = self.metadata.timestamp.format("%Y-%m-%d %H:%M:%S UTC");
        if self.is_failed() {
            return format!(
                "{} analysis failed at {}: {}",
                self.metadata.analysis_type,
                when,
                self.metadata.error.as_deref().unwrap_or("unknown error")
            );
        }
        let counts = self.ai_analysis.structured_findings.counts();
        format!(
            "{} analysis at {}: {} critical, {} high, {} medium, {} low",
            self.metadata.analysis_type, when, counts.critical, counts.high, counts.medium, counts.low
        )
    }
}
