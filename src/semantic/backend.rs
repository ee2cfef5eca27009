//! Embedding backend negotiation
//!
//! Candidates are tried in a fixed order: dedicated embedding model, then the
//! general chat model asked for embeddings, then the lexical vectorizer. A
//! candidate that fails its probe is recorded and skipped; the lexical
//! vectorizer cannot fail, so negotiation always ends with a backend.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::http::{embeddings_url, HttpEmbedder};
use super::lexical::LexicalVectorizer;
use super::{BackendKind, Embedder};
use crate::config::{BackendPreference, LlmSettings, SemanticSettings};
use crate::error::{CodewatchError, Result};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const EMBED_TIMEOUT: Duration = Duration::from_secs(60);

/// A candidate that could not be initialised
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedAttempt {
    pub backend: BackendKind,
    pub reason: String,
}

/// Outcome of negotiation, surfaced in logs and run records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Negotiation {
    pub selected: BackendKind,
    pub identity: String,
    pub failed: Vec<FailedAttempt>,
}

/// Candidate order for a configured preference
pub fn candidate_order(preference: BackendPreference) -> &'static [BackendKind] {
    match preference {
        BackendPreference::Auto | BackendPreference::EmbeddingModel => &[
            BackendKind::EmbeddingModel,
            BackendKind::GeneralModel,
            BackendKind::Lexical,
        ],
        BackendPreference::GeneralModel => &[BackendKind::GeneralModel, BackendKind::Lexical],
        BackendPreference::Lexical => &[BackendKind::Lexical],
    }
}

/// Select the highest-priority backend that initialises
pub fn negotiate(
    semantic: &SemanticSettings,
    llm: &LlmSettings,
) -> (Arc<dyn Embedder>, Negotiation) {
    let mut failed = Vec::new();

    for &kind in candidate_order(semantic.backend) {
        match initialise(kind, semantic, llm) {
            Ok(embedder) => {
                let negotiation = Negotiation {
                    selected: kind,
                    identity: embedder.identity(),
                    failed,
                };
                tracing::info!(
                    "[SEMANTIC] Selected {} backend ({}), {} candidates skipped",
                    kind.as_str(),
                    negotiation.identity,
                    negotiation.failed.len()
                );
                return (embedder, negotiation);
            }
            Err(e) => {
                tracing::warn!("[SEMANTIC] {} backend unavailable: {}", kind.as_str(), e);
                failed.push(FailedAttempt {
                    backend: kind,
                    reason: e.to_string(),
                });
            }
        }
    }

    // Only reachable when the order omits the lexical fallback
    let lexical = LexicalVectorizer::default();
    let negotiation = Negotiation {
        selected: BackendKind::Lexical,
        identity: lexical.identity(),
        failed,
    };
    (Arc::new(lexical), negotiation)
}

fn initialise(
    kind: BackendKind,
    semantic: &SemanticSettings,
    llm: &LlmSettings,
) -> Result<Arc<dyn Embedder>> {
    let endpoint = semantic
        .embedding_endpoint
        .clone()
        .unwrap_or_else(|| embeddings_url(&llm.endpoint));

    let model = match kind {
        BackendKind::Lexical => return Ok(Arc::new(LexicalVectorizer::default())),
        BackendKind::EmbeddingModel => semantic.model_path.clone().ok_or_else(|| {
            CodewatchError::Index {
                message: "no embedding model configured (semantic.model_path)".to_string(),
            }
        })?,
        BackendKind::GeneralModel => llm.model.clone(),
    };

    let probe = HttpEmbedder::new(kind, &endpoint, &model, PROBE_TIMEOUT)?;
    let dimensions = probe.probe()?;
    tracing::debug!(
        "[SEMANTIC] {} at {} answers with {} dimensions",
        model,
        endpoint,
        dimensions
    );
    Ok(Arc::new(HttpEmbedder::new(kind, &endpoint, &model, EMBED_TIMEOUT)?))
}
