//! SemanticIndex: per-repository vector space of previously seen code blocks
//!
//! # Concurrency
//!
//! Each repository has its own `RwLock`ed index. [`SemanticIndex::similar`]
//! holds the read lock and [`SemanticIndex::update`] the write lock, so a query
//! never observes a half-applied update, while different repositories never
//! contend. Embedding happens before any lock is taken.
//!
//! # Persistence
//!
//! After each update a repository's records are written as a bincode snapshot
//! (`<index_dir>/<slug>.bin`) tagged with the backend identity. On load, a
//! snapshot from another backend is discarded since its vectors live in a
//! different space.

mod backend;
mod http;
mod lexical;

pub use backend::{candidate_order, negotiate, FailedAttempt, Negotiation};
pub use http::{embeddings_url, HttpEmbedder};
pub use lexical::{tokenize, LexicalVectorizer, LEXICAL_DIMENSIONS};

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::{slugify, LlmSettings, SemanticSettings};
use crate::error::{CodewatchError, Result};
use crate::preprocess::CodeBlock;

/// Which family of embedding backend produced the vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    EmbeddingModel,
    GeneralModel,
    Lexical,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmbeddingModel => "embedding_model",
            Self::GeneralModel => "general_model",
            Self::Lexical => "lexical",
        }
    }
}

/// Turns text into vectors
pub trait Embedder: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Stable identity of the vector space (backend + model)
    fn identity(&self) -> String;

    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;
}

/// Cosine similarity in `[0, 1]`; mismatched or zero vectors score 0
pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    if left.is_empty() || left.len() != right.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut left_norm_sq = 0.0f32;
    let mut right_norm_sq = 0.0f32;
    for (l, r) in left.iter().zip(right.iter()) {
        dot += l * r;
        left_norm_sq += l * l;
        right_norm_sq += r * r;
    }
    if left_norm_sq <= f32::EPSILON || right_norm_sq <= f32::EPSILON {
        return 0.0;
    }
    (dot / (left_norm_sq.sqrt() * right_norm_sq.sqrt())).clamp(0.0, 1.0)
}

/// Hex SHA-256 of block content
pub fn content_digest(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// What the index keeps about a block: never its source text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticRecord {
    pub identity: String,
    pub file_path: String,
    pub language: String,
    pub vector: Vec<f32>,
    pub digest: String,
    /// Monotonic insertion counter; larger is more recent
    pub indexed_seq: u64,
    pub indexed_at: DateTime<Utc>,
}

/// One indexed block judged similar to a query block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarMatch {
    pub query_identity: String,
    pub matched_identity: String,
    pub file_path: String,
    pub score: f32,
    pub indexed_at: DateTime<Utc>,
    #[serde(skip)]
    indexed_seq: u64,
}

/// Result of a similarity query, including how much was searched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimilarityReport {
    /// Indexed records available to the query
    pub searched: usize,
    /// Candidate pairs at or above the threshold (before per-query capping)
    pub passed: usize,
    /// Ranked by score, ties broken by most recently indexed; at most
    /// `max_results` over all queries
    pub matches: Vec<SimilarMatch>,
}

impl SimilarityReport {
    pub fn has_similar_code(&self) -> bool {
        !self.matches.is_empty()
    }

    /// Prompt-ready summary listing identities and scores
    pub fn context_text(&self) -> String {
        if self.matches.is_empty() {
            return String::new();
        }
        let mut text = String::from("Previously indexed code similar to the changed blocks:\n");
        for m in &self.matches {
            text.push_str(&format!(
                "- `{}` resembles `{}` (similarity {:.2})\n",
                m.query_identity, m.matched_identity, m.score
            ));
        }
        text
    }
}

/// Counts from one update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStats {
    pub inserted: usize,
    pub replaced: usize,
    pub unchanged: usize,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    backend: String,
    next_seq: u64,
    records: BTreeMap<String, SemanticRecord>,
}

/// One repository's vector space
#[derive(Debug, Default)]
struct RepositoryIndex {
    next_seq: u64,
    records: BTreeMap<String, SemanticRecord>,
}

impl RepositoryIndex {
    fn similar(
        &self,
        queries: &[(String, Vec<f32>)],
        threshold: f32,
        max_results: usize,
    ) -> SimilarityReport {
        let mut report = SimilarityReport {
            searched: self.records.len(),
            ..SimilarityReport::default()
        };

        for (query_identity, vector) in queries {
            let mut hits: Vec<SimilarMatch> = self
                .records
                .values()
                .filter(|record| &record.identity != query_identity)
                .filter_map(|record| {
                    let score = cosine_similarity(vector, &record.vector);
                    (score >= threshold).then(|| SimilarMatch {
                        query_identity: query_identity.clone(),
                        matched_identity: record.identity.clone(),
                        file_path: record.file_path.clone(),
                        score,
                        indexed_at: record.indexed_at,
                        indexed_seq: record.indexed_seq,
                    })
                })
                .collect();
            report.passed += hits.len();
            rank(&mut hits);
            hits.truncate(max_results);
            report.matches.extend(hits);
        }

        rank(&mut report.matches);
        report.matches.truncate(max_results);
        report
    }

    fn upsert(&mut self, block: &CodeBlock, digest: String, vector: Vec<f32>) -> bool {
        let identity = block.identity();
        let replaced = self.records.contains_key(&identity);
        let record = SemanticRecord {
            identity: identity.clone(),
            file_path: block.file_path.clone(),
            language: block.language.clone(),
            vector,
            digest,
            indexed_seq: self.next_seq,
            indexed_at: Utc::now(),
        };
        self.next_seq += 1;
        self.records.insert(identity, record);
        replaced
    }
}

fn rank(matches: &mut [SimilarMatch]) {
    matches.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(b.indexed_seq.cmp(&a.indexed_seq))
    });
}

/// Per-repository semantic index over a negotiated embedding backend
pub struct SemanticIndex {
    embedder: Arc<dyn Embedder>,
    negotiation: Negotiation,
    dir: Option<PathBuf>,
    repositories: Mutex<HashMap<String, Arc<RwLock<RepositoryIndex>>>>,
}

impl SemanticIndex {
    /// Negotiate a backend and persist snapshots under `semantic.index_dir()`
    pub fn from_settings(semantic: &SemanticSettings, llm: &LlmSettings) -> Self {
        let (embedder, negotiation) = negotiate(semantic, llm);
        Self::new(embedder, negotiation, Some(semantic.index_dir()))
    }

    /// `dir = None` keeps everything in memory
    pub fn new(embedder: Arc<dyn Embedder>, negotiation: Negotiation, dir: Option<PathBuf>) -> Self {
        Self {
            embedder,
            negotiation,
            dir,
            repositories: Mutex::new(HashMap::new()),
        }
    }

    /// In-memory index over the lexical vectorizer
    pub fn lexical() -> Self {
        let embedder = LexicalVectorizer::default();
        let negotiation = Negotiation {
            selected: BackendKind::Lexical,
            identity: embedder.identity(),
            failed: Vec::new(),
        };
        Self::new(Arc::new(embedder), negotiation, None)
    }

    pub fn negotiation(&self) -> &Negotiation {
        &self.negotiation
    }

    /// Number of records held for `repository`
    pub fn len(&self, repository: &str) -> usize {
        self.repository(repository).read().records.len()
    }

    /// Rank indexed blocks by similarity to `blocks`
    pub fn similar(
        &self,
        repository: &str,
        blocks: &[CodeBlock],
        threshold: f32,
        max_results: usize,
    ) -> Result<SimilarityReport> {
        let texts: Vec<&str> = blocks.iter().map(|b| b.content.as_str()).collect();
        let vectors = self.embedder.embed(&texts)?;
        let queries: Vec<(String, Vec<f32>)> = blocks
            .iter()
            .map(CodeBlock::identity)
            .zip(vectors)
            .collect();

        let index = self.repository(repository);
        let report = index.read().similar(&queries, threshold, max_results);

        tracing::info!(
            "[SEMANTIC] {}: {} queries over {} indexed blocks, {} passed threshold {:.2}, {} reported",
            repository,
            queries.len(),
            report.searched,
            report.passed,
            threshold,
            report.matches.len()
        );
        Ok(report)
    }

    /// Insert new blocks and supersede changed ones, then persist
    pub fn update(&self, repository: &str, blocks: &[CodeBlock]) -> Result<UpdateStats> {
        let index = self.repository(repository);

        // Later blocks with the same identity win
        let mut latest: BTreeMap<String, &CodeBlock> = BTreeMap::new();
        for block in blocks {
            latest.insert(block.identity(), block);
        }

        let mut stats = UpdateStats::default();
        let mut pending = Vec::new();
        {
            let guard = index.read();
            for (identity, block) in &latest {
                let digest = content_digest(&block.content);
                match guard.records.get(identity) {
                    Some(existing) if existing.digest == digest => stats.unchanged += 1,
                    _ => pending.push((*block, digest)),
                }
            }
        }

        if pending.is_empty() {
            return Ok(stats);
        }

        let texts: Vec<&str> = pending.iter().map(|(b, _)| b.content.as_str()).collect();
        let vectors = self.embedder.embed(&texts)?;

        let snapshot = {
            let mut guard = index.write();
            for ((block, digest), vector) in pending.into_iter().zip(vectors) {
                if guard.upsert(block, digest, vector) {
                    stats.replaced += 1;
                } else {
                    stats.inserted += 1;
                }
            }
            self.dir.as_ref().map(|_| {
                bincode::serialize(&Snapshot {
                    backend: self.negotiation.identity.clone(),
                    next_seq: guard.next_seq,
                    records: guard.records.clone(),
                })
            })
        };

        tracing::debug!(
            "[SEMANTIC] {}: {} inserted, {} replaced, {} unchanged",
            repository,
            stats.inserted,
            stats.replaced,
            stats.unchanged
        );

        if let Some(encoded) = snapshot {
            let encoded = encoded.map_err(|e| CodewatchError::Index {
                message: format!("cannot encode snapshot: {}", e),
            })?;
            self.persist(repository, &encoded)?;
        }
        Ok(stats)
    }

    fn snapshot_path(&self, repository: &str) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.bin", slugify(repository))))
    }

    fn persist(&self, repository: &str, bytes: &[u8]) -> Result<()> {
        let Some(path) = self.snapshot_path(repository) else {
            return Ok(());
        };
        let io_err = |e: std::io::Error| CodewatchError::Index {
            message: format!("cannot write {}: {}", path.display(), e),
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp = path.with_extension("bin.tmp");
        fs::write(&tmp, bytes).map_err(io_err)?;
        fs::rename(&tmp, &path).map_err(io_err)?;
        Ok(())
    }

    fn repository(&self, repository: &str) -> Arc<RwLock<RepositoryIndex>> {
        let mut map = self.repositories.lock();
        Arc::clone(
            map.entry(repository.to_string())
                .or_insert_with(|| Arc::new(RwLock::new(self.load(repository)))),
        )
    }

    fn load(&self, repository: &str) -> RepositoryIndex {
        let Some(path) = self.snapshot_path(repository) else {
            return RepositoryIndex::default();
        };
        let Ok(bytes) = fs::read(&path) else {
            return RepositoryIndex::default();
        };

        match bincode::deserialize::<Snapshot>(&bytes) {
            Ok(snapshot) if snapshot.backend == self.negotiation.identity => {
                tracing::info!(
                    "[SEMANTIC] {}: loaded {} records from {}",
                    repository,
                    snapshot.records.len(),
                    path.display()
                );
                RepositoryIndex {
                    next_seq: snapshot.next_seq,
                    records: snapshot.records,
                }
            }
            Ok(snapshot) => {
                tracing::info!(
                    "[SEMANTIC] {}: discarding snapshot from backend {} (now {})",
                    repository,
                    snapshot.backend,
                    self.negotiation.identity
                );
                RepositoryIndex::default()
            }
            Err(e) => {
                tracing::warn!(
                    "[SEMANTIC] {}: unreadable snapshot {}: {}",
                    repository,
                    path.display(),
                    e
                );
                RepositoryIndex::default()
            }
        }
    }
}
