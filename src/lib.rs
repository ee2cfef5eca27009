//! codewatch: repository watcher that reviews incremental changes with a local LLM
//!
//! Each configured repository is watched for file changes. Once a burst of
//! edits settles, the working-tree diff is flattened into a text bundle,
//! split into code blocks, enriched with semantically similar code seen
//! before, and sent to an OpenAI-compatible chat endpoint. The response is
//! turned into structured findings, written as JSON and Markdown reports,
//! and optionally committed back to the repository.
//!
//! # Pipeline
//!
//! ```text
//! ChangeWatcher -> DiffExtractor -> preprocess -> SemanticIndex -> router
//!     -> LlmGateway -> findings -> ReportStore -> GitPublisher
//! ```
//!
//! [`orchestrator::Orchestrator`] serializes runs per repository and bounds
//! concurrency across repositories; [`daemon::Daemon`] wires watchers, the
//! orchestrator and the control channel together.
//!
//! # Example
//!
//! ```ignore
//! use codewatch::{Config, Pipeline, RunOptions};
//!
//! let config = Config::load_from(&Config::default_path())?;
//! let repo = config.repository("api")?;
//! let outcome = Pipeline::from_config(&config)?.run(repo, &RunOptions::default())?;
//! ```

pub mod cli;
pub mod config;
pub mod control;
pub mod daemon;
pub mod error;
pub mod extract;
pub mod findings;
pub mod git;
pub mod lang;
pub mod llm;
pub mod orchestrator;
pub mod pipeline;
pub mod preprocess;
pub mod publish;
pub mod report;
pub mod router;
pub mod semantic;
pub mod watcher;

// Re-export commonly used types
pub use config::{Config, RepositoryConfig};
pub use error::{CodewatchError, Result};
pub use extract::{Bundle, DiffExtractor, ExtractMode, Extraction};
pub use findings::{SeverityCounts, StructuredFindings};
pub use lang::Lang;
pub use llm::{ChatMessage, ChatModel, LlmGateway};
pub use orchestrator::{Orchestrator, RepositoryAnalyzer, ScheduleState, Submission};
pub use pipeline::{EventEmitter, Pipeline, PipelineEvent, RunOptions, RunOutcome, RunRecord};
pub use preprocess::{BlockKind, CodeBlock};
pub use report::{AnalysisReport, ReportStore};
pub use router::AnalysisType;
pub use semantic::SemanticIndex;
pub use watcher::{ChangeWatcher, WatcherHandle};
