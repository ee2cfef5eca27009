//! ReportStore: one JSON and one markdown document per repository
//!
//! Paths are derived from the repository name only:
//!
//! ```text
//! <repo>/<output_dir>/<slug>/analysis.json
//! <repo>/<output_dir>/<slug>/analysis.md
//! <repo>/<output_dir>/<slug>/REVIEW_SUMMARY.md
//! ```
//!
//! Each run overwrites the previous documents (written to a temp file and
//! renamed into place); history lives in version control.

mod markdown;
mod schema;

pub use markdown::{render_analysis, render_summary};
pub use schema::{
    AiAnalysis, AnalysisReport, CodeMetrics, Metadata, ProjectContext, RunStatus,
    SemanticAnalysis,
};

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::RepositoryConfig;
use crate::error::Result;
use crate::preprocess::CodeBlock;

pub const REPORT_JSON: &str = "analysis.json";
pub const REPORT_MARKDOWN: &str = "analysis.md";
pub const SUMMARY_DOC: &str = "REVIEW_SUMMARY.md";

/// Where a repository's documents live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    pub dir: PathBuf,
    pub json: PathBuf,
    pub markdown: PathBuf,
    pub summary: PathBuf,
}

impl ReportPaths {
    /// All documents, relative to `root` with `/` separators (for git)
    pub fn relative_to(&self, root: &Path) -> Vec<String> {
        [&self.json, &self.markdown, &self.summary]
            .iter()
            .map(|p| {
                p.strip_prefix(root)
                    .unwrap_or(p)
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().to_string())
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .collect()
    }
}

/// Writes and reads per-repository reports
#[derive(Debug, Clone)]
pub struct ReportStore {
    output_dir: PathBuf,
}

impl ReportStore {
    /// `output_dir` is relative to each repository root
    pub fn new(output_dir: PathBuf) -> Self {
        Self { output_dir }
    }

    pub fn paths(&self, repo: &RepositoryConfig) -> ReportPaths {
        let dir = repo.path.join(&self.output_dir).join(repo.slug());
        ReportPaths {
            json: dir.join(REPORT_JSON),
            markdown: dir.join(REPORT_MARKDOWN),
            summary: dir.join(SUMMARY_DOC),
            dir,
        }
    }

    /// Replace the repository's documents with `report`
    pub fn write(&self, repo: &RepositoryConfig, report: &AnalysisReport) -> Result<ReportPaths> {
        let paths = self.paths(repo);
        fs::create_dir_all(&paths.dir)?;

        let json = serde_json::to_string_pretty(report)?;
        write_atomic(&paths.json, json.as_bytes())?;
        write_atomic(&paths.markdown, render_analysis(report).as_bytes())?;
        write_atomic(&paths.summary, render_summary(report).as_bytes())?;

        tracing::info!(
            "[REPORT] {}: wrote {} ({})",
            repo.name,
            paths.json.display(),
            if report.is_failed() { "failed run" } else { "completed run" }
        );
        Ok(paths)
    }

    /// The latest report, if one was ever written
    pub fn load_latest(&self, repo: &RepositoryConfig) -> Result<Option<AnalysisReport>> {
        let path = self.paths(repo).json;
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Primary language of the change and the project's framework/ecosystem
pub fn detect_project_context(repo_root: &Path, blocks: &[CodeBlock]) -> ProjectContext {
    let mut by_language: HashMap<&str, usize> = HashMap::new();
    for block in blocks.iter().filter(|b| b.language != "text") {
        *by_language.entry(block.language.as_str()).or_default() += 1;
    }
    let primary_language = by_language
        .into_iter()
        .max_by(|(la, ca), (lb, cb)| ca.cmp(cb).then(lb.cmp(la)))
        .map(|(lang, _)| lang.to_string());

    ProjectContext {
        primary_language,
        framework: detect_framework(repo_root),
    }
}

/// Framework markers looked up in root manifests, most specific first
const FRAMEWORK_MARKERS: &[(&str, &str, &str)] = &[
    ("package.json", "\"next\"", "Next.js"),
    ("package.json", "\"react\"", "React"),
    ("package.json", "\"vue\"", "Vue"),
    ("package.json", "\"@angular/core\"", "Angular"),
    ("package.json", "\"svelte\"", "Svelte"),
    ("package.json", "\"express\"", "Express"),
    ("package.json", "", "Node.js"),
    ("Cargo.toml", "axum", "Axum"),
    ("Cargo.toml", "actix-web", "Actix Web"),
    ("Cargo.toml", "rocket", "Rocket"),
    ("Cargo.toml", "", "Cargo"),
    ("pyproject.toml", "django", "Django"),
    ("pyproject.toml", "fastapi", "FastAPI"),
    ("pyproject.toml", "flask", "Flask"),
    ("requirements.txt", "django", "Django"),
    ("requirements.txt", "fastapi", "FastAPI"),
    ("requirements.txt", "flask", "Flask"),
    ("pyproject.toml", "", "Python"),
    ("requirements.txt", "", "Python"),
    ("go.mod", "gin-gonic", "Gin"),
    ("go.mod", "", "Go modules"),
    ("pom.xml", "spring-boot", "Spring Boot"),
    ("pom.xml", "", "Maven"),
    ("build.gradle", "", "Gradle"),
    ("build.gradle.kts", "", "Gradle"),
    ("Gemfile", "rails", "Rails"),
    ("composer.json", "laravel", "Laravel"),
];

fn detect_framework(repo_root: &Path) -> Option<String> {
    let mut cache: HashMap<&str, Option<String>> = HashMap::new();
    for (file, marker, name) in FRAMEWORK_MARKERS {
        let content = cache
            .entry(file)
            .or_insert_with(|| fs::read_to_string(repo_root.join(file)).ok());
        if let Some(content) = content {
            if marker.is_empty() || content.to_lowercase().contains(marker) {
                return Some(name.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ExtractMode;
    use crate::findings;
    use crate::preprocess::BlockKind;
    use crate::router::AnalysisType;
    use crate::semantic::BackendKind;
    use chrono::Utc;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn repo(path: &Path) -> RepositoryConfig {
        RepositoryConfig {
            name: "Demo App".to_string(),
            path: path.to_path_buf(),
            auto_commit: false,
            auto_push: false,
            analysis_triggers: Vec::new(),
            commit_threshold: 1,
        }
    }

    fn report(raw: Option<&str>) -> AnalysisReport {
        AnalysisReport {
            metadata: Metadata {
                timestamp: Utc::now(),
                project_name: "Demo App".to_string(),
                analysis_type: AnalysisType::General,
                run_id: Uuid::new_v4(),
                status: if raw.is_some() {
                    RunStatus::Completed
                } else {
                    RunStatus::Failed
                },
                error: raw.is_none().then(|| "Model unavailable: timed out".to_string()),
                extract_mode: ExtractMode::Incremental,
                classification: "no structural signal".to_string(),
                duration_ms: 12,
            },
            project_context: ProjectContext::default(),
            code_metrics: CodeMetrics::default(),
            ai_analysis: AiAnalysis {
                raw_text: raw.map(str::to_string),
                structured_findings: raw.map(findings::extract).unwrap_or_default(),
            },
            semantic_analysis: SemanticAnalysis {
                has_similar_code: false,
                similar_blocks_found: 0,
                context_text: String::new(),
                enabled: true,
                backend: BackendKind::Lexical,
                backend_identity: "lexical-fnv1024".to_string(),
                searched_blocks: 0,
                passed_threshold: 0,
            },
        }
    }

    #[test]
    fn test_paths_are_deterministic() {
        let dir = TempDir::new().unwrap();
        let store = ReportStore::new(PathBuf::from(".codewatch"));
        let paths = store.paths(&repo(dir.path()));
        assert_eq!(paths.json, dir.path().join(".codewatch/demo-app/analysis.json"));
        assert_eq!(
            paths.relative_to(dir.path()),
            vec![
                ".codewatch/demo-app/analysis.json",
                ".codewatch/demo-app/analysis.md",
                ".codewatch/demo-app/REVIEW_SUMMARY.md"
            ]
        );
    }

    #[test]
    fn test_write_overwrites_latest() {
        let dir = TempDir::new().unwrap();
        let store = ReportStore::new(PathBuf::from(".codewatch"));
        let repo = repo(dir.path());

        store
            .write(&repo, &report(Some("## Critical Issues\n- one\n")))
            .unwrap();
        let second = report(Some("## High Priority\n- two\n"));
        let paths = store.write(&repo, &second).unwrap();

        let loaded = store.load_latest(&repo).unwrap().unwrap();
        assert_eq!(loaded, second);
        assert!(loaded
            .headline()
            .ends_with(": 0 critical, 1 high, 0 medium, 0 low"));
        assert!(fs::read_to_string(&paths.markdown).unwrap().contains("- two"));
        assert!(fs::read_to_string(&paths.summary)
            .unwrap()
            .contains("| High | 1 |"));
        // Only the three documents remain, no temp files
        assert_eq!(fs::read_dir(&paths.dir).unwrap().count(), 3);
    }

    #[test]
    fn test_failed_report_json_shape() {
        let value = serde_json::to_value(report(None)).unwrap();
        assert!(value["ai_analysis"]["raw_text"].is_null());
        assert_eq!(value["metadata"]["status"], "failed");
        assert_eq!(value["metadata"]["analysis_type"], "general");
        assert_eq!(
            value["ai_analysis"]["structured_findings"]["critical_issues"],
            serde_json::json!([])
        );
        assert_eq!(value["semantic_analysis"]["backend"], "lexical");
    }

    #[test]
    fn test_failed_report_markdown_mentions_error() {
        let md = render_analysis(&report(None));
        assert!(md.contains("Analysis failed: Model unavailable"));
        assert!(!md.contains("Raw model output"));
        assert!(render_summary(&report(None)).contains("The last run failed"));
        assert!(report(None)
            .headline()
            .ends_with(": Model unavailable: timed out"));
    }

    #[test]
    fn test_missing_report_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let store = ReportStore::new(PathBuf::from(".codewatch"));
        assert!(store.load_latest(&repo(dir.path())).unwrap().is_none());
    }

    #[test]
    fn test_project_context() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{"dependencies": {"react": "^18.0.0"}}"#,
        )
        .unwrap();
        let block = |lang: &str| {
            CodeBlock::new(
                "r",
                "x",
                lang,
                BlockKind::Function,
                "f".to_string(),
                String::new(),
                1,
            )
        };
        let blocks = vec![block("typescript"), block("typescript"), block("css"), block("text")];
        let ctx = detect_project_context(dir.path(), &blocks);
        assert_eq!(ctx.primary_language.as_deref(), Some("typescript"));
        assert_eq!(ctx.framework.as_deref(), Some("React"));

        let empty = TempDir::new().unwrap();
        assert_eq!(detect_project_context(empty.path(), &[]), ProjectContext::default());
    }
}
