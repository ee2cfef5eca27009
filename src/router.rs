//! AnalysisRouter: pick an analysis profile for a change set
//!
//! Dependency manifests always win, whether they show up as blocks or only in
//! the list of changed paths (lockfiles are kept out of the bundle). Otherwise a handful of cheap heuristics
//! decide between `architecture` and `general`:
//!
//! - mostly new files (at least [`MIN_NEW_FILES`])
//! - changes spread over many top-level directories
//! - a block mix dominated by classes/modules
//! - a high density of structural keywords (`trait`, `interface`, `extends`, ...)

use std::collections::HashSet;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::preprocess::{BlockKind, CodeBlock};

const MIN_NEW_FILES: usize = 3;
const NEW_FILE_RATIO: f64 = 0.5;
const MIN_TOP_LEVEL_DIRS: usize = 4;
const MIN_STRUCTURAL_BLOCKS: usize = 3;
const STRUCTURAL_BLOCK_RATIO: f64 = 0.5;
const MIN_LINES_FOR_DENSITY: usize = 20;
const KEYWORD_DENSITY: f64 = 0.15;

static STRUCTURAL_KEYWORDS: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"\b(interface|abstract|trait|extends|implements|namespace|protocol|impl|struct|class|module|package)\b",
    )
    .ok()
});

/// Analysis profile; selects prompt template, timeout and request budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    #[default]
    General,
    Dependency,
    Architecture,
}

impl AnalysisType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Dependency => "dependency",
            Self::Architecture => "architecture",
        }
    }

    /// Multiplier applied to the base request timeout
    pub fn timeout_factor(&self) -> f64 {
        match self {
            Self::General => 1.0,
            Self::Dependency => 1.5,
            Self::Architecture => 2.5,
        }
    }

    /// Share of the context window left free for the model's answer
    pub fn answer_share(&self) -> f64 {
        match self {
            Self::General => 0.25,
            Self::Dependency => 0.3,
            Self::Architecture => 0.4,
        }
    }
}

impl std::fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File-level shape of the triggering diff
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeShape {
    pub changed_files: usize,
    pub added_files: usize,
}

/// A classification plus the rule that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub analysis_type: AnalysisType,
    pub reason: String,
}

impl Classification {
    fn new(analysis_type: AnalysisType, reason: impl Into<String>) -> Self {
        Self {
            analysis_type,
            reason: reason.into(),
        }
    }
}

/// Recognised dependency manifest or lockfile
pub fn is_dependency_manifest(path: &str) -> bool {
    let Some(name) = Path::new(path).file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let lower = name.to_ascii_lowercase();
    matches!(
        lower.as_str(),
        "cargo.toml"
            | "cargo.lock"
            | "package.json"
            | "package-lock.json"
            | "yarn.lock"
            | "pnpm-lock.yaml"
            | "pyproject.toml"
            | "pipfile"
            | "pipfile.lock"
            | "poetry.lock"
            | "setup.py"
            | "setup.cfg"
            | "go.mod"
            | "go.sum"
            | "pom.xml"
            | "build.gradle"
            | "build.gradle.kts"
            | "gemfile"
            | "gemfile.lock"
            | "composer.json"
            | "composer.lock"
            | "packages.config"
    ) || (lower.starts_with("requirements") && lower.ends_with(".txt"))
        || lower.ends_with(".csproj")
}

/// Classify from blocks alone
pub fn classify(blocks: &[CodeBlock]) -> AnalysisType {
    classify_with_changes(blocks, None, &[]).analysis_type
}

/// Classify using blocks and, when known, the changed paths and file-level
/// shape of the diff
pub fn classify_with_changes(
    blocks: &[CodeBlock],
    changes: Option<ChangeShape>,
    changed_paths: &[String],
) -> Classification {
    let manifest = blocks
        .iter()
        .map(|b| b.file_path.as_str())
        .chain(changed_paths.iter().map(String::as_str))
        .find(|path| is_dependency_manifest(path));
    if let Some(manifest) = manifest {
        return Classification::new(
            AnalysisType::Dependency,
            format!("dependency manifest {} changed", manifest),
        );
    }

    if blocks.is_empty() {
        return Classification::new(AnalysisType::General, "no blocks");
    }

    if let Some(shape) = changes {
        if shape.added_files >= MIN_NEW_FILES
            && shape.changed_files > 0
            && shape.added_files as f64 / shape.changed_files as f64 >= NEW_FILE_RATIO
        {
            return Classification::new(
                AnalysisType::Architecture,
                format!("{} of {} changed files are new", shape.added_files, shape.changed_files),
            );
        }
    }

    let top_dirs: HashSet<&str> = blocks
        .iter()
        .filter_map(|b| b.file_path.split_once('/').map(|(dir, _)| dir))
        .collect();
    if top_dirs.len() >= MIN_TOP_LEVEL_DIRS {
        return Classification::new(
            AnalysisType::Architecture,
            format!("changes span {} top-level directories", top_dirs.len()),
        );
    }

    let structural = blocks
        .iter()
        .filter(|b| matches!(b.kind, BlockKind::Class | BlockKind::Module))
        .count();
    if structural >= MIN_STRUCTURAL_BLOCKS
        && structural as f64 / blocks.len() as f64 >= STRUCTURAL_BLOCK_RATIO
    {
        return Classification::new(
            AnalysisType::Architecture,
            format!("{} of {} blocks are classes/modules", structural, blocks.len()),
        );
    }

    let lines: usize = blocks.iter().map(|b| b.content.lines().count()).sum();
    let keywords: usize = blocks
        .iter()
        .map(|b| {
            STRUCTURAL_KEYWORDS
                .as_ref()
                .map_or(0, |re| re.find_iter(&b.content).count())
        })
        .sum();
    if lines >= MIN_LINES_FOR_DENSITY && keywords as f64 / lines as f64 >= KEYWORD_DENSITY {
        return Classification::new(
            AnalysisType::Architecture,
            format!("{} structural keywords over {} lines", keywords, lines),
        );
    }

    Classification::new(AnalysisType::General, "no structural signal")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(path: &str, kind: BlockKind, content: &str) -> CodeBlock {
        CodeBlock::new(
            "demo",
            path,
            "python",
            kind,
            "x".to_string(),
            content.to_string(),
            1,
        )
    }

    #[test]
    fn test_manifest_wins_over_everything() {
        let mut blocks: Vec<CodeBlock> = (0..19)
            .map(|i| block(&format!("src/m{}.py", i), BlockKind::Function, "def f(): pass"))
            .collect();
        blocks.push(block("requirements.txt", BlockKind::Unknown, "requests==2.31"));
        assert_eq!(classify(&blocks), AnalysisType::Dependency);

        let shape = ChangeShape {
            changed_files: 20,
            added_files: 20,
        };
        let c = classify_with_changes(&blocks, Some(shape), &[]);
        assert_eq!(c.analysis_type, AnalysisType::Dependency);
        assert!(c.reason.contains("requirements.txt"));
    }

    #[test]
    fn test_lockfile_outside_bundle_still_routes_to_dependency() {
        let blocks = vec![block("src/app.py", BlockKind::Function, "def f(): pass")];
        let changed = vec!["src/app.py".to_string(), "Cargo.lock".to_string()];
        let c = classify_with_changes(&blocks, None, &changed);
        assert_eq!(c.analysis_type, AnalysisType::Dependency);
        assert_eq!(c.reason, "dependency manifest Cargo.lock changed");

        // An empty block list does not hide a lockfile change either
        let c = classify_with_changes(&[], None, &["web/yarn.lock".to_string()]);
        assert_eq!(c.analysis_type, AnalysisType::Dependency);

        let c = classify_with_changes(&blocks, None, &["src/app.py".to_string()]);
        assert_eq!(c.analysis_type, AnalysisType::General);
    }

    #[test]
    fn test_manifest_names() {
        for path in [
            "Cargo.toml",
            "web/package.json",
            "requirements-dev.txt",
            "svc/go.sum",
            "App/App.csproj",
            "build.gradle.kts",
        ] {
            assert!(is_dependency_manifest(path), "{}", path);
        }
        for path in ["src/cargo.rs", "notes.txt", "package.json.bak"] {
            assert!(!is_dependency_manifest(path), "{}", path);
        }
    }

    #[test]
    fn test_small_function_change_is_general() {
        let blocks = vec![block("a.py", BlockKind::Function, "def f(x): return x*2")];
        assert_eq!(classify(&blocks), AnalysisType::General);
        assert_eq!(classify(&[]), AnalysisType::General);
    }

    #[test]
    fn test_mostly_new_files_is_architecture() {
        let blocks = vec![block("a.py", BlockKind::Function, "def f(): pass")];
        let shape = ChangeShape {
            changed_files: 4,
            added_files: 3,
        };
        assert_eq!(
            classify_with_changes(&blocks, Some(shape), &[]).analysis_type,
            AnalysisType::Architecture
        );
        let shape = ChangeShape {
            changed_files: 10,
            added_files: 3,
        };
        assert_eq!(
            classify_with_changes(&blocks, Some(shape), &[]).analysis_type,
            AnalysisType::General
        );
    }

    #[test]
    fn test_class_heavy_change_is_architecture() {
        let blocks = vec![
            block("m.py", BlockKind::Class, "class A: pass"),
            block("m.py", BlockKind::Class, "class B(A): pass"),
            block("m.py", BlockKind::Class, "class C(B): pass"),
            block("m.py", BlockKind::Function, "def f(): pass"),
        ];
        assert_eq!(classify(&blocks), AnalysisType::Architecture);
    }

    #[test]
    fn test_wide_spread_is_architecture() {
        let blocks: Vec<CodeBlock> = ["api", "core", "db", "ui"]
            .iter()
            .map(|d| block(&format!("{}/x.py", d), BlockKind::Function, "def f(): pass"))
            .collect();
        assert_eq!(classify(&blocks), AnalysisType::Architecture);
    }

    #[test]
    fn test_keyword_density() {
        let content = "trait Store {}\nimpl Store for Db {}\n".repeat(10);
        let blocks = vec![block("src/db.rs", BlockKind::Function, &content)];
        assert_eq!(classify(&blocks), AnalysisType::Architecture);
    }

    #[test]
    fn test_timeout_factor_grows_with_scope() {
        assert!(AnalysisType::General.timeout_factor() < AnalysisType::Dependency.timeout_factor());
        assert!(
            AnalysisType::Dependency.timeout_factor() < AnalysisType::Architecture.timeout_factor()
        );
    }
}
