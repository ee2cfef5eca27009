//! Bundle preprocessing: flattened text → ordered code blocks
//!
//! Parsing happens in two stages:
//! 1. [`bundle::parse_bundle_files`] walks the bundle line by line and recovers
//!    file sections (see that module for the accepted header and fence forms).
//! 2. [`split::split_file`] cuts each file at function/class boundaries using
//!    tree-sitter, or keeps the whole file as one `unknown` block when no
//!    grammar is available.
//!
//! Files are split in parallel; block order follows bundle order.

mod bundle;
mod split;

pub use bundle::{parse_bundle_files, BundleFile};
pub use split::split_file;

use std::collections::HashMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Granularity of a code block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Function,
    Class,
    Module,
    Unknown,
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::Module => "module",
            Self::Unknown => "unknown",
        }
    }
}

/// The smallest unit of code the pipeline reasons about
///
/// Blocks are immutable once produced and live only as long as the run that
/// created them; the semantic index keeps just a vector and a digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBlock {
    pub repository: String,
    pub file_path: String,
    /// Canonical language name, `text` when unrecognised
    pub language: String,
    pub kind: BlockKind,
    pub name: String,
    pub content: String,
    pub byte_size: usize,
    /// 1-based first line within the file
    pub start_line: usize,
    /// Earlier blocks in the same file sharing this kind and name
    #[serde(default)]
    pub occurrence: usize,
}

impl CodeBlock {
    pub fn new(
        repository: &str,
        file_path: &str,
        language: &str,
        kind: BlockKind,
        name: String,
        content: String,
        start_line: usize,
    ) -> Self {
        Self {
            repository: repository.to_string(),
            file_path: file_path.to_string(),
            language: language.to_string(),
            kind,
            name,
            byte_size: content.len(),
            content,
            start_line,
            occurrence: 0,
        }
    }

    /// Stable identity across runs: `path::kind::name`, suffixed `#n` for the
    /// n-th construct of that name in the file
    pub fn identity(&self) -> String {
        let base = format!("{}::{}::{}", self.file_path, self.kind.as_str(), self.name);
        if self.occurrence == 0 {
            base
        } else {
            format!("{}#{}", base, self.occurrence + 1)
        }
    }
}

/// Parse a bundle into code blocks. An empty bundle yields an empty list.
pub fn parse(repository: &str, bundle: &str) -> Vec<CodeBlock> {
    if bundle.trim().is_empty() {
        return Vec::new();
    }

    let files = parse_bundle_files(bundle);
    let mut blocks: Vec<CodeBlock> = files
        .par_iter()
        .map(|file| split_file(repository, file))
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect();
    number_occurrences(&mut blocks);

    tracing::debug!(
        "[PREPROCESS] {}: {} files → {} blocks",
        repository,
        files.len(),
        blocks.len()
    );
    blocks
}

/// Tell apart same-named constructs within one file, in source order
fn number_occurrences(blocks: &mut [CodeBlock]) {
    let mut seen: HashMap<(String, BlockKind, String), usize> = HashMap::new();
    for block in blocks.iter_mut() {
        let key = (block.file_path.clone(), block.kind, block.name.clone());
        let count = seen.entry(key).or_insert(0);
        block.occurrence = *count;
        *count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle_of(blocks: &[(&str, &str, &str)]) -> String {
        blocks
            .iter()
            .map(|(path, tag, code)| format!("## File: {}\n```{}\n{}\n```\n\n", path, tag, code))
            .collect()
    }

    #[test]
    fn test_known_blocks_reparse_into_same_count() {
        let known = [
            ("a.py", "python", "def f(x):\n    return x * 2"),
            ("src/lib.rs", "rust", "pub fn add(a: i32, b: i32) -> i32 {\n    a + b\n}"),
            ("web/app.ts", "ts", "export function greet(name: string): string {\n  return `hi ${name}`;\n}"),
            ("cmd/main.go", "go", "package main\n\nfunc main() {\n}"),
            ("config.yaml", "yaml", "key: value"),
        ];
        let blocks = parse("demo", &bundle_of(&known));
        assert_eq!(blocks.len(), known.len());
        let paths: Vec<&str> = blocks.iter().map(|b| b.file_path.as_str()).collect();
        assert_eq!(paths, vec!["a.py", "src/lib.rs", "web/app.ts", "cmd/main.go", "config.yaml"]);
    }

    #[test]
    fn test_scenario_two_python_files() {
        let bundle = bundle_of(&[
            ("a.py", "python", "def f(x): return x*2"),
            ("b.py", "python", "def g(y): return y*2"),
        ]);
        let blocks = parse("demo", &bundle);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].kind, BlockKind::Function);
        assert_eq!(blocks[0].name, "f");
        assert_eq!(blocks[0].language, "python");
        assert_eq!(blocks[1].name, "g");
        assert_eq!(blocks[1].identity(), "b.py::function::g");
        assert_eq!(blocks[1].byte_size, "def g(y): return y*2".len());
    }

    #[test]
    fn test_same_named_blocks_get_distinct_identities() {
        let bundle = bundle_of(&[
            ("a.py", "python", "def f(x):\n    return 1\n\n\ndef f(x):\n    return 2"),
            ("b.py", "python", "def f(x):\n    return 3"),
        ]);
        let blocks = parse("demo", &bundle);
        let ids: Vec<String> = blocks.iter().map(CodeBlock::identity).collect();
        assert_eq!(
            ids,
            vec!["a.py::function::f", "a.py::function::f#2", "b.py::function::f"]
        );
        assert_eq!(blocks[1].start_line, 5);
    }

    #[test]
    fn test_empty_bundle_is_empty_list() {
        assert!(parse("demo", "").is_empty());
        assert!(parse("demo", "   \n").is_empty());
    }
}
