//! Prompt templates per analysis type

use crate::preprocess::CodeBlock;
use crate::router::AnalysisType;

/// Headings the model is asked to use; the findings parser keys off these
pub const RESPONSE_SECTIONS: &[&str] = &[
    "Executive Summary",
    "Critical Issues",
    "High Priority",
    "Medium Priority",
    "Low Priority",
    "Recommendations",
];

/// A prompt split into a fixed header and chunkable per-block sections
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub analysis_type: AnalysisType,
    pub system: String,
    /// Instructions and semantic context, repeated in every chunk
    pub header: String,
    /// One rendered section per code block
    pub sections: Vec<String>,
}

impl Prompt {
    pub fn total_chars(&self) -> usize {
        self.header.chars().count()
            + self.sections.iter().map(|s| s.chars().count()).sum::<usize>()
    }
}

fn system_prompt(analysis_type: AnalysisType) -> &'static str {
    match analysis_type {
        AnalysisType::General => {
            "You are a senior software engineer reviewing a change set. Focus on bugs, \
             error handling, security problems and maintainability. Be specific and cite \
             file paths."
        }
        AnalysisType::Dependency => {
            "You are a software supply-chain reviewer. The change set touches dependency \
             manifests. Focus on newly added or upgraded packages, version pinning, known \
             vulnerable or abandoned packages, license concerns and how the code uses them."
        }
        AnalysisType::Architecture => {
            "You are a software architect reviewing a structural change. Focus on module \
             boundaries, coupling, abstractions, naming of new types and whether the new \
             structure fits the existing code base."
        }
    }
}

fn response_format() -> String {
    let mut text = String::from(
        "Respond in markdown using exactly these level-2 headings, in this order:\n",
    );
    for section in RESPONSE_SECTIONS {
        text.push_str(&format!("## {}\n", section));
    }
    text.push_str(
        "Under every heading except Executive Summary, write one bullet per finding. \
         Write \"- None\" when a heading has nothing to report.\n",
    );
    text
}

/// Render a block for inclusion in the prompt
pub fn render_block(block: &CodeBlock) -> String {
    format!(
        "### {} ({} `{}`, {}, line {})\n```{}\n{}\n```\n",
        block.file_path,
        block.kind.as_str(),
        block.name,
        block.language,
        block.start_line,
        block.language,
        block.content.trim_end()
    )
}

/// Build the prompt for one run
pub fn build_prompt(
    analysis_type: AnalysisType,
    project_name: &str,
    blocks: &[CodeBlock],
    semantic_context: &str,
) -> Prompt {
    let mut header = format!(
        "Project: {}\nAnalysis type: {}\nChanged code blocks: {}\n\n",
        project_name,
        analysis_type.as_str(),
        blocks.len()
    );
    header.push_str(&response_format());
    if !semantic_context.trim().is_empty() {
        header.push('\n');
        header.push_str(semantic_context.trim_end());
        header.push('\n');
    }
    header.push_str("\n# Changed code\n\n");

    Prompt {
        analysis_type,
        system: system_prompt(analysis_type).to_string(),
        header,
        sections: blocks.iter().map(render_block).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::BlockKind;

    #[test]
    fn test_prompt_carries_sections_and_context() {
        let block = CodeBlock::new(
            "demo",
            "a.py",
            "python",
            BlockKind::Function,
            "f".to_string(),
            "def f(x): return x*2\n".to_string(),
            3,
        );
        let prompt = build_prompt(
            AnalysisType::Dependency,
            "demo",
            &[block],
            "- `b.py::function::g` resembles `a.py::function::f` (similarity 0.76)",
        );

        assert!(prompt.system.contains("supply-chain"));
        assert!(prompt.header.contains("## Critical Issues"));
        assert!(prompt.header.contains("resembles"));
        assert_eq!(prompt.sections.len(), 1);
        assert!(prompt.sections[0].starts_with("### a.py (function `f`, python, line 3)"));
        assert!(prompt.sections[0].contains("```python\ndef f(x): return x*2\n```"));
    }

    #[test]
    fn test_each_type_has_distinct_system_prompt() {
        let general = build_prompt(AnalysisType::General, "p", &[], "");
        let arch = build_prompt(AnalysisType::Architecture, "p", &[], "");
        assert_ne!(general.system, arch.system);
        assert!(!general.header.contains("resembles"));
    }
}
