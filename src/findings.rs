//! FindingsExtractor: model markdown → severity-bucketed findings
//!
//! A line-by-line state machine tracks the current bucket and whether a code
//! fence is open. Headers (`#` lines or whole-line bold text) are normalised and
//! looked up in a fixed vocabulary; a header outside the vocabulary leaves the
//! current bucket as it was, so its content is kept rather than dropped. The
//! `# Part i of n` headings of a chunked response start over in the summary.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingCategory {
    Recommendation,
    Other,
}

/// One severity-tagged observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub category: FindingCategory,
    pub text: String,
}

/// Findings grouped the way the report schema lays them out
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredFindings {
    pub executive_summary: String,
    pub critical_issues: Vec<String>,
    pub high_priority: Vec<String>,
    pub medium_priority: Vec<String>,
    pub low_priority: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Finding counts per severity (recommendations excluded)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl SeverityCounts {
    pub fn total(&self) -> usize {
        self.critical + self.high + self.medium + self.low
    }
}

impl StructuredFindings {
    pub fn is_empty(&self) -> bool {
        self.executive_summary.is_empty()
            && self.critical_issues.is_empty()
            && self.high_priority.is_empty()
            && self.medium_priority.is_empty()
            && self.low_priority.is_empty()
            && self.recommendations.is_empty()
    }

    pub fn counts(&self) -> SeverityCounts {
        SeverityCounts {
            critical: self.critical_issues.len(),
            high: self.high_priority.len(),
            medium: self.medium_priority.len(),
            low: self.low_priority.len(),
        }
    }

    /// Flatten into individual findings, most severe first
    pub fn findings(&self) -> Vec<Finding> {
        let issues = [
            (Severity::Critical, &self.critical_issues),
            (Severity::High, &self.high_priority),
            (Severity::Medium, &self.medium_priority),
            (Severity::Low, &self.low_priority),
        ];
        let mut out: Vec<Finding> = issues
            .into_iter()
            .flat_map(|(severity, items)| {
                items.iter().map(move |text| Finding {
                    severity,
                    category: FindingCategory::Other,
                    text: text.clone(),
                })
            })
            .collect();
        out.extend(self.recommendations.iter().map(|text| Finding {
            severity: Severity::Low,
            category: FindingCategory::Recommendation,
            text: text.clone(),
        }));
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bucket {
    Summary,
    Critical,
    High,
    Medium,
    Low,
    Recommendations,
}

/// Normalised header text → bucket
const VOCABULARY: &[(&str, Bucket)] = &[
    ("executive summary", Bucket::Summary),
    ("summary", Bucket::Summary),
    ("overview", Bucket::Summary),
    ("critical issues", Bucket::Critical),
    ("critical", Bucket::Critical),
    ("critical priority", Bucket::Critical),
    ("critical severity", Bucket::Critical),
    ("high priority", Bucket::High),
    ("high priority issues", Bucket::High),
    ("high", Bucket::High),
    ("high severity", Bucket::High),
    ("medium priority", Bucket::Medium),
    ("medium priority issues", Bucket::Medium),
    ("medium", Bucket::Medium),
    ("medium severity", Bucket::Medium),
    ("moderate", Bucket::Medium),
    ("low priority", Bucket::Low),
    ("low priority issues", Bucket::Low),
    ("low", Bucket::Low),
    ("low severity", Bucket::Low),
    ("minor issues", Bucket::Low),
    ("recommendations", Bucket::Recommendations),
    ("recommendation", Bucket::Recommendations),
    ("suggestions", Bucket::Recommendations),
    ("next steps", Bucket::Recommendations),
];

const PLACEHOLDERS: &[&str] = &["none", "none.", "n/a", "nothing to report", "no issues found"];

/// Lowercase, strip markup, emoji/numbering and trailing counts
fn normalise_header(text: &str) -> String {
    let mut s = text.trim().trim_start_matches('#').trim().to_string();
    s = s.replace("**", "").replace("__", "");
    let s = s.trim().trim_end_matches(':').trim();
    let s = s.trim_start_matches(|c: char| !c.is_alphanumeric());
    // "1. Critical Issues" → "Critical Issues"
    let s = s
        .trim_start_matches(|c: char| c.is_ascii_digit())
        .trim_start_matches(['.', ')'])
        .trim();
    // "Critical Issues (2)" → "Critical Issues"
    let s = match s.rfind('(') {
        Some(i) if s.ends_with(')') => s[..i].trim(),
        _ => s,
    };
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// `part i of n`, as written between the answers of a chunked run
fn is_part_heading(normalised: &str) -> bool {
    let Some(rest) = normalised.strip_prefix("part ") else {
        return false;
    };
    match rest.split_once(" of ") {
        Some((i, n)) => i.parse::<usize>().is_ok() && n.parse::<usize>().is_ok(),
        None => false,
    }
}

fn lookup(header: &str) -> Option<Bucket> {
    let normalised = normalise_header(header);
    if is_part_heading(&normalised) {
        return Some(Bucket::Summary);
    }
    VOCABULARY
        .iter()
        .find(|(name, _)| *name == normalised)
        .map(|(_, bucket)| *bucket)
}

enum Line<'a> {
    Header(&'a str, bool),
    Bullet(&'a str),
    Text(&'a str),
    Blank,
}

fn classify_line(line: &str) -> Line<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Line::Blank;
    }
    if trimmed.starts_with('#') {
        return Line::Header(trimmed, true);
    }
    let unbolded = trimmed.trim_end_matches(':');
    if unbolded.len() > 4
        && unbolded.starts_with("**")
        && unbolded.ends_with("**")
        && !unbolded[2..unbolded.len() - 2].contains("**")
    {
        return Line::Header(trimmed, false);
    }
    if let Some(rest) = strip_bullet(trimmed) {
        return Line::Bullet(rest);
    }
    Line::Text(trimmed)
}

fn strip_bullet(line: &str) -> Option<&str> {
    for marker in ["- ", "* ", "+ ", "• "] {
        if let Some(rest) = line.strip_prefix(marker) {
            return Some(rest.trim());
        }
    }
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 && digits <= 3 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return Some(rest.trim());
        }
    }
    None
}

fn is_fence(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("```") || trimmed.starts_with("~~~")
}

struct Extractor {
    bucket: Bucket,
    in_fence: bool,
    summary: Vec<String>,
    findings: StructuredFindings,
    /// Whether the last list item may take continuation lines
    open_item: bool,
}

impl Extractor {
    fn new() -> Self {
        Self {
            bucket: Bucket::Summary,
            in_fence: false,
            summary: Vec::new(),
            findings: StructuredFindings::default(),
            open_item: false,
        }
    }

    fn list(&mut self) -> Option<&mut Vec<String>> {
        match self.bucket {
            Bucket::Summary => None,
            Bucket::Critical => Some(&mut self.findings.critical_issues),
            Bucket::High => Some(&mut self.findings.high_priority),
            Bucket::Medium => Some(&mut self.findings.medium_priority),
            Bucket::Low => Some(&mut self.findings.low_priority),
            Bucket::Recommendations => Some(&mut self.findings.recommendations),
        }
    }

    fn push_item(&mut self, text: &str) {
        if PLACEHOLDERS.contains(&text.to_lowercase().as_str()) {
            self.open_item = false;
            return;
        }
        match self.list() {
            Some(list) => {
                list.push(text.to_string());
                self.open_item = true;
            }
            None => self.summary.push(text.to_string()),
        }
    }

    fn continue_item(&mut self, text: &str) {
        let open = self.open_item;
        match self.list() {
            Some(list) => match list.last_mut() {
                Some(last) if open => {
                    last.push(' ');
                    last.push_str(text);
                }
                _ => self.push_item(text),
            },
            None => self.summary.push(text.to_string()),
        }
    }

    fn feed(&mut self, line: &str) {
        if is_fence(line) {
            self.in_fence = !self.in_fence;
            return;
        }
        if self.in_fence {
            let code = line.trim_end();
            if !code.is_empty() {
                self.continue_item(code.trim());
            }
            return;
        }

        match classify_line(line) {
            Line::Blank => {}
            Line::Header(text, is_heading) => match lookup(text) {
                Some(bucket) => {
                    self.bucket = bucket;
                    self.open_item = false;
                }
                None if is_heading => self.open_item = false,
                None => self.continue_item(text),
            },
            Line::Bullet(text) => self.push_item(text),
            Line::Text(text) => self.continue_item(text),
        }
    }

    fn finish(mut self) -> StructuredFindings {
        self.findings.executive_summary = self.summary.join(" ");
        self.findings
    }
}

/// Parse a model response into findings
pub fn extract(raw_text: &str) -> StructuredFindings {
    let mut extractor = Extractor::new();
    for line in raw_text.lines() {
        extractor.feed(line);
    }
    let findings = extractor.finish();
    let counts = findings.counts();
    tracing::debug!(
        "[FINDINGS] {} critical, {} high, {} medium, {} low, {} recommendations",
        counts.critical,
        counts.high,
        counts.medium,
        counts.low,
        findings.recommendations.len()
    );
    findings
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = "\
## Executive Summary
The change adds a retry loop.
It looks mostly fine.

## Critical Issues
- SQL built with string concatenation in `db.py`
  allows injection.

## High Priority
1. Missing timeout on HTTP call
2) Unbounded retry

## Medium Priority
- None

## Low Priority
* Typo in log message

## Recommendations
- Add integration tests
- Use parameterised queries
";

    #[test]
    fn test_full_response() {
        let f = extract(RESPONSE);
        assert_eq!(
            f.executive_summary,
            "The change adds a retry loop. It looks mostly fine."
        );
        assert_eq!(
            f.critical_issues,
            vec!["SQL built with string concatenation in `db.py` allows injection."]
        );
        assert_eq!(f.high_priority, vec!["Missing timeout on HTTP call", "Unbounded retry"]);
        assert!(f.medium_priority.is_empty());
        assert_eq!(f.low_priority, vec!["Typo in log message"]);
        assert_eq!(f.recommendations.len(), 2);
        assert_eq!(f.counts().total(), 4);
    }

    #[test]
    fn test_recommendations_never_land_in_critical() {
        let text = "## Critical Issues\n- real problem\n## Recommendations\n- add tests\n- refactor\n";
        let f = extract(text);
        assert_eq!(f.critical_issues, vec!["real problem"]);
        assert_eq!(f.recommendations, vec!["add tests", "refactor"]);
    }

    #[test]
    fn test_unrecognised_header_keeps_bucket() {
        let text = "## High Priority\n- one\n### Details for db.py\n- two\n";
        let f = extract(text);
        assert_eq!(f.high_priority, vec!["one", "two"]);
    }

    #[test]
    fn test_substring_lookalike_is_not_a_bucket() {
        // "Critical path notes" contains "critical" but is not a known header
        let text = "## Low Priority\n- minor\n## Critical path notes\n- still low\n";
        let f = extract(text);
        assert!(f.critical_issues.is_empty());
        assert_eq!(f.low_priority, vec!["minor", "still low"]);
    }

    #[test]
    fn test_bold_and_decorated_headers() {
        let text = "**Critical Issues:**\n- a\n### 🔴 2. High Priority (1)\n- b\n**Note** this is text\n";
        let f = extract(text);
        assert_eq!(f.critical_issues, vec!["a"]);
        assert_eq!(f.high_priority, vec!["b **Note** this is text"]);
    }

    #[test]
    fn test_headers_inside_fences_ignored() {
        let text = "## Medium Priority\n- config parsing\n```\n## Critical Issues\n```\n- second\n";
        let f = extract(text);
        assert!(f.critical_issues.is_empty());
        assert_eq!(f.medium_priority.len(), 2);
        assert!(f.medium_priority[0].contains("## Critical Issues"));
    }

    #[test]
    fn test_chunked_response_merges_parts() {
        let text = "# Part 1 of 2\n\n## Critical Issues\n- a\n\n# Part 2 of 2\n\n## Critical Issues\n- b\n";
        let f = extract(text);
        assert_eq!(f.critical_issues, vec!["a", "b"]);
    }

    #[test]
    fn test_part_heading_returns_to_summary() {
        let text = "# Part 1 of 2\n\n## Recommendations\n- add tests\n\n# Part 2 of 2\n\nThe second half looks fine overall.\n\n## High Priority\n- missing timeout\n";
        let f = extract(text);
        assert_eq!(f.recommendations, vec!["add tests"]);
        assert_eq!(f.executive_summary, "The second half looks fine overall.");
        assert_eq!(f.high_priority, vec!["missing timeout"]);
    }

    #[test]
    fn test_part_like_heading_is_not_a_part_marker() {
        assert!(is_part_heading("part 2 of 10"));
        assert!(!is_part_heading("part of the plan"));
        assert!(!is_part_heading("partial results"));
    }

    #[test]
    fn test_findings_flatten_with_categories() {
        let f = extract(RESPONSE);
        let all = f.findings();
        assert_eq!(all[0].severity, Severity::Critical);
        let recs: Vec<_> = all
            .iter()
            .filter(|x| x.category == FindingCategory::Recommendation)
            .collect();
        assert_eq!(recs.len(), 2);
        assert!(recs.iter().all(|r| r.severity == Severity::Low));
    }

    #[test]
    fn test_empty_text() {
        assert!(extract("").is_empty());
    }
}
