//! Line-oriented bundle parser
//!
//! A bundle is a sequence of file-delimited sections; each section may hold a
//! fenced code region. Recognised file headers (outside fences only):
//!
//! - `## File: path/to/file` (any heading level, or none)
//! - `<file path="path/to/file">` … `</file>`
//!
//! Fences open with three or more backticks or tildes and close only with a run
//! of the same character at least as long, so code that itself contains fences
//! or header-looking lines survives intact.

/// One file section recovered from a bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleFile {
    /// Path as written in the header
    pub path: String,
    /// Info string of the first fence, if any (```python → "python")
    pub fence_tag: Option<String>,
    /// Fenced content when a fence was present, otherwise the raw section text
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fence {
    marker: char,
    len: usize,
}

#[derive(Debug, Default)]
struct Section {
    path: String,
    fence_tag: Option<String>,
    has_fence: bool,
    fenced: Vec<String>,
    raw: Vec<String>,
}

impl Section {
    fn new(path: String) -> Self {
        Self {
            path,
            ..Self::default()
        }
    }

    fn finish(self) -> Option<BundleFile> {
        let content = if self.has_fence {
            self.fenced.join("\n")
        } else {
            self.raw.join("\n").trim().to_string()
        };
        if content.trim().is_empty() {
            tracing::debug!("[PREPROCESS] skipping empty section {}", self.path);
            return None;
        }
        Some(BundleFile {
            path: self.path,
            fence_tag: self.fence_tag,
            content,
        })
    }
}

/// Parser state: which file we are in and whether a fence is open
#[derive(Debug, Default)]
struct BundleParser {
    current: Option<Section>,
    fence: Option<Fence>,
    files: Vec<BundleFile>,
}

impl BundleParser {
    fn feed(&mut self, line: &str) {
        if let Some(fence) = self.fence {
            if closes_fence(line, fence) {
                self.fence = None;
            } else if let Some(section) = self.current.as_mut() {
                section.fenced.push(line.to_string());
            }
            return;
        }

        if let Some(path) = file_header(line) {
            self.finish_section();
            self.current = Some(Section::new(path));
            return;
        }

        if line.trim() == "</file>" {
            self.finish_section();
            return;
        }

        let Some(section) = self.current.as_mut() else {
            // Preamble before the first file header
            return;
        };

        if let Some((fence, tag)) = opens_fence(line) {
            self.fence = Some(fence);
            if !section.has_fence {
                section.has_fence = true;
                section.fence_tag = tag;
            } else {
                section.fenced.push(String::new());
            }
            return;
        }

        if is_separator(line) {
            return;
        }

        section.raw.push(line.to_string());
    }

    fn finish_section(&mut self) {
        self.fence = None;
        if let Some(section) = self.current.take() {
            if let Some(file) = section.finish() {
                self.files.push(file);
            }
        }
    }

    fn finish(mut self) -> Vec<BundleFile> {
        if self.fence.is_some() {
            tracing::debug!("[PREPROCESS] unterminated fence at end of bundle");
        }
        self.finish_section();
        self.files
    }
}

/// Split a bundle into file sections, in bundle order
pub fn parse_bundle_files(bundle: &str) -> Vec<BundleFile> {
    let mut parser = BundleParser::default();
    for line in bundle.lines() {
        parser.feed(line);
    }
    parser.finish()
}

fn file_header(line: &str) -> Option<String> {
    let trimmed = line.trim();

    if let Some(rest) = trimmed.strip_prefix("<file path=") {
        let rest = rest.trim_end_matches('>').trim();
        let path = rest.trim_matches(|c| c == '"' || c == '\'');
        return non_empty(path);
    }

    let without_hashes = trimmed.trim_start_matches('#');
    // Require a space after heading hashes, or no hashes at all
    if without_hashes.len() != trimmed.len() && !without_hashes.starts_with(' ') {
        return None;
    }
    let rest = without_hashes.trim_start();
    let (label, path) = rest.split_once(':')?;
    if !label.eq_ignore_ascii_case("file") {
        return None;
    }
    non_empty(path.trim().trim_matches('`'))
}

fn non_empty(path: &str) -> Option<String> {
    let path = path.trim();
    (!path.is_empty()).then(|| path.to_string())
}

fn fence_run(line: &str) -> Option<(char, usize, &str)> {
    let indent = line.len() - line.trim_start_matches(' ').len();
    if indent > 3 {
        return None;
    }
    let rest = &line[indent..];
    let marker = rest.chars().next().filter(|c| *c == '`' || *c == '~')?;
    let len = rest.chars().take_while(|c| *c == marker).count();
    if len < 3 {
        return None;
    }
    Some((marker, len, &rest[len..]))
}

fn opens_fence(line: &str) -> Option<(Fence, Option<String>)> {
    let (marker, len, info) = fence_run(line)?;
    let info = info.trim();
    if marker == '`' && info.contains('`') {
        return None;
    }
    let tag = (!info.is_empty()).then(|| info.to_string());
    Some((Fence { marker, len }, tag))
}

fn closes_fence(line: &str, open: Fence) -> bool {
    match fence_run(line) {
        Some((marker, len, rest)) => marker == open.marker && len >= open.len && rest.trim().is_empty(),
        None => false,
    }
}

fn is_separator(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.len() >= 16 && trimmed.chars().all(|c| c == '=')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markdown_style_sections() {
        let bundle = "# Preamble\nsome summary\n\n## File: a.py\n```python\ndef f(x): return x*2\n```\n\n## File: b.py\n```py\ndef g(y): return y*2\n```\n";
        let files = parse_bundle_files(bundle);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, "a.py");
        assert_eq!(files[0].fence_tag.as_deref(), Some("python"));
        assert_eq!(files[0].content, "def f(x): return x*2");
        assert_eq!(files[1].path, "b.py");
    }

    #[test]
    fn test_header_inside_fence_is_content() {
        let bundle = "## File: README.md\n````markdown\n# Title\n## File: not-a-file.py\n```\ncode\n```\n````\n";
        let files = parse_bundle_files(bundle);
        assert_eq!(files.len(), 1);
        assert!(files[0].content.contains("## File: not-a-file.py"));
        assert!(files[0].content.contains("```\ncode\n```"));
    }

    #[test]
    fn test_xml_style_sections_without_fences() {
        let bundle = "<file path=\"src/lib.rs\">\npub fn a() {}\n</file>\n<file path='src/b.rs'>\nfn b() {}\n</file>\n";
        let files = parse_bundle_files(bundle);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, "src/lib.rs");
        assert_eq!(files[0].content, "pub fn a() {}");
        assert_eq!(files[1].path, "src/b.rs");
        assert!(files[1].fence_tag.is_none());
    }

    #[test]
    fn test_plain_style_separators_ignored() {
        let bundle = "================\nFile: main.go\n================\npackage main\n\nfunc main() {}\n";
        let files = parse_bundle_files(bundle);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "main.go");
        assert_eq!(files[0].content, "package main\n\nfunc main() {}");
    }

    #[test]
    fn test_unterminated_fence_closes_at_eof() {
        let bundle = "## File: x.rs\n```rust\nfn x() {}\n";
        let files = parse_bundle_files(bundle);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].content, "fn x() {}");
    }

    #[test]
    fn test_empty_sections_skipped() {
        let bundle = "## File: empty.py\n```python\n```\n## File: ok.py\nx = 1\n";
        let files = parse_bundle_files(bundle);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "ok.py");
    }

    #[test]
    fn test_empty_bundle() {
        assert!(parse_bundle_files("").is_empty());
        assert!(parse_bundle_files("no headers here\n```\nx\n```").is_empty());
    }

    #[test]
    fn test_heading_without_space_is_not_header() {
        assert_eq!(file_header("##File: a.py"), None);
        assert_eq!(file_header("### File: `src/a.py`"), Some("src/a.py".to_string()));
        assert_eq!(file_header("Profile: x"), None);
    }
}
