//! Deterministic term-frequency vectorizer
//!
//! Code is tokenised into identifiers, keywords, numbers and single punctuation
//! characters. Every token is hashed (FNV-1a) into a fixed number of buckets;
//! each non-keyword identifier additionally contributes to a shared `$id`
//! feature, so two functions that differ only in naming stay close.

use super::{BackendKind, Embedder};
use crate::error::Result;

/// Number of hash buckets
pub const LEXICAL_DIMENSIONS: usize = 1024;

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

const IDENT_FEATURE: &str = "$id";

/// Keywords across the supported languages; these keep their own identity
/// and do not count toward `$id`.
const KEYWORDS: &[&str] = &[
    "abstract", "async", "await", "break", "case", "catch", "class", "const", "continue", "def",
    "default", "defer", "do", "elif", "else", "enum", "export", "extends", "false", "final",
    "finally", "fn", "for", "from", "func", "function", "go", "if", "impl", "implements",
    "import", "in", "interface", "lambda", "let", "loop", "match", "mod", "mut", "namespace",
    "new", "nil", "none", "null", "package", "private", "protected", "pub", "public", "raise",
    "return", "self", "static", "struct", "super", "switch", "this", "throw", "throws", "trait",
    "true", "try", "type", "use", "using", "val", "var", "void", "where", "while", "with",
    "yield",
];

fn fnv1a_hash(data: &str) -> u64 {
    let mut hash = FNV_OFFSET;
    for byte in data.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn is_keyword(token: &str) -> bool {
    KEYWORDS.contains(&token.to_ascii_lowercase().as_str())
}

/// Split source text into lexical tokens
pub fn tokenize(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        if c.is_whitespace() {
            continue;
        }
        let mut end = start + c.len_utf8();
        if c.is_alphanumeric() || c == '_' {
            let numeric = c.is_ascii_digit();
            while let Some(&(i, next)) = chars.peek() {
                let continues = next.is_alphanumeric() || next == '_' || (numeric && next == '.');
                if !continues {
                    break;
                }
                end = i + next.len_utf8();
                chars.next();
            }
        }
        tokens.push(&text[start..end]);
    }

    tokens
}

/// Term-frequency vector over hashed code tokens; always available
#[derive(Debug, Clone)]
pub struct LexicalVectorizer {
    dimensions: usize,
}

impl Default for LexicalVectorizer {
    fn default() -> Self {
        Self {
            dimensions: LEXICAL_DIMENSIONS,
        }
    }
}

impl LexicalVectorizer {
    pub fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        let ident_bucket = self.bucket(IDENT_FEATURE);

        for token in tokenize(text) {
            vector[self.bucket(token)] += 1.0;
            let first = token.chars().next().unwrap_or(' ');
            if (first.is_alphabetic() || first == '_') && !is_keyword(token) {
                vector[ident_bucket] += 1.0;
            }
        }

        vector
    }

    fn bucket(&self, token: &str) -> usize {
        (fnv1a_hash(token) % self.dimensions as u64) as usize
    }
}

impl Embedder for LexicalVectorizer {
    fn kind(&self) -> BackendKind {
        BackendKind::Lexical
    }

    fn identity(&self) -> String {
        format!("lexical-fnv{}", self.dimensions)
    }

    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }
}
