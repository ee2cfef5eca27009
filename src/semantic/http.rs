//! OpenAI-shaped `/embeddings` client for model-backed vectors

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{BackendKind, Embedder};
use crate::error::{CodewatchError, Result};

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// Derive an embeddings URL from a chat-completions URL
///
/// `http://host/v1/chat/completions` → `http://host/v1/embeddings`
pub fn embeddings_url(chat_endpoint: &str) -> String {
    let trimmed = chat_endpoint.trim_end_matches('/');
    match trimmed.strip_suffix("/chat/completions") {
        Some(base) => format!("{}/embeddings", base),
        None => format!("{}/embeddings", trimmed),
    }
}

/// Embedding backend served over HTTP by a local model server
pub struct HttpEmbedder {
    kind: BackendKind,
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
}

impl HttpEmbedder {
    pub fn new(kind: BackendKind, endpoint: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CodewatchError::Index {
                message: format!("cannot build HTTP client: {}", e),
            })?;
        Ok(Self {
            kind,
            client,
            endpoint: endpoint.to_string(),
            model: model.to_string(),
        })
    }

    /// Initialisation check: the endpoint must return a non-empty vector
    pub fn probe(&self) -> Result<usize> {
        let vectors = self.embed(&["fn probe() {}"])?;
        match vectors.first() {
            Some(v) if !v.is_empty() => Ok(v.len()),
            _ => Err(CodewatchError::Index {
                message: format!("{} returned an empty embedding", self.endpoint),
            }),
        }
    }
}

impl Embedder for HttpEmbedder {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn identity(&self) -> String {
        format!("{}:{}", self.kind.as_str(), self.model)
    }

    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(&self.endpoint)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .map_err(|e| CodewatchError::Index {
                message: format!("embedding request to {} failed: {}", self.endpoint, e),
            })?;

        if !response.status().is_success() {
            return Err(CodewatchError::Index {
                message: format!("embedding endpoint returned {}", response.status()),
            });
        }

        let mut body: EmbeddingResponse = response.json().map_err(|e| CodewatchError::Index {
            message: format!("malformed embedding response: {}", e),
        })?;
        if body.data.len() != texts.len() {
            return Err(CodewatchError::Index {
                message: format!(
                    "expected {} embeddings, got {}",
                    texts.len(),
                    body.data.len()
                ),
            });
        }

        body.data.sort_by_key(|item| item.index);
        Ok(body.data.into_iter().map(|item| item.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embeddings_url() {
        assert_eq!(
            embeddings_url("http://localhost:11434/v1/chat/completions"),
            "http://localhost:11434/v1/embeddings"
        );
        assert_eq!(
            embeddings_url("http://localhost:8080/v1/"),
            "http://localhost:8080/v1/embeddings"
        );
    }

    #[test]
    fn test_unreachable_endpoint_fails_probe() {
        let embedder = HttpEmbedder::new(
            BackendKind::EmbeddingModel,
            "http://127.0.0.1:9/v1/embeddings",
            "nomic-embed-text",
            Duration::from_millis(500),
        )
        .unwrap();
        assert!(matches!(
            embedder.probe(),
            Err(CodewatchError::Index { .. })
        ));
        assert_eq!(embedder.identity(), "embedding_model:nomic-embed-text");
    }
}
