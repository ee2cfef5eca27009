//! OpenAI-compatible chat-completions client

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::LlmSettings;
use crate::error::{CodewatchError, Result};

/// One chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A model that answers a conversation within a deadline
///
/// Any failure (unreachable, timeout, non-2xx, malformed body) is reported
/// as [`CodewatchError::ModelUnavailable`].
pub trait ChatModel: Send + Sync {
    fn complete(&self, messages: &[ChatMessage], timeout: Duration) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Blocking HTTP client for a locally hosted model server
pub struct OpenAiChatClient {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    temperature: f32,
}

impl OpenAiChatClient {
    pub fn new(settings: &LlmSettings) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| CodewatchError::model(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
            model: settings.model.clone(),
            temperature: settings.temperature,
        })
    }
}

impl ChatModel for OpenAiChatClient {
    fn complete(&self, messages: &[ChatMessage], timeout: Duration) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(timeout)
            .json(&request)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    CodewatchError::model(format!("request timed out after {:?}", timeout))
                } else {
                    CodewatchError::model(format!("{} unreachable: {}", self.endpoint, e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(CodewatchError::model(format!(
                "endpoint returned {}: {}",
                status, snippet
            )));
        }

        let body: ChatResponse = response
            .json()
            .map_err(|e| CodewatchError::model(format!("malformed response: {}", e)))?;

        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CodewatchError::model("response contained no choices"))
    }
}
