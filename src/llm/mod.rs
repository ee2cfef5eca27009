//! LLMGateway: bounded prompts to a local model
//!
//! The per-block sections of a [`Prompt`] are packed greedily into chunks that
//! fit the model's budget; each chunk repeats the header and is sent as its own
//! request, one after another. Responses from multi-chunk runs are joined under
//! `# Part i of n` headings. A single section larger than the budget is cut
//! with an explicit marker instead of failing the run.

mod client;
mod prompts;

pub use client::{ChatMessage, ChatModel, OpenAiChatClient};
pub use prompts::{build_prompt, render_block, Prompt, RESPONSE_SECTIONS};

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::LlmSettings;
use crate::error::Result;
use crate::router::AnalysisType;

/// Rough characters-per-token ratio used to convert the context window
pub const CHARS_PER_TOKEN: usize = 4;

/// Floor for the section budget when the system prompt alone fills a request
const MIN_SECTION_BUDGET: usize = 256;

/// Room for the "(Part i of n)" label
const PART_LABEL_RESERVE: usize = 96;

/// Room for a truncation marker
const MARKER_RESERVE: usize = 96;

/// The requests a prompt turns into
#[derive(Debug, Clone)]
pub struct RequestPlan {
    pub analysis_type: AnalysisType,
    pub timeout: Duration,
    pub requests: Vec<Vec<ChatMessage>>,
    /// Sections cut down to fit a single chunk
    pub truncated_sections: usize,
}

/// Raw model output for one run
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub chunks: usize,
    pub elapsed: Duration,
}

/// Sends prompts to a [`ChatModel`] within the configured budgets
pub struct LlmGateway {
    model: Arc<dyn ChatModel>,
    settings: LlmSettings,
}

impl LlmGateway {
    pub fn new(model: Arc<dyn ChatModel>, settings: LlmSettings) -> Self {
        Self { model, settings }
    }

    /// Gateway over the HTTP chat-completions client
    pub fn from_settings(settings: &LlmSettings) -> Result<Self> {
        let client = OpenAiChatClient::new(settings)?;
        Ok(Self::new(Arc::new(client), settings.clone()))
    }

    /// Request deadline for an analysis type
    pub fn timeout_for(&self, analysis_type: AnalysisType) -> Duration {
        Duration::from_secs_f64(
            self.settings.request_timeout_seconds as f64 * analysis_type.timeout_factor(),
        )
    }

    /// Characters available per request, system prompt and header included
    ///
    /// The share of the context window left for the answer depends on the
    /// analysis type.
    pub fn request_budget(&self, analysis_type: AnalysisType) -> usize {
        let context_chars = self.settings.context_window * CHARS_PER_TOKEN;
        let prompt_chars = (context_chars as f64 * (1.0 - analysis_type.answer_share())) as usize;
        self.settings.chunk_size.min(prompt_chars)
    }

    /// Split a prompt into requests without sending anything
    ///
    /// Lengths are counted in characters. The header is capped at half of
    /// what the system prompt leaves over, so every request stays within
    /// [`request_budget`](Self::request_budget).
    pub fn plan(&self, prompt: &Prompt) -> RequestPlan {
        let request_budget = self.request_budget(prompt.analysis_type);
        let available = request_budget
            .saturating_sub(char_len(&prompt.system) + PART_LABEL_RESERVE);

        let header = if char_len(&prompt.header) > available / 2 {
            tracing::warn!(
                "[LLM] Prompt header of {} chars cut to {}",
                char_len(&prompt.header),
                available / 2
            );
            truncate_header(&prompt.header, available / 2)
        } else {
            prompt.header.clone()
        };
        let budget = available
            .saturating_sub(char_len(&header))
            .max(MIN_SECTION_BUDGET);

        let mut truncated_sections = 0;
        let mut chunks: Vec<String> = Vec::new();
        let mut current = String::new();
        let mut current_len = 0;

        for section in &prompt.sections {
            // Each section is followed by a newline
            let section = if char_len(section) + 1 > budget {
                truncated_sections += 1;
                truncate_section(section, budget - 1)
            } else {
                section.clone()
            };
            let section_len = char_len(&section) + 1;
            if current_len > 0 && current_len + section_len > budget {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            current.push_str(&section);
            current.push('\n');
            current_len += section_len;
        }
        if !current.is_empty() || chunks.is_empty() {
            chunks.push(current);
        }

        let total = chunks.len();
        let requests = chunks
            .into_iter()
            .enumerate()
            .map(|(i, body)| {
                let mut user = header.clone();
                if total > 1 {
                    user.push_str(&format!(
                        "(Part {} of {} of the change set; review only the code below)\n\n",
                        i + 1,
                        total
                    ));
                }
                user.push_str(&body);
                vec![
                    ChatMessage::system(prompt.system.clone()),
                    ChatMessage::user(user),
                ]
            })
            .collect();

        RequestPlan {
            analysis_type: prompt.analysis_type,
            timeout: self.timeout_for(prompt.analysis_type),
            requests,
            truncated_sections,
        }
    }

    /// Send every chunk in order and merge the answers
    pub fn analyze(&self, prompt: &Prompt) -> Result<LlmResponse> {
        let plan = self.plan(prompt);
        let started = Instant::now();
        let total = plan.requests.len();

        if plan.truncated_sections > 0 {
            tracing::warn!(
                "[LLM] {} oversized blocks truncated to fit the request budget",
                plan.truncated_sections
            );
        }

        let mut parts = Vec::with_capacity(total);
        for (i, messages) in plan.requests.iter().enumerate() {
            tracing::debug!(
                "[LLM] Sending part {}/{} ({} analysis, timeout {:?})",
                i + 1,
                total,
                plan.analysis_type,
                plan.timeout
            );
            let answer = self.model.complete(messages, plan.timeout).map_err(|e| {
                tracing::error!("[LLM] Part {}/{} failed: {}", i + 1, total, e);
                e
            })?;
            parts.push(answer);
        }

        let text = if total == 1 {
            parts.pop().unwrap_or_default()
        } else {
            parts
                .iter()
                .enumerate()
                .map(|(i, part)| format!("# Part {} of {}\n\n{}\n", i + 1, total, part.trim_end()))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let elapsed = started.elapsed();
        tracing::info!(
            "[LLM] {} analysis complete: {} chunks, {} chars in {:?}",
            plan.analysis_type,
            total,
            text.len(),
            elapsed
        );

        Ok(LlmResponse {
            text,
            chunks: total,
            elapsed,
        })
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Cut a block to at most `budget` characters, marker included
fn truncate_section(section: &str, budget: usize) -> String {
    let total = char_len(section);
    let keep_chars = budget.saturating_sub(MARKER_RESERVE);
    let kept: String = section.chars().take(keep_chars).collect();
    format!(
        "{}\n```\n[... block truncated: {} of {} characters shown ...]\n",
        kept, keep_chars, total
    )
}

/// Cut the header to at most `budget` characters, keeping its start
fn truncate_header(header: &str, budget: usize) -> String {
    let keep_chars = budget.saturating_sub(MARKER_RESERVE);
    let kept: String = header.chars().take(keep_chars).collect();
    format!(
        "{}\n[... context truncated: {} of {} characters shown ...]\n\n# Changed code\n\n",
        kept.trim_end(),
        keep_chars,
        char_len(header)
    )
}
