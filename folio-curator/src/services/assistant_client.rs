//! Assistant API client
//!
//! HTTP client for the external reasoning service that answers enrichment
//! prompts. Speaks the OpenAI-compatible chat-completions protocol; the
//! answer content is returned as raw text and handed to the resilient
//! response parser, so nothing here assumes the answer is well-formed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";
const USER_AGENT: &str = concat!("folio-curator/", env!("CARGO_PKG_VERSION"));

/// Assistant client errors
#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("API error {0}: {1}")]
    ApiError(u16, String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Assistant returned no answer")]
    EmptyAnswer,
}

impl AssistantError {
    /// Coarse classification for worker-side logging: transport failures
    /// vs everything else
    pub fn classification(&self) -> &'static str {
        match self {
            AssistantError::Network(_) => "network",
            _ => "other",
        }
    }
}

/// Source of free-text answers to enrichment prompts
///
/// The single seam between the enrichment pipeline and the external
/// reasoning service. Object-safe so tests can drive the worker and
/// orchestrator with a scripted stand-in.
#[async_trait]
pub trait AnswerSource: Send + Sync {
    /// Ask a question, get a text answer
    ///
    /// The sole failure-prone suspension point of the enrichment pipeline;
    /// timeouts surface here as `Network` errors.
    async fn ask(&self, prompt: &str) -> Result<String, AssistantError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// Assistant API client
pub struct AssistantClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl AssistantClient {
    /// Create a new assistant client
    ///
    /// `base_url` is the service root (no trailing path); the request
    /// timeout bounds each `ask` call, there is no additional deadline.
    pub fn new(
        base_url: String,
        api_key: String,
        model: String,
        timeout_secs: u64,
    ) -> Result<Self, AssistantError> {
        if api_key.trim().is_empty() {
            return Err(AssistantError::ApiError(
                401,
                "assistant API key is not configured".to_string(),
            ));
        }

        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AssistantError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        })
    }
}

#[async_trait]
impl AnswerSource for AssistantClient {
    async fn ask(&self, prompt: &str) -> Result<String, AssistantError> {
        let url = format!("{}{}", self.base_url, CHAT_COMPLETIONS_PATH);

        tracing::debug!(url = %url, model = %self.model, "Querying assistant");

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AssistantError::Network(e.to_string()))?;

        let status = response.status();

        if status == 429 {
            return Err(AssistantError::RateLimitExceeded);
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AssistantError::ApiError(status.as_u16(), error_text));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| AssistantError::ParseError(e.to_string()))?;

        let answer = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(AssistantError::EmptyAnswer)?;

        if answer.trim().is_empty() {
            return Err(AssistantError::EmptyAnswer);
        }

        tracing::debug!(answer_len = answer.len(), "Assistant answered");

        Ok(answer)
    }
}
