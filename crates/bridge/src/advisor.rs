//! Advisory capability: system instruction plus user text in, free text out.
//!
//! `ChatAdvisor` talks to an OpenAI-compatible `chat/completions` endpoint.
//! Everything that goes wrong on the way is reported as
//! `CareError::AdvisoryUnavailable`; interpreting the text is the caller's job.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AdvisorConfig;
use crate::error::CareError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AdvisoryRequest {
    pub(crate) system_instruction: String,
    pub(crate) user_text: String,
}

#[async_trait]
pub(crate) trait Advisor: Send + Sync {
    async fn complete(&self, request: &AdvisoryRequest) -> Result<String, CareError>;
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

fn chat_body<'a>(model: &'a str, request: &'a AdvisoryRequest) -> ChatBody<'a> {
    ChatBody {
        model,
        messages: [
            ChatMessage {
                role: "system",
                content: &request.system_instruction,
            },
            ChatMessage {
                role: "user",
                content: &request.user_text,
            },
        ],
        temperature: 0.2,
    }
}

/// First non-blank completion text.
fn first_content(response: ChatResponse) -> Result<String, CareError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| CareError::AdvisoryUnavailable("empty completion".to_string()))
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

pub(crate) struct ChatAdvisor {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl ChatAdvisor {
    pub(crate) fn new(cfg: &AdvisorConfig, api_key: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("failed to build advisory http client")?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", cfg.base_url.trim_end_matches('/')),
            model: cfg.model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl Advisor for ChatAdvisor {
    async fn complete(&self, request: &AdvisoryRequest) -> Result<String, CareError> {
        let unavailable = |e: reqwest::Error| CareError::AdvisoryUnavailable(e.to_string());

        debug!(endpoint = %self.endpoint, model = %self.model, "advisory request");

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&chat_body(&self.model, request))
            .send()
            .await
            .map_err(unavailable)?
            .error_for_status()
            .map_err(unavailable)?;

        let body: ChatResponse = response.json().await.map_err(unavailable)?;
        first_content(body)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
