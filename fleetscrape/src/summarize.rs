//! Log summarization through an OpenAI-compatible chat-completions API.

use std::env;
use std::future::Future;

use log::debug;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::{ArtifactError, Result};
use crate::settings::SummarizerSection;

/// Instruction sent ahead of every log.
pub const ANALYSIS_INSTRUCTION: &str = "The following is system log output captured from a network device. \
Analyze it for possible problems, anomalies, security events or optimization suggestions:";

/// Turns captured device logs into a readable analysis.
pub trait Summarizer: Send + Sync {
    fn summarize(
        &self,
        device_label: &str,
        log_text: &str,
    ) -> impl Future<Output = Result<String>> + Send;
}

/// The user message for `log_text`.
pub fn build_prompt(log_text: &str) -> String {
    format!("{}\n\nLog content:\n{}", ANALYSIS_INSTRUCTION, log_text)
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

impl ChatResponse {
    fn into_content(self) -> Result<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| ArtifactError::EmptySummary.into())
    }
}

/// Client for `POST {base_url}/chat/completions`.
pub struct ChatCompletionsSummarizer {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: SecretString,
    max_tokens: u32,
}

impl ChatCompletionsSummarizer {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: SecretString,
        max_tokens: u32,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.into(),
            api_key,
            max_tokens,
        }
    }

    /// Build from settings, reading the key from `api_key_env`.
    pub fn from_settings(section: &SummarizerSection) -> Result<Self> {
        let api_key = env::var(&section.api_key_env)
            .ok()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| ArtifactError::MissingApiKey(section.api_key_env.clone()))?;

        Ok(Self::new(
            &section.base_url,
            section.model.clone(),
            SecretString::from(api_key),
            section.max_tokens,
        ))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request<'a>(&'a self, log_text: &str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: Some(build_prompt(log_text)),
            }],
            max_tokens: self.max_tokens,
            stream: false,
        }
    }
}

impl Summarizer for ChatCompletionsSummarizer {
    async fn summarize(&self, device_label: &str, log_text: &str) -> Result<String> {
        debug!(
            "{}: requesting summary of {} bytes from {}",
            device_label,
            log_text.len(),
            self.endpoint
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&self.request(log_text))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(ArtifactError::from)?;

        let body: ChatResponse = response.json().await.map_err(ArtifactError::from)?;
        body.into_content()
    }
}
