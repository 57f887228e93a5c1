//! Text/vision model client and the helpers for reading JSON out of model
//! replies.

pub mod element;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

use crate::config::{AI_MAX_TOKENS, AI_REQUEST_TIMEOUT_SECS};
use crate::settings::{AiProvider, AiSettings, ProviderKind};

const SYSTEM_PROMPT: &str = "You are QRAFT, an AI Quality Assurance Architect. \
     Analyze screenshots for bugs, UI issues, and layout regressions.";

#[async_trait]
pub trait TextModel: Send + Sync {
    /// Send a prompt, optionally with a base64 JPEG attached, and return the
    /// model's text reply.
    async fn complete(&self, prompt: &str, image_base64: Option<&str>) -> anyhow::Result<String>;
}

/// The span from the first `{` to the last `}`, if any.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&raw[start..=end])
}

/// Parse a model reply that should contain a JSON object, tolerating prose
/// and code fences around it.
pub fn parse_json_reply<T: DeserializeOwned>(raw: &str) -> anyhow::Result<T> {
    let trimmed = raw.trim();

    if let Ok(parsed) = serde_json::from_str::<T>(trimmed) {
        return Ok(parsed);
    }

    if let Some(json_str) = extract_json_object(trimmed) {
        if let Ok(parsed) = serde_json::from_str::<T>(json_str) {
            return Ok(parsed);
        }
    }

    warn!(
        "Failed to parse model reply: {}",
        truncate(trimmed, 200)
    );
    anyhow::bail!(
        "Model reply is not valid JSON. Reply starts with: {}",
        truncate(trimmed, 100)
    )
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// HTTP client for OpenAI-compatible and Gemini endpoints.
pub struct HttpModelClient {
    client: reqwest::Client,
    provider: AiProvider,
}

impl HttpModelClient {
    pub fn new(provider: AiProvider) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(AI_REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, provider })
    }

    /// Client for the configured default provider, or `None` when no
    /// provider has an API key.
    pub fn from_settings(settings: &AiSettings) -> anyhow::Result<Option<Self>> {
        match settings.active_provider() {
            Some(provider) => Ok(Some(Self::new(provider.clone())?)),
            None => Ok(None),
        }
    }

    pub fn provider(&self) -> &AiProvider {
        &self.provider
    }

    async fn complete_openai(&self, prompt: &str, image: Option<&str>) -> anyhow::Result<String> {
        let mut content = vec![json!({ "type": "text", "text": prompt })];
        if let Some(image) = image {
            content.push(json!({
                "type": "image_url",
                "image_url": { "url": format!("data:image/jpeg;base64,{}", image) },
            }));
        }

        let body = json!({
            "model": self.provider.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": content },
            ],
            "max_tokens": AI_MAX_TOKENS,
        });

        let url = format!(
            "{}/chat/completions",
            self.provider.url.trim_end_matches('/')
        );
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.provider.api_key)
            .json(&body)
            .send()
            .await?;
        let value = read_reply(resp, &self.provider.name).await?;

        value
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("{} reply has no message content", self.provider.name))
    }

    async fn complete_gemini(&self, prompt: &str, image: Option<&str>) -> anyhow::Result<String> {
        let mut parts = vec![json!({ "text": prompt })];
        if let Some(image) = image {
            parts.push(json!({
                "inlineData": { "mimeType": "image/jpeg", "data": image },
            }));
        }

        let body = json!({ "contents": [{ "parts": parts }] });
        let url = url::Url::parse_with_params(
            &format!(
                "{}/models/{}:generateContent",
                self.provider.url.trim_end_matches('/'),
                self.provider.model
            ),
            &[("key", self.provider.api_key.as_str())],
        )?;
        let resp = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await?;
        let value = read_reply(resp, &self.provider.name).await?;

        value
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("{} reply has no candidate text", self.provider.name))
    }
}

async fn read_reply(resp: reqwest::Response, provider: &str) -> anyhow::Result<Value> {
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        anyhow::bail!("{} returned {}: {}", provider, status, truncate(&text, 300));
    }
    Ok(resp.json().await?)
}

#[async_trait]
impl TextModel for HttpModelClient {
    async fn complete(&self, prompt: &str, image_base64: Option<&str>) -> anyhow::Result<String> {
        match self.provider.kind {
            ProviderKind::OpenAi => self.complete_openai(prompt, image_base64).await,
            ProviderKind::Gemini => self.complete_gemini(prompt, image_base64).await,
        }
    }
}
