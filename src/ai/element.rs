//! Vision-model element discovery and selector healing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

use super::{parse_json_reply, TextModel};
use crate::config::AI_REQUEST_TIMEOUT_SECS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindElementRequest {
    pub screenshot: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindElementResponse {
    pub found: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub reasoning: String,
}

impl FindElementResponse {
    pub fn not_found(reasoning: impl Into<String>) -> Self {
        Self {
            found: false,
            reasoning: reasoning.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealSelectorRequest {
    pub screenshot: String,
    pub failed_selector: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorSuggestion {
    pub selector: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealSelectorResponse {
    pub element_exists: bool,
    #[serde(default)]
    pub suggestions: Vec<SelectorSuggestion>,
    #[serde(default)]
    pub diagnosis: String,
}

/// Worker-side seam for resolving `ai_describe` selectors.
#[async_trait]
pub trait ElementDiscovery: Send + Sync {
    async fn find_element(&self, request: &FindElementRequest) -> anyhow::Result<FindElementResponse>;
}

/// Model-backed element lookup, served by the API and usable in-process.
pub struct ElementService {
    model: Option<Arc<dyn TextModel>>,
}

impl ElementService {
    pub fn new(model: Option<Arc<dyn TextModel>>) -> Self {
        Self { model }
    }

    pub async fn find_element(&self, request: &FindElementRequest) -> FindElementResponse {
        let Some(model) = &self.model else {
            return FindElementResponse::not_found("AI service error: no AI provider configured");
        };

        let prompt = find_element_prompt(&request.description);
        match model.complete(&prompt, Some(&request.screenshot)).await {
            Ok(reply) => parse_json_reply(&reply)
                .unwrap_or_else(|_| FindElementResponse::not_found("Failed to parse AI response")),
            Err(e) => {
                error!("AI element discovery failed: {}", e);
                FindElementResponse::not_found(format!("AI service error: {}", e))
            }
        }
    }

    pub async fn heal_selector(&self, request: &HealSelectorRequest) -> HealSelectorResponse {
        let failed = |diagnosis: String| HealSelectorResponse {
            element_exists: false,
            suggestions: vec![],
            diagnosis,
        };
        let Some(model) = &self.model else {
            return failed("AI service error: no AI provider configured".to_string());
        };

        let prompt = heal_selector_prompt(&request.failed_selector, &request.description);
        match model.complete(&prompt, Some(&request.screenshot)).await {
            Ok(reply) => parse_json_reply(&reply)
                .unwrap_or_else(|_| failed("Failed to parse AI response".to_string())),
            Err(e) => {
                error!("Selector healing failed: {}", e);
                failed(format!("AI service error: {}", e))
            }
        }
    }
}

#[async_trait]
impl ElementDiscovery for ElementService {
    async fn find_element(&self, request: &FindElementRequest) -> anyhow::Result<FindElementResponse> {
        Ok(ElementService::find_element(self, request).await)
    }
}

/// Calls `POST <app_url>/api/ai/find-element`.
pub struct HttpElementDiscovery {
    client: reqwest::Client,
    url: String,
}

impl HttpElementDiscovery {
    pub fn new(app_url: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(AI_REQUEST_TIMEOUT_SECS + 5))
            .build()?;
        Ok(Self {
            client,
            url: format!("{}/api/ai/find-element", app_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl ElementDiscovery for HttpElementDiscovery {
    async fn find_element(&self, request: &FindElementRequest) -> anyhow::Result<FindElementResponse> {
        let resp = self.client.post(&self.url).json(request).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("find-element returned {}: {}", status, body);
        }
        Ok(resp.json().await?)
    }
}

fn find_element_prompt(description: &str) -> String {
    format!(
        r##"Analyze this screenshot and find the element described as: "{description}".

Your task:
1. Locate the element visually
2. Suggest the BEST CSS selector for it (prefer ID > class > tag+attribute)
3. Provide approximate coordinates (x, y) from top-left
4. Rate your confidence (0.0 to 1.0)

Return ONLY valid JSON:
{{
    "found": true,
    "selector": "#submit-btn",
    "coordinates": {{"x": 640, "y": 450}},
    "confidence": 0.95,
    "reasoning": "Found blue button with 'Submit' text in footer section"
}}

If element not found, return: {{"found": false, "reasoning": "explanation"}}"##
    )
}

fn heal_selector_prompt(failed_selector: &str, description: &str) -> String {
    format!(
        r##"A test automation selector has failed: "{failed_selector}"

The element was described as: "{description}"

Analyze this screenshot and:
1. Determine if the element still exists (maybe selector changed)
2. Suggest 3 alternative selectors in order of reliability
3. Explain what likely changed

Return ONLY valid JSON:
{{
    "element_exists": true,
    "suggestions": [
        {{"selector": "#new-id", "type": "css", "confidence": 0.9}},
        {{"selector": "//button[contains(text(), 'Submit')]", "type": "xpath", "confidence": 0.85}},
        {{"selector": "Submit", "type": "text", "confidence": 0.8}}
    ],
    "diagnosis": "Button ID changed from 'submit-btn' to 'new-submit-button'"
}}"##
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CannedModel {
        reply: Result<String, String>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TextModel for CannedModel {
        async fn complete(&self, prompt: &str, _image: Option<&str>) -> anyhow::Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone().map_err(|e| anyhow::anyhow!(e))
        }
    }

    fn service(reply: Result<&str, &str>) -> (ElementService, Arc<CannedModel>) {
        let model = Arc::new(CannedModel {
            reply: reply.map(String::from).map_err(String::from),
            prompts: Mutex::new(vec![]),
        });
        (ElementService::new(Some(model.clone())), model)
    }

    fn request() -> FindElementRequest {
        FindElementRequest {
            screenshot: "aGVsbG8=".to_string(),
            description: "the blue submit button".to_string(),
        }
    }

    #[tokio::test]
    async fn test_find_element_parses_reply() {
        let (svc, model) = service(Ok(
            r##"Here: {"found": true, "selector": "#submit", "confidence": 0.9, "reasoning": "blue button"}"##,
        ));
        let resp = svc.find_element(&request()).await;
        assert!(resp.found);
        assert_eq!(resp.selector.as_deref(), Some("#submit"));
        assert!(model.prompts.lock().unwrap()[0].contains("\"the blue submit button\""));
    }

    #[tokio::test]
    async fn test_find_element_parse_failure() {
        let (svc, _) = service(Ok("I cannot see any button"));
        let resp = svc.find_element(&request()).await;
        assert!(!resp.found);
        assert_eq!(resp.reasoning, "Failed to parse AI response");
    }

    #[tokio::test]
    async fn test_find_element_model_error() {
        let (svc, _) = service(Err("rate limited"));
        let resp = svc.find_element(&request()).await;
        assert!(!resp.found);
        assert_eq!(resp.reasoning, "AI service error: rate limited");
    }

    #[tokio::test]
    async fn test_heal_selector_suggestions() {
        let (svc, _) = service(Ok(
            r##"{"element_exists": true, "suggestions": [{"selector": "#new", "type": "css", "confidence": 0.9}], "diagnosis": "id changed"}"##,
        ));
        let resp = svc
            .heal_selector(&HealSelectorRequest {
                screenshot: "aGVsbG8=".to_string(),
                failed_selector: "#old".to_string(),
                description: "save button".to_string(),
            })
            .await;
        assert!(resp.element_exists);
        assert_eq!(resp.suggestions[0].kind, "css");
        assert_eq!(resp.diagnosis, "id changed");
    }

    #[test]
    fn test_prompts_keep_css_id_examples() {
        let find = find_element_prompt("the cart icon");
        assert!(find.contains(r##""selector": "#submit-btn""##));
        assert!(find.ends_with(r#"{"found": false, "reasoning": "explanation"}"#));

        let heal = heal_selector_prompt("#old", "save button");
        assert!(heal.starts_with(r##"A test automation selector has failed: "#old""##));
        assert!(heal.contains(r##"{"selector": "#new-id", "type": "css", "confidence": 0.9}"##));
        assert!(heal.ends_with("'new-submit-button'\"\n}"));
    }

    #[tokio::test]
    async fn test_no_model_configured() {
        let svc = ElementService::new(None);
        let resp = svc.find_element(&request()).await;
        assert!(!resp.found);
        assert!(resp.reasoning.starts_with("AI service error"));
    }
}
