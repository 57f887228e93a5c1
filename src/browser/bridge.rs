//! HTTP client for the headless browser sidecar.
//!
//! The sidecar owns the real browser. Each task gets its own session; routes
//! are shipped as anchored regular expressions so the sidecar never needs to
//! understand the glob syntax.
//!
//! Every route carries its installation `order` and `"precedence":
//! "first_match"`. The sidecar applies all delay routes, then the
//! fulfill/abort route with the lowest `order` that matches, which is the
//! same decision [`super::network::intercept`] makes.

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::{
    BrowserDriver, BrowserError, BrowserSession, ElementAction, Locator, NetworkRule, PageEvent,
    Viewport,
};
use crate::config::{DRIVER_GRACE_MS, SCREENSHOT_JPEG_QUALITY};

const CONTROL_TIMEOUT: Duration = Duration::from_secs(30);

pub struct BridgeBrowser {
    client: Client,
    base_url: String,
}

impl BridgeBrowser {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(CONTROL_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[derive(Deserialize)]
struct OpenedSession {
    session_id: String,
}

#[derive(Deserialize, Default)]
struct BridgeFailure {
    #[serde(default)]
    error: String,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

#[async_trait]
impl BrowserDriver for BridgeBrowser {
    async fn open_session(&self, viewport: Viewport) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let url = format!("{}/sessions", self.base_url);
        let resp = send(
            self.client.post(&url).json(&json!({ "viewport": viewport })),
        )
        .await?;
        let opened: OpenedSession = resp
            .json()
            .await
            .map_err(|e| BrowserError::Backend(format!("Invalid session response: {}", e)))?;
        debug!("Opened browser session {}", opened.session_id);

        Ok(Box::new(BridgeSession {
            client: self.client.clone(),
            session_url: format!("{}/sessions/{}", self.base_url, opened.session_id),
            next_route: 0,
            closed: false,
        }))
    }
}

pub struct BridgeSession {
    client: Client,
    session_url: String,
    next_route: u32,
    closed: bool,
}

impl BridgeSession {
    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, BrowserError> {
        let url = format!("{}{}", self.session_url, path);
        let mut req = self.client.request(method, &url);
        if let Some(t) = timeout {
            req = req.timeout(t + Duration::from_millis(DRIVER_GRACE_MS));
        }
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = send(req).await?;
        if resp.status() == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        resp.json()
            .await
            .map_err(|e| BrowserError::Backend(format!("Invalid response from {}: {}", path, e)))
    }
}

#[async_trait]
impl BrowserSession for BridgeSession {
    async fn install_rule(&mut self, rule: &NetworkRule) -> Result<(), BrowserError> {
        let mut body = match rule {
            NetworkRule::Fulfill {
                pattern,
                status,
                content_type,
                body,
            } => json!({
                "kind": "fulfill",
                "url_regex": pattern.regex_source(),
                "status": status,
                "content_type": content_type,
                "body": body,
            }),
            NetworkRule::Abort { pattern } => json!({
                "kind": "abort",
                "url_regex": pattern.regex_source(),
            }),
            NetworkRule::Delay { delay_ms } => json!({
                "kind": "delay",
                "url_regex": ".*",
                "delay_ms": delay_ms,
            }),
        };
        body["order"] = json!(self.next_route);
        body["precedence"] = json!("first_match");
        self.call(Method::POST, "/routes", Some(body), None).await?;
        self.next_route += 1;
        Ok(())
    }

    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), BrowserError> {
        let body = json!({
            "url": url,
            "wait_until": "networkidle",
            "timeout_ms": timeout.as_millis() as u64,
        });
        self.call(Method::POST, "/navigate", Some(body), Some(timeout))
            .await?;
        Ok(())
    }

    async fn act(
        &mut self,
        locator: &Locator,
        action: &ElementAction,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let body = json!({
            "locator": locator,
            "action": action,
            "timeout_ms": timeout.as_millis() as u64,
        });
        self.call(Method::POST, "/act", Some(body), Some(timeout))
            .await?;
        Ok(())
    }

    async fn screenshot(&mut self, full_page: bool) -> Result<Vec<u8>, BrowserError> {
        let body = json!({
            "full_page": full_page,
            "format": "jpeg",
            "quality": SCREENSHOT_JPEG_QUALITY,
        });
        let resp = self
            .call(Method::POST, "/screenshot", Some(body), None)
            .await?;
        let data = resp
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| BrowserError::Backend("Screenshot response without data".into()))?;
        base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| BrowserError::Backend(format!("Screenshot is not valid base64: {}", e)))
    }

    async fn title(&mut self) -> Result<String, BrowserError> {
        let resp = self.call(Method::GET, "/title", None, None).await?;
        Ok(resp
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    async fn take_events(&mut self) -> Result<Vec<PageEvent>, BrowserError> {
        let resp = self.call(Method::GET, "/events", None, None).await?;
        let events = resp.get("events").cloned().unwrap_or(Value::Array(vec![]));
        serde_json::from_value(events)
            .map_err(|e| BrowserError::Backend(format!("Invalid events payload: {}", e)))
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.call(Method::DELETE, "", None, None).await?;
        Ok(())
    }
}

/// Send a request and turn transport failures and non-2xx replies into
/// [`BrowserError`]s.
async fn send(req: reqwest::RequestBuilder) -> Result<reqwest::Response, BrowserError> {
    let resp = req.send().await.map_err(|e| {
        if e.is_timeout() {
            BrowserError::Backend(format!("Browser sidecar did not answer in time: {}", e))
        } else {
            BrowserError::Backend(format!("Browser sidecar unreachable: {}", e))
        }
    })?;

    if resp.status().is_success() {
        return Ok(resp);
    }

    let status = resp.status();
    let failure: BridgeFailure = resp.json().await.unwrap_or_default();
    let message = if failure.error.is_empty() {
        format!("Browser sidecar returned {}", status)
    } else {
        failure.error
    };

    Err(match failure.kind.as_deref() {
        Some("timeout") => BrowserError::Timeout(failure.timeout_ms.unwrap_or_default()),
        Some("not_found") => BrowserError::NotFound(message),
        Some("assertion") => BrowserError::Assertion(message),
        _ => BrowserError::Backend(message),
    })
}
