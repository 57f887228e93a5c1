//! Browser driver seam. The worker only talks to these traits; the
//! production driver is [`bridge::BridgeBrowser`].

pub mod bridge;
pub mod network;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{VIEWPORT_HEIGHT, VIEWPORT_WIDTH};
pub use network::{Interception, NetworkRule, UrlPattern};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: VIEWPORT_WIDTH,
            height: VIEWPORT_HEIGHT,
        }
    }
}

/// How to find an element on the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Locator {
    Css { selector: String },
    XPath { query: String },
    Text { text: String, exact: bool },
    Role { role: String, name: Option<String> },
    TestId { id: String },
    Placeholder { text: String },
    Label { text: String },
}

/// What to do with a located element. `Expect*` variants are assertions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "value", rename_all = "snake_case")]
pub enum ElementAction {
    Click,
    Fill(String),
    Hover,
    SelectOption(String),
    Check,
    Uncheck,
    ExpectText(String),
    ExpectVisible,
}

/// Something the page did that the worker records as evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PageEvent {
    Console {
        kind: String,
        text: String,
    },
    RequestFailed {
        method: String,
        url: String,
        error: String,
    },
    Response {
        method: String,
        url: String,
        status: u16,
        status_text: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("Timeout {0}ms exceeded")]
    Timeout(u64),

    #[error("Element not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Assertion(String),

    #[error("Browser backend error: {0}")]
    Backend(String),
}

impl BrowserError {
    pub fn timeout(after: Duration) -> Self {
        BrowserError::Timeout(after.as_millis() as u64)
    }
}

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Open an isolated session (own cookies, storage and routes).
    async fn open_session(&self, viewport: Viewport) -> Result<Box<dyn BrowserSession>, BrowserError>;
}

#[async_trait]
pub trait BrowserSession: Send {
    /// Install a network rule. Rules apply to every later request in
    /// installation order.
    async fn install_rule(&mut self, rule: &NetworkRule) -> Result<(), BrowserError>;

    /// Navigate and wait until the network is idle.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), BrowserError>;

    async fn act(
        &mut self,
        locator: &Locator,
        action: &ElementAction,
        timeout: Duration,
    ) -> Result<(), BrowserError>;

    /// JPEG screenshot bytes.
    async fn screenshot(&mut self, full_page: bool) -> Result<Vec<u8>, BrowserError>;

    async fn title(&mut self) -> Result<String, BrowserError>;

    /// Drain events observed since the last call.
    async fn take_events(&mut self) -> Result<Vec<PageEvent>, BrowserError>;

    async fn close(&mut self) -> Result<(), BrowserError>;
}
