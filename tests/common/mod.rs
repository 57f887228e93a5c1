#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use qraft_inspector::ai::element::{ElementDiscovery, FindElementRequest, FindElementResponse};
use qraft_inspector::ai::TextModel;
use qraft_inspector::browser::network::intercept;
use qraft_inspector::browser::{
    BrowserDriver, BrowserError, BrowserSession, ElementAction, Interception, Locator,
    NetworkRule, PageEvent, Viewport,
};
use qraft_inspector::model::{Agent, NetworkMock, Project, RunResult, TaskMessage};
use qraft_inspector::queue::TaskQueue;
use qraft_inspector::store::Store;
use qraft_inspector::worker::interpreter::StepTimeouts;
use qraft_inspector::worker::report::ResultReporter;
use qraft_inspector::worker::WorkerConfig;

// ============================================================================
// Scripted browser
// ============================================================================

/// What the fake browser saw, shared between the driver and its sessions.
#[derive(Debug, Default)]
pub struct FakeLog {
    pub sessions_opened: usize,
    pub sessions_closed: usize,
    pub rules: Vec<NetworkRule>,
    pub navigations: Vec<String>,
    pub actions: Vec<(Locator, ElementAction)>,
    /// Requests that went past the interception rules to the "network".
    pub network_hits: Vec<String>,
}

#[derive(Clone, Default)]
pub struct FakeBrowser {
    pub log: Arc<Mutex<FakeLog>>,
    /// CSS selectors whose actions hit the driver timeout.
    pub timeout_on: Vec<String>,
    /// CSS selectors whose actions panic inside the driver.
    pub panic_on: Vec<String>,
    /// Requests the page issues after every navigation.
    pub page_requests: Vec<String>,
    pub title: String,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self {
            title: "Fake Page".to_string(),
            ..Default::default()
        }
    }

    pub fn timing_out_on(mut self, selector: &str) -> Self {
        self.timeout_on.push(selector.to_string());
        self
    }

    pub fn panicking_on(mut self, selector: &str) -> Self {
        self.panic_on.push(selector.to_string());
        self
    }

    pub fn requesting(mut self, url: &str) -> Self {
        self.page_requests.push(url.to_string());
        self
    }

    pub fn log(&self) -> std::sync::MutexGuard<'_, FakeLog> {
        self.log.lock().unwrap()
    }
}

#[async_trait]
impl BrowserDriver for FakeBrowser {
    async fn open_session(&self, _viewport: Viewport) -> Result<Box<dyn BrowserSession>, BrowserError> {
        self.log.lock().unwrap().sessions_opened += 1;
        Ok(Box::new(FakeSession {
            browser: self.clone(),
            rules: Vec::new(),
            events: Vec::new(),
        }))
    }
}

struct FakeSession {
    browser: FakeBrowser,
    rules: Vec<NetworkRule>,
    events: Vec<PageEvent>,
}

impl FakeSession {
    fn css(locator: &Locator) -> Option<&str> {
        match locator {
            Locator::Css { selector } => Some(selector.as_str()),
            _ => None,
        }
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn install_rule(&mut self, rule: &NetworkRule) -> Result<(), BrowserError> {
        self.rules.push(rule.clone());
        self.browser.log.lock().unwrap().rules.push(rule.clone());
        Ok(())
    }

    async fn navigate(&mut self, url: &str, _timeout: Duration) -> Result<(), BrowserError> {
        let mut log = self.browser.log.lock().unwrap();
        log.navigations.push(url.to_string());

        for request in &self.browser.page_requests {
            match intercept(&self.rules, request) {
                Interception::Fulfill { status, .. } => self.events.push(PageEvent::Response {
                    method: "GET".to_string(),
                    url: request.clone(),
                    status,
                    status_text: String::new(),
                }),
                Interception::Abort { .. } => self.events.push(PageEvent::RequestFailed {
                    method: "GET".to_string(),
                    url: request.clone(),
                    error: "net::ERR_FAILED".to_string(),
                }),
                Interception::Continue { .. } => {
                    log.network_hits.push(request.clone());
                    self.events.push(PageEvent::Response {
                        method: "GET".to_string(),
                        url: request.clone(),
                        status: 200,
                        status_text: "OK".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    async fn act(
        &mut self,
        locator: &Locator,
        action: &ElementAction,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        self.browser
            .log
            .lock()
            .unwrap()
            .actions
            .push((locator.clone(), action.clone()));

        if let Some(selector) = Self::css(locator) {
            if self.browser.panic_on.iter().any(|s| s == selector) {
                panic!("driver crashed on {}", selector);
            }
            if self.browser.timeout_on.iter().any(|s| s == selector) {
                return Err(BrowserError::timeout(timeout));
            }
        }
        Ok(())
    }

    async fn screenshot(&mut self, _full_page: bool) -> Result<Vec<u8>, BrowserError> {
        Ok(b"fake-jpeg".to_vec())
    }

    async fn title(&mut self) -> Result<String, BrowserError> {
        Ok(self.browser.title.clone())
    }

    async fn take_events(&mut self) -> Result<Vec<PageEvent>, BrowserError> {
        Ok(std::mem::take(&mut self.events))
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        self.browser.log.lock().unwrap().sessions_closed += 1;
        Ok(())
    }
}

// ============================================================================
// Other collaborators
// ============================================================================

/// Answers every discovery request with the same response.
pub struct FixedDiscovery(pub FindElementResponse);

#[async_trait]
impl ElementDiscovery for FixedDiscovery {
    async fn find_element(&self, _request: &FindElementRequest) -> anyhow::Result<FindElementResponse> {
        Ok(self.0.clone())
    }
}

pub fn no_discovery() -> Arc<FixedDiscovery> {
    Arc::new(FixedDiscovery(FindElementResponse::not_found(
        "discovery not expected",
    )))
}

#[derive(Default)]
pub struct RecordingReporter {
    pub reports: Mutex<Vec<(i64, RunResult)>>,
}

#[async_trait]
impl ResultReporter for RecordingReporter {
    async fn report(&self, run_id: i64, result: &RunResult) -> anyhow::Result<()> {
        self.reports.lock().unwrap().push((run_id, result.clone()));
        Ok(())
    }
}

/// Queue whose transport is down.
pub struct BrokenQueue;

#[async_trait]
impl TaskQueue for BrokenQueue {
    async fn push(&self, _task: &TaskMessage) -> anyhow::Result<()> {
        anyhow::bail!("connection refused")
    }

    async fn pop(
        &self,
        _wait: Duration,
    ) -> anyhow::Result<Option<qraft_inspector::queue::Delivery>> {
        anyhow::bail!("connection refused")
    }

    async fn ack(&self, _delivery: &qraft_inspector::queue::Delivery) -> anyhow::Result<()> {
        anyhow::bail!("connection refused")
    }

    async fn depth(&self) -> anyhow::Result<i64> {
        anyhow::bail!("connection refused")
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn fast_worker_config() -> WorkerConfig {
    WorkerConfig {
        timeouts: StepTimeouts {
            action: Duration::from_millis(50),
            navigation: Duration::from_millis(200),
        },
        task_deadline: Duration::from_secs(10),
        pop_wait: Duration::from_millis(100),
        error_backoff: Duration::from_millis(50),
        viewport: Viewport::default(),
    }
}

pub fn seed_project(store: &Store) -> (Project, Agent) {
    let project = store.insert_project("Shop", "https://x.test").unwrap();
    let agent = store.insert_agent(project.id, "runner-1").unwrap();
    (project, agent)
}

pub fn mock_api(url: &str, status: u16) -> NetworkMock {
    serde_json::from_value(serde_json::json!({
        "type": "mock_api",
        "url": url,
        "status": status,
        "response": {"error": "boom"},
    }))
    .unwrap()
}

/// Text model with a fixed reply that remembers the prompts it was given.
pub struct CannedModel {
    reply: Result<String, String>,
    pub prompts: Mutex<Vec<String>>,
}

impl CannedModel {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Ok(reply.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: &str) -> Self {
        Self {
            reply: Err(error.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl TextModel for CannedModel {
    async fn complete(&self, prompt: &str, _image_base64: Option<&str>) -> anyhow::Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.reply.clone().map_err(|e| anyhow::anyhow!(e))
    }
}
