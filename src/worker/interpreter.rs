use base64::Engine;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use super::evidence::Evidence;
use crate::ai::element::{ElementDiscovery, FindElementRequest};
use crate::browser::{BrowserError, BrowserSession, ElementAction, Locator};
use crate::config::DRIVER_GRACE_MS;
use crate::model::StepRecord;
use crate::steps::{Selector, Step, StepError};

#[derive(Debug, Clone, Copy)]
pub struct StepTimeouts {
    pub action: Duration,
    pub navigation: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum StepFailure {
    #[error(transparent)]
    Invalid(#[from] StepError),

    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("AI could not find: {description}. Reason: {reasoning}")]
    NotDiscovered {
        description: String,
        reasoning: String,
    },

    #[error("AI discovery failed: {0}")]
    Discovery(String),
}

/// Run a driver call under the worker's own timer, so a driver that ignores
/// its timeout still cannot stall the task.
pub async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, BrowserError>
where
    F: Future<Output = Result<T, BrowserError>>,
{
    match tokio::time::timeout(limit + Duration::from_millis(DRIVER_GRACE_MS), fut).await {
        Ok(result) => result,
        Err(_) => Err(BrowserError::timeout(limit)),
    }
}

/// Executes steps in order against one browser session.
pub struct Interpreter<'a> {
    session: &'a mut dyn BrowserSession,
    discovery: &'a dyn ElementDiscovery,
    evidence: &'a mut Evidence,
    timeouts: StepTimeouts,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        session: &'a mut dyn BrowserSession,
        discovery: &'a dyn ElementDiscovery,
        evidence: &'a mut Evidence,
        timeouts: StepTimeouts,
    ) -> Self {
        Self {
            session,
            discovery,
            evidence,
            timeouts,
        }
    }

    /// Run every step; the first failure stops the loop.
    pub async fn run(&mut self, steps: &[StepRecord]) -> Result<(), StepFailure> {
        for (idx, record) in steps.iter().enumerate() {
            let n = idx + 1;
            self.evidence
                .log(format!("[Step {}] Executing {}...", n, record.action));

            let outcome = self.run_step(n, record).await;
            self.drain_events().await;

            if let Err(e) = outcome {
                self.evidence.log(format!("[Step {}] FAILED: {}", n, e));
                return Err(e);
            }
        }
        Ok(())
    }

    /// Move page events observed so far into the evidence.
    pub async fn drain_events(&mut self) {
        match self.session.take_events().await {
            Ok(events) => {
                for event in events {
                    self.evidence.record(event);
                }
            }
            Err(e) => tracing::debug!("Could not collect page events: {}", e),
        }
    }

    async fn run_step(&mut self, n: usize, record: &StepRecord) -> Result<(), StepFailure> {
        let step = Step::try_from(record)?;

        match step {
            Step::Visit { url } => {
                let limit = self.timeouts.navigation;
                bounded(limit, self.session.navigate(&url, limit)).await?;
            }
            Step::Click { target } => self.act(&target, ElementAction::Click).await?,
            Step::Type { target, text } => self.act(&target, ElementAction::Fill(text)).await?,
            Step::Hover { target } => self.act(&target, ElementAction::Hover).await?,
            Step::Select { target, option } => {
                self.act(&target, ElementAction::SelectOption(option))
                    .await?
            }
            Step::Check { target } => self.act(&target, ElementAction::Check).await?,
            Step::Uncheck { target } => self.act(&target, ElementAction::Uncheck).await?,
            Step::Wait { ms } => sleep(Duration::from_millis(ms)).await,
            Step::AssertText { target, expected } => {
                self.act(&target, ElementAction::ExpectText(expected.clone()))
                    .await?;
                self.evidence.log(format!(
                    "[Step {}] Assertion Passed: \"{}\" contains \"{}\"",
                    n, target, expected
                ));
            }
            Step::AssertVisible { target } => {
                self.act(&target, ElementAction::ExpectVisible).await?;
                self.evidence.log(format!(
                    "[Step {}] Assertion Passed: \"{}\" is visible",
                    n, target
                ));
            }
        }
        Ok(())
    }

    async fn act(&mut self, target: &Selector, action: ElementAction) -> Result<(), StepFailure> {
        let locator = self.resolve(target).await?;
        let limit = self.timeouts.action;
        bounded(limit, self.session.act(&locator, &action, limit)).await?;
        Ok(())
    }

    async fn resolve(&mut self, target: &Selector) -> Result<Locator, StepFailure> {
        let locator = match target {
            Selector::Css(selector) => Locator::Css {
                selector: selector.clone(),
            },
            Selector::XPath(query) => Locator::XPath {
                query: query.clone(),
            },
            Selector::Text { text, exact } => Locator::Text {
                text: text.clone(),
                exact: *exact,
            },
            Selector::Role { role, name } => Locator::Role {
                role: role.clone(),
                name: name.clone(),
            },
            Selector::TestId(id) => Locator::TestId { id: id.clone() },
            Selector::Placeholder(text) => Locator::Placeholder { text: text.clone() },
            Selector::Label(text) => Locator::Label { text: text.clone() },
            Selector::AiDescribe(description) => self.discover(description).await?,
        };
        Ok(locator)
    }

    async fn discover(&mut self, description: &str) -> Result<Locator, StepFailure> {
        let outcome = self.try_discover(description).await;
        if let Err(e) = &outcome {
            self.evidence.log(format!("[AI Discovery Error] {}", e));
        }
        outcome
    }

    async fn try_discover(&mut self, description: &str) -> Result<Locator, StepFailure> {
        let limit = self.timeouts.action;
        let shot = bounded(limit, self.session.screenshot(true)).await?;
        let request = FindElementRequest {
            screenshot: base64::engine::general_purpose::STANDARD.encode(shot),
            description: description.to_string(),
        };

        let response = self
            .discovery
            .find_element(&request)
            .await
            .map_err(|e| StepFailure::Discovery(e.to_string()))?;

        match (response.found, response.selector) {
            (true, Some(selector)) => {
                self.evidence.log(format!(
                    "[AI Discovery] Found \"{}\" -> {} (confidence: {})",
                    description,
                    selector,
                    response.confidence.unwrap_or_default()
                ));
                Ok(Locator::Css { selector })
            }
            _ => Err(StepFailure::NotDiscovered {
                description: description.to_string(),
                reasoning: response.reasoning,
            }),
        }
    }
}
