//! Execution worker: pulls tasks off the queue, drives one browser session
//! per task and reports the result.

pub mod evidence;
pub mod interpreter;
pub mod report;

use base64::Engine;
use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::ai::element::ElementDiscovery;
use crate::browser::network::MockError;
use crate::browser::{BrowserDriver, BrowserError, BrowserSession, NetworkRule, Viewport};
use crate::config::{InspectorConfig, QUEUE_ERROR_BACKOFF_SECS, QUEUE_POP_WAIT_SECS};
use crate::model::{RunResult, TaskMessage};
use crate::queue::{Delivery, TaskQueue};
use crate::store::Store;
use evidence::Evidence;
use interpreter::{bounded, Interpreter, StepFailure, StepTimeouts};
use report::ResultReporter;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub timeouts: StepTimeouts,
    pub task_deadline: Duration,
    pub pop_wait: Duration,
    pub error_backoff: Duration,
    pub viewport: Viewport,
}

impl WorkerConfig {
    pub fn from_config(config: &InspectorConfig) -> Self {
        Self {
            timeouts: StepTimeouts {
                action: config.step_timeout,
                navigation: config.navigation_timeout,
            },
            task_deadline: config.task_deadline,
            pop_wait: Duration::from_secs(QUEUE_POP_WAIT_SECS),
            error_backoff: Duration::from_secs(QUEUE_ERROR_BACKOFF_SECS),
            viewport: Viewport::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    Starting,
    RunningSteps,
    Finalizing,
    Reporting,
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskPhase::Starting => "starting",
            TaskPhase::RunningSteps => "running-steps",
            TaskPhase::Finalizing => "finalizing",
            TaskPhase::Reporting => "reporting",
        })
    }
}

#[derive(Debug, thiserror::Error)]
enum TaskError {
    #[error(transparent)]
    Step(#[from] StepFailure),

    #[error("invalid network mock: {0}")]
    Mock(#[from] MockError),

    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("task exceeded deadline of {0}s")]
    Deadline(u64),

    #[error("step execution panicked: {0}")]
    Panicked(String),
}

struct Finished {
    title: String,
    screenshot: String,
}

pub struct Worker {
    store: Arc<Store>,
    queue: Arc<dyn TaskQueue>,
    browser: Arc<dyn BrowserDriver>,
    discovery: Arc<dyn ElementDiscovery>,
    reporter: Arc<dyn ResultReporter>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        store: Arc<Store>,
        queue: Arc<dyn TaskQueue>,
        browser: Arc<dyn BrowserDriver>,
        discovery: Arc<dyn ElementDiscovery>,
        reporter: Arc<dyn ResultReporter>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            queue,
            browser,
            discovery,
            reporter,
            config,
        }
    }

    /// Consume tasks until `shutdown` flips to true. A task in flight is
    /// always finished first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Worker started, waiting for tasks");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let popped = tokio::select! {
                _ = shutdown.changed() => break,
                popped = self.queue.pop(self.config.pop_wait) => popped,
            };

            match popped {
                Ok(Some(delivery)) => self.process_delivery(delivery).await,
                Ok(None) => {}
                Err(e) => {
                    error!("Queue error: {}", e);
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = sleep(self.config.error_backoff) => {}
                    }
                }
            }
        }

        info!("Worker stopped");
    }

    /// Handle one leased message and ack it, whatever happened.
    pub async fn process_delivery(&self, delivery: Delivery) {
        match delivery.decode() {
            Ok(task) => {
                if delivery.attempts > 1 {
                    warn!(
                        "[Run #{}] Redelivered task (attempt {})",
                        task.run_id, delivery.attempts
                    );
                }
                self.handle_task(&task).await;
            }
            Err(e) => {
                error!(
                    "Dropping undecodable queue message #{}: {}",
                    delivery.id, e
                );
            }
        }

        if let Err(e) = self.queue.ack(&delivery).await {
            error!("Failed to ack queue message #{}: {}", delivery.id, e);
        }
    }

    /// Mark the run processing, execute it and report the result. Returns
    /// `None` when the run was skipped.
    pub async fn handle_task(&self, task: &TaskMessage) -> Option<RunResult> {
        match self.store.mark_processing(task.run_id, Utc::now()) {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    "[Run #{}] Run is missing or already finished, skipping task",
                    task.run_id
                );
                return None;
            }
            Err(e) => {
                warn!(
                    "[Run #{}] Could not mark run processing: {}",
                    task.run_id, e
                );
            }
        }

        let result = self.execute(task).await;

        self.enter(task.run_id, TaskPhase::Reporting);
        if let Err(e) = self.reporter.report(task.run_id, &result).await {
            error!("[Run #{}] Result dropped: {}", task.run_id, e);
        }
        Some(result)
    }

    /// Run a task in a fresh browser session and build its result. The
    /// session is closed on every path.
    pub async fn execute(&self, task: &TaskMessage) -> RunResult {
        let run_id = task.run_id;
        info!("[Run #{}] Processing {} steps...", run_id, task.steps.len());
        self.enter(run_id, TaskPhase::Starting);

        let mut evidence = Evidence::default();
        if task.steps.is_empty() {
            evidence.system_error("No steps defined for this run.");
            return evidence.into_result(false, String::new(), None);
        }

        let mut session = match self.browser.open_session(self.config.viewport).await {
            Ok(session) => session,
            Err(e) => {
                error!("[Run #{}] Could not open browser session: {}", run_id, e);
                evidence.system_error(&e.to_string());
                return evidence.into_result(false, String::new(), None);
            }
        };

        let outcome = AssertUnwindSafe(self.drive(run_id, session.as_mut(), task, &mut evidence))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(TaskError::Panicked(panic_message(&*panic))));

        if let Ok(events) = session.take_events().await {
            for event in events {
                evidence.record(event);
            }
        }
        if let Err(e) = session.close().await {
            warn!("[Run #{}] Failed to close browser session: {}", run_id, e);
        }

        match outcome {
            Ok(finished) => {
                info!("[Run #{}] Completed successfully", run_id);
                evidence.into_result(true, finished.title, Some(finished.screenshot))
            }
            Err(e) => {
                info!("[Run #{}] Failed: {}", run_id, e);
                evidence.system_error(&e.to_string());
                evidence.into_result(false, String::new(), None)
            }
        }
    }

    async fn drive(
        &self,
        run_id: i64,
        session: &mut dyn BrowserSession,
        task: &TaskMessage,
        evidence: &mut Evidence,
    ) -> Result<Finished, TaskError> {
        let limit = self.config.timeouts.action;

        for mock in &task.network_mocks {
            match NetworkRule::from_mock(mock)? {
                Some(rule) => {
                    bounded(limit, session.install_rule(&rule)).await?;
                    evidence.log(rule.describe());
                }
                None => evidence.log("[Network Mock] Unsupported mock type ignored"),
            }
        }

        self.enter(run_id, TaskPhase::RunningSteps);
        let deadline = self.config.task_deadline;
        let steps = async {
            let mut interpreter = Interpreter::new(
                &mut *session,
                self.discovery.as_ref(),
                &mut *evidence,
                self.config.timeouts,
            );
            interpreter.run(&task.steps).await
        };
        match tokio::time::timeout(deadline, steps).await {
            Ok(outcome) => outcome?,
            Err(_) => return Err(TaskError::Deadline(deadline.as_secs())),
        }

        self.enter(run_id, TaskPhase::Finalizing);
        let title = bounded(limit, session.title()).await?;
        let shot = bounded(limit, session.screenshot(true)).await?;

        Ok(Finished {
            title,
            screenshot: base64::engine::general_purpose::STANDARD.encode(shot),
        })
    }

    fn enter(&self, run_id: i64, phase: TaskPhase) {
        debug!("[Run #{}] -> {}", run_id, phase);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
