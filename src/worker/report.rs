use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::{CALLBACK_BACKOFF_MS, CALLBACK_MAX_ATTEMPTS, CALLBACK_TIMEOUT_SECS};
use crate::model::{ResultCallback, RunResult};

#[async_trait]
pub trait ResultReporter: Send + Sync {
    /// Deliver a task's result. An error means it was not delivered.
    async fn report(&self, run_id: i64, result: &RunResult) -> anyhow::Result<()>;
}

/// Posts `{run_id, result, secret}` to the ingestion webhook, retrying
/// transport errors and server errors with a linear backoff.
pub struct CallbackReporter {
    client: reqwest::Client,
    url: String,
    secret: String,
    max_attempts: u32,
    backoff: Duration,
}

impl CallbackReporter {
    pub fn new(url: &str, secret: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(CALLBACK_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            secret: secret.to_string(),
            max_attempts: CALLBACK_MAX_ATTEMPTS,
            backoff: Duration::from_millis(CALLBACK_BACKOFF_MS),
        })
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    async fn attempt(&self, payload: &ResultCallback) -> Result<(), AttemptError> {
        let resp = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|e| AttemptError::Retryable(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        let message = format!("callback returned {}: {}", status, body);
        if status.is_server_error() || status.as_u16() == 429 {
            Err(AttemptError::Retryable(message))
        } else {
            Err(AttemptError::Fatal(message))
        }
    }
}

enum AttemptError {
    Retryable(String),
    Fatal(String),
}

#[async_trait]
impl ResultReporter for CallbackReporter {
    async fn report(&self, run_id: i64, result: &RunResult) -> anyhow::Result<()> {
        let payload = ResultCallback {
            run_id,
            result: result.clone(),
            secret: self.secret.clone(),
        };

        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            match self.attempt(&payload).await {
                Ok(()) => {
                    info!("[Run #{}] Result reported", run_id);
                    return Ok(());
                }
                Err(AttemptError::Fatal(message)) => {
                    error!("[Run #{}] Result rejected: {}", run_id, message);
                    anyhow::bail!(message);
                }
                Err(AttemptError::Retryable(message)) => {
                    warn!(
                        "[Run #{}] Report attempt {}/{} failed: {}",
                        run_id, attempt, self.max_attempts, message
                    );
                    last_error = message;
                    if attempt < self.max_attempts {
                        sleep(self.backoff * attempt).await;
                    }
                }
            }
        }

        error!(
            "[Run #{}] Giving up on result delivery after {} attempts",
            run_id, self.max_attempts
        );
        anyhow::bail!(
            "result delivery failed after {} attempts: {}",
            self.max_attempts,
            last_error
        )
    }
}
