//! Result ingestion: persist screenshot evidence, finish the run and kick
//! off downstream analysis.

use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::artifacts::ArtifactStore;
use crate::error::InspectorError;
use crate::flakiness::FlakinessAnalyzer;
use crate::model::{ResultCallback, Run, RunResult, RunStatus};
use crate::settings::StorageSettings;
use crate::store::Store;

/// Visual-analysis collaborator, invoked for completed runs.
#[async_trait]
pub trait VisualAnalysis: Send + Sync {
    async fn analyze(&self, run: &Run) -> anyhow::Result<()>;
}

/// Visual analysis placeholder for deployments without a vision model
/// pipeline.
pub struct LoggingVisualAnalysis;

#[async_trait]
impl VisualAnalysis for LoggingVisualAnalysis {
    async fn analyze(&self, run: &Run) -> anyhow::Result<()> {
        info!("[Run #{}] Visual analysis requested", run.id);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStatus {
    Applied(RunStatus),
    /// The run was already terminal; nothing was changed.
    Duplicate,
}

pub struct IngestOutcome {
    pub status: IngestStatus,
    /// Background flakiness analysis, when one was started.
    pub analysis: Option<JoinHandle<()>>,
}

pub struct ResultIngestion {
    store: Arc<Store>,
    artifacts: Arc<dyn ArtifactStore>,
    storage: StorageSettings,
    analyzer: Arc<FlakinessAnalyzer>,
    visual: Arc<dyn VisualAnalysis>,
    secret: String,
}

impl ResultIngestion {
    pub fn new(
        store: Arc<Store>,
        artifacts: Arc<dyn ArtifactStore>,
        storage: StorageSettings,
        analyzer: Arc<FlakinessAnalyzer>,
        visual: Arc<dyn VisualAnalysis>,
        secret: String,
    ) -> Self {
        Self {
            store,
            artifacts,
            storage,
            analyzer,
            visual,
            secret,
        }
    }

    pub async fn ingest(&self, callback: ResultCallback) -> Result<IngestOutcome, InspectorError> {
        if callback.secret != self.secret {
            warn!("[Run #{}] Rejected result with wrong secret", callback.run_id);
            return Err(InspectorError::Unauthorized);
        }

        let run_id = callback.run_id;
        let run = self
            .store
            .get_run(run_id)?
            .ok_or_else(|| InspectorError::NotFound(format!("Run #{}", run_id)))?;

        if run.status.is_terminal() {
            info!("[Run #{}] Duplicate result ignored", run_id);
            return Ok(IngestOutcome {
                status: IngestStatus::Duplicate,
                analysis: None,
            });
        }

        let mut result = callback.result;
        self.persist_screenshot(run_id, &mut result).await;

        let status = if result.success {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
        let logs = result.logs.join("\n");
        let applied = self
            .store
            .complete_run(run_id, status, Some(&result), &logs, Utc::now())?;
        if !applied {
            info!("[Run #{}] Lost race with a duplicate result", run_id);
            return Ok(IngestOutcome {
                status: IngestStatus::Duplicate,
                analysis: None,
            });
        }
        info!("[Run #{}] Recorded as {}", run_id, status.as_str());

        let mut analysis = None;
        if status == RunStatus::Completed {
            if let Some(run) = self.store.get_run(run_id)? {
                if let Err(e) = self.visual.analyze(&run).await {
                    error!("[Run #{}] Visual analysis failed: {}", run_id, e);
                }
                if let Some(scenario_id) = run.scenario_id {
                    analysis = Some(self.spawn_flakiness(scenario_id));
                }
            }
        }

        Ok(IngestOutcome {
            status: IngestStatus::Applied(status),
            analysis,
        })
    }

    fn spawn_flakiness(&self, scenario_id: i64) -> JoinHandle<()> {
        let analyzer = self.analyzer.clone();
        tokio::spawn(async move {
            if let Err(e) = analyzer.analyze(scenario_id).await {
                error!("Flakiness analysis for scenario #{} failed: {}", scenario_id, e);
            }
        })
    }

    /// Move an inline screenshot to the artifact store. On any failure the
    /// inline payload stays in the result.
    pub async fn persist_screenshot(&self, run_id: i64, result: &mut RunResult) {
        if !self.storage.store_screenshots {
            return;
        }
        let Some(encoded) = result.screenshot.as_deref() else {
            return;
        };

        let bytes = match base64::engine::general_purpose::STANDARD.decode(encoded) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("[Run #{}] Screenshot is not valid base64: {}", run_id, e);
                return;
            }
        };

        let path = format!(
            "{}/run_{}_{}.jpg",
            self.storage.artifact_path.trim_end_matches('/'),
            run_id,
            Utc::now().timestamp()
        );
        match self.artifacts.put(&path, &bytes).await {
            Ok(stored) => {
                result.screenshot = None;
                result.screenshot_path = Some(stored.path);
                result.screenshot_disk = Some(stored.disk);
                result.screenshot_url = Some(stored.url);
                result.screenshot_sha256 = Some(stored.sha256);
            }
            Err(e) => {
                error!("[Run #{}] Failed to store screenshot: {}", run_id, e);
            }
        }
    }
}
