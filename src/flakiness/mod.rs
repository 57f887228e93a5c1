pub mod diagnosis;
pub mod metrics;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::ai::TextModel;
use crate::config::{FLAKINESS_HISTORY_LIMIT, FLAKINESS_MIN_RUNS, FLAKINESS_THRESHOLD};
use crate::store::Store;
use metrics::{compute_metrics, detect_pattern, FlakinessPattern, RunSample};

// ============================================================================
// Data model
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestFlakiness {
    pub scenario_id: i64,
    pub flakiness_score: u8,
    pub total_runs: u32,
    pub pass_count: u32,
    pub fail_count: u32,
    pub transition_count: u32,
    pub pattern: FlakinessPattern,
    pub last_analyzed_at: DateTime<Utc>,
    pub ai_diagnosis: Option<String>,
    pub suggested_fix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlakinessLevel {
    Critical,
    Warning,
    Low,
}

impl TestFlakiness {
    pub fn level(&self) -> FlakinessLevel {
        match self.flakiness_score {
            70.. => FlakinessLevel::Critical,
            40..=69 => FlakinessLevel::Warning,
            _ => FlakinessLevel::Low,
        }
    }

    pub fn is_flaky(&self) -> bool {
        self.flakiness_score > FLAKINESS_THRESHOLD
    }
}

/// API view of a flakiness record with its derived fields.
#[derive(Debug, Clone, Serialize)]
pub struct FlakinessReport {
    #[serde(flatten)]
    pub record: TestFlakiness,
    pub level: FlakinessLevel,
    pub is_flaky: bool,
}

impl From<TestFlakiness> for FlakinessReport {
    fn from(record: TestFlakiness) -> Self {
        Self {
            level: record.level(),
            is_flaky: record.is_flaky(),
            record,
        }
    }
}

// ============================================================================
// Analyzer
// ============================================================================

pub struct FlakinessAnalyzer {
    store: Arc<Store>,
    model: Option<Arc<dyn TextModel>>,
}

impl FlakinessAnalyzer {
    pub fn new(store: Arc<Store>, model: Option<Arc<dyn TextModel>>) -> Self {
        Self { store, model }
    }

    /// Score a scenario from its recent history and upsert the record.
    /// Returns `None` without writing anything when the history is too short.
    pub async fn analyze(&self, scenario_id: i64) -> anyhow::Result<Option<TestFlakiness>> {
        let scenario = self
            .store
            .get_scenario(scenario_id)?
            .ok_or_else(|| anyhow::anyhow!("Scenario #{} not found", scenario_id))?;

        let runs = self.store.recent_runs(scenario_id, FLAKINESS_HISTORY_LIMIT)?;
        if runs.len() < FLAKINESS_MIN_RUNS {
            info!(
                "Scenario #{}: not enough runs for flakiness analysis ({})",
                scenario_id,
                runs.len()
            );
            return Ok(None);
        }

        let samples: Vec<RunSample> = runs.iter().map(RunSample::from).collect();
        let metrics = compute_metrics(&samples);
        let pattern = detect_pattern(&samples);

        let diagnosis = if metrics.score > FLAKINESS_THRESHOLD {
            Some(
                diagnosis::diagnose(
                    self.model.as_deref(),
                    &scenario.title,
                    &metrics,
                    &pattern,
                    &runs,
                )
                .await,
            )
        } else {
            None
        };

        let record = TestFlakiness {
            scenario_id,
            flakiness_score: metrics.score,
            total_runs: metrics.total,
            pass_count: metrics.pass,
            fail_count: metrics.fail,
            transition_count: metrics.transitions,
            pattern,
            last_analyzed_at: Utc::now(),
            ai_diagnosis: diagnosis.as_ref().map(|d| d.diagnosis.clone()),
            suggested_fix: diagnosis.map(|d| d.fix),
        };
        self.store.upsert_flakiness(&record)?;

        info!(
            "Scenario #{}: flakiness score = {}%",
            scenario_id, record.flakiness_score
        );
        Ok(Some(record))
    }
}
