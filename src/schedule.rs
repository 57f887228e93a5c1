use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::dispatch::Dispatcher;
use crate::error::InspectorError;
use crate::model::Scenario;
use crate::store::Store;

/// Whether a scenario should be dispatched by the scheduler at `now`.
pub fn is_due(scenario: &Scenario, now: DateTime<Utc>) -> bool {
    if !scenario.is_active {
        return false;
    }
    let Some(interval) = scenario.frequency.interval() else {
        return false;
    };
    match scenario.last_run_at {
        None => true,
        Some(last) => now - last >= interval,
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ScheduleReport {
    /// Run ids created in this pass.
    pub dispatched: Vec<i64>,
    /// Scenario ids that were due but could not be dispatched.
    pub skipped: Vec<i64>,
}

/// Dispatch every due scenario to its project's first agent.
pub async fn run_schedule_pass(
    store: &Store,
    dispatcher: &Dispatcher,
    now: DateTime<Utc>,
) -> anyhow::Result<ScheduleReport> {
    let mut report = ScheduleReport::default();

    for scenario in store.list_schedulable_scenarios()? {
        if !is_due(&scenario, now) {
            continue;
        }

        match dispatcher.dispatch_loaded(&scenario, None).await {
            Ok(run) => {
                info!(
                    "Scheduled scenario #{} '{}' as run #{}",
                    scenario.id, scenario.title, run.id
                );
                report.dispatched.push(run.id);
            }
            Err(InspectorError::NoAgent(project_id)) => {
                warn!(
                    "Skipping scenario #{}: project #{} has no agents",
                    scenario.id, project_id
                );
                report.skipped.push(scenario.id);
            }
            Err(e) => {
                error!("Failed to schedule scenario #{}: {}", scenario.id, e);
                report.skipped.push(scenario.id);
            }
        }
    }

    Ok(report)
}

/// Spawn the periodic scheduler background task.
pub fn spawn_scheduler(
    store: Arc<Store>,
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!("Scheduler task started (every {}s)", interval.as_secs());
        loop {
            match run_schedule_pass(&store, &dispatcher, Utc::now()).await {
                Ok(report) if !report.dispatched.is_empty() || !report.skipped.is_empty() => {
                    info!(
                        "Scheduler pass: {} dispatched, {} skipped",
                        report.dispatched.len(),
                        report.skipped.len()
                    );
                }
                Ok(_) => {}
                Err(e) => error!("Scheduler pass failed: {}", e),
            }
            sleep(interval).await;
        }
    })
}
