use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info};

use crate::error::InspectorError;
use crate::model::{NetworkMock, Project, Run, Scenario, StepRecord, TaskMessage};
use crate::queue::TaskQueue;
use crate::store::Store;

/// Resolve relative `visit` targets against the project's base URL.
/// An empty step list becomes a single visit of the base URL.
pub fn resolve_steps(steps: &[StepRecord], base_url: &str) -> Vec<StepRecord> {
    let base = base_url.trim_end_matches('/');
    if steps.is_empty() {
        return vec![StepRecord::visit(base)];
    }

    steps
        .iter()
        .map(|step| {
            let mut step = step.clone();
            if step.action == "visit" {
                if let Some(value) = step.value.as_deref() {
                    if value.starts_with('/') {
                        step.value = Some(format!("{}{}", base, value));
                    }
                }
            }
            step
        })
        .collect()
}

pub fn build_task(
    run_id: i64,
    project: &Project,
    steps: &[StepRecord],
    network_mocks: &[NetworkMock],
) -> TaskMessage {
    TaskMessage {
        run_id,
        steps: resolve_steps(steps, &project.base_url),
        network_mocks: network_mocks.to_vec(),
    }
}

pub struct Dispatcher {
    store: Arc<Store>,
    queue: Arc<dyn TaskQueue>,
}

impl Dispatcher {
    pub fn new(store: Arc<Store>, queue: Arc<dyn TaskQueue>) -> Self {
        Self { store, queue }
    }

    /// Create a queued run for the scenario and enqueue its task. Without an
    /// explicit agent the project's first agent is used.
    pub async fn dispatch_scenario(
        &self,
        scenario_id: i64,
        agent_id: Option<i64>,
    ) -> Result<Run, InspectorError> {
        let scenario = self
            .store
            .get_scenario(scenario_id)?
            .ok_or_else(|| InspectorError::NotFound(format!("Scenario #{}", scenario_id)))?;
        self.dispatch_loaded(&scenario, agent_id).await
    }

    pub(crate) async fn dispatch_loaded(
        &self,
        scenario: &Scenario,
        agent_id: Option<i64>,
    ) -> Result<Run, InspectorError> {
        let project = self.load_project(scenario.project_id)?;
        let agent_id = self.resolve_agent(&project, agent_id)?;

        let run = self
            .store
            .create_run(project.id, Some(agent_id), Some(scenario.id))?;
        let task = build_task(run.id, &project, &scenario.steps, &scenario.network_mocks);
        let enqueued = self.enqueue(&run, &task).await?;

        if enqueued {
            let now = Utc::now();
            self.store
                .record_dispatch(scenario.id, now, scenario.frequency.next_run_after(now))?;
        }
        self.reload(run)
    }

    /// Run caller-supplied steps against a project without a stored scenario.
    pub async fn dispatch_adhoc(
        &self,
        project_id: i64,
        agent_id: Option<i64>,
        steps: &[StepRecord],
        network_mocks: &[NetworkMock],
    ) -> Result<Run, InspectorError> {
        let project = self.load_project(project_id)?;
        let agent_id = self.resolve_agent(&project, agent_id)?;

        let run = self.store.create_run(project.id, Some(agent_id), None)?;
        let task = build_task(run.id, &project, steps, network_mocks);
        self.enqueue(&run, &task).await?;
        self.reload(run)
    }

    /// Push the task; a transport failure fails the run instead of the call.
    async fn enqueue(&self, run: &Run, task: &TaskMessage) -> Result<bool, InspectorError> {
        match self.queue.push(task).await {
            Ok(()) => {
                info!(
                    "[Run #{}] Queued {} steps, {} network mocks",
                    run.id,
                    task.steps.len(),
                    task.network_mocks.len()
                );
                Ok(true)
            }
            Err(e) => {
                error!("[Run #{}] Failed to dispatch: {}", run.id, e);
                let logs = format!("Failed to dispatch: {}", e);
                self.store.complete_run(
                    run.id,
                    crate::model::RunStatus::Failed,
                    None,
                    &logs,
                    Utc::now(),
                )?;
                Ok(false)
            }
        }
    }

    fn load_project(&self, project_id: i64) -> Result<Project, InspectorError> {
        self.store
            .get_project(project_id)?
            .ok_or_else(|| InspectorError::NotFound(format!("Project #{}", project_id)))
    }

    fn resolve_agent(&self, project: &Project, agent_id: Option<i64>) -> Result<i64, InspectorError> {
        match agent_id {
            Some(id) => match self.store.get_agent(id)? {
                Some(agent) if agent.project_id == project.id => Ok(agent.id),
                Some(_) => Err(InspectorError::Validation(format!(
                    "Agent #{} does not belong to project #{}",
                    id, project.id
                ))),
                None => Err(InspectorError::NotFound(format!("Agent #{}", id))),
            },
            None => self
                .store
                .first_agent(project.id)?
                .map(|agent| agent.id)
                .ok_or(InspectorError::NoAgent(project.id)),
        }
    }

    fn reload(&self, run: Run) -> Result<Run, InspectorError> {
        Ok(self.store.get_run(run.id)?.unwrap_or(run))
    }
}
