mod common;

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use qraft_inspector::dispatch::Dispatcher;
use qraft_inspector::error::InspectorError;
use qraft_inspector::model::{Frequency, NewScenario, RunStatus, StepRecord};
use qraft_inspector::queue::{SqliteQueue, TaskQueue};
use qraft_inspector::schedule::run_schedule_pass;
use qraft_inspector::store::Store;

use common::{mock_api, seed_project, BrokenQueue};

fn setup() -> (TempDir, Arc<Store>, Arc<SqliteQueue>, Dispatcher) {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(Store::new(dir.path()).unwrap());
    let queue = Arc::new(SqliteQueue::new(dir.path()).unwrap());
    let dispatcher = Dispatcher::new(store.clone(), queue.clone());
    (dir, store, queue, dispatcher)
}

fn scenario(project_id: i64, frequency: Frequency) -> NewScenario {
    NewScenario {
        project_id,
        title: "Login works".to_string(),
        steps: vec![
            StepRecord::visit("/login"),
            StepRecord {
                action: "click".to_string(),
                selector: Some("#submit".to_string()),
                ..Default::default()
            },
        ],
        network_mocks: vec![mock_api("**/api/session", 503)],
        is_active: true,
        frequency,
    }
}

#[tokio::test]
async fn test_dispatch_scenario_enqueues_resolved_task() {
    let (_dir, store, queue, dispatcher) = setup();
    let (project, agent) = seed_project(&store);
    let scenario = store
        .insert_scenario(&scenario(project.id, Frequency::Hourly))
        .unwrap();

    let run = dispatcher.dispatch_scenario(scenario.id, None).await.unwrap();

    assert_eq!(run.status, RunStatus::Queued);
    assert_eq!(run.agent_id, Some(agent.id));
    assert_eq!(run.scenario_id, Some(scenario.id));

    let delivery = queue.pop(Duration::from_millis(500)).await.unwrap().unwrap();
    let task = delivery.decode().unwrap();
    assert_eq!(task.run_id, run.id);
    assert_eq!(task.steps[0].value.as_deref(), Some("https://x.test/login"));
    assert_eq!(task.steps[1].selector.as_deref(), Some("#submit"));
    assert_eq!(task.network_mocks.len(), 1);

    let scenario = store.get_scenario(scenario.id).unwrap().unwrap();
    let last = scenario.last_run_at.unwrap();
    assert_eq!(scenario.next_run_at, Some(last + ChronoDuration::hours(1)));
}

#[tokio::test]
async fn test_manual_scenario_has_no_next_run() {
    let (_dir, store, _queue, dispatcher) = setup();
    let (project, _agent) = seed_project(&store);
    let scenario = store
        .insert_scenario(&scenario(project.id, Frequency::Manual))
        .unwrap();

    dispatcher.dispatch_scenario(scenario.id, None).await.unwrap();

    let scenario = store.get_scenario(scenario.id).unwrap().unwrap();
    assert!(scenario.last_run_at.is_some());
    assert!(scenario.next_run_at.is_none());
}

#[tokio::test]
async fn test_enqueue_failure_fails_run() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(Store::new(dir.path()).unwrap());
    let dispatcher = Dispatcher::new(store.clone(), Arc::new(BrokenQueue));
    let (project, _agent) = seed_project(&store);
    let scenario = store
        .insert_scenario(&scenario(project.id, Frequency::Daily))
        .unwrap();

    let run = dispatcher.dispatch_scenario(scenario.id, None).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(
        run.logs.as_deref(),
        Some("Failed to dispatch: connection refused")
    );
    assert!(run.completed_at.is_some());
    let scenario = store.get_scenario(scenario.id).unwrap().unwrap();
    assert!(scenario.last_run_at.is_none());
}

#[tokio::test]
async fn test_dispatch_without_agent_is_rejected() {
    let (_dir, store, queue, dispatcher) = setup();
    let project = store.insert_project("Empty", "https://empty.test").unwrap();
    let scenario = store
        .insert_scenario(&scenario(project.id, Frequency::Manual))
        .unwrap();

    let err = dispatcher
        .dispatch_scenario(scenario.id, None)
        .await
        .unwrap_err();

    assert!(matches!(err, InspectorError::NoAgent(id) if id == project.id));
    assert_eq!(queue.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn test_agent_from_other_project_is_rejected() {
    let (_dir, store, _queue, dispatcher) = setup();
    let (project, _agent) = seed_project(&store);
    let other = store.insert_project("Other", "https://other.test").unwrap();
    let foreign = store.insert_agent(other.id, "elsewhere").unwrap();
    let scenario = store
        .insert_scenario(&scenario(project.id, Frequency::Manual))
        .unwrap();

    let err = dispatcher
        .dispatch_scenario(scenario.id, Some(foreign.id))
        .await
        .unwrap_err();
    assert!(matches!(err, InspectorError::Validation(_)));

    let err = dispatcher
        .dispatch_scenario(scenario.id, Some(9999))
        .await
        .unwrap_err();
    assert!(matches!(err, InspectorError::NotFound(_)));
}

#[tokio::test]
async fn test_adhoc_dispatch_with_no_steps_visits_base() {
    let (_dir, store, queue, dispatcher) = setup();
    let (project, _agent) = seed_project(&store);

    let run = dispatcher
        .dispatch_adhoc(project.id, None, &[], &[])
        .await
        .unwrap();

    assert!(run.scenario_id.is_none());
    let task = queue
        .pop(Duration::from_millis(500))
        .await
        .unwrap()
        .unwrap()
        .decode()
        .unwrap();
    assert_eq!(task.steps, vec![StepRecord::visit("https://x.test")]);
}

#[tokio::test]
async fn test_schedule_pass_dispatches_due_scenarios_once() {
    let (_dir, store, queue, dispatcher) = setup();
    let (project, _agent) = seed_project(&store);
    let hourly = store
        .insert_scenario(&scenario(project.id, Frequency::Hourly))
        .unwrap();
    store
        .insert_scenario(&scenario(project.id, Frequency::Manual))
        .unwrap();
    let paused = store
        .insert_scenario(&scenario(project.id, Frequency::Daily))
        .unwrap();
    store.set_scenario_active(paused.id, false).unwrap();

    let report = run_schedule_pass(&store, &dispatcher, Utc::now())
        .await
        .unwrap();
    assert_eq!(report.dispatched.len(), 1);
    assert!(report.skipped.is_empty());
    let run = store.get_run(report.dispatched[0]).unwrap().unwrap();
    assert_eq!(run.scenario_id, Some(hourly.id));

    // Just dispatched: not due again until an hour has passed.
    let again = run_schedule_pass(&store, &dispatcher, Utc::now())
        .await
        .unwrap();
    assert!(again.dispatched.is_empty());

    let later = run_schedule_pass(&store, &dispatcher, Utc::now() + ChronoDuration::hours(2))
        .await
        .unwrap();
    assert_eq!(later.dispatched.len(), 1);
    assert_eq!(queue.depth().await.unwrap(), 2);
}

#[tokio::test]
async fn test_schedule_pass_skips_projects_without_agents() {
    let (_dir, store, _queue, dispatcher) = setup();
    let project = store.insert_project("Lonely", "https://lonely.test").unwrap();
    let scenario = store
        .insert_scenario(&scenario(project.id, Frequency::Daily))
        .unwrap();

    let report = run_schedule_pass(&store, &dispatcher, Utc::now())
        .await
        .unwrap();

    assert!(report.dispatched.is_empty());
    assert_eq!(report.skipped, vec![scenario.id]);
}
