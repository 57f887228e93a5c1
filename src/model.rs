use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ============================================================================
// Projects, agents, scenarios
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub base_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: i64,
    pub project_id: i64,
    pub name: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    #[default]
    Manual,
    Hourly,
    Daily,
    Weekly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Manual => "manual",
            Frequency::Hourly => "hourly",
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(Frequency::Manual),
            "hourly" => Some(Frequency::Hourly),
            "daily" => Some(Frequency::Daily),
            "weekly" => Some(Frequency::Weekly),
            _ => None,
        }
    }

    /// Minimum spacing between automatic runs. `None` for manual scenarios.
    pub fn interval(&self) -> Option<Duration> {
        match self {
            Frequency::Manual => None,
            Frequency::Hourly => Some(Duration::hours(1)),
            Frequency::Daily => Some(Duration::hours(24)),
            Frequency::Weekly => Some(Duration::days(7)),
        }
    }

    pub fn next_run_after(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.interval().map(|i| at + i)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: i64,
    pub project_id: i64,
    pub title: String,
    pub steps: Vec<StepRecord>,
    pub network_mocks: Vec<NetworkMock>,
    pub is_active: bool,
    pub frequency: Frequency,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
}

/// Fields needed to create a scenario; ids and scheduling timestamps are
/// assigned by the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewScenario {
    pub project_id: i64,
    pub title: String,
    #[serde(default)]
    pub steps: Vec<StepRecord>,
    #[serde(default)]
    pub network_mocks: Vec<NetworkMock>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub frequency: Frequency,
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Wire records: steps and network mocks
// ============================================================================

/// A step as authored and stored. Parsed into [`crate::steps::Step`] by the
/// worker right before it runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector_type: Option<String>,
    #[serde(
        default,
        deserialize_with = "string_or_scalar",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exact: Option<bool>,
}

impl StepRecord {
    pub fn visit(url: impl Into<String>) -> Self {
        Self {
            action: "visit".to_string(),
            value: Some(url.into()),
            ..Default::default()
        }
    }
}

/// Step values are authored as strings but wait durations frequently arrive
/// as bare numbers.
fn string_or_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MockKind {
    MockApi,
    BlockResource,
    Throttle,
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkMock {
    #[serde(rename = "type")]
    pub kind: MockKind,
    #[serde(default, alias = "url_pattern", skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(
        default,
        alias = "resource_pattern",
        skip_serializing_if = "Option::is_none"
    )]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_body: Option<Value>,
    #[serde(default, alias = "http_status", skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

/// Queue message consumed by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub run_id: i64,
    #[serde(default)]
    pub steps: Vec<StepRecord>,
    #[serde(default)]
    pub network_mocks: Vec<NetworkMock>,
}

// ============================================================================
// Runs and results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Processing => "processing",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(RunStatus::Queued),
            "processing" => Some(RunStatus::Processing),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NetworkError {
    RequestFailed {
        url: String,
        error: String,
        method: String,
    },
    HttpError {
        url: String,
        status: u16,
        #[serde(rename = "statusText")]
        status_text: String,
        method: String,
    },
}

/// Evidence produced by one task execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub success: bool,
    /// Inline base64 JPEG. Replaced by the `screenshot_*` references once
    /// ingestion has persisted it.
    #[serde(default)]
    pub screenshot: Option<String>,
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub network_errors: Vec<NetworkError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_disk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_sha256: Option<String>,
    /// Written by the visual-analysis collaborator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_analysis: Option<String>,
}

/// Body of the worker's result callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultCallback {
    pub run_id: i64,
    pub result: RunResult,
    pub secret: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: i64,
    pub project_id: i64,
    pub agent_id: Option<i64>,
    pub scenario_id: Option<i64>,
    pub status: RunStatus,
    pub severity: Option<String>,
    pub result: Option<RunResult>,
    pub logs: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn queued(project_id: i64, agent_id: Option<i64>, scenario_id: Option<i64>) -> Self {
        Self {
            id: 0,
            project_id,
            agent_id,
            scenario_id,
            status: RunStatus::Queued,
            severity: None,
            result: None,
            logs: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// A run counts as a pass when it completed and visual analysis did not
    /// flag it as critical.
    pub fn passed(&self) -> bool {
        self.status == RunStatus::Completed && self.severity.as_deref() != Some("critical")
    }
}
