use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// QRAFT inspector: dispatches browser test scenarios, executes them and
/// scores their stability from run history.
#[derive(Parser, Debug, Clone)]
#[command(name = "qraft-inspector", version)]
pub struct CliArgs {
    /// Directory holding the SQLite databases, settings.json and artifacts
    #[arg(long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Also write logs to a daily-rolling file in this directory
    #[arg(long = "log-dir", global = true)]
    pub log_dir: Option<PathBuf>,

    /// Shared secret carried by result callbacks
    #[arg(
        long = "callback-secret",
        env = "QRAFT_CALLBACK_SECRET",
        global = true,
        default_value = ""
    )]
    pub callback_secret: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP API (result ingestion, dispatch, flakiness, AI endpoints)
    Serve(ServeArgs),
    /// Consume tasks from the queue and execute them in a browser
    Worker(WorkerArgs),
    /// Run a single scheduling pass and exit
    Schedule,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// HTTP port
    #[arg(long = "port", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Run the periodic scheduler inside the server
    #[arg(long = "scheduler")]
    pub scheduler: bool,
}

#[derive(Args, Debug, Clone)]
pub struct WorkerArgs {
    /// Base URL of the inspector API that receives result callbacks
    #[arg(long = "app-url", env = "QRAFT_APP_URL", default_value = DEFAULT_APP_URL)]
    pub app_url: String,

    /// Base URL of the headless browser sidecar
    #[arg(long = "browser-url", env = "QRAFT_BROWSER_URL", default_value = DEFAULT_BROWSER_URL)]
    pub browser_url: String,

    /// Per-step timeout for interactions and assertions, in milliseconds
    #[arg(long = "step-timeout-ms", default_value_t = STEP_TIMEOUT_MS)]
    pub step_timeout_ms: u64,

    /// Timeout for visit steps, in milliseconds
    #[arg(long = "navigation-timeout-ms", default_value_t = NAVIGATION_TIMEOUT_MS)]
    pub navigation_timeout_ms: u64,

    /// Upper bound for the whole step loop of one task, in seconds
    #[arg(long = "task-deadline-secs", default_value_t = TASK_DEADLINE_SECS)]
    pub task_deadline_secs: u64,
}

#[derive(Debug, Clone)]
pub struct InspectorConfig {
    pub data_dir: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub callback_secret: String,
    pub port: u16,
    pub scheduler_enabled: bool,
    pub app_url: String,
    pub browser_url: String,
    pub step_timeout: Duration,
    pub navigation_timeout: Duration,
    pub task_deadline: Duration,
}

// Ports and collaborator endpoints
pub const DEFAULT_PORT: u16 = 8088;
pub const DEFAULT_APP_URL: &str = "http://127.0.0.1:8088";
pub const DEFAULT_BROWSER_URL: &str = "http://127.0.0.1:9222";

// Step execution
pub const STEP_TIMEOUT_MS: u64 = 5_000;
pub const NAVIGATION_TIMEOUT_MS: u64 = 30_000;
pub const TASK_DEADLINE_SECS: u64 = 300;
pub const DEFAULT_WAIT_MS: u64 = 1_000;
pub const DEFAULT_THROTTLE_MS: u64 = 1_000;
pub const SCREENSHOT_JPEG_QUALITY: u8 = 80;
pub const VIEWPORT_WIDTH: u32 = 1280;
pub const VIEWPORT_HEIGHT: u32 = 800;
/// Extra time granted to the driver on top of its own timeout before the
/// worker's timer fires.
pub const DRIVER_GRACE_MS: u64 = 1_000;

// Queue
pub const QUEUE_POLL_INTERVAL_MS: u64 = 250;
pub const QUEUE_POP_WAIT_SECS: u64 = 5;
pub const QUEUE_LEASE_SECS: u64 = 600; // 10 minutes
/// Headroom for session setup and finalization on top of the task deadline
/// and the callback budget.
pub const QUEUE_LEASE_MARGIN_SECS: u64 = 60;
pub const QUEUE_ERROR_BACKOFF_SECS: u64 = 5;

// Result callback
pub const CALLBACK_PATH: &str = "/api/webhooks/inspector";
pub const CALLBACK_MAX_ATTEMPTS: u32 = 3;
pub const CALLBACK_BACKOFF_MS: u64 = 2_000;
pub const CALLBACK_TIMEOUT_SECS: u64 = 30;

// Scheduler
pub const SCHEDULER_INTERVAL_SECS: u64 = 60;

// Flakiness analysis
pub const FLAKINESS_HISTORY_LIMIT: usize = 50;
pub const FLAKINESS_MIN_RUNS: usize = 5;
pub const FLAKINESS_THRESHOLD: u8 = 20;
pub const FLAKINESS_SEQUENCE_LEN: usize = 10;
pub const FLAKINESS_RECENT_FAILURES: usize = 3;

// AI collaborators
pub const AI_REQUEST_TIMEOUT_SECS: u64 = 60;
pub const AI_MAX_TOKENS: u32 = 1000;
pub const AI_DESCRIPTION_MAX_CHARS: usize = 500;

// API listing defaults
pub const RUN_LIST_DEFAULT_LIMIT: usize = 20;
pub const RUN_LIST_MAX_LIMIT: usize = 200;

impl InspectorConfig {
    pub fn from_args(args: &CliArgs) -> Self {
        let data_dir = args.data_dir.clone().unwrap_or_else(default_data_dir);

        let mut config = InspectorConfig {
            data_dir,
            log_dir: args.log_dir.clone(),
            callback_secret: args.callback_secret.clone(),
            port: DEFAULT_PORT,
            scheduler_enabled: false,
            app_url: DEFAULT_APP_URL.to_string(),
            browser_url: DEFAULT_BROWSER_URL.to_string(),
            step_timeout: Duration::from_millis(STEP_TIMEOUT_MS),
            navigation_timeout: Duration::from_millis(NAVIGATION_TIMEOUT_MS),
            task_deadline: Duration::from_secs(TASK_DEADLINE_SECS),
        };

        match &args.command {
            Command::Serve(serve) => {
                config.port = serve.port;
                config.scheduler_enabled = serve.scheduler;
            }
            Command::Worker(worker) => {
                config.app_url = worker.app_url.trim_end_matches('/').to_string();
                config.browser_url = worker.browser_url.trim_end_matches('/').to_string();
                config.step_timeout = Duration::from_millis(worker.step_timeout_ms);
                config.navigation_timeout = Duration::from_millis(worker.navigation_timeout_ms);
                config.task_deadline = Duration::from_secs(worker.task_deadline_secs);
            }
            Command::Schedule => {}
        }

        config
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("settings.json")
    }

    pub fn callback_url(&self) -> String {
        format!("{}{}", self.app_url, CALLBACK_PATH)
    }

    /// How long a claimed queue message stays invisible to other workers.
    /// Never shorter than one task can legitimately take: the step deadline
    /// plus every callback attempt and its backoff.
    pub fn queue_lease(&self) -> Duration {
        let attempts = u64::from(CALLBACK_MAX_ATTEMPTS);
        let callback = Duration::from_secs(CALLBACK_TIMEOUT_SECS * attempts)
            + Duration::from_millis(CALLBACK_BACKOFF_MS * (1..attempts).sum::<u64>());
        let needed =
            self.task_deadline + callback + Duration::from_secs(QUEUE_LEASE_MARGIN_SECS);
        needed.max(Duration::from_secs(QUEUE_LEASE_SECS))
    }
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("qraft")
}
