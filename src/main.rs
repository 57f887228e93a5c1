use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use qraft_inspector::ai::element::HttpElementDiscovery;
use qraft_inspector::browser::bridge::BridgeBrowser;
use qraft_inspector::config::{CliArgs, Command, InspectorConfig, SCHEDULER_INTERVAL_SECS};
use qraft_inspector::dispatch::Dispatcher;
use qraft_inspector::queue::{SqliteQueue, TaskQueue};
use qraft_inspector::settings::{load_settings, save_settings};
use qraft_inspector::state::AppState;
use qraft_inspector::store::Store;
use qraft_inspector::worker::report::CallbackReporter;
use qraft_inspector::worker::{Worker, WorkerConfig};
use qraft_inspector::{schedule, server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    let _log_guard = init_tracing(args.log_dir.as_deref());

    info!("Starting qraft-inspector v{}", env!("CARGO_PKG_VERSION"));
    let config = InspectorConfig::from_args(&args);
    info!("Data dir: {:?}", config.data_dir);
    std::fs::create_dir_all(&config.data_dir)?;

    if config.callback_secret.is_empty() {
        warn!("No callback secret configured (QRAFT_CALLBACK_SECRET); results are accepted with an empty secret");
    }

    match args.command {
        Command::Serve(_) => serve(config).await,
        Command::Worker(_) => work(config).await,
        Command::Schedule => schedule_once(config).await,
    }
}

/// Console output always; a daily-rolling file as well when a log dir is
/// given. The returned guard must live until exit to flush the file writer.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "qraft_inspector=info,tower_http=info".into());
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "qraft-inspector.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            registry.init();
            None
        }
    }
}

async fn serve(config: InspectorConfig) -> anyhow::Result<()> {
    let settings_path = config.settings_path();
    let settings = load_settings(&settings_path);
    if !settings_path.exists() {
        info!("Writing default settings to {:?}", settings_path);
        save_settings(&settings_path, &settings);
    }
    match settings.ai.active_provider() {
        Some(provider) => info!("AI provider: {} ({})", provider.name, provider.model),
        None => warn!("No AI provider configured; diagnosis falls back to heuristics"),
    }

    let port = config.port;
    let scheduler_enabled = config.scheduler_enabled;
    let state = Arc::new(AppState::open(config, settings)?);

    if scheduler_enabled {
        let _scheduler_handle = schedule::spawn_scheduler(
            state.store.clone(),
            state.dispatcher.clone(),
            Duration::from_secs(SCHEDULER_INTERVAL_SECS),
        );
    }

    let router = server::build_router(state.clone());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("Inspector listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Inspector shutting down");
    Ok(())
}

async fn work(config: InspectorConfig) -> anyhow::Result<()> {
    let store = Arc::new(Store::new(&config.data_dir)?);
    let lease = config.queue_lease();
    let queue: Arc<dyn TaskQueue> =
        Arc::new(SqliteQueue::new(&config.data_dir)?.with_lease(lease));
    let browser = Arc::new(BridgeBrowser::new(&config.browser_url)?);
    let discovery = Arc::new(HttpElementDiscovery::new(&config.app_url)?);
    let reporter = Arc::new(CallbackReporter::new(
        &config.callback_url(),
        &config.callback_secret,
    )?);
    info!("Browser bridge: {}", config.browser_url);
    info!("Queue lease: {}s", lease.as_secs());
    info!("Reporting results to {}", config.callback_url());

    let worker = Worker::new(
        store,
        queue,
        browser,
        discovery,
        reporter,
        WorkerConfig::from_config(&config),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    worker.run(shutdown_rx).await;
    Ok(())
}

async fn schedule_once(config: InspectorConfig) -> anyhow::Result<()> {
    let store = Arc::new(Store::new(&config.data_dir)?);
    let queue: Arc<dyn TaskQueue> = Arc::new(SqliteQueue::new(&config.data_dir)?);
    let dispatcher = Dispatcher::new(store.clone(), queue);

    let report = schedule::run_schedule_pass(&store, &dispatcher, chrono::Utc::now()).await?;
    info!(
        "Schedule pass: {} dispatched, {} skipped",
        report.dispatched.len(),
        report.skipped.len()
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
