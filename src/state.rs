use std::sync::Arc;

use crate::ai::element::ElementService;
use crate::ai::{HttpModelClient, TextModel};
use crate::artifacts::{ArtifactStore, LocalArtifactStore};
use crate::config::InspectorConfig;
use crate::dispatch::Dispatcher;
use crate::flakiness::FlakinessAnalyzer;
use crate::ingest::{LoggingVisualAnalysis, ResultIngestion};
use crate::queue::{SqliteQueue, TaskQueue};
use crate::settings::PersistentSettings;
use crate::store::Store;

pub type SharedState = Arc<AppState>;

/// Everything the HTTP handlers and background tasks share.
pub struct AppState {
    pub config: InspectorConfig,
    pub settings: PersistentSettings,
    pub store: Arc<Store>,
    pub queue: Arc<dyn TaskQueue>,
    pub dispatcher: Arc<Dispatcher>,
    pub ingestion: ResultIngestion,
    pub analyzer: Arc<FlakinessAnalyzer>,
    pub elements: Arc<ElementService>,
}

impl AppState {
    /// Open the stores under the data dir and the configured AI provider.
    pub fn open(config: InspectorConfig, settings: PersistentSettings) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let queue: Arc<dyn TaskQueue> = Arc::new(SqliteQueue::new(&config.data_dir)?);
        let model: Option<Arc<dyn TextModel>> = HttpModelClient::from_settings(&settings.ai)?
            .map(|client| Arc::new(client) as Arc<dyn TextModel>);
        Self::new(config, settings, queue, model)
    }

    pub fn new(
        config: InspectorConfig,
        settings: PersistentSettings,
        queue: Arc<dyn TaskQueue>,
        model: Option<Arc<dyn TextModel>>,
    ) -> anyhow::Result<Self> {
        let store = Arc::new(Store::new(&config.data_dir)?);
        let dispatcher = Arc::new(Dispatcher::new(store.clone(), queue.clone()));
        let analyzer = Arc::new(FlakinessAnalyzer::new(store.clone(), model.clone()));
        let artifacts: Arc<dyn ArtifactStore> = Arc::new(LocalArtifactStore::new(
            &config.data_dir.join("artifacts"),
            &settings.storage,
        ));
        let ingestion = ResultIngestion::new(
            store.clone(),
            artifacts,
            settings.storage.clone(),
            analyzer.clone(),
            Arc::new(LoggingVisualAnalysis),
            config.callback_secret.clone(),
        );
        let elements = Arc::new(ElementService::new(model));

        Ok(Self {
            config,
            settings,
            store,
            queue,
            dispatcher,
            ingestion,
            analyzer,
            elements,
        })
    }
}
