use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PersistentSettings {
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub ai: AiSettings,
}

/// Where screenshot evidence goes once a result is ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub store_screenshots: bool,
    pub artifact_disk: String,
    pub artifact_path: String,
    /// Base URL under which stored artifacts are served. When unset the
    /// artifact URL is the bare relative path.
    pub public_url: Option<String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            store_screenshots: true,
            artifact_disk: "local".to_string(),
            artifact_path: "qraft/artifacts".to_string(),
            public_url: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Any endpoint speaking the `/chat/completions` protocol.
    OpenAi,
    Gemini,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiProvider {
    pub id: String,
    pub name: String,
    pub kind: ProviderKind,
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiSettings {
    pub default_provider: String,
    pub providers: Vec<AiProvider>,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            default_provider: "openai".to_string(),
            providers: vec![
                AiProvider {
                    id: "openai".to_string(),
                    name: "OpenAI".to_string(),
                    kind: ProviderKind::OpenAi,
                    model: "gpt-4o".to_string(),
                    api_key: String::new(),
                    url: "https://api.openai.com/v1".to_string(),
                },
                AiProvider {
                    id: "gemini".to_string(),
                    name: "Google Gemini".to_string(),
                    kind: ProviderKind::Gemini,
                    model: "gemini-1.5-pro".to_string(),
                    api_key: String::new(),
                    url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
                },
            ],
        }
    }
}

impl AiSettings {
    /// The default provider, if it is configured with an API key.
    pub fn active_provider(&self) -> Option<&AiProvider> {
        self.providers
            .iter()
            .find(|p| p.id == self.default_provider)
            .filter(|p| !p.api_key.is_empty())
    }
}

pub fn load_settings(path: &Path) -> PersistentSettings {
    match std::fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
        Err(_) => PersistentSettings::default(),
    }
}

pub fn save_settings(path: &Path, settings: &PersistentSettings) {
    match serde_json::to_string_pretty(settings) {
        Ok(json) => {
            if let Err(e) = std::fs::write(path, json) {
                warn!("Failed to save settings to {:?}: {}", path, e);
            }
        }
        Err(e) => {
            warn!("Failed to serialize settings: {}", e);
        }
    }
}
