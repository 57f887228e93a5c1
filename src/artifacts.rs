use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};

use crate::settings::StorageSettings;

/// Where a stored artifact ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub path: String,
    pub disk: String,
    pub url: String,
    pub sha256: String,
}

/// Binary evidence storage, addressed by a relative path on a named disk.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(&self, path: &str, bytes: &[u8]) -> anyhow::Result<StoredArtifact>;
}

/// Artifacts on the local filesystem under `<root>/<disk>/`.
pub struct LocalArtifactStore {
    root: PathBuf,
    disk: String,
    public_url: Option<String>,
}

impl LocalArtifactStore {
    pub fn new(root: &Path, settings: &StorageSettings) -> Self {
        Self {
            root: root.to_path_buf(),
            disk: settings.artifact_disk.clone(),
            public_url: settings
                .public_url
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string()),
        }
    }

    fn disk_dir(&self) -> PathBuf {
        self.root.join(&self.disk)
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn put(&self, path: &str, bytes: &[u8]) -> anyhow::Result<StoredArtifact> {
        let relative = Path::new(path);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            anyhow::bail!("Artifact path must be relative and plain: {}", path);
        }

        let target = self.disk_dir().join(relative);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, bytes).await?;

        let url = match &self.public_url {
            Some(base) => format!("{}/{}", base, path),
            None => path.to_string(),
        };

        Ok(StoredArtifact {
            path: path.to_string(),
            disk: self.disk.clone(),
            url,
            sha256: hex::encode(Sha256::digest(bytes)),
        })
    }
}
