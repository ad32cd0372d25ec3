//! Registry persistence
//!
//! The artifact registry is rewritten fully on every mutation and read fully
//! on startup. Writes go through a temp file plus rename so a crash never
//! leaves a half-written registry behind.

use crate::models::registry::ArtifactRecord;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Trait for storage backend operations
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Save content to a file path atomically
    async fn save(&self, path: &Path, content: &str) -> Result<()>;

    /// Load content from a file path
    /// Returns None if file doesn't exist
    async fn load(&self, path: &Path) -> Result<Option<String>>;

    /// Check if a file exists
    fn exists(&self, path: &Path) -> bool;
}

/// Production storage backend using tokio::fs
pub struct FileSystemStorage;

impl FileSystemStorage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FileSystemStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for FileSystemStorage {
    async fn save(&self, path: &Path, content: &str) -> Result<()> {
        // Atomic write: write to temp file, then rename
        let temp_file = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_file)
            .await
            .context("Failed to create temp registry file")?;
        file.write_all(content.as_bytes())
            .await
            .context("Failed to write registry file")?;
        file.sync_all()
            .await
            .context("Failed to sync registry file")?;

        fs::rename(&temp_file, path)
            .await
            .context("Failed to rename temp registry file")?;

        Ok(())
    }

    async fn load(&self, path: &Path) -> Result<Option<String>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read registry file: {:?}", path))?;

        Ok(Some(content))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

/// On-disk shape of the registry document
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SavedRegistry {
    #[serde(default = "chrono::Utc::now")]
    pub last_updated: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub models: HashMap<String, ArtifactRecord>,
}

/// Durable key→record store behind the artifact registry
pub struct RegistryStore {
    file: PathBuf,
    storage: Arc<dyn StorageBackend>,
}

impl RegistryStore {
    /// Create a store with default filesystem storage
    pub fn new(file: PathBuf) -> Self {
        Self::new_with_storage(file, Arc::new(FileSystemStorage::new()))
    }

    /// Create a store with a custom storage backend
    pub fn new_with_storage(file: PathBuf, storage: Arc<dyn StorageBackend>) -> Self {
        Self { file, storage }
    }

    /// Persist the full record map atomically
    pub async fn save(&self, records: &HashMap<String, ArtifactRecord>) -> Result<()> {
        let state = SavedRegistry {
            last_updated: chrono::Utc::now(),
            models: records.clone(),
        };

        let toml_content =
            toml::to_string_pretty(&state).context("Failed to serialize registry to TOML")?;

        self.storage.save(&self.file, &toml_content).await?;

        tracing::debug!(
            path = ?self.file,
            models = state.models.len(),
            "Registry saved"
        );

        Ok(())
    }

    /// Load the registry document from disk
    /// FAILS HARD if the file is corrupted - user must fix or delete
    pub async fn load(&self) -> Result<SavedRegistry> {
        let content = self.storage.load(&self.file).await?;

        let content = match content {
            Some(c) => c,
            None => {
                tracing::info!("No registry file found, starting fresh");
                return Ok(SavedRegistry::default());
            }
        };

        let state: SavedRegistry = toml::from_str(&content).with_context(|| {
            format!(
                "Failed to parse registry file: {:?}. File may be corrupted. \
                Please delete or fix the file manually.",
                self.file
            )
        })?;

        tracing::info!(
            models = state.models.len(),
            last_updated = %state.last_updated,
            "Registry loaded from disk"
        );

        Ok(state)
    }
}
