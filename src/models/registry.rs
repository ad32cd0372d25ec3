//! Artifact registry for tracking downloaded models
//!
//! Maps logical model names to on-disk artifact records. Status is never
//! stored; it is derived from a filesystem probe on every query, so an
//! artifact deleted out-of-band is reported as corrupted rather than ready.

use crate::error::{LlmError, Result};
use crate::models::download::{ARTIFACT_EXTENSION, ModelHub, select_artifact};
use crate::models::store::RegistryStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};

/// Artifacts below this size are considered truncated
pub const MIN_ARTIFACT_BYTES: u64 = 1024;

/// What kind of artifact a record points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Single-file quantized weights
    Gguf,
    Other,
}

/// Derived status of a registered artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    /// No record for this name
    NotFound,
    /// A fetch is currently in flight
    Downloading,
    /// On disk, right format, plausible size
    Ready,
    /// Record exists but the file is gone
    Corrupted,
    /// File is too small to be a real artifact
    Incomplete,
    /// File extension does not match the expected format
    InvalidFormat,
}

impl std::fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::Downloading => write!(f, "downloading"),
            Self::Ready => write!(f, "ready"),
            Self::Corrupted => write!(f, "corrupted"),
            Self::Incomplete => write!(f, "incomplete"),
            Self::InvalidFormat => write!(f, "invalid_format"),
        }
    }
}

/// One registered artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Logical model name (e.g. "Qwen/Qwen2-1.5B-Instruct-GGUF")
    pub name: String,
    pub kind: ArtifactKind,
    /// Path of the downloaded artifact file
    pub local_path: PathBuf,
    /// The artifact file chosen by the variant-selection policy
    pub selected_variant: String,
    /// All candidate artifact files offered by the repository, in listing order
    pub available_variants: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Registry of downloaded artifacts, persisted across restarts
pub struct ArtifactRegistry {
    models_dir: PathBuf,
    hub: Arc<dyn ModelHub>,
    records: RwLock<HashMap<String, ArtifactRecord>>,
    /// Names with an in-flight fetch, for status queries
    downloading: Mutex<HashSet<String>>,
    store: RegistryStore,
}

impl ArtifactRegistry {
    /// Open the registry, loading any persisted records
    pub async fn open(
        models_dir: PathBuf,
        registry_file: PathBuf,
        hub: Arc<dyn ModelHub>,
    ) -> Result<Self> {
        fs::create_dir_all(&models_dir).await?;

        let store = RegistryStore::new(registry_file);
        let saved = store.load().await.map_err(LlmError::Persist)?;

        Ok(Self {
            models_dir,
            hub,
            records: RwLock::new(saved.models),
            downloading: Mutex::new(HashSet::new()),
            store,
        })
    }

    /// Fetch an artifact for `name`, downloading it if necessary
    ///
    /// Idempotent: when the recorded artifact already exists on disk the
    /// existing record is returned without touching the hub.
    pub async fn fetch(&self, name: &str) -> Result<ArtifactRecord> {
        if let Some(existing) = self.get(name).await {
            if existing.local_path.exists() {
                tracing::debug!(model = %name, "Artifact already on disk, skipping download");
                return Ok(existing);
            }
        }

        {
            let mut downloading = self.downloading.lock().await;
            if !downloading.insert(name.to_string()) {
                return Err(LlmError::Fetch {
                    name: name.to_string(),
                    reason: "download already in progress".to_string(),
                });
            }
        }

        let result = self.fetch_inner(name).await;
        self.downloading.lock().await.remove(name);
        result
    }

    async fn fetch_inner(&self, name: &str) -> Result<ArtifactRecord> {
        let files = self.hub.list_files(name).await?;
        let suffix = format!(".{ARTIFACT_EXTENSION}");
        let candidates: Vec<String> = files
            .into_iter()
            .filter(|f| f.to_lowercase().ends_with(&suffix))
            .collect();

        let selected = select_artifact(&candidates)
            .ok_or_else(|| LlmError::NoArtifactFound(name.to_string()))?
            .to_string();

        let model_dir = self.model_dir(name);
        fs::create_dir_all(&model_dir).await?;

        tracing::info!(model = %name, file = %selected, "Fetching artifact");
        let local_path = match self.hub.fetch_file(name, &selected, &model_dir).await {
            Ok(path) => path,
            Err(e) => {
                // No orphaned partial state
                let _ = fs::remove_dir_all(&model_dir).await;
                return Err(e);
            }
        };

        let record = ArtifactRecord {
            name: name.to_string(),
            kind: ArtifactKind::Gguf,
            local_path,
            selected_variant: selected,
            available_variants: candidates,
            created_at: Utc::now(),
        };

        {
            let mut records = self.records.write().await;
            records.insert(name.to_string(), record.clone());
            self.store
                .save(&records)
                .await
                .map_err(LlmError::Persist)?;
        }

        tracing::info!(model = %name, path = %record.local_path.display(), "Artifact fetched");
        Ok(record)
    }

    /// Derived status for `name`, recomputed from the filesystem
    pub async fn status(&self, name: &str) -> ArtifactStatus {
        if self.downloading.lock().await.contains(name) {
            return ArtifactStatus::Downloading;
        }

        let records = self.records.read().await;
        match records.get(name) {
            None => ArtifactStatus::NotFound,
            Some(record) => probe_artifact(&record.local_path),
        }
    }

    /// Get a record by logical name
    pub async fn get(&self, name: &str) -> Option<ArtifactRecord> {
        let records = self.records.read().await;
        records.get(name).cloned()
    }

    /// List all records, ordered by name
    pub async fn list(&self) -> Vec<ArtifactRecord> {
        let records = self.records.read().await;
        let mut entries: Vec<_> = records.values().cloned().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    /// Number of registered models
    pub async fn count(&self) -> usize {
        let records = self.records.read().await;
        records.len()
    }

    /// Delete the record and its on-disk artifact directory
    ///
    /// Returns false when no record exists for `name`.
    pub async fn delete(&self, name: &str) -> Result<bool> {
        let removed = {
            let mut records = self.records.write().await;
            let removed = records.remove(name);
            if removed.is_some() {
                self.store
                    .save(&records)
                    .await
                    .map_err(LlmError::Persist)?;
            }
            removed
        };

        if removed.is_none() {
            return Ok(false);
        }

        let model_dir = self.model_dir(name);
        if model_dir.exists() {
            fs::remove_dir_all(&model_dir).await?;
        }

        tracing::info!(model = %name, "Artifact deleted");
        Ok(true)
    }

    fn model_dir(&self, name: &str) -> PathBuf {
        self.models_dir.join(name.replace('/', "_"))
    }
}

/// Filesystem probe behind [`ArtifactRegistry::status`]
fn probe_artifact(path: &Path) -> ArtifactStatus {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return ArtifactStatus::Corrupted,
    };

    let has_expected_extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(ARTIFACT_EXTENSION))
        .unwrap_or(false);
    if !has_expected_extension {
        return ArtifactStatus::InvalidFormat;
    }

    if metadata.len() < MIN_ARTIFACT_BYTES {
        return ArtifactStatus::Incomplete;
    }

    ArtifactStatus::Ready
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Hub fake that writes a plausible artifact file
    struct MockHub {
        files: Vec<String>,
        list_calls: AtomicUsize,
        fetch_calls: AtomicUsize,
        fail_fetch: bool,
    }

    impl MockHub {
        fn new(files: &[&str]) -> Self {
            Self {
                files: files.iter().map(|s| s.to_string()).collect(),
                list_calls: AtomicUsize::new(0),
                fetch_calls: AtomicUsize::new(0),
                fail_fetch: false,
            }
        }

        fn failing(files: &[&str]) -> Self {
            Self {
                fail_fetch: true,
                ..Self::new(files)
            }
        }
    }

    #[async_trait]
    impl ModelHub for MockHub {
        async fn list_files(&self, _repo_id: &str) -> Result<Vec<String>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.files.clone())
        }

        async fn fetch_file(
            &self,
            repo_id: &str,
            filename: &str,
            dest_dir: &Path,
        ) -> Result<PathBuf> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_fetch {
                return Err(LlmError::Fetch {
                    name: repo_id.to_string(),
                    reason: "simulated transport failure".to_string(),
                });
            }
            let dest = dest_dir.join(filename);
            std::fs::write(&dest, vec![0u8; 4096]).unwrap();
            Ok(dest)
        }
    }

    async fn registry_with(hub: Arc<MockHub>) -> (ArtifactRegistry, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let registry = ArtifactRegistry::open(
            dir.path().join("models"),
            dir.path().join("models/registry.toml"),
            hub,
        )
        .await
        .unwrap();
        (registry, dir)
    }

    #[tokio::test]
    async fn test_fetch_selects_variant_and_persists() {
        let hub = Arc::new(MockHub::new(&[
            "README.md",
            "model-f16.gguf",
            "model-q4_0.gguf",
            "model-q8_0.gguf",
        ]));
        let (registry, _dir) = registry_with(hub).await;

        let record = registry.fetch("org/model").await.unwrap();
        assert_eq!(record.selected_variant, "model-q4_0.gguf");
        assert_eq!(record.available_variants.len(), 3);
        assert!(record.local_path.exists());
        assert_eq!(registry.status("org/model").await, ArtifactStatus::Ready);
    }

    #[tokio::test]
    async fn test_fetch_is_idempotent() {
        let hub = Arc::new(MockHub::new(&["model-q4_0.gguf"]));
        let (registry, _dir) = registry_with(hub.clone()).await;

        let first = registry.fetch("org/model").await.unwrap();
        let second = registry.fetch("org/model").await.unwrap();

        assert_eq!(first.local_path, second.local_path);
        // The second call must not touch the hub at all
        assert_eq!(hub.list_calls.load(Ordering::SeqCst), 1);
        assert_eq!(hub.fetch_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_no_artifact_found() {
        let hub = Arc::new(MockHub::new(&["README.md", "config.json"]));
        let (registry, _dir) = registry_with(hub).await;

        let err = registry.fetch("org/model").await.unwrap_err();
        assert!(matches!(err, LlmError::NoArtifactFound(_)));
    }

    #[tokio::test]
    async fn test_fetch_failure_cleans_partial_state() {
        let hub = Arc::new(MockHub::failing(&["model-q4_0.gguf"]));
        let (registry, dir) = registry_with(hub).await;

        assert!(registry.fetch("org/model").await.is_err());
        assert!(!dir.path().join("models/org_model").exists());
        assert_eq!(registry.status("org/model").await, ArtifactStatus::NotFound);
    }

    #[tokio::test]
    async fn test_status_derivation_from_disk() {
        let hub = Arc::new(MockHub::new(&["model-q4_0.gguf"]));
        let (registry, _dir) = registry_with(hub).await;

        let record = registry.fetch("org/model").await.unwrap();
        assert_eq!(registry.status("org/model").await, ArtifactStatus::Ready);

        // Deleting the file out-of-band flips the status even though the
        // record is still present
        std::fs::remove_file(&record.local_path).unwrap();
        assert_eq!(
            registry.status("org/model").await,
            ArtifactStatus::Corrupted
        );
        assert!(registry.get("org/model").await.is_some());
    }

    #[tokio::test]
    async fn test_status_incomplete_for_tiny_file() {
        let hub = Arc::new(MockHub::new(&["model-q4_0.gguf"]));
        let (registry, _dir) = registry_with(hub).await;

        let record = registry.fetch("org/model").await.unwrap();
        std::fs::write(&record.local_path, b"stub").unwrap();
        assert_eq!(
            registry.status("org/model").await,
            ArtifactStatus::Incomplete
        );
    }

    #[tokio::test]
    async fn test_status_unknown_name() {
        let hub = Arc::new(MockHub::new(&[]));
        let (registry, _dir) = registry_with(hub).await;
        assert_eq!(registry.status("nobody/nothing").await, ArtifactStatus::NotFound);
    }

    #[tokio::test]
    async fn test_delete_removes_record_and_files() {
        let hub = Arc::new(MockHub::new(&["model-q4_0.gguf"]));
        let (registry, dir) = registry_with(hub).await;

        registry.fetch("org/model").await.unwrap();
        assert_eq!(registry.list().await.len(), 1);

        assert!(registry.delete("org/model").await.unwrap());
        assert!(registry.list().await.is_empty());
        assert!(!dir.path().join("models/org_model").exists());

        // Second delete is a no-op
        assert!(!registry.delete("org/model").await.unwrap());
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let models_dir = dir.path().join("models");
        let registry_file = models_dir.join("registry.toml");

        {
            let hub = Arc::new(MockHub::new(&["model-q4_0.gguf"]));
            let registry =
                ArtifactRegistry::open(models_dir.clone(), registry_file.clone(), hub)
                    .await
                    .unwrap();
            registry.fetch("org/model").await.unwrap();
        }

        let hub = Arc::new(MockHub::new(&[]));
        let reopened = ArtifactRegistry::open(models_dir, registry_file, hub)
            .await
            .unwrap();
        let record = reopened.get("org/model").await.unwrap();
        assert_eq!(record.selected_variant, "model-q4_0.gguf");
        assert_eq!(reopened.status("org/model").await, ArtifactStatus::Ready);
    }

    #[test]
    fn test_probe_invalid_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.bin");
        std::fs::write(&path, vec![0u8; 4096]).unwrap();
        assert_eq!(probe_artifact(&path), ArtifactStatus::InvalidFormat);
    }

    #[test]
    fn test_artifact_status_display() {
        assert_eq!(ArtifactStatus::Ready.to_string(), "ready");
        assert_eq!(ArtifactStatus::InvalidFormat.to_string(), "invalid_format");
        assert_eq!(ArtifactStatus::Downloading.to_string(), "downloading");
    }
}
