//! Artifact download via HuggingFace Hub
//!
//! The core talks to the remote repository through the [`ModelHub`] trait;
//! the production implementation wraps the native Rust hf-hub crate. Files
//! land in the hub cache first and are copied into the model directory with
//! a rename on completion, so a partially transferred artifact never appears
//! under its final name.

use crate::error::{LlmError, Result};
use async_trait::async_trait;
use hf_hub::api::tokio::{Api, ApiBuilder};
use std::path::{Path, PathBuf};
use tokio::fs;

/// File extension expected for downloadable artifacts
pub const ARTIFACT_EXTENSION: &str = "gguf";

/// Quantization tags in selection order: most compressed but still commonly
/// supported first, full precision last
pub const VARIANT_PRIORITY: [&str; 5] = ["q4_0", "q4_1", "q8_0", "f16", "f32"];

/// Pick the artifact to download from a repository's candidate files
///
/// Iterates the fixed priority list and returns the first candidate whose
/// name contains that tag (case-insensitive). Falls back to the first
/// candidate in listing order when no tag matches.
pub fn select_artifact(candidates: &[String]) -> Option<&str> {
    for tag in VARIANT_PRIORITY {
        for file in candidates {
            if file.to_lowercase().contains(tag) {
                return Some(file);
            }
        }
    }
    candidates.first().map(String::as_str)
}

/// Remote repository listing and fetch contract
#[async_trait]
pub trait ModelHub: Send + Sync {
    /// List all filenames offered by a repository
    async fn list_files(&self, repo_id: &str) -> Result<Vec<String>>;

    /// Download one file into `dest_dir`, returning its final local path
    async fn fetch_file(&self, repo_id: &str, filename: &str, dest_dir: &Path)
    -> Result<PathBuf>;
}

/// HuggingFace Hub backed implementation
pub struct HfHub {
    cache_dir: Option<PathBuf>,
}

impl HfHub {
    pub fn new() -> Self {
        Self { cache_dir: None }
    }

    /// Use a custom hub cache directory instead of the default HF cache
    pub fn with_cache_dir(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir: Some(cache_dir),
        }
    }

    fn api(&self, repo_id: &str) -> Result<Api> {
        let built = match &self.cache_dir {
            Some(dir) => ApiBuilder::new().with_cache_dir(dir.clone()).build(),
            None => Api::new(),
        };
        built.map_err(|e| LlmError::Fetch {
            name: repo_id.to_string(),
            reason: format!("failed to create hub client: {e}"),
        })
    }
}

impl Default for HfHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelHub for HfHub {
    async fn list_files(&self, repo_id: &str) -> Result<Vec<String>> {
        let api = self.api(repo_id)?;
        let repo = api.model(repo_id.to_string());

        let info = repo.info().await.map_err(|e| LlmError::Fetch {
            name: repo_id.to_string(),
            reason: format!("repository listing failed: {e}"),
        })?;

        Ok(info.siblings.into_iter().map(|s| s.rfilename).collect())
    }

    async fn fetch_file(
        &self,
        repo_id: &str,
        filename: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf> {
        let api = self.api(repo_id)?;
        let repo = api.model(repo_id.to_string());

        tracing::info!(repo_id = %repo_id, file = %filename, "Downloading file via hf-hub");
        let cached = repo.get(filename).await.map_err(|e| LlmError::Fetch {
            name: repo_id.to_string(),
            reason: format!("failed to download {filename}: {e}"),
        })?;

        // Repository filenames may carry subdirectories
        let dest = dest_dir.join(filename);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Copy out of the hub cache, then rename so the artifact only ever
        // appears under its final name once complete
        let partial = dest.with_extension("part");
        fs::copy(&cached, &partial).await?;
        fs::rename(&partial, &dest).await?;

        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_select_prefers_q4_0() {
        let candidates = files(&["model-f16.gguf", "model-q4_0.gguf", "model-q8_0.gguf"]);
        assert_eq!(select_artifact(&candidates), Some("model-q4_0.gguf"));
    }

    #[test]
    fn test_select_walks_priority_order() {
        let candidates = files(&["model-f32.gguf", "model-q8_0.gguf"]);
        assert_eq!(select_artifact(&candidates), Some("model-q8_0.gguf"));
    }

    #[test]
    fn test_select_is_case_insensitive() {
        let candidates = files(&["Model-Q4_0.GGUF"]);
        assert_eq!(select_artifact(&candidates), Some("Model-Q4_0.GGUF"));
    }

    #[test]
    fn test_select_falls_back_to_first() {
        let candidates = files(&["model-iq3_m.gguf", "model-mystery.gguf"]);
        assert_eq!(select_artifact(&candidates), Some("model-iq3_m.gguf"));
    }

    #[test]
    fn test_select_empty_is_none() {
        assert_eq!(select_artifact(&[]), None);
    }

    #[tokio::test]
    async fn test_api_creation() {
        let hub = HfHub::new();
        assert!(hub.api("org/model").is_ok());
    }

    #[tokio::test]
    async fn test_api_builder_with_cache_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let hub = HfHub::with_cache_dir(temp_dir.path().to_path_buf());
        assert!(hub.api("org/model").is_ok());
    }
}
