//! Lifecycle manager: the orchestration layer callers actually use
//!
//! Resolves logical model names to artifacts via the registry, verifies
//! readiness, ensures a resident handle exists in the pool (auto-load on
//! first use), and forwards generation requests, tagging results with the
//! logical name. Owns no persistent state itself; one instance is
//! constructed at startup and injected into the HTTP handlers and CLI.

use crate::error::{LlmError, Result};
use crate::metrics;
use crate::models::{ArtifactRecord, ArtifactRegistry, ArtifactStatus};
use crate::pool::{ChatResult, ChatStream, GenerationResult, InferencePool, ResidentInfo};
use crate::runtime::{ChatMessage, GenerationParams};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// A registry record joined with its derived status and residency
#[derive(Debug, Clone, Serialize)]
pub struct ModelDescription {
    #[serde(flatten)]
    pub record: ArtifactRecord,
    pub status: ArtifactStatus,
    pub loaded: bool,
}

/// A resident model joined back to its logical name
#[derive(Debug, Clone, Serialize)]
pub struct LoadedModel {
    /// None when the artifact was deleted from the registry while loaded
    pub name: Option<String>,
    pub path: PathBuf,
    pub context_length: u32,
    pub loaded_at: DateTime<Utc>,
}

/// Process-wide orchestrator over the artifact registry and inference pool
pub struct LifecycleManager {
    registry: Arc<ArtifactRegistry>,
    pool: Arc<InferencePool>,
}

impl LifecycleManager {
    pub fn new(registry: Arc<ArtifactRegistry>, pool: Arc<InferencePool>) -> Self {
        Self { registry, pool }
    }

    pub fn registry(&self) -> &Arc<ArtifactRegistry> {
        &self.registry
    }

    /// Fetch an artifact and verify it came out ready
    pub async fn pull(&self, name: &str) -> Result<ArtifactRecord> {
        let record = self.registry.fetch(name).await?;

        match self.registry.status(name).await {
            ArtifactStatus::Ready => {
                metrics::record_model_pulled(name);
                Ok(record)
            }
            status => Err(LlmError::NotReady {
                name: name.to_string(),
                status,
            }),
        }
    }

    /// Resolve a name to its record, requiring Ready status
    async fn resolve_ready(&self, name: &str) -> Result<ArtifactRecord> {
        let record = self
            .registry
            .get(name)
            .await
            .ok_or_else(|| LlmError::ModelNotFound(name.to_string()))?;

        match self.registry.status(name).await {
            ArtifactStatus::Ready => Ok(record),
            status => Err(LlmError::NotReady {
                name: name.to_string(),
                status,
            }),
        }
    }

    /// Explicitly load a model into the pool; idempotent if already loaded
    pub async fn load_by_name(&self, name: &str) -> Result<ResidentInfo> {
        let record = self.resolve_ready(name).await?;
        let info = self.pool.load(&record.local_path).await?;
        metrics::record_model_loaded(name);
        metrics::update_resident_count(self.pool.list_loaded().len());
        Ok(info)
    }

    /// Generate text, auto-loading the artifact on first use
    pub async fn generate(
        &self,
        name: &str,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<GenerationResult> {
        let record = self.resolve_ready(name).await?;
        self.pool.load(&record.local_path).await?;

        let mut result = self.pool.generate(&record.local_path, prompt, params).await?;
        result.model = name.to_string();

        metrics::record_generation(name, result.usage.completion_tokens);
        Ok(result)
    }

    /// Chat completion, auto-loading the artifact on first use
    pub async fn chat(
        &self,
        name: &str,
        messages: Vec<ChatMessage>,
        params: &GenerationParams,
    ) -> Result<ChatResult> {
        let record = self.resolve_ready(name).await?;
        self.pool.load(&record.local_path).await?;

        let mut result = self.pool.chat(&record.local_path, messages, params).await?;
        result.model = name.to_string();

        metrics::record_generation(name, result.usage.completion_tokens);
        Ok(result)
    }

    /// Streaming chat completion, auto-loading the artifact on first use
    pub async fn chat_stream(
        &self,
        name: &str,
        messages: Vec<ChatMessage>,
        params: &GenerationParams,
    ) -> Result<ChatStream> {
        let record = self.resolve_ready(name).await?;
        self.pool.load(&record.local_path).await?;

        let stream = self
            .pool
            .chat_stream(&record.local_path, messages, params)
            .await?;

        let model = name.to_string();
        let tagged = stream.map(move |chunk| {
            chunk.map(|mut c| {
                c.model = model.clone();
                c
            })
        });

        Ok(Box::pin(tagged))
    }

    /// Unload a model by logical name
    ///
    /// Returns false when the model was registered but not resident.
    pub async fn unload_by_name(&self, name: &str) -> Result<bool> {
        let record = self
            .registry
            .get(name)
            .await
            .ok_or_else(|| LlmError::ModelNotFound(name.to_string()))?;

        let unloaded = self.pool.unload(&record.local_path).await;
        if unloaded {
            metrics::record_model_unloaded(name);
            metrics::update_resident_count(self.pool.list_loaded().len());
        }
        Ok(unloaded)
    }

    /// Delete a model's artifact and record
    ///
    /// Unloads first, best-effort: deletion proceeds whether or not a handle
    /// was resident.
    pub async fn delete_by_name(&self, name: &str) -> Result<()> {
        if let Some(record) = self.registry.get(name).await {
            self.pool.unload(&record.local_path).await;
        }

        if self.registry.delete(name).await? {
            metrics::record_model_deleted(name);
            metrics::update_model_count(self.registry.count().await);
            Ok(())
        } else {
            Err(LlmError::ModelNotFound(name.to_string()))
        }
    }

    /// Describe one model: record plus derived status and residency
    pub async fn describe(&self, name: &str) -> Option<ModelDescription> {
        let record = self.registry.get(name).await?;
        let status = self.registry.status(name).await;
        let loaded = self.pool.is_loaded(&record.local_path);
        Some(ModelDescription {
            record,
            status,
            loaded,
        })
    }

    /// Describe all registered models, ordered by name
    pub async fn list_models(&self) -> Vec<ModelDescription> {
        let mut descriptions = Vec::new();
        for record in self.registry.list().await {
            let status = self.registry.status(&record.name).await;
            let loaded = self.pool.is_loaded(&record.local_path);
            descriptions.push(ModelDescription {
                record,
                status,
                loaded,
            });
        }
        descriptions
    }

    /// Resident models joined back to their logical names
    pub async fn list_loaded(&self) -> Vec<LoadedModel> {
        let records = self.registry.list().await;
        self.pool
            .list_loaded()
            .into_iter()
            .map(|info| LoadedModel {
                name: records
                    .iter()
                    .find(|r| r.local_path == info.path)
                    .map(|r| r.name.clone()),
                path: info.path,
                context_length: info.context_length,
                loaded_at: info.loaded_at,
            })
            .collect()
    }

    /// Unload every resident model
    pub async fn clear_all(&self) {
        self.pool.clear_all().await;
        metrics::update_resident_count(0);
    }

    /// Graceful shutdown: release all resident handles
    pub async fn shutdown(&self) {
        tracing::info!("Releasing resident models");
        self.clear_all().await;
    }
}
