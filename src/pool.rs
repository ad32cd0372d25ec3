//! In-process inference pool
//!
//! Holds resident model handles keyed by artifact path. Each handle carries
//! an exclusive-use lock: generation, chat, and streaming calls hold it for
//! their full span (moved into a blocking worker as an owned guard), and
//! unload acquires it before the runtime resource is released. Loads are
//! single-flight per path. The pool never loads implicitly; that is the
//! lifecycle manager's job.

use crate::error::{LlmError, Result};
use crate::runtime::{
    ChatMessage, FinishReason, GenerationParams, InferenceRuntime, LoadConfig, RuntimeHandle,
    TokenUsage,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::Stream;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell, OwnedMutexGuard, mpsc};
use tokio_stream::wrappers::ReceiverStream;

/// Stop set applied when a generate call supplies none, so unconstrained
/// generation ends on natural paragraph boundaries instead of running to
/// max_tokens
pub const DEFAULT_STOP_SEQUENCES: [&str; 3] = ["</s>", "<|endoftext|>", "\n\n"];

/// Result of a plain generation call
#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    /// Logical model name, tagged by the lifecycle manager
    pub model: String,
    pub text: String,
    /// Echo of the effective parameters, default stops included
    pub parameters: GenerationParams,
    pub usage: TokenUsage,
    pub finish_reason: FinishReason,
}

/// Result of a chat completion call
#[derive(Debug, Clone, Serialize)]
pub struct ChatResult {
    pub model: String,
    pub content: String,
    pub usage: TokenUsage,
    pub finish_reason: FinishReason,
}

/// One increment of a streaming chat response
///
/// Carries both the delta and the running concatenation so a consumer can
/// render incrementally without re-accumulating. The final chunk has `done`
/// set, the full response as `content`, and a terminal finish reason.
#[derive(Debug, Clone, Serialize)]
pub struct ChatChunk {
    pub model: String,
    pub delta: String,
    pub content: String,
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

/// Finite, non-restartable chunk sequence of one streaming chat call
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatChunk>> + Send>>;

/// Description of one resident model
#[derive(Debug, Clone, Serialize)]
pub struct ResidentInfo {
    pub path: PathBuf,
    pub context_length: u32,
    pub load_config: LoadConfig,
    pub loaded_at: DateTime<Utc>,
}

/// A loaded model instance and its exclusive-use lock
struct ResidentModel {
    path: PathBuf,
    load_config: LoadConfig,
    loaded_at: DateTime<Utc>,
    handle: Arc<Mutex<Box<dyn RuntimeHandle>>>,
}

impl ResidentModel {
    fn info(&self) -> ResidentInfo {
        ResidentInfo {
            path: self.path.clone(),
            context_length: self.load_config.context_length,
            load_config: self.load_config.clone(),
            loaded_at: self.loaded_at,
        }
    }
}

/// Per-path slot; the cell provides the single-flight load guarantee
struct Slot {
    cell: Arc<OnceCell<Arc<ResidentModel>>>,
}

impl Slot {
    fn new() -> Self {
        Self {
            cell: Arc::new(OnceCell::new()),
        }
    }

    fn resident(&self) -> Option<Arc<ResidentModel>> {
        self.cell.get().cloned()
    }
}

/// Pool of resident model handles keyed by artifact path
pub struct InferencePool {
    runtime: Arc<dyn InferenceRuntime>,
    defaults: LoadConfig,
    max_resident: Option<usize>,
    slots: DashMap<PathBuf, Slot>,
}

impl InferencePool {
    pub fn new(
        runtime: Arc<dyn InferenceRuntime>,
        defaults: LoadConfig,
        max_resident: Option<usize>,
    ) -> Self {
        Self {
            runtime,
            defaults,
            max_resident,
            slots: DashMap::new(),
        }
    }

    /// Load the artifact at `path` into the pool
    ///
    /// Idempotent for an already-resident path. Concurrent calls for the
    /// same unloaded path collapse into one runtime construction and all
    /// callers observe the same handle.
    pub async fn load(&self, path: &Path) -> Result<ResidentInfo> {
        if !path.exists() {
            return Err(LlmError::ArtifactMissing(path.to_path_buf()));
        }

        let cell = {
            let slot = self
                .slots
                .entry(path.to_path_buf())
                .or_insert_with(Slot::new);
            slot.cell.clone()
            // shard guard drops here, before any await
        };

        match cell.get_or_try_init(|| self.construct(path)).await {
            Ok(resident) => Ok(resident.info()),
            Err(e) => {
                // A failed construction must not leave a dead slot behind
                self.slots.remove_if(path, |_, slot| {
                    Arc::ptr_eq(&slot.cell, &cell) && slot.cell.get().is_none()
                });
                Err(e)
            }
        }
    }

    async fn construct(&self, path: &Path) -> Result<Arc<ResidentModel>> {
        if let Some(max) = self.max_resident {
            let resident_now = self
                .slots
                .iter()
                .filter(|entry| entry.value().cell.get().is_some())
                .count();
            if resident_now >= max {
                return Err(LlmError::Load {
                    path: path.to_path_buf(),
                    reason: format!("maximum resident model count ({max}) reached"),
                });
            }
        }

        let runtime = self.runtime.clone();
        let config = self.defaults.clone();
        let path_buf = path.to_path_buf();

        tracing::info!(
            path = %path_buf.display(),
            context_length = config.context_length,
            "Loading model into pool"
        );

        let handle = tokio::task::spawn_blocking(move || runtime.construct(&path_buf, &config))
            .await
            .map_err(|e| LlmError::Load {
                path: path.to_path_buf(),
                reason: format!("load task failed: {e}"),
            })??;

        Ok(Arc::new(ResidentModel {
            path: path.to_path_buf(),
            load_config: self.defaults.clone(),
            loaded_at: Utc::now(),
            handle: Arc::new(Mutex::new(handle)),
        }))
    }

    /// Release the handle for `path`
    ///
    /// Acquires the handle's exclusive-use lock first, so an in-flight
    /// generation always completes before the runtime resource goes away.
    /// Returns false when nothing was resident.
    pub async fn unload(&self, path: &Path) -> bool {
        let Some((_, slot)) = self.slots.remove(path) else {
            return false;
        };
        let Some(resident) = slot.resident() else {
            return false;
        };

        let inflight = resident.handle.lock().await;
        drop(inflight);

        tracing::info!(path = %path.display(), "Model unloaded");
        true
    }

    /// Whether a handle for `path` is resident
    pub fn is_loaded(&self, path: &Path) -> bool {
        self.slots
            .get(path)
            .map(|slot| slot.cell.get().is_some())
            .unwrap_or(false)
    }

    /// Descriptions of all resident models, ordered by path
    pub fn list_loaded(&self) -> Vec<ResidentInfo> {
        let mut loaded: Vec<ResidentInfo> = self
            .slots
            .iter()
            .filter_map(|entry| entry.value().resident().map(|r| r.info()))
            .collect();
        loaded.sort_by(|a, b| a.path.cmp(&b.path));
        loaded
    }

    /// Unload every resident model, releasing all runtime resources
    pub async fn clear_all(&self) {
        let paths: Vec<PathBuf> = self.slots.iter().map(|entry| entry.key().clone()).collect();
        for path in paths {
            self.unload(&path).await;
        }
    }

    /// Plain text generation against a resident handle
    pub async fn generate(
        &self,
        path: &Path,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<GenerationResult> {
        let resident = self.resident(path)?;

        let mut params = params.clone();
        if params.stop.is_empty() {
            params.stop = DEFAULT_STOP_SEQUENCES
                .iter()
                .map(|s| s.to_string())
                .collect();
        }

        let guard = resident.handle.clone().lock_owned().await;
        let prompt = prompt.to_string();
        let runtime_params = params.clone();
        let output =
            run_blocking(guard, move |handle| handle.complete(&prompt, &runtime_params)).await?;

        Ok(GenerationResult {
            model: String::new(),
            text: output.text,
            parameters: params,
            usage: output.usage,
            finish_reason: output.finish_reason,
        })
    }

    /// Chat completion against a resident handle
    pub async fn chat(
        &self,
        path: &Path,
        messages: Vec<ChatMessage>,
        params: &GenerationParams,
    ) -> Result<ChatResult> {
        let resident = self.resident(path)?;

        let guard = resident.handle.clone().lock_owned().await;
        let params = params.clone();
        let output = run_blocking(guard, move |handle| handle.chat(&messages, &params)).await?;

        Ok(ChatResult {
            model: String::new(),
            content: output.text,
            usage: output.usage,
            finish_reason: output.finish_reason,
        })
    }

    /// Streaming chat completion against a resident handle
    ///
    /// The producer runs on a blocking worker holding the handle's owned
    /// lock guard. If the consumer drops the stream, the next delta send
    /// fails, the producer stops, and the guard drop releases the lock.
    /// Every exit path releases it.
    pub async fn chat_stream(
        &self,
        path: &Path,
        messages: Vec<ChatMessage>,
        params: &GenerationParams,
    ) -> Result<ChatStream> {
        let resident = self.resident(path)?;

        let guard = resident.handle.clone().lock_owned().await;
        let params = params.clone();
        let (tx, rx) = mpsc::channel::<Result<ChatChunk>>(32);

        tokio::task::spawn_blocking(move || {
            let mut guard = guard;
            let mut content = String::new();
            let delta_tx = tx.clone();

            let result = guard.chat_stream(&messages, &params, &mut |delta| {
                content.push_str(delta);
                delta_tx
                    .blocking_send(Ok(ChatChunk {
                        model: String::new(),
                        delta: delta.to_string(),
                        content: content.clone(),
                        done: false,
                        finish_reason: None,
                    }))
                    .is_ok()
            });

            match result {
                Ok(output) => {
                    let _ = tx.blocking_send(Ok(ChatChunk {
                        model: String::new(),
                        delta: String::new(),
                        content: output.text,
                        done: true,
                        finish_reason: Some(output.finish_reason),
                    }));
                }
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                }
            }
            // guard drops here: the lock releases however the stream ended
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    fn resident(&self, path: &Path) -> Result<Arc<ResidentModel>> {
        self.slots
            .get(path)
            .and_then(|slot| slot.resident())
            .ok_or_else(|| LlmError::NotLoaded(path.to_path_buf()))
    }
}

/// Run one runtime call on a blocking worker while holding the owned guard
async fn run_blocking<T, F>(mut guard: OwnedMutexGuard<Box<dyn RuntimeHandle>>, call: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut dyn RuntimeHandle) -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let result = call(&mut **guard);
        drop(guard);
        result
    })
    .await
    .map_err(|e| LlmError::Runtime(format!("generation task failed: {e}")))?
}
