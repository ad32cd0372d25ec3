//! llm-manager - local model serving control plane
//!
//! Fetches quantized GGUF artifacts from HuggingFace Hub, tracks their
//! on-disk state, loads them into an in-process inference pool, and
//! dispatches generation and chat requests to resident models.

pub mod api;
pub mod config;
pub mod device;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod models;
pub mod pool;
pub mod runtime;

pub use config::ManagerConfig;
pub use error::{LlmError, Result};
pub use manager::{LifecycleManager, LoadedModel, ModelDescription};
pub use models::{
    ArtifactKind, ArtifactRecord, ArtifactRegistry, ArtifactStatus, HfHub, ModelHub,
};
pub use pool::{
    ChatChunk, ChatResult, ChatStream, GenerationResult, InferencePool, ResidentInfo,
};
pub use runtime::{
    ChatMessage, CompletionOutput, FinishReason, GenerationParams, InferenceRuntime, LoadConfig,
    RuntimeHandle, TokenUsage,
};
