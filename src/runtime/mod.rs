//! Inference runtime call contract
//!
//! The lifecycle core never touches token sampling itself; it drives an
//! [`InferenceRuntime`] that constructs exclusively owned [`RuntimeHandle`]s
//! from on-disk artifacts. Handles are synchronous and single-threaded by
//! contract; the pool serializes access and moves calls onto blocking
//! workers.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

#[cfg(feature = "llama")]
pub mod llama;

/// Parameters used to construct a runtime handle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Context window size in tokens
    pub context_length: u32,
    /// Worker threads for token generation (0 = auto-detect)
    pub n_threads: u32,
    /// Layers to offload to an accelerator (0 = CPU only unless Metal)
    pub n_gpu_layers: u32,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            context_length: 2048,
            n_threads: 0,
            n_gpu_layers: 0,
        }
    }
}

/// Sampling parameters for a single generation or chat call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_repeat_penalty")]
    pub repeat_penalty: f32,
    /// Stop sequences; when empty the pool substitutes its default set
    #[serde(default)]
    pub stop: Vec<String>,
    /// Carried and echoed for API compatibility; the runtime produces a
    /// single sequence regardless
    #[serde(default = "default_num_return_sequences")]
    pub num_return_sequences: u32,
    /// Sampling seed; None lets the runtime pick one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u32>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            repeat_penalty: default_repeat_penalty(),
            stop: Vec::new(),
            num_return_sequences: default_num_return_sequences(),
            seed: None,
        }
    }
}

fn default_max_tokens() -> u32 {
    32768
}
fn default_temperature() -> f32 {
    0.7
}
fn default_top_p() -> f32 {
    0.9
}
fn default_top_k() -> u32 {
    40
}
fn default_repeat_penalty() -> f32 {
    1.1
}
fn default_num_return_sequences() -> u32 {
    1
}

/// One turn in a chat conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Why a generation call stopped producing tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// A stop sequence or end-of-generation token was hit
    Stop,
    /// The max_tokens budget was exhausted
    Length,
    /// The runtime reported a failure mid-generation
    Error,
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stop => write!(f, "stop"),
            Self::Length => write!(f, "length"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Token accounting as reported by the runtime
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Raw output of a single runtime call
#[derive(Debug, Clone)]
pub struct CompletionOutput {
    pub text: String,
    pub usage: TokenUsage,
    pub finish_reason: FinishReason,
}

/// Factory for runtime handles
///
/// Construction is blocking (weights are mapped into memory); the pool calls
/// it from a blocking worker.
pub trait InferenceRuntime: Send + Sync {
    fn construct(&self, path: &Path, config: &LoadConfig) -> Result<Box<dyn RuntimeHandle>>;
}

/// An exclusively owned, resident model instance
///
/// Not reentrant: callers must serialize access. Methods take `&mut self` to
/// make that explicit at the type level.
pub trait RuntimeHandle: Send {
    /// Plain text completion
    fn complete(&mut self, prompt: &str, params: &GenerationParams) -> Result<CompletionOutput>;

    /// Chat completion over a message sequence
    fn chat(&mut self, messages: &[ChatMessage], params: &GenerationParams)
    -> Result<CompletionOutput>;

    /// Streaming chat completion
    ///
    /// `on_delta` is invoked once per decoded text fragment; returning false
    /// cancels generation cooperatively. The returned output carries the full
    /// accumulated text and the terminal finish reason.
    fn chat_stream(
        &mut self,
        messages: &[ChatMessage],
        params: &GenerationParams,
        on_delta: &mut dyn FnMut(&str) -> bool,
    ) -> Result<CompletionOutput>;
}

/// Production runtime for this build
#[cfg(feature = "llama")]
pub fn default_runtime() -> anyhow::Result<Arc<dyn InferenceRuntime>> {
    Ok(Arc::new(llama::LlamaRuntime::new()))
}

/// Production runtime for this build
///
/// Without the `llama` feature there is no inference backend compiled in;
/// registry-only commands still work but serving cannot start.
#[cfg(not(feature = "llama"))]
pub fn default_runtime() -> anyhow::Result<Arc<dyn InferenceRuntime>> {
    anyhow::bail!("no inference backend compiled in; rebuild with --features llama")
}
