//! llama-cpp-2 backed inference runtime for GGUF artifacts
//!
//! Model loading, context creation, and the token sampling loop via the
//! llama-cpp-2 Rust bindings. One context is created per call, so a handle
//! stays reusable across generations; the pool guarantees calls never
//! overlap on the same handle.

use std::num::NonZeroU32;
use std::path::Path;
use std::sync::{Mutex as StdMutex, OnceLock};

use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel};
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::token::LlamaToken;

use crate::device;
use crate::error::{LlmError, Result};
use crate::runtime::{
    ChatMessage, CompletionOutput, FinishReason, GenerationParams, InferenceRuntime, LoadConfig,
    RuntimeHandle, TokenUsage,
};

/// The llama.cpp backend is process-global and must be initialized exactly
/// once; every handle borrows it from here.
fn global_backend() -> Result<&'static LlamaBackend> {
    static BACKEND: OnceLock<LlamaBackend> = OnceLock::new();
    static INIT: StdMutex<()> = StdMutex::new(());

    if let Some(backend) = BACKEND.get() {
        return Ok(backend);
    }

    let _guard = INIT.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(backend) = BACKEND.get() {
        return Ok(backend);
    }

    let backend = LlamaBackend::init()
        .map_err(|e| LlmError::Runtime(format!("llama backend init: {e}")))?;
    Ok(BACKEND.get_or_init(|| backend))
}

/// Runtime factory for GGUF models
pub struct LlamaRuntime;

impl LlamaRuntime {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LlamaRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceRuntime for LlamaRuntime {
    fn construct(&self, path: &Path, config: &LoadConfig) -> Result<Box<dyn RuntimeHandle>> {
        let backend = global_backend()?;

        let n_gpu_layers = resolve_gpu_layers(config.n_gpu_layers);
        let model_params = LlamaModelParams::default().with_n_gpu_layers(n_gpu_layers);

        let model = LlamaModel::load_from_file(backend, path, &model_params).map_err(|e| {
            LlmError::Load {
                path: path.to_path_buf(),
                reason: format!("load: {e}"),
            }
        })?;

        let n_threads = resolve_threads(config.n_threads);
        tracing::info!(
            path = %path.display(),
            n_ctx = config.context_length,
            n_threads,
            n_gpu_layers,
            "GGUF model loaded"
        );

        Ok(Box::new(LlamaHandle {
            backend,
            model,
            n_ctx: config.context_length,
            n_threads,
        }))
    }
}

/// Holds the loaded llama-cpp-2 model and a reference to the backend
pub struct LlamaHandle {
    backend: &'static LlamaBackend,
    model: LlamaModel,
    n_ctx: u32,
    n_threads: i32,
}

// SAFETY: LlamaModel and LlamaBackend are Send+Sync in llama-cpp-2.
unsafe impl Send for LlamaHandle {}

impl RuntimeHandle for LlamaHandle {
    fn complete(&mut self, prompt: &str, params: &GenerationParams) -> Result<CompletionOutput> {
        self.run(prompt, params, &mut |_| true)
    }

    fn chat(
        &mut self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<CompletionOutput> {
        let prompt = render_chat_prompt(messages);
        let params = chat_params(params);
        self.run(&prompt, &params, &mut |_| true)
    }

    fn chat_stream(
        &mut self,
        messages: &[ChatMessage],
        params: &GenerationParams,
        on_delta: &mut dyn FnMut(&str) -> bool,
    ) -> Result<CompletionOutput> {
        let prompt = render_chat_prompt(messages);
        let params = chat_params(params);
        self.run(&prompt, &params, on_delta)
    }
}

impl LlamaHandle {
    /// The shared sampling loop behind all three call forms
    fn run(
        &self,
        prompt: &str,
        params: &GenerationParams,
        on_delta: &mut dyn FnMut(&str) -> bool,
    ) -> Result<CompletionOutput> {
        let tokens = self.tokenize(prompt)?;
        let prompt_tokens = u32::try_from(tokens.len()).unwrap_or(u32::MAX);

        let mut ctx = self.create_context()?;
        let mut batch = LlamaBatch::new(tokens.len().max(1), 1);
        add_seq(&mut batch, &tokens)?;
        decode(&mut ctx, &mut batch)?;

        let mut sampler = build_sampler(params);
        sampler.accept_many(tokens.iter().copied());

        let mut decoder = encoding_rs::UTF_8.new_decoder();
        let mut text = String::new();
        let mut completion_tokens = 0u32;
        let mut finish_reason = FinishReason::Length;
        let mut pos = tokens.len() as i32;

        'generate: for _ in 0..params.max_tokens {
            // Use -1 to sample from the last token that had logits computed
            let tok = sampler.sample(&ctx, -1);
            sampler.accept(tok);

            if self.model.is_eog_token(tok) {
                finish_reason = FinishReason::Stop;
                break;
            }

            let piece = self
                .model
                .token_to_piece(tok, &mut decoder, false, None)
                .map_err(|e| LlmError::Runtime(format!("detok: {e}")))?;
            completion_tokens += 1;
            text.push_str(&piece);

            // A stop sequence may span token boundaries; scan the tail window
            for stop in &params.stop {
                if let Some(idx) = find_stop(&text, stop, stop.len() + piece.len()) {
                    text.truncate(idx);
                    finish_reason = FinishReason::Stop;
                    break 'generate;
                }
            }

            if !on_delta(&piece) {
                // Consumer abandoned the stream
                finish_reason = FinishReason::Stop;
                break;
            }

            batch.clear();
            add_one(&mut batch, tok, pos)?;
            decode(&mut ctx, &mut batch)?;
            pos += 1;
        }

        Ok(CompletionOutput {
            text,
            usage: TokenUsage::new(prompt_tokens, completion_tokens),
            finish_reason,
        })
    }

    fn tokenize(&self, text: &str) -> Result<Vec<LlamaToken>> {
        self.model
            .str_to_token(text, AddBos::Always)
            .map_err(|e| LlmError::Runtime(format!("tokenize: {e}")))
    }

    fn create_context(&self) -> Result<LlamaContext<'_>> {
        // Same thread count for prompt and generation; llama.cpp optimizes
        // internally based on workload
        let params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(self.n_ctx))
            .with_n_threads(self.n_threads)
            .with_n_threads_batch(self.n_threads);
        self.model
            .new_context(self.backend, params)
            .map_err(|e| LlmError::Runtime(format!("ctx: {e}")))
    }
}

/// Locate a stop sequence near the end of the accumulated text
fn find_stop(text: &str, stop: &str, window: usize) -> Option<usize> {
    if stop.is_empty() {
        return None;
    }
    let mut start = text.len().saturating_sub(window);
    while start > 0 && !text.is_char_boundary(start) {
        start -= 1;
    }
    text[start..].find(stop).map(|idx| start + idx)
}

/// ChatML framing, the llama.cpp fallback template
fn render_chat_prompt(messages: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    for message in messages {
        prompt.push_str("<|im_start|>");
        prompt.push_str(&message.role);
        prompt.push('\n');
        prompt.push_str(&message.content);
        prompt.push_str("<|im_end|>\n");
    }
    prompt.push_str("<|im_start|>assistant\n");
    prompt
}

/// Chat turns end at the template's end-of-turn marker
fn chat_params(params: &GenerationParams) -> GenerationParams {
    let mut params = params.clone();
    if !params.stop.iter().any(|s| s == "<|im_end|>") {
        params.stop.push("<|im_end|>".to_string());
    }
    params
}

fn add_seq(batch: &mut LlamaBatch, tokens: &[LlamaToken]) -> Result<()> {
    // Only the last prompt token needs logits; we sample from it
    let n = tokens.len();
    for (i, &tok) in tokens.iter().enumerate() {
        let logits = i == n - 1;
        batch
            .add(tok, i as i32, &[0], logits)
            .map_err(|e| LlmError::Runtime(format!("batch: {e}")))?;
    }
    Ok(())
}

fn add_one(batch: &mut LlamaBatch, tok: LlamaToken, pos: i32) -> Result<()> {
    batch
        .add(tok, pos, &[0], true)
        .map_err(|e| LlmError::Runtime(format!("batch: {e}")))
}

fn decode(ctx: &mut LlamaContext<'_>, batch: &mut LlamaBatch) -> Result<()> {
    ctx.decode(batch)
        .map_err(|e| LlmError::Runtime(format!("decode: {e}")))
}

fn build_sampler(params: &GenerationParams) -> LlamaSampler {
    let mut chain = Vec::new();
    if params.repeat_penalty > 1.0 {
        chain.push(LlamaSampler::penalties(64, params.repeat_penalty, 0.0, 0.0));
    }
    if params.top_k > 0 {
        chain.push(LlamaSampler::top_k(params.top_k as i32));
    }
    chain.push(LlamaSampler::top_p(params.top_p, 1));
    chain.push(LlamaSampler::temp(params.temperature));
    // u32::MAX selects llama.cpp's time-based seed
    chain.push(LlamaSampler::dist(params.seed.unwrap_or(u32::MAX)));
    LlamaSampler::chain_simple(chain)
}

fn resolve_threads(n: u32) -> i32 {
    if n == 0 {
        // Inference is memory-bound; hyperthreads help hide latency but
        // returns diminish past 16 cores
        let logical = num_cpus::get();
        let optimal = logical.clamp(1, 16);
        i32::try_from(optimal).unwrap_or(4)
    } else {
        i32::try_from(n).unwrap_or(4)
    }
}

fn resolve_gpu_layers(configured: u32) -> u32 {
    if configured == 0 && device::get_or_init().supports_metal {
        // Offload everything on Apple silicon
        u32::MAX
    } else {
        configured
    }
}
