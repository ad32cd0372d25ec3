//! Shared test doubles for the lifecycle integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use llm_manager::{
    ArtifactRegistry, ChatMessage, CompletionOutput, FinishReason, GenerationParams,
    InferencePool, InferenceRuntime, LifecycleManager, LlmError, LoadConfig, ModelHub, Result,
    RuntimeHandle, TokenUsage,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// Hub fake serving a fixed file listing and writing plausible artifacts
pub struct MockHub {
    pub files: Vec<String>,
    pub list_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
}

impl MockHub {
    pub fn new(files: &[&str]) -> Self {
        Self {
            files: files.iter().map(|s| s.to_string()).collect(),
            list_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
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
        _repo_id: &str,
        filename: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let dest = dest_dir.join(filename);
        std::fs::write(&dest, vec![0u8; 4096]).map_err(LlmError::Io)?;
        Ok(dest)
    }
}

/// Runtime fake that echoes prompts and counts calls
pub struct MockRuntime {
    pub constructs: Arc<AtomicUsize>,
    pub completions: Arc<AtomicUsize>,
    pub fail_construct: bool,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self {
            constructs: Arc::new(AtomicUsize::new(0)),
            completions: Arc::new(AtomicUsize::new(0)),
            fail_construct: false,
        }
    }
}

impl InferenceRuntime for MockRuntime {
    fn construct(&self, path: &Path, _config: &LoadConfig) -> Result<Box<dyn RuntimeHandle>> {
        self.constructs.fetch_add(1, Ordering::SeqCst);
        if self.fail_construct {
            return Err(LlmError::Load {
                path: path.to_path_buf(),
                reason: "simulated construction failure".to_string(),
            });
        }
        Ok(Box::new(MockHandle {
            completions: self.completions.clone(),
        }))
    }
}

pub struct MockHandle {
    completions: Arc<AtomicUsize>,
}

impl RuntimeHandle for MockHandle {
    fn complete(&mut self, prompt: &str, params: &GenerationParams) -> Result<CompletionOutput> {
        self.completions.fetch_add(1, Ordering::SeqCst);
        Ok(CompletionOutput {
            text: format!("echo: {prompt} (stops: {})", params.stop.len()),
            usage: TokenUsage::new(4, 3),
            finish_reason: FinishReason::Stop,
        })
    }

    fn chat(
        &mut self,
        messages: &[ChatMessage],
        _params: &GenerationParams,
    ) -> Result<CompletionOutput> {
        self.completions.fetch_add(1, Ordering::SeqCst);
        Ok(CompletionOutput {
            text: format!("reply to {} messages", messages.len()),
            usage: TokenUsage::new(6, 4),
            finish_reason: FinishReason::Stop,
        })
    }

    fn chat_stream(
        &mut self,
        _messages: &[ChatMessage],
        _params: &GenerationParams,
        on_delta: &mut dyn FnMut(&str) -> bool,
    ) -> Result<CompletionOutput> {
        self.completions.fetch_add(1, Ordering::SeqCst);
        let mut text = String::new();
        for delta in ["Hi ", "there"] {
            text.push_str(delta);
            if !on_delta(delta) {
                break;
            }
        }
        Ok(CompletionOutput {
            text,
            usage: TokenUsage::new(2, 2),
            finish_reason: FinishReason::Stop,
        })
    }
}

/// A manager wired to mock hub and runtime inside a temp directory
pub struct TestEnv {
    pub manager: Arc<LifecycleManager>,
    pub hub: Arc<MockHub>,
    pub constructs: Arc<AtomicUsize>,
    pub completions: Arc<AtomicUsize>,
    pub dir: TempDir,
}

pub async fn test_env(files: &[&str]) -> TestEnv {
    test_env_with_runtime(files, MockRuntime::new()).await
}

pub async fn test_env_with_runtime(files: &[&str], runtime: MockRuntime) -> TestEnv {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let hub = Arc::new(MockHub::new(files));
    let constructs = runtime.constructs.clone();
    let completions = runtime.completions.clone();

    let models_dir = dir.path().join("models");
    let registry = Arc::new(
        ArtifactRegistry::open(models_dir.clone(), models_dir.join("registry.toml"), hub.clone())
            .await
            .expect("Failed to open registry"),
    );

    let pool = Arc::new(InferencePool::new(
        Arc::new(runtime),
        LoadConfig::default(),
        None,
    ));

    TestEnv {
        manager: Arc::new(LifecycleManager::new(registry, pool)),
        hub,
        constructs,
        completions,
        dir,
    }
}
