//! API request and response models

use crate::manager::{LoadedModel, ModelDescription};
use crate::runtime::{ChatMessage, GenerationParams};
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Registered model count
    pub models: usize,
    /// Resident model count
    pub resident: usize,
}

/// Request to pull a model from the remote repository
#[derive(Debug, Serialize, Deserialize)]
pub struct PullModelRequest {
    pub model_name: String,

    /// Accepted for compatibility; artifact kind detection is automatic
    #[serde(default)]
    pub kind: Option<String>,
}

/// Request for plain text generation
#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model_name: String,
    pub prompt: String,

    #[serde(flatten)]
    pub params: GenerationParams,
}

/// Request for chat completion, streaming or not
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model_name: String,
    pub messages: Vec<ChatMessage>,

    #[serde(flatten)]
    pub params: GenerationParams,
}

/// Registered models with derived status
#[derive(Debug, Serialize)]
pub struct ModelListResponse {
    pub models: Vec<ModelDescription>,
    pub total: usize,
}

/// Currently resident models
#[derive(Debug, Serialize)]
pub struct LoadedListResponse {
    pub models: Vec<LoadedModel>,
    pub total: usize,
}
