//! API request handlers

use super::models::{
    ChatRequest, GenerateRequest, HealthResponse, LoadedListResponse, ModelListResponse,
    PullModelRequest,
};
use super::routes::AppState;
use crate::error::LlmError;
use crate::manager::ModelDescription;
use crate::models::ArtifactRecord;
use crate::pool::{ChatResult, GenerationResult, ResidentInfo};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt};
use std::convert::Infallible;

/// GET /health - Manager health check
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let models = state.manager.registry().count().await;
    let resident = state.manager.list_loaded().await.len();

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now(),
            models,
            resident,
        }),
    )
}

/// GET /metrics - Prometheus metrics
pub async fn metrics(State(state): State<AppState>) -> String {
    state.prometheus_handle.render()
}

/// POST /models/pull - Fetch an artifact from the remote repository
pub async fn pull_model(
    State(state): State<AppState>,
    Json(req): Json<PullModelRequest>,
) -> Result<(StatusCode, Json<ArtifactRecord>), LlmError> {
    let record = state.manager.pull(&req.model_name).await?;

    crate::metrics::update_model_count(state.manager.registry().count().await);

    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /models - List all registered models with status
pub async fn list_models(State(state): State<AppState>) -> Json<ModelListResponse> {
    let models = state.manager.list_models().await;

    crate::metrics::update_model_count(models.len());

    let total = models.len();
    Json(ModelListResponse { models, total })
}

/// GET /models/{name} - Get one model's record, status, and residency
pub async fn get_model(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ModelDescription>, LlmError> {
    state
        .manager
        .describe(&name)
        .await
        .map(Json)
        .ok_or_else(|| LlmError::ModelNotFound(name))
}

/// POST /models/{name}/load - Load a model into the pool
pub async fn load_model(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ResidentInfo>, LlmError> {
    let info = state.manager.load_by_name(&name).await?;
    Ok(Json(info))
}

/// POST /models/{name}/unload - Unload a model from the pool
///
/// A no-op unload of a registered but non-resident model still succeeds.
pub async fn unload_model(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, LlmError> {
    state.manager.unload_by_name(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /models/{name} - Delete a model's artifact and record
pub async fn delete_model(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, LlmError> {
    state.manager.delete_by_name(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /models/loaded - List resident models
pub async fn list_loaded(State(state): State<AppState>) -> Json<LoadedListResponse> {
    let models = state.manager.list_loaded().await;
    let total = models.len();
    Json(LoadedListResponse { models, total })
}

/// POST /models/clear - Unload every resident model
pub async fn clear_models(State(state): State<AppState>) -> StatusCode {
    state.manager.clear_all().await;
    StatusCode::NO_CONTENT
}

/// POST /generate - Plain text generation (auto-loads on first use)
pub async fn generate(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<GenerationResult>, LlmError> {
    let result = state
        .manager
        .generate(&req.model_name, &req.prompt, &req.params)
        .await?;
    Ok(Json(result))
}

/// POST /chat - Chat completion (auto-loads on first use)
pub async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResult>, LlmError> {
    let result = state
        .manager
        .chat(&req.model_name, req.messages, &req.params)
        .await?;
    Ok(Json(result))
}

/// POST /chat/stream - Streaming chat completion over SSE
///
/// Each event carries one chunk; the final event has `done` set. Client
/// disconnects cancel generation cooperatively.
pub async fn chat_stream(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, LlmError> {
    let stream = state
        .manager
        .chat_stream(&req.model_name, req.messages, &req.params)
        .await?;

    let events = stream.map(|chunk| {
        let event = match chunk {
            Ok(chunk) => Event::default()
                .json_data(&chunk)
                .unwrap_or_else(|e| Event::default().event("error").data(e.to_string())),
            Err(e) => Event::default().event("error").data(e.to_string()),
        };
        Ok(event)
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
