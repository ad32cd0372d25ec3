//! Prometheus metrics

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Setup Prometheus metrics exporter
/// Returns a handle that can be used to retrieve metrics
pub fn setup_metrics() -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    tracing::info!("Prometheus metrics exporter installed");

    Ok(handle)
}

/// Record a completed model pull
pub fn record_model_pulled(name: &str) {
    metrics::counter!("llm_manager_models_pulled_total",
        "model" => name.to_string()
    )
    .increment(1);
}

/// Record a model deletion
pub fn record_model_deleted(name: &str) {
    metrics::counter!("llm_manager_models_deleted_total",
        "model" => name.to_string()
    )
    .increment(1);
}

/// Record a model load into the pool
pub fn record_model_loaded(name: &str) {
    metrics::counter!("llm_manager_models_loaded_total",
        "model" => name.to_string()
    )
    .increment(1);
}

/// Record a model unload
pub fn record_model_unloaded(name: &str) {
    metrics::counter!("llm_manager_models_unloaded_total",
        "model" => name.to_string()
    )
    .increment(1);
}

/// Record a completed generation and its output token count
pub fn record_generation(name: &str, completion_tokens: u32) {
    metrics::counter!("llm_manager_generations_total",
        "model" => name.to_string()
    )
    .increment(1);
    metrics::counter!("llm_manager_completion_tokens_total",
        "model" => name.to_string()
    )
    .increment(u64::from(completion_tokens));
}

/// Update total registered model count gauge
pub fn update_model_count(count: usize) {
    metrics::gauge!("llm_manager_models_count").set(count as f64);
}

/// Update resident model count gauge
pub fn update_resident_count(count: usize) {
    metrics::gauge!("llm_manager_resident_models_count").set(count as f64);
}
