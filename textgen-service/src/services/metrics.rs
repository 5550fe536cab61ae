//! Prometheus metrics for textgen-service.
//!
//! Provides HTTP, model lifecycle and generation metrics.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

// Global registry
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

// HTTP metrics
pub static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static HTTP_REQUEST_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();

// Model lifecycle metrics
pub static MODEL_LOADS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static MODEL_LOAD_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
pub static MODEL_LOADED: OnceLock<IntGauge> = OnceLock::new();

// Generation metrics
pub static GENERATION_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static GENERATION_LATENCY_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
pub static GENERATION_ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Safe to call more than once; only the first call registers.
pub fn init_metrics() {
    if REGISTRY.get().is_some() {
        return;
    }

    let registry = Registry::new();

    let http_requests_total = IntCounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests"),
        &["method", "path", "status"],
    )
    .expect("Failed to create http_requests_total metric");

    let http_request_duration = HistogramVec::new(
        HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        &["method", "path"],
    )
    .expect("Failed to create http_request_duration_seconds metric");

    // outcome: success, failure
    let model_loads = IntCounterVec::new(
        Opts::new("model_loads_total", "Model load attempts by outcome"),
        &["provider", "outcome"],
    )
    .expect("Failed to create model_loads_total metric");

    let model_load_duration = HistogramVec::new(
        HistogramOpts::new(
            "model_load_duration_seconds",
            "Model load duration in seconds",
        )
        .buckets(vec![0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
        &["provider"],
    )
    .expect("Failed to create model_load_duration_seconds metric");

    let model_loaded = IntGauge::new("model_loaded", "1 once the model is ready to serve")
        .expect("Failed to create model_loaded metric");

    let generation_requests = IntCounterVec::new(
        Opts::new("generation_requests_total", "Total generation requests"),
        &["endpoint", "model", "status"],
    )
    .expect("Failed to create generation_requests_total metric");

    let generation_latency = HistogramVec::new(
        HistogramOpts::new(
            "generation_latency_seconds",
            "Backend generation latency in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]),
        &["endpoint", "model"],
    )
    .expect("Failed to create generation_latency_seconds metric");

    let generation_errors = IntCounterVec::new(
        Opts::new("generation_errors_total", "Total backend generation errors"),
        &["endpoint", "error_type"],
    )
    .expect("Failed to create generation_errors_total metric");

    registry
        .register(Box::new(http_requests_total.clone()))
        .expect("Failed to register http_requests_total");
    registry
        .register(Box::new(http_request_duration.clone()))
        .expect("Failed to register http_request_duration_seconds");
    registry
        .register(Box::new(model_loads.clone()))
        .expect("Failed to register model_loads_total");
    registry
        .register(Box::new(model_load_duration.clone()))
        .expect("Failed to register model_load_duration_seconds");
    registry
        .register(Box::new(model_loaded.clone()))
        .expect("Failed to register model_loaded");
    registry
        .register(Box::new(generation_requests.clone()))
        .expect("Failed to register generation_requests_total");
    registry
        .register(Box::new(generation_latency.clone()))
        .expect("Failed to register generation_latency_seconds");
    registry
        .register(Box::new(generation_errors.clone()))
        .expect("Failed to register generation_errors_total");

    // Initialize globals
    let _ = REGISTRY.set(registry);
    let _ = HTTP_REQUESTS_TOTAL.set(http_requests_total);
    let _ = HTTP_REQUEST_DURATION_SECONDS.set(http_request_duration);
    let _ = MODEL_LOADS_TOTAL.set(model_loads);
    let _ = MODEL_LOAD_DURATION_SECONDS.set(model_load_duration);
    let _ = MODEL_LOADED.set(model_loaded);
    let _ = GENERATION_REQUESTS_TOTAL.set(generation_requests);
    let _ = GENERATION_LATENCY_SECONDS.set(generation_latency);
    let _ = GENERATION_ERRORS_TOTAL.set(generation_errors);

    tracing::info!("Prometheus metrics initialized");
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();

    let registry = match REGISTRY.get() {
        Some(r) => r,
        None => {
            tracing::error!("Metrics registry not initialized");
            return "# Metrics registry not initialized\n".to_string();
        }
    };

    let metric_families = registry.gather();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return format!("# Failed to encode metrics: {}\n", e);
    }

    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Failed to convert metrics to UTF-8");
            format!("# Failed to convert metrics to UTF-8: {}\n", e)
        }
    }
}

// Helper functions for recording metrics

/// Record a completed HTTP request.
pub fn record_http_request(method: &str, path: &str, status: &str, duration_secs: f64) {
    if let Some(counter) = HTTP_REQUESTS_TOTAL.get() {
        counter.with_label_values(&[method, path, status]).inc();
    }
    if let Some(histogram) = HTTP_REQUEST_DURATION_SECONDS.get() {
        histogram
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }
}

/// Record the end of a model load attempt.
pub fn record_model_load(provider: &str, success: bool, duration_secs: f64) {
    let outcome = if success { "success" } else { "failure" };
    if let Some(counter) = MODEL_LOADS_TOTAL.get() {
        counter.with_label_values(&[provider, outcome]).inc();
    }
    if let Some(histogram) = MODEL_LOAD_DURATION_SECONDS.get() {
        histogram
            .with_label_values(&[provider])
            .observe(duration_secs);
    }
    if let Some(gauge) = MODEL_LOADED.get() {
        gauge.set(i64::from(success));
    }
}

/// Record a completed generation request.
pub fn record_generation(endpoint: &str, model: &str, status: &str, duration_secs: f64) {
    if let Some(counter) = GENERATION_REQUESTS_TOTAL.get() {
        counter.with_label_values(&[endpoint, model, status]).inc();
    }
    if let Some(histogram) = GENERATION_LATENCY_SECONDS.get() {
        histogram
            .with_label_values(&[endpoint, model])
            .observe(duration_secs);
    }
}

/// Record a backend generation error.
pub fn record_generation_error(endpoint: &str, error_type: &str) {
    if let Some(counter) = GENERATION_ERRORS_TOTAL.get() {
        counter.with_label_values(&[endpoint, error_type]).inc();
    }
}
