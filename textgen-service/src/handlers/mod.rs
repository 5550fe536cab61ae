//! HTTP handlers for the text generation service.

pub mod chat;
pub mod generate;
pub mod system;

use crate::services::backend::{BackendError, GenerationParams};
use crate::services::metrics::{record_generation, record_generation_error};
use crate::services::BackendHandle;
use axum::extract::rejection::JsonRejection;
use service_core::error::AppError;
use std::time::{Duration, Instant};

/// Malformed or missing JSON bodies are the client's fault.
pub(crate) fn reject_body(rejection: JsonRejection) -> AppError {
    tracing::debug!(error = %rejection, "Rejected request body");
    AppError::bad_request(rejection.body_text())
}

/// Run one generation on the shared handle, bounded by `timeout`.
pub(crate) async fn run_generation(
    endpoint: &'static str,
    model: &BackendHandle,
    prompt: &str,
    params: &GenerationParams,
    timeout: Duration,
) -> Result<String, AppError> {
    let start = Instant::now();
    let model_id = model.model_id();

    match tokio::time::timeout(timeout, model.generate(prompt, params)).await {
        Ok(Ok(text)) => {
            record_generation(endpoint, model_id, "success", start.elapsed().as_secs_f64());
            Ok(text)
        }
        Ok(Err(e)) => {
            record_generation(endpoint, model_id, "error", start.elapsed().as_secs_f64());
            record_generation_error(endpoint, e.kind());
            Err(generation_error(endpoint, e))
        }
        Err(_) => {
            record_generation(endpoint, model_id, "timeout", start.elapsed().as_secs_f64());
            record_generation_error(endpoint, "timeout");
            Err(AppError::GatewayTimeout(format!(
                "generation on {} exceeded {}s",
                endpoint,
                timeout.as_secs()
            )))
        }
    }
}

/// Parameters the backend refuses are the client's fault; anything else is ours.
fn generation_error(endpoint: &'static str, error: BackendError) -> AppError {
    match error {
        BackendError::InvalidRequest(detail) => {
            tracing::warn!(endpoint, detail = %detail, "Backend rejected generation parameters");
            AppError::bad_request("Invalid generation parameters")
        }
        other => AppError::InternalError(
            anyhow::Error::new(other).context(format!("generation failed on {}", endpoint)),
        ),
    }
}
