use super::{reject_body, run_generation};
use crate::dtos::{GenerateRequest, GenerateResponse};
use crate::startup::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use service_core::error::AppError;

/// POST /generate
///
/// Validation runs before the model is acquired, so a bad request never
/// triggers a load or a generation.
pub async fn generate(
    State(state): State<AppState>,
    body: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>, AppError> {
    let Json(request) = body.map_err(reject_body)?;
    let input = request.into_input()?;

    let model = state.model().await?;

    tracing::info!(
        prompt = %input.prompt.chars().take(50).collect::<String>(),
        "Generating text"
    );

    let generated_text = run_generation(
        "generate",
        &model,
        &input.prompt,
        &input.params,
        state.config.model.generation_timeout,
    )
    .await?;

    Ok(Json(GenerateResponse {
        prompt: input.prompt,
        generated_text,
        model: model.model_id().to_string(),
    }))
}
