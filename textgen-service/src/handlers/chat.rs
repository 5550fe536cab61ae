use super::{reject_body, run_generation};
use crate::dtos::{ChatRequest, ChatResponse};
use crate::services::prompt::strip_prompt;
use crate::startup::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use service_core::error::AppError;

/// POST /chat
pub async fn chat(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    let Json(request) = body.map_err(reject_body)?;
    let deployment = state.config.deployment;
    let input = request.into_input(deployment)?;

    let model = state.model().await?;

    tracing::info!(
        prompt_chars = input.prompt.chars().count(),
        "Generating chat response"
    );

    let generated = run_generation(
        "chat",
        &model,
        &input.prompt,
        &input.params,
        state.config.model.generation_timeout,
    )
    .await?;

    let text = strip_prompt(&generated, &input.prompt).to_string();

    Ok(Json(ChatResponse::new(
        deployment,
        text,
        model.model_id().to_string(),
    )))
}
