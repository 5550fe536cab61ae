//! Generation backend abstractions and implementations.
//!
//! A backend is split in two: a [`ModelLoader`] that performs the expensive
//! one-off initialization (credentials, tokenizer and weight artifacts) and
//! the [`TextGenerator`] handle it produces. The readiness coordinator owns
//! the loader; handlers only ever see a ready generator.

pub mod huggingface;
pub mod mock;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Error type for backend operations.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Backend not configured: {0}")]
    NotConfigured(String),

    #[error("Credential rejected: {0}")]
    Unauthorized(String),

    #[error("Artifact unavailable: {0}")]
    ArtifactUnavailable(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),
}

impl BackendError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            BackendError::NotConfigured(_) => "not_configured",
            BackendError::Unauthorized(_) => "unauthorized",
            BackendError::ArtifactUnavailable(_) => "artifact_unavailable",
            BackendError::ApiError(_) => "api_error",
            BackendError::InvalidRequest(_) => "invalid_request",
            BackendError::NetworkError(_) => "network_error",
            BackendError::GenerationFailed(_) => "generation_failed",
        }
    }
}

/// How long the output may grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenLimit {
    /// Prompt and generated tokens together, the `max_length` of a causal LM.
    Total(u32),
    /// Generated tokens only.
    NewTokens(u32),
}

/// Sampling parameters for one generation call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub limit: TokenLimit,
    pub temperature: f32,
    /// Keep only this many prompt tokens before generating.
    pub truncate_input: Option<u32>,
}

impl GenerationParams {
    pub fn total(max_length: u32, temperature: f32) -> Self {
        Self {
            limit: TokenLimit::Total(max_length),
            temperature,
            truncate_input: None,
        }
    }

    pub fn new_tokens(max_new_tokens: u32, temperature: f32) -> Self {
        Self {
            limit: TokenLimit::NewTokens(max_new_tokens),
            temperature,
            truncate_input: None,
        }
    }

    pub fn with_input_truncation(mut self, tokens: u32) -> Self {
        self.truncate_input = Some(tokens);
        self
    }

    /// New-token budget for a prompt, using the same rough chars/4 token
    /// estimate as the mock backend. Never below one token.
    pub fn max_new_tokens(&self, prompt: &str) -> u32 {
        match self.limit {
            TokenLimit::NewTokens(n) => n.max(1),
            TokenLimit::Total(total) => total.saturating_sub(estimate_tokens(prompt)).max(1),
        }
    }
}

/// Rough token count for budgeting when no tokenizer is at hand.
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count() as u32;
    chars.div_ceil(4)
}

/// A loaded model ready to generate. Shared by every request.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Identifier of the loaded model.
    fn model_id(&self) -> &str;

    /// Generate a continuation. The returned text starts with the prompt,
    /// the way a decoded causal LM output does.
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, BackendError>;
}

/// The expensive, one-off initialization that yields a [`TextGenerator`].
#[async_trait]
pub trait ModelLoader: Send + Sync {
    /// Provider label used in logs and metrics.
    fn provider(&self) -> &'static str;

    async fn load(&self) -> Result<Arc<dyn TextGenerator>, BackendError>;
}
