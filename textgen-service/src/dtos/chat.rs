use super::validation_message;
use super::generate::DEFAULT_TEMPERATURE;
use crate::config::Deployment;
use crate::services::backend::GenerationParams;
use crate::services::prompt::build_chat_prompt;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use validator::Validate;

/// Total length budget for prompts assembled from messages.
pub const CHAT_MAX_LENGTH: u32 = 500;
/// New-token budget for raw prompts when the caller does not set one.
pub const DEFAULT_MAX_TOKENS: u32 = 200;
/// Raw prompts are cut to this many tokens, leaving room for the output.
pub const RAW_PROMPT_TOKEN_LIMIT: u32 = 400;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: String,
}

/// Body of `/chat`. Accepts the conversation shape (`messages` plus an
/// optional manuscript excerpt) and the raw-prompt shape (`prompt`,
/// `max_tokens`, `temperature`).
#[derive(Debug, Default, Deserialize, Validate)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,

    #[serde(default, rename = "manuscriptContext", alias = "manuscript_context")]
    pub manuscript_context: Option<String>,

    pub prompt: Option<String>,

    #[validate(range(min = 1, max = 500, message = "max_tokens must be between 1 and 500"))]
    pub max_tokens: Option<u32>,

    #[validate(range(
        exclusive_min = 0.0,
        max = 2.0,
        message = "temperature must be greater than 0 and at most 2"
    ))]
    pub temperature: Option<f32>,
}

/// A `/chat` request turned into a single prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatInput {
    pub prompt: String,
    pub params: GenerationParams,
}

impl ChatRequest {
    pub fn into_input(self, deployment: Deployment) -> Result<ChatInput, AppError> {
        self.validate()
            .map_err(|e| AppError::bad_request(validation_message(&e)))?;

        let temperature = self.temperature.unwrap_or(DEFAULT_TEMPERATURE);

        if let Some(prompt) = self.prompt {
            if prompt.trim().is_empty() {
                return Err(AppError::bad_request("No prompt provided"));
            }
            let params = GenerationParams::new_tokens(
                self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
                temperature,
            )
            .with_input_truncation(RAW_PROMPT_TOKEN_LIMIT);
            return Ok(ChatInput { prompt, params });
        }

        if self.messages.is_empty() && deployment == Deployment::Vm {
            return Err(AppError::bad_request("No prompt provided"));
        }

        let prompt = build_chat_prompt(&self.messages, self.manuscript_context.as_deref());
        let params = match self.max_tokens {
            Some(max_tokens) => GenerationParams::new_tokens(max_tokens, temperature),
            None => GenerationParams::total(CHAT_MAX_LENGTH, temperature),
        };

        Ok(ChatInput { prompt, params })
    }
}

/// Response shape differs per deployment; clients of each depend on theirs.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ChatResponse {
    Serverless {
        text: String,
        model: String,
    },
    Vm {
        response: String,
        model: String,
        deployment: &'static str,
    },
}

impl ChatResponse {
    pub fn new(deployment: Deployment, text: String, model: String) -> Self {
        match deployment {
            Deployment::Serverless => ChatResponse::Serverless { text, model },
            Deployment::Vm => ChatResponse::Vm {
                response: text,
                model,
                deployment: deployment.as_str(),
            },
        }
    }
}
