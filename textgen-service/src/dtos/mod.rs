//! Request and response bodies.

pub mod chat;
pub mod generate;
pub mod system;

pub use chat::{ChatInput, ChatMessage, ChatRequest, ChatResponse};
pub use generate::{GenerateInput, GenerateRequest, GenerateResponse};
pub use system::{DebugEnvResponse, HealthResponse, RootResponse};

use validator::ValidationErrors;

/// Flatten field errors into one client-facing message.
pub fn validation_message(errors: &ValidationErrors) -> String {
    let mut messages: Vec<String> = errors
        .field_errors()
        .values()
        .flat_map(|errs| errs.iter())
        .map(|e| {
            e.message
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_else(|| e.code.to_string())
        })
        .collect();
    messages.sort();
    messages.join("; ")
}
