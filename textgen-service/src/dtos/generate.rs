use super::validation_message;
use crate::services::backend::GenerationParams;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use validator::Validate;

pub const DEFAULT_MAX_LENGTH: u32 = 100;
pub const MAX_LENGTH_LIMIT: u32 = 500;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

#[derive(Debug, Deserialize, Validate)]
pub struct GenerateRequest {
    pub prompt: Option<String>,

    #[validate(range(max = 500, message = "max_length cannot exceed 500 tokens"))]
    pub max_length: Option<u32>,

    #[validate(range(
        exclusive_min = 0.0,
        max = 2.0,
        message = "temperature must be greater than 0 and at most 2"
    ))]
    pub temperature: Option<f32>,
}

/// A `/generate` request that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateInput {
    pub prompt: String,
    pub params: GenerationParams,
}

impl GenerateRequest {
    /// Check the request and apply defaults.
    pub fn into_input(self) -> Result<GenerateInput, AppError> {
        match self.prompt.as_deref() {
            None => return Err(AppError::bad_request("Missing required field: prompt")),
            Some(p) if p.trim().is_empty() => {
                return Err(AppError::bad_request("prompt must not be empty"))
            }
            Some(_) => {}
        }

        self.validate()
            .map_err(|e| AppError::bad_request(validation_message(&e)))?;

        Ok(GenerateInput {
            prompt: self.prompt.unwrap_or_default(),
            params: GenerationParams::total(
                self.max_length.unwrap_or(DEFAULT_MAX_LENGTH),
                self.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            ),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub prompt: String,
    pub generated_text: String,
    pub model: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::backend::TokenLimit;

    fn request(json: serde_json::Value) -> GenerateRequest {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn defaults_are_applied() {
        let input = request(serde_json::json!({ "prompt": "Hello" }))
            .into_input()
            .unwrap();

        assert_eq!(input.prompt, "Hello");
        assert_eq!(input.params.limit, TokenLimit::Total(DEFAULT_MAX_LENGTH));
        assert_eq!(input.params.temperature, DEFAULT_TEMPERATURE);
    }

    #[test]
    fn limit_boundary() {
        let ok = request(serde_json::json!({ "prompt": "Hi", "max_length": MAX_LENGTH_LIMIT }));
        assert!(ok.into_input().is_ok());

        let too_long = request(serde_json::json!({ "prompt": "Hi", "max_length": 501 }));
        match too_long.into_input() {
            Err(AppError::BadRequest(e)) => {
                assert_eq!(e.to_string(), "max_length cannot exceed 500 tokens")
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    fn rejection(body: serde_json::Value) -> String {
        match request(body).into_input() {
            Err(AppError::BadRequest(e)) => e.to_string(),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn missing_prompt_is_rejected() {
        for body in [serde_json::json!({}), serde_json::json!({ "max_length": 50 })] {
            assert_eq!(rejection(body), "Missing required field: prompt");
        }
    }

    #[test]
    fn blank_prompt_has_its_own_message() {
        for body in [
            serde_json::json!({ "prompt": "" }),
            serde_json::json!({ "prompt": "   " }),
        ] {
            assert_eq!(rejection(body), "prompt must not be empty");
        }
    }

    #[test]
    fn temperature_out_of_range_is_rejected() {
        let hot = request(serde_json::json!({ "prompt": "Hi", "temperature": 3.5 }));
        assert!(matches!(hot.into_input(), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn zero_temperature_is_rejected() {
        assert_eq!(
            rejection(serde_json::json!({ "prompt": "Hi", "temperature": 0.0 })),
            "temperature must be greater than 0 and at most 2"
        );

        let cool = request(serde_json::json!({ "prompt": "Hi", "temperature": 0.01 }));
        assert!(cool.into_input().is_ok());
    }
}
