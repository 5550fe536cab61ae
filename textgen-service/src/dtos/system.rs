use crate::services::{LoadPhase, LoadStatus};
use secrecy::{ExposeSecret, Secret};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model: String,
    pub model_loaded: bool,
    pub load_state: LoadPhase,
    pub load_attempts: u64,
    pub deployment: &'static str,
    pub version: &'static str,
}

impl HealthResponse {
    /// Liveness never depends on the model, so `status` is always healthy.
    pub fn new(model: &str, deployment: &'static str, load: &LoadStatus) -> Self {
        Self {
            status: "healthy",
            model: model.to_string(),
            model_loaded: load.model_loaded,
            load_state: load.phase,
            load_attempts: load.load_attempts,
            deployment,
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DebugEnvResponse {
    pub hf_token_configured: bool,
    pub hf_token_masked: String,
    pub port: u16,
}

impl DebugEnvResponse {
    pub fn new(token: Option<&Secret<String>>, port: u16) -> Self {
        Self {
            hf_token_configured: token.is_some(),
            hf_token_masked: mask_token(token),
            port,
        }
    }
}

/// First and last four characters of the token. Short tokens are fully hidden.
pub fn mask_token(token: Option<&Secret<String>>) -> String {
    let Some(token) = token else {
        return "NOT SET".to_string();
    };

    let chars: Vec<char> = token.expose_secret().chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }

    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

#[derive(Debug, Serialize)]
pub struct RootResponse {
    pub name: &'static str,
    pub model: String,
    pub deployment: &'static str,
    pub endpoints: Endpoints,
}

#[derive(Debug, Serialize)]
pub struct Endpoints {
    pub health: &'static str,
    pub ready: &'static str,
    pub debug: &'static str,
    pub generate: &'static str,
    pub chat: &'static str,
    pub metrics: &'static str,
}

impl RootResponse {
    pub fn new(model: &str, deployment: &'static str) -> Self {
        Self {
            name: "PleIAs API",
            model: model.to_string(),
            deployment,
            endpoints: Endpoints {
                health: "/health",
                ready: "/ready",
                debug: "/debug/env",
                generate: "/generate (POST)",
                chat: "/chat (POST)",
                metrics: "/metrics",
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_masked() {
        let token = Secret::new("hf_abcdefghijklmnop".to_string());
        assert_eq!(mask_token(Some(&token)), "hf_a...mnop");
    }

    #[test]
    fn short_token_is_fully_hidden() {
        let token = Secret::new("hf_12345".to_string());
        assert_eq!(mask_token(Some(&token)), "****");
    }

    #[test]
    fn missing_token() {
        assert_eq!(mask_token(None), "NOT SET");

        let body = serde_json::to_value(DebugEnvResponse::new(None, 8080)).unwrap();
        assert_eq!(body["hf_token_configured"], false);
        assert_eq!(body["port"], 8080);
    }

    #[test]
    fn health_reports_load_state() {
        let status = LoadStatus {
            phase: LoadPhase::Loading,
            model_loaded: false,
            load_attempts: 1,
            last_failure: None,
        };
        let body = serde_json::to_value(HealthResponse::new("m", "serverless", &status)).unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["model_loaded"], false);
        assert_eq!(body["load_state"], "loading");
    }
}
