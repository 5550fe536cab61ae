//! Shared helpers for textgen-service integration tests.
//!
//! The app runs on a random port against the mock backend, so no network
//! access or model artifacts are needed.
#![allow(dead_code)]

use reqwest::Client;
use service_core::config::Config as CoreConfig;
use std::sync::Arc;
use std::time::Duration;
use textgen_service::config::{
    BackendKind, CorsConfig, Deployment, Environment, LoadMode, LoadRetryPolicy, ModelConfig,
    TextgenConfig,
};
use textgen_service::services::backend::mock::MockModelLoader;
use textgen_service::services::backend::ModelLoader;
use textgen_service::startup::Application;

pub const TEST_MODEL: &str = "test/mock-model";

pub struct TestApp {
    pub address: String,
    pub client: Client,
    pub loader: Arc<MockModelLoader>,
}

impl TestApp {
    pub async fn post_json(&self, path: &str, body: &serde_json::Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.address, path))
            .json(body)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .expect("Failed to send request")
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.address, path))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .expect("Failed to send request")
    }

    /// Poll `/ready` until the model has loaded.
    pub async fn wait_until_ready(&self) {
        for _ in 0..100 {
            if self.get("/ready").await.status().is_success() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("model never became ready");
    }
}

pub fn test_config(deployment: Deployment, load_mode: LoadMode) -> TextgenConfig {
    TextgenConfig {
        common: CoreConfig { port: 0 },
        environment: Environment::Dev,
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        deployment,
        model: ModelConfig {
            name: TEST_MODEL.to_string(),
            backend: BackendKind::Mock,
            hf_token: None,
            cache_dir: None,
            hub_url: "http://127.0.0.1:9".to_string(),
            inference_endpoint: "http://127.0.0.1:9/generate".to_string(),
            load_mode,
            retry_policy: LoadRetryPolicy::Retry,
            load_timeout: Duration::from_secs(5),
            generation_timeout: Duration::from_secs(5),
        },
        cors: CorsConfig {
            allowed_origins: None,
        },
    }
}

pub async fn spawn_app_with(config: TextgenConfig, loader: MockModelLoader) -> TestApp {
    let loader = Arc::new(loader);
    let app = Application::build_with_loader(config, loader.clone() as Arc<dyn ModelLoader>)
        .await
        .expect("Failed to build application");

    let port = app.http_port();

    tokio::spawn(async move {
        let _ = app.run_until_stopped().await;
    });

    TestApp {
        address: format!("http://127.0.0.1:{}", port),
        client: Client::new(),
        loader,
    }
}

/// Serverless deployment, lazy load, instant mock.
pub async fn spawn_app() -> TestApp {
    spawn_app_with(
        test_config(Deployment::Serverless, LoadMode::Lazy),
        MockModelLoader::new(TEST_MODEL),
    )
    .await
}
