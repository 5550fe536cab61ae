//! Hugging Face backend.
//!
//! Loading authenticates against the hub (when a token is configured) and
//! resolves the model's `config.json` and `tokenizer_config.json`, either from
//! the hub or, when a cache directory is configured, from disk only.
//! Generation is delegated to a text-generation-inference compatible
//! endpoint.

use super::{BackendError, GenerationParams, ModelLoader, TextGenerator};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const MODEL_CONFIG_FILE: &str = "config.json";
const TOKENIZER_CONFIG_FILE: &str = "tokenizer_config.json";

/// Hugging Face backend configuration.
#[derive(Debug, Clone)]
pub struct HuggingFaceConfig {
    pub model: String,
    pub token: Option<Secret<String>>,
    pub cache_dir: Option<PathBuf>,
    pub hub_url: String,
    pub inference_endpoint: String,
    pub request_timeout: Duration,
}

/// Loader for a hub-hosted causal LM.
pub struct HuggingFaceLoader {
    config: HuggingFaceConfig,
    client: Client,
}

impl HuggingFaceLoader {
    pub fn new(config: HuggingFaceConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| BackendError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    /// Check the credential before touching any gated artifact.
    async fn authenticate(&self) -> Result<(), BackendError> {
        if self.config.token.is_none() {
            return Ok(());
        }

        tracing::info!("Authenticating with Hugging Face hub");

        let url = format!("{}/api/whoami-v2", self.config.hub_url.trim_end_matches('/'));
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|e| BackendError::NetworkError(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(BackendError::Unauthorized(
                format!("hub rejected token with status {}", response.status()),
            )),
            status => Err(BackendError::ApiError(format!(
                "hub whoami returned {}",
                status
            ))),
        }
    }

    /// Fetch one artifact as raw bytes, from the cache dir or the hub.
    async fn fetch_artifact(&self, file: &str) -> Result<Vec<u8>, BackendError> {
        if let Some(cache_dir) = &self.config.cache_dir {
            let path = cached_artifact_path(cache_dir, &self.config.model, file).await?;
            return tokio::fs::read(&path).await.map_err(|e| {
                BackendError::ArtifactUnavailable(format!(
                    "{} not in cache ({}): {}",
                    file,
                    path.display(),
                    e
                ))
            });
        }

        let url = format!(
            "{}/{}/resolve/main/{}",
            self.config.hub_url.trim_end_matches('/'),
            self.config.model,
            file
        );
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|e| BackendError::NetworkError(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(BackendError::Unauthorized(format!(
                "{} is gated or private ({})",
                self.config.model, status
            )));
        }
        if !status.is_success() {
            return Err(BackendError::ArtifactUnavailable(format!(
                "{} returned {}",
                url, status
            )));
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| BackendError::NetworkError(e.to_string()))
    }
}

/// Locate `file` in a local model cache.
///
/// A hub cache keeps artifacts under
/// `models--{org}--{name}/snapshots/{rev}/{file}`, with the revision of `main`
/// recorded in `refs/main`. Without a repo directory the cache is treated as
/// a flat directory of artifacts.
pub async fn cached_artifact_path(
    cache_dir: &Path,
    model: &str,
    file: &str,
) -> Result<PathBuf, BackendError> {
    let repo_dir = cache_dir.join(format!("models--{}", model.replace('/', "--")));
    if !tokio::fs::try_exists(&repo_dir).await.unwrap_or(false) {
        return Ok(cache_dir.join(file));
    }

    let revision = match tokio::fs::read_to_string(repo_dir.join("refs").join("main")).await {
        Ok(rev) if !rev.trim().is_empty() => rev.trim().to_string(),
        _ => single_snapshot(&repo_dir).await?,
    };

    Ok(repo_dir.join("snapshots").join(revision).join(file))
}

/// Caches written without refs still have exactly one snapshot to use.
async fn single_snapshot(repo_dir: &Path) -> Result<String, BackendError> {
    let snapshots = repo_dir.join("snapshots");
    let mut entries = tokio::fs::read_dir(&snapshots).await.map_err(|e| {
        BackendError::ArtifactUnavailable(format!(
            "no refs/main and no snapshots in {}: {}",
            repo_dir.display(),
            e
        ))
    })?;

    let mut revisions = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| BackendError::ArtifactUnavailable(e.to_string()))?
    {
        if entry.path().is_dir() {
            revisions.push(entry.file_name().to_string_lossy().into_owned());
        }
    }

    match revisions.as_slice() {
        [revision] => Ok(revision.clone()),
        [] => Err(BackendError::ArtifactUnavailable(format!(
            "no snapshots in {}",
            snapshots.display()
        ))),
        _ => Err(BackendError::ArtifactUnavailable(format!(
            "{} has several snapshots and no refs/main",
            repo_dir.display()
        ))),
    }
}

/// Fields of `config.json` the service cares about.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelMetadata {
    #[serde(default)]
    pub architectures: Vec<String>,
    pub max_position_embeddings: Option<u32>,
    pub vocab_size: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TokenizerMetadata {
    eos_token: Option<serde_json::Value>,
    model_max_length: Option<f64>,
}

#[async_trait]
impl ModelLoader for HuggingFaceLoader {
    fn provider(&self) -> &'static str {
        "huggingface"
    }

    async fn load(&self) -> Result<Arc<dyn TextGenerator>, BackendError> {
        tracing::info!(model = %self.config.model, "Loading model");
        if let Some(dir) = &self.config.cache_dir {
            tracing::info!(cache_dir = %dir.display(), "Using local model cache");
        }

        self.authenticate().await?;

        let tokenizer: TokenizerMetadata =
            serde_json::from_slice(&self.fetch_artifact(TOKENIZER_CONFIG_FILE).await?).map_err(
                |e| BackendError::ArtifactUnavailable(format!("{}: {}", TOKENIZER_CONFIG_FILE, e)),
            )?;

        let metadata: ModelMetadata =
            serde_json::from_slice(&self.fetch_artifact(MODEL_CONFIG_FILE).await?).map_err(
                |e| BackendError::ArtifactUnavailable(format!("{}: {}", MODEL_CONFIG_FILE, e)),
            )?;

        // Tokenizers report absurdly large sentinels when unbounded.
        let context_window = metadata.max_position_embeddings.or_else(|| {
            tokenizer
                .model_max_length
                .filter(|n| *n > 0.0 && *n < 1e9)
                .map(|n| n as u32)
        });

        tracing::info!(
            model = %self.config.model,
            architectures = ?metadata.architectures,
            context_window = ?context_window,
            has_eos = tokenizer.eos_token.is_some(),
            "Model loaded successfully"
        );

        Ok(Arc::new(HuggingFaceGenerator {
            model: self.config.model.clone(),
            endpoint: self.config.inference_endpoint.clone(),
            token: self.config.token.clone(),
            context_window,
            client: self.client.clone(),
        }))
    }
}

/// Generator backed by a TGI-style `/generate` endpoint.
pub struct HuggingFaceGenerator {
    model: String,
    endpoint: String,
    token: Option<Secret<String>>,
    context_window: Option<u32>,
    client: Client,
}

#[derive(Debug, Serialize)]
struct InferenceRequest<'a> {
    inputs: &'a str,
    parameters: InferenceParameters,
}

#[derive(Debug, Serialize)]
struct InferenceParameters {
    max_new_tokens: u32,
    temperature: f32,
    do_sample: bool,
    return_full_text: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    truncate: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct InferenceOutput {
    generated_text: String,
}

/// Both the single-object and the list-of-objects response shapes are in use.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InferenceResponse {
    Many(Vec<InferenceOutput>),
    One(InferenceOutput),
}

impl HuggingFaceGenerator {
    fn build_parameters(&self, prompt: &str, params: &GenerationParams) -> InferenceParameters {
        let mut max_new_tokens = params.max_new_tokens(prompt);
        if let Some(window) = self.context_window {
            max_new_tokens = max_new_tokens.min(window.max(1));
        }

        InferenceParameters {
            max_new_tokens,
            temperature: params.temperature,
            do_sample: true,
            return_full_text: true,
            truncate: params.truncate_input,
        }
    }
}

#[async_trait]
impl TextGenerator for HuggingFaceGenerator {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, BackendError> {
        let request = InferenceRequest {
            inputs: prompt,
            parameters: self.build_parameters(prompt, params),
        };

        tracing::debug!(
            model = %self.model,
            prompt_len = prompt.len(),
            max_new_tokens = request.parameters.max_new_tokens,
            "Sending request to inference endpoint"
        );

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token.expose_secret());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| BackendError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            if status == StatusCode::UNPROCESSABLE_ENTITY || status == StatusCode::BAD_REQUEST {
                return Err(BackendError::InvalidRequest(error_text));
            }
            return Err(BackendError::ApiError(format!(
                "inference endpoint error {}: {}",
                status, error_text
            )));
        }

        let body: InferenceResponse = response
            .json()
            .await
            .map_err(|e| BackendError::ApiError(format!("Failed to parse response: {}", e)))?;

        let text = match body {
            InferenceResponse::One(out) => Some(out.generated_text),
            InferenceResponse::Many(outs) => outs.into_iter().next().map(|o| o.generated_text),
        };

        text.ok_or_else(|| BackendError::ApiError("inference endpoint returned no text".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_config(dir: &Path) -> HuggingFaceConfig {
        HuggingFaceConfig {
            model: "PleIAs/Pleias-350m-Preview".to_string(),
            token: None,
            cache_dir: Some(dir.to_path_buf()),
            hub_url: "http://127.0.0.1:9".to_string(),
            inference_endpoint: "http://127.0.0.1:9/generate".to_string(),
            request_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn loads_from_cache_without_network() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(MODEL_CONFIG_FILE),
            r#"{"architectures":["LlamaForCausalLM"],"max_position_embeddings":2048}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join(TOKENIZER_CONFIG_FILE),
            r#"{"eos_token":"</s>","model_max_length":1e30}"#,
        )
        .unwrap();

        let loader = HuggingFaceLoader::new(cache_config(dir.path())).unwrap();
        let generator = loader.load().await.unwrap();
        assert_eq!(generator.model_id(), "PleIAs/Pleias-350m-Preview");
    }

    #[tokio::test]
    async fn missing_cached_artifact_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let loader = HuggingFaceLoader::new(cache_config(dir.path())).unwrap();

        match loader.load().await {
            Err(BackendError::ArtifactUnavailable(msg)) => {
                assert!(msg.contains(TOKENIZER_CONFIG_FILE))
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("load should fail without artifacts"),
        }
    }

    fn write_snapshot(repo_dir: &Path, revision: &str) {
        let snapshot = repo_dir.join("snapshots").join(revision);
        std::fs::create_dir_all(&snapshot).unwrap();
        std::fs::write(
            snapshot.join(MODEL_CONFIG_FILE),
            r#"{"architectures":["LlamaForCausalLM"],"max_position_embeddings":2048}"#,
        )
        .unwrap();
        std::fs::write(snapshot.join(TOKENIZER_CONFIG_FILE), r#"{"eos_token":"</s>"}"#).unwrap();
    }

    #[tokio::test]
    async fn loads_from_hub_snapshot_layout() {
        let dir = tempfile::tempdir().unwrap();
        let repo_dir = dir.path().join("models--PleIAs--Pleias-350m-Preview");
        write_snapshot(&repo_dir, "abc123");
        std::fs::create_dir_all(repo_dir.join("refs")).unwrap();
        std::fs::write(repo_dir.join("refs").join("main"), "abc123\n").unwrap();

        let path =
            cached_artifact_path(dir.path(), "PleIAs/Pleias-350m-Preview", MODEL_CONFIG_FILE)
                .await
                .unwrap();
        assert_eq!(path, repo_dir.join("snapshots/abc123").join(MODEL_CONFIG_FILE));

        let loader = HuggingFaceLoader::new(cache_config(dir.path())).unwrap();
        let generator = loader.load().await.unwrap();
        assert_eq!(generator.model_id(), "PleIAs/Pleias-350m-Preview");
    }

    #[tokio::test]
    async fn snapshot_without_refs_is_used_when_unique() {
        let dir = tempfile::tempdir().unwrap();
        let repo_dir = dir.path().join("models--PleIAs--Pleias-350m-Preview");
        write_snapshot(&repo_dir, "def456");

        let loader = HuggingFaceLoader::new(cache_config(dir.path())).unwrap();
        assert!(loader.load().await.is_ok());
    }

    #[tokio::test]
    async fn repo_dir_without_snapshots_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("models--PleIAs--Pleias-350m-Preview")).unwrap();

        let loader = HuggingFaceLoader::new(cache_config(dir.path())).unwrap();
        assert!(matches!(
            loader.load().await,
            Err(BackendError::ArtifactUnavailable(_))
        ));
    }

    #[test]
    fn parameters_respect_context_window() {
        let generator = HuggingFaceGenerator {
            model: "m".to_string(),
            endpoint: "http://127.0.0.1:9/generate".to_string(),
            token: None,
            context_window: Some(64),
            client: Client::new(),
        };

        let params = GenerationParams::new_tokens(200, 0.7).with_input_truncation(400);
        let built = generator.build_parameters("hello", &params);
        assert_eq!(built.max_new_tokens, 64);
        assert_eq!(built.truncate, Some(400));
        assert!(built.return_full_text);
    }

    #[test]
    fn both_response_shapes_parse() {
        let many: InferenceResponse =
            serde_json::from_str(r#"[{"generated_text":"a b"}]"#).unwrap();
        assert!(matches!(many, InferenceResponse::Many(v) if v[0].generated_text == "a b"));

        let one: InferenceResponse = serde_json::from_str(r#"{"generated_text":"c"}"#).unwrap();
        assert!(matches!(one, InferenceResponse::One(o) if o.generated_text == "c"));
    }
}
