use secrecy::Secret;
use service_core::config::{self as core_config, env_flag, get_env, optional_env};
use service_core::error::AppError;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MODEL_NAME: &str = "PleIAs/Pleias-350m-Preview";
pub const DEFAULT_HUB_URL: &str = "https://huggingface.co";
const DEFAULT_INFERENCE_BASE: &str = "https://api-inference.huggingface.co/models";

const DEFAULT_LOAD_TIMEOUT_SECS: u64 = 600;
const DEFAULT_GENERATION_TIMEOUT_SECS: u64 = 120;

/// Origins the persistent VM deployment serves by default.
const VM_ALLOWED_ORIGINS: &[&str] = &[
    "https://ethicalaiditor.netlify.app",
    "http://localhost:5173",
    "http://localhost:3000",
];

#[derive(Debug, Clone)]
pub struct TextgenConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub deployment: Deployment,
    pub model: ModelConfig,
    pub cors: CorsConfig,
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Model identifier echoed in every response.
    pub name: String,
    pub backend: BackendKind,
    /// Provider credential; `HF_TOKEN` wins over `HUGGINGFACE_HUB_TOKEN`.
    pub hf_token: Option<Secret<String>>,
    /// Pre-populated artifact directory. When set, nothing is downloaded.
    pub cache_dir: Option<PathBuf>,
    pub hub_url: String,
    pub inference_endpoint: String,
    pub load_mode: LoadMode,
    pub retry_policy: LoadRetryPolicy,
    pub load_timeout: Duration,
    pub generation_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CorsConfig {
    /// `None` means any origin.
    pub allowed_origins: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Prod,
}

/// Deployment variant. Decides the `/chat` response shape and whether
/// requests wait for a loading model or are turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deployment {
    /// Scale-to-zero container: requests wait for the model.
    Serverless,
    /// Always-on VM: requests before the model is ready get a 503.
    Vm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    HuggingFace,
    Mock,
}

/// When the first load is triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// On the first request that needs the model.
    Lazy,
    /// At startup, in a background task; the server accepts connections meanwhile.
    Background,
    /// At startup, before the listener is bound; a failed load aborts startup.
    Blocking,
}

/// What a failed load leaves behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadRetryPolicy {
    /// Revert to uninitialized; the next caller retries.
    Retry,
    /// Stay failed until the process restarts.
    FailFast,
}

impl Deployment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Deployment::Serverless => "serverless",
            Deployment::Vm => "compute-engine-vm",
        }
    }
}

impl LoadRetryPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadRetryPolicy::Retry => "retry",
            LoadRetryPolicy::FailFast => "fail-fast",
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" | "test" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl FromStr for Deployment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "serverless" | "cloud-run" => Ok(Deployment::Serverless),
            "vm" | "compute-engine-vm" => Ok(Deployment::Vm),
            _ => Err(format!("Invalid deployment: {}", s)),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "huggingface" | "hf" => Ok(BackendKind::HuggingFace),
            "mock" => Ok(BackendKind::Mock),
            _ => Err(format!("Invalid model backend: {}", s)),
        }
    }
}

impl FromStr for LoadMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lazy" => Ok(LoadMode::Lazy),
            "background" | "eager" => Ok(LoadMode::Background),
            "blocking" => Ok(LoadMode::Blocking),
            _ => Err(format!("Invalid model load mode: {}", s)),
        }
    }
}

impl FromStr for LoadRetryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "retry" => Ok(LoadRetryPolicy::Retry),
            "fail-fast" | "failfast" => Ok(LoadRetryPolicy::FailFast),
            _ => Err(format!("Invalid model load retry policy: {}", s)),
        }
    }
}

impl TextgenConfig {
    pub fn load() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let environment: Environment = parse_env("ENVIRONMENT", "dev")?;
        let deployment: Deployment = parse_env("DEPLOYMENT", "serverless")?;
        let backend: BackendKind = parse_env("MODEL_BACKEND", "huggingface")?;

        let hf_token = optional_env("HF_TOKEN")
            .or_else(|| optional_env("HUGGINGFACE_HUB_TOKEN"))
            .map(Secret::new);

        if environment == Environment::Prod
            && backend == BackendKind::HuggingFace
            && hf_token.is_none()
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "HF_TOKEN is required in production but not set"
            )));
        }

        let name = get_env("MODEL_NAME", Some(DEFAULT_MODEL_NAME))?;
        let inference_endpoint = get_env(
            "INFERENCE_ENDPOINT",
            Some(&format!("{}/{}", DEFAULT_INFERENCE_BASE, name)),
        )?;

        let load_mode = match optional_env("MODEL_LOAD_MODE") {
            Some(mode) => mode
                .parse()
                .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
            None => default_load_mode(
                deployment,
                env_flag(&get_env("EAGER_LOAD", Some("false"))?),
            ),
        };

        let allowed_origins = match optional_env("CORS_ALLOWED_ORIGINS") {
            Some(list) => parse_origins(&list),
            None => default_origins(deployment),
        };

        Ok(TextgenConfig {
            common,
            environment,
            log_level: get_env("LOG_LEVEL", Some("info"))?,
            otlp_endpoint: optional_env("OTLP_ENDPOINT"),
            deployment,
            model: ModelConfig {
                name,
                backend,
                hf_token,
                cache_dir: optional_env("MODEL_CACHE_DIR").map(PathBuf::from),
                hub_url: get_env("HF_HUB_URL", Some(DEFAULT_HUB_URL))?,
                inference_endpoint,
                load_mode,
                retry_policy: parse_env("MODEL_LOAD_RETRY", "retry")?,
                load_timeout: Duration::from_secs(parse_secs(
                    "MODEL_LOAD_TIMEOUT_SECS",
                    DEFAULT_LOAD_TIMEOUT_SECS,
                )?),
                generation_timeout: Duration::from_secs(parse_secs(
                    "GENERATION_TIMEOUT_SECS",
                    DEFAULT_GENERATION_TIMEOUT_SECS,
                )?),
            },
            cors: CorsConfig { allowed_origins },
        })
    }
}

/// The VM deployment loads before serving; the serverless one only when asked to.
pub fn default_load_mode(deployment: Deployment, eager_load: bool) -> LoadMode {
    match (deployment, eager_load) {
        (Deployment::Vm, _) => LoadMode::Blocking,
        (Deployment::Serverless, true) => LoadMode::Background,
        (Deployment::Serverless, false) => LoadMode::Lazy,
    }
}

/// `*` (or an empty list) allows any origin.
pub fn parse_origins(list: &str) -> Option<Vec<String>> {
    let origins: Vec<String> = list
        .split(',')
        .map(|o| o.trim())
        .filter(|o| !o.is_empty())
        .map(|o| o.to_string())
        .collect();

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        None
    } else {
        Some(origins)
    }
}

fn default_origins(deployment: Deployment) -> Option<Vec<String>> {
    match deployment {
        Deployment::Serverless => None,
        Deployment::Vm => Some(VM_ALLOWED_ORIGINS.iter().map(|o| o.to_string()).collect()),
    }
}

fn parse_env<T>(key: &str, default: &str) -> Result<T, AppError>
where
    T: FromStr<Err = String>,
{
    get_env(key, Some(default))?
        .parse()
        .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

fn parse_secs(key: &str, default: u64) -> Result<u64, AppError> {
    get_env(key, Some(&default.to_string()))?
        .trim()
        .parse()
        .map_err(|e: std::num::ParseIntError| {
            AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e))
        })
}
