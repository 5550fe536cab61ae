//! Application startup and lifecycle management.

use crate::config::{BackendKind, Deployment, LoadMode, ModelConfig, TextgenConfig};
use crate::handlers;
use crate::middleware::http_metrics_middleware;
use crate::services::backend::huggingface::{HuggingFaceConfig, HuggingFaceLoader};
use crate::services::backend::mock::MockModelLoader;
use crate::services::backend::ModelLoader;
use crate::services::{BackendHandle, CoordinatorError, ModelCoordinator};
use axum::http::{header, HeaderValue, Method};
use axum::middleware::from_fn;
use axum::routing::{get, post};
use axum::Router;
use service_core::error::AppError;
use service_core::middleware::{request_id_middleware, REQUEST_ID_HEADER};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<TextgenConfig>,
    pub coordinator: Arc<ModelCoordinator>,
}

impl AppState {
    /// The loaded model, per the deployment's readiness contract: serverless
    /// requests wait for the load, VM requests are turned away until ready.
    pub async fn model(&self) -> Result<BackendHandle, AppError> {
        let result = match self.config.deployment {
            Deployment::Serverless => self.coordinator.acquire().await,
            Deployment::Vm => self.coordinator.try_acquire(),
        };

        result.map_err(|e| match e {
            CoordinatorError::NotReady => AppError::ModelNotLoaded,
            other => {
                tracing::warn!(error = %other, "Model unavailable for request");
                AppError::ModelUnavailable(anyhow::anyhow!(other))
            }
        })
    }
}

/// Build the loader the configuration asks for.
pub fn build_loader(config: &ModelConfig) -> Result<Arc<dyn ModelLoader>, AppError> {
    match config.backend {
        BackendKind::Mock => Ok(Arc::new(MockModelLoader::new(config.name.clone()))),
        BackendKind::HuggingFace => {
            let loader = HuggingFaceLoader::new(HuggingFaceConfig {
                model: config.name.clone(),
                token: config.hf_token.clone(),
                cache_dir: config.cache_dir.clone(),
                hub_url: config.hub_url.clone(),
                inference_endpoint: config.inference_endpoint.clone(),
                request_timeout: config.generation_timeout,
            })
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?;
            Ok(Arc::new(loader))
        }
    }
}

fn cors_layer(allowed_origins: Option<&[String]>) -> CorsLayer {
    let allow_origin = match allowed_origins {
        None => AllowOrigin::from(Any),
        Some(origins) => AllowOrigin::list(origins.iter().filter_map(|o| {
            o.parse::<HeaderValue>()
                .map_err(|e| tracing::error!("Invalid CORS origin '{}': {}. Skipping.", o, e))
                .ok()
        })),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::HeaderName::from_static(REQUEST_ID_HEADER),
        ])
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(state.config.cors.allowed_origins.as_deref());

    // The VM deployment serves /generate as an alias of /chat.
    let generate_route = match state.config.deployment {
        Deployment::Serverless => post(handlers::generate::generate),
        Deployment::Vm => post(handlers::chat::chat),
    };

    Router::new()
        .route("/", get(handlers::system::root))
        .route("/health", get(handlers::system::health_check))
        .route("/ready", get(handlers::system::readiness_check))
        .route("/debug/env", get(handlers::system::debug_env))
        .route("/metrics", get(handlers::system::metrics))
        .route("/generate", generate_route)
        .route("/chat", post(handlers::chat::chat))
        .layer(from_fn(http_metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .layer(cors)
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
    state: AppState,
}

impl Application {
    /// Build the application with the loader the configuration selects.
    pub async fn build(config: TextgenConfig) -> Result<Self, AppError> {
        let loader = build_loader(&config.model)?;
        Self::build_with_loader(config, loader).await
    }

    /// Build the application around an explicit loader.
    pub async fn build_with_loader(
        config: TextgenConfig,
        loader: Arc<dyn ModelLoader>,
    ) -> Result<Self, AppError> {
        tracing::info!(
            model = %config.model.name,
            provider = loader.provider(),
            deployment = config.deployment.as_str(),
            load_mode = ?config.model.load_mode,
            retry_policy = config.model.retry_policy.as_str(),
            "Initializing model coordinator"
        );

        let coordinator = ModelCoordinator::new(
            loader,
            config.model.retry_policy,
            config.model.load_timeout,
        );

        match config.model.load_mode {
            LoadMode::Lazy => {}
            LoadMode::Background => coordinator.start_background(),
            LoadMode::Blocking => {
                coordinator.acquire().await.map_err(|e| {
                    tracing::error!(error = %e, "Model failed to load at startup");
                    AppError::ModelUnavailable(anyhow::anyhow!(e))
                })?;
            }
        }

        let state = AppState {
            config: Arc::new(config),
            coordinator,
        };

        // Port 0 = random port for testing
        let addr = SocketAddr::from(([0, 0, 0, 0], state.config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port, "textgen-service listening");

        let router = build_router(state.clone());

        Ok(Self {
            port,
            listener,
            router,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.port
    }

    pub fn coordinator(&self) -> &Arc<ModelCoordinator> {
        &self.state.coordinator
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Service shutdown complete");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
