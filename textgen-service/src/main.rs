use service_core::observability::init_tracing;
use textgen_service::config::TextgenConfig;
use textgen_service::services::init_metrics;
use textgen_service::startup::Application;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = TextgenConfig::load()?;

    init_tracing(
        "textgen-service",
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );
    init_metrics();

    tracing::info!(
        model = %config.model.name,
        deployment = config.deployment.as_str(),
        environment = ?config.environment,
        "Starting textgen-service"
    );

    let app = Application::build(config).await?;
    app.run_until_stopped().await?;

    Ok(())
}
