use credit_pack_orchestrator::{api::start_server, Orchestrator, OrchestratorConfig};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = OrchestratorConfig::from_env()?;
    if !config.has_api_key() {
        warn!("⚠️  GEMINI_API_KEY not set in .env, model calls will fail");
    }

    let port = config.port;
    info!("🚀 Credit Pack Orchestrator - API Server");
    info!("📍 Port: {}", port);
    info!(
        classifier = %config.classifier_model,
        agent = %config.agent_model,
        writer = %config.writer_model,
        search = config.search_base_url.is_some(),
        "Models configured"
    );

    let factory = Arc::new(move || Orchestrator::from_config(config.clone()));

    info!("📡 Starting API server...");
    start_server(factory, port).await?;

    Ok(())
}
