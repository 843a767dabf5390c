mod configuration;
mod error;
mod routes;
mod state;

use anyhow::Result;
use std::sync::Arc;
use toolchat::executor::{query::BigQueryBackend, ToolExecutor};
use toolchat::orchestrator::Orchestrator;
use toolchat::providers::factory;
use toolchat::registry::{default_tools, InMemoryRegistry};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let settings = configuration::Settings::new()?;

    // Tool catalog
    let registry = Arc::new(InMemoryRegistry::new());
    if settings.registry.default_tools {
        for tool in default_tools() {
            registry.register(tool).await?;
        }
    }
    if let Some(path) = &settings.registry.tools_file {
        let tools = registry.load_file(path).await?;
        info!("loaded {} tools from {}", tools.len(), path.display());
    }

    // Tool execution backends
    let mut executor = ToolExecutor::new(registry.clone())?;
    match settings.bigquery.to_config()? {
        Some(config) => {
            info!("query tools run against BigQuery project {}", config.project_id);
            executor = executor.with_query_backend(Arc::new(BigQueryBackend::new(config)?));
        }
        None => info!("no BigQuery project configured, query tools are disabled"),
    }

    let provider_type = settings.provider.provider_type();
    let provider = factory::get_provider(settings.provider.into_config())?;
    info!("using {} provider", provider_type);

    let orchestrator = Orchestrator::new(provider, registry.clone(), executor)
        .with_config(settings.orchestrator.to_config());

    let state = state::AppState {
        orchestrator: Arc::new(orchestrator),
        registry,
    };

    // Create router with CORS support
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::configure(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let listener = tokio::net::TcpListener::bind(settings.server.socket_addr()?).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
