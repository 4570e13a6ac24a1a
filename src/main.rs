use anyhow::Context;
use memoria::api::{self, app_state::AppState};
use memoria::config::loader::ConfigLoader;
use memoria::llm::LlmService;
use memoria::observability::{
    AppMetrics, HealthCheckResult, ObservabilityState, create_observability_router, init_tracing,
};
use memoria::services::create_memory_service;
use memoria::storage::StorageFactory;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::var("MEMORIA_CONFIG") {
        Ok(path) => ConfigLoader::load_from(path)?,
        Err(_) => ConfigLoader::load()?,
    };
    ConfigLoader::validate(&config)?;

    let _log_guard = init_tracing(&config.logging);
    info!("Starting {} ({})...", config.app_name, config.environment);

    let storage = StorageFactory::create(&config.database)
        .await
        .context("failed to initialise storage")?;
    info!("Storage backend initialized: {:?}", storage.backend());

    let metrics = Arc::new(AppMetrics::default());
    let observability_state = Arc::new(ObservabilityState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        metrics.clone(),
    ));
    let started = std::time::Instant::now();
    let health = storage.health_check().await;
    observability_state
        .add_health_check(HealthCheckResult {
            name: "storage".to_string(),
            healthy: health.is_ok(),
            message: match &health {
                Ok(()) => "ok".to_string(),
                Err(e) => e.to_string(),
            },
            latency_ms: started.elapsed().as_millis() as u64,
        })
        .await;

    let llm = LlmService::from_config(&config.llm)?;
    info!("LLM client initialized: {} via {}", config.llm.model, config.llm.base_url);

    let memory_service = create_memory_service(
        storage.repositories(),
        llm,
        config.memory.clone(),
        metrics.clone(),
    )?;
    let ticker = memory_service.clone().spawn_flush_ticker();
    info!(
        "Flush ticker running every {}s",
        config.memory.flush_check_interval
    );

    let app_state = AppState::new(memory_service, metrics);
    let router = create_observability_router(observability_state).merge(api::create_router(app_state));
    info!("API router created with observability endpoints");

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    ticker.abort();
    storage.close().await;
    Ok(())
}
