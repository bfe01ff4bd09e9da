use std::sync::Arc;
use tracing::info;

use pubmed_agent::{router, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    info!("Starting PubMed agent");
    info!("PubMed base URL: {}", config.base_url);
    info!(
        "Rate limit: {} requests/s, max retries: {}",
        config.requests_per_second, config.max_retries
    );

    let state = Arc::new(AppState::from_config(&config)?);
    let sweeper = state.ledger.start_sweeper();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("PubMed agent listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.stop();
    info!("PubMed agent stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
