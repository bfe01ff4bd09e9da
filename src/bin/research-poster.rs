use tracing::info;

use pubmed_agent::{AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env()?;
    let state = AppState::from_config(&config)?;

    info!(
        "Posting research every {}s",
        config.post_interval.as_secs()
    );
    let scheduler = state.agent.clone().spawn_scheduler(config.post_interval);

    tokio::signal::ctrl_c().await?;
    scheduler.stop();
    info!("Research poster stopped");
    Ok(())
}
