use anyhow::{Context, Result};

#[tokio::main]
async fn main() -> Result<()> {
    skycast_core::init()?;

    let (config, _warnings) = skycast_core::Config::load_validated()?;
    let app = skycast_core::App::new(config).context("Failed to start Skycast")?;
    let jobs = app.start().context("Failed to register alert jobs")?;

    tracing::info!("Skycast running with {} alert jobs, press Ctrl-C to stop", jobs);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    app.shutdown();
    Ok(())
}
