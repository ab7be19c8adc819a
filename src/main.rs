use anyhow::{Context, Result};
use weft::EngineConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration from environment variables
    let config = EngineConfig::load().context("Failed to load configuration")?;

    // Run the engine using the library's run function
    weft::run(config).await.context("Engine error")?;

    Ok(())
}
