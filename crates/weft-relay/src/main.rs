use anyhow::{Context, Result};
use weft_relay::RelayConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration from environment variables
    let config = RelayConfig::load().context("Failed to load configuration")?;

    // Run the server using the library's run function
    weft_relay::run(config).await.context("Relay server error")?;

    Ok(())
}
