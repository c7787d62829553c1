//! Board Node binary
//!
//! Runs the epoch resolution engine for a Mosaic canvas.

use mosaic_board::{BoardConfig, BoardNode};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "board_node=info,mosaic_board=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Board Node");

    let config = BoardConfig::from_env()?;

    // Create and run node
    let node = BoardNode::new(config).await?;
    node.run().await?;

    Ok(())
}
