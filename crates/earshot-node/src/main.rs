//! Earshot Node binary

use earshot_node::{EarshotNode, NodeConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "earshot_node=info,earshot_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Earshot Node");

    let config = NodeConfig::from_env()?;
    let node = EarshotNode::new(config)?;
    node.run().await?;

    Ok(())
}
