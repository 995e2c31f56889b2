//! Gateway binary: parse flags, validate, serve.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use redis_rest_gateway::{GatewayConfig, GatewayServer};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "redis_rest_gateway=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = GatewayConfig::parse();
    config.validate()?;

    let server = GatewayServer::new(config)?;
    server.run().await.map_err(|e| anyhow::anyhow!(e))
}
