use crossplay::prelude::*;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_FILTER: &str = "crossplay=info";

#[tokio::main]
async fn main() -> Result<(), GatewayError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .init();

    // Optional JSON config file as the only argument.
    let config = match std::env::args().nth(1) {
        Some(path) => {
            tracing::info!(%path, "loading config");
            GatewayConfig::load(&path)?
        }
        None => GatewayConfig::default(),
    };

    let gateway = Gateway::builder().config(config).build().await?;

    tokio::select! {
        result = gateway.run() => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupt received"),
    }

    gateway.shutdown().await?;
    tracing::info!(stats = ?gateway.registry().stats(), "gateway stopped");
    Ok(())
}
