use clap::Parser;

use duplex_server::app::{build_router, AppState};
use duplex_server::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ServerConfig::parse();
    let bind_addr = config.bind_addr.clone();

    let state = AppState::new(config);
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("duplex-server listening on {bind_addr}");
    axum::serve(listener, router).await?;

    Ok(())
}
