use anyhow::Context;
use clap::Parser;
use lockstep_protocol::constants::PROTOCOL_VERSION;
use lockstep_protocol::SystemClock;
use lockstep_server::{ServerArgs, ServerConfig, ServerState};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lockstep_server=debug,info".into()),
        )
        .init();

    let config = ServerConfig::from(ServerArgs::parse());
    let addr = config.listen;
    tracing::info!(
        mode = ?config.room_mode,
        password = config.password_hash.is_some(),
        "Starting Lockstep Server {}",
        PROTOCOL_VERSION
    );

    let state = ServerState::new(config, SystemClock::shared());
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Lockstep Server listening on {}", addr);
    lockstep_server::serve(listener, state).await
}
