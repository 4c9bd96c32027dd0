use anyhow::Context;
use clap::Parser;
use lockstep_client::commands::parse_command;
use lockstep_client::{
    ClientArgs, ClientConfig, ConnectionManager, ConsoleUi, Player, SyncClient, Ui, VirtualPlayer,
};
use lockstep_protocol::constants::PROTOCOL_VERSION;
use lockstep_protocol::SystemClock;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lockstep_client=debug,info".into()),
        )
        .init();

    let mut config = ClientConfig::from(ClientArgs::parse());
    let mut ui = ConsoleUi::new();
    if config.username.trim().is_empty() {
        config.username = ui
            .prompt_for("Username")
            .context("a username is required")?;
    }
    tracing::info!(
        server = %config.address(),
        room = %config.room,
        "Starting Lockstep Client {}",
        PROTOCOL_VERSION
    );

    let clock = SystemClock::shared();
    let mut player = VirtualPlayer::new(clock.clone());
    if let Some(file) = &config.file {
        player = player.with_duration(file.duration);
        player
            .open_file(Path::new(&file.name))
            .map_err(anyhow::Error::msg)?;
    }

    let client = SyncClient::new(config.clone(), Box::new(player), Box::new(ui), clock);
    let manager = Arc::new(ConnectionManager::new(client.clone(), &config));

    let console = client.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            match parse_command(&line) {
                Ok(command) => command.execute(&console),
                Err(error) => console.show_error(&error, false),
            }
        }
    });

    let stopper = Arc::clone(&manager);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutting down");
            stopper.stop();
        }
    });

    manager.run().await?;
    Ok(())
}
