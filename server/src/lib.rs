//! Playback synchronization server: rooms of watchers held to the slowest
//! member, reached over newline-delimited JSON on TCP.

pub mod config;
pub mod connection;
pub mod motd;
pub mod room;
pub mod session;
pub mod state;

use tokio::net::TcpListener;

pub use config::{RoomMode, ServerArgs, ServerConfig};
pub use state::ServerState;

/// Accept clients forever, one task per connection.
pub async fn serve(listener: TcpListener, state: ServerState) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = connection::handle_connection(stream, peer, state).await {
                tracing::error!("Connection from {} failed: {:#}", peer, e);
            }
        });
    }
}
