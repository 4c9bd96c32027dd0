//! Playback synchronization client: keeps a local player in step with the
//! other members of a room on a lockstep server.

pub mod client;
pub mod commands;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod player;
pub mod session;
pub mod ui;
pub mod users;
pub mod utils;
pub mod warnings;

pub use client::SyncClient;
pub use config::{ClientArgs, ClientConfig, SyncSettings};
pub use connection::{ConnectionManager, ConnectionState};
pub use error::ClientError;
pub use player::{Player, PlayerStatus, VirtualPlayer};
pub use ui::{ConsoleUi, Ui};
