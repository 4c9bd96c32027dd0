use lockstep_protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Connection with server failed: {0}")]
    ConnectionFailed(String),

    #[error("Disconnected from server")]
    RetriesExhausted,

    #[error("Client is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
