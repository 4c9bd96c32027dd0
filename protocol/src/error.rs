use thiserror::Error;

/// Conditions that end a protocol session.
///
/// Each variant maps to exactly one message shown to the user, so the
/// `Display` text is also what travels in an outgoing `Error` message.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("Not a json encoded string {0}")]
    NotJson(String),

    #[error("Line longer than {0} bytes")]
    LineTooLong(usize),

    #[error("Unknown command {0}")]
    UnknownCommand(String),

    #[error("Malformed {kind} message: {reason}")]
    Malformed { kind: &'static str, reason: String },

    #[error("Not enough Hello arguments")]
    HelloIncomplete,

    #[error("Mismatch between versions of client ({client}) and server ({server})")]
    VersionMismatch { client: String, server: String },

    #[error("Password required")]
    PasswordRequired,

    #[error("Wrong password supplied")]
    WrongPassword,

    #[error("You must be known to server before sending this command")]
    NotLoggedIn,

    #[error("Connection with server timed out")]
    ServerTimeout,

    #[error("Client stopped sending state updates")]
    WatcherTimeout,

    #[error("{0}")]
    Remote(String),

    #[error("Failed to encode message: {0}")]
    Encode(String),
}

impl ProtocolError {
    /// Whether the session may be re-established after this error.
    ///
    /// Timeouts look like a lost connection; everything else means the
    /// peers cannot talk to each other and retrying would fail the same way.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ServerTimeout | Self::WatcherTimeout)
    }

    /// Whether the detecting side should tell its peer with an `Error`.
    pub fn should_notify_peer(&self) -> bool {
        !matches!(
            self,
            Self::Remote(_) | Self::ServerTimeout | Self::WatcherTimeout | Self::Encode(_)
        )
    }
}

/// Failure while reading a frame off the wire.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The transport failed; the peer is gone.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Bytes arrived but do not form a usable line.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_recoverable() {
        assert!(ProtocolError::ServerTimeout.is_recoverable());
        assert!(ProtocolError::WatcherTimeout.is_recoverable());
        assert!(!ProtocolError::HelloIncomplete.is_recoverable());
        assert!(!ProtocolError::Remote("bye".into()).is_recoverable());
    }

    #[test]
    fn remote_errors_are_not_echoed_back() {
        assert!(!ProtocolError::Remote("Wrong password supplied".into()).should_notify_peer());
        assert!(ProtocolError::NotJson("{".into()).should_notify_peer());
        assert!(ProtocolError::LineTooLong(16).should_notify_peer());
    }

    #[test]
    fn version_mismatch_message_names_both_sides() {
        let err = ProtocolError::VersionMismatch {
            client: "1.3.0".into(),
            server: "1.2.0".into(),
        };
        assert_eq!(
            err.to_string(),
            "Mismatch between versions of client (1.3.0) and server (1.2.0)"
        );
    }
}
