//! Protocol version compatibility.

use crate::ProtocolError;

fn major_minor(version: &str) -> Vec<&str> {
    version.trim().split('.').take(2).collect()
}

/// Two versions interoperate when their `major.minor` components match.
pub fn is_compatible(a: &str, b: &str) -> bool {
    major_minor(a) == major_minor(b)
}

pub fn check_compatible(client: &str, server: &str) -> Result<(), ProtocolError> {
    if is_compatible(client, server) {
        Ok(())
    } else {
        Err(ProtocolError::VersionMismatch {
            client: client.to_string(),
            server: server.to_string(),
        })
    }
}
