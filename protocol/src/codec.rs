//! Newline-delimited JSON framing.

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::FrameError;
use crate::messages::Message;
use crate::ProtocolError;

/// Parse one line received from the peer.
///
/// Blank lines are skipped and yield `Ok(None)`.
pub fn decode_line(line: &str) -> Result<Option<Message>, ProtocolError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let value: Value =
        serde_json::from_str(line).map_err(|_| ProtocolError::NotJson(line.to_string()))?;
    let Value::Object(object) = &value else {
        return Err(ProtocolError::NotJson(line.to_string()));
    };

    let mut keys = object.keys();
    let (Some(kind), None) = (keys.next(), keys.next()) else {
        return Err(ProtocolError::UnknownCommand(line.to_string()));
    };
    let Some(kind) = Message::KINDS
        .iter()
        .copied()
        .find(|known| *known == kind.as_str())
    else {
        return Err(ProtocolError::UnknownCommand(kind.clone()));
    };

    serde_json::from_value(value)
        .map(Some)
        .map_err(|err| ProtocolError::Malformed {
            kind,
            reason: err.to_string(),
        })
}

/// Serialize a message as one line, newline included.
pub fn encode_line(message: &Message) -> Result<String, ProtocolError> {
    let mut line =
        serde_json::to_string(message).map_err(|err| ProtocolError::Encode(err.to_string()))?;
    line.push('\n');
    Ok(line)
}

/// Splits an incoming byte stream into lines.
///
/// Lines over `max_length` bytes and lines that are not UTF-8 are reported as
/// protocol errors instead of transport errors. Bytes read before a
/// `next_line` future is dropped stay buffered, so the call is safe inside
/// `select!`.
#[derive(Debug)]
pub struct LineReader<R> {
    reader: R,
    buf: Vec<u8>,
    max_length: usize,
}

impl<R: AsyncBufRead + Unpin> LineReader<R> {
    pub fn new(reader: R, max_length: usize) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            max_length,
        }
    }

    /// Next line without its terminator, or `None` once the peer closed.
    pub async fn next_line(&mut self) -> Result<Option<String>, FrameError> {
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return self.take_line().map(Some);
            }

            let (used, complete) = match available.iter().position(|byte| *byte == b'\n') {
                Some(end) => (end + 1, true),
                None => (available.len(), false),
            };
            self.buf.extend_from_slice(&available[..used]);
            self.reader.consume(used);

            let content = self.buf.len() - usize::from(complete);
            if content > self.max_length {
                self.buf.clear();
                return Err(ProtocolError::LineTooLong(self.max_length).into());
            }
            if complete {
                return self.take_line().map(Some);
            }
        }
    }

    fn take_line(&mut self) -> Result<String, FrameError> {
        let bytes = std::mem::take(&mut self.buf);
        let mut line = String::from_utf8(bytes).map_err(|err| {
            ProtocolError::NotJson(String::from_utf8_lossy(err.as_bytes()).trim_end().to_string())
        })?;
        let end = line.trim_end_matches(['\n', '\r']).len();
        line.truncate(end);
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ErrorMessage, StateMessage};

    #[test]
    fn blank_lines_are_skipped() {
        assert_eq!(decode_line("   \r"), Ok(None));
    }

    #[test]
    fn garbage_is_not_json() {
        assert!(matches!(
            decode_line("hello there"),
            Err(ProtocolError::NotJson(_))
        ));
        assert!(matches!(decode_line("[1,2]"), Err(ProtocolError::NotJson(_))));
    }

    #[test]
    fn unrecognised_key_is_unknown_command() {
        assert_eq!(
            decode_line(r#"{"Chat": "hi"}"#),
            Err(ProtocolError::UnknownCommand("Chat".into()))
        );
        assert!(matches!(
            decode_line(r#"{"List": null, "Set": {}}"#),
            Err(ProtocolError::UnknownCommand(_))
        ));
    }

    #[test]
    fn known_kind_with_bad_body_is_malformed() {
        assert!(matches!(
            decode_line(r#"{"Error": 5}"#),
            Err(ProtocolError::Malformed { kind: "Error", .. })
        ));
    }

    #[test]
    fn decodes_trailing_newline_and_crlf() {
        let decoded = decode_line("{\"State\": {}}\r\n").unwrap();
        assert_eq!(decoded, Some(Message::State(StateMessage::default())));
    }

    #[test]
    fn encoded_line_ends_with_single_newline() {
        let line = encode_line(&Message::Error(ErrorMessage {
            message: "bye".into(),
        }))
        .unwrap();
        assert_eq!(line, "{\"Error\":{\"message\":\"bye\"}}\n");
        assert_eq!(line.matches('\n').count(), 1);
    }

    fn reader(bytes: &[u8], max_length: usize) -> LineReader<tokio::io::BufReader<&[u8]>> {
        // A tiny buffer forces lines to arrive over several reads.
        LineReader::new(tokio::io::BufReader::with_capacity(4, bytes), max_length)
    }

    #[tokio::test]
    async fn lines_are_split_and_terminators_stripped() {
        let mut lines = reader(b"{\"a\":1}\r\n\nlast", 64);
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("{\"a\":1}"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some(""));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("last"));
        assert!(lines.next_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_utf8_is_not_json() {
        let mut lines = reader(b"\xff\xfe{\"Hello\":1}\nok\n", 64);
        match lines.next_line().await {
            Err(FrameError::Protocol(ProtocolError::NotJson(_))) => {}
            other => panic!("expected NotJson, got {other:?}"),
        }
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn overlong_line_is_refused_without_a_terminator() {
        let mut lines = reader(&[b'x'; 40], 16);
        match lines.next_line().await {
            Err(FrameError::Protocol(ProtocolError::LineTooLong(16))) => {}
            other => panic!("expected LineTooLong, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn line_at_the_limit_is_accepted() {
        let mut bytes = vec![b'y'; 16];
        bytes.extend_from_slice(b"\n");
        let mut lines = reader(&bytes, 16);
        assert_eq!(lines.next_line().await.unwrap().map(|line| line.len()), Some(16));
    }
}
