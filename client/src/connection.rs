//! TCP transport for the client: connect, run a session, back off and
//! reconnect when the link drops.

use lockstep_protocol::codec::{encode_line, LineReader};
use lockstep_protocol::constants::{MAX_LINE_LENGTH, RECONNECT_BASE_DELAY};
use lockstep_protocol::messages::Message;
use lockstep_protocol::{FrameError, ProtocolError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, timeout, MissedTickBehavior};

use crate::client::SyncClient;
use crate::config::ClientConfig;
use crate::error::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

enum SessionEnd {
    Stopped,
    Lost,
}

/// Wait before reconnect attempt `attempt` (1-based).
pub fn reconnect_delay(attempt: u32) -> Duration {
    Duration::from_secs_f64(RECONNECT_BASE_DELAY * 2f64.powi(attempt as i32))
}

pub struct ConnectionManager {
    client: SyncClient,
    address: String,
    retries: u32,
    poll_interval: Duration,
    running: AtomicBool,
    state: Mutex<ConnectionState>,
    stop: watch::Sender<bool>,
}

impl ConnectionManager {
    pub fn new(client: SyncClient, config: &ClientConfig) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            client,
            address: config.address(),
            retries: config.reconnect_retries,
            poll_interval: config.poll_interval,
            running: AtomicBool::new(false),
            state: Mutex::new(ConnectionState::Disconnected),
            stop,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    /// Ask `run` to wind down after its current step.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// Connect and keep the session alive until stopped, a fatal error, or
    /// the retry budget is spent.
    pub async fn run(&self) -> Result<(), ClientError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ClientError::AlreadyRunning);
        }
        self.stop.send_replace(false);
        let result = self.run_loop().await;
        self.set_state(ConnectionState::Disconnected);
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn run_loop(&self) -> Result<(), ClientError> {
        let mut stop = self.stop.subscribe();
        let mut times_tried: u32 = 0;
        let mut reconnecting = false;

        loop {
            if *stop.borrow() {
                return Ok(());
            }
            self.set_state(ConnectionState::Connecting);
            self.client
                .show_message(&format!("Attempting to connect to {}", self.address));

            let connected = tokio::select! {
                result = TcpStream::connect(&self.address) => result,
                _ = stop.changed() => return Ok(()),
            };

            match connected {
                Ok(stream) => {
                    tracing::info!("Connected to {}", self.address);
                    times_tried = 0;
                    reconnecting = false;
                    self.set_state(ConnectionState::Connected);
                    match self.run_session(stream, &mut stop).await {
                        Ok(SessionEnd::Stopped) => return Ok(()),
                        Ok(SessionEnd::Lost) => {}
                        Err(error) if error.is_recoverable() => {
                            self.client.show_error(&error.to_string(), false);
                        }
                        Err(error) => {
                            self.client.show_error(&error.to_string(), true);
                            return Err(error.into());
                        }
                    }
                }
                Err(error) if !reconnecting => {
                    tracing::warn!("Failed to connect to {}: {}", self.address, error);
                    self.client
                        .show_error("Connection with server failed", true);
                    return Err(ClientError::ConnectionFailed(error.to_string()));
                }
                Err(error) => {
                    tracing::debug!("Reconnect to {} failed: {}", self.address, error);
                }
            }

            self.set_state(ConnectionState::Disconnected);
            if times_tried == 0 {
                self.client.on_connection_lost();
            }
            if times_tried >= self.retries {
                self.client
                    .show_error(&ClientError::RetriesExhausted.to_string(), true);
                return Err(ClientError::RetriesExhausted);
            }
            times_tried += 1;
            reconnecting = true;
            self.client
                .show_message("Connection with server lost, attempting to reconnect");

            let sleep = tokio::time::sleep(reconnect_delay(times_tried));
            tokio::pin!(sleep);
            tokio::select! {
                _ = sleep.as_mut() => {}
                _ = stop.changed() => return Ok(()),
            }
        }
    }

    async fn run_session(
        &self,
        stream: TcpStream,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd, ProtocolError> {
        let (reader, mut writer) = stream.into_split();
        let mut lines = LineReader::new(BufReader::new(reader), MAX_LINE_LENGTH);
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        let send_task = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let line = match encode_line(&message) {
                    Ok(line) => line,
                    Err(error) => {
                        tracing::error!("Failed to serialize message: {}", error);
                        continue;
                    }
                };
                if let Err(error) = writer.write_all(line.as_bytes()).await {
                    tracing::warn!("Failed to send message: {}", error);
                    break;
                }
            }
            let _ = writer.shutdown().await;
        });

        self.client.attach(tx);
        let mut poll = interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Err(error) = self.client.handle_line(&line) {
                            break Err(error);
                        }
                    }
                    Ok(None) => break Ok(SessionEnd::Lost),
                    Err(FrameError::Protocol(error)) => break Err(error),
                    Err(FrameError::Io(error)) => {
                        tracing::debug!("Read failed: {}", error);
                        break Ok(SessionEnd::Lost);
                    }
                },
                _ = poll.tick() => {
                    if let Err(error) = self.client.poll_player() {
                        break Err(error);
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break Ok(SessionEnd::Stopped);
                    }
                }
            }
        };

        if let Err(error) = &result {
            if error.should_notify_peer() {
                self.client.send(Message::error(error.to_string()));
            }
        }
        self.client.detach();
        if timeout(Duration::from_secs(1), send_task).await.is_err() {
            tracing::debug!("Writer did not finish in time");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::VirtualPlayer;
    use crate::ui::testing::RecordingUi;
    use lockstep_protocol::codec::decode_line;
    use lockstep_protocol::constants::PROTOCOL_VERSION;
    use lockstep_protocol::messages::{HelloMessage, RoomRef};
    use lockstep_protocol::SystemClock;
    use std::sync::Arc;
    use tokio::io::AsyncBufReadExt;
    use tokio::net::TcpListener;

    fn manager(port: u16, retries: u32) -> (Arc<ConnectionManager>, RecordingUi) {
        manager_with(port, retries, |_| {})
    }

    fn manager_with(
        port: u16,
        retries: u32,
        configure: impl FnOnce(&mut ClientConfig),
    ) -> (Arc<ConnectionManager>, RecordingUi) {
        let mut config = ClientConfig {
            host: "127.0.0.1".to_string(),
            port,
            username: "alice".to_string(),
            reconnect_retries: retries,
            ..ClientConfig::default()
        };
        configure(&mut config);
        let ui = RecordingUi::default();
        let clock = SystemClock::shared();
        let client = SyncClient::new(
            config.clone(),
            Box::new(VirtualPlayer::new(clock.clone())),
            Box::new(ui.clone()),
            clock,
        );
        (Arc::new(ConnectionManager::new(client, &config)), ui)
    }

    async fn unused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn reconnect_delay_doubles() {
        assert_eq!(reconnect_delay(1), Duration::from_millis(200));
        assert_eq!(reconnect_delay(2), Duration::from_millis(400));
        assert_eq!(reconnect_delay(5), Duration::from_millis(3200));
    }

    #[tokio::test]
    async fn first_connect_failure_is_fatal() {
        let port = unused_port().await;
        let (manager, ui) = manager(port, 3);
        let result = manager.run().await;
        assert!(matches!(result, Err(ClientError::ConnectionFailed(_))));
        assert!(ui.saw(&format!("Attempting to connect to 127.0.0.1:{port}")));
        assert!(ui
            .errors
            .lock()
            .contains(&"Connection with server failed".to_string()));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn lost_connection_retries_then_gives_up() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (manager, ui) = manager(port, 1);

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
            drop(listener);
        });

        let result = manager.run().await;
        server.await.unwrap();
        assert!(matches!(result, Err(ClientError::RetriesExhausted)));
        assert!(ui.saw("Connection with server lost, attempting to reconnect"));
        assert!(ui
            .errors
            .lock()
            .contains(&"Disconnected from server".to_string()));
    }

    #[tokio::test]
    async fn server_error_stops_the_client() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (manager, ui) = manager(port, 3);

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = socket.into_split();
            let mut lines = BufReader::new(reader).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            let Some(Message::Hello(hello)) = decode_line(&line).unwrap() else {
                panic!("expected Hello, got {line}");
            };
            assert_eq!(hello.username(), Some("alice"));

            let reply = Message::Hello(HelloMessage {
                username: Some("alice".into()),
                room: Some(RoomRef::named("default")),
                version: Some(PROTOCOL_VERSION.into()),
                ..HelloMessage::default()
            });
            writer
                .write_all(encode_line(&reply).unwrap().as_bytes())
                .await
                .unwrap();
            let error = Message::error("Server is shutting down");
            writer
                .write_all(encode_line(&error).unwrap().as_bytes())
                .await
                .unwrap();
            // Keep the socket open until the client hangs up.
            while let Ok(Some(_)) = lines.next_line().await {}
        });

        let result = manager.run().await;
        assert!(matches!(
            result,
            Err(ClientError::Protocol(ProtocolError::Remote(ref message)))
                if message == "Server is shutting down"
        ));
        assert!(ui.saw("Successfully connected to server"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn stop_ends_a_live_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (manager, _ui) = manager(port, 3);

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(socket).lines();
            while let Ok(Some(_)) = lines.next_line().await {}
        });

        let runner = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.run().await })
        };
        while manager.state() != ConnectionState::Connected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(matches!(manager.run().await, Err(ClientError::AlreadyRunning)));

        manager.stop();
        let result = runner.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (manager, ui) = manager_with(port, 0, |config| config.sync.protocol_timeout = 0.5);

        // Accept and read, never answer.
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(socket).lines();
            while let Ok(Some(_)) = lines.next_line().await {}
        });

        let result = timeout(Duration::from_secs(5), manager.run())
            .await
            .expect("client never noticed the silent server");
        assert!(matches!(result, Err(ClientError::RetriesExhausted)));
        assert!(ui
            .errors
            .lock()
            .contains(&"Connection with server timed out".to_string()));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn undecodable_bytes_from_server_are_fatal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (manager, _ui) = manager(port, 3);

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = socket.into_split();
            writer.write_all(b"\xff\xfe{\"Hello\":1}\n").await.unwrap();
            let mut lines = BufReader::new(reader).lines();
            let mut error = None;
            while let Ok(Some(line)) = lines.next_line().await {
                if let Ok(Some(Message::Error(message))) = decode_line(&line) {
                    error = Some(message.message);
                }
            }
            error
        });

        let result = manager.run().await;
        assert!(matches!(
            result,
            Err(ClientError::Protocol(ProtocolError::NotJson(_)))
        ));
        let error = server.await.unwrap().expect("client sent no Error");
        assert!(error.starts_with("Not a json encoded string"));
    }
}
