use lockstep_protocol::codec::{decode_line, encode_line, LineReader};
use lockstep_protocol::constants::{MAX_LINE_LENGTH, PROTOCOL_VERSION};
use lockstep_protocol::messages::{HelloMessage, RoomRef, SetMessage, StateMessage};
use lockstep_protocol::version::check_compatible;
use lockstep_protocol::{FrameError, Message, ProtocolError};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::motd::{load_motd, MotdContext};
use crate::room::{WatcherEvent, WatcherSender};
use crate::session::ServerSession;
use crate::state::ServerState;

const LOG_TAG: &str = "[Lockstep Server]";
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

type ClientSender = mpsc::UnboundedSender<Message>;

/// Serve one client until it disconnects, errors out or goes silent.
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: ServerState,
) -> anyhow::Result<()> {
    let watcher_id = Uuid::new_v4();
    tracing::info!("{LOG_TAG} Client {} connected from {}", watcher_id, peer);

    let (reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // Spawn task to send messages to client
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let line = match encode_line(&msg) {
                Ok(line) => line,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {}", e);
                    continue;
                }
            };
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                tracing::error!("Failed to send message: {}", e);
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<WatcherEvent>();
    let mut connection = ServerConnection::new(watcher_id, peer, state.clone(), tx, events_tx);
    let mut lines = LineReader::new(BufReader::new(reader), MAX_LINE_LENGTH);
    let mut ticker = tokio::time::interval(state.config().state_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let outcome = loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if let Err(e) = connection.handle_line(&line) {
                        break Err(e);
                    }
                }
                Ok(None) => {
                    tracing::info!("{LOG_TAG} Client {} closing connection", watcher_id);
                    break Ok(());
                }
                Err(FrameError::Protocol(e)) => break Err(e),
                Err(FrameError::Io(e)) => {
                    tracing::warn!("{LOG_TAG} Read error from {}: {}", watcher_id, e);
                    break Ok(());
                }
            },
            Some(event) = events_rx.recv() => connection.handle_event(event),
            _ = ticker.tick() => {
                if let Err(e) = connection.tick() {
                    break Err(e);
                }
            }
        }
    };

    if let Err(e) = outcome {
        connection.fail(&e);
    }
    connection.close();
    drop(connection);

    // Let a pending Error reach the client before the socket goes away.
    if tokio::time::timeout(FLUSH_TIMEOUT, send_task).await.is_err() {
        tracing::debug!("{LOG_TAG} Gave up flushing output for {}", watcher_id);
    }
    Ok(())
}

/// Protocol handling for one connection, independent of the socket.
struct ServerConnection {
    id: Uuid,
    peer: SocketAddr,
    state: ServerState,
    session: ServerSession,
    outbound: ClientSender,
    events: WatcherSender,
    username: Option<String>,
    connected_at: f64,
}

impl ServerConnection {
    fn new(
        id: Uuid,
        peer: SocketAddr,
        state: ServerState,
        outbound: ClientSender,
        events: WatcherSender,
    ) -> Self {
        Self {
            id,
            peer,
            session: ServerSession::new(state.clock()),
            connected_at: state.now(),
            state,
            outbound,
            events,
            username: None,
        }
    }

    fn is_logged_in(&self) -> bool {
        self.username.is_some()
    }

    fn send(&self, message: Message) {
        tracing::debug!("{LOG_TAG} -> {}: {}", self.id, message.kind());
        let _ = self.outbound.send(message);
    }

    fn handle_line(&mut self, line: &str) -> Result<(), ProtocolError> {
        match decode_line(line)? {
            Some(message) => self.handle_message(message),
            None => Ok(()),
        }
    }

    fn handle_message(&mut self, message: Message) -> Result<(), ProtocolError> {
        tracing::debug!("{LOG_TAG} <- {}: {}", self.id, message.kind());
        match message {
            Message::Hello(hello) => self.handle_hello(hello),
            _ if !self.is_logged_in() => Err(ProtocolError::NotLoggedIn),
            Message::Set(set) => {
                self.handle_set(set);
                Ok(())
            }
            Message::List(_) => {
                let listing = self.state.user_list(&self.id);
                self.send(Message::List(Some(listing)));
                Ok(())
            }
            Message::State(state) => {
                self.handle_state(&state);
                Ok(())
            }
            Message::Error(error) => Err(ProtocolError::Remote(error.message)),
        }
    }

    fn handle_hello(&mut self, hello: HelloMessage) -> Result<(), ProtocolError> {
        if let Some(username) = &self.username {
            tracing::warn!("{LOG_TAG} Ignoring repeated Hello from {}", username);
            return Ok(());
        }
        let (Some(username), Some(room), Some(version)) =
            (hello.username(), hello.room_name(), hello.version())
        else {
            return Err(ProtocolError::HelloIncomplete);
        };
        check_compatible(version, PROTOCOL_VERSION)?;
        self.check_password(hello.password.as_deref())?;

        let name = self
            .state
            .add_watcher(self.id, username, room, self.events.clone());
        let user_ip = self.peer.ip().to_string();
        let motd = load_motd(
            self.state.config().motd_file.as_deref(),
            &MotdContext {
                version: PROTOCOL_VERSION,
                user_ip: &user_ip,
                username: &name,
                room,
            },
        );

        // Echo the client's version back so older patch levels stay happy.
        self.send(Message::Hello(HelloMessage {
            username: Some(name.clone()),
            password: None,
            room: Some(RoomRef::named(room)),
            version: Some(version.to_string()),
            motd: Some(motd),
        }));
        self.username = Some(name);
        Ok(())
    }

    fn check_password(&self, supplied: Option<&str>) -> Result<(), ProtocolError> {
        let Some(expected) = &self.state.config().password_hash else {
            return Ok(());
        };
        match supplied.filter(|password| !password.is_empty()) {
            None => Err(ProtocolError::PasswordRequired),
            Some(password) if password != expected => Err(ProtocolError::WrongPassword),
            Some(_) => Ok(()),
        }
    }

    fn handle_set(&mut self, set: SetMessage) {
        if let Some(room) = set.room {
            let name = room.name.trim();
            if name.is_empty() {
                tracing::warn!("{LOG_TAG} Ignoring room change without a name from {}", self.id);
            } else {
                self.state.set_watcher_room(&self.id, name);
            }
        }
        if let Some(file) = set.file {
            self.state.set_file(&self.id, file);
        }
    }

    fn handle_state(&mut self, state: &StateMessage) {
        if let Some(report) = self.session.receive_state(state) {
            self.state
                .update_state(&self.id, report.playstate, report.message_age);
        }
    }

    fn handle_event(&mut self, event: WatcherEvent) {
        match event {
            WatcherEvent::State {
                position,
                paused,
                do_seek,
                set_by,
                forced,
            } => {
                if let Some(state) = self.session.build_state(position, paused, do_seek, set_by, forced) {
                    self.send(Message::State(state));
                }
            }
            WatcherEvent::Set(set) => self.send(Message::Set(set)),
        }
    }

    /// Periodic broadcast of the room state, plus the liveness check.
    fn tick(&mut self) -> Result<(), ProtocolError> {
        let now = self.state.now();
        let timeout = self.state.config().protocol_timeout;
        let Some(snapshot) = self.state.room_snapshot(&self.id) else {
            if !self.is_logged_in() && now - self.connected_at > timeout {
                return Err(ProtocolError::WatcherTimeout);
            }
            return Ok(());
        };
        if now - snapshot.last_updated_on > timeout {
            return Err(ProtocolError::WatcherTimeout);
        }
        if let Some(state) =
            self.session
                .build_state(snapshot.position, snapshot.paused, false, snapshot.set_by, false)
        {
            self.send(Message::State(state));
        }
        Ok(())
    }

    fn fail(&self, error: &ProtocolError) {
        if error.is_recoverable() {
            tracing::info!("{LOG_TAG} Dropping {}: {}", self.id, error);
        } else {
            tracing::warn!("{LOG_TAG} Protocol error from {}: {}", self.id, error);
        }
        if error.should_notify_peer() {
            self.send(Message::error(error.to_string()));
        }
    }

    fn close(&self) {
        if self.is_logged_in() {
            self.state.remove_watcher(&self.id);
        }
        tracing::info!(
            "{LOG_TAG} Client {} disconnected ({} watchers in {} rooms)",
            self.id,
            self.state.watcher_count(),
            self.state.room_count()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use lockstep_protocol::messages::{IgnoringInfo, PlayState};
    use lockstep_protocol::password::hash_password;
    use lockstep_protocol::ManualClock;
    use std::sync::Arc;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Harness {
        connection: ServerConnection,
        outbound: UnboundedReceiver<Message>,
        events: UnboundedReceiver<WatcherEvent>,
        clock: Arc<ManualClock>,
    }

    impl Harness {
        fn new(config: ServerConfig) -> Self {
            let clock = ManualClock::new(500.0);
            let state = ServerState::new(config, clock.clone());
            let (tx, outbound) = mpsc::unbounded_channel();
            let (events_tx, events) = mpsc::unbounded_channel();
            let peer = SocketAddr::from(([127, 0, 0, 1], 40000));
            Self {
                connection: ServerConnection::new(Uuid::new_v4(), peer, state, tx, events_tx),
                outbound,
                events,
                clock,
            }
        }

        /// Feed pending registry events through the connection.
        fn pump(&mut self) -> Vec<Message> {
            while let Ok(event) = self.events.try_recv() {
                self.connection.handle_event(event);
            }
            let mut sent = Vec::new();
            while let Ok(message) = self.outbound.try_recv() {
                sent.push(message);
            }
            sent
        }
    }

    fn hello(username: &str, room: &str, version: &str) -> Message {
        hello_with_password(username, room, version, None)
    }

    fn hello_with_password(
        username: &str,
        room: &str,
        version: &str,
        password: Option<&str>,
    ) -> Message {
        Message::Hello(HelloMessage {
            username: Some(username.into()),
            password: password.map(hash_password),
            room: Some(RoomRef::named(room)),
            version: Some(version.into()),
            motd: None,
        })
    }

    #[test]
    fn hello_reply_precedes_initial_state() {
        let mut harness = Harness::new(ServerConfig::default());
        harness
            .connection
            .handle_message(hello("alice", "cinema", "1.2.9"))
            .unwrap();
        let sent = harness.pump();
        match sent.as_slice() {
            [Message::Hello(reply), Message::State(state)] => {
                assert_eq!(reply.username.as_deref(), Some("alice"));
                assert_eq!(reply.version.as_deref(), Some("1.2.9"));
                assert_eq!(reply.motd.as_deref(), Some(""));
                let playstate = state.playstate.as_ref().unwrap();
                assert!(playstate.do_seek());
                assert!(playstate.paused);
                assert_eq!(state.ignoring_on_the_fly.unwrap().server, Some(1));
            }
            other => panic!("unexpected messages {other:?}"),
        }
    }

    #[test]
    fn hello_checks_fields_then_version_then_password() {
        let config = ServerConfig {
            password_hash: Some(hash_password("secret")),
            ..ServerConfig::default()
        };
        let mut harness = Harness::new(config);
        let incomplete = Message::Hello(HelloMessage {
            username: Some("alice".into()),
            ..HelloMessage::default()
        });
        assert_eq!(
            harness.connection.handle_message(incomplete),
            Err(ProtocolError::HelloIncomplete)
        );
        // An incompatible client learns about the version before the password.
        assert!(matches!(
            harness.connection.handle_message(hello("alice", "r", "1.3.0")),
            Err(ProtocolError::VersionMismatch { .. })
        ));
        assert!(matches!(
            harness
                .connection
                .handle_message(hello_with_password("alice", "r", "1.3.0", Some("guess"))),
            Err(ProtocolError::VersionMismatch { .. })
        ));
        assert_eq!(
            harness.connection.handle_message(hello("alice", "r", "1.2.7")),
            Err(ProtocolError::PasswordRequired)
        );
        assert_eq!(
            harness
                .connection
                .handle_message(hello_with_password("alice", "r", "1.2.7", Some("guess"))),
            Err(ProtocolError::WrongPassword)
        );
        assert!(!harness.connection.is_logged_in());

        harness
            .connection
            .handle_message(hello_with_password("alice", "r", "1.2.0", Some("secret")))
            .unwrap();
        assert!(harness.connection.is_logged_in());
    }

    #[test]
    fn commands_before_hello_are_rejected() {
        let mut harness = Harness::new(ServerConfig::default());
        assert_eq!(
            harness.connection.handle_line(r#"{"List": null}"#),
            Err(ProtocolError::NotLoggedIn)
        );
        assert!(matches!(
            harness.connection.handle_line("garbage"),
            Err(ProtocolError::NotJson(_))
        ));
        assert!(matches!(
            harness.connection.handle_line(r#"{"Chat": "hi"}"#),
            Err(ProtocolError::UnknownCommand(_))
        ));
    }

    #[test]
    fn silent_watcher_times_out() {
        let mut harness = Harness::new(ServerConfig::default());
        harness
            .connection
            .handle_message(hello("alice", "cinema", "1.2.7"))
            .unwrap();
        harness.pump();

        harness.clock.advance(5.0);
        harness.connection.tick().unwrap();
        harness.clock.advance(10.0);
        assert_eq!(harness.connection.tick(), Err(ProtocolError::WatcherTimeout));
    }

    #[test]
    fn periodic_state_waits_for_forced_echo() {
        let mut harness = Harness::new(ServerConfig::default());
        harness
            .connection
            .handle_message(hello("alice", "cinema", "1.2.7"))
            .unwrap();
        harness.pump();

        harness.connection.tick().unwrap();
        assert!(harness.pump().is_empty());

        let echo = StateMessage {
            playstate: Some(PlayState {
                position: 0.0,
                paused: true,
                do_seek: None,
                set_by: None,
            }),
            ping: None,
            ignoring_on_the_fly: Some(IgnoringInfo {
                server: Some(1),
                client: None,
            }),
        };
        harness
            .connection
            .handle_message(Message::State(echo))
            .unwrap();
        harness.connection.tick().unwrap();
        assert!(matches!(harness.pump().as_slice(), [Message::State(_)]));
    }

    #[test]
    fn list_and_close_update_the_registry() {
        let mut harness = Harness::new(ServerConfig::default());
        harness
            .connection
            .handle_message(hello("alice", "cinema", "1.2.7"))
            .unwrap();
        harness.pump();

        harness
            .connection
            .handle_message(Message::List(None))
            .unwrap();
        match harness.pump().as_slice() {
            [Message::List(Some(listing))] => assert!(listing["cinema"].contains_key("alice")),
            other => panic!("unexpected messages {other:?}"),
        }

        let state = harness.connection.state.clone();
        harness.connection.close();
        assert_eq!(state.watcher_count(), 0);
        assert_eq!(state.room_count(), 0);
    }

    #[test]
    fn remote_error_is_not_echoed() {
        let mut harness = Harness::new(ServerConfig::default());
        harness.connection.fail(&ProtocolError::Remote("bye".into()));
        assert!(harness.pump().is_empty());

        harness.connection.fail(&ProtocolError::NotLoggedIn);
        assert!(matches!(harness.pump().as_slice(), [Message::Error(_)]));
    }
}
