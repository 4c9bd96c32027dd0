use lockstep_protocol::codec::decode_line;
use lockstep_protocol::constants::{
    OSD_DURATION_MS, PROTOCOL_VERSION, WARNING_OSD_MESSAGE_DURATION_MS,
};
use lockstep_protocol::messages::{
    HelloMessage, Message, RoomRef, SetMessage, StateMessage, UserSetting,
};
use lockstep_protocol::{version, ProtocolError, SharedClock};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::ClientConfig;
use crate::engine::{LocalState, Outcome, PlayerCommand, SyncEngine};
use crate::player::Player;
use crate::session::ClientSession;
use crate::ui::{Notice, Ui};
use crate::users::UserList;
use crate::warnings::RoomWarnings;

/// Handle to the client side of a session. Cheap to clone; the connection
/// loop, console commands and tests all drive the same core.
#[derive(Clone)]
pub struct SyncClient {
    inner: Arc<Mutex<ClientCore>>,
}

struct ClientCore {
    clock: SharedClock,
    config: ClientConfig,
    engine: SyncEngine,
    session: ClientSession,
    users: UserList,
    warnings: RoomWarnings,
    player: Box<dyn Player>,
    ui: Box<dyn Ui>,
    tx: Option<mpsc::UnboundedSender<Message>>,
    /// When the server last sent anything, or when we attached.
    last_heard: f64,
}

impl SyncClient {
    pub fn new(
        config: ClientConfig,
        player: Box<dyn Player>,
        ui: Box<dyn Ui>,
        clock: SharedClock,
    ) -> Self {
        let mut engine = SyncEngine::new(clock.clone(), config.sync.clone(), &config.username);
        engine.set_file(config.file.clone());
        engine.set_speed_supported(player.speed_supported());
        let mut users = UserList::new(&config.username, &config.room);
        users.set_current_file(config.file.clone());

        Self {
            inner: Arc::new(Mutex::new(ClientCore {
                session: ClientSession::new(clock.clone()),
                clock,
                config,
                engine,
                users,
                warnings: RoomWarnings::new(),
                player,
                ui,
                tx: None,
                last_heard: 0.0,
            })),
        }
    }

    /// Hook up a fresh transport and log in.
    pub fn attach(&self, tx: mpsc::UnboundedSender<Message>) {
        let mut core = self.inner.lock();
        core.session = ClientSession::new(core.clock.clone());
        core.tx = Some(tx);
        core.last_heard = core.clock.now();
        let hello = HelloMessage {
            username: Some(core.users.current().username.clone()),
            password: core.config.password_hash.clone(),
            room: Some(RoomRef::named(core.current_room())),
            version: Some(PROTOCOL_VERSION.to_string()),
            motd: None,
        };
        core.send(Message::Hello(hello));
    }

    /// Drop the transport. Queued messages still drain.
    pub fn detach(&self) {
        let mut core = self.inner.lock();
        core.tx = None;
        core.engine.on_disconnected();
    }

    /// Our own connection dropped. Treated like someone leaving the room.
    pub fn on_connection_lost(&self) {
        let mut core = self.inner.lock();
        let outcome = core.engine.on_user_left(None);
        core.apply(outcome);
    }

    pub fn send(&self, message: Message) {
        self.inner.lock().send(message);
    }

    pub fn show_message(&self, text: &str) {
        self.inner.lock().ui.show_message(text, true);
    }

    pub fn show_error(&self, text: &str, critical: bool) {
        self.inner.lock().ui.show_error_message(text, critical);
    }

    pub fn username(&self) -> String {
        self.inner.lock().users.current().username.clone()
    }

    pub fn room(&self) -> String {
        self.inner.lock().current_room()
    }

    pub fn user_offset(&self) -> f64 {
        self.inner.lock().engine.user_offset()
    }

    /// Parse and handle one line from the server. Unknown commands are
    /// skipped; anything else that fails to parse ends the session.
    pub fn handle_line(&self, line: &str) -> Result<(), ProtocolError> {
        self.inner.lock().heard_from_server();
        match decode_line(line) {
            Ok(Some(message)) => self.handle_message(message),
            Ok(None) => Ok(()),
            Err(ProtocolError::UnknownCommand(command)) => {
                tracing::warn!("Unknown command {}", command);
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    pub fn handle_message(&self, message: Message) -> Result<(), ProtocolError> {
        let mut core = self.inner.lock();
        core.heard_from_server();
        match message {
            Message::Hello(hello) => core.handle_hello(hello),
            Message::Set(set) => {
                core.handle_set(set);
                Ok(())
            }
            Message::List(Some(listing)) => {
                core.users.load_listing(&listing);
                core.show_user_list();
                Ok(())
            }
            Message::List(None) => Ok(()),
            Message::State(state) => {
                core.handle_state(state);
                Ok(())
            }
            Message::Error(error) => Err(ProtocolError::Remote(error.message)),
        }
    }

    /// Ask the player where it is and react. Fails once the server has been
    /// silent for too long.
    pub fn poll_player(&self) -> Result<(), ProtocolError> {
        let mut core = self.inner.lock();
        let now = core.clock.now();
        if core.engine.check_timeout() || core.server_silent(now) {
            return Err(ProtocolError::ServerTimeout);
        }
        core.poll_player_status();
        for text in core.warnings.tick(now) {
            core.player
                .display_message(text, WARNING_OSD_MESSAGE_DURATION_MS);
        }
        Ok(())
    }

    pub fn seek(&self, position: f64) {
        let mut core = self.inner.lock();
        let outcome = core.engine.seek(position);
        core.apply(outcome);
    }

    pub fn seek_relative(&self, delta: f64) {
        let mut core = self.inner.lock();
        let target = core.engine.player_position() + delta;
        let outcome = core.engine.seek(target);
        core.apply(outcome);
    }

    pub fn toggle_pause(&self) {
        let mut core = self.inner.lock();
        let paused = !core.engine.player_paused();
        let outcome = core.engine.set_paused(paused);
        core.apply(outcome);
    }

    pub fn undo_seek(&self) {
        let mut core = self.inner.lock();
        let outcome = core.engine.undo_seek();
        core.apply(outcome);
    }

    pub fn set_user_offset(&self, offset: f64) {
        let mut core = self.inner.lock();
        let outcome = core.engine.set_user_offset(offset);
        core.apply(outcome);
    }

    /// Move to another room. Without a name, the room is named after the
    /// file being played.
    pub fn change_room(&self, room: Option<String>) {
        let mut core = self.inner.lock();
        let room = room
            .filter(|room| !room.trim().is_empty())
            .or_else(|| core.config.file.as_ref().map(|file| file.name.clone()))
            .unwrap_or_else(|| core.config.room.clone());
        core.users.set_current_room(room.as_str());
        core.ui
            .show_message(&format!("You have joined the room: '{room}'"), true);
        core.send(Message::Set(SetMessage::room(room)));
    }

    pub fn request_user_list(&self) {
        self.inner.lock().send(Message::List(None));
    }
}

impl ClientCore {
    fn send(&mut self, message: Message) {
        let Some(tx) = &self.tx else {
            tracing::debug!("Not connected, dropping {} message", message.kind());
            return;
        };
        if tx.send(message).is_err() {
            tracing::warn!("Failed to send message: connection closed");
            self.tx = None;
        }
    }

    fn current_room(&self) -> String {
        self.users.current().room.clone().unwrap_or_default()
    }

    fn show(&mut self, notice: &Notice) {
        self.ui.show_message(&notice.text, notice.hide_from_osd);
        if !notice.hide_from_osd {
            self.player.display_message(&notice.text, OSD_DURATION_MS);
        }
    }

    fn show_all(&mut self, notices: Vec<Notice>) {
        for notice in &notices {
            self.show(notice);
        }
    }

    fn show_user_list(&mut self) {
        let rooms = self.users.rooms();
        let current = self.users.current().clone();
        self.ui.show_user_list(&current, &rooms);
    }

    fn handle_hello(&mut self, hello: HelloMessage) -> Result<(), ProtocolError> {
        let (Some(username), Some(room), Some(server_version)) =
            (hello.username(), hello.room_name(), hello.version())
        else {
            return Err(ProtocolError::HelloIncomplete);
        };
        version::check_compatible(PROTOCOL_VERSION, server_version)?;

        // The server may have renamed us to avoid a clash.
        self.users.set_current_username(username);
        self.users.set_current_room(room);
        self.engine.set_username(username);
        self.engine.on_connected();
        tracing::info!(username, room, version = server_version, "Logged in");

        if let Some(motd) = hello.motd.as_deref().filter(|motd| !motd.trim().is_empty()) {
            self.ui.show_message(motd, true);
        }
        self.ui.show_message("Successfully connected to server", false);

        if let Some(file) = self.config.announced_file() {
            self.send(Message::Set(SetMessage::file(file)));
        }
        Ok(())
    }

    fn handle_set(&mut self, set: SetMessage) {
        if let Some(room) = set.room {
            self.users.set_current_room(room.name);
        }
        for (username, setting) in set.user.unwrap_or_default() {
            self.handle_user_setting(&username, setting);
        }
    }

    fn handle_user_setting(&mut self, username: &str, setting: UserSetting) {
        let room = setting.room.map(|room| room.name);
        let notices = match setting.event {
            Some(event) if event.is_joined() => {
                self.users.add_user(username, room, setting.file, true)
            }
            Some(event) if event.is_left() => {
                if self.users.is_user_in_your_room(username) {
                    let outcome = self.engine.on_user_left(Some(username));
                    self.apply(outcome);
                }
                self.users.remove_user(username)
            }
            _ => self.users.mod_user(username, room, setting.file),
        };
        self.show_all(notices);
    }

    fn handle_state(&mut self, state: StateMessage) {
        let incoming = self.session.receive_state(&state);
        if let Some(update) = incoming.update {
            let outcome = self.engine.update_global_state(&update);
            self.apply(outcome);
            self.check_room_warnings();
        }

        let (local, state_change) = match self.engine.local_state() {
            Some((local, state_change)) => (Some(local), state_change),
            None => (None, false),
        };
        let reply = self
            .session
            .build_state(local, incoming.latency_calculation, state_change);
        self.send(Message::State(reply));
    }

    fn check_room_warnings(&mut self) {
        if !self.users.has_room_state_changed() || self.engine.global_paused() {
            return;
        }
        let now = self.clock.now();
        let notices = self.warnings.check(&self.users, now);
        self.show_all(notices);
        self.users.room_state_confirmed();
    }

    fn heard_from_server(&mut self) {
        self.last_heard = self.clock.now();
    }

    /// Attached but nothing received for longer than the protocol timeout,
    /// whether or not the room state was ever known.
    fn server_silent(&self, now: f64) -> bool {
        self.tx.is_some() && now - self.last_heard > self.config.sync.protocol_timeout
    }

    fn poll_player_status(&mut self) {
        let status = match self.player.ask_for_status() {
            Ok(status) => status,
            Err(error) => {
                tracing::debug!("Player status unavailable: {}", error);
                return;
            }
        };
        let outcome = self
            .engine
            .update_player_status(status.paused, status.position);
        self.apply(outcome);
    }

    fn push_state(&mut self, local: LocalState) {
        let state = self.session.build_state(Some(local), None, true);
        self.send(Message::State(state));
    }

    fn apply(&mut self, outcome: Outcome) {
        for command in outcome.commands {
            let result = match command {
                PlayerCommand::SetPosition(position) => self.player.set_position(position),
                PlayerCommand::SetPaused(paused) => self.player.set_paused(paused),
                PlayerCommand::SetSpeed(speed) => self.player.set_speed(speed),
            };
            if let Err(error) = result {
                tracing::warn!(?command, "Player rejected command: {}", error);
            }
        }
        self.show_all(outcome.notices);
        if outcome.request_list {
            self.send(Message::List(None));
        }
        if let Some(local) = outcome.push {
            self.push_state(local);
        }
        if outcome.repoll {
            self.poll_player_status();
        }
    }
}
