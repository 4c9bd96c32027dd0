//! Playback state machine: reconciles what the local player does with what
//! the room says, and decides which corrections to apply.
//!
//! The engine never touches the player or the network itself. Every entry
//! point returns an [`Outcome`] describing player commands, notices and
//! state pushes for the caller to carry out.

use lockstep_protocol::constants::{OSD_DURATION_MS, SHOW_SAME_ROOM_OSD};
use lockstep_protocol::{FileInfo, SharedClock};

use crate::config::SyncSettings;
use crate::session::GlobalUpdate;
use crate::ui::Notice;
use crate::utils::format_time;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NeverConnected,
    AwaitingFirstGlobalState,
    Synced,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerCommand {
    SetPosition(f64),
    SetPaused(bool),
    SetSpeed(f64),
}

/// Playstate we report upstream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalState {
    pub position: f64,
    pub paused: bool,
    pub do_seek: bool,
}

#[derive(Debug, Default, PartialEq)]
pub struct Outcome {
    pub commands: Vec<PlayerCommand>,
    pub notices: Vec<Notice>,
    /// Ask the server for the user list.
    pub request_list: bool,
    /// Send this state right away as a forced change.
    pub push: Option<LocalState>,
    /// The player was told to change; poll it again without waiting.
    pub repoll: bool,
}

impl Outcome {
    fn notify(&mut self, text: String) {
        self.notices.push(Notice::new(text, !SHOW_SAME_ROOM_OSD));
    }

    pub fn is_empty(&self) -> bool {
        *self == Outcome::default()
    }
}

/// A reported position and when it was true. Extrapolated while playing.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Snapshot {
    position: f64,
    paused: bool,
    at: f64,
}

impl Snapshot {
    fn position(&self, now: f64) -> f64 {
        if self.paused {
            self.position
        } else {
            self.position + (now - self.at)
        }
    }
}

#[derive(Debug)]
pub struct SyncEngine {
    clock: SharedClock,
    settings: SyncSettings,
    username: String,
    phase: Phase,
    player: Option<Snapshot>,
    global: Option<Snapshot>,
    file: Option<FileInfo>,
    user_offset: f64,
    speed_changed: bool,
    speed_supported: bool,
    position_before_last_seek: f64,
    last_left: Option<(String, f64)>,
}

impl SyncEngine {
    pub fn new(clock: SharedClock, settings: SyncSettings, username: impl Into<String>) -> Self {
        Self {
            clock,
            settings,
            username: username.into(),
            phase: Phase::NeverConnected,
            player: None,
            global: None,
            file: None,
            user_offset: 0.0,
            speed_changed: false,
            speed_supported: true,
            position_before_last_seek: 0.0,
            last_left: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn set_username(&mut self, username: impl Into<String>) {
        self.username = username.into();
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn set_file(&mut self, file: Option<FileInfo>) {
        self.file = file;
    }

    pub fn set_speed_supported(&mut self, supported: bool) {
        self.speed_supported = supported;
    }

    pub fn user_offset(&self) -> f64 {
        self.user_offset
    }

    pub fn speed_changed(&self) -> bool {
        self.speed_changed
    }

    pub fn position_before_last_seek(&self) -> f64 {
        self.position_before_last_seek
    }

    pub fn on_connected(&mut self) {
        self.phase = Phase::AwaitingFirstGlobalState;
    }

    pub fn on_disconnected(&mut self) {
        self.phase = Phase::NeverConnected;
    }

    pub fn player_position(&self) -> f64 {
        self.player_position_at(self.clock.now())
    }

    pub fn player_paused(&self) -> bool {
        match (&self.player, &self.global) {
            (Some(player), _) => player.paused,
            (None, Some(global)) => global.paused,
            (None, None) => true,
        }
    }

    pub fn global_position(&self) -> f64 {
        self.global_position_at(self.clock.now())
    }

    pub fn global_paused(&self) -> bool {
        self.global.map_or(true, |global| global.paused)
    }

    fn player_position_at(&self, now: f64) -> f64 {
        match (&self.player, &self.global) {
            (Some(player), _) => player.position(now),
            (None, Some(global)) => global.position(now),
            (None, None) => 0.0,
        }
    }

    fn global_position_at(&self, now: f64) -> f64 {
        self.global.map_or(0.0, |global| global.position(now))
    }

    /// True once the room has been silent for longer than the protocol
    /// timeout. The stale room state is dropped so the next update is
    /// treated as first contact.
    pub fn check_timeout(&mut self) -> bool {
        if self.phase != Phase::Synced {
            return false;
        }
        let now = self.clock.now();
        let timed_out = self
            .global
            .is_some_and(|global| now - global.at > self.settings.protocol_timeout);
        if timed_out {
            self.global = None;
            self.phase = Phase::NeverConnected;
        }
        timed_out
    }

    /// Apply a room state from the server.
    pub fn update_global_state(&mut self, update: &GlobalUpdate) -> Outcome {
        let now = self.clock.now();
        let mut outcome = Outcome::default();
        if self.phase == Phase::AwaitingFirstGlobalState {
            outcome.request_list = true;
        }

        let paused = update.paused;
        let position = if paused {
            update.position
        } else {
            update.position + update.message_age
        };
        let setter = update.set_by.as_deref().unwrap_or("Unknown");
        let pause_changed = paused != self.global_paused();
        let diff = self.player_position_at(now) - position;

        let mut changed = false;
        if self.global.is_none() {
            changed |= self.init_player_state(position, paused, now, &mut outcome);
        }
        self.global = Some(Snapshot {
            position,
            paused,
            at: now,
        });
        self.phase = Phase::Synced;

        if update.do_seek {
            changed |= self.server_seeked(position, setter, now, &mut outcome);
        }

        let rewind = self.settings.rewind_on_desync && diff > self.settings.rewind_threshold;
        let slow_down = self.speed_supported && self.settings.slow_on_desync && !paused;
        if rewind && !update.do_seek {
            self.seek_player(position, now, &mut outcome);
            outcome.notify(format!("Rewinded due to time difference with {setter}"));
            changed = true;
        } else if slow_down && !update.do_seek {
            changed |= self.slow_down_to_cover(diff, setter, &mut outcome);
        }

        if pause_changed {
            changed |= if paused {
                self.server_paused(setter, now, &mut outcome)
            } else {
                outcome.commands.push(PlayerCommand::SetPaused(false));
                outcome.notify(format!("{setter} unpaused"));
                true
            };
        }

        outcome.repoll = changed;
        outcome
    }

    fn init_player_state(&mut self, position: f64, paused: bool, now: f64, outcome: &mut Outcome) -> bool {
        if self.file.is_none() {
            return false;
        }
        self.seek_player(position, now, outcome);
        outcome.commands.push(PlayerCommand::SetPaused(paused));
        true
    }

    fn server_seeked(&mut self, position: f64, setter: &str, now: f64, outcome: &mut Outcome) -> bool {
        // Our own seek echoed back was already applied locally.
        let foreign = setter != self.username;
        if foreign {
            self.position_before_last_seek = self.player_position_at(now);
            self.seek_player(position, now, outcome);
        }
        outcome.notify(format!(
            "{setter} jumped from {} to {}",
            format_time(self.position_before_last_seek),
            format_time(position)
        ));
        foreign
    }

    fn slow_down_to_cover(&mut self, diff: f64, setter: &str, outcome: &mut Outcome) -> bool {
        if diff > self.settings.slowdown_kickin_threshold && !self.speed_changed {
            outcome
                .commands
                .push(PlayerCommand::SetSpeed(self.settings.slowdown_rate));
            self.speed_changed = true;
            outcome.notify(format!("Slowing down due to time difference with {setter}"));
            true
        } else if self.speed_changed && diff < self.settings.slowdown_reset_threshold {
            outcome.commands.push(PlayerCommand::SetSpeed(1.0));
            self.speed_changed = false;
            outcome.notify("Reverting speed back to normal".to_string());
            true
        } else {
            false
        }
    }

    fn server_paused(&mut self, setter: &str, now: f64, outcome: &mut Outcome) -> bool {
        if self.settings.sync_on_pause && setter != self.username {
            let position = self.global_position_at(now);
            self.seek_player(position, now, outcome);
        }
        outcome.commands.push(PlayerCommand::SetPaused(true));

        let recent_leaver = self
            .last_left
            .as_ref()
            .filter(|(_, at)| now - at < OSD_DURATION_MS as f64 / 1000.0)
            .map(|(name, _)| name.clone());
        match recent_leaver {
            Some(leaver) => outcome.notify(format!("{leaver} left, {setter} paused")),
            None => outcome.notify(format!(
                "{setter} paused at {}",
                format_time(self.global_position_at(now))
            )),
        }
        true
    }

    /// Move the player, applying the user offset. Seeking before the start
    /// clamps to zero and tells the room.
    fn seek_player(&mut self, position: f64, now: f64, outcome: &mut Outcome) {
        if let Some(player) = self.player.as_mut() {
            player.at = now;
        }
        if self.file.is_none() {
            return;
        }
        let mut target = position + self.user_offset;
        if target < 0.0 {
            target = 0.0;
            outcome.push = Some(LocalState {
                position: self.player_position_at(now),
                paused: self.player_paused(),
                do_seek: true,
            });
        }
        outcome.commands.push(PlayerCommand::SetPosition(target));
    }

    fn determine_change(&self, paused: bool, position: f64, now: f64) -> (bool, bool) {
        let pause_change = self.player_paused() != paused && self.global_paused() != paused;
        let player_diff = (self.player_position_at(now) - position).abs();
        let global_diff = (self.global_position_at(now) - position).abs();
        let threshold = self.settings.seek_threshold;
        let seeked = player_diff > threshold && global_diff > threshold;
        (pause_change, seeked)
    }

    fn near_end_of_file(&self, position: f64) -> bool {
        let timeout = self.settings.protocol_timeout;
        self.file
            .as_ref()
            .is_some_and(|file| file.duration > timeout && (file.duration - position).abs() < timeout)
    }

    /// Feed a fresh player report. Pauses and seeks made by the local user
    /// become a forced push once the room state is known.
    pub fn update_player_status(&mut self, paused: bool, position: f64) -> Outcome {
        let now = self.clock.now();
        let mut outcome = Outcome::default();
        let position = position - self.user_offset;
        let (mut pause_change, seeked) = self.determine_change(paused, position, now);

        // Players stop by themselves at the end; that is not a room pause.
        if pause_change && paused && self.near_end_of_file(position) {
            tracing::debug!(position, "Not sending end-of-file pause");
            pause_change = false;
        }

        if self.global.is_none() {
            return outcome;
        }
        self.player = Some(Snapshot {
            position,
            paused,
            at: now,
        });

        if self.phase == Phase::Synced && (pause_change || seeked) {
            if seeked {
                self.position_before_last_seek = self.global_position_at(now);
            }
            outcome.push = Some(LocalState {
                position,
                paused,
                do_seek: seeked,
            });
        }
        outcome
    }

    /// State for the reply to a server `State`, and whether it amounts to a
    /// local change. `None` until the room state is known.
    pub fn local_state(&self) -> Option<(LocalState, bool)> {
        if self.phase != Phase::Synced {
            return None;
        }
        let now = self.clock.now();
        let paused = self.player_paused();
        let position = if self.settings.dont_slow_down_with_me {
            self.global_position_at(now)
        } else {
            self.player_position_at(now)
        };
        let (pause_change, seeked) = self.determine_change(paused, position, now);
        Some((
            LocalState {
                position,
                paused,
                do_seek: seeked,
            },
            pause_change,
        ))
    }

    /// User-requested seek.
    pub fn seek(&mut self, position: f64) -> Outcome {
        let now = self.clock.now();
        let mut outcome = Outcome::default();
        self.seek_player(position, now, &mut outcome);
        outcome.repoll = !outcome.commands.is_empty();
        outcome
    }

    pub fn set_paused(&mut self, paused: bool) -> Outcome {
        let mut outcome = Outcome::default();
        if self.file.is_none() {
            return outcome;
        }
        let now = self.clock.now();
        if let Some(player) = self.player.as_mut() {
            player.at = now;
        }
        outcome.commands.push(PlayerCommand::SetPaused(paused));
        outcome.repoll = true;
        outcome
    }

    /// Jump back to where we were before the last seek; the position we
    /// leave becomes the new undo target.
    pub fn undo_seek(&mut self) -> Outcome {
        let now = self.clock.now();
        let mut outcome = Outcome::default();
        let current = self.player_position_at(now);
        let target = self.position_before_last_seek;
        self.seek_player(target, now, &mut outcome);
        self.position_before_last_seek = current;
        outcome.repoll = !outcome.commands.is_empty();
        outcome
    }

    pub fn set_user_offset(&mut self, offset: f64) -> Outcome {
        let now = self.clock.now();
        let mut outcome = Outcome::default();
        self.user_offset = offset;
        let position = self.global_position_at(now);
        self.seek_player(position, now, &mut outcome);
        outcome.notify(format!("Current offset: {offset} seconds"));
        outcome.repoll = !outcome.commands.is_empty();
        outcome
    }

    /// Someone in our room left, or our own connection dropped.
    pub fn on_user_left(&mut self, username: Option<&str>) -> Outcome {
        if let Some(username) = username {
            self.last_left = Some((username.to_string(), self.clock.now()));
        }
        if self.settings.pause_on_leave {
            self.set_paused(true)
        } else {
            Outcome::default()
        }
    }
}
