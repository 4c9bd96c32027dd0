//! Rooms and the watchers inside them.
//!
//! A room never advances faster than its slowest member: its position is
//! derived on demand as the minimum of its watchers' extrapolated positions.

use lockstep_protocol::{FileInfo, SetMessage};
use std::collections::HashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Something the registry wants a watcher's connection to send.
///
/// `State` is not a finished message: the connection owns the ping and
/// ignore-counter bookkeeping that goes into it.
#[derive(Debug, Clone, PartialEq)]
pub enum WatcherEvent {
    State {
        position: f64,
        paused: bool,
        do_seek: bool,
        set_by: Option<String>,
        forced: bool,
    },
    Set(SetMessage),
}

pub type WatcherSender = mpsc::UnboundedSender<WatcherEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Paused,
    Playing,
}

/// Playstate as reported by a client, before network delay compensation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportedPlaystate {
    pub position: f64,
    pub paused: bool,
    pub do_seek: bool,
}

/// What a periodic broadcast needs to know about a watcher's room.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomSnapshot {
    pub room: String,
    pub position: f64,
    pub paused: bool,
    pub set_by: Option<String>,
    pub last_updated_on: f64,
}

#[derive(Debug)]
pub struct Watcher {
    id: Uuid,
    name: String,
    file: Option<FileInfo>,
    position: Option<f64>,
    last_updated_on: f64,
    tx: WatcherSender,
}

impl Watcher {
    pub fn new(id: Uuid, name: impl Into<String>, now: f64, tx: WatcherSender) -> Self {
        Self {
            id,
            name: name.into(),
            file: None,
            position: None,
            last_updated_on: now,
            tx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file(&self) -> Option<&FileInfo> {
        self.file.as_ref()
    }

    pub fn set_file(&mut self, file: Option<FileInfo>) {
        self.file = file;
    }

    /// Last reported position advanced by the time since that report.
    pub fn position(&self, now: f64, playing: bool) -> Option<f64> {
        let elapsed = if playing {
            now - self.last_updated_on
        } else {
            0.0
        };
        self.position.map(|position| position + elapsed)
    }

    pub fn set_position(&mut self, position: f64) {
        self.position = Some(position);
    }

    /// Queue an event for this watcher's connection. Fails silently once
    /// the connection is gone.
    pub fn send(&self, event: WatcherEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

#[derive(Debug)]
pub struct Room {
    name: String,
    watchers: HashMap<Uuid, Watcher>,
    playback: PlaybackState,
    set_by: Option<String>,
}

impl Room {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            watchers: HashMap::new(),
            playback: PlaybackState::Paused,
            set_by: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }

    pub fn is_paused(&self) -> bool {
        self.playback == PlaybackState::Paused
    }

    pub fn is_playing(&self) -> bool {
        self.playback == PlaybackState::Playing
    }

    pub fn set_by(&self) -> Option<&str> {
        self.set_by.as_deref()
    }

    pub fn watchers(&self) -> impl Iterator<Item = &Watcher> {
        self.watchers.values()
    }

    pub fn watcher_mut(&mut self, id: &Uuid) -> Option<&mut Watcher> {
        self.watchers.get_mut(id)
    }

    /// Canonical position: the slowest watcher that is playing a file.
    ///
    /// The slowest watcher becomes `set_by`, since it is the one the rest of
    /// the room is being held to.
    pub fn position(&mut self, now: f64) -> f64 {
        let playing = self.is_playing();
        let slowest = self
            .watchers
            .values()
            .filter(|watcher| watcher.file.is_some())
            .filter_map(|watcher| {
                watcher
                    .position(now, playing)
                    .map(|position| (position, watcher.name.as_str()))
            })
            .min_by(|a, b| a.0.total_cmp(&b.0));

        match slowest {
            Some((position, name)) => {
                self.set_by = Some(name.to_string());
                position
            }
            None => 0.0,
        }
    }

    pub fn set_paused(&mut self, paused: bool, by: &str) {
        self.playback = if paused {
            PlaybackState::Paused
        } else {
            PlaybackState::Playing
        };
        self.set_by = Some(by.to_string());
    }

    pub fn set_position(&mut self, position: f64, by: &str) {
        for watcher in self.watchers.values_mut() {
            watcher.set_position(position);
        }
        self.set_by = Some(by.to_string());
    }

    /// A newcomer inherits the room's current position so it does not drag
    /// everyone else back to zero before its first report.
    pub fn add_watcher(&mut self, mut watcher: Watcher, now: f64) {
        if !self.watchers.is_empty() {
            let position = self.position(now);
            watcher.set_position(position);
        }
        self.watchers.insert(watcher.id, watcher);
    }

    pub fn remove_watcher(&mut self, id: &Uuid) -> Option<Watcher> {
        self.watchers.remove(id)
    }

    pub fn snapshot(&mut self, id: &Uuid, now: f64) -> Option<RoomSnapshot> {
        let last_updated_on = self.watchers.get(id)?.last_updated_on;
        let position = self.position(now);
        Some(RoomSnapshot {
            room: self.name.clone(),
            position,
            paused: self.is_paused(),
            set_by: self.set_by.clone(),
            last_updated_on,
        })
    }

    /// Apply a watcher's state report. Returns `true` when the change was
    /// forced onto the whole room.
    pub fn update_state(
        &mut self,
        id: &Uuid,
        report: Option<ReportedPlaystate>,
        message_age: f64,
        now: f64,
    ) -> bool {
        let room_paused = self.is_paused();
        let Some(watcher) = self.watchers.get_mut(id) else {
            return false;
        };

        let pause_changed = report.is_some_and(|report| report.paused != room_paused);
        watcher.last_updated_on = now;
        if let Some(report) = report {
            let position = if report.paused {
                report.position
            } else {
                report.position + message_age
            };
            watcher.set_position(position);
        }
        let name = watcher.name.clone();

        if pause_changed {
            if let Some(report) = report {
                self.set_paused(report.paused, &name);
            }
        }

        let do_seek = report.is_some_and(|report| report.do_seek);
        if do_seek || pause_changed {
            self.force_position_update(id, do_seek, now);
            return true;
        }
        false
    }

    /// Snap every watcher to `id`'s position and push a forced state to all
    /// of them, bypassing the periodic broadcast.
    pub fn force_position_update(&mut self, id: &Uuid, do_seek: bool, now: f64) {
        let playing = self.is_playing();
        let Some(watcher) = self.watchers.get(id) else {
            return;
        };
        let position = watcher.position(now, playing).unwrap_or(0.0);
        let name = watcher.name.clone();

        self.set_position(position, &name);
        let paused = self.is_paused();
        tracing::debug!(
            room = %self.name,
            setter = %name,
            position,
            paused,
            do_seek,
            "Forcing room position"
        );
        for watcher in self.watchers.values() {
            watcher.send(WatcherEvent::State {
                position,
                paused,
                do_seek,
                set_by: Some(name.clone()),
                forced: true,
            });
        }
    }
}
