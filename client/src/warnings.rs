//! Standing room warnings, repeated on the OSD for a few seconds while
//! they hold.

use lockstep_protocol::constants::{
    SHOW_OSD_WARNINGS, WARNING_OSD_MESSAGES_LOOP_INTERVAL, WARNING_OSD_REPEAT_COUNT,
};

use crate::ui::Notice;
use crate::users::UserList;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomWarning {
    AloneInRoom,
    FilesDiffer,
}

impl RoomWarning {
    pub const ALL: [RoomWarning; 2] = [RoomWarning::AloneInRoom, RoomWarning::FilesDiffer];

    pub fn message(self) -> &'static str {
        match self {
            RoomWarning::AloneInRoom => "You're alone in the room",
            RoomWarning::FilesDiffer => "Not all files played in the room are the same",
        }
    }

    fn applies(self, users: &UserList) -> bool {
        match self {
            RoomWarning::AloneInRoom => users.are_you_alone_in_room(),
            RoomWarning::FilesDiffer => !users.are_all_files_in_room_same(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct RepeatTimer {
    running: bool,
    displayed: u32,
    next_at: f64,
}

#[derive(Debug)]
pub struct RoomWarnings {
    timers: [(RoomWarning, RepeatTimer); 2],
    interval: f64,
    repeat: u32,
    osd_enabled: bool,
}

impl Default for RoomWarnings {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomWarnings {
    pub fn new() -> Self {
        Self {
            timers: RoomWarning::ALL.map(|warning| (warning, RepeatTimer::default())),
            interval: WARNING_OSD_MESSAGES_LOOP_INTERVAL,
            repeat: WARNING_OSD_REPEAT_COUNT,
            osd_enabled: SHOW_OSD_WARNINGS,
        }
    }

    /// Re-evaluate every warning. Active ones are logged and get their OSD
    /// timer started; resolved ones have it stopped.
    pub fn check(&mut self, users: &UserList, now: f64) -> Vec<Notice> {
        let mut notices = Vec::new();
        let osd_enabled = self.osd_enabled;
        for (warning, timer) in self.timers.iter_mut() {
            if warning.applies(users) {
                notices.push(Notice::quiet(warning.message()));
                if osd_enabled && !timer.running {
                    *timer = RepeatTimer {
                        running: true,
                        displayed: 0,
                        next_at: now,
                    };
                }
            } else if timer.running {
                tracing::debug!(?warning, "Room warning resolved");
                timer.running = false;
            }
        }
        notices
    }

    /// OSD lines due at `now`. Each running warning shows once per interval
    /// until it has been shown `repeat` times.
    pub fn tick(&mut self, now: f64) -> Vec<&'static str> {
        let mut due = Vec::new();
        for (warning, timer) in self.timers.iter_mut() {
            if !timer.running || now < timer.next_at {
                continue;
            }
            if timer.displayed < self.repeat {
                due.push(warning.message());
                timer.displayed += 1;
                timer.next_at = now + self.interval;
            } else {
                timer.running = false;
            }
        }
        due
    }
}
