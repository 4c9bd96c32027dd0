//! Default tuning values shared by the server and the client.
//!
//! None of these are part of the wire format; they are the defaults behind
//! every configurable threshold and interval.

/// Protocol version announced in `Hello`. Only `major.minor` must match.
pub const PROTOCOL_VERSION: &str = "1.2.7";

pub const DEFAULT_PORT: u16 = 8999;

/// Longest line accepted from a peer, terminator excluded.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Weight of the running average when a new RTT sample arrives.
pub const PING_MOVING_AVERAGE_WEIGHT: f64 = 0.85;

/// Seconds without a processed `State` before a peer is considered gone.
pub const PROTOCOL_TIMEOUT: f64 = 12.5;

/// Seconds between unsolicited `State` broadcasts to each watcher.
pub const SERVER_STATE_INTERVAL: f64 = 1.0;

/// Seconds between local player status polls.
pub const PLAYER_ASK_DELAY: f64 = 0.1;

pub const RECONNECT_RETRIES: u32 = 10;
pub const RECONNECT_BASE_DELAY: f64 = 0.1;

pub const SEEK_THRESHOLD: f64 = 1.0;
pub const DEFAULT_REWIND_THRESHOLD: f64 = 4.0;
pub const DEFAULT_SLOWDOWN_KICKIN_THRESHOLD: f64 = 1.5;
pub const SLOWDOWN_RESET_THRESHOLD: f64 = 0.1;
pub const SLOWDOWN_RATE: f64 = 0.95;
pub const SYNC_ON_PAUSE: bool = true;

pub const DIFFERENT_DURATION_THRESHOLD: f64 = 2.5;

/// Sentinel sent instead of a filename when the owner chose not to share it.
pub const PRIVACY_HIDDEN_FILENAME: &str = "**Hidden filename**";

/// Characters ignored when comparing or hashing filenames.
pub const FILENAME_STRIP_CHARS: &[char] = &['-', '~', '_', '.', '[', ']', '(', ')', ':', ' '];

pub const SERVER_MAX_TEMPLATE_LENGTH: usize = 10_000;

pub const OSD_DURATION_MS: u64 = 3_000;
pub const WARNING_OSD_MESSAGES_LOOP_INTERVAL: f64 = 1.0;
pub const WARNING_OSD_MESSAGE_DURATION_MS: u64 = 1_000;
/// How many times a standing warning is re-displayed before it goes quiet.
pub const WARNING_OSD_REPEAT_COUNT: u32 = 5;

pub const SHOW_SAME_ROOM_OSD: bool = true;
pub const SHOW_DIFFERENT_ROOM_OSD: bool = false;
pub const SHOW_OSD_WARNINGS: bool = true;
