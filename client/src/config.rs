use clap::Parser;
use lockstep_protocol::constants::{
    DEFAULT_PORT, DEFAULT_REWIND_THRESHOLD, DEFAULT_SLOWDOWN_KICKIN_THRESHOLD, PLAYER_ASK_DELAY,
    PROTOCOL_TIMEOUT, RECONNECT_RETRIES, SEEK_THRESHOLD, SLOWDOWN_RATE, SLOWDOWN_RESET_THRESHOLD,
    SYNC_ON_PAUSE,
};
use lockstep_protocol::password::hash_password;
use lockstep_protocol::{FileInfo, PrivacyMode};
use std::time::Duration;

/// Thresholds and toggles for drift correction.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    /// Seconds ahead of the room before we jump back.
    pub rewind_threshold: f64,
    /// Seconds ahead of the room before we slow down.
    pub slowdown_kickin_threshold: f64,
    /// Gap under which normal speed is restored.
    pub slowdown_reset_threshold: f64,
    pub slowdown_rate: f64,
    /// Position jumps larger than this count as a seek.
    pub seek_threshold: f64,
    pub rewind_on_desync: bool,
    pub slow_on_desync: bool,
    /// Report the room position instead of ours so others never wait for us.
    pub dont_slow_down_with_me: bool,
    pub sync_on_pause: bool,
    pub pause_on_leave: bool,
    pub protocol_timeout: f64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            rewind_threshold: DEFAULT_REWIND_THRESHOLD,
            slowdown_kickin_threshold: DEFAULT_SLOWDOWN_KICKIN_THRESHOLD,
            slowdown_reset_threshold: SLOWDOWN_RESET_THRESHOLD,
            slowdown_rate: SLOWDOWN_RATE,
            seek_threshold: SEEK_THRESHOLD,
            rewind_on_desync: true,
            slow_on_desync: true,
            dont_slow_down_with_me: false,
            sync_on_pause: SYNC_ON_PAUSE,
            pause_on_leave: false,
            protocol_timeout: PROTOCOL_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Parser)]
#[command(name = "lockstep-client", version, about = "Playback synchronization client")]
pub struct ClientArgs {
    #[arg(long, env = "LOCKSTEP_SERVER", default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, env = "LOCKSTEP_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    #[arg(short, long, env = "LOCKSTEP_USERNAME")]
    pub username: Option<String>,

    #[arg(short, long, env = "LOCKSTEP_ROOM", default_value = "default")]
    pub room: String,

    /// Server password
    #[arg(long, env = "LOCKSTEP_PASSWORD")]
    pub password: Option<String>,

    /// Name of the file to announce and play
    #[arg(long)]
    pub file: Option<String>,

    /// Duration of the file in seconds
    #[arg(long, default_value_t = 0.0)]
    pub duration: f64,

    /// Size of the file in bytes (0 if unknown)
    #[arg(long, default_value_t = 0)]
    pub size: u64,

    /// send-raw, send-hashed or dont-send
    #[arg(long, default_value = "send-raw")]
    pub filename_privacy: PrivacyMode,

    /// send-raw, send-hashed or dont-send
    #[arg(long, default_value = "send-raw")]
    pub filesize_privacy: PrivacyMode,

    #[arg(long, default_value_t = DEFAULT_REWIND_THRESHOLD)]
    pub rewind_threshold: f64,

    #[arg(long, default_value_t = DEFAULT_SLOWDOWN_KICKIN_THRESHOLD)]
    pub slowdown_threshold: f64,

    /// Never jump back when ahead of the room
    #[arg(long)]
    pub no_rewind: bool,

    /// Never change playback speed
    #[arg(long)]
    pub no_slowdown: bool,

    #[arg(long)]
    pub dont_slow_down_with_me: bool,

    /// Pause when someone in the room leaves or the connection drops
    #[arg(long)]
    pub pause_on_leave: bool,

    #[arg(long, default_value_t = RECONNECT_RETRIES)]
    pub reconnect_retries: u32,

    /// Seconds between player polls
    #[arg(long, default_value_t = PLAYER_ASK_DELAY)]
    pub poll_interval: f64,

    /// Seconds without a server update before reconnecting
    #[arg(long, default_value_t = PROTOCOL_TIMEOUT)]
    pub timeout: f64,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub room: String,
    /// MD5 digest of the server password, as the server expects it.
    pub password_hash: Option<String>,
    pub file: Option<FileInfo>,
    pub filename_privacy: PrivacyMode,
    pub filesize_privacy: PrivacyMode,
    pub sync: SyncSettings,
    pub reconnect_retries: u32,
    pub poll_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            username: String::new(),
            room: "default".to_string(),
            password_hash: None,
            file: None,
            filename_privacy: PrivacyMode::SendRaw,
            filesize_privacy: PrivacyMode::SendRaw,
            sync: SyncSettings::default(),
            reconnect_retries: RECONNECT_RETRIES,
            poll_interval: Duration::from_secs_f64(PLAYER_ASK_DELAY),
        }
    }
}

impl ClientConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The local file as it may be shown to others.
    pub fn announced_file(&self) -> Option<FileInfo> {
        self.file
            .clone()
            .map(|file| file.with_privacy(self.filename_privacy, self.filesize_privacy))
    }
}

impl From<ClientArgs> for ClientConfig {
    fn from(args: ClientArgs) -> Self {
        let password_hash = args
            .password
            .filter(|password| !password.is_empty())
            .map(|password| hash_password(&password));
        let file = args
            .file
            .filter(|name| !name.trim().is_empty())
            .map(|name| FileInfo::new(name, args.duration, args.size));
        let sync = SyncSettings {
            rewind_threshold: args.rewind_threshold,
            slowdown_kickin_threshold: args.slowdown_threshold,
            rewind_on_desync: !args.no_rewind,
            slow_on_desync: !args.no_slowdown,
            dont_slow_down_with_me: args.dont_slow_down_with_me,
            pause_on_leave: args.pause_on_leave,
            protocol_timeout: args.timeout,
            ..SyncSettings::default()
        };
        Self {
            host: args.host,
            port: args.port,
            username: args.username.unwrap_or_default(),
            room: args.room,
            password_hash,
            file,
            filename_privacy: args.filename_privacy,
            filesize_privacy: args.filesize_privacy,
            sync,
            reconnect_retries: args.reconnect_retries,
            poll_interval: Duration::from_secs_f64(args.poll_interval.max(0.01)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_protocol::constants::PRIVACY_HIDDEN_FILENAME;

    #[test]
    fn flags_map_onto_sync_settings() {
        let args = ClientArgs::parse_from([
            "lockstep-client",
            "--username",
            "alice",
            "--no-rewind",
            "--pause-on-leave",
            "--password",
            "hunter2",
        ]);
        let config = ClientConfig::from(args);
        assert_eq!(config.username, "alice");
        assert!(!config.sync.rewind_on_desync);
        assert!(config.sync.slow_on_desync);
        assert!(config.sync.pause_on_leave);
        assert_eq!(config.password_hash, Some(hash_password("hunter2")));
    }

    #[test]
    fn announced_file_respects_privacy() {
        let args = ClientArgs::parse_from([
            "lockstep-client",
            "--file",
            "Secret Movie.mkv",
            "--duration",
            "5400",
            "--size",
            "123",
            "--filename-privacy",
            "dont-send",
        ]);
        let config = ClientConfig::from(args);
        let announced = config.announced_file().unwrap();
        assert_eq!(announced.name, PRIVACY_HIDDEN_FILENAME);
        assert_eq!(announced.duration, 5400.0);
        assert_eq!(config.file.unwrap().name, "Secret Movie.mkv");
    }
}
