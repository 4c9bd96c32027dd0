use clap::Parser;
use lockstep_protocol::constants::{DEFAULT_PORT, PROTOCOL_TIMEOUT, SERVER_STATE_INTERVAL};
use lockstep_protocol::password::hash_password;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Who sees whom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoomMode {
    /// Usernames are unique server-wide and user updates reach every room.
    #[default]
    Global,
    /// Every room is its own namespace.
    Isolated,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "lockstep-server", version, about = "Playback synchronization server")]
pub struct ServerArgs {
    /// Address to listen on
    #[arg(long, env = "LOCKSTEP_HOST", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Password clients must supply
    #[arg(long, env = "LOCKSTEP_PASSWORD")]
    pub password: Option<String>,

    /// Keep rooms fully separate: no cross-room user list or username clashes
    #[arg(long, env = "LOCKSTEP_ISOLATE_ROOMS")]
    pub isolate_rooms: bool,

    /// Message of the day template ($version, $userIp, $username, $room)
    #[arg(long, env = "LOCKSTEP_MOTD_FILE")]
    pub motd_file: Option<PathBuf>,

    /// Seconds between state broadcasts to each client
    #[arg(long, default_value_t = SERVER_STATE_INTERVAL)]
    pub state_interval: f64,

    /// Seconds of silence before a client is dropped
    #[arg(long, default_value_t = PROTOCOL_TIMEOUT)]
    pub timeout: f64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// MD5 digest of the configured password, as sent by clients.
    pub password_hash: Option<String>,
    pub room_mode: RoomMode,
    pub motd_file: Option<PathBuf>,
    pub state_interval: Duration,
    pub protocol_timeout: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            password_hash: None,
            room_mode: RoomMode::Global,
            motd_file: None,
            state_interval: Duration::from_secs_f64(SERVER_STATE_INTERVAL),
            protocol_timeout: PROTOCOL_TIMEOUT,
        }
    }
}

impl From<ServerArgs> for ServerConfig {
    fn from(args: ServerArgs) -> Self {
        let password_hash = args
            .password
            .filter(|password| !password.is_empty())
            .map(|password| hash_password(&password));
        let room_mode = if args.isolate_rooms {
            RoomMode::Isolated
        } else {
            RoomMode::Global
        };
        Self {
            listen: SocketAddr::new(args.host, args.port),
            password_hash,
            room_mode,
            motd_file: args.motd_file,
            state_interval: Duration::from_secs_f64(args.state_interval.max(0.05)),
            protocol_timeout: args.timeout,
        }
    }
}
