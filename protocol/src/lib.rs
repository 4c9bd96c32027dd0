//! Lockstep wire protocol
//!
//! Shared pieces of the playback synchronization protocol used by both the
//! server and the client: message types, newline-delimited JSON framing,
//! latency estimation and file metadata handling.

pub mod clock;
pub mod codec;
pub mod constants;
pub mod error;
pub mod files;
pub mod messages;
pub mod password;
pub mod ping;
pub mod version;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{FrameError, ProtocolError};
pub use files::{FileInfo, FileSize, PrivacyMode};
pub use messages::{
    ErrorMessage, HelloMessage, IgnoringInfo, ListedUser, Message, PingInfo, PlayState, RoomRef,
    SetMessage, StateMessage, UserEvent, UserListing, UserSetting,
};
pub use ping::PingService;
