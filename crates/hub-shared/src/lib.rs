//! # hub-shared
//!
//! Types shared by the store and the connection server: id newtypes, the
//! client-to-server wire protocol, media signature sniffing and protocol
//! errors.

pub mod constants;
pub mod error;
pub mod media;
pub mod protocol;
pub mod types;

pub use error::{MediaError, ProtocolError};
pub use types::{ChatTarget, ConnectionId, GroupId, MessageType, NotificationType, UserId};
