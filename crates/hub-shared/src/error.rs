use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Message has no recipient: set either to_user or group_id")]
    MissingRecipient,

    #[error("Message cannot target both a user and a group")]
    AmbiguousRecipient,

    #[error("Message body is empty")]
    EmptyMessage,

    #[error("Unknown tag: {0}")]
    UnknownTag(String),

    #[error("Invalid media buffer: {0}")]
    InvalidBuffer(String),

    #[error("Malformed frame: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MediaError {
    #[error("File is empty")]
    Empty,

    #[error("File too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Invalid format: only {allowed} files are accepted")]
    InvalidFormat { allowed: &'static str },
}
