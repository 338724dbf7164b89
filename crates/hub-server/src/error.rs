use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use hub_shared::{GroupId, MediaError, ProtocolError};
use hub_store::StoreError;

use crate::events::{ErrorBody, ServerEvent};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Media storage error: {0}")]
    MediaStorage(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::NotFound(_) | ServerError::Store(StoreError::NotFound) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            ServerError::MediaStorage(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Media storage error".to_string(),
            ),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::Store(_) => {
                tracing::error!(error = %self, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<ChatError> for ServerError {
    fn from(e: ChatError) -> Self {
        match e {
            ChatError::Store(e) => ServerError::Store(e),
            ChatError::Storage(e) => e,
            other => ServerError::BadRequest(other.to_string()),
        }
    }
}

/// Rejections of a chat action. Each maps to the error event sent back to
/// the originating connection.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("{0}")]
    CannotDelete(String),

    #[error("Message not found")]
    MessageNotFound,

    #[error("Not a member of group {0}")]
    NotMember(GroupId),

    #[error("Not a participant in this conversation")]
    NotParticipant,

    #[error("Room token missing or invalid")]
    Unauthenticated,

    #[error("Sender does not match this connection")]
    WrongSender,

    #[error("Rate limited")]
    RateLimited,

    #[error("Could not store attachment")]
    Storage(#[source] ServerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ChatError {
    pub fn to_event(&self) -> ServerEvent {
        match self {
            ChatError::Media(MediaError::TooLarge { .. }) => {
                ServerEvent::FileToLarge(ErrorBody::new(self.to_string()))
            }
            ChatError::Media(_) | ChatError::Protocol(ProtocolError::InvalidBuffer(_)) => {
                ServerEvent::InvalidFormat(ErrorBody::new(self.to_string()))
            }
            ChatError::CannotDelete(_) => {
                ServerEvent::CannotDelete(ErrorBody::new(self.to_string()))
            }
            // Store details stay in the log.
            ChatError::Store(_) | ChatError::Storage(_) => {
                ServerEvent::MessageFailed(ErrorBody::new("Message could not be saved"))
            }
            _ => ServerEvent::MessageFailed(ErrorBody::new(self.to_string())),
        }
    }
}
