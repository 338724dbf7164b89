//! WebSocket transport: one task per socket reading frames, one writer task
//! draining the connection's outbound queue.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use hub_shared::media::MediaKind;
use hub_shared::protocol::{ClientEvent, MediaUpload};
use hub_shared::{ChatTarget, ConnectionId, UserId};

use crate::api::AppState;
use crate::chat::ChatRelay;
use crate::error::ChatError;
use crate::events::ServerEvent;
use crate::gateway::Gateway;
use crate::throttle::ChatThrottle;

/// Routes decoded client frames to the gateway and the chat relay.
pub struct Session {
    gateway: Arc<Gateway>,
    chat: Arc<ChatRelay>,
    throttle: ChatThrottle,
    max_frame_size: usize,
}

impl Session {
    pub fn new(
        gateway: Arc<Gateway>,
        chat: Arc<ChatRelay>,
        throttle: ChatThrottle,
        max_frame_size: usize,
    ) -> Self {
        Self {
            gateway,
            chat,
            throttle,
            max_frame_size,
        }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Handle one text frame. Rejections go back to `conn` only.
    pub async fn handle_text(&self, conn: ConnectionId, text: &str) {
        let result = match ClientEvent::from_text(text) {
            Ok(event) => self.handle(conn, event).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            debug!(connection = %conn, error = %e, "Frame rejected");
            self.gateway.reply(conn, &e.to_event());
        }
    }

    async fn handle(&self, conn: ConnectionId, event: ClientEvent) -> Result<(), ChatError> {
        match event {
            ClientEvent::Room(join) => {
                self.gateway
                    .on_join_room(conn, &join.id, join.token.as_deref())
                    .await?;
            }
            ClientEvent::UserDisconnected(notice) => {
                self.gateway.on_disconnect_notice(conn, &notice.user_id).await;
            }
            ClientEvent::SendMessage(msg) => {
                self.authorize(conn, &msg.from_user, true).await?;
                let target = msg.target()?;
                self.chat.send_message(&msg.from_user, target, &msg.message).await?;
            }
            ClientEvent::OngoingChat(pair) => {
                self.authorize(conn, &pair.from_user, false).await?;
                self.chat.ongoing_chat(&pair.from_user, &pair.to_user).await?;
            }
            ClientEvent::DeleteMessage(del) => {
                self.authorize(conn, &del.from_user, false).await?;
                self.chat
                    .delete_message(del.chat_id, &del.from_user, &del.to_user)
                    .await?;
            }
            ClientEvent::ClearChat(pair) => {
                self.authorize(conn, &pair.from_user, false).await?;
                // Rejects a blank counterpart the same way a send would.
                ChatTarget::from_parts(Some(pair.to_user.clone()), None)?;
                self.chat.clear_chat(&pair.from_user, &pair.to_user).await?;
            }
            ClientEvent::React(react) => {
                self.authorize(conn, &react.user, true).await?;
                self.chat.react(react.chat_id, &react.user, &react.emoji).await?;
            }
            ClientEvent::Images(upload) => self.media(conn, MediaKind::Image, &upload).await?,
            ClientEvent::Documents(upload) => {
                self.media(conn, MediaKind::Document, &upload).await?
            }
            ClientEvent::Audio(upload) => self.media(conn, MediaKind::Audio, &upload).await?,
        }
        Ok(())
    }

    async fn media(
        &self,
        conn: ConnectionId,
        kind: MediaKind,
        upload: &MediaUpload,
    ) -> Result<(), ChatError> {
        self.authorize(conn, &upload.from_user, true).await?;
        self.chat.send_media(kind, upload).await?;
        Ok(())
    }

    /// The acting user must be one this connection joined as.
    async fn authorize(
        &self,
        conn: ConnectionId,
        user: &UserId,
        throttled: bool,
    ) -> Result<(), ChatError> {
        if !self.gateway.owns(conn, user) {
            warn!(connection = %conn, user = %user, "Frame for a user this connection has not joined");
            return Err(ChatError::WrongSender);
        }
        if throttled && !self.throttle.check(user) {
            return Err(ChatError::RateLimited);
        }
        Ok(())
    }
}

pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let session = state.session.clone();
    ws.max_message_size(session.max_frame_size())
        .on_upgrade(move |socket| run(socket, session))
}

async fn run(socket: WebSocket, session: Arc<Session>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let conn = session.gateway().on_connect(tx);
    debug!(connection = %conn, "Socket opened");

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match event.to_text() {
                Ok(text) => text,
                Err(e) => {
                    warn!(connection = %conn, event = event.name(), error = %e, "Failed to encode event");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => session.handle_text(conn, &text).await,
            Ok(Message::Binary(_)) => {
                debug!(connection = %conn, "Binary frame ignored");
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(connection = %conn, error = %e, "Socket read failed");
                break;
            }
        }
    }

    session.gateway().on_close(conn).await;
    writer.abort();
    debug!(connection = %conn, "Socket closed");
}
