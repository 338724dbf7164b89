//! Persist-then-push for notifications.
//!
//! The record is written first; the unread count pushed alongside it is
//! read after the insert under the same lock, so it always includes the new
//! row. Push failures never reach the caller.

use std::sync::Arc;

use tracing::{debug, warn};

use hub_shared::{NotificationType, UserId};
use hub_store::{Notification, StoreError};

use crate::events::{NotificationPush, ServerEvent};
use crate::mailer::{Email, MailError, Mailer};
use crate::rooms::Broadcaster;
use crate::Db;

#[derive(Clone)]
pub struct NotificationService {
    db: Db,
    broadcaster: Arc<dyn Broadcaster>,
    mailer: Arc<dyn Mailer>,
}

impl NotificationService {
    pub fn new(db: Db, broadcaster: Arc<dyn Broadcaster>, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            db,
            broadcaster,
            mailer,
        }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub async fn create_and_push(
        &self,
        recipient: &UserId,
        notification_type: NotificationType,
        reference_id: &str,
        message: &str,
        from_user: Option<&UserId>,
    ) -> Result<Notification, StoreError> {
        let (notification, unread) = {
            let db = self.db.lock().await;
            let notification = db.create_notification(
                recipient,
                notification_type,
                reference_id,
                message,
                from_user,
            )?;
            let unread = match db.count_unread(recipient) {
                Ok(n) => Some(n),
                Err(e) => {
                    warn!(user = %recipient, error = %e, "Unread count failed, skipping push");
                    None
                }
            };
            (notification, unread)
        };

        if let Some(un_read_count) = unread {
            let reached = self.broadcaster.send_to_user(
                &ServerEvent::Notification(NotificationPush {
                    notification: notification.clone(),
                    un_read_count,
                }),
                recipient,
            );
            debug!(
                user = %recipient,
                kind = %notification_type,
                devices = reached,
                unread = un_read_count,
                "Notification pushed"
            );
        }

        Ok(notification)
    }

    /// Mail `recipient` at the address on their user record. Returns whether
    /// the mail was handed to the transport.
    pub async fn email(&self, recipient: &UserId, subject: &str, body: &str) -> bool {
        let address = {
            let db = self.db.lock().await;
            match db.find_user(recipient) {
                Ok(user) => user.and_then(|u| u.email),
                Err(e) => {
                    warn!(user = %recipient, error = %e, "User lookup for email failed");
                    return false;
                }
            }
        };

        let result = match address {
            Some(to) => {
                self.mailer
                    .send(&Email {
                        to,
                        subject: subject.to_string(),
                        body: body.to_string(),
                    })
                    .await
            }
            None => Err(MailError::NoAddress),
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(user = %recipient, error = %e, "Email not sent");
                false
            }
        }
    }
}
