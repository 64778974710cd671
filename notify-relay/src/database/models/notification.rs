//! Notification database model.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::{ms_to_datetime, now_ms};
use crate::notification::{Metadata, NewNotification, Notification, NotificationType};
use crate::{Error, Result};

/// Row of the `notification` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NotificationDbModel {
    pub id: String,
    pub recipient_id: String,
    /// Closed-set type name, e.g. `track_update`.
    pub notification_type: String,
    pub title: String,
    pub message: String,
    /// JSON object.
    pub metadata: String,
    pub is_read: bool,
    /// Unix epoch milliseconds.
    pub created_at: i64,
}

impl NotificationDbModel {
    /// Build a new unread row with a fresh id and the current timestamp.
    pub fn new(input: &NewNotification) -> Result<Self> {
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            recipient_id: input.recipient_id.clone(),
            notification_type: input.notification_type.as_ref().to_string(),
            title: input.title.clone(),
            message: input.message.clone(),
            metadata: serde_json::to_string(&input.metadata)?,
            is_read: false,
            created_at: now_ms(),
        })
    }

    pub fn notification_type(&self) -> Result<NotificationType> {
        NotificationType::from_str(&self.notification_type).map_err(|_| {
            Error::validation(format!(
                "Unknown notification type '{}' for notification {}",
                self.notification_type, self.id
            ))
        })
    }

    /// Decode the stored metadata. An empty column reads as `{}`.
    pub fn metadata(&self) -> Result<Metadata> {
        if self.metadata.trim().is_empty() {
            return Ok(Metadata::new());
        }
        match serde_json::from_str::<serde_json::Value>(&self.metadata) {
            Ok(serde_json::Value::Object(map)) => Ok(map),
            Ok(_) => Err(Error::validation(format!(
                "Metadata for notification {} is not a JSON object",
                self.id
            ))),
            Err(e) => Err(Error::validation(format!(
                "Malformed metadata for notification {}: {}",
                self.id, e
            ))),
        }
    }

    pub fn into_notification(self) -> Result<Notification> {
        let notification_type = self.notification_type()?;
        let metadata = self.metadata()?;
        Ok(Notification {
            id: self.id,
            notification_type,
            title: self.title,
            message: self.message,
            is_read: self.is_read,
            metadata,
            created_at: ms_to_datetime(self.created_at),
        })
    }
}

impl TryFrom<NotificationDbModel> for Notification {
    type Error = Error;

    fn try_from(model: NotificationDbModel) -> Result<Self> {
        model.into_notification()
    }
}
