//! Notification domain types shared by the server and the client engine.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Opaque key-value payload attached to a notification.
pub type Metadata = Map<String, Value>;

/// Closed set of notification kinds.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
    utoipa::ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationType {
    TrackUpdate,
    NewComment,
    Achievement,
    Message,
    System,
}

/// A persisted notification, in its wire representation.
///
/// Everything except `is_read` is immutable once the notification exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub is_read: bool,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Canonical list ordering: newest first, ties broken by id so the order
    /// is total.
    pub fn newest_first(a: &Notification, b: &Notification) -> Ordering {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    }
}

/// Input for creating a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewNotification {
    pub recipient_id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub metadata: Metadata,
}

impl NewNotification {
    pub fn new(
        recipient_id: impl Into<String>,
        notification_type: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            notification_type,
            title: title.into(),
            message: message.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.recipient_id.trim().is_empty() {
            return Err(Error::validation("recipientId must not be empty"));
        }
        if self.title.trim().is_empty() {
            return Err(Error::validation("title must not be empty"));
        }
        if self.message.trim().is_empty() {
            return Err(Error::validation("message must not be empty"));
        }
        Ok(())
    }
}
