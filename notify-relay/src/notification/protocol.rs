//! Push channel wire protocol.
//!
//! Frames are JSON text messages of the form
//! `{"event": "new_notification", "data": { ...Notification... }}`.
//! Read and delete state changes are not pushed; clients reconcile them
//! through REST.

use serde::{Deserialize, Serialize};

use super::types::Notification;

/// A server-to-client push frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    NewNotification(Notification),
}

impl ServerMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::NewNotification(_) => "new_notification",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::types::{Metadata, NotificationType};
    use chrono::Utc;

    #[test]
    fn test_envelope_shape() {
        let mut metadata = Metadata::new();
        metadata.insert("trackId".into(), serde_json::json!("rust-101"));
        let msg = ServerMessage::NewNotification(Notification {
            id: "n1".into(),
            notification_type: NotificationType::TrackUpdate,
            title: "Track updated".into(),
            message: "A new module was added".into(),
            is_read: false,
            metadata,
            created_at: Utc::now(),
        });

        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["event"], "new_notification");
        assert_eq!(value["data"]["type"], "track_update");
        assert_eq!(value["data"]["metadata"]["trackId"], "rust-101");
        assert_eq!(msg.event_name(), "new_notification");

        let decoded = ServerMessage::from_json(&msg.to_json().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_unknown_event_is_an_error() {
        let raw = r#"{"event":"notification_read","data":{"id":"n1"}}"#;
        assert!(ServerMessage::from_json(raw).is_err());
    }
}
