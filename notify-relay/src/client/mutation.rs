use chrono::{DateTime, Utc};

use crate::notification::Notification;

/// A user-initiated change to the notification list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    MarkRead(String),
    /// Marks everything created at or before `through`. `None` means nothing
    /// was visible when the user acted, so nothing is marked locally.
    ///
    /// The bound keeps notifications pushed after the user acted from being
    /// swept up while the request is in flight.
    MarkAllRead { through: Option<DateTime<Utc>> },
    Delete(String),
}

impl Mutation {
    /// `MarkAllRead` bounded by the newest item in `items`.
    pub fn mark_all_read_of(items: &[Notification]) -> Self {
        Self::MarkAllRead {
            through: items.iter().map(|n| n.created_at).max(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::MarkRead(_) => "mark_read",
            Self::MarkAllRead { .. } => "mark_all_read",
            Self::Delete(_) => "delete",
        }
    }

    pub fn target(&self) -> Option<&str> {
        match self {
            Self::MarkRead(id) | Self::Delete(id) => Some(id),
            Self::MarkAllRead { .. } => None,
        }
    }

    /// Apply to a list kept in canonical order. Order is preserved.
    pub fn apply(&self, items: &mut Vec<Notification>) {
        match self {
            Self::MarkRead(id) => {
                if let Some(item) = items.iter_mut().find(|n| &n.id == id) {
                    item.is_read = true;
                }
            }
            Self::MarkAllRead { through } => {
                for item in items
                    .iter_mut()
                    .filter(|n| through.is_some_and(|t| n.created_at <= t))
                {
                    item.is_read = true;
                }
            }
            Self::Delete(id) => items.retain(|n| &n.id != id),
        }
    }
}
