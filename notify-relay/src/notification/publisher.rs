//! Event publisher: persist first, then fan out.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::protocol::ServerMessage;
use super::registry::ConnectionRegistry;
use super::types::{Metadata, NewNotification, Notification, NotificationType};
use crate::database::repositories::NotificationRepository;
use crate::{Error, Result};

/// Turns business events into persisted notifications and live push events.
#[derive(Clone)]
pub struct EventPublisher {
    repository: Arc<dyn NotificationRepository>,
    registry: Arc<ConnectionRegistry>,
}

impl EventPublisher {
    pub fn new(
        repository: Arc<dyn NotificationRepository>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            repository,
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub async fn publish(
        &self,
        recipient_id: &str,
        notification_type: NotificationType,
        title: &str,
        message: &str,
        metadata: Metadata,
    ) -> Result<Notification> {
        let input = NewNotification::new(recipient_id, notification_type, title, message)
            .with_metadata(metadata);
        self.publish_new(input).await
    }

    /// Persist `input` and offer it to the recipient's live connections.
    ///
    /// A store failure returns [`Error::Persistence`] and nothing is pushed.
    /// Delivery problems are never reported to the caller; clients recover
    /// them with a REST fetch.
    pub async fn publish_new(&self, input: NewNotification) -> Result<Notification> {
        input.validate()?;

        let notification = match self.repository.create(&input).await {
            Ok(n) => n,
            Err(e @ Error::Validation(_)) => return Err(e),
            Err(e) => {
                warn!(
                    recipient_id = %input.recipient_id,
                    error = %e,
                    "Failed to persist notification; not publishing"
                );
                return Err(Error::persistence(e.to_string()));
            }
        };

        let report = self.registry.fan_out(
            &input.recipient_id,
            Arc::new(ServerMessage::NewNotification(notification.clone())),
        );

        if report.connections == 0 {
            debug!(
                recipient_id = %input.recipient_id,
                notification_id = %notification.id,
                "No live connections; notification will be picked up on next fetch"
            );
        } else {
            info!(
                recipient_id = %input.recipient_id,
                notification_id = %notification.id,
                notification_type = %notification.notification_type,
                delivered = report.delivered,
                dropped = report.dropped,
                disconnected = report.disconnected,
                "Notification published"
            );
        }

        Ok(notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::BackpressurePolicy;
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;

    /// Store that keeps rows in memory and can be switched to fail writes.
    #[derive(Default)]
    struct MemoryRepository {
        rows: Mutex<Vec<(String, Notification)>>,
        fail_writes: bool,
    }

    #[async_trait]
    impl NotificationRepository for MemoryRepository {
        async fn create(&self, input: &NewNotification) -> Result<Notification> {
            if self.fail_writes {
                return Err(Error::Database("database is locked".into()));
            }
            let n = Notification {
                id: uuid::Uuid::new_v4().to_string(),
                notification_type: input.notification_type,
                title: input.title.clone(),
                message: input.message.clone(),
                is_read: false,
                metadata: input.metadata.clone(),
                created_at: Utc::now(),
            };
            self.rows
                .lock()
                .push((input.recipient_id.clone(), n.clone()));
            Ok(n)
        }

        async fn get(&self, recipient_id: &str, id: &str) -> Result<Notification> {
            self.rows
                .lock()
                .iter()
                .find(|(r, n)| r == recipient_id && n.id == id)
                .map(|(_, n)| n.clone())
                .ok_or_else(|| Error::not_found("Notification", id))
        }

        async fn list_for_recipient(&self, recipient_id: &str) -> Result<Vec<Notification>> {
            let mut items: Vec<Notification> = self
                .rows
                .lock()
                .iter()
                .filter(|(r, _)| r == recipient_id)
                .map(|(_, n)| n.clone())
                .collect();
            items.sort_by(Notification::newest_first);
            Ok(items)
        }

        async fn mark_read(&self, _recipient_id: &str, id: &str) -> Result<Notification> {
            Err(Error::not_found("Notification", id))
        }

        async fn mark_all_read(&self, _recipient_id: &str) -> Result<u64> {
            Ok(0)
        }

        async fn delete(&self, _recipient_id: &str, id: &str) -> Result<()> {
            Err(Error::not_found("Notification", id))
        }

        async fn count_unread(&self, recipient_id: &str) -> Result<i64> {
            Ok(self.list_for_recipient(recipient_id).await?.len() as i64)
        }
    }

    fn publisher(repo: Arc<MemoryRepository>) -> (EventPublisher, Arc<ConnectionRegistry>) {
        let registry = Arc::new(ConnectionRegistry::new(16, BackpressurePolicy::DropOldest));
        (EventPublisher::new(repo, registry.clone()), registry)
    }

    #[tokio::test]
    async fn test_publish_persists_then_delivers_once() {
        let repo = Arc::new(MemoryRepository::default());
        let (publisher, registry) = publisher(repo.clone());
        let conn = registry.register("u1");

        let n = publisher
            .publish(
                "u1",
                NotificationType::Achievement,
                "Badge earned",
                "First quiz passed",
                Metadata::new(),
            )
            .await
            .unwrap();

        assert_eq!(repo.list_for_recipient("u1").await.unwrap(), vec![n.clone()]);
        let pushed = conn.queue().try_recv().unwrap();
        assert_eq!(*pushed, ServerMessage::NewNotification(n));
        assert!(conn.queue().try_recv().is_none());
    }

    #[tokio::test]
    async fn test_publish_without_connections_still_persists() {
        let repo = Arc::new(MemoryRepository::default());
        let (publisher, _registry) = publisher(repo.clone());

        publisher
            .publish("u1", NotificationType::System, "Maintenance", "Tonight", Metadata::new())
            .await
            .unwrap();
        assert_eq!(repo.count_unread("u1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_is_not_fanned_out() {
        let repo = Arc::new(MemoryRepository {
            fail_writes: true,
            ..Default::default()
        });
        let (publisher, registry) = publisher(repo);
        let conn = registry.register("u1");

        let err = publisher
            .publish("u1", NotificationType::Message, "Hi", "There", Metadata::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
        assert!(conn.queue().is_empty());
        assert_eq!(registry.stats().enqueued, 0);
    }

    #[tokio::test]
    async fn test_invalid_input_is_rejected_before_store() {
        let repo = Arc::new(MemoryRepository::default());
        let (publisher, _registry) = publisher(repo.clone());

        let err = publisher
            .publish("u1", NotificationType::Message, "", "body", Metadata::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(repo.rows.lock().is_empty());
    }
}
