//! Notification repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::NotificationDbModel;
use crate::notification::{NewNotification, Notification};
use crate::{Error, Result};

const ENTITY: &str = "Notification";

/// Notification store.
///
/// Every read and mutation is scoped to a recipient. A notification owned by
/// another user behaves exactly like one that does not exist.
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn create(&self, input: &NewNotification) -> Result<Notification>;
    async fn get(&self, recipient_id: &str, id: &str) -> Result<Notification>;
    /// Newest first (`created_at DESC, id DESC`).
    async fn list_for_recipient(&self, recipient_id: &str) -> Result<Vec<Notification>>;
    /// Idempotent; returns the updated notification.
    async fn mark_read(&self, recipient_id: &str, id: &str) -> Result<Notification>;
    /// Returns the number of notifications that flipped to read.
    async fn mark_all_read(&self, recipient_id: &str) -> Result<u64>;
    async fn delete(&self, recipient_id: &str, id: &str) -> Result<()>;
    async fn count_unread(&self, recipient_id: &str) -> Result<i64>;
}

/// SQLx implementation of NotificationRepository.
pub struct SqlxNotificationRepository {
    pool: SqlitePool,
}

impl SqlxNotificationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationRepository for SqlxNotificationRepository {
    async fn create(&self, input: &NewNotification) -> Result<Notification> {
        input.validate()?;
        let row = NotificationDbModel::new(input)?;
        sqlx::query(
            r#"
            INSERT INTO notification (
                id, recipient_id, notification_type, title, message, metadata, is_read, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(&row.recipient_id)
        .bind(&row.notification_type)
        .bind(&row.title)
        .bind(&row.message)
        .bind(&row.metadata)
        .bind(row.is_read)
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;
        row.into_notification()
    }

    async fn get(&self, recipient_id: &str, id: &str) -> Result<Notification> {
        sqlx::query_as::<_, NotificationDbModel>(
            "SELECT * FROM notification WHERE id = ? AND recipient_id = ?",
        )
        .bind(id)
        .bind(recipient_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found(ENTITY, id))?
        .into_notification()
    }

    async fn list_for_recipient(&self, recipient_id: &str) -> Result<Vec<Notification>> {
        let rows = sqlx::query_as::<_, NotificationDbModel>(
            r#"
            SELECT * FROM notification
            WHERE recipient_id = ?
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(recipient_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(NotificationDbModel::into_notification)
            .collect()
    }

    async fn mark_read(&self, recipient_id: &str, id: &str) -> Result<Notification> {
        sqlx::query_as::<_, NotificationDbModel>(
            r#"
            UPDATE notification SET is_read = 1
            WHERE id = ? AND recipient_id = ?
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(recipient_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found(ENTITY, id))?
        .into_notification()
    }

    async fn mark_all_read(&self, recipient_id: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE notification SET is_read = 1 WHERE recipient_id = ? AND is_read = 0",
        )
        .bind(recipient_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, recipient_id: &str, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM notification WHERE id = ? AND recipient_id = ?")
            .bind(id)
            .bind(recipient_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(ENTITY, id));
        }
        Ok(())
    }

    async fn count_unread(&self, recipient_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notification WHERE recipient_id = ? AND is_read = 0",
        )
        .bind(recipient_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
