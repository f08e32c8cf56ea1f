//! SQLite-backed OutboxRepository - pending messages held for offline endpoints.

use async_trait::async_trait;
use sqlx::Row;

use super::database::DatabaseHandle;
use crate::domain::outbox::{OutboxMessage, OutboxRepository};
use crate::domain::shared::error::{DomainError, Result};

pub struct SqliteOutboxRepository {
    db: DatabaseHandle,
}

impl SqliteOutboxRepository {
    pub fn new(db: DatabaseHandle) -> Self {
        Self { db }
    }
}

#[async_trait]
impl OutboxRepository for SqliteOutboxRepository {
    async fn enqueue(
        &self,
        endpoint: i64,
        mid: &str,
        originator: &str,
        subject: Option<&str>,
        sequence: i64,
        content_type: &str,
        body: &[u8],
    ) -> Result<()> {
        let (mid, originator, subject, content_type, body) = (
            mid.to_string(),
            originator.to_string(),
            subject.map(|s| s.to_string()),
            content_type.to_string(),
            body.to_vec(),
        );
        self.db
            .query(move |pool| async move {
                sqlx::query(
                    "INSERT INTO Outbox(endpoint, mid, originator, subject, posted, sequence, content_type, body) \
                     VALUES (?, ?, ?, ?, datetime('now'), ?, ?, ?)",
                )
                .bind(endpoint)
                .bind(&mid)
                .bind(&originator)
                .bind(&subject)
                .bind(sequence)
                .bind(&content_type)
                .bind(&body)
                .execute(&pool)
                .await?;
                Ok(())
            })
            .await
            .map_err(|e| DomainError::Internal(format!("{:?}", e)))
    }

    async fn pending_for(&self, endpoint: i64) -> Result<Vec<OutboxMessage>> {
        self.db
            .query(move |pool| async move {
                let rows = sqlx::query(
                    "SELECT id, endpoint, mid, originator, subject, posted, sequence, content_type, body \
                     FROM Outbox WHERE endpoint = ? ORDER BY sequence",
                )
                .bind(endpoint)
                .fetch_all(&pool)
                .await?;
                Ok(rows
                    .into_iter()
                    .map(|r| OutboxMessage {
                        id: r.get("id"),
                        endpoint: r.get("endpoint"),
                        mid: r.get("mid"),
                        originator: r.get("originator"),
                        subject: r.get("subject"),
                        posted: r.get("posted"),
                        sequence: r.get("sequence"),
                        content_type: r.get("content_type"),
                        body: r.get("body"),
                    })
                    .collect())
            })
            .await
            .map_err(|e| DomainError::Internal(format!("{:?}", e)))
    }

    async fn copy_unread(&self, from_endpoint: i64, to_endpoint: i64) -> Result<()> {
        self.db
            .query(move |pool| async move {
                sqlx::query(
                    "INSERT INTO Outbox(endpoint, mid, originator, subject, posted, sequence, content_type, body) \
                     SELECT ?, mid, originator, subject, posted, sequence, content_type, body FROM Outbox WHERE endpoint = ?",
                )
                .bind(to_endpoint)
                .bind(from_endpoint)
                .execute(&pool)
                .await?;
                Ok(())
            })
            .await
            .map_err(|e| DomainError::Internal(format!("{:?}", e)))
    }

    async fn acknowledge(&self, id: i64) -> Result<()> {
        self.db
            .query(move |pool| async move {
                sqlx::query("DELETE FROM Outbox WHERE id = ?").bind(id).execute(&pool).await?;
                Ok(())
            })
            .await
            .map_err(|e| DomainError::Internal(format!("{:?}", e)))
    }
}
