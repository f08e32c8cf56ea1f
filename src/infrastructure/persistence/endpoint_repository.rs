//! SQLite-backed EndpointRepository, including the "outbox copy" rule:
//! on first initialize of a new label for an existing extension, unread
//! rows from the NONE-labelled endpoint's pending queue are copied to the
//! new endpoint (§4.4).

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

use super::database::DatabaseHandle;
use crate::domain::endpoint::{Endpoint, EndpointRepository, NONE_LABEL};
use crate::domain::shared::error::{DomainError, Result};

pub struct SqliteEndpointRepository {
    db: DatabaseHandle,
}

impl SqliteEndpointRepository {
    pub fn new(db: DatabaseHandle) -> Self {
        Self { db }
    }
}

fn row_to_endpoint(r: sqlx::sqlite::SqliteRow) -> Endpoint {
    Endpoint {
        endpoint: r.get("endpoint"),
        extnbr: r.get("extnbr"),
        label: r.get("label"),
        devkey: r.get("devkey"),
        last_online: r.get("last_online"),
    }
}

#[async_trait]
impl EndpointRepository for SqliteEndpointRepository {
    async fn find(&self, extnbr: i64, label: &str) -> Result<Option<Endpoint>> {
        let label = label.to_string();
        self.db
            .query(move |pool| async move {
                let row = sqlx::query(
                    "SELECT endpoint, extnbr, label, devkey, last_online FROM Endpoints WHERE extnbr = ? AND label = ?",
                )
                .bind(extnbr)
                .bind(&label)
                .fetch_optional(&pool)
                .await?;
                Ok(row.map(row_to_endpoint))
            })
            .await
            .map_err(|e| DomainError::Internal(format!("{:?}", e)))
    }

    async fn create_with_outbox_copy(&self, extnbr: i64, label: &str) -> Result<Endpoint> {
        let label = label.to_string();
        self.db
            .query(move |pool| async move {
                let mut tx = pool.begin().await?;

                let inserted = sqlx::query("INSERT INTO Endpoints(extnbr, label) VALUES (?, ?)")
                    .bind(extnbr)
                    .bind(&label)
                    .execute(&mut *tx)
                    .await?;
                let new_id = inserted.last_insert_rowid();

                if let Some(none_row) = sqlx::query("SELECT endpoint FROM Endpoints WHERE extnbr = ? AND label = ?")
                    .bind(extnbr)
                    .bind(NONE_LABEL)
                    .fetch_optional(&mut *tx)
                    .await?
                {
                    let none_endpoint: i64 = none_row.get("endpoint");
                    sqlx::query(
                        "INSERT INTO Outbox(endpoint, mid, originator, subject, posted, sequence, content_type, body) \
                         SELECT ?, mid, originator, subject, posted, sequence, content_type, body FROM Outbox WHERE endpoint = ?",
                    )
                    .bind(new_id)
                    .bind(none_endpoint)
                    .execute(&mut *tx)
                    .await?;
                }

                tx.commit().await?;

                Ok(Endpoint {
                    endpoint: new_id,
                    extnbr,
                    label,
                    devkey: None,
                    last_online: None,
                })
            })
            .await
            .map_err(|e| DomainError::Internal(format!("{:?}", e)))
    }

    async fn touch_last_online(&self, endpoint: i64) -> Result<()> {
        self.db
            .query(move |pool| async move {
                sqlx::query("UPDATE Endpoints SET last_online = ? WHERE endpoint = ?")
                    .bind(Utc::now())
                    .bind(endpoint)
                    .execute(&pool)
                    .await?;
                Ok(())
            })
            .await
            .map_err(|e| DomainError::Internal(format!("{:?}", e)))
    }
}
