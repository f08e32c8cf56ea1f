//! Pending-message queue: rows retained until the target endpoint's client
//! acknowledges receipt.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::shared::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: i64,
    pub endpoint: i64,
    pub mid: String,
    pub originator: String,
    pub subject: Option<String>,
    pub posted: DateTime<Utc>,
    pub sequence: i64,
    pub content_type: String,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait OutboxRepository: Send + Sync {
    async fn enqueue(
        &self,
        endpoint: i64,
        mid: &str,
        originator: &str,
        subject: Option<&str>,
        sequence: i64,
        content_type: &str,
        body: &[u8],
    ) -> Result<()>;

    async fn pending_for(&self, endpoint: i64) -> Result<Vec<OutboxMessage>>;

    async fn copy_unread(&self, from_endpoint: i64, to_endpoint: i64) -> Result<()>;

    async fn acknowledge(&self, id: i64) -> Result<()>;
}
