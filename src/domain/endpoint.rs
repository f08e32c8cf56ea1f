//! Endpoint entity - the (extension, label, device-key) tuple
//!
//! Grounded on `original_source/Server/registry.hpp`'s `Endpoint` class
//! and the distilled `Endpoints(endpoint, extnbr, label, devkey,
//! last_online, ...)` table; the stored row is the source of truth for a
//! Registry entry's persistent identity.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::shared::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub endpoint: i64,
    pub extnbr: i64,
    pub label: String,
    pub devkey: Option<String>,
    pub last_online: Option<DateTime<Utc>>,
}

/// The reserved label meaning "unnamed legacy device".
pub const NONE_LABEL: &str = "none";

#[async_trait]
pub trait EndpointRepository: Send + Sync {
    async fn find(&self, extnbr: i64, label: &str) -> Result<Option<Endpoint>>;

    /// Create the Endpoints row for a first-seen label, copying the
    /// NONE-labelled endpoint's unread outbox per §4.4's "outbox copy".
    async fn create_with_outbox_copy(&self, extnbr: i64, label: &str) -> Result<Endpoint>;

    async fn touch_last_online(&self, endpoint: i64) -> Result<()>;
}
