//! Extension entity - one row per dialable number
//!
//! Grounded on the distilled `Extensions(extnbr, authname, display, type,
//! alias, access, ...)` table; `authname` is a foreign key into Authorize.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::shared::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExtensionType {
    User,
    Device,
    Group,
    Pilot,
    System,
}

impl ExtensionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtensionType::User => "USER",
            ExtensionType::Device => "DEVICE",
            ExtensionType::Group => "GROUP",
            ExtensionType::Pilot => "PILOT",
            ExtensionType::System => "SYSTEM",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "USER" => ExtensionType::User,
            "DEVICE" => ExtensionType::Device,
            "GROUP" => ExtensionType::Group,
            "PILOT" => ExtensionType::Pilot,
            _ => ExtensionType::System,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Extension {
    pub extnbr: i64,
    pub authname: String,
    pub display: String,
    pub etype: ExtensionType,
    pub alias: Option<String>,
    pub access: i32,
}

/// The inclusive extension-number range this deployment serves. Default
/// 100..699 per the spec; used both to reject out-of-range REGISTERs and
/// to size the presence bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionRange {
    pub first: i64,
    pub last: i64,
}

impl Default for ExtensionRange {
    fn default() -> Self {
        Self { first: 100, last: 699 }
    }
}

impl ExtensionRange {
    pub fn contains(&self, extnbr: i64) -> bool {
        extnbr >= self.first && extnbr <= self.last
    }

    pub fn len(&self) -> usize {
        (self.last - self.first + 1).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
pub trait ExtensionRepository: Send + Sync {
    async fn find_by_number(&self, extnbr: i64) -> Result<Option<Extension>>;
    async fn roster(&self) -> Result<Vec<RosterEntry>>;
}

/// Roster projection row: the union of Extensions and Authorize joined on
/// name, keys `a`/`n`/`u`/`d`/`t` per the spec's JSON projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterEntry {
    #[serde(rename = "a")]
    pub auth_id: String,
    #[serde(rename = "n")]
    pub number: i64,
    #[serde(rename = "u")]
    pub uri: String,
    #[serde(rename = "d")]
    pub display: String,
    #[serde(rename = "t")]
    pub etype: String,
}
