//! Authorize entity - one row per authorizable identity
//!
//! Grounded on the teacher's `domain::user::entity::User` (pre-hashed
//! `sip_ha1`, never a plaintext secret) and on the digest-algorithm
//! accounting this system distils from `Authorize(authname, realm,
//! digest, secret, fullname, type, access, ...)`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::shared::error::Result;
use crate::infrastructure::protocols::sip::digest::DigestAlgorithm;

/// The kind of identity an Authorize row represents. Only User and Device
/// may complete a REGISTER; the others exist for roster projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthorizeType {
    User,
    Device,
    Other,
}

impl AuthorizeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorizeType::User => "USER",
            AuthorizeType::Device => "DEVICE",
            AuthorizeType::Other => "OTHER",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "USER" => AuthorizeType::User,
            "DEVICE" => AuthorizeType::Device,
            _ => AuthorizeType::Other,
        }
    }

    /// Only USER and DEVICE rows may register (§4.5 step 5).
    pub fn may_register(&self) -> bool {
        matches!(self, AuthorizeType::User | AuthorizeType::Device)
    }
}

/// One authorizable identity. `secret` is the HA1-equivalent hex digest;
/// the server never stores or compares a plaintext password.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Authorize {
    pub authname: String,
    pub realm: String,
    pub algorithm: DigestAlgorithm,
    pub secret: String,
    pub fullname: String,
    pub atype: AuthorizeType,
    pub access: i32,
}

impl Authorize {
    pub fn new(authname: impl Into<String>, realm: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            authname: authname.into(),
            realm: realm.into(),
            algorithm: DigestAlgorithm::Md5,
            secret: secret.into(),
            fullname: String::new(),
            atype: AuthorizeType::User,
            access: 0,
        }
    }
}

#[async_trait]
pub trait AuthorizeRepository: Send + Sync {
    async fn find_by_authname(&self, authname: &str) -> Result<Option<Authorize>>;
    async fn upsert(&self, row: &Authorize) -> Result<()>;
}
