//! trunkline - a SIP (RFC 3261) PBX core.
//!
//! A multi-context SIP signalling engine: it terminates REGISTER
//! requests from local endpoints, authenticates them with HTTP digest,
//! maintains a registry of live contacts, brokers MESSAGE requests
//! between them, and persists authorization/extension/pending-message
//! state in SQLite.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use domain::shared::error::DomainError;
pub use domain::shared::result::Result;
