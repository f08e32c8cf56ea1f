//! Domain layer - Core business logic and rules
//!
//! This layer contains:
//! - Entities: Objects with identity (Extension, Authorize, Endpoint)
//! - Value Objects: Immutable objects without identity (SipUri)
//! - Repository Interfaces: Ports for persistence

pub mod authorize;
pub mod endpoint;
pub mod extension;
pub mod outbox;
pub mod shared;

// Re-export commonly used types
pub use shared::{DomainError, Result};
