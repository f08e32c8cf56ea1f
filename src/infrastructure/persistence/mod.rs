//! Persistence implementations

pub mod authorize_repository;
pub mod database;
pub mod endpoint_repository;
pub mod extension_repository;
pub mod outbox_repository;

pub use authorize_repository::SqliteAuthorizeRepository;
pub use database::{DatabaseConfig, DatabaseEngine, DatabaseHandle};
pub use endpoint_repository::SqliteEndpointRepository;
pub use extension_repository::SqliteExtensionRepository;
pub use outbox_repository::SqliteOutboxRepository;
