//! Application layer - orchestrates domain and infrastructure objects.
//!
//! `registry` and `authorize_worker` implement the registration state
//! machine; `manager` is the stack coordinator that wires Context signals
//! to them; `request` is the one-shot query abstraction the database
//! engine and Authorize worker use to answer callers; `server` is the
//! lifecycle supervisor.

pub mod authorize_worker;
pub mod manager;
pub mod registry;
pub mod request;
pub mod server;

pub use authorize_worker::{AuthorizeOutcome, AuthorizeWorker, EndpointHash, ExpiryCeilings};
pub use manager::{Manager, RealmConfig};
pub use registry::{AuthResult, Registry, RegistryEntry, RegistryKey};
pub use request::{RequestError, RequestResponder, RequestWaiter};
pub use server::{LifecycleEvent, Server, ServerError, ServiceNotifier, SignalOutcome, ThreadSpec};
