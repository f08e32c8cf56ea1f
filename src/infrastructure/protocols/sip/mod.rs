//! SIP protocol implementation
//!
//! This module implements a SIP (Session Initiation Protocol) stack based on RFC 3261.
//!
//! Architecture:
//! ```
//! ┌─────────────────────────┐
//! │   Manager / Registry    │
//! └───────────┬─────────────┘
//!             │  ContextSignal / ContextHandle
//! ┌───────────▼─────────────┐
//! │        Context          │
//! │   (event loop + cmds)   │
//! └───────────┬─────────────┘
//!             │
//! ┌───────────▼─────────────┐
//! │   Transaction Layer     │
//! │  (Client/Server TXN)    │
//! └───────────┬─────────────┘
//!             │
//! ┌───────────▼─────────────┐
//! │   Transport Layer       │
//! │  (UDP, TCP, TLS)        │
//! └─────────────────────────┘
//! ```

pub mod builder;
pub mod context;
pub mod digest;
pub mod event;
pub mod message;
pub mod rport;
pub mod transaction;
pub mod transport;

pub use context::{Allow, Context, ContextHandle, ContextSignal};
pub use digest::DigestAlgorithm;
pub use event::{AuthFields, Event};
pub use message::{SipMessage, SipMethod, SipRequest, SipResponse};
pub use transaction::{
    InviteClientState, InviteServerState, NonInviteClientState, NonInviteServerState,
    SipTimers, TimerType, Transaction, TransactionId, TransactionLayer, TransactionState,
    TransactionTimerAction,
};
pub use transport::{Transport, TransportProtocol};
