//! Infrastructure layer - technical implementations.
//!
//! `persistence` holds the SQLite database engine and repository
//! adapters; `protocols::sip` holds the SIP transport/transaction/context
//! stack.

pub mod persistence;
pub mod protocols;
