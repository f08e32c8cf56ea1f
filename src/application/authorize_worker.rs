//! Authorize worker - resolves a pre-authorize REGISTER into a challenge
//! context or a rejection.
//!
//! Grounded step-for-step on `original_source/Database/authorize.cpp`
//! `Authorize::findEndpoint`: engine-unavailable check, expires=0 silent
//! accept, range check, Endpoints lookup with `X-Initialize` creation and
//! outbox copy, Authorize lookup and type check, per-transport expires
//! clamp, and the final reply hash that Manager turns into a Registry
//! entry plus challenge.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::authorize::AuthorizeRepository;
use crate::domain::endpoint::{EndpointRepository, NONE_LABEL};
use crate::domain::extension::{ExtensionRange, ExtensionRepository};
use crate::domain::shared::error::DomainError;
use crate::infrastructure::protocols::sip::digest::DigestAlgorithm;
use crate::infrastructure::protocols::sip::event::Event;
use crate::infrastructure::protocols::sip::transport::TransportProtocol;

/// Per-transport expiry ceilings (§4.5 step 6), configurable with the
/// spec's defaults.
#[derive(Debug, Clone, Copy)]
pub struct ExpiryCeilings {
    pub nat_udp: Duration,
    pub plain_udp: Duration,
    pub tcp: Duration,
}

impl Default for ExpiryCeilings {
    fn default() -> Self {
        Self {
            nat_udp: Duration::from_secs(80),
            plain_udp: Duration::from_secs(300),
            tcp: Duration::from_secs(600),
        }
    }
}

impl ExpiryCeilings {
    pub fn ceiling_for(&self, transport: TransportProtocol, natted: bool) -> Duration {
        match transport {
            TransportProtocol::Udp if natted => self.nat_udp,
            TransportProtocol::Udp => self.plain_udp,
            _ => self.tcp,
        }
    }
}

/// The reply hash `findEndpoint` emits on success: everything Manager
/// needs to construct a Registry entry and issue a challenge.
#[derive(Debug, Clone)]
pub struct EndpointHash {
    pub realm: String,
    pub authname: String,
    pub display: String,
    pub algorithm: DigestAlgorithm,
    pub secret: String,
    pub extnbr: i64,
    pub label: String,
    pub endpoint_id: i64,
    pub origin: SocketAddr,
    pub expires: Duration,
}

/// What the worker tells Manager to do with the original Event.
#[derive(Debug, Clone)]
pub enum AuthorizeOutcome {
    /// Reply with this status directly; no Registry entry involved.
    Reply(u16),
    /// Construct a Registry entry from this hash and challenge.
    CreateEndpoint(EndpointHash),
}

pub struct AuthorizeWorker {
    extensions: Arc<dyn ExtensionRepository>,
    authorize: Arc<dyn AuthorizeRepository>,
    endpoints: Arc<dyn EndpointRepository>,
    range: ExtensionRange,
    ceilings: ExpiryCeilings,
}

impl AuthorizeWorker {
    pub fn new(
        extensions: Arc<dyn ExtensionRepository>,
        authorize: Arc<dyn AuthorizeRepository>,
        endpoints: Arc<dyn EndpointRepository>,
        range: ExtensionRange,
        ceilings: ExpiryCeilings,
    ) -> Self {
        Self { extensions, authorize, endpoints, range, ceilings }
    }

    /// Runs the full decision tree from §4.5 for one pre-authorize REGISTER.
    pub async fn find_endpoint(&self, event: &Event, transport: TransportProtocol) -> AuthorizeOutcome {
        // Step 2: de-registration of an unknown entry is a silent accept.
        if event.expires <= 0 {
            return AuthorizeOutcome::Reply(200);
        }

        // Step 3: extension range check.
        if !self.range.contains(event.number) {
            return AuthorizeOutcome::Reply(404);
        }

        let label = if event.label.is_empty() { NONE_LABEL } else { event.label.as_str() };

        // Step 4: Endpoints lookup, optionally creating on X-Initialize.
        let endpoint = match self.endpoints.find(event.number, label).await {
            Ok(Some(endpoint)) => endpoint,
            Ok(None) => {
                if event.initialize.as_deref() == Some("label") {
                    match self.endpoints.create_with_outbox_copy(event.number, label).await {
                        Ok(endpoint) => endpoint,
                        Err(_) => return AuthorizeOutcome::Reply(500),
                    }
                } else {
                    return AuthorizeOutcome::Reply(403);
                }
            }
            // Step 1: the engine itself failed.
            Err(DomainError::Internal(_)) => return AuthorizeOutcome::Reply(500),
            Err(_) => return AuthorizeOutcome::Reply(403),
        };

        // Step 5: Authorize lookup and type check.
        let authname = extension_authname(&self.extensions, event.number).await;
        let authorize_row = match self.authorize.find_by_authname(&authname).await {
            Ok(Some(row)) => row,
            Ok(None) => return AuthorizeOutcome::Reply(403),
            Err(DomainError::Internal(_)) => return AuthorizeOutcome::Reply(500),
            Err(_) => return AuthorizeOutcome::Reply(403),
        };
        if !authorize_row.atype.may_register() {
            return AuthorizeOutcome::Reply(403);
        }

        // Step 6: clamp expires against the transport/NAT ceiling.
        let ceiling = self.ceilings.ceiling_for(transport, event.natted);
        let requested = Duration::from_secs(event.expires.max(0) as u64);
        let expires = requested.min(ceiling);

        // Step 7: build the reply hash.
        AuthorizeOutcome::CreateEndpoint(EndpointHash {
            realm: authorize_row.realm,
            authname: authorize_row.authname,
            display: authorize_row.fullname,
            algorithm: authorize_row.algorithm,
            secret: authorize_row.secret,
            extnbr: event.number,
            label: label.to_string(),
            endpoint_id: endpoint.endpoint,
            origin: event.source,
            expires,
        })
    }
}

/// Resolves the extension's `authname` foreign key so step 5 can look up
/// the Authorize row. A missing Extension row collapses to an empty
/// authname, which `find_by_authname` will simply fail to find (→ 403).
async fn extension_authname(extensions: &Arc<dyn ExtensionRepository>, extnbr: i64) -> String {
    extensions
        .find_by_number(extnbr)
        .await
        .ok()
        .flatten()
        .map(|e| e.authname)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceilings_pick_nat_udp_when_natted() {
        let ceilings = ExpiryCeilings::default();
        assert_eq!(ceilings.ceiling_for(TransportProtocol::Udp, true), Duration::from_secs(80));
        assert_eq!(ceilings.ceiling_for(TransportProtocol::Udp, false), Duration::from_secs(300));
        assert_eq!(ceilings.ceiling_for(TransportProtocol::Tcp, false), Duration::from_secs(600));
    }
}
