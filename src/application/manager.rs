//! Manager - stack coordinator.
//!
//! Owns the list of Contexts, dispatches their signals to Registry and
//! the Authorize worker, and holds the process-wide realm/banner/alias
//! state. Grounded on `original_source/Server/manager.cpp`'s three slots
//! (`refreshRegistration`, `createRegistration`, `sendMessage`); runs as a
//! single tokio task consuming `ContextSignal` from every Context's
//! shared sender, which is what makes Registry's single-owner model safe
//! without extra locking (§9 "single Core/Manager value").

use std::sync::Arc;
use std::time::Duration;

use serde_json;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use super::authorize_worker::{AuthorizeOutcome, AuthorizeWorker, EndpointHash, ExpiryCeilings};
use super::registry::{AuthResult, Registry, RegistryEntry};
use crate::domain::extension::ExtensionRepository;
use crate::domain::outbox::OutboxRepository;
use crate::domain::shared::value_objects::SipUri;
use crate::infrastructure::protocols::sip::context::{ContextHandle, ContextSignal};
use crate::infrastructure::protocols::sip::event::Event;
use crate::infrastructure::protocols::sip::transport::TransportProtocol;

/// Process-wide configuration snapshot (§9 "mutable static configuration
/// becomes configuration snapshots passed by value").
#[derive(Debug, Clone)]
pub struct RealmConfig {
    pub realm: String,
    pub banner: String,
    pub aliases: Vec<String>,
}

impl RealmConfig {
    /// Realm defaults to the configured network domain; if that is a
    /// placeholder value (`local`/`localhost`), falls back to the server
    /// UUID (§4.7).
    pub fn resolve_realm(configured: &str, uuid: &Uuid) -> String {
        match configured {
            "local" | "localhost" | "" => uuid.to_string(),
            other => other.to_string(),
        }
    }
}

pub struct Manager {
    registry: Registry,
    authorize_worker: AuthorizeWorker,
    extensions: Arc<dyn ExtensionRepository>,
    outbox: Arc<dyn OutboxRepository>,
    realm: Arc<RwLock<RealmConfig>>,
    ceilings: ExpiryCeilings,
    signal_rx: mpsc::Receiver<ContextSignal>,
}

impl Manager {
    pub fn new(
        registry: Registry,
        authorize_worker: AuthorizeWorker,
        extensions: Arc<dyn ExtensionRepository>,
        outbox: Arc<dyn OutboxRepository>,
        realm: Arc<RwLock<RealmConfig>>,
        ceilings: ExpiryCeilings,
        signal_rx: mpsc::Receiver<ContextSignal>,
    ) -> Self {
        Self { registry, authorize_worker, extensions, outbox, realm, ceilings, signal_rx }
    }

    /// Runs the dispatch loop until every Context's sender half drops,
    /// alongside a one-minute presence sweep (§4.3).
    pub async fn run(mut self) {
        let mut sweep = tokio::time::interval(Duration::from_secs(60));
        loop {
            tokio::select! {
                signal = self.signal_rx.recv() => {
                    let Some(signal) = signal else { break };
                    self.dispatch(signal).await;
                }
                _ = sweep.tick() => {
                    let expired = self.registry.sweep_expired();
                    if !expired.is_empty() {
                        info!(count = expired.len(), "swept expired registry entries");
                    }
                }
            }
        }
    }

    async fn dispatch(&mut self, signal: ContextSignal) {
        match signal {
            ContextSignal::Register(event, context) => self.refresh_registration(event, context).await,
            ContextSignal::SendMessage(event, context) => self.route_message(event, context).await,
            ContextSignal::LocalMessage(event, context) => self.route_message(event, context).await,
        }
    }

    /// `refreshRegistration` (§4.7): look up a Registry entry for
    /// (extension, label); challenge, verify, or delegate to Authorize.
    async fn refresh_registration(&mut self, event: Event, context: ContextHandle) {
        let extnbr = event.number;
        let label = event.label.clone();

        if self.registry.find(extnbr, &label).is_none() {
            let outcome = self.authorize_worker.find_endpoint(&event, context.protocol()).await;
            match outcome {
                AuthorizeOutcome::Reply(status) => {
                    context.reply(event, status).await;
                }
                AuthorizeOutcome::CreateEndpoint(hash) => {
                    self.create_registration(event, hash, context).await;
                }
            }
            return;
        }

        match self.registry.authenticate(extnbr, &label, &event) {
            AuthResult::NeedsChallenge => {
                self.challenge(extnbr, &label, event, context).await;
            }
            AuthResult::Denied => {
                context.reply(event, 403).await;
            }
            AuthResult::Deregistered => {
                self.registry.remove(extnbr, &label);
                context.reply(event, 200).await;
            }
            AuthResult::Refreshed => {
                let expires = self.ceilings.ceiling_for(context.protocol(), event.natted).min(Duration::from_secs(event.expires.max(0) as u64));
                self.registry.activate(extnbr, &label, context.clone(), event.source, expires);
                let roster_body = if label != crate::domain::endpoint::NONE_LABEL {
                    self.roster_bootstrap_body().await
                } else {
                    None
                };
                context.authorize(event, event.source, expires.as_secs() as i64, roster_body).await;
            }
        }
    }

    /// `createRegistration` (§4.7): construct a Registry entry from the
    /// Authorize worker's hash and issue the initial challenge.
    async fn create_registration(&mut self, event: Event, hash: EndpointHash, context: ContextHandle) {
        let entry = RegistryEntry {
            extnbr: hash.extnbr,
            label: hash.label.clone(),
            endpoint_id: hash.endpoint_id,
            display: hash.display,
            authname: hash.authname,
            secret: hash.secret,
            realm: hash.realm,
            algorithm: hash.algorithm,
            contact: None,
            context: None,
            nonce: String::new(),
            deadline: None,
            last_refresh: chrono::Utc::now(),
        };
        self.registry.insert(entry);
        self.challenge(hash.extnbr, &hash.label, event, context).await;
    }

    async fn challenge(&mut self, extnbr: i64, label: &str, event: Event, context: ContextHandle) {
        let Some((realm, nonce, algorithm)) = self.registry.issue_challenge(extnbr, label) else {
            context.reply(event, 404).await;
            return;
        };
        context.challenge(event, realm, nonce, algorithm).await;
    }

    /// Applies a new realm/banner/alias snapshot, the channel-based
    /// replacement for the original's mutable static configuration
    /// (§9, §4.8 reload).
    pub async fn reload_realm(&self, config: RealmConfig) {
        *self.realm.write().await = config;
    }

    pub async fn realm_snapshot(&self) -> RealmConfig {
        self.realm.read().await.clone()
    }

    async fn roster_bootstrap_body(&self) -> Option<Vec<u8>> {
        match self.extensions.roster().await {
            Ok(roster) => serde_json::to_vec(&roster).ok(),
            Err(e) => {
                warn!(error = %e, "roster query failed, omitting bootstrap body");
                None
            }
        }
    }

    /// `sendMessage` (§4.7), entered from both `SEND_MESSAGE` (known
    /// local sender) and `LOCAL_MESSAGE` (local destination, unknown
    /// sender) signals: the destination is always resolved from the
    /// event's `to` extension number. The message is always enqueued to
    /// every destination endpoint's Outbox first so an inactive endpoint
    /// still receives it on its next registration (§4.5, §7).
    async fn route_message(&mut self, event: Event, context: ContextHandle) {
        let Some(to) = event.to.clone() else {
            context.reply(event, 404).await;
            return;
        };
        let Some(extnbr) = to.as_extension_number() else {
            context.reply(event, 404).await;
            return;
        };

        let mid = uuid::Uuid::new_v4().to_string();
        let subject = if event.subject.is_empty() { None } else { Some(event.subject.clone()) };
        let from = event.from.clone().unwrap_or_else(|| SipUri::new(String::new(), String::new(), None));

        let active = self.registry.active_entries_for(extnbr);
        if active.is_empty() {
            // No live endpoint: queue for every known label and reply
            // success; the message is delivered on next registration.
            for label in self.registry.labels_for(extnbr).to_vec() {
                if let Some(entry) = self.registry.find(extnbr, &label) {
                    let _ = self
                        .outbox
                        .enqueue(entry.endpoint_id, &mid, &from.to_string(), subject.as_deref(), event.sequence as i64, &event.content_type, &event.body)
                        .await;
                }
            }
            context.reply(event, 202).await;
            return;
        }

        let mut delivered = false;
        for entry in active {
            let _ = self
                .outbox
                .enqueue(entry.endpoint_id, &mid, &from.to_string(), subject.as_deref(), event.sequence as i64, &event.content_type, &event.body)
                .await;

            let to_uri = SipUri::new(entry.extnbr.to_string(), to.host().to_string(), to.port());
            let mut headers = vec![("X-MID".to_string(), mid.clone()), ("X-EP".to_string(), entry.endpoint_id.to_string())];
            if let Some(subject) = &subject {
                headers.push(("Subject".to_string(), subject.clone()));
            }
            let ok = context
                .message(from.clone(), to_uri, entry.contact, headers, event.content_type.clone(), event.body.clone())
                .await;
            delivered |= ok;
        }

        context.reply(event, if delivered { 200 } else { 202 }).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn realm_falls_back_to_uuid_for_placeholder_domains() {
        let uuid = Uuid::new_v4();
        assert_eq!(RealmConfig::resolve_realm("local", &uuid), uuid.to_string());
        assert_eq!(RealmConfig::resolve_realm("localhost", &uuid), uuid.to_string());
        assert_eq!(RealmConfig::resolve_realm("sip.example", &uuid), "sip.example");
    }
}
