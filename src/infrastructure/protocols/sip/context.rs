//! Context - one worker per bound (address, transport, port).
//!
//! Grounded on the teacher's `transport.rs` (kept as-is, wrapped here) and
//! on `original_source/Server/context.hpp`'s per-Context stack lock and
//! local-host/alias bookkeeping. The OS-thread-plus-mutex model becomes a
//! single tokio task that owns the transport outright: inbound datagrams
//! and outbound commands both flow through the same task, so there is
//! nothing left to lock (§9, "Per-Context stack lock").

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rsip::Header;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};

use super::builder::ResponseBuilder;
use super::digest::DigestAlgorithm;
use super::event::Event;
use super::message::{SipMessage, SipMethod};
use super::transport::{OutgoingMessage, Transport, TransportProtocol};
use crate::domain::shared::value_objects::SipUri;

/// Permission mask a Context enforces before emitting signals upstream,
/// translated from the original `Context::Allow` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allow(pub u8);

impl Allow {
    pub const REGISTRY: Allow = Allow(1 << 0);
    pub const REMOTE: Allow = Allow(1 << 1);
    pub const UNAUTHENTICATED: Allow = Allow(1 << 2);

    pub fn contains(&self, flag: Allow) -> bool {
        self.0 & flag.0 != 0
    }
}

impl std::ops::BitOr for Allow {
    type Output = Allow;
    fn bitor(self, rhs: Allow) -> Allow {
        Allow(self.0 | rhs.0)
    }
}

/// A signal Context emits upstream to Manager, the channel-based
/// replacement for the original's cross-thread Qt signals (§9).
#[derive(Debug)]
pub enum ContextSignal {
    Register(Event, ContextHandle),
    SendMessage(Event, ContextHandle),
    LocalMessage(Event, ContextHandle),
}

/// The commands callable on a Context from any other task, serialized
/// through its single mpsc channel.
enum ContextCommand {
    Reply {
        event: Event,
        status: u16,
        reply_to: oneshot::Sender<bool>,
    },
    Challenge {
        event: Event,
        realm: String,
        nonce: String,
        algorithm: DigestAlgorithm,
        reply_to: oneshot::Sender<bool>,
    },
    Authorize {
        event: Event,
        contact: SocketAddr,
        expires: i64,
        roster_body: Option<Vec<u8>>,
        reply_to: oneshot::Sender<bool>,
    },
    SendOutOfDialogMessage {
        from: SipUri,
        to: SipUri,
        route: Option<SocketAddr>,
        headers: Vec<(String, String)>,
        content_type: String,
        body: Vec<u8>,
        reply_to: oneshot::Sender<bool>,
    },
    UpdateAliases(Vec<String>),
}

/// A cheap, cloneable, `Send + Sync` handle onto a running Context. This is
/// the channel-based stand-in for "operations callable from other threads
/// acquire the same lock internally" (§4.2).
#[derive(Clone)]
pub struct ContextHandle {
    name: Arc<str>,
    protocol: TransportProtocol,
    cmd_tx: mpsc::Sender<ContextCommand>,
    message_sequence: Arc<AtomicU64>,
}

impl std::fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextHandle").field("name", &self.name).finish()
    }
}

impl ContextHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn protocol(&self) -> TransportProtocol {
        self.protocol
    }

    /// Build and send a response on the event's transaction id.
    pub async fn reply(&self, event: Event, status: u16) -> bool {
        let (reply_to, rx) = oneshot::channel();
        if self.cmd_tx.send(ContextCommand::Reply { event, status, reply_to }).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Generate a fresh nonce, store it on the registry entry (the caller
    /// does that before calling this), and return 401 with a digest
    /// challenge.
    pub async fn challenge(&self, event: Event, realm: String, nonce: String, algorithm: DigestAlgorithm) -> bool {
        let (reply_to, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(ContextCommand::Challenge { event, realm, nonce, algorithm, reply_to })
            .await
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Build 200 OK, attach the registry's contact and expiration, and an
    /// optional roster-bootstrap body.
    pub async fn authorize(&self, event: Event, contact: SocketAddr, expires: i64, roster_body: Option<Vec<u8>>) -> bool {
        let (reply_to, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(ContextCommand::Authorize { event, contact, expires, roster_body, reply_to })
            .await
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Build and send an out-of-dialog MESSAGE request.
    pub async fn message(
        &self,
        from: SipUri,
        to: SipUri,
        route: Option<SocketAddr>,
        mut headers: Vec<(String, String)>,
        content_type: String,
        body: Vec<u8>,
    ) -> bool {
        let sequence = self.message_sequence.fetch_add(1, Ordering::Relaxed);
        headers.push(("X-TS".to_string(), Utc::now().to_rfc3339()));
        headers.push(("X-MS".to_string(), sequence.to_string()));

        let (reply_to, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(ContextCommand::SendOutOfDialogMessage {
                from,
                to,
                route,
                headers,
                content_type,
                body,
                reply_to,
            })
            .await
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// The scheme-prefixed URI string this Context would use to reach a
    /// host/port, bracketing IPv6 literals.
    pub fn uri_to(&self, host: &str, port: u16) -> String {
        let scheme = match self.protocol {
            TransportProtocol::Tls | TransportProtocol::Wss => "sips",
            _ => "sip",
        };
        if host.contains(':') && !host.starts_with('[') {
            format!("{}:[{}]:{}", scheme, host, port)
        } else {
            format!("{}:{}:{}", scheme, host, port)
        }
    }

    pub async fn update_aliases(&self, aliases: Vec<String>) {
        let _ = self.cmd_tx.send(ContextCommand::UpdateAliases(aliases)).await;
    }
}

/// One per (bind-address, transport, port). Owns the transport and runs
/// its event loop as a single tokio task.
pub struct Context {
    name: Arc<str>,
    transport: Box<dyn Transport>,
    protocol: TransportProtocol,
    permission: Allow,
    local_hosts: Vec<String>,
    aliases: Arc<RwLock<Vec<String>>>,
    manager_tx: mpsc::Sender<ContextSignal>,
    cmd_rx: mpsc::Receiver<ContextCommand>,
    cmd_tx: mpsc::Sender<ContextCommand>,
    message_sequence: Arc<AtomicU64>,
}

impl Context {
    pub fn new(
        name: impl Into<Arc<str>>,
        transport: Box<dyn Transport>,
        protocol: TransportProtocol,
        permission: Allow,
        local_hosts: Vec<String>,
        manager_tx: mpsc::Sender<ContextSignal>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        Self {
            name: name.into(),
            transport,
            protocol,
            permission,
            local_hosts,
            aliases: Arc::new(RwLock::new(Vec::new())),
            manager_tx,
            cmd_rx,
            cmd_tx,
            message_sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn handle(&self) -> ContextHandle {
        ContextHandle {
            name: self.name.clone(),
            protocol: self.protocol,
            cmd_tx: self.cmd_tx.clone(),
            message_sequence: self.message_sequence.clone(),
        }
    }

    fn is_local(&self, host: &str) -> bool {
        self.local_hosts.iter().any(|h| h.eq_ignore_ascii_case(host))
    }

    /// Starts the bound transport and runs the combined receive/command
    /// loop until the transport closes or the supervisor drops the handle.
    /// Mirrors the original's "one thread per Context" with a per-second
    /// automatic-action pump (§4.2); here the pump is a no-op tick since
    /// retransmission lives in `transaction.rs`, kept for the same cadence.
    ///
    /// `started`, when given, fires once the bind succeeds so a
    /// supervisor can implement "each thread completes its started
    /// handler before the next startup group begins" (§4.8).
    pub async fn run(mut self, started: Option<oneshot::Sender<()>>) {
        if let Err(e) = self.transport.start().await {
            warn!(context = %self.name, error = %e, "context failed to bind, terminating");
            return;
        }
        info!(context = %self.name, "context started");
        if let Some(started) = started {
            let _ = started.send(());
        }

        let mut last_pump = Instant::now();
        let mut pump_tick = tokio::time::interval(Duration::from_millis(500));

        loop {
            tokio::select! {
                maybe_incoming = self.transport.receiver().recv() => {
                    let Some(incoming) = maybe_incoming else { break };
                    self.handle_incoming(incoming.message, incoming.source).await;
                    if last_pump.elapsed() >= Duration::from_secs(1) {
                        last_pump = Instant::now();
                    }
                }
                Some(cmd) = self.cmd_rx.recv() => {
                    self.handle_command(cmd).await;
                }
                _ = pump_tick.tick() => {
                    if last_pump.elapsed() >= Duration::from_secs(1) {
                        last_pump = Instant::now();
                    }
                }
            }
        }

        info!(context = %self.name, "context stopped");
    }

    async fn handle_incoming(&self, message: SipMessage, source: SocketAddr) {
        let SipMessage::Request(request) = message else {
            // Responses to our own out-of-dialog requests are not acted on
            // further in this core; the SIP stack primitive already
            // retransmits/tracks them.
            return;
        };
        let Some(method) = request.method() else { return };

        let event = Event::from_request(
            method,
            request.uri(),
            request.headers(),
            request.body(),
            source,
            &self.local_hosts,
        );

        match method {
            SipMethod::Options if event.is_local && event.request_uri.as_ref().map(|u| u.user().is_empty()).unwrap_or(false) => {
                debug!(context = %self.name, "answering bare OPTIONS locally");
                self.send_reply(&event, 200).await;
            }
            SipMethod::Register => {
                if self.permission.contains(Allow::REGISTRY) {
                    let _ = self.manager_tx.send(ContextSignal::Register(event, self.handle())).await;
                }
            }
            SipMethod::Message => {
                if event.number >= 0 {
                    let _ = self.manager_tx.send(ContextSignal::SendMessage(event, self.handle())).await;
                } else if self.to_is_local(&event) {
                    let _ = self.manager_tx.send(ContextSignal::LocalMessage(event, self.handle())).await;
                }
            }
            _ => {
                // INVITE/ACK/BYE/etc parsed into Events but not acted on:
                // the call-leg machinery is out of scope.
            }
        }
    }

    fn to_is_local(&self, event: &Event) -> bool {
        event.to.as_ref().map(|u| self.is_local(u.host())).unwrap_or(false)
    }

    async fn handle_command(&mut self, cmd: ContextCommand) {
        match cmd {
            ContextCommand::Reply { event, status, reply_to } => {
                let ok = self.send_reply(&event, status).await;
                let _ = reply_to.send(ok);
            }
            ContextCommand::Challenge { event, realm, nonce, algorithm, reply_to } => {
                let ok = self.send_challenge(&event, &realm, &nonce, algorithm).await;
                let _ = reply_to.send(ok);
            }
            ContextCommand::Authorize { event, contact, expires, roster_body, reply_to } => {
                let ok = self.send_authorize(&event, contact, expires, roster_body).await;
                let _ = reply_to.send(ok);
            }
            ContextCommand::SendOutOfDialogMessage { from, to, route, headers, content_type, body, reply_to } => {
                let ok = self.send_message(from, to, route, headers, content_type, body).await;
                let _ = reply_to.send(ok);
            }
            ContextCommand::UpdateAliases(aliases) => {
                *self.aliases.write().await = aliases;
            }
        }
    }

    async fn send_reply(&self, event: &Event, status: u16) -> bool {
        let Some(request) = Self::dummy_request(event) else { return false };
        let builder = ResponseBuilder::new(status);
        let Ok(response) = builder.build_for_request(&request) else { return false };
        self.transport
            .send(OutgoingMessage { data: response.to_bytes(), destination: event.source, protocol: self.protocol })
            .await
            .is_ok()
    }

    async fn send_challenge(&self, event: &Event, realm: &str, nonce: &str, algorithm: DigestAlgorithm) -> bool {
        let Some(request) = Self::dummy_request(event) else { return false };
        let header = format!(
            "WWW-Authenticate: Digest realm=\"{}\", nonce=\"{}\", algorithm={}",
            realm,
            nonce,
            algorithm.as_str()
        );
        let builder = ResponseBuilder::unauthorized().header(parse_header(&header));
        let Ok(response) = builder.build_for_request(&request) else { return false };
        self.transport
            .send(OutgoingMessage { data: response.to_bytes(), destination: event.source, protocol: self.protocol })
            .await
            .is_ok()
    }

    async fn send_authorize(&self, event: &Event, contact: SocketAddr, expires: i64, roster_body: Option<Vec<u8>>) -> bool {
        let Some(request) = Self::dummy_request(event) else { return false };
        let mut builder = ResponseBuilder::ok()
            .header(parse_header(&format!("Contact: <sip:{}:{}>", contact.ip(), contact.port())))
            .header(parse_header(&format!("Expires: {}", expires)));
        if let Some(body) = roster_body {
            builder = builder.header(parse_header("Content-Type: application/json")).body(body);
        }
        let Ok(response) = builder.build_for_request(&request) else { return false };
        self.transport
            .send(OutgoingMessage { data: response.to_bytes(), destination: event.source, protocol: self.protocol })
            .await
            .is_ok()
    }

    async fn send_message(
        &self,
        from: SipUri,
        to: SipUri,
        route: Option<SocketAddr>,
        headers: Vec<(String, String)>,
        content_type: String,
        body: Vec<u8>,
    ) -> bool {
        let Some(destination) = route else {
            warn!("no route known for out-of-dialog MESSAGE to {}", to);
            return false;
        };
        let mut lines = vec![
            format!("MESSAGE {} SIP/2.0", to),
            format!("From: <{}>", from),
            format!("To: <{}>", to),
            format!("Content-Type: {}", content_type),
            format!("Content-Length: {}", body.len()),
        ];
        for (name, value) in &headers {
            lines.push(format!("{}: {}", name, value));
        }
        let mut data = lines.join("\r\n").into_bytes();
        data.extend_from_slice(b"\r\n\r\n");
        data.extend_from_slice(&body);

        self.transport
            .send(OutgoingMessage { data: data.into(), destination, protocol: self.protocol })
            .await
            .is_ok()
    }

    /// `ResponseBuilder::build_for_request` only needs the request's
    /// Via/From/To/Call-ID/CSeq headers; Event already carries their
    /// parsed values, so we rebuild a minimal request wrapper instead of
    /// keeping the full `rsip::Request` alive inside Event.
    fn dummy_request(event: &Event) -> Option<super::message::SipRequest> {
        let mut lines = vec![format!(
            "{} {} SIP/2.0",
            event.method.as_str(),
            event.request_uri.as_ref().map(|u| u.to_string()).unwrap_or_default()
        )];
        if let Some(from) = &event.from {
            lines.push(format!("From: <{}>", from));
        }
        if let Some(to) = &event.to {
            lines.push(format!("To: <{}>", to));
        }
        lines.push(format!("Call-ID: {}", event.call_id));
        lines.push("CSeq: 1 ".to_string() + event.method.as_str());
        lines.push("Content-Length: 0".to_string());
        let raw = lines.join("\r\n") + "\r\n\r\n";
        super::message::SipRequest::parse(raw.as_bytes()).ok()
    }
}

fn parse_header(raw: &str) -> Header {
    Header::Other(
        raw.split_once(':').map(|(n, _)| n.trim().to_string()).unwrap_or_default(),
        raw.split_once(':').map(|(_, v)| v.trim().to_string()).unwrap_or_default(),
    )
}
