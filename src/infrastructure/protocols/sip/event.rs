//! Event - an immutable, cheaply-cloneable snapshot of one SIP event.
//!
//! Grounded on `original_source/Server/event.hpp`'s `Event`/`Event::Data`
//! (the parsing happens once, in the constructor; every accessor is a
//! plain field read afterwards) and on this crate's own `rport.rs` for
//! the RFC 3581 NAT-pair substitution. Unlike the original, this Event
//! owns no handle back into the SIP stack: `transaction.rs` already gives
//! us a move-only `TransactionId`, so the Event just carries it by value.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use rsip::Headers;

use super::message::SipMethod;
use super::rport::get_public_address_from_via;
use super::transaction::TransactionId;
use crate::domain::shared::value_objects::SipUri;

static SEQUENCE: AtomicU32 = AtomicU32::new(0);

/// Reserved `X-Label` value meaning "unnamed legacy device".
pub const NONE_LABEL: &str = "none";

/// The six parsed authorization fields, taken from the first
/// `Authorization`/`Proxy-Authorization` header. Each scalar is unquoted
/// and the algorithm is uppercased.
#[derive(Debug, Clone, Default)]
pub struct AuthFields {
    pub userid: String,
    pub digest: String,
    pub nonce: String,
    pub realm: String,
    pub algorithm: String,
    pub raw: Option<String>,
}

impl AuthFields {
    pub fn is_present(&self) -> bool {
        self.raw.is_some()
    }
}

/// Immutable, cheaply-cloneable snapshot of one SIP event.
#[derive(Debug, Clone)]
pub struct Event {
    pub method: SipMethod,
    pub status: u16,
    pub reason: String,
    pub call_id: String,
    pub transaction_id: Option<TransactionId>,
    pub request_uri: Option<SipUri>,
    pub from: Option<SipUri>,
    pub to: Option<SipUri>,
    pub contacts: Vec<SipUri>,
    pub routes: Vec<SipUri>,
    pub hops: u32,
    pub source: SocketAddr,
    pub natted: bool,
    pub is_local: bool,
    pub number: i64,
    pub user_agent: String,
    pub subject: String,
    pub body: Vec<u8>,
    pub content_type: String,
    pub expires: i64,
    pub label: String,
    pub initialize: Option<String>,
    pub allow: Vec<String>,
    pub auth: AuthFields,
    pub posted: DateTime<Utc>,
    pub sequence: u32,
    started: Instant,
}

impl Event {
    /// Parses a request into an Event. Parsing never fails; missing
    /// fields become their zero/empty sentinel (§4.1).
    pub fn from_request(
        method: SipMethod,
        request_uri_raw: &rsip::Uri,
        headers: &Headers,
        body: &[u8],
        source: SocketAddr,
        local_hosts: &[String],
    ) -> Self {
        let header_get = |name: &str| header_value(headers, name);
        let header_get_all = |name: &str| header_values(headers, name);

        let vias = header_get_all("Via");
        let hops = vias.len() as u32;
        let mut effective_source = source;
        let mut natted = false;
        if let Some(last_via) = vias.last() {
            if let Some(public) = get_public_address_from_via(last_via) {
                effective_source = public;
                natted = true;
            }
        }

        let contacts = header_get_all("Contact")
            .iter()
            .filter_map(|raw| parse_uri_from_header(raw))
            .collect::<Vec<_>>();
        let routes = header_get_all("Route")
            .iter()
            .filter_map(|raw| parse_uri_from_header(raw))
            .collect::<Vec<_>>();

        let from = header_get("From").as_deref().and_then(parse_uri_from_header);
        let to = header_get("To").as_deref().and_then(parse_uri_from_header);
        let request_uri = SipUri::parse(&request_uri_raw.to_string()).ok();

        let expires = header_get("Session-Expires")
            .or_else(|| header_get("Expires"))
            .and_then(|v| v.split(';').next().unwrap_or("").trim().parse::<i64>().ok())
            .unwrap_or(0)
            .max(0);

        let label = header_get("X-Label")
            .map(|v| unquote(&v).to_ascii_lowercase())
            .unwrap_or_else(|| NONE_LABEL.to_string());

        let initialize = header_get("X-Initialize").map(|v| unquote(&v).to_ascii_lowercase());

        let auth_raw = header_get("Authorization").or_else(|| header_get("Proxy-Authorization"));
        let auth = auth_raw
            .as_deref()
            .map(parse_auth_header)
            .unwrap_or_default();

        let allow = header_get("Allow")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();

        let is_local = request_uri
            .as_ref()
            .map(|u| local_hosts.iter().any(|h| h.eq_ignore_ascii_case(u.host())))
            .unwrap_or(false);

        // number is populated only when the from-URI (or, for REGISTER, the
        // to-URI) belongs to the local-host set and its user part is all digits.
        let number_uri = if matches!(method, SipMethod::Register) { &to } else { &from };
        let number = number_uri
            .as_ref()
            .filter(|u| local_hosts.iter().any(|h| h.eq_ignore_ascii_case(u.host())))
            .and_then(|u| u.as_extension_number())
            .unwrap_or(-1);

        let call_id = header_get("Call-ID").unwrap_or_default();

        Self {
            method,
            status: 0,
            reason: String::new(),
            call_id,
            transaction_id: vias.first().and_then(|v| extract_branch_uri(v)),
            request_uri,
            from,
            to,
            contacts,
            routes,
            hops,
            source: effective_source,
            natted,
            is_local,
            number,
            user_agent: header_get("User-Agent").unwrap_or_default(),
            subject: header_get("Subject").unwrap_or_default(),
            body: body.to_vec(),
            content_type: header_get("Content-Type").unwrap_or_default(),
            expires,
            label,
            initialize,
            allow,
            auth,
            posted: Utc::now(),
            sequence: SEQUENCE.fetch_add(1, Ordering::Relaxed) % 10_000,
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.started.elapsed()
    }
}

/// Pulls the `branch=` parameter out of a single raw Via header value and
/// wraps it as a `TransactionId`, mirroring `transaction::extract_branch`
/// without reaching into that module's private helper.
fn extract_branch_uri(via: &str) -> Option<TransactionId> {
    via.split(';')
        .map(|p| p.trim())
        .find_map(|p| p.strip_prefix("branch="))
        .map(TransactionId::from_branch)
}

/// Finds the value of the first header whose name matches `name`
/// case-insensitively. Headers are matched by their wire representation
/// (`Name: value`) rather than by rsip's enum discriminant, since not
/// every extension header (`X-Label`, `X-Initialize`, ...) has a
/// dedicated variant.
fn header_value(headers: &Headers, name: &str) -> Option<String> {
    header_values(headers, name).into_iter().next()
}

fn header_values(headers: &Headers, name: &str) -> Vec<String> {
    headers
        .iter()
        .filter_map(|h| {
            let raw = h.to_string();
            let (key, value) = raw.split_once(':')?;
            if key.trim().eq_ignore_ascii_case(name) {
                Some(value.trim().to_string())
            } else {
                None
            }
        })
        .collect()
}

fn unquote(value: &str) -> String {
    value.trim_matches('"').to_string()
}

/// Parses a SIP/SIPS URI out of a header value that may carry a display
/// name, angle brackets, and parameters (`"Alice" <sip:alice@host>;tag=1`).
fn parse_uri_from_header(raw: &str) -> Option<SipUri> {
    let uri_part = if let Some(start) = raw.find('<') {
        let end = raw[start..].find('>').map(|e| start + e).unwrap_or(raw.len());
        &raw[start + 1..end]
    } else {
        raw.split(';').next().unwrap_or(raw).trim()
    };
    SipUri::parse(uri_part.trim()).ok()
}

/// Parses `key="value"` / `key=value` comma-separated Authorization
/// header content into its six scalar fields.
fn parse_auth_header(raw: &str) -> AuthFields {
    let content = raw
        .splitn(2, ' ')
        .nth(1)
        .unwrap_or(raw)
        .trim();

    let mut fields = AuthFields {
        raw: Some(raw.to_string()),
        ..Default::default()
    };

    for part in split_auth_params(content) {
        let Some((key, value)) = part.split_once('=') else { continue };
        let key = key.trim();
        let value = unquote(value.trim());
        match key.to_ascii_lowercase().as_str() {
            "username" => fields.userid = value,
            "response" => fields.digest = value,
            "nonce" => fields.nonce = value,
            "realm" => fields.realm = value,
            "algorithm" => fields.algorithm = value.to_ascii_uppercase(),
            _ => {}
        }
    }

    fields
}

/// Splits digest auth-params on top-level commas, respecting quoted
/// strings (a quoted nonce/realm may itself contain commas).
fn split_auth_params(content: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in content.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ',' if !in_quotes => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_from(raw: &str) -> Headers {
        let request = format!(
            "REGISTER sip:sip.example SIP/2.0\r\n{}\r\nContent-Length: 0\r\n\r\n",
            raw
        );
        rsip::Request::try_from(request.as_bytes()).unwrap().headers
    }

    #[test]
    fn parses_label_and_rport() {
        let headers = headers_from(
            "Via: SIP/2.0/UDP 192.168.1.5:5060;branch=z9hG4bK1;rport=4444;received=203.0.113.9\r\n\
             From: <sip:101@sip.example>;tag=abc\r\n\
             To: <sip:101@sip.example>\r\n\
             Call-ID: abc123\r\n\
             CSeq: 1 REGISTER\r\n\
             X-Label: Phone1\r\n\
             Expires: 3600",
        );
        let event = Event::from_request(
            SipMethod::Register,
            &rsip::Uri::try_from("sip:sip.example").unwrap(),
            &headers,
            b"",
            "198.51.100.1:5060".parse().unwrap(),
            &["sip.example".to_string()],
        );
        assert_eq!(event.label, "phone1");
        assert!(event.natted);
        assert_eq!(event.source.to_string(), "203.0.113.9:4444");
        assert_eq!(event.expires, 3600);
        assert_eq!(event.number, 101);
    }

    #[test]
    fn missing_auth_header_is_absent() {
        let headers = headers_from(
            "Via: SIP/2.0/UDP 192.168.1.5:5060;branch=z9hG4bK1\r\n\
             From: <sip:101@sip.example>;tag=abc\r\n\
             To: <sip:101@sip.example>\r\n\
             Call-ID: abc123\r\n\
             CSeq: 1 REGISTER",
        );
        let event = Event::from_request(
            SipMethod::Register,
            &rsip::Uri::try_from("sip:sip.example").unwrap(),
            &headers,
            b"",
            "198.51.100.1:5060".parse().unwrap(),
            &["sip.example".to_string()],
        );
        assert!(!event.auth.is_present());
        assert_eq!(event.label, NONE_LABEL);
    }

    #[test]
    fn parses_authorization_header() {
        let headers = headers_from(
            "Via: SIP/2.0/UDP 192.168.1.5:5060;branch=z9hG4bK1\r\n\
             From: <sip:101@sip.example>;tag=abc\r\n\
             To: <sip:101@sip.example>\r\n\
             Call-ID: abc123\r\n\
             CSeq: 1 REGISTER\r\n\
             Authorization: Digest username=\"101\", realm=\"sip.example\", nonce=\"abcd1234\", \
               uri=\"sip:sip.example\", response=\"deadbeef\", algorithm=MD5",
        );
        let event = Event::from_request(
            SipMethod::Register,
            &rsip::Uri::try_from("sip:sip.example").unwrap(),
            &headers,
            b"",
            "198.51.100.1:5060".parse().unwrap(),
            &["sip.example".to_string()],
        );
        assert!(event.auth.is_present());
        assert_eq!(event.auth.userid, "101");
        assert_eq!(event.auth.realm, "sip.example");
        assert_eq!(event.auth.nonce, "abcd1234");
        assert_eq!(event.auth.digest, "deadbeef");
        assert_eq!(event.auth.algorithm, "MD5");
    }
}
