//! Shared value objects used across multiple bounded contexts

use serde::{Deserialize, Serialize};
use std::fmt;

/// SIP URI value object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SipUri {
    user: String,
    host: String,
    port: Option<u16>,
}

impl SipUri {
    pub fn new(user: String, host: String, port: Option<u16>) -> Self {
        Self { user, host, port }
    }

    pub fn parse(uri: &str) -> Result<Self, String> {
        let uri = uri.strip_prefix("sips:").or_else(|| uri.strip_prefix("sip:"));
        let uri = uri.ok_or_else(|| "URI must start with 'sip:' or 'sips:'".to_string())?;

        // A domain-only Request-URI (`sip:sip.example`) has no user part;
        // that is the normal case for a REGISTER/OPTIONS target, not an error.
        let (userinfo, hostport) = match uri.split_once('@') {
            Some((userinfo, hostport)) => (userinfo, hostport),
            None => ("", uri),
        };

        let hostport = hostport.split(|c| c == ';' || c == '?').next().unwrap_or(hostport);

        let user = userinfo.to_string();
        let host_port: Vec<&str> = hostport.rsplitn(2, ':').collect();
        let (host, port) = if host_port.len() == 2 && host_port[0].chars().all(|c| c.is_ascii_digit()) {
            (host_port[1].to_string(), host_port[0].parse().ok())
        } else {
            (hostport.to_string(), None)
        };

        Ok(Self { user, host, port })
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// The user part with all-digit characters only, or None.
    pub fn as_extension_number(&self) -> Option<i64> {
        if !self.user.is_empty() && self.user.chars().all(|c| c.is_ascii_digit()) {
            self.user.parse().ok()
        } else {
            None
        }
    }
}

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.user.is_empty(), self.port) {
            (true, Some(port)) => write!(f, "sip:{}:{}", self.host, port),
            (true, None) => write!(f, "sip:{}", self.host),
            (false, Some(port)) => write!(f, "sip:{}@{}:{}", self.user, self.host, port),
            (false, None) => write!(f, "sip:{}@{}", self.user, self.host),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sip_uri_parse() {
        let uri = SipUri::parse("sip:alice@example.com").unwrap();
        assert_eq!(uri.user(), "alice");
        assert_eq!(uri.host(), "example.com");
        assert_eq!(uri.port(), None);

        let uri_with_port = SipUri::parse("sip:bob@example.com:5060").unwrap();
        assert_eq!(uri_with_port.user(), "bob");
        assert_eq!(uri_with_port.host(), "example.com");
        assert_eq!(uri_with_port.port(), Some(5060));
    }

    #[test]
    fn test_sip_uri_display() {
        let uri = SipUri::new("alice".to_string(), "example.com".to_string(), None);
        assert_eq!(uri.to_string(), "sip:alice@example.com");

        let uri_with_port = SipUri::new("bob".to_string(), "example.com".to_string(), Some(5060));
        assert_eq!(uri_with_port.to_string(), "sip:bob@example.com:5060");
    }

    #[test]
    fn test_sip_uri_parse_without_userinfo() {
        let uri = SipUri::parse("sip:sip.example").unwrap();
        assert_eq!(uri.user(), "");
        assert_eq!(uri.host(), "sip.example");
        assert_eq!(uri.to_string(), "sip:sip.example");
    }

    #[test]
    fn test_extension_number() {
        let uri = SipUri::parse("sip:101@sip.example").unwrap();
        assert_eq!(uri.as_extension_number(), Some(101));

        let uri = SipUri::parse("sip:alice@sip.example").unwrap();
        assert_eq!(uri.as_extension_number(), None);
    }
}
