//! HTTP/SIP digest authentication (RFC 2617), generalised from the
//! teacher's MD5-only `auth.rs`/`auth_db.rs` to the closed algorithm set
//! `{MD5, SHA1, SHA256, SHA512}` selected by the Registry entry's stored
//! `algorithm` field. HA1 is always pre-hashed at provisioning time; this
//! module never touches a plaintext secret.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha512};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DigestAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl DigestAlgorithm {
    /// Parses the header/config value, accepting the aliases listed in §6:
    /// `SHA`, `SHA-1`, `SHA-2`, `SHA-256`, `SHA-512`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "MD5" => Some(DigestAlgorithm::Md5),
            "SHA" | "SHA1" | "SHA-1" => Some(DigestAlgorithm::Sha1),
            "SHA2" | "SHA-2" | "SHA256" | "SHA-256" => Some(DigestAlgorithm::Sha256),
            "SHA512" | "SHA-512" => Some(DigestAlgorithm::Sha512),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "MD5",
            DigestAlgorithm::Sha1 => "SHA1",
            DigestAlgorithm::Sha256 => "SHA256",
            DigestAlgorithm::Sha512 => "SHA512",
        }
    }

    fn hex_digest(&self, input: &[u8]) -> String {
        match self {
            DigestAlgorithm::Md5 => format!("{:x}", md5::compute(input)),
            DigestAlgorithm::Sha1 => {
                use sha1::{Digest, Sha1};
                let mut hasher = Sha1::new();
                hasher.update(input);
                hex::encode(hasher.finalize())
            }
            DigestAlgorithm::Sha256 => {
                use sha2::Digest;
                let mut hasher = Sha256::new();
                hasher.update(input);
                hex::encode(hasher.finalize())
            }
            DigestAlgorithm::Sha512 => {
                use sha2::Digest;
                let mut hasher = Sha512::new();
                hasher.update(input);
                hex::encode(hasher.finalize())
            }
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// HA2 = digest(method ":" request-URI), hex, lowercase.
pub fn compute_ha2(algorithm: DigestAlgorithm, method: &str, uri: &str) -> String {
    algorithm.hex_digest(format!("{}:{}", method, uri).as_bytes())
}

/// expected = digest(HA1 ":" nonce ":" HA2), hex, lowercase.
pub fn compute_response(algorithm: DigestAlgorithm, ha1: &str, nonce: &str, ha2: &str) -> String {
    algorithm.hex_digest(format!("{}:{}:{}", ha1, nonce, ha2).as_bytes())
}

/// A fresh 32-bit nonce, hex-encoded, rotated on every challenge and never
/// shared between Registry entries.
pub fn generate_nonce() -> String {
    let value = rand::thread_rng().next_u32();
    format!("{:08x}", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aliases() {
        assert_eq!(DigestAlgorithm::parse("md5"), Some(DigestAlgorithm::Md5));
        assert_eq!(DigestAlgorithm::parse("SHA"), Some(DigestAlgorithm::Sha1));
        assert_eq!(DigestAlgorithm::parse("SHA-1"), Some(DigestAlgorithm::Sha1));
        assert_eq!(DigestAlgorithm::parse("SHA-256"), Some(DigestAlgorithm::Sha256));
        assert_eq!(DigestAlgorithm::parse("SHA-512"), Some(DigestAlgorithm::Sha512));
        assert_eq!(DigestAlgorithm::parse("bogus"), None);
    }

    #[test]
    fn md5_digest_matches_rfc2617_example() {
        // RFC 2617 §3.5 worked example.
        let ha1 = "939e7578ed9e3c518a452acee763bce9";
        let ha2 = compute_ha2(DigestAlgorithm::Md5, "GET", "/dir/index.html");
        assert_eq!(ha2, "39aff3a2bab6126f332b942af96d3366");
        let response = compute_response(DigestAlgorithm::Md5, ha1, "dcd98b7102dd2f0e8b11d0f600bfb0c093", &ha2);
        assert_eq!(response.len(), 32);
    }

    #[test]
    fn nonce_is_eight_hex_chars() {
        let nonce = generate_nonce();
        assert_eq!(nonce.len(), 8);
        assert!(nonce.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
