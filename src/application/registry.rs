//! Registry - in-memory registration/authentication state, keyed by
//! (extension, label).
//!
//! Grounded on `original_source/Server/registry.hpp`'s `Registry` class:
//! the three indexes (by key, by extension number, by auth-user-id), the
//! online presence bitmap with per-extension reference counting, and the
//! digest verification steps (`Registry::authorize`) are carried over as
//! the same state machine. The original's `QMutex`-protected table
//! becomes a plain struct owned exclusively by Manager's single task
//! (§9 "single Core/Manager value"), so no internal locking is needed
//! here — every method takes `&mut self`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use base64::Engine;
use chrono::{DateTime, Utc};

use crate::domain::extension::ExtensionRange;
use crate::infrastructure::protocols::sip::context::ContextHandle;
use crate::infrastructure::protocols::sip::digest::{self, DigestAlgorithm};
use crate::infrastructure::protocols::sip::event::Event;

/// Key identifying one Registry entry: extension number + lowercased label.
pub type RegistryKey = (i64, String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthResult {
    /// No Authorization header was present; caller must challenge.
    NeedsChallenge,
    /// Digest verification failed.
    Denied,
    /// Verified; the entry's contact and deadline were refreshed.
    Refreshed,
    /// `Expires: 0`; caller must destroy the entry.
    Deregistered,
}

/// One active (extension, label) registration.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub extnbr: i64,
    pub label: String,
    pub endpoint_id: i64,
    pub display: String,
    pub authname: String,
    pub secret: String,
    pub realm: String,
    pub algorithm: DigestAlgorithm,
    pub contact: Option<SocketAddr>,
    pub context: Option<ContextHandle>,
    pub nonce: String,
    /// `None` until the first successful authentication.
    pub deadline: Option<Instant>,
    pub last_refresh: DateTime<Utc>,
}

impl RegistryEntry {
    pub fn is_active(&self) -> bool {
        self.context.is_some()
    }
}

/// In-memory registration table with presence tracking.
pub struct Registry {
    range: ExtensionRange,
    entries: HashMap<RegistryKey, RegistryEntry>,
    by_number: HashMap<i64, Vec<String>>,
    by_authname: HashMap<String, Vec<RegistryKey>>,
    by_endpoint: HashMap<i64, RegistryKey>,
    refcount: HashMap<i64, u32>,
    presence: Vec<u8>,
}

impl Registry {
    pub fn new(range: ExtensionRange) -> Self {
        let bytes = (range.len() + 7) / 8;
        Self {
            range,
            entries: HashMap::new(),
            by_number: HashMap::new(),
            by_authname: HashMap::new(),
            by_endpoint: HashMap::new(),
            refcount: HashMap::new(),
            presence: vec![0u8; bytes.max(1)],
        }
    }

    pub fn find(&self, extnbr: i64, label: &str) -> Option<&RegistryEntry> {
        self.entries.get(&(extnbr, label.to_string()))
    }

    pub fn find_by_endpoint(&self, endpoint_id: i64) -> Option<&RegistryEntry> {
        let key = self.by_endpoint.get(&endpoint_id)?;
        self.entries.get(key)
    }

    pub fn labels_for(&self, extnbr: i64) -> &[String] {
        self.by_number.get(&extnbr).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// All active (authenticated) entries registered for an extension
    /// number, for message fan-out to every device of that extension.
    pub fn active_entries_for(&self, extnbr: i64) -> Vec<&RegistryEntry> {
        self.by_number
            .get(&extnbr)
            .into_iter()
            .flatten()
            .filter_map(|label| self.entries.get(&(extnbr, label.clone())))
            .filter(|e| e.is_active())
            .collect()
    }

    /// Inserts a freshly-constructed entry (from the Authorize worker's
    /// hash) into all three indexes and sets its presence bit. A
    /// duplicate (extnbr, label) key replaces the prior entry rather than
    /// appending to the secondary indexes a second time.
    pub fn insert(&mut self, entry: RegistryEntry) {
        let key = (entry.extnbr, entry.label.clone());
        if self.entries.contains_key(&key) {
            self.remove(key.0, &key.1);
        }
        self.bump_presence(entry.extnbr);
        self.by_number.entry(entry.extnbr).or_default().push(entry.label.clone());
        self.by_authname.entry(entry.authname.clone()).or_default().push(key.clone());
        self.by_endpoint.insert(entry.endpoint_id, key.clone());
        self.entries.insert(key, entry);
    }

    /// Removes an entry, clearing indexes and decrementing presence.
    pub fn remove(&mut self, extnbr: i64, label: &str) -> Option<RegistryEntry> {
        let key = (extnbr, label.to_string());
        let entry = self.entries.remove(&key)?;
        if let Some(labels) = self.by_number.get_mut(&extnbr) {
            labels.retain(|l| l != label);
            if labels.is_empty() {
                self.by_number.remove(&extnbr);
            }
        }
        if let Some(keys) = self.by_authname.get_mut(&entry.authname) {
            keys.retain(|k| k != &key);
            if keys.is_empty() {
                self.by_authname.remove(&entry.authname);
            }
        }
        self.by_endpoint.remove(&entry.endpoint_id);
        self.drop_presence(extnbr);
        Some(entry)
    }

    fn bump_presence(&mut self, extnbr: i64) {
        let count = self.refcount.entry(extnbr).or_insert(0);
        *count += 1;
        if *count == 1 {
            self.set_bit(extnbr, true);
        }
    }

    fn drop_presence(&mut self, extnbr: i64) {
        if let Some(count) = self.refcount.get_mut(&extnbr) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.refcount.remove(&extnbr);
                self.set_bit(extnbr, false);
            }
        }
    }

    fn set_bit(&mut self, extnbr: i64, on: bool) {
        if !self.range.contains(extnbr) {
            return;
        }
        let idx = (extnbr - self.range.first) as usize;
        let (byte, bit) = (idx / 8, idx % 8);
        if on {
            self.presence[byte] |= 1 << bit;
        } else {
            self.presence[byte] &= !(1 << bit);
        }
    }

    pub fn presence_bit(&self, extnbr: i64) -> bool {
        if !self.range.contains(extnbr) {
            return false;
        }
        let idx = (extnbr - self.range.first) as usize;
        (self.presence[idx / 8] >> (idx % 8)) & 1 == 1
    }

    /// Base64 snapshot of the online bitmap for roster broadcasts.
    pub fn presence_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.presence)
    }

    /// Rotates the nonce on an existing entry and returns the challenge
    /// parameters (realm, nonce, algorithm).
    pub fn issue_challenge(&mut self, extnbr: i64, label: &str) -> Option<(String, String, DigestAlgorithm)> {
        let entry = self.entries.get_mut(&(extnbr, label.to_string()))?;
        entry.nonce = digest::generate_nonce();
        Some((entry.realm.clone(), entry.nonce.clone(), entry.algorithm))
    }

    /// Transitions an entry from inactive to active: stamps the owning
    /// Context and starts the expiry deadline (§4.3, first authenticated
    /// REGISTER).
    pub fn activate(&mut self, extnbr: i64, label: &str, context: ContextHandle, contact: SocketAddr, expires: Duration) {
        if let Some(entry) = self.entries.get_mut(&(extnbr, label.to_string())) {
            entry.context = Some(context);
            entry.contact = Some(contact);
            entry.deadline = Some(Instant::now() + expires);
            entry.last_refresh = Utc::now();
        }
    }

    /// Verifies an incoming Event's Authorization header against the
    /// entry's stored credentials (§4.3 steps 1-6).
    pub fn authenticate(&mut self, extnbr: i64, label: &str, event: &Event) -> AuthResult {
        let Some(entry) = self.entries.get(&(extnbr, label.to_string())) else {
            return AuthResult::NeedsChallenge;
        };
        if !event.auth.is_present() {
            return AuthResult::NeedsChallenge;
        }
        if event.auth.realm != entry.realm
            || event.auth.userid != entry.authname
            || !entry.algorithm.as_str().eq_ignore_ascii_case(&event.auth.algorithm)
            || event.auth.nonce != entry.nonce
        {
            return AuthResult::Denied;
        }
        let request_uri = event.request_uri.as_ref().map(|u| u.to_string()).unwrap_or_default();
        let ha2 = digest::compute_ha2(entry.algorithm, event.method.as_str(), &request_uri);
        let expected = digest::compute_response(entry.algorithm, &entry.secret, &entry.nonce, &ha2);
        if !expected.eq_ignore_ascii_case(&event.auth.digest) {
            return AuthResult::Denied;
        }
        if event.expires <= 0 {
            return AuthResult::Deregistered;
        }

        let entry = self.entries.get_mut(&(extnbr, label.to_string())).unwrap();
        entry.contact = Some(event.source);
        entry.last_refresh = Utc::now();
        AuthResult::Refreshed
    }

    pub fn refresh_deadline(&mut self, extnbr: i64, label: &str, expires: Duration) {
        if let Some(entry) = self.entries.get_mut(&(extnbr, label.to_string())) {
            entry.deadline = Some(Instant::now() + expires);
        }
    }

    /// One-minute periodic sweep: destroys entries whose deadline has
    /// elapsed (§4.3).
    pub fn sweep_expired(&mut self) -> Vec<RegistryKey> {
        let now = Instant::now();
        let expired: Vec<RegistryKey> = self
            .entries
            .iter()
            .filter(|(_, e)| e.deadline.map(|d| now >= d).unwrap_or(false))
            .map(|(k, _)| k.clone())
            .collect();
        for (extnbr, label) in &expired {
            self.remove(*extnbr, label);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry(extnbr: i64, label: &str) -> RegistryEntry {
        RegistryEntry {
            extnbr,
            label: label.to_string(),
            endpoint_id: extnbr,
            display: "Test".into(),
            authname: format!("user{extnbr}"),
            secret: "ha1".into(),
            realm: "sip.example".into(),
            algorithm: DigestAlgorithm::Md5,
            contact: None,
            context: None,
            nonce: "abc".into(),
            deadline: None,
            last_refresh: Utc::now(),
        }
    }

    #[test]
    fn presence_bit_tracks_refcount() {
        let mut registry = Registry::new(ExtensionRange::default());
        assert!(!registry.presence_bit(101));
        registry.insert(sample_entry(101, "phone1"));
        assert!(registry.presence_bit(101));
        registry.insert(sample_entry(101, "phone2"));
        assert!(registry.presence_bit(101));
        registry.remove(101, "phone1");
        assert!(registry.presence_bit(101));
        registry.remove(101, "phone2");
        assert!(!registry.presence_bit(101));
    }

    #[test]
    fn key_uniqueness_second_insert_replaces() {
        let mut registry = Registry::new(ExtensionRange::default());
        registry.insert(sample_entry(101, "phone1"));
        registry.insert(sample_entry(101, "phone1"));
        assert_eq!(registry.labels_for(101).len(), 1);
    }

    #[test]
    fn sweep_removes_only_expired() {
        let mut registry = Registry::new(ExtensionRange::default());
        let mut live = sample_entry(102, "phone1");
        live.deadline = Some(Instant::now() + Duration::from_secs(60));
        registry.insert(live);
        let mut dead = sample_entry(103, "phone1");
        dead.deadline = Some(Instant::now() - Duration::from_secs(1));
        registry.insert(dead);

        let expired = registry.sweep_expired();
        assert_eq!(expired, vec![(103, "phone1".to_string())]);
        assert!(registry.find(102, "phone1").is_some());
        assert!(registry.find(103, "phone1").is_none());
    }

    #[test]
    fn range_boundaries() {
        let range = ExtensionRange::default();
        assert!(range.contains(100));
        assert!(range.contains(699));
        assert!(!range.contains(99));
        assert!(!range.contains(700));
    }
}
