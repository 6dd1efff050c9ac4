//! Pending trust requests.
//!
//! The ledger owns the raw request facts; the account store bridges each
//! entry into the registry's pending partition (a `Request`-mode
//! conversation for swarm-backed requests, a request marker on the cached
//! conversation for legacy ones).

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use parley_shared::Uri;

use crate::contact::Profile;
use crate::conversation::ConversationMode;

/// An inbound trust request from a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustRequest {
    pub from: Uri,
    pub received_at: DateTime<Utc>,
    /// Swarm conversation backing the request, absent for legacy requests.
    pub conversation_uri: Option<Uri>,
    pub mode: ConversationMode,
    /// Asynchronously resolved sender profile, if it arrived already.
    pub profile: Option<Profile>,
}

impl TrustRequest {
    /// Ledger key: the backing conversation uri when present, else the
    /// sender's uri.
    pub fn key(&self) -> Uri {
        self.conversation_uri
            .clone()
            .unwrap_or_else(|| self.from.clone())
    }
}

/// Pending trust requests keyed per [`TrustRequest::key`].
#[derive(Debug, Default)]
pub struct RequestLedger {
    requests: Mutex<HashMap<Uri, TrustRequest>>,
}

impl RequestLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uri, TrustRequest>> {
        self.requests.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Record a request. Idempotent: repeated delivery of the same request
    /// keeps the first entry and returns `false`.
    pub fn add(&self, request: TrustRequest) -> bool {
        let key = request.key();
        let mut requests = self.lock();
        if requests.contains_key(&key) {
            debug!(key = %key.short(), "Duplicate trust request ignored");
            return false;
        }
        debug!(key = %key.short(), from = %request.from.short(), "Trust request recorded");
        requests.insert(key, request);
        true
    }

    /// Remove and return the entry for `key`; `None` on repeat calls.
    pub fn take(&self, key: &Uri) -> Option<TrustRequest> {
        self.lock().remove(key)
    }

    /// Remove and return any request sent by `peer`, whatever it is keyed
    /// by. Used when a contact add supersedes an outstanding request.
    pub fn take_for_peer(&self, peer: &Uri) -> Option<TrustRequest> {
        let mut requests = self.lock();
        let key = requests
            .iter()
            .find(|(_, r)| r.from == *peer)
            .map(|(k, _)| k.clone())?;
        requests.remove(&key)
    }

    pub fn contains(&self, key: &Uri) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of all pending requests, newest first.
    pub fn snapshot(&self) -> Vec<TrustRequest> {
        let mut requests: Vec<TrustRequest> = self.lock().values().cloned().collect();
        requests.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn swarm_request(from: &str, swarm: &str) -> TrustRequest {
        TrustRequest {
            from: Uri::from_peer_id(from),
            received_at: Utc::now(),
            conversation_uri: Some(Uri::parse(&format!("swarm:{swarm}")).unwrap()),
            mode: ConversationMode::OneToOne,
            profile: None,
        }
    }

    fn legacy_request(from: &str) -> TrustRequest {
        TrustRequest {
            from: Uri::from_peer_id(from),
            received_at: Utc::now(),
            conversation_uri: None,
            mode: ConversationMode::Request,
            profile: None,
        }
    }

    #[test]
    fn test_key_prefers_conversation_uri() {
        let swarm = swarm_request("alice", "feed");
        assert_eq!(swarm.key().as_str(), "swarm:feed");

        let legacy = legacy_request("alice");
        assert_eq!(legacy.key().as_str(), "peer:alice");
    }

    #[test]
    fn test_add_is_idempotent() {
        let ledger = RequestLedger::new();
        let request = swarm_request("alice", "feed");

        assert!(ledger.add(request.clone()));
        assert!(!ledger.add(request));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_take_twice_returns_none() {
        let ledger = RequestLedger::new();
        let request = legacy_request("alice");
        let key = request.key();
        ledger.add(request);

        assert!(ledger.take(&key).is_some());
        assert!(ledger.take(&key).is_none());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_request_serde_roundtrip() {
        let request = swarm_request("alice", "feed");
        let json = serde_json::to_string(&request).unwrap();
        let back: TrustRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn test_take_for_peer_matches_swarm_keyed_entry() {
        let ledger = RequestLedger::new();
        ledger.add(swarm_request("alice", "feed"));

        let taken = ledger.take_for_peer(&Uri::from_peer_id("alice"));
        assert!(taken.is_some());
        assert!(ledger.is_empty());
        assert!(ledger.take_for_peer(&Uri::from_peer_id("alice")).is_none());
    }
}
