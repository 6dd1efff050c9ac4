//! Canonical contact identity and profile state.
//!
//! A [`Contact`] is created once per peer uri by the
//! [`ContactDirectory`](crate::directory::ContactDirectory) and shared by
//! reference (`Arc`) with every conversation and trust request that mentions
//! the peer. Only the directory (through the account store) mutates the
//! canonical fields; everyone else treats a contact as read-only and reacts
//! to the contact stream.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use parley_shared::Uri;

/// Relationship between the local account and a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactStatus {
    /// No trust relationship either way.
    NoRequest,
    /// We sent a request, the peer has not confirmed yet.
    RequestSent,
    /// Mutual contact.
    Confirmed,
    /// Blocked; the record is kept so repeat requests stay suppressed.
    Banned,
}

/// Asynchronously resolved display fields.
///
/// Resolution failures are swallowed at the edge: a contact simply keeps its
/// prior (or default) profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub display_name: Option<String>,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone)]
struct ContactState {
    status: ContactStatus,
    profile: Profile,
    online: bool,
    added_date: Option<DateTime<Utc>>,
    /// Uri of the conversation currently representing this contact.
    /// Initially the contact's own uri; a swarm uri once a group-capable
    /// conversation supersedes the plain one.
    conversation_uri: Uri,
}

/// A peer identity owned by the contact directory.
#[derive(Debug)]
pub struct Contact {
    uri: Uri,
    is_local: bool,
    state: Mutex<ContactState>,
}

impl Contact {
    pub(crate) fn new(uri: Uri, is_local: bool) -> Self {
        let state = ContactState {
            status: ContactStatus::NoRequest,
            profile: Profile::default(),
            online: false,
            added_date: None,
            conversation_uri: uri.clone(),
        };
        Self {
            uri,
            is_local,
            state: Mutex::new(state),
        }
    }

    // A poisoned lock still holds consistent data (every mutation below is a
    // single field write); recover rather than propagate.
    fn lock(&self) -> MutexGuard<'_, ContactState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Whether this contact is the local user.
    pub fn is_local(&self) -> bool {
        self.is_local
    }

    pub fn status(&self) -> ContactStatus {
        self.lock().status
    }

    pub(crate) fn set_status(&self, status: ContactStatus) {
        self.lock().status = status;
    }

    /// Whether conversations with this peer may appear in the active list.
    pub fn is_trusted(&self) -> bool {
        matches!(
            self.status(),
            ContactStatus::Confirmed | ContactStatus::RequestSent
        )
    }

    pub fn is_confirmed(&self) -> bool {
        self.status() == ContactStatus::Confirmed
    }

    pub fn is_banned(&self) -> bool {
        self.status() == ContactStatus::Banned
    }

    pub fn profile(&self) -> Profile {
        self.lock().profile.clone()
    }

    pub(crate) fn set_profile(&self, profile: Profile) {
        self.lock().profile = profile;
    }

    pub fn is_online(&self) -> bool {
        self.lock().online
    }

    /// Set the presence flag. Returns `true` if the flag changed.
    pub(crate) fn set_online(&self, online: bool) -> bool {
        let mut state = self.lock();
        let changed = state.online != online;
        state.online = online;
        changed
    }

    pub fn added_date(&self) -> Option<DateTime<Utc>> {
        self.lock().added_date
    }

    pub(crate) fn set_added_date(&self, when: DateTime<Utc>) {
        self.lock().added_date = Some(when);
    }

    /// Uri of the conversation currently representing this contact.
    pub fn conversation_uri(&self) -> Uri {
        self.lock().conversation_uri.clone()
    }

    pub(crate) fn set_conversation_uri(&self, uri: Uri) {
        self.lock().conversation_uri = uri;
    }

    /// Whether the plain conversation keyed by this contact's own uri has
    /// been superseded by a swarm conversation.
    pub fn is_superseded(&self) -> bool {
        self.lock().conversation_uri != self.uri
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_contact() -> Contact {
        Contact::new(Uri::from_peer_id("alice"), false)
    }

    #[test]
    fn test_new_contact_defaults() {
        let contact = test_contact();
        assert_eq!(contact.status(), ContactStatus::NoRequest);
        assert!(!contact.is_trusted());
        assert!(!contact.is_online());
        assert_eq!(contact.added_date(), None);
        assert_eq!(contact.conversation_uri(), *contact.uri());
        assert!(!contact.is_superseded());
    }

    #[test]
    fn test_conversation_uri_supersession() {
        let contact = test_contact();
        let swarm = Uri::parse("swarm:feed").unwrap();

        contact.set_conversation_uri(swarm.clone());
        assert!(contact.is_superseded());
        assert_eq!(contact.conversation_uri(), swarm);

        contact.set_conversation_uri(contact.uri().clone());
        assert!(!contact.is_superseded());
    }

    #[test]
    fn test_online_change_detection() {
        let contact = test_contact();
        assert!(contact.set_online(true));
        assert!(!contact.set_online(true));
        assert!(contact.set_online(false));
    }
}
