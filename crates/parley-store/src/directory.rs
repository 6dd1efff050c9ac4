//! Contact directory: the single source of truth for peer identities.
//!
//! Every component that mentions a peer holds the directory's `Arc` for it;
//! the directory never hands out two different objects for the same key.
//! Mutations flow through [`AccountStore`](crate::account::AccountStore),
//! which republishes the full contact snapshot after each one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use parley_shared::{AccountKind, Uri};

use crate::contact::Contact;

/// Map of canonical [`Contact`] records for one account.
#[derive(Debug)]
pub struct ContactDirectory {
    kind: AccountKind,
    contacts: Mutex<HashMap<Uri, Arc<Contact>>>,
}

impl ContactDirectory {
    pub fn new(kind: AccountKind) -> Self {
        Self {
            kind,
            contacts: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uri, Arc<Contact>>> {
        self.contacts.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Build the uri for a raw daemon-supplied peer id, according to the
    /// account type (peer-id vs. SIP construction).
    pub fn uri_for_id(&self, id: &str) -> Uri {
        self.kind.contact_uri(id)
    }

    /// Return the cached contact for `uri`, creating it if absent.
    ///
    /// The check-then-insert is done under the directory lock, so two racing
    /// callers always end up with the same `Arc`.
    pub fn get_or_create(&self, uri: &Uri) -> Arc<Contact> {
        let mut contacts = self.lock();
        if let Some(contact) = contacts.get(uri) {
            return contact.clone();
        }
        debug!(uri = %uri.short(), "Creating contact");
        let contact = Arc::new(Contact::new(uri.clone(), false));
        contacts.insert(uri.clone(), contact.clone());
        contact
    }

    pub fn get(&self, uri: &Uri) -> Option<Arc<Contact>> {
        self.lock().get(uri).cloned()
    }

    /// Delete a contact record entirely (non-banned removal).
    pub(crate) fn remove(&self, uri: &Uri) -> Option<Arc<Contact>> {
        let removed = self.lock().remove(uri);
        if removed.is_some() {
            debug!(uri = %uri.short(), "Removed contact");
        }
        removed
    }

    /// Find the contact whose conversation currently lives at `uri`.
    pub(crate) fn find_by_conversation(&self, uri: &Uri) -> Option<Arc<Contact>> {
        self.lock()
            .values()
            .find(|c| c.conversation_uri() == *uri)
            .cloned()
    }

    /// Full-replace snapshot for the contact stream, ordered by uri so
    /// consecutive emissions are comparable.
    pub fn snapshot(&self) -> Vec<Arc<Contact>> {
        let mut contacts: Vec<Arc<Contact>> = self.lock().values().cloned().collect();
        contacts.sort_by(|a, b| a.uri().as_str().cmp(b.uri().as_str()));
        contacts
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_referential_stability() {
        let directory = ContactDirectory::new(AccountKind::PeerToPeer);
        let uri = directory.uri_for_id("alice");

        let first = directory.get_or_create(&uri);
        let second = directory.get_or_create(&uri);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn test_uri_construction_follows_account_kind() {
        let peer = ContactDirectory::new(AccountKind::PeerToPeer);
        assert_eq!(peer.uri_for_id("alice").as_str(), "peer:alice");

        let sip = ContactDirectory::new(AccountKind::Sip);
        assert_eq!(sip.uri_for_id("alice").as_str(), "sip:alice");
    }

    #[test]
    fn test_remove_drops_record() {
        let directory = ContactDirectory::new(AccountKind::PeerToPeer);
        let uri = directory.uri_for_id("alice");
        directory.get_or_create(&uri);

        assert!(directory.remove(&uri).is_some());
        assert!(directory.get(&uri).is_none());
        assert!(directory.remove(&uri).is_none());
    }

    #[test]
    fn test_snapshot_ordered_by_uri() {
        let directory = ContactDirectory::new(AccountKind::PeerToPeer);
        directory.get_or_create(&directory.uri_for_id("carol"));
        directory.get_or_create(&directory.uri_for_id("alice"));
        directory.get_or_create(&directory.uri_for_id("bob"));

        let snapshot = directory.snapshot();
        let uris: Vec<&str> = snapshot.iter().map(|c| c.uri().as_str()).collect();
        assert_eq!(uris, vec!["peer:alice", "peer:bob", "peer:carol"]);
    }
}
