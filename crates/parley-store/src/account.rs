//! Per-account composition of the store.
//!
//! [`AccountStore`] owns the contact directory, the conversation registry,
//! the request ledger, the sorted-view cache, and the notifier, and carries
//! every operation that spans more than one of them: contact add/remove with
//! conversation association, swarm supersession and its reversal, request
//! accept/decline/block, and interaction routing.
//!
//! Producers (the daemon event layer) call the mutators; consumers (the UI)
//! subscribe through [`AccountStore::notifier`] and read the sorted
//! snapshots. Consumers never mutate registry state directly.
//!
//! Lock order, for the operations that touch several collections: contact
//! directory, then the registry partitions (active → pending → cache →
//! swarm index), then the view cache. No lock is held across a notifier
//! publication.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use parley_shared::{AccountKind, SwarmId, Uri};

use crate::contact::{Contact, ContactStatus, Profile};
use crate::conversation::{Conversation, ConversationMode, Interaction, InteractionKind};
use crate::directory::ContactDirectory;
use crate::error::{Result, StoreError};
use crate::notifier::Notifier;
use crate::registry::{ConversationRegistry, Partition};
use crate::requests::{RequestLedger, TrustRequest};
use crate::views::{SortedViews, ViewKind};

/// One contact row of the initial persistence batch.
#[derive(Debug, Clone)]
pub struct ContactRecord {
    pub id: String,
    pub confirmed: bool,
    pub banned: bool,
    pub added: Option<DateTime<Utc>>,
    /// Swarm conversation already associated with the contact, if any.
    pub conversation_id: Option<SwarmId>,
}

/// Conversation and contact state for a single account.
#[derive(Debug)]
pub struct AccountStore {
    kind: AccountKind,
    contacts: ContactDirectory,
    registry: ConversationRegistry,
    requests: RequestLedger,
    views: SortedViews,
    notifier: Notifier,
}

impl AccountStore {
    pub fn new(kind: AccountKind) -> Self {
        Self {
            kind,
            contacts: ContactDirectory::new(kind),
            registry: ConversationRegistry::new(),
            requests: RequestLedger::new(),
            views: SortedViews::new(),
            notifier: Notifier::new(),
        }
    }

    pub fn kind(&self) -> AccountKind {
        self.kind
    }

    /// Subscription surface for the UI layer.
    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Read access to the canonical contact map.
    pub fn directory(&self) -> &ContactDirectory {
        &self.contacts
    }

    /// Pending trust requests, newest first.
    pub fn trust_requests(&self) -> Vec<TrustRequest> {
        self.requests.snapshot()
    }

    // ------------------------------------------------------------------
    // Contact operations (daemon producer)
    // ------------------------------------------------------------------

    /// A contact was added: `confirmed` for a mutual contact, otherwise an
    /// outbound request. Supersedes any pending request from the peer and
    /// associates a conversation.
    pub fn add_contact(&self, id: &str, confirmed: bool) {
        let uri = self.contacts.uri_for_id(id);
        let contact = self.contacts.get_or_create(&uri);
        contact.set_status(if confirmed {
            ContactStatus::Confirmed
        } else {
            ContactStatus::RequestSent
        });
        contact.set_added_date(Utc::now());
        info!(uri = %uri.short(), confirmed, "Contact added");

        let pending_changed = self.clear_request_for(&uri);
        let assoc_changed = self.associate_conversation(&contact);

        self.publish_contacts();
        if pending_changed || assoc_changed {
            self.publish_active();
            self.publish_pending();
        }
    }

    /// A contact was removed, or banned when `banned` is set (a banned
    /// record is kept so repeat requests stay suppressed).
    pub fn remove_contact(&self, id: &str, banned: bool) {
        let uri = self.contacts.uri_for_id(id);
        self.remove_contact_uri(&uri, banned);
    }

    fn remove_contact_uri(&self, uri: &Uri, banned: bool) {
        let existing = self.contacts.get(uri);
        let conversation_key = existing
            .as_ref()
            .map(|c| c.conversation_uri())
            .unwrap_or_else(|| uri.clone());

        if banned {
            let contact = self.contacts.get_or_create(uri);
            contact.set_status(ContactStatus::Banned);
            contact.set_conversation_uri(uri.clone());
            info!(uri = %uri.short(), "Contact banned");
        } else {
            self.contacts.remove(uri);
            info!(uri = %uri.short(), "Contact removed");
        }

        let mut lists_changed = self.clear_request_for(uri);
        let mut keys = vec![conversation_key.clone()];
        if conversation_key != *uri {
            keys.push(uri.clone());
        }
        for key in &keys {
            if let Some((_, partition)) = self.registry.remove(key) {
                match partition {
                    Partition::Active => {
                        self.views.mark_dirty(ViewKind::Active);
                        lists_changed = true;
                    }
                    Partition::Pending => {
                        self.views.mark_dirty(ViewKind::Pending);
                        lists_changed = true;
                    }
                    Partition::Cache => {}
                }
            }
        }

        self.publish_contacts();
        if lists_changed {
            self.publish_active();
            self.publish_pending();
        }
    }

    /// Apply the initial contact batch from the persistence layer. Emits a
    /// single round of snapshots after the whole batch.
    pub fn bulk_import(&self, records: Vec<ContactRecord>) {
        info!(count = records.len(), "Importing contact batch");
        for record in records {
            let uri = self.contacts.uri_for_id(&record.id);
            let contact = self.contacts.get_or_create(&uri);
            contact.set_status(if record.banned {
                ContactStatus::Banned
            } else if record.confirmed {
                ContactStatus::Confirmed
            } else {
                ContactStatus::RequestSent
            });
            if let Some(added) = record.added {
                contact.set_added_date(added);
            }
            self.clear_request_for(&uri);
            if let Some(swarm) = &record.conversation_id {
                // Same step as a live swarm arrival: any visible
                // conversation at the old key goes to the cache.
                self.supersede(&contact, &Uri::from_swarm(swarm));
            }
            if !record.banned {
                self.associate_conversation(&contact);
            }
        }
        self.publish_contacts();
        self.publish_active();
        self.publish_pending();
    }

    /// Profile resolution completed for a peer. Failures never reach this
    /// point; the contact keeps its prior fields.
    pub fn set_contact_profile(&self, uri: &Uri, profile: Profile) {
        let Some(contact) = self.contacts.get(uri) else {
            return;
        };
        contact.set_profile(profile);
        self.publish_contacts();
        if let Some(conversation) = self.registry.get_by_uri(&contact.conversation_uri()) {
            self.notifier.publish_conversation(conversation);
        }
    }

    /// Presence change for a peer.
    pub fn set_contact_online(&self, uri: &Uri, online: bool) {
        let Some(contact) = self.contacts.get(uri) else {
            return;
        };
        if contact.set_online(online) {
            debug!(uri = %uri.short(), online, "Presence changed");
            self.publish_contacts();
        }
    }

    // ------------------------------------------------------------------
    // Conversation operations (daemon producer)
    // ------------------------------------------------------------------

    /// A conversation came up on the transport layer.
    ///
    /// A swarm conversation in one-to-one mode supersedes the plain
    /// conversation of its contact: the old key is moved out of the visible
    /// partitions and the contact's conversation uri re-points at the swarm
    /// key, atomically with respect to the partition locks.
    pub fn conversation_started(&self, conversation: Arc<Conversation>) {
        let conversation = self.register(conversation);
        debug!(uri = %conversation.uri().short(), "Conversation started");

        let mut superseded = false;
        if conversation.is_swarm() && conversation.mode() == ConversationMode::OneToOne {
            if let Some(contact) = conversation.sole_member() {
                superseded = self.supersede(&contact, conversation.uri());
            }
        }

        let changed = self.classify(&conversation);
        if changed {
            self.publish_active();
            self.publish_pending();
        }
        if superseded {
            self.publish_contacts();
        }
    }

    /// A conversation changed. Already-visible conversations are re-sorted
    /// in place; a first sighting is classified into active or pending.
    pub fn conversation_updated(&self, conversation: Arc<Conversation>) {
        let conversation = self.register(conversation);
        match self.registry.locate(conversation.uri()) {
            Some(Partition::Active) => self.publish_active(),
            Some(Partition::Pending) => self.publish_pending(),
            _ => {
                if self.classify(&conversation) {
                    self.publish_active();
                    self.publish_pending();
                }
            }
        }
    }

    /// Lighter than [`conversation_updated`]: re-emit without
    /// re-classifying, for in-place history mutation.
    ///
    /// [`conversation_updated`]: AccountStore::conversation_updated
    pub fn conversation_refreshed(&self, conversation: Arc<Conversation>) {
        let conversation = self
            .registry
            .get_by_uri(conversation.uri())
            .unwrap_or(conversation);
        match self.registry.locate(conversation.uri()) {
            Some(Partition::Active) => self.publish_active(),
            Some(Partition::Pending) => self.publish_pending(),
            _ => {}
        }
        self.notifier.publish_conversation(conversation);
    }

    /// Delete a conversation from whichever partition holds it. Removing a
    /// swarm conversation reverts its contact to the plain conversation
    /// (which reappears in active while the contact is still confirmed).
    pub fn remove_conversation(&self, uri: &Uri) {
        let Some((conversation, partition)) = self.registry.remove(uri) else {
            return;
        };
        let mut lists_changed = match partition {
            Partition::Active => {
                self.views.mark_dirty(ViewKind::Active);
                true
            }
            Partition::Pending => {
                self.views.mark_dirty(ViewKind::Pending);
                true
            }
            Partition::Cache => false,
        };

        if conversation.is_swarm() {
            if let Some(contact) = self.contacts.find_by_conversation(uri) {
                contact.set_conversation_uri(contact.uri().clone());
                debug!(
                    uri = %uri.short(),
                    contact = %contact.uri().short(),
                    "Swarm removed, reverting contact to plain conversation"
                );
                if contact.is_confirmed() {
                    lists_changed |= self.associate_conversation(&contact);
                }
                self.publish_contacts();
            }
        }

        if lists_changed {
            self.publish_active();
            self.publish_pending();
        }
    }

    /// Delete a swarm conversation by its id.
    pub fn remove_swarm(&self, id: &SwarmId) {
        if let Some(conversation) = self.registry.get_swarm_by_id(id) {
            let uri = conversation.uri().clone();
            self.remove_conversation(&uri);
        }
    }

    // ------------------------------------------------------------------
    // Interaction delivery (daemon producer)
    // ------------------------------------------------------------------

    /// Route a text/call/file event into its conversation.
    pub fn add_interaction(&self, uri: &Uri, interaction: Interaction) {
        let conversation = match self.registry.get_by_uri(uri) {
            Some(c) => c,
            None => {
                let mode = if uri.is_swarm() {
                    ConversationMode::Syncing
                } else {
                    ConversationMode::OneToOne
                };
                let conversation = self.registry.get_or_create_by_key(uri, mode);
                if !uri.is_swarm() {
                    conversation.add_member(self.contacts.get_or_create(uri));
                }
                conversation
            }
        };
        conversation.add_interaction(interaction);

        match self.registry.locate(uri) {
            Some(Partition::Active) => self.publish_active(),
            Some(Partition::Pending) => self.publish_pending(),
            _ => {
                if self.classify(&conversation) {
                    self.publish_active();
                    self.publish_pending();
                }
            }
        }
        self.notifier.publish_conversation(conversation);
    }

    /// The user opened a conversation: clear its unread state.
    pub fn mark_conversation_read(&self, uri: &Uri) {
        let Some(conversation) = self.registry.get_by_uri(uri) else {
            return;
        };
        if !conversation.mark_read() {
            return;
        }
        match self.registry.locate(uri) {
            Some(Partition::Active) => self.publish_active(),
            Some(Partition::Pending) => self.publish_pending(),
            _ => {}
        }
        self.notifier.publish_conversation(conversation);
    }

    // ------------------------------------------------------------------
    // Trust requests
    // ------------------------------------------------------------------

    /// An inbound trust request arrived. Idempotent on repeated delivery.
    pub fn add_request(&self, request: TrustRequest) {
        let key = request.key();
        let peer = self.contacts.get_or_create(&request.from);
        if peer.is_banned() {
            debug!(from = %request.from.short(), "Request from banned peer dropped");
            return;
        }
        if let Some(profile) = &request.profile {
            peer.set_profile(profile.clone());
        }
        if !self.requests.add(request.clone()) {
            return;
        }

        if self.registry.locate(&key) != Some(Partition::Pending) {
            let conversation = self
                .registry
                .get_or_create_by_key(&key, ConversationMode::Request);
            conversation.add_member(peer);
            let marker = if request.conversation_uri.is_some() {
                InteractionKind::Invited
            } else {
                InteractionKind::ContactEvent
            };
            conversation.add_interaction(Interaction::new(
                request.from.clone(),
                request.received_at.timestamp_millis(),
                marker,
                None,
            ));
            self.move_to(&conversation, Partition::Pending);
        }
        self.publish_contacts();
        self.publish_pending();
    }

    /// Remove and return the ledger entry for `key`. The matching pending
    /// conversation leaves the pending partition in the same logical step;
    /// it stays resolvable so an accept can re-drive it into active.
    pub fn remove_request(&self, key: &Uri) -> Option<TrustRequest> {
        let request = self.requests.take(key);
        if self.registry.locate(key) == Some(Partition::Pending) {
            if let Some(conversation) = self.registry.get_by_uri(key) {
                self.move_to(&conversation, Partition::Cache);
                self.publish_pending();
            }
        }
        request
    }

    /// Accept: drop the ledger entry; the transport layer confirms the
    /// contact and re-drives the conversation through
    /// `conversation_started`/`conversation_updated`.
    pub fn accept_request(&self, key: &Uri) -> Option<TrustRequest> {
        let request = self.remove_request(key)?;
        info!(key = %key.short(), "Trust request accepted");
        Some(request)
    }

    /// Decline: the request and its conversation vanish.
    pub fn decline_request(&self, key: &Uri) -> Option<TrustRequest> {
        let request = self.remove_request(key)?;
        info!(key = %key.short(), "Trust request declined");
        self.remove_conversation(key);
        Some(request)
    }

    /// Block: decline and ban the sender.
    pub fn block_request(&self, key: &Uri) -> Option<TrustRequest> {
        let request = self.remove_request(key)?;
        info!(key = %key.short(), from = %request.from.short(), "Trust request blocked");
        self.remove_conversation(key);
        self.remove_contact_uri(&request.from, true);
        Some(request)
    }

    // ------------------------------------------------------------------
    // History gate
    // ------------------------------------------------------------------

    /// The persistence layer finished loading. Opens the notification
    /// streams and performs the first emission on all of them. Calling this
    /// twice for one account is a programmer error.
    pub fn set_history_loaded(&self) -> Result<()> {
        if !self.notifier.mark_history_loaded() {
            warn!("set_history_loaded called twice");
            return Err(StoreError::HistoryLoaded);
        }
        self.publish_contacts();
        self.publish_active();
        self.publish_pending();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lookups and snapshots (UI consumer)
    // ------------------------------------------------------------------

    pub fn get_contact(&self, uri: &Uri) -> Option<Arc<Contact>> {
        self.contacts.get(uri)
    }

    pub fn get_conversation(&self, uri: &Uri) -> Option<Arc<Conversation>> {
        self.registry.get_by_uri(uri)
    }

    /// Lookup from a raw key string, validating it at the boundary.
    pub fn get_conversation_str(&self, key: &str) -> Result<Option<Arc<Conversation>>> {
        let uri = Uri::parse(key)?;
        Ok(self.registry.get_by_uri(&uri))
    }

    pub fn get_swarm(&self, id: &SwarmId) -> Option<Arc<Conversation>> {
        self.registry.get_swarm_by_id(id)
    }

    pub fn get_or_create_conversation(&self, uri: &Uri) -> Arc<Conversation> {
        let mode = if uri.is_swarm() {
            ConversationMode::Syncing
        } else {
            ConversationMode::OneToOne
        };
        self.registry.get_or_create_by_key(uri, mode)
    }

    /// Sorted active conversations, newest first.
    pub fn sorted_active(&self) -> Vec<Arc<Conversation>> {
        self.views
            .sorted(ViewKind::Active, || self.registry.active_snapshot())
    }

    /// Sorted pending conversations, newest first.
    pub fn sorted_pending(&self) -> Vec<Arc<Conversation>> {
        self.views
            .sorted(ViewKind::Pending, || self.registry.pending_snapshot())
    }

    pub fn unread_active(&self) -> usize {
        self.sorted_active()
            .iter()
            .filter(|c| c.has_unread())
            .count()
    }

    pub fn unread_pending(&self) -> usize {
        self.registry.pending_len()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Reuse the registered object for this key, or register the incoming
    /// one into the cache partition. Keeps `get_or_create` referential
    /// stability against duplicate daemon delivery.
    fn register(&self, conversation: Arc<Conversation>) -> Arc<Conversation> {
        match self.registry.get_by_uri(conversation.uri()) {
            Some(existing) => existing,
            None => {
                self.registry.set_partition(&conversation, Partition::Cache);
                conversation
            }
        }
    }

    /// Move the conversation currently representing `contact` out of the
    /// visible partitions and point the contact at the swarm key. Returns
    /// `true` if the contact's conversation uri actually changed.
    fn supersede(&self, contact: &Arc<Contact>, swarm_uri: &Uri) -> bool {
        let old_key = contact.conversation_uri();
        if old_key == *swarm_uri {
            return false;
        }
        if let Some(old) = self.registry.get_by_uri(&old_key) {
            self.move_to(&old, Partition::Cache);
        }
        contact.set_conversation_uri(swarm_uri.clone());
        debug!(
            contact = %contact.uri().short(),
            swarm = %swarm_uri.short(),
            "Plain conversation superseded by swarm"
        );
        true
    }

    /// Classify a conversation into a partition per its mode and contact
    /// trust. Returns `true` if active or pending membership changed.
    fn classify(&self, conversation: &Arc<Conversation>) -> bool {
        if conversation.mode() == ConversationMode::Request {
            return self.move_to(conversation, Partition::Pending);
        }
        let target = match conversation.sole_member() {
            Some(contact) => {
                if contact.conversation_uri() != *conversation.uri() {
                    // Superseded elsewhere: keeping it hidden is what stops
                    // the same peer showing up twice.
                    Partition::Cache
                } else if contact.is_banned() {
                    Partition::Cache
                } else if contact.is_trusted() || !self.kind.requires_trust() {
                    Partition::Active
                } else {
                    Partition::Pending
                }
            }
            // Group conversations carry their own membership; no handshake.
            None => Partition::Active,
        };
        self.move_to(conversation, target)
    }

    /// Conversation association step: make sure the conversation currently
    /// representing `contact` exists and is visible. Reuses whatever object
    /// already lives at the contact's conversation uri, so a promotion from
    /// pending keeps the same conversation.
    fn associate_conversation(&self, contact: &Arc<Contact>) -> bool {
        if contact.is_banned() {
            return false;
        }
        if self.kind.requires_trust() && !contact.is_trusted() {
            return false;
        }
        let key = contact.conversation_uri();
        let mode = if key.is_swarm() {
            ConversationMode::Syncing
        } else {
            ConversationMode::OneToOne
        };
        let conversation = self.registry.get_or_create_by_key(&key, mode);
        conversation.add_member(contact.clone());
        if conversation.mode() == ConversationMode::Request {
            conversation.set_mode(ConversationMode::OneToOne);
        }
        self.move_to(&conversation, Partition::Active)
    }

    /// Partition move plus dirty-flag bookkeeping. The dirty marks derive
    /// from the membership delta the registry observed inside the move's
    /// critical section, so a concurrent move can never leave a changed
    /// view without its dirty bit.
    fn move_to(&self, conversation: &Arc<Conversation>, target: Partition) -> bool {
        let change = self.registry.set_partition(conversation, target);
        if change.active {
            self.views.mark_dirty(ViewKind::Active);
        }
        if change.pending {
            self.views.mark_dirty(ViewKind::Pending);
        }
        change.any()
    }

    /// Drop any outstanding request from `peer` and pull its conversation
    /// out of the pending partition. Returns `true` if pending changed.
    fn clear_request_for(&self, peer: &Uri) -> bool {
        let Some(request) = self.requests.take_for_peer(peer) else {
            return false;
        };
        let key = request.key();
        if self.registry.locate(&key) == Some(Partition::Pending) {
            if let Some(conversation) = self.registry.get_by_uri(&key) {
                return self.move_to(&conversation, Partition::Cache);
            }
        }
        false
    }

    fn publish_contacts(&self) {
        self.notifier.publish_contacts(self.contacts.snapshot());
    }

    // Counters are recomputed from the snapshot just produced, never cached
    // on their own, so they cannot drift from the emitted list.
    fn publish_active(&self) {
        let list = self.sorted_active();
        let unread = list.iter().filter(|c| c.has_unread()).count();
        self.notifier.publish_active(list, unread);
    }

    fn publish_pending(&self) {
        let list = self.sorted_pending();
        let unread = list.len();
        self.notifier.publish_pending(list, unread);
    }
}
