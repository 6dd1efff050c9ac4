//! Conversation objects and their interaction history.
//!
//! A [`Conversation`] is keyed by its [`Uri`] and owned by exactly one
//! registry partition at a time (active, pending, or cache-only). The
//! ordering of the conversation lists derives from each conversation's
//! `last_event`: the interaction with the greatest timestamp.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use parley_shared::{SwarmId, Uri};

use crate::contact::Contact;

/// Monotonic creation sequence shared by all conversations in the process.
/// Used as the tie-break key so list ordering is stable across rebuilds.
static NEXT_SEQ: AtomicU64 = AtomicU64::new(0);

/// How a conversation behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationMode {
    /// Exactly one remote member, may be superseded by a swarm equivalent.
    OneToOne,
    /// Multi-party swarm conversation.
    Group,
    /// Accepted but still replicating history from other devices.
    Syncing,
    /// Materialized from an unanswered trust request.
    Request,
}

/// Kind of an event absorbed into a conversation's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InteractionKind {
    Text,
    Call,
    File,
    /// Contact add/remove markers for legacy one-to-one conversations.
    ContactEvent,
    /// "Contact invited" marker recorded when a swarm request arrives.
    Invited,
}

/// A single history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    pub id: Uuid,
    pub author: Uri,
    /// Unix epoch millis; drives the descending list ordering.
    pub timestamp: i64,
    pub kind: InteractionKind,
    pub body: Option<String>,
    pub is_read: bool,
}

impl Interaction {
    pub fn new(author: Uri, timestamp: i64, kind: InteractionKind, body: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            author,
            timestamp,
            kind,
            body,
            is_read: false,
        }
    }
}

#[derive(Debug)]
struct ConversationState {
    mode: ConversationMode,
    members: Vec<Arc<Contact>>,
    interactions: Vec<Interaction>,
    last_event: Option<Interaction>,
    /// Cleared when an interaction arrives out of timestamp order.
    history_sorted: bool,
}

/// A conversation with its ordered interaction history.
#[derive(Debug)]
pub struct Conversation {
    uri: Uri,
    swarm_id: Option<SwarmId>,
    seq: u64,
    state: Mutex<ConversationState>,
}

impl Conversation {
    pub fn new(uri: Uri, mode: ConversationMode) -> Self {
        let swarm_id = uri.swarm_id();
        Self {
            uri,
            swarm_id,
            seq: NEXT_SEQ.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(ConversationState {
                mode,
                members: Vec::new(),
                interactions: Vec::new(),
                last_event: None,
                history_sorted: true,
            }),
        }
    }

    // Same recovery policy as `Contact`: state stays consistent across any
    // single mutation, so a poisoned lock is safe to reclaim.
    fn lock(&self) -> MutexGuard<'_, ConversationState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Secondary lookup key, present for swarm conversations only.
    pub fn swarm_id(&self) -> Option<&SwarmId> {
        self.swarm_id.as_ref()
    }

    pub fn is_swarm(&self) -> bool {
        self.swarm_id.is_some()
    }

    /// Creation-order tie-break key for the stable list sort.
    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    pub fn mode(&self) -> ConversationMode {
        self.lock().mode
    }

    pub(crate) fn set_mode(&self, mode: ConversationMode) {
        self.lock().mode = mode;
    }

    /// Add a member contact. Idempotent on the contact's uri.
    pub fn add_member(&self, contact: Arc<Contact>) {
        let mut state = self.lock();
        if !state.members.iter().any(|m| m.uri() == contact.uri()) {
            state.members.push(contact);
        }
    }

    pub fn members(&self) -> Vec<Arc<Contact>> {
        self.lock().members.clone()
    }

    /// The single remote member, for one-to-one style conversations.
    pub fn sole_member(&self) -> Option<Arc<Contact>> {
        let state = self.lock();
        let mut remote = state.members.iter().filter(|m| !m.is_local());
        let first = remote.next()?;
        if remote.next().is_some() {
            return None;
        }
        Some(first.clone())
    }

    /// Absorb an event into the history and update `last_event`.
    pub fn add_interaction(&self, interaction: Interaction) {
        let mut state = self.lock();
        if let Some(last) = state.interactions.last() {
            if interaction.timestamp < last.timestamp {
                state.history_sorted = false;
            }
        }
        let newest = match &state.last_event {
            Some(last) => interaction.timestamp >= last.timestamp,
            None => true,
        };
        if newest {
            state.last_event = Some(interaction.clone());
        }
        state.interactions.push(interaction);
    }

    /// Re-sort the history by timestamp if it is known to be out of order.
    /// Stable, so same-timestamp events keep arrival order.
    pub fn sort_history(&self) {
        let mut state = self.lock();
        if !state.history_sorted {
            state.interactions.sort_by_key(|i| i.timestamp);
            state.history_sorted = true;
        }
    }

    pub fn interactions(&self) -> Vec<Interaction> {
        self.lock().interactions.clone()
    }

    pub fn last_event(&self) -> Option<Interaction> {
        self.lock().last_event.clone()
    }

    /// Ordering timestamp; conversations without history sort oldest.
    pub(crate) fn order_timestamp(&self) -> i64 {
        self.lock()
            .last_event
            .as_ref()
            .map(|e| e.timestamp)
            .unwrap_or(i64::MIN)
    }

    /// Whether this conversation counts toward the unread-active counter.
    pub fn has_unread(&self) -> bool {
        self.lock()
            .last_event
            .as_ref()
            .is_some_and(|e| !e.is_read)
    }

    /// Mark the whole history read. Returns `true` if anything changed.
    pub fn mark_read(&self) -> bool {
        let mut state = self.lock();
        let mut changed = false;
        for interaction in &mut state.interactions {
            if !interaction.is_read {
                interaction.is_read = true;
                changed = true;
            }
        }
        if let Some(last) = &mut state.last_event {
            if !last.is_read {
                last.is_read = true;
                changed = true;
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_at(ts: i64) -> Interaction {
        Interaction::new(
            Uri::from_peer_id("alice"),
            ts,
            InteractionKind::Text,
            Some("hi".into()),
        )
    }

    fn test_conversation() -> Conversation {
        Conversation::new(Uri::from_peer_id("alice"), ConversationMode::OneToOne)
    }

    #[test]
    fn test_last_event_tracks_greatest_timestamp() {
        let conv = test_conversation();
        assert_eq!(conv.last_event(), None);
        assert_eq!(conv.order_timestamp(), i64::MIN);

        conv.add_interaction(text_at(10));
        conv.add_interaction(text_at(5));
        assert_eq!(conv.order_timestamp(), 10);

        conv.add_interaction(text_at(20));
        assert_eq!(conv.order_timestamp(), 20);
    }

    #[test]
    fn test_sort_history_restores_timestamp_order() {
        let conv = test_conversation();
        conv.add_interaction(text_at(10));
        conv.add_interaction(text_at(5));
        conv.add_interaction(text_at(7));

        conv.sort_history();
        let ts: Vec<i64> = conv.interactions().iter().map(|i| i.timestamp).collect();
        assert_eq!(ts, vec![5, 7, 10]);
    }

    #[test]
    fn test_mark_read_clears_unread() {
        let conv = test_conversation();
        conv.add_interaction(text_at(1));
        assert!(conv.has_unread());

        assert!(conv.mark_read());
        assert!(!conv.has_unread());
        assert!(!conv.mark_read());
    }

    #[test]
    fn test_add_member_is_idempotent() {
        let conv = test_conversation();
        let contact = Arc::new(crate::contact::Contact::new(
            Uri::from_peer_id("alice"),
            false,
        ));
        conv.add_member(contact.clone());
        conv.add_member(contact.clone());
        assert_eq!(conv.members().len(), 1);
        assert!(Arc::ptr_eq(&conv.sole_member().unwrap(), &contact));
    }

    #[test]
    fn test_seq_is_monotonic() {
        let a = test_conversation();
        let b = test_conversation();
        assert!(a.seq() < b.seq());
    }
}
