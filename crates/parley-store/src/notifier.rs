//! Broadcast surface of the store.
//!
//! List and counter streams are `tokio::sync::watch` channels: late
//! subscribers immediately see the most recent value, and a slow consumer
//! only ever skips intermediate values ("latest wins"). The
//! per-conversation refresh stream is a `tokio::sync::broadcast` channel so
//! every distinct refresh reaches every subscriber.
//!
//! Nothing is emitted before the persistence layer signals that history is
//! loaded; the first emission on all streams happens at that point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::debug;

use crate::contact::Contact;
use crate::conversation::Conversation;

/// Buffer for the per-conversation stream. A subscriber that lags behind by
/// more than this many refreshes observes a `Lagged` error and should
/// re-read the conversation it displays.
const CONVERSATION_STREAM_CAPACITY: usize = 256;

/// Reactive channels feeding the UI layer.
#[derive(Debug)]
pub struct Notifier {
    history_loaded: AtomicBool,
    conversation_tx: broadcast::Sender<Arc<Conversation>>,
    active_tx: watch::Sender<Vec<Arc<Conversation>>>,
    pending_tx: watch::Sender<Vec<Arc<Conversation>>>,
    contacts_tx: watch::Sender<Vec<Arc<Contact>>>,
    unread_active_tx: watch::Sender<usize>,
    unread_pending_tx: watch::Sender<usize>,
}

impl Notifier {
    pub fn new() -> Self {
        let (conversation_tx, _) = broadcast::channel(CONVERSATION_STREAM_CAPACITY);
        let (active_tx, _) = watch::channel(Vec::new());
        let (pending_tx, _) = watch::channel(Vec::new());
        let (contacts_tx, _) = watch::channel(Vec::new());
        let (unread_active_tx, _) = watch::channel(0);
        let (unread_pending_tx, _) = watch::channel(0);
        Self {
            history_loaded: AtomicBool::new(false),
            conversation_tx,
            active_tx,
            pending_tx,
            contacts_tx,
            unread_active_tx,
            unread_pending_tx,
        }
    }

    /// Flip the history gate. Returns `true` exactly once.
    pub(crate) fn mark_history_loaded(&self) -> bool {
        let first = !self.history_loaded.swap(true, Ordering::SeqCst);
        if first {
            debug!("History loaded, opening notification streams");
        }
        first
    }

    pub fn is_history_loaded(&self) -> bool {
        self.history_loaded.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Publication (all gated on the history flag)
    // ------------------------------------------------------------------

    pub(crate) fn publish_conversation(&self, conversation: Arc<Conversation>) {
        if self.is_history_loaded() {
            // Err just means no subscriber right now.
            let _ = self.conversation_tx.send(conversation);
        }
    }

    pub(crate) fn publish_active(&self, list: Vec<Arc<Conversation>>, unread: usize) {
        if self.is_history_loaded() {
            self.active_tx.send_replace(list);
            self.unread_active_tx.send_replace(unread);
        }
    }

    pub(crate) fn publish_pending(&self, list: Vec<Arc<Conversation>>, unread: usize) {
        if self.is_history_loaded() {
            self.pending_tx.send_replace(list);
            self.unread_pending_tx.send_replace(unread);
        }
    }

    pub(crate) fn publish_contacts(&self, contacts: Vec<Arc<Contact>>) {
        if self.is_history_loaded() {
            self.contacts_tx.send_replace(contacts);
        }
    }

    // ------------------------------------------------------------------
    // Subscription
    // ------------------------------------------------------------------

    /// Every distinct conversation refresh, for open-conversation UIs.
    pub fn subscribe_conversations(&self) -> broadcast::Receiver<Arc<Conversation>> {
        self.conversation_tx.subscribe()
    }

    /// Full sorted active snapshot, replay-latest.
    pub fn watch_active(&self) -> watch::Receiver<Vec<Arc<Conversation>>> {
        self.active_tx.subscribe()
    }

    /// Full sorted pending snapshot, replay-latest.
    pub fn watch_pending(&self) -> watch::Receiver<Vec<Arc<Conversation>>> {
        self.pending_tx.subscribe()
    }

    /// Full contact snapshot, replay-latest.
    pub fn watch_contacts(&self) -> watch::Receiver<Vec<Arc<Contact>>> {
        self.contacts_tx.subscribe()
    }

    pub fn watch_unread_active(&self) -> watch::Receiver<usize> {
        self.unread_active_tx.subscribe()
    }

    pub fn watch_unread_pending(&self) -> watch::Receiver<usize> {
        self.unread_pending_tx.subscribe()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
