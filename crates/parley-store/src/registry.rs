//! Conversation registry: partition membership and swarm index.
//!
//! A conversation key lives in exactly one of three partitions at any
//! quiescent point: `Active` (shown in the main list), `Pending` (awaiting a
//! trust decision), or `Cache` (resolved but hidden, e.g. a one-to-one
//! conversation superseded by its swarm equivalent). Swarm conversations are
//! additionally indexed by swarm id for O(1) resolution.
//!
//! Lock order is fixed: active → pending → cache → swarms. Cross-partition
//! moves hold the partition guards for their whole duration so a concurrent
//! check-then-act can never observe a key in two partitions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, error};

use parley_shared::{SwarmId, Uri};

use crate::conversation::{Conversation, ConversationMode};

/// Which partition currently holds a conversation key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    Active,
    Pending,
    Cache,
}

/// Visible-partition membership delta reported by
/// [`ConversationRegistry::set_partition`]. Computed inside the move's
/// critical section, so callers can set dirty flags without a second
/// (racy) lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MembershipChange {
    pub active: bool,
    pub pending: bool,
}

impl MembershipChange {
    pub fn any(&self) -> bool {
        self.active || self.pending
    }
}

type Map = HashMap<Uri, Arc<Conversation>>;

#[derive(Debug)]
pub struct ConversationRegistry {
    active: Mutex<Map>,
    pending: Mutex<Map>,
    cache: Mutex<Map>,
    swarms: Mutex<HashMap<SwarmId, Arc<Conversation>>>,
}

fn lock(map: &Mutex<Map>) -> MutexGuard<'_, Map> {
    map.lock().unwrap_or_else(|p| p.into_inner())
}

impl ConversationRegistry {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            cache: Mutex::new(HashMap::new()),
            swarms: Mutex::new(HashMap::new()),
        }
    }

    /// Look a conversation up across all partitions.
    pub fn get_by_uri(&self, uri: &Uri) -> Option<Arc<Conversation>> {
        let (active, pending, cache) = self.guards();
        active
            .get(uri)
            .or_else(|| pending.get(uri))
            .or_else(|| cache.get(uri))
            .cloned()
    }

    /// O(1) swarm lookup by id.
    pub fn get_swarm_by_id(&self, id: &SwarmId) -> Option<Arc<Conversation>> {
        self.swarms
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(id)
            .cloned()
    }

    /// Return the conversation for `uri`, creating it into the cache
    /// partition if absent. Same caching contract as the contact directory:
    /// never two objects for one key.
    pub fn get_or_create_by_key(&self, uri: &Uri, mode: ConversationMode) -> Arc<Conversation> {
        let (active, pending, mut cache) = self.guards();
        if let Some(existing) = active
            .get(uri)
            .or_else(|| pending.get(uri))
            .or_else(|| cache.get(uri))
        {
            return existing.clone();
        }
        debug!(uri = %uri.short(), ?mode, "Creating conversation (cache-only)");
        let conversation = Arc::new(Conversation::new(uri.clone(), mode));
        cache.insert(uri.clone(), conversation.clone());
        drop((active, pending, cache));
        self.index_swarm_if_needed(&conversation);
        conversation
    }

    /// Which partition holds `uri`, if any. Also the self-heal point: a key
    /// found in more than one partition is a programmer error; release
    /// builds prefer the active partition and drop the duplicate.
    pub fn locate(&self, uri: &Uri) -> Option<Partition> {
        let (active, mut pending, mut cache) = self.guards();
        let in_active = active.contains_key(uri);
        let in_pending = pending.contains_key(uri);
        let in_cache = cache.contains_key(uri);

        let hits = usize::from(in_active) + usize::from(in_pending) + usize::from(in_cache);
        if hits > 1 {
            debug_assert!(false, "conversation {uri} present in multiple partitions");
            error!(uri = %uri.short(), "Conversation in multiple partitions, self-healing");
            if in_active {
                pending.remove(uri);
                cache.remove(uri);
                return Some(Partition::Active);
            }
            cache.remove(uri);
            return Some(Partition::Pending);
        }

        if in_active {
            Some(Partition::Active)
        } else if in_pending {
            Some(Partition::Pending)
        } else if in_cache {
            Some(Partition::Cache)
        } else {
            None
        }
    }

    /// Move a conversation into `target`, removing it from the other
    /// partitions in the same critical section. Reports which visible
    /// partitions gained or lost the key.
    pub fn set_partition(
        &self,
        conversation: &Arc<Conversation>,
        target: Partition,
    ) -> MembershipChange {
        let uri = conversation.uri();
        let (mut active, mut pending, mut cache) = self.guards();

        let was_active = active.contains_key(uri);
        let was_pending = pending.contains_key(uri);
        active.remove(uri);
        pending.remove(uri);
        cache.remove(uri);

        let (now_active, now_pending) = match target {
            Partition::Active => {
                active.insert(uri.clone(), conversation.clone());
                (true, false)
            }
            Partition::Pending => {
                pending.insert(uri.clone(), conversation.clone());
                (false, true)
            }
            Partition::Cache => {
                cache.insert(uri.clone(), conversation.clone());
                (false, false)
            }
        };
        drop((active, pending, cache));
        self.index_swarm_if_needed(conversation);

        MembershipChange {
            active: was_active != now_active,
            pending: was_pending != now_pending,
        }
    }

    /// Delete `uri` from whichever partition holds it (and the swarm index).
    /// Unknown keys are a no-op.
    pub fn remove(&self, uri: &Uri) -> Option<(Arc<Conversation>, Partition)> {
        let (mut active, mut pending, mut cache) = self.guards();
        let removed = active
            .remove(uri)
            .map(|c| (c, Partition::Active))
            .or_else(|| pending.remove(uri).map(|c| (c, Partition::Pending)))
            .or_else(|| cache.remove(uri).map(|c| (c, Partition::Cache)));
        drop((active, pending, cache));

        if let Some((conversation, partition)) = &removed {
            if let Some(id) = conversation.swarm_id() {
                self.swarms
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .remove(id);
            }
            debug!(uri = %uri.short(), ?partition, "Removed conversation");
        }
        removed
    }

    pub fn active_snapshot(&self) -> Vec<Arc<Conversation>> {
        lock(&self.active).values().cloned().collect()
    }

    pub fn pending_snapshot(&self) -> Vec<Arc<Conversation>> {
        lock(&self.pending).values().cloned().collect()
    }

    pub fn active_len(&self) -> usize {
        lock(&self.active).len()
    }

    pub fn pending_len(&self) -> usize {
        lock(&self.pending).len()
    }

    fn index_swarm_if_needed(&self, conversation: &Arc<Conversation>) {
        if let Some(id) = conversation.swarm_id() {
            self.swarms
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .insert(id.clone(), conversation.clone());
        }
    }

    /// Partition guards in the documented lock order.
    fn guards(&self) -> (MutexGuard<'_, Map>, MutexGuard<'_, Map>, MutexGuard<'_, Map>) {
        let active = lock(&self.active);
        let pending = lock(&self.pending);
        let cache = lock(&self.cache);
        (active, pending, cache)
    }
}

impl Default for ConversationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(name: &str) -> Arc<Conversation> {
        Arc::new(Conversation::new(
            Uri::from_peer_id(name),
            ConversationMode::OneToOne,
        ))
    }

    #[test]
    fn test_get_or_create_caches_by_key() {
        let registry = ConversationRegistry::new();
        let uri = Uri::from_peer_id("alice");

        let first = registry.get_or_create_by_key(&uri, ConversationMode::OneToOne);
        let second = registry.get_or_create_by_key(&uri, ConversationMode::OneToOne);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.locate(&uri), Some(Partition::Cache));
    }

    #[test]
    fn test_set_partition_moves_exclusively() {
        let registry = ConversationRegistry::new();
        let conv = plain("alice");

        let change = registry.set_partition(&conv, Partition::Pending);
        assert!(change.pending && !change.active);
        assert_eq!(registry.locate(conv.uri()), Some(Partition::Pending));
        assert_eq!(registry.pending_len(), 1);

        // Pending → Active: both visible partitions changed.
        let change = registry.set_partition(&conv, Partition::Active);
        assert!(change.active && change.pending);
        assert_eq!(registry.locate(conv.uri()), Some(Partition::Active));
        assert_eq!(registry.pending_len(), 0);
        assert_eq!(registry.active_len(), 1);

        // Same target twice: membership unchanged.
        assert!(!registry.set_partition(&conv, Partition::Active).any());

        // Leaving a visible partition for the cache reports the loss.
        let change = registry.set_partition(&conv, Partition::Cache);
        assert!(change.active && !change.pending);
    }

    #[test]
    fn test_remove_unknown_key_is_noop() {
        let registry = ConversationRegistry::new();
        assert!(registry.remove(&Uri::from_peer_id("ghost")).is_none());
    }

    #[test]
    fn test_swarm_index_follows_membership() {
        let registry = ConversationRegistry::new();
        let id = SwarmId::new("feed");
        let conv = Arc::new(Conversation::new(
            Uri::from_swarm(&id),
            ConversationMode::OneToOne,
        ));

        registry.set_partition(&conv, Partition::Active);
        assert!(registry.get_swarm_by_id(&id).is_some());

        registry.remove(conv.uri());
        assert!(registry.get_swarm_by_id(&id).is_none());
    }
}
