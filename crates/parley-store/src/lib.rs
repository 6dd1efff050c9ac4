//! # parley-store
//!
//! In-memory conversation and contact state for one messaging account.
//!
//! The store reconciles daemon-originated facts (contact-list changes,
//! trust requests, conversation and interaction events) into three
//! consistent collections: active conversations, pending request
//! conversations, and the contact directory. A conversation key lives in
//! exactly one partition at a time; one-to-one conversations are
//! transparently superseded by their swarm equivalents; unread counters
//! always match the emitted lists.
//!
//! Producers mutate through [`AccountStore`]; the UI subscribes to the
//! [`Notifier`] streams and reads the lazily re-sorted snapshots. All
//! operations are bounded map-and-sort work; nothing here touches network
//! or disk.

pub mod account;
pub mod contact;
pub mod conversation;
pub mod directory;
pub mod notifier;
pub mod registry;
pub mod requests;
pub mod views;

mod error;

pub use account::{AccountStore, ContactRecord};
pub use contact::{Contact, ContactStatus, Profile};
pub use conversation::{Conversation, ConversationMode, Interaction, InteractionKind};
pub use directory::ContactDirectory;
pub use error::{Result, StoreError};
pub use notifier::Notifier;
pub use registry::{ConversationRegistry, MembershipChange, Partition};
pub use requests::{RequestLedger, TrustRequest};
pub use views::{SortedViews, ViewKind};
