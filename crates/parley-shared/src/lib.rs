//! # parley-shared
//!
//! Types shared between the daemon-facing event producers and the
//! conversation state store: account-scoped keys ([`types::Uri`],
//! [`types::SwarmId`]) and the account flavour selector
//! ([`types::AccountKind`]).

pub mod types;

pub use types::{AccountKind, SwarmId, Uri, UriError};
