use std::fmt;
use std::sync::Arc;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

const SCHEME_PEER: &str = "peer:";
const SCHEME_SIP: &str = "sip:";
const SCHEME_SWARM: &str = "swarm:";

/// Truncate to at most `max` bytes, backing off to a char boundary so
/// multi-byte ids never split mid-character.
fn truncated(s: &str, max: usize) -> &str {
    let mut end = s.len().min(max);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Errors produced when parsing a [`Uri`] from text.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum UriError {
    #[error("Empty uri")]
    Empty,

    #[error("Unknown uri scheme: {0}")]
    UnknownScheme(String),
}

/// Account-unique key for contacts and conversations.
///
/// Three schemes exist: `peer:<id>` for peer-id contacts, `sip:<id>` for SIP
/// contacts, and `swarm:<id>` for group-capable (swarm) conversations.
/// Internally an `Arc<str>`, so clones are cheap and a `Uri` can be used
/// freely as a map key across partitions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Uri(Arc<str>);

impl Uri {
    /// Build the uri for a peer-id contact.
    pub fn from_peer_id(id: &str) -> Self {
        Self(format!("{SCHEME_PEER}{id}").into())
    }

    /// Build the uri for a SIP contact.
    pub fn from_sip(id: &str) -> Self {
        Self(format!("{SCHEME_SIP}{id}").into())
    }

    /// Build the uri for a swarm conversation.
    pub fn from_swarm(id: &SwarmId) -> Self {
        Self(format!("{SCHEME_SWARM}{id}").into())
    }

    /// Parse a uri from its textual form, validating the scheme.
    pub fn parse(s: &str) -> Result<Self, UriError> {
        if s.is_empty() {
            return Err(UriError::Empty);
        }
        let known = [SCHEME_PEER, SCHEME_SIP, SCHEME_SWARM]
            .iter()
            .any(|scheme| {
                s.strip_prefix(scheme)
                    .is_some_and(|body| !body.is_empty())
            });
        if !known {
            return Err(UriError::UnknownScheme(s.to_string()));
        }
        Ok(Self(s.into()))
    }

    /// The full textual form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this key uses the swarm scheme.
    pub fn is_swarm(&self) -> bool {
        self.0.starts_with(SCHEME_SWARM)
    }

    /// The swarm id, if this is a swarm uri.
    pub fn swarm_id(&self) -> Option<SwarmId> {
        self.0.strip_prefix(SCHEME_SWARM).map(SwarmId::new)
    }

    /// Truncated form for logs.
    pub fn short(&self) -> &str {
        truncated(&self.0, 16)
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Uri {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Uri {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Uri::parse(&s).map_err(D::Error::custom)
    }
}

/// Identifier of a swarm conversation, independent of its [`Uri`] form.
///
/// Swarm conversations carry both keys: the uri (`swarm:<id>`) for partition
/// membership and the bare id for O(1) resolution by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SwarmId(Arc<str>);

impl SwarmId {
    pub fn new(id: &str) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Truncated form for logs.
    pub fn short(&self) -> &str {
        truncated(&self.0, 8)
    }
}

impl fmt::Display for SwarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for SwarmId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SwarmId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(SwarmId::new(&s))
    }
}

/// Flavour of the owning account.
///
/// Selects how contact uris are constructed and whether conversations
/// require a trust handshake before showing up in the active list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountKind {
    /// Peer-id account; unknown peers must be confirmed before their
    /// conversations leave the pending list.
    PeerToPeer,
    /// SIP account; no handshake, conversations go straight to active.
    Sip,
}

impl AccountKind {
    /// Build a contact uri for a raw daemon-supplied id.
    pub fn contact_uri(&self, id: &str) -> Uri {
        match self {
            Self::PeerToPeer => Uri::from_peer_id(id),
            Self::Sip => Uri::from_sip(id),
        }
    }

    /// Whether unconfirmed peers are held in the pending list.
    pub fn requires_trust(&self) -> bool {
        matches!(self, Self::PeerToPeer)
    }
}
