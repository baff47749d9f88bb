//! Nostr event model
//!
//! Events arrive from relays exactly as their authors published them, so the
//! fields here stay loosely typed. Interpreting tags is left to the consumer
//! that knows which kind it expects.

use crate::types::PubKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;

/// Event kinds consumed or produced by this workspace
pub mod kind {
    /// Contact list (NIP-02); `p` tags name followed keys
    pub const CONTACT_LIST: u32 = 3;
    /// Report (NIP-56)
    pub const REPORT: u32 = 1984;
    /// Mute list (NIP-51); `p` tags name muted authors
    pub const MUTE_LIST: u32 = 10000;
}

/// Wrapper for a Nostr tag expressed as an array of strings.
///
/// The first element is the tag name, the rest are positional values. For
/// example `["p", "<hex>", "wss://relay", "spam"]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag(pub Vec<String>);

impl Tag {
    /// Build a tag from its parts
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    /// Tag name (first element)
    pub fn name(&self) -> Option<&str> {
        self.get(0)
    }

    /// Primary value (second element)
    pub fn value(&self) -> Option<&str> {
        self.get(1)
    }

    /// Element at `index`
    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    /// Whether this tag has the given name and at least one value
    pub fn is(&self, name: &str) -> bool {
        self.0.len() >= 2 && self.name() == Some(name)
    }
}

/// Position of a replaceable event in its last-write-wins order
///
/// Later `created_at` wins; on equal timestamps the greater id wins.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Revision {
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event id
    pub id: String,
}

impl Revision {
    /// Create a revision marker
    pub fn new(created_at: u64, id: impl Into<String>) -> Self {
        Self { created_at, id: id.into() }
    }

    /// Whether `self` strictly replaces `other`
    pub fn supersedes(&self, other: &Revision) -> bool {
        self > other
    }
}

impl PartialOrd for Revision {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Revision {
    fn cmp(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Signed Nostr event as served by relays
///
/// ```json
/// {
///   "id": "aa11…",
///   "pubkey": "b0c4…",
///   "kind": 1984,
///   "created_at": 1700000000,
///   "tags": [["e", "<id>", "spam"], ["p", "<hex>"]],
///   "content": "",
///   "sig": "deadbeef…"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    /// Event identifier (hex of SHA-256 hash)
    pub id: String,
    /// Author public key (hex)
    pub pubkey: String,
    /// Kind number
    pub kind: u32,
    /// Unix timestamp of creation
    pub created_at: u64,
    /// Positional tags
    pub tags: Vec<Tag>,
    /// Content body
    #[serde(default)]
    pub content: String,
    /// Schnorr signature over the id
    #[serde(default)]
    pub sig: String,
}

impl Event {
    /// Revision marker used for replaceable-event ordering
    pub fn revision(&self) -> Revision {
        Revision::new(self.created_at, self.id.to_ascii_lowercase())
    }

    /// Author key, if well formed
    pub fn author(&self) -> Option<PubKey> {
        PubKey::parse(&self.pubkey).ok()
    }

    /// Tags with the given name
    pub fn tags_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Tag> + 'a {
        self.tags.iter().filter(move |tag| tag.is(name))
    }

    /// Parse an event from relay JSON
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Event body awaiting a signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedEvent {
    /// Author public key
    pub pubkey: PubKey,
    /// Unix timestamp of creation
    pub created_at: u64,
    /// Kind number
    pub kind: u32,
    /// Positional tags
    pub tags: Vec<Tag>,
    /// Content body
    pub content: String,
}

impl UnsignedEvent {
    /// Create an event body timestamped now
    pub fn new(pubkey: PubKey, kind: u32, tags: Vec<Tag>, content: impl Into<String>) -> Self {
        let created_at = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
        Self { pubkey, created_at, kind, tags, content: content.into() }
    }

    /// Override the creation timestamp
    pub fn with_created_at(mut self, created_at: u64) -> Self {
        self.created_at = created_at;
        self
    }

    /// NIP-01 event id: sha256 over the canonical serialization
    pub fn compute_id(&self) -> String {
        let canonical = serde_json::json!([
            0,
            self.pubkey.as_str(),
            self.created_at,
            self.kind,
            self.tags,
            self.content
        ]);
        let digest = Sha256::digest(canonical.to_string().as_bytes());
        hex::encode(digest)
    }

    /// Attach an id and signature
    pub fn into_signed(self, id: String, sig: String) -> Event {
        Event {
            id,
            pubkey: self.pubkey.into(),
            kind: self.kind,
            created_at: self.created_at,
            tags: self.tags,
            content: self.content,
            sig,
        }
    }
}
