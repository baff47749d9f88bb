//! Core Nostr identifier types
//!
//! Keys and event ids travel through the network as loosely formatted
//! strings. These newtypes only ever hold the canonical lowercase hex form,
//! so two values compare equal exactly when they name the same identity or
//! event.

use crate::{Error, Result};
use bech32::{Bech32, Hrp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Human-readable part of bech32-encoded public keys
const NPUB_HRP: Hrp = Hrp::parse_unchecked("npub");

/// Length of a hex-encoded 32-byte value
const HEX_LEN: usize = 64;

fn is_hex64(value: &str) -> bool {
    value.len() == HEX_LEN && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Public key of a protocol identity, stored as lowercase hex
///
/// # Examples
/// ```
/// use nostr_client::PubKey;
///
/// let key = PubKey::parse(&"AB".repeat(32)).unwrap();
/// assert_eq!(key.as_str(), "ab".repeat(32));
///
/// let npub = key.to_npub().unwrap();
/// assert_eq!(PubKey::parse(&npub).unwrap(), key);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PubKey(String);

impl PubKey {
    /// Parse a key from hex (any case) or `npub1…` form
    pub fn parse(candidate: &str) -> Result<Self> {
        let trimmed = candidate.trim();
        if is_hex64(trimmed) {
            return Ok(Self(trimmed.to_ascii_lowercase()));
        }
        Self::from_npub(trimmed)
    }

    /// Decode a bech32 `npub1…` string
    pub fn from_npub(candidate: &str) -> Result<Self> {
        let (hrp, data) = bech32::decode(candidate.trim())
            .map_err(|_| Error::InvalidPubKey(candidate.to_string()))?;
        if hrp != NPUB_HRP || data.len() != HEX_LEN / 2 {
            return Err(Error::InvalidPubKey(candidate.to_string()));
        }
        Ok(Self(hex::encode(data)))
    }

    /// Encode as `npub1…`
    pub fn to_npub(&self) -> Option<String> {
        let bytes = hex::decode(&self.0).ok()?;
        bech32::encode::<Bech32>(NPUB_HRP, &bytes).ok()
    }

    /// Canonical hex form
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PubKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PubKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<PubKey> for String {
    fn from(key: PubKey) -> Self {
        key.0
    }
}

/// Identifier of a signed event, stored as lowercase hex
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventId(String);

impl EventId {
    /// Parse a 64-char hex id (any case)
    pub fn parse(candidate: &str) -> Result<Self> {
        let trimmed = candidate.trim();
        if is_hex64(trimmed) {
            Ok(Self(trimmed.to_ascii_lowercase()))
        } else {
            Err(Error::InvalidEventId(candidate.to_string()))
        }
    }

    /// Canonical hex form
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EventId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EventId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<EventId> for String {
    fn from(id: EventId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Key from NIP-19
    const NIP19_HEX: &str = "3bf0c63fcb93463407af97a5e5ee64fa883d107ef9e558472c4eb9aaaefa459d";
    const NIP19_NPUB: &str = "npub180cvv07tjdrrgpa0j7j7tmnyl2yr6yr7l8j4s3evf6u64th6gkwsyjh6w6";

    #[test]
    fn test_pubkey_from_hex_is_lowercased() {
        let key = PubKey::parse(&NIP19_HEX.to_uppercase()).unwrap();
        assert_eq!(key.as_str(), NIP19_HEX);
    }

    #[test]
    fn test_pubkey_trims_whitespace() {
        let key = PubKey::parse(&format!("  {}\n", NIP19_HEX)).unwrap();
        assert_eq!(key.as_str(), NIP19_HEX);
    }

    #[test]
    fn test_pubkey_from_npub() {
        let key = PubKey::parse(NIP19_NPUB).unwrap();
        assert_eq!(key.as_str(), NIP19_HEX);
    }

    #[test]
    fn test_pubkey_to_npub() {
        let key = PubKey::parse(NIP19_HEX).unwrap();
        assert_eq!(key.to_npub().as_deref(), Some(NIP19_NPUB));
    }

    #[test]
    fn test_pubkey_rejects_garbage() {
        assert!(PubKey::parse("").is_err());
        assert!(PubKey::parse("abc").is_err());
        assert!(PubKey::parse(&"g".repeat(64)).is_err());
        assert!(PubKey::parse("npub1notreallyanpub").is_err());
    }

    #[test]
    fn test_pubkey_rejects_corrupted_npub_checksum() {
        let mut corrupted = NIP19_NPUB.to_string();
        corrupted.pop();
        corrupted.push('q');
        assert!(PubKey::parse(&corrupted).is_err());
    }

    #[test]
    fn test_pubkey_serde_normalizes() {
        let json = format!("\"{}\"", NIP19_HEX.to_uppercase());
        let key: PubKey = serde_json::from_str(&json).unwrap();
        assert_eq!(key.as_str(), NIP19_HEX);
        assert_eq!(serde_json::to_string(&key).unwrap(), format!("\"{}\"", NIP19_HEX));
    }

    #[test]
    fn test_event_id_parse() {
        let id = EventId::parse(&"AA".repeat(32)).unwrap();
        assert_eq!(id.as_str(), "aa".repeat(32));
        assert!(EventId::parse(&"a".repeat(63)).is_err());
        assert!(EventId::parse(NIP19_NPUB).is_err());
    }

    #[test]
    fn test_event_id_from_str() {
        let id: EventId = "11".repeat(32).parse().unwrap();
        assert_eq!(id.to_string(), "11".repeat(32));
    }
}
