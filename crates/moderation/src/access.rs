//! Admin allow/deny lists
//!
//! Operators publish lists of keys in whatever form they have at hand, hex or
//! `npub`. An [`AccessSnapshot`] freezes one reading of those lists into
//! constant-time lookups over both the raw and the canonical form. The
//! blacklist always wins over the whitelist.

use nostr_client::PubKey;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Source of the admin lists
pub trait AccessControl: Send + Sync {
    /// Keys whose votes always count as trusted
    fn whitelist(&self) -> Vec<String>;

    /// Keys whose votes never count
    fn blacklist(&self) -> Vec<String>;
}

/// Fixed admin lists that can be swapped at runtime
#[derive(Debug, Default)]
pub struct StaticAccessLists {
    whitelist: RwLock<Vec<String>>,
    blacklist: RwLock<Vec<String>>,
}

impl StaticAccessLists {
    /// Create lists from raw entries
    pub fn new<W, B>(whitelist: W, blacklist: B) -> Self
    where
        W: IntoIterator,
        W::Item: Into<String>,
        B: IntoIterator,
        B::Item: Into<String>,
    {
        Self {
            whitelist: RwLock::new(whitelist.into_iter().map(Into::into).collect()),
            blacklist: RwLock::new(blacklist.into_iter().map(Into::into).collect()),
        }
    }

    /// Replace the whitelist
    pub fn set_whitelist(&self, entries: Vec<String>) {
        *self.whitelist.write() = entries;
    }

    /// Replace the blacklist
    pub fn set_blacklist(&self, entries: Vec<String>) {
        *self.blacklist.write() = entries;
    }
}

impl AccessControl for StaticAccessLists {
    fn whitelist(&self) -> Vec<String> {
        self.whitelist.read().clone()
    }

    fn blacklist(&self) -> Vec<String> {
        self.blacklist.read().clone()
    }
}

/// Classification of a single key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessStatus {
    /// Canonical hex form, if the key parsed
    pub hex: Option<PubKey>,
    /// Bech32 form, if the key parsed
    pub npub: Option<String>,
    /// On the whitelist and not on the blacklist
    pub whitelisted: bool,
    /// On the blacklist
    pub blacklisted: bool,
}

/// Point-in-time view of the admin lists
#[derive(Debug, Clone, Default)]
pub struct AccessSnapshot {
    /// Whitelist entries as published (trimmed)
    pub whitelist: HashSet<String>,
    /// Blacklist entries as published (trimmed)
    pub blacklist: HashSet<String>,
    /// Whitelist entries that parsed to a key
    pub whitelist_hex: HashSet<PubKey>,
    /// Blacklist entries that parsed to a key
    pub blacklist_hex: HashSet<PubKey>,
}

impl AccessSnapshot {
    /// Read both lists from a source
    pub fn capture(source: &dyn AccessControl) -> Self {
        Self::from_lists(source.whitelist(), source.blacklist())
    }

    /// Build a snapshot from raw entries
    pub fn from_lists<W, B>(whitelist: W, blacklist: B) -> Self
    where
        W: IntoIterator,
        W::Item: AsRef<str>,
        B: IntoIterator,
        B::Item: AsRef<str>,
    {
        let (whitelist, whitelist_hex) = split(whitelist);
        let (blacklist, blacklist_hex) = split(blacklist);
        Self { whitelist, blacklist, whitelist_hex, blacklist_hex }
    }

    /// Whether a canonical key is blacklisted
    pub fn is_blacklisted(&self, key: &PubKey) -> bool {
        self.blacklist_hex.contains(key)
    }

    /// Whether a canonical key is whitelisted and not blacklisted
    pub fn is_whitelisted(&self, key: &PubKey) -> bool {
        !self.is_blacklisted(key) && self.whitelist_hex.contains(key)
    }

    /// Classify a key given in hex or `npub` form
    pub fn classify(&self, candidate: &str) -> AccessStatus {
        let raw = candidate.trim();
        let hex = PubKey::parse(raw).ok();
        let npub = hex.as_ref().and_then(PubKey::to_npub);

        let blacklisted = self.blacklist.contains(raw)
            || hex.as_ref().is_some_and(|key| self.blacklist_hex.contains(key));
        let whitelisted = !blacklisted
            && (self.whitelist.contains(raw)
                || hex.as_ref().is_some_and(|key| self.whitelist_hex.contains(key)));

        AccessStatus { hex, npub, whitelisted, blacklisted }
    }
}

fn split<I>(entries: I) -> (HashSet<String>, HashSet<PubKey>)
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut raw = HashSet::new();
    let mut hex = HashSet::new();
    for entry in entries {
        let trimmed = entry.as_ref().trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Ok(key) = PubKey::parse(trimmed) {
            hex.insert(key);
        }
        raw.insert(trimmed.to_string());
    }
    (raw, hex)
}
