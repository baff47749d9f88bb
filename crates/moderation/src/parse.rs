//! Typed views over the event kinds the engine consumes
//!
//! Tags are positional string arrays and any of them may be missing or
//! malformed. Each parser here either produces a fully typed record or a
//! [`DiscardReason`]; aggregation code never looks at raw tags.

use nostr_client::{kind, Event, EventId, PubKey, Revision, Tag};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Why an event was dropped at ingestion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscardReason {
    /// Event has a different kind than the parser expects
    WrongKind {
        /// Kind the parser accepts
        expected: u32,
        /// Kind the event carries
        found: u32,
    },
    /// Author key is not a valid key
    InvalidAuthor(String),
    /// Report names no well-formed target event
    MissingTarget,
    /// Report names no category
    MissingCategory,
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscardReason::WrongKind { expected, found } => {
                write!(f, "expected kind {}, found {}", expected, found)
            }
            DiscardReason::InvalidAuthor(author) => write!(f, "invalid author {}", author),
            DiscardReason::MissingTarget => f.write_str("no target event"),
            DiscardReason::MissingCategory => f.write_str("no report category"),
        }
    }
}

/// Parser outcome
pub type Parsed<T> = std::result::Result<T, DiscardReason>;

/// A contact list (kind 3)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactList {
    /// List owner
    pub author: PubKey,
    /// Well-formed contacts; malformed entries are skipped
    pub contacts: BTreeSet<PubKey>,
    /// Replaceable-event position
    pub revision: Revision,
}

/// A mute list (kind 10000)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuteList {
    /// List owner
    pub owner: PubKey,
    /// Muted authors with their optional category
    pub entries: BTreeMap<PubKey, Option<String>>,
    /// Replaceable-event position
    pub revision: Revision,
}

/// A content report (kind 1984)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// Who filed the report
    pub reporter: PubKey,
    /// Reported event
    pub target: EventId,
    /// Normalized category
    pub category: String,
    /// Accused author, if tagged
    pub accused: Option<PubKey>,
    /// Event position used for per-reporter last-write-wins
    pub revision: Revision,
}

/// Lowercase and trim a category label; empty labels are no label
pub fn normalize_category(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

fn is_relay_hint(value: &str) -> bool {
    let lower = value.trim().to_ascii_lowercase();
    ["wss://", "ws://", "https://", "http://"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
}

fn expect_kind(event: &Event, expected: u32) -> Parsed<()> {
    if event.kind == expected {
        Ok(())
    } else {
        Err(DiscardReason::WrongKind { expected, found: event.kind })
    }
}

fn author_of(event: &Event) -> Parsed<PubKey> {
    event.author().ok_or_else(|| DiscardReason::InvalidAuthor(event.pubkey.clone()))
}

fn tagged_keys(event: &Event) -> impl Iterator<Item = (PubKey, &Tag)> + '_ {
    event
        .tags_named("p")
        .filter_map(|tag| tag.value().and_then(|v| PubKey::parse(v).ok()).map(|key| (key, tag)))
}

/// Parse a contact list
pub fn contact_list(event: &Event) -> Parsed<ContactList> {
    expect_kind(event, kind::CONTACT_LIST)?;
    let author = author_of(event)?;
    let contacts = tagged_keys(event).map(|(key, _)| key).collect();
    Ok(ContactList { author, contacts, revision: event.revision() })
}

/// Category carried on a mute `p` tag
///
/// The fourth element wins; the third is used when it is not a relay URL.
fn mute_category(tag: &Tag) -> Option<String> {
    tag.get(3).and_then(normalize_category).or_else(|| {
        tag.get(2)
            .filter(|value| !is_relay_hint(value))
            .and_then(normalize_category)
    })
}

/// Parse a mute list
pub fn mute_list(event: &Event) -> Parsed<MuteList> {
    expect_kind(event, kind::MUTE_LIST)?;
    let owner = author_of(event)?;
    let mut entries = BTreeMap::new();
    for (key, tag) in tagged_keys(event) {
        if key == owner {
            continue;
        }
        let category = mute_category(tag);
        let slot = entries.entry(key).or_insert(None);
        if slot.is_none() {
            *slot = category;
        }
    }
    Ok(MuteList { owner, entries, revision: event.revision() })
}

/// Parse a report
///
/// The target is the first `e` tag holding a valid id. The category comes
/// from the first `report`/`type` tag, then the hint on the target's `e` tag,
/// then the first `t` tag.
pub fn report(event: &Event) -> Parsed<Report> {
    expect_kind(event, kind::REPORT)?;
    let reporter = author_of(event)?;

    let target = event
        .tags_named("e")
        .find_map(|tag| tag.value().and_then(|v| EventId::parse(v).ok()))
        .ok_or(DiscardReason::MissingTarget)?;

    let explicit = event
        .tags
        .iter()
        .filter(|tag| tag.is("report") || tag.is("type"))
        .find_map(|tag| tag.value().and_then(normalize_category));
    let inline = || {
        event
            .tags_named("e")
            .filter(|tag| tag.value().and_then(|v| EventId::parse(v).ok()).as_ref() == Some(&target))
            .find_map(|tag| tag.get(2).and_then(normalize_category))
    };
    let topic = || {
        event
            .tags_named("t")
            .find_map(|tag| tag.value().and_then(normalize_category))
    };
    let category = explicit
        .or_else(inline)
        .or_else(topic)
        .ok_or(DiscardReason::MissingCategory)?;

    let accused = tagged_keys(event).map(|(key, _)| key).next();

    Ok(Report { reporter, target, category, accused, revision: event.revision() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr_client::test_utils::{event_ids, events, pubkeys};

    // ============================================================================
    // Contact lists
    // ============================================================================

    #[test]
    fn test_contact_list_skips_malformed_entries() {
        let alice = pubkeys::alice();
        let event = events::event(
            &pubkeys::viewer(),
            kind::CONTACT_LIST,
            vec![
                Tag::new(["p", alice.as_str()]),
                Tag::new(["p", "not-a-key"]),
                Tag::new(["p"]),
                Tag::new(["e", pubkeys::bob().as_str()]),
            ],
            10,
        );
        let list = contact_list(&event).unwrap();
        assert_eq!(list.contacts.len(), 1);
        assert!(list.contacts.contains(&alice));
        assert_eq!(list.revision.created_at, 10);
    }

    #[test]
    fn test_contact_list_wrong_kind() {
        let event = events::mute_list(&pubkeys::viewer(), &[], 1);
        assert_eq!(
            contact_list(&event),
            Err(DiscardReason::WrongKind { expected: kind::CONTACT_LIST, found: kind::MUTE_LIST })
        );
    }

    // ============================================================================
    // Mute lists
    // ============================================================================

    #[test]
    fn test_mute_list_categories() {
        let owner = pubkeys::alice();
        let event = events::event(
            &owner,
            kind::MUTE_LIST,
            vec![
                Tag::new(["p", pubkeys::bob().as_str(), "wss://relay.example", "Spam "]),
                Tag::new(["p", pubkeys::carol().as_str(), "wss://relay.example"]),
                Tag::new(["p", pubkeys::stranger().as_str(), "nsfw"]),
                Tag::new(["p", owner.as_str()]),
            ],
            5,
        );
        let list = mute_list(&event).unwrap();
        assert_eq!(list.entries.len(), 3);
        assert_eq!(list.entries[&pubkeys::bob()].as_deref(), Some("spam"));
        assert_eq!(list.entries[&pubkeys::carol()], None);
        assert_eq!(list.entries[&pubkeys::stranger()].as_deref(), Some("nsfw"));
        assert!(!list.entries.contains_key(&owner));
    }

    #[test]
    fn test_mute_list_invalid_author() {
        let mut event = events::mute_list(&pubkeys::alice(), &[], 1);
        event.pubkey = "bogus".into();
        assert!(matches!(mute_list(&event), Err(DiscardReason::InvalidAuthor(_))));
    }

    // ============================================================================
    // Reports
    // ============================================================================

    #[test]
    fn test_report_inline_category() {
        let target = event_ids::video(1);
        let event = events::report(&pubkeys::alice(), &target, "Nudity", 100);
        let parsed = report(&event).unwrap();
        assert_eq!(parsed.target, target);
        assert_eq!(parsed.category, "nudity");
        assert_eq!(parsed.reporter, pubkeys::alice());
    }

    #[test]
    fn test_report_explicit_tag_wins() {
        let target = event_ids::video(2);
        let event = events::event(
            &pubkeys::bob(),
            kind::REPORT,
            vec![
                Tag::new(["e", target.as_str(), "spam"]),
                Tag::new(["t", "other"]),
                Tag::new(["report", "illegal"]),
            ],
            1,
        );
        assert_eq!(report(&event).unwrap().category, "illegal");
    }

    #[test]
    fn test_report_topic_fallback_and_accused() {
        let target = event_ids::video(3);
        let event = events::event(
            &pubkeys::bob(),
            kind::REPORT,
            vec![
                Tag::new(["e", "short"]),
                Tag::new(["e", target.as_str()]),
                Tag::new(["p", pubkeys::author().as_str(), "spam"]),
                Tag::new(["t", "Spam"]),
            ],
            1,
        );
        let parsed = report(&event).unwrap();
        assert_eq!(parsed.target, target);
        assert_eq!(parsed.category, "spam");
        assert_eq!(parsed.accused, Some(pubkeys::author()));
    }

    #[test]
    fn test_report_discards() {
        let no_target = events::event(&pubkeys::bob(), kind::REPORT, vec![Tag::new(["t", "spam"])], 1);
        assert_eq!(report(&no_target), Err(DiscardReason::MissingTarget));

        let target = event_ids::video(4);
        let no_category =
            events::event(&pubkeys::bob(), kind::REPORT, vec![Tag::new(["e", target.as_str(), " "])], 1);
        assert_eq!(report(&no_category), Err(DiscardReason::MissingCategory));
    }

    #[test]
    fn test_normalize_category() {
        assert_eq!(normalize_category("  NSFW "), Some("nsfw".to_string()));
        assert_eq!(normalize_category("   "), None);
    }
}
