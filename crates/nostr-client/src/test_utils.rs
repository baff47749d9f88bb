//! Test utilities and fixtures for Nostr client testing
//!
//! This module provides deterministic keys and ids, builders for the event
//! kinds the moderation engine consumes, and in-memory doubles for the relay
//! transport and signer seams.

#![allow(dead_code)] // Shared by several test suites, not all use every helper

use crate::event::{kind, Event, Tag, UnsignedEvent};
use crate::relay::{
    Filter, PublishOutcome, RelayError, RelayTransport, Subscription, SubscriptionCallbacks,
};
use crate::signer::{Signer, SignerError};
use crate::types::{EventId, PubKey};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::watch;

/// Test keys for use in tests
pub mod pubkeys {
    use super::*;

    /// Key made of one repeated hex digit pair
    pub fn from_byte(byte: u8) -> PubKey {
        PubKey::parse(&format!("{:02x}", byte).repeat(32)).expect("fixture key is valid hex")
    }

    /// The logged-in viewer
    pub fn viewer() -> PubKey {
        from_byte(0x01)
    }

    /// Alice, a contact of the viewer
    pub fn alice() -> PubKey {
        from_byte(0xa1)
    }

    /// Bob, a contact of the viewer
    pub fn bob() -> PubKey {
        from_byte(0xb0)
    }

    /// Carol, a contact of the viewer in some tests
    pub fn carol() -> PubKey {
        from_byte(0xc0)
    }

    /// Someone nobody trusts
    pub fn stranger() -> PubKey {
        from_byte(0x5e)
    }

    /// An author that gets reported or muted
    pub fn author() -> PubKey {
        from_byte(0xee)
    }
}

/// Test event ids
pub mod event_ids {
    use super::*;

    /// Id of the n-th test video
    pub fn video(n: u8) -> EventId {
        EventId::parse(&format!("{:02x}", n).repeat(32)).expect("fixture id is valid hex")
    }
}

/// Timestamps relative to the wall clock
pub mod timestamps {
    /// Current unix time in seconds
    pub fn now() -> u64 {
        u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default()
    }

    /// `secs` seconds ago
    pub fn ago(secs: u64) -> u64 {
        now().saturating_sub(secs)
    }
}

/// Builders for signed-looking events with real NIP-01 ids
pub mod events {
    use super::*;

    /// Arbitrary event
    pub fn event(author: &PubKey, kind: u32, tags: Vec<Tag>, created_at: u64) -> Event {
        let unsigned = UnsignedEvent {
            pubkey: author.clone(),
            created_at,
            kind,
            tags,
            content: String::new(),
        };
        let id = unsigned.compute_id();
        unsigned.into_signed(id, "0".repeat(128))
    }

    /// Contact list naming `contacts`
    pub fn contact_list(author: &PubKey, contacts: &[PubKey], created_at: u64) -> Event {
        let tags = contacts.iter().map(|c| Tag::new(["p", c.as_str()])).collect();
        event(author, kind::CONTACT_LIST, tags, created_at)
    }

    /// Mute list naming `muted`
    pub fn mute_list(owner: &PubKey, muted: &[PubKey], created_at: u64) -> Event {
        let tags = muted.iter().map(|m| Tag::new(["p", m.as_str()])).collect();
        event(owner, kind::MUTE_LIST, tags, created_at)
    }

    /// Mute list whose entries carry a category
    pub fn mute_list_with_categories(
        owner: &PubKey,
        muted: &[(PubKey, &str)],
        created_at: u64,
    ) -> Event {
        let tags = muted
            .iter()
            .map(|(m, category)| Tag::new(["p", m.as_str(), "", *category]))
            .collect();
        event(owner, kind::MUTE_LIST, tags, created_at)
    }

    /// Report with the category carried inline on the `e` tag
    pub fn report(reporter: &PubKey, target: &EventId, category: &str, created_at: u64) -> Event {
        let tags = vec![Tag::new(["e", target.as_str(), category])];
        event(reporter, kind::REPORT, tags, created_at)
    }

    /// Report with an explicit `report` tag and accused author
    pub fn report_with_tags(
        reporter: &PubKey,
        target: &EventId,
        accused: &PubKey,
        category: &str,
        created_at: u64,
    ) -> Event {
        let tags = vec![
            Tag::new(["e", target.as_str()]),
            Tag::new(["p", accused.as_str()]),
            Tag::new(["report", category]),
        ];
        event(reporter, kind::REPORT, tags, created_at)
    }
}

/// How [`MockRelay`] answers publish requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishMode {
    /// Every write relay accepts
    AcceptAll,
    /// Every write relay answers `OK false`
    RejectAll,
    /// The transport itself fails
    Fail,
}

struct LiveSubscription {
    filters: Vec<Filter>,
    callbacks: SubscriptionCallbacks,
}

struct MockState {
    read_relays: Vec<String>,
    write_relays: Vec<String>,
    stored: Vec<Event>,
    live: HashMap<u64, LiveSubscription>,
    next_sub_id: u64,
    queries: Vec<Vec<Filter>>,
    failing_authors: HashSet<String>,
    failing_kinds: HashSet<u32>,
    fail_subscriptions: bool,
    publish_mode: PublishMode,
    published: Vec<Event>,
}

/// In-memory relay pool
///
/// Stores events, answers backfill queries by filter, tracks live
/// subscriptions and delivers [`MockRelay::emit`]ted events to the ones that
/// match. Queries can be held open with [`MockRelay::hold_queries`] to test
/// in-flight behaviour.
pub struct MockRelay {
    state: Arc<Mutex<MockState>>,
    gate: watch::Sender<bool>,
}

impl MockRelay {
    /// Create a relay pool with one read/write relay
    pub fn new() -> Self {
        Self::with_relays(vec!["wss://relay.test".to_string()], vec!["wss://relay.test".to_string()])
    }

    /// Create a relay pool with explicit read and write relays
    pub fn with_relays(read_relays: Vec<String>, write_relays: Vec<String>) -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            state: Arc::new(Mutex::new(MockState {
                read_relays,
                write_relays,
                stored: Vec::new(),
                live: HashMap::new(),
                next_sub_id: 0,
                queries: Vec::new(),
                failing_authors: HashSet::new(),
                failing_kinds: HashSet::new(),
                fail_subscriptions: false,
                publish_mode: PublishMode::AcceptAll,
                published: Vec::new(),
            })),
            gate,
        }
    }

    /// Store an event without notifying live subscriptions
    pub fn store(&self, event: Event) {
        self.state.lock().stored.push(event);
    }

    /// Store an event and deliver it to every matching live subscription
    pub fn emit(&self, event: Event) {
        let targets: Vec<SubscriptionCallbacks> = {
            let mut state = self.state.lock();
            state.stored.push(event.clone());
            state
                .live
                .values()
                .filter(|sub| sub.filters.iter().any(|f| f.matches(&event)))
                .map(|sub| sub.callbacks.clone())
                .collect()
        };
        for callbacks in targets {
            (callbacks.on_event)(event.clone());
        }
    }

    /// Make backfill queries wait until [`MockRelay::release_queries`]
    pub fn hold_queries(&self) {
        self.gate.send_replace(false);
    }

    /// Let held queries complete
    pub fn release_queries(&self) {
        self.gate.send_replace(true);
    }

    /// Fail queries whose filters name this author
    pub fn fail_queries_for(&self, author: &PubKey) {
        self.state.lock().failing_authors.insert(author.as_str().to_string());
    }

    /// Fail queries whose filters name this kind
    pub fn fail_queries_for_kind(&self, kind: u32) {
        self.state.lock().failing_kinds.insert(kind);
    }

    /// Fail every subsequent subscribe call
    pub fn fail_subscriptions(&self, fail: bool) {
        self.state.lock().fail_subscriptions = fail;
    }

    /// Change how publish requests are answered
    pub fn set_publish_mode(&self, mode: PublishMode) {
        self.state.lock().publish_mode = mode;
    }

    /// Replace the write relay list
    pub fn set_write_relays(&self, relays: Vec<String>) {
        self.state.lock().write_relays = relays;
    }

    /// Events successfully handed to publish
    pub fn published(&self) -> Vec<Event> {
        self.state.lock().published.clone()
    }

    /// Number of backfill queries issued so far
    pub fn query_count(&self) -> usize {
        self.state.lock().queries.len()
    }

    /// Number of open live subscriptions
    pub fn live_subscription_count(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Number of open live subscriptions for `kind` naming `author`
    pub fn live_subscriptions_for(&self, kind: u32, author: &PubKey) -> usize {
        self.state
            .lock()
            .live
            .values()
            .filter(|sub| {
                sub.filters.iter().any(|f| {
                    f.kinds.contains(&kind) && f.authors.iter().any(|a| a == author.as_str())
                })
            })
            .count()
    }

    /// Number of open live report subscriptions for a target
    pub fn live_report_subscriptions_for(&self, target: &EventId) -> usize {
        self.state
            .lock()
            .live
            .values()
            .filter(|sub| {
                sub.filters.iter().any(|f| {
                    f.kinds.contains(&kind::REPORT)
                        && f.event_refs.iter().any(|e| e == target.as_str())
                })
            })
            .count()
    }

    fn should_fail(state: &MockState, filters: &[Filter]) -> bool {
        filters.iter().any(|f| {
            f.authors.iter().any(|a| state.failing_authors.contains(a))
                || f.kinds.iter().any(|k| state.failing_kinds.contains(k))
        })
    }
}

impl Default for MockRelay {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelayTransport for MockRelay {
    fn read_relays(&self) -> Vec<String> {
        self.state.lock().read_relays.clone()
    }

    fn write_relays(&self) -> Vec<String> {
        self.state.lock().write_relays.clone()
    }

    async fn query_once(
        &self,
        _relays: &[String],
        filters: &[Filter],
    ) -> Result<Vec<Event>, RelayError> {
        self.state.lock().queries.push(filters.to_vec());

        let mut gate = self.gate.subscribe();
        if gate.wait_for(|open| *open).await.is_err() {
            return Err(RelayError::Closed);
        }

        let state = self.state.lock();
        if Self::should_fail(&state, filters) {
            return Err(RelayError::Unreachable("scripted failure".to_string()));
        }

        let mut results = Vec::new();
        for filter in filters {
            let mut matching: Vec<Event> =
                state.stored.iter().filter(|e| filter.matches(e)).cloned().collect();
            matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            if let Some(limit) = filter.limit {
                matching.truncate(limit);
            }
            results.extend(matching);
        }
        Ok(results)
    }

    fn subscribe(
        &self,
        _relays: &[String],
        filters: &[Filter],
        callbacks: SubscriptionCallbacks,
    ) -> Result<Subscription, RelayError> {
        let id = {
            let mut state = self.state.lock();
            if state.fail_subscriptions {
                return Err(RelayError::Unreachable("scripted failure".to_string()));
            }
            state.next_sub_id += 1;
            let id = state.next_sub_id;
            state.live.insert(
                id,
                LiveSubscription { filters: filters.to_vec(), callbacks: callbacks.clone() },
            );
            id
        };

        if let Some(eose) = &callbacks.on_end_of_stored {
            eose();
        }

        let state = Arc::downgrade(&self.state);
        Ok(Subscription::new(format!("mock-{}", id), move || {
            if let Some(state) = state.upgrade() {
                state.lock().live.remove(&id);
            }
        }))
    }

    async fn publish(
        &self,
        relays: &[String],
        event: &Event,
    ) -> Result<Vec<PublishOutcome>, RelayError> {
        let mut state = self.state.lock();
        match state.publish_mode {
            PublishMode::Fail => Err(RelayError::Timeout("scripted publish failure".to_string())),
            PublishMode::RejectAll => Ok(relays
                .iter()
                .map(|r| PublishOutcome::rejected(r.clone(), "blocked: scripted"))
                .collect()),
            PublishMode::AcceptAll => {
                state.published.push(event.clone());
                state.stored.push(event.clone());
                Ok(relays.iter().map(|r| PublishOutcome::accepted(r.clone())).collect())
            }
        }
    }
}

/// Signer double that computes real ids and fake signatures
pub struct MockSigner {
    pubkey: PubKey,
    failure: Mutex<Option<SignerError>>,
    signed: Mutex<Vec<Event>>,
}

impl MockSigner {
    /// Create a signer for `pubkey`
    pub fn new(pubkey: PubKey) -> Self {
        Self { pubkey, failure: Mutex::new(None), signed: Mutex::new(Vec::new()) }
    }

    /// Make every subsequent sign call fail with `error`
    pub fn fail_with(&self, error: SignerError) {
        *self.failure.lock() = Some(error);
    }

    /// Events signed so far
    pub fn signed(&self) -> Vec<Event> {
        self.signed.lock().clone()
    }
}

#[async_trait]
impl Signer for MockSigner {
    fn pubkey(&self) -> PubKey {
        self.pubkey.clone()
    }

    async fn sign_event(&self, event: UnsignedEvent) -> Result<Event, SignerError> {
        if let Some(error) = self.failure.lock().clone() {
            return Err(error);
        }
        let id = event.compute_id();
        let signed = event.into_signed(id, "0".repeat(128));
        self.signed.lock().push(signed.clone());
        Ok(signed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_fixture_keys_are_distinct() {
        let keys = [
            pubkeys::viewer(),
            pubkeys::alice(),
            pubkeys::bob(),
            pubkeys::carol(),
            pubkeys::stranger(),
            pubkeys::author(),
        ];
        let unique: HashSet<_> = keys.iter().collect();
        assert_eq!(unique.len(), keys.len());
    }

    #[test]
    fn test_report_builder_references_target() {
        let target = event_ids::video(7);
        let report = events::report(&pubkeys::alice(), &target, "spam", 10);
        assert_eq!(report.kind, kind::REPORT);
        assert!(Filter::new().event_ref(target.as_str()).matches(&report));
    }

    #[tokio::test]
    async fn test_mock_relay_query_respects_limit_and_order() {
        let relay = MockRelay::new();
        let alice = pubkeys::alice();
        relay.store(events::mute_list(&alice, &[], 100));
        relay.store(events::mute_list(&alice, &[pubkeys::bob()], 200));

        let filter = Filter::new().kind(kind::MUTE_LIST).author(alice.as_str()).limit(1);
        let events = relay.query_once(&relay.read_relays(), &[filter]).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].created_at, 200);
        assert_eq!(relay.query_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_relay_scripted_query_failure() {
        let relay = MockRelay::new();
        let alice = pubkeys::alice();
        relay.fail_queries_for(&alice);

        let filter = Filter::new().kind(kind::MUTE_LIST).author(alice.as_str());
        assert!(relay.query_once(&[], &[filter]).await.is_err());
    }

    #[test]
    fn test_mock_relay_emit_reaches_matching_subscription() {
        let relay = MockRelay::new();
        let alice = pubkeys::alice();
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&delivered);

        let filter = Filter::new().kind(kind::MUTE_LIST).author(alice.as_str());
        let sub = relay
            .subscribe(&[], &[filter], SubscriptionCallbacks::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert_eq!(relay.live_subscriptions_for(kind::MUTE_LIST, &alice), 1);

        relay.emit(events::mute_list(&alice, &[], 1));
        relay.emit(events::mute_list(&pubkeys::bob(), &[], 1));
        assert_eq!(delivered.load(Ordering::SeqCst), 1);

        sub.unsubscribe();
        assert_eq!(relay.live_subscription_count(), 0);
        relay.emit(events::mute_list(&alice, &[], 2));
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_mock_relay_publish_modes() {
        let relay = MockRelay::new();
        let event = events::mute_list(&pubkeys::alice(), &[], 1);
        let relays = relay.write_relays();

        let outcomes = relay.publish(&relays, &event).await.unwrap();
        assert_eq!(PublishOutcome::count_accepted(&outcomes), 1);

        relay.set_publish_mode(PublishMode::RejectAll);
        let outcomes = relay.publish(&relays, &event).await.unwrap();
        assert_eq!(PublishOutcome::count_accepted(&outcomes), 0);

        relay.set_publish_mode(PublishMode::Fail);
        assert!(relay.publish(&relays, &event).await.is_err());
        assert_eq!(relay.published().len(), 1);
    }

    #[tokio::test]
    async fn test_mock_signer_signs_and_fails() {
        let signer = MockSigner::new(pubkeys::viewer());
        let unsigned = UnsignedEvent::new(pubkeys::viewer(), kind::MUTE_LIST, vec![], "");
        let expected_id = unsigned.compute_id();

        let signed = signer.sign_event(unsigned.clone()).await.unwrap();
        assert_eq!(signed.id, expected_id);
        assert_eq!(signer.signed().len(), 1);

        signer.fail_with(SignerError::Rejected("nope".into()));
        assert!(signer.sign_event(unsigned).await.is_err());
    }
}
