//! Moderation service
//!
//! [`ModerationService`] ties the trust graph, the report book and the mute
//! index to a relay transport. It owns every live subscription the engine
//! needs: one for the viewer's contact list, one mute-list subscription per
//! trusted key and one report subscription per active target.
//!
//! One service is built per viewer session with its collaborators injected:
//!
//! ```rust,no_run
//! use moderation::{InMemoryBlockList, ModerationConfig, ModerationService, StaticAccessLists};
//! use nostr_client::{PubKey, RelayTransport};
//! use std::sync::Arc;
//!
//! async fn start(
//!     transport: Arc<dyn RelayTransport>,
//!     viewer: PubKey,
//! ) -> Result<(), Box<dyn std::error::Error>> {
//!     let service = ModerationService::new(
//!         ModerationConfig::default(),
//!         transport,
//!         Arc::new(StaticAccessLists::default()),
//!         Arc::new(InMemoryBlockList::new()),
//!     )?;
//!
//!     let mut changes = service.subscribe();
//!     service.set_viewer(Some(viewer)).await;
//!     while let Ok(change) = changes.recv().await {
//!         println!("moderation changed: {}", change.name());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Internal state sits behind one lock that is never held across an await
//! point or while calling into the transport. Aggregation itself is
//! synchronous; only backfills and publishes suspend.

use crate::access::{AccessControl, AccessSnapshot, AccessStatus};
use crate::assess::{self, AssessmentInputs, ContentAssessment};
use crate::blocks::{BlockAction, BlockChange, UserBlockList};
use crate::config::{self, ConfigError, ModerationConfig};
use crate::error::{ModerationError, Result};
use crate::events::ModerationEvent;
use crate::mutes::{MuteIndex, MuteIngest, TrustedMuteCounts};
use crate::parse;
use crate::queue::SerialQueue;
use crate::reports::{Recomputed, ReportBook, ReportSummary, TrustedReporter, VoteContext};
use crate::subscriptions::{SubscriptionRegistry, Token};
use crate::trust::{ContactEntry, TrustDelta, TrustGraph};
use nostr_client::{
    kind, Event, EventId, Filter, PubKey, PublishOutcome, RelayTransport, Signer, Subscription,
    SubscriptionCallbacks, Tag, UnsignedEvent,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};

/// Proof of a successful publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    /// The signed event
    pub event: Event,
    /// Number of relays that accepted it
    pub accepted: usize,
    /// Per-relay outcomes
    pub outcomes: Vec<PublishOutcome>,
}

/// Outcome of editing the viewer's mute list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MuteUpdate {
    /// The list was already in the requested state
    Unchanged,
    /// A new list was published
    Published(PublishReceipt),
}

/// A report to file on the viewer's behalf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRequest {
    /// Reported event
    pub target: EventId,
    /// Author of the reported event
    pub accused: PubKey,
    /// Report category (normalized before publishing)
    pub category: String,
    /// Relay where the reported event can be found
    pub relay_hint: Option<String>,
    /// Free-form explanation
    pub content: String,
}

impl ReportRequest {
    /// Create a report request
    pub fn new(target: EventId, accused: PubKey, category: impl Into<String>) -> Self {
        Self {
            target,
            accused,
            category: category.into(),
            relay_hint: None,
            content: String::new(),
        }
    }

    /// Attach a relay hint
    pub fn with_relay_hint(mut self, hint: impl Into<String>) -> Self {
        self.relay_hint = Some(hint.into());
        self
    }

    /// Attach an explanation
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }
}

struct ContactFetch {
    viewer: PubKey,
    generation: u64,
    done: watch::Receiver<bool>,
}

struct State {
    /// Bumped on every viewer change; stale async results compare against it
    generation: u64,
    trust: TrustGraph,
    seed_only: bool,
    mutes: MuteIndex,
    mute_subs: SubscriptionRegistry<PubKey>,
    reports: ReportBook,
    report_subs: SubscriptionRegistry<EventId>,
    /// Completion flags of report backfills, keyed like `report_subs`
    report_backfills: HashMap<EventId, watch::Receiver<bool>>,
    contact_sub: Option<Subscription>,
    fetch: Option<ContactFetch>,
}

struct Inner {
    config: ModerationConfig,
    runtime: Handle,
    transport: Arc<dyn RelayTransport>,
    access: Arc<dyn AccessControl>,
    blocks: Arc<dyn UserBlockList>,
    signer: RwLock<Option<Arc<dyn Signer>>>,
    state: RwLock<State>,
    events_tx: broadcast::Sender<ModerationEvent>,
    queue: SerialQueue,
    /// Block-list notifications handed to `queue`, against `blocks.revision()`
    block_changes_seen: watch::Sender<u64>,
    block_listener: Mutex<Option<JoinHandle<()>>>,
}

/// Trust-weighted moderation engine for one viewer session
#[derive(Clone)]
pub struct ModerationService {
    inner: Arc<Inner>,
}

impl ModerationService {
    /// Build a service
    ///
    /// Must be called from inside a tokio runtime; the block-list listener and
    /// the recompute queue run as background tasks on it.
    pub fn new(
        config: ModerationConfig,
        transport: Arc<dyn RelayTransport>,
        access: Arc<dyn AccessControl>,
        blocks: Arc<dyn UserBlockList>,
    ) -> config::Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;

        let (events_tx, _) = broadcast::channel(config.event_buffer_size);
        let block_rx = blocks.subscribe();
        let (block_changes_seen, _) = watch::channel(blocks.revision());
        let state = State {
            generation: 0,
            trust: TrustGraph::new(),
            seed_only: false,
            mutes: MuteIndex::new(config.trusted_mute_window_secs),
            mute_subs: SubscriptionRegistry::new(),
            reports: ReportBook::new(&config),
            report_subs: SubscriptionRegistry::new(),
            report_backfills: HashMap::new(),
            contact_sub: None,
            fetch: None,
        };

        let inner = Arc::new(Inner {
            queue: SerialQueue::spawn(&runtime),
            config,
            runtime,
            transport,
            access,
            blocks,
            signer: RwLock::new(None),
            state: RwLock::new(state),
            events_tx,
            block_changes_seen,
            block_listener: Mutex::new(None),
        });

        let listener =
            inner.runtime.spawn(Inner::block_listener_loop(Arc::downgrade(&inner), block_rx));
        *inner.block_listener.lock() = Some(listener);

        Ok(Self { inner })
    }

    /// Change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<ModerationEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Active configuration
    pub fn config(&self) -> &ModerationConfig {
        &self.inner.config
    }

    /// Connect or disconnect the signer used for publishing
    pub fn set_signer(&self, signer: Option<Arc<dyn Signer>>) {
        *self.inner.signer.write() = signer;
    }

    // ========================================================================
    // Trust graph
    // ========================================================================

    /// Log a viewer in or out
    ///
    /// Clears every per-viewer input and, for a new viewer, loads their
    /// newest contact list and keeps it live. Calls for the viewer that is
    /// already active share the in-flight load.
    pub async fn set_viewer(&self, viewer: Option<PubKey>) {
        self.inner.set_viewer(viewer).await;
    }

    /// Current viewer
    pub fn viewer(&self) -> Option<PubKey> {
        self.inner.state.read().trust.viewer().cloned()
    }

    /// Adopt a contact list event if it is the viewer's and newer
    pub async fn apply_contact_event(&self, event: &Event) -> bool {
        self.inner.apply_contact_event(event).await
    }

    /// Replace the operator's trusted seeds (hex or `npub`)
    pub async fn set_trusted_seeds<I, S>(&self, seeds: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let seeds: Vec<PubKey> = seeds
            .into_iter()
            .filter_map(|seed| match PubKey::parse(seed.as_ref()) {
                Ok(key) => Some(key),
                Err(err) => {
                    tracing::trace!(error = %err, "ignoring malformed trusted seed");
                    None
                }
            })
            .collect();
        let access = self.inner.access_snapshot();
        let delta = self.inner.state.write().trust.set_seeds(seeds, &access);
        self.inner.apply_trust_delta(delta).await;
    }

    /// Whether trust currently comes from seeds alone
    pub fn is_trusted_seed_only(&self) -> bool {
        self.inner.state.read().seed_only
    }

    /// Whether a key is in the trusted set
    pub fn is_trusted(&self, key: &PubKey) -> bool {
        self.inner.state.read().trust.is_trusted(key)
    }

    /// The trusted set, sorted
    pub fn trusted_keys(&self) -> Vec<PubKey> {
        self.inner.state.read().trust.trusted().iter().cloned().collect()
    }

    /// The viewer's contacts
    pub fn viewer_contacts(&self, include_viewer: bool) -> Vec<ContactEntry> {
        self.inner.state.read().trust.contact_entries(include_viewer)
    }

    /// Make sure a viewer's contact list is loaded and return it
    ///
    /// A different key switches viewer. Otherwise an in-flight load is
    /// awaited, or a new one started when no contact list has arrived yet.
    pub async fn ensure_viewer_contacts_loaded(&self, viewer: Option<PubKey>) -> Vec<ContactEntry> {
        let current = self.viewer();
        match viewer {
            Some(key) if current.as_ref() != Some(&key) => self.set_viewer(Some(key)).await,
            _ => {
                if let Some(current) = current {
                    let (generation, missing) = {
                        let state = self.inner.state.read();
                        (state.generation, state.trust.contact_revision().is_none())
                    };
                    self.inner.load_contacts(current, generation, missing).await;
                }
            }
        }
        self.viewer_contacts(false)
    }

    /// Keys whose mute lists are currently subscribed
    pub fn watched_mute_owners(&self) -> Vec<PubKey> {
        self.inner.state.read().mute_subs.keys()
    }

    // ========================================================================
    // Access control
    // ========================================================================

    /// Fresh snapshot of the admin lists
    pub fn access_snapshot(&self) -> AccessSnapshot {
        self.inner.access_snapshot()
    }

    /// Classify a key (hex or `npub`) against the admin lists
    pub fn access_status(&self, key: &str) -> AccessStatus {
        self.inner.access_snapshot().classify(key)
    }

    // ========================================================================
    // Reports
    // ========================================================================

    /// Declare the targets the UI currently shows
    ///
    /// Targets that left the set are unsubscribed and forgotten before this
    /// returns. New targets are backfilled and then followed live; targets
    /// still backfilling for an earlier call are waited on.
    pub async fn set_active_targets<I>(&self, targets: I)
    where
        I: IntoIterator<Item = EventId>,
    {
        self.inner.set_active_targets(targets.into_iter().collect()).await;
    }

    /// Targets with a report subscription
    pub fn active_targets(&self) -> Vec<EventId> {
        self.inner.state.read().report_subs.keys()
    }

    /// Ingest a report event
    ///
    /// Reports for targets that are not active are dropped.
    pub fn ingest_report(&self, event: &Event) -> bool {
        self.inner.ingest_report(event)
    }

    /// Report summary for a target; zeroed if unknown
    pub fn summary(&self, target: &EventId) -> ReportSummary {
        self.inner.state.read().reports.summary(target)
    }

    /// Trusted reporters of a target, newest first
    pub fn trusted_reporters(
        &self,
        target: &EventId,
        category: Option<&str>,
    ) -> Vec<TrustedReporter> {
        let category = category.and_then(parse::normalize_category);
        let access = self.inner.access_snapshot();
        let state = self.inner.state.read();
        let ctx = VoteContext {
            access: &access,
            trusted: state.trust.trusted(),
            blocks: self.inner.blocks.as_ref(),
        };
        state.reports.trusted_reporters(target, category.as_deref(), &ctx)
    }

    /// Trusted votes for one category of a target
    pub fn trusted_report_count(&self, target: &EventId, category: &str) -> u32 {
        match parse::normalize_category(category) {
            Some(category) => self.inner.state.read().reports.trusted_count(target, &category),
            None => 0,
        }
    }

    /// Sign, publish and locally ingest a report
    ///
    /// The local copy only counts while the target is active.
    pub async fn submit_report(&self, request: ReportRequest) -> Result<PublishReceipt> {
        let category = parse::normalize_category(&request.category)
            .ok_or_else(|| ModerationError::InvalidCategory(request.category.clone()))?;
        let viewer = self.viewer().ok_or(ModerationError::NotLoggedIn)?;

        let mut target_tag = vec!["e".to_string(), request.target.to_string(), category.clone()];
        if let Some(hint) = request.relay_hint.filter(|hint| !hint.trim().is_empty()) {
            target_tag.push(hint);
        }
        let tags = vec![
            Tag(target_tag),
            Tag::new(["p", request.accused.as_str(), category.as_str()]),
            Tag::new(["t", category.as_str()]),
        ];
        let unsigned = UnsignedEvent::new(viewer, kind::REPORT, tags, request.content);

        let receipt = self.inner.sign_and_publish(unsigned).await?;
        self.inner.ingest_report(&receipt.event);
        Ok(receipt)
    }

    // ========================================================================
    // Mutes
    // ========================================================================

    /// Ingest a mute list event from a trusted owner
    pub fn ingest_mute_list_event(&self, event: &Event) -> bool {
        self.inner.ingest_mute_list_event(event)
    }

    /// Whether any trusted key mutes `author`
    pub fn is_muted_by_trusted(&self, author: &PubKey) -> bool {
        self.inner.state.write().mutes.is_muted(author, now_secs())
    }

    /// Trusted keys muting `author`, sorted
    pub fn muters_of(&self, author: &PubKey) -> Vec<PubKey> {
        self.inner.state.write().mutes.muters_of(author, now_secs())
    }

    /// Trusted muter totals for `author`
    pub fn trusted_mute_counts(&self, author: &PubKey) -> TrustedMuteCounts {
        self.inner.state.write().mutes.counts(author, now_secs())
    }

    /// Whether the viewer's own mute list names `author`
    pub fn is_muted_by_viewer(&self, author: &PubKey) -> bool {
        let state = self.inner.state.read();
        state
            .trust
            .viewer()
            .is_some_and(|viewer| state.mutes.owner_mutes(viewer, author))
    }

    /// Authors on the viewer's own mute list
    pub fn viewer_muted_authors(&self) -> Vec<PubKey> {
        let state = self.inner.state.read();
        state
            .trust
            .viewer()
            .map(|viewer| state.mutes.list_of(viewer))
            .unwrap_or_default()
    }

    /// Publish a replacement for the viewer's mute list
    ///
    /// At least one write relay must accept the event. On success the list is
    /// applied locally right away; on failure nothing changes.
    pub async fn publish_viewer_mute_list<I>(&self, authors: I) -> Result<PublishReceipt>
    where
        I: IntoIterator<Item = PubKey>,
    {
        let viewer = self.viewer().ok_or(ModerationError::NotLoggedIn)?;
        let previous = self
            .inner
            .state
            .read()
            .mutes
            .revision_of(&viewer)
            .map(|revision| revision.created_at);

        let authors: BTreeSet<PubKey> = authors.into_iter().filter(|a| *a != viewer).collect();
        let tags = authors.iter().map(|author| Tag::new(["p", author.as_str()])).collect();
        let mut unsigned = UnsignedEvent::new(viewer, kind::MUTE_LIST, tags, "");
        if let Some(previous) = previous {
            // Replaceable events must move forward even within the same second
            unsigned.created_at = unsigned.created_at.max(previous + 1);
        }

        let receipt = self.inner.sign_and_publish(unsigned).await?;
        self.inner.ingest_mute_list_event(&receipt.event);
        Ok(receipt)
    }

    /// Add an author (hex or `npub`) to the viewer's mute list
    pub async fn add_author_to_viewer_mute_list(&self, author: &str) -> Result<MuteUpdate> {
        let (author, mut authors) = self.prepare_mute_edit(author)?;
        if !authors.insert(author) {
            return Ok(MuteUpdate::Unchanged);
        }
        self.publish_viewer_mute_list(authors).await.map(MuteUpdate::Published)
    }

    /// Remove an author (hex or `npub`) from the viewer's mute list
    pub async fn remove_author_from_viewer_mute_list(&self, author: &str) -> Result<MuteUpdate> {
        let (author, mut authors) = self.prepare_mute_edit(author)?;
        if !authors.remove(&author) {
            return Ok(MuteUpdate::Unchanged);
        }
        self.publish_viewer_mute_list(authors).await.map(MuteUpdate::Published)
    }

    fn prepare_mute_edit(&self, author: &str) -> Result<(PubKey, BTreeSet<PubKey>)> {
        let author =
            PubKey::parse(author).map_err(|_| ModerationError::InvalidTarget(author.to_string()))?;
        let viewer = self.viewer().ok_or(ModerationError::NotLoggedIn)?;
        if author == viewer {
            return Err(ModerationError::SelfTarget);
        }
        Ok((author, self.viewer_muted_authors().into_iter().collect()))
    }

    // ========================================================================
    // Blocks and assessment
    // ========================================================================

    /// Wait until every pending block-list recompute has finished
    pub async fn await_block_refresh(&self) {
        let sent = self.inner.blocks.revision();
        let mut seen = self.inner.block_changes_seen.subscribe();
        let _ = seen.wait_for(|seen| *seen >= sent).await;
        self.inner.queue.flush().await;
    }

    /// Combine every signal for one piece of content
    pub fn assess(&self, target: &EventId, author: &PubKey) -> ContentAssessment {
        let access = self.inner.access_snapshot();
        let blocked = self.inner.blocks.is_blocked(author);
        let now = now_secs();

        let inputs = {
            let mut guard = self.inner.state.write();
            let state = &mut *guard;
            let viewer = state.trust.viewer().cloned();
            let viewer_muted =
                viewer.as_ref().is_some_and(|viewer| state.mutes.owner_mutes(viewer, author));
            let trusted_muters = state
                .mutes
                .muters_of(author, now)
                .into_iter()
                .filter(|muter| Some(muter) != viewer.as_ref())
                .count();
            let top_report = state
                .reports
                .summary(target)
                .top_category()
                .map(|(category, tally)| (category.to_string(), tally.trusted));
            AssessmentInputs {
                blacklisted: access.is_blacklisted(author),
                blocked,
                viewer_muted,
                top_report,
                trusted_muters,
            }
        };

        assess::assess(&inputs, &self.inner.config)
    }
}

impl Inner {
    fn access_snapshot(&self) -> AccessSnapshot {
        AccessSnapshot::capture(self.access.as_ref())
    }

    fn emit(&self, events: Vec<ModerationEvent>) {
        for event in events {
            // No receivers is fine
            let _ = self.events_tx.send(event);
        }
    }

    fn is_generation(&self, generation: u64) -> bool {
        self.state.read().generation == generation
    }

    // ------------------------------------------------------------------------
    // Viewer and contacts
    // ------------------------------------------------------------------------

    async fn set_viewer(self: &Arc<Self>, viewer: Option<PubKey>) {
        let (generation, switched) = {
            let mut state = self.state.write();
            if viewer.is_some() && state.trust.viewer() == viewer.as_ref() {
                (state.generation, None)
            } else {
                state.generation += 1;
                state.fetch = None;
                let closed = state.contact_sub.take();
                let delta = state.trust.set_viewer(viewer.clone());
                (state.generation, Some((delta, closed)))
            }
        };

        if let Some((delta, closed)) = switched {
            drop(closed);
            tracing::info!(
                viewer = viewer.as_ref().map(PubKey::as_str).unwrap_or("none"),
                "moderation viewer changed"
            );
            self.apply_trust_delta(delta).await;
        }

        if let Some(viewer) = viewer {
            self.load_contacts(viewer, generation, false).await;
        }
    }

    /// Start or join the contact load for `viewer`
    ///
    /// With `refresh`, a load that already finished is started again.
    async fn load_contacts(self: &Arc<Self>, viewer: PubKey, generation: u64, refresh: bool) {
        let mut done = {
            let mut state = self.state.write();
            if state.generation != generation {
                return;
            }
            let shared = state
                .fetch
                .as_ref()
                .filter(|fetch| fetch.viewer == viewer && fetch.generation == generation)
                .filter(|fetch| !refresh || !*fetch.done.borrow())
                .map(|fetch| fetch.done.clone());
            match shared {
                Some(done) => done,
                None => {
                    let (done_tx, done_rx) = watch::channel(false);
                    state.fetch = Some(ContactFetch {
                        viewer: viewer.clone(),
                        generation,
                        done: done_rx.clone(),
                    });
                    let inner = Arc::clone(self);
                    self.runtime.spawn(async move {
                        inner.fetch_contacts(viewer, generation).await;
                        let _ = done_tx.send(true);
                    });
                    done_rx
                }
            }
        };
        let _ = done.wait_for(|finished| *finished).await;
    }

    async fn fetch_contacts(self: &Arc<Self>, viewer: PubKey, generation: u64) {
        if let Err(err) = self.blocks.ensure_loaded(&viewer).await {
            tracing::warn!(viewer = %viewer, error = %err, "block list load failed");
        }

        let relays = self.transport.read_relays();
        let filter = Filter::new().kind(kind::CONTACT_LIST).author(viewer.as_str());
        let events = match self.transport.query_once(&relays, &[filter.clone().limit(1)]).await {
            Ok(events) => events,
            Err(err) => {
                tracing::warn!(viewer = %viewer, error = %err, "contact list backfill failed");
                Vec::new()
            }
        };

        if !self.is_generation(generation) {
            tracing::trace!(viewer = %viewer, "discarding contact backfill for previous viewer");
            return;
        }
        let newest = events
            .into_iter()
            .filter(|event| event.kind == kind::CONTACT_LIST)
            .max_by_key(Event::revision);
        if let Some(newest) = newest {
            self.apply_contact_event(&newest).await;
        }
        if !self.is_generation(generation) {
            return;
        }

        let weak = Arc::downgrade(self);
        let runtime = self.runtime.clone();
        let callbacks = SubscriptionCallbacks::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                runtime.spawn(async move {
                    inner.apply_contact_event(&event).await;
                });
            }
        });
        match self.transport.subscribe(&relays, &[filter], callbacks) {
            Ok(handle) => {
                let stale = {
                    let mut state = self.state.write();
                    if state.generation == generation {
                        state.contact_sub = Some(handle);
                        None
                    } else {
                        Some(handle)
                    }
                };
                if stale.is_none() {
                    tracing::debug!(viewer = %viewer, "contact list subscription opened");
                }
            }
            Err(err) => {
                tracing::warn!(viewer = %viewer, error = %err, "contact list subscription failed");
            }
        }
    }

    async fn apply_contact_event(self: &Arc<Self>, event: &Event) -> bool {
        let list = match parse::contact_list(event) {
            Ok(list) => list,
            Err(reason) => {
                tracing::trace!(event_id = %event.id, %reason, "contact list discarded");
                return false;
            }
        };
        let delta = {
            let mut state = self.state.write();
            match state.trust.apply_contacts(list) {
                Some(delta) => delta,
                None => {
                    tracing::trace!(event_id = %event.id, "stale or foreign contact list ignored");
                    return false;
                }
            }
        };
        self.apply_trust_delta(delta).await;
        true
    }

    /// Reconcile mute subscriptions and summaries with the trusted set
    async fn apply_trust_delta(self: &Arc<Self>, delta: TrustDelta) {
        let access = self.access_snapshot();
        let mut closed = Vec::new();
        let (added, events) = {
            let mut guard = self.state.write();
            let state = &mut *guard;

            let wanted = state.trust.trusted().clone();
            let reconciled = state.mute_subs.reconcile(&wanted, &mut closed);
            let mut purged = false;
            for owner in delta.removed.iter().chain(reconciled.removed.iter()) {
                purged |= state.mutes.purge_owner(owner);
            }

            let mut events = vec![ModerationEvent::Contacts { size: wanted.len() }];
            if purged {
                events.push(ModerationEvent::TrustedMutes {
                    total: state.mutes.muted_author_count(),
                    owner: None,
                });
            }

            let ctx = VoteContext {
                access: &access,
                trusted: state.trust.trusted(),
                blocks: self.blocks.as_ref(),
            };
            for recomputed in state.reports.recompute_all(&ctx) {
                push_recomputed(recomputed, &mut events);
            }

            let seed_only = state.trust.is_seed_only();
            if seed_only != state.seed_only {
                state.seed_only = seed_only;
                events.push(ModerationEvent::TrustedSeedOnly { seed_only });
            }
            (reconciled.added, events)
        };
        drop(closed);

        tracing::debug!(
            added = delta.added.len(),
            removed = delta.removed.len(),
            "trusted set reconciled"
        );
        self.emit(events);
        self.open_mute_subscriptions(added).await;
    }

    // ------------------------------------------------------------------------
    // Mute lists
    // ------------------------------------------------------------------------

    async fn open_mute_subscriptions(self: &Arc<Self>, owners: Vec<(PubKey, Token)>) {
        let mut tasks = JoinSet::new();
        for (owner, token) in owners {
            let inner = Arc::clone(self);
            tasks.spawn_on(
                async move { inner.open_mute_subscription(owner, token).await },
                &self.runtime,
            );
        }
        while tasks.join_next().await.is_some() {}
    }

    async fn open_mute_subscription(self: &Arc<Self>, owner: PubKey, token: Token) {
        let relays = self.transport.read_relays();
        let filter = Filter::new().kind(kind::MUTE_LIST).author(owner.as_str());

        match self.transport.query_once(&relays, &[filter.clone()]).await {
            Ok(events) => {
                for event in &events {
                    self.ingest_mute_list_event(event);
                }
            }
            Err(err) => {
                tracing::warn!(
                    owner = %owner,
                    error = %err,
                    "mute list backfill failed; treating as empty"
                );
            }
        }

        if !self.state.read().mute_subs.is_current(&owner, token) {
            tracing::trace!(owner = %owner, "owner left the trusted set during backfill");
            return;
        }

        let weak = Arc::downgrade(self);
        let callbacks = SubscriptionCallbacks::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.ingest_mute_list_event(&event);
            }
        });
        match self.transport.subscribe(&relays, &[filter], callbacks) {
            Ok(handle) => {
                let rejected = self.state.write().mute_subs.attach(&owner, token, handle);
                if rejected.is_some() {
                    tracing::trace!(owner = %owner, "closing mute subscription for departed owner");
                } else {
                    tracing::debug!(owner = %owner, "mute list subscription opened");
                }
            }
            Err(err) => {
                tracing::warn!(owner = %owner, error = %err, "mute list subscription failed");
            }
        }
    }

    fn ingest_mute_list_event(&self, event: &Event) -> bool {
        let list = match parse::mute_list(event) {
            Ok(list) => list,
            Err(reason) => {
                tracing::trace!(event_id = %event.id, %reason, "mute list discarded");
                return false;
            }
        };
        let owner = list.owner.clone();

        let total = {
            let mut state = self.state.write();
            if !state.trust.is_trusted(&owner) {
                tracing::trace!(owner = %owner, "mute list from untrusted owner ignored");
                return false;
            }
            match state.mutes.ingest(list, now_secs()) {
                MuteIngest::Stale => {
                    tracing::trace!(owner = %owner, "stale mute list ignored");
                    return false;
                }
                MuteIngest::Applied { added, removed } => {
                    tracing::debug!(
                        owner = %owner,
                        added = added.len(),
                        removed = removed.len(),
                        "trusted mute list applied"
                    );
                    state.mutes.muted_author_count()
                }
            }
        };

        self.emit(vec![ModerationEvent::TrustedMutes { total, owner: Some(owner) }]);
        true
    }

    // ------------------------------------------------------------------------
    // Reports
    // ------------------------------------------------------------------------

    async fn set_active_targets(self: &Arc<Self>, wanted: BTreeSet<EventId>) {
        let mut closed = Vec::new();
        let (started, in_flight, events) = {
            let mut guard = self.state.write();
            let state = &mut *guard;
            let reconciled = state.report_subs.reconcile(&wanted, &mut closed);
            let mut events = Vec::new();
            let mut dropped: BTreeSet<EventId> = reconciled.removed.iter().cloned().collect();
            dropped.extend(
                state.reports.targets().into_iter().filter(|target| !wanted.contains(target)),
            );
            for target in dropped {
                state.report_backfills.remove(&target);
                let crossings = state.reports.remove_target(&target);
                events.push(ModerationEvent::Summary { target, summary: None });
                events.extend(crossings.into_iter().map(ModerationEvent::Threshold));
            }

            // Kept targets may still be backfilling for an earlier call
            let in_flight: Vec<watch::Receiver<bool>> = state
                .report_backfills
                .values()
                .filter(|done| !*done.borrow())
                .cloned()
                .collect();

            let mut started = Vec::with_capacity(reconciled.added.len());
            for (target, token) in reconciled.added {
                let (done_tx, done_rx) = watch::channel(false);
                state.report_backfills.insert(target.clone(), done_rx);
                started.push((target, token, done_tx));
            }
            tracing::debug!(
                added = started.len(),
                removed = reconciled.removed.len(),
                in_flight = in_flight.len(),
                "active targets reconciled"
            );
            (started, in_flight, events)
        };
        drop(closed);
        self.emit(events);

        let mut tasks = JoinSet::new();
        for (target, token, done_tx) in started {
            let inner = Arc::clone(self);
            tasks.spawn_on(
                async move {
                    inner.open_report_subscription(target, token).await;
                    let _ = done_tx.send(true);
                },
                &self.runtime,
            );
        }
        while tasks.join_next().await.is_some() {}
        for mut done in in_flight {
            let _ = done.wait_for(|finished| *finished).await;
        }
    }

    async fn open_report_subscription(self: &Arc<Self>, target: EventId, token: Token) {
        let relays = self.transport.read_relays();
        let filter = Filter::new().kind(kind::REPORT).event_ref(target.as_str());
        let backfill = filter.clone().limit(self.config.report_backfill_limit);

        let events = match self.transport.query_once(&relays, &[backfill]).await {
            Ok(events) => events,
            Err(err) => {
                tracing::warn!(event_id = %target, error = %err, "report backfill failed");
                Vec::new()
            }
        };

        let access = self.access_snapshot();
        let notifications = {
            let mut guard = self.state.write();
            let state = &mut *guard;
            if !state.report_subs.is_current(&target, token) {
                tracing::trace!(event_id = %target, "discarding backfill for inactive target");
                return;
            }
            let mut changed = false;
            for event in &events {
                match parse::report(event) {
                    Ok(report) if report.target == target => {
                        changed |= state.reports.upsert(report);
                    }
                    Ok(_) => {}
                    Err(reason) => {
                        tracing::trace!(event_id = %event.id, %reason, "report discarded");
                    }
                }
            }
            let mut notifications = Vec::new();
            if changed {
                let ctx = VoteContext {
                    access: &access,
                    trusted: state.trust.trusted(),
                    blocks: self.blocks.as_ref(),
                };
                push_recomputed(state.reports.recompute(&target, &ctx), &mut notifications);
            }
            notifications
        };
        self.emit(notifications);

        let weak = Arc::downgrade(self);
        let callbacks = SubscriptionCallbacks::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.ingest_report(&event);
            }
        });
        match self.transport.subscribe(&relays, &[filter], callbacks) {
            Ok(handle) => {
                let rejected = self.state.write().report_subs.attach(&target, token, handle);
                if rejected.is_some() {
                    tracing::trace!(event_id = %target, "closing subscription for inactive target");
                } else {
                    tracing::debug!(event_id = %target, "report subscription opened");
                }
            }
            Err(err) => {
                tracing::warn!(event_id = %target, error = %err, "report subscription failed");
            }
        }
    }

    fn ingest_report(&self, event: &Event) -> bool {
        let report = match parse::report(event) {
            Ok(report) => report,
            Err(reason) => {
                tracing::trace!(event_id = %event.id, %reason, "report discarded");
                return false;
            }
        };
        let target = report.target.clone();
        let access = self.access_snapshot();

        let events = {
            let mut guard = self.state.write();
            let state = &mut *guard;
            if !state.report_subs.contains(&target) {
                tracing::trace!(event_id = %target, "report for inactive target ignored");
                return false;
            }
            if !state.reports.upsert(report) {
                tracing::trace!(event_id = %event.id, "duplicate or older report ignored");
                return false;
            }
            let ctx = VoteContext {
                access: &access,
                trusted: state.trust.trusted(),
                blocks: self.blocks.as_ref(),
            };
            let mut events = Vec::new();
            push_recomputed(state.reports.recompute(&target, &ctx), &mut events);
            events
        };

        self.emit(events);
        true
    }

    fn recompute_all_summaries(&self) -> Vec<ModerationEvent> {
        let access = self.access_snapshot();
        let mut guard = self.state.write();
        let state = &mut *guard;
        let ctx = VoteContext {
            access: &access,
            trusted: state.trust.trusted(),
            blocks: self.blocks.as_ref(),
        };
        let mut events = Vec::new();
        for recomputed in state.reports.recompute_all(&ctx) {
            push_recomputed(recomputed, &mut events);
        }
        events
    }

    // ------------------------------------------------------------------------
    // Block list cascade
    // ------------------------------------------------------------------------

    async fn block_listener_loop(
        weak: Weak<Inner>,
        mut block_rx: broadcast::Receiver<BlockChange>,
    ) {
        loop {
            let (change, received) = match block_rx.recv().await {
                Ok(change) => (change, 1),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "block list notifications lagged; resyncing");
                    (BlockChange { action: BlockAction::Sync, target: None }, skipped)
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let Some(inner) = weak.upgrade() else {
                break;
            };
            inner.enqueue_block_refresh(change);
            inner.block_changes_seen.send_modify(|seen| *seen += received);
        }
    }

    fn enqueue_block_refresh(self: &Arc<Self>, change: BlockChange) {
        let weak = Arc::downgrade(self);
        self.queue.enqueue(async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let mut events = inner.recompute_all_summaries();
            tracing::debug!(
                action = ?change.action,
                summaries = events.len(),
                "summaries recomputed after block list change"
            );
            events.push(ModerationEvent::UserBlocks {
                action: change.action,
                target: change.target,
            });
            inner.emit(events);
        });
    }

    // ------------------------------------------------------------------------
    // Publishing
    // ------------------------------------------------------------------------

    async fn sign_and_publish(&self, unsigned: UnsignedEvent) -> Result<PublishReceipt> {
        let signer = self.signer.read().clone().ok_or(ModerationError::SignerUnavailable)?;
        let relays = self.transport.write_relays();
        if relays.is_empty() {
            return Err(ModerationError::NoWriteRelays);
        }

        let event = signer.sign_event(unsigned).await.map_err(|err| {
            tracing::warn!(error = %err, "signing failed");
            ModerationError::from(err)
        })?;

        let outcomes = match self.transport.publish(&relays, &event).await {
            Ok(outcomes) => outcomes,
            Err(err) => {
                tracing::warn!(event_id = %event.id, error = %err, "publish failed");
                Vec::new()
            }
        };
        let accepted = PublishOutcome::count_accepted(&outcomes);
        if accepted == 0 {
            tracing::warn!(
                event_id = %event.id,
                attempted = relays.len(),
                "no relay accepted event"
            );
            return Err(ModerationError::PublishRejected { accepted, attempted: relays.len() });
        }

        tracing::debug!(event_id = %event.id, kind = event.kind, accepted, "event published");
        Ok(PublishReceipt { event, accepted, outcomes })
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(listener) = self.block_listener.get_mut().take() {
            listener.abort();
        }
    }
}

fn push_recomputed(recomputed: Recomputed, events: &mut Vec<ModerationEvent>) {
    events.push(ModerationEvent::Summary {
        target: recomputed.target,
        summary: recomputed.summary,
    });
    events.extend(recomputed.crossings.into_iter().map(ModerationEvent::Threshold));
}

fn now_secs() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default()
}
