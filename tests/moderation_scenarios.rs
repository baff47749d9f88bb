//! Moderation Scenario Tests
//!
//! End-to-end checks of the aggregation guarantees: idempotent ingestion,
//! per-reporter deduplication, the blacklist and block vetoes, mute
//! aggregation and edge-triggered thresholds.

use nostr_client::test_utils::{event_ids, events, pubkeys, timestamps, MockRelay};
use nostr_moderation::moderation::{
    CategoryTally, InMemoryBlockList, StaticAccessLists, ThresholdAction,
};
use nostr_moderation::{EventId, ModerationConfig, ModerationEvent, ModerationService, PubKey};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

struct Fixture {
    relay: Arc<MockRelay>,
    access: Arc<StaticAccessLists>,
    blocks: Arc<InMemoryBlockList>,
    service: ModerationService,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Service whose viewer trusts `contacts`
async fn fixture_trusting(contacts: &[PubKey]) -> Fixture {
    init_tracing();
    let relay = Arc::new(MockRelay::new());
    let access = Arc::new(StaticAccessLists::default());
    let blocks = Arc::new(InMemoryBlockList::new());
    let service = ModerationService::new(
        ModerationConfig::default(),
        relay.clone(),
        access.clone(),
        blocks.clone(),
    )
    .unwrap();

    let viewer = pubkeys::viewer();
    relay.store(events::contact_list(&viewer, contacts, timestamps::ago(3600)));
    service.set_viewer(Some(viewer)).await;
    Fixture { relay, access, blocks, service }
}

async fn watch_target(fixture: &Fixture, target: &EventId) {
    fixture.service.set_active_targets([target.clone()]).await;
}

fn tally(service: &ModerationService, target: &EventId, category: &str) -> CategoryTally {
    service.summary(target).category(category).copied().unwrap_or_default()
}

/// Wait for the change stream to report a processed block-list change
async fn wait_for_block_refresh(rx: &mut broadcast::Receiver<ModerationEvent>) {
    let refreshed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(ModerationEvent::UserBlocks { .. }) => break,
                Ok(_) => continue,
                Err(err) => panic!("change stream failed: {err}"),
            }
        }
    })
    .await;
    assert!(refreshed.is_ok(), "block list change was never processed");
}

fn count_threshold(received: &[ModerationEvent], action: ThresholdAction) -> usize {
    received
        .iter()
        .filter(|event| matches!(event, ModerationEvent::Threshold(c) if c.action == action))
        .count()
}

fn drain(rx: &mut broadcast::Receiver<ModerationEvent>) -> Vec<ModerationEvent> {
    let mut received = Vec::new();
    while let Ok(event) = rx.try_recv() {
        received.push(event);
    }
    received
}

// =============================================================================
// Report Aggregation
// =============================================================================

#[tokio::test]
async fn test_ingesting_same_report_twice_is_idempotent() {
    let f = fixture_trusting(&[pubkeys::alice()]).await;
    let target = event_ids::video(1);
    watch_target(&f, &target).await;

    let report = events::report(&pubkeys::alice(), &target, "spam", 100);
    f.service.ingest_report(&report);
    let once = f.service.summary(&target);
    f.service.ingest_report(&report);
    let twice = f.service.summary(&target);

    assert_eq!(once.categories, twice.categories);
    assert_eq!(twice.total_trusted, 1);
}

#[tokio::test]
async fn test_newer_report_from_same_reporter_replaces_older() {
    let f = fixture_trusting(&[pubkeys::alice()]).await;
    let target = event_ids::video(2);
    watch_target(&f, &target).await;

    f.service.ingest_report(&events::report(&pubkeys::alice(), &target, "spam", 100));
    f.service.ingest_report(&events::report(&pubkeys::alice(), &target, "spam", 150));
    // Arriving late does not roll the vote back
    f.service.ingest_report(&events::report(&pubkeys::alice(), &target, "spam", 120));

    let spam = tally(&f.service, &target, "spam");
    assert_eq!(spam.trusted, 1);
    assert_eq!(spam.total, 1);
    assert_eq!(spam.latest, 150);
}

#[tokio::test]
async fn test_blacklisted_reporter_never_counts() {
    let f = fixture_trusting(&[pubkeys::alice(), pubkeys::bob()]).await;
    f.access.set_blacklist(vec![pubkeys::alice().to_npub().unwrap()]);
    let target = event_ids::video(3);
    watch_target(&f, &target).await;

    f.service.ingest_report(&events::report(&pubkeys::alice(), &target, "illegal", 100));
    f.service.ingest_report(&events::report(&pubkeys::bob(), &target, "illegal", 200));

    let illegal = tally(&f.service, &target, "illegal");
    assert_eq!(illegal.trusted, 1);
    assert_eq!(illegal.total, 1);
    assert_eq!(illegal.latest, 200);
}

#[tokio::test]
async fn test_whitelisted_stranger_counts_as_trusted() {
    let f = fixture_trusting(&[]).await;
    f.access.set_whitelist(vec![pubkeys::stranger().to_string()]);
    let target = event_ids::video(4);
    watch_target(&f, &target).await;

    f.service.ingest_report(&events::report(&pubkeys::stranger(), &target, "spam", 100));

    assert_eq!(tally(&f.service, &target, "spam").trusted, 1);
}

#[tokio::test]
async fn test_block_veto_is_reversible() {
    let f = fixture_trusting(&[pubkeys::alice(), pubkeys::bob()]).await;
    let target = event_ids::video(5);
    watch_target(&f, &target).await;
    f.service.ingest_report(&events::report(&pubkeys::alice(), &target, "nudity", 100));
    f.service.ingest_report(&events::report(&pubkeys::bob(), &target, "nudity", 200));
    let before = f.service.summary(&target);

    let mut rx = f.service.subscribe();
    f.blocks.block(pubkeys::alice());
    wait_for_block_refresh(&mut rx).await;
    let nudity = tally(&f.service, &target, "nudity");
    assert_eq!((nudity.trusted, nudity.total), (1, 1));

    f.blocks.unblock(&pubkeys::alice());
    wait_for_block_refresh(&mut rx).await;
    assert_eq!(f.service.summary(&target).categories, before.categories);
}

#[tokio::test]
async fn test_threshold_notifications_are_edge_triggered() {
    let f = fixture_trusting(&[pubkeys::alice(), pubkeys::bob()]).await;
    let target = event_ids::video(6);
    watch_target(&f, &target).await;
    let mut rx = f.service.subscribe();

    f.service.ingest_report(&events::report(&pubkeys::alice(), &target, "spam", 100));
    f.service.ingest_report(&events::report(&pubkeys::bob(), &target, "spam", 200));
    let received = drain(&mut rx);
    assert_eq!(count_threshold(&received, ThresholdAction::AutoplayBlockEnabled), 1);
    assert_eq!(count_threshold(&received, ThresholdAction::BlurEnabled), 1);

    f.blocks.block(pubkeys::alice());
    f.service.await_block_refresh().await;
    f.blocks.block(pubkeys::bob());
    f.service.await_block_refresh().await;
    let received = drain(&mut rx);
    assert_eq!(count_threshold(&received, ThresholdAction::AutoplayBlockCleared), 1);
    assert_eq!(count_threshold(&received, ThresholdAction::AutoplayBlockEnabled), 0);
}

#[tokio::test]
async fn test_scenario_a_block_and_unblock() {
    let f = fixture_trusting(&[pubkeys::alice(), pubkeys::bob()]).await;
    let target = event_ids::video(7);
    f.relay.store(events::report(&pubkeys::alice(), &target, "nudity", 100));
    f.relay.store(events::report(&pubkeys::bob(), &target, "nudity", 200));
    f.relay.store(events::report(&pubkeys::stranger(), &target, "nudity", 300));
    watch_target(&f, &target).await;

    let original = tally(&f.service, &target, "nudity");
    assert_eq!(original, CategoryTally { trusted: 2, total: 3, latest: 300 });

    let mut rx = f.service.subscribe();
    f.blocks.block(pubkeys::alice());
    wait_for_block_refresh(&mut rx).await;
    assert_eq!(
        tally(&f.service, &target, "nudity"),
        CategoryTally { trusted: 1, total: 2, latest: 300 }
    );

    f.blocks.unblock(&pubkeys::alice());
    wait_for_block_refresh(&mut rx).await;
    assert_eq!(tally(&f.service, &target, "nudity"), original);
}

// =============================================================================
// Mute Aggregation
// =============================================================================

#[tokio::test]
async fn test_scenario_b_mute_aggregation() {
    let f = fixture_trusting(&[pubkeys::alice(), pubkeys::bob()]).await;
    let muted = pubkeys::author();

    f.relay.emit(events::mute_list(&pubkeys::alice(), &[muted.clone()], timestamps::ago(300)));
    f.relay.emit(events::mute_list(&pubkeys::bob(), &[muted.clone()], timestamps::ago(300)));
    assert_eq!(f.service.muters_of(&muted), vec![pubkeys::alice(), pubkeys::bob()]);

    f.relay.emit(events::mute_list(&pubkeys::alice(), &[], timestamps::ago(200)));
    assert_eq!(f.service.muters_of(&muted), vec![pubkeys::bob()]);

    f.relay.emit(events::mute_list(&pubkeys::bob(), &[], timestamps::ago(100)));
    assert!(f.service.muters_of(&muted).is_empty());
    assert!(!f.service.is_muted_by_trusted(&muted));
    assert_eq!(f.service.trusted_mute_counts(&muted).total, 0);
}

#[tokio::test]
async fn test_mutes_outside_window_do_not_count() {
    let f = fixture_trusting(&[pubkeys::alice()]).await;
    let muted = pubkeys::author();
    let ninety_days = 90 * 24 * 60 * 60;

    let expired = events::mute_list(&pubkeys::alice(), &[muted.clone()], timestamps::ago(ninety_days));
    f.relay.emit(expired);

    assert!(!f.service.is_muted_by_trusted(&muted));
}

#[tokio::test]
async fn test_seed_mutes_apply_without_viewer() {
    init_tracing();
    let relay = Arc::new(MockRelay::new());
    let service = ModerationService::new(
        ModerationConfig::default(),
        relay.clone(),
        Arc::new(StaticAccessLists::default()),
        Arc::new(InMemoryBlockList::new()),
    )
    .unwrap();
    relay.store(events::mute_list(&pubkeys::carol(), &[pubkeys::author()], timestamps::ago(60)));

    service.set_trusted_seeds([pubkeys::carol().to_npub().unwrap()]).await;

    assert!(service.viewer().is_none());
    assert!(service.is_muted_by_trusted(&pubkeys::author()));
}
