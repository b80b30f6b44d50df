//! Integration tests for the player presence tracker

mod common;

use alt_runner::{
    AltStore, GatewayCall, PresenceOutcome, PresenceReport, PresenceTracker, SkipReason, TrackerConfigPatch,
    TrackerKind, TrackerLabels,
};
use common::{advance, harness, Harness, GUILD, NOVA_SIDEBAR};
use std::sync::Arc;

const TRACKER_CHANNEL: &str = "tracker-chan";
const ALERTS_CHANNEL: &str = "guild-1-shard-player-alerts";

fn tracker(h: &Harness) -> PresenceTracker {
    PresenceTracker::new(h.runner.clone(), h.store.clone(), h.gateway.clone())
}

async fn enable_shard_tracker(h: &Harness) {
    h.store
        .upsert_tracker_config(
            GUILD,
            TrackerKind::Shard,
            TrackerConfigPatch {
                enabled: Some(true),
                channel_id: Some(TRACKER_CHANNEL.into()),
                interval_minutes: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();
}

/// Online checker alt with an enabled shard tracker
async fn ready_harness() -> Harness {
    let h = harness().await;
    h.add_alt(1, "Scout").await;
    h.store.set_checker_alt(GUILD, TrackerKind::Shard, Some(1)).await.unwrap();
    h.gateway.add_channel(TRACKER_CHANNEL);
    enable_shard_tracker(&h).await;
    h.runner.start_alt(GUILD, 1).await.unwrap();
    advance(100).await;
    h
}

async fn run_shard(tracker: &PresenceTracker) -> PresenceOutcome {
    tracker
        .run_once_for_guild(GUILD, TrackerKind::Shard, &TrackerLabels::for_kind(TrackerKind::Shard))
        .await
        .unwrap()
}

fn completed(outcome: PresenceOutcome) -> PresenceReport {
    match outcome {
        PresenceOutcome::Completed(report) => report,
        other => panic!("expected a completed run, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_watched_player_alerts_on_join_and_leave() {
    let h = ready_harness().await;
    h.store.watch_add(GUILD, "alice").await.unwrap();
    let tracker = tracker(&h);

    h.server.set_players(&["Alice", "Bob"]);
    let first = completed(run_shard(&tracker).await);
    assert_eq!(first.names, vec!["Alice".to_string(), "Bob".to_string()]);
    assert_eq!(first.alerts_sent, 1);

    advance(61_000).await;
    h.server.set_players(&["Bob", "Carol"]);
    let second = completed(run_shard(&tracker).await);
    assert_eq!(second.joined, vec!["Carol".to_string()]);
    assert_eq!(second.left, vec!["Alice".to_string()]);
    assert_eq!(second.alerts_sent, 1);

    assert_eq!(
        h.gateway.texts_sent_to(ALERTS_CHANNEL),
        vec![
            "🔴 **Alice** has **entered** the shard, keep an eye out.".to_string(),
            "🟢 **Alice** has **left** the shard, what a good boy.".to_string(),
        ]
    );

    // The list message is edited in place and its id remembered
    assert_eq!(second.message_id, first.message_id);
    assert!(h.gateway.calls().iter().any(|c| matches!(
        c,
        GatewayCall::Edit { channel_id, message_id, .. }
            if channel_id == TRACKER_CHANNEL && *message_id == first.message_id
    )));
    let config = h.store.tracker_config(GUILD, TrackerKind::Shard).await.unwrap();
    assert_eq!(config.previous_message_id, Some(first.message_id));
}

#[tokio::test(start_paused = true)]
async fn test_failed_edit_replaces_the_list_message() {
    let h = ready_harness().await;
    let tracker = tracker(&h);
    h.server.set_players(&["Bob"]);

    let first = completed(run_shard(&tracker).await);
    h.gateway.set_edits_fail(true);
    advance(61_000).await;
    let second = completed(run_shard(&tracker).await);

    assert_ne!(second.message_id, first.message_id);
    assert!(h.gateway.calls().iter().any(|c| matches!(
        c,
        GatewayCall::Delete { message_id, .. } if *message_id == first.message_id
    )));
    assert_eq!(
        h.store
            .tracker_config(GUILD, TrackerKind::Shard)
            .await
            .unwrap()
            .previous_message_id,
        Some(second.message_id)
    );
}

#[tokio::test(start_paused = true)]
async fn test_skip_reasons() {
    let h = harness().await;
    h.add_alt(1, "Scout").await;
    let tracker = tracker(&h);

    assert_eq!(run_shard(&tracker).await, PresenceOutcome::Skipped(SkipReason::Disabled));
    assert_eq!(run_shard(&tracker).await, PresenceOutcome::Skipped(SkipReason::Debounced));

    advance(2_100).await;
    h.store
        .upsert_tracker_config(
            GUILD,
            TrackerKind::Shard,
            TrackerConfigPatch {
                enabled: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(run_shard(&tracker).await, PresenceOutcome::Skipped(SkipReason::NoChannel));

    advance(2_100).await;
    enable_shard_tracker(&h).await;
    assert_eq!(run_shard(&tracker).await, PresenceOutcome::Skipped(SkipReason::NoCheckerAlt));

    advance(2_100).await;
    assert_eq!(
        run_shard(&tracker).await,
        PresenceOutcome::Skipped(SkipReason::IntervalNotElapsed)
    );

    advance(61_000).await;
    h.store.set_checker_alt(GUILD, TrackerKind::Shard, Some(1)).await.unwrap();
    assert_eq!(run_shard(&tracker).await, PresenceOutcome::Skipped(SkipReason::CheckerOffline));

    h.runner.start_alt(GUILD, 1).await.unwrap();
    advance(61_000).await;
    assert_eq!(run_shard(&tracker).await, PresenceOutcome::Skipped(SkipReason::ChannelMissing));
    assert!(h.gateway.texts_sent_to(TRACKER_CHANNEL).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_probe_publishes_empty_list() {
    let h = ready_harness().await;
    let tracker = tracker(&h);
    h.server.fail_probes(true);

    let report = completed(run_shard(&tracker).await);
    assert!(report.names.is_empty());
    assert_eq!(report.world, "Unknown");

    let embed = h
        .gateway
        .calls()
        .into_iter()
        .find_map(|c| match c {
            GatewayCall::Send { channel_id, payload, .. } if channel_id == TRACKER_CHANNEL => payload.embed,
            _ => None,
        })
        .expect("tracker message");
    assert_eq!(embed.title, "Shard Player Tracker - 0 Players in Unknown");
    assert_eq!(embed.fields[0].value, "_None_");
}

#[tokio::test(start_paused = true)]
async fn test_report_names_checker_world() {
    let h = harness().await;
    h.add_alt(1, "Scout").await;
    h.server.set_sidebar(&NOVA_SIDEBAR);
    h.store.set_checker_alt(GUILD, TrackerKind::Shard, Some(1)).await.unwrap();
    h.gateway.add_channel(TRACKER_CHANNEL);
    enable_shard_tracker(&h).await;
    h.runner.start_alt(GUILD, 1).await.unwrap();
    advance(6_000).await;

    h.server.set_players(&["Steve"]);
    let report = completed(run_shard(&tracker(&h)).await);
    assert_eq!(report.world, "Nova");
    assert_eq!(report.names, vec!["Steve".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_schedule_runs_enabled_trackers() {
    let h = ready_harness().await;
    h.server.set_players(&["Steve", "Alex"]);
    let tracker = Arc::new(tracker(&h));

    let handle = tokio::spawn(tracker.run_schedule(vec![GUILD.to_string()]));
    advance(15_000).await;
    handle.abort();

    let sends = h
        .gateway
        .calls()
        .into_iter()
        .filter(|c| matches!(c, GatewayCall::Send { channel_id, .. } if channel_id == TRACKER_CHANNEL))
        .count();
    assert_eq!(sends, 1);
    // The rpost tracker was never enabled
    assert_eq!(
        h.store.tracker_config(GUILD, TrackerKind::Rpost).await.unwrap().last_run_at,
        0
    );
}

#[tokio::test(start_paused = true)]
async fn test_oversized_interval_never_elapses() {
    let h = ready_harness().await;
    let tracker = tracker(&h);

    for minutes in [u64::MAX / 2, u64::MAX] {
        h.store
            .upsert_tracker_config(
                GUILD,
                TrackerKind::Shard,
                TrackerConfigPatch {
                    interval_minutes: Some(minutes),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(
            run_shard(&tracker).await,
            PresenceOutcome::Skipped(SkipReason::IntervalNotElapsed)
        );
        advance(3_000).await;
    }
    assert_eq!(
        h.store.tracker_config(GUILD, TrackerKind::Shard).await.unwrap().last_run_at,
        0
    );
}
