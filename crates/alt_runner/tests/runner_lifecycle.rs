//! Integration tests for alt start/stop, reconnects and device-code sign-in
//!
//! All tests run on paused tokio time against the in-process simulated server.

mod common;

use alt_runner::{
    AltRecord, AltStatus, AltStore, AuthMode, BackoffPolicy, ConnectionEvent, DeviceCodePrompt, GatewayCall,
    LoginOutcome, PersistedStatus, RunnerError, RunnerEvent,
};
use common::{advance, harness, harness_with, GUILD};
use std::time::Duration;

fn prompt() -> DeviceCodePrompt {
    DeviceCodePrompt {
        user_code: "WXYZ-1234".into(),
        verification_uri: "https://example.com/link".into(),
        expires_in: 900,
    }
}

#[tokio::test(start_paused = true)]
async fn test_start_brings_alt_online_and_stop_takes_it_down() {
    let h = harness().await;
    h.add_alt(1, "Scout").await;

    let outcome = h.runner.start_alt(GUILD, 1).await.unwrap();
    assert_eq!(outcome, LoginOutcome::Connected);

    advance(100).await;
    assert_eq!(h.runner.alt_status(1), AltStatus::Online);
    assert!(h.runner.is_online(1));
    assert_eq!(h.server.live_connections(), 1);

    let record = h.store.get_alt(1).await.unwrap();
    assert_eq!(record.last_status, Some(PersistedStatus::Online));
    assert_eq!(record.identity.map(|i| i.username), Some("Scout".to_string()));

    h.runner.stop_alt(1).await.unwrap();
    assert_eq!(h.runner.alt_status(1), AltStatus::Offline);
    assert_eq!(h.server.live_connections(), 0);
    assert_eq!(
        h.store.get_alt(1).await.unwrap().last_status,
        Some(PersistedStatus::Offline)
    );

    // A stopped alt is never re-enqueued
    advance(120_000).await;
    assert_eq!(h.server.connection_count(), 1);
    assert_eq!(h.runner.alt_status(1), AltStatus::Offline);
}

#[tokio::test(start_paused = true)]
async fn test_starting_connected_alt_keeps_single_connection() {
    let h = harness().await;
    h.add_alt(1, "Scout").await;

    h.runner.start_alt(GUILD, 1).await.unwrap();
    advance(100).await;

    let again = h.runner.start_alt(GUILD, 1).await.unwrap();
    assert_eq!(again, LoginOutcome::AlreadyConnected);
    assert_eq!(h.server.connection_count(), 1);
    assert_eq!(h.server.live_connections(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_kick_reconnects_with_one_live_connection() {
    let h = harness().await;
    h.add_alt(1, "Scout").await;
    h.runner.start_alt(GUILD, 1).await.unwrap();
    advance(100).await;

    assert!(h.server.kick("Server restarting"));
    advance(2_000).await;
    assert_eq!(h.runner.alt_status(1), AltStatus::Offline);
    assert_eq!(h.server.live_connections(), 0);
    assert_eq!(
        h.store.get_alt(1).await.unwrap().last_status,
        Some(PersistedStatus::Error)
    );

    advance(5_000).await;
    assert_eq!(h.server.connection_count(), 2);
    assert_eq!(h.server.live_connections(), 1);
    assert_eq!(h.runner.alt_status(1), AltStatus::Online);
}

#[tokio::test(start_paused = true)]
async fn test_network_rate_limit_posts_notice_and_waits_out_cooldown() {
    let h = harness().await;
    h.add_alt(1, "Scout").await;
    h.runner.start_alt(GUILD, 1).await.unwrap();
    advance(100).await;

    h.server.kick("Unable to register you with the network, try again");
    advance(100).await;

    let posts = h.gateway.alt_channel_posts();
    let notice = posts
        .iter()
        .filter_map(|p| p.embed.as_ref())
        .find(|e| e.title.contains("rate-limiting"))
        .expect("network notice");
    assert!(notice.description.as_deref().unwrap_or_default().contains("**Scout**"));

    advance(3_000).await;
    assert_eq!(h.server.connection_count(), 1);

    advance(5_000).await;
    assert_eq!(h.server.connection_count(), 2);
    assert_eq!(h.server.live_connections(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connect_failure_is_reported_and_retried() {
    let h = harness().await;
    h.add_alt(1, "Scout").await;
    h.server.fail_connects(Some("connection refused".into()));

    let err = h.runner.start_alt(GUILD, 1).await.unwrap_err();
    assert!(matches!(err, RunnerError::Login { alt_id: 1, .. }));
    assert_eq!(
        h.store.get_alt(1).await.unwrap().last_status,
        Some(PersistedStatus::Error)
    );

    h.server.fail_connects(None);
    advance(7_000).await;
    assert_eq!(h.server.connect_log().len(), 2);
    assert_eq!(h.runner.alt_status(1), AltStatus::Online);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_alt_and_empty_command_are_rejected() {
    let h = harness().await;
    h.add_alt(1, "Scout").await;

    assert!(matches!(
        h.runner.start_alt(GUILD, 99).await,
        Err(RunnerError::AltNotFound(99))
    ));
    assert!(matches!(
        h.runner.run_command(1, "   ").await,
        Err(RunnerError::EmptyCommand)
    ));
    assert!(matches!(
        h.runner.run_command(42, "/spawn").await,
        Err(RunnerError::AltNotFound(42))
    ));
    assert_eq!(h.runner.alt_status(99), AltStatus::Offline);
    assert_eq!(h.runner.alt_world(99), None);
    assert_eq!(h.runner.alt_world_updated_at(99), 0);
}

#[tokio::test(start_paused = true)]
async fn test_device_code_sign_in() {
    let h = harness().await;
    h.store
        .insert_alt(
            AltRecord::new(2, GUILD, "Main")
                .with_auth_mode(AuthMode::DeviceCode)
                .with_login_hint("main@example.com"),
        )
        .await
        .unwrap();
    h.server.set_device_code(Some(prompt()));
    let mut events = h.runner.subscribe();

    assert_eq!(h.runner.start_alt(GUILD, 2).await.unwrap(), LoginOutcome::Connected);
    advance(100).await;
    assert_eq!(h.runner.alt_status(2), AltStatus::AuthWait);
    assert_eq!(
        h.store.get_alt(2).await.unwrap().last_status,
        Some(PersistedStatus::AuthWait)
    );

    let notice = h.gateway.alt_channel_posts()[0].embed.clone().unwrap();
    assert!(notice.fields.iter().any(|f| f.value.contains("WXYZ-1234")));
    assert!(notice.fields.iter().any(|f| f.value == "main@example.com"));

    match events.recv().await.unwrap() {
        RunnerEvent::DeviceCodeIssued { alt_id, user_code, .. } => {
            assert_eq!(alt_id, 2);
            assert_eq!(user_code, "WXYZ-1234");
        }
        other => panic!("unexpected event {:?}", other),
    }

    assert!(h.server.complete_device_auth());
    advance(100).await;
    assert_eq!(h.runner.alt_status(2), AltStatus::Online);
    assert!(h
        .gateway
        .calls()
        .iter()
        .any(|c| matches!(c, GatewayCall::AltChannelDelete { message_id, .. } if message_id == "m1")));
}

#[tokio::test(start_paused = true)]
async fn test_expired_device_code_retries_sign_in() {
    let h = harness().await;
    h.store
        .insert_alt(AltRecord::new(2, GUILD, "Main").with_auth_mode(AuthMode::DeviceCode))
        .await
        .unwrap();
    h.server.set_device_code(Some(prompt()));

    h.runner.start_alt(GUILD, 2).await.unwrap();
    advance(100).await;
    assert_eq!(h.runner.alt_status(2), AltStatus::AuthWait);

    // No reconnect while waiting on the operator
    advance(600_000).await;
    assert_eq!(h.server.connection_count(), 1);

    tokio::time::sleep(Duration::from_secs(301)).await;
    assert_eq!(h.runner.alt_status(2), AltStatus::Offline);
    assert_eq!(h.server.live_connections(), 0);

    advance(7_000).await;
    assert_eq!(h.server.connection_count(), 2);
    assert_eq!(h.runner.alt_status(2), AltStatus::AuthWait);
}

#[tokio::test(start_paused = true)]
async fn test_delete_alt_stops_and_forgets_it() {
    let h = harness().await;
    h.add_alt(1, "Scout").await;
    h.runner.start_alt(GUILD, 1).await.unwrap();
    advance(100).await;

    h.runner.delete_alt(1).await.unwrap();
    assert_eq!(h.server.live_connections(), 0);
    assert!(h.store.get_alt(1).await.is_err());
    assert_eq!(h.runner.get_stats().tracked_alts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_start_all_for_guild_spaces_logins() {
    let h = harness().await;
    h.add_alt(1, "Scout").await;
    h.add_alt(2, "Miner").await;

    let outcomes = h.runner.start_all_for_guild(GUILD).await.unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|(_, o)| *o == LoginOutcome::Connected));

    let log = h.server.connect_log();
    assert_eq!(log.len(), 2);
    assert_eq!(h.runner.get_stats().live_connections, 2);

    h.runner.shutdown().await;
    assert_eq!(h.server.live_connections(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_device_code_lifetime_is_capped() {
    let h = harness().await;
    h.store
        .insert_alt(AltRecord::new(2, GUILD, "Main").with_auth_mode(AuthMode::DeviceCode))
        .await
        .unwrap();
    h.server.set_device_code(Some(DeviceCodePrompt {
        expires_in: u64::MAX,
        ..prompt()
    }));
    let mut events = h.runner.subscribe();

    h.runner.start_alt(GUILD, 2).await.unwrap();
    advance(100).await;
    assert_eq!(h.runner.alt_status(2), AltStatus::AuthWait);

    let notice = h.gateway.alt_channel_posts()[0].embed.clone().unwrap();
    assert!(notice.fields.iter().any(|f| f.value == "in about 60 min"));
    match events.recv().await.unwrap() {
        RunnerEvent::DeviceCodeIssued { expires_in, .. } => assert_eq!(expires_in, 3_600),
        other => panic!("unexpected event {:?}", other),
    }

    // Events keep flowing after the prompt
    assert!(h.server.complete_device_auth());
    advance(100).await;
    assert_eq!(h.runner.alt_status(2), AltStatus::Online);
}

#[tokio::test(start_paused = true)]
async fn test_login_throttle_delays_other_alts() {
    let h = harness().await;
    h.add_alt(1, "Scout").await;
    h.add_alt(2, "Miner").await;
    h.runner.start_alt(GUILD, 1).await.unwrap();
    advance(1_500).await;

    h.server.kick("You are logging in too fast, try again later.");
    advance(100).await;
    let runner = h.runner.clone();
    let pending = tokio::spawn(async move { runner.start_alt(GUILD, 2).await });

    // Registration cooldown is 10 s from the kick
    advance(8_400).await;
    assert_eq!(h.server.connect_log().len(), 1);
    assert!(!pending.is_finished());

    advance(2_500).await;
    let log = h.server.connect_log();
    assert_eq!(log.len(), 2);
    assert_eq!(log[1].username, "Miner");
    assert_eq!(pending.await.unwrap().unwrap(), LoginOutcome::Connected);

    // The throttled alt queues behind it
    advance(1_500).await;
    let log = h.server.connect_log();
    assert_eq!(log.len(), 3);
    assert_eq!(log[2].username, "Scout");
}

#[tokio::test(start_paused = true)]
async fn test_exponential_backoff_grows_and_resets_on_spawn() {
    let h = harness_with(|c| {
        c.connection.backoff = BackoffPolicy::Exponential;
        c.connection.reconnect_max_ms = 20_000;
    })
    .await;
    h.add_alt(1, "Scout").await;
    h.server.fail_connects(Some("connection refused".into()));
    assert!(h.runner.start_alt(GUILD, 1).await.is_err());

    // Attempts at 0 s, 5 s, 12.5 s and 23.75 s
    advance(4_500).await;
    assert_eq!(h.server.connect_log().len(), 1);
    advance(1_000).await;
    assert_eq!(h.server.connect_log().len(), 2);
    advance(6_500).await;
    assert_eq!(h.server.connect_log().len(), 2);
    advance(1_000).await;
    assert_eq!(h.server.connect_log().len(), 3);

    h.server.fail_connects(None);
    advance(10_000).await;
    assert_eq!(h.server.connect_log().len(), 3);
    advance(1_500).await;
    assert_eq!(h.server.connect_log().len(), 4);
    assert_eq!(h.runner.alt_status(1), AltStatus::Online);

    // Back to the minimum after a successful spawn
    h.server.kick("Server restarting");
    advance(4_500).await;
    assert_eq!(h.server.connect_log().len(), 4);
    advance(1_000).await;
    assert_eq!(h.server.connect_log().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_forbidden_client_error_posts_rejection_notice() {
    let h = harness().await;
    h.add_alt(1, "Scout").await;
    h.runner.start_alt(GUILD, 1).await.unwrap();
    advance(100).await;

    assert!(h
        .server
        .emit(ConnectionEvent::Error("Failed to obtain profile data: 403 Forbidden".into())));
    advance(100).await;

    let posts = h.gateway.alt_channel_posts();
    let notice = posts
        .iter()
        .filter_map(|p| p.embed.as_ref())
        .find(|e| e.title.contains("rejected (403)"))
        .expect("rejection notice");
    assert!(notice.description.as_deref().unwrap_or_default().contains("**Scout**"));
    assert_eq!(
        h.store.get_alt(1).await.unwrap().last_status,
        Some(PersistedStatus::Error)
    );

    // Other errors are only recorded
    h.server.emit(ConnectionEvent::Error("read ECONNRESET".into()));
    advance(100).await;
    assert_eq!(h.gateway.alt_channel_posts().len(), posts.len());
}

#[tokio::test(start_paused = true)]
async fn test_respawn_drains_pending_commands() {
    let h = harness().await;
    h.add_alt(1, "Scout").await;
    h.server.set_spawn_delay(Duration::from_secs(3));
    h.runner.start_alt(GUILD, 1).await.unwrap();
    advance(100).await;

    h.runner.run_command(1, "spawn").await.unwrap();
    advance(3_400).await;
    assert!(h.runner.is_online(1));
    assert_eq!(h.runner.queued_commands(1), 1);

    // Without a world the first drain would wait for the 10 s timeout
    assert!(h.server.emit(ConnectionEvent::Respawn));
    advance(1_000).await;
    assert_eq!(h.server.chat_lines(), vec!["/factions".to_string()]);

    advance(1_000).await;
    assert_eq!(h.server.chat_lines(), vec!["/factions".to_string(), "/spawn".to_string()]);
    assert_eq!(h.runner.queued_commands(1), 0);
}

#[tokio::test(start_paused = true)]
async fn test_server_side_disconnect_closes_the_handle() {
    let h = harness().await;
    h.add_alt(1, "Scout").await;
    h.runner.start_alt(GUILD, 1).await.unwrap();
    advance(100).await;

    assert!(h.server.emit(ConnectionEvent::End("socket closed".into())));
    advance(100).await;
    assert_eq!(h.runner.alt_status(1), AltStatus::Offline);
    assert_eq!(h.server.live_connections(), 0);
    assert_eq!(
        h.store.get_alt(1).await.unwrap().last_status,
        Some(PersistedStatus::Offline)
    );

    advance(5_500).await;
    assert_eq!(h.server.connection_count(), 2);
    assert_eq!(h.server.live_connections(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_command_survives_failed_background_login() {
    let h = harness().await;
    h.add_alt(1, "Scout").await;
    h.server.fail_connects(Some("connection refused".into()));

    h.runner.run_command(1, "spawn").await.unwrap();
    advance(100).await;
    assert_eq!(h.server.connect_log().len(), 1);
    assert_eq!(h.runner.queued_commands(1), 1);

    h.server.fail_connects(None);
    advance(5_500).await;
    assert_eq!(h.runner.alt_status(1), AltStatus::Online);

    // Sent once the first-world wait times out
    advance(12_000).await;
    assert!(h.server.chat_lines().contains(&"/spawn".to_string()));
    assert_eq!(h.runner.queued_commands(1), 0);
}
