//! Shared fixtures for the integration tests

#![allow(dead_code)]

use alt_runner::{AltRecord, AltRunner, Clock, MemoryStore, RecordingGateway, RunnerConfig, SimulatedServer};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const GUILD: &str = "guild-1";

/// Lobby-free shard sidebar naming "Nova"
pub const NOVA_SIDEBAR: [&str; 5] = ["Season 4", "Nova", "Balance: $1,200", "Power: 10/10", "mc-complex.com"];
pub const COMET_SIDEBAR: [&str; 5] = ["Season 4", "Comet", "Balance: $1,200", "Power: 10/10", "mc-complex.com"];

pub struct Harness {
    pub runner: Arc<AltRunner>,
    pub server: SimulatedServer,
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<RecordingGateway>,
    _profiles: TempDir,
}

/// Short, deterministic timings
pub fn test_config(profiles: &Path) -> RunnerConfig {
    let mut config = RunnerConfig::default();
    config.connection.profiles_root = profiles.to_path_buf();
    config.connection.settle_delay_ms = 1_000;
    config.connection.reconnect_min_ms = 5_000;
    config.connection.reconnect_max_ms = 5_000;
    config.login.jitter_ms = 0;
    config.login.min_gap_ms = 1_000;
    config.login.throttle_cooldown_ms = 10_000;
    config.world.first_world_delay_ms = 2_000;
    config.world.first_world_timeout_ms = 10_000;
    config.world.poll_interval_ms = 60_000;
    config
}

pub async fn harness() -> Harness {
    harness_with(|_| {}).await
}

pub async fn harness_with(tweak: impl FnOnce(&mut RunnerConfig)) -> Harness {
    let profiles = TempDir::new().expect("temp dir");
    let mut config = test_config(profiles.path());
    tweak(&mut config);

    let server = SimulatedServer::new();
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(RecordingGateway::new());
    let runner = AltRunner::with_clock(
        config,
        Arc::new(server.clone()),
        store.clone(),
        Clock::starting_at(1_700_000_000),
    )
    .expect("valid config");
    runner.init(gateway.clone());

    Harness {
        runner,
        server,
        store,
        gateway,
        _profiles: profiles,
    }
}

impl Harness {
    pub async fn add_alt(&self, id: i64, label: &str) {
        self.store
            .insert_alt(AltRecord::new(id, GUILD, label))
            .await
            .expect("insert alt");
    }
}

pub async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
