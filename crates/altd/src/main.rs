//! Alt daemon entry point.
//!
//! Loads configuration, wires the runner to its store, gateway and game
//! client, starts every configured guild's alts and the presence schedule,
//! then waits for a shutdown signal.

mod cli;
mod config;
mod gateway;
mod logging;
mod signals;

use alt_runner::{
    AltRecord, AltRunner, AltStore, LoginOutcome, MemoryStore, PresenceTracker, RunnerEvent, SimulatedServer,
};
use anyhow::{Context, Result};
use cli::CliArgs;
use config::AppConfig;
use gateway::LogGateway;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const HEALTH_INTERVAL: Duration = Duration::from_secs(60);

pub struct Application {
    config: AppConfig,
    runner: Arc<AltRunner>,
    tracker: Arc<PresenceTracker>,
}

impl Application {
    pub async fn new(args: CliArgs) -> Result<Self> {
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }
        if let Some(data_file) = args.data_file {
            config.storage.data_file = data_file;
        }

        config.validate().context("Configuration validation failed")?;
        logging::setup_logging(&config.logging)?;

        let store = if args.dry_run {
            info!("🧪 Dry run: alts and trackers live in memory only");
            Arc::new(MemoryStore::new())
        } else {
            Arc::new(MemoryStore::open(config.storage.data_file.clone()).await?)
        };
        seed_alts(&store, &config).await?;

        let server = SimulatedServer::new();
        if !config.simulation.sidebar_lines.is_empty() {
            server.set_sidebar(&config.simulation.sidebar_lines);
        }
        server.set_players(&config.simulation.players);

        let gateway = Arc::new(LogGateway::new());
        let runner = AltRunner::new(config.runner.clone(), Arc::new(server), store.clone())?;
        runner.init(gateway.clone());
        let tracker = Arc::new(PresenceTracker::new(runner.clone(), store, gateway));

        info!(
            "🚀 altd v{} | config: {} | server: {}:{}",
            env!("CARGO_PKG_VERSION"),
            args.config_path.display(),
            config.runner.server.host,
            config.runner.server.port
        );

        Ok(Self { config, runner, tracker })
    }

    pub async fn run(self) -> Result<()> {
        let guilds = self.config.guilds.clone();
        info!("📋 Managing {} guilds", guilds.len());

        let startup_handle = {
            let runner = self.runner.clone();
            let guilds = guilds.clone();
            tokio::spawn(async move {
                for guild_id in &guilds {
                    match runner.start_all_for_guild(guild_id).await {
                        Ok(outcomes) => log_outcomes(guild_id, &outcomes),
                        Err(e) => error!("❌ Failed to start alts for guild {}: {}", guild_id, e),
                    }
                }
            })
        };

        let schedule_handle = tokio::spawn(self.tracker.clone().run_schedule(guilds));
        let events_handle = spawn_event_logger(&self.runner);
        let monitoring_handle = spawn_health_monitor(&self.runner);

        info!("✅ altd is running, press Ctrl+C to shut down");
        signals::shutdown_after(
            signals::next_signal(),
            &self.runner,
            vec![startup_handle, schedule_handle, events_handle, monitoring_handle],
        )
        .await?;

        let stats = self.runner.get_stats();
        info!("📊 Final statistics:");
        info!("  - Login attempts: {}", stats.login_attempts);
        info!("  - World changes: {}", stats.world_changes);
        info!("  - Events emitted: {}", stats.events_emitted);
        info!("👋 altd shutdown complete");
        Ok(())
    }
}

/// Inserts configured alts that the store does not know yet
async fn seed_alts(store: &MemoryStore, config: &AppConfig) -> Result<()> {
    for seed in &config.simulation.alts {
        if store.get_alt(seed.id).await.is_err() {
            store
                .insert_alt(AltRecord::new(seed.id, seed.guild_id.clone(), seed.label.clone()))
                .await?;
            info!("🌱 Seeded alt {} ({}) for guild {}", seed.id, seed.label, seed.guild_id);
        }
    }
    Ok(())
}

fn log_outcomes(guild_id: &str, outcomes: &[(alt_runner::AltId, LoginOutcome)]) {
    for (alt_id, outcome) in outcomes {
        match outcome {
            LoginOutcome::Connected | LoginOutcome::AlreadyConnected => {
                info!("🟢 Guild {} alt {}: {:?}", guild_id, alt_id, outcome)
            }
            LoginOutcome::Cancelled => info!("Guild {} alt {}: cancelled", guild_id, alt_id),
            LoginOutcome::Failed(reason) => warn!("⚠️ Guild {} alt {} failed to log in: {}", guild_id, alt_id, reason),
        }
    }
}

fn spawn_event_logger(runner: &Arc<AltRunner>) -> JoinHandle<()> {
    let mut events = runner.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(RunnerEvent::WorldChanged(change)) => info!(
                    guild_id = %change.guild_id,
                    alt_id = change.alt_id,
                    "🧭 {} is now in {}",
                    change.label,
                    change.world
                ),
                Ok(RunnerEvent::DeviceCodeIssued { alt_id, verification_uri, user_code, .. }) => {
                    info!(alt_id, "🔑 Sign-in needed: visit {} and enter {}", verification_uri, user_code)
                }
                Err(RecvError::Lagged(skipped)) => warn!("⚠️ Event logger skipped {} events", skipped),
                Err(RecvError::Closed) => return,
            }
        }
    })
}

fn spawn_health_monitor(runner: &Arc<AltRunner>) -> JoinHandle<()> {
    let weak = Arc::downgrade(runner);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(HEALTH_INTERVAL);
        let mut last_world_changes = 0u64;

        loop {
            interval.tick().await;
            let Some(runner) = weak.upgrade() else {
                return;
            };
            let stats = runner.get_stats();
            let changes = stats.world_changes - last_world_changes;
            last_world_changes = stats.world_changes;

            info!(
                "📊 Health - {}/{} alts online | {} queued logins | {} tasks | {} world changes/min",
                stats.live_connections, stats.tracked_alts, stats.login_queue, stats.scheduled_tasks, changes
            );
        }
    })
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let args = CliArgs::parse();

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("❌ Failed to start altd: {:?}", e);
            std::process::exit(1);
        }
    }
}
