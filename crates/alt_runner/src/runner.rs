//! # Alt Runner
//!
//! The [`AltRunner`] supervises every alt connection of the process. It owns
//! the per-alt state registry, the keyed task scheduler and the global login
//! queue, and reacts to the ordered event stream of each live connection.
//!
//! ## Lifecycle of one alt
//!
//! ```text
//! disconnected -> queued -> connecting -> authenticating? -> connected
//!       ^                                      |                 |
//!       +------------- reconnect <-------------+-----------------+
//! ```
//!
//! * `start_alt` clears the stopped flag and queues a login.
//! * The login worker calls back into [`AltRunner::connect_alt_now`], which
//!   installs the connection and spawns its event pump.
//! * On spawn the startup command is sent after a settle delay, sidebar
//!   capture is armed and queued commands are drained once a first world is
//!   known (or the wait times out).
//! * Kicks and disconnects schedule a reconnect unless the alt was stopped or
//!   is waiting on device-code confirmation.
//!
//! Behaviour is split across modules: reconnect policy in `reconnect`, the
//! command queue in `commands` and world inference in `world`. Each adds its
//! own `impl AltRunner` block.

use crate::client::{ConnectOptions, ConnectionEvent, DeviceCodePrompt, GameClient, GameConnection};
use crate::clock::Clock;
use crate::config::RunnerConfig;
use crate::error::{RunnerError, RunnerResult};
use crate::events::{EventBus, EventBusStats, RunnerEvent};
use crate::gateway::{Embed, EmbedField, Gateway, Payload};
use crate::login::{jitter_between, LoginOutcome, LoginScheduler, LoginStats, LoginTarget};
use crate::reconnect::DisconnectKind;
use crate::scoreboard::{lines_from_snapshot, WorldFilter};
use crate::state::{SharedState, StateRegistry};
use crate::store::AltStore;
use crate::timers::{Scheduler, TaskKind};
use crate::types::{AltId, AltStatus, MessageId, PersistedStatus};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Poll period while waiting for the first world after spawn
const FIRST_WORLD_TICK: Duration = Duration::from_millis(500);
/// Pause between the first-world wait and draining queued commands
const DRAIN_AFTER_FIRST_WORLD: Duration = Duration::from_millis(1_200);
/// Scoreboard read after listeners attach
pub(crate) const INITIAL_SCAN_DELAY: Duration = Duration::from_millis(1_500);
/// Extra margin on top of first-world eligibility for the follow-up probe
pub(crate) const PROBE_MARGIN: Duration = Duration::from_millis(1_500);
/// Drain restart delay after a respawn
const RESPAWN_DRAIN_DELAY: Duration = Duration::from_millis(1_500);
/// Longest device-code lifetime honoured; servers send seconds as a raw u64
const MAX_DEVICE_CODE_SECS: u64 = 3_600;

const NOTICE_COLOR_AUTH: u32 = 0x5865f2;
const NOTICE_COLOR_ERROR: u32 = 0xed4245;

/// Runner-wide statistics for health logging
#[derive(Debug, Clone, Serialize)]
pub struct RunnerStats {
    pub tracked_alts: usize,
    pub live_connections: usize,
    pub scheduled_tasks: usize,
    pub login_queue: usize,
    pub login_attempts: u64,
    pub events_emitted: u64,
    pub world_changes: u64,
}

pub struct AltRunner {
    pub(crate) config: RunnerConfig,
    pub(crate) client: Arc<dyn GameClient>,
    pub(crate) store: Arc<dyn AltStore>,
    gateway: RwLock<Option<Arc<dyn Gateway>>>,
    pub(crate) registry: StateRegistry,
    pub(crate) scheduler: Scheduler,
    pub(crate) login: Arc<LoginScheduler>,
    pub(crate) events: EventBus,
    pub(crate) filter: WorldFilter,
    pub(crate) clock: Clock,
    weak_self: Weak<AltRunner>,
}

impl AltRunner {
    /// Creates a runner after validating `config`
    pub fn new(
        config: RunnerConfig,
        client: Arc<dyn GameClient>,
        store: Arc<dyn AltStore>,
    ) -> RunnerResult<Arc<Self>> {
        Self::with_clock(config, client, store, Clock::new())
    }

    /// Same as [`AltRunner::new`] with an explicit wall clock
    pub fn with_clock(
        config: RunnerConfig,
        client: Arc<dyn GameClient>,
        store: Arc<dyn AltStore>,
        clock: Clock,
    ) -> RunnerResult<Arc<Self>> {
        config.validate()?;
        let filter = WorldFilter::new(&config.world.deny_patterns)?;

        Ok(Arc::new_cyclic(|weak: &Weak<AltRunner>| {
            let target: Weak<dyn LoginTarget> = weak.clone();
            Self {
                login: Arc::new(LoginScheduler::new(config.login.clone(), target)),
                config,
                client,
                store,
                gateway: RwLock::new(None),
                registry: StateRegistry::new(),
                scheduler: Scheduler::new(),
                events: EventBus::new(),
                filter,
                clock,
                weak_self: weak.clone(),
            }
        }))
    }

    /// Attaches the chat gateway used for operator notices
    pub fn init(&self, gateway: Arc<dyn Gateway>) {
        *self.gateway.write() = Some(gateway);
        info!("🔗 Alt runner attached to chat gateway");
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn clock(&self) -> Clock {
        self.clock
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunnerEvent> {
        self.events.subscribe()
    }

    /// Starts supervising an alt and waits for its queued login.
    ///
    /// The displayed world is seeded from the stored record so readers are not
    /// blank while the connection comes up.
    pub async fn start_alt(self: &Arc<Self>, guild_id: &str, alt_id: AltId) -> RunnerResult<LoginOutcome> {
        let alt = self
            .store
            .get_alt(alt_id)
            .await
            .map_err(|e| RunnerError::from_store(alt_id, e))?;
        if alt.guild_id != guild_id {
            debug!("Alt {} belongs to guild {}, not {}", alt_id, alt.guild_id, guild_id);
        }

        let state = self.state_for(alt_id, &alt.guild_id, &alt.label);
        {
            let mut s = state.lock();
            s.stopped = false;
            if s.world.is_none() {
                s.world = alt.last_world.clone();
                s.world_updated_at = alt.world_updated_at;
            }
        }

        info!("▶️ Starting alt {} ({})", alt_id, alt.label);
        match self.login.enqueue_login(alt_id).await {
            LoginOutcome::Failed(reason) => Err(RunnerError::Login { alt_id, reason }),
            outcome => Ok(outcome),
        }
    }

    /// Stops an alt: cancels its timers, drops queued commands and closes the connection
    pub async fn stop_alt(&self, alt_id: AltId) -> RunnerResult<()> {
        self.login.remove(alt_id);
        let cancelled = self.scheduler.cancel_alt(alt_id);

        let connection = self.registry.get(alt_id).and_then(|state| {
            let mut s = state.lock();
            s.stopped = true;
            s.awaiting_device = false;
            s.device_expires_at = None;
            s.command_queue.clear();
            s.take_connection()
        });

        if let Some(connection) = connection {
            connection.end("stop");
        }
        info!("⏹️ Stopped alt {} ({} pending tasks cancelled)", alt_id, cancelled);

        self.store
            .set_status(alt_id, PersistedStatus::Offline, self.clock.now_secs())
            .await
            .map_err(|e| RunnerError::from_store(alt_id, e))
    }

    /// Queues a command line for an alt, connecting it first if needed
    pub async fn run_command(self: &Arc<Self>, alt_id: AltId, text: &str) -> RunnerResult<()> {
        let line = crate::commands::normalize_command(text).ok_or(RunnerError::EmptyCommand)?;
        let alt = self
            .store
            .get_alt(alt_id)
            .await
            .map_err(|e| RunnerError::from_store(alt_id, e))?;

        let state = self.state_for(alt_id, &alt.guild_id, &alt.label);
        let online = {
            let mut s = state.lock();
            s.command_queue.push_back(line.clone());
            s.stopped = false;
            s.is_online()
        };
        debug!("📝 Alt {} queued {:?}", alt_id, line);

        if online {
            self.kick_drain(alt_id);
        } else {
            let login = self.login.clone();
            tokio::spawn(async move {
                match login.enqueue_login(alt_id).await {
                    outcome @ (LoginOutcome::Failed(_) | LoginOutcome::Cancelled) => {
                        warn!("⚠️ Alt {} login for queued command did not connect: {:?}", alt_id, outcome)
                    }
                    outcome => debug!("Alt {} login for queued command: {:?}", alt_id, outcome),
                }
            });
        }
        Ok(())
    }

    pub fn alt_status(&self, alt_id: AltId) -> AltStatus {
        self.registry
            .get(alt_id)
            .map(|s| s.lock().status())
            .unwrap_or(AltStatus::Offline)
    }

    pub fn alt_world(&self, alt_id: AltId) -> Option<String> {
        self.registry.get(alt_id).and_then(|s| s.lock().world.clone())
    }

    /// Unix seconds of the last displayed-world change, 0 when unknown
    pub fn alt_world_updated_at(&self, alt_id: AltId) -> i64 {
        self.registry
            .get(alt_id)
            .map(|s| s.lock().world_updated_at)
            .unwrap_or(0)
    }

    pub fn is_online(&self, alt_id: AltId) -> bool {
        self.registry
            .get(alt_id)
            .map(|s| s.lock().is_online())
            .unwrap_or(false)
    }

    /// Live connection handle of an alt
    pub fn connection(&self, alt_id: AltId) -> Option<Arc<dyn GameConnection>> {
        self.registry.get(alt_id).and_then(|s| s.lock().connection.clone())
    }

    /// Starts every alt of a guild one after another.
    ///
    /// Starts are spaced by the minimum reconnect interval plus jitter; a failed
    /// start is logged and does not stop the sweep.
    pub async fn start_all_for_guild(self: &Arc<Self>, guild_id: &str) -> RunnerResult<Vec<(AltId, LoginOutcome)>> {
        let alts = self.store.list_alts(guild_id).await?;
        info!("🚀 Starting {} alts for guild {}", alts.len(), guild_id);

        let mut outcomes = Vec::with_capacity(alts.len());
        for alt in alts {
            let outcome = match self.start_alt(guild_id, alt.id).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("⚠️ Failed to start alt {}: {}", alt.id, e);
                    LoginOutcome::Failed(e.to_string())
                }
            };
            outcomes.push((alt.id, outcome));

            let spacing = self.config.connection.reconnect_min() + jitter_between(0, self.config.login.jitter_ms);
            sleep(spacing).await;
        }
        Ok(outcomes)
    }

    /// Stops an alt, deletes its record and forgets its in-memory state
    pub async fn delete_alt(&self, alt_id: AltId) -> RunnerResult<()> {
        if let Err(e) = self.stop_alt(alt_id).await {
            debug!("Stop before delete of alt {}: {}", alt_id, e);
        }
        self.store
            .delete_alt(alt_id)
            .await
            .map_err(|e| RunnerError::from_store(alt_id, e))?;
        self.registry.remove(alt_id);
        info!("🗑️ Deleted alt {}", alt_id);
        Ok(())
    }

    /// Stops every tracked alt
    pub async fn shutdown(&self) {
        let alt_ids = self.registry.alt_ids();
        info!("🛑 Shutting down alt runner ({} alts)", alt_ids.len());
        for alt_id in alt_ids {
            if let Err(e) = self.stop_alt(alt_id).await {
                warn!("⚠️ Failed to stop alt {} during shutdown: {}", alt_id, e);
            }
        }
        self.scheduler.shutdown();
    }

    pub fn get_stats(&self) -> RunnerStats {
        let LoginStats { queued, attempts, .. } = self.login.get_stats();
        let EventBusStats { events_emitted, world_changes, .. } = self.events.get_stats();
        RunnerStats {
            tracked_alts: self.registry.len(),
            live_connections: self.registry.live_connections(),
            scheduled_tasks: self.scheduler.active_count(),
            login_queue: queued,
            login_attempts: attempts,
            events_emitted,
            world_changes,
        }
    }

    // ------------------------------------------------------------------
    // Internals shared with the reconnect / commands / world modules
    // ------------------------------------------------------------------

    pub(crate) fn state_for(&self, alt_id: AltId, guild_id: &str, label: &str) -> SharedState {
        self.registry
            .get_or_create(alt_id, guild_id, label, self.config.connection.reconnect_min())
    }

    pub(crate) fn self_arc(&self) -> Option<Arc<Self>> {
        self.weak_self.upgrade()
    }

    pub(crate) fn gateway(&self) -> Option<Arc<dyn Gateway>> {
        self.gateway.read().clone()
    }

    /// Posts to the guild's alt channel, swallowing the absence of a gateway
    pub(crate) async fn notify(&self, guild_id: &str, payload: Payload) -> Option<MessageId> {
        match self.gateway() {
            Some(gateway) => gateway.post_to_alt_channel(guild_id, payload).await,
            None => {
                debug!("No gateway attached, dropping notice for guild {}", guild_id);
                None
            }
        }
    }

    pub(crate) async fn persist_status(&self, alt_id: AltId, status: PersistedStatus) {
        if let Err(e) = self.store.set_status(alt_id, status, self.clock.now_secs()).await {
            warn!("⚠️ Failed to persist status {} for alt {}: {}", status, alt_id, e);
        }
    }

    pub(crate) fn is_current(&self, alt_id: AltId, generation: u64) -> bool {
        self.registry
            .get(alt_id)
            .map(|s| s.lock().is_current(generation))
            .unwrap_or(false)
    }

    /// Cancels timers scoped to a connection, keeping supervision timers
    pub(crate) fn cancel_connection_tasks(&self, alt_id: AltId) {
        self.scheduler.cancel_alt_except(
            alt_id,
            &[TaskKind::Events, TaskKind::Reconnect, TaskKind::AuthExpiry],
        );
    }

    /// Opens a connection for `alt_id`; invoked by the login worker
    pub(crate) async fn connect_alt_now(self: &Arc<Self>, alt_id: AltId) -> LoginOutcome {
        let alt = match self.store.get_alt(alt_id).await {
            Ok(alt) => alt,
            Err(e) => return LoginOutcome::Failed(e.to_string()),
        };
        let state = self.state_for(alt_id, &alt.guild_id, &alt.label);

        let previous = {
            let mut s = state.lock();
            if s.stopped {
                return LoginOutcome::Cancelled;
            }
            s.awaiting_device = false;
            s.device_expires_at = None;
            s.take_connection()
        };
        self.scheduler.cancel_alt(alt_id);
        if let Some(previous) = previous {
            previous.end("reconnect");
        }

        let profiles_dir = self
            .config
            .connection
            .profiles_root
            .join(format!("alt-{}", alt_id));
        if let Err(e) = tokio::fs::create_dir_all(&profiles_dir).await {
            warn!("⚠️ Could not create profile dir {}: {}", profiles_dir.display(), e);
        }

        let options = ConnectOptions {
            host: self.config.server.host.clone(),
            port: self.config.server.port,
            version: self.config.server.version.clone(),
            auth: alt.auth_mode,
            username: alt.connect_username(),
            profiles_dir,
            check_timeout: Duration::from_millis(self.config.connection.check_timeout_ms),
        };
        info!(
            "🔌 Alt {} connecting -> {}:{} auth={:?} user={:?}",
            alt_id, options.host, options.port, options.auth, options.username
        );

        let (connection, events) = match self.client.connect(options).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("❌ Alt {} connect failed: {}", alt_id, e);
                self.persist_status(alt_id, PersistedStatus::Error).await;
                self.schedule_reconnect(alt_id);
                return LoginOutcome::Failed(e.to_string());
            }
        };

        let generation = {
            let mut s = state.lock();
            if s.stopped {
                None
            } else {
                Some(s.begin_connection(connection.clone()))
            }
        };
        let Some(generation) = generation else {
            connection.end("stopped");
            return LoginOutcome::Cancelled;
        };

        self.spawn_event_pump(alt_id, generation, events);
        self.schedule_probe(alt_id, INITIAL_SCAN_DELAY, TaskKind::InitialScan, "initial-scan");
        LoginOutcome::Connected
    }

    fn spawn_event_pump(
        self: &Arc<Self>,
        alt_id: AltId,
        generation: u64,
        mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
    ) {
        let weak = Arc::downgrade(self);
        self.scheduler.spawn(alt_id, TaskKind::Events, async move {
            while let Some(event) = events.recv().await {
                let Some(runner) = weak.upgrade() else {
                    break;
                };
                if !runner.is_current(alt_id, generation) {
                    debug!("Alt {} dropping {:?} from superseded connection", alt_id, event);
                    break;
                }
                runner.handle_event(alt_id, generation, event).await;
                if !runner.is_current(alt_id, generation) {
                    break;
                }
            }
        });
    }

    async fn handle_event(self: &Arc<Self>, alt_id: AltId, generation: u64, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Spawn => self.on_spawn(alt_id, generation).await,
            ConnectionEvent::Respawn => {
                debug!("Alt {} respawned", alt_id);
                let weak = Arc::downgrade(self);
                self.scheduler
                    .spawn_after(alt_id, TaskKind::Respawn, RESPAWN_DRAIN_DELAY, async move {
                        if let Some(runner) = weak.upgrade() {
                            runner.kick_drain(alt_id);
                        }
                    });
            }
            ConnectionEvent::Kicked(reason) => {
                self.on_disconnect(alt_id, generation, DisconnectKind::Kicked, &reason).await
            }
            ConnectionEvent::End(reason) => {
                self.on_disconnect(alt_id, generation, DisconnectKind::Ended, &reason).await
            }
            ConnectionEvent::Error(message) => self.on_client_error(alt_id, &message).await,
            ConnectionEvent::DeviceCode(prompt) => self.on_device_code(alt_id, prompt).await,
            ConnectionEvent::Scoreboard(update) => self.handle_scoreboard(alt_id, update).await,
            ConnectionEvent::Chat(text) => {
                if crate::world::is_transition_message(&text) {
                    info!("💬 Alt {} transition: {:?}", alt_id, text);
                }
            }
        }
    }

    async fn on_spawn(self: &Arc<Self>, alt_id: AltId, generation: u64) {
        let Some(state) = self.registry.get(alt_id) else {
            return;
        };
        let spawned = {
            let mut s = state.lock();
            if !s.is_current(generation) || s.spawned {
                None
            } else {
                s.spawned = true;
                s.awaiting_device = false;
                s.device_expires_at = None;
                s.backoff = self.config.connection.reconnect_min();
                Some((s.guild_id.clone(), s.connection.clone(), s.auth_notice.take()))
            }
        };
        let Some((guild_id, Some(connection), auth_notice)) = spawned else {
            return;
        };
        self.scheduler.cancel(alt_id, TaskKind::AuthExpiry);

        let identity = connection.player();
        info!(
            "🎮 Alt {} spawned as {}",
            alt_id,
            identity.as_ref().map(|i| i.username.as_str()).unwrap_or("unknown")
        );
        self.persist_status(alt_id, PersistedStatus::Online).await;

        if let Some(message_id) = auth_notice {
            if let Some(gateway) = self.gateway() {
                gateway.delete_alt_channel_message(&guild_id, &message_id).await;
            }
        }

        if let Some(identity) = identity {
            if let Err(e) = self.store.update_username(alt_id, &identity.username).await {
                warn!("⚠️ Failed to record username for alt {}: {}", alt_id, e);
            }
            if let Err(e) = self.store.set_identity(alt_id, identity).await {
                warn!("⚠️ Failed to record identity for alt {}: {}", alt_id, e);
            }
        }

        if self.config.world.debug_lines {
            if let Some(sidebar) = connection.sidebar() {
                debug!("Alt {} post-spawn sidebar title={:?}", alt_id, sidebar.title);
                for (i, line) in lines_from_snapshot(&sidebar).iter().enumerate() {
                    debug!("Alt {} sidebar #{}: {}", alt_id, i + 1, line);
                }
            }
        }

        let weak = Arc::downgrade(self);
        self.scheduler.spawn_after(
            alt_id,
            TaskKind::Settle,
            self.config.connection.settle_delay(),
            async move {
                if let Some(runner) = weak.upgrade() {
                    runner.after_settle(alt_id, generation).await;
                }
            },
        );

        let weak = Arc::downgrade(self);
        let timeout = self.config.world.first_world_timeout();
        self.scheduler.spawn(alt_id, TaskKind::FirstWorld, async move {
            let deadline = Instant::now() + timeout;
            loop {
                let found = match weak.upgrade() {
                    Some(runner) => runner
                        .registry
                        .get(alt_id)
                        .map(|s| s.lock().detected.is_some())
                        .unwrap_or(false),
                    None => return,
                };
                if found || Instant::now() >= deadline {
                    break;
                }
                sleep(FIRST_WORLD_TICK).await;
            }

            sleep(DRAIN_AFTER_FIRST_WORLD).await;
            if let Some(runner) = weak.upgrade() {
                if runner.is_current(alt_id, generation) {
                    runner.kick_drain(alt_id);
                }
            }
        });
    }

    /// Sends the startup command, opens first-world eligibility and arms capture
    async fn after_settle(self: &Arc<Self>, alt_id: AltId, generation: u64) {
        let Some(state) = self.registry.get(alt_id) else {
            return;
        };
        let connection = {
            let s = state.lock();
            if !s.is_current(generation) {
                return;
            }
            s.connection.clone()
        };
        let Some(connection) = connection else {
            return;
        };

        if let Some(command) = self.config.connection.startup_command() {
            match connection.chat(command) {
                Ok(()) => {
                    info!("📨 Alt {} sent {}", alt_id, command);
                    state.lock().last_chat_at = Some(Instant::now());
                }
                Err(e) => warn!("⚠️ Alt {} startup command failed: {}", alt_id, e),
            }
        }

        let delay = self.config.world.first_world_delay();
        {
            let mut s = state.lock();
            s.first_world_eligible_at = Some(Instant::now() + delay);
            s.sidebar_armed = true;
        }
        debug!("Alt {} first world eligible after {} ms", alt_id, delay.as_millis());

        self.schedule_probe(alt_id, delay + PROBE_MARGIN, TaskKind::Probe("after-startup"), "after-startup");
        self.read_sidebar(alt_id, "armed:after-startup").await;
    }

    async fn on_disconnect(self: &Arc<Self>, alt_id: AltId, generation: u64, kind: DisconnectKind, reason: &str) {
        let Some(state) = self.registry.get(alt_id) else {
            return;
        };
        let taken = {
            let mut s = state.lock();
            if !s.is_current(generation) {
                return;
            }
            (s.take_connection(), s.guild_id.clone(), s.label.clone())
        };
        let (connection, guild_id, label) = taken;
        self.cancel_connection_tasks(alt_id);
        if let Some(connection) = connection {
            connection.end(reason);
        }

        match kind {
            DisconnectKind::Kicked => {
                warn!("👢 Alt {} kicked: {}", alt_id, reason);
                self.persist_status(alt_id, PersistedStatus::Error).await;
            }
            DisconnectKind::Ended => {
                info!("🔌 Alt {} disconnected: {:?}", alt_id, reason);
                self.persist_status(alt_id, PersistedStatus::Offline).await;
            }
        }

        self.apply_rate_limit(alt_id, &guild_id, &label, reason).await;
        self.schedule_reconnect(alt_id);
    }

    async fn on_client_error(&self, alt_id: AltId, message: &str) {
        warn!("❌ Alt {} client error: {}", alt_id, message);
        let Some(state) = self.registry.get(alt_id) else {
            return;
        };
        let (awaiting, guild_id, label) = {
            let s = state.lock();
            (s.awaiting_device, s.guild_id.clone(), s.label.clone())
        };

        if awaiting {
            self.persist_status(alt_id, PersistedStatus::AuthWait).await;
            return;
        }
        self.persist_status(alt_id, PersistedStatus::Error).await;

        let lowered = message.to_lowercase();
        if lowered.contains("403") || lowered.contains("forbidden") {
            self.notify(&guild_id, login_rejected_notice(&label)).await;
        }
    }

    async fn on_device_code(self: &Arc<Self>, alt_id: AltId, mut prompt: DeviceCodePrompt) {
        let Some(state) = self.registry.get(alt_id) else {
            return;
        };
        if prompt.expires_in > MAX_DEVICE_CODE_SECS {
            debug!("Alt {} device code lifetime {} s capped", alt_id, prompt.expires_in);
            prompt.expires_in = MAX_DEVICE_CODE_SECS;
        }
        let ttl = Duration::from_secs(prompt.expires_in);
        let (guild_id, label, previous_notice) = {
            let mut s = state.lock();
            s.awaiting_device = true;
            s.device_expires_at = Instant::now().checked_add(ttl);
            (s.guild_id.clone(), s.label.clone(), s.auth_notice.take())
        };
        info!("🔐 Alt {} device code issued ({})", alt_id, prompt.user_code);

        if let (Some(message_id), Some(gateway)) = (previous_notice, self.gateway()) {
            gateway.delete_alt_channel_message(&guild_id, &message_id).await;
        }

        let hint = self.store.get_alt(alt_id).await.ok().and_then(|a| a.login_hint);
        let notice = self
            .notify(&guild_id, device_code_notice(&label, &prompt, hint.as_deref()))
            .await;
        state.lock().auth_notice = notice;

        self.persist_status(alt_id, PersistedStatus::AuthWait).await;
        self.events.emit(RunnerEvent::DeviceCodeIssued {
            guild_id,
            alt_id,
            user_code: prompt.user_code.clone(),
            verification_uri: prompt.verification_uri.clone(),
            expires_in: prompt.expires_in,
        });

        let weak = Arc::downgrade(self);
        self.scheduler.spawn_after(
            alt_id,
            TaskKind::AuthExpiry,
            ttl,
            async move {
                if let Some(runner) = weak.upgrade() {
                    runner.on_device_expired(alt_id).await;
                }
            },
        );
    }

    /// Device code went unused: drop the pending connection and resume supervision
    async fn on_device_expired(self: &Arc<Self>, alt_id: AltId) {
        let Some(state) = self.registry.get(alt_id) else {
            return;
        };
        let expired = {
            let mut s = state.lock();
            if !s.awaiting_device {
                return;
            }
            s.awaiting_device = false;
            s.device_expires_at = None;
            let connection = if s.spawned { None } else { s.take_connection() };
            (s.guild_id.clone(), s.auth_notice.take(), connection)
        };
        let (guild_id, notice, connection) = expired;
        warn!("⌛ Alt {} device code expired", alt_id);

        self.cancel_connection_tasks(alt_id);
        if let Some(connection) = connection {
            connection.end("device code expired");
        }
        if let (Some(message_id), Some(gateway)) = (notice, self.gateway()) {
            gateway.delete_alt_channel_message(&guild_id, &message_id).await;
        }
        self.persist_status(alt_id, PersistedStatus::Offline).await;
        self.schedule_reconnect(alt_id);
    }
}

#[async_trait]
impl LoginTarget for AltRunner {
    fn is_connected(&self, alt_id: AltId) -> bool {
        self.registry
            .get(alt_id)
            .map(|s| s.lock().connection.is_some())
            .unwrap_or(false)
    }

    fn alt_cooldown(&self, alt_id: AltId) -> Option<Instant> {
        self.registry.get(alt_id).and_then(|s| s.lock().cooldown_until)
    }

    async fn connect(&self, alt_id: AltId) -> LoginOutcome {
        match self.self_arc() {
            Some(runner) => runner.connect_alt_now(alt_id).await,
            None => LoginOutcome::Cancelled,
        }
    }
}

impl std::fmt::Debug for AltRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AltRunner")
            .field("alts", &self.registry.len())
            .field("scheduler", &self.scheduler)
            .field("login", &self.login)
            .finish()
    }
}

fn device_code_notice(label: &str, prompt: &DeviceCodePrompt, hint: Option<&str>) -> Payload {
    let minutes = (prompt.expires_in.saturating_add(30) / 60).max(1);
    let mut fields = vec![
        EmbedField {
            name: "Code".into(),
            value: format!("`{}`", prompt.user_code),
        },
        EmbedField {
            name: "Expires".into(),
            value: format!("in about {} min", minutes),
        },
    ];
    if let Some(hint) = hint.filter(|h| !h.trim().is_empty()) {
        fields.push(EmbedField {
            name: "Account".into(),
            value: hint.to_string(),
        });
    }

    Payload::embed(Embed {
        title: "🔐 Sign-in required".into(),
        description: Some(format!(
            "**{}** is waiting for device-code confirmation. Open the link and enter the code.",
            label
        )),
        color: Some(NOTICE_COLOR_AUTH),
        fields,
        footer: None,
        link: Some(("Open sign-in page".into(), prompt.verification_uri.clone())),
    })
}

fn login_rejected_notice(label: &str) -> Payload {
    Payload::embed(Embed {
        title: "❌ Account signed in, but the game login was rejected (403)".into(),
        description: Some(format!(
            "Alt: **{}**\n\nThe account could not obtain a game session token. \
             Check that it owns the game and has a profile set up.",
            label
        )),
        color: Some(NOTICE_COLOR_ERROR),
        ..Default::default()
    })
}
