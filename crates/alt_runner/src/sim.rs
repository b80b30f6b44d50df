//! In-process game server.
//!
//! [`SimulatedServer`] implements [`GameClient`] without any networking. Tests
//! and the daemon's dry-run mode use it to drive the runner through spawns,
//! kicks, device-code prompts and sidebar changes, and to observe the chat
//! lines the runner sends.

use crate::client::{
    ConnectOptions, ConnectionEvent, DeviceCodePrompt, GameClient, GameConnection, ScoreboardCause,
    ScoreboardUpdate, TabMatch,
};
use crate::error::{ClientError, ClientResult};
use crate::scoreboard::ScoreboardSnapshot;
use crate::types::PlayerIdentity;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tracing::debug;

const SIDEBAR_OBJECTIVE: &str = "sidebar";

/// One chat line received by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRecord {
    /// Index of the connection that sent it
    pub connection: usize,
    pub username: String,
    pub line: String,
    pub at: Instant,
}

#[derive(Default)]
struct SimInner {
    sidebar: Mutex<Option<ScoreboardSnapshot>>,
    players: Mutex<Vec<String>>,
    spawn_delay: Mutex<Duration>,
    device_code: Mutex<Option<DeviceCodePrompt>>,
    connect_error: Mutex<Option<String>>,
    probe_error: AtomicBool,
    connections: Mutex<Vec<Arc<SimConnection>>>,
    connect_log: Mutex<Vec<ConnectOptions>>,
    chat_log: Mutex<Vec<ChatRecord>>,
}

#[derive(Clone, Default)]
pub struct SimulatedServer {
    inner: Arc<SimInner>,
}

impl SimulatedServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the sidebar and pushes a score update to every live connection
    pub fn set_sidebar<S: AsRef<str>>(&self, lines: &[S]) {
        let mut snapshot = ScoreboardSnapshot::sidebar(SIDEBAR_OBJECTIVE, lines);
        snapshot.title = "Factions".into();
        *self.inner.sidebar.lock() = Some(snapshot.clone());

        for connection in self.live() {
            connection.send(ConnectionEvent::Scoreboard(ScoreboardUpdate {
                cause: ScoreboardCause::ScoreUpdated,
                objective: snapshot.clone(),
            }));
        }
    }

    pub fn clear_sidebar(&self) {
        *self.inner.sidebar.lock() = None;
    }

    /// Names returned by name completion
    pub fn set_players<S: AsRef<str>>(&self, players: &[S]) {
        *self.inner.players.lock() = players.iter().map(|p| p.as_ref().to_string()).collect();
    }

    /// Delay between connect and spawn
    pub fn set_spawn_delay(&self, delay: Duration) {
        *self.inner.spawn_delay.lock() = delay;
    }

    /// When set, new connections prompt for a device code instead of spawning
    pub fn set_device_code(&self, prompt: Option<DeviceCodePrompt>) {
        *self.inner.device_code.lock() = prompt;
    }

    /// When set, every connect attempt fails with this message
    pub fn fail_connects(&self, error: Option<String>) {
        *self.inner.connect_error.lock() = error;
    }

    pub fn fail_probes(&self, fail: bool) {
        self.inner.probe_error.store(fail, Ordering::SeqCst);
    }

    /// Confirms the pending device code of the newest connection
    pub fn complete_device_auth(&self) -> bool {
        match self.latest_live() {
            Some(connection) => {
                connection.spawn_now();
                true
            }
            None => false,
        }
    }

    /// Kicks the newest live connection
    pub fn kick(&self, reason: &str) -> bool {
        match self.latest_live() {
            Some(connection) => {
                connection.ended.store(true, Ordering::SeqCst);
                connection.send(ConnectionEvent::Kicked(reason.to_string()));
                connection.send(ConnectionEvent::End(reason.to_string()));
                true
            }
            None => false,
        }
    }

    /// Delivers an arbitrary event to the newest live connection
    pub fn emit(&self, event: ConnectionEvent) -> bool {
        match self.latest_live() {
            Some(connection) => {
                connection.send(event);
                true
            }
            None => false,
        }
    }

    /// Opens a container window on the newest live connection
    pub fn open_window(&self) {
        if let Some(connection) = self.latest_live() {
            connection.open_window.store(true, Ordering::SeqCst);
        }
    }

    pub fn live_connections(&self) -> usize {
        self.live().len()
    }

    /// Connections ever opened
    pub fn connection_count(&self) -> usize {
        self.inner.connections.lock().len()
    }

    pub fn connect_log(&self) -> Vec<ConnectOptions> {
        self.inner.connect_log.lock().clone()
    }

    pub fn chat_log(&self) -> Vec<ChatRecord> {
        self.inner.chat_log.lock().clone()
    }

    pub fn chat_lines(&self) -> Vec<String> {
        self.inner.chat_log.lock().iter().map(|r| r.line.clone()).collect()
    }

    fn live(&self) -> Vec<Arc<SimConnection>> {
        self.inner
            .connections
            .lock()
            .iter()
            .filter(|c| !c.ended.load(Ordering::SeqCst))
            .cloned()
            .collect()
    }

    fn latest_live(&self) -> Option<Arc<SimConnection>> {
        self.live().pop()
    }
}

#[async_trait]
impl GameClient for SimulatedServer {
    async fn connect(
        &self,
        options: ConnectOptions,
    ) -> ClientResult<(Arc<dyn GameConnection>, mpsc::UnboundedReceiver<ConnectionEvent>)> {
        self.inner.connect_log.lock().push(options.clone());
        if let Some(error) = self.inner.connect_error.lock().clone() {
            return Err(ClientError::Connect(error));
        }

        let (events, receiver) = mpsc::unbounded_channel();
        let connection = {
            let mut connections = self.inner.connections.lock();
            let connection = Arc::new(SimConnection {
                id: connections.len(),
                username: options.username.clone(),
                server: Arc::downgrade(&self.inner),
                events,
                ended: AtomicBool::new(false),
                open_window: AtomicBool::new(false),
            });
            connections.push(connection.clone());
            connection
        };
        debug!("Simulated connection #{} for {}", connection.id, connection.username);

        let prompt = self.inner.device_code.lock().clone();
        match prompt {
            Some(prompt) => connection.send(ConnectionEvent::DeviceCode(prompt)),
            None => {
                let delay = *self.inner.spawn_delay.lock();
                let spawning = connection.clone();
                tokio::spawn(async move {
                    sleep(delay).await;
                    spawning.spawn_now();
                });
            }
        }

        Ok((connection as Arc<dyn GameConnection>, receiver))
    }
}

pub struct SimConnection {
    id: usize,
    username: String,
    server: Weak<SimInner>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    ended: AtomicBool,
    open_window: AtomicBool,
}

impl SimConnection {
    fn send(&self, event: ConnectionEvent) {
        // The runner may already have dropped the receiver
        let _ = self.events.send(event);
    }

    fn spawn_now(&self) {
        if self.ended.load(Ordering::SeqCst) {
            return;
        }
        self.send(ConnectionEvent::Spawn);
        if let Some(sidebar) = self.server.upgrade().and_then(|s| s.sidebar.lock().clone()) {
            self.send(ConnectionEvent::Scoreboard(ScoreboardUpdate {
                cause: ScoreboardCause::Created,
                objective: sidebar,
            }));
        }
    }
}

#[async_trait]
impl GameConnection for SimConnection {
    fn player(&self) -> Option<PlayerIdentity> {
        Some(PlayerIdentity {
            uuid: Some(format!("00000000-0000-0000-0000-{:012}", self.id)),
            username: self.username.clone(),
        })
    }

    fn chat(&self, line: &str) -> ClientResult<()> {
        if self.ended.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        let server = self.server.upgrade().ok_or(ClientError::Closed)?;
        server.chat_log.lock().push(ChatRecord {
            connection: self.id,
            username: self.username.clone(),
            line: line.to_string(),
            at: Instant::now(),
        });
        Ok(())
    }

    async fn tab_complete(&self, _prefix: &str, timeout: Duration) -> ClientResult<Vec<TabMatch>> {
        if self.ended.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        let server = self.server.upgrade().ok_or(ClientError::Closed)?;
        if server.probe_error.load(Ordering::SeqCst) {
            return Err(ClientError::Timeout(timeout.as_millis() as u64));
        }
        let players = server.players.lock().clone();
        Ok(players.into_iter().map(TabMatch::new).collect())
    }

    fn sidebar(&self) -> Option<ScoreboardSnapshot> {
        self.server.upgrade().and_then(|s| s.sidebar.lock().clone())
    }

    fn has_open_window(&self) -> bool {
        self.open_window.load(Ordering::SeqCst)
    }

    fn close_window(&self) {
        self.open_window.store(false, Ordering::SeqCst);
    }

    fn end(&self, reason: &str) {
        if !self.ended.swap(true, Ordering::SeqCst) {
            self.send(ConnectionEvent::End(reason.to_string()));
        }
    }
}
