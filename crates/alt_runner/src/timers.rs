//! Keyed task scheduler.
//!
//! Every per-alt timer and background loop is a tokio task registered under an
//! `(alt, kind)` key, so one alt's work can be cancelled as a unit and a key
//! never has two live tasks. Scheduling a key that is already taken aborts the
//! previous task.
//!
//! One-shot timers ([`Scheduler::spawn_after`]) detach their key when the delay
//! elapses and before their body runs, which lets a body schedule its own key
//! again without aborting itself. Long-lived tasks ([`Scheduler::spawn`],
//! [`Scheduler::spawn_every`]) keep their key until they finish or are
//! cancelled.

use crate::types::AltId;
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::trace;

/// Kinds of per-alt work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Pending re-enqueue after a disconnect
    Reconnect,
    /// Periodic world re-read
    Poll,
    /// One-shot world re-read, keyed by reason
    Probe(&'static str),
    /// Post-spawn settle delay before the startup command
    Settle,
    /// Post-spawn wait for the first world before draining
    FirstWorld,
    /// Device-code expiry
    AuthExpiry,
    /// Command queue drain loop
    Drain,
    /// Connection event pump
    Events,
    /// Scoreboard read shortly after listeners attach
    InitialScan,
    /// Delayed drain restart after a respawn
    Respawn,
}

type Key = (AltId, TaskKind);

struct Entry {
    token: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub struct Scheduler {
    tasks: Arc<DashMap<Key, Entry>>,
    next_token: AtomicU64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `task` once after `delay`
    pub fn spawn_after<F>(&self, alt_id: AltId, kind: TaskKind, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let tasks = self.tasks.clone();
        self.register((alt_id, kind), move |token| async move {
            sleep(delay).await;
            tasks.remove_if(&(alt_id, kind), |_, e| e.token == token);
            task.await;
        });
    }

    /// Runs a long-lived task; the key stays registered until it returns
    pub fn spawn<F>(&self, alt_id: AltId, kind: TaskKind, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let tasks = self.tasks.clone();
        self.register((alt_id, kind), move |token| async move {
            task.await;
            tasks.remove_if(&(alt_id, kind), |_, e| e.token == token);
        });
    }

    /// Calls `tick` every `period`, first after one full period
    pub fn spawn_every<F, Fut>(&self, alt_id: AltId, kind: TaskKind, period: Duration, tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register((alt_id, kind), move |_| async move {
            let mut tick = tick;
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tick().await;
            }
        });
    }

    fn register<F, Fut>(&self, key: Key, make: F)
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let body = make(token);
        let (go_tx, go_rx) = oneshot::channel::<()>();

        // The task waits for its entry to be in place before doing anything
        let handle = tokio::spawn(async move {
            if go_rx.await.is_ok() {
                body.await;
            }
        });

        if let Some(previous) = self.tasks.insert(key, Entry { token, handle }) {
            trace!("⏱️ Replacing {:?} for alt {}", key.1, key.0);
            previous.handle.abort();
        }
        let _ = go_tx.send(());
    }

    /// Aborts the task under `(alt_id, kind)`, returning whether one existed
    pub fn cancel(&self, alt_id: AltId, kind: TaskKind) -> bool {
        match self.tasks.remove(&(alt_id, kind)) {
            Some((_, entry)) => {
                entry.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Aborts every task of `alt_id` except the listed kinds
    pub fn cancel_alt_except(&self, alt_id: AltId, keep: &[TaskKind]) -> usize {
        let keys: Vec<Key> = self
            .tasks
            .iter()
            .map(|e| *e.key())
            .filter(|(id, kind)| *id == alt_id && !keep.contains(kind))
            .collect();
        keys.into_iter().filter(|(id, kind)| self.cancel(*id, *kind)).count()
    }

    /// Aborts every task of `alt_id`
    pub fn cancel_alt(&self, alt_id: AltId) -> usize {
        self.cancel_alt_except(alt_id, &[])
    }

    pub fn is_scheduled(&self, alt_id: AltId, kind: TaskKind) -> bool {
        self.tasks.contains_key(&(alt_id, kind))
    }

    pub fn active_count(&self) -> usize {
        self.tasks.len()
    }

    /// Aborts everything
    pub fn shutdown(&self) {
        let keys: Vec<Key> = self.tasks.iter().map(|e| *e.key()).collect();
        for (alt_id, kind) in keys {
            self.cancel(alt_id, kind);
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler").field("active", &self.tasks.len()).finish()
    }
}
