//! Global login scheduler.
//!
//! All connection attempts, for every alt, go through one FIFO queue serviced
//! by a single worker task. The worker honours cooldown watermarks raised by
//! server rate-limit signals and leaves a fixed gap plus jitter between two
//! attempts, so the server never sees a login burst from this process.

use crate::config::LoginSettings;
use crate::types::AltId;
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Settle jitter added on top of a cooldown wait
const COOLDOWN_SETTLE_MS: (u64, u64) = (300, 700);
/// Pause after skipping an alt that is already connected
const ALREADY_CONNECTED_PAUSE: Duration = Duration::from_millis(300);

/// Result of one queued login
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Connected,
    AlreadyConnected,
    /// The alt was stopped or the runner went away before its turn
    Cancelled,
    Failed(String),
}

impl LoginOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, LoginOutcome::Connected | LoginOutcome::AlreadyConnected)
    }
}

/// What the scheduler needs from the runner
#[async_trait]
pub trait LoginTarget: Send + Sync {
    fn is_connected(&self, alt_id: AltId) -> bool;

    /// Per-alt cooldown watermark, if any
    fn alt_cooldown(&self, alt_id: AltId) -> Option<Instant>;

    /// Performs the actual connect; errors are reported as `Failed`
    async fn connect(&self, alt_id: AltId) -> LoginOutcome;
}

/// Process-wide cooldown watermarks. Both only ever move forward.
#[derive(Debug, Default)]
pub struct Cooldowns {
    network: Mutex<Option<Instant>>,
    registration: Mutex<Option<Instant>>,
}

impl Cooldowns {
    pub fn raise_network(&self, until: Instant) {
        raise(&self.network, until);
    }

    pub fn raise_registration(&self, until: Instant) {
        raise(&self.registration, until);
    }

    pub fn network(&self) -> Option<Instant> {
        *self.network.lock()
    }

    pub fn registration(&self) -> Option<Instant> {
        *self.registration.lock()
    }

    /// Latest of the global watermarks
    pub fn global(&self) -> Option<Instant> {
        self.network().max(self.registration())
    }
}

fn raise(slot: &Mutex<Option<Instant>>, until: Instant) {
    let mut guard = slot.lock();
    *guard = Some(guard.map_or(until, |current| current.max(until)));
}

/// Uniform random duration in `[lo, hi]` milliseconds
pub(crate) fn jitter_between(lo: u64, hi: u64) -> Duration {
    if hi <= lo {
        return Duration::from_millis(lo);
    }
    Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
}

#[derive(Default)]
struct QueueInner {
    queue: VecDeque<AltId>,
    queued: HashSet<AltId>,
    waiters: HashMap<AltId, Vec<oneshot::Sender<LoginOutcome>>>,
    processing: bool,
}

/// Statistics about the login queue
#[derive(Debug, Clone, Default)]
pub struct LoginStats {
    pub queued: usize,
    pub processing: bool,
    pub attempts: u64,
}

pub struct LoginScheduler {
    settings: LoginSettings,
    target: Weak<dyn LoginTarget>,
    inner: Mutex<QueueInner>,
    cooldowns: Cooldowns,
    attempts: std::sync::atomic::AtomicU64,
}

impl LoginScheduler {
    pub fn new(settings: LoginSettings, target: Weak<dyn LoginTarget>) -> Self {
        Self {
            settings,
            target,
            inner: Mutex::new(QueueInner::default()),
            cooldowns: Cooldowns::default(),
            attempts: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn cooldowns(&self) -> &Cooldowns {
        &self.cooldowns
    }

    /// Queues a login for `alt_id` and waits for its outcome.
    ///
    /// Calling this while the alt is already queued does not add a second
    /// entry; every caller receives the same outcome.
    pub async fn enqueue_login(self: &Arc<Self>, alt_id: AltId) -> LoginOutcome {
        let (rx, start_worker) = {
            let mut inner = self.inner.lock();
            let (tx, rx) = oneshot::channel();
            if inner.queued.insert(alt_id) {
                inner.queue.push_back(alt_id);
                debug!("📥 Alt {} queued for login (position {})", alt_id, inner.queue.len());
            }
            inner.waiters.entry(alt_id).or_default().push(tx);
            let start = !inner.processing;
            inner.processing = true;
            (rx, start)
        };

        if start_worker {
            tokio::spawn(self.clone().process_queue());
        }

        rx.await.unwrap_or(LoginOutcome::Cancelled)
    }

    /// Drops a queued entry, resolving its waiters as `Cancelled`
    pub fn remove(&self, alt_id: AltId) -> bool {
        let waiters = {
            let mut inner = self.inner.lock();
            if !inner.queued.remove(&alt_id) {
                return false;
            }
            inner.queue.retain(|id| *id != alt_id);
            inner.waiters.remove(&alt_id).unwrap_or_default()
        };
        resolve(waiters, LoginOutcome::Cancelled);
        true
    }

    pub fn is_queued(&self, alt_id: AltId) -> bool {
        self.inner.lock().queued.contains(&alt_id)
    }

    pub fn get_stats(&self) -> LoginStats {
        let inner = self.inner.lock();
        LoginStats {
            queued: inner.queue.len(),
            processing: inner.processing,
            attempts: self.attempts.load(std::sync::atomic::Ordering::Relaxed),
        }
    }

    async fn process_queue(self: Arc<Self>) {
        loop {
            let (alt_id, waiters) = {
                let mut inner = self.inner.lock();
                match inner.queue.pop_front() {
                    Some(alt_id) => {
                        inner.queued.remove(&alt_id);
                        let waiters = inner.waiters.remove(&alt_id).unwrap_or_default();
                        (alt_id, waiters)
                    }
                    None => {
                        inner.processing = false;
                        return;
                    }
                }
            };

            let Some(target) = self.target.upgrade() else {
                resolve(waiters, LoginOutcome::Cancelled);
                continue;
            };

            let wait_until = self.cooldowns.global().max(target.alt_cooldown(alt_id));
            if let Some(until) = wait_until {
                let now = Instant::now();
                if until > now {
                    let delay = (until - now) + jitter_between(COOLDOWN_SETTLE_MS.0, COOLDOWN_SETTLE_MS.1);
                    info!("⏳ Alt {} delaying login {} ms due to cooldowns", alt_id, delay.as_millis());
                    sleep(delay).await;
                }
            }

            if target.is_connected(alt_id) {
                debug!("🔁 Alt {} already online, skipping connect", alt_id);
                resolve(waiters, LoginOutcome::AlreadyConnected);
                drop(target);
                sleep(ALREADY_CONNECTED_PAUSE).await;
                continue;
            }

            self.attempts.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            let outcome = target.connect(alt_id).await;
            drop(target);
            if let LoginOutcome::Failed(reason) = &outcome {
                warn!("❌ Login for alt {} failed: {}", alt_id, reason);
            }
            resolve(waiters, outcome);

            let gap = self.settings.min_gap() + jitter_between(0, self.settings.jitter_ms);
            sleep(gap).await;
        }
    }
}

impl std::fmt::Debug for LoginScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginScheduler")
            .field("settings", &self.settings)
            .field("cooldowns", &self.cooldowns)
            .finish()
    }
}

fn resolve(waiters: Vec<oneshot::Sender<LoginOutcome>>, outcome: LoginOutcome) {
    for waiter in waiters {
        let _ = waiter.send(outcome.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashmap::DashSet;

    #[derive(Default)]
    struct RecordingTarget {
        attempts: Mutex<Vec<(AltId, Instant)>>,
        connected: DashSet<AltId>,
        alt_cooldowns: Mutex<HashMap<AltId, Instant>>,
        fail: DashSet<AltId>,
    }

    #[async_trait]
    impl LoginTarget for RecordingTarget {
        fn is_connected(&self, alt_id: AltId) -> bool {
            self.connected.contains(&alt_id)
        }

        fn alt_cooldown(&self, alt_id: AltId) -> Option<Instant> {
            self.alt_cooldowns.lock().get(&alt_id).copied()
        }

        async fn connect(&self, alt_id: AltId) -> LoginOutcome {
            self.attempts.lock().push((alt_id, Instant::now()));
            if self.fail.contains(&alt_id) {
                return LoginOutcome::Failed("boom".into());
            }
            self.connected.insert(alt_id);
            LoginOutcome::Connected
        }
    }

    fn settings() -> LoginSettings {
        LoginSettings {
            jitter_ms: 1_500,
            min_gap_ms: 15_000,
            throttle_cooldown_ms: 15_000,
        }
    }

    fn scheduler(target: &Arc<RecordingTarget>) -> Arc<LoginScheduler> {
        let weak: Weak<dyn LoginTarget> = Arc::downgrade(target) as Weak<dyn LoginTarget>;
        Arc::new(LoginScheduler::new(settings(), weak))
    }

    #[tokio::test(start_paused = true)]
    async fn test_services_in_order_with_minimum_gap() {
        let target = Arc::new(RecordingTarget::default());
        let login = scheduler(&target);

        let handles: Vec<_> = [10, 20, 30]
            .into_iter()
            .map(|id| {
                let login = login.clone();
                tokio::spawn(async move { login.enqueue_login(id).await })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap(), LoginOutcome::Connected);
        }

        let attempts = target.attempts.lock().clone();
        let ids: Vec<AltId> = attempts.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![10, 20, 30]);
        for pair in attempts.windows(2) {
            assert!(pair[1].1 - pair[0].1 >= Duration::from_millis(15_000));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_coalesce() {
        let target = Arc::new(RecordingTarget::default());
        let login = scheduler(&target);

        // Occupy the worker so the next requests stay queued
        let first = {
            let login = login.clone();
            tokio::spawn(async move { login.enqueue_login(1).await })
        };
        tokio::task::yield_now().await;

        let a = {
            let login = login.clone();
            tokio::spawn(async move { login.enqueue_login(2).await })
        };
        let b = {
            let login = login.clone();
            tokio::spawn(async move { login.enqueue_login(2).await })
        };
        tokio::task::yield_now().await;
        assert!(login.is_queued(2));
        assert_eq!(login.get_stats().queued, 1);

        assert_eq!(first.await.unwrap(), LoginOutcome::Connected);
        assert_eq!(a.await.unwrap(), LoginOutcome::Connected);
        assert_eq!(b.await.unwrap(), LoginOutcome::Connected);
        assert_eq!(target.attempts.lock().iter().filter(|(id, _)| *id == 2).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_connected_skips_connect() {
        let target = Arc::new(RecordingTarget::default());
        target.connected.insert(5);
        let login = scheduler(&target);

        assert_eq!(login.enqueue_login(5).await, LoginOutcome::AlreadyConnected);
        assert!(target.attempts.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_returned_and_queue_continues() {
        let target = Arc::new(RecordingTarget::default());
        target.fail.insert(1);
        let login = scheduler(&target);

        let failing = {
            let login = login.clone();
            tokio::spawn(async move { login.enqueue_login(1).await })
        };
        tokio::task::yield_now().await;
        let next = {
            let login = login.clone();
            tokio::spawn(async move { login.enqueue_login(2).await })
        };

        assert_eq!(failing.await.unwrap(), LoginOutcome::Failed("boom".into()));
        assert_eq!(next.await.unwrap(), LoginOutcome::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_cooldown_watermarks() {
        let target = Arc::new(RecordingTarget::default());
        let login = scheduler(&target);
        let start = Instant::now();

        login.cooldowns().raise_registration(start + Duration::from_secs(20));
        login.cooldowns().raise_registration(start + Duration::from_secs(5));
        target.alt_cooldowns.lock().insert(3, start + Duration::from_secs(40));

        assert_eq!(login.enqueue_login(3).await, LoginOutcome::Connected);
        let (_, at) = target.attempts.lock()[0];
        assert!(at - start >= Duration::from_millis(40_300));
        assert!(at - start <= Duration::from_millis(40_700));
        assert_eq!(login.cooldowns().registration(), Some(start + Duration::from_secs(20)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_entry_is_cancelled() {
        let target = Arc::new(RecordingTarget::default());
        let login = scheduler(&target);

        let first = {
            let login = login.clone();
            tokio::spawn(async move { login.enqueue_login(1).await })
        };
        tokio::task::yield_now().await;
        let second = {
            let login = login.clone();
            tokio::spawn(async move { login.enqueue_login(2).await })
        };
        tokio::task::yield_now().await;

        assert!(login.remove(2));
        assert_eq!(second.await.unwrap(), LoginOutcome::Cancelled);
        assert_eq!(first.await.unwrap(), LoginOutcome::Connected);
        assert!(!target.connected.contains(&2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_target_cancels() {
        let target = Arc::new(RecordingTarget::default());
        let login = scheduler(&target);
        drop(target);
        assert_eq!(login.enqueue_login(1).await, LoginOutcome::Cancelled);
    }
}
