//! Wall-clock source for persisted timestamps.
//!
//! Persisted values (`last_seen`, `world_updated_at`, tracker `last_run_at`) are
//! unix seconds, while every timer in the crate runs on tokio's clock. Deriving
//! the former from the latter keeps both consistent when tests pause time.

use chrono::Utc;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct Clock {
    base_unix_ms: i64,
    base_instant: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            base_unix_ms: Utc::now().timestamp_millis(),
            base_instant: Instant::now(),
        }
    }

    /// Clock anchored at a fixed unix time
    pub fn starting_at(unix_secs: i64) -> Self {
        Self {
            base_unix_ms: unix_secs * 1000,
            base_instant: Instant::now(),
        }
    }

    pub fn now_millis(&self) -> i64 {
        self.base_unix_ms + self.base_instant.elapsed().as_millis() as i64
    }

    pub fn now_secs(&self) -> i64 {
        self.now_millis() / 1000
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_follows_paused_tokio_time() {
        let clock = Clock::starting_at(1_000);
        assert_eq!(clock.now_secs(), 1_000);

        tokio::time::advance(Duration::from_secs(90)).await;
        assert_eq!(clock.now_secs(), 1_090);
    }
}
