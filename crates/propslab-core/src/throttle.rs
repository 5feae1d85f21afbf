//! Global request pacing.
//!
//! A single limiter is shared by both fetch strategies so the combined
//! request rate, not the per-strategy rate, is what the remote side
//! observes. Sliding window over the timestamps of recent dispatches;
//! the lock is dropped while sleeping so waiters don't convoy.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::target::RateLimit;

#[derive(Clone)]
pub struct RateLimiter {
    limit: RateLimit,
    recent: Arc<Mutex<VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            recent: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Wait until a request slot is available, then claim it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut recent = self.recent.lock().await;
                // checked_sub: early in process life the monotonic
                // clock may be smaller than the window; nothing has
                // aged out then.
                if let Some(cutoff) = Instant::now().checked_sub(self.limit.window) {
                    while recent.front().is_some_and(|&t| t < cutoff) {
                        recent.pop_front();
                    }
                }
                if recent.len() < self.limit.max_requests as usize {
                    recent.push_back(Instant::now());
                    return;
                }
                // Oldest dispatch ages out of the window first.
                let oldest = *recent.front().expect("window is non-empty here");
                self.limit.window.saturating_sub(oldest.elapsed())
            };
            tracing::debug!(wait_ms = %wait.as_millis(), "rate limit reached, waiting");
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }
}
