//! Process-wide rate limiter, independent of any per-route bucket.
//!
//! Discord enforces a global request budget (50 requests/second for a bot
//! token by default) on top of per-route buckets, and can additionally
//! freeze the whole process with a global 429. [`GlobalRateLimiter`] models
//! both: steady-state admission through a [`TimesPerWindow`] gate, and a
//! freeze that every acquirer waits out before the gate is consulted again.

use oriole_dispatch::TimesPerWindow;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::Notify;

/// Default global request budget for a bot token: 50 requests/second.
pub const DEFAULT_LIMIT: usize = 50;

/// The steady-state admission strategy a [`GlobalRateLimiter`] applies
/// before a global 429 freeze is ever considered.
#[derive(Clone, Debug)]
enum Gate {
    /// A `TimesPerWindow` budget gates every acquisition.
    Limited(Arc<TimesPerWindow>),
    /// No steady-state budget at all; admits immediately. For tokens whose
    /// global limit has been lifted elsewhere (e.g. a negotiated higher
    /// tier), so they pay no scheduling cost here.
    Unlimited,
}

/// The process-wide gate every HTTP request passes through before its
/// per-route bucket is consulted.
#[derive(Clone, Debug)]
pub struct GlobalRateLimiter {
    gate: Gate,
    frozen: Arc<AtomicBool>,
    thawed: Arc<Notify>,
}

impl GlobalRateLimiter {
    /// Create a limiter admitting at most `limit` requests per `window`.
    #[must_use]
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            gate: Gate::Limited(Arc::new(TimesPerWindow::new(limit, window))),
            frozen: Arc::new(AtomicBool::new(false)),
            thawed: Arc::new(Notify::new()),
        }
    }

    /// Create a limiter with no steady-state budget. A global 429 still
    /// freezes it via [`Self::freeze`]; it just never throttles on its own.
    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            gate: Gate::Unlimited,
            frozen: Arc::new(AtomicBool::new(false)),
            thawed: Arc::new(Notify::new()),
        }
    }

    /// Whether this limiter has no steady-state budget.
    #[must_use]
    pub const fn is_unlimited(&self) -> bool {
        matches!(self.gate, Gate::Unlimited)
    }

    /// Suspend until the process is not frozen by a prior global 429 and a
    /// slot in the steady-state budget is available.
    pub async fn acquire(&self) {
        loop {
            if self.frozen.load(Ordering::Acquire) {
                self.thawed.notified().await;
                continue;
            }

            match &self.gate {
                Gate::Limited(gate) if gate.acquire().await.is_err() => {
                    // The gate was closed; there is nothing further to wait on.
                    return;
                }
                Gate::Limited(_) | Gate::Unlimited => {}
            }

            return;
        }
    }

    /// Freeze every current and future acquirer for `retry_after`, as
    /// instructed by a global 429 response.
    pub fn freeze(&self, retry_after: Duration) {
        if self.frozen.swap(true, Ordering::AcqRel) {
            // Already frozen; let the in-flight timer finish rather than
            // resetting it.
            return;
        }

        let frozen = Arc::clone(&self.frozen);
        let thawed = Arc::clone(&self.thawed);

        tokio::spawn(async move {
            tokio::time::sleep(retry_after).await;
            frozen.store(false, Ordering::Release);
            thawed.notify_waiters();
        });
    }

    /// Whether the process is currently frozen by a global 429.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }
}

impl Default for GlobalRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT, Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::GlobalRateLimiter;
    use static_assertions::assert_impl_all;
    use std::time::Duration;

    assert_impl_all!(GlobalRateLimiter: Clone, Send, Sync);

    #[tokio::test(start_paused = true)]
    async fn admits_up_to_limit_immediately() {
        let limiter = GlobalRateLimiter::new(2, Duration::from_secs(1));

        limiter.acquire().await;
        limiter.acquire().await;

        assert!(tokio::time::timeout(Duration::from_millis(10), limiter.acquire())
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn freeze_blocks_acquisition_until_retry_after_elapses() {
        let limiter = GlobalRateLimiter::new(5, Duration::from_secs(1));
        limiter.freeze(Duration::from_millis(100));

        assert!(limiter.is_frozen());
        assert!(tokio::time::timeout(Duration::from_millis(50), limiter.acquire())
            .await
            .is_err());

        tokio::time::advance(Duration::from_millis(100)).await;

        tokio::time::timeout(Duration::from_millis(50), limiter.acquire())
            .await
            .expect("should thaw and admit");
        assert!(!limiter.is_frozen());
    }

    #[tokio::test(start_paused = true)]
    async fn second_freeze_does_not_restart_the_timer() {
        let limiter = GlobalRateLimiter::new(5, Duration::from_secs(1));
        limiter.freeze(Duration::from_millis(100));

        tokio::time::advance(Duration::from_millis(60)).await;
        limiter.freeze(Duration::from_millis(100));
        tokio::time::advance(Duration::from_millis(41)).await;
        tokio::task::yield_now().await;

        assert!(!limiter.is_frozen());
    }
}
