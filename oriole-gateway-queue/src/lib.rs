//! Queue for shards to request permission to start a new gateway session.
//!
//! Discord limits how often new sessions may be started, both per
//! `max_concurrency` bucket (`shard_id % max_concurrency`, one identify
//! every [`IDENTIFY_DELAY`]) and per rolling day (`session_start_limit`
//! returned from `/gateway/bot`). [`IdentifyQueue`] is the abstraction a
//! `ShardManager` identifies through; [`InMemoryQueue`] implements both
//! limits for a single-process deployment, and [`NoOpQueue`] is available
//! for running behind an external broker that already enforces them.

#![warn(clippy::all, missing_docs)]
#![allow(clippy::module_name_repetitions)]

use oriole_dispatch::TimesPerWindow;
use std::{
    fmt::Debug,
    future::{self, Future},
    pin::Pin,
    time::Duration,
};
use tokio::{sync::Mutex, time::Instant};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Minimum spacing between two identifies within the same `max_concurrency`
/// bucket.
pub const IDENTIFY_DELAY: Duration = Duration::from_secs(5);

/// Requests permission to start a new gateway session.
///
/// Implementations usually only matter for multi-process deployments; a
/// single-process `ShardManager` can use [`InMemoryQueue`] directly.
pub trait IdentifyQueue: Debug + Send + Sync {
    /// Suspend until `shard_id` (`[id, total]`) may send its IDENTIFY
    /// payload.
    fn enqueue(&self, shard_id: [u64; 2]) -> BoxFuture<'_, ()>;
}

#[derive(Debug)]
struct DailyLimit {
    remaining: u64,
    total: u64,
    resets_in: Duration,
    recorded_at: Instant,
}

/// Single-process [`IdentifyQueue`]: one [`TimesPerWindow`] per
/// `max_concurrency` bucket, plus the account-wide daily session start
/// limit Discord reports from `/gateway/bot`.
#[derive(Debug)]
pub struct InMemoryQueue {
    buckets: Vec<TimesPerWindow>,
    daily: Mutex<DailyLimit>,
}

impl InMemoryQueue {
    /// Create a queue with `max_concurrency` identify buckets, seeded with
    /// the daily session start limit from `/gateway/bot`
    /// (`remaining`/`reset_after`/`total` fields of `session_start_limit`).
    #[must_use]
    pub fn new(max_concurrency: usize, remaining: u64, reset_after: Duration, total: u64) -> Self {
        let buckets = (0..max_concurrency.max(1))
            .map(|_| TimesPerWindow::new(1, IDENTIFY_DELAY))
            .collect();

        Self {
            buckets,
            daily: Mutex::new(DailyLimit {
                remaining,
                total,
                resets_in: reset_after,
                recorded_at: Instant::now(),
            }),
        }
    }

    /// Refresh the daily session start limit from a fresh `/gateway/bot`
    /// response.
    pub async fn update(&self, remaining: u64, reset_after: Duration, total: u64) {
        let mut daily = self.daily.lock().await;

        daily.remaining = remaining;
        daily.total = total;
        daily.resets_in = reset_after;
        daily.recorded_at = Instant::now();
    }

    async fn wait_for_daily_allowance(&self) {
        loop {
            let wait = {
                let mut daily = self.daily.lock().await;

                if daily.remaining > 0 {
                    daily.remaining -= 1;
                    return;
                }

                let elapsed = daily.recorded_at.elapsed();

                if elapsed >= daily.resets_in {
                    // No fresher number has arrived via `update`; assume a
                    // full new day and spend one slot on this identify.
                    daily.remaining = daily.total.saturating_sub(1);
                    daily.recorded_at = Instant::now();
                    return;
                }

                daily.resets_in - elapsed
            };

            tokio::time::sleep(wait).await;
        }
    }
}

impl IdentifyQueue for InMemoryQueue {
    fn enqueue(&self, [shard_id, _total]: [u64; 2]) -> BoxFuture<'_, ()> {
        #[allow(clippy::cast_possible_truncation)]
        let bucket = (shard_id % self.buckets.len() as u64) as usize;

        Box::pin(async move {
            self.wait_for_daily_allowance().await;

            #[cfg(feature = "tracing")]
            tracing::debug!(shard_id, bucket, "waiting for identify allowance");

            if self.buckets[bucket].acquire().await.is_err() {
                #[cfg(feature = "tracing")]
                tracing::warn!(shard_id, "identify bucket closed, proceeding unthrottled");
            }
        })
    }
}

/// An [`IdentifyQueue`] that grants every request immediately.
///
/// Useful when running behind an external broker that already serializes
/// identifies across every process in the deployment. Using this without
/// such a broker **will** get the bot rate limited.
#[derive(Debug)]
pub struct NoOpQueue;

impl IdentifyQueue for NoOpQueue {
    fn enqueue(&self, _shard_id: [u64; 2]) -> BoxFuture<'_, ()> {
        Box::pin(future::ready(()))
    }
}
