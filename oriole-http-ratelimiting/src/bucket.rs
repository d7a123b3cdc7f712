//! Per-route admission: the [`BucketRateLimiter`] and its background queue
//! tasks.
//!
//! A route starts out [`RouteState::Pending`]: nothing is known about its
//! bucket yet, so it is served strictly one request at a time by a private
//! placeholder [`Bucket`]. The first response carrying rate-limit headers
//! either reveals a server-assigned bucket id (the route becomes
//! [`RouteState::Known`], sharing that `Bucket` with every other route that
//! resolves to the same id) or reveals there are no rate-limit headers at
//! all (the route becomes [`RouteState::Unlimited`] and is admitted without
//! queueing from then on).

use crate::{
    headers::{RatelimitHeaders, RatelimitScope},
    ticket::{self, TicketNotifier, TicketReceiver},
};
use oriole_model::Path;
use std::{
    cmp::Ordering as CmpOrdering,
    collections::{BinaryHeap, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};
use tokio::{
    sync::{Mutex as AsyncMutex, Notify},
    time::{sleep, timeout},
};

/// Sentinel meaning "not yet known"; Discord never actually reports this as
/// a real limit/remaining/reset-after value.
const UNSET: u64 = u64::MAX;

/// How long the bucket may have zero requests remaining.
#[derive(Clone, Debug)]
pub enum TimeRemaining {
    /// The reset window has already elapsed.
    Finished,
    /// No request has completed yet, so no reset window has started.
    NotStarted,
    /// Time left until the reset window elapses.
    Some(Duration),
}

/// Live token-leaking admission state for one discovered (or pending)
/// bucket.
#[derive(Debug)]
pub struct Bucket {
    limit: AtomicU64,
    remaining: AtomicU64,
    reset_after: AtomicU64,
    started_at: AsyncMutex<Option<Instant>>,
    queue: BucketQueue,
}

impl Bucket {
    fn new() -> Self {
        Self {
            limit: AtomicU64::new(UNSET),
            remaining: AtomicU64::new(UNSET),
            reset_after: AtomicU64::new(UNSET),
            started_at: AsyncMutex::new(None),
            queue: BucketQueue::default(),
        }
    }

    /// Total tickets allotted in a reset cycle, or [`UNSET`] before
    /// discovery.
    #[must_use]
    pub fn limit(&self) -> u64 {
        self.limit.load(Ordering::Relaxed)
    }

    /// Tickets remaining in the current cycle.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.remaining.load(Ordering::Relaxed)
    }

    /// Milliseconds after [`Self::started_at`] the bucket resets.
    #[must_use]
    pub fn reset_after(&self) -> u64 {
        self.reset_after.load(Ordering::Relaxed)
    }

    /// When the current reset cycle began, if one has.
    pub async fn started_at(&self) -> Option<Instant> {
        *self.started_at.lock().await
    }

    async fn time_remaining(&self) -> TimeRemaining {
        let reset_after = self.reset_after();
        let started_at = match *self.started_at.lock().await {
            Some(v) => v,
            None => return TimeRemaining::NotStarted,
        };
        let elapsed = started_at.elapsed();

        if elapsed > Duration::from_millis(reset_after) {
            return TimeRemaining::Finished;
        }

        TimeRemaining::Some(Duration::from_millis(reset_after) - elapsed)
    }

    async fn try_reset(&self) -> bool {
        if self.started_at.lock().await.is_none() {
            return false;
        }

        if let TimeRemaining::Finished = self.time_remaining().await {
            self.remaining.store(self.limit(), Ordering::Relaxed);
            *self.started_at.lock().await = None;

            true
        } else {
            false
        }
    }

    /// Fold a response's parsed `(limit, remaining, reset_after_ms)` into
    /// this bucket, or, if `None` (no rate-limit headers at all on an
    /// otherwise-tracked bucket), conservatively assume one ticket was
    /// spent.
    async fn update(&self, ratelimits: Option<(u64, u64, u64)>) {
        let bucket_limit = self.limit();

        {
            let mut started_at = self.started_at.lock().await;

            if started_at.is_none() {
                started_at.replace(Instant::now());
            }
        }

        if let Some((limit, remaining, reset_after)) = ratelimits {
            if bucket_limit != limit && bucket_limit == UNSET {
                self.reset_after.store(reset_after, Ordering::SeqCst);
                self.limit.store(limit, Ordering::SeqCst);
            }

            self.remaining.store(remaining, Ordering::Relaxed);
        } else {
            self.remaining.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

/// One pending admission: lower `priority` is more urgent; ties are broken
/// in arrival order via `seq`.
#[derive(Debug)]
struct QueueEntry {
    priority: i64,
    seq: u64,
    notifier: TicketNotifier,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    // `BinaryHeap` is a max-heap; invert both fields so the most urgent
    // entry (lowest priority value, then lowest seq) compares greatest.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Default)]
struct QueueInner {
    heap: BinaryHeap<QueueEntry>,
    next_seq: u64,
    /// Whether a [`BucketQueueTask`] is currently draining this queue.
    /// Guarded by the same lock as `heap` so a push can never land in the
    /// gap between a drained-dry check and the task actually stopping.
    running: bool,
}

/// Priority-ordered queue of pending admissions for one [`Bucket`].
#[derive(Debug, Default)]
struct BucketQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl BucketQueue {
    /// Enqueue `notifier`. Returns `true` if no task was draining this
    /// queue, meaning the caller is now responsible for spawning one.
    fn push(&self, priority: i64, notifier: TicketNotifier) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(QueueEntry {
            priority,
            seq,
            notifier,
        });
        let needs_spawn = !inner.running;
        inner.running = true;
        drop(inner);

        self.notify.notify_one();
        needs_spawn
    }

    /// Called by a draining task once it has observed no further work for
    /// a while. Returns `true` if the queue is actually empty and the task
    /// should exit; otherwise something landed in the race window and the
    /// task must keep draining.
    fn try_stop(&self) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if inner.heap.is_empty() {
            inner.running = false;
            true
        } else {
            false
        }
    }

    async fn pop(&self, wait: Duration) -> Option<TicketNotifier> {
        loop {
            // Register for notification before checking, so a push landing
            // between the check and the await below isn't missed.
            let notified = self.notify.notified();

            if let Some(entry) = self
                .inner
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .heap
                .pop()
            {
                return Some(entry.notifier);
            }

            if timeout(wait, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Move every still-pending entry onto `target`, preserving each
    /// entry's priority. Used when two route keys turn out to share one
    /// server-assigned bucket id. Returns `true` if `target`'s queue had no
    /// draining task and now needs one spawned.
    fn drain_into(&self, target: &Bucket) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut needs_spawn = false;

        while let Some(entry) = inner.heap.pop() {
            if target.queue.push(entry.priority, entry.notifier) {
                needs_spawn = true;
            }
        }

        needs_spawn
    }
}

/// What is known about a route key's rate limit.
#[derive(Debug)]
enum RouteState {
    /// No response has come back yet; served strictly one at a time.
    Pending(Arc<Bucket>),
    /// Aliased to a server-assigned bucket id.
    Known(Box<str>),
    /// Confirmed to carry no rate-limit headers.
    Unlimited,
}

type Routes = Mutex<HashMap<Path, RouteState>>;
type Buckets = Mutex<HashMap<Box<str>, Arc<Bucket>>>;

/// The HTTP rate-limit engine's per-route admission gate.
///
/// Callers obtain a [`TicketReceiver`] from [`Self::acquire`], await it to
/// learn when to send their request, send the request, then report the
/// response's headers back through the returned [`TicketSender`] so the
/// bucket's state stays accurate for the next waiter.
///
/// [`TicketSender`]: crate::ticket::TicketSender
#[derive(Clone, Debug, Default)]
pub struct BucketRateLimiter {
    routes: Arc<Routes>,
    buckets: Arc<Buckets>,
}

impl BucketRateLimiter {
    /// Create an empty rate limiter with no known routes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request admission to send a request along `path`.
    ///
    /// `priority` orders admission among other pending requests on the
    /// same bucket: lower values are admitted first, ties broken by arrival
    /// order. It has no effect across different buckets.
    pub fn acquire(&self, path: Path, priority: i64) -> TicketReceiver {
        let (notifier, receiver) = ticket::channel();
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());

        match routes.get(&path) {
            Some(RouteState::Known(id)) => {
                let bucket = self
                    .buckets
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .get(id)
                    .expect("a known route always has a backing bucket")
                    .clone();
                drop(routes);

                if bucket.queue.push(priority, notifier) {
                    spawn_queue_task(bucket, Arc::clone(&self.routes), Arc::clone(&self.buckets), path);
                }
            }
            Some(RouteState::Pending(bucket)) => {
                let bucket = Arc::clone(bucket);
                drop(routes);

                if bucket.queue.push(priority, notifier) {
                    spawn_queue_task(bucket, Arc::clone(&self.routes), Arc::clone(&self.buckets), path);
                }
            }
            Some(RouteState::Unlimited) => {
                drop(routes);
                self.admit_unlimited(path, notifier);
            }
            None => {
                let bucket = Arc::new(Bucket::new());
                bucket.queue.push(priority, notifier);
                routes.insert(path.clone(), RouteState::Pending(Arc::clone(&bucket)));
                drop(routes);

                spawn_queue_task(bucket, Arc::clone(&self.routes), Arc::clone(&self.buckets), path);
            }
        }

        receiver
    }

    /// Admit immediately, but still watch the response in case a route
    /// believed unlimited turns out to carry rate-limit headers after all.
    fn admit_unlimited(&self, path: Path, notifier: TicketNotifier) {
        let Some(ticket_headers) = notifier.available() else {
            return;
        };

        let routes = Arc::clone(&self.routes);
        let buckets = Arc::clone(&self.buckets);

        tokio::spawn(async move {
            if let Ok(Some(headers)) = ticket_headers.await {
                reclassify_unlimited(&routes, &buckets, path, headers).await;
            }
        });
    }

    /// Snapshot of a route's bucket state, mostly useful for diagnostics
    /// and tests.
    pub async fn snapshot(&self, path: &Path) -> Option<BucketSnapshot> {
        let bucket = {
            let routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());

            match routes.get(path)? {
                RouteState::Pending(bucket) => Arc::clone(bucket),
                RouteState::Known(id) => Arc::clone(
                    self.buckets
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .get(id)?,
                ),
                RouteState::Unlimited => return Some(BucketSnapshot::unlimited()),
            }
        };

        Some(BucketSnapshot {
            limit: bucket.limit(),
            remaining: bucket.remaining(),
            reset_after: Duration::from_millis(bucket.reset_after()),
            started_at: bucket.started_at().await,
        })
    }
}

/// Point-in-time view of a [`Bucket`]'s admission state.
#[derive(Clone, Copy, Debug)]
pub struct BucketSnapshot {
    /// Total tickets allotted in a cycle.
    pub limit: u64,
    /// Tickets remaining.
    pub remaining: u64,
    /// Duration after `started_at` the bucket resets.
    pub reset_after: Duration,
    /// When the current cycle started, if any.
    pub started_at: Option<Instant>,
}

impl BucketSnapshot {
    const fn unlimited() -> Self {
        Self {
            limit: UNSET,
            remaining: UNSET,
            reset_after: Duration::ZERO,
            started_at: None,
        }
    }
}

async fn reclassify_unlimited(
    routes: &Routes,
    buckets: &Buckets,
    path: Path,
    headers: RatelimitHeaders,
) {
    let RatelimitHeaders::Present(present) = headers else {
        return;
    };

    let Some(id) = present.bucket() else {
        return;
    };

    let bucket = Arc::clone(
        buckets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(id.into())
            .or_insert_with(|| Arc::new(Bucket::new())),
    );

    bucket
        .update(Some((
            present.limit(),
            present.remaining(),
            present.reset_after(),
        )))
        .await;

    routes
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .insert(path, RouteState::Known(id.into()));
}

/// Spawn a [`BucketQueueTask`] draining `bucket`. Callers must only do this
/// after [`BucketQueue::push`] or [`BucketQueue::drain_into`] told them no
/// task was already draining it.
fn spawn_queue_task(bucket: Arc<Bucket>, routes: Arc<Routes>, buckets: Arc<Buckets>, path: Path) {
    tokio::spawn(
        BucketQueueTask {
            bucket,
            routes,
            buckets,
            path,
        }
        .run(),
    );
}

/// Background task draining one [`Bucket`]'s queue in priority order.
struct BucketQueueTask {
    bucket: Arc<Bucket>,
    routes: Arc<Routes>,
    buckets: Arc<Buckets>,
    path: Path,
}

impl BucketQueueTask {
    const WAIT: Duration = Duration::from_secs(10);

    async fn run(self) {
        #[cfg(feature = "tracing")]
        let span = tracing::debug_span!("bucket queue task", path = ?self.path);

        // `next()` returning `None` only means the queue has been quiet for
        // `WAIT`; `try_stop` re-checks under the same lock `push` uses, so a
        // push landing in that exact window is never silently orphaned.
        loop {
            while let Some(notifier) = self.next().await {
                let Some(ticket_headers) = notifier.available() else {
                    continue;
                };

                #[cfg(feature = "tracing")]
                tracing::debug!(parent: &span, "waiting for response headers");

                match timeout(Self::WAIT, ticket_headers).await {
                    Ok(Ok(Some(headers))) => self.handle_headers(headers).await,
                    Ok(Ok(None)) | Ok(Err(_)) | Err(_) => {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(parent: &span, "no headers received before timeout");
                    }
                }
            }

            if self.bucket.queue.try_stop() {
                break;
            }
        }

        // The queue went quiet. A bucket that never got discovered was
        // only ever serializing one caller at a time for this path; drop
        // it so the next request starts fresh. A discovered bucket is left
        // registered under its bucket id for other routes to reuse, even
        // though this particular task exits.
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(routes.get(&self.path), Some(RouteState::Pending(b)) if Arc::ptr_eq(b, &self.bucket))
        {
            routes.remove(&self.path);
        }
    }

    async fn next(&self) -> Option<TicketNotifier> {
        self.wait_if_needed().await;
        self.bucket.queue.pop(Self::WAIT).await
    }

    async fn wait_if_needed(&self) {
        let wait = {
            if self.bucket.remaining() > 0 && self.bucket.remaining() != UNSET {
                return;
            }

            match self.bucket.time_remaining().await {
                TimeRemaining::Finished => {
                    self.bucket.try_reset().await;
                    return;
                }
                TimeRemaining::NotStarted => return,
                TimeRemaining::Some(dur) => dur,
            }
        };

        sleep(wait).await;
        self.bucket.try_reset().await;
    }

    async fn handle_headers(&self, headers: RatelimitHeaders) {
        match headers {
            RatelimitHeaders::GlobalLimited(_) => {
                self.bucket.update(None).await;
            }
            RatelimitHeaders::None => {
                self.routes
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(self.path.clone(), RouteState::Unlimited);
            }
            RatelimitHeaders::Present(present) => {
                // `discover` may find this id already belongs to a different,
                // older bucket than `self.bucket` (two routes merging onto
                // one id); the fold below must land on that canonical
                // bucket, not the one this task happens to own, or the
                // update is silently lost to an orphaned object.
                let bucket = match present.bucket() {
                    Some(id) => self.discover(id),
                    None => Arc::clone(&self.bucket),
                };

                if present.scope() == Some(RatelimitScope::Shared) {
                    // A shared-scope 429 counts against a secondary bucket
                    // this engine doesn't model; the route's real bucket
                    // must not be touched.
                    return;
                }

                bucket
                    .update(Some((present.limit(), present.remaining(), present.reset_after())))
                    .await;
            }
        }
    }

    /// Record that `id` names this task's bucket and return the canonical
    /// [`Bucket`] now backing it: either this task's own bucket (first
    /// claimant of `id`), or an already-registered one this task's queue
    /// gets drained into.
    fn discover(&self, id: &str) -> Arc<Bucket> {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());

        let canonical = match buckets.get(id) {
            Some(existing) if !Arc::ptr_eq(existing, &self.bucket) => {
                let existing = Arc::clone(existing);

                if self.bucket.queue.drain_into(&existing) {
                    spawn_queue_task(
                        Arc::clone(&existing),
                        Arc::clone(&self.routes),
                        Arc::clone(&self.buckets),
                        self.path.clone(),
                    );
                }

                existing
            }
            Some(existing) => Arc::clone(existing),
            None => {
                buckets.insert(id.into(), Arc::clone(&self.bucket));
                Arc::clone(&self.bucket)
            }
        };
        drop(buckets);

        self.routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(self.path.clone(), RouteState::Known(id.into()));

        canonical
    }
}

#[cfg(test)]
mod tests {
    use super::BucketRateLimiter;
    use oriole_model::Path;
    use static_assertions::assert_impl_all;
    use std::time::Duration;

    assert_impl_all!(BucketRateLimiter: Clone, Send, Sync);

    fn path(template: &'static str) -> Path {
        use http::Method;
        oriole_model::Route::new(Method::GET, template, template.to_owned()).bucket_key()
    }

    #[tokio::test]
    async fn first_request_on_a_fresh_route_is_admitted_immediately() {
        let limiter = BucketRateLimiter::new();
        let receiver = limiter.acquire(path("/gateway"), 0);

        let sender = tokio::time::timeout(Duration::from_millis(200), receiver)
            .await
            .expect("should not need to wait")
            .unwrap();

        sender.headers(None).unwrap();
    }

    #[tokio::test]
    async fn second_request_on_unknown_route_waits_for_the_first() {
        let limiter = BucketRateLimiter::new();
        let first = limiter.acquire(path("/guilds/1"), 0);
        let second = limiter.acquire(path("/guilds/1"), 0);

        // The second caller must not be admitted while the first hasn't
        // reported headers back yet.
        assert!(tokio::time::timeout(Duration::from_millis(50), second)
            .await
            .is_err());

        first.await.unwrap().headers(None).unwrap();
    }

    #[tokio::test]
    async fn unlimited_route_admits_without_queueing() {
        use crate::headers::RatelimitHeaders;

        let limiter = BucketRateLimiter::new();

        let first = limiter.acquire(path("/gateway"), 0);
        let sender = first.await.unwrap();
        sender.headers(Some(RatelimitHeaders::None)).unwrap();

        // Give the queue task a chance to mark the route unlimited before
        // the next acquisitions race in.
        tokio::time::sleep(Duration::from_millis(5)).await;

        let second = limiter.acquire(path("/gateway"), 0);
        let third = limiter.acquire(path("/gateway"), 0);

        // Neither needs the other to report back first; both are admitted
        // straight away instead of going through the bucket queue.
        tokio::time::timeout(Duration::from_millis(50), second)
            .await
            .expect("unlimited route should not queue")
            .unwrap()
            .headers(None)
            .unwrap();
        tokio::time::timeout(Duration::from_millis(50), third)
            .await
            .expect("unlimited route should not queue")
            .unwrap()
            .headers(None)
            .unwrap();
    }

    #[tokio::test]
    async fn merging_into_an_existing_bucket_still_applies_the_update() {
        use crate::headers::RatelimitHeaders;

        let limiter = BucketRateLimiter::new();
        let route_a = path("/a");
        let route_b = path("/b");

        let first = limiter.acquire(route_a.clone(), 0);
        first
            .await
            .unwrap()
            .headers(Some(
                RatelimitHeaders::from_pairs(
                    [
                        ("x-ratelimit-bucket", b"shared".as_slice()),
                        ("x-ratelimit-limit", b"2".as_slice()),
                        ("x-ratelimit-remaining", b"1".as_slice()),
                        ("x-ratelimit-reset", b"0".as_slice()),
                        ("x-ratelimit-reset-after", b"60".as_slice()),
                    ]
                    .into_iter(),
                )
                .unwrap(),
            ))
            .unwrap();

        let second = limiter.acquire(route_b.clone(), 0);
        second
            .await
            .unwrap()
            .headers(Some(
                RatelimitHeaders::from_pairs(
                    [
                        ("x-ratelimit-bucket", b"shared".as_slice()),
                        ("x-ratelimit-limit", b"2".as_slice()),
                        ("x-ratelimit-remaining", b"0".as_slice()),
                        ("x-ratelimit-reset", b"0".as_slice()),
                        ("x-ratelimit-reset-after", b"60".as_slice()),
                    ]
                    .into_iter(),
                )
                .unwrap(),
            ))
            .unwrap();
        tokio::task::yield_now().await;

        // Route `b`'s update must land on the bucket route `a` already
        // claimed the id for, not on route `b`'s own now-superseded one.
        let snapshot = limiter.snapshot(&route_a).await.unwrap();
        assert_eq!(0, snapshot.remaining);
        assert_eq!(snapshot.remaining, limiter.snapshot(&route_b).await.unwrap().remaining);
    }
}
