use oriole_gateway_queue::{IdentifyQueue, IDENTIFY_DELAY};
use tokio::time::{Duration, Instant};

/// Requires a queue with `max_concurrency` of 2; shards 0 and 2 land in the
/// same bucket.
pub async fn same_bucket_is_serial(queue: &impl IdentifyQueue) {
    let now = Instant::now();

    queue.enqueue([0, 2]).await;
    queue.enqueue([2, 2]).await;

    assert!(now.elapsed() >= IDENTIFY_DELAY, "ran concurrently");
}

/// Requires a queue with `max_concurrency` of 2; shards 0 and 1 land in
/// different buckets and a prior enqueue on bucket 0 must not delay shard 1.
pub async fn different_bucket_is_parallel(queue: &impl IdentifyQueue) {
    queue.enqueue([0, 2]).await;

    tokio::time::timeout(Duration::from_millis(10), queue.enqueue([1, 2]))
        .await
        .expect("bucket 1 should not be gated by bucket 0's occupant");
}

/// Requires a fresh queue with a daily `remaining` of 0.
pub async fn daily_allowance_refills_after_reset(queue: &impl IdentifyQueue, reset_after: Duration) {
    let now = Instant::now();

    queue.enqueue([0, 1]).await;

    let elapsed = now.elapsed().as_secs_f64();
    assert!(
        (elapsed - reset_after.as_secs_f64()).abs() <= 1e-2,
        "did not wait out the daily reset window"
    );
}
