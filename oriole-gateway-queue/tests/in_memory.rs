mod common;

use common::*;
use oriole_gateway_queue::{IdentifyQueue, InMemoryQueue, IDENTIFY_DELAY};
use tokio::time::{Duration, Instant};

#[tokio::test]
async fn ample_allowance_is_instant() {
    let queue = InMemoryQueue::new(1000, 1000, Duration::ZERO, 1000);
    let now = Instant::now();

    queue.enqueue([0, 1]).await;

    assert!(now.elapsed() < IDENTIFY_DELAY, "did not run instantly");
}

#[tokio::test]
async fn update_refreshes_the_daily_allowance() {
    let queue = InMemoryQueue::new(2, 0, Duration::from_secs(60), 1);
    queue.update(10, Duration::from_secs(60), 10).await;

    tokio::time::timeout(Duration::from_millis(10), queue.enqueue([0, 2]))
        .await
        .expect("update should have refreshed a depleted daily allowance");
}

#[tokio::test(start_paused = true)]
async fn integration() {
    let queue = InMemoryQueue::new(2, 1000, Duration::from_secs(86_400), 1000);
    same_bucket_is_serial(&queue).await;

    let queue = InMemoryQueue::new(2, 1000, Duration::from_secs(86_400), 1000);
    different_bucket_is_parallel(&queue).await;

    let queue = InMemoryQueue::new(1, 0, Duration::from_millis(50), 1);
    daily_allowance_refills_after_reset(&queue, Duration::from_millis(50)).await;
}
