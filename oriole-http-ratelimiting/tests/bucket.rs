//! Integration tests exercising `BucketRateLimiter` across multiple routes
//! and response round-trips, as opposed to the single-route unit tests kept
//! alongside the implementation.

use http::Method;
use oriole_http_ratelimiting::{BucketRateLimiter, RatelimitHeaders};
use oriole_model::{Path, Route};
use std::time::Duration;

fn path(template: &'static str) -> Path {
    Route::new(Method::GET, template, template.to_owned()).bucket_key()
}

fn present(bucket: &str, limit: u64, remaining: u64, reset_after_secs: f64) -> RatelimitHeaders {
    let limit = limit.to_string();
    let remaining = remaining.to_string();
    let reset_after = reset_after_secs.to_string();

    RatelimitHeaders::from_pairs(
        vec![
            ("x-ratelimit-bucket", bucket.as_bytes()),
            ("x-ratelimit-limit", limit.as_bytes()),
            ("x-ratelimit-remaining", remaining.as_bytes()),
            ("x-ratelimit-reset", b"0".as_slice()),
            ("x-ratelimit-reset-after", reset_after.as_bytes()),
        ]
        .into_iter(),
    )
    .unwrap()
}

/// Two routes whose responses reveal the same server-assigned bucket id
/// end up sharing one bucket and are serialized against each other from
/// then on, even though they started out as independent, unrelated
/// `Pending` buckets.
#[tokio::test]
async fn two_routes_discovering_the_same_bucket_id_are_merged() {
    let limiter = BucketRateLimiter::new();
    let route_a = path("/channels/1");
    let route_b = path("/channels/1/messages");

    let first = limiter.acquire(route_a.clone(), 0).await.unwrap();
    first
        .headers(Some(present("shared-bucket", 2, 1, 60.0)))
        .unwrap();

    let second = limiter.acquire(route_b.clone(), 0).await.unwrap();
    second
        .headers(Some(present("shared-bucket", 2, 0, 60.0)))
        .unwrap();
    tokio::task::yield_now().await;

    // Both routes now resolve to the same bucket id and see the same
    // remaining count, whichever route's response the count came from.
    let snapshot_a = limiter.snapshot(&route_a).await.unwrap();
    let snapshot_b = limiter.snapshot(&route_b).await.unwrap();
    assert_eq!(snapshot_a.remaining, snapshot_b.remaining);
    assert_eq!(0, snapshot_b.remaining);
    assert_eq!(snapshot_a.limit, snapshot_b.limit);

    // The merged bucket is out of tickets; a third request on either route
    // must wait rather than being admitted immediately.
    assert!(
        tokio::time::timeout(Duration::from_millis(50), limiter.acquire(route_a, 1))
            .await
            .is_err(),
        "merged bucket should still be out of tickets"
    );
}

/// A bucket whose draining task has gone idle and exited (no requests
/// pending for longer than its drain timeout) still serves the next
/// request that arrives through the already-`Known` route instead of
/// hanging forever waiting on a task nobody spawned.
#[tokio::test(start_paused = true)]
async fn known_bucket_whose_task_went_idle_gets_a_fresh_drain_task() {
    let limiter = BucketRateLimiter::new();
    let route = path("/webhooks/1");

    let first = limiter.acquire(route.clone(), 0).await.unwrap();
    first.headers(Some(present("w1", 5, 4, 0.01))).unwrap();

    // Let the draining task observe the now-empty queue, sit through its
    // idle timeout, and exit. The bucket id stays registered under
    // `route`, but nothing is left alive to drain it.
    tokio::time::advance(Duration::from_secs(11)).await;
    tokio::task::yield_now().await;

    let reused = tokio::time::timeout(Duration::from_millis(200), limiter.acquire(route, 1))
        .await
        .expect("a known bucket must spawn a fresh drain task when its old one exited")
        .unwrap();
    reused.headers(None).unwrap();
}

/// A shared-scope 429 must not mutate the route's own bucket accounting;
/// the next request is admitted as soon as the bucket's own remaining
/// count allows it, unaffected by the shared limit that rejected the
/// previous one.
#[tokio::test]
async fn shared_scope_429_does_not_deplete_the_bucket() {
    let limiter = BucketRateLimiter::new();
    let route = path("/guilds/1/emojis");

    let first = limiter.acquire(route.clone(), 0).await.unwrap();
    first
        .headers(Some(present("emoji-bucket", 1, 1, 60.0)))
        .unwrap();
    tokio::task::yield_now().await;

    let before = limiter.snapshot(&route).await.unwrap();
    assert_eq!(1, before.remaining);

    let second = limiter.acquire(route.clone(), 0).await.unwrap();

    // A 429 response: same bucket id, shared scope, remaining unchanged
    // from the caller's point of view.
    let rejected = RatelimitHeaders::from_pairs(
        vec![
            ("x-ratelimit-bucket", b"emoji-bucket".as_slice()),
            ("x-ratelimit-limit", b"1".as_slice()),
            ("x-ratelimit-remaining", b"1".as_slice()),
            ("x-ratelimit-reset", b"0".as_slice()),
            ("x-ratelimit-reset-after", b"60".as_slice()),
            ("x-ratelimit-scope", b"shared".as_slice()),
        ]
        .into_iter(),
    )
    .unwrap();
    second.headers(Some(rejected)).unwrap();
    tokio::task::yield_now().await;

    let after = limiter.snapshot(&route).await.unwrap();
    assert_eq!(before.remaining, after.remaining, "shared 429 must not touch the bucket");
}
