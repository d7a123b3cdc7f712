//! Integration tests for `GlobalRateLimiter` covering the interaction
//! between its steady-state budget and a 429-triggered freeze, which the
//! in-module unit tests don't exercise together.

use oriole_http_ratelimiting::GlobalRateLimiter;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn unlimited_limiter_still_honors_a_freeze() {
    let limiter = GlobalRateLimiter::unlimited();
    assert!(limiter.is_unlimited());

    // With no steady-state budget, acquisitions are instant.
    tokio::time::timeout(Duration::from_millis(1), limiter.acquire())
        .await
        .expect("unlimited limiter should never throttle on its own");

    limiter.freeze(Duration::from_millis(100));
    assert!(
        tokio::time::timeout(Duration::from_millis(50), limiter.acquire())
            .await
            .is_err(),
        "a global 429 must freeze an unlimited limiter too"
    );

    tokio::time::advance(Duration::from_millis(100)).await;
    tokio::time::timeout(Duration::from_millis(10), limiter.acquire())
        .await
        .expect("should thaw and admit");
}

#[tokio::test(start_paused = true)]
async fn limited_limiter_freezes_even_with_budget_left() {
    let limiter = GlobalRateLimiter::new(50, Duration::from_secs(1));
    assert!(!limiter.is_unlimited());

    limiter.freeze(Duration::from_millis(200));

    // Plenty of steady-state budget remains, but the freeze still blocks
    // every acquirer until it thaws.
    assert!(
        tokio::time::timeout(Duration::from_millis(100), limiter.acquire())
            .await
            .is_err()
    );

    tokio::time::advance(Duration::from_millis(200)).await;
    tokio::time::timeout(Duration::from_millis(10), limiter.acquire())
        .await
        .expect("should thaw and admit");
    assert!(!limiter.is_frozen());
}

#[tokio::test(start_paused = true)]
async fn waiters_queued_behind_a_freeze_still_pay_the_steady_state_budget() {
    let limiter = GlobalRateLimiter::new(1, Duration::from_secs(60));
    limiter.acquire().await;

    limiter.freeze(Duration::from_millis(50));
    tokio::time::advance(Duration::from_millis(50)).await;

    // The freeze has thawed, but the one-token budget was already spent
    // before the freeze and has not yet reset.
    assert!(
        tokio::time::timeout(Duration::from_millis(10), limiter.acquire())
            .await
            .is_err(),
        "thawing must not bypass the still-exhausted steady-state gate"
    );
}
