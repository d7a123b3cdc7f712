use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{
    sync::{AcquireError, Semaphore},
    task::JoinHandle,
};

/// Admission gate allowing at most `limit` acquisitions per rolling
/// `window` duration.
///
/// Unlike a leaky-bucket that refills a fixed amount on a fixed tick, each
/// acquired slot here is released by its own independent timer started the
/// moment it was taken. A slot freed by `acquire` number 3 does not wait for
/// slots 1 and 2 to also expire; it reopens exactly `window` after it was
/// granted. This matches the admission pattern Discord expects from both the
/// gateway's outbound command rate and the IDENTIFY concurrency buckets.
#[derive(Debug)]
pub struct TimesPerWindow {
    limit: usize,
    semaphore: Mutex<Arc<Semaphore>>,
    window: Duration,
    releases: Mutex<Vec<JoinHandle<()>>>,
}

impl TimesPerWindow {
    /// Create a gate admitting at most `limit` callers per `window`.
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            semaphore: Mutex::new(Arc::new(Semaphore::new(limit))),
            window,
            releases: Mutex::new(Vec::new()),
        }
    }

    fn semaphore(&self) -> Arc<Semaphore> {
        Arc::clone(&self.semaphore.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Suspend until a slot is available, then spawn this slot's own
    /// release timer and return.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError`] if the gate was [closed](Self::close) or
    /// [reset](Self::reset) while waiting.
    pub async fn acquire(&self) -> Result<(), AcquireError> {
        let permit = self.semaphore().acquire_owned().await?;
        let window = self.window;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            drop(permit);
        });

        let mut releases = self.releases.lock().unwrap_or_else(|e| e.into_inner());
        releases.retain(|handle| !handle.is_finished());
        releases.push(handle);

        Ok(())
    }

    /// Number of slots immediately available without waiting.
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore().available_permits()
    }

    /// Cancel all outstanding waiters with [`AcquireError`] and stop
    /// granting new slots. Already-acquired slots still release on their
    /// own timers.
    pub fn close(&self) {
        self.semaphore().close();
    }

    /// Cancel every outstanding release timer and restore the gate to full
    /// availability immediately. Callers currently suspended in
    /// [`Self::acquire`] are cancelled with [`AcquireError`], same as
    /// [`Self::close`], rather than being granted a slot from the new
    /// semaphore.
    pub fn reset(&self) {
        let mut releases = self.releases.lock().unwrap_or_else(|e| e.into_inner());
        for handle in releases.drain(..) {
            handle.abort();
        }
        drop(releases);

        let mut semaphore = self.semaphore.lock().unwrap_or_else(|e| e.into_inner());
        semaphore.close();
        *semaphore = Arc::new(Semaphore::new(self.limit));
    }
}

#[cfg(test)]
mod tests {
    use super::TimesPerWindow;
    use static_assertions::assert_impl_all;
    use std::time::Duration;

    assert_impl_all!(TimesPerWindow: Send, Sync);

    #[tokio::test(start_paused = true)]
    async fn admits_up_to_limit_immediately() {
        let gate = TimesPerWindow::new(2, Duration::from_secs(1));

        gate.acquire().await.unwrap();
        gate.acquire().await.unwrap();

        assert_eq!(0, gate.available());
    }

    #[tokio::test(start_paused = true)]
    async fn releases_independently_after_window() {
        let gate = TimesPerWindow::new(1, Duration::from_millis(100));

        gate.acquire().await.unwrap();
        assert_eq!(0, gate.available());

        tokio::time::advance(Duration::from_millis(150)).await;
        tokio::task::yield_now().await;

        assert_eq!(1, gate.available());
    }

    #[tokio::test(start_paused = true)]
    async fn slots_release_on_independent_timers() {
        let gate = TimesPerWindow::new(2, Duration::from_millis(100));

        gate.acquire().await.unwrap(); // granted at t=0, frees at t=100
        tokio::time::advance(Duration::from_millis(40)).await;
        gate.acquire().await.unwrap(); // granted at t=40, frees at t=140

        tokio::time::advance(Duration::from_millis(61)).await; // t=101
        tokio::task::yield_now().await;

        // Only the first slot has freed; the second isn't due until t=140.
        assert_eq!(1, gate.available());

        tokio::time::advance(Duration::from_millis(40)).await; // t=141
        tokio::task::yield_now().await;

        assert_eq!(2, gate.available());
    }

    #[tokio::test]
    async fn close_cancels_pending_waiters() {
        let gate = TimesPerWindow::new(1, Duration::from_secs(60));

        gate.acquire().await.unwrap();
        gate.close();

        assert!(gate.acquire().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_restores_full_availability_immediately() {
        let gate = TimesPerWindow::new(2, Duration::from_secs(60));

        gate.acquire().await.unwrap();
        gate.acquire().await.unwrap();
        assert_eq!(0, gate.available());

        gate.reset();
        assert_eq!(2, gate.available());

        // The old release timers were cancelled, so advancing past the
        // original window doesn't over-grant permits beyond the limit.
        tokio::time::advance(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;
        assert_eq!(2, gate.available());
    }
}
