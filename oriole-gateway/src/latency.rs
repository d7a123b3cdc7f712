//! Round-trip heartbeat latency tracking.

use std::{
    iter::FusedIterator,
    slice::Iter,
    time::{Duration, Instant},
};

/// Information about the latency of a [`GatewaySession`]'s connection.
///
/// Obtained via [`GatewaySession::latency`].
///
/// [`GatewaySession`]: crate::session::GatewaySession
/// [`GatewaySession::latency`]: crate::session::GatewaySession::latency
#[derive(Clone, Debug)]
pub struct Latency {
    heartbeats: u32,
    received: Option<Instant>,
    recent: [u64; Self::RECENT_LEN],
    sent: Option<Instant>,
    total_time: u64,
}

impl Latency {
    /// Maximum number of recent latencies to store.
    const RECENT_LEN: usize = 5;

    pub(crate) const fn new() -> Self {
        Self {
            heartbeats: 0,
            received: None,
            recent: [0; Self::RECENT_LEN],
            sent: None,
            total_time: 0,
        }
    }

    /// Average round-trip time across every heartbeat sent this session.
    ///
    /// `None` if no heartbeat acknowledgement has been received yet.
    #[must_use]
    pub const fn average(&self) -> Option<Duration> {
        Duration::from_millis(self.total_time).checked_div(self.heartbeats)
    }

    /// Total number of heartbeats acknowledged this session.
    #[must_use]
    pub const fn heartbeats(&self) -> u32 {
        self.heartbeats
    }

    /// The 5 most recent round-trip times, oldest first.
    pub fn recent(&self) -> RecentLatencyIter<'_> {
        RecentLatencyIter::new(&self.recent)
    }

    /// When the last heartbeat acknowledgement was received.
    #[must_use]
    pub const fn received(&self) -> Option<Instant> {
        self.received
    }

    /// When the last heartbeat was sent.
    #[must_use]
    pub const fn sent(&self) -> Option<Instant> {
        self.sent
    }

    pub(crate) fn track_received(&mut self) {
        self.received = Some(Instant::now());
        self.heartbeats += 1;

        if let Some(duration) = self.sent.map(|instant| instant.elapsed()) {
            let millis = if let Ok(millis) = duration.as_millis().try_into() {
                millis
            } else {
                #[cfg(feature = "tracing")]
                tracing::error!(?duration, "milliseconds is more than u64");

                return;
            };

            self.total_time += millis;
            self.recent.rotate_right(1);
            self.recent[0] = millis;
        }
    }

    pub(crate) fn track_sent(&mut self) {
        self.received = None;
        self.sent = Some(Instant::now());
    }
}

/// Iterator over the most recent latencies.
#[derive(Debug)]
pub struct RecentLatencyIter<'a> {
    inner: Iter<'a, u64>,
}

impl<'a> RecentLatencyIter<'a> {
    fn new(recent: &'a [u64; Latency::RECENT_LEN]) -> Self {
        Self {
            inner: recent.iter(),
        }
    }
}

impl DoubleEndedIterator for RecentLatencyIter<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().copied().map(Duration::from_millis)
    }

    fn nth_back(&mut self, n: usize) -> Option<Self::Item> {
        self.inner.nth_back(n).copied().map(Duration::from_millis)
    }
}

impl ExactSizeIterator for RecentLatencyIter<'_> {
    fn len(&self) -> usize {
        self.inner.len()
    }
}

impl FusedIterator for RecentLatencyIter<'_> {}

impl Iterator for RecentLatencyIter<'_> {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().copied().map(Duration::from_millis)
    }

    fn nth(&mut self, n: usize) -> Option<Self::Item> {
        self.inner.nth(n).copied().map(Duration::from_millis)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::{Latency, RecentLatencyIter};
    use static_assertions::assert_impl_all;
    use std::{fmt::Debug, iter::FusedIterator, time::Duration};

    assert_impl_all!(Latency: Clone, Debug, Send, Sync);
    assert_impl_all!(
        RecentLatencyIter<'_>: Debug,
        DoubleEndedIterator,
        ExactSizeIterator,
        FusedIterator,
        Iterator,
        Send,
        Sync
    );

    const fn latency() -> Latency {
        Latency {
            heartbeats: 17,
            received: None,
            recent: [20, 25, 30, 35, 40],
            sent: None,
            total_time: 510,
        }
    }

    #[test]
    fn average_divides_total_time_by_heartbeat_count() {
        let latency = latency();
        assert_eq!(latency.average(), Some(Duration::from_millis(30)));
        assert_eq!(latency.heartbeats(), 17);
    }

    #[test]
    fn no_heartbeats_has_no_average() {
        assert_eq!(Latency::new().average(), None);
    }

    #[test]
    fn recent_iterates_oldest_first_and_supports_rev() {
        let latency = latency();
        let mut iter = latency.recent();
        assert_eq!(iter.len(), Latency::RECENT_LEN);
        assert_eq!(iter.next(), Some(Duration::from_millis(20)));
        assert_eq!(iter.next_back(), Some(Duration::from_millis(40)));
        assert_eq!(iter.next(), Some(Duration::from_millis(25)));
        assert_eq!(iter.next(), Some(Duration::from_millis(30)));
        assert_eq!(iter.next_back(), Some(Duration::from_millis(35)));
        assert!(iter.next().is_none());
        assert!(iter.next_back().is_none());
    }

    #[test]
    fn track_sent_then_received_records_one_sample() {
        let mut latency = Latency::new();
        latency.track_sent();
        assert!(latency.sent().is_some());

        latency.track_received();
        assert_eq!(1, latency.heartbeats());
        assert!(latency.received().is_some());
    }
}
