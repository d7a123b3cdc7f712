//! Two-phase handoff between a rate limiter and the caller sending a request.
//!
//! # Consumer side
//!
//! 1. Call [`BucketRateLimiter::acquire`] (or [`GlobalRateLimiter::acquire`]);
//!    you receive a [`TicketReceiver`].
//! 2. Await the receiver. It resolves with a [`TicketSender`] once the
//!    limiter has admitted the request.
//! 3. Perform the HTTP request.
//! 4. Parse the response's rate-limit headers (or decide there are none) and
//!    send them back via [`TicketSender::headers`]. This lets the limiter
//!    update its bucket/global state before admitting the next waiter.
//!
//! # Limiter side
//!
//! 1. When a ticket is requested, call [`channel`] to create a linked
//!    [`TicketNotifier`]/[`TicketReceiver`] pair; keep the notifier, hand the
//!    receiver to the caller.
//! 2. Once admission conditions are met, call [`TicketNotifier::available`].
//!    If the caller hasn't dropped its receiver, this returns a
//!    [`TicketHeaders`] future.
//! 3. Await that future to learn the headers (or lack thereof) the caller's
//!    request produced, and fold them into the limiter's state.
//!
//! [`BucketRateLimiter::acquire`]: crate::bucket::BucketRateLimiter::acquire
//! [`GlobalRateLimiter::acquire`]: crate::global::GlobalRateLimiter::acquire

use crate::headers::RatelimitHeaders;
use futures_channel::oneshot::{self, Canceled, Receiver, Sender};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

/// Awaits the headers the consumer sends back after performing its request.
#[derive(Debug)]
pub struct TicketHeaders(Receiver<Option<RatelimitHeaders>>);

impl Future for TicketHeaders {
    type Output = Result<Option<RatelimitHeaders>, Canceled>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

/// Held by the limiter; notifies the consumer once it may send its request.
#[derive(Debug)]
pub struct TicketNotifier(Sender<Sender<Option<RatelimitHeaders>>>);

impl TicketNotifier {
    /// Signal that the associated request may now be sent.
    ///
    /// Returns `None` if the consumer already dropped its [`TicketReceiver`]
    /// half; the ticket should be treated as canceled and no token consumed.
    #[must_use]
    pub fn available(self) -> Option<TicketHeaders> {
        let (tx, rx) = oneshot::channel();

        self.0.send(tx).ok()?;

        Some(TicketHeaders(rx))
    }
}

/// Held by the consumer; resolves once the limiter admits the request.
#[derive(Debug)]
pub struct TicketReceiver(Receiver<Sender<Option<RatelimitHeaders>>>);

impl Future for TicketReceiver {
    type Output = Result<TicketSender, Canceled>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx).map_ok(TicketSender)
    }
}

/// Held by the consumer after admission; sends the response's headers back.
#[derive(Debug)]
pub struct TicketSender(Sender<Option<RatelimitHeaders>>);

impl TicketSender {
    /// Send the response's rate-limit headers (or `None` if there were none,
    /// or the request failed before headers could be read) back to the
    /// limiter.
    ///
    /// # Errors
    ///
    /// Returns the input if the limiter dropped its half first, which
    /// happens only if the limiter itself was dropped.
    pub fn headers(
        self,
        headers: Option<RatelimitHeaders>,
    ) -> Result<(), Option<RatelimitHeaders>> {
        self.0.send(headers)
    }
}

/// Create a linked notifier/receiver pair for one pending admission.
#[must_use]
pub fn channel() -> (TicketNotifier, TicketReceiver) {
    let (tx, rx) = oneshot::channel();

    (TicketNotifier(tx), TicketReceiver(rx))
}
