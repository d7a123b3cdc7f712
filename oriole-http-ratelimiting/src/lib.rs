//! HTTP rate-limit engine.
//!
//! Two independent gates sit in front of every outgoing Discord API request:
//!
//! - [`GlobalRateLimiter`] enforces the process-wide request budget and the
//!   freeze triggered by a global 429.
//! - [`BucketRateLimiter`] enforces the per-route budget, discovering and
//!   sharing server-assigned buckets across routes as responses reveal them.
//!
//! Callers are expected to acquire the global gate first, then the bucket
//! gate, send the request, and report the response's headers back through
//! both tickets so each gate's state stays accurate.

#![deny(clippy::all, clippy::pedantic)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub mod bucket;
pub mod global;
pub mod headers;
pub mod ticket;

pub use self::{
    bucket::{Bucket, BucketRateLimiter, BucketSnapshot, TimeRemaining},
    global::GlobalRateLimiter,
    headers::{
        GlobalLimited, HeaderName, HeaderParsingError, HeaderParsingErrorType, HeaderType,
        Present, RatelimitHeaders, RatelimitScope,
    },
    ticket::{channel, TicketHeaders, TicketNotifier, TicketReceiver, TicketSender},
};
