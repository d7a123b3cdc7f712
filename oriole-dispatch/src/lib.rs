//! Generic event dispatch and admission-control primitives shared by the
//! HTTP rate-limit engine and the gateway session state machine.
//!
//! Neither type here knows anything about Discord; [`Dispatcher`] is a keyed
//! pub/sub broadcaster and [`TimesPerWindow`] is a sliding admission gate.
//! Everything Discord-specific is layered on top in `oriole-http-ratelimiting`
//! and `oriole-gateway`.

#![warn(clippy::all, missing_docs)]
#![allow(clippy::module_name_repetitions)]

mod dispatcher;
mod times_per_window;

pub use self::{
    dispatcher::{DispatchError, DispatchFuture, Dispatcher, GlobalEvent, WaitForFuture},
    times_per_window::TimesPerWindow,
};
