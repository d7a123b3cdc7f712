//! Umbrella re-export of the `oriole` crates; pick and match the individual
//! crates directly if you don't need all of them.
//!
//! ```toml
//! oriole = { version = "0.1", features = ["gateway", "http"] }
//! ```

#![deny(clippy::all, clippy::pedantic)]
#![warn(missing_docs)]

#[cfg(feature = "dispatch")]
#[doc(inline)]
pub use oriole_dispatch as dispatch;

#[cfg(feature = "gateway")]
#[doc(inline)]
pub use oriole_gateway as gateway;

#[cfg(feature = "gateway-queue")]
#[doc(inline)]
pub use oriole_gateway_queue as gateway_queue;

#[cfg(feature = "http")]
#[doc(inline)]
pub use oriole_http as http;

#[cfg(feature = "http-ratelimiting")]
#[doc(inline)]
pub use oriole_http_ratelimiting as http_ratelimiting;

#[cfg(feature = "model")]
#[doc(inline)]
pub use oriole_model as model;
