//! Discord REST API client.
//!
//! [`Client`] builds a request from a [`oriole_model::Route`], sequences it
//! through a [`oriole_http_ratelimiting::GlobalRateLimiter`] and
//! [`oriole_http_ratelimiting::BucketRateLimiter`] keyed by `rate_limit_key`,
//! sends it over `hyper`, and classifies the response into a typed [`Error`].
//! Deserializing the response body into a model type is left to the caller.

#![deny(clippy::all, clippy::pedantic)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod error;

pub use self::{
    client::{Client, ClientBuilder, RequestResponse},
    error::{Error, ErrorType, Result},
};
