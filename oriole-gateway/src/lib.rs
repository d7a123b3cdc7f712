//! Discord gateway client.
//!
//! [`session::GatewaySession`] drives one shard's connection: websocket
//! handshake, `HELLO`/`IDENTIFY`/`RESUME`, self-driven heartbeating, zlib
//! frame decompression, and dispatch of raw and named events through
//! [`oriole_dispatch::Dispatcher`]. [`manager::ShardManager`] fetches
//! `/gateway/bot`, computes the identify concurrency budget, and brings up
//! every shard of a bot, aggregating their dispatchers into three
//! manager-level ones.

#![deny(clippy::all, clippy::pedantic)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub mod compression;
pub mod config;
pub mod error;
pub mod latency;
pub mod manager;
pub mod session;

pub use self::{
    config::{Config, ConfigBuilder, ShardId},
    error::{
        ConnectError, DisconnectError, ReceiveMessageError, ReceiveMessageErrorType,
        ReconnectCheckFailedError, SendError,
    },
    latency::Latency,
    manager::{ShardManager, StartError},
    session::{Critical, DispatchedEvent, EventKey, GatewaySession, RawEvent, RawEventKey, Stage},
};
