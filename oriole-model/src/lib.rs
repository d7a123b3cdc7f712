//! Minimal vocabulary shared between the HTTP and gateway crates.
//!
//! This intentionally does not model the hundreds of Discord resource
//! payloads (messages, embeds, guild settings, ...). It models only what the
//! rate-limit engine and the gateway session state machine themselves need
//! to parse, build, or key on.

#![warn(clippy::all, missing_docs)]

pub mod close_code;
pub mod event_type_flags;
pub mod intents;
pub mod opcode;
pub mod payload;
pub mod route;

pub use self::{
    close_code::CloseCode,
    event_type_flags::EventTypeFlags,
    intents::Intents,
    opcode::OpCode,
    route::{Path, Route},
};
