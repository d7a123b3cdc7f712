//! Minimal outbound/inbound gateway command payloads.
//!
//! Only the shapes the session state machine itself sends or inspects are
//! modeled; dispatch event bodies (`READY`, `MESSAGE_CREATE`, ...) are left
//! as raw JSON for the caller to deserialize into whatever types it needs.

use crate::{intents::Intents, opcode::OpCode};
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// The `{op, d, s, t}` envelope every gateway payload is wrapped in.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GatewayEnvelope<T> {
    /// Gateway opcode.
    pub op: OpCode,
    /// Event data; shape depends on `op` (and, for [`OpCode::Dispatch`],
    /// `t`).
    pub d: T,
    /// Sequence number of this event, present only for dispatches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    /// Dispatch event name, present only when `op` is
    /// [`OpCode::Dispatch`].
    #[serde(rename = "t", skip_serializing_if = "Option::is_none")]
    pub event_type: Option<Box<str>>,
}

/// Sent immediately after the socket opens.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct Hello {
    /// Interval, in milliseconds, the client must send heartbeats at.
    pub heartbeat_interval: u64,
}

/// Carries the last received sequence number, or `null` if none has been
/// received yet.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Heartbeat {
    /// Last sequence received by the shard, if any.
    pub seq: Option<u64>,
}

impl Heartbeat {
    /// Build a heartbeat carrying `seq`.
    #[must_use]
    pub const fn new(seq: Option<u64>) -> Self {
        Self { seq }
    }
}

/// `d` payload of an [`OpCode::InvalidSession`] event: whether resuming is
/// possible.
pub type InvalidSession = bool;

/// Identifying properties sent as part of [`Identify`].
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct IdentifyProperties {
    /// Operating system the shard is running on.
    pub os: Box<str>,
    /// Library name.
    pub browser: Box<str>,
    /// Library name, again, historically the "device" field.
    pub device: Box<str>,
}

impl IdentifyProperties {
    /// Build identify properties naming this library.
    #[must_use]
    pub fn new(os: &str) -> Self {
        Self {
            os: os.into(),
            browser: env!("CARGO_PKG_NAME").into(),
            device: env!("CARGO_PKG_NAME").into(),
        }
    }
}

/// Starts a new session.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Identify {
    /// Bot or bearer token, without the `Bot `/`Bearer ` prefix.
    pub token: Box<str>,
    /// Connection properties.
    pub properties: IdentifyProperties,
    /// Whether event payloads are compressed (independent of transport
    /// compression).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compress: Option<bool>,
    /// Total members a guild must have before presences are excluded from
    /// its data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_threshold: Option<u64>,
    /// `[shard_id, shard_count]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard: Option<[u64; 2]>,
    /// Initial presence to set on connect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<UpdatePresence>,
    /// Event categories subscribed to.
    pub intents: Intents,
}

/// A bot's initial presence, sent as part of [`Identify::presence`].
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UpdatePresence {
    /// Unix timestamp (ms) of when the client went idle, `None` if the
    /// client isn't idle.
    pub since: Option<u64>,
    /// User's activities.
    pub activities: Vec<Activity>,
    /// User's new status.
    pub status: Status,
    /// Whether the client is AFK.
    pub afk: bool,
}

impl UpdatePresence {
    /// Build a presence with a single activity and no AFK/idle state.
    #[must_use]
    pub fn new(status: Status, activity: Activity) -> Self {
        Self {
            since: None,
            activities: vec![activity],
            status,
            afk: false,
        }
    }
}

/// One entry of [`UpdatePresence::activities`].
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Activity {
    /// Activity name.
    pub name: Box<str>,
    /// Activity type, governing how Discord phrases it in the UI.
    #[serde(rename = "type")]
    pub kind: ActivityType,
    /// Stream URL, only valid for [`ActivityType::Streaming`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<Box<str>>,
}

/// How Discord phrases an [`Activity`] in its UI, e.g. "Playing" vs.
/// "Watching".
#[derive(Clone, Copy, Debug, Deserialize_repr, Eq, Hash, PartialEq, Serialize_repr)]
#[repr(u8)]
pub enum ActivityType {
    /// "Playing {name}".
    Game = 0,
    /// "Streaming {name}".
    Streaming = 1,
    /// "Listening to {name}".
    Listening = 2,
    /// "Watching {name}".
    Watching = 3,
    /// "{emoji} {name}".
    Custom = 4,
    /// "Competing in {name}".
    Competing = 5,
}

/// A user's online status.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, Eq, Hash, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Online (green).
    Online,
    /// Do not disturb (red).
    Dnd,
    /// Idle (yellow).
    Idle,
    /// Online, but shown as offline.
    Invisible,
    /// Offline (grey).
    Offline,
}

/// Resumes a disconnected session.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Resume {
    /// Bot or bearer token.
    pub token: Box<str>,
    /// Session to resume.
    pub session_id: Box<str>,
    /// Last sequence received before disconnecting.
    pub seq: u64,
}
