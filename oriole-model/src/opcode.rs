use serde_repr::{Deserialize_repr, Serialize_repr};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Gateway payload opcode, identifying what `d` holds and how to handle it.
#[derive(Clone, Copy, Debug, Deserialize_repr, Eq, Hash, PartialEq, Serialize_repr)]
#[repr(u8)]
#[non_exhaustive]
pub enum OpCode {
    /// An event was dispatched; `t`/`s` are present.
    Dispatch = 0,
    /// Sent by both ends as a heartbeat.
    Heartbeat = 1,
    /// Start a new session.
    Identify = 2,
    /// Update the client's presence.
    PresenceUpdate = 3,
    /// Join, move, or leave a voice channel.
    VoiceStateUpdate = 4,
    /// Resume a disconnected session.
    Resume = 6,
    /// The gateway is asking the client to reconnect and resume.
    Reconnect = 7,
    /// Request a subset of guild members.
    RequestGuildMembers = 8,
    /// The session has been invalidated; `d` indicates whether it is
    /// resumable.
    InvalidSession = 9,
    /// Sent immediately after connecting; contains heartbeat interval.
    Hello = 10,
    /// Acknowledges a received heartbeat.
    HeartbeatAck = 11,
}

impl OpCode {
    /// Convert a raw opcode integer into an [`OpCode`], if recognized.
    #[must_use]
    pub const fn from_primitive(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Dispatch),
            1 => Some(Self::Heartbeat),
            2 => Some(Self::Identify),
            3 => Some(Self::PresenceUpdate),
            4 => Some(Self::VoiceStateUpdate),
            6 => Some(Self::Resume),
            7 => Some(Self::Reconnect),
            8 => Some(Self::RequestGuildMembers),
            9 => Some(Self::InvalidSession),
            10 => Some(Self::Hello),
            11 => Some(Self::HeartbeatAck),
            _ => None,
        }
    }
}

impl Display for OpCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(&(*self as u8), f)
    }
}

#[cfg(test)]
mod tests {
    use super::OpCode;
    use static_assertions::assert_impl_all;

    assert_impl_all!(OpCode: Clone, Copy, Eq, Send, Sync);

    #[test]
    fn from_primitive_round_trips_known_values() {
        for op in [
            OpCode::Dispatch,
            OpCode::Heartbeat,
            OpCode::Identify,
            OpCode::PresenceUpdate,
            OpCode::VoiceStateUpdate,
            OpCode::Resume,
            OpCode::Reconnect,
            OpCode::RequestGuildMembers,
            OpCode::InvalidSession,
            OpCode::Hello,
            OpCode::HeartbeatAck,
        ] {
            assert_eq!(Some(op), OpCode::from_primitive(op as u8));
        }
    }

    #[test]
    fn unknown_primitive_is_none() {
        assert_eq!(None, OpCode::from_primitive(5));
        assert_eq!(None, OpCode::from_primitive(255));
    }
}
