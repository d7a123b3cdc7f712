use std::{
    convert::TryFrom,
    fmt::{Display, Formatter, Result as FmtResult},
};

/// WebSocket close code sent by the gateway when it terminates a connection.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum CloseCode {
    /// Unknown error; try reconnecting.
    UnknownError,
    /// An invalid opcode or payload was sent.
    UnknownOpcode,
    /// An invalid payload was sent.
    DecodeError,
    /// A payload was sent before IDENTIFY.
    NotAuthenticated,
    /// The token in the IDENTIFY payload was incorrect.
    AuthenticationFailed,
    /// More than one IDENTIFY payload was sent.
    AlreadyAuthenticated,
    /// The sequence sent when resuming was invalid; reconnect and start a
    /// new session.
    InvalidSeq,
    /// Commands were sent too quickly.
    RateLimited,
    /// The session timed out; reconnect and start a new session.
    SessionTimedOut,
    /// The shard sent in IDENTIFY is invalid.
    InvalidShard,
    /// The session would have handled too many guilds; shard the
    /// connection.
    ShardingRequired,
    /// The gateway version sent in the query string is invalid.
    InvalidApiVersion,
    /// The intents sent in IDENTIFY are invalid.
    InvalidIntents,
    /// The intents sent in IDENTIFY are not permitted for the account.
    DisallowedIntents,
}

impl CloseCode {
    /// Whether reconnecting should not attempt to resume the prior session.
    #[must_use]
    pub const fn is_resumable(self) -> bool {
        !matches!(
            self,
            Self::AuthenticationFailed
                | Self::InvalidShard
                | Self::ShardingRequired
                | Self::InvalidApiVersion
                | Self::InvalidIntents
                | Self::DisallowedIntents
        )
    }

    /// Whether the shard should stop entirely rather than reconnect.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed
                | Self::InvalidShard
                | Self::ShardingRequired
                | Self::InvalidApiVersion
                | Self::InvalidIntents
                | Self::DisallowedIntents
        )
    }
}

impl Display for CloseCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(&u16::from(*self), f)
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        match code {
            CloseCode::UnknownError => 4000,
            CloseCode::UnknownOpcode => 4001,
            CloseCode::DecodeError => 4002,
            CloseCode::NotAuthenticated => 4003,
            CloseCode::AuthenticationFailed => 4004,
            CloseCode::AlreadyAuthenticated => 4005,
            CloseCode::InvalidSeq => 4007,
            CloseCode::RateLimited => 4008,
            CloseCode::SessionTimedOut => 4009,
            CloseCode::InvalidShard => 4010,
            CloseCode::ShardingRequired => 4011,
            CloseCode::InvalidApiVersion => 4012,
            CloseCode::InvalidIntents => 4013,
            CloseCode::DisallowedIntents => 4014,
        }
    }
}

/// The error returned when a raw close code doesn't map to a known
/// [`CloseCode`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct CloseCodeConversionError {
    code: u16,
}

impl CloseCodeConversionError {
    /// The close code that could not be converted.
    #[must_use]
    pub const fn code(&self) -> u16 {
        self.code
    }
}

impl Display for CloseCodeConversionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{} isn't a valid close code", self.code)
    }
}

impl std::error::Error for CloseCodeConversionError {}

impl TryFrom<u16> for CloseCode {
    type Error = CloseCodeConversionError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            4000 => Ok(Self::UnknownError),
            4001 => Ok(Self::UnknownOpcode),
            4002 => Ok(Self::DecodeError),
            4003 => Ok(Self::NotAuthenticated),
            4004 => Ok(Self::AuthenticationFailed),
            4005 => Ok(Self::AlreadyAuthenticated),
            4007 => Ok(Self::InvalidSeq),
            4008 => Ok(Self::RateLimited),
            4009 => Ok(Self::SessionTimedOut),
            4010 => Ok(Self::InvalidShard),
            4011 => Ok(Self::ShardingRequired),
            4012 => Ok(Self::InvalidApiVersion),
            4013 => Ok(Self::InvalidIntents),
            4014 => Ok(Self::DisallowedIntents),
            _ => Err(CloseCodeConversionError { code: value }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CloseCode;
    use static_assertions::assert_impl_all;
    use std::convert::TryFrom;

    assert_impl_all!(CloseCode: Clone, Copy, Eq, Send, Sync);

    #[test]
    fn conversion_round_trips() {
        for code in [
            CloseCode::UnknownError,
            CloseCode::UnknownOpcode,
            CloseCode::DecodeError,
            CloseCode::NotAuthenticated,
            CloseCode::AuthenticationFailed,
            CloseCode::AlreadyAuthenticated,
            CloseCode::InvalidSeq,
            CloseCode::RateLimited,
            CloseCode::SessionTimedOut,
            CloseCode::InvalidShard,
            CloseCode::ShardingRequired,
            CloseCode::InvalidApiVersion,
            CloseCode::InvalidIntents,
            CloseCode::DisallowedIntents,
        ] {
            let raw = u16::from(code);
            assert_eq!(code, CloseCode::try_from(raw).unwrap());
        }
    }

    #[test]
    fn unknown_code_is_not_fatal_and_is_resumable() {
        assert!(CloseCode::try_from(1006).is_err());
        assert!(CloseCode::UnknownError.is_resumable());
        assert!(!CloseCode::UnknownError.is_fatal());
    }

    #[test]
    fn disallowed_intents_is_fatal_and_not_resumable() {
        assert!(CloseCode::DisallowedIntents.is_fatal());
        assert!(!CloseCode::DisallowedIntents.is_resumable());
    }
}
