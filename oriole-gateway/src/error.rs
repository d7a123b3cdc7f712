//! Errors raised while connecting to, and receiving messages from, the
//! gateway.

use oriole_model::CloseCode;
use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
};

/// Error establishing the websocket connection itself (DNS, TLS, TCP).
#[derive(Debug)]
pub struct ConnectError {
    pub(crate) source: Box<dyn StdError + Send + Sync>,
}

impl Display for ConnectError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str("failed to connect to the gateway")
    }
}

impl StdError for ConnectError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&*self.source)
    }
}

/// Sending a command over the websocket failed.
#[derive(Debug)]
pub struct SendError {
    pub(crate) source: Box<dyn StdError + Send + Sync>,
}

impl Display for SendError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str("failed to send a command over the gateway connection")
    }
}

impl StdError for SendError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&*self.source)
    }
}

/// An error encountered while receiving and processing one gateway message.
#[derive(Debug)]
pub struct ReceiveMessageError {
    pub(crate) source: Option<Box<dyn StdError + Send + Sync>>,
    pub(crate) kind: ReceiveMessageErrorType,
}

impl ReceiveMessageError {
    /// Immutable reference to the type of error that occurred.
    #[must_use]
    pub const fn kind(&self) -> &ReceiveMessageErrorType {
        &self.kind
    }

    /// Consume the error, returning the source error if there is any.
    #[must_use]
    pub fn into_source(self) -> Option<Box<dyn StdError + Send + Sync>> {
        self.source
    }

    /// Whether this error represents a fatal close: the shard should stop
    /// entirely rather than reconnect.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            ReceiveMessageErrorType::InvalidToken
                | ReceiveMessageErrorType::InvalidIntents
                | ReceiveMessageErrorType::DisallowedIntents
                | ReceiveMessageErrorType::InvalidApiVersion
                | ReceiveMessageErrorType::InvalidShardCount
                | ReceiveMessageErrorType::UnhandledCloseCode { .. }
        )
    }

    pub(crate) fn compression(source: impl StdError + Send + Sync + 'static) -> Self {
        Self {
            source: Some(Box::new(source)),
            kind: ReceiveMessageErrorType::Compression,
        }
    }

    pub(crate) fn deserializing(source: impl StdError + Send + Sync + 'static) -> Self {
        Self {
            source: Some(Box::new(source)),
            kind: ReceiveMessageErrorType::Deserializing,
        }
    }

    pub(crate) fn websocket(source: impl StdError + Send + Sync + 'static) -> Self {
        Self {
            source: Some(Box::new(source)),
            kind: ReceiveMessageErrorType::WebSocket,
        }
    }

    /// Build a fatal error from a close code the session already confirmed
    /// is fatal via [`CloseCode::is_fatal`].
    pub(crate) fn from_close_code(close_code: CloseCode) -> Self {
        let kind = match close_code {
            CloseCode::AuthenticationFailed => ReceiveMessageErrorType::InvalidToken,
            CloseCode::InvalidIntents => ReceiveMessageErrorType::InvalidIntents,
            CloseCode::DisallowedIntents => ReceiveMessageErrorType::DisallowedIntents,
            CloseCode::InvalidApiVersion => ReceiveMessageErrorType::InvalidApiVersion,
            CloseCode::InvalidShard | CloseCode::ShardingRequired => {
                ReceiveMessageErrorType::InvalidShardCount
            }
            other => ReceiveMessageErrorType::UnhandledCloseCode {
                close_code: u16::from(other),
            },
        };

        Self { source: None, kind }
    }
}

impl Display for ReceiveMessageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            ReceiveMessageErrorType::Compression => {
                f.write_str("payload failed to decompress")
            }
            ReceiveMessageErrorType::Deserializing => {
                f.write_str("payload was not valid gateway JSON")
            }
            ReceiveMessageErrorType::WebSocket => f.write_str("websocket connection failed"),
            ReceiveMessageErrorType::InvalidToken => {
                f.write_str("4004: the provided token is invalid")
            }
            ReceiveMessageErrorType::InvalidIntents => {
                f.write_str("4013: one or more intents are invalid")
            }
            ReceiveMessageErrorType::DisallowedIntents => f.write_str(
                "4014: a privileged intent was requested without being enabled for the application",
            ),
            ReceiveMessageErrorType::InvalidApiVersion => {
                f.write_str("4012: the gateway version requested is invalid")
            }
            ReceiveMessageErrorType::InvalidShardCount => {
                f.write_str("4010/4011: the shard count does not match what Discord expects")
            }
            ReceiveMessageErrorType::UnhandledCloseCode { close_code } => {
                write!(f, "{close_code}: gateway closed the connection")
            }
        }
    }
}

impl StdError for ReceiveMessageError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn StdError + 'static))
    }
}

/// Type of [`ReceiveMessageError`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum ReceiveMessageErrorType {
    /// The zlib-stream payload could not be decompressed.
    Compression,
    /// The payload was not valid JSON, or did not match the expected
    /// envelope shape.
    Deserializing,
    /// The underlying websocket connection failed.
    WebSocket,
    /// Close code 4004: the token is invalid, expired, or revoked.
    InvalidToken,
    /// Close code 4013: one or more requested intents don't exist.
    InvalidIntents,
    /// Close code 4014: a privileged intent was requested without
    /// enabling it for the application.
    DisallowedIntents,
    /// Close code 4012: the `v` query parameter is not a supported
    /// gateway version.
    InvalidApiVersion,
    /// Close codes 4010/4011: the shard id or count are invalid, or
    /// sharding is now required.
    InvalidShardCount,
    /// A fatal-looking 4xxx close code not covered by a more specific
    /// variant.
    UnhandledCloseCode {
        /// Raw close code received.
        close_code: u16,
    },
}

/// A non-fatal close of the gateway connection, surfaced for observability.
#[derive(Clone, Debug)]
pub struct DisconnectError {
    pub(crate) close_code: Option<u16>,
    pub(crate) reason: Option<Box<str>>,
}

impl DisconnectError {
    /// The close code the gateway sent, if any (a plain socket drop has
    /// none).
    #[must_use]
    pub const fn close_code(&self) -> Option<u16> {
        self.close_code
    }

    /// The close reason string, if any.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

impl Display for DisconnectError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self.close_code {
            Some(code) => write!(f, "gateway connection closed ({code})"),
            None => f.write_str("gateway connection closed"),
        }
    }
}

impl StdError for DisconnectError {}

/// A caller-installed reconnect predicate refused to allow a reconnect
/// attempt.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReconnectCheckFailedError;

impl Display for ReconnectCheckFailedError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str("reconnect predicate refused to reconnect the shard")
    }
}

impl StdError for ReconnectCheckFailedError {}

#[cfg(test)]
mod tests {
    use super::{DisconnectError, ReceiveMessageError, ReceiveMessageErrorType, ReconnectCheckFailedError};
    use oriole_model::CloseCode;
    use static_assertions::assert_impl_all;
    use std::error::Error;

    assert_impl_all!(ReceiveMessageError: Error, Send, Sync);
    assert_impl_all!(DisconnectError: Error, Send, Sync);
    assert_impl_all!(ReconnectCheckFailedError: Error, Send, Sync);

    #[test]
    fn authentication_failed_maps_to_invalid_token_and_is_fatal() {
        let error = ReceiveMessageError::from_close_code(CloseCode::AuthenticationFailed);
        assert!(matches!(error.kind(), ReceiveMessageErrorType::InvalidToken));
        assert!(error.is_fatal());
    }

    #[test]
    fn invalid_shard_count_covers_both_shard_close_codes() {
        let invalid_shard = ReceiveMessageError::from_close_code(CloseCode::InvalidShard);
        let sharding_required = ReceiveMessageError::from_close_code(CloseCode::ShardingRequired);

        assert!(matches!(
            invalid_shard.kind(),
            ReceiveMessageErrorType::InvalidShardCount
        ));
        assert!(matches!(
            sharding_required.kind(),
            ReceiveMessageErrorType::InvalidShardCount
        ));
    }

    #[test]
    fn disallowed_intents_is_fatal() {
        let error = ReceiveMessageError::from_close_code(CloseCode::DisallowedIntents);
        assert!(error.is_fatal());
    }
}
