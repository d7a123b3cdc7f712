use hyper::StatusCode;
use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
    result::Result as StdResult,
};

/// Convenience alias for a [`Result`] whose error is [`Error`].
pub type Result<T, E = Error> = StdResult<T, E>;

/// An error from building, sending, or interpreting the response to an API
/// request.
#[derive(Debug)]
pub struct Error {
    pub(crate) source: Option<Box<dyn StdError + Send + Sync>>,
    pub(crate) kind: ErrorType,
}

impl Error {
    /// Immutable reference to the type of error that occurred.
    #[must_use = "retrieving the type has no effect if left unused"]
    pub const fn kind(&self) -> &ErrorType {
        &self.kind
    }

    /// Consume the error, returning the source error if there is any.
    #[must_use = "consuming the error and retrieving the source has no effect if left unused"]
    pub fn into_source(self) -> Option<Box<dyn StdError + Send + Sync>> {
        self.source
    }

    /// Consume the error, returning the owned error type and the source
    /// error.
    #[must_use = "consuming the error into its parts has no effect if left unused"]
    pub fn into_parts(self) -> (ErrorType, Option<Box<dyn StdError + Send + Sync>>) {
        (self.kind, self.source)
    }

    pub(crate) fn new(kind: ErrorType) -> Self {
        Self { kind, source: None }
    }

    pub(crate) fn with_source(kind: ErrorType, source: impl StdError + Send + Sync + 'static) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            ErrorType::BuildingRequest => f.write_str("failed to build the request"),
            ErrorType::ChunkingResponse => f.write_str("chunking the response body failed"),
            ErrorType::Json => f.write_str("request body could not be serialized to JSON"),
            ErrorType::RequestCanceled => {
                f.write_str("request was canceled before a response was received")
            }
            ErrorType::RequestError => f.write_str("sending the request failed"),
            ErrorType::RequestTimedOut => f.write_str("request timed out"),
            ErrorType::RateLimitingFailed { status } => write!(
                f,
                "exceeded the configured rate limit retry budget, last status {status}"
            ),
            ErrorType::CloudflareBan => {
                f.write_str("request was blocked by Cloudflare (1015 / infrastructure ban)")
            }
            ErrorType::BadRequest { .. } => f.write_str("400: bad request"),
            ErrorType::Unauthorized => {
                f.write_str("401: token in use is invalid, expired, or revoked")
            }
            ErrorType::Forbidden => f.write_str("403: missing permission for this action"),
            ErrorType::NotFound => f.write_str("404: resource does not exist"),
            ErrorType::InternalServerError { status } => {
                write!(f, "{status}: Discord's API returned a server error")
            }
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn StdError + 'static))
    }
}

/// Type of [`Error`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum ErrorType {
    /// The request could not be built (invalid header value, invalid URI).
    BuildingRequest,
    /// The response body could not be read to completion.
    ChunkingResponse,
    /// The request body could not be serialized to JSON.
    Json,
    /// The rate limiter's ticket channel was dropped before admission.
    RequestCanceled,
    /// The underlying HTTP client failed to send the request or read the
    /// response.
    RequestError,
    /// The request did not complete within the configured timeout.
    RequestTimedOut,
    /// Retried a 429 past `max_rate_limit_retries` without success.
    RateLimitingFailed {
        /// Status of the last response received.
        status: StatusCode,
    },
    /// Discord's edge infrastructure blocked the request outright (HTTP 429
    /// with a Cloudflare 1015 body, or a non-JSON Cloudflare block page).
    /// Not recoverable by retrying.
    CloudflareBan,
    /// `400 Bad Request`.
    BadRequest {
        /// Raw response body, for the caller to inspect.
        body: Vec<u8>,
    },
    /// `401 Unauthorized`: the configured token is invalid.
    Unauthorized,
    /// `403 Forbidden`: missing permission for the action.
    Forbidden,
    /// `404 Not Found`.
    NotFound,
    /// `5xx` after exhausting `max_retries`.
    InternalServerError {
        /// Status of the last response received.
        status: StatusCode,
    },
}
