//! Parse typed rate-limit headers from a response.
//!
//! Parsing response headers is necessary for the [`BucketRateLimiter`] and
//! [`GlobalRateLimiter`] to know how to admit the next request.
//!
//! [`BucketRateLimiter`]: crate::bucket::BucketRateLimiter
//! [`GlobalRateLimiter`]: crate::global::GlobalRateLimiter

use std::{
    error::Error,
    fmt::{Debug, Display, Formatter, Result as FmtResult},
    str::{self, FromStr, Utf8Error},
    time::{SystemTime, UNIX_EPOCH},
};

/// A header name/value pair failed to be parsed.
#[derive(Debug)]
pub struct HeaderParsingError {
    /// Detailed reason why the header failed to be parsed.
    pub(crate) kind: HeaderParsingErrorType,
    /// Original error leading up to this one.
    pub(crate) source: Option<Box<dyn Error + Send + Sync>>,
}

impl HeaderParsingError {
    /// Immutable reference to the type of error that occurred.
    #[must_use = "retrieving the type has no effect if left unused"]
    pub const fn kind(&self) -> &HeaderParsingErrorType {
        &self.kind
    }

    /// Consume the error, returning the source error if there is any.
    #[must_use = "consuming the error and retrieving the source has no effect if left unused"]
    pub fn into_source(self) -> Option<Box<dyn Error + Send + Sync>> {
        self.source
    }

    /// Consume the error, returning the owned error type and the source error.
    #[must_use = "consuming the error into its parts has no effect if left unused"]
    pub fn into_parts(self) -> (HeaderParsingErrorType, Option<Box<dyn Error + Send + Sync>>) {
        (self.kind, self.source)
    }

    pub(crate) fn missing(name: HeaderName) -> Self {
        Self {
            kind: HeaderParsingErrorType::Missing { name },
            source: None,
        }
    }

    fn not_utf8(name: HeaderName, value: Vec<u8>, source: Utf8Error) -> Self {
        Self {
            kind: HeaderParsingErrorType::NotUtf8 { name, value },
            source: Some(Box::new(source)),
        }
    }
}

impl Display for HeaderParsingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            HeaderParsingErrorType::Missing { name } => {
                write!(f, "at least one header, '{name}', is missing")
            }
            HeaderParsingErrorType::NotUtf8 { name, value } => {
                write!(f, "header '{name}' contains invalid UTF-8: {value:?}")
            }
            HeaderParsingErrorType::Parsing { kind, name, value } => {
                write!(f, "header '{name}' can not be parsed as a {kind}: '{value}'")
            }
        }
    }
}

impl Error for HeaderParsingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn Error + 'static))
    }
}

/// Type of [`HeaderParsingError`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum HeaderParsingErrorType {
    /// Expected header is missing.
    Missing {
        /// Name of the header that should have been present.
        name: HeaderName,
    },
    /// Header value is not UTF-8 valid.
    NotUtf8 {
        /// Name of the header.
        name: HeaderName,
        /// Raw bytes of the value.
        value: Vec<u8>,
    },
    /// Header value is not of the expected type.
    Parsing {
        /// Type the header value was expected to parse as.
        kind: HeaderType,
        /// Name of the header.
        name: HeaderName,
        /// Value of the header.
        value: String,
    },
}

/// Typed name of a rate-limit header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum HeaderName {
    /// Opaque bucket identifier assigned by the server.
    Bucket,
    /// Whether this is a global rate limit.
    Global,
    /// Maximum requests allotted in the bucket.
    Limit,
    /// Remaining requests allotted.
    Remaining,
    /// How long until the bucket resets.
    ResetAfter,
    /// When the bucket resets, as a Unix timestamp.
    Reset,
    /// How long until a request can be retried.
    RetryAfter,
    /// Scope of a rate limit.
    Scope,
}

impl HeaderName {
    /// Lowercased bucket header name.
    pub const BUCKET: &'static str = "x-ratelimit-bucket";
    /// Lowercased global header name.
    pub const GLOBAL: &'static str = "x-ratelimit-global";
    /// Lowercased limit header name.
    pub const LIMIT: &'static str = "x-ratelimit-limit";
    /// Lowercased remaining header name.
    pub const REMAINING: &'static str = "x-ratelimit-remaining";
    /// Lowercased reset-after header name.
    pub const RESET_AFTER: &'static str = "x-ratelimit-reset-after";
    /// Lowercased reset header name.
    pub const RESET: &'static str = "x-ratelimit-reset";
    /// Lowercased retry-after header name.
    // Correctly has no `x-ratelimit-` prefix; it's a standard HTTP header.
    pub const RETRY_AFTER: &'static str = "retry-after";
    /// Lowercased scope header name.
    pub const SCOPE: &'static str = "x-ratelimit-scope";

    /// Lowercased name of the header.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bucket => Self::BUCKET,
            Self::Global => Self::GLOBAL,
            Self::Limit => Self::LIMIT,
            Self::Remaining => Self::REMAINING,
            Self::ResetAfter => Self::RESET_AFTER,
            Self::Reset => Self::RESET,
            Self::RetryAfter => Self::RETRY_AFTER,
            Self::Scope => Self::SCOPE,
        }
    }
}

impl Display for HeaderName {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.name())
    }
}

/// Expected type of a header value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum HeaderType {
    /// Value is a bool.
    Bool,
    /// Value is a float.
    Float,
    /// Value is an integer.
    Integer,
    /// Value is a string.
    String,
}

impl HeaderType {
    const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Float => "float",
            Self::Integer => "integer",
            Self::String => "string",
        }
    }
}

impl Display for HeaderType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.name())
    }
}

/// Rate limit applying to the whole process, independent of any bucket.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct GlobalLimited {
    retry_after: u64,
    scope: Option<RatelimitScope>,
}

impl GlobalLimited {
    /// Number of seconds before retrying.
    #[must_use]
    pub const fn retry_after(&self) -> u64 {
        self.retry_after
    }

    /// Scope of the rate limit; should always be
    /// [`RatelimitScope::Global`] when present.
    #[must_use]
    pub const fn scope(&self) -> Option<RatelimitScope> {
        self.scope
    }
}

/// Bucket rate-limit information was present in the response.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Present {
    bucket: Option<String>,
    limit: u64,
    remaining: u64,
    /// Milliseconds until the bucket resets.
    reset_after: u64,
    /// Unix timestamp in milliseconds the bucket resets at.
    reset: u64,
    scope: Option<RatelimitScope>,
}

impl Present {
    /// Server-assigned bucket id, if any.
    #[must_use]
    pub fn bucket(&self) -> Option<&str> {
        self.bucket.as_deref()
    }

    /// Consume the headers, returning the owned bucket id if present.
    #[must_use]
    pub fn into_bucket(self) -> Option<String> {
        self.bucket
    }

    /// Total tickets allotted to the bucket.
    #[must_use]
    pub const fn limit(&self) -> u64 {
        self.limit
    }

    /// Remaining tickets in the bucket.
    #[must_use]
    pub const fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Milliseconds until the bucket resets.
    #[must_use]
    pub const fn reset_after(&self) -> u64 {
        self.reset_after
    }

    /// When the bucket resets, as a Unix timestamp in milliseconds.
    #[must_use]
    pub const fn reset(&self) -> u64 {
        self.reset
    }

    /// Scope of the rate limit when this response was a 429.
    #[must_use]
    pub const fn scope(&self) -> Option<RatelimitScope> {
        self.scope
    }
}

/// Scope of a rate limit when a 429 occurs.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RatelimitScope {
    /// Affects the application as a whole.
    Global,
    /// Affects all applications operating on the same resource; does not
    /// mutate the caller's own bucket state.
    Shared,
    /// Affects only this bucket.
    User,
}

impl Display for RatelimitScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(match self {
            Self::Global => "global",
            Self::Shared => "shared",
            Self::User => "user",
        })
    }
}

impl FromStr for RatelimitScope {
    type Err = HeaderParsingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "global" => Self::Global,
            "shared" => Self::Shared,
            "user" => Self::User,
            _ => {
                return Err(HeaderParsingError {
                    kind: HeaderParsingErrorType::Parsing {
                        kind: HeaderType::String,
                        name: HeaderName::Scope,
                        value: s.to_owned(),
                    },
                    source: None,
                })
            }
        })
    }
}

/// Parsed rate-limit headers: a global lock, a bucket, or nothing at all.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum RatelimitHeaders {
    /// Globally rate limited; see [`GlobalLimited`].
    GlobalLimited(GlobalLimited),
    /// No rate-limit headers present; the route is unlimited.
    None,
    /// Bucket rate-limit information is present.
    Present(Present),
}

impl RatelimitHeaders {
    /// Whether these headers describe a global rate limit.
    #[must_use]
    pub const fn is_global(&self) -> bool {
        matches!(self, Self::GlobalLimited(_))
    }

    /// Whether there were no rate-limit headers at all.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Whether bucket rate-limit information is present.
    #[must_use]
    pub const fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    /// Parse headers from an iterator of lowercased name / raw value pairs.
    ///
    /// # Errors
    ///
    /// Returns [`HeaderParsingError`] if a required header is missing or a
    /// present header's value is of an unexpected type.
    pub fn from_pairs<'a>(
        headers: impl Iterator<Item = (&'a str, &'a [u8])>,
    ) -> Result<Self, HeaderParsingError> {
        let mut bucket = None;
        let mut global = false;
        let mut limit = None;
        let mut remaining = None;
        let mut reset = None;
        let mut reset_after = None;
        let mut retry_after = None;
        let mut scope = None;

        for (name, value) in headers {
            match name {
                HeaderName::BUCKET => {
                    bucket.replace(header_str(HeaderName::Bucket, value)?);
                }
                HeaderName::GLOBAL => {
                    global = header_bool(HeaderName::Global, value)?;
                }
                HeaderName::LIMIT => {
                    limit.replace(header_int(HeaderName::Limit, value)?);
                }
                HeaderName::REMAINING => {
                    remaining.replace(header_int(HeaderName::Remaining, value)?);
                }
                HeaderName::RESET => {
                    let reset_value = header_float(HeaderName::Reset, value)?;

                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    reset.replace((reset_value * 1000.).ceil() as u64);
                }
                HeaderName::RESET_AFTER => {
                    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
                    let reset_after_value =
                        (header_float(HeaderName::ResetAfter, value)? * 1000.).ceil() as u64;

                    reset_after.replace(reset_after_value);
                }
                HeaderName::RETRY_AFTER => {
                    retry_after.replace(header_int(HeaderName::RetryAfter, value)?);
                }
                HeaderName::SCOPE => {
                    let scope_value = header_str(HeaderName::Scope, value)?;
                    scope.replace(RatelimitScope::from_str(scope_value)?);
                }
                _ => continue,
            }
        }

        if global {
            let retry_after =
                retry_after.ok_or_else(|| HeaderParsingError::missing(HeaderName::RetryAfter))?;

            return Ok(Self::GlobalLimited(GlobalLimited { retry_after, scope }));
        }

        if bucket.is_none()
            && limit.is_none()
            && remaining.is_none()
            && reset.is_none()
            && reset_after.is_none()
        {
            return Ok(Self::None);
        }

        let reset = reset.ok_or_else(|| HeaderParsingError::missing(HeaderName::Reset))?;

        // `Reset-After` is immune to clock skew and is preferred when
        // present, but some responses only carry the absolute `Reset`
        // timestamp; fall back to deriving the relative duration from it
        // rather than failing the whole parse.
        let reset_after = match reset_after {
            Some(value) => value,
            None => reset_after_from_reset(reset),
        };

        Ok(Self::Present(Present {
            bucket: bucket.map(ToOwned::to_owned),
            limit: limit.ok_or_else(|| HeaderParsingError::missing(HeaderName::Limit))?,
            remaining: remaining
                .ok_or_else(|| HeaderParsingError::missing(HeaderName::Remaining))?,
            reset,
            reset_after,
            scope,
        }))
    }
}

/// Derive a relative `reset_after` (milliseconds) from an absolute `reset`
/// Unix-epoch-milliseconds timestamp, clamped to zero if it's already past.
fn reset_after_from_reset(reset: u64) -> u64 {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));

    reset.saturating_sub(now_ms)
}

fn header_bool(name: HeaderName, value: &[u8]) -> Result<bool, HeaderParsingError> {
    let text = header_str(name, value)?;

    text.parse().map_err(|source| HeaderParsingError {
        kind: HeaderParsingErrorType::Parsing {
            kind: HeaderType::Bool,
            name,
            value: text.to_owned(),
        },
        source: Some(Box::new(source)),
    })
}

fn header_float(name: HeaderName, value: &[u8]) -> Result<f64, HeaderParsingError> {
    let text = header_str(name, value)?;

    text.parse().map_err(|source| HeaderParsingError {
        kind: HeaderParsingErrorType::Parsing {
            kind: HeaderType::Float,
            name,
            value: text.to_owned(),
        },
        source: Some(Box::new(source)),
    })
}

fn header_int(name: HeaderName, value: &[u8]) -> Result<u64, HeaderParsingError> {
    let text = header_str(name, value)?;

    text.parse().map_err(|source| HeaderParsingError {
        kind: HeaderParsingErrorType::Parsing {
            kind: HeaderType::Integer,
            name,
            value: text.to_owned(),
        },
        source: Some(Box::new(source)),
    })
}

fn header_str(name: HeaderName, value: &[u8]) -> Result<&str, HeaderParsingError> {
    str::from_utf8(value).map_err(|source| HeaderParsingError::not_utf8(name, value.to_owned(), source))
}

#[cfg(test)]
mod tests {
    use super::{HeaderName, HeaderParsingErrorType, HeaderType, RatelimitHeaders, RatelimitScope};
    use static_assertions::{assert_fields, assert_impl_all};
    use std::{error::Error, fmt::Debug};

    assert_fields!(HeaderParsingErrorType::Missing: name);
    assert_fields!(HeaderParsingErrorType::NotUtf8: name, value);
    assert_fields!(HeaderParsingErrorType::Parsing: kind, name, value);
    assert_impl_all!(HeaderName: Clone, Copy, Debug, Eq, PartialEq, Send, Sync);
    assert_impl_all!(super::HeaderParsingError: Error, Send, Sync);
    assert_impl_all!(HeaderType: Clone, Copy, Debug, Eq, PartialEq, Send, Sync);
    assert_impl_all!(RatelimitHeaders: Clone, Debug, Send, Sync);

    fn pairs<'a>(raw: &'a [(&'a str, &'a str)]) -> impl Iterator<Item = (&'a str, &'a [u8])> {
        raw.iter().map(|(k, v)| (*k, v.as_bytes()))
    }

    #[test]
    fn global() {
        let headers =
            RatelimitHeaders::from_pairs(pairs(&[("x-ratelimit-global", "true"), ("retry-after", "65")]))
                .unwrap();

        assert!(matches!(headers, RatelimitHeaders::GlobalLimited(g) if g.retry_after() == 65));
    }

    #[test]
    fn global_with_scope() {
        let headers = RatelimitHeaders::from_pairs(pairs(&[
            ("x-ratelimit-global", "true"),
            ("retry-after", "65"),
            ("x-ratelimit-scope", "global"),
        ]))
        .unwrap();

        assert!(matches!(
            headers,
            RatelimitHeaders::GlobalLimited(g) if g.scope() == Some(RatelimitScope::Global)
        ));
    }

    #[test]
    fn present() {
        let headers = RatelimitHeaders::from_pairs(pairs(&[
            ("x-ratelimit-limit", "10"),
            ("x-ratelimit-remaining", "9"),
            ("x-ratelimit-reset", "1470173023.123"),
            ("x-ratelimit-reset-after", "64.57"),
            ("x-ratelimit-bucket", "abcd1234"),
            ("x-ratelimit-scope", "shared"),
        ]))
        .unwrap();

        let RatelimitHeaders::Present(present) = headers else {
            panic!("expected Present variant");
        };

        assert_eq!(Some("abcd1234"), present.bucket());
        assert_eq!(10, present.limit());
        assert_eq!(9, present.remaining());
        assert_eq!(64_570, present.reset_after());
        assert_eq!(1_470_173_023_123, present.reset());
        assert_eq!(Some(RatelimitScope::Shared), present.scope());
    }

    #[test]
    fn no_headers_is_none() {
        let headers = RatelimitHeaders::from_pairs(std::iter::empty()).unwrap();

        assert!(headers.is_none());
    }

    #[test]
    fn name_constants_match_name_method() {
        assert_eq!(HeaderName::BUCKET, HeaderName::Bucket.name());
        assert_eq!(HeaderName::GLOBAL, HeaderName::Global.name());
        assert_eq!(HeaderName::LIMIT, HeaderName::Limit.name());
        assert_eq!(HeaderName::REMAINING, HeaderName::Remaining.name());
        assert_eq!(HeaderName::RESET_AFTER, HeaderName::ResetAfter.name());
        assert_eq!(HeaderName::RESET, HeaderName::Reset.name());
        assert_eq!(HeaderName::RETRY_AFTER, HeaderName::RetryAfter.name());
        assert_eq!(HeaderName::SCOPE, HeaderName::Scope.name());
    }
}
