//! Route identity for rate limiting.
//!
//! Only the bucket-key abstraction lives here, not a variant per Discord
//! endpoint: a caller builds a [`Route`] by hand (or a thin wrapper crate not
//! included here builds one per endpoint) and the engine only ever needs
//! [`Route::bucket_key`] and [`Route::path`] to do its job.

use http::Method;
use std::{
    borrow::Cow,
    fmt::{Display, Formatter, Result as FmtResult},
};

/// The "major" path parameter that partitions a rate-limit bucket even when
/// the route template is otherwise identical.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Major {
    /// No major parameter (e.g. `/gateway`, `/users/@me`).
    None,
    /// A `channel_id` major parameter.
    Channel(u64),
    /// A `guild_id` major parameter.
    Guild(u64),
    /// A `webhook_id`/`webhook_token` major parameter pair.
    Webhook(u64, Option<Box<str>>),
}

/// Client-side identity of an endpoint, used as the rate-limit bucket key
/// before the server-assigned bucket id is known.
///
/// Two [`Route`]s produce equal [`Path`]s if and only if Discord rate-limits
/// them together from the client's point of view; the actual server-side
/// bucket id (see `X-RateLimit-Bucket`) may still group several distinct
/// `Path`s into one bucket, which is handled one layer up.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Path {
    method: Method,
    template: &'static str,
    major: Major,
}

impl Path {
    /// The request method this path was built for.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// The route template, e.g. `/channels/:channel_id/messages`.
    #[must_use]
    pub const fn template(&self) -> &'static str {
        self.template
    }

    /// The major parameter distinguishing this path from others sharing the
    /// same template.
    #[must_use]
    pub const fn major(&self) -> &Major {
        &self.major
    }
}

impl Display for Path {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{} {}", self.method, self.template)?;

        match &self.major {
            Major::None => Ok(()),
            Major::Channel(id) => write!(f, " (channel {id})"),
            Major::Guild(id) => write!(f, " (guild {id})"),
            Major::Webhook(id, _) => write!(f, " (webhook {id})"),
        }
    }
}

/// A concrete, ready-to-send API endpoint.
///
/// This is deliberately generic rather than one enum variant per Discord
/// resource: the core only needs to route requests through the rate limiter
/// and onto the wire, not to know the shape of every endpoint's parameters.
#[derive(Clone, Debug)]
pub struct Route<'a> {
    method: Method,
    template: &'static str,
    major: Major,
    path: Cow<'a, str>,
}

impl<'a> Route<'a> {
    /// Build a route with no major parameter, e.g. `GET /gateway/bot`.
    #[must_use]
    pub fn new(method: Method, template: &'static str, path: impl Into<Cow<'a, str>>) -> Self {
        Self {
            method,
            template,
            major: Major::None,
            path: path.into(),
        }
    }

    /// Build a route scoped to a channel, e.g. `POST
    /// /channels/:channel_id/messages`.
    #[must_use]
    pub fn for_channel(
        method: Method,
        template: &'static str,
        channel_id: u64,
        path: impl Into<Cow<'a, str>>,
    ) -> Self {
        Self {
            method,
            template,
            major: Major::Channel(channel_id),
            path: path.into(),
        }
    }

    /// Build a route scoped to a guild, e.g. `GET
    /// /guilds/:guild_id/roles`.
    #[must_use]
    pub fn for_guild(
        method: Method,
        template: &'static str,
        guild_id: u64,
        path: impl Into<Cow<'a, str>>,
    ) -> Self {
        Self {
            method,
            template,
            major: Major::Guild(guild_id),
            path: path.into(),
        }
    }

    /// Build a route scoped to a webhook, e.g. `POST
    /// /webhooks/:webhook_id/:webhook_token`.
    #[must_use]
    pub fn for_webhook(
        method: Method,
        template: &'static str,
        webhook_id: u64,
        webhook_token: Option<&str>,
        path: impl Into<Cow<'a, str>>,
    ) -> Self {
        Self {
            method,
            template,
            major: Major::Webhook(webhook_id, webhook_token.map(Into::into)),
            path: path.into(),
        }
    }

    /// The method this route will be sent with.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// The substituted request path, relative to the API base URL.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Derive the rate-limit bucket key for this route.
    #[must_use]
    pub fn bucket_key(&self) -> Path {
        Path {
            method: self.method.clone(),
            template: self.template,
            major: self.major.clone(),
        }
    }
}
