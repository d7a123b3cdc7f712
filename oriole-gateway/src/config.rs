//! Identity and tunables for a single gateway session.

use oriole_gateway_queue::{IdentifyQueue, InMemoryQueue};
use oriole_model::{payload::UpdatePresence, EventTypeFlags, Intents};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    sync::Arc,
    time::Duration,
};

/// Default large guild member threshold, matching Discord's own default.
pub const LARGE_THRESHOLD_DEFAULT: u64 = 50;
/// Minimum accepted large guild member threshold.
pub const LARGE_THRESHOLD_MINIMUM: u64 = 50;
/// Maximum accepted large guild member threshold.
pub const LARGE_THRESHOLD_MAXIMUM: u64 = 250;

/// Identity of one shard within a (possibly single-shard) bot.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ShardId {
    current: u64,
    total: u64,
}

impl ShardId {
    /// The identity of an unsharded bot: shard 0 of 1.
    pub const ONE: Self = Self {
        current: 0,
        total: 1,
    };

    /// Create a shard identity without validating `current < total`.
    ///
    /// # Panics
    ///
    /// Panics if `current >= total` or `total == 0`.
    #[must_use]
    pub const fn new(current: u64, total: u64) -> Self {
        assert!(total > 0, "shard total must be greater than 0");
        assert!(current < total, "shard index must be less than the total");

        Self { current, total }
    }

    /// Create a shard identity, returning `None` if `current >= total` or
    /// `total == 0`.
    #[must_use]
    pub const fn new_checked(current: u64, total: u64) -> Option<Self> {
        if total == 0 || current >= total {
            None
        } else {
            Some(Self { current, total })
        }
    }

    /// This shard's index.
    #[must_use]
    pub const fn current(self) -> u64 {
        self.current
    }

    /// Total number of shards in the bot.
    #[must_use]
    pub const fn total(self) -> u64 {
        self.total
    }
}

impl Display for ShardId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "shard {}/{}", self.current, self.total)
    }
}

/// Configuration for one [`crate::session::GatewaySession`].
#[derive(Clone, Debug)]
pub struct Config {
    event_types: EventTypeFlags,
    gateway_url: Option<Box<str>>,
    identify_properties: Option<oriole_model::payload::IdentifyProperties>,
    intents: Intents,
    large_threshold: u64,
    presence: Option<UpdatePresence>,
    queue: Arc<dyn IdentifyQueue>,
    ratelimit_messages: bool,
    session: Option<(Box<str>, u64)>,
    token: Box<str>,
}

impl Config {
    /// Create a default configuration for a shard.
    #[must_use]
    pub fn new(token: String, intents: Intents) -> Self {
        Self::builder(token, intents).build()
    }

    /// Start a builder to customize the configuration for a shard.
    #[must_use]
    pub fn builder(token: String, intents: Intents) -> ConfigBuilder {
        ConfigBuilder::new(token, intents)
    }

    /// Dispatch event categories this shard subscribes to. Dispatch events
    /// outside this set are still received and acted on internally (e.g.
    /// `READY`/`RESUMED` tracking session state) but aren't delivered to the
    /// event dispatcher.
    #[must_use]
    pub const fn event_types(&self) -> EventTypeFlags {
        self.event_types
    }

    /// The URL used for connecting to Discord's gateway, if overridden.
    #[must_use]
    pub fn gateway_url(&self) -> Option<&str> {
        self.gateway_url.as_deref()
    }

    /// The identify properties the shard will use, if overridden.
    #[must_use]
    pub const fn identify_properties(&self) -> Option<&oriole_model::payload::IdentifyProperties> {
        self.identify_properties.as_ref()
    }

    /// Intents the shard requests when identifying.
    #[must_use]
    pub const fn intents(&self) -> Intents {
        self.intents
    }

    /// Member threshold below which Discord includes a guild's full member
    /// list in its `GUILD_CREATE` payload.
    #[must_use]
    pub const fn large_threshold(&self) -> u64 {
        self.large_threshold
    }

    /// Initial presence to set on connect, if overridden.
    #[must_use]
    pub const fn presence(&self) -> Option<&UpdatePresence> {
        self.presence.as_ref()
    }

    /// The identify queue shards acquire a slot from before sending IDENTIFY.
    #[must_use]
    pub fn queue(&self) -> &Arc<dyn IdentifyQueue> {
        &self.queue
    }

    /// Whether outbound commands are rate limited.
    #[must_use]
    pub const fn ratelimit_messages(&self) -> bool {
        self.ratelimit_messages
    }

    /// `(session_id, sequence)` to resume on connection, if set.
    #[must_use]
    pub fn session(&self) -> Option<(&str, u64)> {
        self.session.as_ref().map(|(id, seq)| (&**id, *seq))
    }

    /// The token used to authenticate when identifying.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Builder to customize a shard's [`Config`].
#[derive(Debug)]
#[must_use = "builder must be completed with `build` to be used"]
pub struct ConfigBuilder {
    inner: Config,
}

impl ConfigBuilder {
    /// Create a new builder. `token` is normalized to have a `Bot ` prefix
    /// if not already present.
    pub fn new(mut token: String, intents: Intents) -> Self {
        if !token.starts_with("Bot ") && !token.starts_with("Bearer ") {
            token.insert_str(0, "Bot ");
        }

        Self {
            inner: Config {
                event_types: EventTypeFlags::all(),
                gateway_url: None,
                identify_properties: None,
                intents,
                large_threshold: LARGE_THRESHOLD_DEFAULT,
                presence: None,
                queue: Arc::new(InMemoryQueue::new(1, 1, Duration::from_secs(86_400), 1)),
                ratelimit_messages: true,
                session: None,
                token: token.into_boxed_str(),
            },
        }
    }

    /// Finish building, producing a [`Config`].
    #[must_use]
    pub fn build(self) -> Config {
        self.inner
    }

    /// Set the dispatch event categories this shard subscribes to.
    /// Defaults to [`EventTypeFlags::all`].
    pub const fn event_types(mut self, event_types: EventTypeFlags) -> Self {
        self.inner.event_types = event_types;

        self
    }

    /// Override the URL used to connect to the gateway.
    pub fn gateway_url(mut self, gateway_url: Option<String>) -> Self {
        self.inner.gateway_url = gateway_url.map(String::into_boxed_str);

        self
    }

    /// Set the properties sent in IDENTIFY.
    pub fn identify_properties(
        mut self,
        identify_properties: oriole_model::payload::IdentifyProperties,
    ) -> Self {
        self.inner.identify_properties = Some(identify_properties);

        self
    }

    /// Set the large guild member threshold.
    ///
    /// # Panics
    ///
    /// Panics if the value is outside `[LARGE_THRESHOLD_MINIMUM,
    /// LARGE_THRESHOLD_MAXIMUM]`.
    pub fn large_threshold(mut self, large_threshold: u64) -> Self {
        assert!(
            (LARGE_THRESHOLD_MINIMUM..=LARGE_THRESHOLD_MAXIMUM).contains(&large_threshold),
            "large threshold isn't in the accepted range"
        );

        self.inner.large_threshold = large_threshold;

        self
    }

    /// Set the initial presence sent with IDENTIFY.
    pub fn presence(mut self, presence: UpdatePresence) -> Self {
        self.inner.presence = Some(presence);

        self
    }

    /// Set the identify queue shards acquire a slot from.
    pub fn queue(mut self, queue: Arc<dyn IdentifyQueue>) -> Self {
        self.inner.queue = queue;

        self
    }

    /// Enable or disable outbound command rate limiting. Disabling this is
    /// only sensible if another layer already enforces it.
    pub const fn ratelimit_messages(mut self, ratelimit_messages: bool) -> Self {
        self.inner.ratelimit_messages = ratelimit_messages;

        self
    }

    /// Provide a prior session to resume instead of identifying fresh.
    pub fn session(mut self, session_id: impl Into<Box<str>>, sequence: u64) -> Self {
        self.inner.session = Some((session_id.into(), sequence));

        self
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, ShardId};
    use oriole_model::Intents;
    use static_assertions::assert_impl_all;

    assert_impl_all!(ShardId: Clone, Copy, Eq, Send, Sync);
    assert_impl_all!(Config: Clone, Send, Sync);

    #[test]
    fn shard_id_display_matches_current_and_total() {
        let id = ShardId::new(2, 5);
        assert_eq!("shard 2/5", id.to_string());
    }

    #[test]
    fn shard_id_new_checked_rejects_out_of_range() {
        assert!(ShardId::new_checked(5, 5).is_none());
        assert!(ShardId::new_checked(0, 0).is_none());
        assert!(ShardId::new_checked(0, 1).is_some());
    }

    #[test]
    fn builder_normalizes_token_prefix() {
        let config = Config::new("abc.def.ghi".to_owned(), Intents::empty());
        assert!(config.token().starts_with("Bot "));

        let config = Config::new("Bearer abc.def.ghi".to_owned(), Intents::empty());
        assert!(config.token().starts_with("Bearer "));
    }
}
