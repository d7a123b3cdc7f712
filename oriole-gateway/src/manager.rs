//! Coordinates many [`GatewaySession`]s sharing one identify concurrency
//! budget and one set of aggregate dispatchers.

use crate::{
    config::{Config, ShardId},
    session::{Critical, DispatchedEvent, EventKey, GatewaySession, RawEvent, RawEventKey},
};
use hyper::{body, Method};
use oriole_dispatch::{Dispatcher, GlobalEvent};
use oriole_gateway_queue::InMemoryQueue;
use oriole_http::Client as HttpClient;
use oriole_model::{Intents, Route};
use serde::Deserialize;
use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
    sync::Arc,
    time::Duration,
};

#[derive(Debug, Deserialize)]
struct GatewayBotInfo {
    url: Box<str>,
    shards: u64,
    session_start_limit: SessionStartLimit,
}

#[derive(Debug, Deserialize)]
struct SessionStartLimit {
    total: u64,
    remaining: u64,
    reset_after: u64,
    max_concurrency: u64,
}

/// Starting a [`ShardManager`] failed.
#[derive(Debug)]
pub struct StartError {
    source: Box<dyn StdError + Send + Sync>,
}

impl Display for StartError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str("failed to retrieve gateway connection info")
    }
}

impl StdError for StartError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&*self.source)
    }
}

/// Manages every shard of a bot: fetches connection info, spawns one
/// [`GatewaySession`] per shard, and re-exposes their dispatchers as three
/// manager-level aggregates.
pub struct ShardManager {
    http: HttpClient,
    token: Box<str>,
    intents: Intents,
    sessions: Vec<GatewaySession>,
    raw_dispatcher: Dispatcher<RawEventKey, RawEvent>,
    event_dispatcher: Dispatcher<EventKey, DispatchedEvent>,
    dispatcher: Dispatcher<&'static str, Critical>,
}

impl ShardManager {
    /// Create a manager. Call [`ShardManager::connect`] to fetch shard
    /// count and concurrency info and bring shards up.
    #[must_use]
    pub fn new(http: HttpClient, token: impl Into<String>, intents: Intents) -> Self {
        let mut token = token.into();
        if !token.starts_with("Bot ") && !token.starts_with("Bearer ") {
            token.insert_str(0, "Bot ");
        }

        Self {
            http,
            token: token.into_boxed_str(),
            intents,
            sessions: Vec::new(),
            raw_dispatcher: Dispatcher::new(),
            event_dispatcher: Dispatcher::new(),
            dispatcher: Dispatcher::new(),
        }
    }

    /// Dispatcher aggregating every shard's raw envelope dispatcher.
    #[must_use]
    pub const fn raw_dispatcher(&self) -> &Dispatcher<RawEventKey, RawEvent> {
        &self.raw_dispatcher
    }

    /// Dispatcher aggregating every shard's dispatch-event dispatcher.
    #[must_use]
    pub const fn event_dispatcher(&self) -> &Dispatcher<EventKey, DispatchedEvent> {
        &self.event_dispatcher
    }

    /// Manager-level dispatcher for meta-events; fatal shard errors are
    /// re-emitted here under `"critical"`.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher<&'static str, Critical> {
        &self.dispatcher
    }

    /// Shard sessions currently managed, in ascending shard-id order.
    #[must_use]
    pub fn sessions(&self) -> &[GatewaySession] {
        &self.sessions
    }

    /// Fetch `/gateway/bot`, compute the identify concurrency budget, and
    /// spawn every shard.
    ///
    /// Returns once every shard has begun connecting, not once they're all
    /// `READY`.
    ///
    /// # Errors
    ///
    /// Returns [`StartError`] if `/gateway/bot` could not be retrieved or
    /// parsed.
    pub async fn connect(&mut self) -> Result<(), StartError> {
        let info = self.fetch_gateway_bot_info().await?;

        let queue = Arc::new(InMemoryQueue::new(
            usize::try_from(info.session_start_limit.max_concurrency).unwrap_or(1),
            info.session_start_limit.remaining,
            Duration::from_millis(info.session_start_limit.reset_after),
            info.session_start_limit.total,
        ));

        for current in 0..info.shards {
            let id = ShardId::new(current, info.shards);

            let config = Config::builder(self.token.to_string(), self.intents)
                .gateway_url(Some(info.url.to_string()))
                .queue(Arc::clone(&queue) as Arc<dyn oriole_gateway_queue::IdentifyQueue>)
                .build();

            let session = GatewaySession::connect(id, config);
            self.wire_up(&session);
            self.sessions.push(session);
        }

        Ok(())
    }

    fn wire_up(&self, session: &GatewaySession) {
        let raw = self.raw_dispatcher.clone();
        session.raw_dispatcher().listen_global(move |event| {
            let raw = raw.clone();
            async move {
                if let GlobalEvent::Dispatch(key, event) = event {
                    raw.dispatch(key, event).await;
                }
            }
        });

        let events = self.event_dispatcher.clone();
        session.event_dispatcher().listen_global(move |event| {
            let events = events.clone();
            async move {
                if let GlobalEvent::Dispatch(key, event) = event {
                    events.dispatch(key, event).await;
                }
            }
        });

        let meta = self.dispatcher.clone();
        session.lifecycle_dispatcher().listen_global(move |event| {
            let meta = meta.clone();
            async move {
                if let GlobalEvent::Dispatch(key, event) = event {
                    meta.dispatch(key, event).await;
                }
            }
        });
    }

    async fn fetch_gateway_bot_info(&self) -> Result<GatewayBotInfo, StartError> {
        let route = Route::new(Method::GET, "/gateway/bot", "gateway/bot");

        let response = self
            .http
            .request(&route, &self.token, &self.token, 0, &[], None, &[])
            .await
            .map_err(|source| StartError {
                source: Box::new(source),
            })?;

        let bytes = body::to_bytes(response.into_body())
            .await
            .map_err(|source| StartError {
                source: Box::new(source),
            })?;

        serde_json::from_slice(&bytes).map_err(|source| StartError {
            source: Box::new(source),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{GatewayBotInfo, ShardManager, StartError};
    use static_assertions::assert_impl_all;
    use std::error::Error;

    assert_impl_all!(StartError: Error, Send, Sync);
    assert_impl_all!(ShardManager: Send, Sync);

    #[test]
    fn gateway_bot_info_parses_expected_shape() {
        let json = r#"{
            "url": "wss://gateway.discord.gg",
            "shards": 3,
            "session_start_limit": {
                "total": 1000,
                "remaining": 998,
                "reset_after": 43200000,
                "max_concurrency": 1
            }
        }"#;

        let info: GatewayBotInfo = serde_json::from_str(json).unwrap();
        assert_eq!(3, info.shards);
        assert_eq!(1, info.session_start_limit.max_concurrency);
    }
}
