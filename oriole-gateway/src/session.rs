//! A single gateway connection's state machine: connect, identify or
//! resume, heartbeat, and dispatch.

use crate::{
    compression::{self, Inflater},
    config::{Config, ShardId},
    error::{ConnectError, DisconnectError, ReceiveMessageError, SendError},
    latency::Latency,
};
use futures_util::{SinkExt, StreamExt};
use oriole_dispatch::{Dispatcher, TimesPerWindow};
use oriole_model::{
    payload::{GatewayEnvelope, Heartbeat, Identify, IdentifyProperties, Resume},
    CloseCode, OpCode,
};
use serde::Serialize;
use serde_json::Value;
use std::{
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::{
    protocol::{frame::coding::CloseCode as TungsteniteCloseCode, CloseFrame, WebSocketConfig},
    Error as TungsteniteError, Message as TungsteniteMessage,
};
use url::Url;

/// Default gateway URL used when a shard or the manager hasn't been told of
/// one via `/gateway/bot`.
pub const GATEWAY_URL: &str = "wss://gateway.discord.gg";
/// Gateway API version this crate speaks.
pub const API_VERSION: u8 = 10;

const WEBSOCKET_CONFIG: WebSocketConfig = WebSocketConfig {
    accept_unmasked_frames: false,
    max_frame_size: None,
    max_message_size: None,
    max_send_queue: None,
};

/// All commands sent through the outbound rate limit gate pass through
/// this; heartbeats bypass it and are sent directly from the session task.
const COMMAND_LIMIT: usize = 120;
const COMMAND_WINDOW: Duration = Duration::from_secs(60);

/// Sent by [`GatewaySession::close`]: 1000 keeps the session resumable,
/// 1001 invalidates it and clears the known session id.
const CLOSE_CODE_RESUMABLE: u16 = 1000;
const CLOSE_CODE_NON_RESUMABLE: u16 = 1001;
const CLOSE_CODE_HEARTBEAT_TIMEOUT: u16 = 4000;

/// One of the eight states a [`GatewaySession`] can be in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Stage {
    /// No connection; either never started, or stopped after a fatal
    /// close.
    Disconnected = 0,
    /// A websocket handshake is in flight.
    Connecting = 1,
    /// The socket is open; waiting for the initial `HELLO`.
    HelloWait = 2,
    /// `HELLO` received, an `IDENTIFY` is being prepared and sent.
    Identifying = 3,
    /// The connection was replaced with a known session id; a `RESUME`
    /// is being sent instead of `IDENTIFY`.
    Resuming = 4,
    /// `IDENTIFY`/`RESUME` sent; waiting for `READY`/`RESUMED`.
    ReadyWait = 5,
    /// `READY`/`RESUMED` received; the session is live.
    Connected = 6,
    /// The connection dropped or a reconnect opcode was received; a new
    /// connection is being established.
    Reconnecting = 7,
}

impl Stage {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Disconnected,
            1 => Self::Connecting,
            2 => Self::HelloWait,
            3 => Self::Identifying,
            4 => Self::Resuming,
            5 => Self::ReadyWait,
            6 => Self::Connected,
            _ => Self::Reconnecting,
        }
    }
}

/// Known session identity, kept across reconnects so a `RESUME` can be
/// attempted.
#[derive(Clone, Debug, Default)]
struct Session {
    id: Option<Box<str>>,
    sequence: Option<u64>,
    /// URL to reconnect to for a `RESUME`, learned from `READY`. Discord
    /// may route resumes to a different host than the initial
    /// `/gateway/bot` connect.
    resume_gateway_url: Option<Box<str>>,
}

/// Key raw gateway messages are dispatched under: the opcode.
pub type RawEventKey = u8;
/// Key dispatch events are dispatched under: the event name, e.g.
/// `"MESSAGE_CREATE"`. Lifecycle events not backed by an opcode 0 payload
/// (`"critical"`) are dispatched under a synthetic name too.
pub type EventKey = Box<str>;

/// One raw `{op, d, s, t}` envelope, deserialized only as far as `d:
/// Value`.
#[derive(Clone, Debug)]
pub struct RawEvent {
    /// Opcode of the envelope.
    pub op: OpCode,
    /// Sequence number, if this envelope carried one.
    pub sequence: Option<u64>,
    /// Raw `d` payload.
    pub data: Value,
}

/// A dispatch event: `d` payload plus the sequence it was received at.
#[derive(Clone, Debug)]
pub struct DispatchedEvent {
    /// Sequence number this event was received at.
    pub sequence: u64,
    /// Raw `d` payload; the caller deserializes it into whatever type
    /// it expects for this event name.
    pub data: Value,
}

/// A fatal condition that stopped the session for good.
#[derive(Clone, Debug)]
pub struct Critical {
    /// Human-readable description of the failure.
    pub message: Arc<str>,
}

struct Shared {
    id: ShardId,
    stage: AtomicU8,
    latency: RwLock<Latency>,
    raw_dispatcher: Dispatcher<RawEventKey, RawEvent>,
    event_dispatcher: Dispatcher<EventKey, DispatchedEvent>,
    lifecycle_dispatcher: Dispatcher<&'static str, Critical>,
}

impl Shared {
    fn set_stage(&self, stage: Stage) {
        self.stage.store(stage as u8, Ordering::Release);
    }

    fn stage(&self) -> Stage {
        Stage::from_u8(self.stage.load(Ordering::Acquire))
    }
}

#[derive(Debug)]
enum OutboundCommand {
    Raw(TungsteniteMessage),
    Close(Option<(u16, String)>),
}

/// A running connection to the Discord gateway for one shard.
///
/// Cloning shares the same underlying task and dispatchers.
#[derive(Clone)]
pub struct GatewaySession {
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<OutboundCommand>,
}

impl GatewaySession {
    /// Start connecting a shard and spawn its background task.
    ///
    /// Returns immediately; the connection itself happens on the spawned
    /// task, observable via [`GatewaySession::stage`] and the dispatchers.
    #[must_use]
    pub fn connect(id: ShardId, config: Config) -> Self {
        let shared = Arc::new(Shared {
            id,
            stage: AtomicU8::new(Stage::Disconnected as u8),
            latency: RwLock::new(Latency::new()),
            raw_dispatcher: Dispatcher::new(),
            event_dispatcher: Dispatcher::new(),
            lifecycle_dispatcher: Dispatcher::new(),
        });

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let task_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            run(id, config, task_shared, outbound_rx).await;
        });

        Self {
            shared,
            outbound: outbound_tx,
        }
    }

    /// This session's shard id.
    #[must_use]
    pub const fn id(&self) -> ShardId {
        self.shared.id
    }

    /// The session's current [`Stage`].
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.shared.stage()
    }

    /// Round-trip heartbeat latency statistics.
    pub async fn latency(&self) -> Latency {
        self.shared.latency.read().await.clone()
    }

    /// Dispatcher of raw `{op, d, s, t}` envelopes, keyed by opcode.
    #[must_use]
    pub const fn raw_dispatcher(&self) -> &Dispatcher<RawEventKey, RawEvent> {
        &self.shared.raw_dispatcher
    }

    /// Dispatcher of dispatch (`op == 0`) events, keyed by event name.
    #[must_use]
    pub const fn event_dispatcher(&self) -> &Dispatcher<EventKey, DispatchedEvent> {
        &self.shared.event_dispatcher
    }

    /// Dispatcher of lifecycle meta-events. Fatal conditions are emitted
    /// under the `"critical"` key.
    #[must_use]
    pub const fn lifecycle_dispatcher(&self) -> &Dispatcher<&'static str, Critical> {
        &self.shared.lifecycle_dispatcher
    }

    /// Send a command, gated by the outbound rate limiter.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] if the session task has already stopped.
    pub fn command<T: Serialize>(&self, op: OpCode, data: &T) -> Result<(), SendError> {
        let message = encode(op, data).map_err(|source| SendError {
            source: Box::new(source),
        })?;

        self.outbound
            .send(OutboundCommand::Raw(message))
            .map_err(|source| SendError {
                source: Box::new(source),
            })
    }

    /// Close the connection, optionally attempting to resume it later.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] if the session task has already stopped.
    pub fn close(&self, resumable: bool) -> Result<(), SendError> {
        let code = if resumable {
            CLOSE_CODE_RESUMABLE
        } else {
            CLOSE_CODE_NON_RESUMABLE
        };

        self.outbound
            .send(OutboundCommand::Close(Some((code, String::new()))))
            .map_err(|source| SendError {
                source: Box::new(source),
            })
    }
}

fn encode<T: Serialize>(op: OpCode, data: &T) -> Result<TungsteniteMessage, serde_json::Error> {
    #[derive(Serialize)]
    struct Envelope<'a, T> {
        op: OpCode,
        d: &'a T,
    }

    let json = serde_json::to_string(&Envelope { op, d: data })?;
    Ok(TungsteniteMessage::Text(json))
}

type Connection = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

fn gateway_url(override_url: Option<&str>) -> String {
    let mut url = override_url.unwrap_or(GATEWAY_URL).to_owned();
    url.push_str("?v=");
    url.push_str(&API_VERSION.to_string());
    url.push_str("&encoding=json");
    compression::add_url_feature(&mut url);
    url
}

async fn connect(id: ShardId, override_url: Option<&str>) -> Result<Connection, ConnectError> {
    let raw_url = gateway_url(override_url);
    let url = Url::parse(&raw_url).map_err(|source| ConnectError {
        source: Box::new(source),
    })?;

    #[cfg(feature = "tracing")]
    tracing::debug!(%id, %url, "connecting to gateway");
    let _ = id;

    let (stream, _) =
        tokio_tungstenite::connect_async_tls_with_config(url, Some(WEBSOCKET_CONFIG), None)
            .await
            .map_err(|source| ConnectError {
                source: Box::new(source),
            })?;

    Ok(stream)
}

/// Outcome of handling one connection's lifetime: either it ended in a way
/// that permits a reconnect (with or without resume), or it ended fatally.
enum ConnectionOutcome {
    Reconnect { resumable: bool },
    Fatal(ReceiveMessageError),
    /// The caller explicitly closed the session via [`GatewaySession::close`];
    /// the background task stops instead of reconnecting.
    Stopped,
}

async fn run(
    id: ShardId,
    config: Config,
    shared: Arc<Shared>,
    mut outbound_rx: mpsc::UnboundedReceiver<OutboundCommand>,
) {
    let mut session = Session::default();
    if let Some((session_id, sequence)) = config.session() {
        session.id = Some(session_id.into());
        session.sequence = Some(sequence);
    }

    let command_limiter = TimesPerWindow::new(COMMAND_LIMIT, COMMAND_WINDOW);

    loop {
        shared.set_stage(Stage::Connecting);

        let connect_url = session
            .resume_gateway_url
            .as_deref()
            .or_else(|| config.gateway_url());

        let mut socket = match connect(id, connect_url).await {
            Ok(socket) => socket,
            Err(_source) => {
                shared.set_stage(Stage::Disconnected);
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        shared.set_stage(Stage::HelloWait);

        let outcome = drive_connection(
            id,
            &config,
            &shared,
            &command_limiter,
            &mut socket,
            &mut session,
            &mut outbound_rx,
        )
        .await;

        let _ = socket.close(None).await;

        match outcome {
            ConnectionOutcome::Fatal(error) => {
                shared.set_stage(Stage::Disconnected);
                shared
                    .lifecycle_dispatcher
                    .dispatch(
                        "critical",
                        Critical {
                            message: Arc::from(error.to_string()),
                        },
                    )
                    .await;
                return;
            }
            ConnectionOutcome::Reconnect { resumable } => {
                if !resumable {
                    session = Session::default();
                }

                shared.set_stage(Stage::Reconnecting);
            }
            ConnectionOutcome::Stopped => {
                shared.set_stage(Stage::Disconnected);
                return;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn drive_connection(
    id: ShardId,
    config: &Config,
    shared: &Arc<Shared>,
    command_limiter: &TimesPerWindow,
    socket: &mut Connection,
    session: &mut Session,
    outbound_rx: &mut mpsc::UnboundedReceiver<OutboundCommand>,
) -> ConnectionOutcome {
    let mut compression = Inflater::new(id);
    let mut heartbeat_interval: Option<Duration> = None;
    let mut heartbeat_acked = true;
    let mut heartbeats_missed = 0u32;
    let mut first_heartbeat = true;

    loop {
        let wait = match heartbeat_interval {
            Some(interval) if first_heartbeat => interval.mul_f64(rand::random::<f64>()),
            Some(interval) => interval,
            None => Duration::from_secs(86_400),
        };
        let heartbeat_sleep = tokio::time::sleep(wait);
        tokio::pin!(heartbeat_sleep);

        tokio::select! {
            frame = socket.next() => {
                let frame = match frame {
                    Some(Ok(frame)) => frame,
                    Some(Err(source)) => {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(error = %source, "websocket connection failed");
                        let resumable = !matches!(source, TungsteniteError::ConnectionClosed);

                        return ConnectionOutcome::Reconnect { resumable };
                    }
                    None => return ConnectionOutcome::Reconnect { resumable: true },
                };

                match handle_frame(id, config, shared, session, &mut compression, socket, frame, &mut heartbeat_interval, &mut heartbeat_acked).await {
                    Ok(FrameOutcome::Continue) => {}
                    Ok(FrameOutcome::Reconnect { resumable }) => return ConnectionOutcome::Reconnect { resumable },
                    Err(error) => {
                        if error.is_fatal() {
                            return ConnectionOutcome::Fatal(error);
                        }

                        return ConnectionOutcome::Reconnect { resumable: true };
                    }
                }
            }
            () = &mut heartbeat_sleep, if heartbeat_interval.is_some() => {
                first_heartbeat = false;

                if !heartbeat_acked {
                    heartbeats_missed += 1;
                } else {
                    heartbeats_missed = 0;
                }

                if heartbeats_missed >= 2 {
                    let _ = socket.send(close_message(CLOSE_CODE_HEARTBEAT_TIMEOUT, "heartbeat ack missed twice")).await;
                    return ConnectionOutcome::Reconnect { resumable: true };
                }

                heartbeat_acked = false;
                if let Err(_source) = send_heartbeat(socket, session).await {
                    return ConnectionOutcome::Reconnect { resumable: true };
                }

                shared.latency.write().await.track_sent();
            }
            command = outbound_rx.recv() => {
                match command {
                    Some(OutboundCommand::Raw(message)) => {
                        let admitted = if config.ratelimit_messages() {
                            command_limiter.acquire().await.is_ok()
                        } else {
                            true
                        };

                        if admitted && socket.send(message).await.is_err() {
                            return ConnectionOutcome::Reconnect { resumable: true };
                        }
                    }
                    Some(OutboundCommand::Close(frame)) => {
                        let resumable = frame.as_ref().map_or(true, |(code, _)| *code == CLOSE_CODE_RESUMABLE);
                        if let Some((code, reason)) = frame {
                            let _ = socket.send(close_message(code, &reason)).await;
                        }

                        if resumable {
                            return ConnectionOutcome::Reconnect { resumable: true };
                        }

                        session.id = None;
                        session.sequence = None;
                        return ConnectionOutcome::Stopped;
                    }
                    None => return ConnectionOutcome::Reconnect { resumable: true },
                }
            }
        }
    }
}

enum FrameOutcome {
    Continue,
    Reconnect { resumable: bool },
}

#[allow(clippy::too_many_arguments)]
async fn handle_frame(
    id: ShardId,
    config: &Config,
    shared: &Arc<Shared>,
    session: &mut Session,
    compression: &mut Inflater,
    socket: &mut Connection,
    frame: TungsteniteMessage,
    heartbeat_interval: &mut Option<Duration>,
    heartbeat_acked: &mut bool,
) -> Result<FrameOutcome, ReceiveMessageError> {
    let buffer: Vec<u8> = match frame {
        TungsteniteMessage::Text(text) => text.into_bytes(),
        TungsteniteMessage::Binary(bytes) => {
            compression.extend(&bytes);

            match compression.msg().map_err(ReceiveMessageError::compression)? {
                Some(buffer) => {
                    let owned = buffer.to_vec();
                    compression.clear();
                    owned
                }
                None => return Ok(FrameOutcome::Continue),
            }
        }
        TungsteniteMessage::Close(frame) => {
            let close_code = frame.as_ref().map(|frame| u16::from(frame.code));
            let reason = frame
                .as_ref()
                .map(|frame| Box::<str>::from(frame.reason.as_ref()));
            let outcome = handle_close(frame);

            if let FrameOutcome::Reconnect { .. } = outcome {
                shared
                    .lifecycle_dispatcher
                    .dispatch(
                        "disconnect",
                        Critical::from(DisconnectError { close_code, reason }),
                    )
                    .await;
            }

            return Ok(outcome);
        }
        TungsteniteMessage::Ping(_) | TungsteniteMessage::Pong(_) => {
            return Ok(FrameOutcome::Continue)
        }
        TungsteniteMessage::Frame(_) => return Ok(FrameOutcome::Continue),
    };

    let envelope: GatewayEnvelope<Value> =
        serde_json::from_slice(&buffer).map_err(ReceiveMessageError::deserializing)?;

    if let Some(sequence) = envelope.s {
        session.sequence = Some(sequence);
    }

    let raw_event = RawEvent {
        op: envelope.op,
        sequence: envelope.s,
        data: envelope.d.clone(),
    };
    shared.raw_dispatcher.dispatch(envelope.op as u8, raw_event).await;

    match envelope.op {
        OpCode::Hello => {
            let hello: oriole_model::payload::Hello =
                serde_json::from_value(envelope.d).map_err(ReceiveMessageError::deserializing)?;
            *heartbeat_interval = Some(Duration::from_millis(hello.heartbeat_interval));
            *heartbeat_acked = true;

            if let Some(session_id) = session.id.clone() {
                shared.set_stage(Stage::Resuming);
                send_resume(socket, config, &session_id, session.sequence.unwrap_or(0))
                    .await
                    .map_err(ReceiveMessageError::websocket)?;
            } else {
                shared.set_stage(Stage::Identifying);
                config.queue().enqueue([id.current(), id.total()]).await;
                send_identify(socket, config, id)
                    .await
                    .map_err(ReceiveMessageError::websocket)?;
            }

            shared.set_stage(Stage::ReadyWait);
        }
        OpCode::Heartbeat => {
            send_heartbeat(socket, session)
                .await
                .map_err(ReceiveMessageError::websocket)?;
        }
        OpCode::HeartbeatAck => {
            *heartbeat_acked = true;
            shared.latency.write().await.track_received();
        }
        OpCode::Reconnect => {
            return Ok(FrameOutcome::Reconnect { resumable: true });
        }
        OpCode::InvalidSession => {
            let resumable: bool =
                serde_json::from_value(envelope.d).unwrap_or(false);

            if resumable {
                shared.set_stage(Stage::Resuming);
            } else {
                session.id = None;
                session.sequence = None;
                shared.set_stage(Stage::Identifying);
            }

            return Ok(FrameOutcome::Reconnect { resumable });
        }
        OpCode::Dispatch => {
            let event_type = envelope.event_type.unwrap_or_default();
            let sequence = envelope.s.unwrap_or_default();

            if &*event_type == "READY" {
                if let Ok(ready) = serde_json::from_value::<Ready>(envelope.d.clone()) {
                    session.id = Some(ready.session_id);
                    session.resume_gateway_url = ready.resume_gateway_url;
                    shared.set_stage(Stage::Connected);
                }
            } else if &*event_type == "RESUMED" {
                shared.set_stage(Stage::Connected);
            }

            let wanted = oriole_model::EventTypeFlags::from_name(&event_type)
                .map_or(true, |flag| config.event_types().contains(flag));

            if wanted {
                shared
                    .event_dispatcher
                    .dispatch(
                        event_type,
                        DispatchedEvent {
                            sequence,
                            data: envelope.d,
                        },
                    )
                    .await;
            }
        }
        _ => {}
    }

    Ok(FrameOutcome::Continue)
}

fn handle_close(frame: Option<CloseFrame<'static>>) -> FrameOutcome {
    let code = frame.as_ref().map(|frame| u16::from(frame.code));

    if let Some(code) = code {
        if let Ok(close_code) = CloseCode::try_from(code) {
            if close_code.is_fatal() {
                return FrameOutcome::Reconnect { resumable: false };
            }

            return FrameOutcome::Reconnect {
                resumable: close_code.is_resumable(),
            };
        }
    }

    FrameOutcome::Reconnect { resumable: true }
}

#[derive(serde::Deserialize)]
struct Ready {
    session_id: Box<str>,
    resume_gateway_url: Option<Box<str>>,
}

async fn send_heartbeat(
    socket: &mut Connection,
    session: &Session,
) -> Result<(), TungsteniteError> {
    let payload = Heartbeat::new(session.sequence);
    let message = encode(OpCode::Heartbeat, &payload).expect("heartbeat always serializes");
    socket.send(message).await
}

async fn send_identify(
    socket: &mut Connection,
    config: &Config,
    id: ShardId,
) -> Result<(), TungsteniteError> {
    let properties = config
        .identify_properties()
        .cloned()
        .unwrap_or_else(|| IdentifyProperties::new(std::env::consts::OS));

    let identify = Identify {
        token: bare_token(config.token()).into(),
        properties,
        compress: Some(false),
        large_threshold: Some(config.large_threshold()),
        shard: Some([id.current(), id.total()]),
        presence: config.presence().cloned(),
        intents: config.intents(),
    };

    let message = encode(OpCode::Identify, &identify).expect("identify always serializes");
    socket.send(message).await
}

async fn send_resume(
    socket: &mut Connection,
    config: &Config,
    session_id: &str,
    sequence: u64,
) -> Result<(), TungsteniteError> {
    let resume = Resume {
        token: bare_token(config.token()).into(),
        session_id: session_id.into(),
        seq: sequence,
    };

    let message = encode(OpCode::Resume, &resume).expect("resume always serializes");
    socket.send(message).await
}

fn bare_token(token: &str) -> &str {
    token
        .strip_prefix("Bot ")
        .or_else(|| token.strip_prefix("Bearer "))
        .unwrap_or(token)
}

fn close_message(code: u16, reason: &str) -> TungsteniteMessage {
    TungsteniteMessage::Close(Some(CloseFrame {
        code: TungsteniteCloseCode::from(code),
        reason: reason.to_owned().into(),
    }))
}

impl From<DisconnectError> for Critical {
    fn from(error: DisconnectError) -> Self {
        Self {
            message: Arc::from(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{gateway_url, GatewaySession, Stage};
    use static_assertions::assert_impl_all;

    assert_impl_all!(GatewaySession: Clone, Send, Sync);
    assert_impl_all!(Stage: Clone, Copy, Eq, Send, Sync);

    #[test]
    fn gateway_url_includes_version_encoding_and_compression() {
        let url = gateway_url(None);
        assert_eq!(
            "wss://gateway.discord.gg?v=10&encoding=json&compress=zlib-stream",
            url
        );
    }

    #[test]
    fn gateway_url_honors_override() {
        let url = gateway_url(Some("wss://example.test/resume"));
        assert!(url.starts_with("wss://example.test/resume?v=10"));
    }
}
