//! Persistent device WebSocket with heartbeat and auto-reconnect.
//!
//! One [`DeviceConnection`] per Sound + Light unit. The background task
//! fetches a token from a [`TokenSource`] before every handshake, sends the
//! initial state polls, decodes inbound binary frames, and forwards state
//! fragments to the owner over a bounded channel. Drops reconnect with
//! exponential backoff + jitter; credential rejections trigger one token
//! refresh before the connection parks in [`ConnectionState::Failed`].
//!
//! # Example
//!
//! ```rust,ignore
//! let (events_tx, mut events_rx) = tokio::sync::mpsc::channel(64);
//! let endpoint = device_endpoint(&ws_base, "speaker-uid")?;
//! let (conn, task) = DeviceConnection::spawn(
//!     "speaker-uid".into(),
//!     endpoint,
//!     ConnectionConfig::default(),
//!     tokens,
//!     Codec::new(),
//!     events_tx,
//!     CancellationToken::new(),
//! )?;
//!
//! while let Some(event) = events_rx.recv().await {
//!     println!("{event:?}");
//! }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::auth::{SessionSignal, TokenError, TokenSource};
use crate::codec::{Codec, Decoded, EncodedCommand, StateFragment};
use crate::error::Error;

// ── ConnectionState ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// First connection attempt.
    Connecting,
    Connected,
    /// Waiting for, or performing, retry number `attempt`.
    Reconnecting { attempt: u32 },
    /// Gave up: retries exhausted or credentials rejected twice.
    Failed,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

// ── Configuration ────────────────────────────────────────────────────

/// Exponential backoff configuration for WebSocket reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub reconnect: ReconnectConfig,
    /// Interval between WebSocket pings. Default: 20s.
    pub heartbeat_interval: Duration,
    /// Silence after which the connection is presumed dead. Default: 60s.
    /// Also bounds the opening handshake.
    pub heartbeat_timeout: Duration,
    /// Frames queued for the socket writer.
    pub outbound_capacity: usize,
    /// How long the reader waits for room in the event channel before
    /// dropping a frame. Default: 500ms.
    pub backpressure_limit: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            heartbeat_interval: Duration::from_secs(20),
            heartbeat_timeout: Duration::from_secs(60),
            outbound_capacity: 32,
            backpressure_limit: Duration::from_millis(500),
        }
    }
}

/// `{ws_base}/{device_id}/user_connect/`
pub fn device_endpoint(ws_base: &Url, device_id: &str) -> Result<Url, Error> {
    let base = ws_base.as_str().trim_end_matches('/');
    Ok(Url::parse(&format!("{base}/{device_id}/user_connect/"))?)
}

/// Close codes the device endpoint uses for credential problems.
fn is_auth_close(code: u16) -> bool {
    matches!(code, 1008 | 4001 | 4003)
}

// ── Events ───────────────────────────────────────────────────────────

/// What the connection task reports to its owner, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    StateChanged(ConnectionState),
    Frame(StateFragment),
}

// ── DeviceConnection ─────────────────────────────────────────────────

/// Cloneable handle to a running device connection task.
#[derive(Debug, Clone)]
pub struct DeviceConnection {
    device_id: Arc<str>,
    outbound: mpsc::Sender<Bytes>,
    state: watch::Receiver<ConnectionState>,
    codec: Codec,
    cancel: CancellationToken,
}

impl DeviceConnection {
    /// Spawn the connection task. Returns immediately; the first attempt
    /// happens in the background and is reported through `events`.
    pub fn spawn<T: TokenSource>(
        device_id: String,
        endpoint: Url,
        config: ConnectionConfig,
        tokens: Arc<T>,
        codec: Codec,
        events: mpsc::Sender<TransportEvent>,
        cancel: CancellationToken,
    ) -> Result<(Self, JoinHandle<()>), Error> {
        let uri: tungstenite::http::Uri = endpoint.as_str().parse().map_err(
            |e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()),
        )?;

        let device_id: Arc<str> = device_id.into();
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let signals = tokens.signals();

        let worker = Worker {
            device_id: Arc::clone(&device_id),
            uri,
            config,
            tokens,
            signals,
            codec: codec.clone(),
            events,
            outbound: outbound_rx,
            state: state_tx,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(worker.run());

        Ok((
            Self {
                device_id,
                outbound: outbound_tx,
                state: state_rx,
                codec,
                cancel,
            },
            handle,
        ))
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// The codec sharing this connection's request id counter.
    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    /// Queue a binary frame for the socket.
    ///
    /// Fails with [`Error::NotConnected`] when no connection is up or the
    /// writer queue is full; the caller keeps the frame and retries later.
    pub fn send(&self, frame: Bytes) -> Result<(), Error> {
        if !self.state().is_connected() {
            return Err(Error::NotConnected);
        }
        self.outbound.try_send(frame).map_err(|e| {
            tracing::debug!(device_id = %self.device_id, error = %e, "outbound queue rejected frame");
            Error::NotConnected
        })
    }

    /// Send a fresh full state poll. Returns its request id.
    pub fn request_state(&self) -> Result<u32, Error> {
        let EncodedCommand {
            correlation_id,
            bytes,
        } = self.codec.state_request();
        self.send(bytes)?;
        Ok(correlation_id)
    }

    /// Signal the background task to close the socket and exit.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── Background task ──────────────────────────────────────────────────

/// How a single connection attempt ended.
#[derive(Debug)]
enum SessionEnd {
    /// Cancelled, or the owner went away.
    Stopped,
    /// Session revoked while connected.
    Revoked,
    /// Handshake refused or closed with an auth code.
    AuthRejected,
    /// Dropped for any other reason. `uptime` is set if we got connected.
    Dropped {
        error: Option<Error>,
        uptime: Option<Duration>,
    },
}

enum Wait {
    Ready,
    Stop,
}

struct Worker<T> {
    device_id: Arc<str>,
    uri: tungstenite::http::Uri,
    config: ConnectionConfig,
    tokens: Arc<T>,
    signals: watch::Receiver<SessionSignal>,
    codec: Codec,
    events: mpsc::Sender<TransportEvent>,
    outbound: mpsc::Receiver<Bytes>,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
}

impl<T: TokenSource> Worker<T> {
    /// Main loop: token → connect → read → on drop, backoff → reconnect.
    async fn run(mut self) {
        let mut attempt: u32 = 0;
        let mut first = true;
        let mut refresh_used = false;
        let mut fresh_token: Option<SecretString> = None;

        loop {
            if matches!(self.wait_for_authorization(None).await, Wait::Stop) {
                break;
            }

            let phase = if first {
                ConnectionState::Connecting
            } else {
                ConnectionState::Reconnecting {
                    attempt: attempt.max(1),
                }
            };
            if !self.publish(phase).await {
                break;
            }

            let token = match fresh_token.take() {
                Some(t) => Ok(t),
                None => self.tokens.access_token().await,
            };
            let end = match token {
                Ok(token) => self.connect_and_serve(&token).await,
                Err(TokenError::Unavailable) => SessionEnd::Revoked,
                Err(TokenError::Transient(msg)) => SessionEnd::Dropped {
                    error: Some(Error::Authentication { message: msg }),
                    uptime: None,
                },
            };
            self.discard_outbound();

            match end {
                SessionEnd::Stopped => break,
                SessionEnd::Revoked => {
                    tracing::info!(device_id = %self.device_id, "session revoked, closing device connection");
                    first = true;
                    attempt = 0;
                    refresh_used = false;
                    if !self.publish(ConnectionState::Disconnected).await {
                        break;
                    }
                }
                SessionEnd::AuthRejected if !refresh_used => {
                    tracing::warn!(device_id = %self.device_id, "device rejected token, refreshing");
                    refresh_used = true;
                    match self.tokens.refresh_after_rejection().await {
                        Ok(token) => {
                            first = false;
                            fresh_token = Some(token);
                        }
                        Err(TokenError::Transient(msg)) => {
                            // Refresh itself could not reach the account service; back off and
                            // let the next rejection try again.
                            tracing::warn!(device_id = %self.device_id, error = %msg, "token refresh unavailable");
                            refresh_used = false;
                            first = false;
                            let delay = calculate_backoff(attempt, &self.config.reconnect);
                            attempt += 1;
                            if !self.publish(ConnectionState::Reconnecting { attempt }).await {
                                break;
                            }
                            tokio::select! {
                                biased;
                                () = self.cancel.cancelled() => break,
                                () = tokio::time::sleep(delay) => {}
                            }
                        }
                        Err(TokenError::Unavailable) => {
                            tracing::error!(device_id = %self.device_id, "token refresh rejected, waiting for a new session");
                            if !self.park_failed().await {
                                break;
                            }
                            first = true;
                            attempt = 0;
                            refresh_used = false;
                        }
                    }
                }
                SessionEnd::AuthRejected => {
                    tracing::error!(
                        device_id = %self.device_id,
                        "device rejected refreshed token, waiting for a new session"
                    );
                    if !self.park_failed().await {
                        break;
                    }
                    first = true;
                    attempt = 0;
                    refresh_used = false;
                }
                SessionEnd::Dropped { error, uptime } => {
                    first = false;
                    if let Some(up) = uptime {
                        refresh_used = false;
                        if up > base_backoff(attempt, &self.config.reconnect) {
                            attempt = 0;
                        }
                    }
                    match &error {
                        Some(e) => {
                            tracing::warn!(device_id = %self.device_id, error = %e, attempt, "device connection error");
                        }
                        None => {
                            tracing::info!(device_id = %self.device_id, "device connection closed, reconnecting");
                        }
                    }

                    if self.config.reconnect.max_retries.is_some_and(|max| attempt >= max) {
                        tracing::error!(
                            device_id = %self.device_id,
                            attempt,
                            "reconnection limit reached, giving up"
                        );
                        if !self.park_failed().await {
                            break;
                        }
                        first = true;
                        attempt = 0;
                        continue;
                    }

                    let delay = calculate_backoff(attempt, &self.config.reconnect);
                    attempt += 1;
                    if !self.publish(ConnectionState::Reconnecting { attempt }).await {
                        break;
                    }
                    tracing::info!(
                        device_id = %self.device_id,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        attempt,
                        "waiting before reconnect"
                    );

                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.state.send_replace(ConnectionState::Disconnected);
        let _ = self
            .events
            .try_send(TransportEvent::StateChanged(ConnectionState::Disconnected));
        tracing::debug!(device_id = %self.device_id, "device connection task exiting");
    }

    /// Publish a state change. Returns `false` when the owner is gone.
    async fn publish(&self, state: ConnectionState) -> bool {
        let previous = self.state.send_replace(state);
        if previous == state {
            return true;
        }
        tracing::debug!(device_id = %self.device_id, %state, "connection state");
        self.events
            .send(TransportEvent::StateChanged(state))
            .await
            .is_ok()
    }

    /// Move to `Failed` and wait for a new session generation.
    async fn park_failed(&mut self) -> bool {
        let generation = self.signals.borrow().generation;
        if !self.publish(ConnectionState::Failed).await {
            return false;
        }
        matches!(
            self.wait_for_authorization(Some(generation)).await,
            Wait::Ready
        )
    }

    /// Block until the session is authorized (and newer than
    /// `after_generation`, when given).
    async fn wait_for_authorization(&mut self, after_generation: Option<u64>) -> Wait {
        loop {
            let signal = *self.signals.borrow_and_update();
            if signal.authorized && after_generation.is_none_or(|g| signal.generation > g) {
                return Wait::Ready;
            }
            let parked = matches!(*self.state.borrow(), ConnectionState::Failed);
            if !signal.authorized && !parked && !self.publish(ConnectionState::Disconnected).await
            {
                return Wait::Stop;
            }
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Wait::Stop,
                changed = self.signals.changed() => {
                    if changed.is_err() {
                        return Wait::Stop;
                    }
                }
            }
        }
    }

    fn discard_outbound(&mut self) {
        let mut dropped = 0usize;
        while self.outbound.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            tracing::debug!(device_id = %self.device_id, dropped, "discarded unsent frames");
        }
    }

    // ── Single connection lifecycle ──────────────────────────────────

    async fn connect_and_serve(&mut self, token: &SecretString) -> SessionEnd {
        tracing::info!(device_id = %self.device_id, uri = %self.uri, "connecting to device");

        let request = ClientRequestBuilder::new(self.uri.clone()).with_header(
            "Authorization",
            format!("Bearer {}", token.expose_secret()),
        );
        let handshake = tokio::time::timeout(
            self.config.heartbeat_timeout,
            tokio_tungstenite::connect_async(request),
        );

        let ws_stream = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return SessionEnd::Stopped,
            result = handshake => match result {
                Ok(Ok((ws, _response))) => ws,
                Ok(Err(tungstenite::Error::Http(response)))
                    if matches!(response.status().as_u16(), 401 | 403) =>
                {
                    tracing::warn!(
                        device_id = %self.device_id,
                        status = response.status().as_u16(),
                        "handshake rejected"
                    );
                    return SessionEnd::AuthRejected;
                }
                Ok(Err(e)) => {
                    return SessionEnd::Dropped {
                        error: Some(Error::WebSocketConnect(e.to_string())),
                        uptime: None,
                    };
                }
                Err(_elapsed) => {
                    return SessionEnd::Dropped {
                        error: Some(Error::WebSocketConnect("handshake timed out".into())),
                        uptime: None,
                    };
                }
            }
        };

        let connected_at = Instant::now();
        let (mut write, mut read) = ws_stream.split();

        // Initial polls go out before anyone else can use the socket.
        for poll in [self.codec.state_request(), self.codec.sound_list_request()] {
            if let Err(e) = write.send(tungstenite::Message::Binary(poll.bytes)).await {
                return SessionEnd::Dropped {
                    error: Some(Error::WebSocketConnect(e.to_string())),
                    uptime: Some(connected_at.elapsed()),
                };
            }
        }

        if !self.publish(ConnectionState::Connected).await {
            let _ = write.send(tungstenite::Message::Close(None)).await;
            return SessionEnd::Stopped;
        }
        tracing::info!(device_id = %self.device_id, "device connected");

        let interval = self.config.heartbeat_interval;
        let mut ping = tokio::time::interval_at(Instant::now() + interval, interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_seen = Instant::now();

        let end = loop {
            let silence_deadline = last_seen + self.config.heartbeat_timeout;
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break SessionEnd::Stopped,
                changed = self.signals.changed() => {
                    if changed.is_err() || !self.signals.borrow_and_update().authorized {
                        break SessionEnd::Revoked;
                    }
                }
                () = tokio::time::sleep_until(silence_deadline) => {
                    break SessionEnd::Dropped {
                        error: Some(Error::HeartbeatTimeout {
                            timeout_secs: self.config.heartbeat_timeout.as_secs(),
                        }),
                        uptime: Some(connected_at.elapsed()),
                    };
                }
                _ = ping.tick() => {
                    if let Err(e) = write.send(tungstenite::Message::Ping(Bytes::new())).await {
                        break SessionEnd::Dropped {
                            error: Some(Error::WebSocketConnect(e.to_string())),
                            uptime: Some(connected_at.elapsed()),
                        };
                    }
                }
                frame = self.outbound.recv() => {
                    let Some(frame) = frame else {
                        break SessionEnd::Stopped;
                    };
                    if let Err(e) = write.send(tungstenite::Message::Binary(frame)).await {
                        break SessionEnd::Dropped {
                            error: Some(Error::WebSocketConnect(e.to_string())),
                            uptime: Some(connected_at.elapsed()),
                        };
                    }
                }
                msg = read.next() => {
                    last_seen = Instant::now();
                    match msg {
                        Some(Ok(tungstenite::Message::Binary(payload))) => {
                            if !self.deliver(&payload).await {
                                break SessionEnd::Stopped;
                            }
                        }
                        Some(Ok(tungstenite::Message::Text(text))) => {
                            tracing::debug!(device_id = %self.device_id, len = text.len(), "ignoring text frame");
                        }
                        Some(Ok(tungstenite::Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|cf| (u16::from(cf.code), cf.reason.to_string()))
                                .unwrap_or((1005, String::new()));
                            tracing::info!(device_id = %self.device_id, code, reason = %reason, "close frame received");
                            if is_auth_close(code) {
                                break SessionEnd::AuthRejected;
                            }
                            break SessionEnd::Dropped {
                                error: Some(Error::WebSocketClosed { code, reason }),
                                uptime: Some(connected_at.elapsed()),
                            };
                        }
                        Some(Ok(_)) => {
                            // Ping, Pong, raw Frame -- tungstenite answers pings itself
                            tracing::trace!(device_id = %self.device_id, "control frame");
                        }
                        Some(Err(e)) => {
                            break SessionEnd::Dropped {
                                error: Some(Error::WebSocketConnect(e.to_string())),
                                uptime: Some(connected_at.elapsed()),
                            };
                        }
                        None => {
                            break SessionEnd::Dropped {
                                error: None,
                                uptime: Some(connected_at.elapsed()),
                            };
                        }
                    }
                }
            }
        };

        if matches!(end, SessionEnd::Stopped | SessionEnd::Revoked) {
            let _ = write.send(tungstenite::Message::Close(None)).await;
        }
        end
    }

    /// Decode one binary frame and hand it to the owner. Returns `false`
    /// when the owner is gone.
    async fn deliver(&self, payload: &[u8]) -> bool {
        let fragment = match Codec::decode(payload) {
            Ok(Decoded::Fragment(fragment)) => fragment,
            Ok(Decoded::Unrecognized(what)) => {
                tracing::debug!(device_id = %self.device_id, ?what, "frame without device state");
                return true;
            }
            Err(e) => {
                tracing::warn!(device_id = %self.device_id, error = %e, "dropping undecodable frame");
                return true;
            }
        };
        if fragment.has_unknown_fields {
            tracing::debug!(device_id = %self.device_id, "frame carried unknown fields");
        }

        match tokio::time::timeout(
            self.config.backpressure_limit,
            self.events.send(TransportEvent::Frame(fragment)),
        )
        .await
        {
            Ok(Ok(())) => true,
            Ok(Err(_closed)) => false,
            Err(_elapsed) => {
                tracing::warn!(device_id = %self.device_id, "event consumer too slow, dropping frame");
                true
            }
        }
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Capped exponential delay before jitter: `min(initial * 2^attempt, max)`.
fn base_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exp);
    Duration::from_secs_f64(base.min(config.max_delay.as_secs_f64()))
}

/// Exponential backoff with +-25% random jitter.
pub(crate) fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(0.75..=1.25);
    base_backoff(attempt, config).mul_f64(factor)
}

// ── Tests ────────────────────────────────────────────────────────────
