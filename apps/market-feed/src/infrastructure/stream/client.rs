//! Push Channel Client
//!
//! Drives a [`ConnectionSession`] against a real WebSocket. The loop owns
//! the socket, the in-flight connect and the session deadlines, turns every
//! wake-up into a [`SessionEvent`], and executes the returned actions:
//! subscribing symbols, applying trades to the price store, closing the
//! socket and publishing status.
//!
//! # Protocol
//!
//! - Subscribe: `{"type":"subscribe","symbol":"AAPL"}` per symbol
//! - Trades: `{"type":"trade","data":[{"s":"AAPL","p":187.2,"t":..}]}`
//! - Keepalive: `{"type":"ping"}`
//! - Provider error: `{"type":"error","msg":".."}`

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, JsonCodec};
use super::messages::{FeedFrame, TradeRecord};
use super::session::{ConnectionSession, SessionAction, SessionConfig, SessionEvent};
use crate::application::ports::StreamCommand;
use crate::domain::price_state::PriceStateStore;
use crate::domain::streaming::{ObservationSource, StatusReport, SymbolUniverse};
use crate::infrastructure::metrics::{self, FrameKind};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type ConnectFuture = Pin<Box<dyn Future<Output = Result<WsStream, StreamClientError>> + Send>>;

// =============================================================================
// Error Type
// =============================================================================

/// Errors raised while talking to the push channel.
#[derive(Debug, thiserror::Error)]
pub enum StreamClientError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The connect did not finish in time.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the push channel client.
#[derive(Clone)]
pub struct StreamClientConfig {
    /// WebSocket URL, including the token query parameter.
    pub url: String,
    /// State machine tunables.
    pub session: SessionConfig,
    /// How often silence is checked while live.
    pub watchdog_interval: Duration,
    /// Upper bound on a single connect.
    pub connect_timeout: Duration,
}

impl std::fmt::Debug for StreamClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClientConfig")
            .field("url", &redact(&self.url))
            .field("session", &self.session)
            .field("watchdog_interval", &self.watchdog_interval)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl StreamClientConfig {
    /// Create a configuration with default session tunables.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            session: SessionConfig::default(),
            watchdog_interval: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Strip the query string so the token never reaches logs.
fn redact(url: &str) -> &str {
    url.split_once('?').map_or(url, |(base, _)| base)
}

// =============================================================================
// Client
// =============================================================================

/// WebSocket client feeding the price store.
pub struct StreamClient {
    config: StreamClientConfig,
    universe: SymbolUniverse,
    prices: Arc<PriceStateStore>,
    status: watch::Sender<StatusReport>,
    cancel: CancellationToken,
    codec: JsonCodec,
}

impl StreamClient {
    /// Create a new client.
    #[must_use]
    pub const fn new(
        config: StreamClientConfig,
        universe: SymbolUniverse,
        prices: Arc<PriceStateStore>,
        status: watch::Sender<StatusReport>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            universe,
            prices,
            status,
            cancel,
            codec: JsonCodec::new(),
        }
    }

    /// Run the connection loop until cancelled.
    ///
    /// Restart requests arrive on `commands`. When the sender side is
    /// dropped the loop keeps running without them.
    pub async fn run(self, mut commands: mpsc::Receiver<StreamCommand>) {
        let mut session =
            ConnectionSession::new(self.config.session.clone(), !self.universe.is_empty());
        let mut socket: Option<WsStream> = None;
        let mut connecting: Option<ConnectFuture> = None;
        let mut commands_open = true;

        let mut watchdog = tokio::time::interval(self.config.watchdog_interval);
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut pending = VecDeque::from([SessionEvent::Start]);

        loop {
            while let Some(event) = pending.pop_front() {
                for action in session.handle(event, Instant::now()) {
                    if let Some(follow_up) = self
                        .execute(action, &mut socket, &mut connecting)
                        .await
                    {
                        pending.push_back(follow_up);
                    }
                }
            }

            let event = tokio::select! {
                () = self.cancel.cancelled() => break,
                command = commands.recv(), if commands_open => match command {
                    Some(StreamCommand::ManualRestart) => SessionEvent::ManualRestart,
                    None => {
                        tracing::debug!("Command channel closed");
                        commands_open = false;
                        continue;
                    }
                },
                () = sleep_until(session.backoff_deadline()) => SessionEvent::BackoffElapsed,
                () = sleep_until(session.hard_stop_deadline()) => SessionEvent::HardStopElapsed,
                _ = watchdog.tick() => SessionEvent::SilenceCheck,
                result = next_connect(&mut connecting) => {
                    connecting = None;
                    match result {
                        Ok(ws) => {
                            socket = Some(ws);
                            SessionEvent::Opened
                        }
                        Err(e) => SessionEvent::ConnectFailed { reason: e.to_string() },
                    }
                }
                message = next_message(&mut socket) => self.on_message(message, &mut socket).await,
            };
            pending.push_back(event);
        }

        tracing::info!("Push channel client cancelled");
        if let Some(mut ws) = socket.take() {
            let _ = tokio::time::timeout(Duration::from_secs(2), ws.close(None)).await;
        }
    }

    /// Turn one socket read into a session event.
    async fn on_message(
        &self,
        message: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
        socket: &mut Option<WsStream>,
    ) -> SessionEvent {
        match message {
            Some(Ok(Message::Text(text))) => match self.codec.decode(&text) {
                Ok(frame) => {
                    metrics::record_frame(frame_kind(&frame));
                    SessionEvent::Frame(frame)
                }
                Err(e) => {
                    metrics::record_frame(FrameKind::Other);
                    tracing::debug!(error = %e, "Ignoring undecodable frame");
                    SessionEvent::Activity
                }
            },
            Some(Ok(Message::Ping(data))) => {
                if let Some(ws) = socket.as_mut() {
                    if let Err(e) = ws.send(Message::Pong(data)).await {
                        tracing::debug!(error = %e, "Failed to answer ping");
                    }
                }
                SessionEvent::Activity
            }
            Some(Ok(Message::Close(frame))) => {
                *socket = None;
                SessionEvent::Closed {
                    reason: frame.map_or_else(
                        || "server sent close frame".to_string(),
                        |f| {
                            format!(
                                "server sent close frame: {} {}",
                                u16::from(f.code),
                                f.reason.as_str()
                            )
                        },
                    ),
                }
            }
            Some(Ok(_)) => SessionEvent::Activity,
            Some(Err(e)) => {
                *socket = None;
                SessionEvent::Closed {
                    reason: e.to_string(),
                }
            }
            None => {
                *socket = None;
                SessionEvent::Closed {
                    reason: "stream ended".to_string(),
                }
            }
        }
    }

    /// Execute one session action. Send failures surface as a follow-up
    /// `Closed` event.
    async fn execute(
        &self,
        action: SessionAction,
        socket: &mut Option<WsStream>,
        connecting: &mut Option<ConnectFuture>,
    ) -> Option<SessionEvent> {
        match action {
            SessionAction::Connect { reconnect } => {
                if reconnect {
                    metrics::record_reconnect();
                }
                tracing::info!(url = redact(&self.config.url), reconnect, "Connecting to push channel");
                *socket = None;
                *connecting = Some(Box::pin(connect(
                    self.config.url.clone(),
                    self.config.connect_timeout,
                )));
                None
            }
            SessionAction::SubscribeAll => {
                let ws = socket.as_mut()?;
                match self.subscribe_all(ws).await {
                    Ok(()) => {
                        tracing::info!(symbols = self.universe.len(), "Subscribed to symbols");
                        None
                    }
                    Err(e) => {
                        *socket = None;
                        Some(SessionEvent::Closed {
                            reason: format!("subscribe failed: {e}"),
                        })
                    }
                }
            }
            SessionAction::Deliver(records) => {
                self.deliver(&records);
                None
            }
            SessionAction::CloseSocket => {
                *connecting = None;
                if let Some(mut ws) = socket.take() {
                    let _ = tokio::time::timeout(Duration::from_secs(2), ws.close(None)).await;
                }
                None
            }
            SessionAction::Status(report) => {
                self.publish(report);
                None
            }
        }
    }

    async fn subscribe_all(&self, ws: &mut WsStream) -> Result<(), StreamClientError> {
        for symbol in &self.universe {
            let json = self.codec.encode_subscribe(symbol)?;
            ws.feed(Message::Text(json.into())).await?;
        }
        ws.flush().await?;
        Ok(())
    }

    fn deliver(&self, records: &[TradeRecord]) {
        for record in records {
            if !self.universe.contains(record.symbol.as_str()) {
                tracing::trace!(symbol = %record.symbol, "Ignoring trade for unknown symbol");
                continue;
            }
            let outcome = self.prices.apply(&record.to_observation());
            metrics::record_observation(ObservationSource::Push, outcome);
        }
    }

    fn publish(&self, report: StatusReport) {
        metrics::set_connection_state(report.status);
        self.status.send_if_modified(|current| {
            if *current == report {
                false
            } else {
                tracing::info!(status = report.status.as_str(), "Push channel status changed");
                *current = report;
                true
            }
        });
    }
}

const fn frame_kind(frame: &FeedFrame) -> FrameKind {
    match frame {
        FeedFrame::Trade { .. } => FrameKind::Trade,
        FeedFrame::Ping => FrameKind::Ping,
        FeedFrame::Error { .. } => FrameKind::Error,
        FeedFrame::Other => FrameKind::Other,
    }
}

async fn connect(url: String, timeout: Duration) -> Result<WsStream, StreamClientError> {
    let (ws, _response) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url))
        .await
        .map_err(|_| StreamClientError::ConnectTimeout(timeout))??;
    Ok(ws)
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn next_connect(
    connecting: &mut Option<ConnectFuture>,
) -> Result<WsStream, StreamClientError> {
    match connecting {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

async fn next_message(
    socket: &mut Option<WsStream>,
) -> Option<Result<Message, tokio_tungstenite::tungstenite::Error>> {
    match socket {
        Some(ws) => ws.next().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_strips_query() {
        assert_eq!(redact("wss://ws.example.com?token=abc"), "wss://ws.example.com");
        assert_eq!(redact("wss://ws.example.com"), "wss://ws.example.com");
    }

    #[test]
    fn config_debug_hides_token() {
        let config = StreamClientConfig::new("wss://ws.example.com?token=super-secret");
        assert!(!format!("{config:?}").contains("super-secret"));
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let result = connect(format!("ws://127.0.0.1:{port}"), Duration::from_secs(2)).await;
        assert!(matches!(result, Err(StreamClientError::WebSocket(_))));
    }
}
