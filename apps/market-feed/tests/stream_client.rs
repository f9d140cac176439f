//! Push Channel Integration Tests
//!
//! Runs the stream client against a loopback WebSocket server and checks
//! subscription, trade delivery, reconnects, manual restart and hard stop.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use market_feed::application::ports::StreamCommand;
use market_feed::infrastructure::stream::{GuardConfig, ReconnectConfig, SessionConfig};
use market_feed::{
    ConnectionStatus, PriceStateStore, PriceUpdate, StatusReport, StreamClient,
    StreamClientConfig, SymbolUniverse,
};

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    prices: Arc<PriceStateStore>,
    updates: broadcast::Receiver<PriceUpdate>,
    status: watch::Receiver<StatusReport>,
    commands: mpsc::Sender<StreamCommand>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Harness {
    fn start(addr: SocketAddr, session: SessionConfig) -> Self {
        let universe = SymbolUniverse::new(["AAPL", "MSFT"]);
        let prices = Arc::new(PriceStateStore::seeded(&universe));
        let updates = prices.subscribe();
        let (status_tx, status) = watch::channel(StatusReport::default());
        let (commands, command_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        let config = StreamClientConfig {
            session,
            watchdog_interval: Duration::from_millis(50),
            ..StreamClientConfig::new(format!("ws://{addr}"))
        };
        let client = StreamClient::new(
            config,
            universe,
            Arc::clone(&prices),
            status_tx,
            cancel.clone(),
        );
        let handle = tokio::spawn(client.run(command_rx));

        Self {
            prices,
            updates,
            status,
            commands,
            cancel,
            handle,
        }
    }

    async fn wait_for_status(&mut self, status: ConnectionStatus) -> StatusReport {
        timeout(WAIT, self.status.wait_for(|r| r.status == status))
            .await
            .expect("status change timed out")
            .unwrap()
            .clone()
    }

    async fn stop(self) {
        self.cancel.cancel();
        timeout(WAIT, self.handle).await.unwrap().unwrap();
    }
}

/// Session tuned so reconnects happen within milliseconds.
fn fast_session() -> SessionConfig {
    SessionConfig {
        guard: GuardConfig {
            min_interval: Duration::from_millis(10),
            ..GuardConfig::default()
        },
        reconnect: ReconnectConfig::new(Duration::from_millis(20), Duration::from_millis(200), 0.0),
        ..SessionConfig::default()
    }
}

async fn listen() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (tcp, _) = timeout(WAIT, listener.accept())
        .await
        .expect("no connection")
        .unwrap();
    tokio_tungstenite::accept_async(tcp).await.unwrap()
}

/// Read `count` subscribe requests and return their symbols.
async fn read_subscriptions(ws: &mut WebSocketStream<TcpStream>, count: usize) -> Vec<String> {
    let mut symbols = Vec::new();
    while symbols.len() < count {
        let message = timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
        if let Message::Text(text) = message {
            let value: Value = serde_json::from_str(text.as_str()).unwrap();
            assert_eq!(value["type"], "subscribe");
            symbols.push(value["symbol"].as_str().unwrap().to_string());
        }
    }
    symbols
}

async fn send_json(ws: &mut WebSocketStream<TcpStream>, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

/// Keep answering a socket in the background until the peer goes away.
fn drain(mut ws: WebSocketStream<TcpStream>) -> JoinHandle<()> {
    tokio::spawn(async move { while let Some(Ok(_)) = ws.next().await {} })
}

#[tokio::test]
async fn subscribes_and_applies_trades() {
    let (listener, addr) = listen().await;
    let mut harness = Harness::start(addr, SessionConfig::default());

    let mut server = accept(&listener).await;
    assert_eq!(read_subscriptions(&mut server, 2).await, ["AAPL", "MSFT"]);
    harness.wait_for_status(ConnectionStatus::Live).await;

    send_json(
        &mut server,
        json!({
            "type": "trade",
            "data": [
                {"s": "GOOG", "p": 140.0, "t": 1_700_000_000_000_i64, "v": 1.0},
                {"s": "AAPL", "p": 187.25, "t": 1_700_000_000_000_i64, "v": 10.0}
            ]
        }),
    )
    .await;

    let update = timeout(WAIT, harness.updates.recv()).await.unwrap().unwrap();
    assert_eq!(update.symbol.as_str(), "AAPL");
    assert_eq!(update.info.price, Some(187.25));
    assert_eq!(update.info.flash_key, 1);

    // Symbols outside the universe are ignored.
    assert!(harness.prices.get("GOOG").is_none());
    assert_eq!(harness.prices.len(), 2);

    drain(server);
    harness.stop().await;
}

#[tokio::test]
async fn malformed_record_does_not_drop_batch() {
    let (listener, addr) = listen().await;
    let mut harness = Harness::start(addr, SessionConfig::default());

    let mut server = accept(&listener).await;
    read_subscriptions(&mut server, 2).await;
    harness.wait_for_status(ConnectionStatus::Live).await;

    send_json(
        &mut server,
        json!({
            "type": "trade",
            "data": [
                {"s": "AAPL", "p": null, "t": 1_700_000_000_000_i64},
                {"s": "MSFT", "p": 402.5, "t": 1_700_000_000_000_i64, "v": 3.0}
            ]
        }),
    )
    .await;

    let update = timeout(WAIT, harness.updates.recv()).await.unwrap().unwrap();
    assert_eq!(update.symbol.as_str(), "MSFT");
    assert_eq!(update.info.price, Some(402.5));
    assert!(harness.prices.get("AAPL").unwrap().price.is_none());

    drain(server);
    harness.stop().await;
}

#[tokio::test]
async fn provider_error_triggers_reconnect() {
    let (listener, addr) = listen().await;
    let mut harness = Harness::start(addr, fast_session());

    let mut first = accept(&listener).await;
    read_subscriptions(&mut first, 2).await;
    harness.wait_for_status(ConnectionStatus::Live).await;

    send_json(&mut first, json!({"type": "error", "msg": "Subscribing to too many symbols"})).await;
    drain(first);

    let mut second = accept(&listener).await;
    assert_eq!(read_subscriptions(&mut second, 2).await, ["AAPL", "MSFT"]);
    harness.wait_for_status(ConnectionStatus::Live).await;

    drain(second);
    harness.stop().await;
}

#[tokio::test]
async fn server_close_triggers_reconnect() {
    let (listener, addr) = listen().await;
    let mut harness = Harness::start(addr, fast_session());

    let mut first = accept(&listener).await;
    read_subscriptions(&mut first, 2).await;
    harness.wait_for_status(ConnectionStatus::Live).await;
    first.close(None).await.unwrap();
    drain(first);

    let mut second = accept(&listener).await;
    read_subscriptions(&mut second, 2).await;

    drain(second);
    harness.stop().await;
}

#[tokio::test]
async fn silent_connection_is_replaced() {
    let (listener, addr) = listen().await;
    let session = SessionConfig {
        silence_threshold: Duration::from_millis(150),
        ..fast_session()
    };
    let mut harness = Harness::start(addr, session);

    let mut first = accept(&listener).await;
    read_subscriptions(&mut first, 2).await;
    harness.wait_for_status(ConnectionStatus::Live).await;
    // Say nothing; the watchdog should give up on this socket.
    let drained = drain(first);

    let mut second = accept(&listener).await;
    read_subscriptions(&mut second, 2).await;
    timeout(WAIT, drained).await.unwrap().unwrap();

    drain(second);
    harness.stop().await;
}

#[tokio::test]
async fn manual_restart_opens_fresh_connection() {
    let (listener, addr) = listen().await;
    let mut harness = Harness::start(addr, fast_session());

    let mut first = accept(&listener).await;
    read_subscriptions(&mut first, 2).await;
    harness.wait_for_status(ConnectionStatus::Live).await;
    let drained = drain(first);
    // Restarts inside the guard interval are dropped.
    tokio::time::sleep(Duration::from_millis(50)).await;

    harness
        .commands
        .send(StreamCommand::ManualRestart)
        .await
        .unwrap();

    let mut second = accept(&listener).await;
    read_subscriptions(&mut second, 2).await;
    // The old socket was closed by the client.
    timeout(WAIT, drained).await.unwrap().unwrap();

    drain(second);
    harness.stop().await;
}

#[tokio::test]
async fn hard_stop_closes_and_stays_down() {
    let (listener, addr) = listen().await;
    let session = SessionConfig {
        hard_stop: Duration::from_millis(400),
        ..fast_session()
    };
    let mut harness = Harness::start(addr, session);

    let mut first = accept(&listener).await;
    read_subscriptions(&mut first, 2).await;
    let drained = drain(first);

    let report = harness.wait_for_status(ConnectionStatus::HardStopped).await;
    assert!(report.notice.is_some());
    timeout(WAIT, drained).await.unwrap().unwrap();

    // No reconnect after the hard stop.
    assert!(
        timeout(Duration::from_millis(300), listener.accept())
            .await
            .is_err()
    );

    // A manual restart brings the channel back.
    harness
        .commands
        .send(StreamCommand::ManualRestart)
        .await
        .unwrap();
    let mut second = accept(&listener).await;
    read_subscriptions(&mut second, 2).await;
    harness.wait_for_status(ConnectionStatus::Live).await;

    drain(second);
    harness.stop().await;
}
