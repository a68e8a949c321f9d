//! Stream ingestion against a scripted in-memory transport

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use flow_trader::config::StreamConfig;
use flow_trader::websocket::{
    FeedConnection, FeedConnector, Frame, IngestionHandle, IngestionState, StreamIngestion,
};
use flow_trader::{MarketState, Notifier, Result, SharedMarket, Telemetry, TraderError};

#[derive(Default)]
struct Transport {
    /// Connect attempts that fail before one succeeds
    failures_left: AtomicUsize,
    connects: AtomicUsize,
    sent: Mutex<Vec<String>>,
    server: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
}

impl Transport {
    fn send(&self, text: &str) {
        if let Some(tx) = self.server.lock().unwrap().as_ref() {
            tx.send(Frame::Text(text.to_string())).unwrap();
        }
    }

    /// Peer-initiated close of the live connection
    fn hang_up(&self) {
        self.server.lock().unwrap().take();
    }

    fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

struct Connector(Arc<Transport>);

struct Connection {
    transport: Arc<Transport>,
    inbound: mpsc::UnboundedReceiver<Frame>,
}

#[async_trait]
impl FeedConnector for Connector {
    async fn connect(&self, _endpoint: &str) -> Result<Box<dyn FeedConnection>> {
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .0
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TraderError::WebSocketConnection("connection refused".into()));
        }

        let (tx, inbound) = mpsc::unbounded_channel();
        *self.0.server.lock().unwrap() = Some(tx);
        Ok(Box::new(Connection {
            transport: self.0.clone(),
            inbound,
        }))
    }
}

#[async_trait]
impl FeedConnection for Connection {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.transport.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<Frame>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) {}
}

struct Running {
    transport: Arc<Transport>,
    market: SharedMarket,
    handle: IngestionHandle,
    telemetry: Arc<Telemetry>,
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<Result<()>>,
}

fn start(failures: usize) -> Running {
    let transport = Arc::new(Transport {
        failures_left: AtomicUsize::new(failures),
        ..Transport::default()
    });
    let market = MarketState::new("BTCUSDT", 50, 1000).shared();
    let telemetry = Arc::new(Telemetry::new().unwrap());
    let (shutdown, shutdown_rx) = watch::channel(false);

    let (ingestion, handle) = StreamIngestion::new(
        &StreamConfig::default(),
        "wss://stream.invalid/v5/public/linear",
        Arc::new(Connector(transport.clone())),
        market.clone(),
        telemetry.clone(),
        Notifier::disabled(),
        shutdown_rx,
    );
    let task = tokio::spawn(ingestion.run());

    Running {
        transport,
        market,
        handle,
        telemetry,
        shutdown,
        task,
    }
}

async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

fn book_frame(kind: &str, u: u64, bids: &str, asks: &str) -> String {
    format!(
        r#"{{"topic":"orderbook.50.BTCUSDT","type":"{kind}","ts":{u},"data":{{"s":"BTCUSDT","b":{bids},"a":{asks},"u":{u},"seq":{u}}}}}"#
    )
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_and_deltas_maintain_book() {
    let run = start(0);
    settle().await;

    run.transport.send(&book_frame(
        "snapshot",
        10,
        r#"[["100","4"],["99","1"]]"#,
        r#"[["101","1"],["102","1"]]"#,
    ));
    run.transport
        .send(&book_frame("delta", 11, r#"[["99","0"],["100","6"]]"#, "[]"));
    // Stale: must not be applied
    run.transport
        .send(&book_frame("delta", 9, r#"[["100","1"]]"#, "[]"));
    settle().await;

    assert_eq!(run.handle.state(), IngestionState::Streaming);
    let view = run.market.read().await.view(5);
    assert_eq!(view.bids.len(), 1);
    assert_eq!(view.imbalance(5), Some(3.0));
    assert_eq!(run.telemetry.frames_received.get(), 3);
    assert_eq!(run.telemetry.frames_dropped.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_waits_for_fresh_snapshot() {
    let run = start(0);
    settle().await;
    run.transport
        .send(&book_frame("snapshot", 1, r#"[["100","4"]]"#, r#"[["101","1"]]"#));
    settle().await;

    run.transport.hang_up();
    settle().await;
    assert_eq!(run.handle.state(), IngestionState::Disconnected);

    tokio::time::sleep(Duration::from_millis(5_100)).await;
    settle().await;
    assert_eq!(run.transport.connects(), 2);

    // Delta on the new connection before any snapshot
    run.transport
        .send(&book_frame("delta", 2, r#"[["100","9"]]"#, "[]"));
    settle().await;
    assert!(run.market.read().await.view(5).imbalance(5).is_none());

    run.transport
        .send(&book_frame("snapshot", 3, r#"[["100","2"]]"#, r#"[["101","1"]]"#));
    settle().await;
    assert_eq!(run.market.read().await.view(5).imbalance(5), Some(2.0));
}

#[tokio::test(start_paused = true)]
async fn test_connect_failures_retry_with_fixed_delay() {
    let run = start(2);
    settle().await;
    assert_eq!(run.transport.connects(), 1);
    assert_eq!(run.handle.state(), IngestionState::Disconnected);

    tokio::time::sleep(Duration::from_millis(5_100)).await;
    settle().await;
    assert_eq!(run.transport.connects(), 2);

    tokio::time::sleep(Duration::from_millis(5_100)).await;
    settle().await;
    assert_eq!(run.transport.connects(), 3);
    assert_eq!(run.handle.state(), IngestionState::Subscribed);
    assert_eq!(run.telemetry.reconnects.get(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_reconnect_delay_stops() {
    let run = start(1);
    settle().await;
    assert_eq!(run.handle.state(), IngestionState::Disconnected);

    run.shutdown.send(true).unwrap();
    run.task.await.unwrap().unwrap();

    assert_eq!(run.handle.state(), IngestionState::Stopped);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(run.transport.connects(), 1);
    assert!(run.transport.sent.lock().unwrap().is_empty());
}
