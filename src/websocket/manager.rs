//! Stream ingestion
//!
//! Owns the connection lifecycle: connect, subscribe, heartbeat, dispatch
//! into the shared market state, and fixed-delay reconnection until a
//! shutdown is requested.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use super::client::{FeedConnection, FeedConnector, Frame};
use super::subscription::{ping_message, Subscription};
use crate::config::{normalize_symbol, StreamConfig};
use crate::error::{Result, TraderError};
use crate::notify::Notifier;
use crate::orderbook::SharedMarket;
use crate::parser::ParsedMessage;
use crate::telemetry::Telemetry;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum IngestionState {
    Disconnected,
    Connecting,
    /// Subscription sent, awaiting the first ack or data frame
    Subscribed,
    Streaming,
    /// Terminal; no further connects or subscribes
    Stopped,
}

impl IngestionState {
    pub fn can_transition(self, next: IngestionState) -> bool {
        use IngestionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Disconnected, Stopped)
                | (Connecting, Subscribed)
                | (Connecting, Disconnected)
                | (Connecting, Stopped)
                | (Subscribed, Streaming)
                | (Subscribed, Subscribed)
                | (Subscribed, Disconnected)
                | (Streaming, Subscribed)
                | (Streaming, Disconnected)
        )
    }
}

/// Operator commands delivered to the ingestion task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    ChangeSymbol(String),
}

/// Control and observation handle for a running [`StreamIngestion`]
#[derive(Clone)]
pub struct IngestionHandle {
    control_tx: mpsc::Sender<ControlCommand>,
    state_rx: watch::Receiver<IngestionState>,
    book_updates: Arc<Notify>,
}

impl IngestionHandle {
    pub fn state(&self) -> IngestionState {
        *self.state_rx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<IngestionState> {
        self.state_rx.clone()
    }

    /// Signalled after every applied book frame
    pub fn book_updates(&self) -> Arc<Notify> {
        self.book_updates.clone()
    }

    pub async fn change_symbol(&self, symbol: &str) -> Result<()> {
        self.control_tx
            .send(ControlCommand::ChangeSymbol(normalize_symbol(symbol)))
            .await
            .map_err(|_| TraderError::Shutdown)
    }
}

/// Why a session ended without error
enum SessionEnd {
    Shutdown,
}

/// What one inbound text frame turned out to be
#[derive(Debug, PartialEq, Eq)]
enum Dispatched {
    Data,
    Pong,
    Ack,
    /// Venue refused the subscription; the session cannot stream
    Refused(String),
    Dropped,
}

pub struct StreamIngestion {
    connector: Arc<dyn FeedConnector>,
    endpoint: String,
    subscription: Subscription,
    market: SharedMarket,
    book_updates: Arc<Notify>,
    state_tx: watch::Sender<IngestionState>,
    control_rx: mpsc::Receiver<ControlCommand>,
    shutdown: watch::Receiver<bool>,
    ping_interval: Duration,
    max_missed_pongs: u32,
    reconnect_delay: Duration,
    telemetry: Arc<Telemetry>,
    notifier: Notifier,
}

impl StreamIngestion {
    pub fn new(
        config: &StreamConfig,
        endpoint: &str,
        connector: Arc<dyn FeedConnector>,
        market: SharedMarket,
        telemetry: Arc<Telemetry>,
        notifier: Notifier,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, IngestionHandle) {
        let (control_tx, control_rx) = mpsc::channel(8);
        let (state_tx, state_rx) = watch::channel(IngestionState::Disconnected);
        let book_updates = Arc::new(Notify::new());

        let ingestion = Self {
            connector,
            endpoint: endpoint.to_string(),
            subscription: Subscription::new(&config.symbol, config.depth),
            market,
            book_updates: book_updates.clone(),
            state_tx,
            control_rx,
            shutdown,
            ping_interval: config.ping_interval(),
            max_missed_pongs: config.max_missed_pongs,
            reconnect_delay: config.reconnect_delay(),
            telemetry,
            notifier,
        };
        let handle = IngestionHandle {
            control_tx,
            state_rx,
            book_updates,
        };
        (ingestion, handle)
    }

    pub fn state(&self) -> IngestionState {
        *self.state_tx.borrow()
    }

    fn transition(&self, next: IngestionState) {
        let current = self.state();
        if !current.can_transition(next) {
            warn!(from = ?current, to = ?next, "Ignoring invalid ingestion transition");
            return;
        }
        debug!(from = ?current, to = ?next, "Ingestion state");
        self.state_tx.send_replace(next);
    }

    /// Run until shutdown; reconnects after a fixed delay on any failure
    pub async fn run(mut self) -> Result<()> {
        info!(symbol = %self.subscription.symbol, "Starting stream ingestion");

        loop {
            if *self.shutdown.borrow() {
                self.transition(IngestionState::Stopped);
                return Ok(());
            }

            self.transition(IngestionState::Connecting);
            let connected = tokio::select! {
                result = self.connector.connect(&self.endpoint) => Some(result),
                _ = shutdown_signalled(&mut self.shutdown) => None,
            };

            let reason = match connected {
                None => {
                    self.transition(IngestionState::Stopped);
                    info!("Shutdown during connect, ingestion stopped");
                    return Ok(());
                }
                Some(Err(e)) => e,
                Some(Ok(conn)) => match self.session(conn).await {
                    Ok(SessionEnd::Shutdown) => {
                        self.transition(IngestionState::Disconnected);
                        self.transition(IngestionState::Stopped);
                        info!("Ingestion stopped");
                        return Ok(());
                    }
                    Err(e) => e,
                },
            };

            self.transition(IngestionState::Disconnected);
            self.telemetry.reconnects.inc();
            error!(error = %reason, delay_ms = self.reconnect_delay.as_millis() as u64, "Stream session ended, reconnecting");
            self.notifier.warning(
                "Stream reconnecting",
                format!("{}: {}", self.subscription.symbol, reason),
            );

            tokio::select! {
                _ = sleep(self.reconnect_delay) => {}
                _ = shutdown_signalled(&mut self.shutdown) => {
                    self.transition(IngestionState::Stopped);
                    info!("Shutdown during reconnect delay, ingestion stopped");
                    return Ok(());
                }
            }
        }
    }

    async fn session(&mut self, mut conn: Box<dyn FeedConnection>) -> Result<SessionEnd> {
        // A new connection never trusts the previous book
        self.market.write().await.begin_epoch();

        conn.send_text(self.subscription.subscribe_message()).await?;
        self.transition(IngestionState::Subscribed);
        info!(topics = ?self.subscription.topics, "Subscription sent");

        let mut ping = interval_at(Instant::now() + self.ping_interval, self.ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut awaiting_pong = false;
        let mut missed: u32 = 0;

        loop {
            tokio::select! {
                _ = shutdown_signalled(&mut self.shutdown) => {
                    conn.close().await;
                    return Ok(SessionEnd::Shutdown);
                }
                Some(command) = self.control_rx.recv() => {
                    self.handle_command(conn.as_mut(), command).await?;
                }
                _ = ping.tick() => {
                    if awaiting_pong {
                        missed += 1;
                        warn!(missed, max = self.max_missed_pongs, "Heartbeat pong missed");
                        if missed >= self.max_missed_pongs {
                            self.telemetry.heartbeat_timeouts.inc();
                            conn.close().await;
                            return Err(TraderError::HeartbeatTimeout { missed });
                        }
                    }
                    conn.send_text(ping_message()).await?;
                    awaiting_pong = true;
                }
                frame = conn.recv() => {
                    let frame = match frame {
                        None => {
                            return Err(TraderError::WebSocketConnection(
                                "Connection closed by peer".to_string(),
                            ))
                        }
                        Some(frame) => frame?,
                    };
                    let dispatched = match frame {
                        Frame::Pong => Dispatched::Pong,
                        Frame::Text(text) => self.dispatch(&text).await,
                    };
                    match dispatched {
                        Dispatched::Pong => {
                            awaiting_pong = false;
                            missed = 0;
                        }
                        Dispatched::Data | Dispatched::Ack => {
                            if self.state() == IngestionState::Subscribed {
                                self.transition(IngestionState::Streaming);
                            }
                        }
                        Dispatched::Refused(reason) => {
                            conn.close().await;
                            return Err(TraderError::WebSocketMessage(format!(
                                "subscription refused: {}",
                                reason
                            )));
                        }
                        Dispatched::Dropped => {}
                    }
                }
            }
        }
    }

    async fn handle_command(
        &mut self,
        conn: &mut dyn FeedConnection,
        command: ControlCommand,
    ) -> Result<()> {
        match command {
            ControlCommand::ChangeSymbol(symbol) => {
                if symbol == self.subscription.symbol {
                    return Ok(());
                }
                info!(from = %self.subscription.symbol, to = %symbol, "Changing symbol");
                conn.send_text(self.subscription.unsubscribe_message()).await?;

                self.subscription = self.subscription.for_symbol(&symbol);
                self.market.write().await.switch_symbol(&symbol);

                conn.send_text(self.subscription.subscribe_message()).await?;
                self.transition(IngestionState::Subscribed);
                Ok(())
            }
        }
    }

    /// Parse and route one text frame; bad frames are logged and dropped
    async fn dispatch(&self, text: &str) -> Dispatched {
        self.telemetry.frames_received.inc();

        let parsed = match ParsedMessage::parse(text) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "Dropping malformed frame");
                self.telemetry.frames_dropped.inc();
                return Dispatched::Dropped;
            }
        };

        match parsed {
            ParsedMessage::Book(msg) => {
                let applied = self.market.write().await.apply_book(&msg);
                match applied {
                    Some(stats) => {
                        if stats.skipped > 0 {
                            self.telemetry.frames_dropped.inc();
                        }
                        trace!(topic = %msg.topic, applied = stats.applied, "Book frame applied");
                        self.book_updates.notify_one();
                        Dispatched::Data
                    }
                    None => {
                        self.telemetry.frames_dropped.inc();
                        Dispatched::Dropped
                    }
                }
            }
            ParsedMessage::Trades {
                topic,
                prints,
                skipped,
            } => {
                if skipped > 0 {
                    self.telemetry.frames_dropped.inc();
                }
                if self.market.write().await.record_trades(&topic, &prints) {
                    Dispatched::Data
                } else {
                    self.telemetry.frames_dropped.inc();
                    Dispatched::Dropped
                }
            }
            ParsedMessage::Pong => Dispatched::Pong,
            ParsedMessage::SubscriptionAck {
                op,
                success,
                ret_msg,
            } => {
                if success {
                    info!(op = %op, "Subscription acknowledged");
                    Dispatched::Ack
                } else if op == "subscribe" {
                    error!(op = %op, ret_msg = %ret_msg, "Subscription refused");
                    Dispatched::Refused(ret_msg)
                } else {
                    warn!(op = %op, ret_msg = %ret_msg, "Request refused by venue");
                    Dispatched::Dropped
                }
            }
            ParsedMessage::Unknown(msg) => {
                trace!(msg = %msg, "Unroutable frame");
                self.telemetry.frames_dropped.inc();
                Dispatched::Dropped
            }
        }
    }
}

/// Resolves once shutdown is requested or the sender is gone
async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::MarketState;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records outbound frames and lets the test inject inbound ones
    #[derive(Default)]
    struct Scripted {
        connects: AtomicUsize,
        sent: Mutex<Vec<String>>,
        inbound: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    }

    impl Scripted {
        fn push(&self, text: &str) {
            if let Some(tx) = self.inbound.lock().unwrap().as_ref() {
                let _ = tx.send(Frame::Text(text.to_string()));
            }
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    struct ScriptedConnector(Arc<Scripted>);

    struct ScriptedConnection {
        script: Arc<Scripted>,
        rx: mpsc::UnboundedReceiver<Frame>,
    }

    #[async_trait]
    impl FeedConnector for ScriptedConnector {
        async fn connect(&self, _endpoint: &str) -> Result<Box<dyn FeedConnection>> {
            self.0.connects.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::unbounded_channel();
            *self.0.inbound.lock().unwrap() = Some(tx);
            Ok(Box::new(ScriptedConnection {
                script: self.0.clone(),
                rx,
            }))
        }
    }

    #[async_trait]
    impl FeedConnection for ScriptedConnection {
        async fn send_text(&mut self, text: String) -> Result<()> {
            self.script.sent.lock().unwrap().push(text);
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<Frame>> {
            self.rx.recv().await.map(Ok)
        }

        async fn close(&mut self) {}
    }

    struct Harness {
        script: Arc<Scripted>,
        market: SharedMarket,
        handle: IngestionHandle,
        telemetry: Arc<Telemetry>,
        shutdown: watch::Sender<bool>,
        task: tokio::task::JoinHandle<Result<()>>,
    }

    fn start() -> Harness {
        let config = StreamConfig {
            symbol: "BTCUSDT".into(),
            ping_interval_secs: 20,
            max_missed_pongs: 3,
            reconnect_delay_ms: 5000,
            ..StreamConfig::default()
        };
        let script = Arc::new(Scripted::default());
        let market = MarketState::new("BTCUSDT", 50, 100).shared();
        let telemetry = Arc::new(Telemetry::new().unwrap());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (ingestion, handle) = StreamIngestion::new(
            &config,
            "wss://test",
            Arc::new(ScriptedConnector(script.clone())),
            market.clone(),
            telemetry.clone(),
            Notifier::disabled(),
            shutdown_rx,
        );
        let task = tokio::spawn(ingestion.run());
        Harness {
            script,
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

    const SNAPSHOT: &str = r#"{"topic":"orderbook.50.BTCUSDT","type":"snapshot","ts":1,"data":{"s":"BTCUSDT","b":[["100","5"]],"a":[["101","2"]],"u":1,"seq":1}}"#;

    #[test]
    fn test_transition_table() {
        use IngestionState::*;
        assert!(Disconnected.can_transition(Stopped));
        assert!(Connecting.can_transition(Stopped));
        assert!(!Streaming.can_transition(Stopped));
        assert!(!Subscribed.can_transition(Stopped));
        assert!(!Stopped.can_transition(Connecting));
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribes_and_streams() {
        let h = start();
        settle().await;

        let sent = h.script.sent();
        assert!(sent[0].contains("orderbook.50.BTCUSDT"));
        assert_eq!(h.handle.state(), IngestionState::Subscribed);

        h.script.push(SNAPSHOT);
        settle().await;

        assert_eq!(h.handle.state(), IngestionState::Streaming);
        let view = h.market.read().await.view(5);
        assert!(view.synced);
        assert_eq!(view.imbalance(1), Some(2.5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_subscription_reconnects() {
        let h = start();
        settle().await;

        h.script.push(
            r#"{"success":false,"ret_msg":"error:handler not found","conn_id":"x","op":"subscribe"}"#,
        );
        settle().await;
        assert_eq!(h.handle.state(), IngestionState::Disconnected);
        assert_eq!(h.telemetry.reconnects.get(), 1);

        tokio::time::sleep(Duration::from_millis(5_100)).await;
        settle().await;
        assert_eq!(h.script.connects.load(Ordering::SeqCst), 2);
        assert_eq!(h.handle.state(), IngestionState::Subscribed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_frame_does_not_end_session() {
        let h = start();
        settle().await;

        h.script.push("not json at all");
        h.script.push(r#"{"topic":"orderbook.50.BTCUSDT","type":"bogus","data":{}}"#);
        h.script.push(SNAPSHOT);
        settle().await;

        assert_eq!(h.script.connects.load(Ordering::SeqCst), 1);
        assert!(h.market.read().await.book().is_synced());
        assert_eq!(h.telemetry.frames_dropped.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_pongs_force_reconnect() {
        let h = start();
        settle().await;

        // 3 unanswered pings (20s apart) then the 5s reconnect delay
        tokio::time::sleep(Duration::from_secs(20 * 4 + 6)).await;
        settle().await;

        assert!(h.script.connects.load(Ordering::SeqCst) >= 2);
        assert_eq!(h.telemetry.heartbeat_timeouts.get(), 1);
        let subscribes = h
            .script
            .sent()
            .iter()
            .filter(|m| m.contains("\"subscribe\""))
            .count();
        assert!(subscribes >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pongs_keep_session_alive() {
        let h = start();
        settle().await;

        // Answer each ping a second after it goes out
        for _ in 0..6 {
            tokio::time::sleep(Duration::from_secs(21)).await;
            settle().await;
            h.script.push(r#"{"success":true,"ret_msg":"pong","conn_id":"x","op":"ping"}"#);
            settle().await;
        }
        assert_eq!(h.script.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_starts_new_epoch() {
        let h = start();
        settle().await;
        h.script.push(SNAPSHOT);
        settle().await;
        assert!(h.market.read().await.book().is_synced());

        // Dropping the inbound sender closes the connection
        h.script.inbound.lock().unwrap().take();
        settle().await;
        assert_eq!(h.handle.state(), IngestionState::Disconnected);
        assert_eq!(h.telemetry.reconnects.get(), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        settle().await;
        assert_eq!(h.script.connects.load(Ordering::SeqCst), 2);
        assert!(!h.market.read().await.book().is_synced());
        assert!(h.market.read().await.view(5).midpoint().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_all_traffic() {
        let h = start();
        settle().await;
        h.script.push(SNAPSHOT);
        settle().await;

        h.shutdown.send(true).unwrap();
        h.task.await.unwrap().unwrap();
        assert_eq!(h.handle.state(), IngestionState::Stopped);

        let before = h.script.sent().len();
        let connects = h.script.connects.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(h.script.sent().len(), before);
        assert_eq!(h.script.connects.load(Ordering::SeqCst), connects);
    }

    #[tokio::test(start_paused = true)]
    async fn test_symbol_change_resubscribes_and_resets() {
        let h = start();
        settle().await;
        h.script.push(SNAPSHOT);
        h.script.push(r#"{"topic":"publicTrade.BTCUSDT","type":"snapshot","ts":1,"data":[{"T":1,"s":"BTCUSDT","S":"Buy","v":"1","p":"100","i":"a"}]}"#);
        settle().await;
        assert_eq!(h.market.read().await.tape().len(), 1);

        h.handle.change_symbol("eth/usdt").await.unwrap();
        settle().await;

        let sent = h.script.sent();
        let n = sent.len();
        assert!(sent[n - 2].contains("unsubscribe") && sent[n - 2].contains("BTCUSDT"));
        assert!(sent[n - 1].contains("orderbook.50.ETHUSDT"));

        let market = h.market.read().await;
        assert_eq!(market.symbol(), "ETHUSDT");
        assert!(market.tape().is_empty());
        assert!(!market.book().is_synced());
        drop(market);

        // Late frames for the old instrument are ignored
        h.script.push(SNAPSHOT);
        settle().await;
        assert!(!h.market.read().await.book().is_synced());
    }
}
