//! Flow Trader - order-flow signal trader for Bybit linear perpetuals
//!
//! This crate reconstructs the order book and trade tape from Bybit's public
//! stream, turns it into Long/Short/Hold decisions (book imbalance or an
//! indicator composite), sizes them against account equity and submits
//! signed orders while holding at most one position.

pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod notify;
pub mod orderbook;
pub mod parser;
pub mod risk;
pub mod signal;
pub mod telemetry;
pub mod websocket;

pub use config::{Config, Credentials};
pub use engine::{HealthSnapshot, Operator, TradingEngine};
pub use error::{Result, TraderError};
pub use execution::{BybitRestClient, ExecutionCoordinator, ExecutionOutcome, VenueClient};
pub use notify::Notifier;
pub use orderbook::{BookView, MarketState, OrderBook, OrderBookMetrics, SharedMarket};
pub use parser::{Candle, ParsedMessage};
pub use risk::RiskSizer;
pub use signal::{Decision, SignalGenerator};
pub use telemetry::Telemetry;
pub use websocket::{IngestionHandle, IngestionState, StreamIngestion, WebSocketConnector};
