//! WebSocket module for Bybit public streams
//!
//! Handles transport, topic subscription and the ingestion lifecycle that
//! keeps the shared book current across reconnects.

mod client;
mod manager;
mod subscription;

pub use client::{FeedConnection, FeedConnector, Frame, WebSocketClient, WebSocketConnector};
pub use manager::{ControlCommand, IngestionHandle, IngestionState, StreamIngestion};
pub use subscription::{ping_message, Subscription};
