//! Parser module for Bybit v5 public stream messages
//!
//! Handles deserialization of order book snapshots/deltas, public trades,
//! heartbeat replies and subscription acks. Book levels and trade prints are
//! kept raw until they are applied so that one malformed entry can be
//! skipped without discarding the rest of the frame.

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;

use crate::error::{Result, TraderError};

/// A level exactly as it arrived: `["price", "size"]`
pub type RawLevel = Vec<Value>;

/// Price level (price, size pair)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceLevel {
    pub price: Decimal,
    pub size: Decimal,
}

impl PriceLevel {
    /// Parse a single raw level. Fails for anything other than two numerics.
    pub fn from_raw(raw: &RawLevel) -> Result<Self> {
        if raw.len() != 2 {
            return Err(TraderError::ParseError(format!(
                "price level must have 2 entries, got {}",
                raw.len()
            )));
        }
        Ok(Self {
            price: decimal_from_value(&raw[0])?,
            size: decimal_from_value(&raw[1])?,
        })
    }
}

/// Book message type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookMessageKind {
    Snapshot,
    Delta,
}

/// Payload of an `orderbook.<depth>.<symbol>` frame
#[derive(Debug, Clone, Deserialize)]
pub struct BookData {
    /// Symbol
    #[serde(rename = "s")]
    pub symbol: String,

    /// Bid levels
    #[serde(rename = "b", default)]
    pub bids: Vec<RawLevel>,

    /// Ask levels
    #[serde(rename = "a", default)]
    pub asks: Vec<RawLevel>,

    /// Update ID
    #[serde(rename = "u", default)]
    pub update_id: u64,

    /// Cross sequence
    #[serde(default)]
    pub seq: u64,
}

/// Order book frame
#[derive(Debug, Clone)]
pub struct BookMessage {
    pub topic: String,
    pub kind: BookMessageKind,
    /// Venue timestamp (milliseconds)
    pub ts: u64,
    pub data: BookData,
}

/// Aggressor side of a print
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl FromStr for TradeSide {
    type Err = TraderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "buy" => Ok(TradeSide::Buy),
            "sell" => Ok(TradeSide::Sell),
            other => Err(TraderError::ParseError(format!("unknown trade side {:?}", other))),
        }
    }
}

/// A single public trade
#[derive(Debug, Clone, PartialEq)]
pub struct TradePrint {
    pub trade_id: String,
    pub price: Decimal,
    pub size: Decimal,
    /// Trade time (milliseconds)
    pub timestamp: u64,
    pub side: TradeSide,
}

#[derive(Debug, Deserialize)]
struct RawTrade {
    #[serde(rename = "T")]
    trade_time: u64,
    #[serde(rename = "S")]
    side: String,
    #[serde(rename = "v")]
    size: Value,
    #[serde(rename = "p")]
    price: Value,
    #[serde(rename = "i", default)]
    trade_id: String,
}

impl TradePrint {
    fn from_value(value: &Value) -> Result<Self> {
        let raw: RawTrade = serde_json::from_value(value.clone())?;
        Ok(Self {
            trade_id: raw.trade_id,
            price: decimal_from_value(&raw.price)?,
            size: decimal_from_value(&raw.size)?,
            timestamp: raw.trade_time,
            side: raw.side.parse()?,
        })
    }
}

/// Generic envelope shared by every inbound frame
#[derive(Debug, Deserialize)]
struct Envelope {
    topic: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    ts: Option<u64>,
    data: Option<Value>,
    op: Option<String>,
    success: Option<bool>,
    ret_msg: Option<String>,
}

/// Parsed WebSocket message
#[derive(Debug, Clone)]
pub enum ParsedMessage {
    Book(BookMessage),
    Trades {
        topic: String,
        prints: Vec<TradePrint>,
        /// Entries dropped because they failed to parse
        skipped: usize,
    },
    Pong,
    SubscriptionAck {
        op: String,
        success: bool,
        ret_msg: String,
    },
    Unknown(String),
}

impl ParsedMessage {
    /// Parse a raw WebSocket text frame
    pub fn parse(raw: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(raw)?;

        if let Some(topic) = envelope.topic {
            return Self::parse_topic(topic, envelope.kind, envelope.ts, envelope.data);
        }

        match envelope.op.as_deref() {
            Some("pong") => Ok(ParsedMessage::Pong),
            // Bybit answers `{"op":"ping"}` with the op echoed and ret_msg "pong"
            Some("ping") if envelope.ret_msg.as_deref() == Some("pong") => Ok(ParsedMessage::Pong),
            Some(op @ ("subscribe" | "unsubscribe")) => Ok(ParsedMessage::SubscriptionAck {
                op: op.to_string(),
                success: envelope.success.unwrap_or(false),
                ret_msg: envelope.ret_msg.unwrap_or_default(),
            }),
            _ => Ok(ParsedMessage::Unknown(raw.to_string())),
        }
    }

    fn parse_topic(
        topic: String,
        kind: Option<String>,
        ts: Option<u64>,
        data: Option<Value>,
    ) -> Result<Self> {
        let data = data.ok_or_else(|| {
            TraderError::ParseError(format!("frame on {} carries no data", topic))
        })?;

        if topic.starts_with("orderbook.") {
            let kind = match kind.as_deref() {
                Some("snapshot") => BookMessageKind::Snapshot,
                Some("delta") => BookMessageKind::Delta,
                other => {
                    return Err(TraderError::ParseError(format!(
                        "unknown book message type {:?} on {}",
                        other, topic
                    )))
                }
            };
            let data: BookData = serde_json::from_value(data)?;
            return Ok(ParsedMessage::Book(BookMessage {
                topic,
                kind,
                ts: ts.unwrap_or_default(),
                data,
            }));
        }

        if topic.starts_with("publicTrade.") {
            let entries = data.as_array().ok_or_else(|| {
                TraderError::ParseError(format!("trade frame on {} is not an array", topic))
            })?;
            let mut prints = Vec::with_capacity(entries.len());
            let mut skipped = 0;
            for entry in entries {
                match TradePrint::from_value(entry) {
                    Ok(print) => prints.push(print),
                    Err(e) => {
                        tracing::warn!(topic = %topic, error = %e, "Skipping malformed trade print");
                        skipped += 1;
                    }
                }
            }
            return Ok(ParsedMessage::Trades {
                topic,
                prints,
                skipped,
            });
        }

        Ok(ParsedMessage::Unknown(topic))
    }
}

/// OHLCV candle, oldest-first once collected
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    /// Open time (milliseconds)
    pub timestamp: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Parse a kline row `[start, open, high, low, close, volume, turnover?]`
    pub fn from_row(row: &[String]) -> Result<Self> {
        if row.len() < 6 {
            return Err(TraderError::ParseError(format!(
                "kline row must have at least 6 fields, got {}",
                row.len()
            )));
        }
        let num = |i: usize| -> Result<f64> {
            row[i]
                .parse::<f64>()
                .map_err(|e| TraderError::ParseError(format!("kline field {}: {}", i, e)))
        };
        Ok(Self {
            timestamp: row[0]
                .parse::<u64>()
                .map_err(|e| TraderError::ParseError(format!("kline start: {}", e)))?,
            open: num(1)?,
            high: num(2)?,
            low: num(3)?,
            close: num(4)?,
            volume: num(5)?,
        })
    }
}

/// Decimal from a JSON string or number
fn decimal_from_value(value: &Value) -> Result<Decimal> {
    match value {
        Value::String(s) => Decimal::from_str(s)
            .map_err(|e| TraderError::ParseError(format!("invalid decimal {:?}: {}", s, e))),
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .map_err(|e| TraderError::ParseError(format!("invalid decimal {}: {}", n, e))),
        other => Err(TraderError::ParseError(format!("expected decimal, got {}", other))),
    }
}
