//! Topic subscription for one instrument

use serde_json::json;

/// Book and trade topics for `symbol`, re-sent on every connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub symbol: String,
    pub depth: usize,
    pub topics: Vec<String>,
}

impl Subscription {
    pub fn new(symbol: &str, depth: usize) -> Self {
        Self {
            symbol: symbol.to_string(),
            depth,
            topics: vec![
                format!("orderbook.{}.{}", depth, symbol),
                format!("publicTrade.{}", symbol),
            ],
        }
    }

    /// Same depth and topic kinds for another instrument
    pub fn for_symbol(&self, symbol: &str) -> Self {
        Self::new(symbol, self.depth)
    }

    pub fn subscribe_message(&self) -> String {
        json!({ "op": "subscribe", "args": self.topics }).to_string()
    }

    pub fn unsubscribe_message(&self) -> String {
        json!({ "op": "unsubscribe", "args": self.topics }).to_string()
    }
}

/// Application-level keep-alive
pub fn ping_message() -> String {
    json!({ "op": "ping" }).to_string()
}
