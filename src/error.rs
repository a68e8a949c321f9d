//! Error types for the trader

use thiserror::Error;

/// Trader errors
#[derive(Error, Debug)]
pub enum TraderError {
    #[error("WebSocket connection error: {0}")]
    WebSocketConnection(String),

    #[error("WebSocket message error: {0}")]
    WebSocketMessage(String),

    #[error("Failed to parse message: {0}")]
    ParseError(String),

    #[error("Order book error: {0}")]
    OrderBookError(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Venue rejected request (retCode {code}): {message}")]
    VenueRejected { code: i64, message: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Missing API credentials: set BYBIT_API_KEY and BYBIT_API_SECRET")]
    MissingCredentials,

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Request refused: {0}")]
    Refused(String),

    #[error("Heartbeat timeout after {missed} missed pongs")]
    HeartbeatTimeout { missed: u32 },

    #[error("Shutdown requested")]
    Shutdown,
}

impl From<tokio_tungstenite::tungstenite::Error> for TraderError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        TraderError::WebSocketConnection(err.to_string())
    }
}

impl From<serde_json::Error> for TraderError {
    fn from(err: serde_json::Error) -> Self {
        TraderError::ParseError(err.to_string())
    }
}

impl From<reqwest::Error> for TraderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return TraderError::ParseError(err.to_string());
        }
        match err.status() {
            Some(status) => TraderError::HttpStatus {
                status: status.as_u16(),
                body: err.to_string(),
            },
            None => TraderError::Transport(err.to_string()),
        }
    }
}

impl From<config::ConfigError> for TraderError {
    fn from(err: config::ConfigError) -> Self {
        TraderError::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TraderError>;
