//! Prometheus counters exposed on `/metrics`

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

use crate::error::{Result, TraderError};

/// Process counters registered on a private registry
#[derive(Clone)]
pub struct Telemetry {
    registry: Registry,
    pub frames_received: IntCounter,
    pub frames_dropped: IntCounter,
    pub reconnects: IntCounter,
    pub heartbeat_timeouts: IntCounter,
    pub orders_submitted: IntCounter,
    pub orders_rejected: IntCounter,
    pub orders_failed: IntCounter,
    pub signals_vetoed: IntCounter,
    /// 1 while a position is open
    pub position_open: IntGauge,
}

impl Telemetry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("flow_trader".to_string()), None)
            .map_err(metrics_error)?;

        let counter = |name: &str, help: &str| -> Result<IntCounter> {
            let counter = IntCounter::new(name, help).map_err(metrics_error)?;
            registry
                .register(Box::new(counter.clone()))
                .map_err(metrics_error)?;
            Ok(counter)
        };

        let frames_received = counter("frames_received_total", "Stream frames received")?;
        let frames_dropped = counter(
            "frames_dropped_total",
            "Stream frames dropped as malformed, stale or for another symbol",
        )?;
        let reconnects = counter("reconnects_total", "Stream reconnect attempts")?;
        let heartbeat_timeouts = counter(
            "heartbeat_timeouts_total",
            "Sessions closed after missed pongs",
        )?;
        let orders_submitted = counter("orders_submitted_total", "Orders accepted by the venue")?;
        let orders_rejected = counter(
            "orders_rejected_total",
            "Orders rejected with a non-zero retCode",
        )?;
        let orders_failed = counter(
            "orders_failed_total",
            "Orders abandoned after transport failures",
        )?;
        let signals_vetoed = counter(
            "signals_vetoed_total",
            "Signals degraded to Hold by book confirmation",
        )?;

        let position_open =
            IntGauge::new("position_open", "Whether a position is open").map_err(metrics_error)?;
        registry
            .register(Box::new(position_open.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            frames_received,
            frames_dropped,
            reconnects,
            heartbeat_timeouts,
            orders_submitted,
            orders_rejected,
            orders_failed,
            signals_vetoed,
            position_open,
        })
    }

    /// Text exposition format
    pub fn encode(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| TraderError::SerializationError(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TraderError::SerializationError(e.to_string()))
    }
}

fn metrics_error(err: prometheus::Error) -> TraderError {
    TraderError::ConfigError(format!("metrics registration: {}", err))
}
