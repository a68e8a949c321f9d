//! Order execution
//!
//! Signed REST submission with a shared retry policy, and the coordinator
//! that owns the single open position.

mod coordinator;
mod position;
mod rest;
mod retry;
mod signer;

pub use coordinator::{ExecutionCoordinator, ExecutionOutcome, ExitRule, SkipReason};
pub use position::{PositionSide, PositionState};
pub use rest::{BybitRestClient, OrderAck, OrderRequest, OrderSide, OrderType, VenueClient};
pub use retry::RetryPolicy;
pub use signer::{canonical_query, hmac_hex, RequestSigner};

#[cfg(test)]
pub use rest::MockVenueClient;
