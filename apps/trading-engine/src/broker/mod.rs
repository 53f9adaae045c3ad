//! Broker capability abstraction.
//!
//! The engine talks to every venue through [`BrokerClient`]; concrete
//! adapters (the in-process [`paper::PaperBroker`], real integrations out
//! of tree) are interchangeable behind `Arc<dyn BrokerClient>`. The order
//! manager provides per-order serialization; adapters only need to
//! tolerate concurrent calls for *different* orders.

pub mod paper;
pub mod retry;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{AccountSnapshot, Order, OrderStatus, Position, Quote};

pub use paper::{FillMode, PaperBroker};
pub use retry::{ExponentialBackoff, RetryPolicy};

/// Errors surfaced by broker adapters.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// No session with the venue; fatal until `connect` succeeds.
    #[error("broker not connected")]
    NotConnected,

    /// The venue rejected the order. Terminal for that order; the venue's
    /// message is preserved verbatim.
    #[error("order rejected by venue: {reason}")]
    Rejected {
        /// Venue-supplied rejection reason.
        reason: String,
    },

    /// Temporary failure (timeout, throttle, brief outage). Retryable.
    #[error("transient broker failure: {detail}")]
    Transient {
        /// Failure detail.
        detail: String,
    },

    /// The venue does not know this order ID.
    #[error("order not found at broker: {broker_order_id}")]
    OrderNotFound {
        /// Broker-assigned order ID.
        broker_order_id: String,
    },

    /// The order is no longer in a cancelable state.
    #[error("order not cancelable: {broker_order_id}")]
    NotCancelable {
        /// Broker-assigned order ID.
        broker_order_id: String,
    },

    /// The adapter refused the order before sending it to the venue.
    #[error("invalid order: {reason}")]
    InvalidOrder {
        /// Refusal reason.
        reason: String,
    },
}

impl BrokerError {
    /// Returns true if the operation may be retried as-is.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Capability interface every broker adapter implements.
///
/// `place_order` must be safe to call concurrently with `cancel_order` or
/// `get_order` for different orders. All methods take `&self`; adapters
/// use interior mutability so one instance can be shared across loops.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Establish a session with the venue.
    async fn connect(&self) -> Result<(), BrokerError>;

    /// Tear down the session.
    async fn disconnect(&self) -> Result<(), BrokerError>;

    /// Returns true if a session is currently established.
    fn is_connected(&self) -> bool;

    /// Submit an order; returns the broker-assigned order ID.
    async fn place_order(&self, order: &Order) -> Result<String, BrokerError>;

    /// Cancel a working order by broker-assigned ID.
    async fn cancel_order(&self, broker_order_id: &str) -> Result<(), BrokerError>;

    /// Fetch current state of one order by broker-assigned ID.
    async fn get_order(&self, broker_order_id: &str) -> Result<Order, BrokerError>;

    /// Fetch all orders, optionally filtered by status.
    async fn get_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>, BrokerError>;

    /// Fetch open positions keyed by symbol.
    async fn get_positions(&self) -> Result<HashMap<String, Position>, BrokerError>;

    /// Fetch the account snapshot (also serves as the health probe).
    async fn get_account(&self) -> Result<AccountSnapshot, BrokerError>;

    /// Fetch a quote for one symbol.
    async fn get_market_data(&self, symbol: &str) -> Result<Quote, BrokerError>;

    /// Adapter name for logging and metrics labels.
    fn name(&self) -> &'static str;
}
