//! Core data model shared across the engine.

pub mod account;
pub mod order;
pub mod position;
pub mod signal;
pub mod trade;

pub use account::{AccountSnapshot, Quote};
pub use order::{
    Order, OrderEvent, OrderKind, OrderSide, OrderStatus, OrderValidationError, TimeInForce,
};
pub use position::{Position, PositionBook};
pub use signal::{Signal, SignalBatch};
pub use trade::TradeRecord;
