// Allow unwrap/expect and verbose test patterns in test code
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Trading engine core library.
//!
//! Converts strategy signals into sized, risk-checked orders and drives
//! them through an unreliable broker connection without losing track of
//! order state.
//!
//! # Layout
//!
//! - [`models`]: orders, positions, account snapshots, signals, trades
//! - [`broker`]: the venue capability trait, a paper venue, retry policy
//! - [`lifecycle`]: order state tracking with monotonic transitions
//! - [`connection`]: heartbeat, latency probes, reconnect with backoff
//! - [`orders`]: FIFO submission queue, bounded retry, reconciliation
//! - [`risk`]: the risk facade - stops, targets, sizing, circuit
//!   breakers, portfolio caps, risk events, runtime parameters
//! - [`live`]: live-trading coordinators - position close-out, trade
//!   limits, order confirmation, emergency stop, fund monitoring
//! - [`executor`]: the per-cycle signal execution pipeline
//! - [`journal`]: append-only trade journal
//! - [`config`]: YAML configuration with environment interpolation
//! - [`observability`]: tracing and Prometheus metrics setup

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod broker;
pub mod config;
pub mod connection;
pub mod error;
pub mod executor;
pub mod journal;
pub mod lifecycle;
pub mod live;
pub mod models;
pub mod observability;
pub mod orders;
pub mod risk;

pub use broker::{BrokerClient, BrokerError, FillMode, PaperBroker, RetryPolicy};
pub use config::{ConfigError, EngineConfig, TradingMode, load_config, load_config_from_str};
pub use connection::{ConnectionHealth, ConnectionMonitor, ConnectionState, MonitorConfig};
pub use error::{EngineError, ErrorKind};
pub use executor::{CycleReport, ExecutorConfig, SignalExecutor, SignalOutcome};
pub use journal::{JsonlJournal, MemoryJournal, TradeJournal};
pub use lifecycle::{OrderTracker, TrackerError};
pub use live::{
    ConfirmationManager, ConfirmationOutcome, EmergencyStop, FundMonitor, PositionManager,
    RiskTier, TradeLimiter,
};
pub use models::{
    AccountSnapshot, Order, OrderSide, OrderStatus, Position, PositionBook, Quote, Signal,
    SignalBatch,
};
pub use orders::{OrderManager, OrderManagerConfig};
pub use risk::{RiskEvent, RiskEventKind, RiskLimits, RiskManager, RiskSeverity};
