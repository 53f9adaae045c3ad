//! Engine-wide error taxonomy.
//!
//! Per-module errors stay close to their modules ([`BrokerError`],
//! [`TrackerError`], [`OrderValidationError`]); this module rolls them up
//! into [`EngineError`] and classifies every error into an [`ErrorKind`]
//! that drives handling policy: validation and venue rejections are
//! terminal for the order, transient faults are retried with backoff, and
//! risk breaches are recorded and returned to the caller.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::broker::BrokerError;
use crate::lifecycle::TrackerError;
use crate::live::confirmation::ConfirmationError;
use crate::models::OrderValidationError;
use crate::risk::events::EventError;
use crate::risk::params::ParamError;

/// Broad error classification used for handling policy and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Not connected, or reconnect attempts exhausted.
    Connectivity,
    /// The venue refused the order. Terminal, never retried.
    VenueRejection,
    /// Timeout or temporary unavailability. Retried with bounded attempts.
    TransientIo,
    /// Malformed input caught before anything was enqueued.
    Validation,
    /// A risk control refused the action.
    RiskBreach,
}

impl ErrorKind {
    /// Stable reason string for logs and journal entries.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Connectivity => "CONNECTIVITY",
            Self::VenueRejection => "VENUE_REJECTION",
            Self::TransientIo => "TRANSIENT_IO",
            Self::Validation => "VALIDATION",
            Self::RiskBreach => "RISK_BREACH",
        }
    }

    /// Whether errors of this kind are worth retrying (after backoff or
    /// reconnect) rather than surfacing immediately.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Connectivity | Self::TransientIo)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason())
    }
}

/// Top-level error for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Broker capability failure.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Lifecycle tracker refused the operation.
    #[error(transparent)]
    Tracker(#[from] TrackerError),

    /// Order parameters failed validation; nothing was enqueued.
    #[error(transparent)]
    InvalidOrder(#[from] OrderValidationError),

    /// A risk parameter update failed validation.
    #[error(transparent)]
    Param(#[from] ParamError),

    /// A risk event operation referenced an unknown event.
    #[error(transparent)]
    Event(#[from] EventError),

    /// Confirmation round-trip failure.
    #[error(transparent)]
    Confirmation(#[from] ConfirmationError),

    /// A strategy name was looked up that no family registered.
    #[error("unknown {family} strategy: {name}")]
    UnknownStrategy {
        /// Strategy family searched, e.g. `stop-loss`.
        family: &'static str,
        /// The unregistered name.
        name: String,
    },

    /// A risk check refused the order.
    #[error("risk check rejected order: {reason}")]
    RiskRejected {
        /// Human-readable refusal reason.
        reason: String,
    },

    /// Trading is halted engine-wide.
    #[error("trading halted: {reason}")]
    TradingHalted {
        /// Why trading is halted.
        reason: String,
    },

    /// Bounded submission retries were exhausted.
    #[error("submission retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Attempts made before giving up.
        attempts: u32,
        /// Display of the final attempt's error.
        last_error: String,
    },

    /// The submission queue is closed (engine shutting down).
    #[error("order queue is closed")]
    QueueClosed,

    /// Referenced order is not known to the engine.
    #[error("order not found: {order_id}")]
    OrderNotFound {
        /// The unknown order ID.
        order_id: String,
    },
}

impl EngineError {
    /// Classify this error for handling and logging.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Broker(e) => match e {
                BrokerError::NotConnected => ErrorKind::Connectivity,
                BrokerError::Transient { .. } => ErrorKind::TransientIo,
                BrokerError::Rejected { .. } | BrokerError::NotCancelable { .. } => {
                    ErrorKind::VenueRejection
                }
                BrokerError::OrderNotFound { .. } | BrokerError::InvalidOrder { .. } => {
                    ErrorKind::Validation
                }
            },
            Self::Tracker(_)
            | Self::InvalidOrder(_)
            | Self::Param(_)
            | Self::Event(_)
            | Self::Confirmation(_)
            | Self::UnknownStrategy { .. }
            | Self::OrderNotFound { .. } => ErrorKind::Validation,
            Self::RiskRejected { .. } | Self::TradingHalted { .. } => ErrorKind::RiskBreach,
            Self::RetriesExhausted { .. } | Self::QueueClosed => ErrorKind::Connectivity,
        }
    }
}
