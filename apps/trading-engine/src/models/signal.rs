//! Strategy signal types consumed by the signal executor.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::order::OrderSide;

/// One symbol's entry in a signal batch.
///
/// A signal may carry explicit buy/sell flags, a signed strength, or both.
/// Explicit flags win; a conflicting pair (both set) is not actionable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Signalled symbol.
    pub symbol: String,
    /// Explicit buy flag.
    #[serde(default)]
    pub buy: bool,
    /// Explicit sell flag.
    #[serde(default)]
    pub sell: bool,
    /// Signed strength: positive buys, negative sells.
    #[serde(default)]
    pub strength: Option<Decimal>,
    /// Reference price at signal time.
    pub reference_price: Decimal,
}

impl Signal {
    /// Resolve the signal to an order side, if actionable.
    #[must_use]
    pub fn direction(&self) -> Option<OrderSide> {
        match (self.buy, self.sell) {
            (true, false) => Some(OrderSide::Buy),
            (false, true) => Some(OrderSide::Sell),
            (true, true) => None,
            (false, false) => self.strength.and_then(|s| {
                if s > Decimal::ZERO {
                    Some(OrderSide::Buy)
                } else if s < Decimal::ZERO {
                    Some(OrderSide::Sell)
                } else {
                    None
                }
            }),
        }
    }
}

/// One evaluation cycle's worth of signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalBatch {
    /// When the producing strategy evaluated.
    pub evaluated_at: DateTime<Utc>,
    /// Per-symbol signals.
    pub signals: Vec<Signal>,
}

impl SignalBatch {
    /// Create a batch evaluated now.
    #[must_use]
    pub fn new(signals: Vec<Signal>) -> Self {
        Self {
            evaluated_at: Utc::now(),
            signals,
        }
    }

    /// Signals that resolve to a tradeable direction.
    pub fn actionable(&self) -> impl Iterator<Item = (&Signal, OrderSide)> {
        self.signals
            .iter()
            .filter_map(|s| s.direction().map(|side| (s, side)))
    }
}
