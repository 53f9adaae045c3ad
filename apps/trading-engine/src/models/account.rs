//! Account snapshot and market-data types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Point-in-time snapshot of account funds and concentration.
///
/// Written only by the fund-refresh routine; read by the risk manager,
/// fund monitor, and confirmation tiering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    /// Free cash.
    pub cash: Decimal,
    /// Buying power (cash plus available margin).
    pub buying_power: Decimal,
    /// Total account equity.
    pub equity: Decimal,
    /// Margin currently in use.
    pub margin_used: Decimal,
    /// Margin still available.
    pub margin_available: Decimal,
    /// Position weight by symbol (fraction of equity).
    pub position_weights: HashMap<String, Decimal>,
    /// Position weight by sector (fraction of equity).
    pub sector_weights: HashMap<String, Decimal>,
    /// Snapshot timestamp.
    pub taken_at: DateTime<Utc>,
}

impl AccountSnapshot {
    /// An empty snapshot with zeroed funds.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            cash: Decimal::ZERO,
            buying_power: Decimal::ZERO,
            equity: Decimal::ZERO,
            margin_used: Decimal::ZERO,
            margin_available: Decimal::ZERO,
            position_weights: HashMap::new(),
            sector_weights: HashMap::new(),
            taken_at: Utc::now(),
        }
    }

    /// Margin used as a fraction of equity (zero when equity is zero).
    #[must_use]
    pub fn margin_usage(&self) -> Decimal {
        if self.equity.is_zero() {
            return Decimal::ZERO;
        }
        self.margin_used / self.equity
    }

    /// Weight of a single symbol, zero if not held.
    #[must_use]
    pub fn weight_of(&self, symbol: &str) -> Decimal {
        self.position_weights
            .get(symbol)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }
}

impl Default for AccountSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

/// A market-data quote for a single symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    /// Quoted symbol.
    pub symbol: String,
    /// Last traded price.
    pub last: Decimal,
    /// Best bid.
    pub bid: Decimal,
    /// Best ask.
    pub ask: Decimal,
    /// Session volume.
    pub volume: Decimal,
    /// Quote timestamp.
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    /// Midpoint of bid and ask; falls back to last when one side is empty.
    #[must_use]
    pub fn mid(&self) -> Decimal {
        if self.bid.is_zero() || self.ask.is_zero() {
            return self.last;
        }
        (self.bid + self.ask) / Decimal::from(2)
    }
}
