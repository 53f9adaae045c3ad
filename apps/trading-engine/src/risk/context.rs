//! Market context passed into risk strategy evaluations.
//!
//! Strategies are pure with respect to these inputs: everything a check
//! needs beyond its own configuration arrives in the context, so the same
//! strategy instance can evaluate any symbol.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::models::OrderSide;

/// Inputs for stop-loss and take-profit evaluation.
///
/// `side` is the side of the entry order: `Buy` means the position is
/// long and stops sit below the entry, targets above.
#[derive(Debug, Clone)]
pub struct ExitContext {
    /// Side of the entry order.
    pub side: OrderSide,
    /// When the position was opened.
    pub entered_at: DateTime<Utc>,
    /// Evaluation time.
    pub now: DateTime<Utc>,
    /// Current average true range, if the caller computes one.
    pub atr: Option<Decimal>,
    /// Reference stop price for risk/reward targets.
    pub reference_stop: Option<Decimal>,
}

impl ExitContext {
    /// Context for a position entered now on the given side.
    #[must_use]
    pub fn new(side: OrderSide) -> Self {
        let now = Utc::now();
        Self {
            side,
            entered_at: now,
            now,
            atr: None,
            reference_stop: None,
        }
    }

    /// Set the entry time.
    #[must_use]
    pub const fn entered_at(mut self, entered_at: DateTime<Utc>) -> Self {
        self.entered_at = entered_at;
        self
    }

    /// Set the evaluation time.
    #[must_use]
    pub const fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Provide an ATR reading.
    #[must_use]
    pub const fn with_atr(mut self, atr: Decimal) -> Self {
        self.atr = Some(atr);
        self
    }

    /// Provide the stop price risk/reward targets measure against.
    #[must_use]
    pub const fn with_reference_stop(mut self, stop: Decimal) -> Self {
        self.reference_stop = Some(stop);
        self
    }
}

/// Inputs for position sizing.
#[derive(Debug, Clone)]
pub struct SizingContext {
    /// Intended entry price.
    pub entry_price: Decimal,
    /// Planned stop price, for risk-based sizing.
    pub stop_price: Option<Decimal>,
    /// Historical win rate as a fraction (0 to 1).
    pub win_rate: Option<Decimal>,
    /// Average win divided by average loss.
    pub payoff_ratio: Option<Decimal>,
    /// Realized volatility as a fraction per period.
    pub realized_volatility: Option<Decimal>,
    /// Largest historical per-share loss, as a positive magnitude.
    pub largest_loss_per_share: Option<Decimal>,
    /// Zero-based pyramiding level for scale-in entries.
    pub pyramid_level: u32,
}

impl SizingContext {
    /// Context for an entry at the given price.
    #[must_use]
    pub const fn new(entry_price: Decimal) -> Self {
        Self {
            entry_price,
            stop_price: None,
            win_rate: None,
            payoff_ratio: None,
            realized_volatility: None,
            largest_loss_per_share: None,
            pyramid_level: 0,
        }
    }

    /// Set the planned stop price.
    #[must_use]
    pub const fn with_stop(mut self, stop_price: Decimal) -> Self {
        self.stop_price = Some(stop_price);
        self
    }

    /// Set the historical edge statistics.
    #[must_use]
    pub const fn with_edge(mut self, win_rate: Decimal, payoff_ratio: Decimal) -> Self {
        self.win_rate = Some(win_rate);
        self.payoff_ratio = Some(payoff_ratio);
        self
    }

    /// Set realized volatility.
    #[must_use]
    pub const fn with_volatility(mut self, volatility: Decimal) -> Self {
        self.realized_volatility = Some(volatility);
        self
    }

    /// Set the largest historical per-share loss.
    #[must_use]
    pub const fn with_largest_loss(mut self, loss_per_share: Decimal) -> Self {
        self.largest_loss_per_share = Some(loss_per_share);
        self
    }

    /// Set the pyramiding level.
    #[must_use]
    pub const fn at_level(mut self, level: u32) -> Self {
        self.pyramid_level = level;
        self
    }
}

/// Inputs for circuit breaker evaluation.
#[derive(Debug, Clone)]
pub struct BreakerContext {
    /// Current account equity.
    pub equity: Decimal,
    /// Highest equity seen, for drawdown measurement.
    pub peak_equity: Decimal,
    /// Realized volatility as a fraction per period.
    pub realized_volatility: Option<Decimal>,
    /// Per-day return series, oldest first, as fractions.
    pub daily_returns: Vec<Decimal>,
    /// Evaluation time.
    pub now: DateTime<Utc>,
}

impl BreakerContext {
    /// Context from current and peak equity.
    #[must_use]
    pub fn new(equity: Decimal, peak_equity: Decimal) -> Self {
        Self {
            equity,
            peak_equity,
            realized_volatility: None,
            daily_returns: Vec::new(),
            now: Utc::now(),
        }
    }

    /// Set realized volatility.
    #[must_use]
    pub const fn with_volatility(mut self, volatility: Decimal) -> Self {
        self.realized_volatility = Some(volatility);
        self
    }

    /// Set the daily return series, oldest first.
    #[must_use]
    pub fn with_returns(mut self, daily_returns: Vec<Decimal>) -> Self {
        self.daily_returns = daily_returns;
        self
    }

    /// Set the evaluation time.
    #[must_use]
    pub const fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}
