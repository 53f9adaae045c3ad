//! Position sizing strategies.
//!
//! Each strategy turns portfolio value plus a [`SizingContext`] into a
//! notional position value; `share_count` derives whole shares by floor
//! division. A strategy that cannot size with the inputs given (missing
//! stop, no edge statistics) returns zero rather than guessing.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use super::context::SizingContext;

/// A position sizing rule.
pub trait PositionSizingStrategy: Send + Sync {
    /// Strategy variant label, for logging.
    fn name(&self) -> &'static str;

    /// Notional value to allocate to the position.
    fn position_value(&self, portfolio_value: Decimal, ctx: &SizingContext) -> Decimal;

    /// Whole shares affordable at `price`, by floor division.
    fn share_count(&self, portfolio_value: Decimal, price: Decimal, ctx: &SizingContext) -> u64 {
        if price <= Decimal::ZERO {
            return 0;
        }
        (self.position_value(portfolio_value, ctx) / price)
            .floor()
            .to_u64()
            .unwrap_or(0)
    }
}

/// A fixed notional amount, capped at the portfolio value.
#[derive(Debug, Clone)]
pub struct FixedAmountSizer {
    amount: Decimal,
}

impl FixedAmountSizer {
    /// Allocate `amount` per position.
    #[must_use]
    pub const fn new(amount: Decimal) -> Self {
        Self { amount }
    }
}

impl PositionSizingStrategy for FixedAmountSizer {
    fn name(&self) -> &'static str {
        "fixed_amount"
    }

    fn position_value(&self, portfolio_value: Decimal, _ctx: &SizingContext) -> Decimal {
        self.amount.min(portfolio_value).max(Decimal::ZERO)
    }
}

/// A fixed fraction of portfolio value.
#[derive(Debug, Clone)]
pub struct FixedPercentSizer {
    percent: Decimal,
}

impl FixedPercentSizer {
    /// Allocate `percent` of the portfolio, e.g. `0.10` for 10%.
    #[must_use]
    pub const fn new(percent: Decimal) -> Self {
        Self { percent }
    }
}

impl PositionSizingStrategy for FixedPercentSizer {
    fn name(&self) -> &'static str {
        "fixed_percent"
    }

    fn position_value(&self, portfolio_value: Decimal, _ctx: &SizingContext) -> Decimal {
        (portfolio_value * self.percent).max(Decimal::ZERO)
    }
}

/// Sizes so the entry-to-stop distance risks a fixed fraction of the
/// portfolio.
///
/// With risk budget `portfolio * risk_percent` and per-share risk
/// `|entry - stop|`, the position holds `budget / per_share_risk` shares.
/// Requires a stop in the context; returns zero without one.
#[derive(Debug, Clone)]
pub struct RiskBasedSizer {
    risk_percent: Decimal,
}

impl RiskBasedSizer {
    /// Risk `risk_percent` of the portfolio per position.
    #[must_use]
    pub const fn new(risk_percent: Decimal) -> Self {
        Self { risk_percent }
    }
}

impl PositionSizingStrategy for RiskBasedSizer {
    fn name(&self) -> &'static str {
        "risk_based"
    }

    fn position_value(&self, portfolio_value: Decimal, ctx: &SizingContext) -> Decimal {
        let Some(stop) = ctx.stop_price else {
            return Decimal::ZERO;
        };
        let per_share_risk = (ctx.entry_price - stop).abs();
        if per_share_risk <= Decimal::ZERO || ctx.entry_price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let budget = portfolio_value * self.risk_percent;
        let shares = budget / per_share_risk;
        (shares * ctx.entry_price).min(portfolio_value)
    }
}

/// Kelly-fraction sizing from historical win rate and payoff ratio.
///
/// The raw fraction `f = w - (1 - w) / r` is scaled down (half-Kelly is
/// common) and capped. A non-positive edge sizes to zero.
#[derive(Debug, Clone)]
pub struct KellySizer {
    scaling: Decimal,
    max_fraction: Decimal,
}

impl KellySizer {
    /// Scale the raw Kelly fraction by `scaling` and cap the result at
    /// `max_fraction` of the portfolio.
    #[must_use]
    pub const fn new(scaling: Decimal, max_fraction: Decimal) -> Self {
        Self {
            scaling,
            max_fraction,
        }
    }
}

impl PositionSizingStrategy for KellySizer {
    fn name(&self) -> &'static str {
        "kelly"
    }

    fn position_value(&self, portfolio_value: Decimal, ctx: &SizingContext) -> Decimal {
        let (Some(win_rate), Some(payoff)) = (ctx.win_rate, ctx.payoff_ratio) else {
            return Decimal::ZERO;
        };
        if payoff <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let raw = win_rate - (Decimal::ONE - win_rate) / payoff;
        if raw <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let fraction = (raw * self.scaling).min(self.max_fraction);
        portfolio_value * fraction
    }
}

/// Scales a base allocation inversely with realized volatility.
///
/// Allocation is `base * (target_vol / realized_vol)`, capped at
/// `max_percent`. Calmer markets size up, stressed markets size down.
#[derive(Debug, Clone)]
pub struct VolatilityScaledSizer {
    target_volatility: Decimal,
    base_percent: Decimal,
    max_percent: Decimal,
}

impl VolatilityScaledSizer {
    /// Scale `base_percent` toward `target_volatility`, never exceeding
    /// `max_percent` of the portfolio.
    #[must_use]
    pub const fn new(target_volatility: Decimal, base_percent: Decimal, max_percent: Decimal) -> Self {
        Self {
            target_volatility,
            base_percent,
            max_percent,
        }
    }
}

impl PositionSizingStrategy for VolatilityScaledSizer {
    fn name(&self) -> &'static str {
        "volatility_scaled"
    }

    fn position_value(&self, portfolio_value: Decimal, ctx: &SizingContext) -> Decimal {
        let Some(realized) = ctx.realized_volatility else {
            return Decimal::ZERO;
        };
        if realized <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let fraction = (self.base_percent * self.target_volatility / realized).min(self.max_percent);
        portfolio_value * fraction
    }
}

/// Optimal-f sizing from the largest historical per-share loss.
///
/// Holds `portfolio * f / largest_loss_per_share` shares, so one repeat
/// of the worst historical loss costs `f` of the portfolio. Requires the
/// loss magnitude in the context; returns zero without one.
#[derive(Debug, Clone)]
pub struct OptimalFSizer {
    f: Decimal,
}

impl OptimalFSizer {
    /// Size with optimal fraction `f`.
    #[must_use]
    pub const fn new(f: Decimal) -> Self {
        Self { f }
    }
}

impl PositionSizingStrategy for OptimalFSizer {
    fn name(&self) -> &'static str {
        "optimal_f"
    }

    fn position_value(&self, portfolio_value: Decimal, ctx: &SizingContext) -> Decimal {
        let Some(largest_loss) = ctx.largest_loss_per_share else {
            return Decimal::ZERO;
        };
        if largest_loss <= Decimal::ZERO || ctx.entry_price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let shares = portfolio_value * self.f / largest_loss;
        (shares * ctx.entry_price).min(portfolio_value)
    }
}

/// Decaying allocation for scale-in entries.
///
/// Level zero gets `base_percent` of the portfolio; each later level is
/// multiplied by `decay`. Levels at or beyond `max_levels` size to zero.
#[derive(Debug, Clone)]
pub struct PyramidingSizer {
    base_percent: Decimal,
    decay: Decimal,
    max_levels: u32,
}

impl PyramidingSizer {
    /// Start at `base_percent` and shrink by `decay` per level, up to
    /// `max_levels` entries.
    #[must_use]
    pub const fn new(base_percent: Decimal, decay: Decimal, max_levels: u32) -> Self {
        Self {
            base_percent,
            decay,
            max_levels,
        }
    }
}

impl PositionSizingStrategy for PyramidingSizer {
    fn name(&self) -> &'static str {
        "pyramiding"
    }

    fn position_value(&self, portfolio_value: Decimal, ctx: &SizingContext) -> Decimal {
        if ctx.pyramid_level >= self.max_levels {
            return Decimal::ZERO;
        }
        let mut fraction = self.base_percent;
        for _ in 0..ctx.pyramid_level {
            fraction *= self.decay;
        }
        portfolio_value * fraction
    }
}
