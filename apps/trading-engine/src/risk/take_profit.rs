//! Take-profit strategies.
//!
//! Mirrors the stop-loss family: one implementation per exit style behind
//! [`TakeProfitStrategy`], with `update` feeding running extrema into the
//! trailing variant.

use std::sync::RwLock;

use chrono::Duration;
use rust_decimal::Decimal;

use crate::models::OrderSide;

use super::context::ExitContext;

/// A profit-taking exit rule.
pub trait TakeProfitStrategy: Send + Sync {
    /// Strategy variant label, for logging.
    fn name(&self) -> &'static str;

    /// The price at which profit should be taken.
    fn target_price(&self, entry: Decimal, ctx: &ExitContext) -> Decimal;

    /// Whether the current price has reached the target.
    fn should_take_profit(&self, entry: Decimal, current: Decimal, ctx: &ExitContext) -> bool {
        reached(ctx.side, current, self.target_price(entry, ctx))
    }

    /// Feed the latest price into running state. No-op for stateless
    /// strategies.
    fn update(&self, _current: Decimal) {}
}

/// True when `current` has reached the target for a position on `side`.
fn reached(side: OrderSide, current: Decimal, target: Decimal) -> bool {
    match side {
        OrderSide::Buy => current >= target,
        OrderSide::Sell => current <= target,
    }
}

/// Fixed percentage above (long) or below (short) the entry price.
#[derive(Debug, Clone)]
pub struct PercentTarget {
    percent: Decimal,
}

impl PercentTarget {
    /// Target `percent` away from entry, e.g. `0.10` for 10%.
    #[must_use]
    pub const fn new(percent: Decimal) -> Self {
        Self { percent }
    }
}

impl TakeProfitStrategy for PercentTarget {
    fn name(&self) -> &'static str {
        "percent_target"
    }

    fn target_price(&self, entry: Decimal, ctx: &ExitContext) -> Decimal {
        match ctx.side {
            OrderSide::Buy => entry * (Decimal::ONE + self.percent),
            OrderSide::Sell => entry * (Decimal::ONE - self.percent),
        }
    }
}

/// An absolute target price, independent of entry.
#[derive(Debug, Clone)]
pub struct FixedTarget {
    target: Decimal,
}

impl FixedTarget {
    /// Take profit at exactly `target`.
    #[must_use]
    pub const fn new(target: Decimal) -> Self {
        Self { target }
    }
}

impl TakeProfitStrategy for FixedTarget {
    fn name(&self) -> &'static str {
        "fixed_target"
    }

    fn target_price(&self, _entry: Decimal, _ctx: &ExitContext) -> Decimal {
        self.target
    }
}

/// Trails the best price once an activation threshold is reached.
///
/// Until the best price seen clears `entry * (1 + activation)` (long) the
/// strategy does not trigger; after that it locks in profit by trailing
/// the watermark by `trail_percent`. Both watermarks are tracked so one
/// instance serves either side.
#[derive(Debug)]
pub struct TrailingTarget {
    activation_percent: Decimal,
    trail_percent: Decimal,
    high: RwLock<Option<Decimal>>,
    low: RwLock<Option<Decimal>>,
}

impl TrailingTarget {
    /// Activate `activation_percent` into profit, then trail by
    /// `trail_percent`.
    #[must_use]
    pub const fn new(activation_percent: Decimal, trail_percent: Decimal) -> Self {
        Self {
            activation_percent,
            trail_percent,
            high: RwLock::new(None),
            low: RwLock::new(None),
        }
    }

    /// Clear the watermarks, e.g. when the tracked position closes.
    pub fn reset(&self) {
        *write(&self.high) = None;
        *write(&self.low) = None;
    }

    fn activated(&self, entry: Decimal, side: OrderSide) -> bool {
        match side {
            OrderSide::Buy => read(&self.high)
                .is_some_and(|h| h >= entry * (Decimal::ONE + self.activation_percent)),
            OrderSide::Sell => read(&self.low)
                .is_some_and(|l| l <= entry * (Decimal::ONE - self.activation_percent)),
        }
    }
}

impl TakeProfitStrategy for TrailingTarget {
    fn name(&self) -> &'static str {
        "trailing_target"
    }

    fn target_price(&self, entry: Decimal, ctx: &ExitContext) -> Decimal {
        if !self.activated(entry, ctx.side) {
            return match ctx.side {
                OrderSide::Buy => entry * (Decimal::ONE + self.activation_percent),
                OrderSide::Sell => entry * (Decimal::ONE - self.activation_percent),
            };
        }
        match ctx.side {
            OrderSide::Buy => {
                let best = read(&self.high).unwrap_or(entry);
                best * (Decimal::ONE - self.trail_percent)
            }
            OrderSide::Sell => {
                let best = read(&self.low).unwrap_or(entry);
                best * (Decimal::ONE + self.trail_percent)
            }
        }
    }

    fn should_take_profit(&self, entry: Decimal, current: Decimal, ctx: &ExitContext) -> bool {
        if !self.activated(entry, ctx.side) {
            return false;
        }
        // Once trailing, the exit fires on a pullback from the watermark.
        match ctx.side {
            OrderSide::Buy => current <= self.target_price(entry, ctx),
            OrderSide::Sell => current >= self.target_price(entry, ctx),
        }
    }

    fn update(&self, current: Decimal) {
        let mut high = write(&self.high);
        *high = Some(high.map_or(current, |h| h.max(current)));
        drop(high);
        let mut low = write(&self.low);
        *low = Some(low.map_or(current, |l| l.min(current)));
    }
}

/// Target at a multiple of the risk taken, measured against the
/// reference stop in the context.
///
/// Without a reference stop the target degrades to the entry and the
/// check reports no exit.
#[derive(Debug, Clone)]
pub struct RiskRewardTarget {
    multiple: Decimal,
}

impl RiskRewardTarget {
    /// Target `multiple` times the entry-to-stop distance into profit.
    #[must_use]
    pub const fn new(multiple: Decimal) -> Self {
        Self { multiple }
    }
}

impl TakeProfitStrategy for RiskRewardTarget {
    fn name(&self) -> &'static str {
        "risk_reward_target"
    }

    fn target_price(&self, entry: Decimal, ctx: &ExitContext) -> Decimal {
        let Some(stop) = ctx.reference_stop else {
            return entry;
        };
        let risk = (entry - stop).abs();
        match ctx.side {
            OrderSide::Buy => entry + risk * self.multiple,
            OrderSide::Sell => entry - risk * self.multiple,
        }
    }

    fn should_take_profit(&self, entry: Decimal, current: Decimal, ctx: &ExitContext) -> bool {
        if ctx.reference_stop.is_none() {
            return false;
        }
        reached(ctx.side, current, self.target_price(entry, ctx))
    }
}

/// Exit a profitable position after a maximum holding period.
///
/// The price level is nominal (the entry itself); the trigger is elapsed
/// time plus the position being in profit at evaluation.
#[derive(Debug, Clone)]
pub struct TimeTarget {
    max_hold: Duration,
}

impl TimeTarget {
    /// Take profit once held for `max_hold` while in profit.
    #[must_use]
    pub const fn new(max_hold: Duration) -> Self {
        Self { max_hold }
    }
}

impl TakeProfitStrategy for TimeTarget {
    fn name(&self) -> &'static str {
        "time_target"
    }

    fn target_price(&self, entry: Decimal, _ctx: &ExitContext) -> Decimal {
        entry
    }

    fn should_take_profit(&self, entry: Decimal, current: Decimal, ctx: &ExitContext) -> bool {
        if ctx.now - ctx.entered_at < self.max_hold {
            return false;
        }
        match ctx.side {
            OrderSide::Buy => current > entry,
            OrderSide::Sell => current < entry,
        }
    }
}

/// Combines child targets; any child triggering takes the profit.
///
/// The reported target is the nearest of the children: the lowest for a
/// long, the highest for a short.
pub struct CompositeTarget {
    children: Vec<Box<dyn TakeProfitStrategy>>,
}

impl CompositeTarget {
    /// Compose the given child targets.
    #[must_use]
    pub fn new(children: Vec<Box<dyn TakeProfitStrategy>>) -> Self {
        Self { children }
    }
}

impl TakeProfitStrategy for CompositeTarget {
    fn name(&self) -> &'static str {
        "composite_target"
    }

    fn target_price(&self, entry: Decimal, ctx: &ExitContext) -> Decimal {
        let targets = self.children.iter().map(|c| c.target_price(entry, ctx));
        let nearest = match ctx.side {
            OrderSide::Buy => targets.min(),
            OrderSide::Sell => targets.max(),
        };
        nearest.unwrap_or(entry)
    }

    fn should_take_profit(&self, entry: Decimal, current: Decimal, ctx: &ExitContext) -> bool {
        self.children
            .iter()
            .any(|c| c.should_take_profit(entry, current, ctx))
    }

    fn update(&self, current: Decimal) {
        for child in &self.children {
            child.update(current);
        }
    }
}

impl std::fmt::Debug for CompositeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeTarget")
            .field("children", &self.children.len())
            .finish()
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
