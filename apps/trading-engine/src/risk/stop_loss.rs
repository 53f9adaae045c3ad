//! Stop-loss strategies.
//!
//! One implementation per exit style, all behind [`StopLossStrategy`].
//! Stateful variants (trailing, volatility) track running extrema through
//! `update`, which must be called on every price tick before the stop
//! check; otherwise the check evaluates against stale extrema.

use std::collections::VecDeque;
use std::sync::RwLock;

use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};

use crate::models::OrderSide;

use super::context::ExitContext;

/// A stop-loss exit rule.
pub trait StopLossStrategy: Send + Sync {
    /// Strategy variant label, for logging.
    fn name(&self) -> &'static str;

    /// The price at which the position should be stopped out.
    fn stop_price(&self, entry: Decimal, ctx: &ExitContext) -> Decimal;

    /// Whether the current price has breached the stop.
    fn should_stop_out(&self, entry: Decimal, current: Decimal, ctx: &ExitContext) -> bool {
        crossed(ctx.side, current, self.stop_price(entry, ctx))
    }

    /// Feed the latest price into running state. No-op for stateless
    /// strategies.
    fn update(&self, _current: Decimal) {}
}

/// True when `current` has crossed the stop for a position on `side`.
fn crossed(side: OrderSide, current: Decimal, stop: Decimal) -> bool {
    match side {
        OrderSide::Buy => current <= stop,
        OrderSide::Sell => current >= stop,
    }
}

/// Fixed percentage below (long) or above (short) the entry price.
#[derive(Debug, Clone)]
pub struct PercentStop {
    percent: Decimal,
}

impl PercentStop {
    /// Stop `percent` away from entry, e.g. `0.05` for 5%.
    #[must_use]
    pub const fn new(percent: Decimal) -> Self {
        Self { percent }
    }
}

impl StopLossStrategy for PercentStop {
    fn name(&self) -> &'static str {
        "percent_stop"
    }

    fn stop_price(&self, entry: Decimal, ctx: &ExitContext) -> Decimal {
        match ctx.side {
            OrderSide::Buy => entry * (Decimal::ONE - self.percent),
            OrderSide::Sell => entry * (Decimal::ONE + self.percent),
        }
    }
}

/// A multiple of the average true range away from entry.
///
/// Without an ATR in the context the stop cannot be computed: the stop
/// price degrades to the entry and the check reports no stop-out.
#[derive(Debug, Clone)]
pub struct AtrStop {
    multiplier: Decimal,
}

impl AtrStop {
    /// Stop `multiplier` ATRs away from entry.
    #[must_use]
    pub const fn new(multiplier: Decimal) -> Self {
        Self { multiplier }
    }
}

impl StopLossStrategy for AtrStop {
    fn name(&self) -> &'static str {
        "atr_stop"
    }

    fn stop_price(&self, entry: Decimal, ctx: &ExitContext) -> Decimal {
        let Some(atr) = ctx.atr else {
            return entry;
        };
        let distance = atr * self.multiplier;
        match ctx.side {
            OrderSide::Buy => entry - distance,
            OrderSide::Sell => entry + distance,
        }
    }

    fn should_stop_out(&self, entry: Decimal, current: Decimal, ctx: &ExitContext) -> bool {
        if ctx.atr.is_none() {
            return false;
        }
        crossed(ctx.side, current, self.stop_price(entry, ctx))
    }
}

/// Exit after a maximum holding period, regardless of price.
///
/// The price level is nominal (the entry itself); the trigger is elapsed
/// time between `entered_at` and `now` in the context.
#[derive(Debug, Clone)]
pub struct TimeStop {
    max_hold: Duration,
}

impl TimeStop {
    /// Stop out once the position has been held for `max_hold`.
    #[must_use]
    pub const fn new(max_hold: Duration) -> Self {
        Self { max_hold }
    }
}

impl StopLossStrategy for TimeStop {
    fn name(&self) -> &'static str {
        "time_stop"
    }

    fn stop_price(&self, entry: Decimal, _ctx: &ExitContext) -> Decimal {
        entry
    }

    fn should_stop_out(&self, _entry: Decimal, _current: Decimal, ctx: &ExitContext) -> bool {
        ctx.now - ctx.entered_at >= self.max_hold
    }
}

/// Trails the best price seen since entry by a fixed percentage.
///
/// Tracks both a high and a low watermark so one instance serves either
/// side; the side in the context selects which watermark applies. Before
/// the first `update` the stop falls back to the entry-based percent.
#[derive(Debug)]
pub struct TrailingStop {
    percent: Decimal,
    high: RwLock<Option<Decimal>>,
    low: RwLock<Option<Decimal>>,
}

impl TrailingStop {
    /// Trail `percent` behind the best price seen.
    #[must_use]
    pub const fn new(percent: Decimal) -> Self {
        Self {
            percent,
            high: RwLock::new(None),
            low: RwLock::new(None),
        }
    }

    /// Clear the watermarks, e.g. when the tracked position closes.
    pub fn reset(&self) {
        *write(&self.high) = None;
        *write(&self.low) = None;
    }

    fn high_watermark(&self) -> Option<Decimal> {
        *read(&self.high)
    }

    fn low_watermark(&self) -> Option<Decimal> {
        *read(&self.low)
    }
}

impl StopLossStrategy for TrailingStop {
    fn name(&self) -> &'static str {
        "trailing_stop"
    }

    fn stop_price(&self, entry: Decimal, ctx: &ExitContext) -> Decimal {
        match ctx.side {
            OrderSide::Buy => {
                let best = self.high_watermark().unwrap_or(entry).max(entry);
                best * (Decimal::ONE - self.percent)
            }
            OrderSide::Sell => {
                let best = self.low_watermark().unwrap_or(entry).min(entry);
                best * (Decimal::ONE + self.percent)
            }
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

/// Stop at a multiple of the rolling standard deviation of recent prices.
///
/// `update` feeds the rolling window; with fewer than two samples the
/// deviation is undefined and the check reports no stop-out.
#[derive(Debug)]
pub struct VolatilityStop {
    multiplier: Decimal,
    window: usize,
    prices: RwLock<VecDeque<Decimal>>,
}

impl VolatilityStop {
    /// Stop `multiplier` standard deviations from entry, measured over
    /// the last `window` updates.
    #[must_use]
    pub fn new(multiplier: Decimal, window: usize) -> Self {
        Self {
            multiplier,
            window: window.max(2),
            prices: RwLock::new(VecDeque::new()),
        }
    }

    fn deviation(&self) -> Option<Decimal> {
        let prices = read(&self.prices);
        if prices.len() < 2 {
            return None;
        }
        let n = Decimal::from(prices.len());
        let mean = prices.iter().copied().sum::<Decimal>() / n;
        let variance = prices
            .iter()
            .map(|p| (*p - mean) * (*p - mean))
            .sum::<Decimal>()
            / n;
        Some(decimal_sqrt(variance))
    }
}

impl StopLossStrategy for VolatilityStop {
    fn name(&self) -> &'static str {
        "volatility_stop"
    }

    fn stop_price(&self, entry: Decimal, ctx: &ExitContext) -> Decimal {
        let Some(sigma) = self.deviation() else {
            return entry;
        };
        let distance = sigma * self.multiplier;
        match ctx.side {
            OrderSide::Buy => entry - distance,
            OrderSide::Sell => entry + distance,
        }
    }

    fn should_stop_out(&self, entry: Decimal, current: Decimal, ctx: &ExitContext) -> bool {
        if self.deviation().is_none() {
            return false;
        }
        crossed(ctx.side, current, self.stop_price(entry, ctx))
    }

    fn update(&self, current: Decimal) {
        let mut prices = write(&self.prices);
        prices.push_back(current);
        while prices.len() > self.window {
            prices.pop_front();
        }
    }
}

/// Stop just beyond a known support (long) or resistance (short) level.
#[derive(Debug, Clone)]
pub struct SupportResistanceStop {
    support: Decimal,
    resistance: Decimal,
    buffer_percent: Decimal,
}

impl SupportResistanceStop {
    /// Stop `buffer_percent` beyond the given levels.
    #[must_use]
    pub const fn new(support: Decimal, resistance: Decimal, buffer_percent: Decimal) -> Self {
        Self {
            support,
            resistance,
            buffer_percent,
        }
    }
}

impl StopLossStrategy for SupportResistanceStop {
    fn name(&self) -> &'static str {
        "support_resistance_stop"
    }

    fn stop_price(&self, _entry: Decimal, ctx: &ExitContext) -> Decimal {
        match ctx.side {
            OrderSide::Buy => self.support * (Decimal::ONE - self.buffer_percent),
            OrderSide::Sell => self.resistance * (Decimal::ONE + self.buffer_percent),
        }
    }
}

/// Combines child stops; any child triggering stops the position out.
///
/// The reported stop price is the tightest of the children: the highest
/// for a long, the lowest for a short.
pub struct CompositeStop {
    children: Vec<Box<dyn StopLossStrategy>>,
}

impl CompositeStop {
    /// Compose the given child stops.
    #[must_use]
    pub fn new(children: Vec<Box<dyn StopLossStrategy>>) -> Self {
        Self { children }
    }
}

impl StopLossStrategy for CompositeStop {
    fn name(&self) -> &'static str {
        "composite_stop"
    }

    fn stop_price(&self, entry: Decimal, ctx: &ExitContext) -> Decimal {
        let stops = self.children.iter().map(|c| c.stop_price(entry, ctx));
        let tightest = match ctx.side {
            OrderSide::Buy => stops.max(),
            OrderSide::Sell => stops.min(),
        };
        tightest.unwrap_or(entry)
    }

    fn should_stop_out(&self, entry: Decimal, current: Decimal, ctx: &ExitContext) -> bool {
        self.children
            .iter()
            .any(|c| c.should_stop_out(entry, current, ctx))
    }

    fn update(&self, current: Decimal) {
        for child in &self.children {
            child.update(current);
        }
    }
}

impl std::fmt::Debug for CompositeStop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeStop")
            .field("children", &self.children.len())
            .finish()
    }
}

/// Square root via f64, precise enough for stop distances.
pub(crate) fn decimal_sqrt(value: Decimal) -> Decimal {
    if value <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    Decimal::from_f64(value.to_f64().unwrap_or(0.0).sqrt()).unwrap_or(Decimal::ZERO)
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
