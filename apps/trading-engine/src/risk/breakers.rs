//! Latching circuit breakers.
//!
//! Every breaker holds a [`Latch`]: once `check` trips it, subsequent
//! checks return true without recomputation until `reset` is called.
//! Composite breakers aggregate children with any-triggers-all semantics.

use std::sync::RwLock;

use chrono::{DateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::context::BreakerContext;
use super::format_percent;

/// A latching pre-trade risk check.
pub trait CircuitBreaker: Send + Sync {
    /// Breaker variant label, for logging and metrics.
    fn name(&self) -> &'static str;

    /// Evaluate the breaker. Returns true when tripped, and keeps
    /// returning true until [`CircuitBreaker::reset`].
    fn check(&self, ctx: &BreakerContext) -> bool;

    /// Clear the latch.
    fn reset(&self);

    /// Current latch state.
    fn status(&self) -> BreakerStatus;
}

/// Snapshot of a breaker's latch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BreakerStatus {
    /// Whether the breaker is currently tripped.
    pub triggered: bool,
    /// When it tripped.
    pub triggered_at: Option<DateTime<Utc>>,
    /// Why it tripped.
    pub reason: Option<String>,
}

/// The shared latch: first trip wins, explicit reset clears.
#[derive(Debug, Default)]
struct Latch {
    state: RwLock<BreakerStatus>,
}

impl Latch {
    fn new() -> Self {
        Self::default()
    }

    fn triggered(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .triggered
    }

    fn fire(&self, reason: String, at: DateTime<Utc>) {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if !state.triggered {
            state.triggered = true;
            state.triggered_at = Some(at);
            state.reason = Some(reason);
        }
    }

    fn reset(&self) {
        *self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = BreakerStatus::default();
    }

    fn status(&self) -> BreakerStatus {
        self.state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

/// Trips when drawdown from peak equity breaches the limit.
#[derive(Debug)]
pub struct DrawdownBreaker {
    max_drawdown: Decimal,
    latch: Latch,
}

impl DrawdownBreaker {
    /// Trip at `max_drawdown` from peak, e.g. `0.20` for 20%.
    #[must_use]
    pub fn new(max_drawdown: Decimal) -> Self {
        Self {
            max_drawdown,
            latch: Latch::new(),
        }
    }
}

impl CircuitBreaker for DrawdownBreaker {
    fn name(&self) -> &'static str {
        "drawdown"
    }

    fn check(&self, ctx: &BreakerContext) -> bool {
        if self.latch.triggered() {
            return true;
        }
        if ctx.peak_equity <= Decimal::ZERO {
            return false;
        }
        let drawdown = (ctx.peak_equity - ctx.equity) / ctx.peak_equity;
        if drawdown >= self.max_drawdown {
            self.latch.fire(
                format!(
                    "drawdown {} breached limit {}",
                    format_percent(drawdown),
                    format_percent(self.max_drawdown)
                ),
                ctx.now,
            );
            return true;
        }
        false
    }

    fn reset(&self) {
        self.latch.reset();
    }

    fn status(&self) -> BreakerStatus {
        self.latch.status()
    }
}

/// Trips when realized volatility breaches the limit.
#[derive(Debug)]
pub struct VolatilityBreaker {
    max_volatility: Decimal,
    latch: Latch,
}

impl VolatilityBreaker {
    /// Trip at `max_volatility` realized, as a fraction per period.
    #[must_use]
    pub fn new(max_volatility: Decimal) -> Self {
        Self {
            max_volatility,
            latch: Latch::new(),
        }
    }
}

impl CircuitBreaker for VolatilityBreaker {
    fn name(&self) -> &'static str {
        "volatility"
    }

    fn check(&self, ctx: &BreakerContext) -> bool {
        if self.latch.triggered() {
            return true;
        }
        let Some(realized) = ctx.realized_volatility else {
            return false;
        };
        if realized >= self.max_volatility {
            self.latch.fire(
                format!(
                    "realized volatility {} breached limit {}",
                    format_percent(realized),
                    format_percent(self.max_volatility)
                ),
                ctx.now,
            );
            return true;
        }
        false
    }

    fn reset(&self) {
        self.latch.reset();
    }

    fn status(&self) -> BreakerStatus {
        self.latch.status()
    }
}

/// Aggregation window for loss breakers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossWindow {
    /// The most recent daily return.
    Daily,
    /// The last five daily returns summed.
    Weekly,
    /// The last twenty-one daily returns summed.
    Monthly,
}

impl LossWindow {
    /// Trading days aggregated by this window.
    #[must_use]
    pub const fn periods(self) -> usize {
        match self {
            Self::Daily => 1,
            Self::Weekly => 5,
            Self::Monthly => 21,
        }
    }

    /// Lowercase label for names and messages.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

/// Trips when the summed return over a window breaches a loss limit.
#[derive(Debug)]
pub struct LossBreaker {
    window: LossWindow,
    max_loss: Decimal,
    latch: Latch,
}

impl LossBreaker {
    /// Trip when the `window` return reaches `-max_loss`, e.g. `0.05`
    /// for a 5% loss limit.
    #[must_use]
    pub fn new(window: LossWindow, max_loss: Decimal) -> Self {
        Self {
            window,
            max_loss,
            latch: Latch::new(),
        }
    }

    /// Breaker name derived from the window, e.g. `daily_loss`.
    #[must_use]
    pub const fn window_name(&self) -> &'static str {
        match self.window {
            LossWindow::Daily => "daily_loss",
            LossWindow::Weekly => "weekly_loss",
            LossWindow::Monthly => "monthly_loss",
        }
    }
}

impl CircuitBreaker for LossBreaker {
    fn name(&self) -> &'static str {
        self.window_name()
    }

    fn check(&self, ctx: &BreakerContext) -> bool {
        if self.latch.triggered() {
            return true;
        }
        let periods = self.window.periods();
        if ctx.daily_returns.is_empty() {
            return false;
        }
        let start = ctx.daily_returns.len().saturating_sub(periods);
        let window_return: Decimal = ctx.daily_returns[start..].iter().copied().sum();
        if window_return <= -self.max_loss {
            self.latch.fire(
                format!(
                    "{} loss {} breached limit {}",
                    self.window.label(),
                    format_percent(-window_return),
                    format_percent(self.max_loss)
                ),
                ctx.now,
            );
            return true;
        }
        false
    }

    fn reset(&self) {
        self.latch.reset();
    }

    fn status(&self) -> BreakerStatus {
        self.latch.status()
    }
}

/// Trips inside a blocked time-of-day window.
///
/// A window that wraps midnight (start after end) is honored. Like every
/// breaker the trip latches; resuming after the window requires a reset.
#[derive(Debug)]
pub struct TimeWindowBreaker {
    block_start: NaiveTime,
    block_end: NaiveTime,
    latch: Latch,
}

impl TimeWindowBreaker {
    /// Block trading between `block_start` and `block_end` UTC.
    #[must_use]
    pub fn new(block_start: NaiveTime, block_end: NaiveTime) -> Self {
        Self {
            block_start,
            block_end,
            latch: Latch::new(),
        }
    }

    fn in_window(&self, at: NaiveTime) -> bool {
        if self.block_start <= self.block_end {
            at >= self.block_start && at < self.block_end
        } else {
            // Wraps midnight.
            at >= self.block_start || at < self.block_end
        }
    }
}

impl CircuitBreaker for TimeWindowBreaker {
    fn name(&self) -> &'static str {
        "time_window"
    }

    fn check(&self, ctx: &BreakerContext) -> bool {
        if self.latch.triggered() {
            return true;
        }
        let at = ctx.now.time();
        if self.in_window(at) {
            self.latch.fire(
                format!(
                    "time {} is inside blocked window {}..{}",
                    at.format("%H:%M:%S"),
                    self.block_start.format("%H:%M"),
                    self.block_end.format("%H:%M")
                ),
                ctx.now,
            );
            return true;
        }
        false
    }

    fn reset(&self) {
        self.latch.reset();
    }

    fn status(&self) -> BreakerStatus {
        self.latch.status()
    }
}

/// Aggregates child breakers; any child tripping trips the composite.
///
/// Reset clears the composite's own latch and every child.
pub struct CompositeBreaker {
    children: Vec<Box<dyn CircuitBreaker>>,
    latch: Latch,
}

impl CompositeBreaker {
    /// Compose the given child breakers.
    #[must_use]
    pub fn new(children: Vec<Box<dyn CircuitBreaker>>) -> Self {
        Self {
            children,
            latch: Latch::new(),
        }
    }
}

impl CircuitBreaker for CompositeBreaker {
    fn name(&self) -> &'static str {
        "composite"
    }

    fn check(&self, ctx: &BreakerContext) -> bool {
        if self.latch.triggered() {
            return true;
        }
        for child in &self.children {
            if child.check(ctx) {
                self.latch
                    .fire(format!("child breaker '{}' triggered", child.name()), ctx.now);
                return true;
            }
        }
        false
    }

    fn reset(&self) {
        self.latch.reset();
        for child in &self.children {
            child.reset();
        }
    }

    fn status(&self) -> BreakerStatus {
        self.latch.status()
    }
}

impl std::fmt::Debug for CompositeBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeBreaker")
            .field("children", &self.children.len())
            .field("status", &self.latch.status())
            .finish()
    }
}
