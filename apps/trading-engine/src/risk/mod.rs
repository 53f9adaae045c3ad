//! Risk management facade.
//!
//! [`RiskManager`] is the single admission authority: it owns the
//! strategy registries (stop-loss, take-profit, sizing, breakers), the
//! portfolio concentration view, the typed parameter store, the risk
//! event log, and the process-wide trading-enabled flag. Every
//! order-admitting path consults this one instance; it is constructed
//! once at startup and shared by `Arc`.
//!
//! Strategies are held by registration name behind their family trait;
//! looking up a name nothing registered is a validation error, not a
//! panic or a silent default.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::observability::metrics;

pub mod breakers;
pub mod context;
pub mod events;
pub mod params;
pub mod portfolio;
pub mod sizing;
pub mod stop_loss;
pub mod take_profit;

pub use breakers::{BreakerStatus, CircuitBreaker};
pub use context::{BreakerContext, ExitContext, SizingContext};
pub use events::{EventFilter, RiskEvent, RiskEventKind, RiskEventStore, RiskSeverity};
pub use params::{ParamCategory, ParamValue, ParameterStore, RiskParameter};
pub use portfolio::PortfolioRiskManager;
pub use sizing::PositionSizingStrategy;
pub use stop_loss::StopLossStrategy;
pub use take_profit::TakeProfitStrategy;

/// Concentration caps enforced by `check_portfolio_limits`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Largest weight one position may reach, as a fraction of equity.
    pub max_position_weight: Decimal,
    /// Largest weight one sector may reach, as a fraction of equity.
    pub max_sector_weight: Decimal,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_weight: Decimal::new(20, 2),
            max_sector_weight: Decimal::new(40, 2),
        }
    }
}

/// Single facade over all risk concerns.
pub struct RiskManager {
    limits: RiskLimits,
    params: ParameterStore,
    events: RiskEventStore,
    portfolio: PortfolioRiskManager,
    stop_losses: RwLock<HashMap<String, Box<dyn StopLossStrategy>>>,
    take_profits: RwLock<HashMap<String, Box<dyn TakeProfitStrategy>>>,
    sizers: RwLock<HashMap<String, Box<dyn PositionSizingStrategy>>>,
    breakers: RwLock<HashMap<String, Box<dyn CircuitBreaker>>>,
    trading_enabled: AtomicBool,
    halt_reason: RwLock<Option<String>>,
}

impl RiskManager {
    /// Create a facade with the given caps and empty registries.
    #[must_use]
    pub fn new(limits: RiskLimits) -> Self {
        Self {
            limits,
            params: ParameterStore::new(),
            events: RiskEventStore::default(),
            portfolio: PortfolioRiskManager::new(),
            stop_losses: RwLock::new(HashMap::new()),
            take_profits: RwLock::new(HashMap::new()),
            sizers: RwLock::new(HashMap::new()),
            breakers: RwLock::new(HashMap::new()),
            trading_enabled: AtomicBool::new(true),
            halt_reason: RwLock::new(None),
        }
    }

    /// The configured concentration caps.
    #[must_use]
    pub const fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// The typed parameter store.
    #[must_use]
    pub const fn params(&self) -> &ParameterStore {
        &self.params
    }

    /// The risk event log.
    #[must_use]
    pub const fn events(&self) -> &RiskEventStore {
        &self.events
    }

    /// The portfolio concentration view.
    #[must_use]
    pub const fn portfolio(&self) -> &PortfolioRiskManager {
        &self.portfolio
    }

    // ===== Strategy registration =====

    /// Register a stop-loss strategy under `name`.
    pub fn register_stop_loss(&self, name: impl Into<String>, strategy: Box<dyn StopLossStrategy>) {
        write(&self.stop_losses).insert(name.into(), strategy);
    }

    /// Register a take-profit strategy under `name`.
    pub fn register_take_profit(
        &self,
        name: impl Into<String>,
        strategy: Box<dyn TakeProfitStrategy>,
    ) {
        write(&self.take_profits).insert(name.into(), strategy);
    }

    /// Register a position sizing strategy under `name`.
    pub fn register_sizer(
        &self,
        name: impl Into<String>,
        strategy: Box<dyn PositionSizingStrategy>,
    ) {
        write(&self.sizers).insert(name.into(), strategy);
    }

    /// Register a circuit breaker under `name`.
    pub fn register_breaker(&self, name: impl Into<String>, breaker: Box<dyn CircuitBreaker>) {
        write(&self.breakers).insert(name.into(), breaker);
    }

    // ===== Stop-loss / take-profit evaluation =====

    /// Stop price from the named stop-loss strategy.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownStrategy`] when nothing is registered under
    /// `name`.
    pub fn stop_price(
        &self,
        name: &str,
        entry: Decimal,
        ctx: &ExitContext,
    ) -> Result<Decimal, EngineError> {
        let registry = read(&self.stop_losses);
        let strategy = lookup(&registry, "stop-loss", name)?;
        Ok(strategy.stop_price(entry, ctx))
    }

    /// Whether the named stop-loss strategy stops the position out.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownStrategy`] when nothing is registered under
    /// `name`.
    pub fn should_stop_out(
        &self,
        name: &str,
        entry: Decimal,
        current: Decimal,
        ctx: &ExitContext,
    ) -> Result<bool, EngineError> {
        let registry = read(&self.stop_losses);
        let strategy = lookup(&registry, "stop-loss", name)?;
        Ok(strategy.should_stop_out(entry, current, ctx))
    }

    /// Feed a price tick into the named stop-loss strategy.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownStrategy`] when nothing is registered under
    /// `name`.
    pub fn update_stop_loss(&self, name: &str, current: Decimal) -> Result<(), EngineError> {
        let registry = read(&self.stop_losses);
        let strategy = lookup(&registry, "stop-loss", name)?;
        strategy.update(current);
        Ok(())
    }

    /// Target price from the named take-profit strategy.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownStrategy`] when nothing is registered under
    /// `name`.
    pub fn target_price(
        &self,
        name: &str,
        entry: Decimal,
        ctx: &ExitContext,
    ) -> Result<Decimal, EngineError> {
        let registry = read(&self.take_profits);
        let strategy = lookup(&registry, "take-profit", name)?;
        Ok(strategy.target_price(entry, ctx))
    }

    /// Whether the named take-profit strategy takes the profit.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownStrategy`] when nothing is registered under
    /// `name`.
    pub fn should_take_profit(
        &self,
        name: &str,
        entry: Decimal,
        current: Decimal,
        ctx: &ExitContext,
    ) -> Result<bool, EngineError> {
        let registry = read(&self.take_profits);
        let strategy = lookup(&registry, "take-profit", name)?;
        Ok(strategy.should_take_profit(entry, current, ctx))
    }

    /// Feed a price tick into the named take-profit strategy.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownStrategy`] when nothing is registered under
    /// `name`.
    pub fn update_take_profit(&self, name: &str, current: Decimal) -> Result<(), EngineError> {
        let registry = read(&self.take_profits);
        let strategy = lookup(&registry, "take-profit", name)?;
        strategy.update(current);
        Ok(())
    }

    // ===== Position sizing =====

    /// Notional value from the named sizing strategy.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownStrategy`] when nothing is registered under
    /// `name`.
    pub fn position_value(
        &self,
        name: &str,
        portfolio_value: Decimal,
        ctx: &SizingContext,
    ) -> Result<Decimal, EngineError> {
        let registry = read(&self.sizers);
        let strategy = lookup(&registry, "position-sizing", name)?;
        Ok(strategy.position_value(portfolio_value, ctx))
    }

    /// Whole-share count from the named sizing strategy.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownStrategy`] when nothing is registered under
    /// `name`.
    pub fn share_count(
        &self,
        name: &str,
        portfolio_value: Decimal,
        price: Decimal,
        ctx: &SizingContext,
    ) -> Result<u64, EngineError> {
        let registry = read(&self.sizers);
        let strategy = lookup(&registry, "position-sizing", name)?;
        Ok(strategy.share_count(portfolio_value, price, ctx))
    }

    // ===== Admission =====

    /// Reject the proposed trade if it would breach a concentration cap.
    ///
    /// Checks the single-position cap, then the sector cap, both against
    /// portfolio state recomputed with the proposed value added.
    ///
    /// # Errors
    ///
    /// [`EngineError::RiskRejected`] carrying the breach description; a
    /// risk event is recorded before returning.
    pub fn check_portfolio_limits(
        &self,
        symbol: &str,
        proposed_value: Decimal,
        sector: &str,
    ) -> Result<(), EngineError> {
        let position = self
            .portfolio
            .check_position_limit(symbol, proposed_value, self.limits.max_position_weight);
        let breach = match position {
            Err(breach) => breach,
            Ok(()) => {
                match self
                    .portfolio
                    .check_sector_limit(sector, proposed_value, self.limits.max_sector_weight)
                {
                    Err(breach) => breach,
                    Ok(()) => return Ok(()),
                }
            }
        };

        let reason = breach.to_string();
        warn!(symbol = %symbol, reason = %reason, "portfolio limit rejected trade");
        self.events.record(
            RiskEvent::new(RiskEventKind::PortfolioLimit, RiskSeverity::Warning, &reason)
                .with_symbol(symbol)
                .with_values(
                    proposed_value,
                    breach.cap,
                    breach.proposed_weight,
                ),
        );
        Err(EngineError::RiskRejected { reason })
    }

    /// Reject if any registered breaker is or becomes triggered.
    ///
    /// Every breaker is evaluated (so all latches update), the breaker
    /// state gauge refreshed, and the first tick that trips records one
    /// risk event.
    ///
    /// # Errors
    ///
    /// [`EngineError::RiskRejected`] naming the tripped breakers.
    pub fn check_circuit_breakers(&self, ctx: &BreakerContext) -> Result<(), EngineError> {
        let mut tripped: Vec<String> = Vec::new();
        {
            let registry = read(&self.breakers);
            for (name, breaker) in registry.iter() {
                let triggered = breaker.check(ctx);
                metrics::update_breaker_state(
                    name,
                    if triggered {
                        metrics::breaker_state::TRIGGERED
                    } else {
                        metrics::breaker_state::ARMED
                    },
                );
                if triggered {
                    let reason = breaker
                        .status()
                        .reason
                        .unwrap_or_else(|| "triggered".to_string());
                    tripped.push(format!("{name}: {reason}"));
                }
            }
        }

        if tripped.is_empty() {
            return Ok(());
        }
        tripped.sort();
        let reason = format!("circuit breaker triggered ({})", tripped.join("; "));
        self.events.record(RiskEvent::new(
            RiskEventKind::CircuitBreaker,
            RiskSeverity::Critical,
            &reason,
        ));
        Err(EngineError::RiskRejected { reason })
    }

    /// Latch state of one breaker.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownStrategy`] when nothing is registered under
    /// `name`.
    pub fn breaker_status(&self, name: &str) -> Result<BreakerStatus, EngineError> {
        let registry = read(&self.breakers);
        let breaker = lookup(&registry, "circuit-breaker", name)?;
        Ok(breaker.status())
    }

    /// Latch state of every registered breaker.
    #[must_use]
    pub fn breaker_statuses(&self) -> HashMap<String, BreakerStatus> {
        read(&self.breakers)
            .iter()
            .map(|(name, b)| (name.clone(), b.status()))
            .collect()
    }

    /// Reset one breaker's latch.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownStrategy`] when nothing is registered under
    /// `name`.
    pub fn reset_breaker(&self, name: &str) -> Result<(), EngineError> {
        {
            let registry = read(&self.breakers);
            let breaker = lookup(&registry, "circuit-breaker", name)?;
            breaker.reset();
        }
        metrics::update_breaker_state(name, metrics::breaker_state::ARMED);
        info!(breaker = %name, "circuit breaker reset");
        self.events.record(RiskEvent::new(
            RiskEventKind::CircuitBreaker,
            RiskSeverity::Info,
            format!("circuit breaker '{name}' reset"),
        ));
        Ok(())
    }

    /// Reset every registered breaker; returns how many were reset.
    pub fn reset_all_breakers(&self) -> usize {
        let registry = read(&self.breakers);
        for (name, breaker) in registry.iter() {
            breaker.reset();
            metrics::update_breaker_state(name, metrics::breaker_state::ARMED);
        }
        let count = registry.len();
        drop(registry);
        info!(count, "all circuit breakers reset");
        self.events.record(RiskEvent::new(
            RiskEventKind::CircuitBreaker,
            RiskSeverity::Info,
            format!("all {count} circuit breakers reset"),
        ));
        count
    }

    // ===== Trading-enabled flag =====

    /// Whether order admission is currently allowed.
    #[must_use]
    pub fn is_trading_enabled(&self) -> bool {
        self.trading_enabled.load(Ordering::SeqCst)
    }

    /// Why trading is halted, when it is.
    #[must_use]
    pub fn halt_reason(&self) -> Option<String> {
        read(&self.halt_reason).clone()
    }

    /// Halt order admission. Returns false if already halted.
    pub fn stop_trading(&self, reason: &str) -> bool {
        let was_enabled = self.trading_enabled.swap(false, Ordering::SeqCst);
        if !was_enabled {
            debug!(reason = %reason, "trading already halted");
            return false;
        }
        *write(&self.halt_reason) = Some(reason.to_string());
        warn!(reason = %reason, "trading halted");
        self.events.record(RiskEvent::new(
            RiskEventKind::TradingHalt,
            RiskSeverity::Critical,
            format!("trading halted: {reason}"),
        ));
        true
    }

    /// Resume order admission. Returns false if already enabled.
    pub fn resume_trading(&self, reason: &str) -> bool {
        let was_enabled = self.trading_enabled.swap(true, Ordering::SeqCst);
        if was_enabled {
            debug!(reason = %reason, "trading already enabled");
            return false;
        }
        *write(&self.halt_reason) = None;
        info!(reason = %reason, "trading resumed");
        self.events.record(RiskEvent::new(
            RiskEventKind::TradingHalt,
            RiskSeverity::Info,
            format!("trading resumed: {reason}"),
        ));
        true
    }

    /// Fail with [`EngineError::TradingHalted`] when admission is off.
    ///
    /// # Errors
    ///
    /// [`EngineError::TradingHalted`] carrying the halt reason.
    pub fn ensure_trading_enabled(&self) -> Result<(), EngineError> {
        if self.is_trading_enabled() {
            return Ok(());
        }
        Err(EngineError::TradingHalted {
            reason: self
                .halt_reason()
                .unwrap_or_else(|| "trading halted".to_string()),
        })
    }

    /// Spawn the risk monitoring loop.
    ///
    /// Each tick builds a breaker context via `provider` and evaluates
    /// every registered breaker; a trip halts trading with the breaker's
    /// reason. Runs until `shutdown` is cancelled.
    pub fn spawn_monitoring_loop<F>(
        self: &Arc<Self>,
        period: Duration,
        provider: F,
        shutdown: CancellationToken,
    ) -> JoinHandle<()>
    where
        F: Fn() -> BreakerContext + Send + Sync + 'static,
    {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        debug!("risk monitoring loop stopping");
                        break;
                    }
                    _ = interval.tick() => {
                        let ctx = provider();
                        if let Err(EngineError::RiskRejected { reason }) =
                            manager.check_circuit_breakers(&ctx)
                        {
                            manager.stop_trading(&reason);
                        }
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for RiskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskManager")
            .field("limits", &self.limits)
            .field("trading_enabled", &self.is_trading_enabled())
            .field("breakers", &read(&self.breakers).len())
            .finish_non_exhaustive()
    }
}

/// Percentage rendering with two decimals, e.g. `0.05` as `5.00%`.
pub(crate) fn format_percent(fraction: Decimal) -> String {
    let hundred = Decimal::new(100, 0);
    format!("{:.2}%", (fraction * hundred).to_f64().unwrap_or(0.0))
}

fn lookup<'a, T: ?Sized>(
    registry: &'a HashMap<String, Box<T>>,
    family: &'static str,
    name: &str,
) -> Result<&'a T, EngineError> {
    registry
        .get(name)
        .map(|boxed| boxed.as_ref())
        .ok_or_else(|| EngineError::UnknownStrategy {
            family,
            name: name.to_string(),
        })
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::breakers::{DrawdownBreaker, LossBreaker, LossWindow};
    use super::sizing::FixedPercentSizer;
    use super::stop_loss::PercentStop;
    use super::take_profit::PercentTarget;
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::OrderSide;
    use rust_decimal_macros::dec;

    fn manager() -> RiskManager {
        let manager = RiskManager::new(RiskLimits::default());
        manager.register_stop_loss("default", Box::new(PercentStop::new(dec!(0.05))));
        manager.register_take_profit("default", Box::new(PercentTarget::new(dec!(0.10))));
        manager.register_sizer("default", Box::new(FixedPercentSizer::new(dec!(0.10))));
        manager.register_breaker("drawdown", Box::new(DrawdownBreaker::new(dec!(0.20))));
        manager
    }

    #[test]
    fn test_strategy_dispatch_by_name() {
        let manager = manager();
        let ctx = ExitContext::new(OrderSide::Buy);

        assert_eq!(
            manager.stop_price("default", dec!(100), &ctx).unwrap(),
            dec!(95.00)
        );
        assert_eq!(
            manager.target_price("default", dec!(100), &ctx).unwrap(),
            dec!(110.00)
        );
        assert_eq!(
            manager
                .position_value("default", dec!(100000), &SizingContext::new(dec!(100)))
                .unwrap(),
            dec!(10000.00)
        );
        assert_eq!(
            manager
                .share_count("default", dec!(100000), dec!(100), &SizingContext::new(dec!(100)))
                .unwrap(),
            100
        );
    }

    #[test]
    fn test_unknown_strategy_is_validation_error() {
        let manager = manager();
        let err = manager
            .stop_price("nonexistent", dec!(100), &ExitContext::new(OrderSide::Buy))
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownStrategy { .. }));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("nonexistent"));
    }

    #[test]
    fn test_portfolio_cap_scenario() {
        let manager = manager();
        manager.portfolio().set_total_value(dec!(200000));
        manager
            .portfolio()
            .upsert_position("AAPL", dec!(30000), "technology");

        // Adding 20k to a 30k position is 25% of 200k equity, over the
        // 20% single-position cap.
        let err = manager
            .check_portfolio_limits("AAPL", dec!(20000), "technology")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RiskBreach);
        let reason = err.to_string();
        assert!(reason.contains("25.00%"), "reason was: {reason}");
        assert!(reason.contains("20.00%"));

        // A rejection leaves an event behind.
        let rejections = manager
            .events()
            .query(&EventFilter::any().kind(RiskEventKind::PortfolioLimit));
        assert_eq!(rejections.len(), 1);
        assert_eq!(rejections[0].symbol.as_deref(), Some("AAPL"));

        assert!(manager
            .check_portfolio_limits("AAPL", dec!(5000), "technology")
            .is_ok());
    }

    #[test]
    fn test_breaker_trip_blocks_admission_until_reset() {
        let manager = manager();

        let healthy = BreakerContext::new(dec!(100000), dec!(100000));
        assert!(manager.check_circuit_breakers(&healthy).is_ok());

        let crashed = BreakerContext::new(dec!(70000), dec!(100000));
        let err = manager.check_circuit_breakers(&crashed).unwrap_err();
        assert!(err.to_string().contains("drawdown"));

        // Latched: a healthy context is still rejected.
        assert!(manager.check_circuit_breakers(&healthy).is_err());
        assert!(manager.breaker_status("drawdown").unwrap().triggered);

        manager.reset_breaker("drawdown").unwrap();
        assert!(!manager.breaker_status("drawdown").unwrap().triggered);
        assert!(manager.check_circuit_breakers(&healthy).is_ok());
    }

    #[test]
    fn test_reset_all_breakers() {
        let manager = manager();
        manager.register_breaker(
            "daily_loss",
            Box::new(LossBreaker::new(LossWindow::Daily, dec!(0.05))),
        );

        let bad = BreakerContext::new(dec!(70000), dec!(100000))
            .with_returns(vec![dec!(-0.06)]);
        assert!(manager.check_circuit_breakers(&bad).is_err());

        assert_eq!(manager.reset_all_breakers(), 2);
        for status in manager.breaker_statuses().values() {
            assert!(!status.triggered);
        }
    }

    #[test]
    fn test_stop_resume_trading() {
        let manager = manager();
        assert!(manager.is_trading_enabled());
        assert!(manager.ensure_trading_enabled().is_ok());

        assert!(manager.stop_trading("manual halt"));
        assert!(!manager.is_trading_enabled());
        assert_eq!(manager.halt_reason().as_deref(), Some("manual halt"));
        // Second halt is a no-op.
        assert!(!manager.stop_trading("again"));

        let err = manager.ensure_trading_enabled().unwrap_err();
        assert!(err.to_string().contains("manual halt"));
        assert_eq!(err.kind(), ErrorKind::RiskBreach);

        assert!(manager.resume_trading("operator resumed"));
        assert!(manager.is_trading_enabled());
        assert!(manager.halt_reason().is_none());
        assert!(!manager.resume_trading("again"));
    }

    #[test]
    fn test_params_and_events_via_facade() {
        let manager = manager();
        manager.params().define(
            RiskParameter::new(
                "stop_loss_percent",
                ParamCategory::StopLoss,
                ParamValue::Decimal(dec!(0.05)),
            )
            .with_bounds(dec!(0.001), dec!(0.50)),
        );

        assert!(manager
            .params()
            .update("stop_loss_percent", ParamValue::Decimal(dec!(0.08)))
            .is_ok());
        let err = manager
            .params()
            .update("stop_loss_percent", ParamValue::Decimal(dec!(0.9)))
            .unwrap_err();
        let engine_err = EngineError::from(err);
        assert_eq!(engine_err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_monitoring_loop_halts_on_trip() {
        let manager = std::sync::Arc::new(manager());
        let shutdown = CancellationToken::new();
        let handle = manager.spawn_monitoring_loop(
            Duration::from_millis(5),
            || BreakerContext::new(dec!(70000), dec!(100000)),
            shutdown.clone(),
        );

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while manager.is_trading_enabled() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "monitoring loop never halted trading"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(manager.halt_reason().unwrap().contains("drawdown"));
        shutdown.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn test_format_percent() {
        assert_eq!(format_percent(dec!(0.05)), "5.00%");
        assert_eq!(format_percent(dec!(0.25)), "25.00%");
        assert_eq!(format_percent(dec!(0.125)), "12.50%");
    }
}
