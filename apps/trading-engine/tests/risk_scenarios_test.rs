//! Risk Control Scenario Tests
//!
//! The guardrails exercised through the assembled risk stack rather than
//! module internals:
//!
//! - Single-position concentration cap at the facade
//! - Daily-loss breaker tripping, latching, and resetting
//! - Latched breakers ignoring recovery until an explicit reset
//! - Trade limiter citing count and limit in its violation
//! - Confirmation tokens confirming exactly once, and expiring
//! - Concurrent emergency stops submitting one liquidation sweep
//! - Halt/resume round-trip with reasons and audit events

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use trading_engine::broker::{PaperBroker, RetryPolicy};
use trading_engine::connection::{ConnectionMonitor, MonitorConfig};
use trading_engine::journal::MemoryJournal;
use trading_engine::lifecycle::OrderTracker;
use trading_engine::live::{
    ConfirmationConfig, ConfirmationManager, ConfirmationOutcome, EmergencyStop,
    EmergencyStopConfig, PositionManager, RiskTier, TradeLimiter, TradeLimiterConfig,
};
use trading_engine::models::{Order, OrderSide, PositionBook};
use trading_engine::orders::{OrderManager, OrderManagerConfig};
use trading_engine::risk::breakers::{DrawdownBreaker, LossBreaker, LossWindow};
use trading_engine::risk::context::BreakerContext;
use trading_engine::risk::{EventFilter, RiskEventKind, RiskLimits, RiskManager};

// =============================================================================
// Order pipeline rig for scenarios that submit
// =============================================================================

struct Pipeline {
    broker: Arc<PaperBroker>,
    tracker: Arc<OrderTracker>,
    positions: Arc<PositionBook>,
    orders: Arc<OrderManager>,
    risk: Arc<RiskManager>,
}

async fn pipeline() -> Pipeline {
    let broker = Arc::new(
        PaperBroker::new()
            .with_cash(dec!(100_000))
            .with_quote("AAPL", dec!(150)),
    );
    let monitor = Arc::new(ConnectionMonitor::new(
        broker.clone(),
        MonitorConfig::default(),
    ));
    monitor.connect().await.unwrap();

    let tracker = Arc::new(OrderTracker::new());
    let positions = Arc::new(PositionBook::new());
    let orders = Arc::new(OrderManager::new(
        monitor,
        tracker.clone(),
        positions.clone(),
        Arc::new(MemoryJournal::new()),
        OrderManagerConfig {
            // A transient failure parks the submitter in a retry sleep,
            // long enough for a second caller to collide with the first.
            submit_retry: RetryPolicy::new(
                3,
                Duration::from_millis(25),
                Duration::from_millis(50),
                2.0,
                0.0,
            ),
            reconcile_interval: Duration::from_millis(5),
            reconnect_on_submit: true,
        },
    ));
    let risk = Arc::new(RiskManager::new(RiskLimits::default()));

    Pipeline {
        broker,
        tracker,
        positions,
        orders,
        risk,
    }
}

// =============================================================================
// Portfolio concentration
// =============================================================================

#[test]
fn test_single_position_cap_rejects_at_facade() {
    let manager = RiskManager::new(RiskLimits::default());
    let portfolio = manager.portfolio();
    portfolio.set_total_value(dec!(200_000));
    portfolio.upsert_position("AAPL", dec!(30_000), "technology");

    // 30k of 200k is 15%; another 20k would reach 25%, above the 20% cap.
    let err = manager
        .check_portfolio_limits("AAPL", dec!(20_000), "technology")
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("25.00%"), "unexpected message: {message}");
    assert!(message.contains("20.00%"), "unexpected message: {message}");

    let recorded = manager
        .events()
        .query(&EventFilter::any().kind(RiskEventKind::PortfolioLimit));
    assert_eq!(recorded.len(), 1);

    // Topping up to exactly the cap is still allowed.
    assert!(
        manager
            .check_portfolio_limits("AAPL", dec!(10_000), "technology")
            .is_ok()
    );
}

// =============================================================================
// Breaker trip, latch, reset
// =============================================================================

#[test]
fn test_daily_loss_breaker_trips_latches_and_resets() {
    let manager = RiskManager::new(RiskLimits::default());
    manager.register_breaker(
        "daily_loss",
        Box::new(LossBreaker::new(LossWindow::Daily, dec!(0.05))),
    );

    let losing = BreakerContext::new(dec!(94_000), dec!(100_000))
        .with_returns(vec![dec!(0.01), dec!(-0.06)]);
    let err = manager.check_circuit_breakers(&losing).unwrap_err();
    assert!(err.to_string().contains("daily_loss"));

    let statuses = manager.breaker_statuses();
    let status = &statuses["daily_loss"];
    assert!(status.triggered);
    assert!(status.reason.as_deref().unwrap().contains("5.00%"));

    // A profitable day does not clear the latch.
    let recovered =
        BreakerContext::new(dec!(101_000), dec!(101_000)).with_returns(vec![dec!(0.02)]);
    assert!(manager.check_circuit_breakers(&recovered).is_err());

    manager.reset_breaker("daily_loss").unwrap();
    assert!(manager.check_circuit_breakers(&recovered).is_ok());
    assert!(!manager.breaker_statuses()["daily_loss"].triggered);
}

proptest! {
    /// Whatever the account does after a trip, the latch holds until the
    /// explicit reset.
    #[test]
    fn latched_breaker_blocks_any_later_context(
        equities in prop::collection::vec(50_000u32..500_000, 1..16)
    ) {
        let manager = RiskManager::new(RiskLimits::default());
        manager.register_breaker("drawdown", Box::new(DrawdownBreaker::new(dec!(0.10))));

        let trip = BreakerContext::new(dec!(80_000), dec!(100_000));
        prop_assert!(manager.check_circuit_breakers(&trip).is_err());

        for equity in equities {
            let flat_peak = Decimal::from(equity);
            let healthy = BreakerContext::new(flat_peak, flat_peak);
            prop_assert!(manager.check_circuit_breakers(&healthy).is_err());
            prop_assert!(manager.breaker_statuses()["drawdown"].triggered);
        }

        manager.reset_breaker("drawdown").unwrap();
        let healthy = BreakerContext::new(dec!(100_000), dec!(100_000));
        prop_assert!(manager.check_circuit_breakers(&healthy).is_ok());
    }
}

// =============================================================================
// Trade limiter
// =============================================================================

#[test]
fn test_trade_limit_violation_cites_count_and_limit() {
    let limiter = TradeLimiter::new(TradeLimiterConfig {
        max_daily_trades: 2,
        max_daily_volume: Decimal::from(1_000_000),
        max_hourly_trades_per_symbol: 10,
        min_trade_interval: chrono::Duration::zero(),
        cooling_period: chrono::Duration::minutes(30),
        consecutive_loss_limit: 3,
    });

    limiter.record_trade("AAPL", dec!(10_000), Decimal::ZERO);
    limiter.record_trade("MSFT", dec!(10_000), Decimal::ZERO);

    let decision = limiter.check("NVDA", dec!(5_000));
    assert!(!decision.allowed);
    assert!(
        decision
            .violations
            .iter()
            .any(|v| v.contains("daily trade count 2") && v.contains("limit of 2")),
        "violations: {:?}",
        decision.violations
    );
}

// =============================================================================
// Confirmation round-trip
// =============================================================================

#[tokio::test]
async fn test_confirmation_confirms_exactly_once() {
    let pipe = pipeline().await;
    let confirmation = ConfirmationManager::new(
        ConfirmationConfig::default(),
        pipe.orders.clone(),
        pipe.risk.clone(),
        None,
    );

    // 100 shares at 150 is a 15k notional: Medium tier, held.
    let order = Order::market("AAPL", OrderSide::Buy, dec!(100));
    let token = match confirmation.request(order, dec!(150)) {
        ConfirmationOutcome::PendingConfirmation { token, tier, .. } => {
            assert_eq!(tier, RiskTier::Medium);
            token
        }
        other => panic!("expected a held order, got {other:?}"),
    };
    assert_eq!(pipe.tracker.active_count(), 0);

    confirmation.confirm(&token, None).unwrap();
    assert_eq!(pipe.tracker.active_count(), 1);

    // The token is consumed; a replay cannot submit a second order.
    assert!(confirmation.confirm(&token, None).is_err());
    assert_eq!(pipe.tracker.active_count(), 1);
}

#[tokio::test]
async fn test_confirmation_expiry_blocks_submission() {
    let pipe = pipeline().await;
    let confirmation = ConfirmationManager::new(
        ConfirmationConfig {
            token_ttl: chrono::Duration::milliseconds(20),
            ..ConfirmationConfig::default()
        },
        pipe.orders.clone(),
        pipe.risk.clone(),
        None,
    );

    let order = Order::market("AAPL", OrderSide::Buy, dec!(100));
    let token = match confirmation.request(order, dec!(150)) {
        ConfirmationOutcome::PendingConfirmation { token, .. } => token,
        other => panic!("expected a held order, got {other:?}"),
    };

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(confirmation.confirm(&token, None).is_err());
    assert_eq!(pipe.tracker.active_count(), 0);
}

// =============================================================================
// Concurrent emergency stops
// =============================================================================

#[tokio::test]
async fn test_concurrent_emergency_stops_submit_one_liquidation() {
    let pipe = pipeline().await;
    pipe.positions
        .apply_fill("AAPL", OrderSide::Buy, dec!(100), dec!(150));

    let position_manager = Arc::new(PositionManager::new(
        pipe.orders.clone(),
        pipe.positions.clone(),
    ));
    let emergency = EmergencyStop::new(
        EmergencyStopConfig::default(),
        pipe.risk.clone(),
        pipe.positions.clone(),
        position_manager,
    );

    // The first sweep parks in a submit retry; the second call lands
    // while it is still in flight.
    pipe.broker.inject_transient_failures(1);
    let (first, second) = tokio::join!(
        emergency.stop_all("drawdown drill"),
        emergency.stop_all("double press"),
    );

    let report = first.unwrap();
    assert_eq!(report.submitted.len(), 1);
    assert!(report.failed.is_empty());

    let err = second.unwrap_err();
    assert!(err.to_string().contains("already in progress"));

    // One offsetting order total, not one per call.
    assert_eq!(pipe.tracker.active_count(), 1);
    assert!(!pipe.risk.is_trading_enabled());
}

// =============================================================================
// Halt and resume
// =============================================================================

#[test]
fn test_halt_resume_round_trip_keeps_reason_and_audit_trail() {
    let manager = RiskManager::new(RiskLimits::default());
    assert!(manager.is_trading_enabled());

    assert!(manager.stop_trading("manual maintenance halt"));
    assert!(!manager.is_trading_enabled());
    assert_eq!(
        manager.halt_reason().as_deref(),
        Some("manual maintenance halt")
    );
    // A second halt is a no-op, not a new event.
    assert!(!manager.stop_trading("second press"));
    assert!(manager.ensure_trading_enabled().is_err());

    assert!(manager.resume_trading("maintenance complete"));
    assert!(manager.is_trading_enabled());
    assert!(manager.halt_reason().is_none());
    assert!(!manager.resume_trading("again"));

    let audit = manager
        .events()
        .query(&EventFilter::any().kind(RiskEventKind::TradingHalt));
    assert_eq!(audit.len(), 2);
}
