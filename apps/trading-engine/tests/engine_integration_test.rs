//! Engine Integration Tests
//!
//! End-to-end tests that wire the paper venue, order pipeline, risk
//! manager, and live trading coordinators together the way the binary
//! does, then drive signal batches through the full stack:
//!
//! - Buy signal to fill, position, and journal record
//! - Partial fills reconciled in tranches
//! - Sell signal reducing a position
//! - Confirmation round-trip for a held order
//! - Emergency stop flattening the book and resume restoring admission
//! - Drawdown breaker tripping from live account snapshots

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use trading_engine::broker::{FillMode, PaperBroker, RetryPolicy};
use trading_engine::connection::{ConnectionMonitor, MonitorConfig};
use trading_engine::executor::{ExecutorConfig, SignalExecutor, SignalOutcome};
use trading_engine::journal::MemoryJournal;
use trading_engine::lifecycle::OrderTracker;
use trading_engine::live::{
    ConfirmationConfig, ConfirmationManager, EmergencyStop, EmergencyStopConfig, FundMonitor,
    FundMonitorConfig, PositionManager, RiskTier, TradeLimiter, TradeLimiterConfig,
};
use trading_engine::models::{OrderStatus, PositionBook, Signal, SignalBatch};
use trading_engine::orders::{OrderManager, OrderManagerConfig};
use trading_engine::risk::breakers::DrawdownBreaker;
use trading_engine::risk::context::BreakerContext;
use trading_engine::risk::sizing::FixedAmountSizer;
use trading_engine::risk::{RiskLimits, RiskManager};

// =============================================================================
// Engine rig
// =============================================================================

struct Engine {
    broker: Arc<PaperBroker>,
    tracker: Arc<OrderTracker>,
    positions: Arc<PositionBook>,
    journal: Arc<MemoryJournal>,
    risk: Arc<RiskManager>,
    limiter: Arc<TradeLimiter>,
    confirmation: Arc<ConfirmationManager>,
    fund: Arc<FundMonitor>,
    emergency: Arc<EmergencyStop>,
    executor: SignalExecutor,
    shutdown: CancellationToken,
    loops: Vec<JoinHandle<()>>,
}

impl Engine {
    async fn stop(self) {
        self.shutdown.cancel();
        for handle in self.loops {
            handle.await.unwrap();
        }
    }
}

/// Trade caps loose enough that frequency gating never interferes with
/// scenarios that are not about the limiter.
fn lenient_limits() -> TradeLimiterConfig {
    TradeLimiterConfig {
        max_daily_volume: Decimal::from(1_000_000),
        min_trade_interval: chrono::Duration::zero(),
        ..TradeLimiterConfig::default()
    }
}

/// Auto-approve everything below the Critical tier.
fn lenient_confirmation() -> ConfirmationConfig {
    ConfirmationConfig {
        auto_execute_max_tier: RiskTier::High,
        ..ConfirmationConfig::default()
    }
}

/// Full engine wiring with the submission and reconciliation loops
/// already running. Sizing is a fixed 15k notional per trade against a
/// 100k account.
async fn engine(fill_mode: FillMode, confirmation_config: ConfirmationConfig) -> Engine {
    let broker = Arc::new(
        PaperBroker::new()
            .with_cash(dec!(100_000))
            .with_quote("AAPL", dec!(150))
            .with_quote("MSFT", dec!(300))
            .with_quote("NVDA", dec!(500))
            .with_fill_mode(fill_mode),
    );
    let monitor = Arc::new(ConnectionMonitor::new(
        broker.clone(),
        MonitorConfig::default(),
    ));
    monitor.connect().await.unwrap();

    let tracker = Arc::new(OrderTracker::new());
    let positions = Arc::new(PositionBook::new());
    let journal = Arc::new(MemoryJournal::new());
    let orders = Arc::new(OrderManager::new(
        monitor,
        tracker.clone(),
        positions.clone(),
        journal.clone(),
        OrderManagerConfig {
            submit_retry: RetryPolicy::default(),
            reconcile_interval: Duration::from_millis(5),
            reconnect_on_submit: true,
        },
    ));

    let risk = Arc::new(RiskManager::new(RiskLimits::default()));
    risk.register_sizer("fixed_amount", Box::new(FixedAmountSizer::new(dec!(15_000))));

    let fund = Arc::new(FundMonitor::new(
        broker.clone(),
        risk.clone(),
        FundMonitorConfig::default(),
    ));
    fund.refresh().await.unwrap();

    let limiter = Arc::new(TradeLimiter::new(lenient_limits()));
    let position_manager = Arc::new(PositionManager::new(orders.clone(), positions.clone()));
    let confirmation = Arc::new(ConfirmationManager::new(
        confirmation_config,
        orders.clone(),
        risk.clone(),
        Some(fund.clone()),
    ));
    let emergency = Arc::new(EmergencyStop::new(
        EmergencyStopConfig::default(),
        risk.clone(),
        positions.clone(),
        position_manager,
    ));
    let executor = SignalExecutor::new(
        ExecutorConfig {
            sizing_strategy: "fixed_amount".to_string(),
            stop_loss_strategy: None,
            sectors: [("AAPL".to_string(), "technology".to_string())]
                .into_iter()
                .collect(),
        },
        broker.clone(),
        risk.clone(),
        limiter.clone(),
        confirmation.clone(),
    );

    let shutdown = CancellationToken::new();
    let loops = vec![
        orders.spawn_submission_loop(shutdown.clone()),
        orders.spawn_reconciliation_loop(shutdown.clone()),
    ];

    Engine {
        broker,
        tracker,
        positions,
        journal,
        risk,
        limiter,
        confirmation,
        fund,
        emergency,
        executor,
        shutdown,
        loops,
    }
}

fn buy(symbol: &str) -> Signal {
    Signal {
        symbol: symbol.to_string(),
        buy: true,
        sell: false,
        strength: None,
        reference_price: Decimal::ZERO,
    }
}

fn sell(symbol: &str) -> Signal {
    Signal {
        symbol: symbol.to_string(),
        buy: false,
        sell: true,
        strength: None,
        reference_price: Decimal::ZERO,
    }
}

async fn wait_until(what: &str, mut predicate: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !predicate() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// =============================================================================
// Signal to fill
// =============================================================================

#[tokio::test]
async fn test_buy_signal_fills_and_books_position() {
    let engine = engine(FillMode::Immediate, lenient_confirmation()).await;

    let report = engine
        .executor
        .execute_batch(&SignalBatch::new(vec![buy("AAPL")]))
        .await;
    let order_id = match report.outcome("AAPL") {
        Some(SignalOutcome::Submitted { order_id }) => order_id.clone(),
        other => panic!("expected submission, got {other:?}"),
    };

    wait_until("order fill", || {
        engine.tracker.get(&order_id).map(|o| o.status) == Some(OrderStatus::Filled)
    })
    .await;

    // 15k at 150 buys 100 shares.
    let position = engine.positions.get("AAPL").unwrap();
    assert_eq!(position.quantity, dec!(100));
    assert_eq!(position.avg_cost, dec!(150));
    assert_eq!(engine.journal.len(), 1);
    assert_eq!(engine.limiter.daily_trades(), 1);

    let account = engine.fund.refresh().await.unwrap();
    assert_eq!(account.cash, dec!(85_000));
    assert_eq!(account.equity, dec!(100_000));

    engine.stop().await;
}

#[tokio::test]
async fn test_partial_fills_reconcile_in_tranches() {
    let engine = engine(FillMode::PartialThenComplete, lenient_confirmation()).await;

    let report = engine
        .executor
        .execute_batch(&SignalBatch::new(vec![buy("AAPL")]))
        .await;
    let order_id = match report.outcome("AAPL") {
        Some(SignalOutcome::Submitted { order_id }) => order_id.clone(),
        other => panic!("expected submission, got {other:?}"),
    };

    wait_until("completed fill", || {
        engine.tracker.get(&order_id).map(|o| o.status) == Some(OrderStatus::Filled)
    })
    .await;

    // Half on placement, the remainder on the next poll: one journal
    // record per tranche, one position at the blended size.
    let order = engine.tracker.get(&order_id).unwrap();
    assert_eq!(order.filled_quantity, dec!(100));
    assert_eq!(engine.positions.get("AAPL").unwrap().quantity, dec!(100));
    assert_eq!(engine.journal.len(), 2);

    engine.stop().await;
}

#[tokio::test]
async fn test_sell_signal_reduces_position() {
    let engine = engine(FillMode::Immediate, lenient_confirmation()).await;

    engine
        .executor
        .execute_batch(&SignalBatch::new(vec![buy("AAPL")]))
        .await;
    wait_until("entry fill", || {
        engine.positions.get("AAPL").map(|p| p.quantity) == Some(dec!(100))
    })
    .await;

    // Price moves up; the sell sizes 15k at 165 into 90 shares.
    engine.broker.set_quote("AAPL", dec!(165));
    let report = engine
        .executor
        .execute_batch(&SignalBatch::new(vec![sell("AAPL")]))
        .await;
    assert!(matches!(
        report.outcome("AAPL"),
        Some(SignalOutcome::Submitted { .. })
    ));

    wait_until("exit fill", || {
        engine.positions.get("AAPL").map(|p| p.quantity) == Some(dec!(10))
    })
    .await;
    assert_eq!(engine.journal.len(), 2);
    assert_eq!(engine.limiter.daily_trades(), 2);

    engine.stop().await;
}

// =============================================================================
// Confirmation round-trip
// =============================================================================

#[tokio::test]
async fn test_held_order_confirms_and_fills() {
    // Default gate: 15k lands in the Medium tier, above the Low
    // auto-execute ceiling.
    let engine = engine(FillMode::Immediate, ConfirmationConfig::default()).await;

    let report = engine
        .executor
        .execute_batch(&SignalBatch::new(vec![buy("AAPL")]))
        .await;
    let token = match report.outcome("AAPL") {
        Some(SignalOutcome::PendingConfirmation { token, tier }) => {
            assert_eq!(*tier, RiskTier::Medium);
            token.clone()
        }
        other => panic!("expected a held order, got {other:?}"),
    };
    assert!(engine.positions.get("AAPL").is_none());

    let order_id = engine.confirmation.confirm(&token, None).unwrap();
    wait_until("confirmed order fill", || {
        engine.tracker.get(&order_id).map(|o| o.status) == Some(OrderStatus::Filled)
    })
    .await;
    assert_eq!(engine.positions.get("AAPL").unwrap().quantity, dec!(100));

    engine.stop().await;
}

// =============================================================================
// Emergency stop
// =============================================================================

#[tokio::test]
async fn test_emergency_stop_flattens_and_resume_restores_admission() {
    let engine = engine(FillMode::Immediate, lenient_confirmation()).await;

    engine
        .executor
        .execute_batch(&SignalBatch::new(vec![buy("AAPL"), buy("MSFT")]))
        .await;
    wait_until("two open positions", || {
        engine.positions.open_positions().len() == 2
    })
    .await;

    let report = engine.emergency.stop_all("integration drill").await.unwrap();
    assert_eq!(report.submitted.len(), 2);
    assert!(report.failed.is_empty());
    assert!(!engine.risk.is_trading_enabled());

    wait_until("flat book", || engine.positions.open_positions().is_empty()).await;

    let held = engine
        .executor
        .execute_batch(&SignalBatch::new(vec![buy("NVDA")]))
        .await;
    assert!(matches!(
        held.outcome("NVDA"),
        Some(SignalOutcome::Rejected { reason }) if reason.contains("halted")
    ));

    engine.emergency.resume("drill complete").unwrap();
    assert!(engine.risk.is_trading_enabled());
    let resumed = engine
        .executor
        .execute_batch(&SignalBatch::new(vec![buy("NVDA")]))
        .await;
    assert!(matches!(
        resumed.outcome("NVDA"),
        Some(SignalOutcome::Submitted { .. })
    ));

    engine.stop().await;
}

// =============================================================================
// Breaker trip from live snapshots
// =============================================================================

#[tokio::test]
async fn test_drawdown_breaker_trip_blocks_new_signals() {
    let engine = engine(FillMode::Immediate, lenient_confirmation()).await;
    engine
        .risk
        .register_breaker("drawdown", Box::new(DrawdownBreaker::new(dec!(0.10))));

    engine
        .executor
        .execute_batch(&SignalBatch::new(vec![buy("AAPL")]))
        .await;
    wait_until("entry fill", || {
        engine.positions.get("AAPL").map(|p| p.quantity) == Some(dec!(100))
    })
    .await;

    // The position collapses: equity 85k cash + 3k stock, a 12% drawdown
    // from the 100k peak.
    engine.broker.set_quote("AAPL", dec!(30));
    engine.fund.refresh().await.unwrap();

    let fund = engine.fund.clone();
    let monitoring = engine.risk.spawn_monitoring_loop(
        Duration::from_millis(5),
        move || {
            fund.latest().map_or_else(
                || BreakerContext::new(dec!(100_000), dec!(100_000)),
                |snapshot| BreakerContext::new(snapshot.equity, dec!(100_000)),
            )
        },
        engine.shutdown.clone(),
    );

    wait_until("breaker halt", || !engine.risk.is_trading_enabled()).await;
    let statuses = engine.risk.breaker_statuses();
    assert!(statuses["drawdown"].triggered);

    let report = engine
        .executor
        .execute_batch(&SignalBatch::new(vec![buy("MSFT")]))
        .await;
    assert!(matches!(
        report.outcome("MSFT"),
        Some(SignalOutcome::Rejected { reason }) if reason.contains("halted")
    ));

    monitoring.abort();
    engine.stop().await;
}
