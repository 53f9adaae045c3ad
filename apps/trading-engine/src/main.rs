//! Trading Engine Binary
//!
//! Wires the paper venue, order pipeline, risk manager, and live trading
//! coordinators together, then runs the engine loops until shutdown.
//! Strategy signals arrive as JSON lines on stdin, one `SignalBatch` per
//! line.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin trading-engine -- config/default.yaml
//! ```
//!
//! # Environment Variables
//!
//! - `TRADING_ENGINE_CONFIG`: Config file path when no argument is given
//!   (default: `config/default.yaml`)
//! - `TRADING_MODE`: PAPER | LIVE (default: PAPER)
//! - `CONFIRM_CODE`: Secondary confirmation code for strict mode
//! - `LOG_LEVEL`: Log filter used when `RUST_LOG` is unset (default: info)
//! - `RUST_LOG`: Overrides the configured log filter

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Context as _;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use trading_engine::broker::{BrokerClient, PaperBroker};
use trading_engine::config::{EngineConfig, RiskSection, load_config};
use trading_engine::connection::ConnectionMonitor;
use trading_engine::executor::SignalExecutor;
use trading_engine::journal::{JsonlJournal, MemoryJournal, TradeJournal};
use trading_engine::lifecycle::OrderTracker;
use trading_engine::live::{
    ConfirmationManager, EmergencyStop, FundMonitor, PositionManager, TradeLimiter,
};
use trading_engine::models::{AccountSnapshot, PositionBook, SignalBatch};
use trading_engine::observability::{init_metrics, init_tracing};
use trading_engine::orders::OrderManager;
use trading_engine::risk::RiskManager;
use trading_engine::risk::breakers::{DrawdownBreaker, LossBreaker, LossWindow};
use trading_engine::risk::context::BreakerContext;
use trading_engine::risk::sizing::{FixedAmountSizer, FixedPercentSizer, RiskBasedSizer};
use trading_engine::risk::stop_loss::{PercentStop, TrailingStop};
use trading_engine::risk::take_profit::PercentTarget;

/// Days of per-day returns kept for loss-window breakers.
const RETURN_HISTORY_DAYS: usize = 30;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let started = Instant::now();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("TRADING_ENGINE_CONFIG").ok());
    let config = load_config(config_path.as_deref()).context("loading configuration")?;

    init_tracing(&config.observability.logging.to_tracing_config())
        .context("installing tracing subscriber")?;
    info!(mode = %config.environment.mode, "starting trading engine");
    if config.environment.mode.is_live() {
        warn!("LIVE mode configured; only the simulated venue ships with this binary");
    }

    if config.observability.metrics.enabled {
        init_metrics(&config.observability.metrics.to_metrics_config())
            .context("starting metrics exporter")?;
        info!(
            listen_addr = %config.observability.metrics.listen_addr,
            "metrics exporter listening"
        );
    }

    // Venue and connection supervision.
    let broker = build_paper_broker(&config);
    let monitor = Arc::new(ConnectionMonitor::new(
        Arc::clone(&broker),
        config.connection.to_monitor_config(),
    ));
    monitor.connect().await.context("connecting to broker")?;

    // Order pipeline.
    let tracker = Arc::new(OrderTracker::new());
    let positions = Arc::new(PositionBook::new());
    let journal = build_journal(&config).await;
    let orders = Arc::new(OrderManager::new(
        Arc::clone(&monitor),
        Arc::clone(&tracker),
        Arc::clone(&positions),
        Arc::clone(&journal),
        config.orders.to_manager_config(),
    ));

    // Risk manager with the strategies named in the executor config.
    let risk = Arc::new(RiskManager::new(config.risk.to_limits()));
    register_risk_strategies(&risk, &config.risk);

    let fund = Arc::new(FundMonitor::new(
        Arc::clone(&broker),
        Arc::clone(&risk),
        config.funds.to_fund_monitor_config(config.risk.sectors.clone()),
    ));
    if let Err(e) = fund.refresh().await {
        warn!(error = %e, "initial account refresh failed");
    }

    // Live trading coordinators.
    let limiter = Arc::new(TradeLimiter::new(config.limits.to_limiter_config()));
    let position_manager = Arc::new(PositionManager::new(
        Arc::clone(&orders),
        Arc::clone(&positions),
    ));
    let confirmation = Arc::new(ConfirmationManager::new(
        config.confirmation.to_confirmation_config(),
        Arc::clone(&orders),
        Arc::clone(&risk),
        Some(Arc::clone(&fund)),
    ));
    let emergency = Arc::new(EmergencyStop::new(
        config.emergency.to_emergency_config(),
        Arc::clone(&risk),
        Arc::clone(&positions),
        Arc::clone(&position_manager),
    ));
    let executor = Arc::new(SignalExecutor::new(
        config.executor.to_executor_config(config.risk.sectors.clone()),
        Arc::clone(&broker),
        Arc::clone(&risk),
        Arc::clone(&limiter),
        Arc::clone(&confirmation),
    ));

    // Engine loops, all stopped through one token.
    let shutdown = CancellationToken::new();
    let loops = vec![
        monitor.spawn_heartbeat(shutdown.clone()),
        monitor.spawn_health(shutdown.clone()),
        orders.spawn_submission_loop(shutdown.clone()),
        orders.spawn_reconciliation_loop(shutdown.clone()),
        fund.spawn_refresh_loop(shutdown.clone()),
        emergency.spawn_monitoring_loop(shutdown.clone()),
        risk.spawn_monitoring_loop(
            Duration::from_secs(config.risk.monitor_interval_secs),
            breaker_context_provider(Arc::clone(&fund), config.broker.starting_cash),
            shutdown.clone(),
        ),
        spawn_signal_loop(Arc::clone(&executor), shutdown.clone()),
    ];
    info!(loops = loops.len(), "trading engine running");

    shutdown_signal().await;
    info!("shutdown signal received, stopping");
    shutdown.cancel();
    for handle in loops {
        if let Err(e) = handle.await {
            warn!(error = %e, "engine loop ended abnormally");
        }
    }
    if let Err(e) = monitor.disconnect().await {
        warn!(error = %e, "broker disconnect failed");
    }

    let stats = tracker.stats();
    info!(
        uptime_secs = started.elapsed().as_secs(),
        orders_filled = stats.filled,
        orders_cancelled = stats.cancelled,
        orders_rejected = stats.rejected,
        orders_active = stats.active,
        risk_events = risk.events().len(),
        "trading engine stopped"
    );
    Ok(())
}

/// Build the simulated venue from the broker section.
fn build_paper_broker(config: &EngineConfig) -> Arc<dyn BrokerClient> {
    let mut broker = PaperBroker::new()
        .with_cash(config.broker.starting_cash)
        .with_fill_mode(config.broker.to_fill_mode());
    for (symbol, price) in &config.broker.quotes {
        broker = broker.with_quote(symbol, *price);
    }
    Arc::new(broker)
}

/// Open the configured trade journal, falling back to memory.
///
/// A broken journal must never keep the engine from starting.
async fn build_journal(config: &EngineConfig) -> Arc<dyn TradeJournal> {
    if !config.journal.enabled {
        info!("trade journal disabled, keeping records in memory");
        return Arc::new(MemoryJournal::new());
    }
    match JsonlJournal::open(&config.journal.path).await {
        Ok(journal) => {
            info!(path = %config.journal.path, "trade journal open");
            Arc::new(journal)
        }
        Err(e) => {
            warn!(
                path = %config.journal.path,
                error = %e,
                "journal unavailable, keeping records in memory"
            );
            Arc::new(MemoryJournal::new())
        }
    }
}

/// Register the stock strategy set under the names the executor config
/// refers to, parameterized from the risk section.
fn register_risk_strategies(risk: &RiskManager, section: &RiskSection) {
    risk.register_stop_loss(
        "percent_stop",
        Box::new(PercentStop::new(section.stop_loss_percent)),
    );
    risk.register_stop_loss(
        "trailing_stop",
        Box::new(TrailingStop::new(section.trailing_stop_percent)),
    );
    risk.register_take_profit(
        "percent_target",
        Box::new(PercentTarget::new(section.take_profit_percent)),
    );
    risk.register_sizer(
        "fixed_amount",
        Box::new(FixedAmountSizer::new(section.fixed_amount)),
    );
    risk.register_sizer(
        "fixed_percent",
        Box::new(FixedPercentSizer::new(section.fixed_percent)),
    );
    risk.register_sizer(
        "risk_based",
        Box::new(RiskBasedSizer::new(section.risk_per_trade)),
    );
    risk.register_breaker(
        "drawdown",
        Box::new(DrawdownBreaker::new(section.max_drawdown)),
    );
    risk.register_breaker(
        "daily_loss",
        Box::new(LossBreaker::new(LossWindow::Daily, section.max_daily_loss)),
    );
    risk.register_breaker(
        "weekly_loss",
        Box::new(LossBreaker::new(LossWindow::Weekly, section.max_weekly_loss)),
    );
}

/// Feed breaker evaluations from the fund monitor's account snapshots.
fn breaker_context_provider(
    fund: Arc<FundMonitor>,
    starting_equity: Decimal,
) -> impl Fn() -> BreakerContext + Send + Sync + 'static {
    let state = Mutex::new(EquityTracker::new(starting_equity));
    move || {
        let snapshot = fund.latest();
        state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .context(snapshot.as_ref())
    }
}

/// Read `SignalBatch` JSON lines from stdin and run them through the
/// executor. Malformed lines are logged and skipped; end of input leaves
/// the rest of the engine running.
fn spawn_signal_loop(
    executor: Arc<SignalExecutor>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    debug!("signal loop stopping");
                    break;
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<SignalBatch>(line) {
                            Ok(batch) => {
                                executor.execute_batch(&batch).await;
                            }
                            Err(e) => warn!(error = %e, "malformed signal batch line"),
                        }
                    }
                    Ok(None) => {
                        info!("signal input closed");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "signal input read failed");
                        break;
                    }
                },
            }
        }
    })
}

/// Wait for Ctrl+C or SIGTERM.
///
/// # Panics
///
/// Panics if the signal handlers cannot be installed.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

/// Rolling equity state behind the breaker context provider.
struct EquityTracker {
    peak: Decimal,
    day: Option<NaiveDate>,
    day_open: Decimal,
    daily_returns: Vec<Decimal>,
}

impl EquityTracker {
    const fn new(starting_equity: Decimal) -> Self {
        Self {
            peak: starting_equity,
            day: None,
            day_open: starting_equity,
            daily_returns: Vec::new(),
        }
    }

    /// Fold the latest snapshot into the running peak and per-day returns.
    ///
    /// Before the first successful account refresh there is nothing to
    /// evaluate, so the context reports equity at peak.
    fn context(&mut self, snapshot: Option<&AccountSnapshot>) -> BreakerContext {
        let Some(snapshot) = snapshot else {
            return BreakerContext::new(self.peak, self.peak);
        };
        let equity = snapshot.equity;
        if equity > self.peak {
            self.peak = equity;
        }
        let today = Utc::now().date_naive();
        if self.day != Some(today) {
            self.day = Some(today);
            self.day_open = equity;
            self.daily_returns.push(Decimal::ZERO);
            if self.daily_returns.len() > RETURN_HISTORY_DAYS {
                self.daily_returns.remove(0);
            }
        }
        if self.day_open > Decimal::ZERO {
            if let Some(last) = self.daily_returns.last_mut() {
                *last = equity / self.day_open - Decimal::ONE;
            }
        }
        BreakerContext::new(equity, self.peak).with_returns(self.daily_returns.clone())
    }
}
