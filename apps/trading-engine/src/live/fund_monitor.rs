//! Account refresh and graded funding alerts.
//!
//! The fund monitor is the single writer of portfolio aggregates: each
//! refresh pulls the account snapshot and open positions from the broker,
//! pushes equity and holdings into the portfolio risk manager, and
//! publishes the snapshot for other components to read. Margin and cash
//! alerts are graded and recorded only when the grade changes, so a
//! sustained breach produces one event rather than one per tick.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::BrokerClient;
use crate::error::EngineError;
use crate::models::AccountSnapshot;
use crate::observability::metrics;
use crate::risk::{RiskEvent, RiskEventKind, RiskManager, RiskSeverity, format_percent};

/// Margin alert level derived from usage thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MarginGrade {
    /// Usage below every threshold.
    Normal,
    /// Usage at or above the warning threshold.
    Warning,
    /// Usage at or above the critical threshold.
    Critical,
}

impl MarginGrade {
    /// Lowercase label for logs.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// Fund monitor settings.
#[derive(Debug, Clone)]
pub struct FundMonitorConfig {
    /// How often to refresh the account snapshot.
    pub refresh_interval: Duration,
    /// Margin usage fraction that raises a warning.
    pub margin_warn: Decimal,
    /// Margin usage fraction that raises a critical alert.
    pub margin_critical: Decimal,
    /// Cash floor below which an alert is raised.
    pub min_cash: Decimal,
    /// Sector classification by symbol; unknown symbols fall back to
    /// `unclassified`.
    pub sectors: HashMap<String, String>,
}

impl Default for FundMonitorConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(30),
            margin_warn: Decimal::new(70, 2),
            margin_critical: Decimal::new(90, 2),
            min_cash: Decimal::from(1_000),
            sectors: HashMap::new(),
        }
    }
}

#[derive(Debug, Default)]
struct AlertState {
    margin: Option<MarginGrade>,
    low_cash: bool,
}

/// Periodically refreshes account funds and raises graded alerts.
///
/// Alerts never gate orders; admission checks read the published
/// snapshot and the portfolio aggregates this monitor maintains.
pub struct FundMonitor {
    broker: Arc<dyn BrokerClient>,
    risk: Arc<RiskManager>,
    config: FundMonitorConfig,
    latest: RwLock<Option<AccountSnapshot>>,
    alerts: RwLock<AlertState>,
}

impl FundMonitor {
    /// Create a monitor over the given broker and risk manager.
    #[must_use]
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        risk: Arc<RiskManager>,
        config: FundMonitorConfig,
    ) -> Self {
        Self {
            broker,
            risk,
            config,
            latest: RwLock::new(None),
            alerts: RwLock::new(AlertState::default()),
        }
    }

    /// Most recent snapshot, if a refresh has succeeded yet.
    #[must_use]
    pub fn latest(&self) -> Option<AccountSnapshot> {
        self.latest
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Current margin alert grade, `Normal` before the first refresh.
    #[must_use]
    pub fn margin_grade(&self) -> MarginGrade {
        self.alerts
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .margin
            .unwrap_or(MarginGrade::Normal)
    }

    /// Pull funds and positions from the broker and update shared state.
    ///
    /// # Errors
    ///
    /// Broker errors propagate; shared state is left at the previous
    /// snapshot when the refresh fails.
    pub async fn refresh(&self) -> Result<AccountSnapshot, EngineError> {
        let snapshot = self.broker.get_account().await?;
        let positions = self.broker.get_positions().await?;

        let portfolio = self.risk.portfolio();
        portfolio.set_total_value(snapshot.equity);

        let live: Vec<(String, Decimal)> = positions
            .values()
            .filter(|p| !p.is_flat())
            .map(|p| (p.symbol.clone(), p.market_value().abs()))
            .collect();
        for symbol in portfolio.position_weights().keys() {
            if !live.iter().any(|(s, _)| s == symbol) {
                portfolio.remove_position(symbol);
            }
        }
        for (symbol, value) in live {
            let sector = self.sector_for(&symbol).to_string();
            portfolio.upsert_position(symbol, value, sector);
        }

        metrics::update_account_equity(snapshot.equity.to_f64().unwrap_or(0.0));
        metrics::update_margin_usage(snapshot.margin_usage().to_f64().unwrap_or(0.0));
        debug!(
            equity = %snapshot.equity,
            cash = %snapshot.cash,
            margin_usage = %snapshot.margin_usage(),
            "account refreshed"
        );

        self.evaluate_alerts(&snapshot);
        *self
            .latest
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Spawn the periodic refresh loop.
    pub fn spawn_refresh_loop(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(monitor.config.refresh_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        debug!("fund refresh loop stopping");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = monitor.refresh().await {
                            warn!(error = %e, "account refresh failed");
                        }
                    }
                }
            }
        })
    }

    fn sector_for(&self, symbol: &str) -> &str {
        self.config
            .sectors
            .get(symbol)
            .map_or("unclassified", String::as_str)
    }

    fn evaluate_alerts(&self, snapshot: &AccountSnapshot) {
        let usage = snapshot.margin_usage();
        let grade = if usage >= self.config.margin_critical {
            MarginGrade::Critical
        } else if usage >= self.config.margin_warn {
            MarginGrade::Warning
        } else {
            MarginGrade::Normal
        };

        let (previous_margin, previous_low_cash) = {
            let alerts = self
                .alerts
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            (alerts.margin, alerts.low_cash)
        };

        if previous_margin != Some(grade) {
            match grade {
                MarginGrade::Critical => {
                    error!(usage = %usage, "margin usage critical");
                    self.risk.events().record(
                        RiskEvent::new(
                            RiskEventKind::MarginAlert,
                            RiskSeverity::Critical,
                            format!(
                                "margin usage {} at or above critical threshold {}",
                                format_percent(usage),
                                format_percent(self.config.margin_critical)
                            ),
                        )
                        .with_values(usage, self.config.margin_critical, usage),
                    );
                }
                MarginGrade::Warning => {
                    warn!(usage = %usage, "margin usage elevated");
                    self.risk.events().record(
                        RiskEvent::new(
                            RiskEventKind::MarginAlert,
                            RiskSeverity::Warning,
                            format!(
                                "margin usage {} at or above warning threshold {}",
                                format_percent(usage),
                                format_percent(self.config.margin_warn)
                            ),
                        )
                        .with_values(usage, self.config.margin_warn, usage),
                    );
                }
                MarginGrade::Normal => {
                    // Only note recoveries, not the initial grade.
                    if previous_margin.is_some() {
                        info!(usage = %usage, "margin usage back to normal");
                        self.risk.events().record(RiskEvent::new(
                            RiskEventKind::MarginAlert,
                            RiskSeverity::Info,
                            format!("margin usage back to normal at {}", format_percent(usage)),
                        ));
                    }
                }
            }
        }

        let low_cash = snapshot.cash < self.config.min_cash;
        if low_cash && !previous_low_cash {
            warn!(cash = %snapshot.cash, floor = %self.config.min_cash, "cash below minimum");
            self.risk.events().record(
                RiskEvent::new(
                    RiskEventKind::MarginAlert,
                    RiskSeverity::Warning,
                    format!(
                        "cash {} below the configured minimum {}",
                        snapshot.cash, self.config.min_cash
                    ),
                )
                .with_values(snapshot.cash, self.config.min_cash, snapshot.cash),
            );
        } else if !low_cash && previous_low_cash {
            info!(cash = %snapshot.cash, "cash back above minimum");
        }

        let mut alerts = self
            .alerts
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        alerts.margin = Some(grade);
        alerts.low_cash = low_cash;
    }
}

impl std::fmt::Debug for FundMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FundMonitor")
            .field("broker", &self.broker.name())
            .field("margin_grade", &self.margin_grade())
            .finish_non_exhaustive()
    }
}
