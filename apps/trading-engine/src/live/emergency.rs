//! Emergency liquidation.
//!
//! A background loop watches aggregate and per-position unrealized loss
//! and fires the same stop-all routine an operator can invoke manually:
//! halt trading, record the event, and flatten every open position. The
//! routine is guarded by a compare-exchange so a second invocation while
//! one is running is rejected rather than queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::live::position_manager::{CloseReport, PositionManager};
use crate::models::PositionBook;
use crate::observability::metrics;
use crate::risk::{RiskEvent, RiskEventKind, RiskManager, RiskSeverity, format_percent};

/// Loss thresholds and cadence for the emergency monitor.
#[derive(Debug, Clone)]
pub struct EmergencyStopConfig {
    /// Aggregate unrealized loss fraction of open cost basis that
    /// triggers liquidation.
    pub max_total_loss: Decimal,
    /// Per-position unrealized loss fraction that triggers liquidation.
    pub max_position_loss: Decimal,
    /// How often the monitoring loop evaluates the thresholds.
    pub check_interval: Duration,
}

impl Default for EmergencyStopConfig {
    fn default() -> Self {
        Self {
            max_total_loss: Decimal::new(10, 2),
            max_position_loss: Decimal::new(20, 2),
            check_interval: Duration::from_secs(5),
        }
    }
}

/// Halts trading and liquidates every open position on demand or on a
/// breached loss threshold.
pub struct EmergencyStop {
    config: EmergencyStopConfig,
    risk: Arc<RiskManager>,
    positions: Arc<PositionBook>,
    position_manager: Arc<PositionManager>,
    in_progress: AtomicBool,
}

impl EmergencyStop {
    /// Create an emergency stop over the shared position book.
    #[must_use]
    pub fn new(
        config: EmergencyStopConfig,
        risk: Arc<RiskManager>,
        positions: Arc<PositionBook>,
        position_manager: Arc<PositionManager>,
    ) -> Self {
        Self {
            config,
            risk,
            positions,
            position_manager,
            in_progress: AtomicBool::new(false),
        }
    }

    /// True while a liquidation pass is running.
    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Halt trading and flatten every open position.
    ///
    /// # Errors
    ///
    /// [`EngineError::RiskRejected`] when a liquidation pass is already
    /// running; the second caller gets "already in progress" and nothing
    /// is queued.
    pub async fn stop_all(&self, reason: &str) -> Result<CloseReport, EngineError> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("emergency stop rejected, one is already running");
            return Err(EngineError::RiskRejected {
                reason: "emergency stop already in progress".to_string(),
            });
        }

        error!(reason, "emergency stop engaged");
        metrics::record_emergency_stop();
        self.risk.stop_trading(reason);
        self.risk.events().record(RiskEvent::new(
            RiskEventKind::EmergencyStop,
            RiskSeverity::Critical,
            format!("emergency stop: {reason}"),
        ));

        let report = self.position_manager.close_all().await;
        if report.is_clean() {
            info!(
                submitted = report.submitted_count(),
                "emergency liquidation orders submitted"
            );
        } else {
            warn!(
                submitted = report.submitted_count(),
                failed = report.failed_count(),
                "emergency liquidation left positions open"
            );
        }

        self.in_progress.store(false, Ordering::SeqCst);
        Ok(report)
    }

    /// Re-enable trading after an emergency stop.
    ///
    /// # Errors
    ///
    /// [`EngineError::RiskRejected`] when trading is not halted.
    pub fn resume(&self, reason: &str) -> Result<(), EngineError> {
        if self.risk.resume_trading(reason) {
            info!(reason, "trading resumed after emergency stop");
            Ok(())
        } else {
            Err(EngineError::RiskRejected {
                reason: "trading is not halted".to_string(),
            })
        }
    }

    /// Spawn the loss-monitoring loop.
    pub fn spawn_monitoring_loop(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let stop = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(stop.config.check_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        debug!("emergency monitoring loop stopping");
                        break;
                    }
                    _ = interval.tick() => {
                        if !stop.risk.is_trading_enabled() {
                            continue;
                        }
                        if let Some(reason) = stop.breach_reason() {
                            if let Err(e) = stop.stop_all(&reason).await {
                                debug!(error = %e, "emergency stop already underway");
                            }
                        }
                    }
                }
            }
        })
    }

    /// First breached loss threshold, if any.
    fn breach_reason(&self) -> Option<String> {
        let open = self.positions.open_positions();

        let basis: Decimal = open.iter().map(|p| p.avg_cost * p.quantity.abs()).sum();
        if basis > Decimal::ZERO {
            let unrealized: Decimal = open.iter().map(|p| p.unrealized_pnl).sum();
            let aggregate_loss = -unrealized / basis;
            if aggregate_loss >= self.config.max_total_loss {
                return Some(format!(
                    "aggregate unrealized loss {} breached limit {}",
                    format_percent(aggregate_loss),
                    format_percent(self.config.max_total_loss)
                ));
            }
        }

        for position in open {
            let position_basis = position.avg_cost * position.quantity.abs();
            if position_basis.is_zero() {
                continue;
            }
            let loss = -position.unrealized_pnl / position_basis;
            if loss >= self.config.max_position_loss {
                return Some(format!(
                    "{} unrealized loss {} breached limit {}",
                    position.symbol,
                    format_percent(loss),
                    format_percent(self.config.max_position_loss)
                ));
            }
        }

        None
    }
}

impl std::fmt::Debug for EmergencyStop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmergencyStop")
            .field("in_progress", &self.is_in_progress())
            .field("max_total_loss", &self.config.max_total_loss)
            .field("max_position_loss", &self.config.max_position_loss)
            .finish_non_exhaustive()
    }
}
