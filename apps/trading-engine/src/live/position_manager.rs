//! Bulk position liquidation.
//!
//! The position manager turns open positions into offsetting market
//! orders: everything, one symbol, or every position past a loss
//! threshold. Submissions bypass the FIFO queue and run in parallel per
//! symbol, so one slow or failing symbol cannot hold up the rest.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::models::{Order, OrderSide, Position, PositionBook};
use crate::orders::OrderManager;

/// One position sent to the venue for liquidation.
#[derive(Debug, Clone, Serialize)]
pub struct SubmittedClose {
    /// Symbol being flattened.
    pub symbol: String,
    /// Engine ID of the offsetting order.
    pub order_id: String,
    /// Side of the offsetting order.
    pub side: OrderSide,
    /// Quantity sent.
    pub quantity: Decimal,
}

/// One position that could not be sent.
#[derive(Debug, Clone, Serialize)]
pub struct FailedClose {
    /// Symbol that failed to flatten.
    pub symbol: String,
    /// Display of the submission error.
    pub error: String,
}

/// Outcome of a bulk close operation.
///
/// `skipped` lists symbols that were examined but needed no order: flat
/// or unknown positions, and positions inside tolerance during a
/// losing-position sweep.
#[derive(Debug, Clone, Serialize)]
pub struct CloseReport {
    /// Offsetting orders accepted by the venue.
    pub submitted: Vec<SubmittedClose>,
    /// Symbols examined but not sent.
    pub skipped: Vec<String>,
    /// Symbols whose offsetting order failed.
    pub failed: Vec<FailedClose>,
    /// When the operation finished.
    pub completed_at: DateTime<Utc>,
}

impl CloseReport {
    /// An empty report timestamped now.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            submitted: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            completed_at: Utc::now(),
        }
    }

    /// Number of offsetting orders accepted.
    #[must_use]
    pub fn submitted_count(&self) -> usize {
        self.submitted.len()
    }

    /// Number of symbols that failed to flatten.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    /// True when nothing failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Closes open positions through the order manager.
#[derive(Debug)]
pub struct PositionManager {
    orders: Arc<OrderManager>,
    positions: Arc<PositionBook>,
}

impl PositionManager {
    /// Create a position manager over the shared position book.
    #[must_use]
    pub fn new(orders: Arc<OrderManager>, positions: Arc<PositionBook>) -> Self {
        Self { orders, positions }
    }

    /// Flatten every open position with offsetting market orders.
    ///
    /// Failures are collected per symbol rather than aborting the sweep.
    pub async fn close_all(&self) -> CloseReport {
        let open = self.positions.open_positions();
        if open.is_empty() {
            debug!("no open positions to close");
            return CloseReport::empty();
        }

        info!(count = open.len(), "closing all open positions");
        let targets = open
            .into_iter()
            .map(|position| {
                let quantity = position.quantity.abs();
                (position, quantity)
            })
            .collect();
        self.close_targets(targets, CloseReport::empty()).await
    }

    /// Close one symbol, fully or partially.
    ///
    /// `quantity` is capped at the open quantity; `None` closes the whole
    /// position. A flat or unknown symbol is reported as skipped.
    pub async fn close_position(&self, symbol: &str, quantity: Option<Decimal>) -> CloseReport {
        let mut report = CloseReport::empty();

        let Some(position) = self.positions.get(symbol) else {
            debug!(symbol, "no position to close");
            report.skipped.push(symbol.to_string());
            return report;
        };
        if position.is_flat() {
            debug!(symbol, "position already flat");
            report.skipped.push(symbol.to_string());
            return report;
        }

        let open_quantity = position.quantity.abs();
        let quantity = quantity.map_or(open_quantity, |q| q.min(open_quantity));
        if quantity <= Decimal::ZERO {
            report.skipped.push(symbol.to_string());
            return report;
        }

        self.close_targets(vec![(position, quantity)], report).await
    }

    /// Flatten every position whose unrealized loss has reached
    /// `max_loss_percent` of its cost basis (a positive number; 5 means
    /// a 5% loss). Positions inside tolerance are reported as skipped.
    pub async fn close_losing_positions(&self, max_loss_percent: Decimal) -> CloseReport {
        let threshold = -max_loss_percent.abs();
        let (losers, keepers): (Vec<Position>, Vec<Position>) = self
            .positions
            .open_positions()
            .into_iter()
            .partition(|p| p.pnl_percent() <= threshold);

        let mut report = CloseReport::empty();
        report.skipped = keepers.into_iter().map(|p| p.symbol).collect();

        if losers.is_empty() {
            debug!(threshold = %threshold, "no positions past the loss threshold");
            return report;
        }

        info!(
            count = losers.len(),
            threshold = %threshold,
            "closing losing positions"
        );
        let targets = losers
            .into_iter()
            .map(|position| {
                let quantity = position.quantity.abs();
                (position, quantity)
            })
            .collect();
        self.close_targets(targets, report).await
    }

    /// Submit one offsetting market order per target, in parallel, and
    /// fold the outcomes into `report`.
    async fn close_targets(
        &self,
        targets: Vec<(Position, Decimal)>,
        mut report: CloseReport,
    ) -> CloseReport {
        let submissions = targets.into_iter().map(|(position, quantity)| {
            let orders = Arc::clone(&self.orders);
            async move {
                let side = if position.is_long() {
                    OrderSide::Sell
                } else {
                    OrderSide::Buy
                };
                let order = Order::market(position.symbol.clone(), side, quantity);
                let result = orders.submit_order_now(order).await;
                (position.symbol, side, quantity, result)
            }
        });

        for (symbol, side, quantity, result) in join_all(submissions).await {
            match result {
                Ok(order_id) => {
                    info!(
                        symbol = %symbol,
                        order_id = %order_id,
                        side = ?side,
                        quantity = %quantity,
                        "close order submitted"
                    );
                    report.submitted.push(SubmittedClose {
                        symbol,
                        order_id,
                        side,
                        quantity,
                    });
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "close order failed");
                    report.failed.push(FailedClose {
                        symbol,
                        error: e.to_string(),
                    });
                }
            }
        }

        report.completed_at = Utc::now();
        info!(
            submitted = report.submitted.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "close submissions complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerClient, PaperBroker, RetryPolicy};
    use crate::connection::{ConnectionMonitor, MonitorConfig};
    use crate::journal::MemoryJournal;
    use crate::lifecycle::OrderTracker;
    use crate::models::OrderStatus;
    use crate::orders::OrderManagerConfig;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    struct Rig {
        broker: Arc<PaperBroker>,
        tracker: Arc<OrderTracker>,
        positions: Arc<PositionBook>,
        manager: PositionManager,
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(
            2,
            Duration::from_millis(1),
            Duration::from_millis(2),
            2.0,
            0.0,
        )
    }

    async fn rig() -> Rig {
        let broker = Arc::new(
            PaperBroker::new()
                .with_cash(dec!(1_000_000))
                .with_quote("AAPL", dec!(150))
                .with_quote("MSFT", dec!(300)),
        );
        broker.connect().await.unwrap();
        let monitor = Arc::new(ConnectionMonitor::new(
            broker.clone(),
            MonitorConfig {
                reconnect: fast_retry(),
                ..MonitorConfig::default()
            },
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
                submit_retry: fast_retry(),
                reconcile_interval: Duration::from_millis(5),
                reconnect_on_submit: true,
            },
        ));
        let manager = PositionManager::new(orders, positions.clone());
        Rig {
            broker,
            tracker,
            positions,
            manager,
        }
    }

    fn seed(positions: &PositionBook, symbol: &str, side: OrderSide, qty: Decimal, cost: Decimal) {
        let mut position = Position::new(symbol);
        position.apply_fill(side, qty, cost);
        positions.set(position);
    }

    #[tokio::test]
    async fn test_close_all_flattens_long_and_short() {
        let rig = rig().await;
        seed(&rig.positions, "AAPL", OrderSide::Buy, dec!(10), dec!(140));
        seed(&rig.positions, "MSFT", OrderSide::Sell, dec!(4), dec!(310));

        let report = rig.manager.close_all().await;
        assert_eq!(report.submitted_count(), 2);
        assert!(report.is_clean());

        let by_symbol: std::collections::HashMap<_, _> = report
            .submitted
            .iter()
            .map(|c| (c.symbol.as_str(), c))
            .collect();
        assert_eq!(by_symbol["AAPL"].side, OrderSide::Sell);
        assert_eq!(by_symbol["AAPL"].quantity, dec!(10));
        assert_eq!(by_symbol["MSFT"].side, OrderSide::Buy);
        assert_eq!(by_symbol["MSFT"].quantity, dec!(4));

        for close in &report.submitted {
            let order = rig.tracker.get(&close.order_id).unwrap();
            assert_eq!(order.status, OrderStatus::Submitted);
        }
    }

    #[tokio::test]
    async fn test_close_all_with_no_positions_is_empty() {
        let rig = rig().await;
        let report = rig.manager.close_all().await;
        assert!(report.submitted.is_empty());
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn test_close_position_partial_caps_at_open_quantity() {
        let rig = rig().await;
        seed(&rig.positions, "AAPL", OrderSide::Buy, dec!(10), dec!(140));

        let report = rig.manager.close_position("AAPL", Some(dec!(25))).await;
        assert_eq!(report.submitted_count(), 1);
        assert_eq!(report.submitted[0].quantity, dec!(10));

        let report = rig.manager.close_position("AAPL", Some(dec!(3))).await;
        assert_eq!(report.submitted[0].quantity, dec!(3));
    }

    #[tokio::test]
    async fn test_close_position_unknown_symbol_is_skipped() {
        let rig = rig().await;
        let report = rig.manager.close_position("TSLA", None).await;
        assert!(report.submitted.is_empty());
        assert_eq!(report.skipped, vec!["TSLA".to_string()]);
    }

    #[tokio::test]
    async fn test_close_losing_positions_respects_threshold() {
        let rig = rig().await;
        // AAPL: bought at 140, marked 150 via the quote feed below. MSFT:
        // bought at 320, quoted 300, a 6.25% loss.
        seed(&rig.positions, "AAPL", OrderSide::Buy, dec!(10), dec!(140));
        seed(&rig.positions, "MSFT", OrderSide::Buy, dec!(4), dec!(320));
        rig.positions.update_price("AAPL", dec!(150));
        rig.positions.update_price("MSFT", dec!(300));

        let report = rig.manager.close_losing_positions(dec!(5)).await;
        assert_eq!(report.submitted_count(), 1);
        assert_eq!(report.submitted[0].symbol, "MSFT");
        assert_eq!(report.skipped, vec!["AAPL".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_close_is_reported_not_fatal() {
        let rig = rig().await;
        seed(&rig.positions, "AAPL", OrderSide::Buy, dec!(10), dec!(140));
        seed(&rig.positions, "MSFT", OrderSide::Buy, dec!(4), dec!(320));
        rig.broker.inject_rejection("market closed");

        let report = rig.manager.close_all().await;
        assert_eq!(report.submitted_count() + report.failed_count(), 2);
        assert_eq!(report.failed_count(), 1);
        assert!(report.failed[0].error.contains("market closed"));
    }
}
