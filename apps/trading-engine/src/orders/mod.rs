//! Order submission and reconciliation.
//!
//! [`OrderManager`] owns the single FIFO submission queue and the pending
//! set of orders working at the venue. Two named loops drive it:
//!
//! - the **submission loop** dequeues one order at a time, verifies
//!   connectivity, and places it with bounded retry on transient errors;
//! - the **reconciliation loop** polls each pending order's live status,
//!   feeds changes into the lifecycle tracker, and books fills into the
//!   position book and trade journal.
//!
//! `cancel_order` short-circuits: an order still waiting in the queue is
//! cancelled locally without touching the broker.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::{BrokerClient, BrokerError, RetryPolicy};
use crate::connection::ConnectionMonitor;
use crate::error::EngineError;
use crate::journal::TradeJournal;
use crate::lifecycle::{OrderTracker, OrderUpdate};
use crate::models::{Order, OrderStatus, PositionBook, TradeRecord};
use crate::observability::metrics;

/// Order manager configuration.
#[derive(Debug, Clone)]
pub struct OrderManagerConfig {
    /// Retry policy for transient submission failures.
    pub submit_retry: RetryPolicy,
    /// Interval between reconciliation passes.
    pub reconcile_interval: Duration,
    /// Trigger a reconnect when submission finds the broker down,
    /// instead of rejecting outright.
    pub reconnect_on_submit: bool,
}

impl Default for OrderManagerConfig {
    fn default() -> Self {
        Self {
            submit_retry: RetryPolicy::default(),
            reconcile_interval: Duration::from_secs(1),
            reconnect_on_submit: true,
        }
    }
}

/// Accepts, submits, and reconciles orders against one broker.
pub struct OrderManager {
    monitor: Arc<ConnectionMonitor>,
    tracker: Arc<OrderTracker>,
    positions: Arc<PositionBook>,
    journal: Arc<dyn TradeJournal>,
    config: OrderManagerConfig,
    tx: mpsc::UnboundedSender<String>,
    rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    // order id -> broker order id, for everything working at the venue.
    pending: RwLock<HashMap<String, String>>,
}

impl OrderManager {
    /// Create a manager wired to its collaborators.
    #[must_use]
    pub fn new(
        monitor: Arc<ConnectionMonitor>,
        tracker: Arc<OrderTracker>,
        positions: Arc<PositionBook>,
        journal: Arc<dyn TradeJournal>,
        config: OrderManagerConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            monitor,
            tracker,
            positions,
            journal,
            config,
            tx,
            rx: std::sync::Mutex::new(Some(rx)),
            pending: RwLock::new(HashMap::new()),
        }
    }

    /// The broker this manager submits to.
    #[must_use]
    pub fn broker(&self) -> &Arc<dyn BrokerClient> {
        self.monitor.broker()
    }

    /// Number of orders working at the venue.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.read_pending().len()
    }

    /// Validate and enqueue an order for submission. Returns the order ID.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidOrder`] when parameters fail validation
    /// (nothing is enqueued); [`EngineError::Tracker`] for a duplicate ID;
    /// [`EngineError::QueueClosed`] during shutdown.
    pub fn submit_order(&self, order: Order) -> Result<String, EngineError> {
        order.validate()?;
        let order_id = order.id.clone();
        self.tracker.register(order)?;

        if self.tx.send(order_id.clone()).is_err() {
            let update = OrderUpdate::to_status(OrderStatus::Rejected)
                .with_detail("engine is shutting down");
            if let Err(e) = self.tracker.apply_update(&order_id, update) {
                warn!(order_id = %order_id, error = %e, "failed to record shutdown rejection");
            }
            return Err(EngineError::QueueClosed);
        }

        debug!(order_id = %order_id, "order enqueued for submission");
        Ok(order_id)
    }

    /// Validate, register, and submit an order immediately, bypassing the
    /// FIFO queue. Liquidation flows use this so per-symbol submissions
    /// run in parallel instead of serially behind queued work.
    ///
    /// # Errors
    ///
    /// Validation and duplicate-ID errors as for [`Self::submit_order`].
    /// Connectivity failures, venue rejections, and retry exhaustion
    /// surface as the corresponding [`EngineError`] after the order has
    /// been marked rejected in the tracker.
    pub async fn submit_order_now(&self, order: Order) -> Result<String, EngineError> {
        order.validate()?;
        let order_id = order.id.clone();
        self.tracker.register(order)?;
        self.submit_one(&order_id).await?;
        Ok(order_id)
    }

    /// Cancel an order wherever it currently is.
    ///
    /// Still-queued orders are cancelled locally; orders working at the
    /// venue are cancelled through the broker, with the terminal state
    /// arriving via reconciliation.
    ///
    /// # Errors
    ///
    /// [`EngineError::OrderNotFound`] for unknown IDs; broker errors
    /// propagate; cancelling a terminal order fails with
    /// [`BrokerError::NotCancelable`].
    pub async fn cancel_order(&self, order_id: &str) -> Result<(), EngineError> {
        // Orders the venue knows about go through the broker.
        let broker_id = self.read_pending().get(order_id).cloned();
        if let Some(broker_id) = broker_id {
            self.broker().cancel_order(&broker_id).await?;
            info!(order_id = %order_id, broker_order_id = %broker_id, "cancel delegated to broker");
            return Ok(());
        }

        let Some(order) = self.tracker.get(order_id) else {
            return Err(EngineError::OrderNotFound {
                order_id: order_id.to_string(),
            });
        };

        match order.status {
            OrderStatus::Pending => {
                let update = OrderUpdate::to_status(OrderStatus::Cancelled)
                    .with_detail("cancelled before submission");
                self.tracker.apply_update(order_id, update)?;
                info!(order_id = %order_id, "order cancelled before submission");
                Ok(())
            }
            OrderStatus::Submitted | OrderStatus::PartiallyFilled => {
                let broker_id = order.broker_order_id.clone().ok_or_else(|| {
                    EngineError::OrderNotFound {
                        order_id: order_id.to_string(),
                    }
                })?;
                self.broker().cancel_order(&broker_id).await?;
                info!(order_id = %order_id, broker_order_id = %broker_id, "cancel delegated to broker");
                Ok(())
            }
            _ => Err(EngineError::Broker(BrokerError::NotCancelable {
                broker_order_id: order.broker_order_id.unwrap_or_else(|| order_id.to_string()),
            })),
        }
    }

    /// Spawn the submission loop.
    ///
    /// The loop drains the FIFO queue one order at a time until shutdown
    /// is signalled or the queue closes.
    pub fn spawn_submission_loop(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let rx = manager
            .rx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        tokio::spawn(async move {
            let Some(mut rx) = rx else {
                warn!("submission loop already running; not spawning a second");
                return;
            };
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        debug!("submission loop stopping");
                        break;
                    }
                    next = rx.recv() => {
                        let Some(order_id) = next else {
                            debug!("submission queue closed");
                            break;
                        };
                        if let Err(e) = manager.submit_one(&order_id).await {
                            debug!(order_id = %order_id, error = %e, "queued submission failed");
                        }
                    }
                }
            }
        })
    }

    /// Spawn the reconciliation loop.
    pub fn spawn_reconciliation_loop(
        self: &Arc<Self>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(manager.config.reconcile_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        debug!("reconciliation loop stopping");
                        break;
                    }
                    _ = interval.tick() => manager.reconcile_once().await,
                }
            }
        })
    }

    /// One reconciliation pass over the pending set. Public for callers
    /// that drive reconciliation themselves instead of spawning the loop.
    pub async fn reconcile_once(&self) {
        let pending: Vec<(String, String)> = self
            .read_pending()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        for (order_id, broker_order_id) in pending {
            if self.reconcile_one(&order_id, &broker_order_id).await {
                self.write_pending().remove(&order_id);
            }
        }

        metrics::update_pending_orders(self.broker().name(), self.pending_count());
    }

    /// Submit one order to the venue. Returns once the order is working
    /// or terminally rejected; a failure is recorded on the order before
    /// it is returned to the caller.
    async fn submit_one(&self, order_id: &str) -> Result<(), EngineError> {
        let Some(order) = self.tracker.get(order_id) else {
            warn!(order_id = %order_id, "dequeued order is not tracked");
            return Ok(());
        };
        if order.status != OrderStatus::Pending {
            // Cancelled (or otherwise resolved) while queued.
            debug!(order_id = %order.id, status = %order.status, "skipping dequeued order");
            return Ok(());
        }

        let broker = Arc::clone(self.broker());
        if !broker.is_connected() {
            if self.config.reconnect_on_submit {
                if let Err(e) = self.monitor.reconnect().await {
                    self.reject(order_id, "not_connected", format!("not connected: {e}"));
                    return Err(EngineError::Broker(BrokerError::NotConnected));
                }
            } else {
                self.reject(order_id, "not_connected", "broker not connected".to_string());
                return Err(EngineError::Broker(BrokerError::NotConnected));
            }
        }

        let start = Instant::now();
        let kind = order.kind.label();
        let mut backoff = self.config.submit_retry.backoff();

        loop {
            match broker.place_order(&order).await {
                Ok(broker_order_id) => {
                    metrics::record_order_submission(
                        broker.name(),
                        "submitted",
                        kind,
                        start.elapsed().as_secs_f64(),
                    );
                    info!(
                        order_id = %order.id,
                        broker_order_id = %broker_order_id,
                        symbol = %order.symbol,
                        side = ?order.side,
                        quantity = %order.quantity,
                        "order submitted"
                    );

                    // Pending entry goes in first so a concurrent cancel
                    // finds the broker ID and delegates.
                    self.write_pending()
                        .insert(order.id.clone(), broker_order_id.clone());

                    let update = OrderUpdate::to_status(OrderStatus::Submitted)
                        .with_broker_id(broker_order_id.clone());
                    match self.tracker.apply_update(order_id, update) {
                        Ok(updated) if updated.status == OrderStatus::Submitted => {}
                        Ok(updated) => {
                            // Cancelled while the placement was in flight;
                            // undo at the venue, best effort.
                            debug!(
                                order_id = %order.id,
                                status = %updated.status,
                                "order resolved during placement, cancelling at venue"
                            );
                            self.write_pending().remove(order_id);
                            let _ = broker.cancel_order(&broker_order_id).await;
                        }
                        Err(e) => {
                            warn!(order_id = %order.id, error = %e, "failed to record submission");
                        }
                    }
                    return Ok(());
                }
                Err(e) if e.is_retryable() => match backoff.next_delay() {
                    Some(delay) => {
                        warn!(
                            order_id = %order.id,
                            attempt = backoff.attempts(),
                            error = %e,
                            "transient submit failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        metrics::record_order_submission(
                            broker.name(),
                            "retries_exhausted",
                            kind,
                            start.elapsed().as_secs_f64(),
                        );
                        self.reject(
                            order_id,
                            "retries_exhausted",
                            format!(
                                "retries exhausted after {} attempts: {e}",
                                backoff.attempts()
                            ),
                        );
                        return Err(EngineError::RetriesExhausted {
                            attempts: backoff.attempts(),
                            last_error: e.to_string(),
                        });
                    }
                },
                Err(e) => {
                    metrics::record_order_submission(
                        broker.name(),
                        "rejected",
                        kind,
                        start.elapsed().as_secs_f64(),
                    );
                    self.reject(order_id, rejection_label(&e), e.to_string());
                    return Err(EngineError::Broker(e));
                }
            }
        }
    }

    /// Poll one pending order and apply what the broker reports. Returns
    /// true once the order is terminal and can leave the pending set.
    async fn reconcile_one(&self, order_id: &str, broker_order_id: &str) -> bool {
        let live = match self.broker().get_order(broker_order_id).await {
            Ok(live) => live,
            Err(e) => {
                // One failed poll is skipped, not escalated.
                warn!(
                    order_id = %order_id,
                    broker_order_id = %broker_order_id,
                    error = %e,
                    "status poll failed"
                );
                return false;
            }
        };

        let Some(prior) = self.tracker.get(order_id) else {
            warn!(order_id = %order_id, "pending order vanished from tracker");
            return true;
        };

        let fill_delta = live.filled_quantity - prior.filled_quantity;
        let update = OrderUpdate {
            status: Some(live.status),
            filled_quantity: Some(live.filled_quantity),
            avg_fill_price: Some(live.avg_fill_price),
            broker_order_id: None,
            detail: live.error.clone(),
        };

        let updated = match self.tracker.apply_update(order_id, update) {
            Ok(updated) => updated,
            Err(e) => {
                warn!(order_id = %order_id, error = %e, "tracker refused broker-reported state");
                return false;
            }
        };

        if fill_delta > Decimal::ZERO {
            self.book_fill(&updated, &prior, &live, fill_delta).await;
        }

        updated.status.is_terminal()
    }

    /// Book one execution tranche into the position book and journal.
    async fn book_fill(&self, updated: &Order, prior: &Order, live: &Order, fill_delta: Decimal) {
        // Cumulative averages to the implied price of this tranche.
        let tranche_notional =
            live.avg_fill_price * live.filled_quantity - prior.avg_fill_price * prior.filled_quantity;
        let tranche_price = tranche_notional / fill_delta;

        let (position, realized) =
            self.positions
                .apply_fill(&live.symbol, live.side, fill_delta, tranche_price);

        metrics::record_order_fill(
            self.broker().name(),
            &live.symbol,
            fill_delta.to_f64().unwrap_or(0.0),
        );
        metrics::update_open_positions(self.positions.open_count());
        info!(
            order_id = %updated.id,
            symbol = %live.symbol,
            side = ?live.side,
            quantity = %fill_delta,
            price = %tranche_price,
            position_quantity = %position.quantity,
            realized_pnl = %realized,
            "fill booked"
        );

        let trade = TradeRecord::from_order(updated, fill_delta, tranche_price);
        if let Err(e) = self.journal.record(&trade).await {
            warn!(order_id = %updated.id, error = %e, "trade journal write failed");
        }
    }

    /// Record a terminal rejection for a not-yet-submitted order.
    fn reject(&self, order_id: &str, label: &str, reason: String) {
        warn!(order_id = %order_id, reason = %reason, "order rejected");
        metrics::record_order_rejection(self.broker().name(), label);
        let update = OrderUpdate::to_status(OrderStatus::Rejected).with_detail(reason);
        if let Err(e) = self.tracker.apply_update(order_id, update) {
            warn!(order_id = %order_id, error = %e, "failed to record rejection");
        }
    }

    fn read_pending(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, String>> {
        self.pending
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_pending(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, String>> {
        self.pending
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for OrderManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderManager")
            .field("broker", &self.broker().name())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

/// Low-cardinality metric label for a non-retryable broker error.
const fn rejection_label(error: &BrokerError) -> &'static str {
    match error {
        BrokerError::NotConnected => "not_connected",
        BrokerError::Rejected { .. } => "venue_rejected",
        BrokerError::Transient { .. } => "transient",
        BrokerError::OrderNotFound { .. } => "order_not_found",
        BrokerError::NotCancelable { .. } => "not_cancelable",
        BrokerError::InvalidOrder { .. } => "invalid_order",
    }
}
