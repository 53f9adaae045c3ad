//! Order lifecycle tracking.
//!
//! [`OrderTracker`] is the single owner of order status: every transition
//! flows through [`OrderTracker::apply_update`], which enforces the order
//! state machine, appends to the per-order event history, and moves
//! terminal orders into a bounded, age-pruned archive. Duplicate broker
//! notifications for an already-terminal order are no-ops, not errors.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::{Order, OrderEvent, OrderStatus};

/// Errors from tracker operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    /// The order ID is not tracked.
    #[error("order not tracked: {order_id}")]
    UnknownOrder {
        /// Offending order ID.
        order_id: String,
    },

    /// The order ID is already tracked.
    #[error("order already tracked: {order_id}")]
    DuplicateOrder {
        /// Offending order ID.
        order_id: String,
    },

    /// The requested transition violates the state machine.
    #[error("invalid transition for order {order_id}: {from} -> {to}")]
    InvalidTransition {
        /// Offending order ID.
        order_id: String,
        /// Current status.
        from: OrderStatus,
        /// Requested status.
        to: OrderStatus,
    },
}

/// A status change to apply to a tracked order.
#[derive(Debug, Clone, Default)]
pub struct OrderUpdate {
    /// New status.
    pub status: Option<OrderStatus>,
    /// Cumulative filled quantity reported by the broker.
    pub filled_quantity: Option<Decimal>,
    /// Average fill price reported by the broker.
    pub avg_fill_price: Option<Decimal>,
    /// Broker-assigned order ID (set on acceptance).
    pub broker_order_id: Option<String>,
    /// Free-form detail recorded on the event (fill size, reject reason).
    pub detail: Option<String>,
}

impl OrderUpdate {
    /// Update to a new status.
    #[must_use]
    pub fn to_status(status: OrderStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Update reflecting an execution.
    #[must_use]
    pub fn execution(status: OrderStatus, filled: Decimal, avg_price: Decimal) -> Self {
        Self {
            status: Some(status),
            filled_quantity: Some(filled),
            avg_fill_price: Some(avg_price),
            ..Self::default()
        }
    }

    /// Attach a detail string.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Attach the broker-assigned ID.
    #[must_use]
    pub fn with_broker_id(mut self, broker_order_id: impl Into<String>) -> Self {
        self.broker_order_id = Some(broker_order_id.into());
        self
    }
}

/// Order projection plus its transition history.
#[derive(Debug, Clone)]
pub struct OrderInfo {
    /// Current order state.
    pub order: Order,
    /// Transition history, oldest first.
    pub events: Vec<OrderEvent>,
}

/// On-demand aggregate counters over active and archived orders.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerStats {
    /// Orders currently active.
    pub active: usize,
    /// Orders in the archive.
    pub archived: usize,
    /// Terminal orders that filled.
    pub filled: usize,
    /// Terminal orders that were cancelled.
    pub cancelled: usize,
    /// Terminal orders rejected by validation or the venue.
    pub rejected: usize,
    /// Terminal orders that expired.
    pub expired: usize,
    /// Filled / all tracked.
    pub fill_rate: f64,
    /// Cancelled / all tracked.
    pub cancel_rate: f64,
    /// Rejected / all tracked.
    pub error_rate: f64,
}

/// Tracker configuration.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Maximum archived orders kept.
    pub max_archived: usize,
    /// Age beyond which archived orders are pruned.
    pub archive_retention: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_archived: 10_000,
            archive_retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug)]
struct Tracked {
    order: Order,
    events: Vec<OrderEvent>,
}

#[derive(Debug, Default)]
struct TrackerState {
    active: HashMap<String, Tracked>,
    archive: VecDeque<Tracked>,
}

/// Tracks every order from creation to terminal state.
#[derive(Debug)]
pub struct OrderTracker {
    config: TrackerConfig,
    state: RwLock<TrackerState>,
}

impl Default for OrderTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderTracker {
    /// Create a tracker with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(TrackerConfig::default())
    }

    /// Create a tracker with custom archive bounds.
    #[must_use]
    pub fn with_config(config: TrackerConfig) -> Self {
        Self {
            config,
            state: RwLock::new(TrackerState::default()),
        }
    }

    /// Register a new order (typically in `Pending`).
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::DuplicateOrder`] if the ID is already
    /// tracked (active or archived).
    pub fn register(&self, order: Order) -> Result<(), TrackerError> {
        let mut state = self.write_state();
        if state.active.contains_key(&order.id)
            || state.archive.iter().any(|t| t.order.id == order.id)
        {
            return Err(TrackerError::DuplicateOrder {
                order_id: order.id.clone(),
            });
        }
        state.active.insert(
            order.id.clone(),
            Tracked {
                order,
                events: Vec::new(),
            },
        );
        Ok(())
    }

    /// Apply a status update to a tracked order and return the resulting
    /// projection.
    ///
    /// Updates to an already-terminal order are idempotent no-ops that
    /// return the unchanged order. A status equal to the current
    /// non-terminal status is also a no-op, except `PartiallyFilled`,
    /// which may repeat as further partial fills arrive.
    ///
    /// # Errors
    ///
    /// [`TrackerError::UnknownOrder`] for an untracked ID;
    /// [`TrackerError::InvalidTransition`] when the state machine forbids
    /// the move.
    pub fn apply_update(
        &self,
        order_id: &str,
        update: OrderUpdate,
    ) -> Result<Order, TrackerError> {
        let mut state = self.write_state();

        // Terminal orders live in the archive; any further event is a no-op.
        if let Some(archived) = state.archive.iter().find(|t| t.order.id == order_id) {
            return Ok(archived.order.clone());
        }

        let tracked = state
            .active
            .get_mut(order_id)
            .ok_or_else(|| TrackerError::UnknownOrder {
                order_id: order_id.to_string(),
            })?;

        if tracked.order.status.is_terminal() {
            return Ok(tracked.order.clone());
        }

        let from = tracked.order.status;
        let to = update.status.unwrap_or(from);

        if to != from || to == OrderStatus::PartiallyFilled {
            if !from.can_transition_to(to) {
                return Err(TrackerError::InvalidTransition {
                    order_id: order_id.to_string(),
                    from,
                    to,
                });
            }
            tracked.order.status = to;
            tracked.events.push(OrderEvent {
                from,
                to,
                timestamp: Utc::now(),
                detail: update.detail.clone(),
            });
        }

        if let Some(filled) = update.filled_quantity {
            tracked.order.filled_quantity = filled;
        }
        if let Some(avg) = update.avg_fill_price {
            tracked.order.avg_fill_price = avg;
        }
        if let Some(broker_id) = update.broker_order_id {
            tracked.order.broker_order_id = Some(broker_id);
        }
        if to == OrderStatus::Rejected {
            tracked.order.error = update.detail;
        }
        tracked.order.updated_at = Utc::now();

        let result = tracked.order.clone();

        if to.is_terminal() {
            if let Some(done) = state.active.remove(order_id) {
                self.archive(&mut state, done);
            }
        }

        Ok(result)
    }

    /// Current order projection by ID, searching active then archive.
    #[must_use]
    pub fn get(&self, order_id: &str) -> Option<Order> {
        let state = self.read_state();
        state
            .active
            .get(order_id)
            .map(|t| t.order.clone())
            .or_else(|| {
                state
                    .archive
                    .iter()
                    .find(|t| t.order.id == order_id)
                    .map(|t| t.order.clone())
            })
    }

    /// Order projection plus event history.
    #[must_use]
    pub fn get_info(&self, order_id: &str) -> Option<OrderInfo> {
        let state = self.read_state();
        state
            .active
            .get(order_id)
            .or_else(|| state.archive.iter().find(|t| t.order.id == order_id))
            .map(|t| OrderInfo {
                order: t.order.clone(),
                events: t.events.clone(),
            })
    }

    /// All active (non-terminal) orders.
    #[must_use]
    pub fn active_orders(&self) -> Vec<Order> {
        self.read_state()
            .active
            .values()
            .map(|t| t.order.clone())
            .collect()
    }

    /// Number of active orders.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.read_state().active.len()
    }

    /// Compute aggregate counters from the two maps.
    ///
    /// Rates are recomputed on every call rather than maintained
    /// incrementally, so they cannot drift from the underlying maps.
    #[must_use]
    pub fn stats(&self) -> TrackerStats {
        let state = self.read_state();
        let active = state.active.len();
        let archived = state.archive.len();

        let mut filled = 0usize;
        let mut cancelled = 0usize;
        let mut rejected = 0usize;
        let mut expired = 0usize;
        for t in &state.archive {
            match t.order.status {
                OrderStatus::Filled => filled += 1,
                OrderStatus::Cancelled => cancelled += 1,
                OrderStatus::Rejected => rejected += 1,
                OrderStatus::Expired => expired += 1,
                _ => {}
            }
        }

        let total = active + archived;
        let rate = |n: usize| {
            if total == 0 {
                0.0
            } else {
                n as f64 / total as f64
            }
        };

        TrackerStats {
            active,
            archived,
            filled,
            cancelled,
            rejected,
            expired,
            fill_rate: rate(filled),
            cancel_rate: rate(cancelled),
            error_rate: rate(rejected),
        }
    }

    /// Move a terminal order into the archive, pruning by age and size.
    fn archive(&self, state: &mut TrackerState, done: Tracked) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.archive_retention)
                .unwrap_or_else(|_| chrono::Duration::seconds(0));
        while let Some(front) = state.archive.front() {
            if front.order.updated_at < cutoff {
                state.archive.pop_front();
            } else {
                break;
            }
        }
        while state.archive.len() >= self.config.max_archived {
            state.archive.pop_front();
        }
        state.archive.push_back(done);
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, TrackerState> {
        self.state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, TrackerState> {
        self.state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
