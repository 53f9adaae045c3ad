//! Order confirmation tiers and the confirm/reject round-trip.
//!
//! Every order routed through the confirmation manager is assigned a
//! risk tier from its value, quantity, daily activity, concentration,
//! and margin usage. Low tiers execute immediately; higher tiers are
//! parked under a server-issued expiring token until an operator
//! confirms or rejects them; Critical blocks outright. Expired requests
//! are pruned on the next read, never confirmed.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::live::fund_monitor::FundMonitor;
use crate::models::{Order, OrderSide};
use crate::observability::metrics;
use crate::orders::OrderManager;
use crate::risk::{RiskEvent, RiskEventKind, RiskManager, RiskSeverity, format_percent};

/// Risk tier assigned to a proposed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskTier {
    /// Routine order, eligible for automatic execution.
    Low,
    /// Elevated, requires confirmation.
    Medium,
    /// Substantial, requires confirmation.
    High,
    /// Never executed through this path.
    Critical,
}

impl RiskTier {
    /// Lowercase label for logs and messages.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Confirmation flow failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfirmationError {
    /// The token does not match any pending request.
    #[error("unknown confirmation token: {token}")]
    UnknownToken {
        /// The unrecognized token.
        token: String,
    },

    /// The request expired before it was confirmed.
    #[error("confirmation token expired: {token}")]
    Expired {
        /// The expired token.
        token: String,
    },

    /// Strict mode requires a secondary code that was not supplied.
    #[error("secondary confirmation code required")]
    CodeRequired,

    /// The supplied secondary code does not match.
    #[error("secondary confirmation code does not match")]
    CodeMismatch,
}

/// Confirmation tiering thresholds and round-trip settings.
#[derive(Debug, Clone)]
pub struct ConfirmationConfig {
    /// When false, every order passes straight through.
    pub enabled: bool,
    /// Highest tier that executes without a confirmation round-trip.
    pub auto_execute_max_tier: RiskTier,
    /// Order notional that reaches the Medium tier.
    pub medium_value_threshold: Decimal,
    /// Order notional that reaches the High tier.
    pub high_value_threshold: Decimal,
    /// Order notional that reaches the Critical tier.
    pub critical_value_threshold: Decimal,
    /// Share quantity treated as High regardless of notional.
    pub large_quantity_threshold: Decimal,
    /// Orders per day before further orders escalate to High.
    pub max_daily_orders: u32,
    /// Notional per day before further orders escalate to High.
    pub max_daily_volume: Decimal,
    /// Projected position weight that escalates a buy to High.
    pub concentration_threshold: Decimal,
    /// Margin usage fraction that escalates to High.
    pub margin_usage_threshold: Decimal,
    /// How long a pending request stays confirmable.
    pub token_ttl: Duration,
    /// Require the secondary code on every confirm.
    pub strict: bool,
    /// Secondary code checked in strict mode.
    pub secondary_code: Option<String>,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_execute_max_tier: RiskTier::Low,
            medium_value_threshold: Decimal::from(10_000),
            high_value_threshold: Decimal::from(50_000),
            critical_value_threshold: Decimal::from(250_000),
            large_quantity_threshold: Decimal::from(10_000),
            max_daily_orders: 100,
            max_daily_volume: Decimal::from(1_000_000),
            concentration_threshold: Decimal::new(25, 2),
            margin_usage_threshold: Decimal::new(80, 2),
            token_ttl: Duration::minutes(5),
            strict: false,
            secondary_code: None,
        }
    }
}

/// What happened to a requested order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfirmationOutcome {
    /// Executed immediately; the order is queued for submission.
    AutoApproved {
        /// Engine order ID.
        order_id: String,
    },
    /// Held for an operator confirm/reject round-trip.
    PendingConfirmation {
        /// Token to confirm or reject with.
        token: String,
        /// Computed tier.
        tier: RiskTier,
        /// When the token stops being confirmable.
        expires_at: DateTime<Utc>,
        /// Factors that raised the tier.
        reasons: Vec<String>,
    },
    /// Refused outright.
    Blocked {
        /// Why the order was refused.
        reason: String,
    },
}

/// A parked order awaiting confirmation.
#[derive(Debug, Clone, Serialize)]
pub struct PendingRequest {
    /// Confirmation token.
    pub token: String,
    /// The held order.
    pub order: Order,
    /// Computed tier.
    pub tier: RiskTier,
    /// Factors that raised the tier.
    pub reasons: Vec<String>,
    /// Price used to compute the order notional.
    pub reference_price: Decimal,
    /// When the request was created.
    pub created_at: DateTime<Utc>,
    /// When the request expires.
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct DailyCounters {
    day: Option<NaiveDate>,
    orders: u32,
    volume: Decimal,
}

/// Assigns risk tiers and brokers the confirmation round-trip.
pub struct ConfirmationManager {
    config: ConfirmationConfig,
    orders: Arc<OrderManager>,
    risk: Arc<RiskManager>,
    fund: Option<Arc<FundMonitor>>,
    pending: RwLock<HashMap<String, PendingRequest>>,
    counters: RwLock<DailyCounters>,
}

impl ConfirmationManager {
    /// Create a confirmation manager. `fund` supplies margin usage for
    /// tiering when present.
    #[must_use]
    pub fn new(
        config: ConfirmationConfig,
        orders: Arc<OrderManager>,
        risk: Arc<RiskManager>,
        fund: Option<Arc<FundMonitor>>,
    ) -> Self {
        Self {
            config,
            orders,
            risk,
            fund,
            pending: RwLock::new(HashMap::new()),
            counters: RwLock::new(DailyCounters::default()),
        }
    }

    /// Tier an order and execute, hold, or block it.
    ///
    /// `reference_price` prices the notional for tiering (market orders
    /// carry no price of their own).
    pub fn request(&self, order: Order, reference_price: Decimal) -> ConfirmationOutcome {
        let notional = (order.quantity * reference_price).abs();
        if !self.config.enabled {
            return self.approve(order, notional);
        }

        let now = Utc::now();
        let (tier, reasons) = self.assess(&order, notional, now);

        if tier == RiskTier::Critical {
            let reason = format!("critical risk tier: {}", reasons.join("; "));
            warn!(symbol = %order.symbol, reason = %reason, "order blocked by confirmation");
            metrics::record_trade_blocked("confirmation_critical");
            self.risk.events().record(
                RiskEvent::new(
                    RiskEventKind::Confirmation,
                    RiskSeverity::Critical,
                    reason.clone(),
                )
                .with_symbol(order.symbol.clone()),
            );
            return ConfirmationOutcome::Blocked { reason };
        }

        if tier <= self.config.auto_execute_max_tier {
            return self.approve(order, notional);
        }

        let token = Uuid::new_v4().to_string();
        let request = PendingRequest {
            token: token.clone(),
            order,
            tier,
            reasons: reasons.clone(),
            reference_price,
            created_at: now,
            expires_at: now + self.config.token_ttl,
        };
        let expires_at = request.expires_at;
        info!(
            token = %token,
            tier = %tier,
            symbol = %request.order.symbol,
            expires_at = %expires_at,
            "order held for confirmation"
        );
        self.write_pending().insert(token.clone(), request);

        ConfirmationOutcome::PendingConfirmation {
            token,
            tier,
            expires_at,
            reasons,
        }
    }

    /// Confirm a pending request and queue its order for submission.
    ///
    /// # Errors
    ///
    /// [`ConfirmationError::UnknownToken`] and
    /// [`ConfirmationError::Expired`] for bad tokens;
    /// [`ConfirmationError::CodeRequired`] and
    /// [`ConfirmationError::CodeMismatch`] in strict mode; submission
    /// errors propagate from the order manager.
    pub fn confirm(&self, token: &str, code: Option<&str>) -> Result<String, EngineError> {
        let now = Utc::now();
        {
            let pending = self.read_pending();
            let Some(request) = pending.get(token) else {
                return Err(ConfirmationError::UnknownToken {
                    token: token.to_string(),
                }
                .into());
            };
            if request.expires_at <= now {
                drop(pending);
                self.write_pending().remove(token);
                debug!(token, "confirmation token expired");
                return Err(ConfirmationError::Expired {
                    token: token.to_string(),
                }
                .into());
            }
            if self.config.strict {
                match (self.config.secondary_code.as_deref(), code) {
                    (Some(expected), Some(supplied)) if supplied == expected => {}
                    (_, None) | (None, _) => return Err(ConfirmationError::CodeRequired.into()),
                    (Some(_), Some(_)) => return Err(ConfirmationError::CodeMismatch.into()),
                }
            }
        }

        // Remove before submitting so a racing confirm cannot submit twice.
        let Some(request) = self.write_pending().remove(token) else {
            return Err(ConfirmationError::UnknownToken {
                token: token.to_string(),
            }
            .into());
        };
        let notional = (request.order.quantity * request.reference_price).abs();
        let order_id = self.orders.submit_order(request.order)?;
        self.bump_counters(notional);
        info!(token, order_id = %order_id, "confirmation accepted");
        Ok(order_id)
    }

    /// Reject a pending request, discarding its order.
    ///
    /// # Errors
    ///
    /// [`ConfirmationError::UnknownToken`] when the token has no pending
    /// request.
    pub fn reject(&self, token: &str, reason: &str) -> Result<(), EngineError> {
        let Some(request) = self.write_pending().remove(token) else {
            return Err(ConfirmationError::UnknownToken {
                token: token.to_string(),
            }
            .into());
        };
        warn!(token, symbol = %request.order.symbol, reason, "confirmation rejected");
        self.risk.events().record(
            RiskEvent::new(
                RiskEventKind::Confirmation,
                RiskSeverity::Info,
                format!("confirmation rejected: {reason}"),
            )
            .with_symbol(request.order.symbol.clone()),
        );
        Ok(())
    }

    /// Pending requests, oldest first. Expired entries are pruned.
    #[must_use]
    pub fn pending(&self) -> Vec<PendingRequest> {
        self.prune_expired(Utc::now());
        let mut entries: Vec<PendingRequest> = self.read_pending().values().cloned().collect();
        entries.sort_by_key(|r| r.created_at);
        entries
    }

    fn approve(&self, order: Order, notional: Decimal) -> ConfirmationOutcome {
        match self.orders.submit_order(order) {
            Ok(order_id) => {
                self.bump_counters(notional);
                debug!(order_id = %order_id, "order auto-approved");
                ConfirmationOutcome::AutoApproved { order_id }
            }
            Err(e) => ConfirmationOutcome::Blocked {
                reason: e.to_string(),
            },
        }
    }

    fn assess(
        &self,
        order: &Order,
        notional: Decimal,
        now: DateTime<Utc>,
    ) -> (RiskTier, Vec<String>) {
        let mut tier = RiskTier::Low;
        let mut reasons = Vec::new();

        let value_tier = if notional >= self.config.critical_value_threshold {
            Some((RiskTier::Critical, self.config.critical_value_threshold))
        } else if notional >= self.config.high_value_threshold {
            Some((RiskTier::High, self.config.high_value_threshold))
        } else if notional >= self.config.medium_value_threshold {
            Some((RiskTier::Medium, self.config.medium_value_threshold))
        } else {
            None
        };
        if let Some((candidate, threshold)) = value_tier {
            bump(
                &mut tier,
                &mut reasons,
                candidate,
                format!("order value {notional} meets the {candidate} threshold {threshold}"),
            );
        }

        if order.quantity.abs() >= self.config.large_quantity_threshold {
            bump(
                &mut tier,
                &mut reasons,
                RiskTier::High,
                format!(
                    "quantity {} at or above the large-order threshold {}",
                    order.quantity.abs(),
                    self.config.large_quantity_threshold
                ),
            );
        }

        let (orders_today, volume_today) = self.current_counters(now);
        if orders_today >= self.config.max_daily_orders {
            bump(
                &mut tier,
                &mut reasons,
                RiskTier::High,
                format!(
                    "daily order count {orders_today} at or above the limit {}",
                    self.config.max_daily_orders
                ),
            );
        }
        if volume_today + notional > self.config.max_daily_volume {
            bump(
                &mut tier,
                &mut reasons,
                RiskTier::High,
                format!(
                    "daily order volume would exceed the limit {}",
                    self.config.max_daily_volume
                ),
            );
        }

        // Sells reduce exposure; concentration applies to buys only.
        if order.side == OrderSide::Buy {
            let portfolio = self.risk.portfolio();
            let total = portfolio.total_value();
            if total > Decimal::ZERO {
                let current = portfolio.position_weight(&order.symbol) * total;
                let projected = (current + notional) / total;
                if projected >= self.config.concentration_threshold {
                    bump(
                        &mut tier,
                        &mut reasons,
                        RiskTier::High,
                        format!(
                            "position concentration would reach {}, threshold is {}",
                            format_percent(projected),
                            format_percent(self.config.concentration_threshold)
                        ),
                    );
                }
            }
        }

        if let Some(snapshot) = self.fund.as_ref().and_then(|f| f.latest()) {
            let usage = snapshot.margin_usage();
            if usage >= self.config.margin_usage_threshold {
                bump(
                    &mut tier,
                    &mut reasons,
                    RiskTier::High,
                    format!(
                        "margin usage {} at or above {}",
                        format_percent(usage),
                        format_percent(self.config.margin_usage_threshold)
                    ),
                );
            }
        }

        (tier, reasons)
    }

    fn prune_expired(&self, now: DateTime<Utc>) {
        let mut pending = self.write_pending();
        let before = pending.len();
        pending.retain(|_, request| request.expires_at > now);
        let removed = before - pending.len();
        if removed > 0 {
            debug!(removed, "pruned expired confirmation requests");
        }
    }

    fn current_counters(&self, now: DateTime<Utc>) -> (u32, Decimal) {
        let mut counters = self.write_counters();
        Self::roll_day(&mut counters, now);
        (counters.orders, counters.volume)
    }

    fn bump_counters(&self, notional: Decimal) {
        let mut counters = self.write_counters();
        Self::roll_day(&mut counters, Utc::now());
        counters.orders += 1;
        counters.volume += notional;
    }

    fn roll_day(counters: &mut DailyCounters, now: DateTime<Utc>) {
        let today = now.date_naive();
        if counters.day != Some(today) {
            counters.day = Some(today);
            counters.orders = 0;
            counters.volume = Decimal::ZERO;
        }
    }

    fn read_pending(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, PendingRequest>> {
        self.pending
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_pending(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, PendingRequest>> {
        self.pending
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_counters(&self) -> std::sync::RwLockWriteGuard<'_, DailyCounters> {
        self.counters
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ConfirmationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfirmationManager")
            .field("enabled", &self.config.enabled)
            .field("strict", &self.config.strict)
            .field("pending", &self.read_pending().len())
            .finish_non_exhaustive()
    }
}

/// Raise `tier` to `candidate` if higher, recording the reason either way.
fn bump(tier: &mut RiskTier, reasons: &mut Vec<String>, candidate: RiskTier, reason: String) {
    if candidate > *tier {
        *tier = candidate;
    }
    reasons.push(reason);
}
