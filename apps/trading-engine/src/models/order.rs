//! Order-related types for execution tracking.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    /// Buy order.
    Buy,
    /// Sell order.
    Sell,
}

/// Order kind (market, limit, etc.).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderKind {
    /// Market order - execute at best available price.
    Market,
    /// Limit order - execute at specified price or better.
    Limit,
    /// Stop order - becomes market order when stop price is reached.
    Stop,
    /// Stop-limit order - becomes limit order when stop price is reached.
    StopLimit,
    /// Immediate-or-cancel - fill what is immediately available, cancel the rest.
    Ioc,
    /// Fill-or-kill - fill completely and immediately or not at all.
    Fok,
}

impl OrderKind {
    /// Returns true if this kind requires a limit price.
    #[must_use]
    pub const fn requires_limit_price(&self) -> bool {
        matches!(self, Self::Limit | Self::StopLimit | Self::Ioc | Self::Fok)
    }

    /// Returns true if this kind requires a stop price.
    #[must_use]
    pub const fn requires_stop_price(&self) -> bool {
        matches!(self, Self::Stop | Self::StopLimit)
    }

    /// Lowercase label for metrics and logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::Limit => "limit",
            Self::Stop => "stop",
            Self::StopLimit => "stop_limit",
            Self::Ioc => "ioc",
            Self::Fok => "fok",
        }
    }
}

/// Time in force for orders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeInForce {
    /// Valid for current trading day only.
    #[default]
    Day,
    /// Good-til-canceled (broker-specific limit: typically 30-90 days).
    Gtc,
    /// Immediate-or-cancel (fill immediately, cancel remainder).
    Ioc,
    /// Fill-or-kill (all or nothing, immediate execution required).
    Fok,
}

/// Order status in the lifecycle.
///
/// `Pending` and `Submitted` are the only states that may transition on
/// external events; `Filled`, `Cancelled`, `Rejected`, and `Expired` are
/// terminal and immutable once reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Order created but not yet submitted to a broker.
    Pending,
    /// Order accepted by broker, working at the venue.
    Submitted,
    /// Order partially filled.
    PartiallyFilled,
    /// Order completely filled.
    Filled,
    /// Order cancelled.
    Cancelled,
    /// Order rejected by broker or by validation.
    Rejected,
    /// Order expired at the venue.
    Expired,
}

impl OrderStatus {
    /// Returns true if the order is in a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Cancelled | Self::Rejected | Self::Expired
        )
    }

    /// Returns true if the order is still active (can be filled or cancelled).
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Submitted | Self::PartiallyFilled)
    }

    /// Check whether a transition from `self` to `next` is legal.
    ///
    /// `PartiallyFilled` may transition to itself (subsequent partial fills).
    /// Terminal states permit no transitions.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            // From Pending
            (Self::Pending, Self::Submitted)
                | (Self::Pending, Self::Cancelled)
                | (Self::Pending, Self::Rejected)
                // From Submitted
                | (Self::Submitted, Self::PartiallyFilled)
                | (Self::Submitted, Self::Filled)
                | (Self::Submitted, Self::Cancelled)
                | (Self::Submitted, Self::Rejected)
                | (Self::Submitted, Self::Expired)
                // From PartiallyFilled
                | (Self::PartiallyFilled, Self::PartiallyFilled)
                | (Self::PartiallyFilled, Self::Filled)
                | (Self::PartiallyFilled, Self::Cancelled)
                | (Self::PartiallyFilled, Self::Expired)
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Submitted => "SUBMITTED",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Filled => "FILLED",
            Self::Cancelled => "CANCELLED",
            Self::Rejected => "REJECTED",
            Self::Expired => "EXPIRED",
        };
        f.write_str(s)
    }
}

/// A single recorded status transition in an order's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEvent {
    /// Status before the transition.
    pub from: OrderStatus,
    /// Status after the transition.
    pub to: OrderStatus,
    /// When the transition was applied.
    pub timestamp: DateTime<Utc>,
    /// Optional broker or engine detail (fill size, reject reason).
    pub detail: Option<String>,
}

/// An order: the intent to trade a single symbol.
///
/// Custody: the order manager owns the order while it is queued for
/// submission; the lifecycle tracker owns it thereafter. All status
/// mutation happens under the tracker's lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Process-unique order ID.
    pub id: String,
    /// Broker-assigned order ID, set once the venue accepts the order.
    pub broker_order_id: Option<String>,
    /// Traded symbol.
    pub symbol: String,
    /// Buy or sell.
    pub side: OrderSide,
    /// Order kind.
    pub kind: OrderKind,
    /// Requested quantity.
    pub quantity: Decimal,
    /// Limit price (required for limit kinds).
    pub limit_price: Option<Decimal>,
    /// Stop price (required for stop kinds).
    pub stop_price: Option<Decimal>,
    /// Time in force.
    pub time_in_force: TimeInForce,
    /// Current lifecycle status.
    pub status: OrderStatus,
    /// Quantity filled so far.
    pub filled_quantity: Decimal,
    /// Average fill price over all fills.
    pub avg_fill_price: Decimal,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Error detail for rejected orders.
    pub error: Option<String>,
}

impl Order {
    /// Create a new order in `Pending` status with a fresh ID.
    #[must_use]
    pub fn new(
        symbol: impl Into<String>,
        side: OrderSide,
        kind: OrderKind,
        quantity: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            broker_order_id: None,
            symbol: symbol.into(),
            side,
            kind,
            quantity,
            limit_price: None,
            stop_price: None,
            time_in_force: TimeInForce::Day,
            status: OrderStatus::Pending,
            filled_quantity: Decimal::ZERO,
            avg_fill_price: Decimal::ZERO,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    /// Convenience constructor for a market order.
    #[must_use]
    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: Decimal) -> Self {
        Self::new(symbol, side, OrderKind::Market, quantity)
    }

    /// Convenience constructor for a limit order.
    #[must_use]
    pub fn limit(
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        limit_price: Decimal,
    ) -> Self {
        Self::new(symbol, side, OrderKind::Limit, quantity).with_limit_price(limit_price)
    }

    /// Set the limit price.
    #[must_use]
    pub const fn with_limit_price(mut self, price: Decimal) -> Self {
        self.limit_price = Some(price);
        self
    }

    /// Set the stop price.
    #[must_use]
    pub const fn with_stop_price(mut self, price: Decimal) -> Self {
        self.stop_price = Some(price);
        self
    }

    /// Set the time in force.
    #[must_use]
    pub const fn with_time_in_force(mut self, tif: TimeInForce) -> Self {
        self.time_in_force = tif;
        self
    }

    /// Quantity still unfilled.
    #[must_use]
    pub fn remaining_quantity(&self) -> Decimal {
        self.quantity - self.filled_quantity
    }

    /// Returns true if the order has reached a terminal status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Validate order parameters before enqueueing.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint: empty symbol, non-positive
    /// quantity, or a missing/non-positive price required by the order kind.
    pub fn validate(&self) -> Result<(), OrderValidationError> {
        if self.symbol.trim().is_empty() {
            return Err(OrderValidationError::EmptySymbol);
        }
        if self.quantity <= Decimal::ZERO {
            return Err(OrderValidationError::NonPositiveQuantity(self.quantity));
        }
        if self.kind.requires_limit_price() {
            match self.limit_price {
                None => return Err(OrderValidationError::MissingLimitPrice { kind: self.kind }),
                Some(p) if p <= Decimal::ZERO => {
                    return Err(OrderValidationError::NonPositivePrice {
                        field: "limit_price",
                        value: p,
                    });
                }
                Some(_) => {}
            }
        }
        if self.kind.requires_stop_price() {
            match self.stop_price {
                None => return Err(OrderValidationError::MissingStopPrice { kind: self.kind }),
                Some(p) if p <= Decimal::ZERO => {
                    return Err(OrderValidationError::NonPositivePrice {
                        field: "stop_price",
                        value: p,
                    });
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Parameter violations caught before an order is enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderValidationError {
    /// Symbol is empty or whitespace.
    #[error("order symbol must not be empty")]
    EmptySymbol,
    /// Quantity is zero or negative.
    #[error("order quantity must be positive, got {0}")]
    NonPositiveQuantity(Decimal),
    /// Limit price missing for a kind that requires one.
    #[error("{kind:?} order requires a limit price")]
    MissingLimitPrice {
        /// The offending order kind.
        kind: OrderKind,
    },
    /// Stop price missing for a kind that requires one.
    #[error("{kind:?} order requires a stop price")]
    MissingStopPrice {
        /// The offending order kind.
        kind: OrderKind,
    },
    /// A supplied price is zero or negative.
    #[error("{field} must be positive, got {value}")]
    NonPositivePrice {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: Decimal,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_status_terminal() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(OrderStatus::Expired.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::Submitted.is_terminal());
    }

    #[test]
    fn test_order_status_active() {
        assert!(OrderStatus::Pending.is_active());
        assert!(OrderStatus::Submitted.is_active());
        assert!(OrderStatus::PartiallyFilled.is_active());
        assert!(!OrderStatus::Filled.is_active());
    }

    #[test]
    fn test_valid_transitions() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Submitted));
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Cancelled));
        assert!(OrderStatus::Submitted.can_transition_to(OrderStatus::PartiallyFilled));
        assert!(OrderStatus::Submitted.can_transition_to(OrderStatus::Filled));
        assert!(OrderStatus::PartiallyFilled.can_transition_to(OrderStatus::PartiallyFilled));
        assert!(OrderStatus::PartiallyFilled.can_transition_to(OrderStatus::Filled));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Filled));
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::PartiallyFilled));
        assert!(!OrderStatus::Filled.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Cancelled.can_transition_to(OrderStatus::Submitted));
        assert!(!OrderStatus::Rejected.can_transition_to(OrderStatus::Pending));
    }

    #[test]
    fn test_no_transitions_from_terminal() {
        let all = [
            OrderStatus::Pending,
            OrderStatus::Submitted,
            OrderStatus::PartiallyFilled,
            OrderStatus::Filled,
            OrderStatus::Cancelled,
            OrderStatus::Rejected,
            OrderStatus::Expired,
        ];
        for terminal in [
            OrderStatus::Filled,
            OrderStatus::Cancelled,
            OrderStatus::Rejected,
            OrderStatus::Expired,
        ] {
            for next in all {
                assert!(
                    !terminal.can_transition_to(next),
                    "{terminal} -> {next} should be rejected"
                );
            }
        }
    }

    #[test]
    fn test_market_order_validates() {
        let order = Order::market("AAPL", OrderSide::Buy, dec!(10));
        assert!(order.validate().is_ok());
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.remaining_quantity(), dec!(10));
    }

    #[test]
    fn test_limit_order_requires_price() {
        let order = Order::new("AAPL", OrderSide::Buy, OrderKind::Limit, dec!(10));
        assert_eq!(
            order.validate(),
            Err(OrderValidationError::MissingLimitPrice {
                kind: OrderKind::Limit
            })
        );

        let order = order.with_limit_price(dec!(150));
        assert!(order.validate().is_ok());
    }

    #[test]
    fn test_stop_order_requires_stop_price() {
        let order = Order::new("MSFT", OrderSide::Sell, OrderKind::Stop, dec!(5));
        assert!(matches!(
            order.validate(),
            Err(OrderValidationError::MissingStopPrice { .. })
        ));
    }

    #[test]
    fn test_rejects_non_positive_quantity() {
        let order = Order::market("AAPL", OrderSide::Buy, Decimal::ZERO);
        assert!(matches!(
            order.validate(),
            Err(OrderValidationError::NonPositiveQuantity(_))
        ));
    }

    #[test]
    fn test_rejects_empty_symbol() {
        let order = Order::market("  ", OrderSide::Buy, dec!(1));
        assert_eq!(order.validate(), Err(OrderValidationError::EmptySymbol));
    }

    #[test]
    fn test_rejects_non_positive_limit_price() {
        let order = Order::limit("AAPL", OrderSide::Buy, dec!(1), dec!(-5));
        assert!(matches!(
            order.validate(),
            Err(OrderValidationError::NonPositivePrice { .. })
        ));
    }
}
