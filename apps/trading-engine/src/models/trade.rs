//! Flat trade record for the append-only journal.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::order::{Order, OrderSide};

/// One executed trade, as written to the trade journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Originating order ID.
    pub order_id: String,
    /// Traded symbol.
    pub symbol: String,
    /// Buy or sell.
    pub side: OrderSide,
    /// Executed quantity.
    pub quantity: Decimal,
    /// Average execution price.
    pub price: Decimal,
    /// Commission charged.
    pub commission: Decimal,
    /// Transaction tax charged.
    pub tax: Decimal,
    /// Execution timestamp.
    pub timestamp: DateTime<Utc>,
}

impl TradeRecord {
    /// Build a record from a filled (or partially filled) order.
    #[must_use]
    pub fn from_order(order: &Order, quantity: Decimal, price: Decimal) -> Self {
        Self {
            order_id: order.id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            quantity,
            price,
            commission: Decimal::ZERO,
            tax: Decimal::ZERO,
            timestamp: Utc::now(),
        }
    }

    /// Traded notional value.
    #[must_use]
    pub fn notional(&self) -> Decimal {
        self.quantity * self.price
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_from_order_carries_identity() {
        let order = Order::market("AAPL", OrderSide::Buy, dec!(10));
        let record = TradeRecord::from_order(&order, dec!(10), dec!(150));
        assert_eq!(record.order_id, order.id);
        assert_eq!(record.symbol, "AAPL");
        assert_eq!(record.notional(), dec!(1500));
    }
}
