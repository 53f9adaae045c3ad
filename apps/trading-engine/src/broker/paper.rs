//! In-process simulated broker.
//!
//! `PaperBroker` plays the venue role for paper trading and for tests:
//! it keeps its own order, position, and cash books, serves seeded
//! quotes, and exposes failure-injection hooks so retry, reconnect, and
//! rejection paths can be exercised deterministically.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;

use crate::models::{AccountSnapshot, Order, OrderSide, OrderStatus, Position, Quote};

use super::{BrokerClient, BrokerError};

/// How the simulated venue fills incoming orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    /// Fill the full quantity immediately on placement.
    Immediate,
    /// Fill half on placement, the remainder on the next status poll.
    PartialThenComplete,
    /// Rest as `Submitted` until cancelled.
    Working,
}

#[derive(Debug, Default)]
struct PaperBook {
    orders: HashMap<String, Order>,
    positions: HashMap<String, Position>,
    quotes: HashMap<String, Quote>,
    cash: Decimal,
    pending_rejects: VecDeque<String>,
}

/// Simulated broker adapter.
pub struct PaperBroker {
    connected: AtomicBool,
    order_counter: AtomicU64,
    transient_failures: AtomicU32,
    connect_failures: AtomicU32,
    probe_delay_ms: AtomicU64,
    fill_mode: RwLock<FillMode>,
    book: RwLock<PaperBook>,
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl PaperBroker {
    /// Create a disconnected paper broker with an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            order_counter: AtomicU64::new(0),
            transient_failures: AtomicU32::new(0),
            connect_failures: AtomicU32::new(0),
            probe_delay_ms: AtomicU64::new(0),
            fill_mode: RwLock::new(FillMode::Immediate),
            book: RwLock::new(PaperBook::default()),
        }
    }

    /// Seed starting cash.
    #[must_use]
    pub fn with_cash(self, cash: Decimal) -> Self {
        self.write_book().cash = cash;
        self
    }

    /// Seed a quote at `last`, with a synthetic one-tick spread.
    #[must_use]
    pub fn with_quote(self, symbol: &str, last: Decimal) -> Self {
        self.set_quote(symbol, last);
        self
    }

    /// Set the fill mode.
    #[must_use]
    pub fn with_fill_mode(self, mode: FillMode) -> Self {
        self.set_fill_mode(mode);
        self
    }

    /// Change the fill mode.
    pub fn set_fill_mode(&self, mode: FillMode) {
        *self
            .fill_mode
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = mode;
    }

    /// Update or insert a quote.
    pub fn set_quote(&self, symbol: &str, last: Decimal) {
        let spread = last * Decimal::new(1, 3); // 0.1%
        let quote = Quote {
            symbol: symbol.to_string(),
            last,
            bid: last - spread,
            ask: last + spread,
            volume: Decimal::ZERO,
            timestamp: Utc::now(),
        };
        self.write_book().quotes.insert(symbol.to_string(), quote);
    }

    /// Nudge every seeded quote by a random step of at most `max_bps`
    /// basis points in either direction.
    pub fn walk_quotes(&self, max_bps: i64) {
        if max_bps <= 0 {
            return;
        }
        let mut rng = rand::rng();
        let stepped: Vec<(String, Decimal)> = self
            .read_book()
            .quotes
            .iter()
            .map(|(symbol, quote)| {
                let bps = rng.random_range(-max_bps..=max_bps);
                let factor = Decimal::ONE + Decimal::new(bps, 4);
                (symbol.clone(), (quote.last * factor).round_dp(4))
            })
            .collect();
        for (symbol, last) in stepped {
            self.set_quote(&symbol, last);
        }
    }

    /// Queue a one-shot venue rejection for the next placed order.
    pub fn inject_rejection(&self, reason: &str) {
        self.write_book().pending_rejects.push_back(reason.to_string());
    }

    /// Fail the next `n` order placements with a transient error.
    pub fn inject_transient_failures(&self, n: u32) {
        self.transient_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` connect attempts.
    pub fn inject_connect_failures(&self, n: u32) {
        self.connect_failures.store(n, Ordering::SeqCst);
    }

    /// Delay account probes by `delay` to simulate venue latency.
    pub fn set_probe_delay(&self, delay: Duration) {
        self.probe_delay_ms
            .store(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), Ordering::SeqCst);
    }

    /// Drop the session without a clean disconnect (simulated outage).
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn write_book(&self) -> std::sync::RwLockWriteGuard<'_, PaperBook> {
        self.book
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn read_book(&self) -> std::sync::RwLockReadGuard<'_, PaperBook> {
        self.book
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn ensure_connected(&self) -> Result<(), BrokerError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::NotConnected)
        }
    }

    fn fill_mode(&self) -> FillMode {
        *self
            .fill_mode
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Price at which the venue executes `order`.
    fn execution_price(book: &PaperBook, order: &Order) -> Result<Decimal, BrokerError> {
        if let Some(quote) = book.quotes.get(&order.symbol) {
            return Ok(quote.last);
        }
        order.limit_price.ok_or_else(|| BrokerError::Rejected {
            reason: format!("no market for symbol {}", order.symbol),
        })
    }

    /// Apply an execution to the cash and position books.
    fn settle(book: &mut PaperBook, order: &Order, quantity: Decimal, price: Decimal) {
        let position = book
            .positions
            .entry(order.symbol.clone())
            .or_insert_with(|| Position::new(order.symbol.clone()));
        position.apply_fill(order.side, quantity, price);
        let flat = position.is_flat();
        if flat {
            book.positions.remove(&order.symbol);
        }

        let notional = quantity * price;
        match order.side {
            OrderSide::Buy => book.cash -= notional,
            OrderSide::Sell => book.cash += notional,
        }
    }

    fn fill(book: &mut PaperBook, order: &mut Order, quantity: Decimal, price: Decimal) {
        let prior_notional = order.avg_fill_price * order.filled_quantity;
        order.filled_quantity += quantity;
        order.avg_fill_price = (prior_notional + quantity * price) / order.filled_quantity;
        order.status = if order.filled_quantity >= order.quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        order.updated_at = Utc::now();
        Self::settle(book, order, quantity, price);
    }
}

#[async_trait]
impl BrokerClient for PaperBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        let remaining = self.connect_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.connect_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(BrokerError::Transient {
                detail: "simulated connect failure".to_string(),
            });
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn place_order(&self, order: &Order) -> Result<String, BrokerError> {
        self.ensure_connected()?;

        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(BrokerError::Transient {
                detail: "simulated venue timeout".to_string(),
            });
        }

        let mode = self.fill_mode();
        let mut book = self.write_book();

        if let Some(reason) = book.pending_rejects.pop_front() {
            return Err(BrokerError::Rejected { reason });
        }

        let price = Self::execution_price(&book, order)?;
        let broker_id = format!("paper-{}", self.order_counter.fetch_add(1, Ordering::SeqCst) + 1);

        let mut placed = order.clone();
        placed.broker_order_id = Some(broker_id.clone());
        placed.status = OrderStatus::Submitted;
        placed.updated_at = Utc::now();

        match mode {
            FillMode::Immediate => {
                let quantity = placed.quantity;
                Self::fill(&mut book, &mut placed, quantity, price);
            }
            FillMode::PartialThenComplete => {
                let half = (placed.quantity / Decimal::from(2)).round_dp(8);
                Self::fill(&mut book, &mut placed, half, price);
            }
            FillMode::Working => {}
        }

        book.orders.insert(broker_id.clone(), placed);
        Ok(broker_id)
    }

    async fn cancel_order(&self, broker_order_id: &str) -> Result<(), BrokerError> {
        self.ensure_connected()?;
        let mut book = self.write_book();
        let order = book
            .orders
            .get_mut(broker_order_id)
            .ok_or_else(|| BrokerError::OrderNotFound {
                broker_order_id: broker_order_id.to_string(),
            })?;
        if order.status.is_terminal() {
            return Err(BrokerError::NotCancelable {
                broker_order_id: broker_order_id.to_string(),
            });
        }
        order.status = OrderStatus::Cancelled;
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn get_order(&self, broker_order_id: &str) -> Result<Order, BrokerError> {
        self.ensure_connected()?;
        let mode = self.fill_mode();
        let mut book = self.write_book();

        let Some(order) = book.orders.get(broker_order_id).cloned() else {
            return Err(BrokerError::OrderNotFound {
                broker_order_id: broker_order_id.to_string(),
            });
        };

        // A partially filled order completes behind this poll: the caller
        // sees the partial state now and the completed fill next poll.
        if mode == FillMode::PartialThenComplete && order.status == OrderStatus::PartiallyFilled {
            let price = Self::execution_price(&book, &order)?;
            let mut completed = order.clone();
            let remainder = completed.remaining_quantity();
            Self::fill(&mut book, &mut completed, remainder, price);
            book.orders.insert(broker_order_id.to_string(), completed);
        }

        Ok(order)
    }

    async fn get_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>, BrokerError> {
        self.ensure_connected()?;
        let book = self.read_book();
        Ok(book
            .orders
            .values()
            .filter(|o| status.is_none_or(|s| o.status == s))
            .cloned()
            .collect())
    }

    async fn get_positions(&self) -> Result<HashMap<String, Position>, BrokerError> {
        self.ensure_connected()?;
        Ok(self.read_book().positions.clone())
    }

    async fn get_account(&self) -> Result<AccountSnapshot, BrokerError> {
        let delay = self.probe_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.ensure_connected()?;

        let book = self.read_book();
        let positions_value: Decimal = book.positions.values().map(Position::market_value).sum();
        let equity = book.cash + positions_value;
        let short_notional: Decimal = book
            .positions
            .values()
            .filter(|p| !p.is_long())
            .map(|p| p.market_value().abs())
            .sum();
        let buying_power = book.cash * Decimal::from(2);

        let mut position_weights = HashMap::new();
        if !equity.is_zero() {
            for (symbol, position) in &book.positions {
                position_weights
                    .insert(symbol.clone(), position.market_value().abs() / equity);
            }
        }

        Ok(AccountSnapshot {
            cash: book.cash,
            buying_power,
            equity,
            margin_used: short_notional,
            margin_available: (buying_power - short_notional).max(Decimal::ZERO),
            position_weights,
            // Sector classification lives engine-side.
            sector_weights: HashMap::new(),
            taken_at: Utc::now(),
        })
    }

    async fn get_market_data(&self, symbol: &str) -> Result<Quote, BrokerError> {
        self.ensure_connected()?;
        self.read_book()
            .quotes
            .get(symbol)
            .cloned()
            .ok_or_else(|| BrokerError::InvalidOrder {
                reason: format!("unknown symbol {symbol}"),
            })
    }

    fn name(&self) -> &'static str {
        "paper"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderSide;
    use rust_decimal_macros::dec;

    async fn connected_broker() -> PaperBroker {
        let broker = PaperBroker::new()
            .with_cash(dec!(100000))
            .with_quote("AAPL", dec!(150));
        broker.connect().await.unwrap();
        broker
    }

    #[tokio::test]
    async fn test_place_requires_connection() {
        let broker = PaperBroker::new().with_quote("AAPL", dec!(150));
        let order = Order::market("AAPL", OrderSide::Buy, dec!(10));
        let err = broker.place_order(&order).await.unwrap_err();
        assert!(matches!(err, BrokerError::NotConnected));
    }

    #[tokio::test]
    async fn test_immediate_fill_settles_book() {
        let broker = connected_broker().await;
        let order = Order::market("AAPL", OrderSide::Buy, dec!(10));

        let broker_id = broker.place_order(&order).await.unwrap();
        let placed = broker.get_order(&broker_id).await.unwrap();
        assert_eq!(placed.status, OrderStatus::Filled);
        assert_eq!(placed.filled_quantity, dec!(10));
        assert_eq!(placed.avg_fill_price, dec!(150));

        let positions = broker.get_positions().await.unwrap();
        assert_eq!(positions["AAPL"].quantity, dec!(10));

        let account = broker.get_account().await.unwrap();
        assert_eq!(account.cash, dec!(98500));
        assert_eq!(account.equity, dec!(100000));
    }

    #[tokio::test]
    async fn test_partial_fill_completes_on_second_poll() {
        let broker = connected_broker().await;
        broker.set_fill_mode(FillMode::PartialThenComplete);

        let order = Order::market("AAPL", OrderSide::Buy, dec!(10));
        let broker_id = broker.place_order(&order).await.unwrap();

        let first = broker.get_order(&broker_id).await.unwrap();
        assert_eq!(first.status, OrderStatus::PartiallyFilled);
        assert_eq!(first.filled_quantity, dec!(5));

        let second = broker.get_order(&broker_id).await.unwrap();
        assert_eq!(second.status, OrderStatus::Filled);
        assert_eq!(second.filled_quantity, dec!(10));
    }

    #[tokio::test]
    async fn test_partial_fill_visible_before_poll() {
        let broker = connected_broker().await;
        broker.set_fill_mode(FillMode::PartialThenComplete);

        let order = Order::market("AAPL", OrderSide::Buy, dec!(10));
        let broker_id = broker.place_order(&order).await.unwrap();

        let orders = broker
            .get_orders(Some(OrderStatus::PartiallyFilled))
            .await
            .unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].broker_order_id.as_deref(), Some(broker_id.as_str()));
        assert_eq!(orders[0].filled_quantity, dec!(5));
    }

    #[tokio::test]
    async fn test_working_order_can_be_cancelled() {
        let broker = connected_broker().await;
        broker.set_fill_mode(FillMode::Working);

        let order = Order::limit("AAPL", OrderSide::Buy, dec!(10), dec!(140));
        let broker_id = broker.place_order(&order).await.unwrap();

        broker.cancel_order(&broker_id).await.unwrap();
        let cancelled = broker.get_order(&broker_id).await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);

        let err = broker.cancel_order(&broker_id).await.unwrap_err();
        assert!(matches!(err, BrokerError::NotCancelable { .. }));
    }

    #[tokio::test]
    async fn test_rejection_injection() {
        let broker = connected_broker().await;
        broker.inject_rejection("insufficient funds");

        let order = Order::market("AAPL", OrderSide::Buy, dec!(10));
        let err = broker.place_order(&order).await.unwrap_err();
        assert!(matches!(err, BrokerError::Rejected { reason } if reason == "insufficient funds"));

        // Next placement succeeds.
        assert!(broker.place_order(&order).await.is_ok());
    }

    #[tokio::test]
    async fn test_transient_injection_counts_down() {
        let broker = connected_broker().await;
        broker.inject_transient_failures(2);

        let order = Order::market("AAPL", OrderSide::Buy, dec!(1));
        assert!(broker.place_order(&order).await.unwrap_err().is_retryable());
        assert!(broker.place_order(&order).await.unwrap_err().is_retryable());
        assert!(broker.place_order(&order).await.is_ok());
    }

    #[tokio::test]
    async fn test_sell_to_flat_removes_position() {
        let broker = connected_broker().await;
        let buy = Order::market("AAPL", OrderSide::Buy, dec!(10));
        broker.place_order(&buy).await.unwrap();

        let sell = Order::market("AAPL", OrderSide::Sell, dec!(10));
        broker.place_order(&sell).await.unwrap();

        let positions = broker.get_positions().await.unwrap();
        assert!(positions.is_empty());
    }

    #[tokio::test]
    async fn test_market_data_unknown_symbol() {
        let broker = connected_broker().await;
        assert!(broker.get_market_data("ZZZZ").await.is_err());
        let quote = broker.get_market_data("AAPL").await.unwrap();
        assert_eq!(quote.last, dec!(150));
        assert!(quote.bid < quote.last && quote.ask > quote.last);
    }

    #[tokio::test]
    async fn test_quote_walk_stays_within_step_bound() {
        let broker = connected_broker().await;
        broker.set_quote("MSFT", dec!(300));

        for _ in 0..20 {
            let before_aapl = broker.get_market_data("AAPL").await.unwrap().last;
            let before_msft = broker.get_market_data("MSFT").await.unwrap().last;
            broker.walk_quotes(100);
            let after_aapl = broker.get_market_data("AAPL").await.unwrap().last;
            let after_msft = broker.get_market_data("MSFT").await.unwrap().last;
            // One 0.0001 grid step of slack for the round_dp in the walk.
            assert!((after_aapl - before_aapl).abs() <= before_aapl * dec!(0.01) + dec!(0.0001));
            assert!((after_msft - before_msft).abs() <= before_msft * dec!(0.01) + dec!(0.0001));
            assert!(after_aapl > Decimal::ZERO && after_msft > Decimal::ZERO);
        }

        let before = broker.get_market_data("AAPL").await.unwrap().last;
        broker.walk_quotes(0);
        assert_eq!(broker.get_market_data("AAPL").await.unwrap().last, before);
    }

    #[tokio::test]
    async fn test_connect_failure_injection() {
        let broker = PaperBroker::new();
        broker.inject_connect_failures(1);
        assert!(broker.connect().await.is_err());
        assert!(!broker.is_connected());
        assert!(broker.connect().await.is_ok());
        assert!(broker.is_connected());
    }
}
