//! Risk event recording and query.
//!
//! Events are immutable once recorded apart from explicit resolution.
//! The store is bounded: oldest events fall off once the cap is reached.

use std::collections::VecDeque;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::observability::metrics;

/// What kind of risk occurrence an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskEventKind {
    /// A stop-loss evaluation fired.
    StopLoss,
    /// A take-profit evaluation fired.
    TakeProfit,
    /// A circuit breaker tripped or was reset.
    CircuitBreaker,
    /// A portfolio concentration cap rejected a trade.
    PortfolioLimit,
    /// The trade limiter rejected a trade.
    TradeLimit,
    /// An order confirmation was blocked or rejected.
    Confirmation,
    /// Margin or cash crossed an alert threshold.
    MarginAlert,
    /// Emergency liquidation ran.
    EmergencyStop,
    /// Trading was halted or resumed.
    TradingHalt,
}

impl RiskEventKind {
    /// Lowercase label for metrics.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::StopLoss => "stop_loss",
            Self::TakeProfit => "take_profit",
            Self::CircuitBreaker => "circuit_breaker",
            Self::PortfolioLimit => "portfolio_limit",
            Self::TradeLimit => "trade_limit",
            Self::Confirmation => "confirmation",
            Self::MarginAlert => "margin_alert",
            Self::EmergencyStop => "emergency_stop",
            Self::TradingHalt => "trading_halt",
        }
    }
}

impl std::fmt::Display for RiskEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// How serious an event is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskSeverity {
    /// Informational, no action needed.
    Info,
    /// Worth attention, trading continues.
    Warning,
    /// Trading-affecting.
    Critical,
}

impl RiskSeverity {
    /// Lowercase label for metrics.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RiskSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One recorded risk occurrence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEvent {
    /// Process-unique event id.
    pub id: String,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Event kind.
    pub kind: RiskEventKind,
    /// Event severity.
    pub severity: RiskSeverity,
    /// Affected symbol, when symbol-scoped.
    pub symbol: Option<String>,
    /// Strategy that produced the event, when strategy-scoped.
    pub strategy: Option<String>,
    /// Value that triggered the event.
    pub trigger_value: Option<Decimal>,
    /// Threshold the trigger crossed.
    pub threshold_value: Option<Decimal>,
    /// Reading at evaluation time.
    pub current_value: Option<Decimal>,
    /// Human-readable description.
    pub message: String,
    /// Whether an operator has resolved the event.
    pub resolved: bool,
    /// When it was resolved.
    pub resolved_at: Option<DateTime<Utc>>,
}

impl RiskEvent {
    /// Create an unresolved event timestamped now.
    #[must_use]
    pub fn new(kind: RiskEventKind, severity: RiskSeverity, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            severity,
            symbol: None,
            strategy: None,
            trigger_value: None,
            threshold_value: None,
            current_value: None,
            message: message.into(),
            resolved: false,
            resolved_at: None,
        }
    }

    /// Scope the event to a symbol.
    #[must_use]
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    /// Scope the event to a strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }

    /// Attach trigger, threshold, and current readings.
    #[must_use]
    pub const fn with_values(
        mut self,
        trigger: Decimal,
        threshold: Decimal,
        current: Decimal,
    ) -> Self {
        self.trigger_value = Some(trigger);
        self.threshold_value = Some(threshold);
        self.current_value = Some(current);
        self
    }
}

/// Query filter; unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Match this kind only.
    pub kind: Option<RiskEventKind>,
    /// Match this severity only.
    pub severity: Option<RiskSeverity>,
    /// Match resolved (true) or unresolved (false) only.
    pub resolved: Option<bool>,
    /// Match events at or after this time.
    pub from: Option<DateTime<Utc>>,
    /// Match events at or before this time.
    pub to: Option<DateTime<Utc>>,
}

impl EventFilter {
    /// A filter matching every event.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Restrict to one kind.
    #[must_use]
    pub const fn kind(mut self, kind: RiskEventKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Restrict to one severity.
    #[must_use]
    pub const fn severity(mut self, severity: RiskSeverity) -> Self {
        self.severity = Some(severity);
        self
    }

    /// Restrict to resolved or unresolved events.
    #[must_use]
    pub const fn resolved(mut self, resolved: bool) -> Self {
        self.resolved = Some(resolved);
        self
    }

    /// Restrict to a time range, inclusive on both ends.
    #[must_use]
    pub const fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    fn matches(&self, event: &RiskEvent) -> bool {
        self.kind.is_none_or(|k| event.kind == k)
            && self.severity.is_none_or(|s| event.severity == s)
            && self.resolved.is_none_or(|r| event.resolved == r)
            && self.from.is_none_or(|f| event.timestamp >= f)
            && self.to.is_none_or(|t| event.timestamp <= t)
    }
}

/// Resolution failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    /// No event recorded under this id.
    #[error("unknown risk event: {id}")]
    UnknownEvent {
        /// The id looked up.
        id: String,
    },
}

/// Bounded, queryable store of risk events.
#[derive(Debug)]
pub struct RiskEventStore {
    max_events: usize,
    inner: RwLock<VecDeque<RiskEvent>>,
}

impl Default for RiskEventStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl RiskEventStore {
    /// Store keeping at most `max_events`, oldest evicted first.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            max_events: max_events.max(1),
            inner: RwLock::new(VecDeque::new()),
        }
    }

    /// Record an event; returns its id.
    pub fn record(&self, event: RiskEvent) -> String {
        metrics::record_risk_event(event.kind.label(), event.severity.label());
        let id = event.id.clone();
        let mut events = self.write();
        while events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
        id
    }

    /// Events matching the filter, newest first.
    #[must_use]
    pub fn query(&self, filter: &EventFilter) -> Vec<RiskEvent> {
        self.read()
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    /// Mark an event resolved.
    ///
    /// # Errors
    ///
    /// [`EventError::UnknownEvent`] when no event has this id.
    pub fn resolve(&self, id: &str) -> Result<RiskEvent, EventError> {
        let mut events = self.write();
        let Some(event) = events.iter_mut().find(|e| e.id == id) else {
            return Err(EventError::UnknownEvent { id: id.to_string() });
        };
        event.resolved = true;
        event.resolved_at = Some(Utc::now());
        Ok(event.clone())
    }

    /// Number of stored events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Number of unresolved events.
    #[must_use]
    pub fn unresolved_count(&self) -> usize {
        self.read().iter().filter(|e| !e.resolved).count()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, VecDeque<RiskEvent>> {
        self.inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, VecDeque<RiskEvent>> {
        self.inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_record_and_query_by_kind() {
        let store = RiskEventStore::default();
        store.record(RiskEvent::new(
            RiskEventKind::CircuitBreaker,
            RiskSeverity::Critical,
            "drawdown breaker tripped",
        ));
        store.record(
            RiskEvent::new(
                RiskEventKind::MarginAlert,
                RiskSeverity::Warning,
                "margin usage at 75%",
            )
            .with_values(dec!(0.75), dec!(0.70), dec!(0.75)),
        );

        let breakers = store.query(&EventFilter::any().kind(RiskEventKind::CircuitBreaker));
        assert_eq!(breakers.len(), 1);
        assert_eq!(breakers[0].severity, RiskSeverity::Critical);

        assert_eq!(store.query(&EventFilter::any()).len(), 2);
    }

    #[test]
    fn test_query_newest_first() {
        let store = RiskEventStore::default();
        store.record(RiskEvent::new(
            RiskEventKind::TradeLimit,
            RiskSeverity::Info,
            "first",
        ));
        store.record(RiskEvent::new(
            RiskEventKind::TradeLimit,
            RiskSeverity::Info,
            "second",
        ));

        let events = store.query(&EventFilter::any());
        assert_eq!(events[0].message, "second");
        assert_eq!(events[1].message, "first");
    }

    #[test]
    fn test_resolve_marks_event() {
        let store = RiskEventStore::default();
        let id = store.record(RiskEvent::new(
            RiskEventKind::MarginAlert,
            RiskSeverity::Warning,
            "cash below minimum",
        ));

        assert_eq!(store.unresolved_count(), 1);
        let resolved = store.resolve(&id).unwrap();
        assert!(resolved.resolved);
        assert!(resolved.resolved_at.is_some());
        assert_eq!(store.unresolved_count(), 0);

        let unresolved = store.query(&EventFilter::any().resolved(false));
        assert!(unresolved.is_empty());
    }

    #[test]
    fn test_resolve_unknown_id() {
        let store = RiskEventStore::default();
        let err = store.resolve("no-such-id").unwrap_err();
        assert_eq!(
            err,
            EventError::UnknownEvent {
                id: "no-such-id".to_string()
            }
        );
    }

    #[test]
    fn test_store_is_bounded() {
        let store = RiskEventStore::new(3);
        for i in 0..5 {
            store.record(RiskEvent::new(
                RiskEventKind::TradeLimit,
                RiskSeverity::Info,
                format!("event {i}"),
            ));
        }
        assert_eq!(store.len(), 3);
        let events = store.query(&EventFilter::any());
        assert_eq!(events[0].message, "event 4");
        assert_eq!(events[2].message, "event 2");
    }

    #[test]
    fn test_time_range_filter() {
        let store = RiskEventStore::default();
        store.record(RiskEvent::new(
            RiskEventKind::StopLoss,
            RiskSeverity::Info,
            "stop hit",
        ));

        let now = Utc::now();
        let hour = chrono::Duration::hours(1);
        assert_eq!(
            store
                .query(&EventFilter::any().between(now - hour, now + hour))
                .len(),
            1
        );
        assert!(store
            .query(&EventFilter::any().between(now + hour, now + hour + hour))
            .is_empty());
    }
}
