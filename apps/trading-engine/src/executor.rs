//! Signal executor: turns strategy signals into risk-checked orders.
//!
//! One call per evaluation cycle. Each actionable signal is quoted,
//! sized through the configured sizing strategy, then walked through
//! the admission chain: halt flag, trade limiter, circuit breakers,
//! portfolio concentration, confirmation tier. A failure on one symbol
//! never aborts the cycle; the caller gets a per-symbol outcome report.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::broker::BrokerClient;
use crate::live::{ConfirmationManager, ConfirmationOutcome, RiskTier, TradeLimiter};
use crate::models::{Order, OrderSide, Signal, SignalBatch};
use crate::observability::metrics;
use crate::risk::{
    BreakerStatus, ExitContext, RiskEvent, RiskEventKind, RiskManager, RiskSeverity, SizingContext,
};

/// Signal executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Sizing strategy name in the risk manager registry.
    pub sizing_strategy: String,
    /// Stop-loss strategy used to derive the planned stop fed into
    /// risk-based sizing. Sizing proceeds without a stop when unset.
    pub stop_loss_strategy: Option<String>,
    /// Sector classification for the portfolio concentration check.
    /// Unlisted symbols count against the `unclassified` sector.
    pub sectors: HashMap<String, String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            sizing_strategy: "fixed_percent".to_string(),
            stop_loss_strategy: None,
            sectors: HashMap::new(),
        }
    }
}

/// Terminal outcome for one signal in a cycle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalOutcome {
    /// Auto-approved and queued for submission.
    Submitted {
        /// Engine order ID.
        order_id: String,
    },
    /// Parked awaiting an operator confirm/reject round-trip.
    PendingConfirmation {
        /// Confirmation token.
        token: String,
        /// Assigned risk tier.
        tier: RiskTier,
    },
    /// Nothing tradeable for this symbol this cycle.
    Skipped {
        /// Why the signal was dropped.
        reason: String,
    },
    /// Admission refused the trade.
    Rejected {
        /// Refusal reason.
        reason: String,
    },
}

/// Per-symbol outcomes for one evaluation cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    /// When the producing strategy evaluated.
    pub evaluated_at: DateTime<Utc>,
    /// Outcome per signalled symbol.
    pub outcomes: HashMap<String, SignalOutcome>,
}

impl CycleReport {
    /// Outcome for one symbol, if it was actionable this cycle.
    #[must_use]
    pub fn outcome(&self, symbol: &str) -> Option<&SignalOutcome> {
        self.outcomes.get(symbol)
    }

    /// How many orders were queued this cycle.
    #[must_use]
    pub fn submitted_count(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| matches!(o, SignalOutcome::Submitted { .. }))
            .count()
    }

    /// How many signals admission refused this cycle.
    #[must_use]
    pub fn rejected_count(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| matches!(o, SignalOutcome::Rejected { .. }))
            .count()
    }
}

/// Drives signal batches through sizing, admission, and submission.
pub struct SignalExecutor {
    config: ExecutorConfig,
    broker: Arc<dyn BrokerClient>,
    risk: Arc<RiskManager>,
    limiter: Arc<TradeLimiter>,
    confirmation: Arc<ConfirmationManager>,
}

impl SignalExecutor {
    /// Build an executor over the shared engine components.
    #[must_use]
    pub fn new(
        config: ExecutorConfig,
        broker: Arc<dyn BrokerClient>,
        risk: Arc<RiskManager>,
        limiter: Arc<TradeLimiter>,
        confirmation: Arc<ConfirmationManager>,
    ) -> Self {
        Self {
            config,
            broker,
            risk,
            limiter,
            confirmation,
        }
    }

    /// Execute one signal batch and report what happened per symbol.
    ///
    /// Signals without a tradeable direction (no flags, zero strength,
    /// or conflicting flags) are absent from the report.
    pub async fn execute_batch(&self, batch: &SignalBatch) -> CycleReport {
        let mut outcomes = HashMap::new();
        for (signal, side) in batch.actionable() {
            let outcome = self.execute_signal(signal, side).await;
            match &outcome {
                SignalOutcome::Submitted { order_id } => {
                    info!(
                        symbol = %signal.symbol,
                        side = ?side,
                        order_id = %order_id,
                        "signal executed"
                    );
                }
                SignalOutcome::PendingConfirmation { token, tier } => {
                    info!(
                        symbol = %signal.symbol,
                        side = ?side,
                        token = %token,
                        tier = %tier,
                        "signal held for confirmation"
                    );
                }
                SignalOutcome::Skipped { reason } => {
                    debug!(symbol = %signal.symbol, reason = %reason, "signal skipped");
                }
                SignalOutcome::Rejected { reason } => {
                    warn!(symbol = %signal.symbol, reason = %reason, "signal rejected");
                }
            }
            outcomes.insert(signal.symbol.clone(), outcome);
        }

        let report = CycleReport {
            evaluated_at: batch.evaluated_at,
            outcomes,
        };
        info!(
            signals = batch.signals.len(),
            submitted = report.submitted_count(),
            rejected = report.rejected_count(),
            "signal cycle complete"
        );
        report
    }

    async fn execute_signal(&self, signal: &Signal, side: OrderSide) -> SignalOutcome {
        if let Err(e) = self.risk.ensure_trading_enabled() {
            return SignalOutcome::Rejected {
                reason: e.to_string(),
            };
        }

        let price = match self.entry_price(signal).await {
            Ok(price) => price,
            Err(reason) => return SignalOutcome::Skipped { reason },
        };

        let shares = match self.size(side, price) {
            Ok(0) => {
                return SignalOutcome::Skipped {
                    reason: "position size rounds to zero shares".to_string(),
                }
            }
            Ok(shares) => shares,
            Err(reason) => return SignalOutcome::Skipped { reason },
        };
        let quantity = Decimal::from(shares);
        let notional = price * quantity;

        let decision = self.limiter.check(&signal.symbol, notional);
        for warning in &decision.warnings {
            warn!(symbol = %signal.symbol, warning = %warning, "trade limiter warning");
        }
        if !decision.allowed {
            let reason = decision.violations.join("; ");
            self.risk.events().record(
                RiskEvent::new(RiskEventKind::TradeLimit, RiskSeverity::Warning, &reason)
                    .with_symbol(&signal.symbol),
            );
            return SignalOutcome::Rejected { reason };
        }

        if let Some((name, status)) = self.triggered_breaker() {
            metrics::record_trade_blocked("circuit_breaker");
            let reason = match status.reason {
                Some(why) => format!("circuit breaker {name} is open: {why}"),
                None => format!("circuit breaker {name} is open"),
            };
            return SignalOutcome::Rejected { reason };
        }

        // Sells release exposure; only buys go through the concentration
        // caps.
        if side == OrderSide::Buy {
            let sector = self
                .config
                .sectors
                .get(&signal.symbol)
                .map_or("unclassified", String::as_str);
            if let Err(e) = self
                .risk
                .check_portfolio_limits(&signal.symbol, notional, sector)
            {
                return SignalOutcome::Rejected {
                    reason: e.to_string(),
                };
            }
        }

        let order = Order::market(signal.symbol.clone(), side, quantity);
        match self.confirmation.request(order, price) {
            ConfirmationOutcome::AutoApproved { order_id } => {
                self.limiter
                    .record_trade(&signal.symbol, notional, Decimal::ZERO);
                SignalOutcome::Submitted { order_id }
            }
            ConfirmationOutcome::PendingConfirmation { token, tier, .. } => {
                SignalOutcome::PendingConfirmation { token, tier }
            }
            ConfirmationOutcome::Blocked { reason } => SignalOutcome::Rejected { reason },
        }
    }

    /// Price the entry from a live quote, falling back to the signal's
    /// reference price when the venue has nothing for the symbol.
    async fn entry_price(&self, signal: &Signal) -> Result<Decimal, String> {
        match self.broker.get_market_data(&signal.symbol).await {
            Ok(quote) => {
                let mid = quote.mid();
                if mid > Decimal::ZERO {
                    Ok(mid)
                } else if signal.reference_price > Decimal::ZERO {
                    debug!(symbol = %signal.symbol, "empty quote, using signal reference price");
                    Ok(signal.reference_price)
                } else {
                    Err("no usable price".to_string())
                }
            }
            Err(e) if signal.reference_price > Decimal::ZERO => {
                debug!(
                    symbol = %signal.symbol,
                    error = %e,
                    "quote lookup failed, using signal reference price"
                );
                Ok(signal.reference_price)
            }
            Err(e) => Err(format!("quote unavailable: {e}")),
        }
    }

    fn size(&self, side: OrderSide, price: Decimal) -> Result<u64, String> {
        let mut ctx = SizingContext::new(price);
        if let Some(stop_name) = &self.config.stop_loss_strategy {
            match self.risk.stop_price(stop_name, price, &ExitContext::new(side)) {
                Ok(stop) => ctx = ctx.with_stop(stop),
                Err(e) => {
                    warn!(
                        strategy = %stop_name,
                        error = %e,
                        "stop derivation failed, sizing without stop"
                    );
                }
            }
        }
        let portfolio_value = self.risk.portfolio().total_value();
        self.risk
            .share_count(&self.config.sizing_strategy, portfolio_value, price, &ctx)
            .map_err(|e| e.to_string())
    }

    fn triggered_breaker(&self) -> Option<(String, BreakerStatus)> {
        self.risk
            .breaker_statuses()
            .into_iter()
            .find(|(_, status)| status.triggered)
    }
}

impl fmt::Debug for SignalExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalExecutor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
