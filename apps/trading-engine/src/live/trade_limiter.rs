//! Trade frequency and volume gating.
//!
//! The limiter tracks calendar-day and calendar-hour windows by timestamp
//! comparison, so counters roll over lazily on the next check or
//! recording rather than on a timer. A run of consecutive losing trades
//! in one symbol puts that symbol into a cooling period that expires on
//! its own once checked past its end time; other symbols keep trading.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, warn};

use crate::observability::metrics;

/// Caps applied to proposed trades.
#[derive(Debug, Clone)]
pub struct TradeLimiterConfig {
    /// Trades allowed per calendar day.
    pub max_daily_trades: u32,
    /// Notional volume allowed per calendar day.
    pub max_daily_volume: Decimal,
    /// Trades allowed per symbol per calendar hour.
    pub max_hourly_trades_per_symbol: u32,
    /// Minimum spacing between trades in the same symbol.
    pub min_trade_interval: Duration,
    /// How long a symbol pauses after a loss streak.
    pub cooling_period: Duration,
    /// Consecutive losing trades in one symbol that start its cooling
    /// period.
    pub consecutive_loss_limit: u32,
}

impl Default for TradeLimiterConfig {
    fn default() -> Self {
        Self {
            max_daily_trades: 20,
            max_daily_volume: Decimal::from(100_000),
            max_hourly_trades_per_symbol: 5,
            min_trade_interval: Duration::seconds(60),
            cooling_period: Duration::minutes(30),
            consecutive_loss_limit: 3,
        }
    }
}

/// Verdict for one proposed trade.
///
/// `warnings` flags caps at 80% or more of their limit so callers can
/// log near-limit conditions; `violations` lists every cap the trade
/// would break.
#[derive(Debug, Clone, Serialize)]
pub struct LimiterDecision {
    /// True when no cap is violated.
    pub allowed: bool,
    /// Near-limit notices, populated even when allowed.
    pub warnings: Vec<String>,
    /// Broken caps; non-empty exactly when disallowed.
    pub violations: Vec<String>,
}

#[derive(Debug, Default)]
struct LimiterState {
    day: Option<NaiveDate>,
    daily_trades: u32,
    daily_volume: Decimal,
    hour: Option<(NaiveDate, u32)>,
    hourly_by_symbol: HashMap<String, u32>,
    last_trade_by_symbol: HashMap<String, DateTime<Utc>>,
    consecutive_losses: HashMap<String, u32>,
    cooling_until: HashMap<String, DateTime<Utc>>,
}

/// Gates proposed trades against frequency, volume, and loss-streak caps.
#[derive(Debug, Default)]
pub struct TradeLimiter {
    config: TradeLimiterConfig,
    state: RwLock<LimiterState>,
}

impl TradeLimiter {
    /// Create a limiter with the given caps.
    #[must_use]
    pub fn new(config: TradeLimiterConfig) -> Self {
        Self {
            config,
            state: RwLock::new(LimiterState::default()),
        }
    }

    /// Check a proposed trade against every cap.
    #[must_use]
    pub fn check(&self, symbol: &str, volume: Decimal) -> LimiterDecision {
        self.check_at(symbol, volume, Utc::now())
    }

    /// [`Self::check`] at an explicit time.
    #[must_use]
    pub fn check_at(&self, symbol: &str, volume: Decimal, now: DateTime<Utc>) -> LimiterDecision {
        let mut state = self.write();
        Self::roll_windows(&mut state, now);

        let mut warnings = Vec::new();
        let mut violations = Vec::new();

        if let Some(until) = state.cooling_until.get(symbol).copied() {
            if now < until {
                let losses = state.consecutive_losses.get(symbol).copied().unwrap_or(0);
                violations.push(format!(
                    "{symbol} cooling period active until {} after {losses} consecutive losses",
                    until.format("%Y-%m-%d %H:%M:%S UTC"),
                ));
                metrics::record_trade_blocked("cooling_period");
            } else {
                debug!(symbol, "cooling period expired");
                state.cooling_until.remove(symbol);
                state.consecutive_losses.remove(symbol);
            }
        }

        if state.daily_trades >= self.config.max_daily_trades {
            violations.push(format!(
                "daily trade count {} has reached the limit of {}",
                state.daily_trades, self.config.max_daily_trades
            ));
            metrics::record_trade_blocked("daily_trade_count");
        } else if near_count_limit(state.daily_trades + 1, self.config.max_daily_trades) {
            warnings.push(format!(
                "daily trade count approaching limit ({} of {})",
                state.daily_trades + 1,
                self.config.max_daily_trades
            ));
        }

        let projected_volume = state.daily_volume + volume;
        if projected_volume > self.config.max_daily_volume {
            violations.push(format!(
                "daily volume {projected_volume} would exceed the limit of {}",
                self.config.max_daily_volume
            ));
            metrics::record_trade_blocked("daily_volume");
        } else if near_volume_limit(projected_volume, self.config.max_daily_volume) {
            warnings.push(format!(
                "daily volume approaching limit ({projected_volume} of {})",
                self.config.max_daily_volume
            ));
        }

        let hourly = state.hourly_by_symbol.get(symbol).copied().unwrap_or(0);
        if hourly >= self.config.max_hourly_trades_per_symbol {
            violations.push(format!(
                "{symbol} traded {hourly} times this hour, limit is {}",
                self.config.max_hourly_trades_per_symbol
            ));
            metrics::record_trade_blocked("hourly_symbol_trades");
        } else if near_count_limit(hourly + 1, self.config.max_hourly_trades_per_symbol) {
            warnings.push(format!(
                "{symbol} hourly trade count approaching limit ({} of {})",
                hourly + 1,
                self.config.max_hourly_trades_per_symbol
            ));
        }

        if let Some(last) = state.last_trade_by_symbol.get(symbol) {
            let since = now - *last;
            if since < self.config.min_trade_interval {
                violations.push(format!(
                    "last {symbol} trade was {}s ago, minimum interval is {}s",
                    since.num_seconds(),
                    self.config.min_trade_interval.num_seconds()
                ));
                metrics::record_trade_blocked("trade_interval");
            }
        }

        let allowed = violations.is_empty();
        if !allowed {
            warn!(symbol, ?violations, "trade blocked by limiter");
        }
        LimiterDecision {
            allowed,
            warnings,
            violations,
        }
    }

    /// Record an executed trade and its realized result.
    ///
    /// A negative `pnl` extends the symbol's loss streak; reaching the
    /// streak limit starts that symbol's cooling period. Any non-losing
    /// trade resets the symbol's streak.
    pub fn record_trade(&self, symbol: &str, volume: Decimal, pnl: Decimal) {
        self.record_trade_at(symbol, volume, pnl, Utc::now());
    }

    /// [`Self::record_trade`] at an explicit time.
    pub fn record_trade_at(&self, symbol: &str, volume: Decimal, pnl: Decimal, now: DateTime<Utc>) {
        let mut state = self.write();
        Self::roll_windows(&mut state, now);

        state.daily_trades += 1;
        state.daily_volume += volume;
        *state.hourly_by_symbol.entry(symbol.to_string()).or_insert(0) += 1;
        state.last_trade_by_symbol.insert(symbol.to_string(), now);

        if pnl < Decimal::ZERO {
            let losses = *state
                .consecutive_losses
                .entry(symbol.to_string())
                .and_modify(|l| *l += 1)
                .or_insert(1);
            if losses >= self.config.consecutive_loss_limit
                && !state.cooling_until.contains_key(symbol)
            {
                let until = now + self.config.cooling_period;
                state.cooling_until.insert(symbol.to_string(), until);
                warn!(
                    symbol,
                    consecutive_losses = losses,
                    until = %until,
                    "loss streak reached limit, entering cooling period"
                );
            }
        } else {
            state.consecutive_losses.remove(symbol);
        }
    }

    /// Current consecutive-loss streak length for one symbol.
    #[must_use]
    pub fn consecutive_losses(&self, symbol: &str) -> u32 {
        self.read()
            .consecutive_losses
            .get(symbol)
            .copied()
            .unwrap_or(0)
    }

    /// End of the symbol's active cooling period, if one is in effect.
    #[must_use]
    pub fn cooling_until(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.read().cooling_until.get(symbol).copied()
    }

    /// Trades recorded so far today.
    #[must_use]
    pub fn daily_trades(&self) -> u32 {
        self.read().daily_trades
    }

    /// Reset calendar windows whose period has passed.
    fn roll_windows(state: &mut LimiterState, now: DateTime<Utc>) {
        let today = now.date_naive();
        if state.day != Some(today) {
            state.day = Some(today);
            state.daily_trades = 0;
            state.daily_volume = Decimal::ZERO;
        }
        let hour = (today, now.hour());
        if state.hour != Some(hour) {
            state.hour = Some(hour);
            state.hourly_by_symbol.clear();
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, LimiterState> {
        self.state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, LimiterState> {
        self.state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// True when `next` is at 80% or more of `limit`.
fn near_count_limit(next: u32, limit: u32) -> bool {
    limit > 0 && u64::from(next) * 5 >= u64::from(limit) * 4
}

fn near_volume_limit(projected: Decimal, limit: Decimal) -> bool {
    limit > Decimal::ZERO && projected * Decimal::from(5) >= limit * Decimal::from(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_third_trade_hits_daily_limit() {
        let limiter = TradeLimiter::new(TradeLimiterConfig {
            max_daily_trades: 2,
            ..TradeLimiterConfig::default()
        });
        let now = at(14, 0);

        limiter.record_trade_at("AAPL", dec!(1000), dec!(10), now);
        limiter.record_trade_at("MSFT", dec!(1000), dec!(10), at(14, 5));

        let decision = limiter.check_at("TSLA", dec!(1000), at(14, 10));
        assert!(!decision.allowed);
        assert!(
            decision
                .violations
                .iter()
                .any(|v| v.contains("daily trade count 2") && v.contains("limit of 2")),
            "violations: {:?}",
            decision.violations
        );
    }

    #[test]
    fn test_warning_near_daily_limit() {
        let limiter = TradeLimiter::new(TradeLimiterConfig {
            max_daily_trades: 5,
            ..TradeLimiterConfig::default()
        });
        for minute in 0..3 {
            limiter.record_trade_at("AAPL", dec!(100), dec!(1), at(9, minute));
        }

        // The fourth trade is 80% of the cap: allowed, but flagged.
        let decision = limiter.check_at("MSFT", dec!(100), at(11, 0));
        assert!(decision.allowed);
        assert!(decision.warnings.iter().any(|w| w.contains("4 of 5")));
    }

    #[test]
    fn test_daily_volume_cap() {
        let limiter = TradeLimiter::new(TradeLimiterConfig {
            max_daily_volume: dec!(10000),
            ..TradeLimiterConfig::default()
        });
        limiter.record_trade_at("AAPL", dec!(6000), dec!(5), at(10, 0));

        let decision = limiter.check_at("AAPL", dec!(5000), at(10, 5));
        assert!(!decision.allowed);
        assert!(decision.violations.iter().any(|v| v.contains("daily volume")));

        let decision = limiter.check_at("AAPL", dec!(3000), at(10, 5));
        assert!(decision.allowed);
        assert!(decision.warnings.iter().any(|w| w.contains("approaching")));
    }

    #[test]
    fn test_hourly_symbol_cap_is_per_symbol() {
        let limiter = TradeLimiter::new(TradeLimiterConfig {
            max_hourly_trades_per_symbol: 2,
            min_trade_interval: Duration::seconds(0),
            ..TradeLimiterConfig::default()
        });
        limiter.record_trade_at("AAPL", dec!(100), dec!(1), at(10, 0));
        limiter.record_trade_at("AAPL", dec!(100), dec!(1), at(10, 20));

        let decision = limiter.check_at("AAPL", dec!(100), at(10, 40));
        assert!(!decision.allowed);
        assert!(limiter.check_at("MSFT", dec!(100), at(10, 40)).allowed);

        // New calendar hour clears the per-symbol window.
        assert!(limiter.check_at("AAPL", dec!(100), at(11, 1)).allowed);
    }

    #[test]
    fn test_min_interval_per_symbol() {
        let limiter = TradeLimiter::new(TradeLimiterConfig {
            min_trade_interval: Duration::seconds(60),
            ..TradeLimiterConfig::default()
        });
        let base = at(10, 0);
        limiter.record_trade_at("AAPL", dec!(100), dec!(1), base);

        let decision = limiter.check_at("AAPL", dec!(100), base + Duration::seconds(30));
        assert!(!decision.allowed);
        assert!(
            decision
                .violations
                .iter()
                .any(|v| v.contains("minimum interval"))
        );

        assert!(
            limiter
                .check_at("AAPL", dec!(100), base + Duration::seconds(61))
                .allowed
        );
        // Other symbols are unaffected.
        assert!(
            limiter
                .check_at("MSFT", dec!(100), base + Duration::seconds(10))
                .allowed
        );
    }

    #[test]
    fn test_loss_streak_enters_cooling_and_expires() {
        let limiter = TradeLimiter::new(TradeLimiterConfig {
            consecutive_loss_limit: 2,
            cooling_period: Duration::minutes(30),
            min_trade_interval: Duration::seconds(0),
            ..TradeLimiterConfig::default()
        });
        let base = at(10, 0);
        limiter.record_trade_at("AAPL", dec!(100), dec!(-5), base);
        assert_eq!(limiter.consecutive_losses("AAPL"), 1);
        limiter.record_trade_at("AAPL", dec!(100), dec!(-5), base + Duration::minutes(2));
        assert!(limiter.cooling_until("AAPL").is_some());

        let decision = limiter.check_at("AAPL", dec!(100), base + Duration::minutes(10));
        assert!(!decision.allowed);
        assert!(decision.violations.iter().any(|v| v.contains("cooling")));

        // Checked past the end time, the cooling period clears itself.
        let decision = limiter.check_at("AAPL", dec!(100), base + Duration::minutes(40));
        assert!(decision.allowed);
        assert_eq!(limiter.consecutive_losses("AAPL"), 0);
    }

    #[test]
    fn test_cooling_period_is_symbol_scoped() {
        let limiter = TradeLimiter::new(TradeLimiterConfig {
            consecutive_loss_limit: 2,
            cooling_period: Duration::minutes(30),
            min_trade_interval: Duration::seconds(0),
            ..TradeLimiterConfig::default()
        });
        let base = at(10, 0);
        limiter.record_trade_at("AAPL", dec!(100), dec!(-5), base);
        limiter.record_trade_at("AAPL", dec!(100), dec!(-5), base + Duration::minutes(1));
        assert!(limiter.cooling_until("AAPL").is_some());

        // Only the losing symbol cools; others keep trading.
        let decision = limiter.check_at("AAPL", dec!(100), base + Duration::minutes(5));
        assert!(!decision.allowed);
        assert!(
            decision
                .violations
                .iter()
                .any(|v| v.contains("AAPL") && v.contains("cooling")),
            "violations: {:?}",
            decision.violations
        );
        assert!(limiter.check_at("MSFT", dec!(100), base + Duration::minutes(5)).allowed);
        assert!(limiter.cooling_until("MSFT").is_none());

        // A loss elsewhere during the cooling window tracks its own streak.
        limiter.record_trade_at("MSFT", dec!(100), dec!(-5), base + Duration::minutes(6));
        assert_eq!(limiter.consecutive_losses("MSFT"), 1);
        assert!(limiter.check_at("MSFT", dec!(100), base + Duration::minutes(7)).allowed);
    }

    #[test]
    fn test_winning_trade_resets_streak() {
        let limiter = TradeLimiter::new(TradeLimiterConfig {
            consecutive_loss_limit: 3,
            ..TradeLimiterConfig::default()
        });
        limiter.record_trade_at("AAPL", dec!(100), dec!(-5), at(10, 0));
        limiter.record_trade_at("AAPL", dec!(100), dec!(-5), at(10, 5));
        limiter.record_trade_at("AAPL", dec!(100), dec!(8), at(10, 10));
        assert_eq!(limiter.consecutive_losses("AAPL"), 0);
        assert!(limiter.cooling_until("AAPL").is_none());
    }

    #[test]
    fn test_day_rollover_resets_counters() {
        let limiter = TradeLimiter::new(TradeLimiterConfig {
            max_daily_trades: 2,
            min_trade_interval: Duration::seconds(0),
            ..TradeLimiterConfig::default()
        });
        limiter.record_trade_at("AAPL", dec!(100), dec!(1), at(14, 0));
        limiter.record_trade_at("AAPL", dec!(100), dec!(1), at(15, 0));
        assert!(!limiter.check_at("AAPL", dec!(100), at(16, 0)).allowed);

        let next_day = Utc.with_ymd_and_hms(2026, 3, 3, 9, 30, 0).unwrap();
        assert!(limiter.check_at("AAPL", dec!(100), next_day).allowed);
        assert_eq!(limiter.daily_trades(), 0);
    }
}
