//! Portfolio concentration tracking.
//!
//! Tracks per-symbol position value and sector, and answers two kinds of
//! question: descriptive (weights, diversification scores) and admissive
//! (would this proposed trade breach a concentration cap). The check
//! functions are pure reads against current aggregate state, safe to call
//! repeatedly while evaluating one candidate order.
//!
//! Weights for cap checks divide by total account equity, so cash counts
//! as headroom. Diversification scores normalize over position value only
//! so the bounds hold: 0 for a single position, approaching 1 as
//! equally-weighted count grows.

use std::collections::HashMap;
use std::sync::RwLock;

use rust_decimal::Decimal;
use serde::Serialize;

use super::format_percent;

/// One tracked holding.
#[derive(Debug, Clone, Serialize)]
pub struct Holding {
    /// Market value of the position.
    pub value: Decimal,
    /// Sector classification.
    pub sector: String,
}

/// Which cap a proposed trade breached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LimitScope {
    /// Single-position weight cap.
    Position,
    /// Sector weight cap.
    Sector,
}

impl std::fmt::Display for LimitScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Position => write!(f, "position"),
            Self::Sector => write!(f, "sector"),
        }
    }
}

/// A proposed trade that would breach a concentration cap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitBreach {
    /// Position or sector scope.
    pub scope: LimitScope,
    /// Symbol or sector name.
    pub name: String,
    /// Weight the trade would produce.
    pub proposed_weight: Decimal,
    /// The configured cap.
    pub cap: Decimal,
}

impl std::fmt::Display for LimitBreach {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} weight for {} would reach {}, above the {} cap",
            self.scope,
            self.name,
            format_percent(self.proposed_weight),
            format_percent(self.cap)
        )
    }
}

impl std::error::Error for LimitBreach {}

#[derive(Debug, Default)]
struct PortfolioState {
    total_value: Decimal,
    holdings: HashMap<String, Holding>,
}

/// Aggregate view of portfolio concentration.
#[derive(Debug, Default)]
pub struct PortfolioRiskManager {
    state: RwLock<PortfolioState>,
}

impl PortfolioRiskManager {
    /// Create an empty portfolio view.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set total account equity, the denominator for cap checks.
    pub fn set_total_value(&self, total_value: Decimal) {
        self.write().total_value = total_value;
    }

    /// Record or replace a holding.
    pub fn upsert_position(
        &self,
        symbol: impl Into<String>,
        value: Decimal,
        sector: impl Into<String>,
    ) {
        self.write().holdings.insert(
            symbol.into(),
            Holding {
                value,
                sector: sector.into(),
            },
        );
    }

    /// Drop a holding, e.g. once closed.
    pub fn remove_position(&self, symbol: &str) {
        self.write().holdings.remove(symbol);
    }

    /// Total account equity currently set.
    #[must_use]
    pub fn total_value(&self) -> Decimal {
        self.read().total_value
    }

    /// Sum of tracked position values.
    #[must_use]
    pub fn gross_value(&self) -> Decimal {
        self.read().holdings.values().map(|h| h.value).sum()
    }

    /// Weight of one symbol against total equity.
    #[must_use]
    pub fn position_weight(&self, symbol: &str) -> Decimal {
        let state = self.read();
        if state.total_value <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        state
            .holdings
            .get(symbol)
            .map_or(Decimal::ZERO, |h| h.value / state.total_value)
    }

    /// Per-symbol weights against total equity.
    #[must_use]
    pub fn position_weights(&self) -> HashMap<String, Decimal> {
        let state = self.read();
        if state.total_value <= Decimal::ZERO {
            return HashMap::new();
        }
        state
            .holdings
            .iter()
            .map(|(symbol, h)| (symbol.clone(), h.value / state.total_value))
            .collect()
    }

    /// Per-sector weights against total equity.
    #[must_use]
    pub fn sector_weights(&self) -> HashMap<String, Decimal> {
        let state = self.read();
        if state.total_value <= Decimal::ZERO {
            return HashMap::new();
        }
        let mut weights: HashMap<String, Decimal> = HashMap::new();
        for holding in state.holdings.values() {
            *weights.entry(holding.sector.clone()).or_default() +=
                holding.value / state.total_value;
        }
        weights
    }

    /// Diversification across positions: 1 minus the Herfindahl index of
    /// position weights normalized over gross position value.
    #[must_use]
    pub fn position_diversification(&self) -> Decimal {
        let state = self.read();
        herfindahl_complement(state.holdings.values().map(|h| h.value))
    }

    /// Diversification across sectors, same construction per sector.
    #[must_use]
    pub fn sector_diversification(&self) -> Decimal {
        let state = self.read();
        let mut by_sector: HashMap<&str, Decimal> = HashMap::new();
        for holding in state.holdings.values() {
            *by_sector.entry(holding.sector.as_str()).or_default() += holding.value;
        }
        herfindahl_complement(by_sector.into_values())
    }

    /// Would adding `proposed_value` to `symbol` breach the cap?
    ///
    /// Pure read: no state changes regardless of outcome.
    ///
    /// # Errors
    ///
    /// [`LimitBreach`] describing the resulting weight and the cap.
    pub fn check_position_limit(
        &self,
        symbol: &str,
        proposed_value: Decimal,
        cap: Decimal,
    ) -> Result<(), LimitBreach> {
        let state = self.read();
        if state.total_value <= Decimal::ZERO {
            return Ok(());
        }
        let current = state
            .holdings
            .get(symbol)
            .map_or(Decimal::ZERO, |h| h.value);
        let proposed_weight = (current + proposed_value) / state.total_value;
        if proposed_weight > cap {
            return Err(LimitBreach {
                scope: LimitScope::Position,
                name: symbol.to_string(),
                proposed_weight,
                cap,
            });
        }
        Ok(())
    }

    /// Would adding `proposed_value` to `sector` breach the cap?
    ///
    /// Pure read: no state changes regardless of outcome.
    ///
    /// # Errors
    ///
    /// [`LimitBreach`] describing the resulting weight and the cap.
    pub fn check_sector_limit(
        &self,
        sector: &str,
        proposed_value: Decimal,
        cap: Decimal,
    ) -> Result<(), LimitBreach> {
        let state = self.read();
        if state.total_value <= Decimal::ZERO {
            return Ok(());
        }
        let current: Decimal = state
            .holdings
            .values()
            .filter(|h| h.sector == sector)
            .map(|h| h.value)
            .sum();
        let proposed_weight = (current + proposed_value) / state.total_value;
        if proposed_weight > cap {
            return Err(LimitBreach {
                scope: LimitScope::Sector,
                name: sector.to_string(),
                proposed_weight,
                cap,
            });
        }
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, PortfolioState> {
        self.state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, PortfolioState> {
        self.state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// 1 minus the Herfindahl index over values normalized to sum to one.
///
/// Zero or one value scores 0; `n` equal values score `1 - 1/n`.
fn herfindahl_complement(values: impl Iterator<Item = Decimal>) -> Decimal {
    let values: Vec<Decimal> = values.filter(|v| *v > Decimal::ZERO).collect();
    if values.len() <= 1 {
        return Decimal::ZERO;
    }
    let total: Decimal = values.iter().copied().sum();
    if total <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let herfindahl: Decimal = values
        .iter()
        .map(|v| {
            let w = *v / total;
            w * w
        })
        .sum();
    Decimal::ONE - herfindahl
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn seeded() -> PortfolioRiskManager {
        let portfolio = PortfolioRiskManager::new();
        portfolio.set_total_value(dec!(200000));
        portfolio.upsert_position("AAPL", dec!(30000), "technology");
        portfolio
    }

    #[test]
    fn test_adding_past_position_cap_is_rejected() {
        let portfolio = seeded();
        assert_eq!(portfolio.position_weight("AAPL"), dec!(0.15));

        // 30k existing plus 20k proposed is 25% of 200k equity.
        let breach = portfolio
            .check_position_limit("AAPL", dec!(20000), dec!(0.20))
            .unwrap_err();
        assert_eq!(breach.scope, LimitScope::Position);
        assert_eq!(breach.proposed_weight, dec!(0.25));
        let message = breach.to_string();
        assert!(message.contains("25.00%"), "message was: {message}");
        assert!(message.contains("20.00%"));

        // A smaller add stays inside the cap.
        assert!(portfolio
            .check_position_limit("AAPL", dec!(5000), dec!(0.20))
            .is_ok());
    }

    #[test]
    fn test_sector_cap_counts_all_sector_positions() {
        let portfolio = seeded();
        portfolio.upsert_position("MSFT", dec!(40000), "technology");
        portfolio.upsert_position("XOM", dec!(10000), "energy");

        // Technology is at 35%; 15k more crosses a 40% cap.
        let breach = portfolio
            .check_sector_limit("technology", dec!(15000), dec!(0.40))
            .unwrap_err();
        assert_eq!(breach.scope, LimitScope::Sector);
        assert_eq!(breach.name, "technology");

        assert!(portfolio
            .check_sector_limit("energy", dec!(15000), dec!(0.40))
            .is_ok());
    }

    #[test]
    fn test_checks_are_pure() {
        let portfolio = seeded();
        for _ in 0..3 {
            let _ = portfolio.check_position_limit("AAPL", dec!(20000), dec!(0.20));
        }
        // State unchanged by repeated rejected proposals.
        assert_eq!(portfolio.position_weight("AAPL"), dec!(0.15));
        assert_eq!(portfolio.gross_value(), dec!(30000));
    }

    #[test]
    fn test_diversification_bounds() {
        let portfolio = PortfolioRiskManager::new();
        portfolio.set_total_value(dec!(100000));
        assert_eq!(portfolio.position_diversification(), dec!(0));

        portfolio.upsert_position("AAPL", dec!(10000), "technology");
        assert_eq!(portfolio.position_diversification(), dec!(0));

        portfolio.upsert_position("XOM", dec!(10000), "energy");
        assert_eq!(portfolio.position_diversification(), dec!(0.50));

        portfolio.upsert_position("JPM", dec!(10000), "financials");
        portfolio.upsert_position("JNJ", dec!(10000), "healthcare");
        assert_eq!(portfolio.position_diversification(), dec!(0.75));
    }

    #[test]
    fn test_sector_diversification_groups_symbols() {
        let portfolio = PortfolioRiskManager::new();
        portfolio.set_total_value(dec!(100000));
        portfolio.upsert_position("AAPL", dec!(10000), "technology");
        portfolio.upsert_position("MSFT", dec!(10000), "technology");
        portfolio.upsert_position("XOM", dec!(20000), "energy");

        // Two equal-weight sectors.
        assert_eq!(portfolio.sector_diversification(), dec!(0.50));
        let weights = portfolio.sector_weights();
        assert_eq!(weights["technology"], dec!(0.2));
        assert_eq!(weights["energy"], dec!(0.2));
    }

    #[test]
    fn test_weights_empty_without_equity() {
        let portfolio = PortfolioRiskManager::new();
        portfolio.upsert_position("AAPL", dec!(10000), "technology");
        assert_eq!(portfolio.position_weight("AAPL"), dec!(0));
        assert!(portfolio.position_weights().is_empty());
    }

    #[test]
    fn test_remove_position() {
        let portfolio = seeded();
        portfolio.remove_position("AAPL");
        assert_eq!(portfolio.gross_value(), dec!(0));
        // With the holding gone, a fresh buy up to the cap passes: 40k
        // of 200k equity is exactly the 20% limit.
        assert!(portfolio
            .check_position_limit("AAPL", dec!(40000), dec!(0.20))
            .is_ok());
        assert!(portfolio
            .check_position_limit("AAPL", dec!(50000), dec!(0.20))
            .is_err());
    }
}
