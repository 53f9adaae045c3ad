//! Typed risk parameter store.
//!
//! Parameters are defined once with a category, a default, and optional
//! numeric bounds, then mutated only through [`ParameterStore::update`],
//! which enforces type and bounds. Out-of-bounds or mistyped updates are
//! validation errors and leave the stored value untouched.

use std::collections::HashMap;
use std::sync::RwLock;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A parameter value in one of the supported types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Boolean switch.
    Bool(bool),
    /// Decimal quantity (percentages, prices, ratios).
    Decimal(Decimal),
    /// Integer count.
    Integer(i64),
    /// Free-form text.
    Text(String),
}

impl ParamValue {
    /// Type label used in mismatch errors.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Decimal(_) => "decimal",
            Self::Integer(_) => "integer",
            Self::Text(_) => "text",
        }
    }

    /// Numeric view for bounds checking.
    fn as_numeric(&self) -> Option<Decimal> {
        match self {
            Self::Decimal(d) => Some(*d),
            Self::Integer(i) => Some(Decimal::from(*i)),
            Self::Bool(_) | Self::Text(_) => None,
        }
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Decimal(d) => write!(f, "{d}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Text(t) => write!(f, "{t}"),
        }
    }
}

/// Which strategy family a parameter belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParamCategory {
    /// Stop-loss tuning.
    StopLoss,
    /// Take-profit tuning.
    TakeProfit,
    /// Position sizing tuning.
    PositionSizing,
    /// Value-at-risk thresholds.
    Var,
    /// Monitoring thresholds.
    Monitoring,
}

impl std::fmt::Display for ParamCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StopLoss => write!(f, "STOP_LOSS"),
            Self::TakeProfit => write!(f, "TAKE_PROFIT"),
            Self::PositionSizing => write!(f, "POSITION_SIZING"),
            Self::Var => write!(f, "VAR"),
            Self::Monitoring => write!(f, "MONITORING"),
        }
    }
}

/// A named, typed, bounded risk parameter.
#[derive(Debug, Clone, Serialize)]
pub struct RiskParameter {
    /// Unique parameter name.
    pub name: String,
    /// Strategy family.
    pub category: ParamCategory,
    /// Current value.
    pub value: ParamValue,
    /// Value restored by reset.
    pub default: ParamValue,
    /// Inclusive numeric bounds, when the type is numeric.
    pub bounds: Option<(Decimal, Decimal)>,
}

impl RiskParameter {
    /// Define a parameter; the current value starts at the default.
    #[must_use]
    pub fn new(name: impl Into<String>, category: ParamCategory, default: ParamValue) -> Self {
        Self {
            name: name.into(),
            category,
            value: default.clone(),
            default,
            bounds: None,
        }
    }

    /// Restrict numeric values to `[min, max]` inclusive.
    #[must_use]
    pub const fn with_bounds(mut self, min: Decimal, max: Decimal) -> Self {
        self.bounds = Some((min, max));
        self
    }
}

/// Parameter update failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamError {
    /// No parameter defined under this name.
    #[error("unknown risk parameter: {name}")]
    Unknown {
        /// The name looked up.
        name: String,
    },

    /// The update's type does not match the definition.
    #[error("risk parameter {name} expects {expected}, got {got}")]
    TypeMismatch {
        /// Parameter name.
        name: String,
        /// Defined type label.
        expected: &'static str,
        /// Offered type label.
        got: &'static str,
    },

    /// The numeric value falls outside the defined bounds.
    #[error("risk parameter {name} value {value} outside bounds [{min}, {max}]")]
    OutOfBounds {
        /// Parameter name.
        name: String,
        /// Offered value.
        value: Decimal,
        /// Lower bound, inclusive.
        min: Decimal,
        /// Upper bound, inclusive.
        max: Decimal,
    },
}

/// Store of defined parameters.
#[derive(Debug, Default)]
pub struct ParameterStore {
    inner: RwLock<HashMap<String, RiskParameter>>,
}

impl ParameterStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Define (or redefine) a parameter.
    pub fn define(&self, parameter: RiskParameter) {
        self.write().insert(parameter.name.clone(), parameter);
    }

    /// Current value of a parameter.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<ParamValue> {
        self.read().get(name).map(|p| p.value.clone())
    }

    /// Full definition of a parameter.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<RiskParameter> {
        self.read().get(name).cloned()
    }

    /// Decimal value of a parameter, if it is one.
    #[must_use]
    pub fn decimal(&self, name: &str) -> Option<Decimal> {
        match self.get(name) {
            Some(ParamValue::Decimal(d)) => Some(d),
            _ => None,
        }
    }

    /// Integer value of a parameter, if it is one.
    #[must_use]
    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(ParamValue::Integer(i)) => Some(i),
            _ => None,
        }
    }

    /// Boolean value of a parameter, if it is one.
    #[must_use]
    pub fn flag(&self, name: &str) -> Option<bool> {
        match self.get(name) {
            Some(ParamValue::Bool(b)) => Some(b),
            _ => None,
        }
    }

    /// Validated update of a parameter's current value.
    ///
    /// # Errors
    ///
    /// [`ParamError::Unknown`] for undefined names,
    /// [`ParamError::TypeMismatch`] when the value type differs from the
    /// definition, [`ParamError::OutOfBounds`] when a numeric value falls
    /// outside the defined bounds.
    pub fn update(&self, name: &str, value: ParamValue) -> Result<(), ParamError> {
        let mut store = self.write();
        let Some(parameter) = store.get_mut(name) else {
            return Err(ParamError::Unknown {
                name: name.to_string(),
            });
        };
        if parameter.value.kind() != value.kind() {
            return Err(ParamError::TypeMismatch {
                name: name.to_string(),
                expected: parameter.value.kind(),
                got: value.kind(),
            });
        }
        if let (Some((min, max)), Some(numeric)) = (parameter.bounds, value.as_numeric()) {
            if numeric < min || numeric > max {
                return Err(ParamError::OutOfBounds {
                    name: name.to_string(),
                    value: numeric,
                    min,
                    max,
                });
            }
        }
        parameter.value = value;
        Ok(())
    }

    /// Restore a parameter to its default.
    ///
    /// # Errors
    ///
    /// [`ParamError::Unknown`] for undefined names.
    pub fn reset(&self, name: &str) -> Result<(), ParamError> {
        let mut store = self.write();
        let Some(parameter) = store.get_mut(name) else {
            return Err(ParamError::Unknown {
                name: name.to_string(),
            });
        };
        parameter.value = parameter.default.clone();
        Ok(())
    }

    /// All parameters in a category, sorted by name.
    #[must_use]
    pub fn by_category(&self, category: ParamCategory) -> Vec<RiskParameter> {
        let mut parameters: Vec<RiskParameter> = self
            .read()
            .values()
            .filter(|p| p.category == category)
            .cloned()
            .collect();
        parameters.sort_by(|a, b| a.name.cmp(&b.name));
        parameters
    }

    /// Number of defined parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no parameters are defined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, RiskParameter>> {
        self.inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, RiskParameter>> {
        self.inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn store() -> ParameterStore {
        let store = ParameterStore::new();
        store.define(
            RiskParameter::new(
                "stop_loss_percent",
                ParamCategory::StopLoss,
                ParamValue::Decimal(dec!(0.05)),
            )
            .with_bounds(dec!(0.001), dec!(0.50)),
        );
        store.define(
            RiskParameter::new(
                "max_daily_trades",
                ParamCategory::Monitoring,
                ParamValue::Integer(10),
            )
            .with_bounds(dec!(1), dec!(1000)),
        );
        store.define(RiskParameter::new(
            "trailing_enabled",
            ParamCategory::StopLoss,
            ParamValue::Bool(false),
        ));
        store.define(
            RiskParameter::new(
                "var_confidence",
                ParamCategory::Var,
                ParamValue::Decimal(dec!(0.95)),
            )
            .with_bounds(dec!(0.80), dec!(0.999)),
        );
        store
    }

    #[test]
    fn test_define_and_get() {
        let store = store();
        assert_eq!(store.decimal("stop_loss_percent"), Some(dec!(0.05)));
        assert_eq!(store.integer("max_daily_trades"), Some(10));
        assert_eq!(store.flag("trailing_enabled"), Some(false));
        assert_eq!(store.get("missing"), None);
    }

    #[test]
    fn test_update_within_bounds() {
        let store = store();
        store
            .update("stop_loss_percent", ParamValue::Decimal(dec!(0.10)))
            .unwrap();
        assert_eq!(store.decimal("stop_loss_percent"), Some(dec!(0.10)));
    }

    #[test]
    fn test_update_out_of_bounds_rejected() {
        let store = store();
        let err = store
            .update("stop_loss_percent", ParamValue::Decimal(dec!(0.75)))
            .unwrap_err();
        assert!(matches!(err, ParamError::OutOfBounds { .. }));
        // The stored value is untouched.
        assert_eq!(store.decimal("stop_loss_percent"), Some(dec!(0.05)));

        let err = store
            .update("max_daily_trades", ParamValue::Integer(0))
            .unwrap_err();
        assert!(err.to_string().contains("outside bounds"));
    }

    #[test]
    fn test_update_type_mismatch_rejected() {
        let store = store();
        let err = store
            .update("stop_loss_percent", ParamValue::Integer(1))
            .unwrap_err();
        assert_eq!(
            err,
            ParamError::TypeMismatch {
                name: "stop_loss_percent".to_string(),
                expected: "decimal",
                got: "integer",
            }
        );
    }

    #[test]
    fn test_unknown_parameter() {
        let store = store();
        let err = store
            .update("nonexistent", ParamValue::Bool(true))
            .unwrap_err();
        assert!(matches!(err, ParamError::Unknown { .. }));
    }

    #[test]
    fn test_reset_restores_default() {
        let store = store();
        store
            .update("stop_loss_percent", ParamValue::Decimal(dec!(0.20)))
            .unwrap();
        store.reset("stop_loss_percent").unwrap();
        assert_eq!(store.decimal("stop_loss_percent"), Some(dec!(0.05)));
    }

    #[test]
    fn test_by_category_sorted() {
        let store = store();
        let stop_loss = store.by_category(ParamCategory::StopLoss);
        let names: Vec<&str> = stop_loss.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["stop_loss_percent", "trailing_enabled"]);

        let var = store.by_category(ParamCategory::Var);
        assert_eq!(var.len(), 1);
        assert_eq!(var[0].name, "var_confidence");
    }
}
