//! Engine configuration: YAML loading, env interpolation, validation.
//!
//! One YAML document deserialized into per-concern sections, each with
//! serde defaults so a partial file works. `${VAR}` and `${VAR:-default}`
//! references are interpolated from the environment before parsing.
//! `validate()` collects every violation into a single error so a bad
//! file is fixed in one pass. Live mode applies stricter rules than
//! Paper: confirmation must be on, a strict confirmation setup needs a
//! secondary code, and the journal must be enabled.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::broker::{FillMode, RetryPolicy};
use crate::connection::MonitorConfig;
use crate::executor::ExecutorConfig;
use crate::live::{
    ConfirmationConfig, EmergencyStopConfig, FundMonitorConfig, RiskTier, TradeLimiterConfig,
};
use crate::observability::{MetricsConfig, TracingConfig};
use crate::orders::OrderManagerConfig;
use crate::risk::RiskLimits;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file '{path}': {source}")]
    Read {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse the YAML document.
    #[error("failed to parse config YAML: {0}")]
    Parse(#[from] serde_yaml_bw::Error),

    /// One or more values failed validation.
    #[error("config validation failed: {0}")]
    Validation(String),
}

/// Trading mode preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradingMode {
    /// Simulated venue, relaxed validation.
    Paper,
    /// Real venue, strict validation.
    Live,
}

impl TradingMode {
    /// Whether this mode trades real money.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Live)
    }

    /// Lowercase label for logs and metrics.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Paper => "paper",
            Self::Live => "live",
        }
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Environment section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentSection {
    /// Trading mode.
    pub mode: TradingMode,
}

impl Default for EnvironmentSection {
    fn default() -> Self {
        Self {
            mode: TradingMode::Paper,
        }
    }
}

/// Paper venue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSection {
    /// Starting cash balance.
    pub starting_cash: Decimal,
    /// Fill behavior: `immediate`, `partial_then_complete`, or `working`.
    pub fill_mode: String,
    /// Seed quotes, symbol to last price.
    pub quotes: HashMap<String, Decimal>,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            starting_cash: Decimal::new(100_000, 0),
            fill_mode: "immediate".to_string(),
            quotes: HashMap::new(),
        }
    }
}

impl BrokerSection {
    /// Parse the fill mode, defaulting to immediate fills.
    #[must_use]
    pub fn to_fill_mode(&self) -> FillMode {
        match self.fill_mode.to_lowercase().as_str() {
            "partial_then_complete" => FillMode::PartialThenComplete,
            "working" => FillMode::Working,
            _ => FillMode::Immediate,
        }
    }
}

/// Retry schedule settings, shared shape for every retrying path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    /// Maximum attempts (0 = unlimited).
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier applied after each attempt.
    pub multiplier: f64,
    /// Jitter fraction (0.2 = plus or minus 20%).
    pub jitter: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 100,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetrySection {
    /// Build the runtime retry policy.
    #[must_use]
    pub const fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.multiplier,
            self.jitter,
        )
    }
}

/// Connection monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSection {
    /// Seconds between heartbeat probes.
    pub heartbeat_interval_secs: u64,
    /// Seconds between latency probes.
    pub health_interval_secs: u64,
    /// Latency ring buffer capacity.
    pub latency_samples: usize,
    /// Reconnect automatically on heartbeat failure.
    pub auto_reconnect: bool,
    /// Reconnect pacing.
    pub reconnect: RetrySection,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            health_interval_secs: 10,
            latency_samples: 20,
            auto_reconnect: true,
            reconnect: RetrySection {
                max_attempts: 0,
                initial_delay_ms: 500,
                ..RetrySection::default()
            },
        }
    }
}

impl ConnectionSection {
    /// Build the runtime monitor configuration.
    #[must_use]
    pub fn to_monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            health_interval: Duration::from_secs(self.health_interval_secs),
            latency_samples: self.latency_samples,
            auto_reconnect: self.auto_reconnect,
            reconnect: self.reconnect.to_policy(),
        }
    }
}

/// Order manager settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrdersSection {
    /// Submission retry schedule.
    pub submit_retry: RetrySection,
    /// Seconds between reconciliation sweeps.
    pub reconcile_interval_secs: u64,
    /// Try one reconnect before submitting while disconnected.
    pub reconnect_on_submit: bool,
}

impl Default for OrdersSection {
    fn default() -> Self {
        Self {
            submit_retry: RetrySection::default(),
            reconcile_interval_secs: 1,
            reconnect_on_submit: true,
        }
    }
}

impl OrdersSection {
    /// Build the runtime order manager configuration.
    #[must_use]
    pub fn to_manager_config(&self) -> OrderManagerConfig {
        OrderManagerConfig {
            submit_retry: self.submit_retry.to_policy(),
            reconcile_interval: Duration::from_secs(self.reconcile_interval_secs),
            reconnect_on_submit: self.reconnect_on_submit,
        }
    }
}

/// Risk policy settings: concentration caps, registered strategy
/// parameters, breaker thresholds, and the monitoring cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskSection {
    /// Largest weight one position may reach, as a fraction of equity.
    pub max_position_weight: Decimal,
    /// Largest weight one sector may reach, as a fraction of equity.
    pub max_sector_weight: Decimal,
    /// Stop distance for the `percent_stop` strategy.
    pub stop_loss_percent: Decimal,
    /// Trail distance for the `trailing_stop` strategy.
    pub trailing_stop_percent: Decimal,
    /// Target distance for the `percent_target` strategy.
    pub take_profit_percent: Decimal,
    /// Allocation for the `fixed_amount` sizer.
    pub fixed_amount: Decimal,
    /// Equity fraction for the `fixed_percent` sizer.
    pub fixed_percent: Decimal,
    /// Per-trade risk fraction for the `risk_based` sizer.
    pub risk_per_trade: Decimal,
    /// Drawdown breaker threshold, fraction from peak equity.
    pub max_drawdown: Decimal,
    /// Daily loss breaker threshold, fraction of equity.
    pub max_daily_loss: Decimal,
    /// Weekly loss breaker threshold, fraction of equity.
    pub max_weekly_loss: Decimal,
    /// Seconds between breaker evaluations against the account.
    pub monitor_interval_secs: u64,
    /// Sector classification, symbol to sector name.
    pub sectors: HashMap<String, String>,
}

impl Default for RiskSection {
    fn default() -> Self {
        Self {
            max_position_weight: Decimal::new(20, 2),
            max_sector_weight: Decimal::new(40, 2),
            stop_loss_percent: Decimal::new(5, 2),
            trailing_stop_percent: Decimal::new(5, 2),
            take_profit_percent: Decimal::new(10, 2),
            fixed_amount: Decimal::new(10_000, 0),
            fixed_percent: Decimal::new(10, 2),
            risk_per_trade: Decimal::new(1, 2),
            max_drawdown: Decimal::new(20, 2),
            max_daily_loss: Decimal::new(5, 2),
            max_weekly_loss: Decimal::new(10, 2),
            monitor_interval_secs: 10,
            sectors: HashMap::new(),
        }
    }
}

impl RiskSection {
    /// Concentration caps for the risk manager.
    #[must_use]
    pub const fn to_limits(&self) -> RiskLimits {
        RiskLimits {
            max_position_weight: self.max_position_weight,
            max_sector_weight: self.max_sector_weight,
        }
    }
}

/// Trade limiter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    /// Trades allowed per calendar day.
    pub max_daily_trades: u32,
    /// Notional volume allowed per calendar day.
    pub max_daily_volume: Decimal,
    /// Trades allowed per symbol per clock hour.
    pub max_hourly_trades_per_symbol: u32,
    /// Seconds that must pass between trades in one symbol.
    pub min_trade_interval_secs: u64,
    /// Cooling-off minutes after a loss streak.
    pub cooling_period_minutes: u64,
    /// Consecutive losses that start the cooling period.
    pub consecutive_loss_limit: u32,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            max_daily_trades: 20,
            max_daily_volume: Decimal::new(100_000, 0),
            max_hourly_trades_per_symbol: 5,
            min_trade_interval_secs: 60,
            cooling_period_minutes: 30,
            consecutive_loss_limit: 3,
        }
    }
}

impl LimitsSection {
    /// Build the runtime limiter configuration.
    #[must_use]
    pub fn to_limiter_config(&self) -> TradeLimiterConfig {
        TradeLimiterConfig {
            max_daily_trades: self.max_daily_trades,
            max_daily_volume: self.max_daily_volume,
            max_hourly_trades_per_symbol: self.max_hourly_trades_per_symbol,
            min_trade_interval: chrono_secs(self.min_trade_interval_secs),
            cooling_period: chrono_minutes(self.cooling_period_minutes),
            consecutive_loss_limit: self.consecutive_loss_limit,
        }
    }
}

/// Order confirmation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationSection {
    /// Route orders through confirmation at all.
    pub enabled: bool,
    /// Highest tier that executes without an operator.
    pub auto_execute_max_tier: RiskTier,
    /// Notional at or above which an order is Medium.
    pub medium_value_threshold: Decimal,
    /// Notional at or above which an order is High.
    pub high_value_threshold: Decimal,
    /// Notional at or above which an order is Critical.
    pub critical_value_threshold: Decimal,
    /// Share quantity at or above which an order is High.
    pub large_quantity_threshold: Decimal,
    /// Confirmed orders allowed per day before escalation.
    pub max_daily_orders: u32,
    /// Confirmed notional allowed per day before escalation.
    pub max_daily_volume: Decimal,
    /// Projected position weight that escalates to High.
    pub concentration_threshold: Decimal,
    /// Margin usage fraction that escalates to High.
    pub margin_usage_threshold: Decimal,
    /// Seconds a pending token stays confirmable.
    pub token_ttl_secs: u64,
    /// Require the secondary code on every confirm.
    pub strict: bool,
    /// Secondary confirmation code for strict mode.
    pub secondary_code: Option<String>,
}

impl Default for ConfirmationSection {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_execute_max_tier: RiskTier::Low,
            medium_value_threshold: Decimal::new(10_000, 0),
            high_value_threshold: Decimal::new(50_000, 0),
            critical_value_threshold: Decimal::new(250_000, 0),
            large_quantity_threshold: Decimal::new(10_000, 0),
            max_daily_orders: 100,
            max_daily_volume: Decimal::new(1_000_000, 0),
            concentration_threshold: Decimal::new(25, 2),
            margin_usage_threshold: Decimal::new(80, 2),
            token_ttl_secs: 300,
            strict: false,
            secondary_code: None,
        }
    }
}

impl ConfirmationSection {
    /// Build the runtime confirmation configuration.
    ///
    /// An empty secondary code (e.g. an unset `${CONFIRM_CODE:-}`)
    /// counts as absent.
    #[must_use]
    pub fn to_confirmation_config(&self) -> ConfirmationConfig {
        ConfirmationConfig {
            enabled: self.enabled,
            auto_execute_max_tier: self.auto_execute_max_tier,
            medium_value_threshold: self.medium_value_threshold,
            high_value_threshold: self.high_value_threshold,
            critical_value_threshold: self.critical_value_threshold,
            large_quantity_threshold: self.large_quantity_threshold,
            max_daily_orders: self.max_daily_orders,
            max_daily_volume: self.max_daily_volume,
            concentration_threshold: self.concentration_threshold,
            margin_usage_threshold: self.margin_usage_threshold,
            token_ttl: chrono_secs(self.token_ttl_secs),
            strict: self.strict,
            secondary_code: self.secondary_code.clone().filter(|c| !c.is_empty()),
        }
    }
}

/// Emergency stop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmergencySection {
    /// Aggregate unrealized loss fraction that triggers a stop.
    pub max_total_loss: Decimal,
    /// Single-position unrealized loss fraction that triggers a stop.
    pub max_position_loss: Decimal,
    /// Seconds between breach evaluations.
    pub check_interval_secs: u64,
}

impl Default for EmergencySection {
    fn default() -> Self {
        Self {
            max_total_loss: Decimal::new(10, 2),
            max_position_loss: Decimal::new(20, 2),
            check_interval_secs: 5,
        }
    }
}

impl EmergencySection {
    /// Build the runtime emergency stop configuration.
    #[must_use]
    pub const fn to_emergency_config(&self) -> EmergencyStopConfig {
        EmergencyStopConfig {
            max_total_loss: self.max_total_loss,
            max_position_loss: self.max_position_loss,
            check_interval: Duration::from_secs(self.check_interval_secs),
        }
    }
}

/// Fund monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FundsSection {
    /// Seconds between account refreshes.
    pub refresh_interval_secs: u64,
    /// Margin usage fraction that grades Warning.
    pub margin_warn: Decimal,
    /// Margin usage fraction that grades Critical.
    pub margin_critical: Decimal,
    /// Cash floor below which a low-cash alert fires.
    pub min_cash: Decimal,
}

impl Default for FundsSection {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 30,
            margin_warn: Decimal::new(70, 2),
            margin_critical: Decimal::new(90, 2),
            min_cash: Decimal::new(1_000, 0),
        }
    }
}

impl FundsSection {
    /// Build the runtime fund monitor configuration.
    #[must_use]
    pub fn to_fund_monitor_config(&self, sectors: HashMap<String, String>) -> FundMonitorConfig {
        FundMonitorConfig {
            refresh_interval: Duration::from_secs(self.refresh_interval_secs),
            margin_warn: self.margin_warn,
            margin_critical: self.margin_critical,
            min_cash: self.min_cash,
            sectors,
        }
    }
}

/// Signal executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSection {
    /// Sizing strategy name in the risk manager registry.
    pub sizing_strategy: String,
    /// Stop-loss strategy used to derive the planned stop for sizing.
    pub stop_loss_strategy: Option<String>,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            sizing_strategy: "fixed_percent".to_string(),
            stop_loss_strategy: Some("percent_stop".to_string()),
        }
    }
}

impl ExecutorSection {
    /// Build the runtime executor configuration.
    #[must_use]
    pub fn to_executor_config(&self, sectors: HashMap<String, String>) -> ExecutorConfig {
        ExecutorConfig {
            sizing_strategy: self.sizing_strategy.clone(),
            stop_loss_strategy: self.stop_loss_strategy.clone(),
            sectors,
        }
    }
}

/// Trade journal settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalSection {
    /// Append trades to the JSONL file.
    pub enabled: bool,
    /// Journal file path.
    pub path: String,
}

impl Default for JournalSection {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "data/trades.jsonl".to_string(),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format: `compact` or `json`.
    pub format: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

impl LoggingSection {
    /// Build the runtime tracing configuration.
    #[must_use]
    pub fn to_tracing_config(&self) -> TracingConfig {
        let json = self.format.eq_ignore_ascii_case("json");
        TracingConfig {
            default_directive: self.level.clone(),
            with_target: true,
            with_ansi: !json,
            json,
        }
    }
}

/// Metrics exporter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSection {
    /// Serve the Prometheus endpoint.
    pub enabled: bool,
    /// Listener address, host:port.
    pub listen_addr: String,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "0.0.0.0:9090".to_string(),
        }
    }
}

impl MetricsSection {
    /// Build the runtime metrics configuration; an unparseable address
    /// falls back to the default (validation rejects it first).
    #[must_use]
    pub fn to_metrics_config(&self) -> MetricsConfig {
        self.listen_addr
            .parse::<SocketAddr>()
            .map_or_else(|_| MetricsConfig::default(), MetricsConfig::with_addr)
    }
}

/// Observability settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilitySection {
    /// Log output.
    pub logging: LoggingSection,
    /// Metrics exporter.
    pub metrics: MetricsSection,
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Environment mode.
    pub environment: EnvironmentSection,
    /// Paper venue.
    pub broker: BrokerSection,
    /// Connection monitor.
    pub connection: ConnectionSection,
    /// Order manager.
    pub orders: OrdersSection,
    /// Risk policies.
    pub risk: RiskSection,
    /// Trade limiter.
    pub limits: LimitsSection,
    /// Order confirmation.
    pub confirmation: ConfirmationSection,
    /// Emergency stop.
    pub emergency: EmergencySection,
    /// Fund monitor.
    pub funds: FundsSection,
    /// Signal executor.
    pub executor: ExecutorSection,
    /// Trade journal.
    pub journal: JournalSection,
    /// Logging and metrics.
    pub observability: ObservabilitySection,
}

impl EngineConfig {
    /// Validate every section, collecting all violations.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Validation`] listing each violation, separated by
    /// semicolons.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut violations = Vec::new();

        if self.broker.starting_cash <= Decimal::ZERO {
            violations.push("broker.starting_cash must be positive".to_string());
        }
        if self.connection.heartbeat_interval_secs == 0 {
            violations.push("connection.heartbeat_interval_secs must be at least 1".to_string());
        }
        if self.orders.submit_retry.multiplier < 1.0 {
            violations.push("orders.submit_retry.multiplier must be at least 1.0".to_string());
        }
        if !(0.0..1.0).contains(&self.orders.submit_retry.jitter) {
            violations.push("orders.submit_retry.jitter must be in [0, 1)".to_string());
        }

        check_fraction(&mut violations, "risk.max_position_weight", self.risk.max_position_weight);
        check_fraction(&mut violations, "risk.max_sector_weight", self.risk.max_sector_weight);
        check_fraction(&mut violations, "risk.stop_loss_percent", self.risk.stop_loss_percent);
        check_fraction(
            &mut violations,
            "risk.trailing_stop_percent",
            self.risk.trailing_stop_percent,
        );
        check_fraction(&mut violations, "risk.take_profit_percent", self.risk.take_profit_percent);
        check_fraction(&mut violations, "risk.fixed_percent", self.risk.fixed_percent);
        check_fraction(&mut violations, "risk.risk_per_trade", self.risk.risk_per_trade);
        check_fraction(&mut violations, "risk.max_drawdown", self.risk.max_drawdown);
        check_fraction(&mut violations, "risk.max_daily_loss", self.risk.max_daily_loss);
        check_fraction(&mut violations, "risk.max_weekly_loss", self.risk.max_weekly_loss);
        if self.risk.max_position_weight > self.risk.max_sector_weight {
            violations.push(
                "risk.max_position_weight must not exceed risk.max_sector_weight".to_string(),
            );
        }

        if self.limits.max_daily_trades == 0 {
            violations.push("limits.max_daily_trades must be at least 1".to_string());
        }
        if self.limits.max_daily_volume <= Decimal::ZERO {
            violations.push("limits.max_daily_volume must be positive".to_string());
        }

        if self.confirmation.medium_value_threshold >= self.confirmation.high_value_threshold
            || self.confirmation.high_value_threshold >= self.confirmation.critical_value_threshold
        {
            violations.push(
                "confirmation value thresholds must be strictly increasing \
                 (medium < high < critical)"
                    .to_string(),
            );
        }

        check_fraction(&mut violations, "emergency.max_total_loss", self.emergency.max_total_loss);
        check_fraction(
            &mut violations,
            "emergency.max_position_loss",
            self.emergency.max_position_loss,
        );

        check_fraction(&mut violations, "funds.margin_warn", self.funds.margin_warn);
        check_fraction(&mut violations, "funds.margin_critical", self.funds.margin_critical);
        if self.funds.margin_warn >= self.funds.margin_critical {
            violations.push("funds.margin_warn must be below funds.margin_critical".to_string());
        }

        if self.executor.sizing_strategy.is_empty() {
            violations.push("executor.sizing_strategy must be set".to_string());
        }

        let format = &self.observability.logging.format;
        if !format.eq_ignore_ascii_case("compact") && !format.eq_ignore_ascii_case("json") {
            violations.push(format!(
                "observability.logging.format must be 'compact' or 'json', got '{format}'"
            ));
        }
        if self.observability.metrics.enabled
            && self
                .observability
                .metrics
                .listen_addr
                .parse::<SocketAddr>()
                .is_err()
        {
            violations.push(format!(
                "observability.metrics.listen_addr '{}' is not a valid socket address",
                self.observability.metrics.listen_addr
            ));
        }

        if self.environment.mode.is_live() {
            if !self.confirmation.enabled {
                violations.push("confirmation must be enabled in LIVE mode".to_string());
            }
            if self.confirmation.strict
                && self
                    .confirmation
                    .secondary_code
                    .as_deref()
                    .is_none_or(str::is_empty)
            {
                violations.push(
                    "confirmation.secondary_code is required when strict mode is on in LIVE"
                        .to_string(),
                );
            }
            if !self.journal.enabled {
                violations.push("journal must be enabled in LIVE mode".to_string());
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(violations.join("; ")))
        }
    }
}

fn check_fraction(violations: &mut Vec<String>, name: &str, value: Decimal) {
    if value <= Decimal::ZERO || value >= Decimal::ONE {
        violations.push(format!("{name} must be a fraction between 0 and 1 exclusive"));
    }
}

fn chrono_secs(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
}

fn chrono_minutes(minutes: u64) -> chrono::Duration {
    chrono::Duration::minutes(i64::try_from(minutes).unwrap_or(i64::MAX))
}

/// Load configuration from a YAML file with environment interpolation.
///
/// # Errors
///
/// [`ConfigError::Read`] when the file cannot be read, or any error
/// [`load_config_from_str`] returns.
pub fn load_config(path: Option<&str>) -> Result<EngineConfig, ConfigError> {
    let path = path.unwrap_or("config/default.yaml");
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_string(),
        source: e,
    })?;
    let config = load_config_from_str(&contents)?;
    debug!(path = %path, mode = %config.environment.mode, "configuration loaded");
    Ok(config)
}

/// Parse and validate configuration from a YAML string.
///
/// # Errors
///
/// [`ConfigError::Parse`] on malformed YAML, [`ConfigError::Validation`]
/// when values are out of range.
pub fn load_config_from_str(yaml: &str) -> Result<EngineConfig, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);
    let config: EngineConfig = serde_yaml_bw::from_str(&interpolated)?;
    config.validate()?;
    Ok(config)
}

/// Interpolate `${VAR}` and `${VAR:-default}` references.
///
/// A missing variable without a default becomes an empty string.
#[allow(clippy::expect_used)] // the pattern is a compile-time constant
fn interpolate_env_vars(input: &str) -> String {
    use std::sync::OnceLock;

    static ENV_VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();
    let re = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var regex is valid")
    });

    let mut result = input.to_string();
    for cap in re.captures_iter(input) {
        let (Some(full_match), Some(var_match)) = (cap.get(0), cap.get(1)) else {
            continue;
        };
        let default_value = cap.get(2).map(|m| m.as_str());
        let value = match std::env::var(var_match.as_str()) {
            Ok(v) if !v.is_empty() => v,
            _ => default_value.map_or_else(String::new, str::to_string),
        };
        result = result.replace(full_match.as_str(), &value);
    }
    result
}
