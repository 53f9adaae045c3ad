//! Live trading safety coordinators.
//!
//! Everything here sits between admission (risk checks) and execution
//! (order manager): bulk liquidation, trade frequency caps, the order
//! confirmation round-trip, the emergency stop, and the account refresh
//! that feeds funding data to the rest of the engine.

pub mod confirmation;
pub mod emergency;
pub mod fund_monitor;
pub mod position_manager;
pub mod trade_limiter;

pub use confirmation::{
    ConfirmationConfig, ConfirmationError, ConfirmationManager, ConfirmationOutcome, RiskTier,
};
pub use emergency::{EmergencyStop, EmergencyStopConfig};
pub use fund_monitor::{FundMonitor, FundMonitorConfig, MarginGrade};
pub use position_manager::{CloseReport, PositionManager};
pub use trade_limiter::{LimiterDecision, TradeLimiter, TradeLimiterConfig};
