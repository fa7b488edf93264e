//! Shared building blocks for the trading gateway: configuration, time, and
//! the standard result envelope.

pub mod clock;
pub mod config;
pub mod config_loader;
pub mod envelope;

pub use clock::{offset_hours, Clock, ManualClock, SharedClock, SystemClock};
pub use config::{
    AppConfig, ApprovalConfig, ExecutionMode, HttpConfig, RiskConfig, PAPER_BASE_URL,
    PRODUCTION_BASE_URL,
};
pub use config_loader::{ConfigLoader, ENV_PREFIX};
pub use envelope::StandardResponse;
