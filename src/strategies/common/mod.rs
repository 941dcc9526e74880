pub mod config;
pub mod events;
pub mod risk;
pub mod status;
pub mod strategy;
pub mod tracker;

pub use config::{
    BaseStrategyConfig, ConfigManager, GridConfig, GridType, ScalpingConfig, StrategyConfig,
};
pub use events::{EventLog, StrategyEvent, StrategyEventKind};
pub use risk::{RiskController, RiskLimits, RiskState, RiskVerdict};
pub use status::{EngineState, StrategyStatusSnapshot};
pub use strategy::StrategyInstance;
pub use tracker::{OrderTracker, TrackedOrder, TrackedStatus};
