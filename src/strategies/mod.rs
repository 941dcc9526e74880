// 策略模块
pub mod autocalc;
pub mod common;
pub mod grid;
pub mod manager;
pub mod scalping;

pub use autocalc::{derive_config, AutoCalcInput, AutoCalcResult, RiskLevel};
pub use common::{
    ConfigManager, EngineState, StrategyConfig, StrategyInstance, StrategyStatusSnapshot,
};
pub use grid::GridEngine;
pub use manager::StrategyManager;
pub use scalping::ScalpingEngine;
