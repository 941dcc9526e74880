use serde::{Deserialize, Serialize};

use crate::core::types::now_millis;

use super::events::StrategyEvent;

/// 引擎状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl EngineState {
    pub fn is_active(&self) -> bool {
        matches!(self, EngineState::Starting | EngineState::Running)
    }
}

/// 统一的策略状态快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyStatusSnapshot {
    pub instance_id: String,
    pub strategy_type: String,
    pub symbol: String,
    pub state: EngineState,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub daily_pnl: f64,
    pub total_trades: u64,
    pub win_trades: u64,
    pub loss_trades: u64,
    pub position_notional: f64,
    pub pending_sell_count: usize,
    pub events: Vec<StrategyEvent>,
    pub updated_at: i64,
}

impl StrategyStatusSnapshot {
    /// 空闲时的规范 STOPPED 状态
    pub fn stopped() -> Self {
        Self {
            instance_id: String::new(),
            strategy_type: String::new(),
            symbol: String::new(),
            state: EngineState::Stopped,
            error_count: 0,
            last_error: None,
            daily_pnl: 0.0,
            total_trades: 0,
            win_trades: 0,
            loss_trades: 0,
            position_notional: 0.0,
            pending_sell_count: 0,
            events: Vec::new(),
            updated_at: now_millis(),
        }
    }
}
