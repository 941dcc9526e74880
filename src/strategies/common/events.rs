//! 策略事件环
//!
//! 有界环形日志，最多保留1000条，新事件覆盖最旧的；
//! 对外只暴露尾部视图。

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::types::now_millis;

const RING_CAPACITY: usize = 1000;

/// 事件类型（闭集）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyEventKind {
    StrategyStarted,
    StrategyStopped,
    StrategyError,
    BuyOrderPlaced,
    BuyOrderCancelled,
    BuyOrderFilled,
    SellOrderPlaced,
    SellOrderFilled,
    SellOrderFailed,
    OrdersMerged,
    RiskLimitHit,
    ConfigUpdated,
    EmergencyStop,
    GridBuyFilled,
    GridSellFilled,
    GridLevelUpdated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyEvent {
    pub kind: StrategyEventKind,
    pub timestamp: i64,
    pub data: serde_json::Value,
}

pub struct EventLog {
    ring: Mutex<VecDeque<StrategyEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            ring: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
        }
    }

    pub fn emit(&self, kind: StrategyEventKind, data: serde_json::Value) {
        let event = StrategyEvent {
            kind,
            timestamp: now_millis(),
            data,
        };

        let mut ring = self.ring.lock();
        if ring.len() >= RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(event);
    }

    /// 最新的 n 条事件（时间升序）
    pub fn tail(&self, n: usize) -> Vec<StrategyEvent> {
        let ring = self.ring.lock();
        ring.iter()
            .skip(ring.len().saturating_sub(n))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ring.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.lock().is_empty()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ring_bounded_to_capacity() {
        let log = EventLog::new();
        for i in 0..1200 {
            log.emit(StrategyEventKind::BuyOrderPlaced, json!({ "seq": i }));
        }
        assert_eq!(log.len(), 1000);

        // 最旧的已被覆盖，尾部是最新的
        let tail = log.tail(1);
        assert_eq!(tail[0].data["seq"], 1199);
    }

    #[test]
    fn test_tail_view() {
        let log = EventLog::new();
        log.emit(StrategyEventKind::StrategyStarted, json!({}));
        log.emit(StrategyEventKind::BuyOrderPlaced, json!({ "n": 1 }));
        log.emit(StrategyEventKind::BuyOrderFilled, json!({ "n": 2 }));

        let tail = log.tail(2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].kind, StrategyEventKind::BuyOrderPlaced);
        assert_eq!(tail[1].kind, StrategyEventKind::BuyOrderFilled);

        let all = log.tail(10);
        assert_eq!(all.len(), 3);
    }
}
