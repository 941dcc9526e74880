//! 订单跟踪器
//!
//! 本地订单集合与交易所权威状态之间的对账基础。
//! 状态迁移单调：pending → {filled, cancelled, failed}，终态不回退。

use std::collections::{HashMap, HashSet};

use crate::core::types::{now_millis, OrderSide, TradeDirection};

/// 跟踪状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedStatus {
    Pending,
    Filled,
    Cancelled,
    Failed,
}

impl TrackedStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TrackedStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackedStatus::Pending => "pending",
            TrackedStatus::Filled => "filled",
            TrackedStatus::Cancelled => "cancelled",
            TrackedStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackedOrder {
    pub order_id: String,
    pub client_oid: Option<String>,
    pub side: OrderSide,
    /// 交易所精度的价格字符串
    pub price: String,
    pub size: String,
    pub status: TrackedStatus,
    /// 买单与其配对卖单的关联，一经写入不再变更
    pub linked_order_id: Option<String>,
    pub direction: TradeDirection,
    pub created_at: i64,
    pub filled_at: Option<i64>,
}

impl TrackedOrder {
    pub fn new(
        order_id: String,
        client_oid: Option<String>,
        side: OrderSide,
        price: String,
        size: String,
        direction: TradeDirection,
    ) -> Self {
        Self {
            order_id,
            client_oid,
            side,
            price,
            size,
            status: TrackedStatus::Pending,
            linked_order_id: None,
            direction,
            created_at: now_millis(),
            filled_at: None,
        }
    }

    pub fn price_f64(&self) -> f64 {
        self.price.parse().unwrap_or(0.0)
    }

    pub fn size_f64(&self) -> f64 {
        self.size.parse().unwrap_or(0.0)
    }

    pub fn notional(&self) -> f64 {
        self.price_f64() * self.size_f64()
    }
}

/// 订单跟踪器
///
/// 不变量：active_buy_order_id 非空时必然指向集合内一个 pending 买单。
pub struct OrderTracker {
    orders: HashMap<String, TrackedOrder>,
    active_buy_order_id: Option<String>,
}

impl OrderTracker {
    pub fn new() -> Self {
        Self {
            orders: HashMap::new(),
            active_buy_order_id: None,
        }
    }

    /// 登记新买单并占用唯一活跃买单槽位
    pub fn track_buy(&mut self, order: TrackedOrder) {
        debug_assert_eq!(order.side, OrderSide::Buy);

        if let Some(prev) = self.active_buy() {
            log::warn!(
                "⚠️ 活跃买单槽位被占用 ({}), 新买单 {} 覆盖",
                prev.order_id,
                order.order_id
            );
        }

        self.active_buy_order_id = Some(order.order_id.clone());
        self.orders.insert(order.order_id.clone(), order);
    }

    pub fn track_sell(&mut self, order: TrackedOrder) {
        debug_assert_eq!(order.side, OrderSide::Sell);
        self.orders.insert(order.order_id.clone(), order);
    }

    /// 登记订单但不占用活跃买单槽位（网格允许多笔并存买单）
    pub fn track_plain(&mut self, order: TrackedOrder) {
        self.orders.insert(order.order_id.clone(), order);
    }

    /// 恢复落库订单（不占用活跃槽位的卖单 / 占用槽位的买单）
    pub fn restore(&mut self, order: TrackedOrder) {
        if order.side == OrderSide::Buy && order.status == TrackedStatus::Pending {
            self.active_buy_order_id = Some(order.order_id.clone());
        }
        self.orders.insert(order.order_id.clone(), order);
    }

    pub fn get(&self, order_id: &str) -> Option<&TrackedOrder> {
        self.orders.get(order_id)
    }

    /// 当前活跃买单（校验槽位指向的确是 pending 买单）
    pub fn active_buy(&self) -> Option<&TrackedOrder> {
        let id = self.active_buy_order_id.as_ref()?;
        self.orders
            .get(id)
            .filter(|o| o.side == OrderSide::Buy && o.status == TrackedStatus::Pending)
    }

    /// 标记成交；订单不存在或已处终态时返回 None
    pub fn mark_filled(&mut self, order_id: &str, filled_at: i64) -> Option<TrackedOrder> {
        self.transition(order_id, TrackedStatus::Filled, Some(filled_at))
    }

    pub fn mark_cancelled(&mut self, order_id: &str) -> Option<TrackedOrder> {
        self.transition(order_id, TrackedStatus::Cancelled, None)
    }

    pub fn mark_failed(&mut self, order_id: &str) -> Option<TrackedOrder> {
        self.transition(order_id, TrackedStatus::Failed, None)
    }

    fn transition(
        &mut self,
        order_id: &str,
        status: TrackedStatus,
        filled_at: Option<i64>,
    ) -> Option<TrackedOrder> {
        let order = self.orders.get_mut(order_id)?;

        // 终态不回退
        if order.status.is_terminal() {
            return None;
        }

        order.status = status;
        if let Some(ts) = filled_at {
            order.filled_at = Some(ts);
        }

        if self.active_buy_order_id.as_deref() == Some(order_id) {
            self.active_buy_order_id = None;
        }

        self.orders.get(order_id).cloned()
    }

    /// 写入买卖配对关系，一经写入不再变更
    pub fn set_linked(&mut self, buy_order_id: &str, sell_order_id: &str) {
        if let Some(order) = self.orders.get_mut(buy_order_id) {
            if order.linked_order_id.is_none() {
                order.linked_order_id = Some(sell_order_id.to_string());
            }
        }
    }

    /// pending 卖单，按创建时间升序
    pub fn pending_sells(&self) -> Vec<TrackedOrder> {
        let mut sells: Vec<TrackedOrder> = self
            .orders
            .values()
            .filter(|o| o.side == OrderSide::Sell && o.status == TrackedStatus::Pending)
            .cloned()
            .collect();
        sells.sort_by_key(|o| o.created_at);
        sells
    }

    pub fn pending_sell_count(&self) -> usize {
        self.orders
            .values()
            .filter(|o| o.side == OrderSide::Sell && o.status == TrackedStatus::Pending)
            .count()
    }

    /// 总持仓名义金额 = Σ pending 卖单的 price × size
    pub fn position_notional(&self) -> f64 {
        self.orders
            .values()
            .filter(|o| o.side == OrderSide::Sell && o.status == TrackedStatus::Pending)
            .map(|o| o.notional())
            .sum()
    }

    /// 对账前的本地 pending 快照
    ///
    /// 对账只处理快照内的订单：交易所挂单列表抓取之后新下的单
    /// 不会因为不在列表里而被误判为"消失"。
    pub fn pending_ids_snapshot(&self) -> HashSet<String> {
        self.orders
            .values()
            .filter(|o| o.status == TrackedStatus::Pending)
            .map(|o| o.order_id.clone())
            .collect()
    }

    /// 两步对账第一步：快照内仍 pending 且不在交易所挂单集合中的订单
    pub fn find_disappeared(
        &self,
        snapshot: &HashSet<String>,
        exchange_pending_ids: &HashSet<String>,
    ) -> Vec<TrackedOrder> {
        snapshot
            .iter()
            .filter(|id| !exchange_pending_ids.contains(*id))
            .filter_map(|id| self.orders.get(id))
            .filter(|o| o.status == TrackedStatus::Pending)
            .cloned()
            .collect()
    }

    /// 清理历史：非 pending 订单最多保留 keep 条（按创建时间留新弃旧），
    /// pending 订单永不清除。
    pub fn cleanup(&mut self, keep: usize) {
        let mut terminal: Vec<(String, i64)> = self
            .orders
            .values()
            .filter(|o| o.status.is_terminal())
            .map(|o| (o.order_id.clone(), o.created_at))
            .collect();

        if terminal.len() <= keep {
            return;
        }

        terminal.sort_by_key(|(_, created_at)| *created_at);
        let excess = terminal.len() - keep;
        for (order_id, _) in terminal.into_iter().take(excess) {
            self.orders.remove(&order_id);
        }
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

impl Default for OrderTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buy(id: &str, price: &str, size: &str) -> TrackedOrder {
        TrackedOrder::new(
            id.to_string(),
            None,
            OrderSide::Buy,
            price.to_string(),
            size.to_string(),
            TradeDirection::Long,
        )
    }

    fn sell(id: &str, price: &str, size: &str) -> TrackedOrder {
        TrackedOrder::new(
            id.to_string(),
            None,
            OrderSide::Sell,
            price.to_string(),
            size.to_string(),
            TradeDirection::Long,
        )
    }

    #[test]
    fn test_single_active_buy_invariant() {
        let mut tracker = OrderTracker::new();
        tracker.track_buy(buy("b1", "100.0", "1"));
        assert_eq!(tracker.active_buy().unwrap().order_id, "b1");

        tracker.mark_filled("b1", 1);
        assert!(tracker.active_buy().is_none());

        tracker.track_buy(buy("b2", "101.0", "1"));
        assert_eq!(tracker.active_buy().unwrap().order_id, "b2");

        tracker.mark_cancelled("b2");
        assert!(tracker.active_buy().is_none());
    }

    #[test]
    fn test_terminal_status_never_regresses() {
        let mut tracker = OrderTracker::new();
        tracker.track_sell(sell("s1", "100.0", "1"));

        assert!(tracker.mark_filled("s1", 10).is_some());
        // 终态后再次迁移被拒绝
        assert!(tracker.mark_cancelled("s1").is_none());
        assert_eq!(tracker.get("s1").unwrap().status, TrackedStatus::Filled);
        assert_eq!(tracker.get("s1").unwrap().filled_at, Some(10));
    }

    #[test]
    fn test_linked_order_id_write_once() {
        let mut tracker = OrderTracker::new();
        tracker.track_buy(buy("b1", "100.0", "1"));
        tracker.set_linked("b1", "s1");
        tracker.set_linked("b1", "s2");
        assert_eq!(
            tracker.get("b1").unwrap().linked_order_id.as_deref(),
            Some("s1")
        );
    }

    #[test]
    fn test_pending_sells_sorted_and_notional() {
        let mut tracker = OrderTracker::new();
        let mut s1 = sell("s1", "100.1", "1");
        s1.created_at = 1;
        let mut s2 = sell("s2", "100.3", "2");
        s2.created_at = 2;
        let mut s3 = sell("s3", "100.5", "3");
        s3.created_at = 3;
        tracker.track_sell(s2);
        tracker.track_sell(s3);
        tracker.track_sell(s1);

        let sells = tracker.pending_sells();
        assert_eq!(
            sells.iter().map(|o| o.order_id.as_str()).collect::<Vec<_>>(),
            vec!["s1", "s2", "s3"]
        );

        let notional = tracker.position_notional();
        assert!((notional - (100.1 + 100.3 * 2.0 + 100.5 * 3.0)).abs() < 1e-9);
    }

    #[test]
    fn test_find_disappeared_respects_snapshot() {
        let mut tracker = OrderTracker::new();
        tracker.track_sell(sell("s1", "100.0", "1"));
        let snapshot = tracker.pending_ids_snapshot();

        // 快照之后新下的单不参与本轮对账
        tracker.track_sell(sell("s2", "101.0", "1"));

        let exchange_ids: HashSet<String> = HashSet::new();
        let disappeared = tracker.find_disappeared(&snapshot, &exchange_ids);
        assert_eq!(disappeared.len(), 1);
        assert_eq!(disappeared[0].order_id, "s1");
    }

    #[test]
    fn test_find_disappeared_skips_present_orders() {
        let mut tracker = OrderTracker::new();
        tracker.track_sell(sell("s1", "100.0", "1"));
        tracker.track_sell(sell("s2", "101.0", "1"));
        let snapshot = tracker.pending_ids_snapshot();

        let exchange_ids: HashSet<String> =
            ["s1".to_string()].into_iter().collect();
        let disappeared = tracker.find_disappeared(&snapshot, &exchange_ids);
        assert_eq!(disappeared.len(), 1);
        assert_eq!(disappeared[0].order_id, "s2");
    }

    #[test]
    fn test_cleanup_keeps_pending_and_bounds_terminal() {
        let mut tracker = OrderTracker::new();

        for i in 0..600 {
            let mut order = sell(&format!("t{}", i), "100.0", "1");
            order.created_at = i;
            tracker.track_sell(order);
            tracker.mark_filled(&format!("t{}", i), i);
        }
        let mut pending = sell("p1", "100.0", "1");
        pending.created_at = 0;
        tracker.track_sell(pending);

        tracker.cleanup(500);

        assert_eq!(tracker.len(), 501);
        assert!(tracker.get("p1").is_some());
        // 最旧的终态订单被清除
        assert!(tracker.get("t0").is_none());
        assert!(tracker.get("t599").is_some());
    }
}
