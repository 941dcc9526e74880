//! 挂单合并引擎
//!
//! pending 卖单数量饱和时，把最旧的 merge_threshold 笔卖单
//! 折算为一笔按数量加权平均价的新卖单。布尔闩锁防止重入。

use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::json;

use crate::core::error::{StrategyError, StrategyResult};
use crate::core::services::TradingServices;
use crate::core::types::{OrderForce, OrderParams, OrderSide, TradeDirection, TradeSide};
use crate::utils::precision::{format_places, round_to_places};

use crate::strategies::common::tracker::TrackedOrder;

/// 批量撤单分片大小
pub const CANCEL_CHUNK_SIZE: usize = 50;

/// 加权平均合并结果（纯计算部分）
#[derive(Debug, Clone, PartialEq)]
pub struct MergePlan {
    pub price: f64,
    pub total_size: f64,
    pub order_ids: Vec<String>,
}

/// 对给定卖单集合计算数量加权平均价
pub fn weighted_merge_plan(
    sells: &[TrackedOrder],
    price_place: u32,
    volume_place: u32,
) -> Option<MergePlan> {
    if sells.is_empty() {
        return None;
    }

    let total_size: f64 = sells.iter().map(|o| o.size_f64()).sum();
    if total_size <= 0.0 {
        return None;
    }

    let weighted: f64 = sells.iter().map(|o| o.price_f64() * o.size_f64()).sum();
    let avg_price = round_to_places(weighted / total_size, price_place);
    let total_size = round_to_places(total_size, volume_place);

    Some(MergePlan {
        price: avg_price,
        total_size,
        order_ids: sells.iter().map(|o| o.order_id.clone()).collect(),
    })
}

/// 合并执行器
pub struct MergeEngine {
    in_flight: AtomicBool,
}

/// 合并执行结果
#[derive(Debug)]
pub struct MergeOutcome {
    pub cancelled: Vec<String>,
    pub new_order: Option<(String, String, String)>, // (order_id, price, size)
}

impl MergeEngine {
    pub fn new() -> Self {
        Self {
            in_flight: AtomicBool::new(false),
        }
    }

    /// 取最旧 merge_threshold 笔卖单执行合并
    ///
    /// 撤单分片执行；至少撤掉一笔才会提交新卖单，新卖单按
    /// 实际撤掉的子集重新加权（撤单失败的旧卖单仍在场上占着库存）。
    pub async fn run(
        &self,
        services: &TradingServices,
        symbol: &str,
        oldest_sells: &[TrackedOrder],
        price_place: u32,
        volume_place: u32,
        trade_side: Option<TradeSide>,
        client_oid: Option<String>,
    ) -> StrategyResult<MergeOutcome> {
        // 闩锁：已有合并在途则直接返回
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::debug!("合并正在执行，跳过本次触发");
            return Ok(MergeOutcome {
                cancelled: Vec::new(),
                new_order: None,
            });
        }

        let result = self
            .run_inner(
                services,
                symbol,
                oldest_sells,
                price_place,
                volume_place,
                trade_side,
                client_oid,
            )
            .await;

        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn run_inner(
        &self,
        services: &TradingServices,
        symbol: &str,
        oldest_sells: &[TrackedOrder],
        price_place: u32,
        volume_place: u32,
        trade_side: Option<TradeSide>,
        client_oid: Option<String>,
    ) -> StrategyResult<MergeOutcome> {
        let plan = weighted_merge_plan(oldest_sells, price_place, volume_place)
            .ok_or_else(|| StrategyError::MergeFailed("没有可合并的卖单".to_string()))?;

        // 分片批量撤单，收集实际撤掉的集合
        let mut cancelled: Vec<String> = Vec::new();
        for chunk in plan.order_ids.chunks(CANCEL_CHUNK_SIZE) {
            let outcome = services
                .order
                .batch_cancel_orders(symbol, chunk)
                .await
                .map_err(StrategyError::Exchange)?;

            for (order_id, reason) in &outcome.failed {
                log::warn!("⚠️ 合并撤单失败 {}: {}", order_id, reason);
            }
            cancelled.extend(outcome.cancelled);
        }

        if cancelled.is_empty() {
            return Err(StrategyError::MergeFailed(
                "批量撤单全部失败，放弃合并".to_string(),
            ));
        }

        // 按实际撤掉的子集重新加权
        let cancelled_sells: Vec<TrackedOrder> = oldest_sells
            .iter()
            .filter(|o| cancelled.contains(&o.order_id))
            .cloned()
            .collect();
        let plan = weighted_merge_plan(&cancelled_sells, price_place, volume_place)
            .ok_or_else(|| StrategyError::MergeFailed("撤单子集为空".to_string()))?;

        let price_str = format_places(plan.price, price_place);
        let size_str = format_places(plan.total_size, volume_place);

        let mut params = OrderParams::limit(
            symbol,
            OrderSide::Sell,
            price_str.clone(),
            size_str.clone(),
        )
        .with_force(OrderForce::PostOnly)
        .with_trade_side(trade_side);
        if let Some(oid) = client_oid {
            params = params.with_client_oid(oid);
        }

        let placed = services
            .order
            .place_order(&params)
            .await
            .map_err(StrategyError::Exchange)?;

        log::info!(
            "✅ 合并完成: 撤销{}笔，新卖单 {} @ {} x {}",
            cancelled.len(),
            placed.order_id,
            price_str,
            size_str
        );

        Ok(MergeOutcome {
            cancelled,
            new_order: Some((placed.order_id, price_str, size_str)),
        })
    }
}

impl Default for MergeEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// 合并事件的数据负载
pub fn merged_event_data(outcome: &MergeOutcome) -> serde_json::Value {
    json!({
        "merged_count": outcome.cancelled.len(),
        "new_order_id": outcome.new_order.as_ref().map(|(id, _, _)| id.clone()),
        "price": outcome.new_order.as_ref().map(|(_, p, _)| p.clone()),
        "size": outcome.new_order.as_ref().map(|(_, _, s)| s.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sell(id: &str, price: &str, size: &str, created_at: i64) -> TrackedOrder {
        let mut order = TrackedOrder::new(
            id.to_string(),
            None,
            OrderSide::Sell,
            price.to_string(),
            size.to_string(),
            TradeDirection::Long,
        );
        order.created_at = created_at;
        order
    }

    #[test]
    fn test_weighted_average_matches_hand_calc() {
        // (100.1*1 + 100.3*2) / 3 = 100.2333... → 1位精度 100.2
        let sells = vec![sell("s1", "100.1", "1", 1), sell("s2", "100.3", "2", 2)];
        let plan = weighted_merge_plan(&sells, 1, 4).unwrap();

        assert_eq!(plan.price, 100.2);
        assert_eq!(plan.total_size, 3.0);
        assert_eq!(plan.order_ids, vec!["s1", "s2"]);
    }

    #[test]
    fn test_empty_set_yields_no_plan() {
        assert!(weighted_merge_plan(&[], 1, 4).is_none());
    }

    #[test]
    fn test_size_rounding() {
        let sells = vec![
            sell("s1", "10.00", "0.33333", 1),
            sell("s2", "10.00", "0.33333", 2),
        ];
        let plan = weighted_merge_plan(&sells, 2, 4).unwrap();
        assert_eq!(plan.total_size, 0.6667);
        assert_eq!(plan.price, 10.0);
    }
}
