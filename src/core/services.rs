use std::sync::Arc;

use async_trait::async_trait;

use crate::core::types::{
    AccountEquity, BatchCancelOutcome, OrderDetail, OrderParams, PendingOrder, PlacedOrder,
    TickerSnapshot,
};

use super::error::Result;

/// 订单能力接口
///
/// 策略引擎只依赖能力接口，不感知具体适配器（衍生品/现货）。
#[async_trait]
pub trait OrderService: Send + Sync {
    async fn place_order(&self, params: &OrderParams) -> Result<PlacedOrder>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()>;

    /// 批量撤单，返回成功/失败分组
    async fn batch_cancel_orders(
        &self,
        symbol: &str,
        order_ids: &[String],
    ) -> Result<BatchCancelOutcome>;

    async fn get_pending_orders(&self, symbol: &str) -> Result<Vec<PendingOrder>>;

    async fn get_order_detail(&self, symbol: &str, order_id: &str) -> Result<OrderDetail>;
}

/// 行情能力接口
#[async_trait]
pub trait MarketDataService: Send + Sync {
    async fn get_ticker(&self, symbol: &str) -> Result<TickerSnapshot>;

    async fn get_best_bid(&self, symbol: &str) -> Result<f64>;

    async fn get_best_ask(&self, symbol: &str) -> Result<f64>;
}

/// 账户能力接口
#[async_trait]
pub trait AccountService: Send + Sync {
    async fn get_available_balance(&self) -> Result<f64>;

    async fn get_account_equity(&self) -> Result<AccountEquity>;
}

/// 三元能力组合，由工厂按交易类型构建
#[derive(Clone)]
pub struct TradingServices {
    pub order: Arc<dyn OrderService>,
    pub market: Arc<dyn MarketDataService>,
    pub account: Arc<dyn AccountService>,
}
