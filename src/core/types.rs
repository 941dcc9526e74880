use chrono::Utc;
/// 统一的类型定义模块
/// 整合了撮合边界上使用的全部数据结构
use serde::{Deserialize, Serialize};

// ============= 基础类型定义 =============

/// 交易市场类型（衍生品 / 现货）
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingType {
    Futures,
    Spot,
}

impl TradingType {
    /// 持久化时使用的场所编码
    pub fn venue_code(&self) -> &'static str {
        match self {
            TradingType::Futures => "futures",
            TradingType::Spot => "spot",
        }
    }
}

impl std::fmt::Display for TradingType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.venue_code())
    }
}

/// 订单方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 持仓方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeDirection {
    Long,
    Short,
    Both,
}

impl Default for TradeDirection {
    fn default() -> Self {
        TradeDirection::Long
    }
}

/// 合约账户持仓模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldMode {
    /// 单向持仓，下单不带 tradeSide
    SingleHold,
    /// 双向持仓，下单必须带 open/close
    DoubleHold,
}

/// 双向持仓模式下的开平方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSide {
    Open,
    Close,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Open => "open",
            TradeSide::Close => "close",
        }
    }

    pub fn inverted(&self) -> Self {
        match self {
            TradeSide::Open => TradeSide::Close,
            TradeSide::Close => TradeSide::Open,
        }
    }
}

/// 订单有效方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderForce {
    Gtc,
    PostOnly,
}

impl OrderForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderForce::Gtc => "gtc",
            OrderForce::PostOnly => "post_only",
        }
    }
}

/// 订单类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Limit,
    Market,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Limit => "limit",
            OrderKind::Market => "market",
        }
    }
}

// ============= 下单参数 =============

/// 统一下单参数
///
/// 衍生品专属字段用 Option 承载，现货适配器直接忽略。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderParams {
    pub symbol: String,
    pub side: OrderSide,
    pub kind: OrderKind,
    /// 交易所精度的价格字符串；市价单为 None
    pub price: Option<String>,
    /// 交易所精度的数量字符串
    pub size: String,
    pub force: OrderForce,
    pub client_oid: Option<String>,
    // 衍生品专属
    pub product_type: Option<String>,
    pub margin_mode: Option<String>,
    pub margin_coin: Option<String>,
    pub trade_side: Option<TradeSide>,
}

impl OrderParams {
    pub fn limit(symbol: impl Into<String>, side: OrderSide, price: String, size: String) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            kind: OrderKind::Limit,
            price: Some(price),
            size,
            force: OrderForce::Gtc,
            client_oid: None,
            product_type: None,
            margin_mode: None,
            margin_coin: None,
            trade_side: None,
        }
    }

    pub fn market(symbol: impl Into<String>, side: OrderSide, size: String) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            kind: OrderKind::Market,
            price: None,
            size,
            force: OrderForce::Gtc,
            client_oid: None,
            product_type: None,
            margin_mode: None,
            margin_coin: None,
            trade_side: None,
        }
    }

    pub fn with_force(mut self, force: OrderForce) -> Self {
        self.force = force;
        self
    }

    pub fn with_trade_side(mut self, trade_side: Option<TradeSide>) -> Self {
        self.trade_side = trade_side;
        self
    }

    pub fn with_client_oid(mut self, client_oid: String) -> Self {
        self.client_oid = Some(client_oid);
        self
    }
}

/// 下单回执
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order_id: String,
    pub client_oid: Option<String>,
}

/// 交易所挂单列表中的一行
#[derive(Debug, Clone)]
pub struct PendingOrder {
    pub order_id: String,
    pub client_oid: Option<String>,
    pub symbol: String,
    pub side: OrderSide,
    pub price: String,
    pub size: String,
    pub created_at: i64,
}

/// 订单详情中的权威状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDetailState {
    Live,
    PartiallyFilled,
    Filled,
    Cancelled,
}

impl OrderDetailState {
    /// 交易所状态字符串到统一状态的映射
    pub fn from_exchange(raw: &str) -> Option<Self> {
        match raw {
            "live" | "new" => Some(OrderDetailState::Live),
            "partially_filled" | "partial_fill" => Some(OrderDetailState::PartiallyFilled),
            "filled" | "full_fill" => Some(OrderDetailState::Filled),
            "cancelled" | "canceled" => Some(OrderDetailState::Cancelled),
            _ => None,
        }
    }
}

/// 订单详情
#[derive(Debug, Clone)]
pub struct OrderDetail {
    pub order_id: String,
    pub state: OrderDetailState,
    pub price: String,
    pub size: String,
    pub filled_size: String,
    /// 成交均价，未成交时为空
    pub avg_price: Option<String>,
    pub updated_at: i64,
}

/// 批量撤单结果：按成功/失败分组
#[derive(Debug, Clone, Default)]
pub struct BatchCancelOutcome {
    pub cancelled: Vec<String>,
    pub failed: Vec<(String, String)>,
}

// ============= 行情与账户 =============

/// 行情快照
#[derive(Debug, Clone)]
pub struct TickerSnapshot {
    pub symbol: String,
    pub last_price: f64,
    pub best_bid: f64,
    pub best_ask: f64,
    pub high_24h: f64,
    pub low_24h: f64,
    pub timestamp: i64,
}

/// 账户权益
#[derive(Debug, Clone, Copy, Default)]
pub struct AccountEquity {
    pub equity: f64,
    pub available: f64,
    pub unrealized_pnl: f64,
}

// ============= 辅助函数 =============

/// 毫秒级时间戳
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// UTC 自然日字符串（每日统计/风控滚动的键）
pub fn utc_date_key() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detail_state_mapping() {
        assert_eq!(
            OrderDetailState::from_exchange("live"),
            Some(OrderDetailState::Live)
        );
        assert_eq!(
            OrderDetailState::from_exchange("new"),
            Some(OrderDetailState::Live)
        );
        assert_eq!(
            OrderDetailState::from_exchange("cancelled"),
            Some(OrderDetailState::Cancelled)
        );
        assert_eq!(
            OrderDetailState::from_exchange("canceled"),
            Some(OrderDetailState::Cancelled)
        );
        assert_eq!(
            OrderDetailState::from_exchange("filled"),
            Some(OrderDetailState::Filled)
        );
        assert_eq!(OrderDetailState::from_exchange("unknown"), None);
    }

    #[test]
    fn test_trade_side_inversion() {
        assert_eq!(TradeSide::Open.inverted(), TradeSide::Close);
        assert_eq!(TradeSide::Close.inverted(), TradeSide::Open);
    }
}
