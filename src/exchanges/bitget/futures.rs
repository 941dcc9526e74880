use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::core::error::{ExchangeError, Result};
use crate::core::services::{AccountService, MarketDataService, OrderService};
use crate::core::types::{
    AccountEquity, BatchCancelOutcome, HoldMode, OrderDetail, OrderDetailState, OrderParams,
    OrderSide, PendingOrder, PlacedOrder, TickerSnapshot,
};

use super::{parse_f64, parse_i64, BitgetClient, DEFAULT_MARGIN_COIN, DEFAULT_MARGIN_MODE, PRODUCT_TYPE};

/// USDT永续适配器，同时提供订单/行情/账户三种能力
pub struct BitgetFuturesServices {
    client: Arc<BitgetClient>,
}

impl BitgetFuturesServices {
    pub fn new(client: Arc<BitgetClient>) -> Self {
        Self { client }
    }
}

/// 探测合约账户持仓模式（one_way_mode / hedge_mode）
pub async fn detect_hold_mode(client: &BitgetClient) -> Result<HoldMode> {
    #[derive(Deserialize)]
    struct AccountRow {
        #[serde(rename = "posMode", default)]
        pos_mode: String,
    }

    let row: AccountRow = client
        .signed_get(
            "/api/v2/mix/account/account",
            &[
                ("symbol", "BTCUSDT".to_string()),
                ("productType", PRODUCT_TYPE.to_string()),
                ("marginCoin", DEFAULT_MARGIN_COIN.to_string()),
            ],
        )
        .await?;

    match row.pos_mode.as_str() {
        "one_way_mode" => Ok(HoldMode::SingleHold),
        "hedge_mode" => Ok(HoldMode::DoubleHold),
        other => Err(ExchangeError::Parse(format!(
            "无法识别的持仓模式: {}",
            other
        ))),
    }
}

#[derive(Deserialize)]
struct MixOrderReceipt {
    #[serde(rename = "orderId")]
    order_id: String,
    #[serde(rename = "clientOid", default)]
    client_oid: Option<String>,
}

#[derive(Deserialize)]
struct MixPendingList {
    #[serde(rename = "entrustedList", default)]
    entrusted_list: Option<Vec<MixPendingRow>>,
}

#[derive(Deserialize)]
struct MixPendingRow {
    #[serde(rename = "orderId")]
    order_id: String,
    #[serde(rename = "clientOid", default)]
    client_oid: Option<String>,
    symbol: String,
    side: String,
    #[serde(default)]
    price: String,
    size: String,
    #[serde(rename = "cTime", default)]
    c_time: String,
}

#[derive(Deserialize)]
struct MixOrderDetailRow {
    #[serde(rename = "orderId")]
    order_id: String,
    state: String,
    #[serde(default)]
    price: String,
    size: String,
    #[serde(rename = "baseVolume", default)]
    base_volume: String,
    #[serde(rename = "priceAvg", default)]
    price_avg: String,
    #[serde(rename = "uTime", default)]
    u_time: String,
}

#[derive(Deserialize)]
struct MixBatchCancelResult {
    #[serde(rename = "successList", default)]
    success_list: Vec<MixBatchCancelRow>,
    #[serde(rename = "failureList", default)]
    failure_list: Vec<MixBatchFailureRow>,
}

#[derive(Deserialize)]
struct MixBatchCancelRow {
    #[serde(rename = "orderId")]
    order_id: String,
}

#[derive(Deserialize)]
struct MixBatchFailureRow {
    #[serde(rename = "orderId")]
    order_id: String,
    #[serde(rename = "errorMsg", default)]
    error_msg: String,
}

#[async_trait]
impl OrderService for BitgetFuturesServices {
    async fn place_order(&self, params: &OrderParams) -> Result<PlacedOrder> {
        let mut body = json!({
            "symbol": &params.symbol,
            "productType": params.product_type.as_deref().unwrap_or(PRODUCT_TYPE),
            "marginMode": params.margin_mode.as_deref().unwrap_or(DEFAULT_MARGIN_MODE),
            "marginCoin": params.margin_coin.as_deref().unwrap_or(DEFAULT_MARGIN_COIN),
            "side": params.side.as_str(),
            "orderType": params.kind.as_str(),
            "size": &params.size,
            "force": params.force.as_str(),
        });

        if let Some(price) = &params.price {
            body["price"] = json!(price);
        }
        if let Some(trade_side) = params.trade_side {
            body["tradeSide"] = json!(trade_side.as_str());
        }
        if let Some(client_oid) = &params.client_oid {
            body["clientOid"] = json!(client_oid);
        }

        let receipt: MixOrderReceipt = self
            .client
            .signed_post("/api/v2/mix/order/place-order", &body)
            .await?;

        Ok(PlacedOrder {
            order_id: receipt.order_id,
            client_oid: receipt.client_oid,
        })
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()> {
        let body = json!({
            "symbol": symbol,
            "productType": PRODUCT_TYPE,
            "orderId": order_id,
        });

        let _: MixOrderReceipt = self
            .client
            .signed_post("/api/v2/mix/order/cancel-order", &body)
            .await?;
        Ok(())
    }

    async fn batch_cancel_orders(
        &self,
        symbol: &str,
        order_ids: &[String],
    ) -> Result<BatchCancelOutcome> {
        let id_list: Vec<serde_json::Value> = order_ids
            .iter()
            .map(|id| json!({ "orderId": id }))
            .collect();

        let body = json!({
            "symbol": symbol,
            "productType": PRODUCT_TYPE,
            "orderIdList": id_list,
        });

        let result: MixBatchCancelResult = self
            .client
            .signed_post("/api/v2/mix/order/batch-cancel-orders", &body)
            .await?;

        Ok(BatchCancelOutcome {
            cancelled: result.success_list.into_iter().map(|r| r.order_id).collect(),
            failed: result
                .failure_list
                .into_iter()
                .map(|r| (r.order_id, r.error_msg))
                .collect(),
        })
    }

    async fn get_pending_orders(&self, symbol: &str) -> Result<Vec<PendingOrder>> {
        let list: MixPendingList = self
            .client
            .signed_get(
                "/api/v2/mix/order/orders-pending",
                &[
                    ("symbol", symbol.to_string()),
                    ("productType", PRODUCT_TYPE.to_string()),
                ],
            )
            .await?;

        Ok(list
            .entrusted_list
            .unwrap_or_default()
            .into_iter()
            .map(|row| PendingOrder {
                order_id: row.order_id,
                client_oid: row.client_oid,
                symbol: row.symbol,
                side: if row.side == "sell" {
                    OrderSide::Sell
                } else {
                    OrderSide::Buy
                },
                price: row.price,
                size: row.size,
                created_at: parse_i64(&row.c_time),
            })
            .collect())
    }

    async fn get_order_detail(&self, symbol: &str, order_id: &str) -> Result<OrderDetail> {
        let row: MixOrderDetailRow = self
            .client
            .signed_get(
                "/api/v2/mix/order/detail",
                &[
                    ("symbol", symbol.to_string()),
                    ("productType", PRODUCT_TYPE.to_string()),
                    ("orderId", order_id.to_string()),
                ],
            )
            .await?;

        let state = OrderDetailState::from_exchange(&row.state)
            .ok_or_else(|| ExchangeError::Parse(format!("未知订单状态: {}", row.state)))?;

        Ok(OrderDetail {
            order_id: row.order_id,
            state,
            price: row.price,
            size: row.size,
            filled_size: row.base_volume,
            avg_price: if row.price_avg.is_empty() {
                None
            } else {
                Some(row.price_avg)
            },
            updated_at: parse_i64(&row.u_time),
        })
    }
}

#[derive(Deserialize)]
struct MixTickerRow {
    #[serde(rename = "lastPr", default)]
    last_pr: String,
    #[serde(rename = "bidPr", default)]
    bid_pr: String,
    #[serde(rename = "askPr", default)]
    ask_pr: String,
    #[serde(rename = "high24h", default)]
    high_24h: String,
    #[serde(rename = "low24h", default)]
    low_24h: String,
    #[serde(default)]
    ts: String,
}

#[derive(Deserialize)]
struct MixDepth {
    #[serde(default)]
    bids: Vec<[String; 2]>,
    #[serde(default)]
    asks: Vec<[String; 2]>,
}

#[async_trait]
impl MarketDataService for BitgetFuturesServices {
    async fn get_ticker(&self, symbol: &str) -> Result<TickerSnapshot> {
        let rows: Vec<MixTickerRow> = self
            .client
            .public_get(
                "/api/v2/mix/market/ticker",
                &[
                    ("symbol", symbol.to_string()),
                    ("productType", PRODUCT_TYPE.to_string()),
                ],
            )
            .await?;

        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| ExchangeError::Parse(format!("行情为空: {}", symbol)))?;

        Ok(TickerSnapshot {
            symbol: symbol.to_string(),
            last_price: parse_f64(&row.last_pr),
            best_bid: parse_f64(&row.bid_pr),
            best_ask: parse_f64(&row.ask_pr),
            high_24h: parse_f64(&row.high_24h),
            low_24h: parse_f64(&row.low_24h),
            timestamp: parse_i64(&row.ts),
        })
    }

    /// 合约走深度1的合并深度端点
    async fn get_best_bid(&self, symbol: &str) -> Result<f64> {
        let depth = self.get_merge_depth(symbol).await?;
        depth
            .bids
            .first()
            .map(|level| parse_f64(&level[0]))
            .filter(|p| *p > 0.0)
            .ok_or_else(|| ExchangeError::Parse(format!("买一档为空: {}", symbol)))
    }

    async fn get_best_ask(&self, symbol: &str) -> Result<f64> {
        let depth = self.get_merge_depth(symbol).await?;
        depth
            .asks
            .first()
            .map(|level| parse_f64(&level[0]))
            .filter(|p| *p > 0.0)
            .ok_or_else(|| ExchangeError::Parse(format!("卖一档为空: {}", symbol)))
    }
}

impl BitgetFuturesServices {
    async fn get_merge_depth(&self, symbol: &str) -> Result<MixDepth> {
        self.client
            .public_get(
                "/api/v2/mix/market/merge-depth",
                &[
                    ("symbol", symbol.to_string()),
                    ("productType", PRODUCT_TYPE.to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await
    }
}

#[derive(Deserialize)]
struct MixAccountRow {
    #[serde(rename = "accountEquity", default)]
    account_equity: String,
    #[serde(default)]
    available: String,
    #[serde(rename = "unrealizedPL", default)]
    unrealized_pl: String,
}

#[async_trait]
impl AccountService for BitgetFuturesServices {
    async fn get_available_balance(&self) -> Result<f64> {
        Ok(self.fetch_account().await?.available)
    }

    async fn get_account_equity(&self) -> Result<AccountEquity> {
        self.fetch_account().await
    }
}

impl BitgetFuturesServices {
    async fn fetch_account(&self) -> Result<AccountEquity> {
        let row: MixAccountRow = self
            .client
            .signed_get(
                "/api/v2/mix/account/account",
                &[
                    ("symbol", "BTCUSDT".to_string()),
                    ("productType", PRODUCT_TYPE.to_string()),
                    ("marginCoin", DEFAULT_MARGIN_COIN.to_string()),
                ],
            )
            .await?;

        Ok(AccountEquity {
            equity: parse_f64(&row.account_equity),
            available: parse_f64(&row.available),
            unrealized_pnl: parse_f64(&row.unrealized_pl),
        })
    }
}
