use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::core::error::{ExchangeError, Result};
use crate::core::services::{AccountService, MarketDataService, OrderService};
use crate::core::types::{
    AccountEquity, BatchCancelOutcome, OrderDetail, OrderDetailState, OrderParams, OrderSide,
    PendingOrder, PlacedOrder, TickerSnapshot,
};

use super::{parse_f64, parse_i64, BitgetClient};

/// 现货适配器
///
/// 衍生品专属字段（marginMode/tradeSide 等）在此直接忽略；
/// 权益 = 可用余额，未实现盈亏恒为 0。
pub struct BitgetSpotServices {
    client: Arc<BitgetClient>,
}

impl BitgetSpotServices {
    pub fn new(client: Arc<BitgetClient>) -> Self {
        Self { client }
    }
}

#[derive(Deserialize)]
struct SpotOrderReceipt {
    #[serde(rename = "orderId")]
    order_id: String,
    #[serde(rename = "clientOid", default)]
    client_oid: Option<String>,
}

#[derive(Deserialize)]
struct SpotOrderRow {
    #[serde(rename = "orderId")]
    order_id: String,
    #[serde(rename = "clientOid", default)]
    client_oid: Option<String>,
    #[serde(default)]
    symbol: String,
    side: String,
    #[serde(rename = "priceAvg", default)]
    price_avg: String,
    #[serde(default)]
    price: String,
    #[serde(default)]
    size: String,
    #[serde(default)]
    status: String,
    #[serde(rename = "baseVolume", default)]
    base_volume: String,
    #[serde(rename = "cTime", default)]
    c_time: String,
    #[serde(rename = "uTime", default)]
    u_time: String,
}

#[async_trait]
impl OrderService for BitgetSpotServices {
    async fn place_order(&self, params: &OrderParams) -> Result<PlacedOrder> {
        let mut body = json!({
            "symbol": &params.symbol,
            "side": params.side.as_str(),
            "orderType": params.kind.as_str(),
            "size": &params.size,
            "force": params.force.as_str(),
        });

        if let Some(price) = &params.price {
            body["price"] = json!(price);
        }
        if let Some(client_oid) = &params.client_oid {
            body["clientOid"] = json!(client_oid);
        }

        let receipt: SpotOrderReceipt = self
            .client
            .signed_post("/api/v2/spot/trade/place-order", &body)
            .await?;

        Ok(PlacedOrder {
            order_id: receipt.order_id,
            client_oid: receipt.client_oid,
        })
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()> {
        let body = json!({
            "symbol": symbol,
            "orderId": order_id,
        });

        let _: SpotOrderReceipt = self
            .client
            .signed_post("/api/v2/spot/trade/cancel-order", &body)
            .await?;
        Ok(())
    }

    /// 批量撤单端点失败时退化为逐单撤销
    async fn batch_cancel_orders(
        &self,
        symbol: &str,
        order_ids: &[String],
    ) -> Result<BatchCancelOutcome> {
        #[derive(Deserialize)]
        struct SpotBatchResult {
            #[serde(rename = "successList", default)]
            success_list: Vec<SpotOrderReceipt>,
            #[serde(rename = "failureList", default)]
            failure_list: Vec<SpotBatchFailureRow>,
        }

        #[derive(Deserialize)]
        struct SpotBatchFailureRow {
            #[serde(rename = "orderId")]
            order_id: String,
            #[serde(rename = "errorMsg", default)]
            error_msg: String,
        }

        let body = json!({
            "symbol": symbol,
            "orderIds": order_ids,
        });

        match self
            .client
            .signed_post::<SpotBatchResult>("/api/v2/spot/trade/batch-cancel-order", &body)
            .await
        {
            Ok(result) => Ok(BatchCancelOutcome {
                cancelled: result
                    .success_list
                    .into_iter()
                    .map(|r| r.order_id)
                    .collect(),
                failed: result
                    .failure_list
                    .into_iter()
                    .map(|r| (r.order_id, r.error_msg))
                    .collect(),
            }),
            Err(batch_err) => {
                log::warn!("⚠️ 现货批量撤单失败，退化为逐单撤销: {}", batch_err);

                let mut outcome = BatchCancelOutcome::default();
                for order_id in order_ids {
                    match self.cancel_order(symbol, order_id).await {
                        Ok(_) => outcome.cancelled.push(order_id.clone()),
                        Err(e) => outcome.failed.push((order_id.clone(), e.to_string())),
                    }
                }
                Ok(outcome)
            }
        }
    }

    async fn get_pending_orders(&self, symbol: &str) -> Result<Vec<PendingOrder>> {
        let rows: Vec<SpotOrderRow> = self
            .client
            .signed_get(
                "/api/v2/spot/trade/unfilled-orders",
                &[("symbol", symbol.to_string())],
            )
            .await?;

        Ok(rows
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
        let rows: Vec<SpotOrderRow> = self
            .client
            .signed_get(
                "/api/v2/spot/trade/orderInfo",
                &[
                    ("symbol", symbol.to_string()),
                    ("orderId", order_id.to_string()),
                ],
            )
            .await?;

        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| ExchangeError::Parse(format!("订单详情为空: {}", order_id)))?;

        let state = OrderDetailState::from_exchange(&row.status)
            .ok_or_else(|| ExchangeError::Parse(format!("未知订单状态: {}", row.status)))?;

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
struct SpotTickerRow {
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

#[async_trait]
impl MarketDataService for BitgetSpotServices {
    async fn get_ticker(&self, symbol: &str) -> Result<TickerSnapshot> {
        let row = self.fetch_ticker(symbol).await?;

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

    /// 现货从行情行派生买一/卖一
    async fn get_best_bid(&self, symbol: &str) -> Result<f64> {
        let row = self.fetch_ticker(symbol).await?;
        let bid = parse_f64(&row.bid_pr);
        if bid > 0.0 {
            Ok(bid)
        } else {
            Err(ExchangeError::Parse(format!("买一价为空: {}", symbol)))
        }
    }

    async fn get_best_ask(&self, symbol: &str) -> Result<f64> {
        let row = self.fetch_ticker(symbol).await?;
        let ask = parse_f64(&row.ask_pr);
        if ask > 0.0 {
            Ok(ask)
        } else {
            Err(ExchangeError::Parse(format!("卖一价为空: {}", symbol)))
        }
    }
}

impl BitgetSpotServices {
    async fn fetch_ticker(&self, symbol: &str) -> Result<SpotTickerRow> {
        let rows: Vec<SpotTickerRow> = self
            .client
            .public_get(
                "/api/v2/spot/market/tickers",
                &[("symbol", symbol.to_string())],
            )
            .await?;

        rows.into_iter()
            .next()
            .ok_or_else(|| ExchangeError::Parse(format!("行情为空: {}", symbol)))
    }
}

#[derive(Deserialize)]
struct SpotAssetRow {
    #[serde(default)]
    coin: String,
    #[serde(default)]
    available: String,
}

#[async_trait]
impl AccountService for BitgetSpotServices {
    async fn get_available_balance(&self) -> Result<f64> {
        let rows: Vec<SpotAssetRow> = self
            .client
            .signed_get(
                "/api/v2/spot/account/assets",
                &[("coin", "USDT".to_string())],
            )
            .await?;

        Ok(rows
            .iter()
            .find(|r| r.coin == "USDT")
            .map(|r| parse_f64(&r.available))
            .unwrap_or(0.0))
    }

    async fn get_account_equity(&self) -> Result<AccountEquity> {
        let available = self.get_available_balance().await?;
        Ok(AccountEquity {
            equity: available,
            available,
            unrealized_pnl: 0.0,
        })
    }
}
