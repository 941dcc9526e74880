//! 公共市场端点
//!
//! 规格缓存的第三层数据源：一次拉取全量交易对，由缓存侧过滤。

use serde::Deserialize;

use crate::core::error::Result;

use super::{BitgetClient, PRODUCT_TYPE};

/// 合约交易对原始行
#[derive(Debug, Clone, Deserialize)]
pub struct ContractSpecRow {
    pub symbol: String,
    #[serde(rename = "baseCoin", default)]
    pub base_coin: String,
    #[serde(rename = "quoteCoin", default)]
    pub quote_coin: String,
    #[serde(rename = "pricePlace", default)]
    pub price_place: String,
    #[serde(rename = "volumePlace", default)]
    pub volume_place: String,
    #[serde(rename = "minTradeNum", default)]
    pub min_trade_num: String,
    #[serde(rename = "sizeMultiplier", default)]
    pub size_multiplier: String,
    #[serde(rename = "makerFeeRate", default)]
    pub maker_fee_rate: String,
    #[serde(rename = "takerFeeRate", default)]
    pub taker_fee_rate: String,
    #[serde(rename = "symbolStatus", default)]
    pub symbol_status: String,
}

/// 现货交易对原始行
#[derive(Debug, Clone, Deserialize)]
pub struct SpotSpecRow {
    pub symbol: String,
    #[serde(rename = "baseCoin", default)]
    pub base_coin: String,
    #[serde(rename = "quoteCoin", default)]
    pub quote_coin: String,
    #[serde(rename = "pricePrecision", default)]
    pub price_precision: String,
    #[serde(rename = "quantityPrecision", default)]
    pub quantity_precision: String,
    #[serde(rename = "minTradeAmount", default)]
    pub min_trade_amount: String,
    #[serde(rename = "makerFeeRate", default)]
    pub maker_fee_rate: String,
    #[serde(rename = "takerFeeRate", default)]
    pub taker_fee_rate: String,
    #[serde(default)]
    pub status: String,
}

/// 拉取全量合约交易对
pub async fn fetch_contract_specs(client: &BitgetClient) -> Result<Vec<ContractSpecRow>> {
    client
        .public_get(
            "/api/v2/mix/market/contracts",
            &[("productType", PRODUCT_TYPE.to_string())],
        )
        .await
}

/// 拉取全量现货交易对
pub async fn fetch_spot_specs(client: &BitgetClient) -> Result<Vec<SpotSpecRow>> {
    client.public_get("/api/v2/spot/public/symbols", &[]).await
}
