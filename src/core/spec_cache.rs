//! 交易对规格缓存模块
//!
//! 三层结构：内存（1小时TTL）→ 数据库 → 交易所公共端点。
//! 引擎在启动时取走一份只读拷贝，缓存条目本身不可变。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::RwLock;

use crate::core::error::{StrategyError, StrategyResult};
use crate::core::types::TradingType;
use crate::exchanges::bitget::public::{ContractSpecRow, SpotSpecRow};
use crate::exchanges::bitget::{self, public, BitgetClient};
use crate::storage::{SpecRecord, StrategyStore};

/// 热门交易对清单（按人气硬编码）
const HOT_PAIRS: &[&str] = &[
    "BTCUSDT", "ETHUSDT", "SOLUSDT", "XRPUSDT", "DOGEUSDT", "BNBUSDT", "ADAUSDT", "AVAXUSDT",
];

const MEMORY_TTL: Duration = Duration::from_secs(3600);
const LIST_LIMIT: usize = 50;

/// 交易对规格（抓取后不可变）
#[derive(Debug, Clone)]
pub struct InstrumentSpec {
    pub symbol: String,
    pub trading_type: TradingType,
    pub base_coin: String,
    pub quote_coin: String,
    pub price_place: u32,
    pub volume_place: u32,
    pub min_trade_num: f64,
    pub size_multiplier: f64,
    pub maker_fee_rate: f64,
    pub taker_fee_rate: f64,
}

struct CacheEntry {
    spec: InstrumentSpec,
    fetched_at: Instant,
}

pub struct InstrumentSpecCache {
    client: Arc<BitgetClient>,
    store: Arc<StrategyStore>,
    memory: RwLock<HashMap<(TradingType, String), CacheEntry>>,
}

impl InstrumentSpecCache {
    pub fn new(client: Arc<BitgetClient>, store: Arc<StrategyStore>) -> Self {
        Self {
            client,
            store,
            memory: RwLock::new(HashMap::new()),
        }
    }

    /// 依次走内存 → 数据库 → 交易所
    pub async fn get_spec(
        &self,
        symbol: &str,
        trading_type: TradingType,
    ) -> StrategyResult<InstrumentSpec> {
        // 第一层：内存
        {
            let memory = self.memory.read();
            if let Some(entry) = memory.get(&(trading_type, symbol.to_string())) {
                if entry.fetched_at.elapsed() <= MEMORY_TTL {
                    return Ok(entry.spec.clone());
                }
            }
        }

        // 第二层：数据库（同样受1小时时效约束）
        if let Some(spec) = self.load_durable(symbol, trading_type).await {
            self.remember(spec.clone());
            return Ok(spec);
        }

        // 第三层：交易所公共端点
        self.refresh_spec(symbol, trading_type).await
    }

    /// 强制走交易所端点并回写两级缓存
    pub async fn refresh_spec(
        &self,
        symbol: &str,
        trading_type: TradingType,
    ) -> StrategyResult<InstrumentSpec> {
        let spec = match trading_type {
            TradingType::Futures => {
                let rows = public::fetch_contract_specs(&self.client).await?;
                let row = rows
                    .into_iter()
                    .find(|r| r.symbol == symbol)
                    .ok_or_else(|| StrategyError::ContractSpecNotFound(symbol.to_string()))?;
                let spec = contract_row_to_spec(&row);
                self.persist_contract(&row, &spec).await;
                spec
            }
            TradingType::Spot => {
                let rows = public::fetch_spot_specs(&self.client).await?;
                let row = rows
                    .into_iter()
                    .find(|r| r.symbol == symbol)
                    .ok_or_else(|| StrategyError::InstrumentSpecNotFound(symbol.to_string()))?;
                let spec = spot_row_to_spec(&row);
                self.persist_spot(&row, &spec).await;
                spec
            }
        };

        self.remember(spec.clone());
        Ok(spec)
    }

    /// 可用交易对列表，大写子串匹配 symbol 或 baseCoin，最多50条
    pub async fn list_available(
        &self,
        trading_type: TradingType,
        search: Option<&str>,
    ) -> StrategyResult<Vec<InstrumentSpec>> {
        let needle = search.map(|s| s.to_uppercase());

        let matches = |symbol: &str, base: &str| -> bool {
            match &needle {
                Some(n) => {
                    symbol.to_uppercase().contains(n) || base.to_uppercase().contains(n)
                }
                None => true,
            }
        };

        let specs: Vec<InstrumentSpec> = match trading_type {
            TradingType::Futures => public::fetch_contract_specs(&self.client)
                .await?
                .iter()
                .filter(|r| r.symbol_status == "normal" || r.symbol_status == "online")
                .filter(|r| matches(&r.symbol, &r.base_coin))
                .take(LIST_LIMIT)
                .map(contract_row_to_spec)
                .collect(),
            TradingType::Spot => public::fetch_spot_specs(&self.client)
                .await?
                .iter()
                .filter(|r| r.status == "online" || r.status == "normal")
                .filter(|r| r.quote_coin == "USDT")
                .filter(|r| matches(&r.symbol, &r.base_coin))
                .take(LIST_LIMIT)
                .map(spot_row_to_spec)
                .collect(),
        };

        Ok(specs)
    }

    /// 热门交易对规格，查不到的跳过
    pub async fn get_hot_pairs(&self, trading_type: TradingType) -> Vec<InstrumentSpec> {
        let mut specs = Vec::with_capacity(HOT_PAIRS.len());
        for symbol in HOT_PAIRS {
            match self.get_spec(symbol, trading_type).await {
                Ok(spec) => specs.push(spec),
                Err(e) => log::debug!("热门交易对 {} 查询失败: {}", symbol, e),
            }
        }
        specs
    }

    fn remember(&self, spec: InstrumentSpec) {
        let mut memory = self.memory.write();
        memory.insert(
            (spec.trading_type, spec.symbol.clone()),
            CacheEntry {
                spec,
                fetched_at: Instant::now(),
            },
        );
    }

    async fn load_durable(
        &self,
        symbol: &str,
        trading_type: TradingType,
    ) -> Option<InstrumentSpec> {
        let record = match trading_type {
            TradingType::Futures => self
                .store
                .get_contract_spec(symbol, bitget::PRODUCT_TYPE)
                .await
                .ok()
                .flatten(),
            TradingType::Spot => self.store.get_spot_spec(symbol).await.ok().flatten(),
        }?;

        // 数据库条目超过1小时视为过期，转交第三层
        let age = Utc::now() - record.fetched_at;
        if age.num_seconds() > MEMORY_TTL.as_secs() as i64 {
            return None;
        }

        Some(record_to_spec(&record, trading_type))
    }

    async fn persist_contract(&self, row: &ContractSpecRow, spec: &InstrumentSpec) {
        let record = spec_to_record(spec, serde_json::to_value(RawContract::from(row)).ok());
        if let Err(e) = self
            .store
            .upsert_contract_spec(bitget::PRODUCT_TYPE, &record)
            .await
        {
            log::warn!("⚠️ 合约规格落库失败 {}: {}", spec.symbol, e);
        }
    }

    async fn persist_spot(&self, row: &SpotSpecRow, spec: &InstrumentSpec) {
        let record = spec_to_record(spec, serde_json::to_value(RawSpot::from(row)).ok());
        if let Err(e) = self.store.upsert_spot_spec(&record).await {
            log::warn!("⚠️ 现货规格落库失败 {}: {}", spec.symbol, e);
        }
    }
}

// 原始行的可序列化形态，落库 raw_data 列
#[derive(serde::Serialize)]
struct RawContract {
    symbol: String,
    symbol_status: String,
}

impl From<&ContractSpecRow> for RawContract {
    fn from(row: &ContractSpecRow) -> Self {
        Self {
            symbol: row.symbol.clone(),
            symbol_status: row.symbol_status.clone(),
        }
    }
}

#[derive(serde::Serialize)]
struct RawSpot {
    symbol: String,
    status: String,
}

impl From<&SpotSpecRow> for RawSpot {
    fn from(row: &SpotSpecRow) -> Self {
        Self {
            symbol: row.symbol.clone(),
            status: row.status.clone(),
        }
    }
}

fn parse_u32(raw: &str) -> u32 {
    raw.parse().unwrap_or(0)
}

fn parse_f64_or(raw: &str, default: f64) -> f64 {
    raw.parse().unwrap_or(default)
}

fn contract_row_to_spec(row: &ContractSpecRow) -> InstrumentSpec {
    InstrumentSpec {
        symbol: row.symbol.clone(),
        trading_type: TradingType::Futures,
        base_coin: row.base_coin.clone(),
        quote_coin: row.quote_coin.clone(),
        price_place: parse_u32(&row.price_place),
        volume_place: parse_u32(&row.volume_place),
        min_trade_num: parse_f64_or(&row.min_trade_num, 0.0),
        size_multiplier: parse_f64_or(&row.size_multiplier, 1.0),
        maker_fee_rate: parse_f64_or(&row.maker_fee_rate, 0.0002),
        taker_fee_rate: parse_f64_or(&row.taker_fee_rate, 0.0006),
    }
}

fn spot_row_to_spec(row: &SpotSpecRow) -> InstrumentSpec {
    InstrumentSpec {
        symbol: row.symbol.clone(),
        trading_type: TradingType::Spot,
        base_coin: row.base_coin.clone(),
        quote_coin: row.quote_coin.clone(),
        price_place: parse_u32(&row.price_precision),
        volume_place: parse_u32(&row.quantity_precision),
        min_trade_num: parse_f64_or(&row.min_trade_amount, 0.0),
        size_multiplier: 1.0,
        maker_fee_rate: parse_f64_or(&row.maker_fee_rate, 0.001),
        taker_fee_rate: parse_f64_or(&row.taker_fee_rate, 0.001),
    }
}

fn record_to_spec(record: &SpecRecord, trading_type: TradingType) -> InstrumentSpec {
    InstrumentSpec {
        symbol: record.symbol.clone(),
        trading_type,
        base_coin: record.base_coin.clone(),
        quote_coin: record.quote_coin.clone(),
        price_place: record.price_place.max(0) as u32,
        volume_place: record.volume_place.max(0) as u32,
        min_trade_num: parse_f64_or(&record.min_trade_num, 0.0),
        size_multiplier: parse_f64_or(&record.size_multiplier, 1.0),
        maker_fee_rate: parse_f64_or(&record.maker_fee_rate, 0.0002),
        taker_fee_rate: parse_f64_or(&record.taker_fee_rate, 0.0006),
    }
}

fn spec_to_record(spec: &InstrumentSpec, raw: Option<serde_json::Value>) -> SpecRecord {
    SpecRecord {
        symbol: spec.symbol.clone(),
        base_coin: spec.base_coin.clone(),
        quote_coin: spec.quote_coin.clone(),
        price_place: spec.price_place as i32,
        volume_place: spec.volume_place as i32,
        min_trade_num: spec.min_trade_num.to_string(),
        size_multiplier: spec.size_multiplier.to_string(),
        maker_fee_rate: spec.maker_fee_rate.to_string(),
        taker_fee_rate: spec.taker_fee_rate.to_string(),
        raw_data: raw.unwrap_or(serde_json::Value::Null),
        fetched_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract_row(symbol: &str, status: &str) -> ContractSpecRow {
        ContractSpecRow {
            symbol: symbol.to_string(),
            base_coin: symbol.trim_end_matches("USDT").to_string(),
            quote_coin: "USDT".to_string(),
            price_place: "1".to_string(),
            volume_place: "6".to_string(),
            min_trade_num: "0.0001".to_string(),
            size_multiplier: "1".to_string(),
            maker_fee_rate: "0.0002".to_string(),
            taker_fee_rate: "0.0006".to_string(),
            symbol_status: status.to_string(),
        }
    }

    #[test]
    fn test_contract_row_conversion() {
        let spec = contract_row_to_spec(&contract_row("BTCUSDT", "normal"));
        assert_eq!(spec.symbol, "BTCUSDT");
        assert_eq!(spec.price_place, 1);
        assert_eq!(spec.volume_place, 6);
        assert_eq!(spec.min_trade_num, 0.0001);
        assert_eq!(spec.maker_fee_rate, 0.0002);
    }

    #[test]
    fn test_record_round_trip() {
        let spec = contract_row_to_spec(&contract_row("ETHUSDT", "normal"));
        let record = spec_to_record(&spec, None);
        let restored = record_to_spec(&record, TradingType::Futures);

        assert_eq!(restored.symbol, spec.symbol);
        assert_eq!(restored.price_place, spec.price_place);
        assert_eq!(restored.volume_place, spec.volume_place);
        assert_eq!(restored.min_trade_num, spec.min_trade_num);
        assert_eq!(restored.maker_fee_rate, spec.maker_fee_rate);
        assert_eq!(restored.taker_fee_rate, spec.taker_fee_rate);
    }
}
