//! 策略配置管理
//!
//! 配置表达为带标签的和类型（剥头皮 / 网格），共享基础字段。
//! 管理器持有可变配置：构造时套用默认值与覆盖项后整体校验；
//! 运行期更新拒绝不可变键，校验失败回滚。

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core::error::{StrategyError, StrategyResult};
use crate::core::types::{now_millis, TradeDirection, TradingType};

use super::risk::RiskLimits;

/// 运行期不可变更的配置键
const IMMUTABLE_KEYS: &[&str] = &[
    "symbol",
    "strategy_type",
    "trading_type",
    "margin_mode",
    "margin_coin",
    "product_type",
    "instance_id",
];

/// 网格间距类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridType {
    Arithmetic,
    Geometric,
}

/// 两种策略共享的基础字段
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseStrategyConfig {
    pub instance_id: String,
    pub symbol: String,
    pub trading_type: TradingType,
    /// 单笔下单名义金额 (USDT)
    pub notional: f64,
    pub max_position: f64,
    pub max_drawdown_percent: f64,
    pub stop_loss_percent: f64,
    pub max_daily_loss: f64,
    pub cooldown_ms: i64,
    /// 价格小数位，启动时被交易对规格覆盖
    pub price_precision: u32,
    pub size_precision: u32,
    pub poll_interval_ms: u64,
    pub order_check_interval_ms: u64,
    // 衍生品可选字段
    #[serde(default)]
    pub product_type: Option<String>,
    #[serde(default)]
    pub margin_mode: Option<String>,
    #[serde(default)]
    pub margin_coin: Option<String>,
    #[serde(default)]
    pub leverage: Option<u32>,
    #[serde(default)]
    pub direction: Option<TradeDirection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalpingConfig {
    #[serde(flatten)]
    pub base: BaseStrategyConfig,
    /// 买入价与配对卖出价之间的固定差价
    pub price_spread: f64,
    pub max_pending_orders: usize,
    pub merge_threshold: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    #[serde(flatten)]
    pub base: BaseStrategyConfig,
    pub upper_price: f64,
    pub lower_price: f64,
    pub grid_count: u32,
    pub grid_type: GridType,
}

/// 策略配置和类型，以 strategy_type 为标签
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "strategy_type", rename_all = "snake_case")]
pub enum StrategyConfig {
    Scalping(ScalpingConfig),
    Grid(GridConfig),
}

impl StrategyConfig {
    pub fn base(&self) -> &BaseStrategyConfig {
        match self {
            StrategyConfig::Scalping(c) => &c.base,
            StrategyConfig::Grid(c) => &c.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut BaseStrategyConfig {
        match self {
            StrategyConfig::Scalping(c) => &mut c.base,
            StrategyConfig::Grid(c) => &mut c.base,
        }
    }

    pub fn strategy_type(&self) -> &'static str {
        match self {
            StrategyConfig::Scalping(_) => "scalping",
            StrategyConfig::Grid(_) => "grid",
        }
    }

    pub fn risk_limits(&self) -> RiskLimits {
        let base = self.base();
        RiskLimits {
            max_drawdown_percent: base.max_drawdown_percent,
            max_daily_loss: base.max_daily_loss,
            max_position: base.max_position,
            cooldown_ms: base.cooldown_ms,
        }
    }

    /// 剥头皮默认配置
    pub fn default_scalping() -> Self {
        StrategyConfig::Scalping(ScalpingConfig {
            base: default_base("scalping"),
            price_spread: 2.0,
            max_pending_orders: 200,
            merge_threshold: 21,
        })
    }

    /// 网格默认配置
    pub fn default_grid() -> Self {
        StrategyConfig::Grid(GridConfig {
            base: default_base("grid"),
            upper_price: 0.0,
            lower_price: 0.0,
            grid_count: 20,
            grid_type: GridType::Arithmetic,
        })
    }

    /// 完整校验
    pub fn validate(&self) -> StrategyResult<()> {
        let base = self.base();

        if base.symbol.trim().is_empty() {
            return Err(StrategyError::ConfigInvalid("symbol不能为空".to_string()));
        }
        if base.notional <= 0.0 {
            return Err(StrategyError::ConfigInvalid("notional必须大于0".to_string()));
        }
        if base.max_position <= 0.0 {
            return Err(StrategyError::ConfigInvalid(
                "max_position必须大于0".to_string(),
            ));
        }
        if base.trading_type == TradingType::Futures {
            if let Some(leverage) = base.leverage {
                if !(1..=125).contains(&leverage) {
                    return Err(StrategyError::ConfigInvalid(format!(
                        "leverage必须在[1, 125]内: {}",
                        leverage
                    )));
                }
            }
        }
        if base.poll_interval_ms < 200 {
            return Err(StrategyError::ConfigInvalid(
                "poll_interval_ms不能低于200".to_string(),
            ));
        }
        if base.order_check_interval_ms < 500 {
            return Err(StrategyError::ConfigInvalid(
                "order_check_interval_ms不能低于500".to_string(),
            ));
        }
        if base.max_drawdown_percent <= 0.0 || base.max_drawdown_percent > 100.0 {
            return Err(StrategyError::ConfigInvalid(format!(
                "max_drawdown_percent必须在(0, 100]内: {}",
                base.max_drawdown_percent
            )));
        }
        if base.cooldown_ms < 0 {
            return Err(StrategyError::ConfigInvalid(
                "cooldown_ms不能为负".to_string(),
            ));
        }
        if base.price_precision > 8 || base.size_precision > 8 {
            return Err(StrategyError::ConfigInvalid(
                "价格/数量精度必须在[0, 8]内".to_string(),
            ));
        }

        match self {
            StrategyConfig::Scalping(c) => {
                if c.price_spread <= 0.0 {
                    return Err(StrategyError::ConfigInvalid(
                        "price_spread必须大于0".to_string(),
                    ));
                }
                if !(1..=500).contains(&c.max_pending_orders) {
                    return Err(StrategyError::ConfigInvalid(format!(
                        "max_pending_orders必须在[1, 500]内: {}",
                        c.max_pending_orders
                    )));
                }
                if c.merge_threshold < 2 || c.merge_threshold > c.max_pending_orders {
                    return Err(StrategyError::ConfigInvalid(format!(
                        "merge_threshold必须在[2, max_pending_orders]内: {}",
                        c.merge_threshold
                    )));
                }
            }
            StrategyConfig::Grid(c) => {
                if !(2..=200).contains(&c.grid_count) {
                    return Err(StrategyError::ConfigInvalid(format!(
                        "grid_count必须在[2, 200]内: {}",
                        c.grid_count
                    )));
                }
                if c.upper_price != 0.0 && c.lower_price != 0.0 && c.upper_price <= c.lower_price {
                    return Err(StrategyError::ConfigInvalid(format!(
                        "upper_price必须大于lower_price: {} <= {}",
                        c.upper_price, c.lower_price
                    )));
                }
            }
        }

        Ok(())
    }
}

fn default_base(strategy: &str) -> BaseStrategyConfig {
    BaseStrategyConfig {
        instance_id: format!("{}-{}", strategy, now_millis()),
        symbol: String::new(),
        trading_type: TradingType::Futures,
        notional: 10.0,
        max_position: 100.0,
        max_drawdown_percent: 5.0,
        stop_loss_percent: 3.0,
        max_daily_loss: 50.0,
        cooldown_ms: 60_000,
        price_precision: 2,
        size_precision: 4,
        poll_interval_ms: 1000,
        order_check_interval_ms: 2000,
        product_type: Some("USDT-FUTURES".to_string()),
        margin_mode: Some("crossed".to_string()),
        margin_coin: Some("USDT".to_string()),
        leverage: Some(10),
        direction: Some(TradeDirection::Long),
    }
}

/// 配置管理器
pub struct ConfigManager {
    current: RwLock<StrategyConfig>,
}

impl ConfigManager {
    /// 套用变体默认值与覆盖项后整体校验
    pub fn new(strategy_type: &str, overrides: &serde_json::Value) -> StrategyResult<Self> {
        let default = match strategy_type {
            "scalping" => StrategyConfig::default_scalping(),
            "grid" => StrategyConfig::default_grid(),
            other => {
                return Err(StrategyError::ConfigInvalid(format!(
                    "未知策略类型: {}",
                    other
                )))
            }
        };

        let merged = merge_config(&default, overrides)?;
        merged.validate()?;

        Ok(Self {
            current: RwLock::new(merged),
        })
    }

    pub fn from_config(config: StrategyConfig) -> StrategyResult<Self> {
        config.validate()?;
        Ok(Self {
            current: RwLock::new(config),
        })
    }

    pub fn get(&self) -> StrategyConfig {
        self.current.read().clone()
    }

    /// 部分更新：拒绝不可变键变更，合并后重新校验，失败不落地
    pub fn update(&self, partial: &serde_json::Value) -> StrategyResult<StrategyConfig> {
        let current = self.current.read().clone();

        if let Some(object) = partial.as_object() {
            let current_value = serde_json::to_value(&current)
                .map_err(|e| StrategyError::ConfigInvalid(e.to_string()))?;

            for key in IMMUTABLE_KEYS {
                if let Some(new_value) = object.get(*key) {
                    if current_value.get(*key) != Some(new_value) {
                        return Err(StrategyError::ConfigImmutableKey(key.to_string()));
                    }
                }
            }
        }

        let merged = merge_config(&current, partial)?;
        merged.validate()?;

        *self.current.write() = merged.clone();
        Ok(merged)
    }

    /// 启动时用交易对规格覆盖精度
    pub fn apply_precision(&self, price_precision: u32, size_precision: u32) {
        let mut config = self.current.write();
        let base = config.base_mut();
        base.price_precision = price_precision;
        base.size_precision = size_precision;
    }
}

/// 平铺JSON的浅合并（标签 + flatten 让序列化形态天然平铺）
fn merge_config(
    current: &StrategyConfig,
    partial: &serde_json::Value,
) -> StrategyResult<StrategyConfig> {
    let mut value =
        serde_json::to_value(current).map_err(|e| StrategyError::ConfigInvalid(e.to_string()))?;

    if let (Some(target), Some(overrides)) = (value.as_object_mut(), partial.as_object()) {
        for (key, v) in overrides {
            target.insert(key.clone(), v.clone());
        }
    }

    serde_json::from_value(value)
        .map_err(|e| StrategyError::ConfigInvalid(format!("配置反序列化失败: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_with_overrides() {
        let manager = ConfigManager::new(
            "scalping",
            &json!({
                "symbol": "BTCUSDT",
                "notional": 20.0,
                "price_spread": 1.5,
            }),
        )
        .unwrap();

        let config = manager.get();
        assert_eq!(config.strategy_type(), "scalping");
        assert_eq!(config.base().symbol, "BTCUSDT");
        assert_eq!(config.base().notional, 20.0);
        match config {
            StrategyConfig::Scalping(c) => {
                assert_eq!(c.price_spread, 1.5);
                assert_eq!(c.max_pending_orders, 200);
            }
            _ => panic!("应为剥头皮配置"),
        }
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(ConfigManager::new("scalping", &json!({ "symbol": "" })).is_err());
        assert!(ConfigManager::new(
            "scalping",
            &json!({ "symbol": "BTCUSDT", "poll_interval_ms": 100 })
        )
        .is_err());
        assert!(ConfigManager::new(
            "scalping",
            &json!({ "symbol": "BTCUSDT", "merge_threshold": 1 })
        )
        .is_err());
        assert!(ConfigManager::new(
            "grid",
            &json!({ "symbol": "BTCUSDT", "grid_count": 300 })
        )
        .is_err());
        assert!(ConfigManager::new(
            "grid",
            &json!({ "symbol": "BTCUSDT", "upper_price": 90.0, "lower_price": 100.0 })
        )
        .is_err());
        assert!(ConfigManager::new(
            "scalping",
            &json!({ "symbol": "BTCUSDT", "leverage": 200 })
        )
        .is_err());
    }

    #[test]
    fn test_update_rejects_immutable_keys() {
        let manager =
            ConfigManager::new("scalping", &json!({ "symbol": "BTCUSDT" })).unwrap();

        let err = manager.update(&json!({ "symbol": "ETHUSDT" })).unwrap_err();
        match err {
            StrategyError::ConfigImmutableKey(key) => assert_eq!(key, "symbol"),
            other => panic!("期望不可变键错误，得到 {:?}", other),
        }

        // 同值写入不算变更
        assert!(manager.update(&json!({ "symbol": "BTCUSDT" })).is_ok());
    }

    #[test]
    fn test_update_rolls_back_on_invalid() {
        let manager =
            ConfigManager::new("scalping", &json!({ "symbol": "BTCUSDT" })).unwrap();

        let before = manager.get();
        assert!(manager.update(&json!({ "notional": -5.0 })).is_err());
        // 失败不落地
        assert_eq!(manager.get().base().notional, before.base().notional);

        let updated = manager.update(&json!({ "notional": 30.0 })).unwrap();
        assert_eq!(updated.base().notional, 30.0);
    }

    #[test]
    fn test_tagged_serde_round_trip() {
        let config = StrategyConfig::default_grid();
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["strategy_type"], "grid");

        let restored: StrategyConfig = serde_json::from_value(value).unwrap();
        assert_eq!(restored.strategy_type(), "grid");
    }
}
