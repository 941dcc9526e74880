//! 配置自动推导
//!
//! 从精简输入 (策略类型, 交易类型, symbol, 名义金额, 风险档位) 出发，
//! 结合交易对规格、行情快照与账户余额推导完整配置。
//! 同样的四元输入必然产生相同的配置（确定性）。

use serde::{Deserialize, Serialize};

use crate::core::error::{StrategyError, StrategyResult};
use crate::core::spec_cache::InstrumentSpec;
use crate::core::types::{TickerSnapshot, TradeDirection, TradingType};
use crate::utils::precision::round_to_places;

use super::common::{GridType, StrategyConfig};

/// 风险档位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Conservative,
    Balanced,
    Aggressive,
}

/// 档位预设
#[derive(Debug, Clone, Copy)]
pub struct RiskPreset {
    pub spread_multiplier: f64,
    pub max_position_percent: f64,
    pub daily_loss_percent: f64,
    pub max_drawdown_percent: f64,
    pub stop_loss_percent: f64,
    pub max_pending_orders: usize,
    pub merge_threshold: usize,
    pub poll_interval_ms: u64,
    pub order_check_interval_ms: u64,
    pub cooldown_ms: i64,
    /// 网格档位参数: (区间百分比, 网格数)
    pub grid_range_percent: f64,
    pub grid_count: u32,
}

impl RiskLevel {
    pub fn preset(&self) -> RiskPreset {
        match self {
            RiskLevel::Conservative => RiskPreset {
                spread_multiplier: 3.0,
                max_position_percent: 0.10,
                daily_loss_percent: 0.02,
                max_drawdown_percent: 3.0,
                stop_loss_percent: 2.0,
                max_pending_orders: 100,
                merge_threshold: 15,
                poll_interval_ms: 2000,
                order_check_interval_ms: 3000,
                cooldown_ms: 120_000,
                grid_range_percent: 5.0,
                grid_count: 10,
            },
            RiskLevel::Balanced => RiskPreset {
                spread_multiplier: 2.0,
                max_position_percent: 0.20,
                daily_loss_percent: 0.05,
                max_drawdown_percent: 5.0,
                stop_loss_percent: 3.0,
                max_pending_orders: 200,
                merge_threshold: 21,
                poll_interval_ms: 1000,
                order_check_interval_ms: 2000,
                cooldown_ms: 60_000,
                grid_range_percent: 10.0,
                grid_count: 20,
            },
            RiskLevel::Aggressive => RiskPreset {
                spread_multiplier: 1.5,
                max_position_percent: 0.40,
                daily_loss_percent: 0.10,
                max_drawdown_percent: 10.0,
                stop_loss_percent: 5.0,
                max_pending_orders: 300,
                merge_threshold: 30,
                poll_interval_ms: 500,
                order_check_interval_ms: 1000,
                cooldown_ms: 30_000,
                grid_range_percent: 20.0,
                grid_count: 50,
            },
        }
    }
}

/// 精简输入
#[derive(Debug, Clone)]
pub struct AutoCalcInput {
    pub strategy_type: String,
    pub trading_type: TradingType,
    pub symbol: String,
    pub notional: f64,
    pub risk_level: RiskLevel,
    pub direction: Option<TradeDirection>,
}

/// 推导结果：完整配置 + 推导说明/警告
#[derive(Debug, Clone)]
pub struct AutoCalcResult {
    pub config: StrategyConfig,
    pub derivations: Vec<String>,
}

/// 单字段的取值范围
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FieldBounds {
    pub min: f64,
    pub recommended: f64,
    pub max: f64,
}

/// 范围报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundsReport {
    pub price_spread: FieldBounds,
    pub notional: FieldBounds,
    pub max_position: FieldBounds,
    pub max_daily_loss: FieldBounds,
}

/// 推导完整配置
pub fn derive_config(
    input: &AutoCalcInput,
    spec: &InstrumentSpec,
    ticker: &TickerSnapshot,
    balance: f64,
) -> StrategyResult<AutoCalcResult> {
    match input.strategy_type.as_str() {
        "scalping" => derive_scalping(input, spec, ticker, balance),
        "grid" => derive_grid(input, spec, ticker, balance),
        other => Err(StrategyError::ConfigInvalid(format!(
            "未知策略类型: {}",
            other
        ))),
    }
}

fn derive_scalping(
    input: &AutoCalcInput,
    spec: &InstrumentSpec,
    ticker: &TickerSnapshot,
    balance: f64,
) -> StrategyResult<AutoCalcResult> {
    let preset = input.risk_level.preset();
    let mut derivations = Vec::new();

    let round_trip_rate = spec.maker_fee_rate + spec.taker_fee_rate;
    let range_24h = (ticker.high_24h - ticker.low_24h).max(0.0);

    // 最小盈利价差 = 现价 · 双边费率 · 档位倍数
    let min_spread = ticker.last_price * round_trip_rate * preset.spread_multiplier;
    let price_spread = round_to_places(min_spread.max(range_24h * 0.001), spec.price_place);
    derivations.push(format!(
        "price_spread = round(max({:.6}, {:.6}), {}) = {}",
        min_spread,
        range_24h * 0.001,
        spec.price_place,
        price_spread
    ));

    let max_position = round_to_places(balance * preset.max_position_percent, 2);
    let max_daily_loss = round_to_places(balance * preset.daily_loss_percent, 2);
    derivations.push(format!(
        "max_position = {:.2}, max_daily_loss = {:.2} (余额 {:.2})",
        max_position, max_daily_loss, balance
    ));

    let mut scalping = match StrategyConfig::default_scalping() {
        StrategyConfig::Scalping(c) => c,
        _ => unreachable!(),
    };

    scalping.base.symbol = input.symbol.clone();
    scalping.base.trading_type = input.trading_type;
    scalping.base.notional = input.notional;
    scalping.base.max_position = max_position;
    scalping.base.max_drawdown_percent = preset.max_drawdown_percent;
    scalping.base.stop_loss_percent = preset.stop_loss_percent;
    scalping.base.max_daily_loss = max_daily_loss;
    scalping.base.cooldown_ms = preset.cooldown_ms;
    scalping.base.price_precision = spec.price_place;
    scalping.base.size_precision = spec.volume_place;
    scalping.base.poll_interval_ms = preset.poll_interval_ms;
    scalping.base.order_check_interval_ms = preset.order_check_interval_ms;
    scalping.base.direction = input.direction.or(Some(TradeDirection::Long));
    if input.trading_type == TradingType::Spot {
        scalping.base.product_type = None;
        scalping.base.margin_mode = None;
        scalping.base.margin_coin = None;
        scalping.base.leverage = None;
    }
    scalping.price_spread = price_spread;
    scalping.max_pending_orders = preset.max_pending_orders;
    scalping.merge_threshold = preset.merge_threshold;

    let config = StrategyConfig::Scalping(scalping);
    config.validate()?;

    Ok(AutoCalcResult {
        config,
        derivations,
    })
}

fn derive_grid(
    input: &AutoCalcInput,
    spec: &InstrumentSpec,
    ticker: &TickerSnapshot,
    balance: f64,
) -> StrategyResult<AutoCalcResult> {
    let preset = input.risk_level.preset();
    let mut derivations = Vec::new();

    let last = ticker.last_price;
    let upper = round_to_places(last * (1.0 + preset.grid_range_percent / 200.0), spec.price_place);
    let lower = round_to_places(last * (1.0 - preset.grid_range_percent / 200.0), spec.price_place);
    derivations.push(format!(
        "区间 [{}, {}] = 现价 {} ± {}%/2",
        lower, upper, last, preset.grid_range_percent
    ));

    // 网格间距不足以覆盖双边费用时提示
    let grid_spacing = (upper - lower) / preset.grid_count as f64;
    let min_profitable_spread = last * (spec.maker_fee_rate + spec.taker_fee_rate) * 2.0;
    if grid_spacing < min_profitable_spread {
        derivations.push(format!(
            "警告: 网格间距 {:.6} 低于最小盈利价差 {:.6}，单格收益可能无法覆盖手续费",
            grid_spacing, min_profitable_spread
        ));
    }

    let max_position = round_to_places(balance * preset.max_position_percent, 2);
    let max_daily_loss = round_to_places(balance * preset.daily_loss_percent, 2);

    let mut grid = match StrategyConfig::default_grid() {
        StrategyConfig::Grid(c) => c,
        _ => unreachable!(),
    };

    grid.base.symbol = input.symbol.clone();
    grid.base.trading_type = input.trading_type;
    grid.base.notional = input.notional;
    grid.base.max_position = max_position;
    grid.base.max_drawdown_percent = preset.max_drawdown_percent;
    grid.base.stop_loss_percent = preset.stop_loss_percent;
    grid.base.max_daily_loss = max_daily_loss;
    grid.base.cooldown_ms = preset.cooldown_ms;
    grid.base.price_precision = spec.price_place;
    grid.base.size_precision = spec.volume_place;
    grid.base.poll_interval_ms = preset.poll_interval_ms;
    grid.base.order_check_interval_ms = preset.order_check_interval_ms;
    grid.base.direction = input.direction.or(Some(TradeDirection::Long));
    if input.trading_type == TradingType::Spot {
        grid.base.product_type = None;
        grid.base.margin_mode = None;
        grid.base.margin_coin = None;
        grid.base.leverage = None;
    }
    grid.upper_price = upper;
    grid.lower_price = lower;
    grid.grid_count = preset.grid_count;
    grid.grid_type = GridType::Arithmetic;

    let config = StrategyConfig::Grid(grid);
    config.validate()?;

    Ok(AutoCalcResult {
        config,
        derivations,
    })
}

/// 按规格、余额与24小时区间给出各字段的 min/推荐/max
pub fn calc_bounds(
    input: &AutoCalcInput,
    spec: &InstrumentSpec,
    ticker: &TickerSnapshot,
    balance: f64,
) -> BoundsReport {
    let preset = input.risk_level.preset();
    let range_24h = (ticker.high_24h - ticker.low_24h).max(0.0);
    let round_trip_rate = spec.maker_fee_rate + spec.taker_fee_rate;

    let breakeven_spread = ticker.last_price * round_trip_rate;
    let recommended_spread = round_to_places(
        (breakeven_spread * preset.spread_multiplier).max(range_24h * 0.001),
        spec.price_place,
    );

    let min_notional = (spec.min_trade_num * ticker.last_price).max(5.0);

    BoundsReport {
        price_spread: FieldBounds {
            min: round_to_places(breakeven_spread, spec.price_place),
            recommended: recommended_spread,
            max: round_to_places(range_24h * 0.05, spec.price_place),
        },
        notional: FieldBounds {
            min: round_to_places(min_notional, 2),
            recommended: round_to_places((balance * 0.05).max(min_notional), 2),
            max: round_to_places(balance * 0.5, 2),
        },
        max_position: FieldBounds {
            min: round_to_places(input.notional, 2),
            recommended: round_to_places(balance * preset.max_position_percent, 2),
            max: round_to_places(balance, 2),
        },
        max_daily_loss: FieldBounds {
            min: round_to_places(balance * 0.01, 2),
            recommended: round_to_places(balance * preset.daily_loss_percent, 2),
            max: round_to_places(balance * 0.2, 2),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn btc_spec() -> InstrumentSpec {
        InstrumentSpec {
            symbol: "BTCUSDT".to_string(),
            trading_type: TradingType::Futures,
            base_coin: "BTC".to_string(),
            quote_coin: "USDT".to_string(),
            price_place: 1,
            volume_place: 6,
            min_trade_num: 0.0001,
            size_multiplier: 1.0,
            maker_fee_rate: 0.0002,
            taker_fee_rate: 0.0006,
        }
    }

    fn btc_ticker() -> TickerSnapshot {
        TickerSnapshot {
            symbol: "BTCUSDT".to_string(),
            last_price: 70_000.0,
            best_bid: 69_999.9,
            best_ask: 70_000.1,
            high_24h: 71_000.0,
            low_24h: 69_000.0,
            timestamp: 0,
        }
    }

    fn input(strategy: &str, level: RiskLevel) -> AutoCalcInput {
        AutoCalcInput {
            strategy_type: strategy.to_string(),
            trading_type: TradingType::Futures,
            symbol: "BTCUSDT".to_string(),
            notional: 10.0,
            risk_level: level,
            direction: None,
        }
    }

    #[test]
    fn test_preset_table_exact_values() {
        let c = RiskLevel::Conservative.preset();
        assert_eq!(
            (c.spread_multiplier, c.max_position_percent, c.daily_loss_percent),
            (3.0, 0.10, 0.02)
        );
        assert_eq!((c.max_pending_orders, c.merge_threshold), (100, 15));
        assert_eq!(
            (c.poll_interval_ms, c.order_check_interval_ms, c.cooldown_ms),
            (2000, 3000, 120_000)
        );
        assert_eq!((c.grid_range_percent, c.grid_count), (5.0, 10));

        let b = RiskLevel::Balanced.preset();
        assert_eq!((b.max_pending_orders, b.merge_threshold), (200, 21));
        assert_eq!((b.grid_range_percent, b.grid_count), (10.0, 20));

        let a = RiskLevel::Aggressive.preset();
        assert_eq!((a.max_pending_orders, a.merge_threshold), (300, 30));
        assert_eq!(
            (a.poll_interval_ms, a.order_check_interval_ms, a.cooldown_ms),
            (500, 1000, 30_000)
        );
        assert_eq!((a.grid_range_percent, a.grid_count), (20.0, 50));
    }

    #[test]
    fn test_scalping_derivation_formulas() {
        let result = derive_config(
            &input("scalping", RiskLevel::Balanced),
            &btc_spec(),
            &btc_ticker(),
            10_000.0,
        )
        .unwrap();

        match result.config {
            StrategyConfig::Scalping(c) => {
                // min_spread = 70000 * 0.0008 * 2.0 = 112; range*0.001 = 2
                assert_eq!(c.price_spread, 112.0);
                assert_eq!(c.base.max_position, 2000.0);
                assert_eq!(c.base.max_daily_loss, 500.0);
                assert_eq!(c.base.price_precision, 1);
                assert_eq!(c.base.size_precision, 6);
                assert_eq!(c.max_pending_orders, 200);
                assert_eq!(c.merge_threshold, 21);
            }
            _ => panic!("应为剥头皮配置"),
        }
    }

    #[test]
    fn test_grid_derivation_range() {
        let result = derive_config(
            &input("grid", RiskLevel::Balanced),
            &btc_spec(),
            &btc_ticker(),
            10_000.0,
        )
        .unwrap();

        match result.config {
            StrategyConfig::Grid(c) => {
                // 70000 * (1 ± 10/200)
                assert_eq!(c.upper_price, 73_500.0);
                assert_eq!(c.lower_price, 66_500.0);
                assert_eq!(c.grid_count, 20);
            }
            _ => panic!("应为网格配置"),
        }
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let i = input("scalping", RiskLevel::Aggressive);
        let first = derive_config(&i, &btc_spec(), &btc_ticker(), 10_000.0).unwrap();
        let second = derive_config(&i, &btc_spec(), &btc_ticker(), 10_000.0).unwrap();

        let a = serde_json::to_value(&first.config).unwrap();
        let mut b = serde_json::to_value(&second.config).unwrap();
        // instance_id 含时间戳，排除在确定性比较之外
        a.as_object().unwrap().get("instance_id").unwrap();
        b.as_object_mut().unwrap().insert(
            "instance_id".to_string(),
            a.get("instance_id").unwrap().clone(),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_bounds_report() {
        let report = calc_bounds(
            &input("scalping", RiskLevel::Balanced),
            &btc_spec(),
            &btc_ticker(),
            10_000.0,
        );

        // priceSpread.max = range24h * 0.05 = 2000 * 0.05
        assert_eq!(report.price_spread.max, 100.0);
        // 盈亏平衡价差 = 70000 * 0.0008
        assert_eq!(report.price_spread.min, 56.0);
        assert!(report.price_spread.recommended >= report.price_spread.min);
        assert_eq!(report.max_position.max, 10_000.0);
    }
}
