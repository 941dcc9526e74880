//! 网格层级
//!
//! 固定价格阶梯，`grid_count + 1` 个层级。每层状态机：
//!
//! ```text
//! empty --挂买--> buy_pending --成交--> buy_filled --挂卖--> sell_pending --成交--> empty
//!                 buy_pending --被撤--> empty
//!                 sell_pending --被撤--> empty  (库存失去配对，需告警)
//! ```

use crate::core::error::{StrategyError, StrategyResult};
use crate::strategies::common::config::{GridConfig, GridType};
use crate::utils::precision::{format_places, round_to_places};

/// 层级状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelState {
    Empty,
    BuyPending,
    BuyFilled,
    SellPending,
}

impl LevelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LevelState::Empty => "empty",
            LevelState::BuyPending => "buy_pending",
            LevelState::BuyFilled => "buy_filled",
            LevelState::SellPending => "sell_pending",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GridLevel {
    pub index: u32,
    pub price: f64,
    /// 交易所精度的价格字符串（落在网格上）
    pub price_str: String,
    /// 本层下单数量 = round(notional/price, volume_place)
    pub size_str: String,
    pub state: LevelState,
    pub buy_order_id: Option<String>,
    pub sell_order_id: Option<String>,
}

impl GridLevel {
    pub fn size_f64(&self) -> f64 {
        self.size_str.parse().unwrap_or(0.0)
    }

    pub fn notional(&self) -> f64 {
        self.price * self.size_f64()
    }
}

/// 构建价格阶梯
///
/// 等差: price_i = lower + i·(upper−lower)/count
/// 等比: price_i = lower · (upper/lower)^(i/count)
pub fn build_ladder(
    config: &GridConfig,
    price_place: u32,
    volume_place: u32,
) -> StrategyResult<Vec<GridLevel>> {
    let upper = config.upper_price;
    let lower = config.lower_price;
    let count = config.grid_count;

    if lower <= 0.0 || upper <= 0.0 {
        return Err(StrategyError::GridConfigInvalid(format!(
            "网格边界必须为正: lower={} upper={}",
            lower, upper
        )));
    }
    if upper <= lower {
        return Err(StrategyError::GridConfigInvalid(format!(
            "upper_price必须大于lower_price: {} <= {}",
            upper, lower
        )));
    }

    let notional = config.base.notional;
    let mut levels = Vec::with_capacity(count as usize + 1);

    for i in 0..=count {
        let raw_price = match config.grid_type {
            GridType::Arithmetic => lower + i as f64 * (upper - lower) / count as f64,
            GridType::Geometric => lower * (upper / lower).powf(i as f64 / count as f64),
        };
        let price = round_to_places(raw_price, price_place);
        let size = round_to_places(notional / price, volume_place);

        levels.push(GridLevel {
            index: i,
            price,
            price_str: format_places(price, price_place),
            size_str: format_places(size, volume_place),
            state: LevelState::Empty,
            buy_order_id: None,
            sell_order_id: None,
        });
    }

    Ok(levels)
}

/// 本层买入成交后对应的卖出价：上一层价格；已在顶层则加一个网格间距
pub fn sell_price_for(levels: &[GridLevel], index: usize) -> f64 {
    if index + 1 < levels.len() {
        levels[index + 1].price
    } else {
        let spacing = if index > 0 {
            levels[index].price - levels[index - 1].price
        } else {
            0.0
        };
        levels[index].price + spacing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::common::StrategyConfig;

    fn grid_config(lower: f64, upper: f64, count: u32, grid_type: GridType) -> GridConfig {
        let mut config = match StrategyConfig::default_grid() {
            StrategyConfig::Grid(c) => c,
            _ => unreachable!(),
        };
        config.base.symbol = "TESTUSDT".to_string();
        config.base.notional = 10.0;
        config.lower_price = lower;
        config.upper_price = upper;
        config.grid_count = count;
        config.grid_type = grid_type;
        config
    }

    #[test]
    fn test_arithmetic_ladder() {
        let config = grid_config(100.0, 110.0, 10, GridType::Arithmetic);
        let levels = build_ladder(&config, 2, 4).unwrap();

        assert_eq!(levels.len(), 11);
        for (i, level) in levels.iter().enumerate() {
            assert_eq!(level.price, 100.0 + i as f64);
            assert_eq!(level.state, LevelState::Empty);
        }
        // size = round(10/103, 4)
        assert_eq!(levels[3].size_str, "0.0971");
    }

    #[test]
    fn test_geometric_ladder() {
        let config = grid_config(100.0, 400.0, 2, GridType::Geometric);
        let levels = build_ladder(&config, 2, 4).unwrap();

        // 100 · 4^(i/2) → {100, 200, 400}
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0].price, 100.0);
        assert_eq!(levels[1].price, 200.0);
        assert_eq!(levels[2].price, 400.0);
    }

    #[test]
    fn test_grid_count_two_gives_three_points() {
        let config = grid_config(100.0, 102.0, 2, GridType::Arithmetic);
        let levels = build_ladder(&config, 2, 4).unwrap();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0].price, 100.0);
        assert_eq!(levels[1].price, 101.0);
        assert_eq!(levels[2].price, 102.0);
    }

    #[test]
    fn test_invalid_bounds_fail_fast() {
        let inverted = grid_config(110.0, 100.0, 10, GridType::Arithmetic);
        assert!(matches!(
            build_ladder(&inverted, 2, 4),
            Err(StrategyError::GridConfigInvalid(_))
        ));

        let zero = grid_config(0.0, 100.0, 10, GridType::Arithmetic);
        assert!(matches!(
            build_ladder(&zero, 2, 4),
            Err(StrategyError::GridConfigInvalid(_))
        ));
    }

    #[test]
    fn test_sell_price_next_level_and_ceiling() {
        let config = grid_config(100.0, 110.0, 10, GridType::Arithmetic);
        let levels = build_ladder(&config, 2, 4).unwrap();

        // 层3买入 → 卖在层4的价格
        assert_eq!(sell_price_for(&levels, 3), 104.0);
        // 顶层买入 → 加一个间距
        assert_eq!(sell_price_for(&levels, 10), 111.0);
    }
}
