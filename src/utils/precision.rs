//! 精度处理模块
//!
//! 所有越过交易所边界或落库的数值都必须按交易对的
//! price_place / volume_place 格式化成十进制字符串。

/// 四舍五入到指定小数位
pub fn round_to_places(value: f64, places: u32) -> f64 {
    let multiplier = 10_f64.powi(places as i32);
    (value * multiplier).round() / multiplier
}

/// 向下取整到指定小数位（数量计算必须用向下取整，避免超出可用资金）
pub fn round_down_to_places(value: f64, places: u32) -> f64 {
    let multiplier = 10_f64.powi(places as i32);
    (value * multiplier).floor() / multiplier
}

/// 按精度格式化为十进制字符串
pub fn format_places(value: f64, places: u32) -> String {
    format!("{:.*}", places as usize, value)
}

/// 指定价格精度下的最小报价单位
pub fn tick_size(price_place: u32) -> f64 {
    10_f64.powi(-(price_place as i32))
}

/// 按名义金额计算下单数量
///
/// `round_down(notional/price, volume_place)`，结果低于 min_trade_num
/// 或低于最小可表示步长时返回 None，调用方跳过本次下单。
pub fn calc_size(notional: f64, price: f64, volume_place: u32, min_trade_num: f64) -> Option<String> {
    if price <= f64::EPSILON || notional <= 0.0 {
        return None;
    }

    let size = round_down_to_places(notional / price, volume_place);
    let step = 10_f64.powi(-(volume_place as i32));

    // 浮点比较留出半步容差
    if size < min_trade_num - step / 2.0 || size < step / 2.0 {
        return None;
    }

    Some(format_places(size, volume_place))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_and_floor() {
        assert_eq!(round_to_places(100.2333, 1), 100.2);
        assert_eq!(round_to_places(100.25, 1), 100.3);
        assert_eq!(round_down_to_places(0.0001429, 6), 0.000142);
        assert_eq!(round_down_to_places(1.99999, 2), 1.99);
    }

    #[test]
    fn test_format_places() {
        assert_eq!(format_places(69999.8, 1), "69999.8");
        assert_eq!(format_places(0.000142, 6), "0.000142");
        assert_eq!(format_places(104.0, 2), "104.00");
    }

    #[test]
    fn test_calc_size_happy_path() {
        // 10 USDT @ 69999.8，volume_place=6
        let size = calc_size(10.0, 69999.8, 6, 0.0001).unwrap();
        assert_eq!(size, "0.000142");
    }

    #[test]
    fn test_calc_size_below_min_trade_num() {
        // 刚好等于 min_trade_num 可下单
        assert_eq!(calc_size(1.0, 100.0, 2, 0.01), Some("0.01".to_string()));
        // 低一个步长则跳过
        assert_eq!(calc_size(0.9, 100.0, 2, 0.01), None);
    }

    #[test]
    fn test_calc_size_below_representable_step() {
        // notional/price < 10^-volume_place
        assert_eq!(calc_size(0.0001, 100.0, 2, 0.0), None);
    }

    #[test]
    fn test_tick_size() {
        assert_eq!(tick_size(1), 0.1);
        assert_eq!(tick_size(2), 0.01);
        assert_eq!(tick_size(0), 1.0);
    }
}
