pub mod client;
pub mod futures;
pub mod public;
pub mod spot;

use std::sync::Arc;

pub use client::BitgetClient;
pub use futures::BitgetFuturesServices;
pub use spot::BitgetSpotServices;

use crate::core::error::Result;
use crate::core::services::TradingServices;
use crate::core::types::{HoldMode, TradingType};

/// USDT永续的产品类型编码，模拟盘与实盘一致
pub const PRODUCT_TYPE: &str = "USDT-FUTURES";
pub const DEFAULT_MARGIN_COIN: &str = "USDT";
pub const DEFAULT_MARGIN_MODE: &str = "crossed";

/// 字符串数值字段的宽松解析
pub(crate) fn parse_f64(raw: &str) -> f64 {
    raw.parse().unwrap_or(0.0)
}

pub(crate) fn parse_i64(raw: &str) -> i64 {
    raw.parse().unwrap_or(0)
}

/// 按交易类型构建能力三元组
///
/// 衍生品在构建时探测一次持仓模式并缓存到适配器上；
/// 探测失败时回退到双向持仓（安全偏置：hedge 模式缺 tradeSide
/// 会被交易所明确拒绝，反向错误更易暴露）。
pub async fn build_trading_services(
    trading_type: TradingType,
    client: Arc<BitgetClient>,
) -> Result<(TradingServices, HoldMode)> {
    match trading_type {
        TradingType::Futures => {
            let hold_mode = match futures::detect_hold_mode(&client).await {
                Ok(mode) => mode,
                Err(e) => {
                    log::warn!("⚠️ 持仓模式探测失败，回退为双向持仓: {}", e);
                    HoldMode::DoubleHold
                }
            };

            let services = Arc::new(BitgetFuturesServices::new(client));
            Ok((
                TradingServices {
                    order: services.clone(),
                    market: services.clone(),
                    account: services,
                },
                hold_mode,
            ))
        }
        TradingType::Spot => {
            let services = Arc::new(BitgetSpotServices::new(client));
            Ok((
                TradingServices {
                    order: services.clone(),
                    market: services.clone(),
                    account: services,
                },
                // 现货无持仓模式概念，占位为单向
                HoldMode::SingleHold,
            ))
        }
    }
}
