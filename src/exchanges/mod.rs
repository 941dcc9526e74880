pub mod bitget;

pub use bitget::{build_trading_services, BitgetClient};
