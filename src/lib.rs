pub mod core;
pub mod exchanges;
pub mod storage;
pub mod strategies;
pub mod utils;

// 选择性导出，避免命名冲突
pub use crate::core::{config::*, error::*, services::*, spec_cache::*};
pub use crate::exchanges::{build_trading_services, BitgetClient};
pub use crate::storage::{PersistenceHandle, PersistenceWorker, StrategyStore};
pub use crate::strategies::*;
