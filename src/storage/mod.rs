pub mod migrations;
pub mod pool;
pub mod repository;
pub mod worker;

pub use pool::{health_check, init_pg_pool};
pub use repository::{GridLevelRecord, NewOrderRecord, SpecRecord, StoredOrder, StrategyStore};
pub use worker::{PersistJob, PersistenceHandle, PersistenceWorker};
