//! 持久化工作线程
//!
//! fire-and-forget 写队列：引擎侧只入队不等待，落库失败记录警告
//! 但从不向调用方传播。关停时按截止时间排空，超时放弃。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::repository::{GridLevelRecord, NewOrderRecord, StrategyStore};

const QUEUE_CAPACITY: usize = 1024;

/// 写任务
#[derive(Debug)]
pub enum PersistJob {
    NewOrder(NewOrderRecord),
    StatusChange {
        order_id: String,
        status: String,
        filled_at: Option<i64>,
        linked_order_id: Option<String>,
    },
    RealizedPnl {
        date: String,
        strategy_type: String,
        net_pnl: f64,
        fee: f64,
        is_win: bool,
    },
    SaveConfig(serde_json::Value),
    GridLevel(GridLevelRecord),
}

/// 引擎侧句柄：入队写任务 + 启动恢复的同步读
#[derive(Clone)]
pub struct PersistenceHandle {
    tx: mpsc::Sender<PersistJob>,
    store: Arc<StrategyStore>,
}

impl PersistenceHandle {
    /// 入队，不阻塞调用方；队列满或已关闭时仅告警
    pub fn submit(&self, job: PersistJob) {
        if let Err(e) = self.tx.try_send(job) {
            log::warn!("⚠️ 持久化任务入队失败（丢弃）: {}", e);
        }
    }

    /// 启动恢复：读取当前激活配置
    pub async fn load_active_config(&self) -> Option<serde_json::Value> {
        match self.store.load_active_config().await {
            Ok(config) => config,
            Err(e) => {
                log::warn!("⚠️ 读取激活配置失败: {}", e);
                None
            }
        }
    }

    /// 启动恢复：按 (symbol, 场所) 读回 pending 订单
    pub async fn load_pending_orders(
        &self,
        symbol: &str,
        trading_type: &str,
    ) -> Vec<super::repository::StoredOrder> {
        match self.store.load_pending_orders(symbol, trading_type).await {
            Ok(orders) => orders,
            Err(e) => {
                log::warn!("⚠️ 恢复pending订单失败: {}", e);
                Vec::new()
            }
        }
    }
}

pub struct PersistenceWorker {
    handle: PersistenceHandle,
    join: JoinHandle<()>,
}

impl PersistenceWorker {
    /// 启动后台排空任务
    pub fn spawn(store: Arc<StrategyStore>) -> Self {
        let (tx, mut rx) = mpsc::channel::<PersistJob>(QUEUE_CAPACITY);

        let worker_store = store.clone();
        let join = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if let Err(e) = Self::execute(&worker_store, job).await {
                    log::warn!("⚠️ 持久化写入失败: {}", e);
                }
            }
            log::debug!("持久化队列已排空，工作任务退出");
        });

        Self {
            handle: PersistenceHandle { tx, store },
            join,
        }
    }

    pub fn handle(&self) -> PersistenceHandle {
        self.handle.clone()
    }

    /// 关停：关闭入队端，在截止时间内等待排空
    pub async fn shutdown(self, deadline: Duration) {
        let PersistenceWorker { handle, join } = self;
        drop(handle);

        if tokio::time::timeout(deadline, join).await.is_err() {
            log::warn!("⚠️ 持久化队列排空超时，放弃剩余写入");
        }
    }

    async fn execute(store: &StrategyStore, job: PersistJob) -> sqlx::Result<()> {
        match job {
            PersistJob::NewOrder(record) => store.insert_new_order(&record).await,
            PersistJob::StatusChange {
                order_id,
                status,
                filled_at,
                linked_order_id,
            } => {
                store
                    .update_order_status(&order_id, &status, filled_at, linked_order_id.as_deref())
                    .await
            }
            PersistJob::RealizedPnl {
                date,
                strategy_type,
                net_pnl,
                fee,
                is_win,
            } => {
                store
                    .upsert_daily_pnl(&date, &strategy_type, net_pnl, fee, is_win)
                    .await
            }
            PersistJob::SaveConfig(config) => store.save_active_config(&config).await,
            PersistJob::GridLevel(record) => store.upsert_grid_level(&record).await,
        }
    }
}
