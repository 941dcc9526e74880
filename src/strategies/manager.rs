//! 策略管理器
//!
//! 进程内最多一个活跃策略实例：创建 → 启动 → 监控 → 停止/紧急停止。
//! 管理器只持有实例引用，从不直接触碰交易所或跟踪器。

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::core::error::{StrategyError, StrategyResult};
use crate::core::spec_cache::InstrumentSpecCache;
use crate::exchanges::{build_trading_services, BitgetClient};
use crate::storage::PersistenceHandle;

use super::common::{ConfigManager, StrategyConfig, StrategyInstance, StrategyStatusSnapshot};
use super::grid::GridEngine;
use super::scalping::ScalpingEngine;

/// 停止请求的看门狗超时，防止挂死的stop无限阻塞调用方
const STOP_WATCHDOG_SECS: u64 = 10;

pub struct StrategyManager {
    client: Arc<BitgetClient>,
    spec_cache: Arc<InstrumentSpecCache>,
    persistence: PersistenceHandle,
    active: Mutex<Option<Arc<dyn StrategyInstance>>>,
}

impl StrategyManager {
    pub fn new(
        client: Arc<BitgetClient>,
        spec_cache: Arc<InstrumentSpecCache>,
        persistence: PersistenceHandle,
    ) -> Self {
        Self {
            client,
            spec_cache,
            persistence,
            active: Mutex::new(None),
        }
    }

    /// 创建并启动策略实例
    ///
    /// 已有 STARTING/RUNNING 实例时返回 AlreadyRunning。
    pub async fn create_and_start(
        &self,
        strategy_type: &str,
        overrides: &Value,
    ) -> StrategyResult<StrategyStatusSnapshot> {
        let mut active = self.active.lock().await;

        if let Some(existing) = active.as_ref() {
            if existing.status().state.is_active() {
                return Err(StrategyError::AlreadyRunning);
            }
        }

        let config = ConfigManager::new(strategy_type, overrides)?;
        let trading_type = config.get().base().trading_type;

        let (services, hold_mode) =
            build_trading_services(trading_type, self.client.clone()).await?;

        let instance: Arc<dyn StrategyInstance> = match config.get() {
            StrategyConfig::Scalping(_) => Arc::new(ScalpingEngine::new(
                config,
                services,
                hold_mode,
                self.spec_cache.clone(),
                self.persistence.clone(),
            )),
            StrategyConfig::Grid(_) => Arc::new(GridEngine::new(
                config,
                services,
                hold_mode,
                self.spec_cache.clone(),
                self.persistence.clone(),
            )),
        };

        instance.start().await?;

        let snapshot = instance.status();
        *active = Some(instance);
        Ok(snapshot)
    }

    /// 停止当前实例；空闲时为no-op
    pub async fn stop_active(&self) -> StrategyResult<()> {
        let instance = {
            let mut active = self.active.lock().await;
            active.take()
        };

        let Some(instance) = instance else {
            return Ok(());
        };

        match tokio::time::timeout(Duration::from_secs(STOP_WATCHDOG_SECS), instance.stop()).await
        {
            Ok(result) => result,
            Err(_) => {
                log::error!("❌ 策略停止超时（{}秒），放弃等待", STOP_WATCHDOG_SECS);
                Ok(())
            }
        }
    }

    /// 紧急停止：可从任意状态（含ERROR）直达
    pub async fn emergency_stop_active(&self) -> StrategyResult<()> {
        let instance = {
            let mut active = self.active.lock().await;
            active.take()
        };

        let Some(instance) = instance else {
            return Ok(());
        };

        instance.emergency_stop().await
    }

    /// 部分更新当前实例配置
    pub async fn update_active_config(&self, partial: &Value) -> StrategyResult<()> {
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(instance) => instance.update_config(partial),
            None => Err(StrategyError::NotRunning),
        }
    }

    /// 当前状态；空闲时返回规范的STOPPED
    pub async fn get_state(&self) -> StrategyStatusSnapshot {
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(instance) => instance.status(),
            None => StrategyStatusSnapshot::stopped(),
        }
    }
}
