use async_trait::async_trait;

use crate::core::error::StrategyResult;

use super::status::StrategyStatusSnapshot;

/// 策略实例统一接口
///
/// 管理器只通过该接口操作引擎，不感知具体策略类型。
#[async_trait]
pub trait StrategyInstance: Send + Sync {
    /// 同步启动：返回时两个循环均已就位，失败回到 STOPPED
    async fn start(&self) -> StrategyResult<()>;

    /// 常规停止：尽力撤销活跃订单后停表
    async fn stop(&self) -> StrategyResult<()>;

    /// 紧急停止：批量撤销全部挂单，不等待配对卖单完成
    async fn emergency_stop(&self) -> StrategyResult<()>;

    /// 运行期部分更新配置；不可变键被拒绝，校验失败回滚
    fn update_config(&self, partial: &serde_json::Value) -> StrategyResult<()>;

    fn status(&self) -> StrategyStatusSnapshot;
}
