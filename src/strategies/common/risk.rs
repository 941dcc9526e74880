//! 风控控制器
//!
//! 每次潜在开仓前按固定顺序评估：日切 → 冷却 → 日亏损 → 回撤 → 仓位上限。
//! 日亏损与回撤触发后进入冷却；仓位上限只拒绝不冷却。

use parking_lot::Mutex;

use crate::core::types::{now_millis, utc_date_key};

/// 风控阈值（来自策略配置）
#[derive(Debug, Clone)]
pub struct RiskLimits {
    /// 回撤上限，百分比（5 = 5%）
    pub max_drawdown_percent: f64,
    /// 单日最大亏损（绝对额）
    pub max_daily_loss: f64,
    /// 最大持仓名义金额
    pub max_position: f64,
    /// 冷却时长（毫秒）
    pub cooldown_ms: i64,
}

/// 风控内部状态
#[derive(Debug, Clone)]
pub struct RiskState {
    pub peak_equity: f64,
    pub current_equity: f64,
    pub daily_pnl: f64,
    /// UTC 自然日键，跨日即滚动清零
    pub daily_reset_key: String,
    pub cooling_until: Option<i64>,
    pub total_trades: u64,
    pub win_trades: u64,
    pub loss_trades: u64,
    pub sum_win: f64,
    pub sum_loss: f64,
}

impl RiskState {
    fn new(initial_equity: f64) -> Self {
        Self {
            peak_equity: initial_equity,
            current_equity: initial_equity,
            daily_pnl: 0.0,
            daily_reset_key: utc_date_key(),
            cooling_until: None,
            total_trades: 0,
            win_trades: 0,
            loss_trades: 0,
            sum_win: 0.0,
            sum_loss: 0.0,
        }
    }
}

/// 评估结果
#[derive(Debug, Clone, PartialEq)]
pub enum RiskVerdict {
    Allowed,
    Denied { reason: String },
}

impl RiskVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RiskVerdict::Allowed)
    }
}

pub struct RiskController {
    limits: Mutex<RiskLimits>,
    state: Mutex<RiskState>,
}

impl RiskController {
    pub fn new(limits: RiskLimits, initial_equity: f64) -> Self {
        Self {
            limits: Mutex::new(limits),
            state: Mutex::new(RiskState::new(initial_equity)),
        }
    }

    /// 开仓前闸门
    pub fn check_can_trade(&self, current_notional: f64) -> RiskVerdict {
        self.check_at(now_millis(), &utc_date_key(), current_notional)
    }

    fn check_at(&self, now: i64, today: &str, current_notional: f64) -> RiskVerdict {
        let limits = self.limits.lock().clone();
        let mut state = self.state.lock();

        // 1. 日切滚动
        if state.daily_reset_key != today {
            log::info!(
                "📅 日切: {} 日内盈亏 {:.4} 清零",
                state.daily_reset_key,
                state.daily_pnl
            );
            state.daily_pnl = 0.0;
            state.daily_reset_key = today.to_string();
        }

        // 2. 冷却中
        if let Some(until) = state.cooling_until {
            if until > now {
                let remaining = (until - now) / 1000;
                return RiskVerdict::Denied {
                    reason: format!("冷却中，剩余{}秒", remaining),
                };
            }
            state.cooling_until = None;
        }

        // 3. 日亏损上限
        if limits.max_daily_loss > 0.0 && state.daily_pnl <= -limits.max_daily_loss {
            state.cooling_until = Some(now + limits.cooldown_ms);
            return RiskVerdict::Denied {
                reason: format!(
                    "触发日亏损限制 ({:.4} <= -{:.4})，进入冷却",
                    state.daily_pnl, limits.max_daily_loss
                ),
            };
        }

        // 4. 回撤
        if state.peak_equity > 0.0 {
            let drawdown = (state.peak_equity - state.current_equity) / state.peak_equity * 100.0;
            if drawdown >= limits.max_drawdown_percent {
                state.cooling_until = Some(now + limits.cooldown_ms);
                return RiskVerdict::Denied {
                    reason: format!(
                        "触发回撤限制 ({:.2}% >= {:.2}%)，进入冷却",
                        drawdown, limits.max_drawdown_percent
                    ),
                };
            }
        }

        // 5. 仓位上限（不进入冷却）
        if limits.max_position > 0.0 && current_notional >= limits.max_position {
            return RiskVerdict::Denied {
                reason: format!(
                    "持仓名义金额达到上限 ({:.2} >= {:.2})",
                    current_notional, limits.max_position
                ),
            };
        }

        RiskVerdict::Allowed
    }

    /// 记录一笔已实现盈亏
    pub fn record_pnl(&self, net_pnl: f64) {
        let mut state = self.state.lock();
        state.daily_pnl += net_pnl;
        state.current_equity += net_pnl;
        if state.current_equity > state.peak_equity {
            state.peak_equity = state.current_equity;
        }

        state.total_trades += 1;
        if net_pnl >= 0.0 {
            state.win_trades += 1;
            state.sum_win += net_pnl;
        } else {
            state.loss_trades += 1;
            state.sum_loss += net_pnl.abs();
        }
    }

    /// 用交易所权益覆盖内部口径，防止累计漂移
    pub fn update_equity(&self, equity: f64) {
        let mut state = self.state.lock();
        state.current_equity = equity;
        if equity > state.peak_equity {
            state.peak_equity = equity;
        }
    }

    pub fn update_limits(&self, limits: RiskLimits) {
        *self.limits.lock() = limits;
    }

    pub fn snapshot(&self) -> RiskState {
        self.state.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> RiskLimits {
        RiskLimits {
            max_drawdown_percent: 5.0,
            max_daily_loss: 100.0,
            max_position: 1000.0,
            cooldown_ms: 60_000,
        }
    }

    #[test]
    fn test_allows_within_limits() {
        let risk = RiskController::new(limits(), 10_000.0);
        assert!(risk.check_at(0, "2026-01-01", 500.0).is_allowed());
    }

    #[test]
    fn test_daily_loss_triggers_cooldown() {
        let risk = RiskController::new(limits(), 10_000.0);
        risk.record_pnl(-100.5);
        // 权益同步回补，隔离回撤规则，只验证日亏损路径
        risk.update_equity(10_000.0);

        // 触发日亏损 → 拒绝并进入冷却
        let verdict = risk.check_at(1_000, "2026-01-01", 0.0);
        assert!(!verdict.is_allowed());

        // 冷却期内持续拒绝
        let verdict = risk.check_at(30_000, "2026-01-01", 0.0);
        match verdict {
            RiskVerdict::Denied { reason } => assert!(reason.contains("冷却")),
            _ => panic!("冷却期内应当拒绝"),
        }

        // 冷却结束后日亏损仍在 → 再次触发并重新进入冷却
        let verdict = risk.check_at(62_000, "2026-01-01", 0.0);
        assert!(!verdict.is_allowed());
    }

    #[test]
    fn test_daily_rollover_resets_pnl() {
        let risk = RiskController::new(limits(), 10_000.0);
        risk.record_pnl(-150.0);
        risk.update_equity(10_000.0);

        assert!(!risk.check_at(0, "2026-01-01", 0.0).is_allowed());

        // 跨日后日内亏损清零；冷却已过期则放行
        let verdict = risk.check_at(120_000, "2026-01-02", 0.0);
        assert!(verdict.is_allowed());
        assert_eq!(risk.snapshot().daily_pnl, 0.0);
    }

    #[test]
    fn test_drawdown_against_peak() {
        let risk = RiskController::new(limits(), 10_000.0);
        // 权益冲高后回落超过 5% 上限
        risk.update_equity(11_000.0);
        risk.update_equity(10_300.0);

        let verdict = risk.check_at(0, "2026-01-01", 0.0);
        match verdict {
            RiskVerdict::Denied { reason } => assert!(reason.contains("回撤")),
            _ => panic!("回撤超限应当拒绝"),
        }
    }

    #[test]
    fn test_position_cap_denies_without_cooldown() {
        let risk = RiskController::new(limits(), 10_000.0);

        assert!(!risk.check_at(0, "2026-01-01", 1000.0).is_allowed());
        // 未进入冷却：仓位回落即放行
        assert!(risk.check_at(1, "2026-01-01", 999.0).is_allowed());
        assert!(risk.snapshot().cooling_until.is_none());
    }

    #[test]
    fn test_pnl_stats_accumulation() {
        let risk = RiskController::new(limits(), 10_000.0);
        risk.record_pnl(5.0);
        risk.record_pnl(-2.0);
        risk.record_pnl(3.0);

        let state = risk.snapshot();
        assert_eq!(state.total_trades, 3);
        assert_eq!(state.win_trades, 2);
        assert_eq!(state.loss_trades, 1);
        assert!((state.sum_win - 8.0).abs() < 1e-9);
        assert!((state.sum_loss - 2.0).abs() < 1e-9);
        assert!((state.daily_pnl - 6.0).abs() < 1e-9);
        // 盈利推高峰值
        assert!(state.peak_equity >= 10_006.0 - 1e-9);
    }
}
