//! 剥头皮策略引擎
//!
//! 双循环结构：
//! - 循环A（盯价）：跟踪买一价维护唯一的活跃买单；
//! - 循环B（对账）：与交易所挂单列表对账，驱动成交/撤销处理、
//!   合并触发、历史清理与权益刷新。
//!
//! 每笔买单成交后在 buy_price + price_spread 处配对一笔卖单。

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tokio::task::JoinHandle;

use crate::core::error::{ExchangeError, StrategyError, StrategyResult};
use crate::core::services::TradingServices;
use crate::core::spec_cache::{InstrumentSpec, InstrumentSpecCache};
use crate::core::types::{
    now_millis, utc_date_key, HoldMode, OrderForce, OrderParams, OrderSide, TradeDirection,
    TradeSide, TradingType,
};
use crate::storage::{NewOrderRecord, PersistJob, PersistenceHandle};
use crate::utils::order_id::ClientOidGenerator;
use crate::utils::precision::{calc_size, format_places, tick_size};

use crate::strategies::common::{
    ConfigManager, EngineState, EventLog, OrderTracker, RiskController, ScalpingConfig,
    StrategyConfig, StrategyEventKind, StrategyInstance, StrategyStatusSnapshot, TrackedOrder,
    TrackedStatus,
};

use super::merge::{merged_event_data, MergeEngine, CANCEL_CHUNK_SIZE};

const MIN_POLL_INTERVAL_MS: u64 = 200;
const MIN_CHECK_INTERVAL_MS: u64 = 500;
/// 买单下场后的保护期，避免post-only刚挂出就被撤掉
const BUY_REPLACE_GRACE_MS: i64 = 3000;
/// 交易所刚撤掉买单后的下单冷却
const POST_ONLY_CANCEL_COOLDOWN_MS: i64 = 3000;
/// 连续post-only撤单达到该值后改用gtc（接受吃单风险）
const GTC_FALLBACK_THRESHOLD: u32 = 5;
const MAX_OFFSET_TICKS: u32 = 10;
/// 买单成交后等交易所结算多头库存（模拟盘观察到的结算延迟）
const INVENTORY_SETTLE_MS: u64 = 3000;
/// 配对卖单的重试间隔序列（秒）
const SELL_RETRY_BACKOFF_SECS: [u64; 7] = [2, 3, 4, 5, 5, 3, 0];
const MAX_CONSECUTIVE_ERRORS: u32 = 5;
const ERROR_RECOVERY_DELAY_SECS: u64 = 30;
const TRACKER_KEEP_NON_PENDING: usize = 500;
/// 价差/费率比低于该值时给出费率覆盖警告
const FEE_COVERAGE_MIN_RATIO: f64 = 200_000.0;
const FEE_REFERENCE_PRICE: f64 = 70_000.0;
const STOP_JOIN_TIMEOUT_SECS: u64 = 10;

// ============= 纯计算辅助（便于单测） =============

/// 活跃买单是否应被替换：3秒保护期外，且买价越位或掉队
pub(crate) fn should_replace_buy(age_ms: i64, buy_price: f64, bid: f64, spread: f64) -> bool {
    if age_ms < BUY_REPLACE_GRACE_MS {
        return false;
    }
    buy_price > bid + 2.0 * spread || bid - buy_price > 5.0 * spread
}

/// 自适应报价偏移：连续撤单越多离买一越远，上限10个tick
pub(crate) fn adaptive_offset_ticks(consecutive_cancels: u32) -> u32 {
    (2 + consecutive_cancels).min(MAX_OFFSET_TICKS)
}

pub(crate) fn entry_force(consecutive_cancels: u32) -> OrderForce {
    if consecutive_cancels >= GTC_FALLBACK_THRESHOLD {
        OrderForce::Gtc
    } else {
        OrderForce::PostOnly
    }
}

/// 配对卖单的tradeSide：双向持仓发close，单向省略；
/// inverted 用于第6次尝试（防持仓模式误判）。
pub(crate) fn paired_sell_trade_side(hold_mode: HoldMode, inverted: bool) -> Option<TradeSide> {
    let normal = match hold_mode {
        HoldMode::DoubleHold => Some(TradeSide::Close),
        HoldMode::SingleHold => None,
    };
    if inverted {
        match normal {
            Some(_) => None,
            None => Some(TradeSide::Close),
        }
    } else {
        normal
    }
}

/// 卖单成交的盈亏口径：对称maker费率估计
pub(crate) fn sell_fill_pnl(
    sell_price: f64,
    buy_price: f64,
    size: f64,
    maker_fee_rate: f64,
) -> (f64, f64, f64) {
    let gross = (sell_price - buy_price) * size;
    let fee = 2.0 * (sell_price * size) * maker_fee_rate;
    (gross, fee, gross - fee)
}

struct ScalpingShared {
    /// 自引用，供循环体与配对任务克隆出Arc
    weak: Weak<ScalpingShared>,
    config: ConfigManager,
    services: TradingServices,
    persistence: PersistenceHandle,
    spec_cache: Arc<InstrumentSpecCache>,
    events: EventLog,
    tracker: Mutex<OrderTracker>,
    risk: RiskController,
    merge: MergeEngine,
    oid_gen: ClientOidGenerator,

    state: RwLock<EngineState>,
    running: AtomicBool,
    spec: RwLock<Option<InstrumentSpec>>,
    hold_mode: HoldMode,

    consecutive_post_only_cancels: AtomicU32,
    /// 交易所最近一次撤掉买单的时间（0 = 无）
    last_buy_cancelled_at: AtomicI64,
    quote_loop_errors: AtomicU32,
    check_loop_errors: AtomicU32,
    error_count_total: AtomicU32,
    last_error: Mutex<Option<String>>,
    last_risk_denied: AtomicBool,

    tasks: Mutex<Vec<JoinHandle<()>>>,
}

pub struct ScalpingEngine {
    shared: Arc<ScalpingShared>,
}

impl ScalpingEngine {
    pub fn new(
        config: ConfigManager,
        services: TradingServices,
        hold_mode: HoldMode,
        spec_cache: Arc<InstrumentSpecCache>,
        persistence: PersistenceHandle,
    ) -> Self {
        let limits = config.get().risk_limits();
        Self {
            shared: Arc::new_cyclic(|weak| ScalpingShared {
                weak: weak.clone(),
                config,
                services,
                persistence,
                spec_cache,
                events: EventLog::new(),
                tracker: Mutex::new(OrderTracker::new()),
                risk: RiskController::new(limits, 0.0),
                merge: MergeEngine::new(),
                oid_gen: ClientOidGenerator::new("scalping"),
                state: RwLock::new(EngineState::Stopped),
                running: AtomicBool::new(false),
                spec: RwLock::new(None),
                hold_mode,
                consecutive_post_only_cancels: AtomicU32::new(0),
                last_buy_cancelled_at: AtomicI64::new(0),
                quote_loop_errors: AtomicU32::new(0),
                check_loop_errors: AtomicU32::new(0),
                error_count_total: AtomicU32::new(0),
                last_error: Mutex::new(None),
                last_risk_denied: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }
}

#[async_trait]
impl StrategyInstance for ScalpingEngine {
    async fn start(&self) -> StrategyResult<()> {
        let shared = &self.shared;

        {
            let mut state = shared.state.write();
            if state.is_active() {
                return Err(StrategyError::AlreadyRunning);
            }
            *state = EngineState::Starting;
        }

        match shared.startup().await {
            Ok(_) => {
                *shared.state.write() = EngineState::Running;
                shared.running.store(true, Ordering::SeqCst);
                shared.arm_loops();
                Ok(())
            }
            Err(e) => {
                *shared.state.write() = EngineState::Stopped;
                Err(e)
            }
        }
    }

    async fn stop(&self) -> StrategyResult<()> {
        self.shared.shutdown(false).await
    }

    async fn emergency_stop(&self) -> StrategyResult<()> {
        self.shared.shutdown(true).await
    }

    fn update_config(&self, partial: &serde_json::Value) -> StrategyResult<()> {
        let updated = self.shared.config.update(partial)?;
        self.shared.risk.update_limits(updated.risk_limits());

        if let Ok(config_value) = serde_json::to_value(&updated) {
            self.shared
                .persistence
                .submit(PersistJob::SaveConfig(config_value));
        }
        self.shared
            .events
            .emit(StrategyEventKind::ConfigUpdated, json!({ "partial": partial }));
        log::info!("配置已更新");
        Ok(())
    }

    fn status(&self) -> StrategyStatusSnapshot {
        self.shared.status_snapshot()
    }
}

impl ScalpingShared {
    fn arc_self(&self) -> Arc<Self> {
        self.weak.upgrade().expect("引擎已释放")
    }

    fn scalping_config(&self) -> ScalpingConfig {
        match self.config.get() {
            StrategyConfig::Scalping(c) => c,
            // 工厂按策略类型装配，网格配置不会流到这里
            StrategyConfig::Grid(_) => unreachable!("剥头皮引擎收到网格配置"),
        }
    }

    fn spec(&self) -> StrategyResult<InstrumentSpec> {
        self.spec
            .read()
            .clone()
            .ok_or_else(|| StrategyError::Other("交易对规格未加载".to_string()))
    }

    // ============= 启动 =============

    async fn startup(&self) -> StrategyResult<()> {
        let config = self.scalping_config();
        let symbol = config.base.symbol.clone();
        let trading_type = config.base.trading_type;

        // 加载规格并覆盖配置精度
        let spec = self.spec_cache.get_spec(&symbol, trading_type).await?;
        self.config
            .apply_precision(spec.price_place, spec.volume_place);
        *self.spec.write() = Some(spec.clone());

        // 初始权益
        let equity = self
            .services
            .account
            .get_account_equity()
            .await
            .map_err(StrategyError::Exchange)?;
        self.risk.update_equity(equity.equity);
        self.risk.update_limits(self.config.get().risk_limits());

        // 从持久化恢复本实例遗留的pending订单
        let restored = self
            .persistence
            .load_pending_orders(&symbol, trading_type.venue_code())
            .await;
        if !restored.is_empty() {
            log::info!("恢复 {} 笔pending订单", restored.len());
            let mut tracker = self.tracker.lock();
            for stored in restored {
                tracker.restore(TrackedOrder {
                    order_id: stored.order_id,
                    client_oid: stored.client_oid,
                    side: if stored.side == "sell" {
                        OrderSide::Sell
                    } else {
                        OrderSide::Buy
                    },
                    price: stored.price,
                    size: stored.size,
                    status: TrackedStatus::Pending,
                    linked_order_id: stored.linked_order_id,
                    direction: TradeDirection::Long,
                    created_at: stored.created_at,
                    filled_at: None,
                });
            }
        }

        // 费率覆盖预警（仅启动时）
        let fee_warning = self.fee_coverage_advice(&config, &spec);

        self.events.emit(
            StrategyEventKind::StrategyStarted,
            json!({
                "symbol": &symbol,
                "trading_type": trading_type.venue_code(),
                "price_spread": config.price_spread,
                "hold_mode": format!("{:?}", self.hold_mode),
                "fee_warning": fee_warning,
            }),
        );

        // 激活配置落库
        if let Ok(config_value) = serde_json::to_value(self.config.get()) {
            self.persistence.submit(PersistJob::SaveConfig(config_value));
        }

        log::info!(
            "✅ 剥头皮策略启动: {} {} 价差={} 名义金额={}",
            symbol,
            trading_type,
            config.price_spread,
            config.base.notional
        );
        Ok(())
    }

    fn fee_coverage_advice(&self, config: &ScalpingConfig, spec: &InstrumentSpec) -> Option<String> {
        let round_trip_rate = spec.maker_fee_rate + spec.taker_fee_rate;
        if round_trip_rate <= 0.0 {
            return None;
        }

        let ratio = config.price_spread / round_trip_rate;
        if ratio >= FEE_COVERAGE_MIN_RATIO {
            return None;
        }

        // 参考价下估算单笔净损益
        let size = config.base.notional / FEE_REFERENCE_PRICE;
        let gross = config.price_spread * size;
        let fee = 2.0 * config.base.notional * spec.maker_fee_rate;
        let warning = format!(
            "价差 {} 对费率 {:.6} 覆盖不足（比值 {:.0}），参考价 {} 下单笔预计净收益 {:.6}",
            config.price_spread, round_trip_rate, ratio, FEE_REFERENCE_PRICE, gross - fee
        );
        log::warn!("⚠️ {}", warning);
        Some(warning)
    }

    // ============= 循环装配 =============

    fn arm_loops(&self) {
        let quote = Self::spawn_quote_loop(self.arc_self());
        let check = Self::spawn_check_loop(self.arc_self());
        let mut tasks = self.tasks.lock();
        tasks.push(quote);
        tasks.push(check);
    }

    fn spawn_quote_loop(shared: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = shared
                .scalping_config()
                .base
                .poll_interval_ms
                .max(MIN_POLL_INTERVAL_MS);
            let mut interval = tokio::time::interval(Duration::from_millis(period));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                if !shared.running.load(Ordering::SeqCst) {
                    break;
                }
                if *shared.state.read() != EngineState::Running {
                    break;
                }

                match shared.quote_tick().await {
                    Ok(_) => {
                        shared.quote_loop_errors.store(0, Ordering::SeqCst);
                    }
                    Err(e) => {
                        if shared.on_loop_error("quote", &shared.quote_loop_errors, e) {
                            break;
                        }
                    }
                }
            }
            log::debug!("盯价循环退出");
        })
    }

    fn spawn_check_loop(shared: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = shared
                .scalping_config()
                .base
                .order_check_interval_ms
                .max(MIN_CHECK_INTERVAL_MS);
            let mut interval = tokio::time::interval(Duration::from_millis(period));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                if !shared.running.load(Ordering::SeqCst) {
                    break;
                }
                if *shared.state.read() != EngineState::Running {
                    break;
                }

                match shared.check_tick().await {
                    Ok(_) => {
                        shared.check_loop_errors.store(0, Ordering::SeqCst);
                    }
                    Err(e) => {
                        if shared.on_loop_error("check", &shared.check_loop_errors, e) {
                            break;
                        }
                    }
                }
            }
            log::debug!("对账循环退出");
        })
    }

    /// 循环错误策略：计数、记录；5次连续失败进入ERROR并安排30秒后恢复。
    /// 返回 true 表示循环应当退出。
    fn on_loop_error(&self, loop_name: &str, counter: &AtomicU32, error: StrategyError) -> bool {
        let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.error_count_total.fetch_add(1, Ordering::SeqCst);
        *self.last_error.lock() = Some(error.to_string());

        log::error!("❌ {} 循环错误 ({}/{}): {}", loop_name, count, MAX_CONSECUTIVE_ERRORS, error);

        // 认证失败属于终止性错误，不安排恢复
        let terminal_auth = matches!(
            &error,
            StrategyError::Exchange(e) if e.is_terminal()
        );

        if terminal_auth || count >= MAX_CONSECUTIVE_ERRORS {
            *self.state.write() = EngineState::Error;
            self.events.emit(
                StrategyEventKind::StrategyError,
                json!({ "loop": loop_name, "error": error.to_string() }),
            );

            if terminal_auth {
                log::error!("❌ 认证失败，策略停止");
                self.running.store(false, Ordering::SeqCst);
            } else {
                self.schedule_recovery();
            }
            return true;
        }
        false
    }

    /// 30秒后尝试从ERROR恢复RUNNING并重新装配两个循环
    fn schedule_recovery(&self) {
        let shared = self.arc_self();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(ERROR_RECOVERY_DELAY_SECS)).await;

            if !shared.running.load(Ordering::SeqCst) {
                return;
            }
            if *shared.state.read() != EngineState::Error {
                return;
            }

            log::info!("🔄 尝试从ERROR状态恢复运行");
            shared.quote_loop_errors.store(0, Ordering::SeqCst);
            shared.check_loop_errors.store(0, Ordering::SeqCst);
            *shared.state.write() = EngineState::Running;
            shared.arm_loops();
        });
        self.tasks.lock().push(handle);
    }

    // ============= 循环A：盯价 =============

    async fn quote_tick(&self) -> StrategyResult<()> {
        let config = self.scalping_config();
        let spec = self.spec()?;
        let symbol = &config.base.symbol;
        let spread = config.price_spread;

        // 1. 风控闸门：当前仓位 = pending卖单名义金额之和。
        // 拒绝只跳过本轮下单，活跃买单管理照常进行。
        let position_notional = self.tracker.lock().position_notional();
        let verdict = self.risk.check_can_trade(position_notional);
        let risk_allowed = verdict.is_allowed();
        if let crate::strategies::common::RiskVerdict::Denied { reason } = &verdict {
            // 仅在由放行转为拒绝时记事件，避免刷满事件环
            if !self.last_risk_denied.swap(true, Ordering::SeqCst) {
                log::warn!("⚠️ 风控拒绝开仓: {}", reason);
                self.events.emit(
                    StrategyEventKind::RiskLimitHit,
                    json!({ "reason": reason, "position_notional": position_notional }),
                );
            }
        } else {
            self.last_risk_denied.store(false, Ordering::SeqCst);
        }

        // 2. 买一价
        let bid = self
            .services
            .market
            .get_best_bid(symbol)
            .await
            .map_err(StrategyError::Exchange)?;

        // 3. 活跃买单管理
        let active = self.tracker.lock().active_buy().cloned();
        if let Some(buy) = active {
            let age = now_millis() - buy.created_at;
            if should_replace_buy(age, buy.price_f64(), bid, spread) {
                match self.services.order.cancel_order(symbol, &buy.order_id).await {
                    Ok(_) => {
                        self.tracker.lock().mark_cancelled(&buy.order_id);
                        self.persist_status(&buy.order_id, "cancelled", None, None);
                        self.events.emit(
                            StrategyEventKind::BuyOrderCancelled,
                            json!({
                                "order_id": &buy.order_id,
                                "price": &buy.price,
                                "bid": bid,
                                "source": "engine",
                            }),
                        );
                        log::info!(
                            "撤掉越位买单 {} @ {} (买一 {:.4})",
                            buy.order_id,
                            buy.price,
                            bid
                        );
                    }
                    // 撤单失败留给对账循环裁决（可能已成交）
                    Err(e) => log::warn!("⚠️ 撤销买单 {} 失败: {}", buy.order_id, e),
                }
            }
            return Ok(());
        }

        // 风控拒绝：本轮不下新单
        if !risk_allowed {
            return Ok(());
        }

        // 4. 无活跃买单：先看post-only撤单冷却
        let last_cancelled = self.last_buy_cancelled_at.load(Ordering::SeqCst);
        if last_cancelled > 0 && now_millis() - last_cancelled < POST_ONLY_CANCEL_COOLDOWN_MS {
            return Ok(());
        }

        self.place_tracking_buy(&config, &spec, bid).await
    }

    async fn place_tracking_buy(
        &self,
        config: &ScalpingConfig,
        spec: &InstrumentSpec,
        bid: f64,
    ) -> StrategyResult<()> {
        let symbol = &config.base.symbol;
        let cancels = self.consecutive_post_only_cancels.load(Ordering::SeqCst);

        let tick = tick_size(spec.price_place);
        let price = bid - tick * adaptive_offset_ticks(cancels) as f64;
        let price_str = format_places(price, spec.price_place);
        let force = entry_force(cancels);

        let Some(size_str) = calc_size(
            config.base.notional,
            price,
            spec.volume_place,
            spec.min_trade_num,
        ) else {
            log::warn!(
                "⚠️ 名义金额 {} 在价格 {} 下不足最小下单量，跳过",
                config.base.notional,
                price_str
            );
            return Ok(());
        };

        let trade_side = match (config.base.trading_type, self.hold_mode) {
            (TradingType::Futures, HoldMode::DoubleHold) => Some(TradeSide::Open),
            _ => None,
        };

        let params = OrderParams::limit(symbol.clone(), OrderSide::Buy, price_str.clone(), size_str.clone())
            .with_force(force)
            .with_trade_side(trade_side)
            .with_client_oid(self.oid_gen.generate());

        let placed = self
            .services
            .order
            .place_order(&params)
            .await
            .map_err(StrategyError::Exchange)?;

        let order = TrackedOrder::new(
            placed.order_id.clone(),
            placed.client_oid.clone(),
            OrderSide::Buy,
            price_str.clone(),
            size_str.clone(),
            config.base.direction.unwrap_or(TradeDirection::Long),
        );
        self.tracker.lock().track_buy(order.clone());
        self.persist_new_order(&order, config);

        self.events.emit(
            StrategyEventKind::BuyOrderPlaced,
            json!({
                "order_id": &placed.order_id,
                "price": &price_str,
                "size": &size_str,
                "force": force.as_str(),
                "offset_ticks": adaptive_offset_ticks(cancels),
            }),
        );
        log::debug!("挂出买单 {} @ {} x {}", placed.order_id, price_str, size_str);
        Ok(())
    }

    // ============= 循环B：对账 =============

    async fn check_tick(&self) -> StrategyResult<()> {
        let config = self.scalping_config();
        let symbol = &config.base.symbol;

        // 先取本地pending快照，再抓交易所列表：
        // 抓取之后新下的单不会被误判为消失
        let snapshot = self.tracker.lock().pending_ids_snapshot();

        let exchange_pending = self
            .services
            .order
            .get_pending_orders(symbol)
            .await
            .map_err(StrategyError::Exchange)?;
        let exchange_ids: HashSet<String> = exchange_pending
            .iter()
            .map(|o| o.order_id.clone())
            .collect();

        let disappeared = self.tracker.lock().find_disappeared(&snapshot, &exchange_ids);

        for order in disappeared {
            // 两步对账：消失 ≠ 成交，必须查详情取权威状态
            let detail = match self
                .services
                .order
                .get_order_detail(symbol, &order.order_id)
                .await
            {
                Ok(detail) => detail,
                Err(e) => {
                    // 详情失败绝不推断成交，留到下一轮
                    log::warn!("⚠️ 订单 {} 详情查询失败，保持pending: {}", order.order_id, e);
                    continue;
                }
            };

            use crate::core::types::OrderDetailState::*;
            match detail.state {
                Live | PartiallyFilled => {
                    // 挂单列表的查询滞后，无需动作
                }
                Filled => self.on_order_filled(&config, &order, &detail.avg_price).await,
                Cancelled => self.on_exchange_cancelled(&order),
            }
        }

        // 合并触发
        let (sell_count, max_pending) = {
            let tracker = self.tracker.lock();
            (tracker.pending_sell_count(), config.max_pending_orders)
        };
        if sell_count >= max_pending {
            if let Err(e) = self.run_merge(&config).await {
                log::warn!("⚠️ 合并执行失败: {}", e);
            }
        }

        // 历史清理
        self.tracker.lock().cleanup(TRACKER_KEEP_NON_PENDING);

        // 权益刷新
        let equity = self
            .services
            .account
            .get_account_equity()
            .await
            .map_err(StrategyError::Exchange)?;
        self.risk.update_equity(equity.equity);

        Ok(())
    }

    async fn on_order_filled(
        &self,
        config: &ScalpingConfig,
        order: &TrackedOrder,
        avg_price: &Option<String>,
    ) {
        let filled_at = now_millis();
        let Some(filled) = self.tracker.lock().mark_filled(&order.order_id, filled_at) else {
            return;
        };
        self.persist_status(&order.order_id, "filled", Some(filled_at), None);

        match filled.side {
            OrderSide::Buy => {
                // 任意买单成交即重置自适应撤单计数
                self.consecutive_post_only_cancels.store(0, Ordering::SeqCst);

                self.events.emit(
                    StrategyEventKind::BuyOrderFilled,
                    json!({
                        "order_id": &filled.order_id,
                        "price": &filled.price,
                        "size": &filled.size,
                        "avg_price": avg_price,
                    }),
                );
                log::info!("✅ 买单成交 {} @ {} x {}", filled.order_id, filled.price, filled.size);

                self.spawn_pairing_task(config.clone(), filled);
            }
            OrderSide::Sell => self.on_sell_filled(config, &filled),
        }
    }

    fn on_sell_filled(&self, config: &ScalpingConfig, sell: &TrackedOrder) {
        let spec = match self.spec() {
            Ok(spec) => spec,
            Err(_) => return,
        };

        let sell_price = sell.price_f64();
        // 配对买价优先走关联订单；合并卖单不保留关联，按价差回推
        let buy_price = sell
            .linked_order_id
            .as_ref()
            .and_then(|id| self.tracker.lock().get(id).map(|o| o.price_f64()))
            .unwrap_or(sell_price - config.price_spread);

        let (gross, fee, net) =
            sell_fill_pnl(sell_price, buy_price, sell.size_f64(), spec.maker_fee_rate);

        self.risk.record_pnl(net);
        self.persistence.submit(PersistJob::RealizedPnl {
            date: utc_date_key(),
            strategy_type: "scalping".to_string(),
            net_pnl: net,
            fee,
            is_win: net >= 0.0,
        });

        self.events.emit(
            StrategyEventKind::SellOrderFilled,
            json!({
                "order_id": &sell.order_id,
                "price": &sell.price,
                "size": &sell.size,
                "gross_pnl": gross,
                "fee": fee,
                "net_pnl": net,
            }),
        );
        log::info!(
            "✅ 卖单成交 {} @ {}，净盈亏 {:.6}",
            sell.order_id,
            sell.price,
            net
        );
    }

    fn on_exchange_cancelled(&self, order: &TrackedOrder) {
        if self.tracker.lock().mark_cancelled(&order.order_id).is_none() {
            return;
        }
        self.persist_status(&order.order_id, "cancelled", None, None);

        match order.side {
            OrderSide::Buy => {
                self.last_buy_cancelled_at.store(now_millis(), Ordering::SeqCst);
                let cancels = self
                    .consecutive_post_only_cancels
                    .fetch_add(1, Ordering::SeqCst)
                    + 1;

                self.events.emit(
                    StrategyEventKind::BuyOrderCancelled,
                    json!({
                        "order_id": &order.order_id,
                        "price": &order.price,
                        "source": "exchange",
                        "consecutive_cancels": cancels,
                    }),
                );
                log::info!(
                    "买单 {} 被交易所撤销（连续第{}次），下次报价后移",
                    order.order_id,
                    cancels
                );
            }
            OrderSide::Sell => {
                // 卖单被交易所撤销意味着已买入的库存失去配对挂单
                log::warn!(
                    "⚠️ 卖单 {} 被交易所撤销，{} 份库存失去配对",
                    order.order_id,
                    order.size
                );
            }
        }
    }

    // ============= 配对卖单 =============

    fn spawn_pairing_task(&self, config: ScalpingConfig, buy: TrackedOrder) {
        let shared = self.arc_self();
        let handle = tokio::spawn(async move {
            // 等交易所结算库存
            tokio::time::sleep(Duration::from_millis(INVENTORY_SETTLE_MS)).await;
            if let Err(e) = shared.place_paired_sell(&config, &buy).await {
                log::error!("❌ 买单 {} 配对卖单失败: {}", buy.order_id, e);
            }
        });
        self.tasks.lock().push(handle);
    }

    async fn place_paired_sell(
        &self,
        config: &ScalpingConfig,
        buy: &TrackedOrder,
    ) -> StrategyResult<()> {
        let spec = self.spec()?;
        let symbol = &config.base.symbol;
        let sell_price = buy.price_f64() + config.price_spread;
        let price_str = format_places(sell_price, spec.price_place);
        let is_futures = config.base.trading_type == TradingType::Futures;

        let mut last_error: Option<ExchangeError> = None;

        for attempt in 1..=7u32 {
            if !self.running.load(Ordering::SeqCst) {
                return Ok(());
            }

            // 1..=5 正常挂limit post-only；6 反转tradeSide；7 市价强平
            let params = if attempt <= 6 {
                let trade_side = if is_futures {
                    paired_sell_trade_side(self.hold_mode, attempt == 6)
                } else {
                    None
                };
                OrderParams::limit(
                    symbol.clone(),
                    OrderSide::Sell,
                    price_str.clone(),
                    buy.size.clone(),
                )
                .with_force(OrderForce::PostOnly)
                .with_trade_side(trade_side)
                .with_client_oid(self.oid_gen.generate())
            } else {
                let trade_side = if is_futures { Some(TradeSide::Close) } else { None };
                OrderParams::market(symbol.clone(), OrderSide::Sell, buy.size.clone())
                    .with_trade_side(trade_side)
                    .with_client_oid(self.oid_gen.generate())
            };

            match self.services.order.place_order(&params).await {
                Ok(placed) => {
                    let mut sell = TrackedOrder::new(
                        placed.order_id.clone(),
                        placed.client_oid.clone(),
                        OrderSide::Sell,
                        price_str.clone(),
                        buy.size.clone(),
                        buy.direction,
                    );
                    sell.linked_order_id = Some(buy.order_id.clone());

                    {
                        let mut tracker = self.tracker.lock();
                        tracker.track_sell(sell.clone());
                        tracker.set_linked(&buy.order_id, &placed.order_id);
                    }
                    self.persist_new_order(&sell, config);
                    self.persist_status(
                        &buy.order_id,
                        "filled",
                        None,
                        Some(placed.order_id.clone()),
                    );

                    self.events.emit(
                        StrategyEventKind::SellOrderPlaced,
                        json!({
                            "order_id": &placed.order_id,
                            "buy_order_id": &buy.order_id,
                            "price": &price_str,
                            "size": &buy.size,
                            "attempt": attempt,
                        }),
                    );
                    log::info!(
                        "配对卖单 {} @ {} (第{}次尝试)",
                        placed.order_id,
                        price_str,
                        attempt
                    );
                    return Ok(());
                }
                Err(e) => {
                    // 只有"无可平仓位"与"持仓模式不匹配"继续走重试梯
                    let retryable = e.is_no_position() || e.is_hold_mode_mismatch();
                    if !retryable {
                        self.events.emit(
                            StrategyEventKind::SellOrderFailed,
                            json!({
                                "buy_order_id": &buy.order_id,
                                "attempt": attempt,
                                "error": e.to_string(),
                            }),
                        );
                        return Err(StrategyError::Exchange(e));
                    }

                    log::warn!(
                        "⚠️ 配对卖单第{}次尝试失败 ({})，继续重试",
                        attempt,
                        e
                    );
                    last_error = Some(e);

                    if attempt < 7 {
                        let delay = SELL_RETRY_BACKOFF_SECS[(attempt - 1) as usize];
                        tokio::time::sleep(Duration::from_secs(delay)).await;
                    }
                }
            }
        }

        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "未知错误".to_string());
        self.events.emit(
            StrategyEventKind::SellOrderFailed,
            json!({ "buy_order_id": &buy.order_id, "attempt": 7, "error": reason }),
        );
        Err(StrategyError::Other(format!(
            "配对卖单7次尝试后仍失败: {}",
            reason
        )))
    }

    // ============= 合并 =============

    async fn run_merge(&self, config: &ScalpingConfig) -> StrategyResult<()> {
        let spec = self.spec()?;
        let oldest: Vec<TrackedOrder> = {
            let tracker = self.tracker.lock();
            tracker
                .pending_sells()
                .into_iter()
                .take(config.merge_threshold)
                .collect()
        };
        if oldest.len() < 2 {
            return Ok(());
        }

        let trade_side = match (config.base.trading_type, self.hold_mode) {
            (TradingType::Futures, HoldMode::DoubleHold) => Some(TradeSide::Close),
            _ => None,
        };

        let outcome = self
            .merge
            .run(
                &self.services,
                &config.base.symbol,
                &oldest,
                spec.price_place,
                spec.volume_place,
                trade_side,
                Some(self.oid_gen.generate()),
            )
            .await?;

        if outcome.cancelled.is_empty() && outcome.new_order.is_none() {
            // 闩锁命中，什么也没做
            return Ok(());
        }

        {
            let mut tracker = self.tracker.lock();
            for order_id in &outcome.cancelled {
                tracker.mark_cancelled(order_id);
            }
            if let Some((order_id, price, size)) = &outcome.new_order {
                // 合并卖单不保留与原买单的关联（归因随之丢失）
                tracker.track_sell(TrackedOrder::new(
                    order_id.clone(),
                    None,
                    OrderSide::Sell,
                    price.clone(),
                    size.clone(),
                    TradeDirection::Long,
                ));
            }
        }

        for order_id in &outcome.cancelled {
            self.persist_status(order_id, "cancelled", None, None);
        }
        if let Some((order_id, price, size)) = &outcome.new_order {
            let merged = TrackedOrder::new(
                order_id.clone(),
                None,
                OrderSide::Sell,
                price.clone(),
                size.clone(),
                TradeDirection::Long,
            );
            self.persist_new_order(&merged, config);
        }

        self.events
            .emit(StrategyEventKind::OrdersMerged, merged_event_data(&outcome));
        Ok(())
    }

    // ============= 停止 =============

    async fn shutdown(&self, emergency: bool) -> StrategyResult<()> {
        {
            let mut state = self.state.write();
            if *state == EngineState::Stopped {
                return Ok(());
            }
            // 紧急停止可从任意状态（含ERROR）直达
            *state = EngineState::Stopping;
        }
        self.running.store(false, Ordering::SeqCst);

        let config = self.scalping_config();
        let symbol = config.base.symbol.clone();

        if emergency {
            // 批量撤销全部本地pending，50一片
            let pending_ids: Vec<String> = {
                let tracker = self.tracker.lock();
                tracker.pending_ids_snapshot().into_iter().collect()
            };
            for chunk in pending_ids.chunks(CANCEL_CHUNK_SIZE) {
                match self.services.order.batch_cancel_orders(&symbol, chunk).await {
                    Ok(outcome) => {
                        let mut tracker = self.tracker.lock();
                        for order_id in &outcome.cancelled {
                            tracker.mark_cancelled(order_id);
                        }
                        drop(tracker);
                        for order_id in &outcome.cancelled {
                            self.persist_status(order_id, "cancelled", None, None);
                        }
                    }
                    Err(e) => log::error!("❌ 紧急撤单批次失败: {}", e),
                }
            }
            self.events.emit(
                StrategyEventKind::EmergencyStop,
                json!({ "cancelled_pending": pending_ids.len() }),
            );
            log::warn!("⚠️ 紧急停止，已批量撤销 {} 笔挂单", pending_ids.len());
        } else {
            // 常规停止只撤活跃买单（尽力而为）
            let active = self.tracker.lock().active_buy().cloned();
            if let Some(buy) = active {
                match self.services.order.cancel_order(&symbol, &buy.order_id).await {
                    Ok(_) => {
                        self.tracker.lock().mark_cancelled(&buy.order_id);
                        self.persist_status(&buy.order_id, "cancelled", None, None);
                    }
                    Err(e) => log::warn!("⚠️ 停止时撤销买单失败: {}", e),
                }
            }
        }

        // 等在途循环体自然退出，超时则中止
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        let join_all = async {
            for task in tasks {
                let _ = task.await;
            }
        };
        if tokio::time::timeout(Duration::from_secs(STOP_JOIN_TIMEOUT_SECS), join_all)
            .await
            .is_err()
        {
            log::warn!("⚠️ 循环任务退出超时，强制转入STOPPED");
        }

        self.events
            .emit(StrategyEventKind::StrategyStopped, json!({ "emergency": emergency }));
        *self.state.write() = EngineState::Stopped;
        log::info!("剥头皮策略已停止");
        Ok(())
    }

    // ============= 快照与持久化 =============

    fn status_snapshot(&self) -> StrategyStatusSnapshot {
        let config = self.scalping_config();
        let risk = self.risk.snapshot();
        let (position_notional, pending_sell_count) = {
            let tracker = self.tracker.lock();
            (tracker.position_notional(), tracker.pending_sell_count())
        };

        StrategyStatusSnapshot {
            instance_id: config.base.instance_id.clone(),
            strategy_type: "scalping".to_string(),
            symbol: config.base.symbol.clone(),
            state: *self.state.read(),
            error_count: self.error_count_total.load(Ordering::SeqCst),
            last_error: self.last_error.lock().clone(),
            daily_pnl: risk.daily_pnl,
            total_trades: risk.total_trades,
            win_trades: risk.win_trades,
            loss_trades: risk.loss_trades,
            position_notional,
            pending_sell_count,
            events: self.events.tail(50),
            updated_at: now_millis(),
        }
    }

    fn persist_new_order(&self, order: &TrackedOrder, config: &ScalpingConfig) {
        self.persistence.submit(PersistJob::NewOrder(NewOrderRecord {
            order_id: order.order_id.clone(),
            client_oid: order.client_oid.clone(),
            side: order.side.as_str().to_string(),
            price: order.price.clone(),
            size: order.size.clone(),
            status: order.status.as_str().to_string(),
            linked_order_id: order.linked_order_id.clone(),
            direction: Some(format!("{:?}", order.direction).to_lowercase()),
            symbol: config.base.symbol.clone(),
            product_type: config.base.product_type.clone(),
            margin_coin: config.base.margin_coin.clone(),
            created_at: order.created_at,
            strategy_type: "scalping".to_string(),
            trading_type: config.base.trading_type.venue_code().to_string(),
        }));
    }

    fn persist_status(
        &self,
        order_id: &str,
        status: &str,
        filled_at: Option<i64>,
        linked_order_id: Option<String>,
    ) {
        self.persistence.submit(PersistJob::StatusChange {
            order_id: order_id.to_string(),
            status: status.to_string(),
            filled_at,
            linked_order_id,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_rules_respect_grace_period() {
        // 3秒内无论价格多离谱都不替换
        assert!(!should_replace_buy(2000, 70100.0, 70000.0, 2.0));
        // 3秒后越位（买价 > 买一 + 2*价差）
        assert!(should_replace_buy(3000, 70004.1, 70000.0, 2.0));
        assert!(!should_replace_buy(3000, 70003.9, 70000.0, 2.0));
        // 3秒后掉队（买一 - 买价 > 5*价差）
        assert!(should_replace_buy(3000, 69989.9, 70000.0, 2.0));
        assert!(!should_replace_buy(3000, 69990.1, 70000.0, 2.0));
    }

    #[test]
    fn test_adaptive_offset_and_force() {
        assert_eq!(adaptive_offset_ticks(0), 2);
        assert_eq!(adaptive_offset_ticks(3), 5);
        // 连续5次撤单后偏移 min(2+5, 10)=7 且改用gtc
        assert_eq!(adaptive_offset_ticks(5), 7);
        assert_eq!(entry_force(5), OrderForce::Gtc);
        assert_eq!(entry_force(4), OrderForce::PostOnly);
        // 偏移上限10
        assert_eq!(adaptive_offset_ticks(20), 10);
    }

    #[test]
    fn test_paired_sell_trade_side_matrix() {
        // 双向持仓：正常close，反转后省略
        assert_eq!(
            paired_sell_trade_side(HoldMode::DoubleHold, false),
            Some(TradeSide::Close)
        );
        assert_eq!(paired_sell_trade_side(HoldMode::DoubleHold, true), None);
        // 单向持仓：正常省略，反转后close
        assert_eq!(paired_sell_trade_side(HoldMode::SingleHold, false), None);
        assert_eq!(
            paired_sell_trade_side(HoldMode::SingleHold, true),
            Some(TradeSide::Close)
        );
    }

    #[test]
    fn test_sell_fill_pnl_matches_reference() {
        // 买 69999.8 卖 70001.8 x 0.000143，maker 0.0002
        let (gross, fee, net) = sell_fill_pnl(70001.8, 69999.8, 0.000143, 0.0002);
        assert!((gross - 0.000286).abs() < 1e-9);
        assert!((fee - 2.0 * 70001.8 * 0.000143 * 0.0002).abs() < 1e-9);
        assert!((net - (gross - fee)).abs() < 1e-12);
        assert!(net > 0.00028 && net < 0.000286);
    }

    #[test]
    fn test_sell_retry_backoff_table() {
        assert_eq!(SELL_RETRY_BACKOFF_SECS, [2, 3, 4, 5, 5, 3, 0]);
    }
}
