//! 网格策略引擎
//!
//! 固定价格阶梯 + 单主循环：读价 → 风控 → 对账 → 补买单 → 挂卖单 → 刷新权益。
//! 每层最多同时存在一笔买单和一笔卖单。

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tokio::task::JoinHandle;

use crate::core::error::{StrategyError, StrategyResult};
use crate::core::services::TradingServices;
use crate::core::spec_cache::{InstrumentSpec, InstrumentSpecCache};
use crate::core::types::{
    now_millis, utc_date_key, HoldMode, OrderForce, OrderParams, OrderSide, TradeDirection,
    TradeSide, TradingType,
};
use crate::storage::{GridLevelRecord, NewOrderRecord, PersistJob, PersistenceHandle};
use crate::utils::order_id::ClientOidGenerator;
use crate::utils::precision::format_places;

use crate::strategies::common::{
    ConfigManager, EngineState, EventLog, GridConfig, OrderTracker, RiskController, StrategyConfig,
    StrategyEventKind, StrategyInstance, StrategyStatusSnapshot, TrackedOrder,
};
use crate::strategies::scalping::merge::CANCEL_CHUNK_SIZE;

use super::levels::{build_ladder, sell_price_for, GridLevel, LevelState};

const MIN_POLL_INTERVAL_MS: u64 = 200;
/// 买入成交后等库存结算再挂卖单
const SELL_SETTLE_MS: u64 = 800;
const SELL_MAX_ATTEMPTS: u32 = 3;
const SELL_RETRY_DELAY_MS: u64 = 500;
const MAX_CONSECUTIVE_ERRORS: u32 = 5;
const ERROR_RECOVERY_DELAY_SECS: u64 = 30;
const STOP_JOIN_TIMEOUT_SECS: u64 = 10;

struct GridShared {
    /// 自引用，供循环体克隆出Arc
    weak: Weak<GridShared>,
    config: ConfigManager,
    services: TradingServices,
    persistence: PersistenceHandle,
    spec_cache: Arc<InstrumentSpecCache>,
    events: EventLog,
    tracker: Mutex<OrderTracker>,
    levels: Mutex<Vec<GridLevel>>,
    risk: RiskController,
    oid_gen: ClientOidGenerator,

    state: RwLock<EngineState>,
    running: AtomicBool,
    spec: RwLock<Option<InstrumentSpec>>,
    hold_mode: HoldMode,

    loop_errors: AtomicU32,
    error_count_total: AtomicU32,
    last_error: Mutex<Option<String>>,
    last_risk_denied: AtomicBool,

    tasks: Mutex<Vec<JoinHandle<()>>>,
}

pub struct GridEngine {
    shared: Arc<GridShared>,
}

impl GridEngine {
    pub fn new(
        config: ConfigManager,
        services: TradingServices,
        hold_mode: HoldMode,
        spec_cache: Arc<InstrumentSpecCache>,
        persistence: PersistenceHandle,
    ) -> Self {
        let limits = config.get().risk_limits();
        Self {
            shared: Arc::new_cyclic(|weak| GridShared {
                weak: weak.clone(),
                config,
                services,
                persistence,
                spec_cache,
                events: EventLog::new(),
                tracker: Mutex::new(OrderTracker::new()),
                levels: Mutex::new(Vec::new()),
                risk: RiskController::new(limits, 0.0),
                oid_gen: ClientOidGenerator::new("grid"),
                state: RwLock::new(EngineState::Stopped),
                running: AtomicBool::new(false),
                spec: RwLock::new(None),
                hold_mode,
                loop_errors: AtomicU32::new(0),
                error_count_total: AtomicU32::new(0),
                last_error: Mutex::new(None),
                last_risk_denied: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }
}

#[async_trait]
impl StrategyInstance for GridEngine {
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
                shared.arm_loop();
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
        log::info!("网格配置已更新");
        Ok(())
    }

    fn status(&self) -> StrategyStatusSnapshot {
        self.shared.status_snapshot()
    }
}

impl GridShared {
    fn arc_self(&self) -> Arc<Self> {
        self.weak.upgrade().expect("引擎已释放")
    }

    fn grid_config(&self) -> GridConfig {
        match self.config.get() {
            StrategyConfig::Grid(c) => c,
            StrategyConfig::Scalping(_) => unreachable!("网格引擎收到剥头皮配置"),
        }
    }

    fn spec(&self) -> StrategyResult<InstrumentSpec> {
        self.spec
            .read()
            .clone()
            .ok_or_else(|| StrategyError::Other("交易对规格未加载".to_string()))
    }

    async fn startup(&self) -> StrategyResult<()> {
        let config = self.grid_config();
        let symbol = config.base.symbol.clone();
        let trading_type = config.base.trading_type;

        let spec = self.spec_cache.get_spec(&symbol, trading_type).await?;
        self.config
            .apply_precision(spec.price_place, spec.volume_place);
        *self.spec.write() = Some(spec.clone());

        // 阶梯构建会对边界做快速失败校验
        let config = self.grid_config();
        let ladder = build_ladder(&config, spec.price_place, spec.volume_place)?;
        log::info!(
            "网格初始化: {} 层级 [{} .. {}]",
            ladder.len(),
            ladder.first().map(|l| l.price).unwrap_or(0.0),
            ladder.last().map(|l| l.price).unwrap_or(0.0)
        );
        self.persist_levels(&ladder, &config);
        *self.levels.lock() = ladder;

        let equity = self
            .services
            .account
            .get_account_equity()
            .await
            .map_err(StrategyError::Exchange)?;
        self.risk.update_equity(equity.equity);
        self.risk.update_limits(self.config.get().risk_limits());

        self.events.emit(
            StrategyEventKind::StrategyStarted,
            json!({
                "symbol": &symbol,
                "trading_type": trading_type.venue_code(),
                "lower_price": config.lower_price,
                "upper_price": config.upper_price,
                "grid_count": config.grid_count,
                "grid_type": format!("{:?}", config.grid_type).to_lowercase(),
            }),
        );

        if let Ok(config_value) = serde_json::to_value(self.config.get()) {
            self.persistence.submit(PersistJob::SaveConfig(config_value));
        }

        log::info!(
            "✅ 网格策略启动: {} [{}, {}] x {}",
            symbol,
            config.lower_price,
            config.upper_price,
            config.grid_count
        );
        Ok(())
    }

    fn arm_loop(&self) {
        let shared = self.arc_self();
        let handle = tokio::spawn(async move {
            let period = shared
                .grid_config()
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

                match shared.grid_tick().await {
                    Ok(_) => {
                        shared.loop_errors.store(0, Ordering::SeqCst);
                    }
                    Err(e) => {
                        if shared.on_loop_error(e) {
                            break;
                        }
                    }
                }
            }
            log::debug!("网格主循环退出");
        });
        self.tasks.lock().push(handle);
    }

    fn on_loop_error(&self, error: StrategyError) -> bool {
        let count = self.loop_errors.fetch_add(1, Ordering::SeqCst) + 1;
        self.error_count_total.fetch_add(1, Ordering::SeqCst);
        *self.last_error.lock() = Some(error.to_string());

        log::error!("❌ 网格循环错误 ({}/{}): {}", count, MAX_CONSECUTIVE_ERRORS, error);

        let terminal_auth = matches!(
            &error,
            StrategyError::Exchange(e) if e.is_terminal()
        );

        if terminal_auth || count >= MAX_CONSECUTIVE_ERRORS {
            *self.state.write() = EngineState::Error;
            self.events.emit(
                StrategyEventKind::StrategyError,
                json!({ "loop": "grid", "error": error.to_string() }),
            );

            if terminal_auth {
                log::error!("❌ 认证失败，策略停止");
                self.running.store(false, Ordering::SeqCst);
            } else {
                let shared = self.arc_self();
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(ERROR_RECOVERY_DELAY_SECS)).await;
                    if !shared.running.load(Ordering::SeqCst)
                        || *shared.state.read() != EngineState::Error
                    {
                        return;
                    }
                    log::info!("🔄 网格策略尝试从ERROR恢复");
                    shared.loop_errors.store(0, Ordering::SeqCst);
                    *shared.state.write() = EngineState::Running;
                    shared.arm_loop();
                });
                self.tasks.lock().push(handle);
            }
            return true;
        }
        false
    }

    // ============= 主循环 =============

    async fn grid_tick(&self) -> StrategyResult<()> {
        let config = self.grid_config();
        let symbol = &config.base.symbol;

        // 1. 当前价
        let ticker = self
            .services
            .market
            .get_ticker(symbol)
            .await
            .map_err(StrategyError::Exchange)?;
        let current_price = ticker.last_price;

        // 2. 风控闸门
        let inventory_notional = self.inventory_notional();
        let verdict = self.risk.check_can_trade(inventory_notional);
        let risk_allowed = verdict.is_allowed();
        if let crate::strategies::common::RiskVerdict::Denied { reason } = &verdict {
            if !self.last_risk_denied.swap(true, Ordering::SeqCst) {
                log::warn!("⚠️ 网格风控拒绝开仓: {}", reason);
                self.events.emit(
                    StrategyEventKind::RiskLimitHit,
                    json!({ "reason": reason, "inventory_notional": inventory_notional }),
                );
            }
        } else {
            self.last_risk_denied.store(false, Ordering::SeqCst);
        }

        // 3. 对账
        self.reconcile(&config).await?;

        // 4. 补买单（风控放行时）
        if risk_allowed {
            self.place_missing_buys(&config, current_price).await?;
        }

        // 5. 挂卖单
        self.place_pending_sells(&config).await?;

        // 6. 刷新权益
        let equity = self
            .services
            .account
            .get_account_equity()
            .await
            .map_err(StrategyError::Exchange)?;
        self.risk.update_equity(equity.equity);

        Ok(())
    }

    /// 持有库存的名义金额（已买入待卖出的层级）
    fn inventory_notional(&self) -> f64 {
        self.levels
            .lock()
            .iter()
            .filter(|l| matches!(l.state, LevelState::BuyFilled | LevelState::SellPending))
            .map(|l| l.notional())
            .sum()
    }

    /// 两步对账：本地pending订单缺席交易所列表时查详情定权威状态
    async fn reconcile(&self, config: &GridConfig) -> StrategyResult<()> {
        let symbol = &config.base.symbol;

        // 先快照本地，再抓交易所
        let local_pending: Vec<(usize, String, OrderSide)> = {
            let levels = self.levels.lock();
            levels
                .iter()
                .enumerate()
                .filter_map(|(i, level)| match level.state {
                    LevelState::BuyPending => level
                        .buy_order_id
                        .clone()
                        .map(|id| (i, id, OrderSide::Buy)),
                    LevelState::SellPending => level
                        .sell_order_id
                        .clone()
                        .map(|id| (i, id, OrderSide::Sell)),
                    _ => None,
                })
                .collect()
        };
        if local_pending.is_empty() {
            return Ok(());
        }

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

        for (index, order_id, side) in local_pending {
            if exchange_ids.contains(&order_id) {
                continue;
            }

            let detail = match self.services.order.get_order_detail(symbol, &order_id).await {
                Ok(detail) => detail,
                Err(e) => {
                    // 详情失败不推断，留到下一轮
                    log::warn!("⚠️ 网格订单 {} 详情查询失败: {}", order_id, e);
                    continue;
                }
            };

            use crate::core::types::OrderDetailState::*;
            match (side, detail.state) {
                (_, Live) | (_, PartiallyFilled) => {}
                (OrderSide::Buy, Filled) => self.on_level_buy_filled(config, index, &order_id),
                (OrderSide::Buy, Cancelled) => {
                    self.tracker.lock().mark_cancelled(&order_id);
                    self.persist_status(&order_id, "cancelled", None);
                    self.update_level(config, index, |level| {
                        level.state = LevelState::Empty;
                        level.buy_order_id = None;
                    });
                    log::info!("网格层 {} 买单被撤销，回到empty", index);
                }
                (OrderSide::Sell, Filled) => self.on_level_sell_filled(config, index, &order_id),
                (OrderSide::Sell, Cancelled) => {
                    self.tracker.lock().mark_cancelled(&order_id);
                    self.persist_status(&order_id, "cancelled", None);
                    let (price, size) = {
                        let levels = self.levels.lock();
                        (levels[index].price_str.clone(), levels[index].size_str.clone())
                    };
                    self.update_level(config, index, |level| {
                        level.state = LevelState::Empty;
                        level.buy_order_id = None;
                        level.sell_order_id = None;
                    });
                    // 已买入的库存失去了平仓挂单，向操作者暴露孤儿仓位
                    log::warn!(
                        "⚠️ 网格层 {} 卖单被交易所撤销，{} @ {} 库存失去配对",
                        index,
                        size,
                        price
                    );
                    self.events.emit(
                        StrategyEventKind::GridLevelUpdated,
                        json!({
                            "level": index,
                            "state": "empty",
                            "orphaned_inventory": size,
                            "price": price,
                        }),
                    );
                }
            }
        }

        Ok(())
    }

    fn on_level_buy_filled(&self, config: &GridConfig, index: usize, order_id: &str) {
        let filled_at = now_millis();
        self.tracker.lock().mark_filled(order_id, filled_at);
        self.persist_status(order_id, "filled", Some(filled_at));

        let price = self.update_level(config, index, |level| {
            level.state = LevelState::BuyFilled;
        });

        self.events.emit(
            StrategyEventKind::GridBuyFilled,
            json!({ "level": index, "order_id": order_id, "price": &price }),
        );
        log::info!("✅ 网格层 {} 买入成交 @ {}", index, price);
    }

    fn on_level_sell_filled(&self, config: &GridConfig, index: usize, order_id: &str) {
        let filled_at = now_millis();
        self.tracker.lock().mark_filled(order_id, filled_at);
        self.persist_status(order_id, "filled", Some(filled_at));

        let spec = match self.spec() {
            Ok(spec) => spec,
            Err(_) => return,
        };

        // 本层的买价与数量决定盈亏；卖价 = 配对卖单价格
        let (buy_price, size, sell_price) = {
            let levels = self.levels.lock();
            let level = &levels[index];
            (level.price, level.size_f64(), sell_price_for(&levels, index))
        };

        let gross = (sell_price - buy_price) * size;
        let fee = 2.0 * config.base.notional * spec.maker_fee_rate;
        let net = gross - fee;

        self.risk.record_pnl(net);
        self.persistence.submit(PersistJob::RealizedPnl {
            date: utc_date_key(),
            strategy_type: "grid".to_string(),
            net_pnl: net,
            fee,
            is_win: net >= 0.0,
        });

        self.update_level(config, index, |level| {
            level.state = LevelState::Empty;
            level.buy_order_id = None;
            level.sell_order_id = None;
        });

        self.events.emit(
            StrategyEventKind::GridSellFilled,
            json!({
                "level": index,
                "order_id": order_id,
                "buy_price": buy_price,
                "sell_price": sell_price,
                "gross_pnl": gross,
                "fee": fee,
                "net_pnl": net,
            }),
        );
        log::info!("✅ 网格层 {} 卖出成交，净盈亏 {:.6}", index, net);
    }

    /// 为低于现价的empty层级补买单；风控一旦拒绝立即中断
    async fn place_missing_buys(&self, config: &GridConfig, current_price: f64) -> StrategyResult<()> {
        let symbol = &config.base.symbol;
        let empty_below: Vec<usize> = {
            let levels = self.levels.lock();
            levels
                .iter()
                .enumerate()
                .filter(|(_, l)| l.state == LevelState::Empty && l.price < current_price)
                .map(|(i, _)| i)
                .collect()
        };

        for index in empty_below {
            // 每笔开仓前重查风控，拒绝即中断本轮补单
            let verdict = self.risk.check_can_trade(self.inventory_notional());
            if !verdict.is_allowed() {
                break;
            }

            let (price_str, size_str) = {
                let levels = self.levels.lock();
                (levels[index].price_str.clone(), levels[index].size_str.clone())
            };

            // 等比网格可能跨越现价，买单用gtc而非post-only
            let trade_side = match (config.base.trading_type, self.hold_mode) {
                (TradingType::Futures, HoldMode::DoubleHold) => Some(TradeSide::Open),
                _ => None,
            };
            let params = OrderParams::limit(
                symbol.clone(),
                OrderSide::Buy,
                price_str.clone(),
                size_str.clone(),
            )
            .with_force(OrderForce::Gtc)
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
            self.tracker.lock().track_plain(order.clone());
            self.persist_new_order(&order, config);

            self.update_level(config, index, |level| {
                level.state = LevelState::BuyPending;
                level.buy_order_id = Some(placed.order_id.clone());
            });
            log::debug!("网格层 {} 挂买单 {} @ {}", index, placed.order_id, price_str);
        }

        Ok(())
    }

    /// 为buy_filled层级挂配对卖单
    async fn place_pending_sells(&self, config: &GridConfig) -> StrategyResult<()> {
        let symbol = &config.base.symbol;
        let filled: Vec<usize> = {
            let levels = self.levels.lock();
            levels
                .iter()
                .enumerate()
                .filter(|(_, l)| l.state == LevelState::BuyFilled)
                .map(|(i, _)| i)
                .collect()
        };
        if filled.is_empty() {
            return Ok(());
        }

        let spec = self.spec()?;
        // 等库存结算
        tokio::time::sleep(Duration::from_millis(SELL_SETTLE_MS)).await;

        for index in filled {
            let (sell_price, size_str, buy_order_id) = {
                let levels = self.levels.lock();
                (
                    sell_price_for(&levels, index),
                    levels[index].size_str.clone(),
                    levels[index].buy_order_id.clone(),
                )
            };
            let price_str = format_places(sell_price, spec.price_place);

            let trade_side = match (config.base.trading_type, self.hold_mode) {
                (TradingType::Futures, HoldMode::DoubleHold) => Some(TradeSide::Close),
                _ => None,
            };

            let mut placed = None;
            for attempt in 1..=SELL_MAX_ATTEMPTS {
                let params = OrderParams::limit(
                    symbol.clone(),
                    OrderSide::Sell,
                    price_str.clone(),
                    size_str.clone(),
                )
                .with_force(OrderForce::Gtc)
                .with_trade_side(trade_side)
                .with_client_oid(self.oid_gen.generate());

                match self.services.order.place_order(&params).await {
                    Ok(receipt) => {
                        placed = Some(receipt);
                        break;
                    }
                    Err(e) if e.is_no_position() || e.is_hold_mode_mismatch() => {
                        log::warn!(
                            "⚠️ 网格层 {} 卖单第{}次尝试失败（持仓未就绪）: {}",
                            index,
                            attempt,
                            e
                        );
                        if attempt < SELL_MAX_ATTEMPTS {
                            tokio::time::sleep(Duration::from_millis(SELL_RETRY_DELAY_MS)).await;
                        }
                    }
                    Err(e) => return Err(StrategyError::Exchange(e)),
                }
            }

            match placed {
                Some(receipt) => {
                    let mut sell = TrackedOrder::new(
                        receipt.order_id.clone(),
                        receipt.client_oid.clone(),
                        OrderSide::Sell,
                        price_str.clone(),
                        size_str.clone(),
                        config.base.direction.unwrap_or(TradeDirection::Long),
                    );
                    sell.linked_order_id = buy_order_id.clone();
                    self.tracker.lock().track_plain(sell.clone());
                    self.persist_new_order(&sell, config);
                    if let Some(buy_id) = &buy_order_id {
                        self.tracker.lock().set_linked(buy_id, &receipt.order_id);
                    }

                    self.update_level(config, index, |level| {
                        level.state = LevelState::SellPending;
                        level.sell_order_id = Some(receipt.order_id.clone());
                    });

                    self.events.emit(
                        StrategyEventKind::SellOrderPlaced,
                        json!({
                            "level": index,
                            "order_id": &receipt.order_id,
                            "price": &price_str,
                            "size": &size_str,
                        }),
                    );
                    log::debug!("网格层 {} 挂卖单 {} @ {}", index, receipt.order_id, price_str);
                }
                None => {
                    // 持续持仓错误：层级留在buy_filled，下一轮再试
                    log::warn!("⚠️ 网格层 {} 卖单暂时无法挂出，回滚到buy_filled", index);
                }
            }
        }

        Ok(())
    }

    fn update_level<F>(&self, config: &GridConfig, index: usize, mutate: F) -> String
    where
        F: FnOnce(&mut GridLevel),
    {
        let record = {
            let mut levels = self.levels.lock();
            let level = &mut levels[index];
            mutate(level);
            GridLevelRecord {
                strategy_instance_id: config.base.instance_id.clone(),
                level_index: level.index as i32,
                price: level.price_str.clone(),
                state: level.state.as_str().to_string(),
                buy_order_id: level.buy_order_id.clone(),
                sell_order_id: level.sell_order_id.clone(),
                size: level.size_str.clone(),
            }
        };
        let price = record.price.clone();
        self.persistence.submit(PersistJob::GridLevel(record));
        price
    }

    fn persist_levels(&self, levels: &[GridLevel], config: &GridConfig) {
        for level in levels {
            self.persistence.submit(PersistJob::GridLevel(GridLevelRecord {
                strategy_instance_id: config.base.instance_id.clone(),
                level_index: level.index as i32,
                price: level.price_str.clone(),
                state: level.state.as_str().to_string(),
                buy_order_id: level.buy_order_id.clone(),
                sell_order_id: level.sell_order_id.clone(),
                size: level.size_str.clone(),
            }));
        }
    }

    // ============= 停止 =============

    async fn shutdown(&self, emergency: bool) -> StrategyResult<()> {
        {
            let mut state = self.state.write();
            if *state == EngineState::Stopped {
                return Ok(());
            }
            *state = EngineState::Stopping;
        }
        self.running.store(false, Ordering::SeqCst);

        let config = self.grid_config();
        let symbol = config.base.symbol.clone();

        // 常规与紧急停止都批量撤销全部网格挂单并复位层级
        let pending_ids: Vec<String> = {
            let levels = self.levels.lock();
            levels
                .iter()
                .flat_map(|l| {
                    [l.buy_order_id.clone(), l.sell_order_id.clone()]
                        .into_iter()
                        .flatten()
                })
                .collect()
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
                        self.persist_status(order_id, "cancelled", None);
                    }
                }
                Err(e) => log::error!("❌ 网格停止撤单批次失败: {}", e),
            }
        }

        {
            let mut levels = self.levels.lock();
            for level in levels.iter_mut() {
                level.state = LevelState::Empty;
                level.buy_order_id = None;
                level.sell_order_id = None;
            }
            let snapshot: Vec<GridLevel> = levels.clone();
            drop(levels);
            self.persist_levels(&snapshot, &config);
        }

        if emergency {
            self.events.emit(
                StrategyEventKind::EmergencyStop,
                json!({ "cancelled_pending": pending_ids.len() }),
            );
            log::warn!("⚠️ 网格紧急停止，撤销 {} 笔挂单", pending_ids.len());
        }

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
            log::warn!("⚠️ 网格循环退出超时，强制转入STOPPED");
        }

        self.events
            .emit(StrategyEventKind::StrategyStopped, json!({ "emergency": emergency }));
        *self.state.write() = EngineState::Stopped;
        log::info!("网格策略已停止");
        Ok(())
    }

    // ============= 快照与持久化 =============

    fn status_snapshot(&self) -> StrategyStatusSnapshot {
        let config = self.grid_config();
        let risk = self.risk.snapshot();
        let (position_notional, pending_sell_count) = {
            let levels = self.levels.lock();
            let notional = levels
                .iter()
                .filter(|l| matches!(l.state, LevelState::BuyFilled | LevelState::SellPending))
                .map(|l| l.notional())
                .sum();
            let sells = levels
                .iter()
                .filter(|l| l.state == LevelState::SellPending)
                .count();
            (notional, sells)
        };

        StrategyStatusSnapshot {
            instance_id: config.base.instance_id.clone(),
            strategy_type: "grid".to_string(),
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

    fn persist_new_order(&self, order: &TrackedOrder, config: &GridConfig) {
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
            strategy_type: "grid".to_string(),
            trading_type: config.base.trading_type.venue_code().to_string(),
        }));
    }

    fn persist_status(&self, order_id: &str, status: &str, filled_at: Option<i64>) {
        self.persistence.submit(PersistJob::StatusChange {
            order_id: order_id.to_string(),
            status: status.to_string(),
            filled_at,
            linked_order_id: None,
        });
    }
}
