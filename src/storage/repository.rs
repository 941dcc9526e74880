//! 策略数据访问层
//!
//! 所有写路径均为 UPSERT / ON CONFLICT 安全，可重复执行。

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

/// 新订单落库记录
#[derive(Debug, Clone)]
pub struct NewOrderRecord {
    pub order_id: String,
    pub client_oid: Option<String>,
    pub side: String,
    pub price: String,
    pub size: String,
    pub status: String,
    pub linked_order_id: Option<String>,
    pub direction: Option<String>,
    pub symbol: String,
    pub product_type: Option<String>,
    pub margin_coin: Option<String>,
    pub created_at: i64,
    pub strategy_type: String,
    pub trading_type: String,
}

/// 启动恢复时读出的订单
#[derive(Debug, Clone)]
pub struct StoredOrder {
    pub order_id: String,
    pub client_oid: Option<String>,
    pub side: String,
    pub price: String,
    pub size: String,
    pub status: String,
    pub linked_order_id: Option<String>,
    pub direction: Option<String>,
    pub created_at: i64,
}

/// 交易对规格落库行（合约与现货共用形状）
#[derive(Debug, Clone)]
pub struct SpecRecord {
    pub symbol: String,
    pub base_coin: String,
    pub quote_coin: String,
    pub price_place: i32,
    pub volume_place: i32,
    pub min_trade_num: String,
    pub size_multiplier: String,
    pub maker_fee_rate: String,
    pub taker_fee_rate: String,
    pub raw_data: serde_json::Value,
    pub fetched_at: DateTime<Utc>,
}

/// 网格层级快照
#[derive(Debug, Clone)]
pub struct GridLevelRecord {
    pub strategy_instance_id: String,
    pub level_index: i32,
    pub price: String,
    pub state: String,
    pub buy_order_id: Option<String>,
    pub sell_order_id: Option<String>,
    pub size: String,
}

pub struct StrategyStore {
    pool: PgPool,
}

impl StrategyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ============= 订单 =============

    pub async fn insert_new_order(&self, record: &NewOrderRecord) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO strategy_orders
                (order_id, client_oid, side, price, size, status, linked_order_id,
                 direction, symbol, product_type, margin_coin, created_at,
                 strategy_type, trading_type)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(&record.order_id)
        .bind(&record.client_oid)
        .bind(&record.side)
        .bind(&record.price)
        .bind(&record.size)
        .bind(&record.status)
        .bind(&record.linked_order_id)
        .bind(&record.direction)
        .bind(&record.symbol)
        .bind(&record.product_type)
        .bind(&record.margin_coin)
        .bind(record.created_at)
        .bind(&record.strategy_type)
        .bind(&record.trading_type)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_order_status(
        &self,
        order_id: &str,
        status: &str,
        filled_at: Option<i64>,
        linked_order_id: Option<&str>,
    ) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            UPDATE strategy_orders
            SET status = $2,
                filled_at = COALESCE($3, filled_at),
                linked_order_id = COALESCE($4, linked_order_id),
                updated_at = now()
            WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .bind(status)
        .bind(filled_at)
        .bind(linked_order_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// 按 (symbol, 场所) 读回仍处于 pending 的订单
    pub async fn load_pending_orders(
        &self,
        symbol: &str,
        trading_type: &str,
    ) -> sqlx::Result<Vec<StoredOrder>> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, client_oid, side, price, size, status,
                   linked_order_id, direction, created_at
            FROM strategy_orders
            WHERE symbol = $1 AND trading_type = $2 AND status = 'pending'
            ORDER BY created_at ASC
            "#,
        )
        .bind(symbol)
        .bind(trading_type)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| StoredOrder {
                order_id: row.get("order_id"),
                client_oid: row.get("client_oid"),
                side: row.get("side"),
                price: row.get("price"),
                size: row.get("size"),
                status: row.get("status"),
                linked_order_id: row.get("linked_order_id"),
                direction: row.get("direction"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    // ============= 每日盈亏 =============

    pub async fn upsert_daily_pnl(
        &self,
        date: &str,
        strategy_type: &str,
        net_pnl: f64,
        fee: f64,
        is_win: bool,
    ) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO strategy_daily_pnl
                (date, strategy_type, realized_pnl, total_trades, win_trades, loss_trades, fees)
            VALUES ($1, $2, $3, 1, $4, $5, $6)
            ON CONFLICT (date, strategy_type) DO UPDATE SET
                realized_pnl = strategy_daily_pnl.realized_pnl + $3,
                total_trades = strategy_daily_pnl.total_trades + 1,
                win_trades   = strategy_daily_pnl.win_trades + $4,
                loss_trades  = strategy_daily_pnl.loss_trades + $5,
                fees         = strategy_daily_pnl.fees + $6,
                updated_at   = now()
            "#,
        )
        .bind(date)
        .bind(strategy_type)
        .bind(net_pnl)
        .bind(if is_win { 1i64 } else { 0i64 })
        .bind(if is_win { 0i64 } else { 1i64 })
        .bind(fee)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ============= 配置 =============

    /// 唯一的 "default" 行承载当前激活配置
    pub async fn save_active_config(&self, config: &serde_json::Value) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO strategy_configs (name, config, is_active)
            VALUES ('default', $1, TRUE)
            ON CONFLICT (name) DO UPDATE SET
                config = $1,
                is_active = TRUE,
                updated_at = now()
            "#,
        )
        .bind(config)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_active_config(&self) -> sqlx::Result<Option<serde_json::Value>> {
        let row = sqlx::query(
            "SELECT config FROM strategy_configs WHERE name = 'default' AND is_active = TRUE",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get("config")))
    }

    // ============= 交易对规格 =============

    pub async fn upsert_contract_spec(
        &self,
        product_type: &str,
        spec: &SpecRecord,
    ) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO contract_specs
                (symbol, product_type, base_coin, quote_coin, price_place, volume_place,
                 min_trade_num, size_multiplier, maker_fee_rate, taker_fee_rate,
                 raw_data, fetched_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (symbol, product_type) DO UPDATE SET
                base_coin = $3, quote_coin = $4, price_place = $5, volume_place = $6,
                min_trade_num = $7, size_multiplier = $8,
                maker_fee_rate = $9, taker_fee_rate = $10,
                raw_data = $11, fetched_at = $12
            "#,
        )
        .bind(&spec.symbol)
        .bind(product_type)
        .bind(&spec.base_coin)
        .bind(&spec.quote_coin)
        .bind(spec.price_place)
        .bind(spec.volume_place)
        .bind(&spec.min_trade_num)
        .bind(&spec.size_multiplier)
        .bind(&spec.maker_fee_rate)
        .bind(&spec.taker_fee_rate)
        .bind(&spec.raw_data)
        .bind(spec.fetched_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_contract_spec(
        &self,
        symbol: &str,
        product_type: &str,
    ) -> sqlx::Result<Option<SpecRecord>> {
        let row = sqlx::query(
            r#"
            SELECT symbol, base_coin, quote_coin, price_place, volume_place,
                   min_trade_num, size_multiplier, maker_fee_rate, taker_fee_rate,
                   raw_data, fetched_at
            FROM contract_specs
            WHERE symbol = $1 AND product_type = $2
            "#,
        )
        .bind(symbol)
        .bind(product_type)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Self::row_to_spec))
    }

    pub async fn upsert_spot_spec(&self, spec: &SpecRecord) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO spot_specs
                (symbol, base_coin, quote_coin, price_place, volume_place,
                 min_trade_num, maker_fee_rate, taker_fee_rate, raw_data, fetched_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (symbol) DO UPDATE SET
                base_coin = $2, quote_coin = $3, price_place = $4, volume_place = $5,
                min_trade_num = $6, maker_fee_rate = $7, taker_fee_rate = $8,
                raw_data = $9, fetched_at = $10
            "#,
        )
        .bind(&spec.symbol)
        .bind(&spec.base_coin)
        .bind(&spec.quote_coin)
        .bind(spec.price_place)
        .bind(spec.volume_place)
        .bind(&spec.min_trade_num)
        .bind(&spec.maker_fee_rate)
        .bind(&spec.taker_fee_rate)
        .bind(&spec.raw_data)
        .bind(spec.fetched_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_spot_spec(&self, symbol: &str) -> sqlx::Result<Option<SpecRecord>> {
        let row = sqlx::query(
            r#"
            SELECT symbol, base_coin, quote_coin, price_place, volume_place,
                   min_trade_num, '1' AS size_multiplier, maker_fee_rate, taker_fee_rate,
                   raw_data, fetched_at
            FROM spot_specs
            WHERE symbol = $1
            "#,
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Self::row_to_spec))
    }

    fn row_to_spec(row: sqlx::postgres::PgRow) -> SpecRecord {
        SpecRecord {
            symbol: row.get("symbol"),
            base_coin: row.get("base_coin"),
            quote_coin: row.get("quote_coin"),
            price_place: row.get("price_place"),
            volume_place: row.get("volume_place"),
            min_trade_num: row.get("min_trade_num"),
            size_multiplier: row.get("size_multiplier"),
            maker_fee_rate: row.get("maker_fee_rate"),
            taker_fee_rate: row.get("taker_fee_rate"),
            raw_data: row.get("raw_data"),
            fetched_at: row.get("fetched_at"),
        }
    }

    // ============= 网格层级 =============

    pub async fn upsert_grid_level(&self, record: &GridLevelRecord) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO grid_levels
                (strategy_instance_id, level_index, price, state,
                 buy_order_id, sell_order_id, size)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (strategy_instance_id, level_index) DO UPDATE SET
                price = $3, state = $4, buy_order_id = $5, sell_order_id = $6,
                size = $7, updated_at = now()
            "#,
        )
        .bind(&record.strategy_instance_id)
        .bind(record.level_index)
        .bind(&record.price)
        .bind(&record.state)
        .bind(&record.buy_order_id)
        .bind(&record.sell_order_id)
        .bind(&record.size)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
