//! 数据库连接池管理
//!
//! sqlx Postgres 连接池，进程启动时构建一次并显式传递给依赖方。

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// 初始化数据库连接池
pub async fn init_pg_pool(database_url: &str) -> anyhow::Result<PgPool> {
    log::info!("正在初始化数据库连接池...");

    let pool = PgPoolOptions::new()
        .max_connections(8)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
        .map_err(|e| anyhow::anyhow!("数据库连接失败: {}", e))?;

    log::info!("✅ 数据库连接池初始化成功");
    Ok(pool)
}

/// 健康检查
pub async fn health_check(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .map_err(|e| anyhow::anyhow!("数据库健康检查失败: {}", e))?;
    Ok(())
}
