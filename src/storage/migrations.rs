//! 迁移执行器
//!
//! 按版本号顺序各执行一次，每个迁移在独立事务中运行并记录
//! sha-256 校验和；已应用文件被修改时启动必须失败。

use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};

/// 嵌入的迁移清单，按版本升序
const MIGRATIONS: &[(i64, &str, &str)] = &[
    (1, "001_init.sql", include_str!("../../migrations/001_init.sql")),
    (
        2,
        "002_grid_levels.sql",
        include_str!("../../migrations/002_grid_levels.sql"),
    ),
];

fn checksum(sql: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sql.as_bytes());
    hex::encode(hasher.finalize())
}

/// 应用全部未执行的迁移
pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version     BIGINT PRIMARY KEY,
            filename    TEXT NOT NULL,
            checksum    TEXT NOT NULL,
            applied_at  TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    for (version, filename, sql) in MIGRATIONS {
        let digest = checksum(sql);

        let applied = sqlx::query("SELECT checksum FROM schema_migrations WHERE version = $1")
            .bind(*version)
            .fetch_optional(pool)
            .await?;

        if let Some(row) = applied {
            let recorded: String = row.get("checksum");
            if recorded != digest {
                anyhow::bail!(
                    "迁移文件 {} 在应用后被修改 (记录校验和 {}, 当前 {})",
                    filename,
                    recorded,
                    digest
                );
            }
            continue;
        }

        log::info!("应用迁移 {} ...", filename);

        let mut tx = pool.begin().await?;
        sqlx::raw_sql(sql).execute(&mut *tx).await?;
        sqlx::query(
            "INSERT INTO schema_migrations (version, filename, checksum) VALUES ($1, $2, $3)",
        )
        .bind(*version)
        .bind(filename)
        .bind(&digest)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        log::info!("✅ 迁移 {} 已应用", filename);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_ordered_and_unique() {
        let mut last = 0;
        for (version, _, _) in MIGRATIONS {
            assert!(*version > last, "迁移版本必须严格递增");
            last = *version;
        }
    }

    #[test]
    fn test_checksum_stability() {
        // 同一内容的校验和必须稳定，否则启动校验会误报
        let a = checksum("CREATE TABLE t (id INT);");
        let b = checksum("CREATE TABLE t (id INT);");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let c = checksum("CREATE TABLE t (id BIGINT);");
        assert_ne!(a, c);
    }
}
