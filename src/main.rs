use std::sync::Arc;
use std::time::Duration;

use clap::{Arg, Command};

use rustmaker::core::config::AppConfig;
use rustmaker::core::spec_cache::InstrumentSpecCache;
use rustmaker::core::types::TradingType;
use rustmaker::exchanges::{build_trading_services, BitgetClient};
use rustmaker::storage::{self, PersistenceWorker, StrategyStore};
use rustmaker::strategies::autocalc::{self, AutoCalcInput, RiskLevel};
use rustmaker::strategies::StrategyManager;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载环境变量
    dotenv::dotenv().ok();

    let app_config = AppConfig::from_env()?;

    // 初始化日志，级别来自LOG_LEVEL
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(app_config.log_level.to_lowercase()),
    )
    .init();

    // 解析命令行参数
    let matches = Command::new("RustMaker")
        .version("1.2")
        .about("Rust做市交易系统 - Bitget剥头皮/网格策略")
        .arg(
            Arg::new("strategy")
                .short('s')
                .long("strategy")
                .value_name("STRATEGY")
                .help("策略类型: scalping, grid"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置覆盖文件路径 (YAML)"),
        )
        .arg(
            Arg::new("symbol")
                .long("symbol")
                .value_name("SYMBOL")
                .help("交易对，如 BTCUSDT"),
        )
        .arg(
            Arg::new("auto")
                .short('a')
                .long("auto")
                .value_name("RISK_LEVEL")
                .help("按风险档位自动推导配置: conservative, balanced, aggressive"),
        )
        .arg(
            Arg::new("notional")
                .long("notional")
                .value_name("USDT")
                .help("单笔名义金额 (自动推导模式，默认10)"),
        )
        .arg(
            Arg::new("spot")
                .long("spot")
                .action(clap::ArgAction::SetTrue)
                .help("使用现货而非USDT永续"),
        )
        .arg(
            Arg::new("list")
                .short('l')
                .long("list")
                .value_name("SEARCH")
                .num_args(0..=1)
                .default_missing_value("")
                .help("列出可用交易对后退出（可带搜索词）"),
        )
        .get_matches();

    let trading_type = if matches.get_flag("spot") {
        TradingType::Spot
    } else {
        TradingType::Futures
    };

    // 进程级句柄：显式构建并传递，不使用隐式全局状态
    let pool = storage::init_pg_pool(&app_config.database_url).await?;
    storage::migrations::run_migrations(&pool).await?;
    storage::health_check(&pool).await?;

    let store = Arc::new(StrategyStore::new(pool.clone()));
    let worker = PersistenceWorker::spawn(store.clone());

    let client = BitgetClient::new(&app_config)?;
    let spec_cache = Arc::new(InstrumentSpecCache::new(client.clone(), store.clone()));

    // 列表模式：打印热门与可搜索的交易对后退出
    if let Some(search) = matches.get_one::<String>("list") {
        let search = if search.is_empty() {
            None
        } else {
            Some(search.as_str())
        };

        log::info!("热门交易对:");
        for spec in spec_cache.get_hot_pairs(trading_type).await {
            log::info!(
                "  {} (精度 {}/{}, maker {:.4}%)",
                spec.symbol,
                spec.price_place,
                spec.volume_place,
                spec.maker_fee_rate * 100.0
            );
        }

        let available = spec_cache.list_available(trading_type, search).await?;
        log::info!("可用交易对 ({} 条):", available.len());
        for spec in available {
            log::info!("  {} ({}/{})", spec.symbol, spec.base_coin, spec.quote_coin);
        }

        worker.shutdown(Duration::from_secs(5)).await;
        pool.close().await;
        return Ok(());
    }

    let strategy_type = matches
        .get_one::<String>("strategy")
        .ok_or("缺少 --strategy 参数")?
        .clone();

    // 配置覆盖项优先级：自动推导 > 覆盖文件 > 库中激活配置 > 默认值
    let overrides: serde_json::Value = if let Some(level_raw) = matches.get_one::<String>("auto") {
        let symbol = matches
            .get_one::<String>("symbol")
            .ok_or("自动推导模式需要 --symbol")?
            .to_uppercase();
        let risk_level = match level_raw.as_str() {
            "conservative" => RiskLevel::Conservative,
            "balanced" => RiskLevel::Balanced,
            "aggressive" => RiskLevel::Aggressive,
            other => return Err(format!("未知风险档位: {}", other).into()),
        };
        let notional = matches
            .get_one::<String>("notional")
            .map(|v| v.parse::<f64>())
            .transpose()?
            .unwrap_or(10.0);

        let (services, _) = build_trading_services(trading_type, client.clone()).await?;
        let spec = spec_cache.get_spec(&symbol, trading_type).await?;
        let ticker = services.market.get_ticker(&symbol).await?;
        let balance = services.account.get_available_balance().await?;

        let input = AutoCalcInput {
            strategy_type: strategy_type.clone(),
            trading_type,
            symbol,
            notional,
            risk_level,
            direction: None,
        };
        let result = autocalc::derive_config(&input, &spec, &ticker, balance)?;
        for line in &result.derivations {
            log::info!("推导: {}", line);
        }
        let bounds = autocalc::calc_bounds(&input, &spec, &ticker, balance);
        log::info!(
            "价差范围: min {:.4} / 推荐 {:.4} / max {:.4}",
            bounds.price_spread.min,
            bounds.price_spread.recommended,
            bounds.price_spread.max
        );

        serde_json::to_value(result.config)?
    } else if let Some(path) = matches.get_one::<String>("config") {
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content)?
    } else {
        // 没有显式配置时尝试恢复库中的激活配置
        match worker.handle().load_active_config().await {
            Some(stored) if stored.get("strategy_type").and_then(|v| v.as_str())
                == Some(strategy_type.as_str()) =>
            {
                log::info!("使用数据库中保存的激活配置");
                stored
            }
            _ => serde_json::json!({}),
        }
    };

    log::info!(
        "启动策略: {} (模拟盘: {}, 日志级别: {})",
        strategy_type,
        app_config.simulated,
        app_config.log_level
    );

    let manager = StrategyManager::new(client, spec_cache, worker.handle());

    let status = manager.create_and_start(&strategy_type, &overrides).await?;
    log::info!(
        "✅ 策略实例 {} 已启动 ({})",
        status.instance_id,
        status.symbol
    );

    // 保持运行直到收到停止信号
    tokio::signal::ctrl_c().await?;
    log::info!("收到停止信号，正在关闭策略...");

    manager.stop_active().await?;
    drop(manager);

    // 排空持久化队列后关闭连接池
    worker.shutdown(Duration::from_secs(5)).await;
    pool.close().await;

    log::info!("进程退出");
    Ok(())
}
