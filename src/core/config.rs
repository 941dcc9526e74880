use crate::core::error::ExchangeError;

/// Bitget API 密钥配置
#[derive(Debug, Clone)]
pub struct BitgetCredentials {
    pub api_key: String,
    pub secret_key: String,
    pub passphrase: String,
}

impl BitgetCredentials {
    /// 从环境变量加载API密钥
    pub fn from_env() -> Result<Self, ExchangeError> {
        dotenv::dotenv().ok(); // 加载.env文件，忽略错误

        let api_key = std::env::var("BITGET_API_KEY")
            .map_err(|_| ExchangeError::Config("未找到BITGET_API_KEY环境变量".to_string()))?;
        let secret_key = std::env::var("BITGET_SECRET_KEY")
            .map_err(|_| ExchangeError::Config("未找到BITGET_SECRET_KEY环境变量".to_string()))?;
        let passphrase = std::env::var("BITGET_PASSPHRASE")
            .map_err(|_| ExchangeError::Config("未找到BITGET_PASSPHRASE环境变量".to_string()))?;

        Ok(Self {
            api_key,
            secret_key,
            passphrase,
        })
    }
}

/// 进程级配置
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub credentials: BitgetCredentials,
    pub base_url: String,
    /// 模拟盘（papertrading），通过请求头切换
    pub simulated: bool,
    pub database_url: String,
    pub log_level: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ExchangeError> {
        dotenv::dotenv().ok();

        let credentials = BitgetCredentials::from_env()?;

        let base_url = std::env::var("BITGET_API_BASE_URL")
            .unwrap_or_else(|_| "https://api.bitget.com".to_string());

        let simulated = std::env::var("BITGET_SIMULATED")
            .map(|v| v == "1")
            .unwrap_or(false);

        let database_url = resolve_database_url()?;

        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string());

        Ok(Self {
            credentials,
            base_url,
            simulated,
            database_url,
            log_level,
        })
    }
}

/// DATABASE_URL 优先，否则由 POSTGRES_* 元组拼装
fn resolve_database_url() -> Result<String, ExchangeError> {
    if let Ok(url) = std::env::var("DATABASE_URL") {
        return Ok(url);
    }

    let host = std::env::var("POSTGRES_HOST")
        .map_err(|_| ExchangeError::Config("未设置DATABASE_URL或POSTGRES_HOST".to_string()))?;
    let port = std::env::var("POSTGRES_PORT").unwrap_or_else(|_| "5432".to_string());
    let user = std::env::var("POSTGRES_USER").unwrap_or_else(|_| "postgres".to_string());
    let password = std::env::var("POSTGRES_PASSWORD").unwrap_or_default();
    let db = std::env::var("POSTGRES_DB").unwrap_or_else(|_| "rustmaker".to_string());

    Ok(format!(
        "postgres://{}:{}@{}:{}/{}",
        user, password, host, port, db
    ))
}
