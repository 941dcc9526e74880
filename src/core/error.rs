use thiserror::Error;

/// 交易所层错误
///
/// 按规整后的分类组织：网络/限流/认证/业务码，业务码保留原始字符串
/// 供策略层的重试分类器匹配（22002 / 40774 等）。
#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("网络请求错误: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON序列化错误: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("速率限制 (HTTP 429): {0}")]
    RateLimited(String),

    #[error("认证错误 (HTTP {status}): {message}")]
    Auth { status: u16, message: String },

    #[error("交易所业务错误: {code} - {message}")]
    Business { code: String, message: String },

    #[error("HTTP错误 {status}: {message}")]
    Http { status: u16, message: String },

    #[error("数据解析错误: {0}")]
    Parse(String),

    #[error("配置错误: {0}")]
    Config(String),
}

impl ExchangeError {
    /// 业务错误码（仅 Business 变体携带）
    pub fn business_code(&self) -> Option<&str> {
        match self {
            ExchangeError::Business { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }

    /// 22002: 无可平仓位（持仓尚未结算）
    pub fn is_no_position(&self) -> bool {
        self.business_code() == Some("22002")
    }

    /// 40774: tradeSide 与持仓模式不匹配
    pub fn is_hold_mode_mismatch(&self) -> bool {
        self.business_code() == Some("40774")
    }

    /// 认证失败属于终止性错误，循环内遇到即停止策略
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExchangeError::Auth { .. })
    }

    /// 客户端内部是否可重试（网络/5xx；限流不在客户端重试）
    pub fn is_retryable(&self) -> bool {
        match self {
            ExchangeError::Network(_) => true,
            ExchangeError::Http { status, .. } => *status >= 500 && *status < 600,
            _ => false,
        }
    }
}

/// 策略生命周期错误
#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("已有策略实例在运行")]
    AlreadyRunning,

    #[error("没有运行中的策略实例")]
    NotRunning,

    #[error("配置无效: {0}")]
    ConfigInvalid(String),

    #[error("不允许修改运行期固定配置项: {0}")]
    ConfigImmutableKey(String),

    #[error("网格配置无效: {0}")]
    GridConfigInvalid(String),

    #[error("合并挂单失败: {0}")]
    MergeFailed(String),

    #[error("合约规格未找到: {0}")]
    ContractSpecNotFound(String),

    #[error("交易对规格未找到: {0}")]
    InstrumentSpecNotFound(String),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error("其他错误: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ExchangeError>;
pub type StrategyResult<T> = std::result::Result<T, StrategyError>;
