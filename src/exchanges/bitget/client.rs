use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;

use crate::core::config::{AppConfig, BitgetCredentials};
use crate::core::error::{ExchangeError, Result};
use crate::core::types::now_millis;

type HmacSha256 = Hmac<Sha256>;

/// 客户端内部的传输层重试上限（网络错误 / 5xx）
const TRANSPORT_MAX_RETRIES: u32 = 3;
const TRANSPORT_INITIAL_DELAY_MS: u64 = 200;

/// Bitget REST 客户端
///
/// 只负责签名、发送与响应包络解析；端点路径与业务结构体由适配器持有。
pub struct BitgetClient {
    http: reqwest::Client,
    credentials: BitgetCredentials,
    base_url: String,
    simulated: bool,
}

/// 统一响应包络: {code, msg, data}，code == "00000" 为成功
#[derive(Deserialize)]
struct ApiEnvelope<T> {
    code: String,
    msg: String,
    data: Option<T>,
}

impl BitgetClient {
    pub fn new(config: &AppConfig) -> Result<Arc<Self>> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Arc::new(Self {
            http,
            credentials: config.credentials.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            simulated: config.simulated,
        }))
    }

    /// Bitget 签名: Base64(HMAC-SHA256(timestamp + METHOD + path_with_query + body))
    fn sign(&self, timestamp: &str, method: &str, path_with_query: &str, body: &str) -> String {
        let prehash = format!("{}{}{}{}", timestamp, method, path_with_query, body);
        let mut mac = HmacSha256::new_from_slice(self.credentials.secret_key.as_bytes())
            .expect("HMAC 支持任意长度密钥");
        mac.update(prehash.as_bytes());
        general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    fn build_query(params: &[(&str, String)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// 签名 GET 请求
    pub async fn signed_get<T>(&self, path: &str, params: &[(&str, String)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let query = Self::build_query(params);
        let path_with_query = if query.is_empty() {
            path.to_string()
        } else {
            format!("{}?{}", path, query)
        };

        self.with_transport_retry(|| self.send_once("GET", &path_with_query, "")).await
    }

    /// 签名 POST 请求
    ///
    /// 下单/撤单等有副作用的请求不做传输层重试，避免重复下单。
    pub async fn signed_post<T>(&self, path: &str, body: &serde_json::Value) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let body_str = body.to_string();
        self.send_once("POST", path, &body_str).await
    }

    /// 公共 GET 请求（无签名）
    pub async fn public_get<T>(&self, path: &str, params: &[(&str, String)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let query = Self::build_query(params);
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        self.with_transport_retry(|| async {
            let response = self.http.get(&url).send().await?;
            Self::parse_response(response).await
        })
        .await
    }

    async fn send_once<T>(&self, method: &str, path_with_query: &str, body: &str) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let timestamp = now_millis().to_string();
        let signature = self.sign(&timestamp, method, path_with_query, body);
        let url = format!("{}{}", self.base_url, path_with_query);

        let mut request = match method {
            "GET" => self.http.get(&url),
            "POST" => self.http.post(&url),
            _ => {
                return Err(ExchangeError::Parse(format!(
                    "不支持的HTTP方法: {}",
                    method
                )))
            }
        };

        request = request
            .header("ACCESS-KEY", &self.credentials.api_key)
            .header("ACCESS-SIGN", signature)
            .header("ACCESS-TIMESTAMP", &timestamp)
            .header("ACCESS-PASSPHRASE", &self.credentials.passphrase)
            .header("Content-Type", "application/json")
            .header("locale", "en-US");

        // 模拟盘通过单个请求头切换，productType 保持 USDT-FUTURES 不变
        if self.simulated {
            request = request.header("paptrading", "1");
        }

        if method == "POST" && !body.is_empty() {
            request = request.body(body.to_string());
        }

        let response = request.send().await?;
        Self::parse_response(response).await
    }

    async fn parse_response<T>(response: reqwest::Response) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let status = response.status();

        if status.as_u16() == 429 {
            let text = response.text().await.unwrap_or_default();
            return Err(ExchangeError::RateLimited(text));
        }

        if status.as_u16() == 401 || status.as_u16() == 403 {
            let text = response.text().await.unwrap_or_default();
            return Err(ExchangeError::Auth {
                status: status.as_u16(),
                message: text,
            });
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ExchangeError::Http {
                status: status.as_u16(),
                message: text,
            });
        }

        let envelope: ApiEnvelope<T> = response.json().await?;

        if envelope.code == "00000" {
            envelope.data.ok_or_else(|| ExchangeError::Business {
                code: envelope.code,
                message: "API返回空数据".to_string(),
            })
        } else {
            Err(ExchangeError::Business {
                code: envelope.code,
                message: envelope.msg,
            })
        }
    }

    /// 传输层错误的有界指数退避重试
    async fn with_transport_retry<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(error) => {
                    if attempt >= TRANSPORT_MAX_RETRIES || !error.is_retryable() {
                        return Err(error);
                    }

                    let delay_ms = TRANSPORT_INITIAL_DELAY_MS * 2u64.pow(attempt);
                    log::warn!(
                        "⚠️ 请求失败，{}ms后重试 (尝试 {}/{}): {}",
                        delay_ms,
                        attempt + 1,
                        TRANSPORT_MAX_RETRIES,
                        error
                    );
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
            }
        }
    }
}
