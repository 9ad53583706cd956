use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::Client;
use tracing::warn;

use crate::config::Config;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("请求失败 {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("请求返回 {status}: {url}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
}

/// HTTP 客户端封装。UA 伪装和 cookie 在构造时配好，
/// Referer 按请求传入(图片站校验来源页)。
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new(config: &Config) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            HeaderValue::from_static(ua_generator::ua::spoof_ua()),
        );

        let client = Client::builder()
            .default_headers(headers)
            .cookie_store(true)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self { client })
    }

    pub async fn get_text(&self, url: &str, referer: Option<&str>) -> Result<String, FetchError> {
        let response = self.send(url, referer).await?;
        response.text().await.map_err(|e| FetchError::Request {
            url: url.to_owned(),
            source: e,
        })
    }

    /// 返回响应字节和 Content-Type，后者供图片规整器做类型判断
    pub async fn get_bytes(
        &self,
        url: &str,
        referer: Option<&str>,
    ) -> Result<(Bytes, Option<String>), FetchError> {
        let response = self.send(url, referer).await?;
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let bytes = response.bytes().await.map_err(|e| FetchError::Request {
            url: url.to_owned(),
            source: e,
        })?;
        Ok((bytes, content_type))
    }

    async fn send(&self, url: &str, referer: Option<&str>) -> Result<reqwest::Response, FetchError> {
        let mut request = self.client.get(url);
        if let Some(referer) = referer {
            request = request.header(header::REFERER, referer);
        }

        let response = request.send().await.map_err(|e| FetchError::Request {
            url: url.to_owned(),
            source: e,
        })?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_owned(),
                status: response.status(),
            });
        }
        Ok(response)
    }
}

/// 统一的重试助手：固定次数、固定间隔，由谓词决定错误是否值得重试。
/// 图片下载和后续任何网络调用都走这里，不再各写各的循环。
pub async fn with_retry<T, F, Fut, P>(
    max_attempts: u32,
    delay: Duration,
    retryable: P,
    mut op: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
    P: Fn(&FetchError) -> bool,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt >= max_attempts || !retryable(&e) {
                    return Err(e);
                }
                warn!("第 {} 次尝试失败: {}，稍后重试", attempt, e);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fake_error() -> FetchError {
        FetchError::Status {
            url: "https://example.com/x".to_owned(),
            status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    #[tokio::test]
    async fn retry_stops_after_max_attempts() {
        let calls = Cell::new(0u32);
        let result: Result<(), _> = with_retry(
            3,
            Duration::from_millis(1),
            |_| true,
            || {
                calls.set(calls.get() + 1);
                async { Err(fake_error()) }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn retry_returns_first_success() {
        let calls = Cell::new(0u32);
        let result = with_retry(
            5,
            Duration::from_millis(1),
            |_| true,
            || {
                calls.set(calls.get() + 1);
                let attempt = calls.get();
                async move {
                    if attempt < 3 {
                        Err(fake_error())
                    } else {
                        Ok(attempt)
                    }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_fails_fast() {
        let calls = Cell::new(0u32);
        let result: Result<(), _> = with_retry(
            5,
            Duration::from_millis(1),
            |_| false,
            || {
                calls.set(calls.get() + 1);
                async { Err(fake_error()) }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }
}
