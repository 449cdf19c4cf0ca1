use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use tracing::{debug, warn};

use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub body: Option<serde_json::Value>,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            body: None,
        }
    }

    pub fn with_json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// 原始 HTTP 响应。`body` 为 `None` 表示读取响应体本身失败
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Option<String>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: Some(body.into()),
        }
    }

    pub fn unreadable(status: u16) -> Self {
        Self { status, body: None }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// 发请求的抽象。实现只负责一次尝试：
/// 连不上服务器返回 `ApiError::Transport`，其余情况（包括 4xx/5xx）都返回响应
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> ApiResult<HttpResponse>;
}

#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl fmt::Debug for ReqwestTransport {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ReqwestTransport")
            .field("client", &self.client)
            .finish()
    }
}

impl ReqwestTransport {
    pub fn new(user_agent: &str) -> ApiResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|err| ApiError::transport(format!("failed to initialize HTTP client: {err}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> ApiResult<HttpResponse> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, request.url.clone());
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|err| {
            ApiError::transport(format!("Unable to reach backend at {}: {err}", request.url))
        })?;

        let status = response.status().as_u16();
        match response.text().await {
            Ok(text) => Ok(HttpResponse::new(status, text)),
            Err(err) => {
                warn!(status, url = %request.url, error = %err, "failed to read response body");
                Ok(HttpResponse::unreadable(status))
            }
        }
    }
}

/// 发送请求；网络层失败时固定等待 `backoff` 后重试，最多额外重试 `max_retries` 次。
/// 非 2xx 响应原样返回，交给 normalizer 处理
pub async fn perform_request(
    transport: &dyn Transport,
    request: HttpRequest,
    max_retries: u32,
    backoff: Duration,
) -> ApiResult<HttpResponse> {
    let mut attempt: u32 = 0;
    loop {
        match transport.send(request.clone()).await {
            Ok(response) => {
                debug!(
                    method = %request.method,
                    url = %request.url,
                    status = response.status,
                    attempt,
                    "request completed"
                );
                return Ok(response);
            }
            Err(err @ ApiError::Transport(_)) if attempt < max_retries => {
                attempt += 1;
                warn!(
                    method = %request.method,
                    url = %request.url,
                    attempt,
                    max_retries,
                    error = %err,
                    "network failure, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(err) => return Err(err),
        }
    }
}
