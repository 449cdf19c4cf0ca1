use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::client::ApiClient;
use crate::config::ClientConfig;
use crate::error::{ApiError, ApiResult};
use crate::transport::{HttpRequest, HttpResponse, Transport};

/// 按顺序吐出预置响应的 transport 替身，同时记录收到的请求
#[derive(Debug, Default)]
pub struct StubTransport {
    requests: Mutex<Vec<HttpRequest>>,
    replies: Mutex<VecDeque<ApiResult<HttpResponse>>>,
}

impl StubTransport {
    pub fn push_json(&self, status: u16, body: Value) {
        self.replies
            .lock()
            .push_back(Ok(HttpResponse::new(status, body.to_string())));
    }

    pub fn push_text(&self, status: u16, body: &str) {
        self.replies
            .lock()
            .push_back(Ok(HttpResponse::new(status, body)));
    }

    pub fn push_transport_error(&self, message: &str) {
        self.replies
            .lock()
            .push_back(Err(ApiError::transport(message)));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn send(&self, request: HttpRequest) -> ApiResult<HttpResponse> {
        self.requests.lock().push(request);
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::transport("stub transport has no more queued replies")))
    }
}

pub fn stub_client() -> (ApiClient, Arc<StubTransport>) {
    let stub = Arc::new(StubTransport::default());
    let config = ClientConfig::new("http://backend.test")
        .expect("stub base url")
        .with_max_retries(1);
    (ApiClient::with_transport(config, stub.clone()), stub)
}
