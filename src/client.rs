use std::fmt;
use std::sync::Arc;

use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::error::{ApiError, ApiResult};
use crate::normalize::parse_response;
use crate::transport::{perform_request, HttpRequest, Method, ReqwestTransport, Transport};
use crate::types::{
    ChatRequest, ChatResponse, CompareRequest, CompareResponse, ModelInfo, ModelListResponse,
    PromptEnvelope, PromptListResponse, PromptMeta, PromptTemplate,
};

pub const FALLBACK_LIST_MODELS: &str = "Failed to fetch models";
pub const FALLBACK_SEND_CHAT: &str = "Failed to send chat request";
pub const FALLBACK_LIST_PROMPTS: &str = "Failed to list prompts";
pub const FALLBACK_GET_PROMPT: &str = "Failed to load prompt";
pub const FALLBACK_CREATE_PROMPT: &str = "Failed to create prompt";
pub const FALLBACK_UPDATE_PROMPT: &str = "Failed to update prompt";
pub const FALLBACK_DELETE_PROMPT: &str = "Failed to delete prompt";
pub const FALLBACK_RUN_COMPARE: &str = "Failed to run compare";

/// 推理后端的类型化 API。配置和 transport 都由调用方显式传入，
/// 测试里换成替身 transport 即可
#[derive(Clone)]
pub struct ApiClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ApiClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> ApiResult<Self> {
        let transport = ReqwestTransport::new(&config.user_agent)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// `GET /models`
    pub async fn list_models(&self) -> ApiResult<Vec<ModelInfo>> {
        let request = HttpRequest::new(Method::Get, self.endpoint(&["models"])?);
        let envelope: ModelListResponse = self
            .execute("list_models", request, FALLBACK_LIST_MODELS)
            .await?;
        info!(count = envelope.models.len(), "models listed");
        Ok(envelope.models)
    }

    /// `POST /chat`
    pub async fn send_chat(&self, chat: &ChatRequest) -> ApiResult<ChatResponse> {
        let request =
            HttpRequest::new(Method::Post, self.endpoint(&["chat"])?).with_json(to_body(chat)?);
        self.execute("send_chat", request, FALLBACK_SEND_CHAT).await
    }

    /// `GET /prompts?query=`，空白查询时不带参数
    pub async fn list_prompts(&self, query: Option<&str>) -> ApiResult<Vec<PromptMeta>> {
        let mut url = self.endpoint(&["prompts"])?;
        if let Some(query) = query.map(str::trim).filter(|q| !q.is_empty()) {
            url.query_pairs_mut().append_pair("query", query);
        }
        let request = HttpRequest::new(Method::Get, url);
        let envelope: PromptListResponse = self
            .execute("list_prompts", request, FALLBACK_LIST_PROMPTS)
            .await?;
        Ok(envelope.prompts)
    }

    /// `GET /prompts/:id`
    pub async fn get_prompt(&self, id: &str) -> ApiResult<PromptTemplate> {
        let request = HttpRequest::new(Method::Get, self.endpoint(&["prompts", prompt_segment(id)?])?);
        let envelope: PromptEnvelope = self
            .execute("get_prompt", request, FALLBACK_GET_PROMPT)
            .await?;
        unwrap_prompt(envelope)
    }

    /// `POST /prompts`
    pub async fn create_prompt(&self, template: &PromptTemplate) -> ApiResult<PromptTemplate> {
        let request = HttpRequest::new(Method::Post, self.endpoint(&["prompts"])?)
            .with_json(to_body(template)?);
        let envelope: PromptEnvelope = self
            .execute("create_prompt", request, FALLBACK_CREATE_PROMPT)
            .await?;
        unwrap_prompt(envelope)
    }

    /// `PUT /prompts/:id`
    pub async fn update_prompt(&self, id: &str, template: &PromptTemplate) -> ApiResult<PromptTemplate> {
        let request = HttpRequest::new(Method::Put, self.endpoint(&["prompts", prompt_segment(id)?])?)
            .with_json(to_body(template)?);
        let envelope: PromptEnvelope = self
            .execute("update_prompt", request, FALLBACK_UPDATE_PROMPT)
            .await?;
        unwrap_prompt(envelope)
    }

    /// `DELETE /prompts/:id`，响应体忽略
    pub async fn delete_prompt(&self, id: &str) -> ApiResult<()> {
        let request = HttpRequest::new(Method::Delete, self.endpoint(&["prompts", prompt_segment(id)?])?);
        let _ack: serde_json::Value = self
            .execute("delete_prompt", request, FALLBACK_DELETE_PROMPT)
            .await?;
        Ok(())
    }

    /// `POST /compare`
    pub async fn run_compare(&self, compare: &CompareRequest) -> ApiResult<CompareResponse> {
        let request = HttpRequest::new(Method::Post, self.endpoint(&["compare"])?)
            .with_json(to_body(compare)?);
        self.execute("run_compare", request, FALLBACK_RUN_COMPARE).await
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: HttpRequest,
        fallback: &str,
    ) -> ApiResult<T> {
        debug!(operation, method = %request.method, url = %request.url, "calling backend");
        let response = perform_request(
            self.transport.as_ref(),
            request,
            self.config.max_retries,
            self.config.retry_backoff,
        )
        .await?;
        parse_response(&response, fallback)
    }

    /// base_url 后面追加路径段；每段单独做百分号编码
    fn endpoint(&self, segments: &[&str]) -> ApiResult<Url> {
        let mut url = self.config.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                ApiError::validation(format!(
                    "backend url `{}` cannot be used as a base",
                    self.config.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

/// 空 id、`.`、`..` 拼进路径后会指向别的资源（比如 `/prompts` 本身）
fn prompt_segment(id: &str) -> ApiResult<&str> {
    match id.trim() {
        "" => Err(ApiError::validation("Prompt id is required.")),
        "." | ".." => Err(ApiError::validation(format!("Invalid prompt id `{id}`."))),
        _ => Ok(id),
    }
}

fn to_body<T: Serialize>(value: &T) -> ApiResult<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|err| ApiError::validation(format!("failed to encode request body: {err}")))
}

fn unwrap_prompt(envelope: PromptEnvelope) -> ApiResult<PromptTemplate> {
    envelope
        .prompt
        .map(PromptTemplate::normalized)
        .ok_or_else(|| ApiError::payload("invalid response body: missing `prompt`"))
}
