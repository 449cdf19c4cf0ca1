//! 本地 LLM 推理后端的客户端：请求、响应归一化和前端状态机

pub mod client;
pub mod clipboard;
pub mod config;
pub mod error;
pub mod normalize;
pub mod session;
pub mod transport;
pub mod types;

#[cfg(test)]
mod test_support;

pub use client::ApiClient;
pub use config::{ClientConfig, ConfigError};
pub use error::{ApiError, ApiResult, ErrorKind};
pub use transport::{HttpRequest, HttpResponse, Method, ReqwestTransport, Transport};
