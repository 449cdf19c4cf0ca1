use thiserror::Error;

/// 错误分类：调用方按 kind 分支，而不是去匹配字符串
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 请求根本没到达服务器（连接失败 / 被重置）
    Transport,
    /// 服务器返回了非 2xx 状态
    HttpStatus,
    /// 2xx 但响应体无法解析
    Payload,
    /// 客户端前置条件不满足，没有发出请求
    Validation,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("{0}")]
    Transport(String),

    #[error("{message}")]
    HttpStatus { status: u16, message: String },

    #[error("{0}")]
    Payload(String),

    #[error("{0}")]
    Validation(String),
}

impl ApiError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn http_status(status: u16, message: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            message: message.into(),
        }
    }

    pub fn payload(message: impl Into<String>) -> Self {
        Self::Payload(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Transport(_) => ErrorKind::Transport,
            ApiError::HttpStatus { .. } => ErrorKind::HttpStatus,
            ApiError::Payload(_) => ErrorKind::Payload,
            ApiError::Validation(_) => ErrorKind::Validation,
        }
    }

    /// 给用户看的文本：状态栏、消息气泡
    pub fn message(&self) -> &str {
        match self {
            ApiError::Transport(message)
            | ApiError::Payload(message)
            | ApiError::Validation(message) => message,
            ApiError::HttpStatus { message, .. } => message,
        }
    }

    /// 同 [`message`](Self::message)，但保证非空
    pub fn message_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        let message = self.message().trim();
        if message.is_empty() {
            fallback
        } else {
            message
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
