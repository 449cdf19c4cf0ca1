use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClipboardError {
    #[error("clipboard unavailable: {0}")]
    Unavailable(String),

    #[error("clipboard write failed: {0}")]
    Write(String),
}

/// 剪贴板能力：首选异步写入，不可用时走同步的后备方式
#[async_trait]
pub trait Clipboard: Send + Sync {
    /// 首选剪贴板是否可用
    fn has_primary(&self) -> bool;

    async fn write_primary(&self, text: &str) -> Result<(), ClipboardError>;

    fn write_fallback(&self, text: &str) -> Result<(), ClipboardError>;
}

/// 尽力复制：只有没有首选剪贴板时才走后备；首选写入失败直接报错，不再走后备
pub async fn copy_text(clipboard: &dyn Clipboard, text: &str) -> Result<(), ClipboardError> {
    if clipboard.has_primary() {
        clipboard.write_primary(text).await
    } else {
        clipboard.write_fallback(text)
    }
}
