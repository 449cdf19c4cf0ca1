use std::io::Write;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::debug;

use local_llm_client::clipboard::{Clipboard, ClipboardError};

/// 系统剪贴板：arboard 能打开就用它，否则往终端写 OSC 52
#[derive(Debug, Clone)]
pub struct SystemClipboard {
    available: bool,
}

impl SystemClipboard {
    pub fn detect() -> Self {
        let available = match arboard::Clipboard::new() {
            Ok(_) => true,
            Err(err) => {
                debug!(error = %err, "system clipboard unavailable, using OSC 52");
                false
            }
        };
        Self { available }
    }
}

#[async_trait]
impl Clipboard for SystemClipboard {
    fn has_primary(&self) -> bool {
        self.available
    }

    async fn write_primary(&self, text: &str) -> Result<(), ClipboardError> {
        let text = text.to_string();
        // arboard 是阻塞调用，放到 blocking 线程里
        tokio::task::spawn_blocking(move || {
            let mut clipboard = arboard::Clipboard::new()
                .map_err(|err| ClipboardError::Unavailable(err.to_string()))?;
            clipboard
                .set_text(text)
                .map_err(|err| ClipboardError::Write(err.to_string()))
        })
        .await
        .map_err(|err| ClipboardError::Write(err.to_string()))?
    }

    fn write_fallback(&self, text: &str) -> Result<(), ClipboardError> {
        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(osc52(text).as_bytes())
            .and_then(|_| stdout.flush())
            .map_err(|err| ClipboardError::Write(err.to_string()))
    }
}

/// 终端剪贴板转义序列
fn osc52(text: &str) -> String {
    format!("\x1b]52;c;{}\x07", STANDARD.encode(text))
}
