//! 聊天记录与一轮对话的生命周期。
//!
//! `submit` 追加用户消息和一个待定的助手占位消息，返回 [`ChatTurn`]。
//! 任务跑完总会产出 [`ChatEvent::TurnFinished`]，占位消息只在
//! [`ChatSession::apply`] 里落定，会话也只在那里回到空闲。

use std::fmt;
use std::time::Duration;

use crate::client::ApiClient;
use crate::clipboard::{copy_text, Clipboard, ClipboardError};
use crate::error::ApiResult;
use crate::types::{ChatRequest, ChatResponse, GenerationParams};

pub const PENDING_PLACEHOLDER: &str = "Thinking…";
pub const COPY_INDICATOR_TTL: Duration = Duration::from_millis(1200);

const NO_MODEL_MESSAGE: &str = "Select a model before sending a message.";
const BUSY_MESSAGE: &str = "Wait for the current reply before sending another message.";
const UNREACHABLE_MESSAGE: &str = "Unable to reach backend";
const COPY_FAILED_MESSAGE: &str = "Copy failed.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub pending: bool,
    pub error: bool,
}

impl ChatMessage {
    /// 待定和出错的消息不可复制
    pub fn copyable(&self) -> bool {
        !self.pending && !self.error
    }
}

/// 发送一轮对话需要的主配置快照
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatContext {
    pub model: String,
    pub system_prompt: String,
    pub params: GenerationParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Sending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    /// 没有可清空的内容
    Nothing,
    /// 第一次调用：等待确认
    Armed,
    Cleared,
}

#[derive(Debug)]
pub enum ChatEvent {
    TurnFinished {
        placeholder: MessageId,
        result: ApiResult<ChatResponse>,
    },
    CopyFinished {
        message_id: MessageId,
        result: Result<(), ClipboardError>,
    },
    CopyIndicatorExpired {
        message_id: MessageId,
    },
}

/// `apply` 之后调用方需要做的事
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatEffect {
    None,
    /// 为这条消息安排 [`copy_indicator_expiry`]
    ScheduleCopyExpiry(MessageId),
}

/// 一次已经登记在 transcript 里、等待发送的对话
#[derive(Debug, Clone)]
pub struct ChatTurn {
    placeholder: MessageId,
    request: ChatRequest,
}

impl ChatTurn {
    pub fn placeholder(&self) -> MessageId {
        self.placeholder
    }

    pub fn request(&self) -> &ChatRequest {
        &self.request
    }

    pub async fn run(self, client: &ApiClient) -> ChatEvent {
        let result = client.send_chat(&self.request).await;
        ChatEvent::TurnFinished {
            placeholder: self.placeholder,
            result,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CopyTask {
    message_id: MessageId,
    text: String,
}

impl CopyTask {
    pub async fn run(self, clipboard: &dyn Clipboard) -> ChatEvent {
        let result = copy_text(clipboard, &self.text).await;
        ChatEvent::CopyFinished {
            message_id: self.message_id,
            result,
        }
    }
}

/// [`COPY_INDICATOR_TTL`] 之后触发，清掉某条消息的“已复制”指示
pub async fn copy_indicator_expiry(message_id: MessageId) -> ChatEvent {
    tokio::time::sleep(COPY_INDICATOR_TTL).await;
    ChatEvent::CopyIndicatorExpired { message_id }
}

#[derive(Debug, Clone)]
pub struct ChatSession {
    messages: Vec<ChatMessage>,
    input: String,
    phase: SessionPhase,
    in_flight: Option<MessageId>,
    status: Option<String>,
    confirm_clear: bool,
    copied: Option<MessageId>,
    next_id: u64,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatSession {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            input: String::new(),
            phase: SessionPhase::Idle,
            in_flight: None,
            status: None,
            confirm_clear: false,
            copied: None,
            next_id: 1,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn message(&self, id: MessageId) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_sending(&self) -> bool {
        self.phase == SessionPhase::Sending
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn confirm_pending(&self) -> bool {
        self.confirm_clear
    }

    pub fn copied(&self) -> Option<MessageId> {
        self.copied
    }

    pub fn can_clear(&self) -> bool {
        !self.messages.is_empty() || self.is_sending()
    }

    pub fn set_input(&mut self, text: &str) {
        self.input = text.to_string();
        self.confirm_clear = false;
    }

    /// 开始一轮对话。文本为空、没选模型或上一条回复还没回来时返回 `None`，
    /// transcript 不变
    pub fn submit(&mut self, text: &str, context: &ChatContext) -> Option<ChatTurn> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        if context.model.trim().is_empty() {
            self.status = Some(NO_MODEL_MESSAGE.to_string());
            return None;
        }
        if self.is_sending() {
            self.status = Some(BUSY_MESSAGE.to_string());
            return None;
        }

        let user_id = self.allocate_id();
        let placeholder = self.allocate_id();
        self.messages.push(ChatMessage {
            id: user_id,
            role: Role::User,
            content: trimmed.to_string(),
            pending: false,
            error: false,
        });
        self.messages.push(ChatMessage {
            id: placeholder,
            role: Role::Assistant,
            content: PENDING_PLACEHOLDER.to_string(),
            pending: true,
            error: false,
        });

        self.input.clear();
        self.phase = SessionPhase::Sending;
        self.in_flight = Some(placeholder);
        self.status = None;
        self.confirm_clear = false;

        Some(ChatTurn {
            placeholder,
            request: ChatRequest {
                model: context.model.clone(),
                system_prompt: context.system_prompt.clone(),
                user_input: trimmed.to_string(),
                params: context.params.clone(),
            },
        })
    }

    /// 不需要并发的调用方用：提交、等待、应用一步完成
    pub async fn send(&mut self, client: &ApiClient, text: &str, context: &ChatContext) -> bool {
        let Some(turn) = self.submit(text, context) else {
            return false;
        };
        let event = turn.run(client).await;
        self.apply(event);
        true
    }

    /// 两步清空：第一次只是武装，第二次才真正清空
    pub fn clear(&mut self) -> ClearOutcome {
        if !self.can_clear() {
            self.confirm_clear = false;
            return ClearOutcome::Nothing;
        }
        if !self.confirm_clear {
            self.confirm_clear = true;
            return ClearOutcome::Armed;
        }

        self.messages.clear();
        self.phase = SessionPhase::Idle;
        self.in_flight = None;
        self.status = None;
        self.copied = None;
        self.confirm_clear = false;
        ClearOutcome::Cleared
    }

    pub fn cancel_clear(&mut self) {
        self.confirm_clear = false;
    }

    pub fn copy(&mut self, message_id: MessageId) -> Option<CopyTask> {
        self.confirm_clear = false;
        let message = self.messages.iter().find(|m| m.id == message_id)?;
        if !message.copyable() {
            return None;
        }
        Some(CopyTask {
            message_id,
            text: message.content.clone(),
        })
    }

    /// 唯一的状态归约入口：所有异步任务的完成都从这里进
    pub fn apply(&mut self, event: ChatEvent) -> ChatEffect {
        match event {
            ChatEvent::TurnFinished {
                placeholder,
                result,
            } => {
                let status = match &result {
                    Ok(_) => None,
                    Err(err) => Some(err.message_or(UNREACHABLE_MESSAGE).to_string()),
                };

                // transcript 可能已经被清空，此时结果直接丢弃
                if let Some(message) = self.messages.iter_mut().find(|m| m.id == placeholder) {
                    message.pending = false;
                    match result {
                        Ok(response) => {
                            message.content = response.assistant_output;
                            message.error = false;
                        }
                        Err(_) => {
                            let text = status.as_deref().unwrap_or(UNREACHABLE_MESSAGE);
                            message.content = format!("Error: {text}");
                            message.error = true;
                        }
                    }
                    if status.is_some() {
                        self.status = status;
                    }
                }

                if self.in_flight == Some(placeholder) {
                    self.in_flight = None;
                    self.phase = SessionPhase::Idle;
                }
                ChatEffect::None
            }
            ChatEvent::CopyFinished { message_id, result } => match result {
                Ok(()) => {
                    self.copied = Some(message_id);
                    ChatEffect::ScheduleCopyExpiry(message_id)
                }
                Err(err) => {
                    tracing::warn!(%message_id, error = %err, "copy to clipboard failed");
                    self.status = Some(COPY_FAILED_MESSAGE.to_string());
                    ChatEffect::None
                }
            },
            ChatEvent::CopyIndicatorExpired { message_id } => {
                // 旧的定时器不能清掉新消息的指示
                if self.copied == Some(message_id) {
                    self.copied = None;
                }
                ChatEffect::None
            }
        }
    }

    fn allocate_id(&mut self) -> MessageId {
        let id = MessageId(self.next_id);
        self.next_id += 1;
        id
    }
}
