//! 前端状态机：主配置、聊天、对比面板、提示词库。
//!
//! 每个状态机用 `begin_*` / `submit` 产出任务，任务跑完返回事件，
//! 事件只通过各自的 `apply` 落回状态。

pub mod chat;
pub mod compare;
pub mod library;
pub mod primary;

pub use chat::{ChatContext, ChatEffect, ChatEvent, ChatMessage, ChatSession, MessageId, Role};
pub use compare::{CompareEvent, CompareOutcome, CompareSession, Slot};
pub use library::{AppliedPrompt, LibraryEffect, LibraryEvent, PromptLibrary};
pub use primary::PrimaryConfig;
