//! 同一个锁定模型上并排对比两个提示词。
//!
//! 两条轴：模型锁（只有锁定后才能选提示词槽位）和 A/B 槽位（运行前必须是
//! 两个不同的 prompt id）。每个异步结果都带 token 或 id，统一经过
//! [`CompareSession::apply`]，被后续操作取代的结果直接丢弃。

use std::fmt;

use crate::client::ApiClient;
use crate::error::{ApiError, ApiResult};
use crate::types::{
    CompareItemResult, CompareRequest, CompareResponse, GenerationParams, ModelInfo, PromptMeta,
    PromptTemplate,
};

const SELECT_MODEL_TO_LOCK: &str = "Select a model to lock.";
const UNLOCK_BEFORE_CHANGE: &str = "Unlock the model before changing it.";
const UNLOCK_WHILE_RUNNING: &str = "Wait for the comparison to finish before unlocking.";
const LOCK_BEFORE_SELECT: &str = "Lock a model before selecting prompts.";
const SELECT_MODEL_FOR_RUN: &str = "Select a model before running compare.";
const LOCK_MODEL_FOR_RUN: &str = "Lock a model before running compare.";
const SELECT_TWO_PROMPTS: &str = "Select two prompts to compare.";
const PROMPTS_MUST_DIFFER: &str = "Prompt A and Prompt B must be different.";
const INPUT_REQUIRED: &str = "User input is required.";
const ALREADY_RUNNING: &str = "A comparison is already running.";
const SWAP_UNAVAILABLE: &str = "Select two different prompts to swap.";
const SELECT_PROMPT_TO_APPLY: &str = "Select a prompt to apply.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    /// 按位置回退时在结果里的下标
    pub fn index(self) -> usize {
        match self {
            Slot::A => 0,
            Slot::B => 1,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::A => f.write_str("A"),
            Slot::B => f.write_str("B"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromoteState {
    pub loading: bool,
    pub error: Option<String>,
}

#[derive(Debug)]
pub enum CompareEvent {
    PromptsLoaded {
        token: u64,
        result: ApiResult<Vec<PromptMeta>>,
    },
    RunFinished {
        token: u64,
        result: ApiResult<CompareResponse>,
    },
    PromoteFinished {
        slot: Slot,
        prompt_id: String,
        result: ApiResult<PromptTemplate>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompareOutcome {
    None,
    /// 把模板交给主配置
    Promote(PromptTemplate),
}

#[derive(Debug, Clone)]
pub struct ComparePromptsTask {
    token: u64,
}

impl ComparePromptsTask {
    pub async fn run(self, client: &ApiClient) -> CompareEvent {
        CompareEvent::PromptsLoaded {
            token: self.token,
            result: client.list_prompts(None).await,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompareRunTask {
    token: u64,
    request: CompareRequest,
}

impl CompareRunTask {
    pub fn request(&self) -> &CompareRequest {
        &self.request
    }

    pub async fn run(self, client: &ApiClient) -> CompareEvent {
        CompareEvent::RunFinished {
            token: self.token,
            result: client.run_compare(&self.request).await,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PromoteTask {
    slot: Slot,
    prompt_id: String,
}

impl PromoteTask {
    pub async fn run(self, client: &ApiClient) -> CompareEvent {
        let result = client.get_prompt(&self.prompt_id).await;
        CompareEvent::PromoteFinished {
            slot: self.slot,
            prompt_id: self.prompt_id,
            result,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompareSession {
    model: String,
    /// 用户手动选过模型后不再跟随主配置
    model_overridden: bool,
    locked: bool,
    known_models: Vec<String>,

    prompts: Vec<PromptMeta>,
    loading_prompts: bool,
    list_error: Option<String>,
    list_token: u64,

    slot_a: Option<String>,
    slot_b: Option<String>,
    input: String,

    running: bool,
    run_token: u64,
    run_error: Option<String>,
    response: Option<CompareResponse>,

    promote_a: PromoteState,
    promote_b: PromoteState,
}

impl CompareSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn model_ready(&self) -> bool {
        !self.model.trim().is_empty()
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn prompts(&self) -> &[PromptMeta] {
        &self.prompts
    }

    pub fn loading_prompts(&self) -> bool {
        self.loading_prompts
    }

    pub fn list_error(&self) -> Option<&str> {
        self.list_error.as_deref()
    }

    pub fn slot(&self, slot: Slot) -> Option<&str> {
        match slot {
            Slot::A => self.slot_a.as_deref(),
            Slot::B => self.slot_b.as_deref(),
        }
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn run_error(&self) -> Option<&str> {
        self.run_error.as_deref()
    }

    pub fn response(&self) -> Option<&CompareResponse> {
        self.response.as_ref()
    }

    pub fn promote_state(&self, slot: Slot) -> &PromoteState {
        match slot {
            Slot::A => &self.promote_a,
            Slot::B => &self.promote_b,
        }
    }

    pub fn prompts_enabled(&self) -> bool {
        self.locked && self.model_ready()
    }

    pub fn can_lock(&self) -> bool {
        self.model_ready() && !self.locked && !self.running
    }

    pub fn can_unlock(&self) -> bool {
        self.locked && !self.running
    }

    pub fn can_swap(&self) -> bool {
        matches!((&self.slot_a, &self.slot_b), (Some(a), Some(b)) if a != b)
            && self.locked
            && !self.running
            && !self.loading_prompts
            && !self.promote_a.loading
            && !self.promote_b.loading
    }

    pub fn can_run(&self) -> bool {
        self.validate_run().is_ok()
    }

    /// 未锁定时跟随主配置的模型，直到用户手动覆盖
    pub fn sync_models(&mut self, models: &[ModelInfo], primary_model: &str) {
        self.known_models = models.iter().map(|m| m.name.clone()).collect();
        if self.locked {
            return;
        }

        let is_known = |name: &str| !name.is_empty() && self.known_models.iter().any(|m| m == name);
        let current_valid = is_known(&self.model);
        let primary_valid = is_known(primary_model);

        let next = if self.model_overridden && current_valid {
            self.model.clone()
        } else if primary_valid {
            self.model_overridden = false;
            primary_model.to_string()
        } else if current_valid {
            self.model.clone()
        } else {
            self.model_overridden = false;
            self.known_models.first().cloned().unwrap_or_default()
        };

        if next != self.model {
            self.model = next;
            self.response = None;
            self.run_error = None;
        }
    }

    pub fn select_model(&mut self, name: &str) -> ApiResult<()> {
        if self.locked {
            return Err(self.fail_run(UNLOCK_BEFORE_CHANGE));
        }
        let name = name.trim();
        if !self.known_models.is_empty() && !self.known_models.iter().any(|m| m == name) {
            return Err(self.fail_run(&format!("Unknown model `{name}`.")));
        }
        self.model = name.to_string();
        self.model_overridden = true;
        self.response = None;
        self.run_error = None;
        self.promote_a.error = None;
        self.promote_b.error = None;
        Ok(())
    }

    pub fn lock(&mut self) -> ApiResult<()> {
        if !self.model_ready() {
            return Err(self.fail_run(SELECT_MODEL_TO_LOCK));
        }
        self.locked = true;
        self.run_error = None;
        self.reconcile_slots();
        Ok(())
    }

    pub fn unlock(&mut self) -> ApiResult<()> {
        if self.running {
            return Err(self.fail_run(UNLOCK_WHILE_RUNNING));
        }
        self.locked = false;
        self.response = None;
        self.run_error = None;
        self.promote_a.error = None;
        self.promote_b.error = None;
        Ok(())
    }

    pub fn begin_load_prompts(&mut self) -> ComparePromptsTask {
        self.list_token += 1;
        self.loading_prompts = true;
        ComparePromptsTask {
            token: self.list_token,
        }
    }

    pub fn select_prompt(&mut self, slot: Slot, prompt_id: &str) -> ApiResult<()> {
        if !self.prompts_enabled() {
            return Err(self.fail_run(LOCK_BEFORE_SELECT));
        }
        let prompt_id = prompt_id.trim();
        if !self.prompts.iter().any(|p| p.id == prompt_id) {
            return Err(self.fail_run(&format!("Unknown prompt `{prompt_id}`.")));
        }

        *self.slot_mut(slot) = Some(prompt_id.to_string());
        self.promote_mut(slot).error = None;
        self.discard_result();
        self.reconcile_slots();
        Ok(())
    }

    /// A 与 B 一步互换；promote 状态跟着各自的提示词走，连续两次即还原
    pub fn swap(&mut self) -> ApiResult<()> {
        if !self.can_swap() {
            return Err(ApiError::validation(SWAP_UNAVAILABLE));
        }
        std::mem::swap(&mut self.slot_a, &mut self.slot_b);
        std::mem::swap(&mut self.promote_a, &mut self.promote_b);
        Ok(())
    }

    pub fn set_input(&mut self, text: &str) {
        self.input = text.to_string();
        self.discard_result();
    }

    /// 构造请求前先校验全部前置条件；不满足时记为运行错误，不发请求
    pub fn begin_run(&mut self, params: &GenerationParams) -> ApiResult<CompareRunTask> {
        let (prompt_a_id, prompt_b_id, user_input) = match self.validate_run() {
            Ok(parts) => parts,
            Err(message) => return Err(self.fail_run(message)),
        };

        self.run_token += 1;
        self.running = true;
        self.response = None;
        self.run_error = None;
        self.promote_a.error = None;
        self.promote_b.error = None;

        Ok(CompareRunTask {
            token: self.run_token,
            request: CompareRequest {
                model: self.model.clone(),
                prompt_a_id,
                prompt_b_id,
                user_input,
                params: params.clone(),
            },
        })
    }

    pub fn begin_promote(&mut self, slot: Slot) -> ApiResult<PromoteTask> {
        let Some(prompt_id) = self.slot(slot).map(str::to_string) else {
            let message = SELECT_PROMPT_TO_APPLY.to_string();
            self.promote_mut(slot).error = Some(message.clone());
            return Err(ApiError::validation(message));
        };
        if self.promote_state(slot).loading {
            return Err(ApiError::validation(format!("Prompt {slot} is already being applied.")));
        }

        let state = self.promote_mut(slot);
        state.loading = true;
        state.error = None;
        Ok(PromoteTask { slot, prompt_id })
    }

    /// 查找某个槽位的结果：先按 prompt id，找不到才用位置
    pub fn result_for(&self, slot: Slot) -> Option<&CompareItemResult> {
        let response = self.response.as_ref()?;
        response.result_for(self.slot(slot).unwrap_or_default(), slot.index())
    }

    pub fn prompt_label(&self, slot: Slot) -> String {
        if let Some(name) = self
            .result_for(slot)
            .and_then(|r| r.prompt_name.as_deref())
            .filter(|n| !n.is_empty())
        {
            return name.to_string();
        }
        match self.slot(slot) {
            Some(id) => self
                .prompts
                .iter()
                .find(|p| p.id == id && !p.name.is_empty())
                .map(|p| p.name.clone())
                .unwrap_or_else(|| "Unknown prompt".to_string()),
            None => "Select a prompt".to_string(),
        }
    }

    pub fn apply(&mut self, event: CompareEvent) -> CompareOutcome {
        match event {
            CompareEvent::PromptsLoaded { token, result } => {
                if token != self.list_token {
                    return CompareOutcome::None;
                }
                self.loading_prompts = false;
                match result {
                    Ok(prompts) => {
                        self.prompts = prompts;
                        self.list_error = None;
                        self.reconcile_slots();
                    }
                    Err(err) => {
                        self.list_error = Some(err.message_or("Unable to load prompts").to_string());
                    }
                }
                CompareOutcome::None
            }
            CompareEvent::RunFinished { token, result } => {
                if token != self.run_token || !self.running {
                    return CompareOutcome::None;
                }
                self.running = false;
                match result {
                    Ok(response) => self.response = Some(response),
                    Err(err) => {
                        self.run_error = Some(err.message_or("Unable to run compare").to_string());
                    }
                }
                CompareOutcome::None
            }
            CompareEvent::PromoteFinished {
                slot,
                prompt_id,
                result,
            } => {
                let state = self.promote_mut(slot);
                state.loading = false;
                match result {
                    Ok(template) => CompareOutcome::Promote(template),
                    Err(err) => {
                        tracing::warn!(%slot, prompt_id = %prompt_id, error = %err, "promote failed");
                        state.error = Some(err.message_or("Unable to load prompt").to_string());
                        CompareOutcome::None
                    }
                }
            }
        }
    }

    fn validate_run(&self) -> Result<(String, String, String), &'static str> {
        if !self.model_ready() {
            return Err(SELECT_MODEL_FOR_RUN);
        }
        if !self.locked {
            return Err(LOCK_MODEL_FOR_RUN);
        }
        let (Some(a), Some(b)) = (&self.slot_a, &self.slot_b) else {
            return Err(SELECT_TWO_PROMPTS);
        };
        if a == b {
            return Err(PROMPTS_MUST_DIFFER);
        }
        let input = self.input.trim();
        if input.is_empty() {
            return Err(INPUT_REQUIRED);
        }
        if self.running {
            return Err(ALREADY_RUNNING);
        }
        Ok((a.clone(), b.clone(), input.to_string()))
    }

    /// 列表变化或选择变化后修正槽位：失效 id 清空，
    /// A 默认取第一个，B 取第一个与 A 不同的
    fn reconcile_slots(&mut self) {
        let before = (self.slot_a.clone(), self.slot_b.clone());

        if self.prompts.is_empty() {
            self.slot_a = None;
            self.slot_b = None;
        } else {
            let prompts = &self.prompts;
            let valid = |id: &String| prompts.iter().any(|p| &p.id == id);

            let next_a = self
                .slot_a
                .clone()
                .filter(|id| valid(id))
                .or_else(|| prompts.first().map(|p| p.id.clone()));
            let mut next_b = self.slot_b.clone().filter(|id| valid(id));
            if next_b.is_none() || next_b == next_a {
                next_b = prompts
                    .iter()
                    .find(|p| Some(&p.id) != next_a.as_ref())
                    .map(|p| p.id.clone());
            }

            self.slot_a = next_a;
            self.slot_b = next_b;
        }

        if before != (self.slot_a.clone(), self.slot_b.clone()) {
            self.response = None;
        }
    }

    /// 输入或槽位变了：旧结果作废，进行中的运行结果也不再采纳
    fn discard_result(&mut self) {
        self.response = None;
        self.run_error = None;
        if self.running {
            self.running = false;
            self.run_token += 1;
        }
    }

    fn fail_run(&mut self, message: &str) -> ApiError {
        self.run_error = Some(message.to_string());
        ApiError::validation(message)
    }

    fn slot_mut(&mut self, slot: Slot) -> &mut Option<String> {
        match slot {
            Slot::A => &mut self.slot_a,
            Slot::B => &mut self.slot_b,
        }
    }

    fn promote_mut(&mut self, slot: Slot) -> &mut PromoteState {
        match slot {
            Slot::A => &mut self.promote_a,
            Slot::B => &mut self.promote_b,
        }
    }
}
