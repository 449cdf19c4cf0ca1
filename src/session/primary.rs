use crate::error::ApiResult;
use crate::session::chat::ChatContext;
use crate::types::{GenerationParams, ModelInfo, PromptTemplate};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";
pub const CUSTOM_PROMPT_LABEL: &str = "Custom Prompt";
const NO_MODELS_MESSAGE: &str = "No models available. Ensure the backend is running.";

/// 主配置：模型列表与选择、system prompt、生成参数。
/// 聊天用它，对比面板把 promote 的模板交给它
#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryConfig {
    pub models: Vec<ModelInfo>,
    pub models_loading: bool,
    pub models_error: Option<String>,
    pub selected_model: String,
    pub system_prompt: String,
    pub prompt_name: String,
    pub params: GenerationParams,
    /// 一次性提示，例如 "Applied X to System Prompt."
    pub notice: Option<String>,
}

impl Default for PrimaryConfig {
    fn default() -> Self {
        Self {
            models: Vec::new(),
            models_loading: false,
            models_error: None,
            selected_model: String::new(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            prompt_name: CUSTOM_PROMPT_LABEL.to_string(),
            params: GenerationParams {
                temperature: Some(0.7),
                top_p: Some(0.9),
                ..Default::default()
            },
            notice: None,
        }
    }
}

impl PrimaryConfig {
    pub fn begin_load_models(&mut self) {
        self.models_loading = true;
    }

    pub fn apply_models(&mut self, result: ApiResult<Vec<ModelInfo>>) {
        self.models_loading = false;
        match result {
            Ok(models) if models.is_empty() => {
                self.models.clear();
                self.models_error = Some(NO_MODELS_MESSAGE.to_string());
            }
            Ok(models) => {
                let still_valid = models.iter().any(|m| m.name == self.selected_model);
                if !still_valid {
                    self.selected_model = models[0].name.clone();
                }
                self.models = models;
                self.models_error = None;
            }
            Err(err) => {
                self.models_error = Some(err.message_or("Unable to load models").to_string());
            }
        }
    }

    /// 按名字选模型；列表已加载时拒绝未知名字
    pub fn select_model(&mut self, name: &str) -> Result<(), String> {
        let name = name.trim();
        if !self.models.is_empty() && !self.models.iter().any(|m| m.name == name) {
            return Err(format!("Unknown model `{name}`."));
        }
        self.selected_model = name.to_string();
        Ok(())
    }

    pub fn model_ready(&self) -> bool {
        !self.selected_model.trim().is_empty()
    }

    pub fn set_system_prompt(&mut self, text: &str) {
        self.system_prompt = text.to_string();
        self.prompt_name = CUSTOM_PROMPT_LABEL.to_string();
    }

    /// 提示词库的 “Apply to System Prompt”
    pub fn apply_prompt(&mut self, body: &str, name: Option<&str>) {
        self.system_prompt = body.to_string();
        self.prompt_name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(CUSTOM_PROMPT_LABEL)
            .to_string();
    }

    /// 对比面板 promote：正文、名称，以及模板里给出的默认参数
    pub fn promote(&mut self, template: &PromptTemplate) {
        self.system_prompt = template.body_md.clone();
        let name = template.name.trim();
        self.prompt_name = if name.is_empty() {
            CUSTOM_PROMPT_LABEL.to_string()
        } else {
            name.to_string()
        };
        self.params.merge(&template.model_defaults);
        self.notice = Some(format!("Applied {} to System Prompt.", template.label()));
    }

    pub fn take_notice(&mut self) -> Option<String> {
        self.notice.take()
    }

    pub fn chat_context(&self) -> ChatContext {
        ChatContext {
            model: self.selected_model.clone(),
            system_prompt: self.system_prompt.clone(),
            params: self.params.clone(),
        }
    }
}
