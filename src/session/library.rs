//! 提示词库：搜索列表、选中项预览和草稿编辑。
//!
//! 选中与加载分离：每次 `select` 都换一个 token，加载结果只有在 token 和
//! id 都与当前选中一致时才生效，旧选中的慢请求不会覆盖新的。

use crate::client::ApiClient;
use crate::error::{ApiError, ApiResult};
use crate::types::{parse_tags, ParamKey, PromptMeta, PromptTemplate};

const ID_AND_NAME_REQUIRED: &str = "Prompt id and name are required.";
const NOTHING_TO_DELETE: &str = "Select a saved prompt to delete.";
const NOTHING_TO_EDIT: &str = "Select a prompt to edit.";
const ID_IS_IMMUTABLE: &str = "The id of a saved prompt cannot be changed.";
const SAVE_IN_PROGRESS: &str = "A save is already in progress.";
const DELETE_IN_PROGRESS: &str = "A delete is already in progress.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveMode {
    Create,
    Update(String),
}

#[derive(Debug)]
pub enum LibraryEvent {
    ListLoaded {
        token: u64,
        query: String,
        result: ApiResult<Vec<PromptMeta>>,
    },
    PromptLoaded {
        token: u64,
        prompt_id: String,
        result: ApiResult<PromptTemplate>,
    },
    Saved {
        draft_generation: u64,
        mode: SaveMode,
        result: ApiResult<PromptTemplate>,
    },
    Deleted {
        prompt_id: String,
        result: ApiResult<()>,
    },
}

/// `apply` 之后需要继续执行的任务
#[derive(Debug)]
pub enum LibraryEffect {
    None,
    Reload(PromptListTask),
}

impl LibraryEffect {
    /// 保存或删除成功：别处缓存的提示词列表（对比面板）也要重新拉
    pub fn prompts_changed(&self) -> bool {
        matches!(self, Self::Reload(_))
    }
}

/// 交给主配置的内容（“Apply to System Prompt”）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedPrompt {
    pub body: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PromptListTask {
    token: u64,
    query: String,
}

impl PromptListTask {
    pub async fn run(self, client: &ApiClient) -> LibraryEvent {
        let result = client.list_prompts(Some(&self.query)).await;
        LibraryEvent::ListLoaded {
            token: self.token,
            query: self.query,
            result,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PromptFetchTask {
    token: u64,
    prompt_id: String,
}

impl PromptFetchTask {
    pub fn prompt_id(&self) -> &str {
        &self.prompt_id
    }

    pub async fn run(self, client: &ApiClient) -> LibraryEvent {
        let result = client.get_prompt(&self.prompt_id).await;
        LibraryEvent::PromptLoaded {
            token: self.token,
            prompt_id: self.prompt_id,
            result,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SaveTask {
    draft_generation: u64,
    mode: SaveMode,
    template: PromptTemplate,
}

impl SaveTask {
    pub fn mode(&self) -> &SaveMode {
        &self.mode
    }

    pub async fn run(self, client: &ApiClient) -> LibraryEvent {
        let result = match &self.mode {
            SaveMode::Create => client.create_prompt(&self.template).await,
            SaveMode::Update(id) => client.update_prompt(id, &self.template).await,
        };
        LibraryEvent::Saved {
            draft_generation: self.draft_generation,
            mode: self.mode,
            result,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeleteTask {
    prompt_id: String,
}

impl DeleteTask {
    pub fn prompt_id(&self) -> &str {
        &self.prompt_id
    }

    pub async fn run(self, client: &ApiClient) -> LibraryEvent {
        let result = client.delete_prompt(&self.prompt_id).await;
        LibraryEvent::Deleted {
            prompt_id: self.prompt_id,
            result,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PromptLibrary {
    query: String,
    prompts: Vec<PromptMeta>,
    loading_list: bool,
    list_token: u64,

    selected_id: Option<String>,
    selection_token: u64,
    preview: Option<PromptTemplate>,
    loading_prompt: bool,

    draft: PromptTemplate,
    /// `None` 表示草稿是新建的
    editing_id: Option<String>,
    /// 新建 / 编辑 / 选中都会换代，旧的保存结果不再覆盖草稿
    draft_generation: u64,
    saving: bool,
    deleting: bool,

    error: Option<String>,
    status: Option<String>,
}

impl PromptLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn prompts(&self) -> &[PromptMeta] {
        &self.prompts
    }

    pub fn loading_list(&self) -> bool {
        self.loading_list
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.selected_id.as_deref()
    }

    pub fn preview(&self) -> Option<&PromptTemplate> {
        self.preview.as_ref()
    }

    pub fn loading_prompt(&self) -> bool {
        self.loading_prompt
    }

    pub fn draft(&self) -> &PromptTemplate {
        &self.draft
    }

    pub fn editing_id(&self) -> Option<&str> {
        self.editing_id.as_deref()
    }

    pub fn is_new(&self) -> bool {
        self.editing_id.is_none()
    }

    pub fn is_saving(&self) -> bool {
        self.saving
    }

    pub fn is_deleting(&self) -> bool {
        self.deleting
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn can_delete(&self) -> bool {
        self.delete_target().is_some() && !self.deleting
    }

    /// 每次查询变化都重新加载
    pub fn set_query(&mut self, query: &str) -> PromptListTask {
        self.query = query.to_string();
        self.begin_reload()
    }

    pub fn begin_reload(&mut self) -> PromptListTask {
        self.list_token += 1;
        self.loading_list = true;
        PromptListTask {
            token: self.list_token,
            query: self.query.clone(),
        }
    }

    pub fn select(&mut self, prompt_id: &str) -> PromptFetchTask {
        self.selection_token += 1;
        self.selected_id = Some(prompt_id.to_string());
        self.preview = None;
        self.loading_prompt = true;
        self.status = None;
        self.error = None;
        PromptFetchTask {
            token: self.selection_token,
            prompt_id: prompt_id.to_string(),
        }
    }

    /// 空草稿，清空选中
    pub fn new_draft(&mut self) {
        self.clear_selection();
        self.reset_draft();
        self.status = None;
        self.error = None;
    }

    /// 把选中的模板复制进草稿
    pub fn edit(&mut self) -> ApiResult<()> {
        let Some(preview) = self.preview.clone() else {
            self.error = Some(NOTHING_TO_EDIT.to_string());
            return Err(ApiError::validation(NOTHING_TO_EDIT));
        };
        self.editing_id = Some(preview.id.clone());
        self.draft = preview;
        self.draft_generation += 1;
        self.status = None;
        self.error = None;
        Ok(())
    }

    pub fn set_draft_id(&mut self, id: &str) -> ApiResult<()> {
        if !self.is_new() {
            self.error = Some(ID_IS_IMMUTABLE.to_string());
            return Err(ApiError::validation(ID_IS_IMMUTABLE));
        }
        self.draft.id = id.to_string();
        Ok(())
    }

    pub fn set_draft_name(&mut self, name: &str) {
        self.draft.name = name.to_string();
    }

    pub fn set_draft_tags(&mut self, text: &str) {
        self.draft.tags = parse_tags(text);
    }

    pub fn set_draft_body(&mut self, body: &str) {
        self.draft.body_md = body.to_string();
    }

    pub fn set_draft_default(&mut self, key: ParamKey, text: &str) -> ApiResult<()> {
        self.draft
            .model_defaults
            .set_from_text(key, text)
            .map_err(ApiError::validation)
    }

    /// 校验通过后按是否已有 editing_id 决定创建还是更新
    pub fn begin_save(&mut self) -> ApiResult<SaveTask> {
        if self.draft.id.trim().is_empty() || self.draft.name.trim().is_empty() {
            self.error = Some(ID_AND_NAME_REQUIRED.to_string());
            return Err(ApiError::validation(ID_AND_NAME_REQUIRED));
        }
        if self.saving {
            return Err(ApiError::validation(SAVE_IN_PROGRESS));
        }

        self.saving = true;
        self.error = None;
        self.status = None;
        let mode = match &self.editing_id {
            Some(id) => SaveMode::Update(id.clone()),
            None => SaveMode::Create,
        };
        Ok(SaveTask {
            draft_generation: self.draft_generation,
            mode,
            template: self.draft.clone().normalized(),
        })
    }

    pub fn begin_delete(&mut self) -> ApiResult<DeleteTask> {
        let Some(prompt_id) = self.delete_target().map(str::to_string) else {
            self.error = Some(NOTHING_TO_DELETE.to_string());
            return Err(ApiError::validation(NOTHING_TO_DELETE));
        };
        if self.deleting {
            return Err(ApiError::validation(DELETE_IN_PROGRESS));
        }
        self.deleting = true;
        self.error = None;
        self.status = None;
        Ok(DeleteTask { prompt_id })
    }

    pub fn apply_to_config(&self) -> AppliedPrompt {
        let name = self.draft.name.trim();
        AppliedPrompt {
            body: self.draft.body_md.clone(),
            name: (!name.is_empty()).then(|| name.to_string()),
        }
    }

    pub fn apply(&mut self, event: LibraryEvent) -> LibraryEffect {
        match event {
            LibraryEvent::ListLoaded {
                token,
                query,
                result,
            } => {
                if token != self.list_token {
                    return LibraryEffect::None;
                }
                self.loading_list = false;
                match result {
                    Ok(prompts) => {
                        self.prompts = prompts;
                        self.error = None;
                        // 只有未过滤的列表才能证明某个 id 已经不存在
                        if query.trim().is_empty() {
                            self.drop_stale_references();
                        }
                    }
                    Err(err) => {
                        self.error = Some(err.message_or("Unable to load prompts").to_string());
                    }
                }
                LibraryEffect::None
            }
            LibraryEvent::PromptLoaded {
                token,
                prompt_id,
                result,
            } => {
                if token != self.selection_token || self.selected_id.as_deref() != Some(&prompt_id) {
                    tracing::debug!(prompt_id = %prompt_id, "discarding superseded prompt fetch");
                    return LibraryEffect::None;
                }
                self.loading_prompt = false;
                match result {
                    Ok(template) => self.preview = Some(template.normalized()),
                    Err(err) => {
                        self.error = Some(err.message_or("Unable to load prompt").to_string());
                    }
                }
                LibraryEffect::None
            }
            LibraryEvent::Saved {
                draft_generation,
                mode,
                result,
            } => {
                self.saving = false;
                match result {
                    Ok(saved) => {
                        let saved = saved.normalized();
                        self.status = Some(match mode {
                            SaveMode::Create => "Prompt created.".to_string(),
                            SaveMode::Update(_) => "Prompt updated.".to_string(),
                        });
                        if draft_generation == self.draft_generation {
                            self.selection_token += 1;
                            self.loading_prompt = false;
                            self.selected_id = Some(saved.id.clone());
                            self.editing_id = Some(saved.id.clone());
                            self.preview = Some(saved.clone());
                            self.draft = saved;
                        }
                        LibraryEffect::Reload(self.begin_reload())
                    }
                    Err(err) => {
                        self.error = Some(err.message_or("Unable to save prompt").to_string());
                        LibraryEffect::None
                    }
                }
            }
            LibraryEvent::Deleted { prompt_id, result } => {
                self.deleting = false;
                match result {
                    Ok(()) => {
                        self.status = Some("Prompt deleted.".to_string());
                        if self.selected_id.as_deref() == Some(&prompt_id) {
                            self.clear_selection();
                        }
                        if self.editing_id.as_deref() == Some(&prompt_id) {
                            self.reset_draft();
                        }
                        LibraryEffect::Reload(self.begin_reload())
                    }
                    Err(err) => {
                        self.error = Some(err.message_or("Unable to delete prompt").to_string());
                        LibraryEffect::None
                    }
                }
            }
        }
    }

    fn delete_target(&self) -> Option<&str> {
        self.editing_id.as_deref().or(self.selected_id.as_deref())
    }

    fn clear_selection(&mut self) {
        self.selection_token += 1;
        self.selected_id = None;
        self.preview = None;
        self.loading_prompt = false;
    }

    fn reset_draft(&mut self) {
        self.draft = PromptTemplate::default();
        self.editing_id = None;
        self.draft_generation += 1;
    }

    fn drop_stale_references(&mut self) {
        let known = |id: &str| self.prompts.iter().any(|p| p.id == id);
        let selected_gone = self.selected_id.as_deref().is_some_and(|id| !known(id));
        let editing_gone = self.editing_id.as_deref().is_some_and(|id| !known(id));

        if selected_gone {
            self.clear_selection();
        }
        if editing_gone {
            // 草稿内容保留，但它已经没有对应的已保存记录了
            self.editing_id = None;
        }
    }
}
