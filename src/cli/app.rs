//! 终端前端：持有四个状态机，单线程事件循环里交替处理
//! stdin 输入和后台任务的完成事件

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tracing::{info, warn};

use local_llm_client::clipboard::Clipboard;
use local_llm_client::error::ApiResult;
use local_llm_client::session::chat::{copy_indicator_expiry, ClearOutcome};
use local_llm_client::session::{
    ChatEffect, ChatEvent, ChatSession, CompareEvent, CompareOutcome, CompareSession,
    LibraryEffect, LibraryEvent, PrimaryConfig, PromptLibrary, Role, Slot,
};
use local_llm_client::types::{ModelInfo, PromptTemplate};
use local_llm_client::ApiClient;

use crate::cli::commands::{self, Command, CompareCommand, DraftField, HELP};

/// 在 JoinSet 里跑一个状态机任务，完成事件包进对应的 `AppEvent` 变体
macro_rules! spawn_task {
    ($app:expr, $variant:ident, $task:expr) => {{
        let client = $app.client.clone();
        let task = $task;
        $app.tasks
            .spawn(async move { AppEvent::$variant(task.run(&client).await) });
    }};
}

/// 后台任务完成后送回事件循环的结果
#[derive(Debug)]
pub enum AppEvent {
    ModelsLoaded(ApiResult<Vec<ModelInfo>>),
    Chat(ChatEvent),
    Compare(CompareEvent),
    Library(LibraryEvent),
}

pub struct App {
    client: ApiClient,
    clipboard: Arc<dyn Clipboard>,
    primary: PrimaryConfig,
    chat: ChatSession,
    compare: CompareSession,
    library: PromptLibrary,
    tasks: JoinSet<AppEvent>,
}

impl App {
    pub fn new(client: ApiClient, clipboard: Arc<dyn Clipboard>, model: Option<String>) -> Self {
        let mut primary = PrimaryConfig::default();
        if let Some(model) = model {
            primary.selected_model = model;
        }
        Self {
            client,
            clipboard,
            primary,
            chat: ChatSession::new(),
            compare: CompareSession::new(),
            library: PromptLibrary::new(),
            tasks: JoinSet::new(),
        }
    }

    pub async fn run(mut self) -> Result<()> {
        println!(
            "Connected to {} (type /help for commands)",
            self.client.config().base_url
        );
        self.load_models();
        let task = self.library.begin_reload();
        spawn_task!(self, Library, task);
        let task = self.compare.begin_load_prompts();
        spawn_task!(self, Compare, task);

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line.context("failed to read from stdin")? else {
                        break;
                    };
                    match commands::parse(&line) {
                        Ok(Command::Quit) => break,
                        Ok(command) => self.handle(command),
                        Err(message) => println!("{message}"),
                    }
                }
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    match joined {
                        Ok(event) => self.apply(event),
                        Err(err) => warn!(error = %err, "background task failed"),
                    }
                }
            }
        }

        // 正在进行的请求直接丢弃
        self.tasks.abort_all();
        info!("bye");
        Ok(())
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Chat(text) => self.send_chat(&text),
            Command::Help => println!("{HELP}"),
            Command::Models => self.load_models(),
            Command::Model(None) => self.print_models(),
            Command::Model(Some(name)) => match self.primary.select_model(&name) {
                Ok(()) => {
                    self.sync_compare_models();
                    println!("Model: {}", self.primary.selected_model);
                }
                Err(message) => println!("{message}"),
            },
            Command::System(None) => {
                println!("[{}]\n{}", self.primary.prompt_name, self.primary.system_prompt)
            }
            Command::System(Some(text)) => {
                self.primary.set_system_prompt(&text);
                println!("System prompt updated.");
            }
            Command::Param { key, value } => {
                match self.primary.params.set_from_text(key, &value) {
                    Ok(()) => println!("{}", params_line(&self.primary)),
                    Err(message) => println!("{message}"),
                }
            }
            Command::Clear => match self.chat.clear() {
                ClearOutcome::Nothing => println!("Nothing to clear."),
                ClearOutcome::Armed => println!("Run /clear again to confirm, or /cancel."),
                ClearOutcome::Cleared => println!("Conversation cleared."),
            },
            Command::Cancel => {
                self.chat.cancel_clear();
                println!("Clear cancelled.");
            }
            Command::Copy(index) => self.copy_message(index),
            Command::Prompts(query) => {
                let task = self.library.set_query(&query);
                spawn_task!(self, Library, task);
            }
            Command::Show(id) => {
                let task = self.library.select(&id);
                spawn_task!(self, Library, task);
            }
            Command::New => {
                self.library.new_draft();
                println!("New draft.");
            }
            Command::Edit => match self.library.edit() {
                Ok(()) => print_template("Editing", self.library.draft()),
                Err(err) => println!("{err}"),
            },
            Command::Set { field, value } => self.set_draft_field(field, &value),
            Command::Save => match self.library.begin_save() {
                Ok(task) => spawn_task!(self, Library, task),
                Err(err) => println!("{err}"),
            },
            Command::Delete => match self.library.begin_delete() {
                Ok(task) => spawn_task!(self, Library, task),
                Err(err) => println!("{err}"),
            },
            Command::Apply => {
                let applied = self.library.apply_to_config();
                self.primary.apply_prompt(&applied.body, applied.name.as_deref());
                println!("Applied {} to System Prompt.", self.primary.prompt_name);
            }
            Command::Compare(command) => self.handle_compare(command),
            Command::Quit => {}
        }
    }

    fn handle_compare(&mut self, command: CompareCommand) {
        if command == CompareCommand::Show {
            self.print_compare();
            return;
        }
        match self.run_compare_command(command) {
            Ok(()) => self.print_compare(),
            Err(err) => println!("{err}"),
        }
    }

    fn run_compare_command(&mut self, command: CompareCommand) -> ApiResult<()> {
        match command {
            CompareCommand::Show => {}
            CompareCommand::Model(name) => self.compare.select_model(&name)?,
            CompareCommand::Lock => {
                self.compare.lock()?;
                spawn_task!(self, Compare, self.compare.begin_load_prompts());
            }
            CompareCommand::Unlock => self.compare.unlock()?,
            CompareCommand::Select(slot, id) => self.compare.select_prompt(slot, &id)?,
            CompareCommand::Swap => self.compare.swap()?,
            CompareCommand::Input(text) => self.compare.set_input(&text),
            CompareCommand::Run => {
                let task = self.compare.begin_run(&self.primary.params)?;
                println!("Comparing on {}…", task.request().model);
                spawn_task!(self, Compare, task);
            }
            CompareCommand::Promote(slot) => {
                let task = self.compare.begin_promote(slot)?;
                spawn_task!(self, Compare, task);
            }
        }
        Ok(())
    }

    fn apply(&mut self, event: AppEvent) {
        match event {
            AppEvent::ModelsLoaded(result) => {
                self.primary.apply_models(result);
                self.sync_compare_models();
                match &self.primary.models_error {
                    Some(message) => println!("{message}"),
                    None => self.print_models(),
                }
            }
            AppEvent::Chat(event) => {
                let finished = match &event {
                    ChatEvent::TurnFinished { placeholder, .. } => Some(*placeholder),
                    _ => None,
                };
                let copied = matches!(event, ChatEvent::CopyFinished { .. });
                match self.chat.apply(event) {
                    ChatEffect::ScheduleCopyExpiry(message_id) => {
                        self.tasks.spawn(async move {
                            AppEvent::Chat(copy_indicator_expiry(message_id).await)
                        });
                        println!("Copied.");
                    }
                    ChatEffect::None if copied => {
                        if let Some(status) = self.chat.status() {
                            println!("{status}");
                        }
                    }
                    ChatEffect::None => {}
                }
                if let Some(message) = finished.and_then(|id| self.chat.message(id)) {
                    println!("{}\n", message.content);
                }
            }
            AppEvent::Compare(event) => match self.compare.apply(event) {
                CompareOutcome::Promote(template) => self.promote(&template),
                CompareOutcome::None => self.print_compare_result(),
            },
            AppEvent::Library(event) => {
                let listed = matches!(event, LibraryEvent::ListLoaded { .. });
                let fetched = matches!(event, LibraryEvent::PromptLoaded { .. });
                let effect = self.library.apply(event);
                if effect.prompts_changed() {
                    let task = self.compare.begin_load_prompts();
                    spawn_task!(self, Compare, task);
                }
                if let LibraryEffect::Reload(task) = effect {
                    spawn_task!(self, Library, task);
                }
                self.print_library(listed, fetched);
            }
        }
    }

    fn send_chat(&mut self, text: &str) {
        let context = self.primary.chat_context();
        match self.chat.submit(text, &context) {
            Some(turn) => {
                println!("… {}", self.primary.selected_model);
                spawn_task!(self, Chat, turn);
            }
            None => {
                if let Some(status) = self.chat.status() {
                    println!("{status}");
                }
            }
        }
    }

    fn copy_message(&mut self, index: Option<usize>) {
        let target = match index {
            Some(n) => self.chat.messages().get(n - 1),
            None => self
                .chat
                .messages()
                .iter()
                .rev()
                .find(|m| m.role == Role::Assistant && m.copyable()),
        }
        .map(|m| m.id);

        let Some(task) = target.and_then(|id| self.chat.copy(id)) else {
            println!("Nothing to copy.");
            return;
        };
        let clipboard = self.clipboard.clone();
        self.tasks
            .spawn(async move { AppEvent::Chat(task.run(clipboard.as_ref()).await) });
    }

    fn set_draft_field(&mut self, field: DraftField, value: &str) {
        let result = match field {
            DraftField::Id => self.library.set_draft_id(value),
            DraftField::Name => {
                self.library.set_draft_name(value);
                Ok(())
            }
            DraftField::Tags => {
                self.library.set_draft_tags(value);
                Ok(())
            }
            DraftField::Body => {
                self.library.set_draft_body(value);
                Ok(())
            }
            DraftField::Default(key) => self.library.set_draft_default(key, value),
        };
        match result {
            Ok(()) => print_template("Draft", self.library.draft()),
            Err(err) => println!("{err}"),
        }
    }

    fn promote(&mut self, template: &PromptTemplate) {
        self.primary.promote(template);
        if let Some(notice) = self.primary.take_notice() {
            println!("{notice}");
        }
        println!("{}", params_line(&self.primary));
    }

    fn load_models(&mut self) {
        self.primary.begin_load_models();
        let client = self.client.clone();
        self.tasks
            .spawn(async move { AppEvent::ModelsLoaded(client.list_models().await) });
    }

    fn sync_compare_models(&mut self) {
        self.compare
            .sync_models(&self.primary.models, &self.primary.selected_model);
    }

    fn print_models(&self) {
        if self.primary.models.is_empty() {
            println!("No models loaded.");
            return;
        }
        for model in &self.primary.models {
            let marker = if model.name == self.primary.selected_model { "*" } else { " " };
            println!("{marker} {}", model.name);
        }
    }

    fn print_library(&self, listed: bool, fetched: bool) {
        if let Some(error) = self.library.error() {
            println!("{error}");
        }
        if !listed && !fetched {
            if let Some(status) = self.library.status() {
                println!("{status}");
            }
        }
        if listed && self.library.error().is_none() {
            if self.library.prompts().is_empty() {
                println!("No prompts found.");
            }
            for prompt in self.library.prompts() {
                let marker = if Some(prompt.id.as_str()) == self.library.selected_id() { "*" } else { " " };
                let tags = if prompt.tags.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", prompt.tags.join(", "))
                };
                println!("{marker} {}: {}{tags}", prompt.id, prompt.name);
            }
        }
        if fetched {
            if let Some(preview) = self.library.preview() {
                print_template("Preview", preview);
            }
        }
    }

    fn print_compare(&self) {
        let compare = &self.compare;
        let lock = if compare.is_locked() { "locked" } else { "unlocked" };
        let model = if compare.model().is_empty() { "(none)" } else { compare.model() };
        println!("Compare model: {model} ({lock})");
        for slot in [Slot::A, Slot::B] {
            println!(
                "  {slot}: {} ({})",
                compare.slot(slot).unwrap_or("-"),
                compare.prompt_label(slot)
            );
        }
        if !compare.input().is_empty() {
            println!("  input: {}", compare.input());
        }
        if let Some(error) = compare.list_error().or(compare.run_error()) {
            println!("  {error}");
        }
    }

    fn print_compare_result(&self) {
        if let Some(error) = self.compare.run_error() {
            println!("{error}");
        }
        for slot in [Slot::A, Slot::B] {
            if let Some(error) = &self.compare.promote_state(slot).error {
                println!("Prompt {slot}: {error}");
            }
        }
        if self.compare.response().is_none() {
            return;
        }
        for slot in [Slot::A, Slot::B] {
            let Some(result) = self.compare.result_for(slot) else {
                continue;
            };
            let latency = result
                .latency_ms
                .map(|ms| format!(" ({ms} ms)"))
                .unwrap_or_default();
            println!("── {slot}: {}{latency}", self.compare.prompt_label(slot));
            match (&result.assistant_output, &result.error) {
                (_, Some(error)) => println!("Error: {error}"),
                (Some(output), None) => println!("{output}"),
                (None, None) => println!("(no output)"),
            }
        }
    }
}

fn params_line(primary: &PrimaryConfig) -> String {
    let params = &primary.params;
    let show = |value: Option<String>| value.unwrap_or_else(|| "default".to_string());
    format!(
        "temperature={} top_p={} top_k={} max_tokens={}",
        show(params.temperature.map(|v| v.to_string())),
        show(params.top_p.map(|v| v.to_string())),
        show(params.top_k.map(|v| v.to_string())),
        show(params.max_tokens.map(|v| v.to_string())),
    )
}

fn print_template(title: &str, template: &PromptTemplate) {
    println!("{title}: {} ({})", template.label(), template.id);
    if !template.tags.is_empty() {
        println!("tags: {}", template.tags.join(", "));
    }
    if !template.model_defaults.is_empty() {
        if let Ok(defaults) = serde_json::to_string(&template.model_defaults) {
            println!("defaults: {defaults}");
        }
    }
    if let Some(updated_at) = &template.updated_at {
        println!("updated: {updated_at}");
    }
    println!("{}", template.body_md);
}
