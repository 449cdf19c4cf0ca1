//! 终端输入解析：普通文本即聊天，`/` 开头的是命令

use local_llm_client::session::Slot;
use local_llm_client::types::ParamKey;

pub const HELP: &str = "\
Chat:
  <text>                  send a chat message
  /models                 reload the model list
  /model [name]           show or select the chat model
  /system [text]          show or replace the system prompt
  /param <key> [value]    set a generation parameter (empty value = backend default)
  /clear                  clear the transcript (run twice to confirm)
  /cancel                 cancel a pending clear
  /copy [n]               copy message n (default: last reply)
Prompt library:
  /prompts [query]        search saved prompts
  /show <id>              preview a prompt
  /new                    start a new draft
  /edit                   copy the previewed prompt into the draft
  /set <field> <value>    field: id, name, tags, body, or a parameter key
  /save                   create or update the draft
  /delete                 delete the edited or previewed prompt
  /apply                  use the draft as the system prompt
Compare:
  /cmp                    show compare state
  /cmp model <name>       choose the compare model (while unlocked)
  /cmp lock | unlock
  /cmp a <id> | b <id>    choose prompt A or B
  /cmp swap
  /cmp input <text>
  /cmp run
  /cmp promote a|b        apply a compared prompt to the system prompt
/help, /quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Chat(String),
    Help,
    Models,
    Model(Option<String>),
    System(Option<String>),
    Param { key: ParamKey, value: String },
    Clear,
    Cancel,
    Copy(Option<usize>),
    Prompts(String),
    Show(String),
    New,
    Edit,
    Set { field: DraftField, value: String },
    Save,
    Delete,
    Apply,
    Compare(CompareCommand),
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftField {
    Id,
    Name,
    Tags,
    Body,
    Default(ParamKey),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompareCommand {
    Show,
    Model(String),
    Lock,
    Unlock,
    Select(Slot, String),
    Swap,
    Input(String),
    Run,
    Promote(Slot),
}

pub fn parse(line: &str) -> Result<Command, String> {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(rest) = line.trim_start().strip_prefix('/') else {
        return Ok(Command::Chat(line.to_string()));
    };

    let (name, args) = split_word(rest);
    let command = match name {
        "help" | "h" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        "models" => Command::Models,
        "model" => Command::Model(optional(args)),
        "system" => Command::System(optional(args).map(unescape)),
        "param" => {
            let (key, value) = split_word(args);
            let key = parse_param(key)?;
            Command::Param {
                key,
                value: value.to_string(),
            }
        }
        "clear" => Command::Clear,
        "cancel" => Command::Cancel,
        "copy" => match optional(args) {
            None => Command::Copy(None),
            Some(n) => Command::Copy(Some(
                n.parse::<usize>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| format!("`{n}` is not a message number"))?,
            )),
        },
        "prompts" => Command::Prompts(args.trim().to_string()),
        "show" => Command::Show(required(args, "/show <id>")?),
        "new" => Command::New,
        "edit" => Command::Edit,
        "set" => {
            let (field, value) = split_word(args);
            let field = match field {
                "id" => DraftField::Id,
                "name" => DraftField::Name,
                "tags" => DraftField::Tags,
                "body" => DraftField::Body,
                "" => return Err("usage: /set <field> <value>".to_string()),
                other => DraftField::Default(parse_param(other)?),
            };
            let value = match field {
                DraftField::Body => unescape(value.to_string()),
                _ => value.to_string(),
            };
            Command::Set { field, value }
        }
        "save" => Command::Save,
        "delete" => Command::Delete,
        "apply" => Command::Apply,
        "cmp" | "compare" => Command::Compare(parse_compare(args)?),
        other => return Err(format!("unknown command `/{other}`, try /help")),
    };
    Ok(command)
}

fn parse_compare(args: &str) -> Result<CompareCommand, String> {
    let (sub, rest) = split_word(args);
    let command = match sub {
        "" | "show" => CompareCommand::Show,
        "model" => CompareCommand::Model(required(rest, "/cmp model <name>")?),
        "lock" => CompareCommand::Lock,
        "unlock" => CompareCommand::Unlock,
        "a" => CompareCommand::Select(Slot::A, required(rest, "/cmp a <id>")?),
        "b" => CompareCommand::Select(Slot::B, required(rest, "/cmp b <id>")?),
        "swap" => CompareCommand::Swap,
        // 输入允许为空，由 run 去校验
        "input" => CompareCommand::Input(rest.trim().to_string()),
        "run" => CompareCommand::Run,
        "promote" => match rest.trim() {
            "a" | "A" => CompareCommand::Promote(Slot::A),
            "b" | "B" => CompareCommand::Promote(Slot::B),
            _ => return Err("usage: /cmp promote a|b".to_string()),
        },
        other => return Err(format!("unknown compare command `{other}`, try /help")),
    };
    Ok(command)
}

fn parse_param(name: &str) -> Result<ParamKey, String> {
    ParamKey::parse(name).ok_or_else(|| {
        let known: Vec<&str> = ParamKey::ALL.iter().map(|k| k.as_str()).collect();
        format!("unknown parameter `{name}` (expected one of {})", known.join(", "))
    })
}

fn split_word(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.find(char::is_whitespace) {
        Some(at) => (&text[..at], text[at..].trim_start()),
        None => (text, ""),
    }
}

fn optional(args: &str) -> Option<String> {
    let args = args.trim();
    (!args.is_empty()).then(|| args.to_string())
}

fn required(args: &str, usage: &str) -> Result<String, String> {
    optional(args).ok_or_else(|| format!("usage: {usage}"))
}

/// 单行输入里用 `\n` 表示换行
fn unescape(text: String) -> String {
    text.replace("\\n", "\n")
}
