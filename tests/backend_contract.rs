//! 用 rocket 起一个假的推理后端，走真实的 reqwest transport 跑完整流程

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, TcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use rocket::config::{LogLevel, Shutdown};
use rocket::fairing::AdHoc;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{delete, get, post, put, routes, State};
use serde_json::{json, Value};
use tokio::task::JoinSet;

use local_llm_client::session::{
    ChatSession, CompareOutcome, CompareSession, LibraryEffect, PrimaryConfig, PromptLibrary,
    Slot,
};
use local_llm_client::types::{
    ChatRequest, CompareRequest, GenerationParams, ParamKey, PromptTemplate,
};
use local_llm_client::{
    ApiClient, ApiResult, ClientConfig, ErrorKind, HttpRequest, HttpResponse, ReqwestTransport,
    Transport,
};

type Reply = (Status, Json<Value>);

struct Store {
    prompts: RwLock<BTreeMap<String, PromptTemplate>>,
    models: Vec<&'static str>,
}

impl Store {
    fn knows(&self, model: &str) -> bool {
        self.models.iter().any(|m| *m == model)
    }

    fn seeded() -> Self {
        let mut prompts = BTreeMap::new();
        for (id, name, tags, body) in [
            ("concise", "Concise", vec!["style"], "Answer briefly."),
            ("friendly", "Friendly", vec!["tone"], "Be warm."),
            ("slow", "Slow", vec![], "Takes a while to load."),
        ] {
            prompts.insert(
                id.to_string(),
                PromptTemplate {
                    id: id.into(),
                    name: name.into(),
                    tags: tags.into_iter().map(String::from).collect(),
                    model_defaults: if id == "concise" {
                        GenerationParams {
                            temperature: Some(0.2),
                            max_tokens: Some(64),
                            ..Default::default()
                        }
                    } else {
                        GenerationParams::default()
                    },
                    body_md: body.into(),
                    updated_at: Some("2024-01-01T00:00:00Z".into()),
                },
            );
        }
        Self {
            prompts: RwLock::new(prompts),
            models: vec!["llama3", "qwen2"],
        }
    }
}

fn detail(status: Status, message: &str) -> Reply {
    (status, Json(json!({ "detail": message })))
}

#[get("/models")]
fn list_models(store: &State<Store>) -> Json<Value> {
    let models: Vec<Value> = store.models.iter().map(|name| json!({ "name": name })).collect();
    Json(json!({ "models": models }))
}

#[post("/chat", data = "<req>")]
fn chat(req: Json<ChatRequest>, store: &State<Store>) -> Reply {
    if !store.knows(&req.model) {
        return detail(Status::NotFound, "Model not found");
    }
    (
        Status::Ok,
        Json(json!({
            "assistant_output": format!("[{}] {} | {}", req.model, req.system_prompt, req.user_input),
            "model": req.model,
            "latency_ms": 3,
        })),
    )
}

#[get("/prompts?<query>")]
fn list_prompts(query: Option<String>, store: &State<Store>) -> Json<Value> {
    let query = query.unwrap_or_default().to_lowercase();
    let prompts: Vec<Value> = store
        .prompts
        .read()
        .values()
        .filter(|p| {
            query.is_empty()
                || p.id.to_lowercase().contains(&query)
                || p.name.to_lowercase().contains(&query)
                || p.tags.iter().any(|t| t.to_lowercase().contains(&query))
        })
        .map(|p| json!({ "id": p.id, "name": p.name, "tags": p.tags, "updated_at": p.updated_at }))
        .collect();
    Json(json!({ "prompts": prompts }))
}

#[get("/prompts/<id>")]
async fn get_prompt(id: String, store: &State<Store>) -> Reply {
    if id == "slow" {
        rocket::tokio::time::sleep(Duration::from_millis(300)).await;
    }
    match store.prompts.read().get(&id) {
        Some(prompt) => (Status::Ok, Json(json!({ "prompt": prompt }))),
        None => detail(Status::NotFound, "Prompt not found"),
    }
}

#[post("/prompts", data = "<template>")]
fn create_prompt(template: Json<PromptTemplate>, store: &State<Store>) -> Reply {
    let mut prompts = store.prompts.write();
    if prompts.contains_key(&template.id) {
        return detail(Status::Conflict, "Prompt id already exists.");
    }
    let mut template = template.into_inner();
    template.updated_at = Some("2024-02-02T00:00:00Z".into());
    prompts.insert(template.id.clone(), template.clone());
    (Status::Created, Json(json!({ "prompt": template })))
}

#[put("/prompts/<id>", data = "<template>")]
fn update_prompt(id: String, template: Json<PromptTemplate>, store: &State<Store>) -> Reply {
    let mut prompts = store.prompts.write();
    if !prompts.contains_key(&id) {
        return detail(Status::NotFound, "Prompt not found");
    }
    let mut template = template.into_inner();
    template.id = id.clone();
    template.updated_at = Some("2024-03-03T00:00:00Z".into());
    prompts.insert(id, template.clone());
    (Status::Ok, Json(json!({ "prompt": template })))
}

#[delete("/prompts/<id>")]
fn delete_prompt(id: String, store: &State<Store>) -> Result<Status, Reply> {
    match store.prompts.write().remove(&id) {
        Some(_) => Ok(Status::NoContent),
        None => Err(detail(Status::NotFound, "Prompt not found")),
    }
}

#[post("/compare", data = "<req>")]
fn compare(req: Json<CompareRequest>, store: &State<Store>) -> Reply {
    if !store.knows(&req.model) {
        return detail(Status::NotFound, "Model not found");
    }
    let prompts = store.prompts.read();
    let results: Vec<Value> = [&req.prompt_a_id, &req.prompt_b_id]
        .into_iter()
        .map(|id| match prompts.get(id) {
            Some(p) => json!({
                "prompt_id": p.id,
                "prompt_name": p.name,
                "assistant_output": format!("[{}] {}", p.name, req.user_input),
                "latency_ms": 7,
            }),
            None => json!({ "prompt_id": id, "error": "Prompt not found" }),
        })
        .collect();
    (
        Status::Ok,
        Json(json!({ "model": req.model, "input": req.user_input, "results": results })),
    )
}

fn free_port() -> u16 {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    listener.local_addr().unwrap().port()
}

/// 启动假后端，等它开始监听后返回 base url
async fn spawn_backend() -> String {
    let port = free_port();
    let config = rocket::Config {
        address: Ipv4Addr::LOCALHOST.into(),
        port,
        log_level: LogLevel::Off,
        shutdown: Shutdown {
            ctrlc: false,
            ..Default::default()
        },
        ..rocket::Config::debug_default()
    };

    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
    let server = rocket::custom(config)
        .manage(Store::seeded())
        .mount(
            "/",
            routes![
                list_models,
                chat,
                list_prompts,
                get_prompt,
                create_prompt,
                update_prompt,
                delete_prompt,
                compare,
            ],
        )
        .attach(AdHoc::on_liftoff("ready", |_| {
            Box::pin(async move {
                let _ = ready_tx.send(());
            })
        }));

    tokio::spawn(server.launch());
    ready_rx.await.expect("backend failed to start");
    format!("http://127.0.0.1:{port}")
}

async fn connect() -> ApiClient {
    let base = spawn_backend().await;
    ApiClient::new(ClientConfig::new(&base).unwrap()).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn chat_turn_round_trips_through_backend() {
    let client = connect().await;

    let mut primary = PrimaryConfig::default();
    primary.begin_load_models();
    primary.apply_models(client.list_models().await);
    assert_eq!(primary.selected_model, "llama3");

    let mut chat = ChatSession::new();
    assert!(chat.send(&client, "  hello  ", &primary.chat_context()).await);

    let messages = chat.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].content, "hello");
    assert_eq!(
        messages[1].content,
        "[llama3] You are a helpful assistant. | hello"
    );
    assert!(!messages[1].pending);
    assert!(!chat.is_sending());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn chat_error_detail_reaches_the_transcript() {
    let client = connect().await;

    let mut primary = PrimaryConfig::default();
    primary.select_model("gone").unwrap();

    let mut chat = ChatSession::new();
    chat.send(&client, "hi", &primary.chat_context()).await;

    let reply = &chat.messages()[1];
    assert!(reply.error);
    assert_eq!(reply.content, "Error: Model not found");
    assert_eq!(chat.status(), Some("Model not found"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn prompt_library_create_update_delete() {
    let client = connect().await;
    let mut library = PromptLibrary::new();

    let task = library.begin_reload();
    library.apply(task.run(&client).await);
    let ids: Vec<&str> = library.prompts().iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, ["concise", "friendly", "slow"]);

    // create
    library.new_draft();
    library.set_draft_id("formal").unwrap();
    library.set_draft_name("Formal");
    library.set_draft_tags("tone, work,");
    library.set_draft_body("Use a formal register.");
    library.set_draft_default(ParamKey::Temperature, "0.3").unwrap();
    let task = library.begin_save().unwrap();
    let LibraryEffect::Reload(reload) = library.apply(task.run(&client).await) else {
        panic!("create should reload the list");
    };
    library.apply(reload.run(&client).await);
    assert_eq!(library.status(), Some("Prompt created."));
    assert_eq!(library.selected_id(), Some("formal"));
    assert_eq!(library.draft().updated_at.as_deref(), Some("2024-02-02T00:00:00Z"));
    assert!(library.prompts().iter().any(|p| p.id == "formal"));

    // duplicate id is rejected by the backend
    library.new_draft();
    library.set_draft_id("formal").unwrap();
    library.set_draft_name("Another");
    let task = library.begin_save().unwrap();
    library.apply(task.run(&client).await);
    assert_eq!(library.error(), Some("Prompt id already exists."));

    // update
    let fetch = library.select("formal");
    library.apply(fetch.run(&client).await);
    library.edit().unwrap();
    library.set_draft_name("Formal v2");
    let task = library.begin_save().unwrap();
    library.apply(task.run(&client).await);
    assert_eq!(library.status(), Some("Prompt updated."));
    let stored = client.get_prompt("formal").await.unwrap();
    assert_eq!(stored.name, "Formal v2");
    assert_eq!(stored.tags, vec!["tone", "work"]);
    assert_eq!(stored.model_defaults.temperature, Some(0.3));

    // filtered search
    let task = library.set_query("work");
    library.apply(task.run(&client).await);
    assert_eq!(library.prompts().len(), 1);

    // delete
    let task = library.begin_delete().unwrap();
    assert_eq!(task.prompt_id(), "formal");
    let LibraryEffect::Reload(reload) = library.apply(task.run(&client).await) else {
        panic!("delete should reload the list");
    };
    library.apply(reload.run(&client).await);
    assert_eq!(library.status(), Some("Prompt deleted."));
    assert!(library.prompts().is_empty());
    assert!(library.selected_id().is_none());
    assert!(library.is_new());

    let err = client.get_prompt("formal").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HttpStatus);
    assert_eq!(err.message(), "Prompt not found");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_fetch_for_old_selection_is_ignored() {
    let client = connect().await;
    let mut library = PromptLibrary::new();

    let slow = library.select("slow");
    let fast = library.select("friendly");

    let mut tasks = JoinSet::new();
    let c = client.clone();
    tasks.spawn(async move { slow.run(&c).await });
    let c = client.clone();
    tasks.spawn(async move { fast.run(&c).await });

    while let Some(event) = tasks.join_next().await {
        library.apply(event.unwrap());
    }

    assert_eq!(library.selected_id(), Some("friendly"));
    assert_eq!(library.preview().unwrap().id, "friendly");
    assert!(!library.loading_prompt());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn compare_run_and_promote() {
    let client = connect().await;

    let mut primary = PrimaryConfig::default();
    primary.apply_models(client.list_models().await);

    let mut compare = CompareSession::new();
    compare.sync_models(&primary.models, &primary.selected_model);
    assert_eq!(compare.model(), "llama3");
    compare.select_model("qwen2").unwrap();
    compare.lock().unwrap();

    let task = compare.begin_load_prompts();
    compare.apply(task.run(&client).await);
    assert_eq!(compare.slot(Slot::A), Some("concise"));
    assert_eq!(compare.slot(Slot::B), Some("friendly"));

    compare.set_input("Explain ownership");
    let task = compare.begin_run(&primary.params).unwrap();
    assert_eq!(task.request().model, "qwen2");
    compare.apply(task.run(&client).await);

    let a = compare.result_for(Slot::A).unwrap();
    assert_eq!(a.assistant_output.as_deref(), Some("[Concise] Explain ownership"));
    assert_eq!(compare.prompt_label(Slot::B), "Friendly");

    let task = compare.begin_promote(Slot::A).unwrap();
    let CompareOutcome::Promote(template) = compare.apply(task.run(&client).await) else {
        panic!("promote should hand back the template");
    };
    primary.promote(&template);
    assert_eq!(primary.system_prompt, "Answer briefly.");
    assert_eq!(primary.prompt_name, "Concise");
    assert_eq!(primary.params.temperature, Some(0.2));
    assert_eq!(primary.params.top_p, Some(0.9));
    assert_eq!(primary.params.max_tokens, Some(64));
    assert_eq!(
        primary.take_notice().as_deref(),
        Some("Applied Concise to System Prompt.")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn library_delete_refreshes_compare_slots() {
    let client = connect().await;

    let mut primary = PrimaryConfig::default();
    primary.apply_models(client.list_models().await);

    let mut compare = CompareSession::new();
    compare.sync_models(&primary.models, &primary.selected_model);
    compare.lock().unwrap();
    let task = compare.begin_load_prompts();
    compare.apply(task.run(&client).await);
    compare.set_input("Hi");
    let task = compare.begin_run(&primary.params).unwrap();
    compare.apply(task.run(&client).await);
    assert_eq!(compare.slot(Slot::B), Some("friendly"));
    assert!(compare.response().is_some());

    let mut library = PromptLibrary::new();
    let task = library.begin_reload();
    library.apply(task.run(&client).await);
    let fetch = library.select("friendly");
    library.apply(fetch.run(&client).await);
    let task = library.begin_delete().unwrap();
    assert_eq!(task.prompt_id(), "friendly");

    let effect = library.apply(task.run(&client).await);
    assert!(effect.prompts_changed());
    let LibraryEffect::Reload(reload) = effect else {
        panic!("delete should reload the list");
    };
    library.apply(reload.run(&client).await);
    let task = compare.begin_load_prompts();
    compare.apply(task.run(&client).await);

    let ids: Vec<&str> = compare.prompts().iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, ["concise", "slow"]);
    assert_eq!(compare.slot(Slot::A), Some("concise"));
    assert_eq!(compare.slot(Slot::B), Some("slow"));
    assert!(compare.response().is_none());
    assert!(compare.can_run());
}

/// 统计实际发出次数的 transport 包装
struct CountingTransport {
    inner: ReqwestTransport,
    calls: AtomicUsize,
}

#[async_trait]
impl Transport for CountingTransport {
    async fn send(&self, request: HttpRequest) -> ApiResult<HttpResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.send(request).await
    }
}

#[tokio::test]
async fn network_failure_is_retried_then_reported() {
    // 端口释放后没有人监听
    let port = free_port();
    let config = ClientConfig::new(&format!("http://127.0.0.1:{port}"))
        .unwrap()
        .with_max_retries(2)
        .with_retry_backoff(Duration::from_millis(10));
    let transport = Arc::new(CountingTransport {
        inner: ReqwestTransport::new(&config.user_agent).unwrap(),
        calls: AtomicUsize::new(0),
    });
    let client = ApiClient::with_transport(config, transport.clone());

    let err = client.list_models().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(err.message().starts_with("Unable to reach backend"));
    assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn http_errors_are_not_retried() {
    let base = spawn_backend().await;
    let config = ClientConfig::new(&base).unwrap().with_max_retries(3);
    let transport = Arc::new(CountingTransport {
        inner: ReqwestTransport::new(&config.user_agent).unwrap(),
        calls: AtomicUsize::new(0),
    });
    let client = ApiClient::with_transport(config, transport.clone());

    let err = client.delete_prompt("missing").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HttpStatus);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
}
