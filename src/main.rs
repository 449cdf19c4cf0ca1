mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use local_llm_client::{ApiClient, ClientConfig};

use cli::app::App;
use cli::clipboard::SystemClipboard;

#[derive(Parser, Debug)]
#[command(name = "local-llm-client")]
#[command(about = "Terminal client for a local LLM inference backend", long_about = None)]
#[command(version)]
struct Args {
    /// Backend base URL (overrides LLM_CLIENT_BASE_URL)
    #[arg(short, long, value_name = "URL")]
    base_url: Option<String>,

    /// Extra attempts after a network failure (overrides LLM_CLIENT_MAX_RETRIES)
    #[arg(short, long, value_name = "N")]
    retries: Option<u32>,

    /// Model to select for chat before the model list arrives
    #[arg(short, long)]
    model: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 日志写 stderr，不和对话输出混在一起
    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = ClientConfig::from_env().context("invalid client configuration in environment")?;
    if let Some(base_url) = args.base_url.as_deref() {
        config = config
            .with_base_url(base_url)
            .with_context(|| format!("invalid --base-url `{base_url}`"))?;
    }
    if let Some(retries) = args.retries {
        config = config.with_max_retries(retries);
    }
    info!(base_url = %config.base_url, max_retries = config.max_retries, "starting client");

    let client = ApiClient::new(config).context("failed to build HTTP client")?;
    let clipboard = Arc::new(SystemClipboard::detect());

    App::new(client, clipboard, args.model).run().await
}
