use anyhow::Result;
use axum::Router;
use clap::Parser;
use server::llm::{LlmConfig, RetryConfig, DEFAULT_API_BASE, DEFAULT_CHAT_MODEL};
use server::{build_app, AppConfig};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "server", about = "Retrieval-augmented chat service")]
struct Args {
    /// Index artifact written by `indexer build`
    #[arg(long, env = "INDEX_PATH", default_value = "./data/bm25_index.bin")]
    index: String,
    /// Documents retrieved per chat message
    #[arg(long, env = "TOP_K", default_value_t = 4)]
    top_k: usize,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
    /// Chat-completions API key; answers echo the prompt when unset
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,
    #[arg(long, env = "OPENAI_API_BASE", default_value = DEFAULT_API_BASE)]
    openai_api_base: String,
    #[arg(long, env = "OPENAI_CHAT_MODEL", default_value = DEFAULT_CHAT_MODEL)]
    openai_chat_model: String,
    /// Language-model request timeout
    #[arg(long, default_value_t = 30)]
    llm_timeout_secs: u64,
    /// Token required by admin endpoints (X-ADMIN-TOKEN)
    #[arg(long, env = "ADMIN_TOKEN", hide_env_values = true)]
    admin_token: Option<String>,
    /// Comma-separated CORS origins
    #[arg(long, env = "CORS_ALLOW_ORIGIN")]
    cors_allow_origin: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; real environment variables still apply.
    dotenvy::dotenv().ok();
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let config = AppConfig {
        index_path: args.index.into(),
        top_k: args.top_k,
        llm: LlmConfig {
            api_base: args.openai_api_base,
            model: args.openai_chat_model,
            api_key: args.openai_api_key,
            timeout: Duration::from_secs(args.llm_timeout_secs),
            retry: RetryConfig::default(),
        },
        admin_token: args.admin_token,
        cors_allow_origin: args.cors_allow_origin,
    };
    let app: Router = build_app(config)?;

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
