use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use groq_ask::{
    apis::GroqApi,
    config::{load_dotenv, ServerArgs},
    init_tracing,
    service::{serve, AppState},
};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn async_main(args: ServerArgs) -> anyhow::Result<()> {
    debug!("args: {:#?}", args);
    if args.langchain_api_key.is_some() {
        info!("LANGCHAIN_API_KEY is set; tracing export is not supported and the key is ignored");
    }

    let template = args.prompt_template();
    if let Err(e) = template.input_variables() {
        warn!("system prompt does not parse, every /ask will fail: {}", e);
    }

    let api = GroqApi::new(args.groq_config()).context("failed to build HTTP client")?;
    info!("Model: {} at {}", api.model(), api.endpoint());

    let addr = args.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Listening on http://{}", listener.local_addr()?);

    let state = Arc::new(AppState::new(template, api));
    serve(listener, state, shutdown_signal(), args.shutdown_grace()).await;
    info!("Server stopped");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let dotenv = load_dotenv();
    let args = ServerArgs::parse();
    init_tracing(args.log_level.into());
    if let Some(path) = dotenv {
        info!("Loaded environment from {}", path.display());
    }
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(args.threads.max(1))
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?
        .block_on(async_main(args))
}
