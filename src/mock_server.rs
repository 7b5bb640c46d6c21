use std::net::SocketAddr;

use clap::Parser;
use groq_ask::{
    config::LogLevel,
    init_tracing,
    mock::{MockCompletionServer, MockMode},
};
use tracing::info;

/// Fake OpenAI-compatible completion endpoint for local runs.
#[derive(Parser)]
struct Args {
    /// Address to listen on.
    #[clap(long, default_value = "127.0.0.1:9000")]
    addr: SocketAddr,

    /// Answer every request with a 500.
    #[clap(long)]
    fail: bool,

    /// Answer with an empty `choices` list.
    #[clap(long, conflicts_with = "fail")]
    empty: bool,

    #[clap(long, default_value = "info", value_enum)]
    log_level: LogLevel,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_level.into());

    let server = MockCompletionServer::start(args.addr).await?;
    if args.fail {
        server.set_mode(MockMode::Fail);
    } else if args.empty {
        server.set_mode(MockMode::Empty);
    }
    info!("Point the service at --base-url {}", server.base_url());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = server.join() => {}
    }
    Ok(())
}
