//! In-memory knowledge-graph memory host over stdio or SSE.

use clap::{Parser, ValueEnum};
use kgmem_host::{serve_lines, sse, GraphHost};
use std::net::SocketAddr;
use tokio::io::BufReader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Transport {
    Stdio,
    Sse,
}

#[derive(Parser, Debug)]
#[command(name = "kgmem-fake-host", version, about = "In-memory knowledge-graph memory host")]
struct Args {
    #[arg(long, value_enum, default_value_t = Transport::Stdio)]
    transport: Transport,

    /// Listen address for SSE.
    #[arg(long, env = "KGMEM_HOST_BIND", default_value = "127.0.0.1:8000")]
    bind: SocketAddr,

    /// Queue episodes without processing them.
    #[arg(long)]
    paused: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // stdout carries protocol frames in stdio mode, so logs go to stderr.
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let host = GraphHost::new(args.paused);
    match args.transport {
        Transport::Stdio => {
            tracing::info!(paused = args.paused, "serving on stdio");
            serve_lines(host, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await?;
        }
        Transport::Sse => {
            let app = sse::router(sse::SseState::new(host));
            let listener = tokio::net::TcpListener::bind(args.bind).await?;
            tracing::info!("fake host listening on http://{}/sse", listener.local_addr()?);
            axum::serve(listener, app.into_make_service()).await?;
        }
    }
    Ok(())
}
