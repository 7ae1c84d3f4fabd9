//! kgmem: command-line client for a knowledge-graph memory host.

mod cli;
mod commands;

use clap::Parser;
use kgmem_client::MemoryClient;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = cli::Cli::parse();
    commands::precheck(&args.command)?;
    let config = args.client_config();
    let client = MemoryClient::connect(&config).await?;

    let outcome = commands::run(&client, args.command).await;
    if let Err(e) = client.close().await {
        tracing::warn!(error = %e, "error while closing session");
    }
    println!("{}", serde_json::to_string_pretty(&outcome?)?);
    Ok(())
}
