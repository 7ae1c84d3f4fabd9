//! Command-line arguments.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use kgmem_client::{ClientConfig, EpisodeSource, TransportKind};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "kgmem", version, about = "Knowledge-graph memory client")]
pub struct Cli {
    /// Carrier to the host: sse or stdio.
    #[arg(long, env = "MCP_TRANSPORT")]
    pub transport: Option<TransportKind>,

    /// SSE endpoint of the host.
    #[arg(long, env = "MCP_SERVER_URL")]
    pub server_url: Option<String>,

    /// Host executable for the stdio carrier.
    #[arg(long = "command", env = "MCP_SERVER_COMMAND")]
    pub server_command: Option<String>,

    /// Argument for the stdio host executable; repeat for several.
    #[arg(long = "arg", allow_hyphen_values = true)]
    pub server_args: Vec<String>,

    /// Per-request deadline in seconds; 0 waits indefinitely. Overrides
    /// `MCP_REQUEST_TIMEOUT_SECS`.
    #[arg(long)]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Run through status, ingestion, search and listing against the host.
    Demo,
    /// Host health.
    Status,
    /// Tools the host offers.
    Tools,
    /// Queue an episode for ingestion.
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        body: String,
        /// text, json or message; defaults to text.
        #[arg(long)]
        source: Option<EpisodeSource>,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        group_id: Option<String>,
        /// RFC 3339 timestamp the episode refers to.
        #[arg(long)]
        reference_time: Option<DateTime<Utc>>,
        #[arg(long)]
        uuid: Option<String>,
        /// Poll until the episode has been processed.
        #[arg(long)]
        wait: bool,
    },
    SearchNodes {
        query: String,
        #[arg(long, default_value_t = 10)]
        max: u32,
        #[arg(long = "group")]
        groups: Vec<String>,
        #[arg(long)]
        center: Option<String>,
        /// Entity type filter.
        #[arg(long)]
        entity: Option<String>,
    },
    SearchFacts {
        query: String,
        #[arg(long, default_value_t = 10)]
        max: u32,
        #[arg(long = "group")]
        groups: Vec<String>,
        #[arg(long)]
        center: Option<String>,
    },
    GetEdge {
        uuid: String,
    },
    DeleteEdge {
        uuid: String,
    },
    Episodes {
        #[arg(long)]
        group_id: Option<String>,
        #[arg(long, default_value_t = 10)]
        last_n: u32,
    },
    DeleteEpisode {
        uuid: String,
    },
    /// Delete all graph data. Irreversible.
    Clear {
        #[arg(long)]
        yes: bool,
    },
}

impl Cli {
    /// Flags win over the environment defaults read by [`ClientConfig::from_env`].
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::from_env();
        if let Some(kind) = self.transport {
            config.transport.kind = kind;
        }
        if let Some(ref url) = self.server_url {
            config.transport.server_url = url.clone();
        }
        if let Some(ref command) = self.server_command {
            config.transport.command = Some(command.clone());
        }
        if !self.server_args.is_empty() {
            config.transport.args = self.server_args.clone();
        }
        if let Some(secs) = self.timeout {
            config.session.request_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        config
    }
}
