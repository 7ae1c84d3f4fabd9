//! Carrier selection and connection settings.

use crate::{SseCarrier, StdioCarrier};
use kgmem_types::{Carrier, CarrierError};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_SERVER_URL: &str = "http://localhost:8000/sse";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    /// Long-lived SSE stream with HTTP POST for outbound messages.
    #[default]
    Sse,
    /// Local subprocess speaking over stdin/stdout.
    Stdio,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Sse => "sse",
            TransportKind::Stdio => "stdio",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sse" | "http" | "streamed" => Ok(TransportKind::Sse),
            "stdio" | "pipe" => Ok(TransportKind::Stdio),
            other => Err(format!("unsupported transport '{}': expected sse or stdio", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub kind: TransportKind,
    /// SSE endpoint (ignored for stdio).
    pub server_url: String,
    /// Server executable for stdio.
    pub command: Option<String>,
    pub args: Vec<String>,
    /// Extra environment for the spawned server.
    pub env: Vec<(String, String)>,
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Sse,
            server_url: DEFAULT_SERVER_URL.to_string(),
            command: None,
            args: Vec::new(),
            env: Vec::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl TransportConfig {
    pub fn sse(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            kind: TransportKind::Stdio,
            command: Some(command.into()),
            args,
            ..Self::default()
        }
    }

    /// Reads `MCP_TRANSPORT`, `MCP_SERVER_URL`, `MCP_SERVER_COMMAND`, `MCP_SERVER_ARGS`
    /// and `MCP_CONNECT_TIMEOUT_SECS`, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var("MCP_TRANSPORT") {
            match raw.parse() {
                Ok(kind) => config.kind = kind,
                Err(e) => warn!("{}; using {}", e, config.kind),
            }
        }
        if let Ok(url) = std::env::var("MCP_SERVER_URL") {
            config.server_url = url;
        }
        config.command = std::env::var("MCP_SERVER_COMMAND").ok();
        if let Ok(args) = std::env::var("MCP_SERVER_ARGS") {
            config.args = args.split_whitespace().map(String::from).collect();
        }
        if let Some(t) = env_secs("MCP_CONNECT_TIMEOUT_SECS") {
            config.connect_timeout = t;
        }
        config
    }
}

/// Parse a whole-seconds duration from the environment.
pub(crate) fn env_secs(name: &str) -> Option<Duration> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(_) => {
            warn!(var = name, value = %raw, "ignoring non-numeric duration");
            None
        }
    }
}

/// Open the carrier selected by `config`.
pub async fn connect(config: &TransportConfig) -> Result<Box<dyn Carrier>, CarrierError> {
    match config.kind {
        TransportKind::Sse => {
            info!(url = %config.server_url, "connecting over sse");
            let carrier = SseCarrier::connect(&config.server_url, config.connect_timeout).await?;
            Ok(Box::new(carrier))
        }
        TransportKind::Stdio => {
            let command = config.command.as_deref().ok_or_else(|| {
                CarrierError::Connect(
                    "stdio transport needs a server command (MCP_SERVER_COMMAND)".to_string(),
                )
            })?;
            info!(command, "connecting over stdio");
            let carrier = StdioCarrier::spawn(command, &config.args, &config.env)?;
            Ok(Box::new(carrier))
        }
    }
}
