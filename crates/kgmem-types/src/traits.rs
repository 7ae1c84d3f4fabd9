//! Traits for transport carriers and tool invocation, and the error taxonomy.

use crate::ToolDescriptor;
use async_trait::async_trait;
use std::time::Duration;

/// Bidirectional message channel to the remote tool host.
///
/// Opening is the implementor's constructor. One frame is one JSON-RPC message.
#[async_trait]
pub trait Carrier: Send + Sync {
    /// Short label for logs ("sse", "stdio", "channel").
    fn kind(&self) -> &'static str;

    /// Send one frame. Must not wait for any response.
    async fn send(&self, message: String) -> Result<(), CarrierError>;

    /// Next inbound frame; `Ok(None)` once the channel is closed.
    async fn recv(&self) -> Result<Option<String>, CarrierError>;

    /// Release sockets, pipes and processes. Idempotent.
    async fn close(&self) -> Result<(), CarrierError>;
}

/// Named-operation round trips against the remote host, results already normalized.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Call tool `op` with `args` (a JSON object). Returns the decoded result value.
    async fn invoke(
        &self,
        op: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, ClientError>;

    /// Read a resource by uri; text contents are decoded like tool results.
    async fn read_resource(&self, uri: &str) -> Result<serde_json::Value, ClientError>;

    /// Liveness probe.
    async fn ping(&self) -> Result<(), ClientError>;

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ClientError>;

    /// Tear down the underlying session. Idempotent.
    async fn close(&self) -> Result<(), ClientError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CarrierError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("failed to spawn server process: {0}")]
    Spawn(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("carrier closed")]
    Closed,
}

/// Every failure a client call can surface.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClientError {
    /// Session could not be established.
    #[error("connection error: {0}")]
    Connection(String),
    /// Session failed or closed mid-use.
    #[error("transport error: {0}")]
    Transport(String),
    #[error("no response to '{op}' within {after:?}")]
    Timeout { op: String, after: Duration },
    /// Malformed or uncorrelatable response.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The host reported that the operation failed.
    #[error("remote tool error: {message}")]
    RemoteTool { code: Option<i64>, message: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl ClientError {
    pub fn closed() -> Self {
        ClientError::Transport("session closed".to_string())
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, ClientError::Transport(_))
    }
}

impl From<CarrierError> for ClientError {
    fn from(e: CarrierError) -> Self {
        match e {
            CarrierError::Connect(_) | CarrierError::Spawn(_) => {
                ClientError::Connection(e.to_string())
            }
            CarrierError::Closed => ClientError::closed(),
            other => ClientError::Transport(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carrier_errors_map_to_client_kinds() {
        let e: ClientError = CarrierError::Spawn("no such file".into()).into();
        assert!(matches!(e, ClientError::Connection(_)));
        let e: ClientError = CarrierError::Closed.into();
        assert!(e.is_transport());
        let e: ClientError = CarrierError::Http("502".into()).into();
        assert!(e.is_transport());
    }
}
