//! Session over a carrier: handshake, correlated round trips, teardown.

use crate::normalize::{decode_text, normalize_tool_result, reject_error_payload};
use crate::pending::PendingTable;
use kgmem_types::{
    CallToolResult, Carrier, ClientError, InitializeResult, JsonRpcError, JsonRpcMessage,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ReadResourceResult, ResourceDescriptor,
    ToolDescriptor, ToolInvoker, METHOD_NOT_FOUND, PROTOCOL_VERSION,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Deadline for each round trip; `None` waits until the session ends.
    pub request_timeout: Option<Duration>,
    pub client_name: String,
    pub client_version: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            client_name: "kgmem".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// An open, initialized session. Cheap to share behind an `Arc`; every method takes `&self`.
///
/// Dropping the session stops its reader and releases the carrier; `close` does the same
/// and also waits for the carrier to shut down.
pub struct Session {
    carrier: Arc<dyn Carrier>,
    pending: Arc<PendingTable>,
    reader: JoinHandle<()>,
    config: SessionConfig,
    server: Option<InitializeResult>,
    closed: AtomicBool,
}

impl Session {
    /// Start the reader, run the `initialize` handshake, and return a ready session.
    /// On handshake failure everything started here is torn down again.
    pub async fn start(
        carrier: Arc<dyn Carrier>,
        config: SessionConfig,
    ) -> Result<Self, ClientError> {
        let mut session = Self::attach(carrier, config);
        match session.handshake().await {
            Ok(init) => {
                info!(
                    server = %init.server_info.name,
                    server_version = %init.server_info.version,
                    protocol = %init.protocol_version,
                    carrier = session.carrier.kind(),
                    "session initialized"
                );
                session.server = Some(init);
                Ok(session)
            }
            Err(e) => {
                warn!(error = %e, "handshake failed; tearing session down");
                if let Err(close_err) = session.close().await {
                    debug!(error = %close_err, "carrier close after failed handshake");
                }
                Err(match e {
                    ClientError::Connection(_) => e,
                    other => ClientError::Connection(format!("handshake failed: {}", other)),
                })
            }
        }
    }

    fn attach(carrier: Arc<dyn Carrier>, config: SessionConfig) -> Self {
        let pending = Arc::new(PendingTable::new());
        let reader = tokio::spawn(read_loop(Arc::clone(&carrier), Arc::clone(&pending)));
        Self {
            carrier,
            pending,
            reader,
            config,
            server: None,
            closed: AtomicBool::new(false),
        }
    }

    async fn handshake(&self) -> Result<InitializeResult, ClientError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": self.config.client_name,
                "version": self.config.client_version,
            }
        });
        let init: InitializeResult = self.request_as("initialize", Some(params)).await?;
        self.notify("notifications/initialized", None).await?;
        Ok(init)
    }

    /// Server identity from the handshake.
    pub fn server_info(&self) -> Option<&InitializeResult> {
        self.server.as_ref()
    }

    pub fn carrier_kind(&self) -> &'static str {
        self.carrier.kind()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Requests currently awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.pending.in_flight()
    }

    /// JSON-RPC round trip with the session's default deadline. Returns the raw `result`.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ClientError> {
        self.round_trip(method, params, self.config.request_timeout, method)
            .await
    }

    async fn request_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T, ClientError> {
        let raw = self.request(method, params).await?;
        serde_json::from_value(raw)
            .map_err(|e| ClientError::Protocol(format!("invalid {} result: {}", method, e)))
    }

    async fn round_trip(
        &self,
        method: &str,
        params: Option<Value>,
        deadline: Option<Duration>,
        label: &str,
    ) -> Result<Value, ClientError> {
        if self.is_closed() {
            return Err(ClientError::closed());
        }
        // `slot` releases the correlation entry on every exit path, including cancellation.
        let (slot, rx) = self.pending.register()?;
        let frame = serde_json::to_string(&JsonRpcRequest::new(slot.id(), method, params))
            .map_err(|e| ClientError::Protocol(e.to_string()))?;
        trace!(id = slot.id(), method, "sending request");

        // The deadline covers the send as well as the wait for the response.
        let exchange = async {
            self.carrier.send(frame).await?;
            rx.await.unwrap_or_else(|_| Err(ClientError::closed()))
        };
        match deadline {
            Some(after) => match tokio::time::timeout(after, exchange).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(id = slot.id(), op = label, ?after, "request timed out");
                    Err(ClientError::Timeout {
                        op: label.to_string(),
                        after,
                    })
                }
            },
            None => exchange.await,
        }
    }

    /// Fire-and-forget notification.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ClientError> {
        let frame = serde_json::to_string(&JsonRpcNotification::new(method, params))
            .map_err(|e| ClientError::Protocol(e.to_string()))?;
        self.carrier.send(frame).await.map_err(ClientError::from)
    }

    /// Call tool `op` with the session's default deadline.
    pub async fn invoke(&self, op: &str, args: Value) -> Result<Value, ClientError> {
        self.invoke_with_timeout(op, args, self.config.request_timeout)
            .await
    }

    /// Call tool `op`; `deadline` overrides the session default for this call only.
    pub async fn invoke_with_timeout(
        &self,
        op: &str,
        args: Value,
        deadline: Option<Duration>,
    ) -> Result<Value, ClientError> {
        if op.trim().is_empty() {
            return Err(ClientError::InvalidArgument(
                "operation name must not be empty".to_string(),
            ));
        }
        let arguments = match args {
            Value::Null => json!({}),
            Value::Object(_) => args,
            other => {
                return Err(ClientError::InvalidArgument(format!(
                    "arguments for '{}' must be a JSON object, got {}",
                    op, other
                )))
            }
        };
        let started = Instant::now();
        let raw = self
            .round_trip(
                "tools/call",
                Some(json!({ "name": op, "arguments": arguments })),
                deadline,
                op,
            )
            .await?;
        let result: CallToolResult = serde_json::from_value(raw).map_err(|e| {
            ClientError::Protocol(format!("invalid tools/call result for '{}': {}", op, e))
        })?;
        let value = reject_error_payload(normalize_tool_result(result)?)?;
        debug!(
            op,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "tool call completed"
        );
        Ok(value)
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ClientError> {
        let raw = self.request("tools/list", Some(json!({}))).await?;
        decode_list(raw, "tools")
    }

    pub async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, ClientError> {
        let raw = self.request("resources/list", Some(json!({}))).await?;
        decode_list(raw, "resources")
    }

    /// Read a resource; the first content's text is decoded like a tool result.
    pub async fn read_resource(&self, uri: &str) -> Result<Value, ClientError> {
        let result: ReadResourceResult = self
            .request_as("resources/read", Some(json!({ "uri": uri })))
            .await?;
        let first = result
            .contents
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::Protocol(format!("resource {} has no contents", uri)))?;
        match first.text {
            Some(text) => Ok(decode_text(text)),
            None => Ok(json!({ "uri": first.uri, "mimeType": first.mime_type })),
        }
    }

    pub async fn ping(&self) -> Result<(), ClientError> {
        self.request("ping", None).await.map(|_| ())
    }

    /// End the session: in-flight calls fail with a transport error, the carrier is closed.
    /// Safe to call more than once.
    pub async fn close(&self) -> Result<(), ClientError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.reader.abort();
        let failed = self.pending.fail_all(ClientError::closed());
        let result = self.carrier.close().await;
        info!(
            carrier = self.carrier.kind(),
            failed_in_flight = failed,
            "session closed"
        );
        result.map_err(ClientError::from)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.reader.abort();
        self.pending.fail_all(ClientError::closed());
    }
}

fn decode_list<T: DeserializeOwned>(raw: Value, key: &str) -> Result<Vec<T>, ClientError> {
    let items = raw
        .get(key)
        .cloned()
        .ok_or_else(|| ClientError::Protocol(format!("result is missing '{}'", key)))?;
    serde_json::from_value(items)
        .map_err(|e| ClientError::Protocol(format!("invalid '{}' list: {}", key, e)))
}

async fn read_loop(carrier: Arc<dyn Carrier>, pending: Arc<PendingTable>) {
    let reason = loop {
        match carrier.recv().await {
            Ok(Some(frame)) => dispatch(&carrier, &pending, &frame),
            Ok(None) => {
                break ClientError::Transport("connection closed by remote host".to_string())
            }
            Err(e) => break ClientError::Transport(e.to_string()),
        }
    };
    let failed = pending.fail_all(reason.clone());
    if failed > 0 {
        warn!(failed, error = %reason, "session ended with requests in flight");
    } else {
        debug!(error = %reason, "session reader finished");
    }
}

fn dispatch(carrier: &Arc<dyn Carrier>, pending: &PendingTable, frame: &str) {
    let message = match JsonRpcMessage::parse(frame) {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "discarding unparseable frame");
            return;
        }
    };
    match message {
        JsonRpcMessage::Response { id, outcome } => {
            let Some(n) = id.as_u64() else {
                warn!(%id, "discarding response with foreign id");
                return;
            };
            let outcome = outcome.map_err(|e| ClientError::RemoteTool {
                code: Some(e.code),
                message: e.message,
            });
            if !pending.complete(n, outcome) {
                warn!(id = n, "discarding response for unknown or abandoned request");
            }
        }
        JsonRpcMessage::Malformed { id, reason } => match id.as_u64() {
            Some(n) => {
                pending.complete(n, Err(ClientError::Protocol(reason)));
            }
            None => warn!(%reason, "discarding malformed message"),
        },
        JsonRpcMessage::Request { id, method, .. } => {
            let reply = if method == "ping" {
                JsonRpcResponse::success(id, json!({}))
            } else {
                debug!(%method, "rejecting host request");
                JsonRpcResponse::failure(
                    id,
                    JsonRpcError::new(METHOD_NOT_FOUND, format!("method not found: {}", method)),
                )
            };
            match serde_json::to_string(&reply) {
                // The reader never awaits an outbound send.
                Ok(frame) => {
                    let carrier = Arc::clone(carrier);
                    tokio::spawn(async move {
                        if let Err(e) = carrier.send(frame).await {
                            warn!(error = %e, "failed to answer host request");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "failed to encode reply"),
            }
        }
        JsonRpcMessage::Notification { method, .. } => {
            debug!(%method, "notification from host");
        }
    }
}

#[async_trait::async_trait]
impl ToolInvoker for Session {
    async fn invoke(&self, op: &str, args: Value) -> Result<Value, ClientError> {
        Session::invoke(self, op, args).await
    }

    async fn read_resource(&self, uri: &str) -> Result<Value, ClientError> {
        Session::read_resource(self, uri).await
    }

    async fn ping(&self) -> Result<(), ClientError> {
        Session::ping(self).await
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ClientError> {
        Session::list_tools(self).await
    }

    async fn close(&self) -> Result<(), ClientError> {
        Session::close(self).await
    }
}
