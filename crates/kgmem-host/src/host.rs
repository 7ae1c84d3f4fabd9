//! Protocol front of the fake host: JSON-RPC dispatch and the memory tools.
//!
//! Tool output is encoded the way the real memory server encodes it: results are JSON
//! text blocks, a list result is split into one block per item, and tool-level failures
//! are `{"error": "..."}` payloads rather than protocol errors.

use crate::graph::{GraphError, InMemoryGraph, PendingEpisode, DEFAULT_GROUP};
use crate::queue::IngestQueue;
use chrono::{DateTime, Utc};
use kgmem_types::{
    CallToolResult, ContentBlock, EpisodeSource, GetEpisodesRequest, Implementation,
    InitializeResult, JsonRpcError, JsonRpcMessage, JsonRpcResponse, ReadResourceResult,
    ResourceContents, ResourceDescriptor, SearchFactsRequest, SearchNodesRequest,
    ToolDescriptor, INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND, PROTOCOL_VERSION,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const STATUS_URI: &str = "http://graphiti/status";
const INVALID_REQUEST: i64 = -32600;

#[derive(Debug, Deserialize)]
struct AddMemoryArgs {
    name: String,
    episode_body: String,
    #[serde(default)]
    group_id: Option<String>,
    #[serde(default = "default_source")]
    source: String,
    #[serde(default)]
    source_description: String,
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    reference_time: Option<DateTime<Utc>>,
}

fn default_source() -> String {
    EpisodeSource::Text.as_str().to_string()
}

#[derive(Debug, Deserialize)]
struct UuidArgs {
    uuid: String,
}

/// In-process knowledge-graph memory host.
pub struct GraphHost {
    graph: Arc<InMemoryGraph>,
    queue: IngestQueue,
}

impl GraphHost {
    /// New host with an empty graph. With `paused`, ingestion waits for [`GraphHost::resume`].
    pub fn new(paused: bool) -> Arc<Self> {
        let graph = Arc::new(InMemoryGraph::new());
        let queue = IngestQueue::new(Arc::clone(&graph), paused);
        Arc::new(Self { graph, queue })
    }

    pub fn graph(&self) -> &InMemoryGraph {
        &self.graph
    }

    pub fn queue(&self) -> &IngestQueue {
        &self.queue
    }

    pub fn pause(&self) {
        self.queue.pause();
    }

    pub fn resume(&self) {
        self.queue.resume();
    }

    /// Wait until all queued episodes are in the graph.
    pub async fn settle(&self) {
        self.queue.wait_idle().await;
    }

    /// Handle one inbound frame; returns the reply frame, if any.
    pub async fn handle_frame(&self, frame: &str) -> Option<String> {
        let reply = match JsonRpcMessage::parse(frame) {
            Ok(JsonRpcMessage::Request { id, method, params }) => {
                Some(self.handle_request(id, &method, params).await)
            }
            Ok(JsonRpcMessage::Notification { method, .. }) => {
                debug!(%method, "notification");
                None
            }
            Ok(JsonRpcMessage::Response { id, .. }) => {
                debug!(%id, "ignoring response from client");
                None
            }
            Ok(JsonRpcMessage::Malformed { id, reason }) if !id.is_null() => Some(
                JsonRpcResponse::failure(id, JsonRpcError::new(INVALID_REQUEST, reason)),
            ),
            Ok(JsonRpcMessage::Malformed { reason, .. }) => {
                warn!(%reason, "dropping malformed frame");
                None
            }
            Err(e) => {
                warn!(error = %e, "dropping unparseable frame");
                None
            }
        };
        reply.and_then(|r| match serde_json::to_string(&r) {
            Ok(s) => Some(s),
            Err(e) => {
                warn!(error = %e, "failed to encode reply");
                None
            }
        })
    }

    async fn handle_request(
        &self,
        id: Value,
        method: &str,
        params: Option<Value>,
    ) -> JsonRpcResponse {
        let params = params.unwrap_or_else(|| json!({}));
        let outcome = match method {
            "initialize" => to_result(initialize_result()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": tool_descriptors() })),
            "tools/call" => self.call_tool(&params).await,
            "resources/list" => Ok(json!({ "resources": resource_descriptors() })),
            "resources/read" => self.read_resource(&params).await,
            other => Err(JsonRpcError::new(
                METHOD_NOT_FOUND,
                format!("Method not found: {}", other),
            )),
        };
        match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::failure(id, error),
        }
    }

    async fn call_tool(&self, params: &Value) -> Result<Value, JsonRpcError> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| JsonRpcError::new(INVALID_PARAMS, "tools/call requires a tool name"))?;
        let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
        let result = match self.run_tool(name, args).await {
            Ok(output) => encode_output(output),
            Err(message) => CallToolResult {
                content: vec![ContentBlock::text(message)],
                is_error: true,
                structured_content: None,
            },
        };
        to_result(result)
    }

    /// `Err` is a tool failure reported with `isError`; domain errors are `Ok({"error": ..})`.
    async fn run_tool(&self, name: &str, args: Value) -> Result<Value, String> {
        debug!(tool = name, "tool call");
        match name {
            "add_memory" => {
                let a: AddMemoryArgs = parse_args(name, args)?;
                Ok(self.add_memory(a))
            }
            "search_memory_nodes" => {
                let a: SearchNodesRequest = parse_args(name, args)?;
                let nodes = self
                    .graph
                    .search_nodes(
                        &a.query,
                        a.max_nodes as usize,
                        a.group_ids.as_deref(),
                        a.center_node_uuid.as_deref(),
                        a.entity.as_deref(),
                    )
                    .await;
                Ok(if nodes.is_empty() {
                    json!({ "message": "No relevant nodes found", "nodes": [] })
                } else {
                    json!({ "message": "Nodes retrieved successfully", "nodes": nodes })
                })
            }
            "search_memory_facts" => {
                let a: SearchFactsRequest = parse_args(name, args)?;
                let facts = self
                    .graph
                    .search_facts(
                        &a.query,
                        a.max_facts as usize,
                        a.group_ids.as_deref(),
                        a.center_node_uuid.as_deref(),
                    )
                    .await;
                Ok(if facts.is_empty() {
                    json!({ "message": "No relevant facts found", "facts": [] })
                } else {
                    json!({ "message": "Facts retrieved successfully", "facts": facts })
                })
            }
            "get_entity_edge" => {
                let a: UuidArgs = parse_args(name, args)?;
                Ok(match self.graph.get_edge(&a.uuid).await {
                    Ok(edge) => json!(edge),
                    Err(e) => tool_error("getting entity edge", e),
                })
            }
            "delete_entity_edge" => {
                let a: UuidArgs = parse_args(name, args)?;
                Ok(match self.graph.delete_edge(&a.uuid).await {
                    Ok(()) => json!({
                        "message": format!("Entity edge with UUID {} deleted successfully", a.uuid)
                    }),
                    Err(e) => tool_error("deleting entity edge", e),
                })
            }
            "get_episodes" => {
                let a: GetEpisodesRequest = parse_args(name, args)?;
                let episodes = self
                    .graph
                    .episodes(a.group_id.as_deref(), a.last_n as usize)
                    .await;
                Ok(if episodes.is_empty() {
                    json!({
                        "message": format!(
                            "No episodes found for group {}",
                            a.group_id.as_deref().unwrap_or(DEFAULT_GROUP)
                        ),
                        "episodes": []
                    })
                } else {
                    json!(episodes)
                })
            }
            "delete_episode" => {
                let a: UuidArgs = parse_args(name, args)?;
                Ok(match self.graph.delete_episode(&a.uuid).await {
                    Ok(()) => json!({
                        "message": format!("Episode with UUID {} deleted successfully", a.uuid)
                    }),
                    Err(e) => tool_error("deleting episode", e),
                })
            }
            "clear_graph" => {
                self.graph.clear().await;
                info!("graph cleared");
                Ok(json!({ "message": "Graph cleared successfully and indices rebuilt" }))
            }
            other => Err(format!("Unknown tool: {}", other)),
        }
    }

    fn add_memory(&self, a: AddMemoryArgs) -> Value {
        let source = match a.source.parse::<EpisodeSource>() {
            Ok(s) => s,
            Err(e) => return json!({ "error": format!("Error queuing episode task: {}", e) }),
        };
        let episode = PendingEpisode {
            uuid: a.uuid.unwrap_or_else(|| Uuid::new_v4().to_string()),
            name: a.name.clone(),
            content: a.episode_body,
            source,
            source_description: a.source_description,
            group_id: a.group_id.unwrap_or_else(|| DEFAULT_GROUP.to_string()),
            reference_time: a.reference_time,
        };
        match self.queue.submit(episode) {
            Ok(position) => json!({
                "message": format!(
                    "Episode '{}' queued for processing (position: {})",
                    a.name, position
                )
            }),
            Err(e) => json!({ "error": format!("Error queuing episode task: {}", e) }),
        }
    }

    async fn read_resource(&self, params: &Value) -> Result<Value, JsonRpcError> {
        let uri = params
            .get("uri")
            .and_then(Value::as_str)
            .ok_or_else(|| JsonRpcError::new(INVALID_PARAMS, "resources/read requires a uri"))?;
        if uri != STATUS_URI {
            return Err(JsonRpcError::new(
                INVALID_PARAMS,
                format!("Unknown resource: {}", uri),
            ));
        }
        let (episodes, nodes, edges) = self.graph.counts().await;
        let status = json!({
            "status": "ok",
            "message": "Graphiti MCP server is running and connected to the in-memory graph",
            "queue_depth": self.queue.depth(),
            "episodes": episodes,
            "nodes": nodes,
            "edges": edges,
        });
        let result = ReadResourceResult {
            contents: vec![ResourceContents {
                uri: STATUS_URI.to_string(),
                mime_type: Some("application/json".to_string()),
                text: Some(status.to_string()),
                blob: None,
            }],
        };
        to_result(result)
    }
}

fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T, String> {
    serde_json::from_value(args).map_err(|e| format!("Invalid arguments for {}: {}", tool, e))
}

fn tool_error(action: &str, e: GraphError) -> Value {
    let message = match e {
        GraphError::NotFound { kind, uuid } => format!("{} {} not found", kind, uuid),
    };
    json!({ "error": format!("Error {}: {}", action, message) })
}

/// Lists become one text block per item; anything else is a single block.
fn encode_output(output: Value) -> CallToolResult {
    let content = match output {
        Value::Array(items) => items
            .into_iter()
            .map(|item| ContentBlock::text(item.to_string()))
            .collect(),
        other => vec![ContentBlock::text(other.to_string())],
    };
    CallToolResult {
        content,
        is_error: false,
        structured_content: None,
    }
}

fn initialize_result() -> InitializeResult {
    InitializeResult {
        protocol_version: PROTOCOL_VERSION.to_string(),
        server_info: Implementation {
            name: "kgmem-fake-host".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        capabilities: json!({ "tools": {}, "resources": {} }),
        instructions: Some(
            "In-memory knowledge-graph memory host. Episodes are processed asynchronously."
                .to_string(),
        ),
    }
}

fn to_result<T: serde::Serialize>(value: T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| JsonRpcError::new(INTERNAL_ERROR, e.to_string()))
}

fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({ "type": "object", "properties": properties, "required": required })
}

fn tool_descriptors() -> Vec<ToolDescriptor> {
    let tool = |name: &str, description: &str, schema: Value| ToolDescriptor {
        name: name.to_string(),
        description: Some(description.to_string()),
        input_schema: schema,
    };
    let uuid_schema = || object_schema(json!({ "uuid": { "type": "string" } }), &["uuid"]);
    vec![
        tool(
            "add_memory",
            "Add an episode to memory. Processing happens in the background.",
            object_schema(
                json!({
                    "name": { "type": "string" },
                    "episode_body": { "type": "string" },
                    "group_id": { "type": "string" },
                    "source": { "type": "string", "enum": ["text", "json", "message"] },
                    "source_description": { "type": "string" },
                    "uuid": { "type": "string" },
                    "reference_time": { "type": "string", "format": "date-time" }
                }),
                &["name", "episode_body"],
            ),
        ),
        tool(
            "search_memory_nodes",
            "Search the graph for relevant entity nodes.",
            object_schema(
                json!({
                    "query": { "type": "string" },
                    "max_nodes": { "type": "integer", "default": 10 },
                    "group_ids": { "type": "array", "items": { "type": "string" } },
                    "center_node_uuid": { "type": "string" },
                    "entity": { "type": "string" }
                }),
                &["query"],
            ),
        ),
        tool(
            "search_memory_facts",
            "Search the graph for relevant facts.",
            object_schema(
                json!({
                    "query": { "type": "string" },
                    "max_facts": { "type": "integer", "default": 10 },
                    "group_ids": { "type": "array", "items": { "type": "string" } },
                    "center_node_uuid": { "type": "string" }
                }),
                &["query"],
            ),
        ),
        tool("get_entity_edge", "Get an entity edge by its UUID.", uuid_schema()),
        tool("delete_entity_edge", "Delete an entity edge from the graph.", uuid_schema()),
        tool(
            "get_episodes",
            "Get the most recent episodes for a group.",
            object_schema(
                json!({
                    "group_id": { "type": "string" },
                    "last_n": { "type": "integer", "default": 10 }
                }),
                &[],
            ),
        ),
        tool("delete_episode", "Delete an episode from the graph.", uuid_schema()),
        tool(
            "clear_graph",
            "Clear all data from the graph.",
            object_schema(json!({}), &[]),
        ),
    ]
}

fn resource_descriptors() -> Vec<ResourceDescriptor> {
    vec![ResourceDescriptor {
        uri: STATUS_URI.to_string(),
        name: "status".to_string(),
        description: Some("Host and graph status".to_string()),
        mime_type: Some("application/json".to_string()),
    }]
}
