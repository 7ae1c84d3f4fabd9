//! MemoryClient: typed graph operations over a tool invoker.

use crate::config::ClientConfig;
use crate::decode::{ack, decode_list, decode_one, message_of};
use kgmem_session::Session;
use kgmem_types::*;
use serde_json::{json, Value};
use std::cmp::Reverse;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Resource the host publishes its health under.
pub const STATUS_RESOURCE_URI: &str = "http://graphiti/status";

/// Client for the remote knowledge-graph memory host.
///
/// The client keeps no graph state and no cache: every read goes to the host, and
/// nothing is retried automatically.
pub struct MemoryClient<I = Session> {
    invoker: I,
}

impl MemoryClient<Session> {
    /// Open the configured carrier and complete the session handshake.
    pub async fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        let carrier = kgmem_transport::connect(&config.transport).await?;
        let session = Session::start(Arc::from(carrier), config.session.clone()).await?;
        info!(transport = %config.transport.kind, "memory client connected");
        Ok(Self::new(session))
    }
}

impl<I: ToolInvoker> MemoryClient<I> {
    pub fn new(invoker: I) -> Self {
        Self { invoker }
    }

    pub fn invoker(&self) -> &I {
        &self.invoker
    }

    /// Release the underlying session. In-flight calls fail with a transport error.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.invoker.close().await
    }

    /// Queue an episode for ingestion.
    ///
    /// The returned ack only means the host accepted the episode into its processing
    /// queue. Entities and facts derived from it appear in searches once processing
    /// finishes, which may take a while or never happen. Resubmitting after an
    /// ambiguous failure can ingest the episode twice.
    pub async fn add_memory(&self, episode: &AddEpisodeRequest) -> Result<EnqueueAck, ClientError> {
        episode.validate()?;
        let value = self
            .invoker
            .invoke("add_memory", episode.to_arguments())
            .await?;
        let ack = EnqueueAck::from_message(message_of(&value));
        debug!(
            name = %episode.name,
            source = %episode.source,
            position = ?ack.queue_position,
            "episode queued"
        );
        Ok(ack)
    }

    /// Entity search. Returns at most `max_nodes` nodes; empty while ingestion is pending.
    pub async fn search_memory_nodes(
        &self,
        request: &SearchNodesRequest,
    ) -> Result<Vec<Node>, ClientError> {
        check_query(&request.query)?;
        check_limit("max_nodes", request.max_nodes)?;
        let value = self
            .invoker
            .invoke("search_memory_nodes", to_arguments(request)?)
            .await?;
        let mut nodes: Vec<Node> = decode_list(value, "nodes")?;
        nodes.truncate(request.max_nodes as usize);
        Ok(nodes)
    }

    /// Fact (edge) search. Returns at most `max_facts` facts.
    pub async fn search_memory_facts(
        &self,
        request: &SearchFactsRequest,
    ) -> Result<Vec<Fact>, ClientError> {
        check_query(&request.query)?;
        check_limit("max_facts", request.max_facts)?;
        let value = self
            .invoker
            .invoke("search_memory_facts", to_arguments(request)?)
            .await?;
        let mut facts: Vec<Fact> = decode_list(value, "facts")?;
        facts.truncate(request.max_facts as usize);
        Ok(facts)
    }

    pub async fn get_entity_edge(&self, uuid: &str) -> Result<EntityEdge, ClientError> {
        check_uuid(uuid)?;
        let value = self
            .invoker
            .invoke("get_entity_edge", json!({ "uuid": uuid }))
            .await
            .map_err(|e| not_found(e, uuid))?;
        decode_one(value, "entity edge")
    }

    /// Delete a fact. Deleting the same uuid twice fails the second time with `NotFound`.
    pub async fn delete_entity_edge(&self, uuid: &str) -> Result<Ack, ClientError> {
        check_uuid(uuid)?;
        let value = self
            .invoker
            .invoke("delete_entity_edge", json!({ "uuid": uuid }))
            .await
            .map_err(|e| not_found(e, uuid))?;
        Ok(ack(&value))
    }

    /// Processed episodes, most recent first, at most `last_n`.
    pub async fn get_episodes(
        &self,
        request: &GetEpisodesRequest,
    ) -> Result<Vec<EpisodeRecord>, ClientError> {
        check_limit("last_n", request.last_n)?;
        let value = self
            .invoker
            .invoke("get_episodes", to_arguments(request)?)
            .await?;
        let mut episodes: Vec<EpisodeRecord> = decode_list(value, "episodes")?;
        // Stable, so host order is kept among equal or missing timestamps.
        episodes.sort_by_key(|e| Reverse(e.created_at));
        episodes.truncate(request.last_n as usize);
        Ok(episodes)
    }

    pub async fn delete_episode(&self, uuid: &str) -> Result<Ack, ClientError> {
        check_uuid(uuid)?;
        let value = self
            .invoker
            .invoke("delete_episode", json!({ "uuid": uuid }))
            .await
            .map_err(|e| not_found(e, uuid))?;
        Ok(ack(&value))
    }

    /// Remove all graph data on the host. Irreversible.
    pub async fn clear_graph(&self) -> Result<Ack, ClientError> {
        let value = self.invoker.invoke("clear_graph", json!({})).await?;
        warn!("graph cleared");
        Ok(ack(&value))
    }

    /// Host health. Hosts without a status resource are probed with `ping` instead.
    pub async fn get_status(&self) -> Result<Status, ClientError> {
        match self.invoker.read_resource(STATUS_RESOURCE_URI).await {
            Ok(value) => Ok(status_from(&value)),
            Err(e @ (ClientError::RemoteTool { .. } | ClientError::Protocol(_))) => {
                debug!(error = %e, "status resource unavailable; falling back to ping");
                self.invoker.ping().await?;
                Ok(Status {
                    state: ConnectionState::Connected,
                    message: "host is reachable".to_string(),
                    queue_depth: None,
                })
            }
            Err(e) => Err(e),
        }
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ClientError> {
        self.invoker.list_tools().await
    }
}

fn status_from(value: &Value) -> Status {
    let state = value
        .get("status")
        .and_then(Value::as_str)
        .map(ConnectionState::from_label)
        .unwrap_or(ConnectionState::Disconnected);
    Status {
        state,
        message: message_of(value),
        queue_depth: value.get("queue_depth").and_then(Value::as_u64),
    }
}

fn not_found(e: ClientError, uuid: &str) -> ClientError {
    match e {
        ClientError::RemoteTool { ref message, .. }
            if message.to_ascii_lowercase().contains("not found") =>
        {
            ClientError::NotFound(uuid.to_string())
        }
        other => other,
    }
}

fn to_arguments<T: serde::Serialize>(request: &T) -> Result<Value, ClientError> {
    serde_json::to_value(request).map_err(|e| ClientError::InvalidArgument(e.to_string()))
}

fn check_query(query: &str) -> Result<(), ClientError> {
    if query.trim().is_empty() {
        return Err(ClientError::InvalidArgument(
            "query must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn check_limit(name: &str, n: u32) -> Result<(), ClientError> {
    if n == 0 {
        return Err(ClientError::InvalidArgument(format!(
            "{} must be greater than zero",
            name
        )));
    }
    Ok(())
}

fn check_uuid(uuid: &str) -> Result<(), ClientError> {
    if uuid.trim().is_empty() {
        return Err(ClientError::InvalidArgument("uuid must not be empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    /// Replays queued answers per operation and records every call.
    #[derive(Default)]
    pub(crate) struct ScriptedInvoker {
        answers: Mutex<HashMap<String, VecDeque<Result<Value, ClientError>>>>,
        pub(crate) calls: Mutex<Vec<(String, Value)>>,
    }

    impl ScriptedInvoker {
        pub(crate) fn answer(self, op: &str, result: Result<Value, ClientError>) -> Self {
            self.answers
                .lock()
                .unwrap()
                .entry(op.to_string())
                .or_default()
                .push_back(result);
            self
        }

        pub(crate) fn calls(&self) -> Vec<(String, Value)> {
            self.calls.lock().unwrap().clone()
        }

        fn next(&self, op: &str) -> Result<Value, ClientError> {
            self.answers
                .lock()
                .unwrap()
                .get_mut(op)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| {
                    Err(ClientError::RemoteTool {
                        code: Some(-32601),
                        message: format!("no scripted answer for {}", op),
                    })
                })
        }
    }

    #[async_trait::async_trait]
    impl ToolInvoker for ScriptedInvoker {
        async fn invoke(&self, op: &str, args: Value) -> Result<Value, ClientError> {
            self.calls.lock().unwrap().push((op.to_string(), args));
            self.next(op)
        }

        async fn read_resource(&self, uri: &str) -> Result<Value, ClientError> {
            self.calls
                .lock()
                .unwrap()
                .push(("resources/read".to_string(), json!({ "uri": uri })));
            self.next("resources/read")
        }

        async fn ping(&self) -> Result<(), ClientError> {
            self.calls
                .lock()
                .unwrap()
                .push(("ping".to_string(), Value::Null));
            self.next("ping").map(|_| ())
        }

        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ClientError> {
            let value = self.next("tools/list")?;
            Ok(serde_json::from_value(value).unwrap())
        }
    }

    fn remote(message: &str) -> ClientError {
        ClientError::RemoteTool {
            code: None,
            message: message.to_string(),
        }
    }

    fn edge(uuid: &str) -> Value {
        json!({
            "uuid": uuid,
            "source_node_uuid": "n1",
            "target_node_uuid": "n2",
            "name": "RELATES_TO",
            "fact": "n1 relates to n2",
            "group_id": "g"
        })
    }

    #[tokio::test]
    async fn add_memory_sends_wire_arguments_and_parses_position() {
        let invoker = ScriptedInvoker::default().answer(
            "add_memory",
            Ok(json!({"message": "Episode 'Example Note' queued for processing (position: 3)"})),
        );
        let client = MemoryClient::new(invoker);
        let req = AddEpisodeRequest::new("Example Note", "This is an example note.")
            .with_source_description("example")
            .with_group_id("demo");
        let ack = client.add_memory(&req).await.unwrap();
        assert_eq!(ack.queue_position, Some(3));

        let calls = client.invoker().calls();
        assert_eq!(calls[0].0, "add_memory");
        assert_eq!(calls[0].1["episode_body"], "This is an example note.");
        assert_eq!(calls[0].1["source"], "text");
        assert_eq!(calls[0].1["group_id"], "demo");
    }

    #[tokio::test]
    async fn local_validation_happens_before_any_call() {
        let client = MemoryClient::new(ScriptedInvoker::default());
        let empty_name = AddEpisodeRequest::new("", "body");
        assert!(matches!(
            client.add_memory(&empty_name).await,
            Err(ClientError::InvalidArgument(_))
        ));
        assert!(matches!(
            client
                .search_memory_nodes(&SearchNodesRequest::new("  ", 5))
                .await,
            Err(ClientError::InvalidArgument(_))
        ));
        assert!(matches!(
            client
                .search_memory_facts(&SearchFactsRequest::new("q", 0))
                .await,
            Err(ClientError::InvalidArgument(_))
        ));
        assert!(matches!(
            client.get_episodes(&GetEpisodesRequest::new(0)).await,
            Err(ClientError::InvalidArgument(_))
        ));
        assert!(matches!(
            client.get_entity_edge("").await,
            Err(ClientError::InvalidArgument(_))
        ));
        assert!(client.invoker().calls().is_empty());
    }

    #[tokio::test]
    async fn node_search_is_capped_at_max_nodes() {
        let nodes: Vec<Value> = (0..8)
            .map(|i| {
                json!({"uuid": format!("n{}", i), "name": "x", "summary": "", "group_id": "g"})
            })
            .collect();
        let invoker = ScriptedInvoker::default().answer(
            "search_memory_nodes",
            Ok(json!({"message": "Nodes retrieved successfully", "nodes": nodes})),
        );
        let client = MemoryClient::new(invoker);
        let req = SearchNodesRequest::new("example", 5)
            .with_group_ids(vec!["g".into()])
            .with_entity("Preference");
        let found = client.search_memory_nodes(&req).await.unwrap();
        assert_eq!(found.len(), 5);
        assert!(found.iter().all(|n| !n.uuid.is_empty()));

        let args = &client.invoker().calls()[0].1;
        assert_eq!(args["max_nodes"], 5);
        assert_eq!(args["entity"], "Preference");
        assert!(args.get("center_node_uuid").is_none());
    }

    #[tokio::test]
    async fn single_fact_arrives_as_a_bare_object() {
        let invoker =
            ScriptedInvoker::default().answer("search_memory_facts", Ok(edge("e1")));
        let client = MemoryClient::new(invoker);
        let facts = client
            .search_memory_facts(&SearchFactsRequest::new("relates", 10))
            .await
            .unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].uuid, "e1");
    }

    #[tokio::test]
    async fn unknown_ids_map_to_not_found() {
        let invoker = ScriptedInvoker::default()
            .answer(
                "get_entity_edge",
                Err(remote("Error getting entity edge: edge unknown-uuid not found")),
            )
            .answer("delete_entity_edge", Ok(json!({"message": "Entity edge deleted"})))
            .answer(
                "delete_entity_edge",
                Err(remote("Error deleting entity edge: Edge e1 Not Found")),
            )
            .answer("delete_episode", Err(remote("database unavailable")));
        let client = MemoryClient::new(invoker);

        assert_eq!(
            client.get_entity_edge("unknown-uuid").await.unwrap_err(),
            ClientError::NotFound("unknown-uuid".into())
        );
        assert_eq!(
            client.delete_entity_edge("e1").await.unwrap().message,
            "Entity edge deleted"
        );
        assert_eq!(
            client.delete_entity_edge("e1").await.unwrap_err(),
            ClientError::NotFound("e1".into())
        );
        // Other failures pass through untouched.
        assert!(matches!(
            client.delete_episode("ep").await,
            Err(ClientError::RemoteTool { .. })
        ));
    }

    #[tokio::test]
    async fn episodes_are_most_recent_first_and_capped() {
        let at = |h: u32| Utc.with_ymd_and_hms(2024, 5, 1, h, 0, 0).unwrap().to_rfc3339();
        let invoker = ScriptedInvoker::default().answer(
            "get_episodes",
            Ok(json!([
                {"uuid": "a", "name": "a", "created_at": at(1)},
                {"uuid": "c", "name": "c", "created_at": at(3)},
                {"uuid": "b", "name": "b", "created_at": at(2)}
            ])),
        );
        let client = MemoryClient::new(invoker);
        let episodes = client
            .get_episodes(&GetEpisodesRequest::new(2).with_group_id("g"))
            .await
            .unwrap();
        let ids: Vec<_> = episodes.iter().map(|e| e.uuid.as_str()).collect();
        assert_eq!(ids, ["c", "b"]);
    }

    #[tokio::test]
    async fn empty_episode_listing_is_an_empty_vec() {
        let invoker = ScriptedInvoker::default().answer(
            "get_episodes",
            Ok(json!({"message": "No episodes found for group g", "episodes": []})),
        );
        let client = MemoryClient::new(invoker);
        assert!(client
            .get_episodes(&GetEpisodesRequest::new(5))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn status_reads_the_resource_then_falls_back_to_ping() {
        let invoker = ScriptedInvoker::default()
            .answer(
                "resources/read",
                Ok(json!({
                    "status": "error",
                    "message": "Graphiti MCP server is running but database is unreachable"
                })),
            )
            .answer("resources/read", Err(remote("Unknown resource")))
            .answer("ping", Ok(json!({})));
        let client = MemoryClient::new(invoker);

        let status = client.get_status().await.unwrap();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert!(status.message.contains("unreachable"));

        let status = client.get_status().await.unwrap();
        assert_eq!(status.state, ConnectionState::Connected);
        let ops: Vec<_> = client.invoker().calls().into_iter().map(|c| c.0).collect();
        assert_eq!(ops, ["resources/read", "resources/read", "ping"]);
    }

    #[tokio::test]
    async fn transport_failures_are_not_masked_by_the_status_fallback() {
        let invoker =
            ScriptedInvoker::default().answer("resources/read", Err(ClientError::closed()));
        let client = MemoryClient::new(invoker);
        assert!(client.get_status().await.unwrap_err().is_transport());
    }
}
