//! Subcommand execution. Every command yields a JSON value for printing.

use crate::cli::Command;
use kgmem_client::*;
use serde_json::{json, Value};
use tracing::info;

/// Reject commands that must not reach the host as given.
pub fn precheck(command: &Command) -> Result<(), ClientError> {
    match command {
        Command::Clear { yes: false } => Err(ClientError::InvalidArgument(
            "clear deletes all graph data; pass --yes to confirm".to_string(),
        )),
        Command::Add { body, .. } if body.trim().is_empty() => Err(ClientError::InvalidArgument(
            "episode body must not be empty".to_string(),
        )),
        _ => Ok(()),
    }
}

pub async fn run<I: ToolInvoker>(
    client: &MemoryClient<I>,
    command: Command,
) -> Result<Value, ClientError> {
    precheck(&command)?;
    match command {
        Command::Demo => demo(client).await,
        Command::Status => to_json(client.get_status().await?),
        Command::Tools => {
            let tools = client.list_tools().await?;
            Ok(json!(tools
                .into_iter()
                .map(|t| json!({ "name": t.name, "description": t.description }))
                .collect::<Vec<_>>()))
        }
        Command::Add {
            name,
            body,
            source,
            description,
            group_id,
            reference_time,
            uuid,
            wait,
        } => {
            let mut req = AddEpisodeRequest::new(name, body)
                .with_source(source.unwrap_or_default())
                .with_source_description(description);
            req.group_id = group_id;
            req.reference_time = reference_time;
            req.uuid = uuid;
            let ack = client.add_memory(&req).await?;
            if !wait {
                return to_json(ack);
            }
            let record = client
                .wait_for_episode(&req.name, req.group_id.as_deref(), &BackoffPolicy::default())
                .await?;
            Ok(json!({ "ack": ack, "episode": record }))
        }
        Command::SearchNodes {
            query,
            max,
            groups,
            center,
            entity,
        } => {
            let mut req = SearchNodesRequest::new(query, max);
            req.group_ids = non_empty(groups);
            req.center_node_uuid = center;
            req.entity = entity;
            to_json(client.search_memory_nodes(&req).await?)
        }
        Command::SearchFacts {
            query,
            max,
            groups,
            center,
        } => {
            let mut req = SearchFactsRequest::new(query, max);
            req.group_ids = non_empty(groups);
            req.center_node_uuid = center;
            to_json(client.search_memory_facts(&req).await?)
        }
        Command::GetEdge { uuid } => to_json(client.get_entity_edge(&uuid).await?),
        Command::DeleteEdge { uuid } => to_json(client.delete_entity_edge(&uuid).await?),
        Command::Episodes { group_id, last_n } => {
            let mut req = GetEpisodesRequest::new(last_n);
            req.group_id = group_id;
            to_json(client.get_episodes(&req).await?)
        }
        Command::DeleteEpisode { uuid } => to_json(client.delete_episode(&uuid).await?),
        Command::Clear { .. } => to_json(client.clear_graph().await?),
    }
}

async fn demo<I: ToolInvoker>(client: &MemoryClient<I>) -> Result<Value, ClientError> {
    info!("1. status");
    let status = client.get_status().await?;

    info!("2. adding sample episodes");
    let episodes = [
        AddEpisodeRequest::new(
            "Project Meeting Notes",
            "Discussed the new feature requirements for the Q3 release. \
             Team agreed on the timeline and resource allocation.",
        )
        .with_source_description("meeting notes"),
        AddEpisodeRequest::new(
            "Project Configuration",
            json!({
                "project": "Graphiti MCP",
                "version": "1.0",
                "features": ["SSE transport", "Tool integration", "Resource access"]
            }),
        )
        .with_source_description("project config"),
        AddEpisodeRequest::new(
            "User Query",
            vec![
                Message::new("user", "What is the current status of the MCP implementation?"),
                Message::new(
                    "assistant",
                    "The basic implementation is complete with all core tools.",
                ),
            ],
        )
        .with_source_description("chat transcript"),
    ];
    let mut acks = Vec::with_capacity(episodes.len());
    for episode in &episodes {
        acks.push(client.add_memory(episode).await?);
    }

    // Searches may come back empty while the host is still processing.
    info!("3. searching nodes");
    let nodes = client
        .search_memory_nodes(&SearchNodesRequest::new("project information", 5))
        .await?;
    info!("4. searching facts");
    let facts = client
        .search_memory_facts(&SearchFactsRequest::new("feature requirements", 5))
        .await?;
    info!("5. recent episodes");
    let recent = client.get_episodes(&GetEpisodesRequest::new(3)).await?;

    Ok(json!({
        "status": status,
        "added": acks,
        "nodes": nodes,
        "facts": facts,
        "episodes": recent,
    }))
}

fn non_empty(v: Vec<String>) -> Option<Vec<String>> {
    (!v.is_empty()).then_some(v)
}

fn to_json<T: serde::Serialize>(value: T) -> Result<Value, ClientError> {
    serde_json::to_value(value).map_err(|e| ClientError::Protocol(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgmem_host::{serve_carrier, GraphHost};
    use kgmem_transport::ChannelCarrier;
    use std::sync::Arc;

    async fn client_for(host: &Arc<GraphHost>) -> MemoryClient<Session> {
        let (client_end, host_end) = ChannelCarrier::pair();
        tokio::spawn(serve_carrier(Arc::clone(host), Arc::new(host_end)));
        let session = Session::start(Arc::new(client_end), SessionConfig::default())
            .await
            .unwrap();
        MemoryClient::new(session)
    }

    #[tokio::test]
    async fn demo_reports_every_step() {
        let host = GraphHost::new(false);
        let client = client_for(&host).await;
        let out = run(&client, Command::Demo).await.unwrap();
        assert_eq!(out["status"]["state"], "connected");
        assert_eq!(out["added"].as_array().unwrap().len(), 3);
        assert!(out["nodes"].is_array());
        assert!(out["episodes"].as_array().unwrap().len() <= 3);
    }

    #[tokio::test]
    async fn add_with_wait_returns_the_processed_episode() {
        let host = GraphHost::new(false);
        let client = client_for(&host).await;
        let out = run(
            &client,
            Command::Add {
                name: "Example Note".into(),
                body: "This is an example note.".into(),
                source: None,
                description: "example".into(),
                group_id: Some("demo".into()),
                reference_time: None,
                uuid: None,
                wait: true,
            },
        )
        .await
        .unwrap();
        assert_eq!(out["ack"]["queue_position"], 1);
        assert_eq!(out["episode"]["name"], "Example Note");
        assert_eq!(out["episode"]["group_id"], "demo");
    }

    #[tokio::test]
    async fn clear_requires_confirmation() {
        let host = GraphHost::new(false);
        let client = client_for(&host).await;
        assert!(matches!(
            run(&client, Command::Clear { yes: false }).await,
            Err(ClientError::InvalidArgument(_))
        ));
        let out = run(&client, Command::Clear { yes: true }).await.unwrap();
        assert!(out["message"].as_str().unwrap().contains("cleared"));
    }

    #[tokio::test]
    async fn missing_edge_surfaces_not_found() {
        let host = GraphHost::new(false);
        let client = client_for(&host).await;
        let err = run(&client, Command::GetEdge { uuid: "unknown-uuid".into() })
            .await
            .unwrap_err();
        assert_eq!(err, ClientError::NotFound("unknown-uuid".into()));
    }
}
