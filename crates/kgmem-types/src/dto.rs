//! Domain models: episodes submitted for ingestion and graph objects returned by search.

use crate::ClientError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// Kind of payload carried by an episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeSource {
    #[default]
    Text,
    Json,
    Message,
}

impl EpisodeSource {
    pub fn as_str(self) -> &'static str {
        match self {
            EpisodeSource::Text => "text",
            EpisodeSource::Json => "json",
            EpisodeSource::Message => "message",
        }
    }
}

impl std::fmt::Display for EpisodeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EpisodeSource {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(EpisodeSource::Text),
            "json" => Ok(EpisodeSource::Json),
            "message" | "messages" => Ok(EpisodeSource::Message),
            other => Err(ClientError::InvalidArgument(format!(
                "unknown episode source '{}': expected text, json or message",
                other
            ))),
        }
    }
}

/// Single chat message (user/assistant) inside a message episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Episode payload: free text, a structured record, or role-tagged messages.
#[derive(Debug, Clone, PartialEq)]
pub enum EpisodeBody {
    Text(String),
    Json(serde_json::Value),
    Messages(Vec<Message>),
}

impl EpisodeBody {
    /// Source kind implied by the payload shape.
    pub fn source(&self) -> EpisodeSource {
        match self {
            EpisodeBody::Text(_) => EpisodeSource::Text,
            EpisodeBody::Json(_) => EpisodeSource::Json,
            EpisodeBody::Messages(_) => EpisodeSource::Message,
        }
    }

    /// String form sent as `episode_body`: JSON compact, messages one `role: content` per line.
    pub fn to_wire(&self) -> String {
        match self {
            EpisodeBody::Text(t) => t.clone(),
            EpisodeBody::Json(v) => v.to_string(),
            EpisodeBody::Messages(msgs) => msgs
                .iter()
                .map(|m| format!("{}: {}", m.role, m.content))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            EpisodeBody::Text(t) => t.trim().is_empty(),
            EpisodeBody::Json(v) => v.is_null(),
            EpisodeBody::Messages(msgs) => msgs.is_empty(),
        }
    }
}

impl From<&str> for EpisodeBody {
    fn from(s: &str) -> Self {
        EpisodeBody::Text(s.to_string())
    }
}

impl From<String> for EpisodeBody {
    fn from(s: String) -> Self {
        EpisodeBody::Text(s)
    }
}

impl From<serde_json::Value> for EpisodeBody {
    fn from(v: serde_json::Value) -> Self {
        EpisodeBody::Json(v)
    }
}

impl From<Vec<Message>> for EpisodeBody {
    fn from(msgs: Vec<Message>) -> Self {
        EpisodeBody::Messages(msgs)
    }
}

/// Episode submission for `add_memory`.
#[derive(Debug, Clone)]
pub struct AddEpisodeRequest {
    pub name: String,
    pub episode_body: EpisodeBody,
    pub source: EpisodeSource,
    pub source_description: String,
    /// Partition for the episode; `None` lets the host pick its default group.
    pub group_id: Option<String>,
    pub reference_time: Option<DateTime<Utc>>,
    /// Caller-chosen episode id; normally assigned by the host.
    pub uuid: Option<String>,
}

impl AddEpisodeRequest {
    /// New request with source inferred from the body shape.
    pub fn new(name: impl Into<String>, body: impl Into<EpisodeBody>) -> Self {
        let episode_body = body.into();
        Self {
            name: name.into(),
            source: episode_body.source(),
            episode_body,
            source_description: String::new(),
            group_id: None,
            reference_time: None,
            uuid: None,
        }
    }

    pub fn with_source(mut self, source: EpisodeSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_source_description(mut self, description: impl Into<String>) -> Self {
        self.source_description = description.into();
        self
    }

    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_reference_time(mut self, at: DateTime<Utc>) -> Self {
        self.reference_time = Some(at);
        self
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.name.trim().is_empty() {
            return Err(ClientError::InvalidArgument(
                "episode name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Tool arguments for `add_memory`. Unset optional fields are omitted.
    pub fn to_arguments(&self) -> serde_json::Value {
        let mut args = serde_json::Map::new();
        args.insert("name".into(), self.name.clone().into());
        args.insert("episode_body".into(), self.episode_body.to_wire().into());
        args.insert("source".into(), self.source.as_str().into());
        args.insert(
            "source_description".into(),
            self.source_description.clone().into(),
        );
        if let Some(ref g) = self.group_id {
            args.insert("group_id".into(), g.clone().into());
        }
        if let Some(ref u) = self.uuid {
            args.insert("uuid".into(), u.clone().into());
        }
        if let Some(at) = self.reference_time {
            args.insert("reference_time".into(), at.to_rfc3339().into());
        }
        serde_json::Value::Object(args)
    }
}

fn default_limit() -> u32 {
    10
}

/// Arguments for `search_memory_nodes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchNodesRequest {
    pub query: String,
    #[serde(default = "default_limit")]
    pub max_nodes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center_node_uuid: Option<String>,
    /// Entity type filter (e.g. "Preference", "Procedure").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
}

impl SearchNodesRequest {
    pub fn new(query: impl Into<String>, max_nodes: u32) -> Self {
        Self {
            query: query.into(),
            max_nodes,
            group_ids: None,
            center_node_uuid: None,
            entity: None,
        }
    }

    pub fn with_group_ids(mut self, group_ids: Vec<String>) -> Self {
        self.group_ids = Some(group_ids);
        self
    }

    pub fn with_center_node(mut self, uuid: impl Into<String>) -> Self {
        self.center_node_uuid = Some(uuid.into());
        self
    }

    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }
}

/// Arguments for `search_memory_facts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchFactsRequest {
    pub query: String,
    #[serde(default = "default_limit")]
    pub max_facts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center_node_uuid: Option<String>,
}

impl SearchFactsRequest {
    pub fn new(query: impl Into<String>, max_facts: u32) -> Self {
        Self {
            query: query.into(),
            max_facts,
            group_ids: None,
            center_node_uuid: None,
        }
    }

    pub fn with_group_ids(mut self, group_ids: Vec<String>) -> Self {
        self.group_ids = Some(group_ids);
        self
    }

    pub fn with_center_node(mut self, uuid: impl Into<String>) -> Self {
        self.center_node_uuid = Some(uuid.into());
        self
    }
}

/// Arguments for `get_episodes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetEpisodesRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default = "default_limit")]
    pub last_n: u32,
}

impl GetEpisodesRequest {
    pub fn new(last_n: u32) -> Self {
        Self {
            group_id: None,
            last_n,
        }
    }

    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }
}

/// Extracted entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
}

/// Relationship between two nodes, optionally time-bounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityEdge {
    pub uuid: String,
    pub source_node_uuid: String,
    pub target_node_uuid: String,
    /// Relation label (e.g. "WORKS_AT").
    #[serde(default)]
    pub name: String,
    pub fact: String,
    #[serde(default)]
    pub group_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<DateTime<Utc>>,
    /// Uuids of the episodes this fact was extracted from.
    #[serde(default)]
    pub episodes: Vec<String>,
}

/// Facts are edges.
pub type Fact = EntityEdge;

impl EntityEdge {
    /// True when the fact holds at `at` according to its validity interval.
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        let started = self.valid_at.map_or(true, |v| v <= at);
        let not_ended = self.invalid_at.map_or(true, |i| at < i);
        started && not_ended
    }
}

/// Fully processed episode as listed by `get_episodes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeRecord {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub source: Option<EpisodeSource>,
    #[serde(default)]
    pub source_description: String,
    #[serde(default)]
    pub group_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_at: Option<DateTime<Utc>>,
}

/// Backing-store connectivity as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

impl ConnectionState {
    /// Host labels: "ok"/"connected" mean connected; anything else is treated as disconnected.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "ok" | "connected" | "healthy" => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Service health snapshot; fetched on demand, never cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub state: ConnectionState,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_depth: Option<u64>,
}

/// Acknowledgement that an episode was enqueued. Not a confirmation of processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueAck {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<u64>,
}

impl EnqueueAck {
    /// Parses `"... (position: N)"` out of the host message when present.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let queue_position = parse_queue_position(&message);
        Self {
            message,
            queue_position,
        }
    }
}

fn parse_queue_position(message: &str) -> Option<u64> {
    let idx = message.find("position")?;
    let rest = message[idx + "position".len()..].trim_start_matches([':', ' ', '=']);
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Plain acknowledgement for deletes and clears.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_body_renders_one_line_per_message() {
        let body = EpisodeBody::Messages(vec![
            Message::new("user", "What is the status?"),
            Message::new("assistant", "Core tools are done."),
        ]);
        assert_eq!(body.source(), EpisodeSource::Message);
        assert_eq!(
            body.to_wire(),
            "user: What is the status?\nassistant: Core tools are done."
        );
    }

    #[test]
    fn add_request_omits_unset_optionals() {
        let req = AddEpisodeRequest::new("Project Configuration", json!({"version": "1.0"}))
            .with_source_description("project config");
        let args = req.to_arguments();
        assert_eq!(args["source"], "json");
        assert_eq!(args["episode_body"], "{\"version\":\"1.0\"}");
        assert!(args.get("group_id").is_none());
        assert!(args.get("uuid").is_none());
        assert!(args.get("reference_time").is_none());
    }

    #[test]
    fn empty_name_is_rejected() {
        let req = AddEpisodeRequest::new("  ", "body");
        assert!(matches!(req.validate(), Err(ClientError::InvalidArgument(_))));
    }

    #[test]
    fn source_parses_case_insensitively() {
        assert_eq!("JSON".parse::<EpisodeSource>().unwrap(), EpisodeSource::Json);
        assert!("xml".parse::<EpisodeSource>().is_err());
    }

    #[test]
    fn queue_position_is_extracted() {
        let ack =
            EnqueueAck::from_message("Episode 'Example Note' queued for processing (position: 3)");
        assert_eq!(ack.queue_position, Some(3));
        let ack = EnqueueAck::from_message("Episode added");
        assert_eq!(ack.queue_position, None);
    }

    #[test]
    fn edge_validity_window() {
        let edge: EntityEdge = serde_json::from_value(json!({
            "uuid": "e1",
            "source_node_uuid": "a",
            "target_node_uuid": "b",
            "fact": "Alice works at Acme",
            "valid_at": "2024-01-01T00:00:00Z",
            "invalid_at": "2024-06-01T00:00:00Z"
        }))
        .unwrap();
        let inside: DateTime<Utc> = "2024-03-01T00:00:00Z".parse().unwrap();
        let after: DateTime<Utc> = "2024-07-01T00:00:00Z".parse().unwrap();
        assert!(edge.is_valid_at(inside));
        assert!(!edge.is_valid_at(after));
    }

    #[test]
    fn connection_state_labels() {
        assert_eq!(ConnectionState::from_label("ok"), ConnectionState::Connected);
        assert_eq!(ConnectionState::from_label("error"), ConnectionState::Disconnected);
    }
}
