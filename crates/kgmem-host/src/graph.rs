//! In-memory temporal graph: episodes, entity nodes and facts between them.
//!
//! Extraction is a deterministic stand-in: every episode yields one entity named after
//! the episode (merged with an existing entity of the same name in the group), and
//! consecutive entities in a group are linked by a fact.

use chrono::{DateTime, Utc};
use kgmem_types::{EntityEdge, EpisodeRecord, EpisodeSource, Node};
use std::cmp::Reverse;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Group used when a submission names none.
pub const DEFAULT_GROUP: &str = "default";

const SUMMARY_CHARS: usize = 160;
const SEQUENCE_RELATION: &str = "RECORDED_BEFORE";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum GraphError {
    #[error("{kind} {uuid} not found")]
    NotFound { kind: &'static str, uuid: String },
}

/// An episode accepted by the queue and waiting for processing.
#[derive(Debug, Clone)]
pub struct PendingEpisode {
    pub uuid: String,
    pub name: String,
    pub content: String,
    pub source: EpisodeSource,
    pub source_description: String,
    pub group_id: String,
    pub reference_time: Option<DateTime<Utc>>,
}

struct StoredNode {
    node: Node,
    /// Episodes that mention this entity; the node goes away with the last one.
    episodes: Vec<String>,
}

#[derive(Default)]
struct GraphState {
    /// Processing order; most recent last.
    episodes: Vec<EpisodeRecord>,
    nodes: HashMap<String, StoredNode>,
    edges: HashMap<String, EntityEdge>,
    /// group_id -> node uuid of the most recently processed episode.
    last_in_group: HashMap<String, String>,
}

pub struct InMemoryGraph {
    state: RwLock<GraphState>,
}

impl Default for InMemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(GraphState::default()),
        }
    }

    /// Turn a queued episode into graph data. Returns the entity node's uuid.
    pub async fn ingest(&self, episode: PendingEpisode) -> String {
        let now = Utc::now();
        let valid_at = episode.reference_time.unwrap_or(now);
        let mut state = self.state.write().await;

        let node_uuid = match find_entity(&state, &episode.group_id, &episode.name) {
            Some(uuid) => {
                if let Some(stored) = state.nodes.get_mut(&uuid) {
                    stored.node.summary = summarize(&episode.content);
                    stored.episodes.push(episode.uuid.clone());
                }
                uuid
            }
            None => {
                let uuid = Uuid::new_v4().to_string();
                let node = Node {
                    uuid: uuid.clone(),
                    name: episode.name.clone(),
                    summary: summarize(&episode.content),
                    group_id: episode.group_id.clone(),
                    labels: vec!["Entity".to_string(), entity_label(episode.source).to_string()],
                    created_at: Some(now),
                    attributes: HashMap::new(),
                };
                state.nodes.insert(
                    uuid.clone(),
                    StoredNode {
                        node,
                        episodes: vec![episode.uuid.clone()],
                    },
                );
                uuid
            }
        };

        if let Some(prev) = state.last_in_group.get(&episode.group_id).cloned() {
            if prev != node_uuid {
                if let Some(prev_name) = state.nodes.get(&prev).map(|s| s.node.name.clone()) {
                    let edge = EntityEdge {
                        uuid: Uuid::new_v4().to_string(),
                        source_node_uuid: prev,
                        target_node_uuid: node_uuid.clone(),
                        name: SEQUENCE_RELATION.to_string(),
                        fact: format!("{} was recorded before {}", prev_name, episode.name),
                        group_id: episode.group_id.clone(),
                        created_at: Some(now),
                        valid_at: Some(valid_at),
                        invalid_at: None,
                        expired_at: None,
                        episodes: vec![episode.uuid.clone()],
                    };
                    state.edges.insert(edge.uuid.clone(), edge);
                }
            }
        }
        state
            .last_in_group
            .insert(episode.group_id.clone(), node_uuid.clone());

        state.episodes.push(EpisodeRecord {
            uuid: episode.uuid,
            name: episode.name,
            content: episode.content,
            source: Some(episode.source),
            source_description: episode.source_description,
            group_id: episode.group_id,
            created_at: Some(now),
            valid_at: Some(valid_at),
        });
        node_uuid
    }

    /// Nodes whose name or summary contains any query term, best match first.
    pub async fn search_nodes(
        &self,
        query: &str,
        max: usize,
        group_ids: Option<&[String]>,
        center: Option<&str>,
        entity: Option<&str>,
    ) -> Vec<Node> {
        let terms = terms(query);
        let state = self.state.read().await;
        let mut hits: Vec<(usize, bool, &Node)> = state
            .nodes
            .values()
            .map(|s| &s.node)
            .filter(|n| in_groups(&n.group_id, group_ids))
            .filter(|n| entity.map_or(true, |e| n.labels.iter().any(|l| l.eq_ignore_ascii_case(e))))
            .filter_map(|n| {
                let score = score(&terms, &[&n.name, &n.summary]);
                (score > 0).then(|| (score, is_adjacent(&state, center, &n.uuid), n))
            })
            .collect();
        hits.sort_by_key(|(score, adjacent, n)| {
            (Reverse(*adjacent), Reverse(*score), Reverse(n.created_at))
        });
        hits.into_iter().take(max).map(|(_, _, n)| n.clone()).collect()
    }

    /// Facts whose text or relation matches any query term, best match first.
    pub async fn search_facts(
        &self,
        query: &str,
        max: usize,
        group_ids: Option<&[String]>,
        center: Option<&str>,
    ) -> Vec<EntityEdge> {
        let terms = terms(query);
        let state = self.state.read().await;
        let mut hits: Vec<(usize, bool, &EntityEdge)> = state
            .edges
            .values()
            .filter(|e| in_groups(&e.group_id, group_ids))
            .filter_map(|e| {
                let score = score(&terms, &[&e.fact, &e.name]);
                let touches_center = center
                    .map_or(false, |c| e.source_node_uuid == c || e.target_node_uuid == c);
                (score > 0).then_some((score, touches_center, e))
            })
            .collect();
        hits.sort_by_key(|(score, touches, e)| {
            (Reverse(*touches), Reverse(*score), Reverse(e.created_at))
        });
        hits.into_iter().take(max).map(|(_, _, e)| e.clone()).collect()
    }

    pub async fn get_edge(&self, uuid: &str) -> Result<EntityEdge, GraphError> {
        let state = self.state.read().await;
        state.edges.get(uuid).cloned().ok_or_else(|| GraphError::NotFound {
            kind: "entity edge",
            uuid: uuid.to_string(),
        })
    }

    pub async fn delete_edge(&self, uuid: &str) -> Result<(), GraphError> {
        let mut state = self.state.write().await;
        state.edges.remove(uuid).map(|_| ()).ok_or_else(|| GraphError::NotFound {
            kind: "entity edge",
            uuid: uuid.to_string(),
        })
    }

    /// Most recent first.
    pub async fn episodes(&self, group_id: Option<&str>, last_n: usize) -> Vec<EpisodeRecord> {
        let state = self.state.read().await;
        state
            .episodes
            .iter()
            .rev()
            .filter(|e| group_id.map_or(true, |g| e.group_id == g))
            .take(last_n)
            .cloned()
            .collect()
    }

    /// Remove an episode, the facts extracted only from it, and entities it alone mentioned.
    pub async fn delete_episode(&self, uuid: &str) -> Result<(), GraphError> {
        let mut state = self.state.write().await;
        let pos = state
            .episodes
            .iter()
            .position(|e| e.uuid == uuid)
            .ok_or_else(|| GraphError::NotFound {
                kind: "episode",
                uuid: uuid.to_string(),
            })?;
        state.episodes.remove(pos);

        let mut orphaned = Vec::new();
        for (id, stored) in state.nodes.iter_mut() {
            stored.episodes.retain(|e| e != uuid);
            if stored.episodes.is_empty() {
                orphaned.push(id.clone());
            }
        }
        for id in &orphaned {
            state.nodes.remove(id);
        }
        state.last_in_group.retain(|_, node| !orphaned.contains(node));
        state.edges.retain(|_, edge| {
            edge.episodes.retain(|e| e != uuid);
            !edge.episodes.is_empty()
                && !orphaned.contains(&edge.source_node_uuid)
                && !orphaned.contains(&edge.target_node_uuid)
        });
        Ok(())
    }

    pub async fn clear(&self) {
        *self.state.write().await = GraphState::default();
    }

    /// (episodes, nodes, edges)
    pub async fn counts(&self) -> (usize, usize, usize) {
        let state = self.state.read().await;
        (state.episodes.len(), state.nodes.len(), state.edges.len())
    }
}

fn find_entity(state: &GraphState, group_id: &str, name: &str) -> Option<String> {
    state
        .nodes
        .values()
        .find(|s| s.node.group_id == group_id && s.node.name.eq_ignore_ascii_case(name))
        .map(|s| s.node.uuid.clone())
}

fn is_adjacent(state: &GraphState, center: Option<&str>, uuid: &str) -> bool {
    let Some(center) = center else {
        return false;
    };
    state.edges.values().any(|e| {
        (e.source_node_uuid == center && e.target_node_uuid == uuid)
            || (e.target_node_uuid == center && e.source_node_uuid == uuid)
    })
}

fn entity_label(source: EpisodeSource) -> &'static str {
    match source {
        EpisodeSource::Text => "Note",
        EpisodeSource::Json => "Record",
        EpisodeSource::Message => "Conversation",
    }
}

fn summarize(content: &str) -> String {
    let line = content.split_whitespace().collect::<Vec<_>>().join(" ");
    match line.char_indices().nth(SUMMARY_CHARS) {
        Some((cut, _)) => format!("{}...", &line[..cut]),
        None => line,
    }
}

fn terms(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn score(terms: &[String], fields: &[&str]) -> usize {
    let haystack = fields.join(" ").to_lowercase();
    terms.iter().filter(|t| haystack.contains(t.as_str())).count()
}

fn in_groups(group_id: &str, group_ids: Option<&[String]>) -> bool {
    match group_ids {
        Some(ids) if !ids.is_empty() => ids.iter().any(|g| g == group_id),
        _ => true,
    }
}
