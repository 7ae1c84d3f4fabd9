//! Ingestion queue: episodes are accepted immediately and processed by one worker.

use crate::graph::{InMemoryGraph, PendingEpisode};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("ingestion worker stopped")]
    WorkerStopped,
}

/// Single-worker queue in front of the graph. Processing can be paused, which keeps
/// submissions queued and makes reads lag behind writes.
pub struct IngestQueue {
    tx: mpsc::UnboundedSender<PendingEpisode>,
    depth: Arc<watch::Sender<usize>>,
    paused: watch::Sender<bool>,
}

impl IngestQueue {
    /// Create the queue and spawn its worker over `graph`.
    pub fn new(graph: Arc<InMemoryGraph>, paused: bool) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<PendingEpisode>();
        let depth = Arc::new(watch::channel(0usize).0);
        let (paused, _) = watch::channel(paused);

        let depth_worker = Arc::clone(&depth);
        let mut paused_rx = paused.subscribe();
        tokio::spawn(async move {
            while let Some(episode) = rx.recv().await {
                if paused_rx.wait_for(|p| !*p).await.is_err() {
                    break;
                }
                let name = episode.name.clone();
                let node = graph.ingest(episode).await;
                depth_worker.send_modify(|d| *d = d.saturating_sub(1));
                debug!(%name, %node, remaining = *depth_worker.borrow(), "episode processed");
            }
            debug!("ingestion worker finished");
        });

        Self { tx, depth, paused }
    }

    /// Enqueue and return the 1-based queue position.
    pub fn submit(&self, episode: PendingEpisode) -> Result<usize, QueueError> {
        let mut position = 0;
        self.depth.send_modify(|d| {
            *d += 1;
            position = *d;
        });
        if self.tx.send(episode).is_err() {
            self.depth.send_modify(|d| *d = d.saturating_sub(1));
            warn!("ingestion worker is gone; episode dropped");
            return Err(QueueError::WorkerStopped);
        }
        Ok(position)
    }

    /// Episodes accepted but not yet processed.
    pub fn depth(&self) -> usize {
        *self.depth.borrow()
    }

    pub fn pause(&self) {
        self.paused.send_replace(true);
        info!("ingestion paused");
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
        info!("ingestion resumed");
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Resolve once every accepted episode has been processed.
    pub async fn wait_idle(&self) {
        let mut rx = self.depth.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|d| *d == 0).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgmem_types::EpisodeSource;
    use std::time::Duration;

    fn episode(name: &str) -> PendingEpisode {
        PendingEpisode {
            uuid: name.to_string(),
            name: name.to_string(),
            content: format!("{} content", name),
            source: EpisodeSource::Text,
            source_description: String::new(),
            group_id: "g".to_string(),
            reference_time: None,
        }
    }

    #[tokio::test]
    async fn paused_queue_holds_episodes_until_resumed() {
        let graph = Arc::new(InMemoryGraph::new());
        let queue = IngestQueue::new(Arc::clone(&graph), true);
        assert_eq!(queue.submit(episode("a")).unwrap(), 1);
        assert_eq!(queue.submit(episode("b")).unwrap(), 2);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.depth(), 2);
        assert!(graph.episodes(None, 10).await.is_empty());

        queue.resume();
        tokio::time::timeout(Duration::from_secs(2), queue.wait_idle())
            .await
            .unwrap();
        assert_eq!(graph.episodes(None, 10).await.len(), 2);
        assert!(!queue.is_paused());
    }
}
