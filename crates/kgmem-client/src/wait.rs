//! Opt-in polling until an ingested episode shows up.

use crate::MemoryClient;
use kgmem_types::{ClientError, EpisodeRecord, GetEpisodesRequest, ToolInvoker};
use std::time::Duration;
use tracing::debug;

/// How many recent episodes each poll inspects.
const SCAN_DEPTH: u32 = 50;

/// Bounded exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
            max_attempts: 10,
        }
    }
}

impl BackoffPolicy {
    /// Delay to sleep after failed attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

impl<I: ToolInvoker> MemoryClient<I> {
    /// Poll `get_episodes` until an episode named `name` is listed, or give up after
    /// `policy.max_attempts` polls. Errors from the host end the wait immediately.
    pub async fn wait_for_episode(
        &self,
        name: &str,
        group_id: Option<&str>,
        policy: &BackoffPolicy,
    ) -> Result<Option<EpisodeRecord>, ClientError> {
        let mut request = GetEpisodesRequest::new(SCAN_DEPTH);
        request.group_id = group_id.map(str::to_string);
        for attempt in 0..policy.max_attempts {
            let episodes = self.get_episodes(&request).await?;
            if let Some(found) = episodes.into_iter().find(|e| e.name == name) {
                debug!(name, attempt, uuid = %found.uuid, "episode processed");
                return Ok(Some(found));
            }
            if attempt + 1 < policy.max_attempts {
                let delay = policy.delay_for(attempt);
                debug!(name, attempt, ?delay, "episode not processed yet");
                tokio::time::sleep(delay).await;
            }
        }
        Ok(None)
    }
}
