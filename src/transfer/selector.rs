//! Channel Selector
//!
//! Picks the channel the scheduler should submit the next FTS job on.
//! Eligible channels are Active, have Waiting files and fewer outstanding
//! (Submitted) requests than the cap. The pick among them is uniform random,
//! so every eligible channel has a nonzero chance and none is weighted.

use rand::seq::SliceRandom;
use std::sync::Arc;
use tracing::debug;

use super::error::TransferDbResult;
use super::state::ChannelStatus;
use super::store::TransferStore;
use super::types::{ChannelId, QueueStats};

/// An eligible submission target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelCandidate {
    pub channel_id: ChannelId,
    pub stats: QueueStats,
    /// Submitted requests currently outstanding on the channel
    pub outstanding: u64,
}

#[derive(Clone)]
pub struct ChannelSelector {
    store: Arc<dyn TransferStore>,
}

impl ChannelSelector {
    pub fn new(store: Arc<dyn TransferStore>) -> Self {
        Self { store }
    }

    /// All channels currently eligible for submission, in id order
    pub async fn eligible_channels(&self, max_jobs_per_channel: u64) -> TransferDbResult<Vec<ChannelCandidate>> {
        let active = self.store.list_channels(Some(ChannelStatus::Active)).await?;
        let stats = self.store.queue_stats().await?;

        let with_files: Vec<(ChannelId, QueueStats)> = active
            .iter()
            .filter_map(|c| {
                stats
                    .get(&c.channel_id)
                    .filter(|s| s.files > 0)
                    .map(|s| (c.channel_id, *s))
            })
            .collect();
        if with_files.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<ChannelId> = with_files.iter().map(|(id, _)| *id).collect();
        let outstanding = self.store.count_submitted(&ids).await?;

        Ok(with_files
            .into_iter()
            .map(|(channel_id, stats)| ChannelCandidate {
                channel_id,
                stats,
                outstanding: outstanding.get(&channel_id).copied().unwrap_or(0),
            })
            .filter(|c| c.outstanding < max_jobs_per_channel)
            .collect())
    }

    /// Random eligible channel, `None` when nothing qualifies
    pub async fn select_channel_for_submission(
        &self,
        max_jobs_per_channel: u64,
    ) -> TransferDbResult<Option<ChannelCandidate>> {
        let candidates = self.eligible_channels(max_jobs_per_channel).await?;
        let picked = candidates.choose(&mut rand::thread_rng()).copied();

        match &picked {
            Some(c) => debug!(
                channel_id = c.channel_id,
                waiting_files = c.stats.files,
                outstanding = c.outstanding,
                candidates = candidates.len(),
                "Channel selected for submission"
            ),
            None => debug!(max_jobs_per_channel, "No channel eligible for submission"),
        }
        Ok(picked)
    }
}
