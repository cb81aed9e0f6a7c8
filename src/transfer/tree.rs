//! Replication Tree Tracker
//!
//! Write-once record of the channel hops each file takes. The gate itself
//! lives on the queue entry; the scheduler reads the tree to learn which
//! downstream channels to release once an ancestor hop completes.

use std::sync::Arc;
use tracing::{debug, warn};

use super::error::{TransferDbError, TransferDbResult};
use super::store::TransferStore;
use super::types::{ChannelId, FileId, ReplicationEdge, TreeEdge};

#[derive(Clone)]
pub struct ReplicationTrees {
    store: Arc<dyn TransferStore>,
}

impl ReplicationTrees {
    pub fn new(store: Arc<dyn TransferStore>) -> Self {
        Self { store }
    }

    /// Insert the edges in order, stopping at the first failure.
    ///
    /// Batch keys in the error are channel ids.
    pub async fn record_tree(&self, file_id: FileId, edges: &[TreeEdge]) -> TransferDbResult<()> {
        let mut recorded = Vec::with_capacity(edges.len());
        for edge in edges {
            if let Err(e) = self.store.insert_tree_edge(file_id, edge).await {
                warn!(
                    file_id = file_id,
                    channel_id = edge.channel_id,
                    recorded = recorded.len(),
                    error = %e,
                    "Replication tree recording stopped"
                );
                return Err(TransferDbError::partial(recorded, edge.channel_id, e));
            }
            recorded.push(edge.channel_id);
        }
        debug!(file_id = file_id, hops = recorded.len(), "Replication tree recorded");
        Ok(())
    }

    /// Edges of the file ordered by channel id
    pub async fn tree_for(&self, file_id: FileId) -> TransferDbResult<Vec<ReplicationEdge>> {
        self.store.tree_edges(file_id).await
    }

    /// Channels whose hop for this file waits on `ancestor_channel`
    pub async fn dependent_channels(
        &self,
        file_id: FileId,
        ancestor_channel: ChannelId,
    ) -> TransferDbResult<Vec<ChannelId>> {
        Ok(self
            .store
            .tree_edges(file_id)
            .await?
            .into_iter()
            .filter(|e| e.ancestor_channel == Some(ancestor_channel))
            .map(|e| e.channel_id)
            .collect())
    }
}
