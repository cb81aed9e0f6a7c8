//! Transfer Queue
//!
//! Per-channel queue of files waiting for submission.
//!
//! An entry is Waiting or Executing. A Waiting entry with an ancestor channel
//! is gated: it counts toward queue depth but is never selected until the
//! ancestor channel releases it. Entries are deleted once their transfer
//! terminates.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::error::{TransferDbError, TransferDbResult};
use super::state::QueueStatus;
use super::store::TransferStore;
use super::types::{
    Batch, ChannelId, FileAttribute, FileAttributeName, FileId, NewQueueEntry, QueueEntry,
    QueueStats,
};

#[derive(Clone)]
pub struct TransferQueue {
    store: Arc<dyn TransferStore>,
}

impl TransferQueue {
    pub fn new(store: Arc<dyn TransferStore>) -> Self {
        Self { store }
    }

    /// Queue a file on a channel, failing with `DuplicateEntry` if already queued
    pub async fn enqueue(&self, entry: NewQueueEntry) -> TransferDbResult<()> {
        self.store.insert_queue_entry(&entry).await?;
        debug!(
            channel_id = entry.channel_id,
            file_id = entry.file_id,
            space_token = %entry.space_token,
            ancestor_channel = ?entry.ancestor_channel,
            "File queued"
        );
        Ok(())
    }

    /// Remove entries one by one, stopping at the first store failure.
    ///
    /// An entry that is already gone counts as removed, so a repeated pass
    /// over partly dequeued files clears the rest. The error lists the ids
    /// handled before the failing one.
    pub async fn dequeue(&self, channel_id: ChannelId, file_ids: &[FileId]) -> TransferDbResult<()> {
        let mut removed = Vec::with_capacity(file_ids.len());
        let mut absent = 0usize;
        for &file_id in file_ids {
            match self.store.delete_queue_entry(channel_id, file_id).await {
                Ok(true) => {}
                Ok(false) => absent += 1,
                Err(e) => {
                    warn!(
                        channel_id = channel_id,
                        file_id = file_id,
                        removed = removed.len(),
                        error = %e,
                        "Dequeue stopped"
                    );
                    return Err(TransferDbError::partial(removed, file_id, e));
                }
            }
            removed.push(file_id);
        }
        debug!(
            channel_id = channel_id,
            count = removed.len(),
            already_absent = absent,
            "Files dequeued"
        );
        Ok(())
    }

    /// Waiting -> Executing for the given files; ids not selectable are skipped.
    ///
    /// Returns the number of entries moved.
    pub async fn mark_executing(&self, channel_id: ChannelId, file_ids: &[FileId]) -> TransferDbResult<u64> {
        if file_ids.is_empty() {
            return Ok(0);
        }
        let moved = self.store.mark_queue_executing(channel_id, file_ids).await?;
        debug!(
            channel_id = channel_id,
            requested = file_ids.len(),
            moved = moved,
            "Files marked executing"
        );
        Ok(moved)
    }

    /// Executing -> Waiting so the file can be picked again
    pub async fn reset_to_waiting(&self, channel_id: ChannelId, file_id: FileId) -> TransferDbResult<()> {
        if self.store.reset_queue_entry(channel_id, file_id).await? {
            debug!(channel_id = channel_id, file_id = file_id, "File reset to waiting");
            return Ok(());
        }
        match self.store.get_queue_entry(channel_id, file_id).await? {
            Some(entry) => Err(TransferDbError::InvalidTransition(format!(
                "file {} on channel {} is {}, not {}",
                file_id,
                channel_id,
                entry.status,
                QueueStatus::Executing
            ))),
            None => Err(TransferDbError::NotFound(format!(
                "file {} on channel {}",
                file_id, channel_id
            ))),
        }
    }

    /// Ungate Waiting entries (on any channel) that wait for `ancestor_channel`
    ///
    /// Returns the number of entries released.
    pub async fn release_dependents(
        &self,
        ancestor_channel: ChannelId,
        file_ids: &[FileId],
    ) -> TransferDbResult<u64> {
        if file_ids.is_empty() {
            return Ok(0);
        }
        let released = self.store.release_dependents(ancestor_channel, file_ids).await?;
        if released > 0 {
            info!(
                ancestor_channel = ancestor_channel,
                released = released,
                "Dependent transfers released"
            );
        }
        Ok(released)
    }

    /// Pick up to `max_files` selectable files sharing one space token.
    ///
    /// The token is that of the oldest selectable entry on the channel, so the
    /// oldest file is never starved by newer files under another token.
    pub async fn select_batch(&self, channel_id: ChannelId, max_files: usize) -> TransferDbResult<Option<Batch>> {
        if max_files == 0 {
            return Ok(None);
        }
        let Some(space_token) = self.store.oldest_space_token(channel_id).await? else {
            debug!(channel_id = channel_id, "No selectable files on channel");
            return Ok(None);
        };

        let files = self
            .store
            .selectable_files(channel_id, &space_token, max_files)
            .await?;
        if files.is_empty() {
            // Raced with another selector between the two reads
            return Ok(None);
        }

        debug!(
            channel_id = channel_id,
            space_token = %space_token,
            files = files.len(),
            "Batch selected"
        );
        Ok(Some(Batch { space_token, files }))
    }

    /// Waiting depth of every registered channel, zero when empty
    pub async fn queue_stats(&self) -> TransferDbResult<HashMap<ChannelId, QueueStats>> {
        let mut stats = self.store.queue_stats().await?;
        for channel in self.store.list_channels(None).await? {
            stats.entry(channel.channel_id).or_default();
        }
        Ok(stats)
    }

    pub async fn queue_depth(&self, channel_id: ChannelId) -> TransferDbResult<QueueStats> {
        let stats = self.store.queue_stats().await?;
        Ok(stats.get(&channel_id).copied().unwrap_or_default())
    }

    pub async fn get_entry(&self, channel_id: ChannelId, file_id: FileId) -> TransferDbResult<Option<QueueEntry>> {
        self.store.get_queue_entry(channel_id, file_id).await
    }

    pub async fn get_file_attribute(
        &self,
        channel_id: ChannelId,
        file_id: FileId,
        name: FileAttributeName,
    ) -> TransferDbResult<FileAttribute> {
        let entry = self
            .store
            .get_queue_entry(channel_id, file_id)
            .await?
            .ok_or_else(|| {
                TransferDbError::NotFound(format!("file {} on channel {}", file_id, channel_id))
            })?;
        Ok(FileAttribute::read(&entry, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::memory::MemoryTransferStore;

    struct Fixture {
        store: Arc<MemoryTransferStore>,
        queue: TransferQueue,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(MemoryTransferStore::new());
            let queue = TransferQueue::new(store.clone());
            Self { store, queue }
        }

        async fn channel(&self, source: &str, dest: &str) -> ChannelId {
            self.store.create_channel(source, dest).await.unwrap().channel_id
        }
    }

    fn entry(channel_id: ChannelId, file_id: FileId, token: &str, size: i64) -> NewQueueEntry {
        NewQueueEntry {
            channel_id,
            file_id,
            source_surl: format!("srm://cern.ch/data/{}", file_id),
            target_surl: format!("srm://ral.ac.uk/data/{}", file_id),
            file_size: size,
            space_token: token.to_string(),
            ancestor_channel: None,
        }
    }

    #[tokio::test]
    async fn test_duplicate_enqueue() {
        let f = Fixture::new();
        let c = f.channel("A", "B").await;
        f.queue.enqueue(entry(c, 1, "T1", 10)).await.unwrap();

        let err = f.queue.enqueue(entry(c, 1, "T1", 10)).await.unwrap_err();
        assert!(matches!(err, TransferDbError::DuplicateEntry(_)));
        assert_eq!(f.queue.queue_depth(c).await.unwrap().files, 1);
    }

    #[tokio::test]
    async fn test_same_file_on_two_channels() {
        let f = Fixture::new();
        let c1 = f.channel("A", "B").await;
        let c2 = f.channel("B", "C").await;
        f.queue.enqueue(entry(c1, 1, "T1", 10)).await.unwrap();
        f.queue.enqueue(entry(c2, 1, "T1", 10)).await.unwrap();
    }

    #[tokio::test]
    async fn test_dequeue_skips_absent_entries() {
        let f = Fixture::new();
        let c = f.channel("A", "B").await;
        f.queue.enqueue(entry(c, 1, "T1", 10)).await.unwrap();
        f.queue.enqueue(entry(c, 2, "T1", 10)).await.unwrap();
        f.queue.mark_executing(c, &[1, 2]).await.unwrap();

        f.queue.dequeue(c, &[1, 99, 2]).await.unwrap();
        assert!(f.queue.get_entry(c, 2).await.unwrap().is_none());
        assert_eq!(f.queue.queue_depth(c).await.unwrap(), QueueStats::default());

        // Repeating the pass is harmless
        f.queue.dequeue(c, &[1, 99, 2]).await.unwrap();
    }

    #[tokio::test]
    async fn test_dequeue_reports_progress_on_store_failure() {
        let f = Fixture::new();
        let c = f.channel("A", "B").await;
        for file_id in [1, 2, 3, 4] {
            f.queue.enqueue(entry(c, file_id, "T1", 10)).await.unwrap();
        }
        f.store.set_fail_delete(Some(3));

        let err = f.queue.dequeue(c, &[1, 2, 3, 4]).await.unwrap_err();
        assert_eq!(
            err,
            TransferDbError::PartialBatchFailure {
                succeeded: vec![1, 2],
                failed: 3,
                reason: "Infrastructure error: injected delete failure for file 3".to_string(),
            }
        );
        // Stopped before 4
        assert!(f.queue.get_entry(c, 3).await.unwrap().is_some());
        assert!(f.queue.get_entry(c, 4).await.unwrap().is_some());

        f.store.set_fail_delete(None);
        f.queue.dequeue(c, &[3, 4]).await.unwrap();
        assert_eq!(f.queue.queue_depth(c).await.unwrap(), QueueStats::default());
    }

    #[tokio::test]
    async fn test_batch_uses_oldest_token_only() {
        let f = Fixture::new();
        let c = f.channel("A", "B").await;
        f.queue.enqueue(entry(c, 1, "T1", 10)).await.unwrap();
        f.queue.enqueue(entry(c, 2, "T2", 10)).await.unwrap();
        f.queue.enqueue(entry(c, 3, "T1", 10)).await.unwrap();
        f.queue.enqueue(entry(c, 4, "T2", 10)).await.unwrap();

        let batch = f.queue.select_batch(c, 10).await.unwrap().unwrap();
        assert_eq!(batch.space_token, "T1");
        let ids: Vec<_> = batch.files.iter().map(|b| b.file_id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_batch_respects_limit_and_order() {
        let f = Fixture::new();
        let c = f.channel("A", "B").await;
        for id in [5, 3, 9, 1] {
            f.queue.enqueue(entry(c, id, "T1", 10)).await.unwrap();
        }

        let batch = f.queue.select_batch(c, 2).await.unwrap().unwrap();
        let ids: Vec<_> = batch.files.iter().map(|b| b.file_id).collect();
        assert_eq!(ids, vec![5, 3]);

        assert!(f.queue.select_batch(c, 0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_batch_joins_lfn() {
        let f = Fixture::new();
        let c = f.channel("A", "B").await;
        f.store.record_lfn(1, "/lhcb/data/file1").await.unwrap();
        f.queue.enqueue(entry(c, 1, "T1", 10)).await.unwrap();
        f.queue.enqueue(entry(c, 2, "T1", 10)).await.unwrap();

        let batch = f.queue.select_batch(c, 10).await.unwrap().unwrap();
        assert_eq!(batch.files[0].lfn.as_deref(), Some("/lhcb/data/file1"));
        assert_eq!(batch.files[1].lfn, None);
    }

    #[tokio::test]
    async fn test_mark_executing_skips_non_waiting() {
        let f = Fixture::new();
        let c = f.channel("A", "B").await;
        f.queue.enqueue(entry(c, 1, "T1", 10)).await.unwrap();
        f.queue.enqueue(entry(c, 2, "T1", 10)).await.unwrap();

        assert_eq!(f.queue.mark_executing(c, &[1]).await.unwrap(), 1);
        // 1 already executing, 7 absent
        assert_eq!(f.queue.mark_executing(c, &[1, 2, 7]).await.unwrap(), 1);

        let e = f.queue.get_entry(c, 1).await.unwrap().unwrap();
        assert_eq!(e.status, QueueStatus::Executing);
        assert!(e.execution_time.is_some());
        assert!(f.queue.select_batch(c, 10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reset_to_waiting() {
        let f = Fixture::new();
        let c = f.channel("A", "B").await;
        f.queue.enqueue(entry(c, 1, "T1", 10)).await.unwrap();

        let err = f.queue.reset_to_waiting(c, 1).await.unwrap_err();
        assert!(matches!(err, TransferDbError::InvalidTransition(_)));

        f.queue.mark_executing(c, &[1]).await.unwrap();
        f.queue.reset_to_waiting(c, 1).await.unwrap();
        assert_eq!(
            f.queue
                .get_file_attribute(c, 1, FileAttributeName::ExecutionTime)
                .await
                .unwrap(),
            FileAttribute::ExecutionTime(None)
        );

        let err = f.queue.reset_to_waiting(c, 99).await.unwrap_err();
        assert!(matches!(err, TransferDbError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_release_dependents_ungates() {
        let f = Fixture::new();
        let c1 = f.channel("A", "B").await;
        let c2 = f.channel("B", "C").await;

        f.queue.enqueue(entry(c1, 1, "T1", 10)).await.unwrap();
        let mut gated = entry(c2, 1, "T1", 10);
        gated.ancestor_channel = Some(c1);
        f.queue.enqueue(gated).await.unwrap();

        assert!(f.queue.select_batch(c2, 10).await.unwrap().is_none());
        assert_eq!(f.queue.mark_executing(c2, &[1]).await.unwrap(), 0);

        // Wrong ancestor releases nothing
        assert_eq!(f.queue.release_dependents(c2, &[1]).await.unwrap(), 0);
        assert_eq!(f.queue.release_dependents(c1, &[1]).await.unwrap(), 1);

        let batch = f.queue.select_batch(c2, 10).await.unwrap().unwrap();
        assert_eq!(batch.files[0].file_id, 1);
    }

    #[tokio::test]
    async fn test_queue_stats_zero_filled() {
        let f = Fixture::new();
        let c1 = f.channel("A", "B").await;
        let c2 = f.channel("A", "C").await;
        f.queue.enqueue(entry(c1, 1, "T1", 100)).await.unwrap();
        f.queue.enqueue(entry(c1, 2, "T2", 50)).await.unwrap();
        f.queue.enqueue(entry(c1, 3, "T2", 25)).await.unwrap();
        f.queue.mark_executing(c1, &[3]).await.unwrap();

        let stats = f.queue.queue_stats().await.unwrap();
        assert_eq!(stats[&c1], QueueStats { files: 2, bytes: 150 });
        assert_eq!(stats[&c2], QueueStats::default());
    }

    #[tokio::test]
    async fn test_file_attribute_not_found() {
        let f = Fixture::new();
        let c = f.channel("A", "B").await;
        let err = f
            .queue
            .get_file_attribute(c, 1, FileAttributeName::Status)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferDbError::NotFound(_)));
    }
}
