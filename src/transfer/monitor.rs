//! Throughput Monitor
//!
//! Per-channel transfer rates over a trailing window, derived purely from
//! assignment records submitted inside the window.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::error::TransferDbResult;
use super::store::TransferStore;
use super::types::{ChannelId, ChannelThroughput};

#[derive(Clone)]
pub struct ThroughputMonitor {
    store: Arc<dyn TransferStore>,
}

impl ThroughputMonitor {
    pub fn new(store: Arc<dyn TransferStore>) -> Self {
        Self { store }
    }

    /// Throughput of every channel over the last `interval_secs` seconds.
    ///
    /// Channels without qualifying assignments are present with all zeros.
    /// A zero interval yields zero rates.
    pub async fn throughput(&self, interval_secs: u64) -> TransferDbResult<BTreeMap<ChannelId, ChannelThroughput>> {
        let mut result: BTreeMap<ChannelId, ChannelThroughput> = self
            .store
            .list_channels(None)
            .await?
            .into_iter()
            .map(|c| (c.channel_id, ChannelThroughput::default()))
            .collect();

        // Window edge is taken from the store clock, which stamps submissions
        let interval = interval_secs as f64;
        for summary in self.store.assignment_summary(interval_secs).await? {
            let (throughput, fileput) = if interval_secs == 0 {
                (0.0, 0.0)
            } else {
                (
                    summary.completed_bytes as f64 / interval,
                    summary.completed_files as f64 / interval,
                )
            };
            result.insert(
                summary.channel_id,
                ChannelThroughput {
                    throughput,
                    fileput,
                    successful_files: summary.completed_files,
                    failed_files: summary.failed_files,
                },
            );
        }

        debug!(
            interval_secs = interval_secs,
            channels = result.len(),
            "Throughput computed"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::memory::MemoryTransferStore;
    use chrono::Duration;
    use crate::transfer::types::{FileOutcome, NewQueueEntry};

    async fn queued(store: &MemoryTransferStore, channel_id: ChannelId, file_id: i64, size: i64) {
        store
            .insert_queue_entry(&NewQueueEntry {
                channel_id,
                file_id,
                source_surl: "srm://a".into(),
                target_surl: "srm://b".into(),
                file_size: size,
                space_token: "T1".into(),
                ancestor_channel: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_idle_channel_reports_zeros() {
        let store = Arc::new(MemoryTransferStore::new());
        let c = store.create_channel("A", "B").await.unwrap().channel_id;

        let monitor = ThroughputMonitor::new(store);
        let t = monitor.throughput(3600).await.unwrap();
        assert_eq!(t[&c], ChannelThroughput::default());
    }

    #[tokio::test]
    async fn test_rates_and_counts() {
        let store = Arc::new(MemoryTransferStore::new());
        let c = store.create_channel("A", "B").await.unwrap().channel_id;
        queued(&store, c, 1, 1000).await;
        queued(&store, c, 2, 3000).await;
        queued(&store, c, 3, 500).await;

        let req = store.insert_request("g", "s", c).await.unwrap().fts_req_id;
        for f in [1, 2, 3, 4] {
            store.insert_assignment(req, f, c).await.unwrap();
        }
        store
            .update_assignment_outcome(req, 1, &FileOutcome::completed(10.0))
            .await
            .unwrap();
        store
            .update_assignment_outcome(req, 2, &FileOutcome::completed(20.0))
            .await
            .unwrap();
        store
            .update_assignment_outcome(req, 3, &FileOutcome::failed("checksum", 0))
            .await
            .unwrap();

        let monitor = ThroughputMonitor::new(store);
        let t = monitor.throughput(100).await.unwrap()[&c];
        assert_eq!(t.successful_files, 2);
        assert_eq!(t.failed_files, 1);
        assert_eq!(t.throughput, 40.0);
        assert_eq!(t.fileput, 0.02);

        let zero = monitor.throughput(0).await.unwrap()[&c];
        assert_eq!(zero.throughput, 0.0);
        assert_eq!(zero.fileput, 0.0);
    }

    #[tokio::test]
    async fn test_window_excludes_old_submissions() {
        let store = Arc::new(MemoryTransferStore::new());
        let c = store.create_channel("A", "B").await.unwrap().channel_id;
        queued(&store, c, 1, 1000).await;

        let req = store.insert_request("g", "s", c).await.unwrap().fts_req_id;
        store.insert_assignment(req, 1, c).await.unwrap();
        store
            .update_assignment_outcome(req, 1, &FileOutcome::completed(1.0))
            .await
            .unwrap();
        store.backdate_assignments(req, Duration::hours(2));

        let monitor = ThroughputMonitor::new(store);
        assert_eq!(
            monitor.throughput(3600).await.unwrap()[&c],
            ChannelThroughput::default()
        );
        assert_eq!(monitor.throughput(3 * 3600).await.unwrap()[&c].successful_files, 1);
    }

    #[tokio::test]
    async fn test_window_follows_store_clock() {
        let store = Arc::new(MemoryTransferStore::new());
        // Store clock an hour behind the host
        store.skew_clock(-Duration::hours(1));
        let c = store.create_channel("A", "B").await.unwrap().channel_id;
        queued(&store, c, 1, 1000).await;

        let req = store.insert_request("g", "s", c).await.unwrap().fts_req_id;
        store.insert_assignment(req, 1, c).await.unwrap();
        store
            .update_assignment_outcome(req, 1, &FileOutcome::completed(1.0))
            .await
            .unwrap();
        // 40 minutes old by the store clock, 100 minutes by the host clock
        store.backdate_assignments(req, Duration::minutes(40));

        let monitor = ThroughputMonitor::new(store);
        let t = monitor.throughput(3600).await.unwrap()[&c];
        assert_eq!(t.successful_files, 1);
        assert_eq!(t.throughput, 1000.0 / 3600.0);
    }
}
