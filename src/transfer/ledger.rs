//! FTS Request Ledger
//!
//! Lifecycle of a bulk submission unit:
//! created Submitted, polled round-robin by the monitor loop, moved to a
//! terminal status, then deleted once its files have been processed.
//!
//! Status moves are compare-and-set against the status read just before, so
//! two monitors racing on the same request cannot both apply a move.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::error::{TransferDbError, TransferDbResult};
use super::state::FtsStatus;
use super::store::TransferStore;
use super::types::{ChannelId, FtsReqId, FtsRequest, FtsRequestAttribute};

#[derive(Clone)]
pub struct FtsLedger {
    store: Arc<dyn TransferStore>,
}

impl FtsLedger {
    pub fn new(store: Arc<dyn TransferStore>) -> Self {
        Self { store }
    }

    /// Record a submitted FTS job and return its newly allocated id
    pub async fn create_request(
        &self,
        fts_guid: &str,
        fts_server: &str,
        channel_id: ChannelId,
    ) -> TransferDbResult<FtsReqId> {
        let request = self
            .store
            .insert_request(fts_guid, fts_server, channel_id)
            .await?;
        info!(
            fts_req_id = request.fts_req_id,
            fts_guid = fts_guid,
            channel_id = channel_id,
            "FTS request created"
        );
        Ok(request.fts_req_id)
    }

    pub async fn get_request(&self, fts_req_id: FtsReqId) -> TransferDbResult<Option<FtsRequest>> {
        self.store.get_request(fts_req_id).await
    }

    /// Every request in id order
    pub async fn list_requests(&self) -> TransferDbResult<Vec<FtsRequest>> {
        self.store.list_requests().await
    }

    fn not_found(fts_req_id: FtsReqId) -> TransferDbError {
        TransferDbError::NotFound(format!("FTS request {}", fts_req_id))
    }

    /// Move the request to `status`.
    ///
    /// Setting the current status again is a no-op. Leaving a terminal status
    /// fails with `InvalidTransition`, as does losing the race to another
    /// writer.
    pub async fn set_status(&self, fts_req_id: FtsReqId, status: FtsStatus) -> TransferDbResult<()> {
        let current = self
            .store
            .get_request(fts_req_id)
            .await?
            .ok_or_else(|| Self::not_found(fts_req_id))?
            .status;

        if current == status {
            debug!(fts_req_id = fts_req_id, status = %status, "FTS status unchanged");
            return Ok(());
        }
        if !current.can_transition_to(status) {
            warn!(
                fts_req_id = fts_req_id,
                from = %current,
                to = %status,
                "Rejected FTS status transition"
            );
            return Err(TransferDbError::InvalidTransition(format!(
                "FTS request {}: {} -> {}",
                fts_req_id, current, status
            )));
        }

        if !self
            .store
            .update_request_status_if(fts_req_id, current, status)
            .await?
        {
            // Deleted or moved by another writer since the read
            return match self.store.get_request(fts_req_id).await? {
                None => Err(Self::not_found(fts_req_id)),
                Some(now) => {
                    warn!(
                        fts_req_id = fts_req_id,
                        expected = %current,
                        actual = %now.status,
                        "FTS status changed concurrently"
                    );
                    Err(TransferDbError::InvalidTransition(format!(
                        "FTS request {}: expected {}, found {}",
                        fts_req_id, current, now.status
                    )))
                }
            };
        }

        if status.is_terminal() {
            info!(fts_req_id = fts_req_id, status = %status, "FTS request reached terminal status");
        } else {
            debug!(fts_req_id = fts_req_id, status = %status, "FTS status updated");
        }
        Ok(())
    }

    pub async fn set_attribute(
        &self,
        fts_req_id: FtsReqId,
        attribute: FtsRequestAttribute,
    ) -> TransferDbResult<()> {
        if !self.store.update_request(fts_req_id, &attribute).await? {
            return Err(Self::not_found(fts_req_id));
        }
        debug!(fts_req_id = fts_req_id, attribute = %attribute, "FTS request updated");
        Ok(())
    }

    /// Refresh the last monitor time to now, moving the request to the back
    /// of the monitoring round.
    pub async fn touch_monitor_time(&self, fts_req_id: FtsReqId) -> TransferDbResult<()> {
        if !self.store.touch_request(fts_req_id).await? {
            return Err(Self::not_found(fts_req_id));
        }
        Ok(())
    }

    /// Submitted request monitored longest ago, `None` when nothing is outstanding
    pub async fn get_next_to_monitor(&self) -> TransferDbResult<Option<FtsRequest>> {
        self.store.next_to_monitor().await
    }

    /// Delete the request together with its assignments and events.
    ///
    /// Callers read out what they still need (LFNs, job detail) first.
    pub async fn delete_request(&self, fts_req_id: FtsReqId) -> TransferDbResult<()> {
        if !self.store.delete_request(fts_req_id).await? {
            return Err(Self::not_found(fts_req_id));
        }
        info!(fts_req_id = fts_req_id, "FTS request deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::memory::MemoryTransferStore;

    async fn setup() -> (FtsLedger, ChannelId) {
        let store = Arc::new(MemoryTransferStore::new());
        let c = store.create_channel("CERN-disk", "RAL-tape").await.unwrap().channel_id;
        (FtsLedger::new(store), c)
    }

    #[tokio::test]
    async fn test_create_request_defaults() {
        let (ledger, c) = setup().await;
        let id = ledger.create_request("guid-1", "https://fts.cern.ch", c).await.unwrap();
        assert_eq!(id, 1);

        let req = ledger.get_request(id).await.unwrap().unwrap();
        assert_eq!(req.status, FtsStatus::Submitted);
        assert_eq!(req.fts_guid, "guid-1");
        assert_eq!(req.channel_id, c);
        assert_eq!(req.percentage_complete, 0.0);
    }

    #[tokio::test]
    async fn test_create_request_unknown_channel() {
        let (ledger, _) = setup().await;
        let err = ledger.create_request("g", "s", 77).await.unwrap_err();
        assert!(matches!(err, TransferDbError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_concurrent_creates_get_distinct_ids() {
        let (ledger, c) = setup().await;
        let mut handles = Vec::new();
        for i in 0..32 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .create_request(&format!("guid-{}", i), "https://fts", c)
                    .await
            }));
        }

        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap().unwrap());
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 32);

        // Later creates always get larger ids, gaps allowed
        let burst_max = *ids.last().unwrap();
        let mut previous = burst_max;
        for i in 0..4 {
            let id = ledger
                .create_request(&format!("after-{}", i), "https://fts", c)
                .await
                .unwrap();
            assert!(id > previous, "id {} not above {}", id, previous);
            previous = id;
        }
    }

    #[tokio::test]
    async fn test_status_transitions() {
        let (ledger, c) = setup().await;
        let id = ledger.create_request("g", "s", c).await.unwrap();

        ledger.set_status(id, FtsStatus::Submitted).await.unwrap();
        ledger.set_status(id, FtsStatus::FinishedDirty).await.unwrap();
        // Re-asserting a terminal status is allowed
        ledger.set_status(id, FtsStatus::FinishedDirty).await.unwrap();

        let err = ledger.set_status(id, FtsStatus::Submitted).await.unwrap_err();
        assert!(matches!(err, TransferDbError::InvalidTransition(_)));
        let err = ledger.set_status(id, FtsStatus::Finished).await.unwrap_err();
        assert!(matches!(err, TransferDbError::InvalidTransition(_)));

        let err = ledger.set_status(99, FtsStatus::Finished).await.unwrap_err();
        assert!(matches!(err, TransferDbError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_set_attribute() {
        let (ledger, c) = setup().await;
        let id = ledger.create_request("g", "s", c).await.unwrap();

        ledger
            .set_attribute(id, FtsRequestAttribute::PercentageComplete(62.5))
            .await
            .unwrap();
        ledger
            .set_attribute(id, FtsRequestAttribute::NumberOfFiles(4))
            .await
            .unwrap();
        ledger
            .set_attribute(id, FtsRequestAttribute::TotalSize(4000))
            .await
            .unwrap();
        ledger
            .set_attribute(id, FtsRequestAttribute::FtsServer("https://fts2".into()))
            .await
            .unwrap();

        let req = ledger.get_request(id).await.unwrap().unwrap();
        assert_eq!(req.percentage_complete, 62.5);
        assert_eq!(req.number_of_files, 4);
        assert_eq!(req.total_size, 4000);
        assert_eq!(req.fts_server, "https://fts2");

        let err = ledger
            .set_attribute(99, FtsRequestAttribute::TotalSize(1))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferDbError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_monitor_round_robin() {
        let (ledger, c) = setup().await;
        let a = ledger.create_request("a", "s", c).await.unwrap();
        let b = ledger.create_request("b", "s", c).await.unwrap();

        assert_eq!(ledger.get_next_to_monitor().await.unwrap().unwrap().fts_req_id, a);
        ledger.touch_monitor_time(a).await.unwrap();
        assert_eq!(ledger.get_next_to_monitor().await.unwrap().unwrap().fts_req_id, b);
        ledger.touch_monitor_time(b).await.unwrap();
        assert_eq!(ledger.get_next_to_monitor().await.unwrap().unwrap().fts_req_id, a);

        // Terminal requests drop out of the round
        ledger.set_status(a, FtsStatus::Finished).await.unwrap();
        ledger.set_status(b, FtsStatus::Failed).await.unwrap();
        assert!(ledger.get_next_to_monitor().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_request() {
        let (ledger, c) = setup().await;
        let id = ledger.create_request("g", "s", c).await.unwrap();
        ledger.delete_request(id).await.unwrap();

        assert!(ledger.get_request(id).await.unwrap().is_none());
        assert!(ledger.list_requests().await.unwrap().is_empty());
        let err = ledger.delete_request(id).await.unwrap_err();
        assert!(matches!(err, TransferDbError::NotFound(_)));
        let err = ledger.touch_monitor_time(id).await.unwrap_err();
        assert!(matches!(err, TransferDbError::NotFound(_)));
    }
}
