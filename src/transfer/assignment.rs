//! File-to-Request Assignment
//!
//! Binds queued files to the FTS request they were submitted in and records
//! the per-file outcome reported by the monitor. Once an assignment has a
//! terminal time it is read-only; the throughput monitor aggregates over it.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::error::{TransferDbError, TransferDbResult};
use super::store::TransferStore;
use super::types::{ChannelId, FileAssignment, FileId, FileJobDetail, FileOutcome, FtsReqId};

#[derive(Clone)]
pub struct FileAssignments {
    store: Arc<dyn TransferStore>,
}

impl FileAssignments {
    pub fn new(store: Arc<dyn TransferStore>) -> Self {
        Self { store }
    }

    /// Bind each file to the request, stopping at the first failure.
    ///
    /// The error names the failing file and the files bound before it.
    pub async fn assign_files(
        &self,
        fts_req_id: FtsReqId,
        file_ids: &[FileId],
        channel_id: ChannelId,
    ) -> TransferDbResult<()> {
        let mut assigned = Vec::with_capacity(file_ids.len());
        for &file_id in file_ids {
            if let Err(e) = self
                .store
                .insert_assignment(fts_req_id, file_id, channel_id)
                .await
            {
                warn!(
                    fts_req_id = fts_req_id,
                    file_id = file_id,
                    assigned = assigned.len(),
                    error = %e,
                    "File assignment stopped"
                );
                return Err(TransferDbError::partial(assigned, file_id, e));
            }
            assigned.push(file_id);
        }
        debug!(
            fts_req_id = fts_req_id,
            channel_id = channel_id,
            files = assigned.len(),
            "Files assigned to FTS request"
        );
        Ok(())
    }

    /// Explain why a guarded update on (request, file) did not apply
    async fn rejected(&self, fts_req_id: FtsReqId, file_id: FileId, action: &str) -> TransferDbError {
        match self.store.get_assignment(fts_req_id, file_id).await {
            Ok(Some(_)) => TransferDbError::InvalidTransition(format!(
                "cannot {} file {} of FTS request {}: already terminal",
                action, file_id, fts_req_id
            )),
            Ok(None) => TransferDbError::NotFound(format!(
                "file {} on FTS request {}",
                file_id, fts_req_id
            )),
            Err(e) => e,
        }
    }

    /// Write the monitor's view of one file; rejected once terminal
    pub async fn record_outcome(
        &self,
        fts_req_id: FtsReqId,
        file_id: FileId,
        outcome: FileOutcome,
    ) -> TransferDbResult<()> {
        if !outcome.status.is_outcome() {
            return Err(TransferDbError::InvalidTransition(format!(
                "outcome of file {} must be completed or failed, got {}",
                file_id, outcome.status
            )));
        }
        if !self
            .store
            .update_assignment_outcome(fts_req_id, file_id, &outcome)
            .await?
        {
            return Err(self.rejected(fts_req_id, file_id, "record outcome of").await);
        }
        debug!(
            fts_req_id = fts_req_id,
            file_id = file_id,
            status = %outcome.status,
            retries = outcome.retries,
            "File outcome recorded"
        );
        Ok(())
    }

    pub async fn mark_terminal(&self, fts_req_id: FtsReqId, file_id: FileId) -> TransferDbResult<()> {
        if !self.store.set_assignment_terminal(fts_req_id, file_id).await? {
            return Err(self.rejected(fts_req_id, file_id, "terminate").await);
        }
        debug!(fts_req_id = fts_req_id, file_id = file_id, "File assignment terminal");
        Ok(())
    }

    pub async fn get_assignment(
        &self,
        fts_req_id: FtsReqId,
        file_id: FileId,
    ) -> TransferDbResult<Option<FileAssignment>> {
        self.store.get_assignment(fts_req_id, file_id).await
    }

    pub async fn request_file_ids(&self, fts_req_id: FtsReqId) -> TransferDbResult<Vec<FileId>> {
        Ok(self
            .store
            .assignments_for(fts_req_id)
            .await?
            .into_iter()
            .map(|a| a.file_id)
            .collect())
    }

    /// LFN -> file id for every named file of the request
    pub async fn request_lfns(&self, fts_req_id: FtsReqId) -> TransferDbResult<HashMap<String, FileId>> {
        let lfns: HashMap<String, FileId> = self
            .store
            .assignment_details(fts_req_id)
            .await?
            .into_iter()
            .filter_map(|d| d.lfn.map(|lfn| (lfn, d.file_id)))
            .collect();
        if lfns.is_empty() {
            return Err(TransferDbError::NotFound(format!(
                "files of FTS request {}",
                fts_req_id
            )));
        }
        Ok(lfns)
    }

    /// Per-file view of a request for the monitoring client
    pub async fn job_detail(&self, fts_req_id: FtsReqId) -> TransferDbResult<Vec<FileJobDetail>> {
        self.store.assignment_details(fts_req_id).await
    }
}
