//! Transfer Store
//!
//! Persistence seam for the transfer database. Each method is one atomic
//! step against the shared store; components compose them and own the
//! policy (batch semantics, transition guards, selection).

use async_trait::async_trait;
use std::collections::HashMap;

use super::error::TransferDbResult;
use super::state::{ChannelStatus, FtsStatus, RegistrationStatus};
use super::types::{
    AssignmentSummary, BatchFile, Channel, ChannelAttribute, ChannelCreation, ChannelId,
    CatalogRegistration, FileAssignment, FileId, FileJobDetail, FileOutcome, FtsReqId, FtsRequest,
    FtsRequestAttribute, LoggingEvent, NewQueueEntry, NewRegistration, QueueEntry, QueueStats,
    ReplicationEdge, TreeEdge,
};

#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Check that the store is reachable
    async fn health_check(&self) -> TransferDbResult<()>;

    // === Channels ===

    /// Insert the pair as Active, or return the existing id.
    ///
    /// Existence check and insert are one atomic step.
    async fn create_channel(&self, source: &str, dest: &str) -> TransferDbResult<ChannelCreation>;

    async fn find_channel(&self, source: &str, dest: &str) -> TransferDbResult<Option<ChannelId>>;

    async fn get_channel(&self, channel_id: ChannelId) -> TransferDbResult<Option<Channel>>;

    /// Returns false when the channel does not exist
    async fn update_channel(
        &self,
        channel_id: ChannelId,
        attribute: &ChannelAttribute,
    ) -> TransferDbResult<bool>;

    /// Channels in id order, optionally filtered by status
    async fn list_channels(&self, status: Option<ChannelStatus>) -> TransferDbResult<Vec<Channel>>;

    // === File names ===

    async fn record_lfn(&self, file_id: FileId, lfn: &str) -> TransferDbResult<()>;

    async fn get_lfn(&self, file_id: FileId) -> TransferDbResult<Option<String>>;

    // === Transfer queue ===

    /// Fails with `DuplicateEntry` if the (channel, file) pair is queued
    async fn insert_queue_entry(&self, entry: &NewQueueEntry) -> TransferDbResult<()>;

    async fn get_queue_entry(
        &self,
        channel_id: ChannelId,
        file_id: FileId,
    ) -> TransferDbResult<Option<QueueEntry>>;

    /// Returns false when no such entry exists
    async fn delete_queue_entry(&self, channel_id: ChannelId, file_id: FileId)
    -> TransferDbResult<bool>;

    /// Move selectable entries to Executing, returns the number moved
    async fn mark_queue_executing(
        &self,
        channel_id: ChannelId,
        file_ids: &[FileId],
    ) -> TransferDbResult<u64>;

    /// Executing -> Waiting, clearing the execution time
    async fn reset_queue_entry(&self, channel_id: ChannelId, file_id: FileId)
    -> TransferDbResult<bool>;

    /// Clear the gate on Waiting entries that depend on `ancestor_channel`
    async fn release_dependents(
        &self,
        ancestor_channel: ChannelId,
        file_ids: &[FileId],
    ) -> TransferDbResult<u64>;

    /// Space token of the oldest selectable entry on the channel
    async fn oldest_space_token(&self, channel_id: ChannelId) -> TransferDbResult<Option<String>>;

    /// Oldest selectable entries with the given token, joined with their LFN
    async fn selectable_files(
        &self,
        channel_id: ChannelId,
        space_token: &str,
        limit: usize,
    ) -> TransferDbResult<Vec<BatchFile>>;

    /// Waiting counts per channel; channels without waiting files are absent
    async fn queue_stats(&self) -> TransferDbResult<HashMap<ChannelId, QueueStats>>;

    // === Replication tree ===

    async fn insert_tree_edge(&self, file_id: FileId, edge: &TreeEdge) -> TransferDbResult<()>;

    /// Edges of one file in channel order
    async fn tree_edges(&self, file_id: FileId) -> TransferDbResult<Vec<ReplicationEdge>>;

    // === FTS request ledger ===

    /// Allocate the id and insert in one step
    async fn insert_request(
        &self,
        fts_guid: &str,
        fts_server: &str,
        channel_id: ChannelId,
    ) -> TransferDbResult<FtsRequest>;

    async fn get_request(&self, fts_req_id: FtsReqId) -> TransferDbResult<Option<FtsRequest>>;

    /// CAS update: only applies if the current status is `expected`
    async fn update_request_status_if(
        &self,
        fts_req_id: FtsReqId,
        expected: FtsStatus,
        new_status: FtsStatus,
    ) -> TransferDbResult<bool>;

    async fn update_request(
        &self,
        fts_req_id: FtsReqId,
        attribute: &FtsRequestAttribute,
    ) -> TransferDbResult<bool>;

    async fn touch_request(&self, fts_req_id: FtsReqId) -> TransferDbResult<bool>;

    /// Submitted request with the oldest monitor time
    async fn next_to_monitor(&self) -> TransferDbResult<Option<FtsRequest>>;

    /// Submitted request counts for the given channels; zero counts are absent
    async fn count_submitted(
        &self,
        channel_ids: &[ChannelId],
    ) -> TransferDbResult<HashMap<ChannelId, u64>>;

    async fn list_requests(&self) -> TransferDbResult<Vec<FtsRequest>>;

    /// Delete the request together with its assignments and events
    async fn delete_request(&self, fts_req_id: FtsReqId) -> TransferDbResult<bool>;

    // === File to request assignment ===

    /// Fails with `NotFound` if the request is gone, `DuplicateEntry` if bound.
    /// The file size is captured from the (channel, file) queue entry.
    async fn insert_assignment(
        &self,
        fts_req_id: FtsReqId,
        file_id: FileId,
        channel_id: ChannelId,
    ) -> TransferDbResult<()>;

    async fn get_assignment(
        &self,
        fts_req_id: FtsReqId,
        file_id: FileId,
    ) -> TransferDbResult<Option<FileAssignment>>;

    /// Only applies while the assignment has no terminal time
    async fn update_assignment_outcome(
        &self,
        fts_req_id: FtsReqId,
        file_id: FileId,
        outcome: &FileOutcome,
    ) -> TransferDbResult<bool>;

    /// Stamp the terminal time, only if not yet set
    async fn set_assignment_terminal(
        &self,
        fts_req_id: FtsReqId,
        file_id: FileId,
    ) -> TransferDbResult<bool>;

    /// Assignments of one request in file order
    async fn assignments_for(&self, fts_req_id: FtsReqId) -> TransferDbResult<Vec<FileAssignment>>;

    /// Assignments of one request joined with their LFN, in file order
    async fn assignment_details(&self, fts_req_id: FtsReqId) -> TransferDbResult<Vec<FileJobDetail>>;

    /// Completed/failed aggregates over assignments submitted within the last
    /// `interval_secs` seconds of the store's own clock
    async fn assignment_summary(&self, interval_secs: u64) -> TransferDbResult<Vec<AssignmentSummary>>;

    // === Catalog registration ===

    async fn insert_registration(&self, registration: &NewRegistration) -> TransferDbResult<()>;

    async fn get_registration(
        &self,
        channel_id: ChannelId,
        file_id: FileId,
    ) -> TransferDbResult<Option<CatalogRegistration>>;

    async fn list_registrations(
        &self,
        status: RegistrationStatus,
    ) -> TransferDbResult<Vec<CatalogRegistration>>;

    /// CAS update; stamps the completion time when moving to Done
    async fn update_registration_status_if(
        &self,
        channel_id: ChannelId,
        file_id: FileId,
        expected: RegistrationStatus,
        new_status: RegistrationStatus,
    ) -> TransferDbResult<bool>;

    // === Event log ===

    async fn insert_event(&self, fts_req_id: FtsReqId, event: &str) -> TransferDbResult<LoggingEvent>;

    async fn events_for(&self, fts_req_id: FtsReqId) -> TransferDbResult<Vec<LoggingEvent>>;
}
