//! In-memory Transfer Store
//!
//! All tables live behind one mutex, so every trait call is a single critical
//! section. This gives the same atomicity contract as the PostgreSQL store
//! for channel creation and request id allocation.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::error::{TransferDbError, TransferDbResult};
use super::state::{AssignmentStatus, ChannelStatus, FtsStatus, QueueStatus, RegistrationStatus};
use super::store::TransferStore;
use super::types::{
    AssignmentSummary, BatchFile, CatalogRegistration, Channel, ChannelAttribute,
    ChannelCreation, ChannelId, FileAssignment, FileId, FileJobDetail, FileOutcome, FtsReqId, FtsRequest,
    FtsRequestAttribute, LoggingEvent, NewQueueEntry, NewRegistration, QueueEntry, QueueStats,
    ReplicationEdge, TreeEdge,
};

#[derive(Default)]
struct MemoryState {
    last_tick: Option<DateTime<Utc>>,

    channels: BTreeMap<ChannelId, Channel>,
    last_channel_id: ChannelId,

    lfns: HashMap<FileId, String>,

    /// Value carries the insertion sequence to break submit-time ties
    queue: BTreeMap<(ChannelId, FileId), (u64, QueueEntry)>,
    queue_seq: u64,

    tree: BTreeMap<(FileId, ChannelId), ReplicationEdge>,

    requests: BTreeMap<FtsReqId, FtsRequest>,
    last_req_id: FtsReqId,

    assignments: BTreeMap<(FtsReqId, FileId), FileAssignment>,

    registrations: BTreeMap<(ChannelId, FileId), CatalogRegistration>,

    events: Vec<LoggingEvent>,
    last_event_id: i64,

    #[cfg(test)]
    fail_delete_of: Option<FileId>,
    #[cfg(test)]
    clock_offset: Option<Duration>,
}

impl MemoryState {
    /// Strictly increasing wall clock
    fn now(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        #[cfg(test)]
        if let Some(offset) = self.clock_offset {
            now = now + offset;
        }
        if let Some(last) = self.last_tick
            && now <= last
        {
            now = last + Duration::nanoseconds(1);
        }
        self.last_tick = Some(now);
        now
    }

    /// Selectable entries of a channel, oldest first
    fn selectable(&self, channel_id: ChannelId) -> Vec<&(u64, QueueEntry)> {
        let mut rows: Vec<_> = self
            .queue
            .range((channel_id, FileId::MIN)..=(channel_id, FileId::MAX))
            .map(|(_, v)| v)
            .filter(|(_, e)| e.is_selectable())
            .collect();
        rows.sort_by(|(sa, a), (sb, b)| a.submit_time.cmp(&b.submit_time).then(sa.cmp(sb)));
        rows
    }
}

/// Transfer store held entirely in process memory
#[derive(Default)]
pub struct MemoryTransferStore {
    state: Mutex<MemoryState>,
}

impl MemoryTransferStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> TransferDbResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| TransferDbError::InfrastructureError("memory store poisoned".to_string()))
    }

    /// Make deleting this file's queue entries fail with an infrastructure error
    #[cfg(test)]
    pub(crate) fn set_fail_delete(&self, file_id: Option<FileId>) {
        self.state.lock().unwrap().fail_delete_of = file_id;
    }

    /// Run the store clock ahead of (or behind) the host clock
    #[cfg(test)]
    pub(crate) fn skew_clock(&self, offset: Duration) {
        let mut state = self.state.lock().unwrap();
        state.clock_offset = Some(offset);
        state.last_tick = None;
    }

    /// Shift submission times of a request's assignments into the past
    #[cfg(test)]
    pub(crate) fn backdate_assignments(&self, fts_req_id: FtsReqId, by: Duration) {
        let mut state = self.state.lock().unwrap();
        for ((req, _), a) in state.assignments.iter_mut() {
            if *req == fts_req_id {
                a.submission_time -= by;
            }
        }
    }
}

#[async_trait]
impl TransferStore for MemoryTransferStore {
    async fn health_check(&self) -> TransferDbResult<()> {
        self.state().map(|_| ())
    }

    // === Channels ===

    async fn create_channel(&self, source: &str, dest: &str) -> TransferDbResult<ChannelCreation> {
        let mut state = self.state()?;
        if let Some(existing) = state
            .channels
            .values()
            .find(|c| c.source_site == source && c.destination_site == dest)
        {
            return Ok(ChannelCreation {
                channel_id: existing.channel_id,
                created: false,
            });
        }

        state.last_channel_id += 1;
        let channel_id = state.last_channel_id;
        state.channels.insert(
            channel_id,
            Channel {
                channel_id,
                source_site: source.to_string(),
                destination_site: dest.to_string(),
                status: ChannelStatus::Active,
                channel_name: None,
            },
        );
        Ok(ChannelCreation {
            channel_id,
            created: true,
        })
    }

    async fn find_channel(&self, source: &str, dest: &str) -> TransferDbResult<Option<ChannelId>> {
        let state = self.state()?;
        Ok(state
            .channels
            .values()
            .find(|c| c.source_site == source && c.destination_site == dest)
            .map(|c| c.channel_id))
    }

    async fn get_channel(&self, channel_id: ChannelId) -> TransferDbResult<Option<Channel>> {
        Ok(self.state()?.channels.get(&channel_id).cloned())
    }

    async fn update_channel(
        &self,
        channel_id: ChannelId,
        attribute: &ChannelAttribute,
    ) -> TransferDbResult<bool> {
        let mut state = self.state()?;
        let Some(channel) = state.channels.get_mut(&channel_id) else {
            return Ok(false);
        };
        match attribute {
            ChannelAttribute::Status(status) => channel.status = *status,
            ChannelAttribute::ChannelName(name) => channel.channel_name = name.clone(),
        }
        Ok(true)
    }

    async fn list_channels(&self, status: Option<ChannelStatus>) -> TransferDbResult<Vec<Channel>> {
        let state = self.state()?;
        Ok(state
            .channels
            .values()
            .filter(|c| status.is_none_or(|s| c.status == s))
            .cloned()
            .collect())
    }

    // === File names ===

    async fn record_lfn(&self, file_id: FileId, lfn: &str) -> TransferDbResult<()> {
        self.state()?.lfns.insert(file_id, lfn.to_string());
        Ok(())
    }

    async fn get_lfn(&self, file_id: FileId) -> TransferDbResult<Option<String>> {
        Ok(self.state()?.lfns.get(&file_id).cloned())
    }

    // === Transfer queue ===

    async fn insert_queue_entry(&self, entry: &NewQueueEntry) -> TransferDbResult<()> {
        let mut state = self.state()?;
        if !state.channels.contains_key(&entry.channel_id) {
            return Err(TransferDbError::NotFound(format!(
                "channel {}",
                entry.channel_id
            )));
        }
        let key = (entry.channel_id, entry.file_id);
        if state.queue.contains_key(&key) {
            return Err(TransferDbError::DuplicateEntry(format!(
                "file {} on channel {}",
                entry.file_id, entry.channel_id
            )));
        }

        let submit_time = state.now();
        state.queue_seq += 1;
        let seq = state.queue_seq;
        state.queue.insert(
            key,
            (
                seq,
                QueueEntry {
                    channel_id: entry.channel_id,
                    file_id: entry.file_id,
                    source_surl: entry.source_surl.clone(),
                    target_surl: entry.target_surl.clone(),
                    space_token: entry.space_token.clone(),
                    file_size: entry.file_size,
                    submit_time,
                    execution_time: None,
                    status: QueueStatus::Waiting,
                    ancestor_channel: entry.ancestor_channel,
                },
            ),
        );
        Ok(())
    }

    async fn get_queue_entry(
        &self,
        channel_id: ChannelId,
        file_id: FileId,
    ) -> TransferDbResult<Option<QueueEntry>> {
        let state = self.state()?;
        Ok(state
            .queue
            .get(&(channel_id, file_id))
            .map(|(_, e)| e.clone()))
    }

    async fn delete_queue_entry(
        &self,
        channel_id: ChannelId,
        file_id: FileId,
    ) -> TransferDbResult<bool> {
        let mut state = self.state()?;
        #[cfg(test)]
        if state.fail_delete_of == Some(file_id) {
            return Err(TransferDbError::InfrastructureError(format!(
                "injected delete failure for file {}",
                file_id
            )));
        }
        Ok(state.queue.remove(&(channel_id, file_id)).is_some())
    }

    async fn mark_queue_executing(
        &self,
        channel_id: ChannelId,
        file_ids: &[FileId],
    ) -> TransferDbResult<u64> {
        let mut state = self.state()?;
        let now = state.now();
        let mut moved = 0;
        for file_id in file_ids {
            if let Some((_, entry)) = state.queue.get_mut(&(channel_id, *file_id))
                && entry.is_selectable()
            {
                entry.status = QueueStatus::Executing;
                entry.execution_time = Some(now);
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn reset_queue_entry(
        &self,
        channel_id: ChannelId,
        file_id: FileId,
    ) -> TransferDbResult<bool> {
        let mut state = self.state()?;
        match state.queue.get_mut(&(channel_id, file_id)) {
            Some((_, entry)) if entry.status == QueueStatus::Executing => {
                entry.status = QueueStatus::Waiting;
                entry.execution_time = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_dependents(
        &self,
        ancestor_channel: ChannelId,
        file_ids: &[FileId],
    ) -> TransferDbResult<u64> {
        let mut state = self.state()?;
        let mut released = 0;
        for (_, entry) in state.queue.values_mut() {
            if entry.status == QueueStatus::Waiting
                && entry.ancestor_channel == Some(ancestor_channel)
                && file_ids.contains(&entry.file_id)
            {
                entry.ancestor_channel = None;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn oldest_space_token(&self, channel_id: ChannelId) -> TransferDbResult<Option<String>> {
        let state = self.state()?;
        Ok(state
            .selectable(channel_id)
            .first()
            .map(|(_, e)| e.space_token.clone()))
    }

    async fn selectable_files(
        &self,
        channel_id: ChannelId,
        space_token: &str,
        limit: usize,
    ) -> TransferDbResult<Vec<BatchFile>> {
        let state = self.state()?;
        Ok(state
            .selectable(channel_id)
            .into_iter()
            .filter(|(_, e)| e.space_token == space_token)
            .take(limit)
            .map(|(_, e)| BatchFile {
                file_id: e.file_id,
                source_surl: e.source_surl.clone(),
                target_surl: e.target_surl.clone(),
                lfn: state.lfns.get(&e.file_id).cloned(),
                size: e.file_size,
            })
            .collect())
    }

    async fn queue_stats(&self) -> TransferDbResult<HashMap<ChannelId, QueueStats>> {
        let state = self.state()?;
        let mut stats: HashMap<ChannelId, QueueStats> = HashMap::new();
        for (_, entry) in state.queue.values() {
            if entry.status == QueueStatus::Waiting {
                let s = stats.entry(entry.channel_id).or_default();
                s.files += 1;
                s.bytes += entry.file_size.max(0) as u64;
            }
        }
        Ok(stats)
    }

    // === Replication tree ===

    async fn insert_tree_edge(&self, file_id: FileId, edge: &TreeEdge) -> TransferDbResult<()> {
        let mut state = self.state()?;
        if !state.channels.contains_key(&edge.channel_id) {
            return Err(TransferDbError::NotFound(format!(
                "channel {}",
                edge.channel_id
            )));
        }
        let key = (file_id, edge.channel_id);
        if state.tree.contains_key(&key) {
            return Err(TransferDbError::DuplicateEntry(format!(
                "tree edge for file {} on channel {}",
                file_id, edge.channel_id
            )));
        }
        let creation_time = state.now();
        state.tree.insert(
            key,
            ReplicationEdge {
                file_id,
                channel_id: edge.channel_id,
                ancestor_channel: edge.ancestor_channel,
                strategy: edge.strategy.clone(),
                creation_time,
            },
        );
        Ok(())
    }

    async fn tree_edges(&self, file_id: FileId) -> TransferDbResult<Vec<ReplicationEdge>> {
        let state = self.state()?;
        Ok(state
            .tree
            .range((file_id, ChannelId::MIN)..=(file_id, ChannelId::MAX))
            .map(|(_, e)| e.clone())
            .collect())
    }

    // === FTS request ledger ===

    async fn insert_request(
        &self,
        fts_guid: &str,
        fts_server: &str,
        channel_id: ChannelId,
    ) -> TransferDbResult<FtsRequest> {
        let mut state = self.state()?;
        if !state.channels.contains_key(&channel_id) {
            return Err(TransferDbError::NotFound(format!("channel {}", channel_id)));
        }
        let now = state.now();
        state.last_req_id += 1;
        let request = FtsRequest {
            fts_req_id: state.last_req_id,
            fts_guid: fts_guid.to_string(),
            fts_server: fts_server.to_string(),
            channel_id,
            status: FtsStatus::Submitted,
            submit_time: now,
            last_monitor: now,
            percentage_complete: 0.0,
            number_of_files: 0,
            total_size: 0,
        };
        state.requests.insert(request.fts_req_id, request.clone());
        Ok(request)
    }

    async fn get_request(&self, fts_req_id: FtsReqId) -> TransferDbResult<Option<FtsRequest>> {
        Ok(self.state()?.requests.get(&fts_req_id).cloned())
    }

    async fn update_request_status_if(
        &self,
        fts_req_id: FtsReqId,
        expected: FtsStatus,
        new_status: FtsStatus,
    ) -> TransferDbResult<bool> {
        let mut state = self.state()?;
        match state.requests.get_mut(&fts_req_id) {
            Some(req) if req.status == expected => {
                req.status = new_status;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_request(
        &self,
        fts_req_id: FtsReqId,
        attribute: &FtsRequestAttribute,
    ) -> TransferDbResult<bool> {
        let mut state = self.state()?;
        let Some(req) = state.requests.get_mut(&fts_req_id) else {
            return Ok(false);
        };
        match attribute {
            FtsRequestAttribute::PercentageComplete(v) => req.percentage_complete = *v,
            FtsRequestAttribute::NumberOfFiles(v) => req.number_of_files = *v,
            FtsRequestAttribute::TotalSize(v) => req.total_size = *v,
            FtsRequestAttribute::FtsServer(v) => req.fts_server = v.clone(),
        }
        Ok(true)
    }

    async fn touch_request(&self, fts_req_id: FtsReqId) -> TransferDbResult<bool> {
        let mut state = self.state()?;
        let now = state.now();
        match state.requests.get_mut(&fts_req_id) {
            Some(req) => {
                req.last_monitor = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn next_to_monitor(&self) -> TransferDbResult<Option<FtsRequest>> {
        let state = self.state()?;
        Ok(state
            .requests
            .values()
            .filter(|r| r.status == FtsStatus::Submitted)
            .min_by(|a, b| {
                a.last_monitor
                    .cmp(&b.last_monitor)
                    .then(a.fts_req_id.cmp(&b.fts_req_id))
            })
            .cloned())
    }

    async fn count_submitted(
        &self,
        channel_ids: &[ChannelId],
    ) -> TransferDbResult<HashMap<ChannelId, u64>> {
        let state = self.state()?;
        let mut counts = HashMap::new();
        for req in state.requests.values() {
            if req.status == FtsStatus::Submitted && channel_ids.contains(&req.channel_id) {
                *counts.entry(req.channel_id).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn list_requests(&self) -> TransferDbResult<Vec<FtsRequest>> {
        Ok(self.state()?.requests.values().cloned().collect())
    }

    async fn delete_request(&self, fts_req_id: FtsReqId) -> TransferDbResult<bool> {
        let mut state = self.state()?;
        if state.requests.remove(&fts_req_id).is_none() {
            return Ok(false);
        }
        state.assignments.retain(|(req, _), _| *req != fts_req_id);
        state.events.retain(|e| e.fts_req_id != fts_req_id);
        Ok(true)
    }

    // === File to request assignment ===

    async fn insert_assignment(
        &self,
        fts_req_id: FtsReqId,
        file_id: FileId,
        channel_id: ChannelId,
    ) -> TransferDbResult<()> {
        let mut state = self.state()?;
        if !state.requests.contains_key(&fts_req_id) {
            return Err(TransferDbError::NotFound(format!(
                "FTS request {}",
                fts_req_id
            )));
        }
        let key = (fts_req_id, file_id);
        if state.assignments.contains_key(&key) {
            return Err(TransferDbError::DuplicateEntry(format!(
                "file {} on FTS request {}",
                file_id, fts_req_id
            )));
        }
        let file_size = state
            .queue
            .get(&(channel_id, file_id))
            .map(|(_, e)| e.file_size)
            .unwrap_or(0);
        let submission_time = state.now();
        state.assignments.insert(
            key,
            FileAssignment {
                fts_req_id,
                file_id,
                channel_id,
                submission_time,
                terminal_time: None,
                status: AssignmentStatus::Submitted,
                duration: 0.0,
                reason: None,
                retries: 0,
                file_size,
            },
        );
        Ok(())
    }

    async fn get_assignment(
        &self,
        fts_req_id: FtsReqId,
        file_id: FileId,
    ) -> TransferDbResult<Option<FileAssignment>> {
        Ok(self.state()?.assignments.get(&(fts_req_id, file_id)).cloned())
    }

    async fn update_assignment_outcome(
        &self,
        fts_req_id: FtsReqId,
        file_id: FileId,
        outcome: &FileOutcome,
    ) -> TransferDbResult<bool> {
        let mut state = self.state()?;
        match state.assignments.get_mut(&(fts_req_id, file_id)) {
            Some(a) if !a.is_terminal() => {
                a.status = outcome.status;
                a.duration = outcome.duration;
                a.reason = outcome.reason.clone();
                a.retries = outcome.retries;
                if let Some(size) = outcome.file_size {
                    a.file_size = size;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_assignment_terminal(
        &self,
        fts_req_id: FtsReqId,
        file_id: FileId,
    ) -> TransferDbResult<bool> {
        let mut state = self.state()?;
        let now = state.now();
        match state.assignments.get_mut(&(fts_req_id, file_id)) {
            Some(a) if !a.is_terminal() => {
                a.terminal_time = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn assignments_for(&self, fts_req_id: FtsReqId) -> TransferDbResult<Vec<FileAssignment>> {
        let state = self.state()?;
        Ok(state
            .assignments
            .range((fts_req_id, FileId::MIN)..=(fts_req_id, FileId::MAX))
            .map(|(_, a)| a.clone())
            .collect())
    }

    async fn assignment_details(&self, fts_req_id: FtsReqId) -> TransferDbResult<Vec<FileJobDetail>> {
        let state = self.state()?;
        Ok(state
            .assignments
            .range((fts_req_id, FileId::MIN)..=(fts_req_id, FileId::MAX))
            .map(|(_, a)| FileJobDetail {
                file_id: a.file_id,
                lfn: state.lfns.get(&a.file_id).cloned(),
                status: a.status,
                duration: a.duration,
                reason: a.reason.clone(),
                retries: a.retries,
                file_size: a.file_size,
            })
            .collect())
    }

    async fn assignment_summary(&self, interval_secs: u64) -> TransferDbResult<Vec<AssignmentSummary>> {
        let mut state = self.state()?;
        let now = state.now();
        let since = i64::try_from(interval_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut by_channel: BTreeMap<ChannelId, AssignmentSummary> = BTreeMap::new();
        for a in state.assignments.values() {
            if a.submission_time <= since {
                continue;
            }
            let s = by_channel.entry(a.channel_id).or_insert(AssignmentSummary {
                channel_id: a.channel_id,
                ..Default::default()
            });
            match a.status {
                AssignmentStatus::Completed => {
                    s.completed_files += 1;
                    s.completed_bytes += a.file_size.max(0) as u64;
                }
                AssignmentStatus::Failed => s.failed_files += 1,
                AssignmentStatus::Submitted => {}
            }
        }
        Ok(by_channel.into_values().collect())
    }

    // === Catalog registration ===

    async fn insert_registration(&self, registration: &NewRegistration) -> TransferDbResult<()> {
        let mut state = self.state()?;
        let key = (registration.channel_id, registration.file_id);
        if state.registrations.contains_key(&key) {
            return Err(TransferDbError::DuplicateEntry(format!(
                "registration of file {} on channel {}",
                registration.file_id, registration.channel_id
            )));
        }
        let submit_time = state.now();
        state.registrations.insert(
            key,
            CatalogRegistration {
                channel_id: registration.channel_id,
                file_id: registration.file_id,
                lfn: registration.lfn.clone(),
                pfn: registration.pfn.clone(),
                storage_element: registration.storage_element.clone(),
                status: RegistrationStatus::Waiting,
                submit_time,
                complete_time: None,
            },
        );
        Ok(())
    }

    async fn get_registration(
        &self,
        channel_id: ChannelId,
        file_id: FileId,
    ) -> TransferDbResult<Option<CatalogRegistration>> {
        Ok(self
            .state()?
            .registrations
            .get(&(channel_id, file_id))
            .cloned())
    }

    async fn list_registrations(
        &self,
        status: RegistrationStatus,
    ) -> TransferDbResult<Vec<CatalogRegistration>> {
        let state = self.state()?;
        Ok(state
            .registrations
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect())
    }

    async fn update_registration_status_if(
        &self,
        channel_id: ChannelId,
        file_id: FileId,
        expected: RegistrationStatus,
        new_status: RegistrationStatus,
    ) -> TransferDbResult<bool> {
        let mut state = self.state()?;
        let now = state.now();
        match state.registrations.get_mut(&(channel_id, file_id)) {
            Some(r) if r.status == expected => {
                r.status = new_status;
                if new_status == RegistrationStatus::Done {
                    r.complete_time = Some(now);
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    // === Event log ===

    async fn insert_event(&self, fts_req_id: FtsReqId, event: &str) -> TransferDbResult<LoggingEvent> {
        let mut state = self.state()?;
        let event_time = state.now();
        state.last_event_id += 1;
        let logged = LoggingEvent {
            event_id: state.last_event_id,
            fts_req_id,
            event: event.to_string(),
            event_time,
        };
        state.events.push(logged.clone());
        Ok(logged)
    }

    async fn events_for(&self, fts_req_id: FtsReqId) -> TransferDbResult<Vec<LoggingEvent>> {
        let state = self.state()?;
        Ok(state
            .events
            .iter()
            .filter(|e| e.fts_req_id == fts_req_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(channel_id: ChannelId, file_id: FileId, token: &str) -> NewQueueEntry {
        NewQueueEntry {
            channel_id,
            file_id,
            source_surl: format!("srm://src/{}", file_id),
            target_surl: format!("srm://dst/{}", file_id),
            file_size: 100,
            space_token: token.to_string(),
            ancestor_channel: None,
        }
    }

    #[tokio::test]
    async fn test_clock_is_strictly_increasing() {
        let store = MemoryTransferStore::new();
        let mut state = store.state().unwrap();
        let a = state.now();
        let b = state.now();
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_queue_requires_channel() {
        let store = MemoryTransferStore::new();
        let err = store.insert_queue_entry(&entry(9, 1, "T1")).await.unwrap_err();
        assert!(matches!(err, TransferDbError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_oldest_token_skips_gated_entries() {
        let store = MemoryTransferStore::new();
        let c = store.create_channel("A", "B").await.unwrap().channel_id;

        let mut gated = entry(c, 1, "OLD");
        gated.ancestor_channel = Some(42);
        store.insert_queue_entry(&gated).await.unwrap();
        store.insert_queue_entry(&entry(c, 2, "NEW")).await.unwrap();

        assert_eq!(
            store.oldest_space_token(c).await.unwrap().as_deref(),
            Some("NEW")
        );
        // Gated entries still count as waiting
        assert_eq!(store.queue_stats().await.unwrap()[&c].files, 2);
    }

    #[tokio::test]
    async fn test_delete_request_cascades() {
        let store = MemoryTransferStore::new();
        let c = store.create_channel("A", "B").await.unwrap().channel_id;
        let req = store.insert_request("guid", "https://fts", c).await.unwrap();
        store.insert_assignment(req.fts_req_id, 1, c).await.unwrap();
        store.insert_event(req.fts_req_id, "submitted").await.unwrap();

        assert!(store.delete_request(req.fts_req_id).await.unwrap());
        assert!(store.assignments_for(req.fts_req_id).await.unwrap().is_empty());
        assert!(store.events_for(req.fts_req_id).await.unwrap().is_empty());
        assert!(!store.delete_request(req.fts_req_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_assignment_details_join_lfns() {
        let store = MemoryTransferStore::new();
        let c = store.create_channel("A", "B").await.unwrap().channel_id;
        let req = store.insert_request("guid", "https://fts", c).await.unwrap().fts_req_id;
        let other = store.insert_request("guid2", "https://fts", c).await.unwrap().fts_req_id;
        store.record_lfn(2, "/lhcb/f2").await.unwrap();
        store.insert_assignment(req, 2, c).await.unwrap();
        store.insert_assignment(req, 1, c).await.unwrap();
        store.insert_assignment(other, 3, c).await.unwrap();

        let details = store.assignment_details(req).await.unwrap();
        let view: Vec<_> = details.iter().map(|d| (d.file_id, d.lfn.as_deref())).collect();
        assert_eq!(view, vec![(1, None), (2, Some("/lhcb/f2"))]);
        assert!(store.assignment_details(99).await.unwrap().is_empty());
    }
}
