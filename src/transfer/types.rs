//! Transfer Core Types
//!
//! Row types for the eight tables plus the typed attribute enums that replace
//! free-form column names.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use super::state::{AssignmentStatus, ChannelStatus, FtsStatus, QueueStatus, RegistrationStatus};

/// Channel identifier, assigned once per (source, destination) pair
pub type ChannelId = i64;

/// File identifier, allocated by the request database upstream
pub type FileId = i64;

/// FTS request identifier, allocated by the ledger
pub type FtsReqId = i64;

// ============================================================================
// Channels
// ============================================================================

/// A directed site-to-site transfer route
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Channel {
    pub channel_id: ChannelId,
    pub source_site: String,
    pub destination_site: String,
    pub status: ChannelStatus,
    pub channel_name: Option<String>,
}

/// Result of an idempotent channel creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelCreation {
    pub channel_id: ChannelId,
    /// False when the pair already existed and its id was returned
    pub created: bool,
}

/// Channel attribute names that may be read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelAttributeName {
    Status,
    ChannelName,
}

/// Channel attribute with its typed value
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelAttribute {
    Status(ChannelStatus),
    ChannelName(Option<String>),
}

impl ChannelAttribute {
    pub fn name(&self) -> ChannelAttributeName {
        match self {
            ChannelAttribute::Status(_) => ChannelAttributeName::Status,
            ChannelAttribute::ChannelName(_) => ChannelAttributeName::ChannelName,
        }
    }

    pub(crate) fn read(channel: &Channel, name: ChannelAttributeName) -> Self {
        match name {
            ChannelAttributeName::Status => ChannelAttribute::Status(channel.status),
            ChannelAttributeName::ChannelName => {
                ChannelAttribute::ChannelName(channel.channel_name.clone())
            }
        }
    }
}

// ============================================================================
// Transfer queue
// ============================================================================

/// New queue entry as supplied by the producer
#[derive(Debug, Clone, PartialEq)]
pub struct NewQueueEntry {
    pub channel_id: ChannelId,
    pub file_id: FileId,
    pub source_surl: String,
    pub target_surl: String,
    pub file_size: i64,
    pub space_token: String,
    /// Channel that must complete this file first, if any
    pub ancestor_channel: Option<ChannelId>,
}

/// One file queued on one channel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueEntry {
    pub channel_id: ChannelId,
    pub file_id: FileId,
    pub source_surl: String,
    pub target_surl: String,
    pub space_token: String,
    pub file_size: i64,
    pub submit_time: DateTime<Utc>,
    pub execution_time: Option<DateTime<Utc>>,
    pub status: QueueStatus,
    pub ancestor_channel: Option<ChannelId>,
}

impl QueueEntry {
    /// Waiting and not gated on an ancestor channel
    pub fn is_selectable(&self) -> bool {
        self.status == QueueStatus::Waiting && self.ancestor_channel.is_none()
    }
}

/// Queue entry attribute names that may be read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAttributeName {
    Status,
    SpaceToken,
    FileSize,
    SourceSurl,
    TargetSurl,
    SubmitTime,
    ExecutionTime,
}

/// Queue entry attribute with its typed value
#[derive(Debug, Clone, PartialEq)]
pub enum FileAttribute {
    Status(QueueStatus),
    SpaceToken(String),
    FileSize(i64),
    SourceSurl(String),
    TargetSurl(String),
    SubmitTime(DateTime<Utc>),
    ExecutionTime(Option<DateTime<Utc>>),
}

impl FileAttribute {
    pub(crate) fn read(entry: &QueueEntry, name: FileAttributeName) -> Self {
        match name {
            FileAttributeName::Status => FileAttribute::Status(entry.status),
            FileAttributeName::SpaceToken => FileAttribute::SpaceToken(entry.space_token.clone()),
            FileAttributeName::FileSize => FileAttribute::FileSize(entry.file_size),
            FileAttributeName::SourceSurl => FileAttribute::SourceSurl(entry.source_surl.clone()),
            FileAttributeName::TargetSurl => FileAttribute::TargetSurl(entry.target_surl.clone()),
            FileAttributeName::SubmitTime => FileAttribute::SubmitTime(entry.submit_time),
            FileAttributeName::ExecutionTime => FileAttribute::ExecutionTime(entry.execution_time),
        }
    }
}

/// A file picked for submission
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchFile {
    pub file_id: FileId,
    pub source_surl: String,
    pub target_surl: String,
    pub lfn: Option<String>,
    pub size: i64,
}

/// A homogeneous batch: every file shares `space_token`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Batch {
    pub space_token: String,
    pub files: Vec<BatchFile>,
}

/// Waiting files on one channel (gated entries included)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct QueueStats {
    pub files: u64,
    pub bytes: u64,
}

// ============================================================================
// Replication tree
// ============================================================================

/// One hop of a file's replication plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEdge {
    pub channel_id: ChannelId,
    pub ancestor_channel: Option<ChannelId>,
    pub strategy: String,
}

/// Stored replication tree edge
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplicationEdge {
    pub file_id: FileId,
    pub channel_id: ChannelId,
    pub ancestor_channel: Option<ChannelId>,
    pub strategy: String,
    pub creation_time: DateTime<Utc>,
}

// ============================================================================
// FTS request ledger
// ============================================================================

/// One bulk submission to FTS
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FtsRequest {
    pub fts_req_id: FtsReqId,
    pub fts_guid: String,
    pub fts_server: String,
    pub channel_id: ChannelId,
    pub status: FtsStatus,
    pub submit_time: DateTime<Utc>,
    pub last_monitor: DateTime<Utc>,
    pub percentage_complete: f64,
    pub number_of_files: i64,
    pub total_size: i64,
}

/// Mutable FTS request attributes other than status
#[derive(Debug, Clone, PartialEq)]
pub enum FtsRequestAttribute {
    PercentageComplete(f64),
    NumberOfFiles(i64),
    TotalSize(i64),
    FtsServer(String),
}

impl fmt::Display for FtsRequestAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FtsRequestAttribute::PercentageComplete(v) => write!(f, "percentage_complete={}", v),
            FtsRequestAttribute::NumberOfFiles(v) => write!(f, "number_of_files={}", v),
            FtsRequestAttribute::TotalSize(v) => write!(f, "total_size={}", v),
            FtsRequestAttribute::FtsServer(v) => write!(f, "fts_server={}", v),
        }
    }
}

// ============================================================================
// File to request assignment
// ============================================================================

/// A file bound to an FTS request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileAssignment {
    pub fts_req_id: FtsReqId,
    pub file_id: FileId,
    pub channel_id: ChannelId,
    pub submission_time: DateTime<Utc>,
    pub terminal_time: Option<DateTime<Utc>>,
    pub status: AssignmentStatus,
    pub duration: f64,
    pub reason: Option<String>,
    pub retries: i32,
    pub file_size: i64,
}

impl FileAssignment {
    pub fn is_terminal(&self) -> bool {
        self.terminal_time.is_some()
    }
}

/// Per-file result reported by the FTS monitor
#[derive(Debug, Clone, PartialEq)]
pub struct FileOutcome {
    pub status: AssignmentStatus,
    /// Transfer duration in seconds
    pub duration: f64,
    pub reason: Option<String>,
    pub retries: i32,
    /// Size reported by FTS; keeps the queued size when absent
    pub file_size: Option<i64>,
}

impl FileOutcome {
    pub fn completed(duration: f64) -> Self {
        Self {
            status: AssignmentStatus::Completed,
            duration,
            reason: None,
            retries: 0,
            file_size: None,
        }
    }

    pub fn failed(reason: impl Into<String>, retries: i32) -> Self {
        Self {
            status: AssignmentStatus::Failed,
            duration: 0.0,
            reason: Some(reason.into()),
            retries,
            file_size: None,
        }
    }
}

/// Per-file row of the job detail view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileJobDetail {
    pub file_id: FileId,
    pub lfn: Option<String>,
    pub status: AssignmentStatus,
    pub duration: f64,
    pub reason: Option<String>,
    pub retries: i32,
    pub file_size: i64,
}

/// Aggregate over assignments submitted inside a window, one per channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AssignmentSummary {
    pub channel_id: ChannelId,
    pub completed_files: u64,
    pub failed_files: u64,
    pub completed_bytes: u64,
}

/// Observed channel performance over a trailing window
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ChannelThroughput {
    /// Completed bytes per second
    pub throughput: f64,
    /// Completed files per second
    pub fileput: f64,
    pub successful_files: u64,
    pub failed_files: u64,
}

impl ChannelThroughput {
    /// Fraction of finished files that succeeded, `None` when nothing finished
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.successful_files + self.failed_files;
        if total == 0 {
            None
        } else {
            Some(self.successful_files as f64 / total as f64)
        }
    }
}

// ============================================================================
// Catalog registration and event log
// ============================================================================

/// New catalog registration after a successful transfer
#[derive(Debug, Clone, PartialEq)]
pub struct NewRegistration {
    pub channel_id: ChannelId,
    pub file_id: FileId,
    pub lfn: String,
    pub pfn: String,
    pub storage_element: String,
}

/// Pending or completed catalog registration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogRegistration {
    pub channel_id: ChannelId,
    pub file_id: FileId,
    pub lfn: String,
    pub pfn: String,
    pub storage_element: String,
    pub status: RegistrationStatus,
    pub submit_time: DateTime<Utc>,
    pub complete_time: Option<DateTime<Utc>>,
}

/// Audit trail entry for an FTS request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggingEvent {
    pub event_id: i64,
    pub fts_req_id: FtsReqId,
    pub event: String,
    pub event_time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(status: QueueStatus, ancestor: Option<ChannelId>) -> QueueEntry {
        QueueEntry {
            channel_id: 1,
            file_id: 7,
            source_surl: "srm://cern/f".into(),
            target_surl: "srm://ral/f".into(),
            space_token: "T1".into(),
            file_size: 10,
            submit_time: Utc::now(),
            execution_time: None,
            status,
            ancestor_channel: ancestor,
        }
    }

    #[test]
    fn test_selectable_requires_ungated_waiting() {
        assert!(entry(QueueStatus::Waiting, None).is_selectable());
        assert!(!entry(QueueStatus::Waiting, Some(3)).is_selectable());
        assert!(!entry(QueueStatus::Executing, None).is_selectable());
    }

    #[test]
    fn test_success_rate() {
        let empty = ChannelThroughput::default();
        assert_eq!(empty.success_rate(), None);

        let t = ChannelThroughput {
            successful_files: 3,
            failed_files: 1,
            ..Default::default()
        };
        assert_eq!(t.success_rate(), Some(0.75));
    }

    #[test]
    fn test_channel_attribute_read() {
        let channel = Channel {
            channel_id: 1,
            source_site: "CERN-disk".into(),
            destination_site: "RAL-tape".into(),
            status: ChannelStatus::Active,
            channel_name: None,
        };
        assert_eq!(
            ChannelAttribute::read(&channel, ChannelAttributeName::Status),
            ChannelAttribute::Status(ChannelStatus::Active)
        );
        assert_eq!(
            ChannelAttribute::ChannelName(Some("x".into())).name(),
            ChannelAttributeName::ChannelName
        );
    }
}
