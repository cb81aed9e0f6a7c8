//! Transfer Database Layer
//!
//! PostgreSQL-based persistence for channels, queues and the FTS ledger.
//! Every statement is parameterized. Guarded transitions use atomic CAS
//! updates (`WHERE status = $expected`), ids come from `INSERT .. RETURNING`.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;

use super::error::{TransferDbError, TransferDbResult, map_insert_error};
use super::state::{AssignmentStatus, ChannelStatus, FtsStatus, QueueStatus, RegistrationStatus};
use super::store::TransferStore;
use super::types::{
    AssignmentSummary, BatchFile, CatalogRegistration, Channel, ChannelAttribute,
    ChannelCreation, ChannelId, FileAssignment, FileId, FileJobDetail, FileOutcome, FtsReqId, FtsRequest,
    FtsRequestAttribute, LoggingEvent, NewQueueEntry, NewRegistration, QueueEntry, QueueStats,
    ReplicationEdge, TreeEdge,
};

const CHANNEL_COLUMNS: &str = "channel_id, source_site, destination_site, status, channel_name";

const QUEUE_COLUMNS: &str = "channel_id, file_id, source_surl, target_surl, space_token, \
     file_size, submit_time, execution_time, status, ancestor_channel";

const REQUEST_COLUMNS: &str = "fts_req_id, fts_guid, fts_server, channel_id, status, submit_time, \
     last_monitor, percentage_complete, number_of_files, total_size";

const ASSIGNMENT_COLUMNS: &str = "fts_req_id, file_id, channel_id, submission_time, terminal_time, \
     status, duration, reason, retries, file_size";

const REGISTRATION_COLUMNS: &str = "channel_id, file_id, lfn, pfn, storage_element, status, \
     submit_time, complete_time";

/// Longer throughput windows are clamped; `NOW()` minus this stays in timestamp range
const MAX_WINDOW_SECS: u64 = 1000 * 365 * 24 * 3600;

/// PostgreSQL transfer store
pub struct PgTransferStore {
    pool: PgPool,
}

impl PgTransferStore {
    /// Create a new PgTransferStore with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn decode<T>(id: i16, from_id: fn(i16) -> Option<T>, what: &str) -> TransferDbResult<T> {
    from_id(id).ok_or_else(|| {
        TransferDbError::InfrastructureError(format!("Invalid {} status id: {}", what, id))
    })
}

fn row_to_channel(row: &PgRow) -> TransferDbResult<Channel> {
    Ok(Channel {
        channel_id: row.try_get("channel_id")?,
        source_site: row.try_get("source_site")?,
        destination_site: row.try_get("destination_site")?,
        status: decode(row.try_get("status")?, ChannelStatus::from_id, "channel")?,
        channel_name: row.try_get("channel_name")?,
    })
}

fn row_to_queue_entry(row: &PgRow) -> TransferDbResult<QueueEntry> {
    Ok(QueueEntry {
        channel_id: row.try_get("channel_id")?,
        file_id: row.try_get("file_id")?,
        source_surl: row.try_get("source_surl")?,
        target_surl: row.try_get("target_surl")?,
        space_token: row.try_get("space_token")?,
        file_size: row.try_get("file_size")?,
        submit_time: row.try_get("submit_time")?,
        execution_time: row.try_get("execution_time")?,
        status: decode(row.try_get("status")?, QueueStatus::from_id, "queue")?,
        ancestor_channel: row.try_get("ancestor_channel")?,
    })
}

fn row_to_request(row: &PgRow) -> TransferDbResult<FtsRequest> {
    Ok(FtsRequest {
        fts_req_id: row.try_get("fts_req_id")?,
        fts_guid: row.try_get("fts_guid")?,
        fts_server: row.try_get("fts_server")?,
        channel_id: row.try_get("channel_id")?,
        status: decode(row.try_get("status")?, FtsStatus::from_id, "FTS request")?,
        submit_time: row.try_get("submit_time")?,
        last_monitor: row.try_get("last_monitor")?,
        percentage_complete: row.try_get("percentage_complete")?,
        number_of_files: row.try_get("number_of_files")?,
        total_size: row.try_get("total_size")?,
    })
}

fn row_to_assignment(row: &PgRow) -> TransferDbResult<FileAssignment> {
    Ok(FileAssignment {
        fts_req_id: row.try_get("fts_req_id")?,
        file_id: row.try_get("file_id")?,
        channel_id: row.try_get("channel_id")?,
        submission_time: row.try_get("submission_time")?,
        terminal_time: row.try_get("terminal_time")?,
        status: decode(row.try_get("status")?, AssignmentStatus::from_id, "assignment")?,
        duration: row.try_get("duration")?,
        reason: row.try_get("reason")?,
        retries: row.try_get("retries")?,
        file_size: row.try_get("file_size")?,
    })
}

fn row_to_registration(row: &PgRow) -> TransferDbResult<CatalogRegistration> {
    Ok(CatalogRegistration {
        channel_id: row.try_get("channel_id")?,
        file_id: row.try_get("file_id")?,
        lfn: row.try_get("lfn")?,
        pfn: row.try_get("pfn")?,
        storage_element: row.try_get("storage_element")?,
        status: decode(row.try_get("status")?, RegistrationStatus::from_id, "registration")?,
        submit_time: row.try_get("submit_time")?,
        complete_time: row.try_get("complete_time")?,
    })
}

fn row_to_event(row: &PgRow) -> TransferDbResult<LoggingEvent> {
    Ok(LoggingEvent {
        event_id: row.try_get("event_id")?,
        fts_req_id: row.try_get("fts_req_id")?,
        event: row.try_get("event")?,
        event_time: row.try_get("event_time")?,
    })
}

#[async_trait]
impl TransferStore for PgTransferStore {
    async fn health_check(&self) -> TransferDbResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // === Channels ===

    async fn create_channel(&self, source: &str, dest: &str) -> TransferDbResult<ChannelCreation> {
        // The unique (source_site, destination_site) key serializes concurrent creators
        let inserted = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO channels (source_site, destination_site, status)
            VALUES ($1, $2, $3)
            ON CONFLICT (source_site, destination_site) DO NOTHING
            RETURNING channel_id
            "#,
        )
        .bind(source)
        .bind(dest)
        .bind(ChannelStatus::Active.id())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(channel_id) = inserted {
            return Ok(ChannelCreation {
                channel_id,
                created: true,
            });
        }

        match self.find_channel(source, dest).await? {
            Some(channel_id) => Ok(ChannelCreation {
                channel_id,
                created: false,
            }),
            None => Err(TransferDbError::NotFound(format!(
                "channel {} -> {} vanished after conflict",
                source, dest
            ))),
        }
    }

    async fn find_channel(&self, source: &str, dest: &str) -> TransferDbResult<Option<ChannelId>> {
        let id = sqlx::query_scalar::<_, i64>(
            "SELECT channel_id FROM channels WHERE source_site = $1 AND destination_site = $2",
        )
        .bind(source)
        .bind(dest)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    async fn get_channel(&self, channel_id: ChannelId) -> TransferDbResult<Option<Channel>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM channels WHERE channel_id = $1",
            CHANNEL_COLUMNS
        ))
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_channel).transpose()
    }

    async fn update_channel(
        &self,
        channel_id: ChannelId,
        attribute: &ChannelAttribute,
    ) -> TransferDbResult<bool> {
        let result = match attribute {
            ChannelAttribute::Status(status) => {
                sqlx::query("UPDATE channels SET status = $1 WHERE channel_id = $2")
                    .bind(status.id())
                    .bind(channel_id)
                    .execute(&self.pool)
                    .await?
            }
            ChannelAttribute::ChannelName(name) => {
                sqlx::query("UPDATE channels SET channel_name = $1 WHERE channel_id = $2")
                    .bind(name.as_deref())
                    .bind(channel_id)
                    .execute(&self.pool)
                    .await?
            }
        };
        Ok(result.rows_affected() > 0)
    }

    async fn list_channels(&self, status: Option<ChannelStatus>) -> TransferDbResult<Vec<Channel>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM channels WHERE ($1::SMALLINT IS NULL OR status = $1) ORDER BY channel_id",
            CHANNEL_COLUMNS
        ))
        .bind(status.map(|s| s.id()))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_channel).collect()
    }

    // === File names ===

    async fn record_lfn(&self, file_id: FileId, lfn: &str) -> TransferDbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO files (file_id, lfn) VALUES ($1, $2)
            ON CONFLICT (file_id) DO UPDATE SET lfn = EXCLUDED.lfn
            "#,
        )
        .bind(file_id)
        .bind(lfn)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_lfn(&self, file_id: FileId) -> TransferDbResult<Option<String>> {
        let lfn = sqlx::query_scalar::<_, String>("SELECT lfn FROM files WHERE file_id = $1")
            .bind(file_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(lfn)
    }

    // === Transfer queue ===

    async fn insert_queue_entry(&self, entry: &NewQueueEntry) -> TransferDbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO channel_queue
                (channel_id, file_id, source_surl, target_surl, space_token, file_size,
                 submit_time, status, ancestor_channel)
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), $7, $8)
            "#,
        )
        .bind(entry.channel_id)
        .bind(entry.file_id)
        .bind(&entry.source_surl)
        .bind(&entry.target_surl)
        .bind(&entry.space_token)
        .bind(entry.file_size)
        .bind(QueueStatus::Waiting.id())
        .bind(entry.ancestor_channel)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            map_insert_error(
                e,
                format!("file {} on channel {}", entry.file_id, entry.channel_id),
            )
        })?;
        Ok(())
    }

    async fn get_queue_entry(
        &self,
        channel_id: ChannelId,
        file_id: FileId,
    ) -> TransferDbResult<Option<QueueEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM channel_queue WHERE channel_id = $1 AND file_id = $2",
            QUEUE_COLUMNS
        ))
        .bind(channel_id)
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_queue_entry).transpose()
    }

    async fn delete_queue_entry(
        &self,
        channel_id: ChannelId,
        file_id: FileId,
    ) -> TransferDbResult<bool> {
        let result = sqlx::query("DELETE FROM channel_queue WHERE channel_id = $1 AND file_id = $2")
            .bind(channel_id)
            .bind(file_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_queue_executing(
        &self,
        channel_id: ChannelId,
        file_ids: &[FileId],
    ) -> TransferDbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE channel_queue
            SET status = $1, execution_time = NOW()
            WHERE channel_id = $2 AND file_id = ANY($3)
              AND status = $4 AND ancestor_channel IS NULL
            "#,
        )
        .bind(QueueStatus::Executing.id())
        .bind(channel_id)
        .bind(file_ids)
        .bind(QueueStatus::Waiting.id())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn reset_queue_entry(
        &self,
        channel_id: ChannelId,
        file_id: FileId,
    ) -> TransferDbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE channel_queue
            SET status = $1, execution_time = NULL
            WHERE channel_id = $2 AND file_id = $3 AND status = $4
            "#,
        )
        .bind(QueueStatus::Waiting.id())
        .bind(channel_id)
        .bind(file_id)
        .bind(QueueStatus::Executing.id())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn release_dependents(
        &self,
        ancestor_channel: ChannelId,
        file_ids: &[FileId],
    ) -> TransferDbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE channel_queue
            SET ancestor_channel = NULL
            WHERE file_id = ANY($1) AND status = $2 AND ancestor_channel = $3
            "#,
        )
        .bind(file_ids)
        .bind(QueueStatus::Waiting.id())
        .bind(ancestor_channel)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn oldest_space_token(&self, channel_id: ChannelId) -> TransferDbResult<Option<String>> {
        let token = sqlx::query_scalar::<_, String>(
            r#"
            SELECT space_token FROM channel_queue
            WHERE channel_id = $1 AND status = $2 AND ancestor_channel IS NULL
            ORDER BY submit_time, file_id
            LIMIT 1
            "#,
        )
        .bind(channel_id)
        .bind(QueueStatus::Waiting.id())
        .fetch_optional(&self.pool)
        .await?;
        Ok(token)
    }

    async fn selectable_files(
        &self,
        channel_id: ChannelId,
        space_token: &str,
        limit: usize,
    ) -> TransferDbResult<Vec<BatchFile>> {
        let rows = sqlx::query(
            r#"
            SELECT q.file_id, q.source_surl, q.target_surl, q.file_size, f.lfn
            FROM channel_queue q
            LEFT JOIN files f ON f.file_id = q.file_id
            WHERE q.channel_id = $1 AND q.status = $2 AND q.ancestor_channel IS NULL
              AND q.space_token = $3
            ORDER BY q.submit_time, q.file_id
            LIMIT $4
            "#,
        )
        .bind(channel_id)
        .bind(QueueStatus::Waiting.id())
        .bind(space_token)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> TransferDbResult<BatchFile> {
                Ok(BatchFile {
                    file_id: row.try_get("file_id")?,
                    source_surl: row.try_get("source_surl")?,
                    target_surl: row.try_get("target_surl")?,
                    lfn: row.try_get("lfn")?,
                    size: row.try_get("file_size")?,
                })
            })
            .collect()
    }

    async fn queue_stats(&self) -> TransferDbResult<HashMap<ChannelId, QueueStats>> {
        let rows = sqlx::query(
            r#"
            SELECT channel_id, COUNT(*) AS files, COALESCE(SUM(file_size), 0)::BIGINT AS bytes
            FROM channel_queue
            WHERE status = $1
            GROUP BY channel_id
            "#,
        )
        .bind(QueueStatus::Waiting.id())
        .fetch_all(&self.pool)
        .await?;

        let mut stats = HashMap::with_capacity(rows.len());
        for row in rows {
            let files: i64 = row.try_get("files")?;
            let bytes: i64 = row.try_get("bytes")?;
            stats.insert(
                row.try_get("channel_id")?,
                QueueStats {
                    files: files.max(0) as u64,
                    bytes: bytes.max(0) as u64,
                },
            );
        }
        Ok(stats)
    }

    // === Replication tree ===

    async fn insert_tree_edge(&self, file_id: FileId, edge: &TreeEdge) -> TransferDbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO replication_tree (file_id, channel_id, ancestor_channel, strategy, creation_time)
            VALUES ($1, $2, $3, $4, NOW())
            "#,
        )
        .bind(file_id)
        .bind(edge.channel_id)
        .bind(edge.ancestor_channel)
        .bind(&edge.strategy)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            map_insert_error(
                e,
                format!("tree edge for file {} on channel {}", file_id, edge.channel_id),
            )
        })?;
        Ok(())
    }

    async fn tree_edges(&self, file_id: FileId) -> TransferDbResult<Vec<ReplicationEdge>> {
        let rows = sqlx::query(
            r#"
            SELECT file_id, channel_id, ancestor_channel, strategy, creation_time
            FROM replication_tree
            WHERE file_id = $1
            ORDER BY channel_id
            "#,
        )
        .bind(file_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> TransferDbResult<ReplicationEdge> {
                Ok(ReplicationEdge {
                    file_id: row.try_get("file_id")?,
                    channel_id: row.try_get("channel_id")?,
                    ancestor_channel: row.try_get("ancestor_channel")?,
                    strategy: row.try_get("strategy")?,
                    creation_time: row.try_get("creation_time")?,
                })
            })
            .collect()
    }

    // === FTS request ledger ===

    async fn insert_request(
        &self,
        fts_guid: &str,
        fts_server: &str,
        channel_id: ChannelId,
    ) -> TransferDbResult<FtsRequest> {
        // Allocation and insert are one statement; no MAX(id) read-back
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO fts_requests (fts_guid, fts_server, channel_id, status, submit_time, last_monitor)
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            RETURNING {}
            "#,
            REQUEST_COLUMNS
        ))
        .bind(fts_guid)
        .bind(fts_server)
        .bind(channel_id)
        .bind(FtsStatus::Submitted.id())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, format!("channel {}", channel_id)))?;
        row_to_request(&row)
    }

    async fn get_request(&self, fts_req_id: FtsReqId) -> TransferDbResult<Option<FtsRequest>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM fts_requests WHERE fts_req_id = $1",
            REQUEST_COLUMNS
        ))
        .bind(fts_req_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_request).transpose()
    }

    async fn update_request_status_if(
        &self,
        fts_req_id: FtsReqId,
        expected: FtsStatus,
        new_status: FtsStatus,
    ) -> TransferDbResult<bool> {
        let result = sqlx::query(
            "UPDATE fts_requests SET status = $1 WHERE fts_req_id = $2 AND status = $3",
        )
        .bind(new_status.id())
        .bind(fts_req_id)
        .bind(expected.id())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_request(
        &self,
        fts_req_id: FtsReqId,
        attribute: &FtsRequestAttribute,
    ) -> TransferDbResult<bool> {
        let query = match attribute {
            FtsRequestAttribute::PercentageComplete(v) => {
                sqlx::query("UPDATE fts_requests SET percentage_complete = $1 WHERE fts_req_id = $2")
                    .bind(*v)
            }
            FtsRequestAttribute::NumberOfFiles(v) => {
                sqlx::query("UPDATE fts_requests SET number_of_files = $1 WHERE fts_req_id = $2")
                    .bind(*v)
            }
            FtsRequestAttribute::TotalSize(v) => {
                sqlx::query("UPDATE fts_requests SET total_size = $1 WHERE fts_req_id = $2")
                    .bind(*v)
            }
            FtsRequestAttribute::FtsServer(v) => {
                sqlx::query("UPDATE fts_requests SET fts_server = $1 WHERE fts_req_id = $2")
                    .bind(v.as_str())
            }
        };
        let result = query.bind(fts_req_id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn touch_request(&self, fts_req_id: FtsReqId) -> TransferDbResult<bool> {
        let result = sqlx::query("UPDATE fts_requests SET last_monitor = NOW() WHERE fts_req_id = $1")
            .bind(fts_req_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn next_to_monitor(&self) -> TransferDbResult<Option<FtsRequest>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM fts_requests
            WHERE status = $1
            ORDER BY last_monitor, fts_req_id
            LIMIT 1
            "#,
            REQUEST_COLUMNS
        ))
        .bind(FtsStatus::Submitted.id())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_request).transpose()
    }

    async fn count_submitted(
        &self,
        channel_ids: &[ChannelId],
    ) -> TransferDbResult<HashMap<ChannelId, u64>> {
        let rows = sqlx::query(
            r#"
            SELECT channel_id, COUNT(*) AS jobs
            FROM fts_requests
            WHERE status = $1 AND channel_id = ANY($2)
            GROUP BY channel_id
            "#,
        )
        .bind(FtsStatus::Submitted.id())
        .bind(channel_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = HashMap::with_capacity(rows.len());
        for row in rows {
            let jobs: i64 = row.try_get("jobs")?;
            counts.insert(row.try_get("channel_id")?, jobs.max(0) as u64);
        }
        Ok(counts)
    }

    async fn list_requests(&self) -> TransferDbResult<Vec<FtsRequest>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM fts_requests ORDER BY fts_req_id",
            REQUEST_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_request).collect()
    }

    async fn delete_request(&self, fts_req_id: FtsReqId) -> TransferDbResult<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM fts_request_log WHERE fts_req_id = $1")
            .bind(fts_req_id)
            .execute(&mut *tx)
            .await?;

        // file_to_fts rows go with ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM fts_requests WHERE fts_req_id = $1")
            .bind(fts_req_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    // === File to request assignment ===

    async fn insert_assignment(
        &self,
        fts_req_id: FtsReqId,
        file_id: FileId,
        channel_id: ChannelId,
    ) -> TransferDbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO file_to_fts (fts_req_id, file_id, channel_id, submission_time, status, file_size)
            VALUES ($1, $2, $3, NOW(), $4,
                    COALESCE((SELECT file_size FROM channel_queue
                              WHERE channel_id = $3 AND file_id = $2), 0))
            "#,
        )
        .bind(fts_req_id)
        .bind(file_id)
        .bind(channel_id)
        .bind(AssignmentStatus::Submitted.id())
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, format!("file {} on FTS request {}", file_id, fts_req_id)))?;
        Ok(())
    }

    async fn get_assignment(
        &self,
        fts_req_id: FtsReqId,
        file_id: FileId,
    ) -> TransferDbResult<Option<FileAssignment>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM file_to_fts WHERE fts_req_id = $1 AND file_id = $2",
            ASSIGNMENT_COLUMNS
        ))
        .bind(fts_req_id)
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_assignment).transpose()
    }

    async fn update_assignment_outcome(
        &self,
        fts_req_id: FtsReqId,
        file_id: FileId,
        outcome: &FileOutcome,
    ) -> TransferDbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE file_to_fts
            SET status = $1, duration = $2, reason = $3, retries = $4,
                file_size = COALESCE($5, file_size)
            WHERE fts_req_id = $6 AND file_id = $7 AND terminal_time IS NULL
            "#,
        )
        .bind(outcome.status.id())
        .bind(outcome.duration)
        .bind(outcome.reason.as_deref())
        .bind(outcome.retries)
        .bind(outcome.file_size)
        .bind(fts_req_id)
        .bind(file_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_assignment_terminal(
        &self,
        fts_req_id: FtsReqId,
        file_id: FileId,
    ) -> TransferDbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE file_to_fts SET terminal_time = NOW()
            WHERE fts_req_id = $1 AND file_id = $2 AND terminal_time IS NULL
            "#,
        )
        .bind(fts_req_id)
        .bind(file_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn assignments_for(&self, fts_req_id: FtsReqId) -> TransferDbResult<Vec<FileAssignment>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM file_to_fts WHERE fts_req_id = $1 ORDER BY file_id",
            ASSIGNMENT_COLUMNS
        ))
        .bind(fts_req_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_assignment).collect()
    }

    async fn assignment_details(&self, fts_req_id: FtsReqId) -> TransferDbResult<Vec<FileJobDetail>> {
        let rows = sqlx::query(
            r#"
            SELECT a.file_id, f.lfn, a.status, a.duration, a.reason, a.retries, a.file_size
            FROM file_to_fts a
            LEFT JOIN files f ON f.file_id = a.file_id
            WHERE a.fts_req_id = $1
            ORDER BY a.file_id
            "#,
        )
        .bind(fts_req_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> TransferDbResult<FileJobDetail> {
                Ok(FileJobDetail {
                    file_id: row.try_get("file_id")?,
                    lfn: row.try_get("lfn")?,
                    status: decode(row.try_get("status")?, AssignmentStatus::from_id, "assignment")?,
                    duration: row.try_get("duration")?,
                    reason: row.try_get("reason")?,
                    retries: row.try_get("retries")?,
                    file_size: row.try_get("file_size")?,
                })
            })
            .collect()
    }

    async fn assignment_summary(&self, interval_secs: u64) -> TransferDbResult<Vec<AssignmentSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT channel_id,
                   COUNT(*) FILTER (WHERE status = $2) AS completed_files,
                   COUNT(*) FILTER (WHERE status = $3) AS failed_files,
                   COALESCE(SUM(file_size) FILTER (WHERE status = $2), 0)::BIGINT AS completed_bytes
            FROM file_to_fts
            WHERE submission_time > NOW() - INTERVAL '1 second' * $1
            GROUP BY channel_id
            ORDER BY channel_id
            "#,
        )
        .bind(interval_secs.min(MAX_WINDOW_SECS) as i64)
        .bind(AssignmentStatus::Completed.id())
        .bind(AssignmentStatus::Failed.id())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> TransferDbResult<AssignmentSummary> {
                let completed: i64 = row.try_get("completed_files")?;
                let failed: i64 = row.try_get("failed_files")?;
                let bytes: i64 = row.try_get("completed_bytes")?;
                Ok(AssignmentSummary {
                    channel_id: row.try_get("channel_id")?,
                    completed_files: completed.max(0) as u64,
                    failed_files: failed.max(0) as u64,
                    completed_bytes: bytes.max(0) as u64,
                })
            })
            .collect()
    }

    // === Catalog registration ===

    async fn insert_registration(&self, registration: &NewRegistration) -> TransferDbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO file_to_cat
                (channel_id, file_id, lfn, pfn, storage_element, status, submit_time)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            "#,
        )
        .bind(registration.channel_id)
        .bind(registration.file_id)
        .bind(&registration.lfn)
        .bind(&registration.pfn)
        .bind(&registration.storage_element)
        .bind(RegistrationStatus::Waiting.id())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            map_insert_error(
                e,
                format!(
                    "registration of file {} on channel {}",
                    registration.file_id, registration.channel_id
                ),
            )
        })?;
        Ok(())
    }

    async fn get_registration(
        &self,
        channel_id: ChannelId,
        file_id: FileId,
    ) -> TransferDbResult<Option<CatalogRegistration>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM file_to_cat WHERE channel_id = $1 AND file_id = $2",
            REGISTRATION_COLUMNS
        ))
        .bind(channel_id)
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_registration).transpose()
    }

    async fn list_registrations(
        &self,
        status: RegistrationStatus,
    ) -> TransferDbResult<Vec<CatalogRegistration>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM file_to_cat WHERE status = $1 ORDER BY channel_id, file_id",
            REGISTRATION_COLUMNS
        ))
        .bind(status.id())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_registration).collect()
    }

    async fn update_registration_status_if(
        &self,
        channel_id: ChannelId,
        file_id: FileId,
        expected: RegistrationStatus,
        new_status: RegistrationStatus,
    ) -> TransferDbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE file_to_cat
            SET status = $1,
                complete_time = CASE WHEN $1 = $5 THEN NOW() ELSE complete_time END
            WHERE channel_id = $2 AND file_id = $3 AND status = $4
            "#,
        )
        .bind(new_status.id())
        .bind(channel_id)
        .bind(file_id)
        .bind(expected.id())
        .bind(RegistrationStatus::Done.id())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // === Event log ===

    async fn insert_event(&self, fts_req_id: FtsReqId, event: &str) -> TransferDbResult<LoggingEvent> {
        let row = sqlx::query(
            r#"
            INSERT INTO fts_request_log (fts_req_id, event, event_time)
            VALUES ($1, $2, NOW())
            RETURNING event_id, fts_req_id, event, event_time
            "#,
        )
        .bind(fts_req_id)
        .bind(event)
        .fetch_one(&self.pool)
        .await?;
        row_to_event(&row)
    }

    async fn events_for(&self, fts_req_id: FtsReqId) -> TransferDbResult<Vec<LoggingEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, fts_req_id, event, event_time
            FROM fts_request_log
            WHERE fts_req_id = $1
            ORDER BY event_id
            "#,
        )
        .bind(fts_req_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_event).collect()
    }
}
