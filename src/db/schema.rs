//! PostgreSQL schema for the transfer database
//!
//! Statuses are SMALLINT ids, see `transfer::state`.

use sqlx::PgPool;

pub const CREATE_CHANNELS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS channels (
    channel_id       BIGSERIAL PRIMARY KEY,
    source_site      TEXT NOT NULL,
    destination_site TEXT NOT NULL,
    status           SMALLINT NOT NULL DEFAULT 1,
    channel_name     TEXT,
    UNIQUE (source_site, destination_site)
)
"#;

pub const CREATE_FILES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    file_id BIGINT PRIMARY KEY,
    lfn     TEXT NOT NULL
)
"#;

pub const CREATE_CHANNEL_QUEUE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS channel_queue (
    channel_id       BIGINT NOT NULL REFERENCES channels (channel_id),
    file_id          BIGINT NOT NULL,
    source_surl      TEXT NOT NULL,
    target_surl      TEXT NOT NULL,
    space_token      TEXT NOT NULL,
    file_size        BIGINT NOT NULL DEFAULT 0,
    submit_time      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    execution_time   TIMESTAMPTZ,
    status           SMALLINT NOT NULL DEFAULT 0,
    ancestor_channel BIGINT,
    PRIMARY KEY (channel_id, file_id)
)
"#;

pub const CREATE_CHANNEL_QUEUE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_channel_queue_selection
    ON channel_queue (channel_id, status, submit_time)
"#;

pub const CREATE_REPLICATION_TREE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS replication_tree (
    file_id          BIGINT NOT NULL,
    channel_id       BIGINT NOT NULL REFERENCES channels (channel_id),
    ancestor_channel BIGINT,
    strategy         TEXT NOT NULL,
    creation_time    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (file_id, channel_id)
)
"#;

pub const CREATE_FTS_REQUESTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS fts_requests (
    fts_req_id          BIGSERIAL PRIMARY KEY,
    fts_guid            TEXT NOT NULL,
    fts_server          TEXT NOT NULL,
    channel_id          BIGINT NOT NULL REFERENCES channels (channel_id),
    status              SMALLINT NOT NULL DEFAULT 0,
    submit_time         TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    last_monitor        TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    percentage_complete DOUBLE PRECISION NOT NULL DEFAULT 0,
    number_of_files     BIGINT NOT NULL DEFAULT 0,
    total_size          BIGINT NOT NULL DEFAULT 0
)
"#;

pub const CREATE_FILE_TO_FTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS file_to_fts (
    fts_req_id      BIGINT NOT NULL REFERENCES fts_requests (fts_req_id) ON DELETE CASCADE,
    file_id         BIGINT NOT NULL,
    channel_id      BIGINT NOT NULL,
    submission_time TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    terminal_time   TIMESTAMPTZ,
    status          SMALLINT NOT NULL DEFAULT 0,
    duration        DOUBLE PRECISION NOT NULL DEFAULT 0,
    reason          TEXT,
    retries         INTEGER NOT NULL DEFAULT 0,
    file_size       BIGINT NOT NULL DEFAULT 0,
    PRIMARY KEY (fts_req_id, file_id)
)
"#;

pub const CREATE_FILE_TO_FTS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_file_to_fts_submission
    ON file_to_fts (submission_time)
"#;

pub const CREATE_FILE_TO_CAT_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS file_to_cat (
    channel_id      BIGINT NOT NULL,
    file_id         BIGINT NOT NULL,
    lfn             TEXT NOT NULL,
    pfn             TEXT NOT NULL,
    storage_element TEXT NOT NULL,
    status          SMALLINT NOT NULL DEFAULT 0,
    submit_time     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    complete_time   TIMESTAMPTZ,
    PRIMARY KEY (channel_id, file_id)
)
"#;

pub const CREATE_FTS_REQUEST_LOG_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS fts_request_log (
    event_id   BIGSERIAL PRIMARY KEY,
    fts_req_id BIGINT NOT NULL,
    event      TEXT NOT NULL,
    event_time TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const SCHEMA: &[(&str, &str)] = &[
    ("channels", CREATE_CHANNELS_TABLE),
    ("files", CREATE_FILES_TABLE),
    ("channel_queue", CREATE_CHANNEL_QUEUE_TABLE),
    ("channel_queue index", CREATE_CHANNEL_QUEUE_INDEX),
    ("replication_tree", CREATE_REPLICATION_TREE_TABLE),
    ("fts_requests", CREATE_FTS_REQUESTS_TABLE),
    ("file_to_fts", CREATE_FILE_TO_FTS_TABLE),
    ("file_to_fts index", CREATE_FILE_TO_FTS_INDEX),
    ("file_to_cat", CREATE_FILE_TO_CAT_TABLE),
    ("fts_request_log", CREATE_FTS_REQUEST_LOG_TABLE),
];

/// Create all transfer tables if they do not exist
pub async fn init_schema(pool: &PgPool) -> anyhow::Result<()> {
    tracing::info!("Initializing transfer database schema...");

    for (name, ddl) in SCHEMA {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create {}: {}", name, e))?;
    }

    tracing::info!("Transfer database schema initialized successfully");
    Ok(())
}
