//! TransferDB - status snapshot
//!
//! Connects to the transfer database, applies the schema, checks health and
//! logs one snapshot of the scheduling state:
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌──────────┐    ┌──────────┐
//! │  Config  │───▶│ Postgres │───▶│  Schema  │───▶│ Snapshot │
//! │  (YAML)  │    │  (pool)  │    │  (DDL)   │    │  (log)   │
//! └──────────┘    └──────────┘    └──────────┘    └──────────┘
//! ```
//!
//! Scheduling itself is done by an external loop.

use serde::Serialize;
use std::collections::BTreeMap;

use transferdb::config::AppConfig;
use transferdb::db::{Database, schema};
use transferdb::transfer::{ChannelThroughput, QueueStats};
use transferdb::{ChannelId, FtsStatus, TransferDb};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

#[derive(Debug, Serialize)]
struct ChannelSnapshot {
    source: String,
    destination: String,
    status: String,
    queue: QueueStats,
    throughput: ChannelThroughput,
    outstanding_requests: usize,
}

async fn snapshot(db: &TransferDb, interval_secs: u64) -> anyhow::Result<BTreeMap<ChannelId, ChannelSnapshot>> {
    let queue = db.queue().queue_stats().await?;
    let throughput = db.monitor().throughput(interval_secs).await?;
    let requests = db.ledger().list_requests().await?;

    let mut channels = BTreeMap::new();
    for channel in db.channels().list_channels().await? {
        let id = channel.channel_id;
        channels.insert(
            id,
            ChannelSnapshot {
                source: channel.source_site,
                destination: channel.destination_site,
                status: channel.status.to_string(),
                queue: queue.get(&id).copied().unwrap_or_default(),
                throughput: throughput.get(&id).copied().unwrap_or_default(),
                outstanding_requests: requests
                    .iter()
                    .filter(|r| r.channel_id == id && r.status == FtsStatus::Submitted)
                    .count(),
            },
        );
    }
    Ok(channels)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)?;
    let _log_guard = transferdb::logging::init_logging(&app_config);

    tracing::info!(
        env = %env,
        git_hash = env!("GIT_HASH"),
        "Starting TransferDB"
    );

    let database = Database::connect(&app_config.database).await?;
    schema::init_schema(database.pool()).await?;
    database.health_check().await?;

    let db = TransferDb::postgres(database.pool().clone());
    db.health_check().await?;

    let interval = app_config.scheduler.throughput_interval_secs;
    let channels = snapshot(&db, interval).await?;
    for (channel_id, c) in &channels {
        tracing::info!(
            channel_id = channel_id,
            source = %c.source,
            destination = %c.destination,
            status = %c.status,
            waiting_files = c.queue.files,
            waiting_bytes = c.queue.bytes,
            throughput = c.throughput.throughput,
            success_rate = ?c.throughput.success_rate(),
            outstanding_requests = c.outstanding_requests,
            "Channel status"
        );
    }

    let candidate = db
        .selector()
        .select_channel_for_submission(app_config.scheduler.max_jobs_per_channel)
        .await?;
    tracing::info!(
        channels = channels.len(),
        interval_secs = interval,
        next_candidate = ?candidate.map(|c| c.channel_id),
        snapshot = %serde_json::to_string(&channels)?,
        "Transfer database snapshot"
    );

    Ok(())
}
