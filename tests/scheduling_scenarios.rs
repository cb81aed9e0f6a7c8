use std::collections::HashSet;

use transferdb::transfer::{
    FileOutcome, FtsRequestAttribute, NewQueueEntry, QueueStats, TransferDb,
};
use transferdb::{ChannelId, FtsStatus, TransferDbError};

/// Helper to queue a file of `size` bytes under `token`
async fn enqueue(db: &TransferDb, channel_id: ChannelId, file_id: i64, size: i64, token: &str) {
    db.queue()
        .enqueue(NewQueueEntry {
            channel_id,
            file_id,
            source_surl: format!("srm://srm.cern.ch/lhcb/{}", file_id),
            target_surl: format!("srm://srm.gridpp.rl.ac.uk/lhcb/{}", file_id),
            file_size: size,
            space_token: token.to_string(),
            ancestor_channel: None,
        })
        .await
        .unwrap();
}

/// One pass of an external scheduler: pick a channel, submit one batch.
///
/// Returns the request id and the files in it, or `None` when idle.
async fn submit_once(db: &TransferDb, max_jobs: u64, files_per_job: usize) -> Option<(i64, Vec<i64>)> {
    let candidate = db.selector().select_channel_for_submission(max_jobs).await.unwrap()?;
    let batch = db
        .queue()
        .select_batch(candidate.channel_id, files_per_job)
        .await
        .unwrap()?;

    let file_ids: Vec<i64> = batch.files.iter().map(|f| f.file_id).collect();
    let total: i64 = batch.files.iter().map(|f| f.size).sum();
    db.queue()
        .mark_executing(candidate.channel_id, &file_ids)
        .await
        .unwrap();

    let req = db
        .ledger()
        .create_request(
            &format!("guid-{}", file_ids[0]),
            "https://fts3.cern.ch:8446",
            candidate.channel_id,
        )
        .await
        .unwrap();
    db.ledger()
        .set_attribute(req, FtsRequestAttribute::NumberOfFiles(file_ids.len() as i64))
        .await
        .unwrap();
    db.ledger()
        .set_attribute(req, FtsRequestAttribute::TotalSize(total))
        .await
        .unwrap();
    db.assignments()
        .assign_files(req, &file_ids, candidate.channel_id)
        .await
        .unwrap();
    Some((req, file_ids))
}

/// One pass of the monitor: finish the oldest monitored request successfully
async fn monitor_once(db: &TransferDb) -> Option<i64> {
    let req = db.ledger().get_next_to_monitor().await.unwrap()?;
    db.ledger().touch_monitor_time(req.fts_req_id).await.unwrap();

    let files = db.assignments().request_file_ids(req.fts_req_id).await.unwrap();
    for file_id in &files {
        db.assignments()
            .record_outcome(req.fts_req_id, *file_id, FileOutcome::completed(5.0))
            .await
            .unwrap();
        db.assignments()
            .mark_terminal(req.fts_req_id, *file_id)
            .await
            .unwrap();
    }
    db.ledger()
        .set_status(req.fts_req_id, FtsStatus::Finished)
        .await
        .unwrap();
    db.queue().dequeue(req.channel_id, &files).await.unwrap();
    Some(req.fts_req_id)
}

#[tokio::test]
async fn scenario_scheduler_drains_all_channels() {
    let db = TransferDb::in_memory();
    let c1 = db.channels().create_channel("CERN-disk", "RAL-tape").await.unwrap().channel_id;
    let c2 = db.channels().create_channel("CERN-disk", "CNAF-disk").await.unwrap().channel_id;

    for f in 1..=5 {
        enqueue(&db, c1, f, 100, if f % 2 == 0 { "LHCb_RAW" } else { "LHCb_DST" }).await;
    }
    for f in 6..=8 {
        enqueue(&db, c2, f, 200, "LHCb_DST").await;
    }

    let mut seen_files = HashSet::new();
    let mut rounds = 0;
    while let Some((_, files)) = submit_once(&db, 1, 2).await {
        for f in files {
            assert!(seen_files.insert(f), "file {} submitted twice", f);
        }
        assert!(monitor_once(&db).await.is_some());
        rounds += 1;
        assert!(rounds < 20, "scheduler did not converge");
    }

    assert_eq!(seen_files.len(), 8);
    let stats = db.queue().queue_stats().await.unwrap();
    assert_eq!(stats[&c1], QueueStats::default());
    assert_eq!(stats[&c2], QueueStats::default());

    let t = db.monitor().throughput(3600).await.unwrap();
    assert_eq!(t[&c1].successful_files, 5);
    assert_eq!(t[&c2].successful_files, 3);
    assert_eq!(t[&c2].throughput, 600.0 / 3600.0);
}

#[tokio::test]
async fn scenario_batches_never_mix_space_tokens() {
    let db = TransferDb::in_memory();
    let c = db.channels().create_channel("CERN-disk", "RAL-tape").await.unwrap().channel_id;
    let tokens = ["T1", "T2", "T3"];
    for f in 0..12 {
        enqueue(&db, c, f, 10, tokens[(f % 3) as usize]).await;
    }

    let mut order = Vec::new();
    while let Some(batch) = db.queue().select_batch(c, 3).await.unwrap() {
        for f in &batch.files {
            let entry = db.queue().get_entry(c, f.file_id).await.unwrap().unwrap();
            assert_eq!(entry.space_token, batch.space_token);
        }
        order.push(batch.space_token.clone());
        let ids: Vec<_> = batch.files.iter().map(|f| f.file_id).collect();
        db.queue().mark_executing(c, &ids).await.unwrap();
    }

    // Oldest token first each round
    assert_eq!(order, vec!["T1", "T2", "T3", "T1", "T2", "T3"]);
}

#[tokio::test]
async fn scenario_failed_job_requeues_files() {
    let db = TransferDb::in_memory();
    let c = db.channels().create_channel("CERN-disk", "PIC-tape").await.unwrap().channel_id;
    enqueue(&db, c, 1, 100, "T1").await;
    enqueue(&db, c, 2, 100, "T1").await;

    let (req, files) = submit_once(&db, 5, 10).await.unwrap();
    assert_eq!(files, vec![1, 2]);
    assert!(submit_once(&db, 5, 10).await.is_none());

    db.ledger().set_status(req, FtsStatus::Failed).await.unwrap();
    for f in &files {
        db.assignments()
            .record_outcome(req, *f, FileOutcome::failed("DESTINATION overwrite", 1))
            .await
            .unwrap();
        db.queue().reset_to_waiting(c, *f).await.unwrap();
    }
    db.ledger().delete_request(req).await.unwrap();

    // Failed files are eligible again and the failure is counted nowhere
    let (_, again) = submit_once(&db, 5, 10).await.unwrap();
    assert_eq!(again, vec![1, 2]);
    let t = db.monitor().throughput(3600).await.unwrap()[&c];
    assert_eq!(t.failed_files, 0);
    assert_eq!(t.successful_files, 0);
}

#[tokio::test]
async fn scenario_errors_carry_stable_codes() {
    let db = TransferDb::in_memory();
    let err = db.channels().get_channel_id("CERN-disk", "RAL-tape").await.unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
    assert!(!err.is_retryable());

    let c = db.channels().create_channel("CERN-disk", "RAL-tape").await.unwrap().channel_id;
    let req = db.ledger().create_request("g", "s", c).await.unwrap();
    db.ledger().set_status(req, FtsStatus::Canceled).await.unwrap();
    let err = db.ledger().set_status(req, FtsStatus::Finished).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_TRANSITION");

    // Dequeuing an absent file is not an error
    db.queue().dequeue(c, &[1]).await.unwrap();

    let req = db.ledger().create_request("g2", "s", c).await.unwrap();
    db.assignments().assign_files(req, &[1], c).await.unwrap();
    let err = db.assignments().assign_files(req, &[2, 1, 3], c).await.unwrap_err();
    assert_eq!(err.code(), "PARTIAL_BATCH_FAILURE");
    assert!(matches!(
        err,
        TransferDbError::PartialBatchFailure { ref succeeded, failed: 1, .. } if succeeded == &vec![2]
    ));
}
