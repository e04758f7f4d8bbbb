//! Background task behavior: the lifecycle monitor ends expired processes
//! and triggers cleanup; both tasks stop on close.

mod common;

use std::time::Duration;

use ballot_storage::{Storage, StorageConfig};
use ballot_types::{ProcessId, ProcessStatus, VoteIdStatus};
use common::*;

fn fast_config(path: &std::path::Path) -> StorageConfig {
    let mut config = StorageConfig::new(path);
    config.monitor_interval_secs = 1;
    config.reaper_interval_secs = 1;
    config
}

#[tokio::test(start_paused = true)]
async fn monitor_ends_expired_process_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::open(fast_config(dir.path())).unwrap();

    // Ready, but the voting window closed an hour ago.
    let mut process = make_process(b"p1");
    process.start_time = now() - 2 * 3600;
    process.duration = 3600;
    storage.new_process(&process).unwrap();
    storage
        .external_stores()
        .census
        .insert_root(&process.census.root)
        .unwrap();

    let process_id: ProcessId = b"p1".to_vec().into();
    let ballot = make_ballot(b"p1", b"v1", 1);
    storage.push_pending_ballot(&ballot).unwrap();

    let tasks = storage.spawn_background_tasks();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(
        storage.process(&process_id).unwrap().status,
        ProcessStatus::Ended
    );
    assert_eq!(storage.count_pending_ballots().unwrap(), 0);
    assert_eq!(
        storage
            .vote_id_status(&process_id, &ballot.vote_id)
            .unwrap(),
        VoteIdStatus::Timeout
    );

    storage.close().unwrap();
    tasks.monitor.await.unwrap();
    tasks.reaper.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn monitor_leaves_live_processes_alone() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::open(fast_config(dir.path())).unwrap();
    register_process(&storage, b"p1");
    let process_id: ProcessId = b"p1".to_vec().into();

    let tasks = storage.spawn_background_tasks();
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(
        storage.process(&process_id).unwrap().status,
        ProcessStatus::Ready
    );

    storage.close().unwrap();
    tasks.monitor.await.unwrap();
    tasks.reaper.await.unwrap();
}
