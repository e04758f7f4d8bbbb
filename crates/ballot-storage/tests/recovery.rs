//! Crash-recovery behavior: reopening the store on an existing keyspace
//! clears every reservation and reseeds the in-memory lock maps from
//! durable state.

mod common;

use ballot_storage::{Storage, StorageConfig, StorageError};
use ballot_types::{ProcessId, VoteId};
use common::*;

#[test]
fn restart_reseeds_locks_from_durable_state() {
    let dir = tempfile::tempdir().unwrap();
    let process_id: ProcessId = b"p1".to_vec().into();
    let pending_id: VoteId = b"pending".to_vec().into();
    let verified_id: VoteId = b"verified".to_vec().into();
    let aggregated_id: VoteId = b"aggregated".to_vec().into();

    {
        let storage = Storage::open(StorageConfig::new(dir.path())).unwrap();
        register_process(&storage, b"p1");

        push_and_verify(&storage, &make_ballot(b"p1", b"verified", 2));

        // Move a second ballot all the way into an aggregator batch; done
        // releases its locks, so only recovery can re-lock it.
        let aggregated = make_ballot(b"p1", b"aggregated", 3);
        push_and_verify(&storage, &aggregated);

        // And leave a third sitting in the pending queue.
        storage
            .push_pending_ballot(&make_ballot(b"p1", b"pending", 1))
            .unwrap();
        let pulled = storage.pull_verified_ballots(&process_id, 2).unwrap();
        let agg_key = pulled
            .iter()
            .find(|(ballot, _)| ballot.vote_id == aggregated_id)
            .map(|(_, key)| key.clone())
            .unwrap();
        storage
            .push_aggregator_batch(&aggregator_batch(b"p1", b"proof", &[aggregated]))
            .unwrap();
        storage.mark_verified_ballots_done(&[agg_key]).unwrap();
        assert!(!storage.is_vote_id_processing(&aggregated_id));

        storage.close().unwrap();
    }

    let storage = Storage::open(StorageConfig::new(dir.path())).unwrap();

    // Vote-id locks come back from the verified stage and from aggregated
    // batches; pending ballots rely on the durable duplicate check instead.
    assert!(storage.is_vote_id_processing(&verified_id));
    assert!(storage.is_vote_id_processing(&aggregated_id));
    assert!(!storage.is_vote_id_processing(&pending_id));
    assert!(matches!(
        storage.push_pending_ballot(&make_ballot(b"p1", b"pending", 9)),
        Err(StorageError::BallotAlreadyExists)
    ));

    // Address locks come back for pending and verified ballots.
    assert!(matches!(
        storage.push_pending_ballot(&make_ballot(b"p1", b"fresh-1", 1)),
        Err(StorageError::AddressProcessing)
    ));
    assert!(matches!(
        storage.push_pending_ballot(&make_ballot(b"p1", b"fresh-2", 2)),
        Err(StorageError::AddressProcessing)
    ));
    // The aggregated ballot's address was handed back at done time.
    storage
        .push_pending_ballot(&make_ballot(b"p1", b"fresh-3", 3))
        .unwrap();
}

#[test]
fn restart_clears_reservations_and_keeps_items() {
    let dir = tempfile::tempdir().unwrap();
    let process_id: ProcessId = b"p1".to_vec().into();

    {
        let storage = Storage::open(StorageConfig::new(dir.path())).unwrap();
        register_process(&storage, b"p1");

        push_and_verify(&storage, &make_ballot(b"p1", b"v2", 2));
        storage
            .push_pending_ballot(&make_ballot(b"p1", b"v1", 1))
            .unwrap();

        // Claim both: a crash now would strand the reservations.
        let _ = storage.next_pending_ballot().unwrap();
        let _ = storage.pull_verified_ballots(&process_id, 1).unwrap();
        assert_eq!(storage.count_pending_ballots().unwrap(), 0);
        assert_eq!(storage.count_verified_ballots(&process_id).unwrap(), 0);

        storage.close().unwrap();
    }

    let storage = Storage::open(StorageConfig::new(dir.path())).unwrap();
    // The items are intact and unclaimed again.
    assert_eq!(storage.count_pending_ballots().unwrap(), 1);
    assert_eq!(storage.count_verified_ballots(&process_id).unwrap(), 1);
    let (ballot, _) = storage.next_pending_ballot().unwrap();
    assert_eq!(ballot.vote_id, b"v1".to_vec().into());
}
