//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::time::{SystemTime, UNIX_EPOCH};

use ballot_storage::{Storage, StorageConfig};
use ballot_types::{
    AggregatorBallot, AggregatorBallotBatch, Ballot, Census, CensusOrigin, Process,
    StateTransitionBatch, StateTransitionInputs, VerifiedBallot,
};

pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

pub fn open_storage() -> (tempfile::TempDir, Storage) {
    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::open(StorageConfig::new(dir.path())).unwrap();
    (dir, storage)
}

/// A Ready process with an hour of voting time left.
pub fn make_process(process_id: &[u8]) -> Process {
    Process {
        id: process_id.to_vec().into(),
        start_time: now(),
        duration: 3600,
        metadata_uri: format!("ipfs://{}", hex::encode(process_id)),
        census: Census {
            origin: CensusOrigin::OffchainStaticV1,
            root: [process_id, b"-census"].concat(),
            uri: "https://census.example/snapshot".to_string(),
            max_votes: 1000,
        },
        ..Default::default()
    }
}

/// Registers a Ready process and makes its census available, so the process
/// accepts votes.
pub fn register_process(storage: &Storage, process_id: &[u8]) -> Process {
    let process = make_process(process_id);
    storage.new_process(&process).unwrap();
    storage
        .external_stores()
        .census
        .insert_root(&process.census.root)
        .unwrap();
    storage.process(&process.id).unwrap()
}

pub fn make_ballot(process_id: &[u8], vote_id: &[u8], address: u64) -> Ballot {
    Ballot {
        process_id: process_id.to_vec().into(),
        vote_id: vote_id.to_vec().into(),
        address,
        voter_weight: 1,
        encrypted_ballot: [vote_id, b"-ciphertext"].concat(),
        inputs_hash: 0xC0FFEE,
        ballot_proof: b"ballot-proof".to_vec(),
        signature: b"signature".to_vec(),
        census_proof: b"census-proof".to_vec(),
        public_key: b"public-key".to_vec(),
    }
}

pub fn verify_ballot(ballot: &Ballot) -> VerifiedBallot {
    VerifiedBallot {
        process_id: ballot.process_id.clone(),
        vote_id: ballot.vote_id.clone(),
        address: ballot.address,
        voter_weight: ballot.voter_weight,
        encrypted_ballot: ballot.encrypted_ballot.clone(),
        inputs_hash: ballot.inputs_hash,
        proof: b"verification-proof".to_vec(),
    }
}

pub fn aggregator_batch(process_id: &[u8], proof: &[u8], ballots: &[Ballot]) -> AggregatorBallotBatch {
    AggregatorBallotBatch {
        process_id: process_id.to_vec().into(),
        proof: proof.to_vec(),
        ballots: ballots
            .iter()
            .map(|ballot| AggregatorBallot {
                vote_id: ballot.vote_id.clone(),
                address: ballot.address,
                encrypted_ballot: ballot.encrypted_ballot.clone(),
            })
            .collect(),
    }
}

pub fn transition_batch(
    process_id: &[u8],
    proof: &[u8],
    ballots: &[Ballot],
) -> StateTransitionBatch {
    StateTransitionBatch {
        process_id: process_id.to_vec().into(),
        proof: proof.to_vec(),
        ballots: ballots
            .iter()
            .map(|ballot| AggregatorBallot {
                vote_id: ballot.vote_id.clone(),
                address: ballot.address,
                encrypted_ballot: ballot.encrypted_ballot.clone(),
            })
            .collect(),
        inputs: StateTransitionInputs {
            root_hash_before: b"root-before".to_vec(),
            root_hash_after: b"root-after".to_vec(),
            num_new_votes: ballots.len() as u64,
            num_overwritten_votes: 0,
            commitment: None,
        },
    }
}

/// Pushes, claims, and verifies one ballot, leaving it in the verified
/// stage.
pub fn push_and_verify(storage: &Storage, ballot: &Ballot) {
    storage.push_pending_ballot(ballot).unwrap();
    let (claimed, key) = storage.next_pending_ballot().unwrap();
    assert_eq!(&claimed, ballot);
    storage
        .mark_ballot_verified(&key, &verify_ballot(ballot))
        .unwrap();
}
