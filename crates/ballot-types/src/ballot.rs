use serde::{Deserialize, Serialize};

use crate::{ProcessId, VoteId};

/// An externally signed ballot as it enters the pipeline.
///
/// The encrypted vote and the attached proofs are opaque blobs: the pipeline
/// routes them between proving workers without interpreting them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    /// The process this ballot votes in.
    pub process_id: ProcessId,
    /// Unique identifier of the ballot; also its pending-queue key.
    pub vote_id: VoteId,
    /// The submitting voter's address.
    pub address: u64,
    /// Census weight of the voter.
    pub voter_weight: u64,
    /// The ElGamal-encrypted vote.
    pub encrypted_ballot: Vec<u8>,
    /// Hash binding the circuit inputs together.
    pub inputs_hash: u64,
    /// Proof that the encrypted ballot is well formed.
    pub ballot_proof: Vec<u8>,
    /// Voter signature over the ballot.
    pub signature: Vec<u8>,
    /// Census-membership proof.
    pub census_proof: Vec<u8>,
    /// Public key the signature verifies against.
    pub public_key: Vec<u8>,
}

/// A ballot whose ballot-proof has been checked, in the shape the
/// aggregation circuit consumes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedBallot {
    /// The process this ballot votes in.
    pub process_id: ProcessId,
    /// Unique identifier of the ballot.
    pub vote_id: VoteId,
    /// The submitting voter's address.
    pub address: u64,
    /// Census weight of the voter.
    pub voter_weight: u64,
    /// The ElGamal-encrypted vote.
    pub encrypted_ballot: Vec<u8>,
    /// Hash binding the circuit inputs together.
    pub inputs_hash: u64,
    /// The verification proof produced by the ballot-proof circuit.
    pub proof: Vec<u8>,
}

/// The slice of a verified ballot that survives into an aggregated batch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorBallot {
    /// Unique identifier of the ballot.
    pub vote_id: VoteId,
    /// The submitting voter's address.
    pub address: u64,
    /// The ElGamal-encrypted vote.
    pub encrypted_ballot: Vec<u8>,
}

/// A group of verified ballots bundled under one aggregated proof.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorBallotBatch {
    /// The process all bundled ballots belong to.
    pub process_id: ProcessId,
    /// The aggregated proof over the batch.
    pub proof: Vec<u8>,
    /// The bundled ballots, in aggregation order.
    pub ballots: Vec<AggregatorBallot>,
}

/// Public inputs of a state-transition proof.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransitionInputs {
    /// State root before the batch is applied.
    pub root_hash_before: Vec<u8>,
    /// State root after the batch is applied.
    pub root_hash_after: Vec<u8>,
    /// Votes newly added by the batch.
    pub num_new_votes: u64,
    /// Votes whose previous value the batch overwrote.
    pub num_overwritten_votes: u64,
    /// Optional commitment blob forwarded to the on-chain verifier.
    pub commitment: Option<Vec<u8>>,
}

/// The result of applying an aggregated batch to the process state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransitionBatch {
    /// The process whose state the batch advances.
    pub process_id: ProcessId,
    /// Proof of the state transition.
    pub proof: Vec<u8>,
    /// The ballots applied by this transition, in order.
    pub ballots: Vec<AggregatorBallot>,
    /// Public inputs of the transition proof.
    pub inputs: StateTransitionInputs,
}

/// Public inputs of a results proof: the final state root and the per-field
/// tallies decrypted from the accumulated ciphertexts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultsInputs {
    /// The state root the tallies were computed against.
    pub state_root: Vec<u8>,
    /// Decrypted tally per ballot field.
    pub tallies: Vec<u64>,
}

/// The final, proven tally for a process.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedResults {
    /// The process the results belong to.
    pub process_id: ProcessId,
    /// Proof of correct decryption and tallying.
    pub proof: Vec<u8>,
    /// Public inputs of the results proof.
    pub inputs: ResultsInputs,
}
