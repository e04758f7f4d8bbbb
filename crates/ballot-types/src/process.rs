use serde::{Deserialize, Serialize};

use crate::ProcessId;

/// Lifecycle status of a voting process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ProcessStatus {
    /// Accepting ballots.
    #[default]
    Ready = 0,
    /// Past its end time; derived artifacts are being (or have been)
    /// cleaned up.
    Ended = 1,
    /// Final results have been published.
    Results = 2,
    /// Canceled before completion.
    Canceled = 3,
}

impl ProcessStatus {
    /// Whether the process can still take new ballots.
    pub fn is_accepting(self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Where the census of eligible voters lives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CensusOrigin {
    /// A static off-chain census snapshot, addressed by its merkle root.
    #[default]
    OffchainStaticV1 = 0,
    /// A census derived from on-chain token holdings.
    OnchainV1 = 1,
}

/// The census a process admits voters from.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Census {
    /// Kind of census backing this process.
    pub origin: CensusOrigin,
    /// Merkle root of the census at process creation.
    pub root: Vec<u8>,
    /// Where the census data can be fetched from.
    pub uri: String,
    /// Upper bound on participating voters.
    pub max_votes: u64,
}

/// Shape constraints on the ballots a process accepts. Mirrors the public
/// inputs of the ballot-proof circuit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotMode {
    /// Number of fields in one ballot.
    pub num_fields: u32,
    /// Whether field values must be pairwise distinct.
    pub unique_values: bool,
    /// Maximum value of a single field.
    pub max_value: u64,
    /// Minimum value of a single field.
    pub min_value: u64,
    /// Maximum sum over all fields.
    pub max_value_sum: u64,
    /// Minimum sum over all fields.
    pub min_value_sum: u64,
    /// Exponent applied when computing the cost of a field value.
    pub cost_exponent: u32,
    /// Whether the voter weight caps the total cost.
    pub cost_from_weight: bool,
}

impl Default for BallotMode {
    fn default() -> Self {
        Self {
            num_fields: 1,
            unique_values: false,
            max_value: u64::MAX,
            min_value: 0,
            max_value_sum: u64::MAX,
            min_value_sum: 0,
            cost_exponent: 1,
            cost_from_weight: false,
        }
    }
}

/// The public half of a process ElGamal key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionPublicKey {
    /// X coordinate of the public point.
    pub x: [u8; 32],
    /// Y coordinate of the public point.
    pub y: [u8; 32],
}

impl EncryptionPublicKey {
    /// Compressed serialization: a parity byte for y followed by x.
    ///
    /// Used as the storage key for the key registry, so processes sharing a
    /// key share a single stored record.
    pub fn compressed(&self) -> Vec<u8> {
        let parity = if self.y[31] & 1 == 1 { 0x03 } else { 0x02 };
        let mut out = Vec::with_capacity(33);
        out.push(parity);
        out.extend_from_slice(&self.x);
        out
    }
}

/// A process ElGamal key pair. The private half is absent on nodes that only
/// verify.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionKeys {
    /// The public point.
    pub public_key: EncryptionPublicKey,
    /// The private scalar, when this node holds it.
    pub private_key: Option<[u8; 32]>,
}

impl EncryptionKeys {
    /// Compressed serialization of the public point.
    pub fn compressed_public(&self) -> Vec<u8> {
        self.public_key.compressed()
    }
}

/// A single voting process: a fixed-lifetime election instance owning its
/// ballots, batches, keys, and results.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Process {
    /// Identifier, also the storage key.
    pub id: ProcessId,
    /// Lifecycle status.
    pub status: ProcessStatus,
    /// Start of the voting window, seconds since the Unix epoch.
    pub start_time: u64,
    /// Length of the voting window in seconds.
    pub duration: u64,
    /// Pointer to the off-chain process metadata artifact.
    pub metadata_uri: String,
    /// The state root this sequencer last recorded for the process.
    pub state_root: Vec<u8>,
    /// Ballot shape constraints.
    pub ballot_mode: BallotMode,
    /// The census voters are checked against.
    pub census: Census,
    /// Set once results are finalized on-chain.
    pub is_finalized: bool,
    /// Final tallies, present once published.
    pub result: Option<Vec<u64>>,
    /// Handle to the process encryption key: the public point, whose
    /// compressed form keys the registry entry.
    pub encryption_key: Option<EncryptionPublicKey>,
}

/// The off-chain metadata artifact a process points at through its
/// `metadata_uri`. Stored in the textual encoding so operators can inspect
/// it in place.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessMetadata {
    /// Schema version of the artifact.
    pub version: String,
    /// Election title.
    pub title: String,
    /// Election description.
    pub description: String,
}

/// Per-process pipeline counters.
///
/// Kept as a separate record from the process itself so that ended-process
/// cleanup can preserve them as historical data. Counters clamp at zero:
/// a decrement below zero is a bookkeeping bug upstream, logged and swallowed
/// rather than propagated.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencerStats {
    /// Ballots currently in the pending stage.
    pub pending_votes: u64,
    /// Ballots currently in the verified stage.
    pub verified_votes: u64,
    /// Ballots aggregated into batches so far.
    pub aggregated_votes: u64,
    /// Verified ballots accumulated toward the next aggregator batch.
    pub current_batch_size: u64,
    /// Ballots added by aggregator batches, rolled back when a batch fails.
    pub last_batch_size: u64,
    /// State-transition batches produced.
    pub state_transitions: u64,
    /// State-transition batches settled on-chain.
    pub settled_state_transitions: u64,
    /// Seconds-since-epoch timestamp of the last settled transition.
    pub last_state_transition_date: u64,
}
