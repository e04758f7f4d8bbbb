//! Interfaces to the collaborators the core does not own: the per-process
//! state merkle tree, the census database, and the encryption-key
//! generator.
//!
//! The real implementations live with the proving stack. The KV-backed
//! defaults here share the core's keyspace under the `st_` and `cs_`
//! prefixes, which is enough to exercise every storage path (and to run a
//! single-node sequencer whose proofs are produced elsewhere). The default
//! key generator derives curve-point-shaped bytes by hashing; it makes no
//! cryptographic claim.

use std::sync::Arc;

use ballot_types::{
    encode_artifact, BallotMode, CensusOrigin, EncodingFormat, EncryptionKeys,
    EncryptionPublicKey, ProcessId,
};
use sha2::{Digest, Sha256};

use crate::db::{prefix, StorageDb};

/// Parameters a process state tree is initialized from.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StateTreeInit {
    /// Census kind.
    pub census_origin: CensusOrigin,
    /// Census merkle root at process creation.
    pub census_root: Vec<u8>,
    /// Ballot shape constraints.
    pub ballot_mode: BallotMode,
    /// The process encryption public key.
    pub encryption_key: EncryptionPublicKey,
}

/// The per-process state merkle tree, maintained by the state-transition
/// prover.
pub trait StateTree: Send + Sync {
    /// Loads the tree for `process_id`, creating and initializing it from
    /// `init` when absent. Returns the current root either way.
    fn load_or_init(&self, process_id: &ProcessId, init: &StateTreeInit)
        -> anyhow::Result<Vec<u8>>;

    /// The tree's current root.
    fn current_root(&self, process_id: &ProcessId) -> anyhow::Result<Vec<u8>>;
}

/// The census database: answers whether a census root has been fetched and
/// is locally available.
pub trait CensusStore: Send + Sync {
    /// Whether the census with this root is available.
    fn contains_root(&self, root: &[u8]) -> anyhow::Result<bool>;

    /// Records a census root as available. Called by the census fetcher.
    fn insert_root(&self, root: &[u8]) -> anyhow::Result<()>;
}

/// Produces per-process ElGamal key pairs.
pub trait EncryptionKeyGenerator: Send + Sync {
    /// Generates a key pair for `process_id`.
    fn generate(&self, process_id: &ProcessId) -> anyhow::Result<EncryptionKeys>;
}

/// The set of collaborators a [`crate::Storage`] is assembled with.
#[derive(Clone)]
pub struct ExternalStores {
    /// State merkle tree handle.
    pub state_tree: Arc<dyn StateTree>,
    /// Census database handle.
    pub census: Arc<dyn CensusStore>,
    /// Encryption-key generator.
    pub key_generator: Arc<dyn EncryptionKeyGenerator>,
}

/// KV-backed state tree stand-in under the `st_` prefix: one root per
/// process, derived deterministically from the init parameters.
pub struct KvStateTree {
    db: StorageDb,
}

impl KvStateTree {
    pub(crate) fn new(db: StorageDb) -> Self {
        Self { db }
    }
}

impl StateTree for KvStateTree {
    fn load_or_init(
        &self,
        process_id: &ProcessId,
        init: &StateTreeInit,
    ) -> anyhow::Result<Vec<u8>> {
        if let Some(root) = self.db.get(prefix::STATE_DB, process_id.as_bytes())? {
            return Ok(root);
        }
        let encoded = encode_artifact(EncodingFormat::Cbor, init)?;
        let root = Sha256::digest(&encoded).to_vec();
        let mut tx = self.db.write_tx();
        tx.set(prefix::STATE_DB, process_id.as_bytes(), root.clone());
        tx.commit()?;
        Ok(root)
    }

    fn current_root(&self, process_id: &ProcessId) -> anyhow::Result<Vec<u8>> {
        self.db
            .get(prefix::STATE_DB, process_id.as_bytes())?
            .ok_or_else(|| anyhow::anyhow!("no state tree for process {process_id}"))
    }
}

/// KV-backed census store under the `cs_` prefix: presence of the root key
/// means the census has been fetched.
pub struct KvCensusStore {
    db: StorageDb,
}

impl KvCensusStore {
    pub(crate) fn new(db: StorageDb) -> Self {
        Self { db }
    }
}

impl CensusStore for KvCensusStore {
    fn contains_root(&self, root: &[u8]) -> anyhow::Result<bool> {
        Ok(self.db.contains(prefix::CENSUS_DB, root)?)
    }

    fn insert_root(&self, root: &[u8]) -> anyhow::Result<()> {
        let mut tx = self.db.write_tx();
        tx.set(prefix::CENSUS_DB, root, vec![1]);
        tx.commit()?;
        Ok(())
    }
}

/// Key generator deriving point coordinates by hashing the process id.
/// Deterministic and self-contained; suitable for tests and for nodes that
/// receive the real keys from the key ceremony later.
pub struct HashDerivedKeyGenerator;

impl EncryptionKeyGenerator for HashDerivedKeyGenerator {
    fn generate(&self, process_id: &ProcessId) -> anyhow::Result<EncryptionKeys> {
        let coordinate = |tag: &[u8]| -> [u8; 32] {
            let mut hasher = Sha256::new();
            hasher.update(tag);
            hasher.update(process_id.as_bytes());
            hasher.finalize().into()
        };
        Ok(EncryptionKeys {
            public_key: EncryptionPublicKey {
                x: coordinate(b"pub-x/"),
                y: coordinate(b"pub-y/"),
            },
            private_key: Some(coordinate(b"priv/")),
        })
    }
}
