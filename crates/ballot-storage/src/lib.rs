//! Persistent, reservation-based staged work queue for a zero-knowledge
//! voting sequencer.
//!
//! Ballots enter through [`Storage::push_pending_ballot`] and move through
//! a fixed status progression (pending, verified, aggregated, processed,
//! settled) as proving workers claim, transform, and consume them. Each
//! stage lives in its own keyspace namespace; a claim is an ephemeral
//! reservation record mirroring the item key, so crash recovery can wipe
//! every claim without losing an item. A single coarse mutex serializes the
//! mutating and scanning surface; a second workers mutex lets the verifier
//! pool pull pending ballots past a long admin sweep. In-memory lock maps
//! reject duplicate concurrent submissions by vote id and by (process,
//! address), and are reseeded from durable state at startup.
//!
//! The store assumes a single logical sequencer process owns the keyspace:
//! at-most-one-in-flight semantics hold per node, not across replicas.

mod aggregator;
mod cleanup;
mod config;
mod db;
mod error;
mod external;
mod keys;
mod locks;
mod metadata;
mod pending;
mod pending_tx;
mod process;
mod reservations;
mod results;
mod stats;
mod status;
mod tasks;
mod transitions;
mod verified;

use std::sync::{Arc, Mutex, MutexGuard};

use ballot_types::{
    decode_artifact, encode_artifact, AggregatorBallotBatch, Ballot, ProcessMetadata,
    VerifiedBallot, VoteId,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;

pub use config::{from_toml_path, StorageConfig};
pub use error::{Result, StorageError};
pub use external::{
    CensusStore, EncryptionKeyGenerator, ExternalStores, HashDerivedKeyGenerator, KvCensusStore,
    KvStateTree, StateTree, StateTreeInit,
};
pub use pending_tx::PendingTxKind;
pub use tasks::BackgroundTasks;

use crate::db::{prefix, StorageDb};
use crate::locks::LockMaps;

/// Handle to the sequencer's ballot store. Cheap to clone; all clones share
/// the same keyspace, locks, and cancellation signal.
pub struct Storage {
    inner: Arc<StorageInner>,
}

impl Clone for Storage {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct StorageInner {
    db: StorageDb,
    config: StorageConfig,
    /// Serializes the mutating and scanning public surface.
    global_lock: Mutex<()>,
    /// Serializes pipeline-worker pulls; always taken after `global_lock`
    /// when both are held.
    workers_lock: Mutex<()>,
    locks: LockMaps,
    metadata_cache: mini_moka::sync::Cache<Vec<u8>, ProcessMetadata>,
    external: ExternalStores,
    cancel: watch::Sender<bool>,
}

impl Storage {
    /// Opens the store with the KV-backed default collaborators, running
    /// crash recovery before returning.
    pub fn open(config: StorageConfig) -> Result<Self> {
        let db = StorageDb::open(&config.path)?;
        let external = ExternalStores {
            state_tree: Arc::new(KvStateTree::new(db.clone())),
            census: Arc::new(KvCensusStore::new(db.clone())),
            key_generator: Arc::new(HashDerivedKeyGenerator),
        };
        Self::assemble(config, db, external)
    }

    /// Opens the store with caller-provided collaborators.
    pub fn open_with(config: StorageConfig, external: ExternalStores) -> Result<Self> {
        let db = StorageDb::open(&config.path)?;
        Self::assemble(config, db, external)
    }

    fn assemble(config: StorageConfig, db: StorageDb, external: ExternalStores) -> Result<Self> {
        let metadata_cache = mini_moka::sync::Cache::builder()
            .max_capacity(config.metadata_cache_capacity)
            .build();
        let (cancel, _) = watch::channel(false);
        let storage = Self {
            inner: Arc::new(StorageInner {
                db,
                config,
                global_lock: Mutex::new(()),
                workers_lock: Mutex::new(()),
                locks: LockMaps::default(),
                metadata_cache,
                external,
                cancel,
            }),
        };
        storage.recover()?;
        Ok(storage)
    }

    /// Startup recovery: wipe every reservation (a fresh node has no live
    /// workers, and the underlying items are intact), then rebuild the
    /// in-memory lock maps from durable state.
    ///
    /// Vote-id locks are reseeded from the verified stage and from
    /// aggregated batches; pending ballots do not need one because their
    /// durable key is the vote id itself and admission re-checks it.
    /// Address locks are reseeded from both pending and verified ballots,
    /// keeping the one-ballot-per-address guarantee across restarts.
    fn recover(&self) -> Result<()> {
        let cleared = self.clear_all_reservations()?;

        let mut relocked = 0usize;
        for entry in self.db().scan(prefix::VERIFIED_BALLOT, &[]) {
            let (key, value) = entry?;
            match self.decode::<VerifiedBallot>(&value) {
                Ok(ballot) => {
                    self.locks().lock_vote_id(&ballot.vote_id);
                    self.locks().lock_address(&ballot.process_id, ballot.address);
                    relocked += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        key = %hex::encode(&key),
                        error = %err,
                        "skipping undecodable verified ballot during recovery"
                    );
                }
            }
        }
        for entry in self.db().scan(prefix::AGGREGATOR_BATCH, &[]) {
            let (key, value) = entry?;
            match self.decode::<AggregatorBallotBatch>(&value) {
                Ok(batch) => {
                    for ballot in &batch.ballots {
                        self.locks().lock_vote_id(&ballot.vote_id);
                        relocked += 1;
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        key = %hex::encode(&key),
                        error = %err,
                        "skipping undecodable aggregator batch during recovery"
                    );
                }
            }
        }
        for entry in self.db().scan(prefix::BALLOT, &[]) {
            let (key, value) = entry?;
            match self.decode::<Ballot>(&value) {
                Ok(ballot) => {
                    self.locks().lock_address(&ballot.process_id, ballot.address);
                }
                Err(err) => {
                    tracing::warn!(
                        vote_id = %hex::encode(&key),
                        error = %err,
                        "skipping undecodable pending ballot during recovery"
                    );
                }
            }
        }

        tracing::info!(
            cleared_reservations = cleared,
            relocked_vote_ids = relocked,
            "storage recovery complete"
        );
        Ok(())
    }

    /// Whether a vote id is locked by in-flight work.
    pub fn is_vote_id_processing(&self, vote_id: &VoteId) -> bool {
        self.locks().is_vote_id_locked(vote_id)
    }

    /// The configuration the store was opened with.
    pub fn config(&self) -> &StorageConfig {
        &self.inner.config
    }

    /// The collaborators the store was assembled with.
    pub fn external_stores(&self) -> &ExternalStores {
        &self.inner.external
    }

    /// Signals background tasks to stop and flushes buffered writes.
    pub fn close(&self) -> Result<()> {
        let _ = self.inner.cancel.send(true);
        self.inner.db.flush()
    }

    pub(crate) fn db(&self) -> &StorageDb {
        &self.inner.db
    }

    pub(crate) fn locks(&self) -> &LockMaps {
        &self.inner.locks
    }

    pub(crate) fn external(&self) -> &ExternalStores {
        &self.inner.external
    }

    pub(crate) fn metadata_cache(&self) -> &mini_moka::sync::Cache<Vec<u8>, ProcessMetadata> {
        &self.inner.metadata_cache
    }

    pub(crate) fn cancel_signal(&self) -> watch::Receiver<bool> {
        self.inner.cancel.subscribe()
    }

    pub(crate) fn lock_global(&self) -> MutexGuard<'_, ()> {
        self.inner
            .global_lock
            .lock()
            .expect("global lock is poisoned")
    }

    pub(crate) fn lock_workers(&self) -> MutexGuard<'_, ()> {
        self.inner
            .workers_lock
            .lock()
            .expect("workers lock is poisoned")
    }

    pub(crate) fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(encode_artifact(self.inner.config.encoding, value)?)
    }

    pub(crate) fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        Ok(decode_artifact(self.inner.config.encoding, bytes)?)
    }
}
