//! KV adapter: prefixed namespaces over a single embedded keyspace, plus
//! scoped write transactions.
//!
//! Every durable record lives in one sled keyspace under a short byte
//! prefix, so the on-disk layout is always `prefix ‖ identifier`. A
//! reservation key is the item key under the matching reservation prefix.
//! Write transactions buffer their operations in a [`sled::Batch`] and keep
//! a read-your-writes overlay; committing applies the batch atomically,
//! dropping the transaction without committing discards it.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Result, StorageError};

/// Byte prefixes partitioning the keyspace.
///
/// The census and state-tree sub-stores share the keyspace under their own
/// prefixes but are owned by external collaborators.
pub(crate) mod prefix {
    /// Pending ballots, keyed by vote id (global, no process prefix).
    pub const BALLOT: &[u8] = b"b/";
    /// Pending-ballot reservations.
    pub const BALLOT_RESERVATION: &[u8] = b"br/";
    /// Vote-id statuses, keyed by `process_id ‖ vote_id`.
    pub const VOTE_ID_STATUS: &[u8] = b"vs/";
    /// Verified ballots, keyed by `process_id ‖ vote_id`.
    pub const VERIFIED_BALLOT: &[u8] = b"vb/";
    /// Verified-ballot reservations.
    pub const VERIFIED_BALLOT_RESERVATION: &[u8] = b"vbr/";
    /// Aggregator batches, keyed by `process_id ‖ hash(batch)`.
    pub const AGGREGATOR_BATCH: &[u8] = b"ag/";
    /// Aggregator-batch reservations.
    pub const AGGREGATOR_BATCH_RESERVATION: &[u8] = b"agr/";
    /// State-transition batches, keyed by `process_id ‖ hash(batch)`.
    pub const STATE_TRANSITION: &[u8] = b"st/";
    /// State-transition reservations.
    pub const STATE_TRANSITION_RESERVATION: &[u8] = b"str/";
    /// Verified results, keyed by process id.
    pub const VERIFIED_RESULT: &[u8] = b"vr/";
    /// Encryption keys, keyed by the compressed public point.
    pub const ENCRYPTION_KEY: &[u8] = b"ek/";
    /// Process records, keyed by process id.
    pub const PROCESS: &[u8] = b"p/";
    /// Process metadata artifacts, keyed by content hash.
    pub const METADATA: &[u8] = b"md/";
    /// Pending on-chain transaction markers, keyed by `kind ‖ process_id`.
    pub const PENDING_TX: &[u8] = b"ptx/";
    /// Per-process sequencer stats, keyed by process id.
    pub const STATS: &[u8] = b"s/";
    /// Census sub-store (external collaborator).
    pub const CENSUS_DB: &[u8] = b"cs_";
    /// State-merkle-tree sub-store (external collaborator).
    pub const STATE_DB: &[u8] = b"st_";
}

fn full_key(namespace: &[u8], key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(namespace.len() + key.len());
    out.extend_from_slice(namespace);
    out.extend_from_slice(key);
    out
}

/// Handle to the embedded keyspace. Cheap to clone; thread-safe.
#[derive(Clone)]
pub(crate) struct StorageDb {
    inner: sled::Db,
}

impl StorageDb {
    /// Opens (or creates) the keyspace at `path`.
    pub(crate) fn open(path: impl AsRef<Path>) -> Result<Self> {
        let inner = sled::Config::new().path(path).open()?;
        Ok(Self { inner })
    }

    /// Point lookup. The returned bytes are an owned copy.
    pub(crate) fn get(&self, namespace: &[u8], key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.get(full_key(namespace, key))?.map(|v| v.to_vec()))
    }

    /// Presence check without copying the value out.
    pub(crate) fn contains(&self, namespace: &[u8], key: &[u8]) -> Result<bool> {
        Ok(self.inner.contains_key(full_key(namespace, key))?)
    }

    /// Iterates `namespace`, restricted to keys starting with `sub_prefix`
    /// (pass `&[]` for the whole namespace). Yields `(key, value)` pairs with
    /// the namespace prefix stripped and both halves copied out of the
    /// iterator, so callers may hold them across further storage calls.
    pub(crate) fn scan(
        &self,
        namespace: &'static [u8],
        sub_prefix: &[u8],
    ) -> impl Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> {
        let strip = namespace.len();
        self.inner
            .scan_prefix(full_key(namespace, sub_prefix))
            .map(move |entry| {
                let (key, value) = entry?;
                Ok((key[strip..].to_vec(), value.to_vec()))
            })
    }

    /// Opens a scoped write transaction.
    pub(crate) fn write_tx(&self) -> WriteTx<'_> {
        WriteTx {
            db: &self.inner,
            batch: sled::Batch::default(),
            staged: BTreeMap::new(),
        }
    }

    /// Forces buffered writes to disk.
    pub(crate) fn flush(&self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }
}

/// A scoped write transaction over the keyspace.
///
/// Reads see the transaction's own staged writes first, which is what makes
/// read-then-write set-if-absent sound: the duplicate check and the insert
/// land in the same atomic batch. Dropping the transaction without calling
/// [`WriteTx::commit`] discards every staged operation; no partial state is
/// ever visible to readers.
pub(crate) struct WriteTx<'a> {
    db: &'a sled::Db,
    batch: sled::Batch,
    staged: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl WriteTx<'_> {
    /// Read-your-writes lookup.
    pub(crate) fn get(&self, namespace: &[u8], key: &[u8]) -> Result<Option<Vec<u8>>> {
        let full = full_key(namespace, key);
        if let Some(staged) = self.staged.get(&full) {
            return Ok(staged.clone());
        }
        Ok(self.db.get(full)?.map(|v| v.to_vec()))
    }

    /// Stages an unconditional write.
    pub(crate) fn set(&mut self, namespace: &[u8], key: &[u8], value: Vec<u8>) {
        let full = full_key(namespace, key);
        self.batch.insert(full.clone(), value.clone());
        self.staged.insert(full, Some(value));
    }

    /// Stages a write that must create the key, erroring with
    /// [`StorageError::KeyAlreadyExists`] otherwise.
    pub(crate) fn set_if_absent(
        &mut self,
        namespace: &[u8],
        key: &[u8],
        value: Vec<u8>,
    ) -> Result<()> {
        if self.get(namespace, key)?.is_some() {
            return Err(StorageError::KeyAlreadyExists);
        }
        self.set(namespace, key, value);
        Ok(())
    }

    /// Stages a deletion. Deleting an absent key is a no-op.
    pub(crate) fn delete(&mut self, namespace: &[u8], key: &[u8]) {
        let full = full_key(namespace, key);
        self.batch.remove(full.clone());
        self.staged.insert(full, None);
    }

    /// Atomically applies every staged operation.
    pub(crate) fn commit(self) -> Result<()> {
        self.db.apply_batch(self.batch)?;
        Ok(())
    }
}
