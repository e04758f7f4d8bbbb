use ballot_types::{DecodeError, EncodeError};
use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Everything that can go wrong inside the storage core.
///
/// Recoverable conditions surface to the caller unchanged; the core never
/// retries on its own. Background tasks log per-item errors and keep going.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Lookup miss.
    #[error("not found")]
    NotFound,
    /// Iteration exhausted without yielding a usable entry.
    #[error("no more elements")]
    NoMoreElements,
    /// Unique-insert violation.
    #[error("key already exists")]
    KeyAlreadyExists,
    /// A pending ballot with this vote id is already stored.
    #[error("ballot already exists")]
    BallotAlreadyExists,
    /// The vote id is locked in memory by an in-flight submission.
    #[error("nullifier processing")]
    NullifierProcessing,
    /// Another ballot from the same (process, address) pair is in flight.
    #[error("address processing")]
    AddressProcessing,
    /// The target process is past its voting window or otherwise closed.
    #[error("process is not accepting votes")]
    ProcessNotAccepting,
    /// Artifact serialization failed.
    #[error(transparent)]
    Encode(#[from] EncodeError),
    /// Artifact deserialization failed (after any fallback attempt).
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// Propagated from the embedded keyspace; any partial writes of the
    /// owning transaction were discarded.
    #[error("keyspace: {0}")]
    Db(#[from] sled::Error),
    /// An external collaborator (state tree, census store, key generator)
    /// failed.
    #[error("external collaborator: {0}")]
    External(#[from] anyhow::Error),
    /// A cleanup sweep finished, but some of its sub-steps failed.
    #[error("cleanup finished with {} error(s)", .0.len())]
    Cleanup(Vec<StorageError>),
}

impl StorageError {
    /// True for the plain lookup-miss kind.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound)
    }
}
