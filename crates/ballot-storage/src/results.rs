//! The verified-results queue: one proven tally per process.
//!
//! Pushing is unique per process and only becomes repeatable once the
//! previous record was consumed with
//! [`Storage::mark_verified_results_done`]; a results worker that races
//! itself cannot publish twice.

use ballot_types::{ProcessId, VerifiedResults};

use crate::db::prefix;
use crate::error::{Result, StorageError};
use crate::Storage;

impl Storage {
    /// Stores the verified results of a process. Fails with
    /// [`StorageError::KeyAlreadyExists`] while a record is present.
    pub fn push_verified_results(&self, results: &VerifiedResults) -> Result<()> {
        let _guard = self.lock_global();
        let encoded = self.encode(results)?;
        let mut tx = self.db().write_tx();
        tx.set_if_absent(
            prefix::VERIFIED_RESULT,
            results.process_id.as_bytes(),
            encoded,
        )?;
        tx.commit()
    }

    /// Returns one stored result, in scan order. No reservation: the
    /// results worker is single-flight per process by construction.
    pub fn next_verified_results(&self) -> Result<VerifiedResults> {
        let _guard = self.lock_global();
        for entry in self.db().scan(prefix::VERIFIED_RESULT, &[]) {
            let (key, value) = entry?;
            match self.decode(&value) {
                Ok(results) => return Ok(results),
                Err(err) => {
                    tracing::warn!(
                        process_id = %hex::encode(&key),
                        error = %err,
                        "skipping undecodable verified results"
                    );
                }
            }
        }
        Err(StorageError::NoMoreElements)
    }

    /// Whether a process has stored results awaiting publication.
    pub fn has_verified_results(&self, process_id: &ProcessId) -> Result<bool> {
        self.db()
            .contains(prefix::VERIFIED_RESULT, process_id.as_bytes())
    }

    /// Consumes the stored results of a process. Removing an absent record
    /// is a no-op.
    pub fn mark_verified_results_done(&self, process_id: &ProcessId) -> Result<()> {
        let _guard = self.lock_global();
        let mut tx = self.db().write_tx();
        tx.delete(prefix::VERIFIED_RESULT, process_id.as_bytes());
        tx.commit()
    }
}
