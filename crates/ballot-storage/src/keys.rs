//! The encryption-key registry.
//!
//! Key pairs are stored under the compressed public point, not the process
//! id, so processes sharing a ceremony key share one record. The process
//! record carries the public point as the lookup handle.

use ballot_types::{EncryptionKeys, ProcessId, ProcessStatus};

use crate::db::prefix;
use crate::error::{Result, StorageError};
use crate::Storage;

impl Storage {
    /// Stores a key pair and points the process record at it.
    pub fn set_encryption_keys(&self, process_id: &ProcessId, keys: &EncryptionKeys) -> Result<()> {
        let _guard = self.lock_global();
        let mut process = self.process_record(process_id)?;
        process.encryption_key = Some(keys.public_key.clone());

        let mut tx = self.db().write_tx();
        tx.set(
            prefix::ENCRYPTION_KEY,
            &keys.compressed_public(),
            self.encode(keys)?,
        );
        tx.set(
            prefix::PROCESS,
            process_id.as_bytes(),
            self.encode(&process)?,
        );
        tx.commit()
    }

    /// The key pair of a process, via the handle in its record.
    pub fn encryption_keys(&self, process_id: &ProcessId) -> Result<EncryptionKeys> {
        let process = self.process_record(process_id)?;
        let handle = process.encryption_key.ok_or(StorageError::NotFound)?;
        let bytes = self
            .db()
            .get(prefix::ENCRYPTION_KEY, &handle.compressed())?
            .ok_or(StorageError::NotFound)?;
        self.decode(&bytes)
    }

    /// Processes that have an encryption key registered.
    pub fn list_process_with_encryption_keys(&self) -> Result<Vec<ProcessId>> {
        self.list_keyed_processes(|_| true)
    }

    /// Ended processes that have an encryption key registered; the set the
    /// results worker decrypts tallies for.
    pub fn list_ended_process_with_encryption_keys(&self) -> Result<Vec<ProcessId>> {
        self.list_keyed_processes(|status| status == ProcessStatus::Ended)
    }

    fn list_keyed_processes(
        &self,
        want_status: impl Fn(ProcessStatus) -> bool,
    ) -> Result<Vec<ProcessId>> {
        let _guard = self.lock_global();
        let mut out = Vec::new();
        for entry in self.db().scan(prefix::PROCESS, &[]) {
            let (key, value) = entry?;
            match self.decode::<ballot_types::Process>(&value) {
                Ok(process) => {
                    if process.encryption_key.is_some() && want_status(process.status) {
                        out.push(process.id);
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        process_id = %hex::encode(&key),
                        error = %err,
                        "skipping unreadable process record"
                    );
                }
            }
        }
        Ok(out)
    }
}
