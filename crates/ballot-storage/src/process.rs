//! The process registry: one record per voting process, mutated only
//! through atomic read-modify-write under the global lock.

use ballot_types::{EncryptionKeys, Process, ProcessId, ProcessStatus};

use crate::db::prefix;
use crate::error::{Result, StorageError};
use crate::external::StateTreeInit;
use crate::reservations::unix_now;
use crate::Storage;

impl Storage {
    /// Registers a new process.
    ///
    /// Rejects duplicates with [`StorageError::KeyAlreadyExists`]. On
    /// insert, the process state tree is loaded or created, the encryption
    /// keys are fetched or generated, the tree is initialized from the
    /// census and ballot mode, and the resulting root is recorded in the
    /// stored record.
    pub fn new_process(&self, process: &Process) -> Result<()> {
        let _guard = self.lock_global();
        if self.db().contains(prefix::PROCESS, process.id.as_bytes())? {
            return Err(StorageError::KeyAlreadyExists);
        }

        let mut stored = process.clone();
        let keys = match &stored.encryption_key {
            Some(public_key) => {
                let compressed = public_key.compressed();
                match self.db().get(prefix::ENCRYPTION_KEY, &compressed)? {
                    Some(bytes) => self.decode::<EncryptionKeys>(&bytes)?,
                    // A caller-provided point we have no record for: keep
                    // the public half so lookups succeed.
                    None => EncryptionKeys {
                        public_key: public_key.clone(),
                        private_key: None,
                    },
                }
            }
            None => {
                let generated = self.external().key_generator.generate(&stored.id)?;
                stored.encryption_key = Some(generated.public_key.clone());
                generated
            }
        };

        let init = StateTreeInit {
            census_origin: stored.census.origin,
            census_root: stored.census.root.clone(),
            ballot_mode: stored.ballot_mode.clone(),
            encryption_key: keys.public_key.clone(),
        };
        let root = self.external().state_tree.load_or_init(&stored.id, &init)?;
        stored.state_root = root;

        let mut tx = self.db().write_tx();
        tx.set(
            prefix::ENCRYPTION_KEY,
            &keys.compressed_public(),
            self.encode(&keys)?,
        );
        tx.set_if_absent(
            prefix::PROCESS,
            stored.id.as_bytes(),
            self.encode(&stored)?,
        )?;
        tx.commit()?;

        tracing::info!(
            process_id = %stored.id,
            start_time = stored.start_time,
            duration = stored.duration,
            "registered new process"
        );
        Ok(())
    }

    /// Fetches a process record.
    pub fn process(&self, process_id: &ProcessId) -> Result<Process> {
        self.process_record(process_id)
    }

    pub(crate) fn process_record(&self, process_id: &ProcessId) -> Result<Process> {
        let bytes = self
            .db()
            .get(prefix::PROCESS, process_id.as_bytes())?
            .ok_or(StorageError::NotFound)?;
        self.decode(&bytes)
    }

    /// Atomic read-modify-write of a process record. Returns the updated
    /// record.
    pub fn update_process(
        &self,
        process_id: &ProcessId,
        update: impl FnOnce(&mut Process),
    ) -> Result<Process> {
        let _guard = self.lock_global();
        let mut process = self.process_record(process_id)?;
        update(&mut process);
        let mut tx = self.db().write_tx();
        tx.set(
            prefix::PROCESS,
            process_id.as_bytes(),
            self.encode(&process)?,
        );
        tx.commit()?;
        Ok(process)
    }

    /// Every registered process id, in key order.
    pub fn list_processes(&self) -> Result<Vec<ProcessId>> {
        let _guard = self.lock_global();
        self.db()
            .scan(prefix::PROCESS, &[])
            .map(|entry| entry.map(|(key, _)| key.into()))
            .collect()
    }

    /// Whether a process can take a ballot right now: it must be Ready, the
    /// recorded state root must match the state tree's current root, and
    /// the census must be locally available.
    pub fn process_is_accepting_votes(&self, process_id: &ProcessId) -> Result<bool> {
        let process = self.process_record(process_id)?;
        if !process.status.is_accepting() {
            return Ok(false);
        }
        let current_root = self.external().state_tree.current_root(process_id)?;
        if current_root != process.state_root {
            tracing::warn!(
                process_id = %process_id,
                stored_root = %hex::encode(&process.state_root),
                current_root = %hex::encode(&current_root),
                "process state root diverged from its tree; not accepting votes"
            );
            return Ok(false);
        }
        if !self.external().census.contains_root(&process.census.root)? {
            tracing::debug!(
                process_id = %process_id,
                census_root = %hex::encode(&process.census.root),
                "census not available; not accepting votes"
            );
            return Ok(false);
        }
        Ok(true)
    }

    /// One monitor pass: moves every Ready process past its end time to
    /// Ended and runs its cleanup. Per-process failures are logged and do
    /// not stop the pass. Returns how many processes were ended.
    pub(crate) fn end_expired_processes(&self) -> Result<usize> {
        let now = unix_now();
        let expired: Vec<ProcessId> = {
            let _guard = self.lock_global();
            let mut expired = Vec::new();
            for entry in self.db().scan(prefix::PROCESS, &[]) {
                let (key, value) = entry?;
                let process: Process = match self.decode(&value) {
                    Ok(process) => process,
                    Err(err) => {
                        tracing::warn!(
                            process_id = %hex::encode(&key),
                            error = %err,
                            "skipping unreadable process record"
                        );
                        continue;
                    }
                };
                if process.status == ProcessStatus::Ready
                    && process.start_time.saturating_add(process.duration) < now
                {
                    expired.push(process.id);
                }
            }
            expired
        };

        let mut ended = 0;
        for process_id in expired {
            if let Err(err) = self.update_process(&process_id, |process| {
                process.status = ProcessStatus::Ended;
            }) {
                tracing::error!(process_id = %process_id, error = %err, "failed to end process");
                continue;
            }
            tracing::info!(process_id = %process_id, "process ended; cleaning up");
            if let Err(err) = self.cleanup_ended_process(&process_id) {
                tracing::error!(
                    process_id = %process_id,
                    error = %err,
                    "ended-process cleanup reported errors"
                );
            }
            ended += 1;
        }
        Ok(ended)
    }
}
