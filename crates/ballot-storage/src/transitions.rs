//! The state-transition stage: proven transitions waiting for the on-chain
//! publisher.
//!
//! Marking a transition done is what settles votes; marking it outdated
//! discards it without touching vote statuses, for the case where the chain
//! moved past the roots the batch was built on.

use ballot_types::{ProcessId, StateTransitionBatch, VoteIdStatus};

use crate::aggregator::batch_key;
use crate::db::prefix;
use crate::error::{Result, StorageError};
use crate::reservations::unix_now;
use crate::Storage;

impl Storage {
    /// Stores a state-transition batch and moves every applied vote to
    /// Processed.
    pub fn push_state_transition_batch(&self, batch: &StateTransitionBatch) -> Result<()> {
        let _guard = self.lock_global();
        let encoded = self.encode(batch)?;
        let key = batch_key(&batch.process_id, &encoded);

        let mut tx = self.db().write_tx();
        tx.set_if_absent(prefix::STATE_TRANSITION, &key, encoded)?;
        for ballot in &batch.ballots {
            self.stage_vote_id_status(
                &mut tx,
                &batch.process_id,
                &ballot.vote_id,
                VoteIdStatus::Processed,
            )?;
        }
        self.stage_stats(&mut tx, &batch.process_id, |stats| {
            stats.state_transitions += 1;
        })?;
        tx.commit()
    }

    /// Claims the first unreserved state-transition batch of a process.
    pub fn next_state_transition_batch(
        &self,
        process_id: &ProcessId,
    ) -> Result<(StateTransitionBatch, Vec<u8>)> {
        let _guard = self.lock_global();
        for entry in self
            .db()
            .scan(prefix::STATE_TRANSITION, process_id.as_bytes())
        {
            let (key, value) = entry?;
            if self.is_reserved(prefix::STATE_TRANSITION_RESERVATION, &key)? {
                continue;
            }
            let batch: StateTransitionBatch = match self.decode(&value) {
                Ok(batch) => batch,
                Err(err) => {
                    tracing::warn!(
                        key = %hex::encode(&key),
                        error = %err,
                        "skipping undecodable state-transition batch"
                    );
                    continue;
                }
            };
            let mut tx = self.db().write_tx();
            if self
                .stage_reservation(&mut tx, prefix::STATE_TRANSITION_RESERVATION, &key)
                .is_err()
            {
                return Err(StorageError::NoMoreElements);
            }
            tx.commit()?;
            return Ok((batch, key));
        }
        Err(StorageError::NoMoreElements)
    }

    /// Consumes a batch the publisher confirmed on-chain: settles every
    /// applied vote, bumps the settled counter, and stamps the settlement
    /// time.
    pub fn mark_state_transition_batch_done(
        &self,
        key: &[u8],
        process_id: &ProcessId,
    ) -> Result<()> {
        let _guard = self.lock_global();
        let bytes = self
            .db()
            .get(prefix::STATE_TRANSITION, key)?
            .ok_or(StorageError::NotFound)?;
        let batch: StateTransitionBatch = self.decode(&bytes)?;

        let mut tx = self.db().write_tx();
        tx.delete(prefix::STATE_TRANSITION, key);
        tx.delete(prefix::STATE_TRANSITION_RESERVATION, key);
        for ballot in &batch.ballots {
            self.stage_vote_id_status(
                &mut tx,
                process_id,
                &ballot.vote_id,
                VoteIdStatus::Settled,
            )?;
        }
        self.stage_stats(&mut tx, process_id, |stats| {
            stats.settled_state_transitions += 1;
            stats.last_state_transition_date = unix_now();
        })?;
        tx.commit()
    }

    /// Discards a batch the chain outran. The entry and its reservation
    /// disappear; vote statuses stay Processed, nothing settles. Absent keys
    /// and corrupt stored data are both fine: the entry is removed either
    /// way.
    pub fn mark_state_transition_batch_outdated(&self, key: &[u8]) -> Result<()> {
        let _guard = self.lock_global();
        let mut tx = self.db().write_tx();
        tx.delete(prefix::STATE_TRANSITION, key);
        tx.delete(prefix::STATE_TRANSITION_RESERVATION, key);
        tx.commit()
    }

    /// Deletes every state-transition batch of a process. Returns the
    /// number removed.
    pub fn remove_state_transition_batches_by_process(
        &self,
        process_id: &ProcessId,
    ) -> Result<usize> {
        let _guard = self.lock_global();
        self.remove_state_transition_batches_by_process_inner(process_id)
    }

    pub(crate) fn remove_state_transition_batches_by_process_inner(
        &self,
        process_id: &ProcessId,
    ) -> Result<usize> {
        let keys: Vec<Vec<u8>> = self
            .db()
            .scan(prefix::STATE_TRANSITION, process_id.as_bytes())
            .map(|entry| entry.map(|(key, _)| key))
            .collect::<Result<_>>()?;
        if keys.is_empty() {
            return Ok(0);
        }
        let mut tx = self.db().write_tx();
        for key in &keys {
            tx.delete(prefix::STATE_TRANSITION, key);
            tx.delete(prefix::STATE_TRANSITION_RESERVATION, key);
        }
        tx.commit()?;
        Ok(keys.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StorageConfig;

    #[test]
    fn outdated_tolerates_corrupt_stored_data() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(StorageConfig::new(dir.path())).unwrap();

        let key = b"p1corrupt".to_vec();
        let mut tx = storage.db().write_tx();
        tx.set(prefix::STATE_TRANSITION, &key, b"\xff\xfe\xfd".to_vec());
        tx.set(prefix::STATE_TRANSITION_RESERVATION, &key, b"claim".to_vec());
        tx.commit().unwrap();

        storage.mark_state_transition_batch_outdated(&key).unwrap();
        assert_eq!(
            storage.db().get(prefix::STATE_TRANSITION, &key).unwrap(),
            None
        );
        assert_eq!(
            storage
                .db()
                .get(prefix::STATE_TRANSITION_RESERVATION, &key)
                .unwrap(),
            None
        );
    }

    #[test]
    fn outdated_on_absent_key_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(StorageConfig::new(dir.path())).unwrap();
        storage
            .mark_state_transition_batch_outdated(b"p1missing")
            .unwrap();
    }
}
