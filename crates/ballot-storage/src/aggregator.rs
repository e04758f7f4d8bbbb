//! The aggregator stage: batches of verified ballots bundled under one
//! aggregated proof, waiting for a state-transition worker.
//!
//! Keys are `process_id ‖ hash(batch)`: the batch has no natural identifier,
//! so it is named by the content hash of its encoded form.

use ballot_types::{derive_key, AggregatorBallotBatch, ProcessId, VoteIdStatus};

use crate::db::prefix;
use crate::error::{Result, StorageError};
use crate::stats::sub_counter;
use crate::Storage;

impl Storage {
    /// Stores an aggregated batch, moves every bundled vote to Aggregated,
    /// and rolls the batch counters forward.
    pub fn push_aggregator_batch(&self, batch: &AggregatorBallotBatch) -> Result<()> {
        let _guard = self.lock_global();
        let encoded = self.encode(batch)?;
        let key = batch_key(&batch.process_id, &encoded);

        let mut tx = self.db().write_tx();
        tx.set_if_absent(prefix::AGGREGATOR_BATCH, &key, encoded)?;
        for ballot in &batch.ballots {
            self.stage_vote_id_status(
                &mut tx,
                &batch.process_id,
                &ballot.vote_id,
                VoteIdStatus::Aggregated,
            )?;
        }
        let size = batch.ballots.len() as u64;
        self.stage_stats(&mut tx, &batch.process_id, |stats| {
            stats.aggregated_votes += size;
            stats.last_batch_size += size;
            sub_counter(
                &mut stats.current_batch_size,
                size,
                "current_batch_size",
                &batch.process_id,
            );
        })?;
        tx.commit()
    }

    /// Claims the first unreserved batch of a process.
    pub fn next_aggregator_batch(
        &self,
        process_id: &ProcessId,
    ) -> Result<(AggregatorBallotBatch, Vec<u8>)> {
        let _guard = self.lock_global();
        for entry in self
            .db()
            .scan(prefix::AGGREGATOR_BATCH, process_id.as_bytes())
        {
            let (key, value) = entry?;
            if self.is_reserved(prefix::AGGREGATOR_BATCH_RESERVATION, &key)? {
                continue;
            }
            let batch: AggregatorBallotBatch = match self.decode(&value) {
                Ok(batch) => batch,
                Err(err) => {
                    tracing::warn!(
                        key = %hex::encode(&key),
                        error = %err,
                        "skipping undecodable aggregator batch"
                    );
                    continue;
                }
            };
            let mut tx = self.db().write_tx();
            if self
                .stage_reservation(&mut tx, prefix::AGGREGATOR_BATCH_RESERVATION, &key)
                .is_err()
            {
                return Err(StorageError::NoMoreElements);
            }
            tx.commit()?;
            return Ok((batch, key));
        }
        Err(StorageError::NoMoreElements)
    }

    /// Consumes a batch that produced a state transition: the batch and its
    /// reservation disappear, nothing else changes (the transition push owns
    /// the status and stats updates).
    pub fn mark_aggregator_batch_done(&self, key: &[u8]) -> Result<()> {
        let _guard = self.lock_global();
        let mut tx = self.db().write_tx();
        tx.delete(prefix::AGGREGATOR_BATCH, key);
        tx.delete(prefix::AGGREGATOR_BATCH_RESERVATION, key);
        tx.commit()
    }

    /// Consumes a batch whose state transition failed: each bundled vote
    /// still in Aggregated moves to Error, and the aggregation counters roll
    /// back by the number of such votes.
    pub fn mark_aggregator_batch_failed(&self, key: &[u8]) -> Result<()> {
        let _guard = self.lock_global();
        let stored = self.db().get(prefix::AGGREGATOR_BATCH, key)?;
        let mut tx = self.db().write_tx();
        tx.delete(prefix::AGGREGATOR_BATCH, key);
        tx.delete(prefix::AGGREGATOR_BATCH_RESERVATION, key);

        if let Some(bytes) = stored {
            match self.decode::<AggregatorBallotBatch>(&bytes) {
                Ok(batch) => {
                    let mut rolled_back = 0u64;
                    for ballot in &batch.ballots {
                        let previous = self.stage_vote_id_status(
                            &mut tx,
                            &batch.process_id,
                            &ballot.vote_id,
                            VoteIdStatus::Error,
                        )?;
                        if previous == Some(VoteIdStatus::Aggregated) {
                            rolled_back += 1;
                        }
                    }
                    if rolled_back > 0 {
                        self.stage_stats(&mut tx, &batch.process_id, |stats| {
                            sub_counter(
                                &mut stats.aggregated_votes,
                                rolled_back,
                                "aggregated_votes",
                                &batch.process_id,
                            );
                            sub_counter(
                                &mut stats.last_batch_size,
                                rolled_back,
                                "last_batch_size",
                                &batch.process_id,
                            );
                            stats.current_batch_size += rolled_back;
                        })?;
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        key = %hex::encode(key),
                        error = %err,
                        "removing undecodable aggregator batch; statuses untouched"
                    );
                }
            }
        }
        tx.commit()
    }

    /// Deletes every aggregator batch of a process. Returns the number
    /// removed.
    pub fn remove_aggregator_batches_by_process(&self, process_id: &ProcessId) -> Result<usize> {
        let _guard = self.lock_global();
        self.remove_aggregator_batches_by_process_inner(process_id)
    }

    pub(crate) fn remove_aggregator_batches_by_process_inner(
        &self,
        process_id: &ProcessId,
    ) -> Result<usize> {
        let keys: Vec<Vec<u8>> = self
            .db()
            .scan(prefix::AGGREGATOR_BATCH, process_id.as_bytes())
            .map(|entry| entry.map(|(key, _)| key))
            .collect::<Result<_>>()?;
        if keys.is_empty() {
            return Ok(0);
        }
        let mut tx = self.db().write_tx();
        for key in &keys {
            tx.delete(prefix::AGGREGATOR_BATCH, key);
            tx.delete(prefix::AGGREGATOR_BATCH_RESERVATION, key);
        }
        tx.commit()?;
        Ok(keys.len())
    }
}

/// `process_id ‖ hash(encoded)`: the content-derived key of a batch.
pub(crate) fn batch_key(process_id: &ProcessId, encoded: &[u8]) -> Vec<u8> {
    let digest = derive_key(encoded);
    let mut key = Vec::with_capacity(process_id.as_bytes().len() + digest.len());
    key.extend_from_slice(process_id.as_bytes());
    key.extend_from_slice(&digest);
    key
}
