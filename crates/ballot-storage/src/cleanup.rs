//! Per-process cleanup and the global sweep.
//!
//! Both accumulate sub-step failures instead of stopping at the first one:
//! a cleanup that dies halfway leaves more garbage than one that skips a
//! bad record, and the caller still learns everything that went wrong.

use ballot_types::{
    AggregatorBallotBatch, ProcessId, StateTransitionBatch, VerifiedBallot, VoteId, VoteIdStatus,
};

use crate::db::prefix;
use crate::error::{Result, StorageError};
use crate::stats::sub_counter;
use crate::Storage;

impl Storage {
    /// Removes every derived artifact of an ended process: pending ballots,
    /// verified ballots, aggregator batches, and state transitions, in that
    /// order, then times out every non-settled vote status so voters see a
    /// terminal answer.
    ///
    /// The process record, its encryption keys, and its stats are
    /// historical records and stay untouched.
    pub fn cleanup_ended_process(&self, process_id: &ProcessId) -> Result<()> {
        let _guard = self.lock_global();
        let mut errors = Vec::new();

        if let Err(err) = self.remove_pending_ballots_by_process_inner(process_id) {
            errors.push(err);
        }
        if let Err(err) = self.remove_verified_ballots_by_process_inner(process_id) {
            errors.push(err);
        }
        if let Err(err) = self.remove_aggregator_batches_by_process_inner(process_id) {
            errors.push(err);
        }
        if let Err(err) = self.remove_state_transition_batches_by_process_inner(process_id) {
            errors.push(err);
        }
        match self.mark_process_vote_ids_timeout_inner(process_id) {
            Ok(timed_out) => {
                tracing::info!(
                    process_id = %process_id,
                    timed_out,
                    "cleaned up ended process"
                );
            }
            Err(err) => errors.push(err),
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(StorageError::Cleanup(errors))
        }
    }

    /// Operator-initiated global sweep: drops every verified ballot,
    /// aggregator batch, and state transition across all processes, marks
    /// the affected votes Error (settled votes stay settled), releases the
    /// associated in-memory locks, and rolls back the in-flight counters.
    ///
    /// Pending ballots are left alone; they have not entered the proving
    /// pipeline yet.
    pub fn clean_all_pending(&self) -> Result<()> {
        let _guard = self.lock_global();
        let mut errors = Vec::new();

        if let Err(err) = self.clean_all_verified() {
            errors.push(err);
        }
        if let Err(err) = self.clean_all_aggregated() {
            errors.push(err);
        }
        if let Err(err) = self.clean_all_transitions() {
            errors.push(err);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(StorageError::Cleanup(errors))
        }
    }

    fn clean_all_verified(&self) -> Result<()> {
        let mut tx = self.db().write_tx();
        let mut to_unlock: Vec<(ProcessId, VoteId, u64)> = Vec::new();
        for entry in self.db().scan(prefix::VERIFIED_BALLOT, &[]) {
            let (key, value) = entry?;
            tx.delete(prefix::VERIFIED_BALLOT, &key);
            tx.delete(prefix::VERIFIED_BALLOT_RESERVATION, &key);
            let ballot: VerifiedBallot = match self.decode(&value) {
                Ok(ballot) => ballot,
                Err(err) => {
                    tracing::warn!(
                        key = %hex::encode(&key),
                        error = %err,
                        "sweeping undecodable verified ballot"
                    );
                    continue;
                }
            };
            let previous = self.stage_vote_id_status(
                &mut tx,
                &ballot.process_id,
                &ballot.vote_id,
                VoteIdStatus::Error,
            )?;
            if previous == Some(VoteIdStatus::Verified) {
                self.stage_stats(&mut tx, &ballot.process_id, |stats| {
                    sub_counter(
                        &mut stats.verified_votes,
                        1,
                        "verified_votes",
                        &ballot.process_id,
                    );
                    sub_counter(
                        &mut stats.current_batch_size,
                        1,
                        "current_batch_size",
                        &ballot.process_id,
                    );
                })?;
            }
            to_unlock.push((ballot.process_id, ballot.vote_id, ballot.address));
        }
        tx.commit()?;

        for (process_id, vote_id, address) in to_unlock {
            self.locks().unlock_vote_id(&vote_id);
            self.locks().unlock_address(&process_id, address);
        }
        Ok(())
    }

    fn clean_all_aggregated(&self) -> Result<()> {
        let mut tx = self.db().write_tx();
        let mut to_unlock: Vec<(ProcessId, VoteId, u64)> = Vec::new();
        for entry in self.db().scan(prefix::AGGREGATOR_BATCH, &[]) {
            let (key, value) = entry?;
            tx.delete(prefix::AGGREGATOR_BATCH, &key);
            tx.delete(prefix::AGGREGATOR_BATCH_RESERVATION, &key);
            let batch: AggregatorBallotBatch = match self.decode(&value) {
                Ok(batch) => batch,
                Err(err) => {
                    tracing::warn!(
                        key = %hex::encode(&key),
                        error = %err,
                        "sweeping undecodable aggregator batch"
                    );
                    continue;
                }
            };
            let mut in_flight = 0u64;
            for ballot in &batch.ballots {
                let previous = self.stage_vote_id_status(
                    &mut tx,
                    &batch.process_id,
                    &ballot.vote_id,
                    VoteIdStatus::Error,
                )?;
                if previous == Some(VoteIdStatus::Aggregated) {
                    in_flight += 1;
                }
                to_unlock.push((batch.process_id.clone(), ballot.vote_id.clone(), ballot.address));
            }
            if in_flight > 0 {
                self.stage_stats(&mut tx, &batch.process_id, |stats| {
                    sub_counter(
                        &mut stats.aggregated_votes,
                        in_flight,
                        "aggregated_votes",
                        &batch.process_id,
                    );
                })?;
            }
        }
        tx.commit()?;

        for (process_id, vote_id, address) in to_unlock {
            self.locks().unlock_vote_id(&vote_id);
            self.locks().unlock_address(&process_id, address);
        }
        Ok(())
    }

    fn clean_all_transitions(&self) -> Result<()> {
        let mut tx = self.db().write_tx();
        let mut to_unlock: Vec<(ProcessId, VoteId, u64)> = Vec::new();
        for entry in self.db().scan(prefix::STATE_TRANSITION, &[]) {
            let (key, value) = entry?;
            tx.delete(prefix::STATE_TRANSITION, &key);
            tx.delete(prefix::STATE_TRANSITION_RESERVATION, &key);
            let batch: StateTransitionBatch = match self.decode(&value) {
                Ok(batch) => batch,
                Err(err) => {
                    tracing::warn!(
                        key = %hex::encode(&key),
                        error = %err,
                        "sweeping undecodable state-transition batch"
                    );
                    continue;
                }
            };
            for ballot in &batch.ballots {
                self.stage_vote_id_status(
                    &mut tx,
                    &batch.process_id,
                    &ballot.vote_id,
                    VoteIdStatus::Error,
                )?;
                to_unlock.push((batch.process_id.clone(), ballot.vote_id.clone(), ballot.address));
            }
            self.stage_stats(&mut tx, &batch.process_id, |stats| {
                sub_counter(
                    &mut stats.state_transitions,
                    1,
                    "state_transitions",
                    &batch.process_id,
                );
            })?;
        }
        tx.commit()?;

        for (process_id, vote_id, address) in to_unlock {
            self.locks().unlock_vote_id(&vote_id);
            self.locks().unlock_address(&process_id, address);
        }
        Ok(())
    }
}
