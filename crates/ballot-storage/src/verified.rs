//! The verified stage: proven ballots waiting for an aggregator worker.
//!
//! Keys are `process_id ‖ vote_id`, so everything here is a prefix scan over
//! one process. A pulled batch never contains two ballots from the same
//! address; the aggregation circuit assumes pairwise-distinct voters.

use std::collections::HashSet;

use ballot_types::{ProcessId, VerifiedBallot, VoteId, VoteIdStatus};

use crate::db::prefix;
use crate::error::{Result, StorageError};
use crate::stats::sub_counter;
use crate::Storage;

impl Storage {
    /// Collects up to `num_fields` unreserved verified ballots of a process,
    /// at most one per address, and reserves them all. Returns the ballots
    /// paired with their stage keys.
    ///
    /// `num_fields == 0` returns an empty batch without touching any
    /// reservation; an empty scan result is [`StorageError::NotFound`].
    pub fn pull_verified_ballots(
        &self,
        process_id: &ProcessId,
        num_fields: usize,
    ) -> Result<Vec<(VerifiedBallot, Vec<u8>)>> {
        if num_fields == 0 {
            return Ok(Vec::new());
        }
        let _guard = self.lock_global();

        let mut picked: Vec<(VerifiedBallot, Vec<u8>)> = Vec::new();
        let mut seen_addresses: HashSet<u64> = HashSet::new();
        for entry in self.db().scan(prefix::VERIFIED_BALLOT, process_id.as_bytes()) {
            let (key, value) = entry?;
            if self.is_reserved(prefix::VERIFIED_BALLOT_RESERVATION, &key)? {
                continue;
            }
            let ballot: VerifiedBallot = match self.decode(&value) {
                Ok(ballot) => ballot,
                Err(err) => {
                    tracing::warn!(
                        key = %hex::encode(&key),
                        error = %err,
                        "skipping undecodable verified ballot"
                    );
                    continue;
                }
            };
            if !seen_addresses.insert(ballot.address) {
                continue;
            }
            picked.push((ballot, key));
            if picked.len() == num_fields {
                break;
            }
        }
        if picked.is_empty() {
            return Err(StorageError::NotFound);
        }

        let mut tx = self.db().write_tx();
        let mut batch = Vec::with_capacity(picked.len());
        for (ballot, key) in picked {
            match self.stage_reservation(&mut tx, prefix::VERIFIED_BALLOT_RESERVATION, &key) {
                Ok(()) => batch.push((ballot, key)),
                Err(StorageError::KeyAlreadyExists) => {
                    // Claimed between the scan and now; drop it from the
                    // batch and keep the rest.
                    tracing::debug!(key = %hex::encode(&key), "verified ballot claimed mid-pull");
                }
                Err(err) => return Err(err),
            }
        }
        tx.commit()?;

        if batch.is_empty() {
            return Err(StorageError::NotFound);
        }
        Ok(batch)
    }

    /// Number of verified ballots of a process not currently claimed.
    pub fn count_verified_ballots(&self, process_id: &ProcessId) -> Result<usize> {
        let _guard = self.lock_global();
        let mut count = 0;
        for entry in self.db().scan(prefix::VERIFIED_BALLOT, process_id.as_bytes()) {
            let (key, _) = entry?;
            if !self.is_reserved(prefix::VERIFIED_BALLOT_RESERVATION, &key)? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Consumes verified ballots that made it into an aggregator batch:
    /// deletes each entry and reservation and releases the vote-id and
    /// address locks. Keys without a stored ballot are tolerated.
    pub fn mark_verified_ballots_done(&self, keys: &[Vec<u8>]) -> Result<()> {
        let _guard = self.lock_global();
        let mut tx = self.db().write_tx();
        let mut to_unlock: Vec<(ProcessId, VoteId, u64)> = Vec::new();
        for key in keys {
            if let Some(bytes) = tx.get(prefix::VERIFIED_BALLOT, key)? {
                match self.decode::<VerifiedBallot>(&bytes) {
                    Ok(ballot) => {
                        to_unlock.push((ballot.process_id, ballot.vote_id, ballot.address));
                    }
                    Err(err) => {
                        tracing::warn!(
                            key = %hex::encode(key),
                            error = %err,
                            "removing undecodable verified ballot; locks untouched"
                        );
                    }
                }
            }
            tx.delete(prefix::VERIFIED_BALLOT, key);
            tx.delete(prefix::VERIFIED_BALLOT_RESERVATION, key);
        }
        tx.commit()?;

        for (process_id, vote_id, address) in to_unlock {
            self.locks().unlock_vote_id(&vote_id);
            self.locks().unlock_address(&process_id, address);
        }
        Ok(())
    }

    /// Consumes verified ballots whose aggregation failed: like
    /// [`Storage::mark_verified_ballots_done`], but each vote's status moves
    /// to Error, and the verified counters roll back for votes that were in
    /// fact still Verified.
    pub fn mark_verified_ballots_failed(&self, keys: &[Vec<u8>]) -> Result<()> {
        let _guard = self.lock_global();
        let mut tx = self.db().write_tx();
        let mut to_unlock: Vec<(ProcessId, VoteId, u64)> = Vec::new();
        for key in keys {
            if let Some(bytes) = tx.get(prefix::VERIFIED_BALLOT, key)? {
                match self.decode::<VerifiedBallot>(&bytes) {
                    Ok(ballot) => {
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
                    Err(err) => {
                        tracing::warn!(
                            key = %hex::encode(key),
                            error = %err,
                            "removing undecodable verified ballot; locks untouched"
                        );
                    }
                }
            }
            tx.delete(prefix::VERIFIED_BALLOT, key);
            tx.delete(prefix::VERIFIED_BALLOT_RESERVATION, key);
        }
        tx.commit()?;

        for (process_id, vote_id, address) in to_unlock {
            self.locks().unlock_vote_id(&vote_id);
            self.locks().unlock_address(&process_id, address);
        }
        Ok(())
    }

    /// Drops the reservations on the given keys, leaving the ballots in the
    /// stage for another aggregator.
    pub fn release_verified_ballot_reservations(&self, keys: &[Vec<u8>]) -> Result<()> {
        let _guard = self.lock_global();
        let mut tx = self.db().write_tx();
        for key in keys {
            tx.delete(prefix::VERIFIED_BALLOT_RESERVATION, key);
        }
        tx.commit()
    }

    /// Deletes every verified ballot of a process, releasing the associated
    /// locks. Returns the number removed.
    pub fn remove_verified_ballots_by_process(&self, process_id: &ProcessId) -> Result<usize> {
        let _guard = self.lock_global();
        self.remove_verified_ballots_by_process_inner(process_id)
    }

    pub(crate) fn remove_verified_ballots_by_process_inner(
        &self,
        process_id: &ProcessId,
    ) -> Result<usize> {
        let mut keys: Vec<Vec<u8>> = Vec::new();
        let mut to_unlock: Vec<(ProcessId, VoteId, u64)> = Vec::new();
        for entry in self.db().scan(prefix::VERIFIED_BALLOT, process_id.as_bytes()) {
            let (key, value) = entry?;
            match self.decode::<VerifiedBallot>(&value) {
                Ok(ballot) => {
                    to_unlock.push((ballot.process_id, ballot.vote_id, ballot.address));
                }
                Err(err) => {
                    tracing::warn!(
                        key = %hex::encode(&key),
                        error = %err,
                        "removing undecodable verified ballot; locks untouched"
                    );
                }
            }
            keys.push(key);
        }
        if keys.is_empty() {
            return Ok(0);
        }

        let mut tx = self.db().write_tx();
        for key in &keys {
            tx.delete(prefix::VERIFIED_BALLOT, key);
            tx.delete(prefix::VERIFIED_BALLOT_RESERVATION, key);
        }
        tx.commit()?;

        for (owner, vote_id, address) in to_unlock {
            self.locks().unlock_vote_id(&vote_id);
            self.locks().unlock_address(&owner, address);
        }
        Ok(keys.len())
    }
}
