//! The pending stage: externally signed ballots waiting for a verifier
//! worker.
//!
//! Unlike every later stage, the pending queue is global: its key is the
//! vote id alone, which is what makes a vote id a system-wide unique name.
//! Admission is guarded twice: the in-memory lock maps reject concurrent
//! duplicates before any I/O, and the durable set-if-absent rejects
//! resubmission of an already stored vote id.

use ballot_types::{Ballot, ProcessId, VerifiedBallot, VoteId, VoteIdStatus};

use crate::db::prefix;
use crate::error::{Result, StorageError};
use crate::stats::sub_counter;
use crate::status::process_vote_key;
use crate::Storage;

impl Storage {
    /// Admits a ballot into the pending queue.
    ///
    /// Fails with [`StorageError::NullifierProcessing`] when the vote id is
    /// locked, [`StorageError::AddressProcessing`] when another ballot from
    /// the same (process, address) pair is in flight, and
    /// [`StorageError::BallotAlreadyExists`] when the vote id is already
    /// durably stored. On any failure past the locks, both locks are
    /// released and no durable state is written.
    pub fn push_pending_ballot(&self, ballot: &Ballot) -> Result<()> {
        if !self.locks().lock_vote_id(&ballot.vote_id) {
            return Err(StorageError::NullifierProcessing);
        }
        if !self.locks().lock_address(&ballot.process_id, ballot.address) {
            self.locks().unlock_vote_id(&ballot.vote_id);
            return Err(StorageError::AddressProcessing);
        }

        let result = self.push_pending_durable(ballot);
        if result.is_err() {
            self.locks().unlock_vote_id(&ballot.vote_id);
            self.locks().unlock_address(&ballot.process_id, ballot.address);
        }
        result
    }

    fn push_pending_durable(&self, ballot: &Ballot) -> Result<()> {
        let _guard = self.lock_global();

        let process = self.process_record(&ballot.process_id)?;
        if !process.status.is_accepting() {
            return Err(StorageError::ProcessNotAccepting);
        }

        let encoded = self.encode(ballot)?;
        let mut tx = self.db().write_tx();
        tx.set_if_absent(prefix::BALLOT, ballot.vote_id.as_bytes(), encoded)
            .map_err(|err| match err {
                StorageError::KeyAlreadyExists => StorageError::BallotAlreadyExists,
                other => other,
            })?;
        self.stage_vote_id_status(
            &mut tx,
            &ballot.process_id,
            &ballot.vote_id,
            VoteIdStatus::Pending,
        )?;
        self.stage_stats(&mut tx, &ballot.process_id, |stats| {
            stats.pending_votes += 1;
        })?;
        tx.commit()
    }

    /// Claims the first unreserved pending ballot and returns it with its
    /// key. Admin sweeps hold the global lock; pipeline workers that only
    /// need the queue can use [`Storage::next_pending_ballot_for_worker`].
    pub fn next_pending_ballot(&self) -> Result<(Ballot, VoteId)> {
        let _global = self.lock_global();
        let _workers = self.lock_workers();
        self.next_pending_inner()
    }

    /// The worker variant: takes only the workers lock, so a long admin
    /// sweep under the global lock cannot starve the verifier pool.
    pub fn next_pending_ballot_for_worker(&self) -> Result<(Ballot, VoteId)> {
        let _workers = self.lock_workers();
        self.next_pending_inner()
    }

    fn next_pending_inner(&self) -> Result<(Ballot, VoteId)> {
        for entry in self.db().scan(prefix::BALLOT, &[]) {
            let (key, value) = entry?;
            if self.is_reserved(prefix::BALLOT_RESERVATION, &key)? {
                continue;
            }
            let ballot: Ballot = match self.decode(&value) {
                Ok(ballot) => ballot,
                Err(err) => {
                    tracing::warn!(
                        vote_id = %hex::encode(&key),
                        error = %err,
                        "skipping undecodable pending ballot"
                    );
                    continue;
                }
            };
            let mut tx = self.db().write_tx();
            if self
                .stage_reservation(&mut tx, prefix::BALLOT_RESERVATION, &key)
                .is_err()
            {
                // Lost the claim race; callers retry on their next round.
                return Err(StorageError::NoMoreElements);
            }
            tx.commit()?;
            return Ok((ballot, key.into()));
        }
        Err(StorageError::NoMoreElements)
    }

    /// Fetches a pending ballot without claiming it.
    pub fn ballot(&self, vote_id: &VoteId) -> Result<Ballot> {
        let bytes = self
            .db()
            .get(prefix::BALLOT, vote_id.as_bytes())?
            .ok_or(StorageError::NotFound)?;
        self.decode(&bytes)
    }

    /// Deletes a pending ballot and its reservation, releasing its locks.
    /// Deleting an absent ballot is a no-op.
    pub fn remove_pending_ballot(&self, vote_id: &VoteId) -> Result<()> {
        let _guard = self.lock_global();
        self.remove_pending_ballot_inner(vote_id)
    }

    pub(crate) fn remove_pending_ballot_inner(&self, vote_id: &VoteId) -> Result<()> {
        let stored = self.db().get(prefix::BALLOT, vote_id.as_bytes())?;
        let mut tx = self.db().write_tx();
        tx.delete(prefix::BALLOT, vote_id.as_bytes());
        tx.delete(prefix::BALLOT_RESERVATION, vote_id.as_bytes());

        let ballot = match stored {
            None => {
                tx.commit()?;
                return Ok(());
            }
            Some(bytes) => match self.decode::<Ballot>(&bytes) {
                Ok(ballot) => Some(ballot),
                Err(err) => {
                    tracing::warn!(
                        vote_id = %vote_id,
                        error = %err,
                        "removing undecodable pending ballot; locks and stats untouched"
                    );
                    None
                }
            },
        };
        if let Some(ballot) = &ballot {
            self.stage_stats(&mut tx, &ballot.process_id, |stats| {
                sub_counter(
                    &mut stats.pending_votes,
                    1,
                    "pending_votes",
                    &ballot.process_id,
                );
            })?;
        }
        tx.commit()?;

        if let Some(ballot) = ballot {
            self.locks().unlock_vote_id(&ballot.vote_id);
            self.locks().unlock_address(&ballot.process_id, ballot.address);
        }
        Ok(())
    }

    /// Deletes every pending ballot belonging to `process_id`.
    ///
    /// Pending keys carry no process prefix, so this scans the whole stage
    /// and filters on the decoded process id. Returns the number removed.
    pub fn remove_pending_ballots_by_process(&self, process_id: &ProcessId) -> Result<usize> {
        let _guard = self.lock_global();
        self.remove_pending_ballots_by_process_inner(process_id)
    }

    pub(crate) fn remove_pending_ballots_by_process_inner(
        &self,
        process_id: &ProcessId,
    ) -> Result<usize> {
        let mut doomed: Vec<Ballot> = Vec::new();
        for entry in self.db().scan(prefix::BALLOT, &[]) {
            let (key, value) = entry?;
            match self.decode::<Ballot>(&value) {
                Ok(ballot) => {
                    if &ballot.process_id == process_id {
                        doomed.push(ballot);
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        vote_id = %hex::encode(&key),
                        error = %err,
                        "skipping undecodable pending ballot in process sweep"
                    );
                }
            }
        }
        if doomed.is_empty() {
            return Ok(0);
        }

        let mut tx = self.db().write_tx();
        for ballot in &doomed {
            tx.delete(prefix::BALLOT, ballot.vote_id.as_bytes());
            tx.delete(prefix::BALLOT_RESERVATION, ballot.vote_id.as_bytes());
        }
        let removed = doomed.len() as u64;
        self.stage_stats(&mut tx, process_id, |stats| {
            sub_counter(&mut stats.pending_votes, removed, "pending_votes", process_id);
        })?;
        tx.commit()?;

        for ballot in &doomed {
            self.locks().unlock_vote_id(&ballot.vote_id);
            self.locks().unlock_address(&ballot.process_id, ballot.address);
        }
        Ok(doomed.len())
    }

    /// Drops the reservation on a pending ballot, leaving the ballot in the
    /// queue for another worker.
    pub fn release_pending_ballot_reservation(&self, vote_id: &VoteId) -> Result<()> {
        let _guard = self.lock_global();
        let mut tx = self.db().write_tx();
        tx.delete(prefix::BALLOT_RESERVATION, vote_id.as_bytes());
        tx.commit()
    }

    /// Number of pending ballots not currently claimed by a worker.
    pub fn count_pending_ballots(&self) -> Result<usize> {
        let _guard = self.lock_global();
        let mut count = 0;
        for entry in self.db().scan(prefix::BALLOT, &[]) {
            let (key, _) = entry?;
            if !self.is_reserved(prefix::BALLOT_RESERVATION, &key)? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Migrates a claimed pending ballot into the verified stage.
    ///
    /// Atomically deletes the pending entry and its reservation, writes the
    /// verified ballot under `process_id ‖ vote_id`, moves the status to
    /// Verified, and shifts the counters. The vote-id and address locks stay
    /// held: the vote is still in flight.
    pub fn mark_ballot_verified(&self, vote_id: &VoteId, verified: &VerifiedBallot) -> Result<()> {
        let _guard = self.lock_global();
        let mut tx = self.db().write_tx();
        tx.delete(prefix::BALLOT, vote_id.as_bytes());
        tx.delete(prefix::BALLOT_RESERVATION, vote_id.as_bytes());

        let verified_key = process_vote_key(&verified.process_id, &verified.vote_id);
        tx.set(prefix::VERIFIED_BALLOT, &verified_key, self.encode(verified)?);
        self.stage_vote_id_status(
            &mut tx,
            &verified.process_id,
            &verified.vote_id,
            VoteIdStatus::Verified,
        )?;
        self.stage_stats(&mut tx, &verified.process_id, |stats| {
            stats.verified_votes += 1;
            stats.current_batch_size += 1;
            sub_counter(
                &mut stats.pending_votes,
                1,
                "pending_votes",
                &verified.process_id,
            );
        })?;
        tx.commit()
    }
}
