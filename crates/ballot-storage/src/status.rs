//! Durable vote-id status store.
//!
//! One byte per vote under `vs/`, keyed by `process_id ‖ vote_id`. All
//! writes funnel through [`Storage::stage_vote_id_status`], which consults
//! the transition predicate on [`VoteIdStatus`]: Settled is immutable,
//! Error/Timeout are reachable from anything else, and irregular moves are
//! taken with a warning rather than refused, so a partially failed pipeline
//! step cannot wedge a vote forever.

use ballot_types::{DecodeError, ProcessId, Transition, VoteId, VoteIdStatus};

use crate::db::prefix;
use crate::db::WriteTx;
use crate::error::{Result, StorageError};
use crate::Storage;

pub(crate) fn process_vote_key(process_id: &ProcessId, vote_id: &VoteId) -> Vec<u8> {
    let mut key = Vec::with_capacity(process_id.as_bytes().len() + vote_id.as_bytes().len());
    key.extend_from_slice(process_id.as_bytes());
    key.extend_from_slice(vote_id.as_bytes());
    key
}

fn decode_status(bytes: &[u8]) -> Result<VoteIdStatus> {
    bytes
        .first()
        .copied()
        .and_then(VoteIdStatus::from_byte)
        .ok_or_else(|| StorageError::Decode(DecodeError::custom("invalid status byte")))
}

impl Storage {
    /// Current status of `(process_id, vote_id)`.
    pub fn vote_id_status(&self, process_id: &ProcessId, vote_id: &VoteId) -> Result<VoteIdStatus> {
        let bytes = self
            .db()
            .get(prefix::VOTE_ID_STATUS, &process_vote_key(process_id, vote_id))?
            .ok_or(StorageError::NotFound)?;
        decode_status(&bytes)
    }

    /// Stages a status write inside `tx`, applying the transition rules.
    ///
    /// Returns the previous status (None when the vote had none), which
    /// callers use to decide whether bookkeeping such as stats decrements
    /// applies. A write out of Settled is dropped silently.
    pub(crate) fn stage_vote_id_status(
        &self,
        tx: &mut WriteTx<'_>,
        process_id: &ProcessId,
        vote_id: &VoteId,
        next: VoteIdStatus,
    ) -> Result<Option<VoteIdStatus>> {
        let key = process_vote_key(process_id, vote_id);
        let previous = match tx.get(prefix::VOTE_ID_STATUS, &key)? {
            Some(bytes) => Some(decode_status(&bytes)?),
            None => None,
        };

        if let Some(previous) = previous {
            match previous.classify_transition(next) {
                Transition::Ignored => return Ok(Some(previous)),
                Transition::AllowedWithWarning => {
                    tracing::warn!(
                        process_id = %process_id,
                        vote_id = %vote_id,
                        from = previous.name(),
                        to = next.name(),
                        "irregular vote status transition"
                    );
                }
                Transition::Allowed => {}
            }
        }

        tx.set(prefix::VOTE_ID_STATUS, &key, vec![next.as_byte()]);
        Ok(previous)
    }

    /// Settles every listed vote of a process in one transaction.
    pub fn mark_vote_ids_settled(&self, process_id: &ProcessId, vote_ids: &[VoteId]) -> Result<()> {
        let _guard = self.lock_global();
        let mut tx = self.db().write_tx();
        for vote_id in vote_ids {
            self.stage_vote_id_status(&mut tx, process_id, vote_id, VoteIdStatus::Settled)?;
        }
        tx.commit()
    }

    /// Sets every non-settled status entry of `process_id` to Timeout.
    /// Returns how many entries changed.
    pub fn mark_process_vote_ids_timeout(&self, process_id: &ProcessId) -> Result<usize> {
        let _guard = self.lock_global();
        self.mark_process_vote_ids_timeout_inner(process_id)
    }

    pub(crate) fn mark_process_vote_ids_timeout_inner(
        &self,
        process_id: &ProcessId,
    ) -> Result<usize> {
        let mut tx = self.db().write_tx();
        let mut changed = 0;
        for entry in self.db().scan(prefix::VOTE_ID_STATUS, process_id.as_bytes()) {
            let (key, value) = entry?;
            match decode_status(&value) {
                Ok(VoteIdStatus::Settled) => continue,
                Ok(_) => {}
                Err(err) => {
                    // An unreadable status is not settled; time it out so the
                    // voter sees a terminal answer.
                    tracing::warn!(
                        key = %hex::encode(&key),
                        error = %err,
                        "timing out vote with unreadable status"
                    );
                }
            }
            tx.set(
                prefix::VOTE_ID_STATUS,
                &key,
                vec![VoteIdStatus::Timeout.as_byte()],
            );
            changed += 1;
        }
        tx.commit()?;
        Ok(changed)
    }
}
