//! Per-process sequencer counters, stored under `s/` as their own record so
//! they survive ended-process cleanup as historical data.
//!
//! Counter updates are staged inside the same write transaction as the
//! queue mutation they account for, so a crash cannot separate the two.
//! Decrements clamp at zero: going negative means a bookkeeping bug
//! upstream, which is logged rather than allowed to corrupt the counters.

use ballot_types::{ProcessId, SequencerStats};

use crate::db::prefix;
use crate::db::WriteTx;
use crate::error::Result;
use crate::Storage;

/// Decrements `counter` by `amount`, clamping at zero with a warning.
pub(crate) fn sub_counter(
    counter: &mut u64,
    amount: u64,
    field: &'static str,
    process_id: &ProcessId,
) {
    if *counter < amount {
        tracing::warn!(
            process_id = %process_id,
            field,
            have = *counter,
            subtract = amount,
            "stats counter clamped at zero"
        );
        *counter = 0;
    } else {
        *counter -= amount;
    }
}

impl Storage {
    /// Current counters for a process. A process that never accumulated any
    /// reads as all-zero.
    pub fn process_stats(&self, process_id: &ProcessId) -> Result<SequencerStats> {
        match self.db().get(prefix::STATS, process_id.as_bytes())? {
            Some(bytes) => self.decode(&bytes),
            None => Ok(SequencerStats::default()),
        }
    }

    /// Sum of `pending_votes` across every process.
    pub fn total_pending_ballots(&self) -> Result<u64> {
        let _guard = self.lock_global();
        let mut total = 0u64;
        for entry in self.db().scan(prefix::STATS, &[]) {
            let (key, value) = entry?;
            match self.decode::<SequencerStats>(&value) {
                Ok(stats) => total = total.saturating_add(stats.pending_votes),
                Err(err) => {
                    tracing::warn!(
                        process_id = %hex::encode(&key),
                        error = %err,
                        "skipping unreadable stats record"
                    );
                }
            }
        }
        Ok(total)
    }

    /// Stages a counter mutation for `process_id` inside `tx`.
    pub(crate) fn stage_stats(
        &self,
        tx: &mut WriteTx<'_>,
        process_id: &ProcessId,
        apply: impl FnOnce(&mut SequencerStats),
    ) -> Result<()> {
        let mut stats = match tx.get(prefix::STATS, process_id.as_bytes())? {
            Some(bytes) => self.decode(&bytes)?,
            None => SequencerStats::default(),
        };
        apply(&mut stats);
        tx.set(prefix::STATS, process_id.as_bytes(), self.encode(&stats)?);
        Ok(())
    }
}
