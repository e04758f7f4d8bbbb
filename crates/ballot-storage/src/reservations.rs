//! Reservation records: ephemeral claims that hide an item from other
//! workers while one of them holds it.
//!
//! A reservation is stored under the stage's reservation prefix at the item
//! key, carrying only the claim timestamp. The reaper drops claims past the
//! configured time-to-live; startup recovery drops all of them, since the
//! underlying items remain intact and a fresh node has no live workers.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::db::prefix;
use crate::db::WriteTx;
use crate::error::Result;
use crate::Storage;

/// The stored form of a claim.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ReservationRecord {
    /// Claim creation time, seconds since the Unix epoch.
    pub timestamp: u64,
}

/// Every reservation namespace, for sweeps that must cover all stages.
pub(crate) const RESERVATION_PREFIXES: [&[u8]; 4] = [
    prefix::BALLOT_RESERVATION,
    prefix::VERIFIED_BALLOT_RESERVATION,
    prefix::AGGREGATOR_BATCH_RESERVATION,
    prefix::STATE_TRANSITION_RESERVATION,
];

/// Seconds since the Unix epoch.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl Storage {
    /// Stages a claim on `key` inside `tx`, failing when someone else holds
    /// it already.
    pub(crate) fn stage_reservation(
        &self,
        tx: &mut WriteTx<'_>,
        reservation_prefix: &[u8],
        key: &[u8],
    ) -> Result<()> {
        let record = ReservationRecord {
            timestamp: unix_now(),
        };
        tx.set_if_absent(reservation_prefix, key, self.encode(&record)?)
    }

    /// Whether `key` currently carries a claim.
    pub(crate) fn is_reserved(&self, reservation_prefix: &[u8], key: &[u8]) -> Result<bool> {
        self.db().contains(reservation_prefix, key)
    }

    /// Releases every reservation older than `max_age`, across all stages.
    ///
    /// Unparseable records count as stale: a claim we cannot date is a claim
    /// we cannot trust. One transaction per stage prefix; the stale set is
    /// collected first so the commit is a single batch.
    pub fn release_stale_reservations(&self, max_age: Duration) -> Result<usize> {
        let _guard = self.lock_global();
        self.release_stale_reservations_inner(max_age)
    }

    pub(crate) fn release_stale_reservations_inner(&self, max_age: Duration) -> Result<usize> {
        let cutoff = unix_now().saturating_sub(max_age.as_secs());
        let mut released = 0;
        for reservation_prefix in RESERVATION_PREFIXES {
            let mut stale = Vec::new();
            for entry in self.db().scan(reservation_prefix, &[]) {
                let (key, value) = entry?;
                let is_stale = match self.decode::<ReservationRecord>(&value) {
                    Ok(record) => record.timestamp < cutoff,
                    Err(err) => {
                        tracing::warn!(
                            key = %hex::encode(&key),
                            error = %err,
                            "dropping unparseable reservation record"
                        );
                        true
                    }
                };
                if is_stale {
                    stale.push(key);
                }
            }
            if stale.is_empty() {
                continue;
            }
            let mut tx = self.db().write_tx();
            for key in &stale {
                tx.delete(reservation_prefix, key);
            }
            tx.commit()?;
            released += stale.len();
        }
        if released > 0 {
            tracing::info!(released, "released stale reservations");
        }
        Ok(released)
    }

    /// Deletes every reservation, across all stages. Part of startup
    /// recovery, before any request is served.
    pub(crate) fn clear_all_reservations(&self) -> Result<usize> {
        let mut cleared = 0;
        for reservation_prefix in RESERVATION_PREFIXES {
            let keys: Vec<_> = self
                .db()
                .scan(reservation_prefix, &[])
                .map(|entry| entry.map(|(key, _)| key))
                .collect::<Result<_>>()?;
            if keys.is_empty() {
                continue;
            }
            let mut tx = self.db().write_tx();
            for key in &keys {
                tx.delete(reservation_prefix, key);
            }
            tx.commit()?;
            cleared += keys.len();
        }
        Ok(cleared)
    }
}
