//! In-memory lock maps guarding against duplicate concurrent work.
//!
//! Two concurrent sets: vote ids currently anywhere in the pipeline, and
//! (process, address) pairs with a ballot in flight. Both use lock-free
//! insert-if-absent semantics, so exactly one contender wins a contended
//! key, and both may be touched while the global mutex is held.

use ballot_types::{ProcessId, VoteId};
use dashmap::DashSet;

#[derive(Default)]
pub(crate) struct LockMaps {
    vote_ids: DashSet<VoteId>,
    addresses: DashSet<(ProcessId, u64)>,
}

impl LockMaps {
    /// Claims a vote id. Returns false when it is already held.
    pub(crate) fn lock_vote_id(&self, vote_id: &VoteId) -> bool {
        self.vote_ids.insert(vote_id.clone())
    }

    pub(crate) fn unlock_vote_id(&self, vote_id: &VoteId) {
        self.vote_ids.remove(vote_id);
    }

    pub(crate) fn is_vote_id_locked(&self, vote_id: &VoteId) -> bool {
        self.vote_ids.contains(vote_id)
    }

    /// Claims an address within a process. Returns false when another ballot
    /// from the same pair is already in flight.
    pub(crate) fn lock_address(&self, process_id: &ProcessId, address: u64) -> bool {
        self.addresses.insert((process_id.clone(), address))
    }

    pub(crate) fn unlock_address(&self, process_id: &ProcessId, address: u64) {
        self.addresses.remove(&(process_id.clone(), address));
    }

    #[cfg(test)]
    pub(crate) fn is_address_locked(&self, process_id: &ProcessId, address: u64) -> bool {
        self.addresses.contains(&(process_id.clone(), address))
    }
}
