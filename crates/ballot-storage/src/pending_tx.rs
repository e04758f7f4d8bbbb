//! Pending on-chain transaction markers: at most one outstanding
//! transaction per (kind, process).
//!
//! The marker is bare key presence under `ptx/ ‖ kind ‖ process_id`.
//! Setting is idempotent; the publisher prunes the marker once the chain
//! confirms or drops the transaction.

use ballot_types::ProcessId;

use crate::db::prefix;
use crate::error::Result;
use crate::Storage;

/// The kinds of on-chain transactions the sequencer throttles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PendingTxKind {
    /// Process registration.
    NewProcess,
    /// State-transition submission.
    StateTransition,
    /// Results publication.
    Results,
}

impl PendingTxKind {
    /// The kind's key segment.
    pub(crate) fn tag(self) -> &'static [u8] {
        match self {
            PendingTxKind::NewProcess => b"np/",
            PendingTxKind::StateTransition => b"st/",
            PendingTxKind::Results => b"rs/",
        }
    }
}

fn marker_key(kind: PendingTxKind, process_id: &ProcessId) -> Vec<u8> {
    let tag = kind.tag();
    let mut key = Vec::with_capacity(tag.len() + process_id.as_bytes().len());
    key.extend_from_slice(tag);
    key.extend_from_slice(process_id.as_bytes());
    key
}

impl Storage {
    /// Marks a transaction of `kind` as outstanding for `process_id`.
    /// Idempotent.
    pub fn set_pending_tx(&self, kind: PendingTxKind, process_id: &ProcessId) -> Result<()> {
        let _guard = self.lock_global();
        let mut tx = self.db().write_tx();
        tx.set(prefix::PENDING_TX, &marker_key(kind, process_id), vec![1]);
        tx.commit()
    }

    /// Whether a transaction of `kind` is outstanding for `process_id`.
    pub fn has_pending_tx(&self, kind: PendingTxKind, process_id: &ProcessId) -> Result<bool> {
        self.db()
            .contains(prefix::PENDING_TX, &marker_key(kind, process_id))
    }

    /// Clears the marker. Clearing an absent marker is a no-op.
    pub fn prune_pending_tx(&self, kind: PendingTxKind, process_id: &ProcessId) -> Result<()> {
        let _guard = self.lock_global();
        let mut tx = self.db().write_tx();
        tx.delete(prefix::PENDING_TX, &marker_key(kind, process_id));
        tx.commit()
    }
}
