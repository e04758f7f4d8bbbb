use serde::{Deserialize, Serialize};

/// Voter-visible status of a single vote identifier.
///
/// Stored as one byte under the status namespace, keyed by
/// `process_id ‖ vote_id`. The transition predicate lives here so that every
/// writer shares a single definition of the allowed graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum VoteIdStatus {
    /// Accepted into the pending queue, not yet proven.
    Pending = 0,
    /// Ballot proof checked; waiting for aggregation.
    Verified = 1,
    /// Included in an aggregator batch.
    Aggregated = 2,
    /// Included in a state-transition batch.
    Processed = 3,
    /// The state transition containing this vote has been finalized on-chain.
    /// Terminal and immutable.
    Settled = 4,
    /// Dropped by a failure somewhere in the pipeline. Terminal for this
    /// vote id; the voter may resubmit under a new one.
    Error = 5,
    /// Dropped because the owning process ended before the vote settled.
    Timeout = 6,
}

impl VoteIdStatus {
    /// Decodes a stored status byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Pending),
            1 => Some(Self::Verified),
            2 => Some(Self::Aggregated),
            3 => Some(Self::Processed),
            4 => Some(Self::Settled),
            5 => Some(Self::Error),
            6 => Some(Self::Timeout),
            _ => None,
        }
    }

    /// The status byte as persisted.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Human-readable name, used in logs and user-facing status reports.
    pub fn name(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Aggregated => "aggregated",
            Self::Processed => "processed",
            Self::Settled => "settled",
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }

    /// Whether the status is a sink no forward progress leaves.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Settled | Self::Error | Self::Timeout)
    }

    /// The single allowed forward successor, if any.
    pub fn forward_successor(self) -> Option<Self> {
        match self {
            Self::Pending => Some(Self::Verified),
            Self::Verified => Some(Self::Aggregated),
            Self::Aggregated => Some(Self::Processed),
            Self::Processed => Some(Self::Settled),
            Self::Settled | Self::Error | Self::Timeout => None,
        }
    }

    /// Classifies the transition `self -> next`.
    ///
    /// Settled never changes. Error and Timeout are reachable from any
    /// non-settled state. Settled is only reached legitimately from
    /// Processed, but the jump from elsewhere is tolerated (with a warning
    /// at the call site) so a partially failed publish cannot wedge votes
    /// forever. Backward movement is likewise tolerated.
    pub fn classify_transition(self, next: Self) -> Transition {
        if self == Self::Settled {
            return Transition::Ignored;
        }
        if next == Self::Error || next == Self::Timeout {
            return Transition::Allowed;
        }
        if next == Self::Settled {
            return if self == Self::Processed {
                Transition::Allowed
            } else {
                Transition::AllowedWithWarning
            };
        }
        if self.forward_successor() == Some(next) || self == next {
            Transition::Allowed
        } else {
            // Backward or skipping moves keep the pipeline alive after a
            // partial failure, but they are worth surfacing.
            Transition::AllowedWithWarning
        }
    }
}

/// Outcome of evaluating a status transition against the allowed graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Listed successor; write it.
    Allowed,
    /// Not a listed successor, but permitted to preserve liveness.
    AllowedWithWarning,
    /// Write must be dropped silently (only out of Settled).
    Ignored,
}
