//! Artifact types shared by every stage of the ballot-processing pipeline.
//!
//! The pipeline moves externally signed ballots through a fixed progression
//! (pending, verified, aggregated, processed, settled) while proving workers
//! attach cryptographic artifacts at each hop. This crate defines the shapes
//! of those artifacts, the per-vote status state machine, and the codec used
//! to persist them. It is deliberately free of storage concerns so that
//! proving and publishing components can depend on it without dragging in an
//! embedded database.

mod ballot;
mod encoding;
mod ids;
mod process;
mod status;

pub use ballot::{
    AggregatorBallot, AggregatorBallotBatch, Ballot, ResultsInputs, StateTransitionBatch,
    StateTransitionInputs, VerifiedBallot, VerifiedResults,
};
pub use encoding::{
    decode_artifact, derive_key, encode_artifact, DecodeError, EncodeError, EncodingFormat,
    DERIVED_KEY_LENGTH,
};
pub use ids::{ProcessId, VoteId};
pub use process::{
    BallotMode, Census, CensusOrigin, EncryptionKeys, EncryptionPublicKey, Process,
    ProcessMetadata, ProcessStatus, SequencerStats,
};
pub use status::{Transition, VoteIdStatus};
