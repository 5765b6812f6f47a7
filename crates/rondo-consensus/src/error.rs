//! Consensus error types.

use crate::round::RoundId;
use thiserror::Error;

/// Errors raised by the consensus collaborator itself.
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// A round schedule needs at least one round id.
    #[error("round schedule is empty")]
    EmptySchedule,

    /// The writer side of the round state was dropped.
    #[error("round source closed")]
    RoundClosed,

    /// Internal engine failure.
    #[error("engine error: {0}")]
    EngineError(String),
}

/// Reasons a submitted transaction was not committed.
///
/// Every variant is recoverable from the participant's point of view: the
/// next cycle builds a fresh payload for whatever round is current by then.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmissionError {
    /// The payload failed validation.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// The round the transaction was built for is no longer open.
    #[error(
        "round {submitted} at height {submitted_height} is closed, current is {current} at height {current_height}"
    )]
    RoundAdvanced {
        /// Round the transaction targeted.
        submitted: RoundId,
        /// Height the transaction targeted.
        submitted_height: u64,
        /// Round open at submission time.
        current: RoundId,
        /// Height open at submission time.
        current_height: u64,
    },

    /// The same transaction is already pending.
    #[error("duplicate transaction: {0}")]
    Duplicate(String),

    /// The pending pool is at capacity.
    #[error("transaction pool full: {0} pending")]
    PoolFull(usize),

    /// The collaborator shut down before the transaction was committed.
    #[error("consensus stopped")]
    Stopped,
}

/// A specialized Result type for consensus operations.
pub type Result<T> = std::result::Result<T, ConsensusError>;
