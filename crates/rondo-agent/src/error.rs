//! Agent error types.

use rondo_consensus::{ConsensusError, RoundInfo};
use thiserror::Error;

/// Errors that stop an agent component.
///
/// Submission rejections and dropped messages are not errors at this level:
/// the behaviour retries the former and the router ignores the latter.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The round source failed (typically: the consensus collaborator is gone).
    #[error("round source: {0}")]
    Round(#[from] ConsensusError),

    /// A behaviour tried to park a second waiter while one was registered.
    #[error("behaviour {behaviour} already waiting on round {round}")]
    DuplicateWaiter {
        /// Behaviour name.
        behaviour: String,
        /// Round the existing waiter is parked on.
        round: RoundInfo,
    },

    /// A payload had a different kind than expected.
    #[error("expected {expected} payload, found {found}")]
    UnexpectedPayload {
        /// Expected kind.
        expected: &'static str,
        /// Kind found.
        found: String,
    },

    /// A payload violated its shape contract.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

/// A specialized Result type for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;
