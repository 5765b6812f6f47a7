//! Rondo Consensus
//!
//! The consensus side of round-synchronized participation. Participants never
//! drive consensus themselves; they read the shared [`RoundState`], submit
//! [`Transaction`]s through a [`ConsensusLayer`] and wait for rounds to end.
//!
//! # Components
//!
//! - [`RoundState`] / [`RoundStateWriter`]: the shared round sequence
//!   (`current_round_id`, `last_round_id`, `current_round_height`). One
//!   writer, any number of readers, whole-snapshot reads.
//! - [`Transaction`] / [`Payload`]: participant data stamped with its round.
//! - [`TransactionPool`]: transactions pending commitment.
//! - [`ConsensusLayer`]: the narrow interface participants consume.
//! - [`LocalConsensus`]: an in-process engine that commits the pool and
//!   advances the round on a fixed tick.
//!
//! # Round Flow
//!
//! ```text
//! ┌──────────────┐  submit   ┌──────────────┐  tick   ┌──────────────┐
//! │ Participant  │──────────▶│     Pool     │────────▶│    Commit    │
//! │  (suspends)  │           │  (pending)   │         │   (round h)  │
//! └──────▲───────┘           └──────────────┘         └──────┬───────┘
//!        │                                                    │
//!        │  confirmation                                      ▼
//!        │                   ┌──────────────┐         ┌──────────────┐
//!        └───────────────────│  RoundState  │◀────────│   Advance    │
//!           round ended      │  (h + 1)     │         │  (schedule)  │
//!                            └──────────────┘         └──────────────┘
//! ```

mod engine;
mod error;
mod pool;
mod round;
mod transaction;

pub use engine::{
    ConsensusEvent, ConsensusLayer, EngineConfig, EngineState, LocalConsensus, RoundRecord,
};
pub use error::{ConsensusError, Result, SubmissionError};
pub use pool::{CommitOutcome, PendingTransaction, PoolConfig, PoolStats, TransactionPool};
pub use round::{
    round_state, RoundAdvance, RoundId, RoundInfo, RoundSchedule, RoundSnapshot, RoundState,
    RoundStateWriter,
};
pub use transaction::{Confirmation, Payload, Transaction, TransactionId};
