//! Consensus collaborator interface and the local round-ticking engine.
//!
//! Participants only ever talk to the [`ConsensusLayer`] trait. The
//! [`LocalConsensus`] engine implements it in-process: every tick it commits
//! the pending pool into the current round and advances the round along a
//! [`RoundSchedule`]. It does not elect leaders or tolerate faults.

use crate::error::{ConsensusError, Result, SubmissionError};
use crate::pool::{PoolConfig, PoolStats, TransactionPool};
use crate::round::{
    round_state, RoundAdvance, RoundId, RoundInfo, RoundSchedule, RoundSnapshot, RoundState,
    RoundStateWriter,
};
use crate::transaction::{Confirmation, Transaction, TransactionId};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// What a participant needs from the consensus layer.
#[async_trait]
pub trait ConsensusLayer: Send + Sync {
    /// Submits a transaction and suspends until it is committed or rejected.
    async fn submit_transaction(
        &self,
        transaction: Transaction,
    ) -> std::result::Result<Confirmation, SubmissionError>;

    /// Returns the round currently open. Never blocks.
    fn current_round(&self) -> RoundInfo;

    /// Subscribes to round-advance notifications.
    fn subscribe_rounds(&self) -> broadcast::Receiver<RoundAdvance>;
}

#[async_trait]
impl<T: ConsensusLayer + ?Sized> ConsensusLayer for Arc<T> {
    async fn submit_transaction(
        &self,
        transaction: Transaction,
    ) -> std::result::Result<Confirmation, SubmissionError> {
        (**self).submit_transaction(transaction).await
    }

    fn current_round(&self) -> RoundInfo {
        (**self).current_round()
    }

    fn subscribe_rounds(&self) -> broadcast::Receiver<RoundAdvance> {
        (**self).subscribe_rounds()
    }
}

/// Configuration for the local engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Time between round advances.
    pub round_duration: Duration,

    /// Pending pool configuration.
    pub pool: PoolConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            round_duration: Duration::from_millis(2000),
            pool: PoolConfig::default(),
        }
    }
}

/// State of the local engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Created, not ticking yet. Submissions are accepted.
    Starting,
    /// Ticking rounds.
    Active,
    /// Stopped. Submissions are rejected.
    Stopped,
}

/// Events emitted by the local engine.
#[derive(Debug, Clone)]
pub enum ConsensusEvent {
    /// A transaction was committed.
    TransactionCommitted {
        tx_id: TransactionId,
        round_id: RoundId,
        height: u64,
    },
    /// The round advanced.
    RoundAdvanced(RoundAdvance),
    /// Engine state changed.
    StateChanged { old: EngineState, new: EngineState },
}

/// Everything committed in one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundRecord {
    /// Round id.
    pub round_id: RoundId,
    /// Round height.
    pub height: u64,
    /// Committed transactions in commit order.
    pub transactions: Vec<Transaction>,
}

/// Round writer plus the schedule position of the open round.
#[derive(Debug)]
struct RoundCursor {
    writer: RoundStateWriter,
    position: usize,
}

/// In-process consensus collaborator.
pub struct LocalConsensus {
    /// Engine configuration.
    config: EngineConfig,

    /// Round order.
    schedule: RoundSchedule,

    /// Sole writer of the round sequence and its schedule position. Also
    /// serializes admission against commits.
    cursor: Mutex<RoundCursor>,

    /// Read handle handed out to participants.
    rounds: RoundState,

    /// Pending transactions.
    pool: TransactionPool,

    /// Committed rounds by height.
    history: RwLock<BTreeMap<u64, RoundRecord>>,

    /// Current engine state.
    state: RwLock<EngineState>,

    /// Event broadcaster.
    events: broadcast::Sender<ConsensusEvent>,
}

impl LocalConsensus {
    /// Creates an engine whose first round is the first entry of `schedule`.
    pub fn new(config: EngineConfig, schedule: RoundSchedule) -> Self {
        let genesis = RoundSnapshot::genesis(schedule.first().clone());
        Self::with_snapshot(config, schedule, genesis)
    }

    /// Creates an engine resuming from an arbitrary snapshot.
    ///
    /// The schedule continues after the first entry matching the snapshot's
    /// round, or from the start if the round is not scheduled.
    pub fn with_snapshot(
        config: EngineConfig,
        schedule: RoundSchedule,
        snapshot: RoundSnapshot,
    ) -> Self {
        let position = schedule
            .position_of(&snapshot.current_round_id)
            .unwrap_or(schedule.len() - 1);
        let (writer, rounds) = round_state(snapshot);
        let (events, _) = broadcast::channel(1024);
        let pool = TransactionPool::new(config.pool.clone());

        Self {
            config,
            schedule,
            cursor: Mutex::new(RoundCursor { writer, position }),
            rounds,
            pool,
            history: RwLock::new(BTreeMap::new()),
            state: RwLock::new(EngineState::Starting),
            events,
        }
    }

    /// Returns a read handle on the round sequence.
    pub fn round_state(&self) -> RoundState {
        self.rounds.clone()
    }

    /// Subscribes to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConsensusEvent> {
        self.events.subscribe()
    }

    /// Returns the current engine state.
    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    /// Returns pending pool statistics.
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Returns the record of the round committed at `height`.
    pub fn get_round(&self, height: u64) -> Option<RoundRecord> {
        self.history.read().get(&height).cloned()
    }

    /// Returns the number of committed rounds.
    pub fn committed_rounds(&self) -> usize {
        self.history.read().len()
    }

    /// Runs the round ticker until `cancel` fires, then stops the engine.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        {
            let state = *self.state.read();
            if state != EngineState::Starting {
                return Err(ConsensusError::EngineError(format!(
                    "engine cannot start from {state:?}"
                )));
            }
        }
        self.set_state(EngineState::Active);

        let mut ticker = tokio::time::interval(self.config.round_duration);
        // The first tick completes immediately.
        ticker.tick().await;

        tracing::info!(
            round_duration_ms = self.config.round_duration.as_millis() as u64,
            rounds = self.schedule.len(),
            "local consensus started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.advance_round();
                }
            }
        }

        self.stop();
        Ok(())
    }

    /// Commits the pending pool into the current round and opens the next one.
    ///
    /// Transactions beyond the per-round limit are rejected with
    /// [`SubmissionError::RoundAdvanced`]. Returns `None` once the engine is
    /// stopped.
    pub fn advance_round(&self) -> Option<RoundAdvance> {
        let mut cursor = self.cursor.lock();
        if self.state() == EngineState::Stopped {
            return None;
        }

        let closing = cursor.writer.snapshot().info();
        let next_position = self.schedule.next_position(cursor.position);
        let next = self.schedule.get(next_position).clone();

        let committed = self.pool.take_for_commit();
        let mut transactions = Vec::with_capacity(committed.len());

        for pending in committed {
            let confirmation = Confirmation {
                tx_id: pending.id,
                round_id: closing.round_id.clone(),
                height: closing.height,
            };
            let tx_id = pending.id;
            transactions.push(pending.transaction.clone());
            if !pending.resolve(Ok(confirmation)) {
                tracing::debug!(%tx_id, "submitter stopped waiting before commit");
            }
            let _ = self.events.send(ConsensusEvent::TransactionCommitted {
                tx_id,
                round_id: closing.round_id.clone(),
                height: closing.height,
            });
        }

        // Everything pending was admitted for the closing round.
        let overflow = self.pool.reject_all(SubmissionError::RoundAdvanced {
            submitted: closing.round_id.clone(),
            submitted_height: closing.height,
            current: next.clone(),
            current_height: closing.height + 1,
        });

        let tx_count = transactions.len();
        self.history.write().insert(
            closing.height,
            RoundRecord {
                round_id: closing.round_id.clone(),
                height: closing.height,
                transactions,
            },
        );

        cursor.position = next_position;
        let advance = cursor.writer.advance(next);
        let _ = self.events.send(ConsensusEvent::RoundAdvanced(advance.clone()));

        tracing::info!(
            round_id = %closing.round_id,
            height = closing.height,
            tx_count,
            overflow,
            next_round_id = %advance.new_round_id,
            "committed round"
        );

        Some(advance)
    }

    /// Stops the engine and rejects every pending transaction.
    pub fn stop(&self) {
        let _cursor = self.cursor.lock();
        self.set_state(EngineState::Stopped);
        self.pool.reject_all(SubmissionError::Stopped);
    }

    /// Validates and enqueues a transaction for the current round.
    fn admit(
        &self,
        transaction: Transaction,
    ) -> std::result::Result<
        (TransactionId, tokio::sync::oneshot::Receiver<crate::pool::CommitOutcome>),
        SubmissionError,
    > {
        let cursor = self.cursor.lock();

        if self.state() == EngineState::Stopped {
            return Err(SubmissionError::Stopped);
        }

        if transaction.payload.is_empty() {
            return Err(SubmissionError::Malformed("empty payload content".into()));
        }

        let current = cursor.writer.snapshot().info();
        if transaction.round != current {
            return Err(SubmissionError::RoundAdvanced {
                submitted: transaction.round.round_id.clone(),
                submitted_height: transaction.round.height,
                current: current.round_id,
                current_height: current.height,
            });
        }

        self.pool.add(transaction)
    }

    fn set_state(&self, new_state: EngineState) {
        let old_state = {
            let mut state = self.state.write();
            std::mem::replace(&mut *state, new_state)
        };

        if old_state != new_state {
            let _ = self.events.send(ConsensusEvent::StateChanged {
                old: old_state,
                new: new_state,
            });
            tracing::debug!(old = ?old_state, new = ?new_state, "engine state changed");
        }
    }
}

#[async_trait]
impl ConsensusLayer for LocalConsensus {
    async fn submit_transaction(
        &self,
        transaction: Transaction,
    ) -> std::result::Result<Confirmation, SubmissionError> {
        let sender = transaction.sender.clone();
        let (tx_id, receiver) = self.admit(transaction)?;

        tracing::debug!(%tx_id, sender = %sender, "transaction pending");

        // A dropped notifier means the engine went away.
        receiver.await.unwrap_or(Err(SubmissionError::Stopped))
    }

    fn current_round(&self) -> RoundInfo {
        self.rounds.info()
    }

    fn subscribe_rounds(&self) -> broadcast::Receiver<RoundAdvance> {
        self.rounds.subscribe_advances()
    }
}
