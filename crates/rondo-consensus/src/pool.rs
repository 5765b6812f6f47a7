//! Pending transaction pool.
//!
//! The pool holds transactions that have been submitted for the current round
//! but not yet committed, together with the notifier that resumes the
//! submitter once the transaction's fate is known.

use crate::error::SubmissionError;
use crate::transaction::{Confirmation, Transaction, TransactionId};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Outcome delivered to a suspended submitter.
pub type CommitOutcome = std::result::Result<Confirmation, SubmissionError>;

/// Configuration for the transaction pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of pending transactions.
    pub max_transactions: usize,

    /// Maximum transactions committed per round.
    pub max_transactions_per_round: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_transactions: 10_000,
            max_transactions_per_round: 1000,
        }
    }
}

/// A transaction waiting to be committed.
#[derive(Debug)]
pub struct PendingTransaction {
    /// Transaction ID.
    pub id: TransactionId,

    /// The transaction.
    pub transaction: Transaction,

    /// When the transaction was added.
    pub added_at: Instant,

    notifier: oneshot::Sender<CommitOutcome>,
}

impl PendingTransaction {
    /// Resolves the submitter waiting on this transaction.
    ///
    /// Returns false if the submitter stopped waiting.
    pub fn resolve(self, outcome: CommitOutcome) -> bool {
        self.notifier.send(outcome).is_ok()
    }
}

/// The pending transaction pool.
pub struct TransactionPool {
    /// Configuration.
    config: PoolConfig,

    /// Pending transactions indexed by ID.
    transactions: RwLock<HashMap<TransactionId, PendingTransaction>>,

    /// Order of arrival (commits are FIFO).
    order: RwLock<VecDeque<TransactionId>>,
}

impl TransactionPool {
    /// Creates a new pool with the given configuration.
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            transactions: RwLock::new(HashMap::new()),
            order: RwLock::new(VecDeque::new()),
        }
    }

    /// Creates a new pool with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(PoolConfig::default())
    }

    /// Adds a transaction and returns the receiver its submitter waits on.
    pub fn add(
        &self,
        transaction: Transaction,
    ) -> Result<(TransactionId, oneshot::Receiver<CommitOutcome>), SubmissionError> {
        let id = transaction.id();

        let mut txs = self.transactions.write();
        let mut order = self.order.write();

        if txs.contains_key(&id) {
            return Err(SubmissionError::Duplicate(id.to_hex()));
        }

        if txs.len() >= self.config.max_transactions {
            return Err(SubmissionError::PoolFull(txs.len()));
        }

        let (notifier, receiver) = oneshot::channel();
        txs.insert(
            id,
            PendingTransaction {
                id,
                transaction,
                added_at: Instant::now(),
                notifier,
            },
        );
        order.push_back(id);

        tracing::trace!(?id, "added transaction to pool");

        Ok((id, receiver))
    }

    /// Checks if a transaction is pending.
    pub fn contains(&self, id: &TransactionId) -> bool {
        self.transactions.read().contains_key(id)
    }

    /// Returns the number of pending transactions.
    pub fn len(&self) -> usize {
        self.transactions.read().len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.transactions.read().is_empty()
    }

    /// Removes and returns up to `max_transactions_per_round` transactions in
    /// arrival order.
    pub fn take_for_commit(&self) -> Vec<PendingTransaction> {
        let mut txs = self.transactions.write();
        let mut order = self.order.write();

        let limit = self.config.max_transactions_per_round.min(order.len());
        let mut result = Vec::with_capacity(limit);

        while result.len() < limit {
            let Some(id) = order.pop_front() else {
                break;
            };
            if let Some(pending) = txs.remove(&id) {
                result.push(pending);
            }
        }

        result
    }

    /// Resolves every pending transaction with `error` and empties the pool.
    pub fn reject_all(&self, error: SubmissionError) -> usize {
        let mut txs = self.transactions.write();
        let mut order = self.order.write();

        let count = txs.len();
        for (_, pending) in txs.drain() {
            pending.resolve(Err(error.clone()));
        }
        order.clear();

        if count > 0 {
            tracing::debug!(count, %error, "rejected pending transactions");
        }

        count
    }

    /// Returns statistics about the pool.
    pub fn stats(&self) -> PoolStats {
        let txs = self.transactions.read();
        let now = Instant::now();

        let oldest_transaction_age = txs
            .values()
            .map(|pending| now.duration_since(pending.added_at))
            .max()
            .unwrap_or(Duration::ZERO);

        PoolStats {
            transaction_count: txs.len(),
            oldest_transaction_age,
        }
    }
}

/// Statistics about the pool.
#[derive(Debug, Clone)]
pub struct PoolStats {
    /// Number of pending transactions.
    pub transaction_count: usize,

    /// Age of the oldest transaction.
    pub oldest_transaction_age: Duration,
}
