//! Transaction submission.

use async_trait::async_trait;
use rondo_consensus::{
    Confirmation, ConsensusLayer, Payload, RoundInfo, SubmissionError, Transaction,
};
use std::sync::Arc;

/// Submits a payload and suspends until it is committed or rejected.
#[async_trait]
pub trait Submitter: Send + Sync {
    /// Submits `payload`, built for `round`.
    async fn submit(
        &self,
        round: RoundInfo,
        payload: Payload,
    ) -> Result<Confirmation, SubmissionError>;
}

#[async_trait]
impl<T: Submitter + ?Sized> Submitter for Arc<T> {
    async fn submit(
        &self,
        round: RoundInfo,
        payload: Payload,
    ) -> Result<Confirmation, SubmissionError> {
        (**self).submit(round, payload).await
    }
}

/// Wraps payloads into transactions signed off by the agent address and
/// hands them to a consensus layer.
#[derive(Debug, Clone)]
pub struct TransactionSubmitter<C> {
    consensus: C,
    agent_address: String,
}

impl<C: ConsensusLayer> TransactionSubmitter<C> {
    /// Creates a submitter sending as `agent_address`.
    pub fn new(consensus: C, agent_address: impl Into<String>) -> Self {
        Self {
            consensus,
            agent_address: agent_address.into(),
        }
    }

    /// The underlying consensus layer.
    pub fn consensus(&self) -> &C {
        &self.consensus
    }
}

#[async_trait]
impl<C: ConsensusLayer> Submitter for TransactionSubmitter<C> {
    async fn submit(
        &self,
        round: RoundInfo,
        payload: Payload,
    ) -> Result<Confirmation, SubmissionError> {
        let transaction = Transaction::new(self.agent_address.clone(), round, payload);
        let tx_id = transaction.id();

        tracing::debug!(
            %tx_id,
            round = %transaction.round,
            kind = transaction.kind(),
            "submitting transaction"
        );

        match self.consensus.submit_transaction(transaction).await {
            Ok(confirmation) => {
                tracing::debug!(
                    %tx_id,
                    round_id = %confirmation.round_id,
                    height = confirmation.height,
                    "transaction committed"
                );
                Ok(confirmation)
            }
            Err(error) => {
                tracing::debug!(%tx_id, %error, "transaction rejected");
                Err(error)
            }
        }
    }
}
