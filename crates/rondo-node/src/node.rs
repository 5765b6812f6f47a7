//! Node assembly: local engine, router, behaviour and transport.

use crate::config::{ConfigError, NodeConfig};
use crate::transport::SimulatedTransport;
use rondo_agent::{
    AgentError, Behaviour, DemoPayloadBuilder, LogSink, MessageRouter, RoundStateWaiter,
    SkillContext, TransactionSubmitter,
};
use rondo_consensus::{ConsensusError, LocalConsensus};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Capacity of the inbound message queue.
const INBOUND_CAPACITY: usize = 1024;

/// Node errors.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The behaviour failed.
    #[error(transparent)]
    Agent(#[from] AgentError),

    /// The engine failed.
    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    /// A spawned task panicked or was aborted.
    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

type DemoBehaviour =
    Behaviour<DemoPayloadBuilder, TransactionSubmitter<Arc<LocalConsensus>>, RoundStateWaiter>;

/// Summary of one node run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeReport {
    /// Behaviour cycles completed.
    pub cycles: u64,
    /// Rounds the engine closed.
    pub committed_rounds: usize,
    /// Inbound messages dispatched.
    pub dispatched: u64,
    /// Inbound messages produced by the simulated transport.
    pub messages_sent: u64,
}

/// A single-agent node.
pub struct Node {
    config: NodeConfig,
    consensus: Arc<LocalConsensus>,
    context: SkillContext,
    router: MessageRouter,
    behaviour: DemoBehaviour,
}

impl Node {
    /// Builds a node from a validated config.
    pub fn new(config: NodeConfig) -> Result<Self, NodeError> {
        config.validate()?;

        let consensus = Arc::new(LocalConsensus::new(
            config.engine_config(),
            config.schedule()?,
        ));
        let context = SkillContext::new(config.agent_address.as_str(), consensus.round_state());

        let router = MessageRouter::with_matcher(
            context.clone(),
            config.routing.matcher(),
            Arc::new(LogSink),
        );

        let behaviour = Behaviour::new(
            config.behaviour_config(),
            context.clone(),
            DemoPayloadBuilder::new(config.greetings.iter().cloned()),
            TransactionSubmitter::new(consensus.clone(), context.agent_address()),
            RoundStateWaiter::new(context.round_state().clone()),
        );

        Ok(Self {
            config,
            consensus,
            context,
            router,
            behaviour,
        })
    }

    /// Shared agent context.
    pub fn context(&self) -> &SkillContext {
        &self.context
    }

    /// Local consensus engine.
    pub fn consensus(&self) -> &Arc<LocalConsensus> {
        &self.consensus
    }

    /// Runs until `cancel` fires or the behaviour has completed
    /// `max_cycles` cycles.
    pub async fn run(
        self,
        cancel: CancellationToken,
        max_cycles: Option<u64>,
    ) -> Result<NodeReport, NodeError> {
        let Node {
            config,
            consensus,
            context,
            router,
            mut behaviour,
        } = self;

        // Stops the background tasks once the behaviour is done.
        let tasks = cancel.child_token();

        tracing::info!(
            agent = context.agent_address(),
            behaviour = %config.behaviour_name,
            rounds = ?config.rounds,
            round_duration_ms = config.round_duration_ms,
            "starting node"
        );

        let engine = {
            let consensus = consensus.clone();
            let cancel = tasks.clone();
            tokio::spawn(async move { consensus.run(cancel).await })
        };

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let router_task = {
            let cancel = tasks.clone();
            tokio::spawn(async move { router.serve(inbound_rx, cancel).await })
        };

        let transport = config.message_interval().map(|interval| {
            let transport =
                SimulatedTransport::new(context.round_state().clone(), interval, "peer-sim");
            tokio::spawn(transport.run(
                config.agent_address.clone(),
                inbound_tx.clone(),
                tasks.clone(),
            ))
        });
        drop(inbound_tx);

        let cycles = behaviour.run_until(cancel.clone(), max_cycles).await;
        tasks.cancel();

        let messages_sent = match transport {
            Some(handle) => handle.await?,
            None => 0,
        };
        let dispatched = router_task.await?;
        engine.await??;

        let report = NodeReport {
            cycles: cycles?,
            committed_rounds: consensus.committed_rounds(),
            dispatched,
            messages_sent,
        };

        tracing::info!(
            cycles = report.cycles,
            committed_rounds = report.committed_rounds,
            dispatched = report.dispatched,
            messages_sent = report.messages_sent,
            "node stopped"
        );

        Ok(report)
    }
}
