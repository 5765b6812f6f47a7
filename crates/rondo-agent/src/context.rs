//! Shared skill context.

use crate::metrics::{AgentMetrics, Benchmark};
use crate::waiter::PendingWaiters;
use rondo_consensus::RoundState;
use std::sync::Arc;

/// Collaborators shared by every behaviour and router of one agent.
///
/// Cheap to clone; clones share the same round state, metrics and waiter
/// registry.
#[derive(Debug, Clone)]
pub struct SkillContext {
    agent_address: String,
    rounds: RoundState,
    metrics: Arc<AgentMetrics>,
    benchmark: Benchmark,
    waiters: PendingWaiters,
}

impl SkillContext {
    /// Creates a context with fresh metrics and an empty waiter registry.
    pub fn new(agent_address: impl Into<String>, rounds: RoundState) -> Self {
        Self::with_metrics(agent_address, rounds, Arc::new(AgentMetrics::new()))
    }

    /// Creates a context recording into existing metrics.
    pub fn with_metrics(
        agent_address: impl Into<String>,
        rounds: RoundState,
        metrics: Arc<AgentMetrics>,
    ) -> Self {
        Self {
            agent_address: agent_address.into(),
            rounds,
            benchmark: Benchmark::new(metrics.clone()),
            metrics,
            waiters: PendingWaiters::new(),
        }
    }

    /// Address of the agent.
    pub fn agent_address(&self) -> &str {
        &self.agent_address
    }

    /// Read handle on the round sequence.
    pub fn round_state(&self) -> &RoundState {
        &self.rounds
    }

    /// Agent metrics.
    pub fn metrics(&self) -> &AgentMetrics {
        &self.metrics
    }

    /// Cycle benchmark.
    pub fn benchmark(&self) -> &Benchmark {
        &self.benchmark
    }

    /// Registry of suspended behaviours.
    pub fn waiters(&self) -> &PendingWaiters {
        &self.waiters
    }
}
