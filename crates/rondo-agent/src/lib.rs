//! # Rondo Agent
//!
//! Participant-side coordination for round-based consensus.
//!
//! An agent runs two independent control paths against one shared
//! [`RoundState`](rondo_consensus::RoundState):
//!
//! - **Behaviour**: an outbound loop that builds a payload, submits it, and
//!   suspends until the round it acted in has ended.
//! - **MessageRouter**: an inbound handler that dispatches a message only if
//!   its round-affinity tag still names the open round, and drops it silently
//!   otherwise.
//!
//! Both are built from a [`SkillContext`] carrying the agent address, the round
//! state handle, metrics and the pending-waiter registry.
//!
//! ## Example
//!
//! ```rust,no_run
//! use rondo_agent::{
//!     Behaviour, BehaviourConfig, DemoPayloadBuilder, InboundMessage, LogSink, MessageRouter,
//!     RoundStateWaiter, SkillContext, TransactionSubmitter,
//! };
//! use rondo_consensus::{EngineConfig, LocalConsensus, RoundSchedule};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> rondo_agent::Result<()> {
//! let consensus = Arc::new(LocalConsensus::new(
//!     EngineConfig::default(),
//!     RoundSchedule::repeating("demo_round"),
//! ));
//! let context = SkillContext::new("agent-0", consensus.round_state());
//!
//! let router = MessageRouter::new(context.clone(), Arc::new(LogSink));
//! router.route(InboundMessage::new("demo_round", "hello"));
//!
//! let mut behaviour = Behaviour::new(
//!     BehaviourConfig::new("demo"),
//!     context.clone(),
//!     DemoPayloadBuilder::default(),
//!     TransactionSubmitter::new(consensus.clone(), context.agent_address()),
//!     RoundStateWaiter::new(context.round_state().clone()),
//! );
//! behaviour.run(CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────────────────┐
//!                 │        RoundState        │
//!                 │ (written by consensus)   │
//!                 └─────┬──────────────┬─────┘
//!            round end  │              │  current round id
//!                       ▼              ▼
//! ┌──────────────────────────┐   ┌──────────────────────────┐
//! │        Behaviour         │   │      MessageRouter       │
//! │ build → submit → wait    │   │ tag == current ?         │
//! │   (PendingWaiter)        │   │  dispatch : drop         │
//! └────────────┬─────────────┘   └────────────┬─────────────┘
//!              ▼                              ▼
//!        ConsensusLayer                  DispatchSink
//! ```

pub mod behaviour;
pub mod context;
pub mod error;
pub mod metrics;
pub mod payload;
pub mod router;
pub mod submitter;
pub mod waiter;

pub use behaviour::{Behaviour, BehaviourConfig, BehaviourState, CycleOutcome};
pub use context::SkillContext;
pub use error::{AgentError, Result};
pub use metrics::{AgentMetrics, Benchmark, Measurement, PhaseTimer};
pub use payload::{DemoPayload, DemoPayloadBuilder, PayloadBuilder};
pub use router::{
    AffinityMatcher, AffinityRule, ChannelSink, CurrentRoundMatcher, Dispatch, DispatchSink,
    ExcludeTags, InboundMessage, LogSink, MessageRouter, RecordingSink, RouteOutcome,
};
pub use submitter::{Submitter, TransactionSubmitter};
pub use waiter::{PendingWaiter, PendingWaiters, RoundStateWaiter, RoundWaiter};
