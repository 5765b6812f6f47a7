//! # Rondo Node
//!
//! Runs one agent against the local round-ticking consensus engine.
//!
//! The node wires together:
//! - a [`LocalConsensus`](rondo_consensus::LocalConsensus) engine advancing
//!   rounds on a fixed interval
//! - a demo [`Behaviour`](rondo_agent::Behaviour) submitting one greeting per round
//! - a [`MessageRouter`](rondo_agent::MessageRouter) fed by a simulated transport
//!
//! Configuration is loaded from YAML, see [`NodeConfig`].

pub mod config;
pub mod node;
pub mod observability;
pub mod transport;

pub use config::{ConfigError, NodeConfig};
pub use node::{Node, NodeError, NodeReport};
pub use observability::{init_logging, LogFormat};
pub use transport::{SimulatedTransport, SPAM_TAG};
