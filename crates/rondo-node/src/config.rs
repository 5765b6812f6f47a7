//! Node configuration types.

use rondo_agent::{AffinityRule, BehaviourConfig};
use rondo_consensus::{EngineConfig, PoolConfig, RoundId, RoundSchedule};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Path that failed.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not valid YAML for [`NodeConfig`].
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Configuration for a Rondo node.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Address the agent submits as. Must be a single token.
    pub agent_address: String,
    /// Behaviour name.
    pub behaviour_name: String,
    /// Only act in this round (acts in every round when unset).
    pub matching_round: Option<String>,
    /// Round ids the local engine cycles through.
    pub rounds: Vec<String>,
    /// Time between round advances (ms).
    pub round_duration_ms: u64,
    /// Pause before rebuilding after a rejected submission (ms).
    pub retry_backoff_ms: u64,
    /// Maximum pending transactions.
    pub max_pending_transactions: usize,
    /// Maximum transactions committed per round.
    pub max_transactions_per_round: usize,
    /// Greeting words the demo payload picks from.
    pub greetings: Vec<String>,
    /// Routing predicate.
    pub routing: AffinityRule,
    /// Interval between simulated inbound messages (ms). 0 disables the
    /// simulated transport.
    pub message_interval_ms: u64,
    /// Log level.
    pub log_level: String,
    /// Log format (pretty, json).
    pub log_format: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            agent_address: "agent-0".to_string(),
            behaviour_name: "demo".to_string(),
            matching_round: None,
            rounds: vec!["demo_round".to_string()],
            round_duration_ms: 2000,
            retry_backoff_ms: 500,
            max_pending_transactions: 10_000,
            max_transactions_per_round: 1000,
            greetings: vec!["hello".to_string(), "hi".to_string(), "hey".to_string()],
            routing: AffinityRule::CurrentRound,
            message_interval_ms: 700,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

impl NodeConfig {
    /// Loads and validates a YAML config file.
    pub fn load_yaml(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        Self::from_yaml(&content)
    }

    /// Parses and validates YAML text.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent_address.is_empty() {
            return Err(ConfigError::Invalid("agent_address is empty".into()));
        }

        if self.agent_address.chars().any(char::is_whitespace) {
            return Err(ConfigError::Invalid(format!(
                "agent_address must be a single token, got {:?}",
                self.agent_address
            )));
        }

        if self.behaviour_name.is_empty() {
            return Err(ConfigError::Invalid("behaviour_name is empty".into()));
        }

        if self.rounds.is_empty() {
            return Err(ConfigError::Invalid("rounds is empty".into()));
        }

        if let Some(matching) = &self.matching_round {
            if !self.rounds.contains(matching) {
                return Err(ConfigError::Invalid(format!(
                    "matching_round {matching} never occurs in rounds"
                )));
            }
        }

        if self.round_duration_ms == 0 {
            return Err(ConfigError::Invalid("round_duration_ms must be positive".into()));
        }

        if self.max_pending_transactions == 0 || self.max_transactions_per_round == 0 {
            return Err(ConfigError::Invalid("pool limits must be positive".into()));
        }

        if self.greetings.is_empty() {
            return Err(ConfigError::Invalid("greetings is empty".into()));
        }

        Ok(())
    }

    /// Round schedule for the local engine.
    pub fn schedule(&self) -> Result<RoundSchedule, ConfigError> {
        RoundSchedule::new(self.rounds.iter().map(|id| RoundId::new(id.as_str())))
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Local engine configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            round_duration: Duration::from_millis(self.round_duration_ms),
            pool: PoolConfig {
                max_transactions: self.max_pending_transactions,
                max_transactions_per_round: self.max_transactions_per_round,
            },
        }
    }

    /// Behaviour configuration.
    pub fn behaviour_config(&self) -> BehaviourConfig {
        let config = BehaviourConfig::new(self.behaviour_name.as_str())
            .with_retry_backoff(Duration::from_millis(self.retry_backoff_ms));
        match &self.matching_round {
            Some(round) => config.matching(round.as_str()),
            None => config,
        }
    }

    /// Interval of the simulated transport, if enabled.
    pub fn message_interval(&self) -> Option<Duration> {
        (self.message_interval_ms > 0).then(|| Duration::from_millis(self.message_interval_ms))
    }
}
