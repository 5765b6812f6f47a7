//! Agent metrics and cycle benchmarking.
//!
//! Provides Prometheus metrics for:
//! - Routed messages by outcome (dispatched / dropped)
//! - Completed behaviour cycles, submission failures and cancellations
//! - Per-phase cycle durations (local payload building, consensus wait)

use parking_lot::RwLock;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::time::Instant;

/// Routing labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RouteLabels {
    /// Routing outcome (dispatched, dropped).
    pub outcome: String,
}

/// Cycle phase labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PhaseLabels {
    /// Behaviour name.
    pub behaviour: String,
    /// Phase (local, consensus).
    pub phase: String,
}

/// Metrics state container.
#[derive(Clone, Debug)]
pub struct AgentMetrics {
    /// Prometheus registry.
    registry: Arc<RwLock<Registry>>,
    /// Routed messages by outcome.
    pub messages_routed: Family<RouteLabels, Counter>,
    /// Behaviour cycles that reached the end of their round.
    pub cycles_completed: Counter,
    /// Submissions rejected by the consensus layer.
    pub submission_failures: Counter,
    /// Behaviours stopped by cancellation.
    pub cancellations: Counter,
    /// Cycle phase durations (seconds).
    pub phase_duration_seconds: Family<PhaseLabels, Histogram>,
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMetrics {
    /// Create a metrics container with all metrics registered.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let messages_routed = Family::<RouteLabels, Counter>::default();
        registry.register(
            "rondo_messages_routed",
            "Inbound messages by routing outcome",
            messages_routed.clone(),
        );

        let cycles_completed = Counter::default();
        registry.register(
            "rondo_cycles_completed",
            "Behaviour cycles completed",
            cycles_completed.clone(),
        );

        let submission_failures = Counter::default();
        registry.register(
            "rondo_submission_failures",
            "Transactions rejected by the consensus layer",
            submission_failures.clone(),
        );

        let cancellations = Counter::default();
        registry.register(
            "rondo_cancellations",
            "Behaviours stopped by cancellation",
            cancellations.clone(),
        );

        let phase_duration_seconds =
            Family::<PhaseLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.0005, 2.0, 16))
            });
        registry.register(
            "rondo_phase_duration_seconds",
            "Behaviour cycle phase duration in seconds",
            phase_duration_seconds.clone(),
        );

        Self {
            registry: Arc::new(RwLock::new(registry)),
            messages_routed,
            cycles_completed,
            submission_failures,
            cancellations,
            phase_duration_seconds,
        }
    }

    /// Records a routing decision.
    pub fn record_route(&self, dispatched: bool) {
        let outcome = if dispatched { "dispatched" } else { "dropped" };
        self.messages_routed
            .get_or_create(&RouteLabels {
                outcome: outcome.to_string(),
            })
            .inc();
    }

    /// Number of routed messages with the given outcome.
    pub fn routed(&self, outcome: &str) -> u64 {
        self.messages_routed
            .get_or_create(&RouteLabels {
                outcome: outcome.to_string(),
            })
            .get()
    }

    /// Encode metrics in the OpenMetrics text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        let registry = self.registry.read();
        prometheus_client::encoding::text::encode(&mut buffer, &registry)?;
        Ok(buffer)
    }
}

/// Measures behaviour cycle phases.
#[derive(Clone, Debug)]
pub struct Benchmark {
    metrics: Arc<AgentMetrics>,
}

impl Benchmark {
    /// Creates a benchmark recording into `metrics`.
    pub fn new(metrics: Arc<AgentMetrics>) -> Self {
        Self { metrics }
    }

    /// Starts measuring one cycle of `behaviour`.
    pub fn measure(&self, behaviour: &str) -> Measurement<'_> {
        Measurement {
            benchmark: self,
            behaviour: behaviour.to_string(),
        }
    }
}

/// Phase timers for one behaviour cycle.
#[derive(Debug)]
pub struct Measurement<'a> {
    benchmark: &'a Benchmark,
    behaviour: String,
}

impl Measurement<'_> {
    /// Times local work (payload building) until the timer is dropped.
    pub fn local(&self) -> PhaseTimer {
        self.timer("local")
    }

    /// Times consensus work (submission and round wait) until the timer is
    /// dropped.
    pub fn consensus(&self) -> PhaseTimer {
        self.timer("consensus")
    }

    fn timer(&self, phase: &'static str) -> PhaseTimer {
        let histogram = self
            .benchmark
            .metrics
            .phase_duration_seconds
            .get_or_create(&PhaseLabels {
                behaviour: self.behaviour.clone(),
                phase: phase.to_string(),
            })
            .clone();

        PhaseTimer {
            histogram,
            phase,
            started: Instant::now(),
        }
    }
}

/// Records its lifetime into the phase histogram when dropped.
#[derive(Debug)]
pub struct PhaseTimer {
    histogram: Histogram,
    phase: &'static str,
    started: Instant,
}

impl Drop for PhaseTimer {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        self.histogram.observe(elapsed.as_secs_f64());
        tracing::trace!(phase = self.phase, elapsed_ms = elapsed.as_millis() as u64, "phase finished");
    }
}
