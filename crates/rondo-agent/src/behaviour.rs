//! Round-synchronized behaviour.
//!
//! A [`Behaviour`] runs one participation cycle per round:
//!
//! ```text
//!   ┌───────────────┐      ┌──────────┐      ┌───────────────┐
//! ─▶│ BuildPayload  │─────▶│  Submit  │─────▶│ WaitRoundEnd  │──┐
//!   └───────▲───────┘      └────┬─────┘      └───────────────┘  │
//!           │   rejected        │                               │
//!           └───────────────────┘◀──────────────────────────────┘
//!
//!                 any state ──cancel──▶ Stopped
//! ```
//!
//! `Submit` and `WaitRoundEnd` are the only suspension points. Cancellation is
//! checked at both: a cancellation delivered while suspended stops the
//! behaviour immediately, one delivered while building is honoured at the next
//! suspension point.
//!
//! The waiter is parked on the round the payload was built for. If that round
//! already closed while the submission was in flight, the wait resolves at
//! once and the next cycle acts in the round that is open.

use crate::context::SkillContext;
use crate::error::Result;
use crate::payload::PayloadBuilder;
use crate::submitter::Submitter;
use crate::waiter::RoundWaiter;
use rondo_consensus::{Confirmation, RoundId, RoundInfo, RoundSnapshot, SubmissionError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Behaviour configuration.
#[derive(Debug, Clone)]
pub struct BehaviourConfig {
    /// Behaviour name. Unique per agent.
    pub name: String,

    /// Only act in rounds with this id. `None` acts in every round.
    pub matching_round: Option<RoundId>,

    /// Pause before rebuilding after a rejected submission.
    pub retry_backoff: Duration,
}

impl BehaviourConfig {
    /// Configuration acting in every round.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            matching_round: None,
            retry_backoff: Duration::from_millis(500),
        }
    }

    /// Restricts the behaviour to rounds named `round_id`.
    pub fn matching(mut self, round_id: impl Into<RoundId>) -> Self {
        self.matching_round = Some(round_id.into());
        self
    }

    /// Sets the retry backoff.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }
}

/// Where a behaviour is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BehaviourState {
    /// Building the payload for the current round.
    BuildPayload,
    /// Suspended on submission.
    Submit,
    /// Suspended until the round ends.
    WaitRoundEnd,
    /// Terminal.
    Stopped,
}

/// Result of one call to [`Behaviour::run_cycle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Payload committed and the round ended.
    Completed {
        /// Round the payload was built for.
        round: RoundInfo,
        /// Commit confirmation.
        confirmation: Confirmation,
        /// Round state observed on resumption.
        resumed_at: RoundSnapshot,
    },
    /// Submission rejected; the next cycle rebuilds.
    Retry {
        /// Round the payload was built for.
        round: RoundInfo,
        /// Rejection reason.
        error: SubmissionError,
    },
    /// The current round does not match; waited for it to end without acting.
    Skipped {
        /// Round that was skipped.
        round: RoundInfo,
    },
    /// Cancellation was requested; the behaviour is stopped.
    Cancelled,
}

/// A suspendable participation loop bound to one agent.
pub struct Behaviour<B, S, W> {
    config: BehaviourConfig,
    context: SkillContext,
    builder: B,
    submitter: S,
    waiter: W,
    state: BehaviourState,
    cycles: u64,
}

impl<B, S, W> Behaviour<B, S, W>
where
    B: PayloadBuilder,
    S: Submitter,
    W: RoundWaiter,
{
    /// Creates a behaviour. Submission and round waiting are injected so
    /// either can be replaced independently.
    pub fn new(
        config: BehaviourConfig,
        context: SkillContext,
        builder: B,
        submitter: S,
        waiter: W,
    ) -> Self {
        Self {
            config,
            context,
            builder,
            submitter,
            waiter,
            state: BehaviourState::BuildPayload,
            cycles: 0,
        }
    }

    /// Behaviour name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Current state.
    pub fn state(&self) -> BehaviourState {
        self.state
    }

    /// Number of completed cycles.
    pub fn cycles_completed(&self) -> u64 {
        self.cycles
    }

    /// Runs cycles until cancelled. Returns the number of completed cycles.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<u64> {
        self.run_until(cancel, None).await
    }

    /// Runs cycles until cancelled or until `max_cycles` cycles have
    /// completed.
    pub async fn run_until(
        &mut self,
        cancel: CancellationToken,
        max_cycles: Option<u64>,
    ) -> Result<u64> {
        tracing::info!(behaviour = %self.config.name, agent = self.context.agent_address(), "behaviour started");

        loop {
            if max_cycles.is_some_and(|max| self.cycles >= max) {
                break;
            }
            if self.run_cycle(&cancel).await? == CycleOutcome::Cancelled {
                break;
            }
        }

        tracing::info!(behaviour = %self.config.name, cycles = self.cycles, "behaviour finished");
        Ok(self.cycles)
    }

    /// Runs one cycle: build, submit, wait for the round to end.
    pub async fn run_cycle(&mut self, cancel: &CancellationToken) -> Result<CycleOutcome> {
        if self.state == BehaviourState::Stopped {
            return Ok(CycleOutcome::Cancelled);
        }

        let outcome = self.cycle(cancel).await;
        if outcome.is_err() {
            self.state = BehaviourState::Stopped;
        }
        outcome
    }

    async fn cycle(&mut self, cancel: &CancellationToken) -> Result<CycleOutcome> {
        self.state = BehaviourState::BuildPayload;
        let round = self.context.round_state().info();

        if let Some(matching) = &self.config.matching_round {
            if &round.round_id != matching {
                tracing::trace!(behaviour = %self.config.name, round = %round, "not our round");
                return Ok(match self.wait_round_end(&round, cancel).await? {
                    Some(_) => CycleOutcome::Skipped { round },
                    None => self.stop(),
                });
            }
        }

        let benchmark = self.context.benchmark().clone();
        let measurement = benchmark.measure(&self.config.name);

        let payload = {
            let _local = measurement.local();
            self.builder.build(&self.context, &round)
        };

        let consensus = measurement.consensus();

        self.state = BehaviourState::Submit;
        let submitted = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.submitter.submit(round.clone(), payload) => Some(result),
        };

        let confirmation = match submitted {
            None => return Ok(self.stop()),
            Some(Ok(confirmation)) => confirmation,
            Some(Err(error)) => {
                drop(consensus);
                return Ok(self.retry(round, error, cancel).await);
            }
        };

        let resumed_at = match self.wait_round_end(&round, cancel).await? {
            Some(snapshot) => snapshot,
            None => return Ok(self.stop()),
        };
        drop(consensus);

        self.state = BehaviourState::BuildPayload;
        self.cycles += 1;
        self.context.metrics().cycles_completed.inc();

        tracing::info!(
            behaviour = %self.config.name,
            round = %round,
            tx_id = %confirmation.tx_id,
            resumed_at = %resumed_at.info(),
            "cycle completed"
        );

        Ok(CycleOutcome::Completed {
            round,
            confirmation,
            resumed_at,
        })
    }

    /// Parks a waiter on `mark` and suspends until that round has ended.
    ///
    /// Returns `None` if cancelled; the waiter is released either way.
    async fn wait_round_end(
        &mut self,
        mark: &RoundInfo,
        cancel: &CancellationToken,
    ) -> Result<Option<RoundSnapshot>> {
        self.state = BehaviourState::WaitRoundEnd;
        let parked = self
            .context
            .waiters()
            .register(&self.config.name, mark.clone())?;

        let ended = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.waiter.wait_until_round_end(mark) => Some(result),
        };

        parked.release();
        ended.transpose()
    }

    async fn retry(
        &mut self,
        round: RoundInfo,
        error: SubmissionError,
        cancel: &CancellationToken,
    ) -> CycleOutcome {
        self.context.metrics().submission_failures.inc();
        tracing::warn!(
            behaviour = %self.config.name,
            round = %round,
            %error,
            "submission rejected, rebuilding"
        );

        self.state = BehaviourState::BuildPayload;
        if !self.config.retry_backoff.is_zero() {
            let cancelled = tokio::select! {
                biased;
                _ = cancel.cancelled() => true,
                _ = tokio::time::sleep(self.config.retry_backoff) => false,
            };
            if cancelled {
                return self.stop();
            }
        }

        CycleOutcome::Retry { round, error }
    }

    fn stop(&mut self) -> CycleOutcome {
        if self.state != BehaviourState::Stopped {
            tracing::info!(behaviour = %self.config.name, from = ?self.state, "behaviour cancelled");
            self.context.metrics().cancellations.inc();
        }
        self.state = BehaviourState::Stopped;
        CycleOutcome::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::payload::{DemoPayload, DemoPayloadBuilder};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rondo_consensus::{
        round_state, ConsensusError, Payload, RoundStateWriter, TransactionId,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Records every payload and confirms it immediately.
    #[derive(Default)]
    struct RecordingSubmitter {
        payloads: Mutex<Vec<Payload>>,
        failures_left: AtomicUsize,
    }

    impl RecordingSubmitter {
        fn failing(times: usize) -> Self {
            Self {
                payloads: Mutex::new(Vec::new()),
                failures_left: AtomicUsize::new(times),
            }
        }
    }

    #[async_trait]
    impl Submitter for RecordingSubmitter {
        async fn submit(
            &self,
            round: RoundInfo,
            payload: Payload,
        ) -> std::result::Result<Confirmation, SubmissionError> {
            self.payloads.lock().push(payload);
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(SubmissionError::PoolFull(0));
            }
            Ok(Confirmation {
                tx_id: TransactionId::from_bytes([7; 32]),
                round_id: round.round_id,
                height: round.height,
            })
        }
    }

    /// Round end resolves immediately.
    struct ImmediateRoundEnd;

    #[async_trait]
    impl RoundWaiter for ImmediateRoundEnd {
        async fn wait_until_round_end(&self, mark: &RoundInfo) -> Result<RoundSnapshot> {
            Ok(RoundSnapshot::at(
                mark.round_id.clone(),
                mark.round_id.clone(),
                mark.height + 1,
            ))
        }
    }

    /// Round end never resolves.
    struct NeverEnds;

    #[async_trait]
    impl RoundWaiter for NeverEnds {
        async fn wait_until_round_end(&self, _mark: &RoundInfo) -> Result<RoundSnapshot> {
            std::future::pending().await
        }
    }

    /// Submission never resolves.
    struct NeverCommits;

    #[async_trait]
    impl Submitter for NeverCommits {
        async fn submit(
            &self,
            _round: RoundInfo,
            _payload: Payload,
        ) -> std::result::Result<Confirmation, SubmissionError> {
            std::future::pending().await
        }
    }

    fn context() -> (RoundStateWriter, SkillContext) {
        let (writer, rounds) = round_state(RoundSnapshot::at("demo_round", "demo_round", 123));
        (writer, SkillContext::new("foobar", rounds))
    }

    fn config() -> BehaviourConfig {
        BehaviourConfig::new("demo").with_retry_backoff(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_one_cycle_produces_one_demo_payload() {
        let (_writer, context) = context();
        let submitter = Arc::new(RecordingSubmitter::default());
        let mut behaviour = Behaviour::new(
            config(),
            context.clone(),
            DemoPayloadBuilder::default(),
            submitter.clone(),
            ImmediateRoundEnd,
        );

        let outcome = behaviour.run_cycle(&CancellationToken::new()).await.unwrap();

        assert!(matches!(outcome, CycleOutcome::Completed { ref round, .. } if round.height == 123));
        let payloads = submitter.payloads.lock().clone();
        assert_eq!(payloads.len(), 1);
        let payload = DemoPayload::try_from(payloads[0].clone()).unwrap();
        assert_eq!(payload.content().split(' ').count(), 2);
        assert_eq!(behaviour.cycles_completed(), 1);
        assert_eq!(behaviour.state(), BehaviourState::BuildPayload);
        assert!(context.waiters().is_empty());
        assert_eq!(context.metrics().cycles_completed.get(), 1);
    }

    #[tokio::test]
    async fn test_rejection_retries_without_stopping() {
        let (_writer, context) = context();
        let submitter = Arc::new(RecordingSubmitter::failing(1));
        let mut behaviour = Behaviour::new(
            config(),
            context.clone(),
            DemoPayloadBuilder::default(),
            submitter.clone(),
            ImmediateRoundEnd,
        );
        let cancel = CancellationToken::new();

        let first = behaviour.run_cycle(&cancel).await.unwrap();
        assert!(matches!(
            first,
            CycleOutcome::Retry {
                error: SubmissionError::PoolFull(_),
                ..
            }
        ));
        assert_eq!(behaviour.state(), BehaviourState::BuildPayload);

        let second = behaviour.run_cycle(&cancel).await.unwrap();
        assert!(matches!(second, CycleOutcome::Completed { .. }));
        assert_eq!(submitter.payloads.lock().len(), 2);
        assert_eq!(context.metrics().submission_failures.get(), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_wait_releases_waiter() {
        let (_writer, context) = context();
        let cancel = CancellationToken::new();
        let mut behaviour = Behaviour::new(
            config(),
            context.clone(),
            DemoPayloadBuilder::default(),
            RecordingSubmitter::default(),
            NeverEnds,
        );

        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                let outcome = behaviour.run_cycle(&cancel).await;
                (outcome, behaviour.state())
            }
        });

        while context.waiters().is_empty() {
            tokio::task::yield_now().await;
        }
        assert_eq!(context.waiters().get("demo").unwrap().height, 123);

        cancel.cancel();
        let (outcome, state) = task.await.unwrap();

        assert_eq!(outcome.unwrap(), CycleOutcome::Cancelled);
        assert_eq!(state, BehaviourState::Stopped);
        assert!(context.waiters().is_empty());
        assert_eq!(context.metrics().cancellations.get(), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_submit() {
        let (_writer, context) = context();
        let cancel = CancellationToken::new();
        let mut behaviour = Behaviour::new(
            config(),
            context.clone(),
            DemoPayloadBuilder::default(),
            NeverCommits,
            ImmediateRoundEnd,
        );

        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { behaviour.run_cycle(&cancel).await }
        });
        tokio::task::yield_now().await;
        cancel.cancel();

        assert_eq!(task.await.unwrap().unwrap(), CycleOutcome::Cancelled);
        assert!(context.waiters().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_before_cycle_never_submits() {
        let (_writer, context) = context();
        let submitter = Arc::new(RecordingSubmitter::default());
        let mut behaviour = Behaviour::new(
            config(),
            context,
            DemoPayloadBuilder::default(),
            submitter.clone(),
            ImmediateRoundEnd,
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(behaviour.run_cycle(&cancel).await.unwrap(), CycleOutcome::Cancelled);
        assert!(submitter.payloads.lock().is_empty());

        // Stopped is terminal.
        assert_eq!(
            behaviour.run_cycle(&CancellationToken::new()).await.unwrap(),
            CycleOutcome::Cancelled
        );
    }

    #[tokio::test]
    async fn test_skips_non_matching_round() {
        let (mut writer, context) = context();
        let submitter = Arc::new(RecordingSubmitter::default());
        let mut behaviour = Behaviour::new(
            config().matching("settle"),
            context.clone(),
            DemoPayloadBuilder::default(),
            submitter.clone(),
            crate::waiter::RoundStateWaiter::new(context.round_state().clone()),
        );

        let task = tokio::spawn(async move {
            let outcome = behaviour.run_cycle(&CancellationToken::new()).await;
            (outcome, behaviour)
        });
        while context.waiters().is_empty() {
            tokio::task::yield_now().await;
        }
        writer.advance("settle");

        let (outcome, mut behaviour) = task.await.unwrap();
        assert!(matches!(outcome.unwrap(), CycleOutcome::Skipped { .. }));
        assert!(submitter.payloads.lock().is_empty());

        // Now in the matching round: acts, then waits for the next advance.
        let task = tokio::spawn(async move { behaviour.run_cycle(&CancellationToken::new()).await });
        while submitter.payloads.lock().is_empty() {
            tokio::task::yield_now().await;
        }
        while context.waiters().is_empty() {
            tokio::task::yield_now().await;
        }
        writer.advance("collect");

        assert!(matches!(task.await.unwrap().unwrap(), CycleOutcome::Completed { .. }));
        assert_eq!(submitter.payloads.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_round_source_closed_stops() {
        let (writer, context) = context();
        let mut behaviour = Behaviour::new(
            config(),
            context.clone(),
            DemoPayloadBuilder::default(),
            RecordingSubmitter::default(),
            crate::waiter::RoundStateWaiter::new(context.round_state().clone()),
        );
        drop(writer);

        let result = behaviour.run_cycle(&CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(AgentError::Round(ConsensusError::RoundClosed))
        ));
        assert_eq!(behaviour.state(), BehaviourState::Stopped);
        assert!(context.waiters().is_empty());
    }

    /// Confirms by closing the round, the way a collaborator committing at
    /// round end does.
    struct CommitsOnClose {
        writer: Mutex<RoundStateWriter>,
    }

    #[async_trait]
    impl Submitter for CommitsOnClose {
        async fn submit(
            &self,
            round: RoundInfo,
            _payload: Payload,
        ) -> std::result::Result<Confirmation, SubmissionError> {
            self.writer.lock().advance("next_round");
            Ok(Confirmation {
                tx_id: TransactionId::from_bytes([1; 32]),
                round_id: round.round_id,
                height: round.height,
            })
        }
    }

    #[tokio::test]
    async fn test_round_closed_by_commit_does_not_skip_next_round() {
        let (writer, context) = context();
        let mut behaviour = Behaviour::new(
            config(),
            context.clone(),
            DemoPayloadBuilder::default(),
            CommitsOnClose {
                writer: Mutex::new(writer),
            },
            crate::waiter::RoundStateWaiter::new(context.round_state().clone()),
        );

        // Nothing advances the round again, so parking on the new round
        // would never resolve.
        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            behaviour.run_cycle(&CancellationToken::new()),
        )
        .await
        .expect("wait resolved for the round already closed")
        .unwrap();

        match outcome {
            CycleOutcome::Completed {
                round, resumed_at, ..
            } => {
                assert_eq!(round.height, 123);
                assert_eq!(resumed_at.current_round_height, 124);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(context.waiters().is_empty());
        assert_eq!(context.round_state().current_round_height(), 124);
    }

    #[tokio::test]
    async fn test_run_until_cycle_limit() {
        let (_writer, context) = context();
        let submitter = Arc::new(RecordingSubmitter::default());
        let mut behaviour = Behaviour::new(
            config(),
            context,
            DemoPayloadBuilder::default(),
            submitter.clone(),
            ImmediateRoundEnd,
        );

        let cycles = behaviour
            .run_until(CancellationToken::new(), Some(3))
            .await
            .unwrap();

        assert_eq!(cycles, 3);
        assert_eq!(submitter.payloads.lock().len(), 3);
    }
}
