//! Round-end waiting.
//!
//! A behaviour that has submitted its payload parks a [`PendingWaiter`] in the
//! shared [`PendingWaiters`] registry and suspends on a [`RoundWaiter`] until
//! the round it acted in is over. The registry only tracks who is parked; the
//! wakeup itself comes from the round-advance signal.

use crate::error::{AgentError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rondo_consensus::{RoundId, RoundInfo, RoundSnapshot, RoundState};
use std::collections::HashMap;
use std::sync::Arc;

/// Suspends until a round has ended.
#[async_trait]
pub trait RoundWaiter: Send + Sync {
    /// Resolves once the round recorded in `mark` is no longer current.
    async fn wait_until_round_end(&self, mark: &RoundInfo) -> Result<RoundSnapshot>;
}

#[async_trait]
impl<T: RoundWaiter + ?Sized> RoundWaiter for Arc<T> {
    async fn wait_until_round_end(&self, mark: &RoundInfo) -> Result<RoundSnapshot> {
        (**self).wait_until_round_end(mark).await
    }
}

/// Waits on the shared [`RoundState`]. Edge-triggered, no polling.
#[derive(Debug, Clone)]
pub struct RoundStateWaiter {
    rounds: RoundState,
}

impl RoundStateWaiter {
    /// Creates a waiter over `rounds`.
    pub fn new(rounds: RoundState) -> Self {
        Self { rounds }
    }
}

#[async_trait]
impl RoundWaiter for RoundStateWaiter {
    async fn wait_until_round_end(&self, mark: &RoundInfo) -> Result<RoundSnapshot> {
        let snapshot = self.rounds.round_ended(mark).await?;
        tracing::debug!(
            ended = %mark,
            current = %snapshot.info(),
            "round ended"
        );
        Ok(snapshot)
    }
}

/// Registry of suspended behaviours, keyed by behaviour name.
#[derive(Debug, Clone, Default)]
pub struct PendingWaiters {
    inner: Arc<Mutex<HashMap<String, RoundInfo>>>,
}

impl PendingWaiters {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks `behaviour` on `round`.
    ///
    /// Fails if the behaviour already has a waiter parked.
    pub fn register(&self, behaviour: &str, round: RoundInfo) -> Result<PendingWaiter> {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.get(behaviour) {
            return Err(AgentError::DuplicateWaiter {
                behaviour: behaviour.to_string(),
                round: existing.clone(),
            });
        }
        inner.insert(behaviour.to_string(), round.clone());

        Ok(PendingWaiter {
            registry: self.clone(),
            behaviour: behaviour.to_string(),
            round,
        })
    }

    /// Number of parked waiters.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns true if nothing is parked.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Round `behaviour` is parked on, if any.
    pub fn get(&self, behaviour: &str) -> Option<RoundInfo> {
        self.inner.lock().get(behaviour).cloned()
    }

    /// Number of waiters parked on `round_id`.
    pub fn waiting_on(&self, round_id: &RoundId) -> usize {
        self.inner
            .lock()
            .values()
            .filter(|round| &round.round_id == round_id)
            .count()
    }

    fn remove(&self, behaviour: &str) -> bool {
        self.inner.lock().remove(behaviour).is_some()
    }
}

/// A parked behaviour. Unregisters itself when released or dropped.
#[derive(Debug)]
pub struct PendingWaiter {
    registry: PendingWaiters,
    behaviour: String,
    round: RoundInfo,
}

impl PendingWaiter {
    /// Round this waiter is parked on.
    pub fn round(&self) -> &RoundInfo {
        &self.round
    }

    /// Unregisters the waiter.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for PendingWaiter {
    fn drop(&mut self) {
        if self.registry.remove(&self.behaviour) {
            tracing::trace!(behaviour = %self.behaviour, round = %self.round, "waiter released");
        }
    }
}
