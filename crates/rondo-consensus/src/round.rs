//! Shared round state.
//!
//! [`RoundState`] is the single source of truth both participant control paths
//! read: the behaviour loop uses it to know which round it is building for and
//! when that round is over, the message router uses it to decide whether an
//! inbound message is still relevant. Only the consensus collaborator holds the
//! matching [`RoundStateWriter`].
//!
//! Snapshots are published through a `tokio::sync::watch` channel, so readers
//! always see a whole snapshot and never a partially applied advance.

use crate::error::{ConsensusError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::{broadcast, watch};

/// Capacity of the round-advance notification channel.
const ADVANCE_CAPACITY: usize = 256;

/// Identifier of a consensus round.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundId(String);

impl RoundId {
    /// Creates a round id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoundId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RoundId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for RoundId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for RoundId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for RoundId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// A round as seen by a single query: its id and height.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoundInfo {
    /// Round identifier.
    pub round_id: RoundId,
    /// Round height.
    pub height: u64,
}

impl fmt::Display for RoundInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.round_id, self.height)
    }
}

/// Consistent view of the round sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSnapshot {
    /// Round currently open.
    pub current_round_id: RoundId,
    /// Round open before the current one.
    pub last_round_id: RoundId,
    /// Height of the current round. Never decreases.
    pub current_round_height: u64,
}

impl RoundSnapshot {
    /// Snapshot of a freshly started sequence.
    pub fn genesis(round_id: impl Into<RoundId>) -> Self {
        let round_id = round_id.into();
        Self {
            last_round_id: round_id.clone(),
            current_round_id: round_id,
            current_round_height: 0,
        }
    }

    /// Snapshot at an arbitrary point of the sequence.
    pub fn at(
        current_round_id: impl Into<RoundId>,
        last_round_id: impl Into<RoundId>,
        current_round_height: u64,
    ) -> Self {
        Self {
            current_round_id: current_round_id.into(),
            last_round_id: last_round_id.into(),
            current_round_height,
        }
    }

    /// The current round as a [`RoundInfo`].
    pub fn info(&self) -> RoundInfo {
        RoundInfo {
            round_id: self.current_round_id.clone(),
            height: self.current_round_height,
        }
    }

    /// Returns true once the round recorded in `mark` is no longer current.
    ///
    /// A repeated round id at a greater height counts as a new round.
    pub fn has_ended(&self, mark: &RoundInfo) -> bool {
        self.current_round_id != mark.round_id || self.current_round_height > mark.height
    }

    fn advanced(&self, next: RoundId) -> Self {
        Self {
            last_round_id: self.current_round_id.clone(),
            current_round_id: next,
            current_round_height: self.current_round_height + 1,
        }
    }
}

/// Notification emitted every time the round advances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundAdvance {
    /// Round that just closed.
    pub old_round_id: RoundId,
    /// Round that just opened.
    pub new_round_id: RoundId,
    /// Height of the new round.
    pub height: u64,
}

/// Creates a round state channel starting from `initial`.
pub fn round_state(initial: RoundSnapshot) -> (RoundStateWriter, RoundState) {
    let (sender, receiver) = watch::channel(initial);
    let (advances, _) = broadcast::channel(ADVANCE_CAPACITY);
    let reader = RoundState {
        receiver,
        advances: advances.clone(),
    };
    (RoundStateWriter { sender, advances }, reader)
}

/// Read-only handle on the round sequence.
#[derive(Debug, Clone)]
pub struct RoundState {
    receiver: watch::Receiver<RoundSnapshot>,
    advances: broadcast::Sender<RoundAdvance>,
}

impl RoundState {
    /// Returns a consistent copy of the current snapshot.
    pub fn snapshot(&self) -> RoundSnapshot {
        self.receiver.borrow().clone()
    }

    /// Returns the current round id and height.
    pub fn info(&self) -> RoundInfo {
        self.receiver.borrow().info()
    }

    /// Returns the id of the round currently open.
    pub fn current_round_id(&self) -> RoundId {
        self.receiver.borrow().current_round_id.clone()
    }

    /// Returns the id of the previous round.
    pub fn last_round_id(&self) -> RoundId {
        self.receiver.borrow().last_round_id.clone()
    }

    /// Returns the height of the current round.
    pub fn current_round_height(&self) -> u64 {
        self.receiver.borrow().current_round_height
    }

    /// Returns true if `tag` names the round currently open.
    pub fn is_current(&self, tag: &str) -> bool {
        self.receiver.borrow().current_round_id == tag
    }

    /// Subscribes to `(old, new)` round-advance notifications.
    pub fn subscribe_advances(&self) -> broadcast::Receiver<RoundAdvance> {
        self.advances.subscribe()
    }

    /// Returns true if the writer has been dropped.
    pub fn is_closed(&self) -> bool {
        self.receiver.has_changed().is_err()
    }

    /// Suspends until the round recorded in `mark` has ended.
    ///
    /// Resolves immediately if it already has. Fails with
    /// [`ConsensusError::RoundClosed`] if the writer goes away first.
    pub async fn round_ended(&self, mark: &RoundInfo) -> Result<RoundSnapshot> {
        let mut receiver = self.receiver.clone();
        let snapshot = receiver
            .wait_for(|snapshot| snapshot.has_ended(mark))
            .await
            .map_err(|_| ConsensusError::RoundClosed)?;
        Ok(snapshot.clone())
    }
}

/// Exclusive write handle on the round sequence.
///
/// Owned by the consensus collaborator. Not `Clone`: there is exactly one
/// writer per sequence.
#[derive(Debug)]
pub struct RoundStateWriter {
    sender: watch::Sender<RoundSnapshot>,
    advances: broadcast::Sender<RoundAdvance>,
}

impl RoundStateWriter {
    /// Returns a new read handle.
    pub fn reader(&self) -> RoundState {
        RoundState {
            receiver: self.sender.subscribe(),
            advances: self.advances.clone(),
        }
    }

    /// Returns the snapshot currently published.
    pub fn snapshot(&self) -> RoundSnapshot {
        self.sender.borrow().clone()
    }

    /// Closes the current round and opens `next` at the following height.
    pub fn advance(&mut self, next: impl Into<RoundId>) -> RoundAdvance {
        let current = self.sender.borrow().clone();
        let updated = current.advanced(next.into());

        let advance = RoundAdvance {
            old_round_id: current.current_round_id,
            new_round_id: updated.current_round_id.clone(),
            height: updated.current_round_height,
        };

        self.sender.send_replace(updated);
        // No subscribers is fine.
        let _ = self.advances.send(advance.clone());

        tracing::debug!(
            old_round_id = %advance.old_round_id,
            new_round_id = %advance.new_round_id,
            height = advance.height,
            "round advanced"
        );

        advance
    }
}

/// Cyclic sequence of round ids the local collaborator walks through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<RoundId>", into = "Vec<RoundId>")]
pub struct RoundSchedule {
    rounds: Vec<RoundId>,
}

impl RoundSchedule {
    /// Creates a schedule. Fails if `rounds` is empty.
    pub fn new<I, R>(rounds: I) -> Result<Self>
    where
        I: IntoIterator<Item = R>,
        R: Into<RoundId>,
    {
        let rounds: Vec<RoundId> = rounds.into_iter().map(Into::into).collect();
        if rounds.is_empty() {
            return Err(ConsensusError::EmptySchedule);
        }
        Ok(Self { rounds })
    }

    /// A schedule that repeats a single round forever.
    pub fn repeating(round_id: impl Into<RoundId>) -> Self {
        Self {
            rounds: vec![round_id.into()],
        }
    }

    /// First round of the schedule.
    pub fn first(&self) -> &RoundId {
        &self.rounds[0]
    }

    /// Round at `position`, wrapping around the cycle.
    pub fn get(&self, position: usize) -> &RoundId {
        &self.rounds[position % self.rounds.len()]
    }

    /// Position following `position`, wrapping around the cycle.
    ///
    /// Walking by position reaches every entry even when ids repeat.
    pub fn next_position(&self, position: usize) -> usize {
        (position + 1) % self.rounds.len()
    }

    /// First position holding `round_id`, if any.
    pub fn position_of(&self, round_id: &RoundId) -> Option<usize> {
        self.rounds.iter().position(|id| id == round_id)
    }

    /// Number of distinct positions in the cycle.
    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    /// Returns true if the schedule has no rounds.
    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }

    /// Iterates over the rounds in order.
    pub fn iter(&self) -> impl Iterator<Item = &RoundId> {
        self.rounds.iter()
    }
}

impl TryFrom<Vec<RoundId>> for RoundSchedule {
    type Error = ConsensusError;

    fn try_from(rounds: Vec<RoundId>) -> Result<Self> {
        Self::new(rounds)
    }
}

impl From<RoundSchedule> for Vec<RoundId> {
    fn from(schedule: RoundSchedule) -> Self {
        schedule.rounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_genesis_snapshot() {
        let (_writer, state) = round_state(RoundSnapshot::genesis("demo_round"));

        assert_eq!(state.current_round_id(), "demo_round");
        assert_eq!(state.last_round_id(), "demo_round");
        assert_eq!(state.current_round_height(), 0);
        assert!(state.is_current("demo_round"));
        assert!(!state.is_current("spam"));
    }

    #[test]
    fn test_advance_updates_snapshot() {
        let (mut writer, state) = round_state(RoundSnapshot::genesis("collect"));

        let advance = writer.advance("settle");

        assert_eq!(advance.old_round_id, "collect");
        assert_eq!(advance.new_round_id, "settle");
        assert_eq!(advance.height, 1);
        assert_eq!(
            state.snapshot(),
            RoundSnapshot::at("settle", "collect", 1)
        );
    }

    #[test]
    fn test_repeated_round_increments_height() {
        let (mut writer, state) = round_state(RoundSnapshot::genesis("demo_round"));
        let mark = state.info();

        writer.advance("demo_round");

        assert_eq!(state.current_round_id(), "demo_round");
        assert_eq!(state.current_round_height(), 1);
        assert!(state.snapshot().has_ended(&mark));
    }

    #[test]
    fn test_advance_notifications() {
        let (mut writer, state) = round_state(RoundSnapshot::genesis("a"));
        let mut advances = state.subscribe_advances();

        writer.advance("b");
        writer.advance("c");

        let first = advances.try_recv().unwrap();
        assert_eq!((first.old_round_id.as_str(), first.new_round_id.as_str()), ("a", "b"));
        let second = advances.try_recv().unwrap();
        assert_eq!((second.old_round_id.as_str(), second.new_round_id.as_str()), ("b", "c"));
        assert_eq!(second.height, 2);
    }

    #[tokio::test]
    async fn test_round_ended_resolves_after_advance() {
        let (mut writer, state) = round_state(RoundSnapshot::genesis("a"));
        let mark = state.info();

        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.round_ended(&mark).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        writer.advance("b");
        let snapshot = waiter.await.unwrap().unwrap();
        assert_eq!(snapshot.current_round_id, "b");
    }

    #[tokio::test]
    async fn test_round_ended_immediate_when_already_over() {
        let (mut writer, state) = round_state(RoundSnapshot::genesis("a"));
        let mark = state.info();
        writer.advance("b");

        let snapshot = state.round_ended(&mark).await.unwrap();
        assert_eq!(snapshot.current_round_height, 1);
    }

    #[tokio::test]
    async fn test_round_ended_fails_when_writer_dropped() {
        let (writer, state) = round_state(RoundSnapshot::genesis("a"));
        let mark = state.info();
        drop(writer);

        assert!(state.is_closed());
        assert!(matches!(
            state.round_ended(&mark).await,
            Err(ConsensusError::RoundClosed)
        ));
    }

    #[test]
    fn test_schedule_cycles() {
        let schedule = RoundSchedule::new(["register", "collect", "settle"]).unwrap();

        assert_eq!(schedule.first(), &RoundId::from("register"));
        assert_eq!(schedule.next_position(0), 1);
        assert_eq!(schedule.next_position(2), 0);
        assert_eq!(schedule.get(4), &RoundId::from("collect"));
        assert_eq!(schedule.position_of(&"settle".into()), Some(2));
        assert_eq!(schedule.position_of(&"unknown".into()), None);
    }

    #[test]
    fn test_schedule_walk_with_repeated_id() {
        let schedule = RoundSchedule::new(["a", "b", "a", "c"]).unwrap();

        let mut position = 0;
        let mut walk = vec![schedule.get(position).as_str().to_string()];
        for _ in 0..7 {
            position = schedule.next_position(position);
            walk.push(schedule.get(position).as_str().to_string());
        }

        assert_eq!(walk, ["a", "b", "a", "c", "a", "b", "a", "c"]);
    }

    #[test]
    fn test_empty_schedule_rejected() {
        let empty: Vec<RoundId> = Vec::new();
        assert!(matches!(
            RoundSchedule::new(empty),
            Err(ConsensusError::EmptySchedule)
        ));
    }

    #[test]
    fn test_schedule_deserialize() {
        let schedule: RoundSchedule = serde_json::from_str(r#"["a", "b"]"#).unwrap();
        assert_eq!(schedule.len(), 2);
        assert!(serde_json::from_str::<RoundSchedule>("[]").is_err());
    }
}
