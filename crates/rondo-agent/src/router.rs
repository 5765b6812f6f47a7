//! Inbound message routing.
//!
//! The [`MessageRouter`] decides, at the moment a message is routed, whether
//! the message still pertains to the round that is open. Messages that do are
//! handed to a [`DispatchSink`]; all others are dropped without output, error
//! or side effect. Mismatches are ordinary traffic (messages queued while the
//! round advanced) and are never reported as failures.

use crate::context::SkillContext;
use bytes::Bytes;
use parking_lot::Mutex;
use rondo_consensus::{RoundInfo, RoundSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A message delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Round the message pertains to.
    pub round_affinity_tag: String,
    /// Opaque body.
    pub body: Bytes,
    /// Sender address, if known.
    pub sender: Option<String>,
    /// Recipient address, if known.
    pub to: Option<String>,
}

impl InboundMessage {
    /// Creates an anonymous message.
    pub fn new(round_affinity_tag: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            round_affinity_tag: round_affinity_tag.into(),
            body: body.into(),
            sender: None,
            to: None,
        }
    }

    /// Sets the sender address.
    pub fn from_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    /// Sets the recipient address.
    pub fn to_recipient(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }
}

impl fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message(sender={},to={},dialogue_reference={})",
            self.sender.as_deref().unwrap_or("None"),
            self.to.as_deref().unwrap_or("None"),
            self.round_affinity_tag,
        )
    }
}

/// Decides whether a message tag pertains to the round that is open.
pub trait AffinityMatcher: Send + Sync {
    /// Returns true if a message tagged `tag` should be dispatched given
    /// `round`.
    fn matches(&self, tag: &str, round: &RoundSnapshot) -> bool;
}

impl<F> AffinityMatcher for F
where
    F: Fn(&str, &RoundSnapshot) -> bool + Send + Sync,
{
    fn matches(&self, tag: &str, round: &RoundSnapshot) -> bool {
        self(tag, round)
    }
}

/// Dispatches messages tagged with the current round id.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrentRoundMatcher;

impl AffinityMatcher for CurrentRoundMatcher {
    fn matches(&self, tag: &str, round: &RoundSnapshot) -> bool {
        round.current_round_id == tag
    }
}

/// Dispatches everything except a deny list of tags.
#[derive(Debug, Clone, Default)]
pub struct ExcludeTags {
    tags: HashSet<String>,
}

impl ExcludeTags {
    /// Creates a matcher rejecting `tags`.
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }
}

impl AffinityMatcher for ExcludeTags {
    fn matches(&self, tag: &str, _round: &RoundSnapshot) -> bool {
        !self.tags.contains(tag)
    }
}

/// Serializable choice of matcher.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AffinityRule {
    /// Tag must equal the current round id.
    #[default]
    CurrentRound,
    /// Tag must not be in `tags`.
    ExcludeTags {
        /// Rejected tags.
        tags: Vec<String>,
    },
}

impl AffinityRule {
    /// Builds the matcher this rule describes.
    pub fn matcher(&self) -> Arc<dyn AffinityMatcher> {
        match self {
            AffinityRule::CurrentRound => Arc::new(CurrentRoundMatcher),
            AffinityRule::ExcludeTags { tags } => Arc::new(ExcludeTags::new(tags.iter().cloned())),
        }
    }
}

/// A routed message together with the round it was dispatched in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    /// Round open at routing time.
    pub round: RoundInfo,
    /// The message.
    pub message: InboundMessage,
}

/// Consumer of dispatched messages.
pub trait DispatchSink: Send + Sync {
    /// Takes ownership of one dispatched message.
    fn dispatch(&self, dispatch: Dispatch);
}

/// Emits every dispatch as an `info` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl DispatchSink for LogSink {
    fn dispatch(&self, dispatch: Dispatch) {
        tracing::info!(
            round = %dispatch.round,
            message = %dispatch.message,
            body = %String::from_utf8_lossy(&dispatch.message.body),
            "message dispatched"
        );
    }
}

/// Forwards dispatches into a channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<Dispatch>,
}

impl ChannelSink {
    /// Creates a sink and the receiver it feeds.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Dispatch>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl DispatchSink for ChannelSink {
    fn dispatch(&self, dispatch: Dispatch) {
        if self.sender.send(dispatch).is_err() {
            tracing::debug!("dispatch receiver closed");
        }
    }
}

/// Keeps every dispatch in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    dispatches: Mutex<Vec<Dispatch>>,
}

impl RecordingSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of dispatches recorded.
    pub fn len(&self) -> usize {
        self.dispatches.lock().len()
    }

    /// Returns true if nothing was dispatched.
    pub fn is_empty(&self) -> bool {
        self.dispatches.lock().is_empty()
    }

    /// Removes and returns everything recorded so far.
    pub fn take(&self) -> Vec<Dispatch> {
        std::mem::take(&mut *self.dispatches.lock())
    }
}

impl DispatchSink for RecordingSink {
    fn dispatch(&self, dispatch: Dispatch) {
        self.dispatches.lock().push(dispatch);
    }
}

impl<T: DispatchSink + ?Sized> DispatchSink for Arc<T> {
    fn dispatch(&self, dispatch: Dispatch) {
        (**self).dispatch(dispatch)
    }
}

/// Outcome of routing one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Handed to the sink.
    Dispatched,
    /// Dropped silently.
    Dropped,
}

/// Routes inbound messages against the current round.
#[derive(Clone)]
pub struct MessageRouter {
    context: SkillContext,
    matcher: Arc<dyn AffinityMatcher>,
    sink: Arc<dyn DispatchSink>,
}

impl fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageRouter")
            .field("agent", &self.context.agent_address())
            .finish_non_exhaustive()
    }
}

impl MessageRouter {
    /// Creates a router dispatching current-round messages to `sink`.
    pub fn new(context: SkillContext, sink: Arc<dyn DispatchSink>) -> Self {
        Self::with_matcher(context, Arc::new(CurrentRoundMatcher), sink)
    }

    /// Creates a router with a custom matching predicate.
    pub fn with_matcher(
        context: SkillContext,
        matcher: Arc<dyn AffinityMatcher>,
        sink: Arc<dyn DispatchSink>,
    ) -> Self {
        Self {
            context,
            matcher,
            sink,
        }
    }

    /// Routes one message. Never fails.
    pub fn route(&self, message: InboundMessage) -> RouteOutcome {
        // Read the round now, not when the message was created.
        let round = self.context.round_state().snapshot();

        if !self.matcher.matches(&message.round_affinity_tag, &round) {
            tracing::trace!(
                tag = %message.round_affinity_tag,
                current_round_id = %round.current_round_id,
                "message dropped"
            );
            self.context.metrics().record_route(false);
            return RouteOutcome::Dropped;
        }

        self.context.metrics().record_route(true);
        self.sink.dispatch(Dispatch {
            round: round.info(),
            message,
        });
        RouteOutcome::Dispatched
    }

    /// Routes messages from `inbound` until it closes or `cancel` fires.
    ///
    /// Returns the number of dispatched messages.
    pub async fn serve(
        &self,
        mut inbound: mpsc::Receiver<InboundMessage>,
        cancel: CancellationToken,
    ) -> u64 {
        let mut dispatched = 0;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                message = inbound.recv() => match message {
                    Some(message) => {
                        if self.route(message) == RouteOutcome::Dispatched {
                            dispatched += 1;
                        }
                    }
                    None => break,
                },
            }
        }

        tracing::debug!(dispatched, "router stopped");
        dispatched
    }
}
