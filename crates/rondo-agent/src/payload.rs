//! Payload construction.

use crate::context::SkillContext;
use crate::error::{AgentError, Result};
use rand::seq::SliceRandom;
use rondo_consensus::{Payload, RoundInfo};

/// Builds the payload a behaviour submits for a round.
///
/// Building is synchronous and must not suspend.
pub trait PayloadBuilder: Send + Sync {
    /// Builds a fresh payload for `round`.
    fn build(&self, context: &SkillContext, round: &RoundInfo) -> Payload;
}

impl<F> PayloadBuilder for F
where
    F: Fn(&SkillContext, &RoundInfo) -> Payload + Send + Sync,
{
    fn build(&self, context: &SkillContext, round: &RoundInfo) -> Payload {
        self(context, round)
    }
}

/// Two-word greeting payload: `<greeting> <agent>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoPayload {
    content: String,
}

impl DemoPayload {
    /// Payload kind tag.
    pub const KIND: &'static str = "demo";

    /// Creates a payload from two words. Whitespace inside a word is replaced
    /// so the content always splits into exactly two tokens.
    pub fn new(greeting: &str, name: &str) -> Self {
        Self {
            content: format!("{} {}", single_token(greeting), single_token(name)),
        }
    }

    /// Payload content.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Space-separated tokens of the content.
    pub fn tokens(&self) -> Vec<&str> {
        self.content.split(' ').collect()
    }
}

fn single_token(word: &str) -> String {
    let token: String = word
        .trim()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect();
    if token.is_empty() {
        "_".to_string()
    } else {
        token
    }
}

impl From<DemoPayload> for Payload {
    fn from(payload: DemoPayload) -> Self {
        Payload::new(DemoPayload::KIND, payload.content)
    }
}

impl TryFrom<Payload> for DemoPayload {
    type Error = AgentError;

    fn try_from(payload: Payload) -> Result<Self> {
        if payload.kind() != Self::KIND {
            return Err(AgentError::UnexpectedPayload {
                expected: Self::KIND,
                found: payload.kind().to_string(),
            });
        }

        let tokens = payload.content().split(' ').count();
        if tokens != 2 {
            return Err(AgentError::MalformedPayload(format!(
                "expected 2 tokens, found {tokens}"
            )));
        }

        Ok(Self {
            content: payload.content().to_string(),
        })
    }
}

/// Builds [`DemoPayload`]s greeting the agent with a randomly picked word.
#[derive(Debug, Clone)]
pub struct DemoPayloadBuilder {
    greetings: Vec<String>,
}

impl DemoPayloadBuilder {
    /// Creates a builder picking from `greetings`.
    pub fn new<I, S>(greetings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            greetings: greetings.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for DemoPayloadBuilder {
    fn default() -> Self {
        Self::new(["hello", "hi", "hey", "greetings"])
    }
}

impl PayloadBuilder for DemoPayloadBuilder {
    fn build(&self, context: &SkillContext, round: &RoundInfo) -> Payload {
        let greeting = self
            .greetings
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or("hello");
        let payload = DemoPayload::new(greeting, context.agent_address());

        tracing::debug!(round = %round, content = payload.content(), "built payload");

        payload.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rondo_consensus::{round_state, RoundSnapshot};

    #[test]
    fn test_demo_payload_two_tokens() {
        let payload = DemoPayload::new("hello", "foobar");
        assert_eq!(payload.content(), "hello foobar");
        assert_eq!(payload.tokens(), vec!["hello", "foobar"]);
    }

    #[test]
    fn test_demo_payload_sanitizes_words() {
        let payload = DemoPayload::new("good morning", "  ");
        assert_eq!(payload.content(), "good_morning _");
    }

    #[test]
    fn test_generic_roundtrip() {
        let generic: Payload = DemoPayload::new("hi", "agent").into();
        assert_eq!(generic.kind(), "demo");

        let typed = DemoPayload::try_from(generic).unwrap();
        assert_eq!(typed.tokens().len(), 2);
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let result = DemoPayload::try_from(Payload::new("vote", "hi agent"));
        assert!(matches!(result, Err(AgentError::UnexpectedPayload { .. })));
    }

    #[test]
    fn test_wrong_shape_rejected() {
        let result = DemoPayload::try_from(Payload::new("demo", "one two three"));
        assert!(matches!(result, Err(AgentError::MalformedPayload(_))));
    }

    #[test]
    fn test_builder_uses_agent_address() {
        let (_writer, rounds) = round_state(RoundSnapshot::genesis("demo_round"));
        let context = SkillContext::new("foobar", rounds);
        let builder = DemoPayloadBuilder::new(["hello"]);

        let payload = builder.build(&context, &context.round_state().info());
        assert_eq!(payload.content(), "hello foobar");
    }

    proptest! {
        #[test]
        fn prop_demo_payload_always_two_tokens(greeting in "\\PC*", name in "\\PC*") {
            let payload: Payload = DemoPayload::new(&greeting, &name).into();
            prop_assert!(DemoPayload::try_from(payload).is_ok());
        }
    }
}
