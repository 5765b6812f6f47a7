//! Simulated inbound message source.
//!
//! Stands in for the peer network: every tick it emits one message tagged
//! with the open round and one tagged with a foreign round, so both router
//! paths are exercised when the node runs standalone.

use bytes::Bytes;
use rondo_agent::InboundMessage;
use rondo_consensus::RoundState;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Tag carried by the off-round message.
pub const SPAM_TAG: &str = "spam";

/// Emits inbound messages on a fixed interval.
#[derive(Debug, Clone)]
pub struct SimulatedTransport {
    rounds: RoundState,
    interval: Duration,
    sender: String,
}

impl SimulatedTransport {
    /// Creates a transport addressed from `sender`.
    pub fn new(rounds: RoundState, interval: Duration, sender: impl Into<String>) -> Self {
        Self {
            rounds,
            interval,
            sender: sender.into(),
        }
    }

    /// Messages produced for one tick.
    pub fn tick_messages(&self, tick: u64, to: &str) -> [InboundMessage; 2] {
        let round = self.rounds.info();
        let body = Bytes::from(format!("tick {tick} at {round}"));

        [
            InboundMessage::new(round.round_id.as_str(), body.clone())
                .from_sender(self.sender.as_str())
                .to_recipient(to),
            InboundMessage::new(SPAM_TAG, body)
                .from_sender(self.sender.as_str())
                .to_recipient(to),
        ]
    }

    /// Sends into `outbound` until cancelled or the receiver goes away.
    ///
    /// Returns the number of messages sent.
    pub async fn run(
        self,
        to: String,
        outbound: mpsc::Sender<InboundMessage>,
        cancel: CancellationToken,
    ) -> u64 {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tick = 0u64;
        let mut sent = 0u64;

        'outer: loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    for message in self.tick_messages(tick, &to) {
                        if outbound.send(message).await.is_err() {
                            break 'outer;
                        }
                        sent += 1;
                    }
                    tick += 1;
                }
            }
        }

        tracing::debug!(sent, "simulated transport stopped");
        sent
    }
}
