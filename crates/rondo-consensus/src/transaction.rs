//! Transactions submitted by participants.

use crate::round::{RoundId, RoundInfo};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Unique identifier for a transaction (SHA-256 of its canonical encoding).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId([u8; 32]);

impl TransactionId {
    /// Creates a transaction ID from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Creates a transaction ID from a hex string.
    pub fn from_hex(hex_str: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(hex_str, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Participant data proposed for inclusion in a round.
///
/// Immutable once built. `kind` names the payload type so that typed payloads
/// can be recovered from the generic form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Payload {
    kind: String,
    content: String,
}

impl Payload {
    /// Creates a payload.
    pub fn new(kind: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            content: content.into(),
        }
    }

    /// Payload type name.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Payload body.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Returns true if the payload carries no content.
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty()
    }
}

/// A payload stamped with its sender and the round it was built for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Address of the submitting agent.
    pub sender: String,
    /// Round the payload targets.
    pub round: RoundInfo,
    /// The payload itself.
    pub payload: Payload,
}

impl Transaction {
    /// Creates a transaction for `round`.
    pub fn new(sender: impl Into<String>, round: RoundInfo, payload: Payload) -> Self {
        Self {
            sender: sender.into(),
            round,
            payload,
        }
    }

    /// Computes the transaction ID.
    pub fn id(&self) -> TransactionId {
        // Plain structs of strings and integers always serialize.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&bytes);
        let mut id = [0u8; 32];
        id.copy_from_slice(&digest);
        TransactionId(id)
    }

    /// Round id the transaction targets.
    pub fn round_id(&self) -> &RoundId {
        &self.round.round_id
    }

    /// Payload type name, for logging.
    pub fn kind(&self) -> &str {
        self.payload.kind()
    }
}

/// Proof that a transaction was committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    /// Committed transaction.
    pub tx_id: TransactionId,
    /// Round the transaction was committed in.
    pub round_id: RoundId,
    /// Height of that round.
    pub height: u64,
}
