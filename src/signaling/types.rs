use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use thiserror::Error;
use tokio_tungstenite::tungstenite::Utf8Bytes;

/// Signaling errors
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Rejected display name; the text is reported to the client verbatim.
    #[error("{0}")]
    InvalidName(String),

    #[error("participant is not in a state that allows this operation")]
    InvalidState,

    #[error("participant not found: {0}")]
    NotFound(ParticipantId),

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("session {0} is closed")]
    SessionClosed(SessionId),

    #[error("{sender} is not a member of session {session}")]
    UnknownSender {
        session: SessionId,
        sender: ParticipantId,
    },

    #[error("{sender} may not send {kind} in session {session}")]
    WrongSender {
        session: SessionId,
        sender: ParticipantId,
        kind: &'static str,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

/// Connection-scoped participant id, issued sequentially by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticipantId(u64);

impl ParticipantId {
    pub(crate) fn new(seq: u64) -> Self {
        Self(seq)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Session id: monotonic sequence plus a random tag ("<seq hex>-<tag hex>")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId {
    seq: u64,
    tag: u32,
}

impl SessionId {
    pub fn generate(seq: u64) -> Self {
        let tag: u32 = rand::rng().random();
        Self { seq, tag }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}-{:08x}", self.seq, self.tag)
    }
}

impl FromStr for SessionId {
    type Err = SignalingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || SignalingError::UnknownSession(s.to_string());
        let (seq, tag) = s.split_once('-').ok_or_else(unknown)?;
        let lower_hex = |part: &str| {
            !part.is_empty() && part.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        };
        if !lower_hex(seq) || !lower_hex(tag) || tag.len() != 8 {
            return Err(unknown());
        }
        Ok(Self {
            seq: u64::from_str_radix(seq, 16).map_err(|_| unknown())?,
            tag: u32::from_str_radix(tag, 16).map_err(|_| unknown())?,
        })
    }
}

impl Serialize for SessionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Which of the two local peer connections an ICE candidate belongs to.
///
/// Every participant runs one sending and one receiving connection; a candidate
/// gathered by the sending side must be applied to the remote's receiving side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Sender,
    Receiver,
}

/// Opaque negotiation payload (session description or ICE candidate).
///
/// Never inspected; carried from one member to the other as received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(pub serde_json::Value);

/// Pairing state of a connected participant. Removal from the registry is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantState {
    Unjoined,
    Queued,
    Paired(SessionId),
}

/// Snapshot of a registry entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantInfo {
    pub id: ParticipantId,
    pub display_name: Option<String>,
    pub state: ParticipantState,
}

/// Point-in-time counters of the relay state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub participants: usize,
    pub queued: usize,
    pub sessions: usize,
}

/// Wrapper for outbound WebSocket messages using tungstenite's Utf8Bytes.
#[derive(Debug, Clone)]
pub struct OutboundMessage(Utf8Bytes);

impl OutboundMessage {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Get the inner Utf8Bytes for tungstenite Message::Text
    pub fn into_inner(self) -> Utf8Bytes {
        self.0
    }
}

impl From<String> for OutboundMessage {
    fn from(s: String) -> Self {
        Self(Utf8Bytes::from(s))
    }
}
