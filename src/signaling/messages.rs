use serde::{Deserialize, Serialize};

use super::types::{Payload, Role, SessionId};

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Enter the waiting pool under a display name
    #[serde(rename = "join")]
    Join { name: String },

    /// Session description from the offerer
    #[serde(rename = "offer")]
    Offer {
        #[serde(rename = "sessionId", alias = "roomId")]
        session_id: String,
        sdp: Payload,
    },

    /// Session description from the answerer
    #[serde(rename = "answer")]
    Answer {
        #[serde(rename = "sessionId", alias = "roomId")]
        session_id: String,
        sdp: Payload,
    },

    /// Connectivity candidate for one of the sender's two peer connections
    #[serde(rename = "add-ice-candidate")]
    AddIceCandidate {
        #[serde(rename = "sessionId", alias = "roomId")]
        session_id: String,
        candidate: Payload,
        role: Role,
    },

    /// End the current session and go back to the waiting pool
    #[serde(rename = "leave")]
    Leave,
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Join { .. } => "join",
            ClientMessage::Offer { .. } => "offer",
            ClientMessage::Answer { .. } => "answer",
            ClientMessage::AddIceCandidate { .. } => "add-ice-candidate",
            ClientMessage::Leave => "leave",
        }
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// You are the offerer of a freshly formed session
    #[serde(rename = "send-offer")]
    SendOffer {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },

    /// Offer relayed from the other member
    #[serde(rename = "offer")]
    Offer {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        sdp: Payload,
    },

    /// Answer relayed back to the offerer
    #[serde(rename = "answer")]
    Answer { sdp: Payload },

    /// Candidate relayed from the other member, tagged with the role it was gathered for
    #[serde(rename = "add-ice-candidate")]
    AddIceCandidate { candidate: Payload, role: Role },

    /// Returned to the waiting pool
    #[serde(rename = "lobby")]
    Lobby,

    /// Error response
    #[serde(rename = "error")]
    Error { message: String },
}
