use std::collections::HashMap;

use tokio::sync::mpsc;

use super::messages::ServerMessage;
use super::types::{
    OutboundMessage, ParticipantId, ParticipantInfo, ParticipantState, SignalingError,
};

pub const DEFAULT_MAX_NAME_LEN: usize = 32;

#[derive(Debug)]
pub(crate) struct Participant {
    pub display_name: Option<String>,
    pub state: ParticipantState,
    /// Channel for outbound messages to this participant's connection.
    pub tx: mpsc::UnboundedSender<OutboundMessage>,
}

/// Owner of every participant record.
///
/// Ids come from a counter that only moves forward, so an id is never handed out twice.
#[derive(Debug)]
pub struct Registry {
    participants: HashMap<ParticipantId, Participant>,
    next_id: u64,
    max_name_len: usize,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_NAME_LEN)
    }
}

impl Registry {
    pub fn new(max_name_len: usize) -> Self {
        Self {
            participants: HashMap::new(),
            next_id: 1,
            max_name_len,
        }
    }

    /// Register a new connection in the `Unjoined` state
    pub fn admit(&mut self, tx: mpsc::UnboundedSender<OutboundMessage>) -> ParticipantId {
        let id = ParticipantId::new(self.next_id);
        self.next_id += 1;
        self.participants.insert(
            id,
            Participant {
                display_name: None,
                state: ParticipantState::Unjoined,
                tx,
            },
        );
        id
    }

    /// Record the display name and move `Unjoined -> Queued`
    pub fn set_display_name(
        &mut self,
        id: ParticipantId,
        name: &str,
    ) -> Result<(), SignalingError> {
        let max_name_len = self.max_name_len;
        let participant = self
            .participants
            .get_mut(&id)
            .ok_or(SignalingError::NotFound(id))?;

        if participant.state != ParticipantState::Unjoined {
            return Err(SignalingError::InvalidState);
        }

        let name = name.trim();
        if name.is_empty() {
            return Err(SignalingError::InvalidName("Name is required".to_string()));
        }
        if name.chars().count() > max_name_len {
            return Err(SignalingError::InvalidName(format!(
                "Name must be at most {} characters",
                max_name_len
            )));
        }

        participant.display_name = Some(name.to_string());
        participant.state = ParticipantState::Queued;
        Ok(())
    }

    pub(crate) fn set_state(
        &mut self,
        id: ParticipantId,
        state: ParticipantState,
    ) -> Result<(), SignalingError> {
        let participant = self
            .participants
            .get_mut(&id)
            .ok_or(SignalingError::NotFound(id))?;
        participant.state = state;
        Ok(())
    }

    /// Drop the record regardless of state. Unwinding queue/session membership is the caller's job.
    pub fn remove(&mut self, id: ParticipantId) -> Option<ParticipantInfo> {
        self.participants.remove(&id).map(|p| ParticipantInfo {
            id,
            display_name: p.display_name,
            state: p.state,
        })
    }

    pub fn get(&self, id: ParticipantId) -> Result<ParticipantInfo, SignalingError> {
        self.participants
            .get(&id)
            .map(|p| ParticipantInfo {
                id,
                display_name: p.display_name.clone(),
                state: p.state,
            })
            .ok_or(SignalingError::NotFound(id))
    }

    pub fn state(&self, id: ParticipantId) -> Option<ParticipantState> {
        self.participants.get(&id).map(|p| p.state)
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        self.participants.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Fire-and-forget delivery; returns false if the participant is gone or its writer closed.
    pub(crate) fn send(&self, id: ParticipantId, msg: &ServerMessage) -> bool {
        let Some(participant) = self.participants.get(&id) else {
            return false;
        };
        let json =
            serde_json::to_string(msg).expect("ServerMessage serialization should never fail");
        participant.tx.send(OutboundMessage::from(json)).is_ok()
    }
}
