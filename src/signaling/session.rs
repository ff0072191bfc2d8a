use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use super::types::{ParticipantId, SessionId, SignalingError};

/// Lifecycle of a session. Only `Closed` changes relay behavior; the rest is observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Forming,
    Negotiating,
    Active,
    Closed,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Forming => "forming",
            SessionPhase::Negotiating => "negotiating",
            SessionPhase::Active => "active",
            SessionPhase::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationKind {
    Offer,
    Answer,
    Candidate,
}

impl NegotiationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NegotiationKind::Offer => "offer",
            NegotiationKind::Answer => "answer",
            NegotiationKind::Candidate => "add-ice-candidate",
        }
    }
}

/// Two distinct participants paired for one negotiation; `member_a` is the offerer.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    member_a: ParticipantId,
    member_b: ParticipantId,
    phase: SessionPhase,
    a_to_b: bool,
    b_to_a: bool,
}

impl Session {
    pub(crate) fn new(id: SessionId, offerer: ParticipantId, answerer: ParticipantId) -> Self {
        debug_assert_ne!(offerer, answerer);
        Self {
            id,
            member_a: offerer,
            member_b: answerer,
            phase: SessionPhase::Forming,
            a_to_b: false,
            b_to_a: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn members(&self) -> [ParticipantId; 2] {
        [self.member_a, self.member_b]
    }

    pub fn offerer(&self) -> ParticipantId {
        self.member_a
    }

    pub fn answerer(&self) -> ParticipantId {
        self.member_b
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn peer_of(&self, id: ParticipantId) -> Option<ParticipantId> {
        if id == self.member_a {
            Some(self.member_b)
        } else if id == self.member_b {
            Some(self.member_a)
        } else {
            None
        }
    }

    /// The offerer has been told to start; `Forming -> Negotiating`.
    pub(crate) fn begin_negotiation(&mut self) {
        if self.phase == SessionPhase::Forming {
            self.set_phase(SessionPhase::Negotiating);
        }
    }

    /// Resolve the recipient of a message from `from`.
    ///
    /// Offers must come from the offerer and answers from the answerer; candidates
    /// flow both ways. Forwarding is never gated on phase short of `Closed`.
    pub fn relay(
        &mut self,
        from: ParticipantId,
        kind: NegotiationKind,
    ) -> Result<ParticipantId, SignalingError> {
        if self.phase == SessionPhase::Closed {
            return Err(SignalingError::SessionClosed(self.id));
        }
        let to = self.peer_of(from).ok_or(SignalingError::UnknownSender {
            session: self.id,
            sender: from,
        })?;

        let allowed = match kind {
            NegotiationKind::Offer => from == self.member_a,
            NegotiationKind::Answer => from == self.member_b,
            NegotiationKind::Candidate => true,
        };
        if !allowed {
            return Err(SignalingError::WrongSender {
                session: self.id,
                sender: from,
                kind: kind.as_str(),
            });
        }

        if from == self.member_a {
            self.a_to_b = true;
        } else {
            self.b_to_a = true;
        }

        match self.phase {
            SessionPhase::Forming => self.set_phase(SessionPhase::Negotiating),
            SessionPhase::Negotiating if self.a_to_b && self.b_to_a => {
                self.set_phase(SessionPhase::Active)
            }
            _ => {}
        }

        Ok(to)
    }

    /// Close the session on behalf of `leaving` and return the other member.
    ///
    /// A second teardown returns `None`.
    pub fn teardown(&mut self, leaving: ParticipantId) -> Option<ParticipantId> {
        if self.phase == SessionPhase::Closed {
            return None;
        }
        self.set_phase(SessionPhase::Closed);
        self.peer_of(leaving)
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        debug!("Session {}: {} -> {}", self.id, self.phase, phase);
        self.phase = phase;
    }
}

/// Live sessions keyed by id. Sessions leave the table when torn down.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<SessionId, Session>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, session: Session) {
        self.sessions.insert(session.id(), session);
    }

    pub fn get(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    /// Tear down and drop the session. `None` if it was already gone or `leaving` had no peer.
    pub fn close(&mut self, id: &SessionId, leaving: ParticipantId) -> Option<ParticipantId> {
        let mut session = self.sessions.remove(id)?;
        session.teardown(leaving)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
