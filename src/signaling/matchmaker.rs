use std::collections::VecDeque;

use tracing::error;

use super::session::Session;
use super::types::{ParticipantId, SessionId};

/// FIFO waiting pool. Oldest arrivals pair first and the earliest of the two offers.
#[derive(Debug, Default)]
pub struct Matchmaker {
    queue: VecDeque<ParticipantId>,
    next_session: u64,
}

impl Matchmaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the tail. The caller guarantees the participant is `Queued` and not yet waiting.
    pub fn enqueue(&mut self, id: ParticipantId) {
        if self.queue.contains(&id) {
            error!("{} is already queued, ignoring duplicate enqueue", id);
            return;
        }
        self.queue.push_back(id);
    }

    /// Pop the two oldest waiting participants into a new session, if there are two.
    pub fn try_pair(&mut self) -> Option<Session> {
        if self.queue.len() < 2 {
            return None;
        }
        let offerer = self.queue.pop_front()?;
        let answerer = self.queue.pop_front()?;

        self.next_session += 1;
        let id = SessionId::generate(self.next_session);
        Some(Session::new(id, offerer, answerer))
    }

    pub fn remove_if_queued(&mut self, id: ParticipantId) -> bool {
        match self.queue.iter().position(|&queued| queued == id) {
            Some(index) => {
                self.queue.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn position(&self, id: ParticipantId) -> Option<usize> {
        self.queue.iter().position(|&queued| queued == id)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
