use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::matchmaker::Matchmaker;
use super::messages::{ClientMessage, ServerMessage};
use super::registry::Registry;
use super::session::{NegotiationKind, SessionPhase, SessionTable};
use super::types::{
    OutboundMessage, ParticipantId, ParticipantInfo, ParticipantState, RelayStats, SessionId,
    SignalingError,
};

/// Registry, matchmaking queue and session table behind one dispatcher.
///
/// Every method runs to completion without awaiting, so whoever owns the relay
/// (the actor task) serializes all state changes.
#[derive(Debug)]
pub struct Relay {
    registry: Registry,
    matchmaker: Matchmaker,
    sessions: SessionTable,
}

impl Default for Relay {
    fn default() -> Self {
        Self::new(Registry::default())
    }
}

impl Relay {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            matchmaker: Matchmaker::new(),
            sessions: SessionTable::new(),
        }
    }

    pub fn connect(&mut self, tx: mpsc::UnboundedSender<OutboundMessage>) -> ParticipantId {
        let id = self.registry.admit(tx);
        debug!("Admitted {}", id);
        id
    }

    pub fn handle(&mut self, id: ParticipantId, message: ClientMessage) {
        if !self.registry.contains(id) {
            warn!("Dropping {} from unknown participant {}", message.kind(), id);
            return;
        }

        match message {
            ClientMessage::Join { name } => self.join(id, &name),
            ClientMessage::Offer { session_id, sdp } => {
                self.forward(id, &session_id, NegotiationKind::Offer, |session_id| {
                    ServerMessage::Offer { session_id, sdp }
                })
            }
            ClientMessage::Answer { session_id, sdp } => {
                self.forward(id, &session_id, NegotiationKind::Answer, |_| {
                    ServerMessage::Answer { sdp }
                })
            }
            ClientMessage::AddIceCandidate {
                session_id,
                candidate,
                role,
            } => self.forward(id, &session_id, NegotiationKind::Candidate, |_| {
                ServerMessage::AddIceCandidate { candidate, role }
            }),
            ClientMessage::Leave => self.leave(id),
        }
    }

    pub fn disconnect(&mut self, id: ParticipantId) {
        match self.registry.state(id) {
            Some(ParticipantState::Queued) => {
                self.matchmaker.remove_if_queued(id);
            }
            Some(ParticipantState::Paired(session_id)) => {
                if let Some(survivor) = self.close_session(session_id, id) {
                    self.return_to_lobby(survivor);
                }
            }
            Some(ParticipantState::Unjoined) => {}
            None => {
                debug!("Disconnect for unknown participant {}", id);
                return;
            }
        }

        self.registry.remove(id);
        self.pair_waiting();
        info!("{} disconnected", id);
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            participants: self.registry.len(),
            queued: self.matchmaker.len(),
            sessions: self.sessions.len(),
        }
    }

    pub fn participant(&self, id: ParticipantId) -> Option<ParticipantInfo> {
        self.registry.get(id).ok()
    }

    pub fn queue_position(&self, id: ParticipantId) -> Option<usize> {
        self.matchmaker.position(id)
    }

    pub fn session_phase(&self, id: &SessionId) -> Option<SessionPhase> {
        self.sessions.get(id).map(|s| s.phase())
    }

    fn join(&mut self, id: ParticipantId, name: &str) {
        match self.registry.set_display_name(id, name) {
            Ok(()) => {
                self.matchmaker.enqueue(id);
                info!("{} joined, {} waiting", id, self.matchmaker.len());
                self.pair_waiting();
            }
            Err(SignalingError::InvalidName(message)) => {
                debug!("Rejected join from {}: {}", id, message);
                self.registry.send(id, &ServerMessage::Error { message });
            }
            Err(e) => warn!("Ignoring join from {}: {}", id, e),
        }
    }

    fn forward(
        &mut self,
        from: ParticipantId,
        raw_session_id: &str,
        kind: NegotiationKind,
        build: impl FnOnce(SessionId) -> ServerMessage,
    ) {
        match self.route(from, raw_session_id, kind) {
            Ok((session_id, to)) => {
                debug!(
                    "Relaying {} in session {}: {} -> {}",
                    kind.as_str(),
                    session_id,
                    from,
                    to
                );
                self.registry.send(to, &build(session_id));
            }
            Err(e @ SignalingError::UnknownSender { .. }) => {
                error!("Routing invariant violated, dropping {}: {}", kind.as_str(), e);
            }
            Err(e) => warn!("Dropping {} from {}: {}", kind.as_str(), from, e),
        }
    }

    /// The session named by the client must be the one the registry has it paired in.
    fn route(
        &mut self,
        from: ParticipantId,
        raw_session_id: &str,
        kind: NegotiationKind,
    ) -> Result<(SessionId, ParticipantId), SignalingError> {
        let claimed: SessionId = raw_session_id.parse()?;
        let current = match self.registry.state(from) {
            Some(ParticipantState::Paired(current)) => current,
            Some(_) => return Err(SignalingError::UnknownSession(raw_session_id.to_string())),
            None => return Err(SignalingError::NotFound(from)),
        };
        if current != claimed {
            return Err(SignalingError::UnknownSession(raw_session_id.to_string()));
        }

        let session = self.sessions.get_mut(&current).ok_or_else(|| {
            SignalingError::Internal(format!("{} paired in missing session {}", from, current))
        })?;
        let to = session.relay(from, kind)?;
        Ok((current, to))
    }

    /// Close the sender's session and requeue both members, survivor first.
    ///
    /// Pairing stays strictly FIFO: with nobody else waiting, the same two are paired
    /// again under a new session id.
    fn leave(&mut self, id: ParticipantId) {
        let Some(ParticipantState::Paired(session_id)) = self.registry.state(id) else {
            debug!("Ignoring leave from unpaired {}", id);
            return;
        };

        if let Some(survivor) = self.close_session(session_id, id) {
            self.return_to_lobby(survivor);
        }
        self.return_to_lobby(id);
        self.pair_waiting();
    }

    /// Tear down the session and hand back the survivor if it is still connected and paired there.
    fn close_session(
        &mut self,
        session_id: SessionId,
        leaving: ParticipantId,
    ) -> Option<ParticipantId> {
        let survivor = self.sessions.close(&session_id, leaving);
        info!("Session {} closed by {}", session_id, leaving);

        survivor.filter(|survivor| {
            self.registry.state(*survivor) == Some(ParticipantState::Paired(session_id))
        })
    }

    fn return_to_lobby(&mut self, id: ParticipantId) {
        if let Err(e) = self.registry.set_state(id, ParticipantState::Queued) {
            error!("Cannot requeue {}: {}", id, e);
            return;
        }
        self.matchmaker.enqueue(id);
        self.registry.send(id, &ServerMessage::Lobby);
    }

    fn pair_waiting(&mut self) {
        while let Some(mut session) = self.matchmaker.try_pair() {
            let session_id = session.id();
            let [offerer, answerer] = session.members();

            for member in [offerer, answerer] {
                if let Err(e) = self
                    .registry
                    .set_state(member, ParticipantState::Paired(session_id))
                {
                    error!("Pairing {} into {}: {}", member, session_id, e);
                }
            }

            session.begin_negotiation();
            self.sessions.insert(session);
            info!("Session {} formed: {} (offerer) with {}", session_id, offerer, answerer);

            self.registry
                .send(offerer, &ServerMessage::SendOffer { session_id });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;
    use crate::signaling::types::{Payload, Role};

    struct Client {
        id: ParticipantId,
        rx: mpsc::UnboundedReceiver<OutboundMessage>,
    }

    impl Client {
        fn connect(relay: &mut Relay) -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            let id = relay.connect(tx);
            Self { id, rx }
        }

        fn joined(relay: &mut Relay, name: &str) -> Self {
            let client = Self::connect(relay);
            relay.handle(
                client.id,
                ClientMessage::Join {
                    name: name.to_string(),
                },
            );
            client
        }

        fn drain(&mut self) -> Vec<ServerMessage> {
            let mut received = Vec::new();
            while let Ok(msg) = self.rx.try_recv() {
                received.push(serde_json::from_str(msg.as_str()).unwrap());
            }
            received
        }

        fn expect_send_offer(&mut self) -> SessionId {
            match self.drain().as_slice() {
                [ServerMessage::SendOffer { session_id }] => *session_id,
                other => panic!("expected send-offer, got {:?}", other),
            }
        }
    }

    fn offer(session_id: SessionId, sdp: serde_json::Value) -> ClientMessage {
        ClientMessage::Offer {
            session_id: session_id.to_string(),
            sdp: Payload(sdp),
        }
    }

    fn answer(session_id: SessionId, sdp: serde_json::Value) -> ClientMessage {
        ClientMessage::Answer {
            session_id: session_id.to_string(),
            sdp: Payload(sdp),
        }
    }

    fn candidate(session_id: SessionId, role: Role) -> ClientMessage {
        ClientMessage::AddIceCandidate {
            session_id: session_id.to_string(),
            candidate: Payload(json!({"candidate": "candidate:0 1 UDP 1 10.0.0.1 9 typ host"})),
            role,
        }
    }

    #[test]
    fn two_joins_form_a_session() {
        let mut relay = Relay::default();
        let mut alex = Client::joined(&mut relay, "Alex");
        assert!(alex.drain().is_empty());
        assert_eq!(relay.stats().queued, 1);

        let mut sam = Client::joined(&mut relay, "Sam");
        let session_id = alex.expect_send_offer();
        assert!(sam.drain().is_empty());

        assert_eq!(
            relay.participant(alex.id).unwrap().state,
            ParticipantState::Paired(session_id)
        );
        assert_eq!(
            relay.participant(sam.id).unwrap().state,
            ParticipantState::Paired(session_id)
        );
        assert_eq!(relay.session_phase(&session_id), Some(SessionPhase::Negotiating));
        assert_eq!(
            relay.stats(),
            RelayStats {
                participants: 2,
                queued: 0,
                sessions: 1
            }
        );
    }

    #[test]
    fn full_handshake_then_disconnect() {
        let mut relay = Relay::default();
        let mut alex = Client::joined(&mut relay, "Alex");
        let mut sam = Client::joined(&mut relay, "Sam");
        let s1 = alex.expect_send_offer();

        let sdp_a = json!({"type": "offer", "sdp": "v=0 alex"});
        relay.handle(alex.id, offer(s1, sdp_a.clone()));
        assert_eq!(
            sam.drain(),
            vec![ServerMessage::Offer {
                session_id: s1,
                sdp: Payload(sdp_a)
            }]
        );

        let sdp_b = json!({"type": "answer", "sdp": "v=0 sam"});
        relay.handle(sam.id, answer(s1, sdp_b.clone()));
        assert_eq!(alex.drain(), vec![ServerMessage::Answer { sdp: Payload(sdp_b) }]);
        assert_eq!(relay.session_phase(&s1), Some(SessionPhase::Active));

        relay.disconnect(sam.id);
        assert_eq!(alex.drain(), vec![ServerMessage::Lobby]);
        assert_eq!(
            relay.participant(alex.id).unwrap().state,
            ParticipantState::Queued
        );
        assert_eq!(relay.queue_position(alex.id), Some(0));
        assert!(relay.participant(sam.id).is_none());
        assert_eq!(relay.session_phase(&s1), None);
        assert_eq!(
            relay.stats(),
            RelayStats {
                participants: 1,
                queued: 1,
                sessions: 0
            }
        );
    }

    #[test]
    fn whitespace_name_is_rejected() {
        let mut relay = Relay::default();
        let mut client = Client::joined(&mut relay, "   ");
        assert_eq!(
            client.drain(),
            vec![ServerMessage::Error {
                message: "Name is required".to_string()
            }]
        );
        assert_eq!(
            relay.participant(client.id).unwrap().state,
            ParticipantState::Unjoined
        );
        assert_eq!(relay.stats().queued, 0);

        relay.handle(
            client.id,
            ClientMessage::Join {
                name: "Alex".to_string(),
            },
        );
        assert_eq!(
            relay.participant(client.id).unwrap().state,
            ParticipantState::Queued
        );
    }

    #[test]
    fn second_join_is_ignored() {
        let mut relay = Relay::default();
        let mut alex = Client::joined(&mut relay, "Alex");
        relay.handle(
            alex.id,
            ClientMessage::Join {
                name: "Again".to_string(),
            },
        );
        assert!(alex.drain().is_empty());
        assert_eq!(relay.stats().queued, 1);
        assert_eq!(
            relay.participant(alex.id).unwrap().display_name.as_deref(),
            Some("Alex")
        );
    }

    #[test]
    fn leave_hands_the_survivor_to_the_next_waiting() {
        let mut relay = Relay::default();
        let mut alex = Client::joined(&mut relay, "Alex");
        let mut sam = Client::joined(&mut relay, "Sam");
        let s1 = alex.expect_send_offer();
        let mut kim = Client::joined(&mut relay, "Kim");

        relay.handle(alex.id, ClientMessage::Leave);

        let s2 = kim.expect_send_offer();
        assert_ne!(s1, s2);
        assert_eq!(sam.drain(), vec![ServerMessage::Lobby]);
        assert_eq!(
            relay.participant(sam.id).unwrap().state,
            ParticipantState::Paired(s2)
        );

        assert_eq!(alex.drain(), vec![ServerMessage::Lobby]);
        assert_eq!(
            relay.participant(alex.id).unwrap().state,
            ParticipantState::Queued
        );
        assert_eq!(relay.queue_position(alex.id), Some(0));
    }

    #[test]
    fn fifo_pairing_and_offerer_choice() {
        let mut relay = Relay::default();
        let mut p: Vec<Client> = ["P1", "P2", "P3", "P4"]
            .iter()
            .map(|name| Client::joined(&mut relay, name))
            .collect();

        let s1 = p[0].expect_send_offer();
        assert!(p[1].drain().is_empty());
        let s2 = p[2].expect_send_offer();
        assert!(p[3].drain().is_empty());
        assert_ne!(s1, s2);

        assert_eq!(
            relay.participant(p[1].id).unwrap().state,
            ParticipantState::Paired(s1)
        );
        assert_eq!(
            relay.participant(p[3].id).unwrap().state,
            ParticipantState::Paired(s2)
        );
    }

    #[test]
    fn no_participant_is_paired_twice() {
        let mut relay = Relay::default();
        let clients: Vec<Client> = (0..9)
            .map(|i| Client::joined(&mut relay, &format!("user{}", i)))
            .collect();

        // churn: drop every third participant, survivors re-pair
        for client in clients.iter().step_by(3) {
            relay.disconnect(client.id);
        }

        let mut members: HashMap<SessionId, usize> = HashMap::new();
        for client in &clients {
            if let Some(ParticipantState::Paired(session_id)) =
                relay.participant(client.id).map(|p| p.state)
            {
                *members.entry(session_id).or_default() += 1;
            }
        }
        assert!(members.values().all(|&count| count == 2));

        let stats = relay.stats();
        assert_eq!(stats.participants, 6);
        assert_eq!(stats.sessions, members.len());
        assert_eq!(stats.participants, stats.queued + 2 * stats.sessions);
        assert!(stats.queued <= 1);
    }

    #[test]
    fn ice_candidates_cross_with_role() {
        let mut relay = Relay::default();
        let mut alex = Client::joined(&mut relay, "Alex");
        let mut sam = Client::joined(&mut relay, "Sam");
        let s1 = alex.expect_send_offer();

        relay.handle(alex.id, candidate(s1, Role::Sender));
        relay.handle(sam.id, candidate(s1, Role::Receiver));

        match sam.drain().as_slice() {
            [ServerMessage::AddIceCandidate { role, .. }] => assert_eq!(*role, Role::Sender),
            other => panic!("unexpected {:?}", other),
        }
        match alex.drain().as_slice() {
            [ServerMessage::AddIceCandidate { role, .. }] => assert_eq!(*role, Role::Receiver),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn answer_from_offerer_is_dropped() {
        let mut relay = Relay::default();
        let mut alex = Client::joined(&mut relay, "Alex");
        let mut sam = Client::joined(&mut relay, "Sam");
        let s1 = alex.expect_send_offer();

        relay.handle(alex.id, answer(s1, json!("bogus")));
        relay.handle(sam.id, offer(s1, json!("bogus")));
        assert!(alex.drain().is_empty());
        assert!(sam.drain().is_empty());
    }

    #[test]
    fn outsider_cannot_inject_into_session() {
        let mut relay = Relay::default();
        let mut alex = Client::joined(&mut relay, "Alex");
        let mut sam = Client::joined(&mut relay, "Sam");
        let mut eve = Client::joined(&mut relay, "Eve");
        let s1 = alex.expect_send_offer();

        relay.handle(eve.id, candidate(s1, Role::Sender));
        relay.handle(eve.id, offer(s1, json!("spoof")));
        assert!(alex.drain().is_empty());
        assert!(sam.drain().is_empty());
        assert!(eve.drain().is_empty());
    }

    #[test]
    fn malformed_session_id_is_dropped() {
        let mut relay = Relay::default();
        let mut alex = Client::joined(&mut relay, "Alex");
        let mut sam = Client::joined(&mut relay, "Sam");
        alex.expect_send_offer();

        relay.handle(
            alex.id,
            ClientMessage::Offer {
                session_id: "not-a-session".to_string(),
                sdp: Payload(json!({})),
            },
        );
        assert!(sam.drain().is_empty());
        assert!(alex.drain().is_empty());
    }

    #[test]
    fn stale_messages_after_teardown_are_dropped() {
        let mut relay = Relay::default();
        let mut alex = Client::joined(&mut relay, "Alex");
        let sam = Client::joined(&mut relay, "Sam");
        let s1 = alex.expect_send_offer();

        relay.disconnect(sam.id);
        assert_eq!(alex.drain(), vec![ServerMessage::Lobby]);

        relay.handle(alex.id, offer(s1, json!("late")));
        relay.handle(sam.id, answer(s1, json!("late")));
        assert!(alex.drain().is_empty());
    }

    #[test]
    fn survivor_repairs_with_next_waiting() {
        let mut relay = Relay::default();
        let mut alex = Client::joined(&mut relay, "Alex");
        let sam = Client::joined(&mut relay, "Sam");
        let s1 = alex.expect_send_offer();
        let mut kim = Client::joined(&mut relay, "Kim");
        assert!(kim.drain().is_empty());

        relay.disconnect(sam.id);

        // Kim was already waiting when Alex re-entered the queue, so Kim offers
        assert_eq!(alex.drain(), vec![ServerMessage::Lobby]);
        let s2 = kim.expect_send_offer();
        assert_ne!(s1, s2);
        assert_eq!(
            relay.participant(alex.id).unwrap().state,
            ParticipantState::Paired(s2)
        );
    }

    #[test]
    fn queued_disconnect_leaves_queue() {
        let mut relay = Relay::default();
        let alex = Client::joined(&mut relay, "Alex");
        relay.disconnect(alex.id);
        assert_eq!(relay.stats(), RelayStats::default());

        let mut sam = Client::joined(&mut relay, "Sam");
        assert!(sam.drain().is_empty());
        assert_eq!(relay.queue_position(sam.id), Some(0));
    }

    #[test]
    fn unjoined_disconnect_only_removes() {
        let mut relay = Relay::default();
        let client = Client::connect(&mut relay);
        relay.disconnect(client.id);
        relay.disconnect(client.id);
        assert_eq!(relay.stats(), RelayStats::default());
    }

    #[test]
    fn both_members_disconnecting_is_safe() {
        let mut relay = Relay::default();
        let mut alex = Client::joined(&mut relay, "Alex");
        let mut sam = Client::joined(&mut relay, "Sam");
        let mut kim = Client::joined(&mut relay, "Kim");
        let mut lee = Client::joined(&mut relay, "Lee");
        alex.expect_send_offer();
        let s2 = kim.expect_send_offer();

        relay.disconnect(alex.id);
        relay.disconnect(sam.id);
        assert_eq!(sam.drain(), vec![ServerMessage::Lobby]);
        assert_eq!(relay.stats().sessions, 1);
        assert_eq!(relay.session_phase(&s2), Some(SessionPhase::Negotiating));
        assert!(kim.drain().is_empty());
        assert!(lee.drain().is_empty());
        assert_eq!(relay.stats().queued, 0);
    }

    #[test]
    fn leave_with_nobody_waiting_repairs_the_same_two() {
        let mut relay = Relay::default();
        let mut alex = Client::joined(&mut relay, "Alex");
        let mut sam = Client::joined(&mut relay, "Sam");
        let s1 = alex.expect_send_offer();

        relay.handle(alex.id, ClientMessage::Leave);
        assert_eq!(relay.session_phase(&s1), None);

        // Sam re-enters first, so Sam offers in the new session
        let sam_messages = sam.drain();
        assert_eq!(sam_messages[0], ServerMessage::Lobby);
        let s2 = match sam_messages.as_slice() {
            [_, ServerMessage::SendOffer { session_id }] => *session_id,
            other => panic!("unexpected {:?}", other),
        };
        assert_ne!(s1, s2);
        assert_eq!(alex.drain(), vec![ServerMessage::Lobby]);
        assert_eq!(
            relay.participant(alex.id).unwrap().display_name.as_deref(),
            Some("Alex")
        );
        for member in [alex.id, sam.id] {
            assert_eq!(
                relay.participant(member).unwrap().state,
                ParticipantState::Paired(s2)
            );
        }
    }

    #[test]
    fn leave_while_queued_is_noop() {
        let mut relay = Relay::default();
        let mut alex = Client::joined(&mut relay, "Alex");
        relay.handle(alex.id, ClientMessage::Leave);
        assert!(alex.drain().is_empty());
        assert_eq!(relay.queue_position(alex.id), Some(0));
    }

    #[test]
    fn messages_from_unknown_participants_are_dropped() {
        let mut relay = Relay::default();
        let ghost = ParticipantId::new(404);
        relay.handle(
            ghost,
            ClientMessage::Join {
                name: "Ghost".to_string(),
            },
        );
        assert_eq!(relay.stats(), RelayStats::default());
    }
}
