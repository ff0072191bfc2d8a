use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::messages::ClientMessage;
use super::registry::Registry;
use super::relay::Relay;
use super::types::{OutboundMessage, ParticipantId, ParticipantInfo, RelayStats, SignalingError};
use crate::config::Config;

/// Commands sent to the relay actor
pub(crate) enum RelayCommand {
    Connect {
        peer_tx: mpsc::UnboundedSender<OutboundMessage>,
        reply: oneshot::Sender<ParticipantId>,
    },
    Message {
        id: ParticipantId,
        message: ClientMessage,
    },
    Disconnect {
        id: ParticipantId,
    },
    Stats {
        reply: oneshot::Sender<RelayStats>,
    },
    Participant {
        id: ParticipantId,
        reply: oneshot::Sender<Option<ParticipantInfo>>,
    },
}

pub(crate) async fn relay_actor(mut rx: mpsc::Receiver<RelayCommand>, mut relay: Relay) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            RelayCommand::Connect { peer_tx, reply } => {
                let id = relay.connect(peer_tx);
                let _ = reply.send(id);
            }
            RelayCommand::Message { id, message } => {
                debug!("{} from {}", message.kind(), id);
                relay.handle(id, message);
            }
            RelayCommand::Disconnect { id } => relay.disconnect(id),
            RelayCommand::Stats { reply } => {
                let _ = reply.send(relay.stats());
            }
            RelayCommand::Participant { id, reply } => {
                let _ = reply.send(relay.participant(id));
            }
        }
    }
    info!("Relay actor stopped");
}

/// Handle to communicate with the relay actor
#[derive(Clone)]
pub struct SignalingHandle {
    pub(crate) tx: mpsc::Sender<RelayCommand>,
}

impl SignalingHandle {
    /// Spawn the relay actor on the current runtime
    pub fn spawn(config: &Config) -> Self {
        let (tx, rx) = mpsc::channel::<RelayCommand>(config.command_capacity);
        let relay = Relay::new(Registry::new(config.max_name_len));
        tokio::spawn(relay_actor(rx, relay));
        Self { tx }
    }

    /// Admit a new connection; it starts unjoined
    pub async fn connect(
        &self,
        peer_tx: mpsc::UnboundedSender<OutboundMessage>,
    ) -> Result<ParticipantId, SignalingError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(RelayCommand::Connect {
            peer_tx,
            reply: reply_tx,
        })
        .await?;
        reply_rx
            .await
            .map_err(|_| SignalingError::Internal("actor channel closed".to_string()))
    }

    /// Hand an inbound client message to the relay
    pub async fn dispatch(&self, id: ParticipantId, message: ClientMessage) {
        let _ = self.tx.send(RelayCommand::Message { id, message }).await;
    }

    /// Connection closed; unwind queue and session membership
    pub async fn disconnect(&self, id: ParticipantId) {
        let _ = self.tx.send(RelayCommand::Disconnect { id }).await;
    }

    pub async fn stats(&self) -> Result<RelayStats, SignalingError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(RelayCommand::Stats { reply: reply_tx }).await?;
        reply_rx
            .await
            .map_err(|_| SignalingError::Internal("actor channel closed".to_string()))
    }

    pub async fn participant(
        &self,
        id: ParticipantId,
    ) -> Result<Option<ParticipantInfo>, SignalingError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(RelayCommand::Participant {
            id,
            reply: reply_tx,
        })
        .await?;
        reply_rx
            .await
            .map_err(|_| SignalingError::Internal("actor channel closed".to_string()))
    }

    async fn send(&self, cmd: RelayCommand) -> Result<(), SignalingError> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| SignalingError::Internal("actor channel closed".to_string()))
    }
}
