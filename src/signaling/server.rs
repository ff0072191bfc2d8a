use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tracing::{debug, error, info, warn};

use super::actor::SignalingHandle;
use super::messages::{ClientMessage, ServerMessage};
use super::types::{OutboundMessage, ParticipantId};
use crate::config::Config;

pub struct SignalingServer {
    listener: TcpListener,
    handle: SignalingHandle,
    ping_interval: Duration,
    pong_timeout: Duration,
}

impl SignalingServer {
    /// Bind the listener and start the relay actor
    pub async fn bind(config: &Config) -> std::io::Result<Self> {
        let listener = TcpListener::bind(&config.bind).await?;
        info!("Signaling server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            handle: SignalingHandle::spawn(config),
            ping_interval: config.ping_interval,
            pong_timeout: config.pong_timeout,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn handle(&self) -> SignalingHandle {
        self.handle.clone()
    }

    pub async fn run(self) -> std::io::Result<()> {
        loop {
            let (stream, addr) = self.listener.accept().await?;
            let handle = self.handle.clone();
            let keepalive = (self.ping_interval, self.pong_timeout);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, handle, keepalive).await {
                    error!("Connection error from {}: {}", addr, e);
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    handle: SignalingHandle,
    (ping_every, pong_wait): (Duration, Duration),
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();
    let (ctrl_tx, mut ctrl_rx) = mpsc::unbounded_channel::<Message>();

    let participant_id = handle.connect(tx.clone()).await?;
    info!("WebSocket connection from {} as {}", addr, participant_id);

    let mut ping_interval = tokio::time::interval(ping_every);
    let mut waiting_for_pong = false;
    let mut pong_deadline: Option<tokio::time::Instant> = None;

    let send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(msg) = rx.recv() => {
                    let ws_msg = Message::Text(msg.into_inner());
                    if ws_tx.send(ws_msg).await.is_err() {
                        break;
                    }
                }
                Some(ctrl_msg) = ctrl_rx.recv() => {
                    if ws_tx.send(ctrl_msg).await.is_err() {
                        break;
                    }
                }
                else => break,
            }
        }
    });

    loop {
        let pong_timeout = async {
            match pong_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = ping_interval.tick() => {
                if waiting_for_pong {
                    warn!("No Pong received, disconnecting {}", participant_id);
                    break;
                }
                if ctrl_tx.send(Message::Ping(Bytes::new())).is_err() {
                    break;
                }
                waiting_for_pong = true;
                pong_deadline = Some(tokio::time::Instant::now() + pong_wait);
                debug!("Ping sent to {}", participant_id);
            }

            _ = pong_timeout => {
                warn!("Pong timeout, disconnecting {}", participant_id);
                break;
            }

            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        warn!("WebSocket error from {}: {}", participant_id, e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => {
                        handle_text_message(&text, &tx, &handle, participant_id).await;
                    }
                    Message::Pong(_) => {
                        waiting_for_pong = false;
                        pong_deadline = None;
                        debug!("Pong received from {}", participant_id);
                    }
                    Message::Close(_) => {
                        info!("Close received from {}", participant_id);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    handle.disconnect(participant_id).await;

    send_task.abort();
    info!("WebSocket disconnected: {} ({})", participant_id, addr);

    Ok(())
}

async fn handle_text_message(
    text: &str,
    tx: &mpsc::UnboundedSender<OutboundMessage>,
    handle: &SignalingHandle,
    participant_id: ParticipantId,
) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => handle.dispatch(participant_id, message).await,
        Err(e) => {
            debug!("Unparseable message from {}: {}", participant_id, e);
            let err = ServerMessage::Error {
                message: format!("Invalid message: {}", e),
            };
            let json =
                serde_json::to_string(&err).expect("ServerMessage serialization should never fail");
            let _ = tx.send(OutboundMessage::from(json));
        }
    }
}
