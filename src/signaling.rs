//! WebSocket matchmaking and signaling relay

mod actor;
mod matchmaker;
mod messages;
mod registry;
mod relay;
mod server;
mod session;
mod types;

pub use actor::SignalingHandle;
pub use matchmaker::Matchmaker;
pub use messages::{ClientMessage, ServerMessage};
pub use registry::{DEFAULT_MAX_NAME_LEN, Registry};
pub use relay::Relay;
pub use server::SignalingServer;
pub use session::{NegotiationKind, Session, SessionPhase, SessionTable};
pub use types::{
    OutboundMessage, ParticipantId, ParticipantInfo, ParticipantState, Payload, RelayStats, Role,
    SessionId, SignalingError,
};
