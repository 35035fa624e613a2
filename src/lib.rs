//! Client core for live meetings: room-scoped signaling, a full mesh of
//! WebRTC peer links, local media control, and chat multiplexed over the
//! same signaling channel.
//!
//! [`MeetingSession`] is the entry point. It joins a meeting over one
//! signaling transport, negotiates a peer link with every other active
//! participant (the lexicographically smaller user id initiates, so a pair
//! never produces colliding offers), and exposes the resulting remote
//! streams, roster, and chat log. Frontends subscribe to [`SessionEvent`]s
//! and render; no rendering happens here.

mod audio;
mod chat;
mod config;
mod connection;
mod error;
mod media;
mod peer;
mod room;
mod session;
mod signaling;

pub use chat::{ControlChannel, Message};
pub use config::{MeetingConfig, DEFAULT_STUN_SERVERS};
pub use connection::{SessionMonitor, SessionState, SessionStatus};
pub use error::{MeetingError, Result};
pub use media::LocalMediaController;
pub use peer::{LinkState, PeerLinkManager, RemoteStream};
pub use room::{Participant, ParticipantRegistry, ParticipantRole};
pub use session::{MeetingSession, SessionEvent};
pub use signaling::{SignalingEvent, SignalingTransport, WebSocketSignaling};
