use chrono::{DateTime, Utc};
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::signaling::SignalingEvent;

/// One chat entry in the session log. Ordered by arrival at this client;
/// no global order exists across participants.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub body: String,
    pub timestamp_utc: DateTime<Utc>,
    pub is_private: bool,
    pub receiver_id: Option<String>,
}

/// Chat and ephemeral signals (hand raise/lower, screen-share announcements)
/// multiplexed over the signaling transport.
///
/// Sends are one-way and fire-and-forget. The message log is append-only and
/// fed exclusively by inbound `new-message` events: the server echoes our own
/// messages back, so local sends do not append directly.
pub struct ControlChannel {
    meeting_id: String,
    user_id: String,
    outbound: mpsc::UnboundedSender<SignalingEvent>,
    log: Mutex<Vec<Message>>,
}

impl ControlChannel {
    pub fn new(
        meeting_id: String,
        user_id: String,
        outbound: mpsc::UnboundedSender<SignalingEvent>,
    ) -> Self {
        Self {
            meeting_id,
            user_id,
            outbound,
            log: Mutex::new(Vec::new()),
        }
    }

    /// Sends a chat message. Whitespace-only bodies are dropped client-side.
    /// A private message carries its receiver; the server delivers it to the
    /// sender and receiver only.
    pub fn send_message(&self, body: &str, is_private: bool, receiver_id: Option<String>) {
        if body.trim().is_empty() {
            return;
        }
        let _ = self.outbound.send(SignalingEvent::SendMessage {
            meeting_id: self.meeting_id.clone(),
            sender_id: self.user_id.clone(),
            message: body.to_string(),
            is_private,
            receiver_id: if is_private { receiver_id } else { None },
        });
    }

    pub fn raise_hand(&self) {
        let _ = self.outbound.send(SignalingEvent::RaiseHand {
            meeting_id: self.meeting_id.clone(),
            user_id: self.user_id.clone(),
        });
    }

    pub fn lower_hand(&self) {
        let _ = self.outbound.send(SignalingEvent::LowerHand {
            meeting_id: self.meeting_id.clone(),
            user_id: self.user_id.clone(),
        });
    }

    pub fn announce_screen_share(&self, active: bool) {
        let event = if active {
            SignalingEvent::ShareScreen {
                meeting_id: self.meeting_id.clone(),
                user_id: self.user_id.clone(),
            }
        } else {
            SignalingEvent::StopScreenShare {
                meeting_id: self.meeting_id.clone(),
                user_id: self.user_id.clone(),
            }
        };
        let _ = self.outbound.send(event);
    }

    /// Appends an inbound message and returns the stored entry.
    pub fn push_inbound(
        &self,
        id: String,
        sender_id: String,
        body: String,
        is_private: bool,
        receiver_id: Option<String>,
        timestamp_utc: DateTime<Utc>,
    ) -> Message {
        let message = Message {
            id,
            sender_id,
            body,
            timestamp_utc,
            is_private,
            receiver_id,
        };
        if let Ok(mut log) = self.log.lock() {
            log.push(message.clone());
        }
        message
    }

    pub fn messages(&self) -> Vec<Message> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }
}
