use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::error::{MeetingError, Result};
use crate::room::Participant;

/// Typed view of the meeting signaling protocol. Every frame on the wire is
/// a JSON object tagged with an `event` field; payload fields use the
/// camelCase names the gateway expects.
///
/// Directed negotiation events (`offer`, `answer`, `ice-candidate`) carry
/// `to` when sent and `from` when relayed back by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum SignalingEvent {
    #[serde(rename_all = "camelCase")]
    JoinMeeting { meeting_id: String, user_id: String },
    CurrentParticipants {
        participants: Vec<Participant>,
    },
    ParticipantJoined {
        participant: Participant,
    },
    #[serde(rename_all = "camelCase")]
    ParticipantLeft { user_id: String },
    Offer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        offer: RTCSessionDescription,
    },
    Answer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        answer: RTCSessionDescription,
    },
    IceCandidate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        candidate: RTCIceCandidateInit,
    },
    #[serde(rename_all = "camelCase")]
    UpdateStatus {
        meeting_id: String,
        user_id: String,
        has_camera: bool,
        has_microphone: bool,
        is_screen_sharing: bool,
    },
    #[serde(rename_all = "camelCase")]
    ParticipantStatusUpdated {
        user_id: String,
        has_camera: bool,
        has_microphone: bool,
        is_screen_sharing: bool,
    },
    #[serde(rename_all = "camelCase")]
    SendMessage {
        meeting_id: String,
        sender_id: String,
        message: String,
        is_private: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        receiver_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    NewMessage {
        id: String,
        sender_id: String,
        message: String,
        is_private: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        receiver_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    RaiseHand { meeting_id: String, user_id: String },
    #[serde(rename_all = "camelCase")]
    HandRaised { meeting_id: String, user_id: String },
    #[serde(rename_all = "camelCase")]
    LowerHand { meeting_id: String, user_id: String },
    #[serde(rename_all = "camelCase")]
    HandLowered { meeting_id: String, user_id: String },
    #[serde(rename_all = "camelCase")]
    ShareScreen { meeting_id: String, user_id: String },
    #[serde(rename_all = "camelCase")]
    ScreenShared { meeting_id: String, user_id: String },
    #[serde(rename_all = "camelCase")]
    StopScreenShare { meeting_id: String, user_id: String },
    #[serde(rename_all = "camelCase")]
    ScreenShareStopped { meeting_id: String, user_id: String },
    MeetingEnded,
    Error {
        message: String,
    },
}

/// Bidirectional event channel to the room-scoped signaling server.
///
/// The session coordinator owns one transport for the lifetime of a meeting.
/// Implementations exist for WebSocket (production) and in-memory channels
/// (integration tests).
#[async_trait]
pub trait SignalingTransport: Send {
    /// Fire-and-forget. When the channel is down the event is dropped; the
    /// caller must not assume delivery.
    async fn send(&mut self, event: SignalingEvent);

    /// Next inbound event, or `None` once the channel is closed. Nothing is
    /// delivered after `disconnect` returns.
    async fn recv(&mut self) -> Option<SignalingEvent>;

    async fn disconnect(&mut self);
}

/// WebSocket transport. Serialization and socket I/O run on two background
/// tasks; the struct itself only holds the channel ends, so `send` never
/// blocks on the network.
pub struct WebSocketSignaling {
    outgoing: Option<mpsc::UnboundedSender<SignalingEvent>>,
    incoming: mpsc::UnboundedReceiver<SignalingEvent>,
    closed: bool,
}

impl WebSocketSignaling {
    /// Connects to `{server_url}/meetings?meetingId=..&userId=..`.
    ///
    /// Nothing is buffered across connections: if this transport drops, a
    /// fresh `connect` starts from a clean slate and stale negotiation
    /// frames from the previous incarnation are simply gone.
    pub async fn connect(server_url: &str, meeting_id: &str, user_id: &str) -> Result<Self> {
        let url = format!("{server_url}/meetings?meetingId={meeting_id}&userId={user_id}");
        let (ws_stream, _) = connect_async(&url)
            .await
            .map_err(|e| MeetingError::SignalingUnavailable(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<SignalingEvent>();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(event) = outgoing_rx.recv().await {
                match serde_json::to_string(&event) {
                    Ok(json) => {
                        if write.send(WsMessage::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => log::warn!("dropping unserializable signaling event: {e}"),
                }
            }
            let _ = write.send(WsMessage::Close(None)).await;
        });

        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                let msg = match msg {
                    Ok(m) => m,
                    Err(e) => {
                        log::warn!("signaling socket error: {e}");
                        break;
                    }
                };
                let WsMessage::Text(text) = msg else { continue };
                match serde_json::from_str::<SignalingEvent>(&text) {
                    Ok(event) => {
                        if incoming_tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => log::warn!("ignoring malformed signaling frame: {e}"),
                }
            }
        });

        Ok(Self {
            outgoing: Some(outgoing_tx),
            incoming: incoming_rx,
            closed: false,
        })
    }
}

#[async_trait]
impl SignalingTransport for WebSocketSignaling {
    async fn send(&mut self, event: SignalingEvent) {
        if let Some(tx) = &self.outgoing {
            let _ = tx.send(event);
        }
    }

    async fn recv(&mut self) -> Option<SignalingEvent> {
        if self.closed {
            return None;
        }
        self.incoming.recv().await
    }

    async fn disconnect(&mut self) {
        self.closed = true;
        // Dropping the sender ends the writer task, which sends Close.
        self.outgoing.take();
        self.incoming.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_kebab_tagged_with_camel_case_fields() {
        let json = serde_json::to_string(&SignalingEvent::JoinMeeting {
            meeting_id: "m1".into(),
            user_id: "u1".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"event":"join-meeting","meetingId":"m1","userId":"u1"}"#);
    }

    #[test]
    fn outbound_offer_omits_from() {
        let offer = serde_json::from_str::<RTCSessionDescription>(
            r#"{"type":"offer","sdp":"v=0\r\n"}"#,
        )
        .unwrap();
        let json = serde_json::to_value(&SignalingEvent::Offer {
            to: Some("u2".into()),
            from: None,
            offer,
        })
        .unwrap();
        assert_eq!(json["event"], "offer");
        assert_eq!(json["to"], "u2");
        assert!(json.get("from").is_none());
        assert_eq!(json["offer"]["type"], "offer");
    }

    #[test]
    fn relayed_answer_parses_with_from() {
        let event: SignalingEvent = serde_json::from_str(
            r#"{"event":"answer","from":"u1","answer":{"type":"answer","sdp":"v=0\r\n"}}"#,
        )
        .unwrap();
        match event {
            SignalingEvent::Answer { to, from, .. } => {
                assert_eq!(from.as_deref(), Some("u1"));
                assert!(to.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn meeting_ended_has_no_payload() {
        let event: SignalingEvent = serde_json::from_str(r#"{"event":"meeting-ended"}"#).unwrap();
        assert!(matches!(event, SignalingEvent::MeetingEnded));
        let json = serde_json::to_string(&SignalingEvent::MeetingEnded).unwrap();
        assert_eq!(json, r#"{"event":"meeting-ended"}"#);
    }

    #[test]
    fn public_message_skips_receiver() {
        let json = serde_json::to_value(&SignalingEvent::SendMessage {
            meeting_id: "m1".into(),
            sender_id: "u1".into(),
            message: "hello".into(),
            is_private: false,
            receiver_id: None,
        })
        .unwrap();
        assert!(json.get("receiverId").is_none());
        assert_eq!(json["isPrivate"], false);
        assert_eq!(json["senderId"], "u1");
    }
}
