//! In-memory signaling server for integration tests. Routes events between
//! sessions with the same semantics as the production gateway: roster
//! snapshots on join, directed relay of negotiation frames with `from`
//! substitution, private message fan-out to sender and receiver only.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, Mutex};

use meeting_client::{Participant, SignalingEvent, SignalingTransport};

enum ServerMsg {
    Frame { from: String, event: SignalingEvent },
    Disconnected { user_id: String },
}

/// Client end of an in-memory signaling channel.
pub struct ChannelTransport {
    user_id: String,
    to_server: mpsc::UnboundedSender<ServerMsg>,
    from_server: mpsc::UnboundedReceiver<SignalingEvent>,
    closed: bool,
}

#[async_trait]
impl SignalingTransport for ChannelTransport {
    async fn send(&mut self, event: SignalingEvent) {
        if !self.closed {
            let _ = self.to_server.send(ServerMsg::Frame {
                from: self.user_id.clone(),
                event,
            });
        }
    }

    async fn recv(&mut self) -> Option<SignalingEvent> {
        if self.closed {
            return None;
        }
        self.from_server.recv().await
    }

    async fn disconnect(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.to_server.send(ServerMsg::Disconnected {
                user_id: self.user_id.clone(),
            });
            self.from_server.close();
        }
    }
}

pub struct TestServer {
    meeting_id: String,
    inbox: mpsc::UnboundedSender<ServerMsg>,
    clients: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<SignalingEvent>>>>,
    /// Every relayed offer as (from, to), for glare assertions.
    offers: Arc<Mutex<Vec<(String, String)>>>,
}

impl TestServer {
    pub fn new(meeting_id: &str) -> Self {
        let (inbox, inbox_rx) = mpsc::unbounded_channel();
        let clients: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<SignalingEvent>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let offers = Arc::new(Mutex::new(Vec::new()));

        tokio::spawn(run_server(
            meeting_id.to_string(),
            inbox_rx,
            clients.clone(),
            offers.clone(),
        ));

        Self {
            meeting_id: meeting_id.to_string(),
            inbox,
            clients,
            offers,
        }
    }

    /// Registers a client channel; the session announces itself by sending
    /// `join-meeting` over the returned transport.
    pub async fn connect(&self, user_id: &str) -> ChannelTransport {
        let (tx, rx) = mpsc::unbounded_channel();
        self.clients.lock().await.insert(user_id.to_string(), tx);
        ChannelTransport {
            user_id: user_id.to_string(),
            to_server: self.inbox.clone(),
            from_server: rx,
            closed: false,
        }
    }

    /// Host action: broadcast `meeting-ended` to every connected client.
    pub async fn end_meeting(&self) {
        let clients = self.clients.lock().await;
        for tx in clients.values() {
            let _ = tx.send(SignalingEvent::MeetingEnded);
        }
    }

    /// Injects an arbitrary inbound event into one client, bypassing routing.
    pub async fn inject(&self, user_id: &str, event: SignalingEvent) {
        if let Some(tx) = self.clients.lock().await.get(user_id) {
            let _ = tx.send(event);
        }
    }

    pub async fn offers(&self) -> Vec<(String, String)> {
        self.offers.lock().await.clone()
    }

    /// Ids of clients whose transport is still open, sorted.
    pub async fn connected_users(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.clients.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn meeting_id(&self) -> &str {
        &self.meeting_id
    }
}

async fn run_server(
    meeting_id: String,
    mut inbox: mpsc::UnboundedReceiver<ServerMsg>,
    clients: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<SignalingEvent>>>>,
    offers: Arc<Mutex<Vec<(String, String)>>>,
) {
    let mut roster: Vec<Participant> = Vec::new();
    let mut message_seq: u64 = 0;

    while let Some(msg) = inbox.recv().await {
        match msg {
            ServerMsg::Disconnected { user_id } => {
                if let Some(p) = roster.iter_mut().find(|p| p.user_id == user_id) {
                    p.is_active = false;
                    p.is_screen_sharing = false;
                }
                clients.lock().await.remove(&user_id);
                broadcast_except(
                    &clients,
                    &user_id,
                    SignalingEvent::ParticipantLeft { user_id: user_id.clone() },
                )
                .await;
            }
            ServerMsg::Frame { from, event } => match event {
                SignalingEvent::JoinMeeting { user_id, .. } => {
                    match roster.iter_mut().find(|p| p.user_id == user_id) {
                        Some(p) => p.is_active = true,
                        None => roster.push(Participant::new(&user_id)),
                    }
                    let snapshot: Vec<Participant> =
                        roster.iter().filter(|p| p.is_active).cloned().collect();
                    deliver(
                        &clients,
                        &user_id,
                        SignalingEvent::CurrentParticipants {
                            participants: snapshot,
                        },
                    )
                    .await;
                    broadcast_except(
                        &clients,
                        &user_id,
                        SignalingEvent::ParticipantJoined {
                            participant: Participant::new(&user_id),
                        },
                    )
                    .await;
                }
                SignalingEvent::Offer {
                    to: Some(to),
                    offer,
                    ..
                } => {
                    offers.lock().await.push((from.clone(), to.clone()));
                    deliver(
                        &clients,
                        &to,
                        SignalingEvent::Offer {
                            to: None,
                            from: Some(from),
                            offer,
                        },
                    )
                    .await;
                }
                SignalingEvent::Answer {
                    to: Some(to),
                    answer,
                    ..
                } => {
                    deliver(
                        &clients,
                        &to,
                        SignalingEvent::Answer {
                            to: None,
                            from: Some(from),
                            answer,
                        },
                    )
                    .await;
                }
                SignalingEvent::IceCandidate {
                    to: Some(to),
                    candidate,
                    ..
                } => {
                    deliver(
                        &clients,
                        &to,
                        SignalingEvent::IceCandidate {
                            to: None,
                            from: Some(from),
                            candidate,
                        },
                    )
                    .await;
                }
                SignalingEvent::UpdateStatus {
                    user_id,
                    has_camera,
                    has_microphone,
                    is_screen_sharing,
                    ..
                } => {
                    if let Some(p) = roster.iter_mut().find(|p| p.user_id == user_id) {
                        p.has_camera = has_camera;
                        p.has_microphone = has_microphone;
                        p.is_screen_sharing = is_screen_sharing;
                    }
                    broadcast_except(
                        &clients,
                        &user_id,
                        SignalingEvent::ParticipantStatusUpdated {
                            user_id: user_id.clone(),
                            has_camera,
                            has_microphone,
                            is_screen_sharing,
                        },
                    )
                    .await;
                }
                SignalingEvent::SendMessage {
                    sender_id,
                    message,
                    is_private,
                    receiver_id,
                    ..
                } => {
                    message_seq += 1;
                    let relayed = SignalingEvent::NewMessage {
                        id: format!("m-{message_seq}"),
                        sender_id: sender_id.clone(),
                        message,
                        is_private,
                        receiver_id: receiver_id.clone(),
                        timestamp: Utc::now(),
                    };
                    if is_private {
                        deliver(&clients, &sender_id, relayed.clone()).await;
                        if let Some(receiver) = receiver_id {
                            deliver(&clients, &receiver, relayed).await;
                        }
                    } else {
                        let guard = clients.lock().await;
                        for tx in guard.values() {
                            let _ = tx.send(relayed.clone());
                        }
                    }
                }
                SignalingEvent::RaiseHand { user_id, .. } => {
                    broadcast_except(
                        &clients,
                        &user_id,
                        SignalingEvent::HandRaised {
                            meeting_id: meeting_id.clone(),
                            user_id: user_id.clone(),
                        },
                    )
                    .await;
                }
                SignalingEvent::LowerHand { user_id, .. } => {
                    broadcast_except(
                        &clients,
                        &user_id,
                        SignalingEvent::HandLowered {
                            meeting_id: meeting_id.clone(),
                            user_id: user_id.clone(),
                        },
                    )
                    .await;
                }
                SignalingEvent::ShareScreen { user_id, .. } => {
                    if let Some(p) = roster.iter_mut().find(|p| p.user_id == user_id) {
                        p.is_screen_sharing = true;
                    }
                    broadcast_except(
                        &clients,
                        &user_id,
                        SignalingEvent::ScreenShared {
                            meeting_id: meeting_id.clone(),
                            user_id: user_id.clone(),
                        },
                    )
                    .await;
                }
                SignalingEvent::StopScreenShare { user_id, .. } => {
                    if let Some(p) = roster.iter_mut().find(|p| p.user_id == user_id) {
                        p.is_screen_sharing = false;
                    }
                    broadcast_except(
                        &clients,
                        &user_id,
                        SignalingEvent::ScreenShareStopped {
                            meeting_id: meeting_id.clone(),
                            user_id: user_id.clone(),
                        },
                    )
                    .await;
                }
                other => {
                    deliver(
                        &clients,
                        &from,
                        SignalingEvent::Error {
                            message: format!("unsupported event: {other:?}"),
                        },
                    )
                    .await;
                }
            },
        }
    }
}

async fn deliver(
    clients: &Arc<Mutex<HashMap<String, mpsc::UnboundedSender<SignalingEvent>>>>,
    user_id: &str,
    event: SignalingEvent,
) {
    if let Some(tx) = clients.lock().await.get(user_id) {
        let _ = tx.send(event);
    }
}

async fn broadcast_except(
    clients: &Arc<Mutex<HashMap<String, mpsc::UnboundedSender<SignalingEvent>>>>,
    skip: &str,
    event: SignalingEvent,
) {
    let guard = clients.lock().await;
    for (id, tx) in guard.iter() {
        if id != skip {
            let _ = tx.send(event.clone());
        }
    }
}
