use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::chat::{ControlChannel, Message};
use crate::config::MeetingConfig;
use crate::connection::{SessionMonitor, SessionState, SessionStatus};
use crate::error::{MeetingError, Result};
use crate::media::LocalMediaController;
use crate::peer::{LinkState, PeerLinkManager, RemoteStream};
use crate::room::{Participant, ParticipantRegistry};
use crate::signaling::{SignalingEvent, SignalingTransport, WebSocketSignaling};

/// Typed notifications for the presentation layer. Any number of
/// subscribers may listen; see [`MeetingSession::subscribe`].
#[derive(Debug, Clone)]
pub enum SessionEvent {
    RosterUpdated,
    ParticipantJoined { user_id: String },
    ParticipantLeft { user_id: String },
    ParticipantStatusUpdated { user_id: String },
    LinkStateChanged { user_id: String, state: LinkState },
    RemoteStreamUpdated { user_id: String },
    RemoteStreamRemoved { user_id: String },
    MessageReceived(Message),
    /// Transient: hand raise/lower never mutates participant state.
    HandRaised { user_id: String, raised: bool },
    ScreenShareChanged { user_id: String, sharing: bool },
    /// The signaling transport dropped. The core does not reconnect.
    ConnectionLost,
    ServerError { message: String },
    Ended,
}

struct SessionShared {
    config: MeetingConfig,
    media: Arc<LocalMediaController>,
    links: PeerLinkManager,
    registry: std::sync::Mutex<ParticipantRegistry>,
    chat: ControlChannel,
    outbound: mpsc::UnboundedSender<SignalingEvent>,
    events: broadcast::Sender<SessionEvent>,
    monitor: SessionMonitor,
    ended: AtomicBool,
}

/// Session façade: wires transport, peer links, roster, media and chat
/// together, and owns the teardown sequence.
pub struct MeetingSession {
    shared: Arc<SessionShared>,
    pump: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl MeetingSession {
    /// Connects to the signaling server and joins the meeting.
    pub async fn start(config: MeetingConfig) -> Result<Self> {
        let transport =
            WebSocketSignaling::connect(&config.server_url, &config.meeting_id, &config.user_id)
                .await?;
        Self::start_with(config, Box::new(transport)).await
    }

    /// Like [`start`](Self::start) but over a caller-supplied transport.
    pub async fn start_with(
        config: MeetingConfig,
        mut transport: Box<dyn SignalingTransport>,
    ) -> Result<Self> {
        let monitor = SessionMonitor::new();
        monitor.set_state(SessionState::Connecting);

        let media = Arc::new(LocalMediaController::new(&config.user_id));
        if let Err(e) = media.acquire() {
            // Non-fatal: the session runs without outgoing audio.
            log::warn!("continuing without local capture: {e}");
            monitor.set_media_error(e.to_string());
        }

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(256);

        let links = PeerLinkManager::new(
            config.user_id.clone(),
            config.ice_servers.clone(),
            media.clone(),
            outbound.clone(),
            events.clone(),
        )?;
        let chat = ControlChannel::new(
            config.meeting_id.clone(),
            config.user_id.clone(),
            outbound.clone(),
        );

        transport
            .send(SignalingEvent::JoinMeeting {
                meeting_id: config.meeting_id.clone(),
                user_id: config.user_id.clone(),
            })
            .await;
        // Everyone joins muted with the camera off; announce that up front.
        transport
            .send(SignalingEvent::UpdateStatus {
                meeting_id: config.meeting_id.clone(),
                user_id: config.user_id.clone(),
                has_camera: false,
                has_microphone: false,
                is_screen_sharing: false,
            })
            .await;
        monitor.set_state(SessionState::Connected);

        let shared = Arc::new(SessionShared {
            config,
            media,
            links,
            registry: std::sync::Mutex::new(ParticipantRegistry::new()),
            chat,
            outbound,
            events,
            monitor,
            ended: AtomicBool::new(false),
        });

        let (shutdown, shutdown_rx) = watch::channel(false);
        let pump = tokio::spawn(Self::pump(shared.clone(), transport, outbound_rx, shutdown_rx));

        Ok(Self {
            shared,
            pump: Mutex::new(Some(pump)),
            shutdown,
        })
    }

    async fn pump(
        shared: Arc<SessionShared>,
        mut transport: Box<dyn SignalingTransport>,
        mut outbound_rx: mpsc::UnboundedReceiver<SignalingEvent>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                inbound = transport.recv() => match inbound {
                    Some(event) => {
                        shared.handle_event(event).await;
                        // A host-issued meeting-ended finishes the pump too,
                        // so the transport closes without a local end().
                        if shared.ended.load(Ordering::SeqCst) {
                            break;
                        }
                    }
                    None => {
                        if !shared.ended.load(Ordering::SeqCst) {
                            shared.monitor.set_state(SessionState::Failed);
                            shared.monitor.set_error("signaling channel closed".into());
                            let _ = shared.events.send(SessionEvent::ConnectionLost);
                        }
                        break;
                    }
                },
                out = outbound_rx.recv() => {
                    if let Some(event) = out {
                        transport.send(event).await;
                    }
                }
            }
        }
        // Flush queued leave/stop notices before closing the channel.
        while let Ok(event) = outbound_rx.try_recv() {
            transport.send(event).await;
        }
        transport.disconnect().await;
    }

    /// Tears the session down: stop screen share, close every peer link,
    /// stop local media, then disconnect signaling — in that order, since
    /// tracks must outlive the connections referencing them. After this
    /// returns no inbound event mutates any session state. Idempotent.
    pub async fn end(&self) {
        let already_ended = self.shared.ended.swap(true, Ordering::SeqCst);
        if !already_ended {
            log::info!(
                "ending session for meeting {}",
                self.shared.config.meeting_id
            );
            if let Some(camera) = self.shared.media.stop_screen_share() {
                self.shared.links.replace_video_track(camera).await;
                self.shared.chat.announce_screen_share(false);
            }
            self.shared.links.close_all().await;
            self.shared.media.stop();
        }

        let _ = self.shutdown.send(true);
        if let Some(handle) = self.pump.lock().await.take() {
            let _ = handle.await;
        }

        if !already_ended {
            self.shared.monitor.set_state(SessionState::Ended);
            let _ = self.shared.events.send(SessionEvent::Ended);
        }
    }

    /// Flips the local camera flag and broadcasts the new status.
    /// After the session has ended this refuses and reports current state.
    pub fn toggle_camera(&self) -> bool {
        if self.shared.is_ended() {
            return self.shared.media.camera_enabled();
        }
        let enabled = self.shared.media.toggle_camera();
        self.shared.send_status();
        enabled
    }

    /// Flips the local microphone flag and broadcasts the new status.
    pub fn toggle_microphone(&self) -> bool {
        if self.shared.is_ended() {
            return self.shared.media.microphone_enabled();
        }
        let enabled = self.shared.media.toggle_microphone();
        self.shared.send_status();
        enabled
    }

    /// Switches every link's outgoing video to a fresh screen track.
    pub async fn start_screen_share(&self) {
        if self.shared.is_ended() {
            return;
        }
        let screen = self.shared.media.start_screen_share();
        self.shared.links.replace_video_track(screen).await;
        self.shared.chat.announce_screen_share(true);
        self.shared.send_status();
    }

    /// Restores the camera track on every link. No-op when not sharing.
    pub async fn stop_screen_share(&self) {
        if self.shared.is_ended() {
            return;
        }
        if let Some(camera) = self.shared.media.stop_screen_share() {
            self.shared.links.replace_video_track(camera).await;
            self.shared.chat.announce_screen_share(false);
            self.shared.send_status();
        }
    }

    pub fn send_message(&self, body: &str, is_private: bool, receiver_id: Option<String>) {
        if self.shared.is_ended() {
            return;
        }
        self.shared.chat.send_message(body, is_private, receiver_id);
    }

    pub fn raise_hand(&self) {
        if self.shared.is_ended() {
            return;
        }
        self.shared.chat.raise_hand();
    }

    pub fn lower_hand(&self) {
        if self.shared.is_ended() {
            return;
        }
        self.shared.chat.lower_hand();
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.shared
            .registry
            .lock()
            .map(|r| r.participants())
            .unwrap_or_default()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.shared.chat.messages()
    }

    pub async fn remote_streams(&self) -> HashMap<String, RemoteStream> {
        self.shared.links.remote_streams().await
    }

    pub async fn link_state(&self, user_id: &str) -> Option<LinkState> {
        self.shared.links.link_state(user_id).await
    }

    pub async fn link_count(&self) -> usize {
        self.shared.links.link_count().await
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.monitor.current()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.shared.monitor.subscribe()
    }

    /// New subscription to session events; each subscriber sees every event
    /// from the point of subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Handle to the local media tracks, e.g. for feeding camera frames.
    pub fn local_media(&self) -> Arc<LocalMediaController> {
        self.shared.media.clone()
    }

    pub fn user_id(&self) -> &str {
        &self.shared.config.user_id
    }
}

impl Drop for MeetingSession {
    fn drop(&mut self) {
        // Best effort: callers should end() explicitly; this at least stops
        // the pump and closes the transport.
        let _ = self.shutdown.send(true);
    }
}

impl SessionShared {
    fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    async fn handle_event(&self, event: SignalingEvent) {
        if self.is_ended() {
            return;
        }
        match event {
            SignalingEvent::CurrentParticipants { participants } => {
                let peers: Vec<String> = participants
                    .iter()
                    .filter(|p| p.is_active && p.user_id != self.config.user_id)
                    .map(|p| p.user_id.clone())
                    .collect();
                self.with_registry(|r| r.apply_snapshot(participants));
                for peer in peers {
                    if let Err(e) = self.links.ensure_link(&peer).await {
                        self.link_failure(&peer, e).await;
                    }
                }
                let _ = self.events.send(SessionEvent::RosterUpdated);
            }
            SignalingEvent::ParticipantJoined { participant } => {
                let user_id = participant.user_id.clone();
                self.with_registry(|r| r.upsert(participant));
                if user_id != self.config.user_id {
                    if let Err(e) = self.links.ensure_link(&user_id).await {
                        self.link_failure(&user_id, e).await;
                    }
                }
                let _ = self.events.send(SessionEvent::ParticipantJoined { user_id });
            }
            SignalingEvent::ParticipantLeft { user_id } => {
                self.with_registry(|r| r.mark_left(&user_id));
                self.links.close_link(&user_id).await;
                let _ = self.events.send(SessionEvent::ParticipantLeft { user_id });
            }
            SignalingEvent::ParticipantStatusUpdated {
                user_id,
                has_camera,
                has_microphone,
                is_screen_sharing,
            } => {
                self.with_registry(|r| {
                    r.update_status(&user_id, has_camera, has_microphone, is_screen_sharing)
                });
                let _ = self
                    .events
                    .send(SessionEvent::ParticipantStatusUpdated { user_id });
            }
            SignalingEvent::Offer {
                from: Some(from),
                offer,
                ..
            } => {
                if let Err(e) = self.links.handle_offer(&from, offer).await {
                    self.link_failure(&from, e).await;
                }
            }
            SignalingEvent::Answer {
                from: Some(from),
                answer,
                ..
            } => {
                if let Err(e) = self.links.handle_answer(&from, answer).await {
                    self.link_failure(&from, e).await;
                }
            }
            SignalingEvent::IceCandidate {
                from: Some(from),
                candidate,
                ..
            } => {
                if let Err(e) = self.links.handle_candidate(&from, candidate).await {
                    self.link_failure(&from, e).await;
                }
            }
            SignalingEvent::NewMessage {
                id,
                sender_id,
                message,
                is_private,
                receiver_id,
                timestamp,
            } => {
                let stored =
                    self.chat
                        .push_inbound(id, sender_id, message, is_private, receiver_id, timestamp);
                let _ = self.events.send(SessionEvent::MessageReceived(stored));
            }
            SignalingEvent::HandRaised { user_id, .. } => {
                let _ = self.events.send(SessionEvent::HandRaised {
                    user_id,
                    raised: true,
                });
            }
            SignalingEvent::HandLowered { user_id, .. } => {
                let _ = self.events.send(SessionEvent::HandRaised {
                    user_id,
                    raised: false,
                });
            }
            SignalingEvent::ScreenShared { user_id, .. } => {
                self.with_registry(|r| r.set_screen_sharing(&user_id, true));
                let _ = self.events.send(SessionEvent::ScreenShareChanged {
                    user_id,
                    sharing: true,
                });
            }
            SignalingEvent::ScreenShareStopped { user_id, .. } => {
                self.with_registry(|r| r.set_screen_sharing(&user_id, false));
                let _ = self.events.send(SessionEvent::ScreenShareChanged {
                    user_id,
                    sharing: false,
                });
            }
            SignalingEvent::MeetingEnded => {
                // Host ended the meeting: clean termination, same teardown
                // as a local end(). The pump sees the ended flag on return
                // and disconnects the transport.
                log::info!("meeting {} ended by host", self.config.meeting_id);
                self.ended.store(true, Ordering::SeqCst);
                let _ = self.media.stop_screen_share();
                self.links.close_all().await;
                self.media.stop();
                self.monitor.set_state(SessionState::Ended);
                let _ = self.events.send(SessionEvent::Ended);
            }
            SignalingEvent::Error { message } => {
                log::warn!("signaling server error: {message}");
                self.monitor.set_error(message.clone());
                let _ = self.events.send(SessionEvent::ServerError { message });
            }
            other => log::debug!("ignoring unexpected inbound frame: {other:?}"),
        }
    }

    /// A failed negotiation closes that link only; the session and all
    /// other links continue.
    async fn link_failure(&self, peer: &str, error: MeetingError) {
        log::warn!("{error}");
        self.links.close_link(peer).await;
    }

    fn send_status(&self) {
        let _ = self.outbound.send(SignalingEvent::UpdateStatus {
            meeting_id: self.config.meeting_id.clone(),
            user_id: self.config.user_id.clone(),
            has_camera: self.media.camera_enabled(),
            has_microphone: self.media.microphone_enabled(),
            is_screen_sharing: self.media.is_screen_sharing(),
        });
    }

    fn with_registry<T>(&self, f: impl FnOnce(&mut ParticipantRegistry) -> T) -> T {
        let mut registry = self.registry.lock().expect("registry lock");
        f(&mut registry)
    }
}
