use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::error::{MeetingError, Result};
use crate::media::LocalMediaController;
use crate::session::SessionEvent;
use crate::signaling::SignalingEvent;

/// Negotiation state of a single peer link.
///
/// `Closed` is terminal and reachable from everywhere: participant left,
/// session teardown, or a fatal transport state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    New,
    Offering,
    Answering,
    Negotiating,
    Connected,
    Closed,
}

/// Remote media handles for one peer. webrtc-rs delivers tracks
/// individually, so the "stream" is the pair of them.
#[derive(Clone, Default)]
pub struct RemoteStream {
    pub audio: Option<Arc<TrackRemote>>,
    pub video: Option<Arc<TrackRemote>>,
}

impl RemoteStream {
    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && self.video.is_none()
    }
}

struct PeerLink {
    state: LinkState,
    connection: Arc<RTCPeerConnection>,
    video_sender: Arc<RTCRtpSender>,
    remote_stream: RemoteStream,
    /// Candidates that arrived before the remote description; applied the
    /// moment it is set, never dropped for ordering alone.
    pending_candidates: Vec<RTCIceCandidateInit>,
    have_remote_description: bool,
}

/// Owns every peer link, keyed by remote user id, and drives each one's
/// negotiation. Exactly one link may exist per remote participant; nothing
/// outside this type holds a reference into the link map.
///
/// Glare avoidance: for any pair of participants the one whose user id sorts
/// lexicographically smaller initiates the offer. Both sides derive this
/// locally, so exactly one offer is created per pair with no coordination.
pub struct PeerLinkManager {
    local_user_id: String,
    api: API,
    ice_servers: Vec<String>,
    links: Arc<Mutex<HashMap<String, PeerLink>>>,
    outbound: mpsc::UnboundedSender<SignalingEvent>,
    events: broadcast::Sender<SessionEvent>,
    media: Arc<LocalMediaController>,
}

impl PeerLinkManager {
    pub fn new(
        local_user_id: String,
        ice_servers: Vec<String>,
        media: Arc<LocalMediaController>,
        outbound: mpsc::UnboundedSender<SignalingEvent>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self {
            local_user_id,
            api,
            ice_servers,
            links: Arc::new(Mutex::new(HashMap::new())),
            outbound,
            events,
            media,
        })
    }

    /// Creates a link for `remote` if none exists, offering when the glare
    /// rule makes us the initiator. Idempotent per remote id.
    pub async fn ensure_link(&self, remote: &str) -> Result<()> {
        let initiate = self.local_user_id.as_str() < remote;
        self.ensure_link_inner(remote, initiate).await
    }

    async fn ensure_link_inner(&self, remote: &str, initiate: bool) -> Result<()> {
        if remote == self.local_user_id {
            return Ok(());
        }
        if self.links.lock().await.contains_key(remote) {
            return Ok(());
        }

        let (connection, video_sender) = self.create_connection(remote).await?;

        let raced = {
            let mut links = self.links.lock().await;
            if links.contains_key(remote) {
                true
            } else {
                links.insert(
                    remote.to_string(),
                    PeerLink {
                        state: LinkState::New,
                        connection: connection.clone(),
                        video_sender,
                        remote_stream: RemoteStream::default(),
                        pending_candidates: Vec::new(),
                        have_remote_description: false,
                    },
                );
                false
            }
        };
        if raced {
            let _ = connection.close().await;
            return Ok(());
        }

        log::debug!(
            "link to {remote} created ({})",
            if initiate { "initiator" } else { "responder" }
        );

        if initiate {
            self.send_offer(remote, &connection).await?;
        }
        Ok(())
    }

    async fn send_offer(&self, remote: &str, connection: &Arc<RTCPeerConnection>) -> Result<()> {
        let offer = connection
            .create_offer(None)
            .await
            .map_err(|e| self.negotiation(remote, e))?;
        connection
            .set_local_description(offer.clone())
            .await
            .map_err(|e| self.negotiation(remote, e))?;

        {
            let mut links = self.links.lock().await;
            match links.get_mut(remote) {
                Some(link) => link.state = LinkState::Offering,
                // Peer left while the offer was being built.
                None => return Ok(()),
            }
        }
        let _ = self.outbound.send(SignalingEvent::Offer {
            to: Some(remote.to_string()),
            from: None,
            offer,
        });
        self.emit_state(remote, LinkState::Offering);
        Ok(())
    }

    /// Responder path. The link is created on demand because an offer can
    /// outrun the roster event that introduces its sender.
    pub async fn handle_offer(&self, from: &str, offer: RTCSessionDescription) -> Result<()> {
        self.ensure_link_inner(from, false).await?;

        let connection = {
            let links = self.links.lock().await;
            match links.get(from) {
                Some(link) => link.connection.clone(),
                None => return Ok(()),
            }
        };

        connection
            .set_remote_description(offer)
            .await
            .map_err(|e| self.negotiation(from, e))?;
        let queued = {
            let mut links = self.links.lock().await;
            match links.get_mut(from) {
                Some(link) => {
                    link.have_remote_description = true;
                    link.pending_candidates.drain(..).collect::<Vec<_>>()
                }
                // Closed while the description was being applied.
                None => return Ok(()),
            }
        };
        self.apply_candidates(from, &connection, queued).await;

        let answer = connection
            .create_answer(None)
            .await
            .map_err(|e| self.negotiation(from, e))?;
        connection
            .set_local_description(answer.clone())
            .await
            .map_err(|e| self.negotiation(from, e))?;

        {
            let mut links = self.links.lock().await;
            match links.get_mut(from) {
                Some(link) => link.state = LinkState::Answering,
                None => return Ok(()),
            }
        }
        let _ = self.outbound.send(SignalingEvent::Answer {
            to: Some(from.to_string()),
            from: None,
            answer,
        });
        self.emit_state(from, LinkState::Answering);
        Ok(())
    }

    /// Applies an answer to a link we offered on. Answers for unknown links
    /// or links not awaiting one are stale and dropped without effect.
    pub async fn handle_answer(&self, from: &str, answer: RTCSessionDescription) -> Result<()> {
        let connection = {
            let links = self.links.lock().await;
            match links.get(from) {
                Some(link) if link.state == LinkState::Offering => link.connection.clone(),
                _ => {
                    log::debug!("dropping stale answer from {from}");
                    return Ok(());
                }
            }
        };

        connection
            .set_remote_description(answer)
            .await
            .map_err(|e| self.negotiation(from, e))?;
        let (queued, advanced) = {
            let mut links = self.links.lock().await;
            match links.get_mut(from) {
                Some(link) => {
                    link.have_remote_description = true;
                    // The transport callback may have reached Connected while
                    // the description was being applied; never regress that.
                    let advanced = if link.state == LinkState::Offering {
                        link.state = LinkState::Negotiating;
                        true
                    } else {
                        false
                    };
                    (link.pending_candidates.drain(..).collect::<Vec<_>>(), advanced)
                }
                None => return Ok(()),
            }
        };
        self.apply_candidates(from, &connection, queued).await;
        if advanced {
            self.emit_state(from, LinkState::Negotiating);
        }
        Ok(())
    }

    /// Candidates arriving before the remote description are queued;
    /// candidates for unknown links are discarded outright.
    pub async fn handle_candidate(&self, from: &str, candidate: RTCIceCandidateInit) -> Result<()> {
        let connection = {
            let mut links = self.links.lock().await;
            match links.get_mut(from) {
                Some(link) if link.have_remote_description => link.connection.clone(),
                Some(link) => {
                    link.pending_candidates.push(candidate);
                    return Ok(());
                }
                None => {
                    log::debug!("discarding candidate for unknown link {from}");
                    return Ok(());
                }
            }
        };
        if let Err(e) = connection.add_ice_candidate(candidate).await {
            log::warn!("candidate from {from} rejected: {e}");
        }
        Ok(())
    }

    async fn apply_candidates(
        &self,
        from: &str,
        connection: &Arc<RTCPeerConnection>,
        candidates: Vec<RTCIceCandidateInit>,
    ) {
        for candidate in candidates {
            if let Err(e) = connection.add_ice_candidate(candidate).await {
                log::warn!("queued candidate from {from} rejected: {e}");
            }
        }
    }

    /// Closes and removes the link. Once this returns, any in-flight
    /// negotiation step for this peer resolves as a no-op.
    pub async fn close_link(&self, remote: &str) -> bool {
        let removed = self.links.lock().await.remove(remote);
        match removed {
            Some(link) => {
                if let Err(e) = link.connection.close().await {
                    log::warn!("closing link to {remote}: {e}");
                }
                self.emit_state(remote, LinkState::Closed);
                let _ = self.events.send(SessionEvent::RemoteStreamRemoved {
                    user_id: remote.to_string(),
                });
                true
            }
            None => false,
        }
    }

    pub async fn close_all(&self) {
        let drained: Vec<(String, PeerLink)> =
            self.links.lock().await.drain().collect();
        for (user_id, link) in drained {
            if let Err(e) = link.connection.close().await {
                log::warn!("closing link to {user_id}: {e}");
            }
            self.emit_state(&user_id, LinkState::Closed);
            let _ = self
                .events
                .send(SessionEvent::RemoteStreamRemoved { user_id });
        }
    }

    /// Swaps the outgoing video track on every link, whatever its state.
    /// Links still negotiating carry the replacement into their connected
    /// state; no renegotiation is required.
    pub async fn replace_video_track(&self, track: Arc<TrackLocalStaticSample>) {
        let senders: Vec<(String, Arc<RTCRtpSender>)> = self
            .links
            .lock()
            .await
            .iter()
            .map(|(id, link)| (id.clone(), link.video_sender.clone()))
            .collect();
        for (user_id, sender) in senders {
            let replacement = Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>;
            if let Err(e) = sender.replace_track(Some(replacement)).await {
                log::warn!("track replacement failed for {user_id}: {e}");
            }
        }
    }

    pub async fn link_state(&self, remote: &str) -> Option<LinkState> {
        self.links.lock().await.get(remote).map(|link| link.state)
    }

    pub async fn link_count(&self) -> usize {
        self.links.lock().await.len()
    }

    /// Remote media by user id, for every link that has received a track.
    pub async fn remote_streams(&self) -> HashMap<String, RemoteStream> {
        self.links
            .lock()
            .await
            .iter()
            .filter(|(_, link)| !link.remote_stream.is_empty())
            .map(|(id, link)| (id.clone(), link.remote_stream.clone()))
            .collect()
    }

    async fn create_connection(
        &self,
        remote: &str,
    ) -> Result<(Arc<RTCPeerConnection>, Arc<RTCRtpSender>)> {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };
        let connection = Arc::new(self.api.new_peer_connection(config).await?);

        // Same track objects on every link; only LocalMediaController may
        // enable, disable or replace them.
        let audio_track = self.media.audio_track();
        connection
            .add_track(Arc::clone(&audio_track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| self.negotiation(remote, e))?;
        let video_track = self.media.active_video_track();
        let video_sender = connection
            .add_track(Arc::clone(&video_track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| self.negotiation(remote, e))?;

        let outbound = self.outbound.clone();
        let remote_id = remote.to_string();
        connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let outbound = outbound.clone();
            let remote_id = remote_id.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = outbound.send(SignalingEvent::IceCandidate {
                            to: Some(remote_id),
                            from: None,
                            candidate: init,
                        });
                    }
                    Err(e) => log::warn!("could not serialize local candidate: {e}"),
                }
            })
        }));

        let links = self.links.clone();
        let events = self.events.clone();
        let remote_id = remote.to_string();
        connection.on_track(Box::new(
            move |track: Arc<TrackRemote>, _receiver, _transceiver| {
                let links = links.clone();
                let events = events.clone();
                let remote_id = remote_id.clone();
                Box::pin(async move {
                    let kind = track.kind();
                    log::debug!("remote {kind} track from {remote_id}");
                    let mut guard = links.lock().await;
                    if let Some(link) = guard.get_mut(&remote_id) {
                        match kind {
                            RTPCodecType::Audio => link.remote_stream.audio = Some(track),
                            RTPCodecType::Video => link.remote_stream.video = Some(track),
                            _ => return,
                        }
                        let _ = events.send(SessionEvent::RemoteStreamUpdated {
                            user_id: remote_id.clone(),
                        });
                    }
                })
            },
        ));

        let links = self.links.clone();
        let events = self.events.clone();
        let remote_id = remote.to_string();
        connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                let links = links.clone();
                let events = events.clone();
                let remote_id = remote_id.clone();
                Box::pin(async move {
                    log::debug!("link to {remote_id}: transport state {state}");
                    match state {
                        RTCPeerConnectionState::Connected => {
                            let mut guard = links.lock().await;
                            if let Some(link) = guard.get_mut(&remote_id) {
                                link.state = LinkState::Connected;
                                let _ = events.send(SessionEvent::LinkStateChanged {
                                    user_id: remote_id.clone(),
                                    state: LinkState::Connected,
                                });
                            }
                        }
                        // Fatal for this link only. No retry: the peer's
                        // next roster appearance creates a fresh link.
                        RTCPeerConnectionState::Failed | RTCPeerConnectionState::Disconnected => {
                            let removed = links.lock().await.remove(&remote_id);
                            if let Some(link) = removed {
                                let _ = link.connection.close().await;
                                let _ = events.send(SessionEvent::LinkStateChanged {
                                    user_id: remote_id.clone(),
                                    state: LinkState::Closed,
                                });
                                let _ = events.send(SessionEvent::RemoteStreamRemoved {
                                    user_id: remote_id.clone(),
                                });
                            }
                        }
                        _ => {}
                    }
                })
            },
        ));

        Ok((connection, video_sender))
    }

    fn emit_state(&self, remote: &str, state: LinkState) {
        let _ = self.events.send(SessionEvent::LinkStateChanged {
            user_id: remote.to_string(),
            state,
        });
    }

    fn negotiation(&self, peer: &str, source: webrtc::Error) -> MeetingError {
        MeetingError::Negotiation {
            peer: peer.to_string(),
            source,
        }
    }
}
