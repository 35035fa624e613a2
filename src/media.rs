use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::audio::AudioCapture;
use crate::error::{MeetingError, Result};

/// Owner of all local media: one camera track and one microphone track for
/// the whole session, plus an optional screen track.
///
/// Every peer link attaches the same track objects; nothing here is copied
/// per link. Both tracks start disabled even when capture succeeds, matching
/// the join-muted default.
///
/// Invariant: the outgoing video track across all links is exactly the
/// camera track XOR the screen track. `active_video_track` is the single
/// source of truth for which one it currently is.
pub struct LocalMediaController {
    audio_track: Arc<TrackLocalStaticSample>,
    camera_track: Arc<TrackLocalStaticSample>,
    screen_track: Mutex<Option<Arc<TrackLocalStaticSample>>>,
    camera_enabled: AtomicBool,
    microphone_enabled: Arc<AtomicBool>,
    capture: Mutex<Option<AudioCapture>>,
    acquired: AtomicBool,
    stream_id: String,
}

impl LocalMediaController {
    pub fn new(user_id: &str) -> Self {
        let stream_id = format!("local-{user_id}");
        let audio_track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            "audio".to_owned(),
            stream_id.clone(),
        ));
        let camera_track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                ..Default::default()
            },
            "camera".to_owned(),
            stream_id.clone(),
        ));
        Self {
            audio_track,
            camera_track,
            screen_track: Mutex::new(None),
            camera_enabled: AtomicBool::new(false),
            microphone_enabled: Arc::new(AtomicBool::new(false)),
            capture: Mutex::new(None),
            acquired: AtomicBool::new(false),
            stream_id,
        }
    }

    /// Opens the microphone capture device. Called once per session;
    /// subsequent calls are no-ops.
    ///
    /// The negotiation tracks exist whether or not a device does, so a
    /// `MediaUnavailable` result leaves the session fully functional minus
    /// outgoing audio. Camera and screen frame production are fed by the
    /// embedding application through the track handles.
    pub fn acquire(&self) -> Result<()> {
        if self.acquired.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match AudioCapture::new(self.audio_track.clone(), self.microphone_enabled.clone()) {
            Ok(capture) => {
                if let Ok(mut guard) = self.capture.lock() {
                    *guard = Some(capture);
                }
                Ok(())
            }
            Err(e) => Err(MeetingError::MediaUnavailable(e.to_string())),
        }
    }

    /// Flips the camera track's enabled flag; returns the new state.
    pub fn toggle_camera(&self) -> bool {
        !self.camera_enabled.fetch_xor(true, Ordering::SeqCst)
    }

    /// Flips the microphone track's enabled flag; returns the new state.
    /// No new permission request: the capture stream just starts or stops
    /// writing samples.
    pub fn toggle_microphone(&self) -> bool {
        !self.microphone_enabled.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn camera_enabled(&self) -> bool {
        self.camera_enabled.load(Ordering::SeqCst)
    }

    pub fn microphone_enabled(&self) -> bool {
        self.microphone_enabled.load(Ordering::SeqCst)
    }

    pub fn is_screen_sharing(&self) -> bool {
        self.screen_track
            .lock()
            .map(|g| g.is_some())
            .unwrap_or(false)
    }

    /// Creates the screen track and returns it so the caller can swap it
    /// into every peer link. Idempotent while a share is active.
    pub fn start_screen_share(&self) -> Arc<TrackLocalStaticSample> {
        let mut guard = self.screen_track.lock().expect("screen track lock");
        if let Some(track) = guard.as_ref() {
            return track.clone();
        }
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                ..Default::default()
            },
            "screen".to_owned(),
            self.stream_id.clone(),
        ));
        *guard = Some(track.clone());
        track
    }

    /// Discards the screen track. Returns the camera track to restore on
    /// every peer link, or `None` if no share was active.
    pub fn stop_screen_share(&self) -> Option<Arc<TrackLocalStaticSample>> {
        let mut guard = self.screen_track.lock().expect("screen track lock");
        guard.take().map(|_| self.camera_track.clone())
    }

    /// The track currently carried as outgoing video by every link: the
    /// screen track while sharing, the camera track otherwise.
    pub fn active_video_track(&self) -> Arc<TrackLocalStaticSample> {
        if let Ok(guard) = self.screen_track.lock() {
            if let Some(track) = guard.as_ref() {
                return track.clone();
            }
        }
        self.camera_track.clone()
    }

    pub fn audio_track(&self) -> Arc<TrackLocalStaticSample> {
        self.audio_track.clone()
    }

    pub fn camera_track(&self) -> Arc<TrackLocalStaticSample> {
        self.camera_track.clone()
    }

    /// Stops capture and drops the screen track. Safe to call more than
    /// once; part of session teardown, after peer links are closed.
    pub fn stop(&self) {
        if let Ok(mut guard) = self.capture.lock() {
            guard.take();
        }
        if let Ok(mut guard) = self.screen_track.lock() {
            guard.take();
        }
        self.camera_enabled.store(false, Ordering::SeqCst);
        self.microphone_enabled.store(false, Ordering::SeqCst);
    }
}
