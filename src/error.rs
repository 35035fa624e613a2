use thiserror::Error;

/// Failure taxonomy for a meeting session.
///
/// Stale signaling events (offers, answers or candidates referencing an
/// unknown or already-closed link) are not errors: they are dropped silently
/// by the peer link manager, since membership churn makes them routine.
#[derive(Debug, Error)]
pub enum MeetingError {
    /// Camera/microphone could not be acquired. Non-fatal: the session
    /// continues without the affected media.
    #[error("media unavailable: {0}")]
    MediaUnavailable(String),

    /// The signaling channel could not be established or was refused.
    #[error("signaling unavailable: {0}")]
    SignalingUnavailable(String),

    /// Negotiation with a specific remote peer failed. The affected link is
    /// closed; other links and the session are unaffected.
    #[error("negotiation with {peer} failed: {source}")]
    Negotiation {
        peer: String,
        #[source]
        source: webrtc::Error,
    },

    /// WebRTC engine setup failure (codec registration, connection creation).
    #[error("webrtc error: {0}")]
    Rtc(#[from] webrtc::Error),
}

pub type Result<T> = std::result::Result<T, MeetingError>;
