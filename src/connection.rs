use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

/// Lifecycle of the signaling connection / session as a whole. Individual
/// peer links track their own negotiation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    /// The transport failed. The core does not retry; the caller owns
    /// reconnection policy.
    Failed,
    /// Clean termination: local `end()` or a host-issued meeting-ended.
    Ended,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "Disconnected"),
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::Connected => write!(f, "Connected"),
            SessionState::Failed => write!(f, "Failed"),
            SessionState::Ended => write!(f, "Ended"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub state: SessionState,
    pub media_error: Option<String>,
    pub last_error: Option<String>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            state: SessionState::Disconnected,
            media_error: None,
            last_error: None,
        }
    }
}

/// Watch-channel publisher for session status; cheap to clone into tasks.
#[derive(Clone)]
pub struct SessionMonitor {
    status: Arc<watch::Sender<SessionStatus>>,
    receiver: watch::Receiver<SessionStatus>,
}

impl SessionMonitor {
    pub fn new() -> Self {
        let (status, receiver) = watch::channel(SessionStatus::default());
        Self {
            status: Arc::new(status),
            receiver,
        }
    }

    pub fn set_state(&self, state: SessionState) {
        self.status.send_modify(|status| {
            status.state = state;
        });
    }

    /// Media failures are status, not termination: the session keeps running
    /// without the affected track.
    pub fn set_media_error(&self, error: String) {
        self.status.send_modify(|status| {
            status.media_error = Some(error);
        });
    }

    pub fn set_error(&self, error: String) {
        self.status.send_modify(|status| {
            status.last_error = Some(error);
        });
    }

    pub fn current(&self) -> SessionStatus {
        self.receiver.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.receiver.clone()
    }
}

impl Default for SessionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions_are_observable() {
        let monitor = SessionMonitor::new();
        let mut rx = monitor.subscribe();

        monitor.set_state(SessionState::Connecting);
        assert_eq!(rx.borrow_and_update().state, SessionState::Connecting);

        monitor.set_state(SessionState::Connected);
        monitor.set_error("gateway rejected update".into());
        let status = monitor.current();
        assert_eq!(status.state, SessionState::Connected);
        assert_eq!(status.last_error.as_deref(), Some("gateway rejected update"));
    }

    #[test]
    fn media_error_does_not_change_state() {
        let monitor = SessionMonitor::new();
        monitor.set_state(SessionState::Connected);
        monitor.set_media_error("no input device".into());

        let status = monitor.current();
        assert_eq!(status.state, SessionState::Connected);
        assert_eq!(status.media_error.as_deref(), Some("no input device"));
    }
}
