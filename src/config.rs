/// STUN servers used when the caller does not supply its own ICE set.
pub const DEFAULT_STUN_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// Everything needed to start a meeting session. The meeting id and user id
/// come from the platform's REST layer; this crate only consumes them.
#[derive(Debug, Clone)]
pub struct MeetingConfig {
    /// Base URL of the signaling server, e.g. `ws://127.0.0.1:8080`.
    pub server_url: String,
    pub meeting_id: String,
    pub user_id: String,
    /// STUN/TURN URLs handed to every peer connection.
    pub ice_servers: Vec<String>,
}

impl MeetingConfig {
    pub fn new(
        server_url: impl Into<String>,
        meeting_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            meeting_id: meeting_id.into(),
            user_id: user_id.into(),
            ice_servers: DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Replaces the default STUN list. An empty list is valid and keeps
    /// negotiation on host candidates only.
    pub fn with_ice_servers(mut self, servers: Vec<String>) -> Self {
        self.ice_servers = servers;
        self
    }
}
