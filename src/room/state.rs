use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Host,
    #[default]
    Attendee,
}

/// One member of the meeting roster, as delivered by the signaling server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: String,
    #[serde(default)]
    pub display_name: String,
    pub is_active: bool,
    #[serde(default)]
    pub has_camera: bool,
    #[serde(default)]
    pub has_microphone: bool,
    #[serde(default)]
    pub is_screen_sharing: bool,
    #[serde(default)]
    pub role: ParticipantRole,
}

impl Participant {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: String::new(),
            is_active: true,
            has_camera: false,
            has_microphone: false,
            is_screen_sharing: false,
            role: ParticipantRole::Attendee,
        }
    }
}

/// Locally-cached, authoritative view of room membership.
///
/// Participants are never deleted, only marked inactive, so chat history can
/// keep attributing messages to people who have left.
#[derive(Debug, Default)]
pub struct ParticipantRegistry {
    by_id: BTreeMap<String, Participant>,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a full roster snapshot. Known participants missing from the
    /// snapshot are marked inactive; the snapshot is authoritative for who
    /// is currently in the room.
    pub fn apply_snapshot(&mut self, participants: Vec<Participant>) {
        for p in self.by_id.values_mut() {
            if !participants.iter().any(|s| s.user_id == p.user_id) {
                p.is_active = false;
            }
        }
        for p in participants {
            self.upsert(p);
        }
    }

    pub fn upsert(&mut self, participant: Participant) {
        self.by_id.insert(participant.user_id.clone(), participant);
    }

    pub fn mark_left(&mut self, user_id: &str) {
        if let Some(p) = self.by_id.get_mut(user_id) {
            p.is_active = false;
            p.is_screen_sharing = false;
        }
    }

    /// Status updates for unknown ids are ignored: the update raced ahead of
    /// the membership event that introduces the participant.
    pub fn update_status(
        &mut self,
        user_id: &str,
        has_camera: bool,
        has_microphone: bool,
        is_screen_sharing: bool,
    ) {
        if let Some(p) = self.by_id.get_mut(user_id) {
            p.has_camera = has_camera;
            p.has_microphone = has_microphone;
            p.is_screen_sharing = is_screen_sharing;
        }
    }

    pub fn set_screen_sharing(&mut self, user_id: &str, sharing: bool) {
        if let Some(p) = self.by_id.get_mut(user_id) {
            p.is_screen_sharing = sharing;
        }
    }

    pub fn get(&self, user_id: &str) -> Option<&Participant> {
        self.by_id.get(user_id)
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.by_id.values().cloned().collect()
    }

    /// The derived roster: ids of everyone currently active.
    pub fn active_roster(&self) -> Vec<String> {
        self.by_id
            .values()
            .filter(|p| p.is_active)
            .map(|p| p.user_id.clone())
            .collect()
    }
}
