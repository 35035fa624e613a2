mod state;

pub use state::{Participant, ParticipantRegistry, ParticipantRole};
