use crate::{EffectivePlayback, RoomId, UserId};

/// Events emitted by the collab system, fanned out by the [crate::Bus].
#[derive(Debug, Clone, PartialEq)]
pub enum CollabEvent {
    /// Users joined or left a room
    MembersUpdated {
        room_id: RoomId,
        /// The full member list, in join order
        members: Vec<UserId>,
    },
    /// The room owner changed what is playing
    PlaybackUpdate {
        room_id: RoomId,
        /// The committed state, positioned at the moment it was started
        playback: EffectivePlayback,
    },
    /// The set of users with an open realtime connection changed
    OnlineUsersChanged { users: Vec<UserId> },
}

impl CollabEvent {
    /// The room this event belongs to, or [None] for global events
    pub fn room_id(&self) -> Option<&str> {
        match self {
            Self::MembersUpdated { room_id, .. } => Some(room_id),
            Self::PlaybackUpdate { room_id, .. } => Some(room_id),
            Self::OnlineUsersChanged { .. } => None,
        }
    }
}
