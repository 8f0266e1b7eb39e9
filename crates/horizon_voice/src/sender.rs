//! Interfaces the surrounding server implements for the routing engine.
//!
//! The engine decides who is wired to whom; everything that touches a socket or
//! the world simulation sits behind these traits.

use crate::types::{GroupId, InstanceId, MemberId, Vec3, VoiceEndpoint, VoiceNumber};
use serde::{Deserialize, Serialize};

/// Outgoing side of the engine.
///
/// Implementations must not block: calls are made from the thread that
/// delivered the triggering event, and allocate/deallocate notifications are
/// issued while the group lock is held. Frames are sent after the lock has
/// been released.
pub trait VoiceSender: Send + Sync {
    /// Tells `listener` that `speaker` now occupies slot `voice`.
    fn send_allocate(
        &self,
        speaker: VoiceEndpoint,
        listener: VoiceEndpoint,
        voice: VoiceNumber,
        positional: bool,
    );

    /// Tells `listener` that slot `voice`, held by `speaker`, is closed.
    fn send_deallocate(&self, speaker: VoiceEndpoint, listener: VoiceEndpoint, voice: VoiceNumber);

    /// Forwards one voice frame from `speaker` to `listener` on slot `voice`.
    fn send_voice_frame(
        &self,
        speaker: VoiceEndpoint,
        listener: VoiceEndpoint,
        voice: VoiceNumber,
        frame: &[u8],
    );

    /// Broadcasts a group membership notification.
    fn send_control_broadcast(&self, event: &VoiceControlEvent);
}

/// World-position lookup used by proximity groups.
pub trait LocationSource: Send + Sync {
    /// Current location of the member, or `None` if it is not placed.
    fn current_location(&self, member_id: MemberId) -> Option<Vec3>;

    /// Spatial instance the member is currently in, or `None` mid-transfer.
    fn instance_id(&self, member_id: MemberId) -> Option<InstanceId>;
}

/// Membership notifications emitted after a member joins or leaves a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum VoiceControlEvent {
    MemberAdded {
        group_id: GroupId,
        member_id: MemberId,
        priority: i32,
        allowed_speaker: bool,
        positional: bool,
    },
    MemberRemoved {
        group_id: GroupId,
        member_id: MemberId,
    },
}

impl VoiceControlEvent {
    /// Member the notification is about.
    pub fn member_id(&self) -> MemberId {
        match self {
            Self::MemberAdded { member_id, .. } | Self::MemberRemoved { member_id, .. } => *member_id,
        }
    }

    /// Serializes the event to the JSON shape clients receive.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
