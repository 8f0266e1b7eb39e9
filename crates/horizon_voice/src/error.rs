//! Error types for the voice routing engine.
//!
//! None of these errors ever abort a group: an operation that fails is logged
//! and leaves the group exactly as it was. The `Err` value only tells the
//! caller which contract it broke.

use crate::types::{GroupId, MemberId};

/// Enumeration of possible voice routing errors.
#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    /// The member is already part of the group
    #[error("Member {0} is already in the group")]
    AlreadyMember(MemberId),

    /// The member is not part of the group
    #[error("Member {0} is not in the group")]
    NotMember(MemberId),

    /// The group has an admission list and the member is not on it
    #[error("Member {0} is not admitted to the group")]
    NotAdmitted(MemberId),

    /// A state change was requested that is already in effect
    #[error("Member {member} already has {state} = {value}")]
    AlreadyInState {
        member: MemberId,
        state: &'static str,
        value: bool,
    },

    /// A positional operation was sent to a broadcast group
    #[error("Group {0} is not positional")]
    NotPositional(GroupId),

    /// No group with this id is registered
    #[error("Group {0} not found")]
    GroupNotFound(GroupId),

    /// A group with this id is already registered
    #[error("Group {0} already exists")]
    GroupExists(GroupId),

    /// A positional group was requested without a location source
    #[error("Positional group {0} requires a location source")]
    MissingLocationSource(GroupId),

    /// Configuration failed validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// The slot/listener/speaker triangle is out of sync
    #[error("Route inconsistency: {0}")]
    RouteInconsistency(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}
