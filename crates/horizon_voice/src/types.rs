//! # Core Type Definitions
//!
//! Identifiers and small value types shared by every part of the voice
//! routing engine.
//!
//! ## Key Types
//!
//! - [`MemberId`] - Unique identifier for a participant in a voice group
//! - [`GroupId`] - Unique identifier for a voice group
//! - [`InstanceId`] - Identifier of an isolated copy of a spatial area
//! - [`Vec3`] - 3D position used by proximity groups
//! - [`VoiceEndpoint`] - Opaque destination handed to the [`VoiceSender`](crate::VoiceSender)
//!
//! ## Design Principles
//!
//! - **Type Safety**: Wrapper types prevent ID confusion (MemberId vs GroupId)
//! - **Serialization**: IDs serialize as plain UUID strings for config files and control messages

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Connection handle of a member, assigned by the network layer.
///
/// The engine never inspects it; it is only carried through to the sender.
pub type ConnectionId = usize;

/// A listener-private incoming channel slot number.
///
/// Slots run from `0` to `max_voices - 1` and are reused once freed.
pub type VoiceNumber = u8;

/// Unique identifier for a member of a voice group.
///
/// # Examples
///
/// ```rust
/// use horizon_voice::MemberId;
///
/// let member_id = MemberId::new();
/// let parsed = MemberId::from_str(&member_id.to_string())?;
/// assert_eq!(member_id, parsed);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberId(pub Uuid);

impl MemberId {
    /// Creates a new random member ID using UUID v4.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses a member ID from a string representation.
    ///
    /// # Returns
    ///
    /// Returns `Ok(MemberId)` if the string is a valid UUID, otherwise returns
    /// `Err(uuid::Error)` with details about the parsing failure.
    pub fn from_str(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl std::str::FromStr for MemberId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for MemberId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a voice group.
///
/// Members of different groups never interact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub Uuid);

impl GroupId {
    /// Creates a new random group ID using UUID v4.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GroupId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a spatial instance.
///
/// Proximity is only ever evaluated between members placed in the same instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub Uuid);

impl InstanceId {
    /// Creates a new random instance ID using UUID v4.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Represents a 3D position in the game world.
///
/// # Examples
///
/// ```rust
/// use horizon_voice::Vec3;
///
/// let a = Vec3::new(0.0, 0.0, 0.0);
/// let b = Vec3::new(3.0, 4.0, 0.0);
/// assert_eq!(a.distance(b), 5.0);
/// assert_eq!(a.distance_squared(b), 25.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    /// X coordinate (typically east-west axis)
    pub x: f64,
    /// Y coordinate (typically vertical axis)
    pub y: f64,
    /// Z coordinate (typically north-south axis)
    pub z: f64,
}

impl Vec3 {
    /// Creates a new Vec3 with the specified coordinates.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Creates a zero vector (0, 0, 0).
    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// Squared Euclidean distance, used as the proximity sort key.
    pub fn distance_squared(&self, other: Vec3) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }

    /// Euclidean distance to another position.
    pub fn distance(&self, other: Vec3) -> f64 {
        self.distance_squared(other).sqrt()
    }
}

impl Default for Vec3 {
    fn default() -> Self {
        Self::zero()
    }
}

/// Destination for a voice control message or frame.
///
/// Pairs the member with the connection it was admitted on so the sender can
/// route without another lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceEndpoint {
    pub member_id: MemberId,
    pub connection: ConnectionId,
}
