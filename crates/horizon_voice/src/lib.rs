//! # Horizon Voice
//!
//! Voice channel routing for the Horizon game server. The engine decides, for
//! every listener, which speakers occupy its small fixed set of incoming voice
//! slots, and keeps that assignment up to date as members join, leave, start
//! or stop speaking, and move through the world.
//!
//! ## Core Features
//!
//! - **Broadcast Groups**: One group-wide speaker list ordered by priority
//! - **Proximity Groups**: Per-listener speaker sets driven by distance, with
//!   hysteresis so speakers near the edge of range don't flap
//! - **Stable Slots**: A speaker keeps its voice number for as long as it stays routed
//! - **Instance Isolation**: Members in different spatial instances never hear each other
//! - **Ignore Lists**: Listeners can mute individual speakers
//!
//! ## Architecture Overview
//!
//! - [`VoiceGroup`] owns a member table and a route table behind one lock
//! - A policy ([`broadcast`] or [`proximity`]) produces an ordered candidate list per listener
//! - [`policy::recompute_voices_from_speakers`] turns that list into allocate/deallocate notifications
//! - The embedding server implements [`VoiceSender`] (network side) and
//!   [`LocationSource`] (world side)
//!
//! ## Quick Start Example
//!
//! ```rust,no_run
//! use horizon_voice::*;
//! use std::sync::Arc;
//!
//! struct LogSender;
//! impl VoiceSender for LogSender {
//!     fn send_allocate(&self, s: VoiceEndpoint, l: VoiceEndpoint, voice: u8, _positional: bool) {
//!         println!("{} hears {} on voice {}", l.member_id, s.member_id, voice);
//!     }
//!     fn send_deallocate(&self, _s: VoiceEndpoint, _l: VoiceEndpoint, _voice: u8) {}
//!     fn send_voice_frame(&self, _s: VoiceEndpoint, _l: VoiceEndpoint, _voice: u8, _frame: &[u8]) {}
//!     fn send_control_broadcast(&self, _event: &VoiceControlEvent) {}
//! }
//!
//! # fn main() -> Result<(), VoiceError> {
//! let group = VoiceGroup::new(VoiceGroupSettings::broadcast(4), Arc::new(LogSender), None)?;
//! let (alice, bob) = (MemberId::new(), MemberId::new());
//! group.add_member(alice, 1, Some(5), true)?;
//! group.add_member(bob, 2, None, false)?;
//! group.set_listener(bob, true)?;
//! group.set_member_speaking(alice, true)?;
//! group.send_voice_frame_to_listeners(alice, &[0u8; 40]);
//! # Ok(())
//! # }
//! ```

pub mod broadcast;
pub mod config;
pub mod error;
pub mod group;
pub mod logging;
pub mod member;
pub mod policy;
pub mod proximity;
pub mod registry;
pub mod routes;
pub mod sender;
pub mod types;

pub use config::{LoggingSettings, ProximitySettings, VoiceConfig, VoiceGroupSettings};
pub use error::VoiceError;
pub use group::{VoiceGroup, VoiceGroupStats};
pub use logging::setup_logging;
pub use member::MemberFlags;
pub use registry::VoiceGroupRegistry;
pub use sender::{LocationSource, VoiceControlEvent, VoiceSender};
pub use types::{ConnectionId, GroupId, InstanceId, MemberId, Vec3, VoiceEndpoint, VoiceNumber};

#[cfg(test)]
mod tests;
