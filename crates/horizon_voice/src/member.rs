//! Per-participant state shared by both group policies.
//!
//! Slot assignments are not stored here; they live in
//! [`VoiceRoutes`](crate::routes::VoiceRoutes) so that the listener, slot and
//! speaker views of one route can only change together.

use crate::types::{ConnectionId, MemberId, VoiceEndpoint};
use std::collections::HashSet;

/// A participant in a voice group.
#[derive(Debug, Clone)]
pub struct GroupMember {
    pub member_id: MemberId,
    pub connection: ConnectionId,
    /// Admission sequence number; breaks priority and distance ties.
    pub index: u64,
    /// Higher wins.
    pub priority: i32,
    pub allowed_speaker: bool,
    pub speaking: bool,
    pub listening: bool,
    /// Set once the member must no longer be routed, even if a stale
    /// reference to it survives somewhere.
    pub expunged: bool,
    pub listen_to_yourself: bool,
    pub ignore_list: IgnoreList,
}

impl GroupMember {
    pub fn new(
        member_id: MemberId,
        connection: ConnectionId,
        index: u64,
        priority: i32,
        allowed_speaker: bool,
    ) -> Self {
        Self {
            member_id,
            connection,
            index,
            priority,
            allowed_speaker,
            speaking: false,
            listening: false,
            expunged: false,
            listen_to_yourself: false,
            ignore_list: IgnoreList::default(),
        }
    }

    pub fn endpoint(&self) -> VoiceEndpoint {
        VoiceEndpoint {
            member_id: self.member_id,
            connection: self.connection,
        }
    }

    /// True while the member may be offered to listeners as a speaker.
    pub fn is_active_speaker(&self) -> bool {
        self.allowed_speaker && self.speaking && !self.expunged
    }

    pub fn flags(&self) -> MemberFlags {
        MemberFlags {
            priority: self.priority,
            allowed_speaker: self.allowed_speaker,
            speaking: self.speaking,
            listening: self.listening,
        }
    }
}

/// Copy of the externally visible member flags, readable without the group lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberFlags {
    pub priority: i32,
    pub allowed_speaker: bool,
    pub speaking: bool,
    pub listening: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum IgnoreDelta {
    Add(Vec<MemberId>),
    Remove(Vec<MemberId>),
}

/// Speakers a listener has muted.
///
/// Clients may send incremental updates before the authoritative list has been
/// loaded. Those deltas are queued and replayed on top of the baseline once it
/// arrives.
#[derive(Debug, Clone, Default)]
pub struct IgnoreList {
    ignored: Option<HashSet<MemberId>>,
    pending: Vec<IgnoreDelta>,
}

impl IgnoreList {
    pub fn is_initialized(&self) -> bool {
        self.ignored.is_some()
    }

    /// An uninitialized list ignores nobody.
    pub fn is_ignored(&self, speaker: MemberId) -> bool {
        self.ignored
            .as_ref()
            .map(|ignored| ignored.contains(&speaker))
            .unwrap_or(false)
    }

    /// Installs the authoritative list and replays any queued deltas in order.
    pub fn initialize(&mut self, baseline: impl IntoIterator<Item = MemberId>) {
        let mut ignored: HashSet<MemberId> = baseline.into_iter().collect();
        for delta in self.pending.drain(..) {
            match delta {
                IgnoreDelta::Add(ids) => ignored.extend(ids),
                IgnoreDelta::Remove(ids) => {
                    for id in ids {
                        ignored.remove(&id);
                    }
                }
            }
        }
        self.ignored = Some(ignored);
    }

    /// Applies an update, or queues it if the baseline has not arrived yet.
    ///
    /// Returns `true` if the update took effect immediately.
    pub fn apply_update(&mut self, added: Vec<MemberId>, removed: Vec<MemberId>) -> bool {
        match self.ignored.as_mut() {
            Some(ignored) => {
                ignored.extend(added);
                for id in &removed {
                    ignored.remove(id);
                }
                true
            }
            None => {
                if !added.is_empty() {
                    self.pending.push(IgnoreDelta::Add(added));
                }
                if !removed.is_empty() {
                    self.pending.push(IgnoreDelta::Remove(removed));
                }
                false
            }
        }
    }

    pub fn pending_updates(&self) -> usize {
        self.pending.len()
    }
}
