//! # Group Core and Policy Seam
//!
//! [`GroupCore`] is the state every group has regardless of policy: the member
//! table, the route table and the sender. A [`VoicePolicy`] decides which
//! speakers each listener is offered, and in what order, and then hands that
//! ordered sequence to [`recompute_voices_from_speakers`], the slot assignment
//! both policies share.
//!
//! Everything in this module runs with the group lock held.

use crate::error::VoiceError;
use crate::group::VoiceGroupStats;
use crate::member::GroupMember;
use crate::routes::VoiceRoutes;
use crate::sender::VoiceSender;
use crate::types::{GroupId, InstanceId, MemberId, VoiceEndpoint, VoiceNumber};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Policy-independent state of one voice group.
pub struct GroupCore {
    pub group_id: GroupId,
    pub positional: bool,
    pub members: HashMap<MemberId, GroupMember>,
    pub routes: VoiceRoutes,
    pub stats: VoiceGroupStats,
    sender: Arc<dyn VoiceSender>,
    next_index: u64,
}

impl GroupCore {
    pub fn new(
        group_id: GroupId,
        max_voices: u8,
        positional: bool,
        sender: Arc<dyn VoiceSender>,
    ) -> Self {
        Self {
            group_id,
            positional,
            members: HashMap::new(),
            routes: VoiceRoutes::new(max_voices),
            stats: VoiceGroupStats::default(),
            sender,
            next_index: 0,
        }
    }

    pub fn max_voices(&self) -> u8 {
        self.routes.max_voices()
    }

    pub fn sender(&self) -> &Arc<dyn VoiceSender> {
        &self.sender
    }

    /// Hands out admission indexes. Never reused, never reset.
    pub fn take_index(&mut self) -> u64 {
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    pub fn member(&self, member_id: MemberId) -> Option<&GroupMember> {
        self.members.get(&member_id)
    }

    /// Whether `listener` may hear `speaker`.
    ///
    /// Expunged or unknown members are never eligible. A member hears itself
    /// only if it opted into `listen_to_yourself`.
    pub fn eligible_pair(&self, speaker: MemberId, listener: MemberId) -> bool {
        let (Some(speaker), Some(listener)) = (self.members.get(&speaker), self.members.get(&listener))
        else {
            return false;
        };
        if speaker.expunged || listener.expunged {
            return false;
        }
        if speaker.member_id == listener.member_id {
            return listener.listen_to_yourself;
        }
        !listener.ignore_list.is_ignored(speaker.member_id)
    }

    /// Members currently listening, in admission order.
    pub fn listening_members(&self) -> Vec<MemberId> {
        let mut listening: Vec<&GroupMember> = self
            .members
            .values()
            .filter(|member| member.listening && !member.expunged)
            .collect();
        listening.sort_by_key(|member| member.index);
        listening.into_iter().map(|member| member.member_id).collect()
    }

    fn endpoint(&self, member_id: MemberId) -> Option<VoiceEndpoint> {
        self.members.get(&member_id).map(GroupMember::endpoint)
    }

    /// Routes `speaker` into a free slot of `listener` and notifies the pair.
    pub fn allocate_voice(&mut self, listener: MemberId, speaker: MemberId) -> Option<VoiceNumber> {
        let (Some(speaker_ep), Some(listener_ep)) = (self.endpoint(speaker), self.endpoint(listener))
        else {
            warn!("Refusing to route unknown member pair {} -> {}", speaker, listener);
            return None;
        };

        match self.routes.connect(listener, speaker) {
            Some(voice) => {
                self.stats.allocations += 1;
                debug!(
                    "🔊 Group {}: voice {} of {} now carries {}",
                    self.group_id, voice, listener, speaker
                );
                self.sender
                    .send_allocate(speaker_ep, listener_ep, voice, self.positional);
                Some(voice)
            }
            None => {
                self.stats.exhaustion_errors += 1;
                error!(
                    "Group {}: no free voice for speaker {} at listener {} ({} of {} slots in use)",
                    self.group_id,
                    speaker,
                    listener,
                    self.routes.occupied_count(listener),
                    self.max_voices()
                );
                None
            }
        }
    }

    /// Frees one slot of `listener` and notifies the pair that held it.
    pub fn release_voice(&mut self, listener: MemberId, voice: VoiceNumber) -> Option<MemberId> {
        let speaker = self.routes.disconnect(listener, voice)?;
        self.stats.deallocations += 1;
        debug!(
            "🔇 Group {}: voice {} of {} released from {}",
            self.group_id, voice, listener, speaker
        );
        match (self.endpoint(speaker), self.endpoint(listener)) {
            (Some(speaker_ep), Some(listener_ep)) => {
                self.sender.send_deallocate(speaker_ep, listener_ep, voice)
            }
            _ => warn!(
                "Group {}: released voice {} of {} without a known endpoint for {}",
                self.group_id, voice, listener, speaker
            ),
        }
        Some(speaker)
    }

    /// Empties every slot of `listener`.
    pub fn release_all_voices(&mut self, listener: MemberId) {
        for (voice, _) in self.routes.occupied(listener) {
            self.release_voice(listener, voice);
        }
    }

    /// Removes `speaker` from every listener that still hears it.
    pub fn release_speaker(&mut self, speaker: MemberId) {
        let listeners: Vec<MemberId> = self.routes.listeners_of(speaker).collect();
        for listener in listeners {
            if let Some(voice) = self.routes.voice_number(listener, speaker) {
                self.release_voice(listener, voice);
            }
        }
    }
}

/// Assigns `listener`'s slots from an ordered candidate sequence.
///
/// Candidates must already be in preference order. The first `max_voices`
/// eligible, actively speaking candidates are kept; occupants that are not
/// among them lose their slot, and kept candidates without a slot get the
/// lowest free one. Occupants that stay keep their voice number.
///
/// Every occupant outside the kept set is released and notified, including
/// occupants that are no longer eligible (ignored or expunged).
///
/// A listener that is not listening ends up with every slot empty.
pub fn recompute_voices_from_speakers<I>(core: &mut GroupCore, listener: MemberId, candidates: I)
where
    I: IntoIterator<Item = MemberId>,
{
    let Some(member) = core.members.get(&listener) else {
        warn!("Group {}: recompute for unknown listener {}", core.group_id, listener);
        return;
    };

    if !member.listening || member.expunged {
        core.release_all_voices(listener);
        return;
    }

    let max_voices = core.max_voices() as usize;
    let mut desired: SmallVec<[MemberId; 8]> = SmallVec::new();
    for speaker in candidates {
        if desired.len() >= max_voices {
            break;
        }
        if desired.contains(&speaker) {
            continue;
        }
        let active = core
            .members
            .get(&speaker)
            .map(GroupMember::is_active_speaker)
            .unwrap_or(false);
        if active && core.eligible_pair(speaker, listener) {
            desired.push(speaker);
        }
    }

    for (voice, occupant) in core.routes.occupied(listener) {
        if !desired.contains(&occupant) {
            core.release_voice(listener, voice);
        }
    }

    for speaker in desired {
        if core.routes.voice_number(listener, speaker).is_none() {
            core.allocate_voice(listener, speaker);
        }
    }
}

/// Strategy deciding which speakers each listener is offered.
///
/// The group sets the member flags before calling `change_speaking` and
/// `change_listening`; the policy only reacts to the new state.
pub trait VoicePolicy: Send {
    /// Whether allocations are announced as positional channels.
    fn is_positional(&self) -> bool;

    fn member_added(&mut self, core: &mut GroupCore, member_id: MemberId);

    /// Called after the member stopped speaking and listening, before it
    /// leaves the member table.
    fn member_removed(&mut self, core: &mut GroupCore, member_id: MemberId);

    fn change_speaking(&mut self, core: &mut GroupCore, member_id: MemberId, start: bool);

    fn change_listening(&mut self, core: &mut GroupCore, member_id: MemberId, start: bool) {
        if start {
            self.recompute_listener_voices(core, member_id);
        } else {
            core.release_all_voices(member_id);
        }
    }

    fn recompute_listener_voices(&mut self, core: &mut GroupCore, listener: MemberId);

    /// A member's priority, ignore list or self-listening flag changed.
    fn speaker_preferences_changed(&mut self, core: &mut GroupCore, member_id: MemberId);

    fn update_world_node(&mut self, core: &mut GroupCore, _member_id: MemberId) -> Result<(), VoiceError> {
        Err(VoiceError::NotPositional(core.group_id))
    }

    fn maybe_change_perceived_object(
        &mut self,
        core: &mut GroupCore,
        _perceiver: MemberId,
        _perceived: MemberId,
        _gained: bool,
    ) -> Result<(), VoiceError> {
        Err(VoiceError::NotPositional(core.group_id))
    }

    fn remove_tracked_perceiver(&mut self, core: &mut GroupCore, _member_id: MemberId) -> Result<(), VoiceError> {
        Err(VoiceError::NotPositional(core.group_id))
    }

    /// Returns how many members were placed in the unloaded instance.
    fn unload_instance(&mut self, core: &mut GroupCore, _instance: InstanceId) -> Result<usize, VoiceError> {
        Err(VoiceError::NotPositional(core.group_id))
    }

    /// Members currently within audible range of `member_id`, if positional.
    fn members_in_radius(&self, _member_id: MemberId) -> Option<Vec<MemberId>> {
        None
    }
}
