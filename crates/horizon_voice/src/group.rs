//! # Voice Groups
//!
//! A [`VoiceGroup`] owns one group's members and routes behind a single
//! mutex. Every state change runs to completion under that lock, so two
//! recomputes for the same listener can never interleave. Groups are
//! independent of each other.
//!
//! Caller mistakes (changing a flag to the value it already has, addressing a
//! non-member) are logged and leave the group untouched. The returned error
//! only tells the caller what happened. Asking to speak without permission is
//! logged and ignored without an error.
//!
//! Flag queries such as [`VoiceGroup::is_listening`] read a mirror that is
//! updated under the lock but read without it, so their answer may already
//! be stale when it arrives.

use crate::broadcast::BroadcastPolicy;
use crate::config::VoiceGroupSettings;
use crate::error::VoiceError;
use crate::member::{GroupMember, MemberFlags};
use crate::policy::{GroupCore, VoicePolicy};
use crate::proximity::ProximityPolicy;
use crate::sender::{LocationSource, VoiceControlEvent, VoiceSender};
use crate::types::{ConnectionId, GroupId, InstanceId, MemberId, VoiceEndpoint, VoiceNumber};
use dashmap::DashMap;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, trace, warn};

/// Counters describing a group's routing activity.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VoiceGroupStats {
    pub members_added: u64,
    pub members_removed: u64,
    pub allocations: u64,
    pub deallocations: u64,
    pub frames_forwarded: u64,
    pub frames_dropped: u64,
    /// Desired speakers left unheard because no slot was free
    pub exhaustion_errors: u64,
}

struct GroupInner {
    core: GroupCore,
    policy: Box<dyn VoicePolicy>,
}

/// One voice group: a broadcast or proximity policy over a shared core.
pub struct VoiceGroup {
    group_id: GroupId,
    settings: VoiceGroupSettings,
    allowed_members: Option<HashSet<MemberId>>,
    sender: Arc<dyn VoiceSender>,
    flags: DashMap<MemberId, MemberFlags>,
    inner: Mutex<GroupInner>,
}

impl std::fmt::Debug for VoiceGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceGroup")
            .field("group_id", &self.group_id)
            .field("positional", &self.settings.is_positional())
            .field("max_voices", &self.settings.max_voices)
            .field("members", &self.flags.len())
            .finish()
    }
}

impl VoiceGroup {
    /// Creates a group from its settings.
    ///
    /// Settings with a `proximity` section create a proximity group, which
    /// needs a location source; everything else creates a broadcast group.
    pub fn new(
        mut settings: VoiceGroupSettings,
        sender: Arc<dyn VoiceSender>,
        locator: Option<Arc<dyn LocationSource>>,
    ) -> Result<Self, VoiceError> {
        settings.validate()?;
        let group_id = *settings.group_id.get_or_insert_with(GroupId::new);

        let policy: Box<dyn VoicePolicy> = match settings.proximity {
            Some(proximity) => {
                let locator = locator.ok_or(VoiceError::MissingLocationSource(group_id))?;
                Box::new(ProximityPolicy::new(proximity, locator))
            }
            None => Box::new(BroadcastPolicy::new()),
        };
        let core = GroupCore::new(
            group_id,
            settings.max_voices,
            policy.is_positional(),
            Arc::clone(&sender),
        );

        info!(
            "🎙️ Created {} voice group {} with {} voices per listener",
            if settings.is_positional() { "proximity" } else { "broadcast" },
            group_id,
            settings.max_voices
        );

        Ok(Self {
            group_id,
            allowed_members: settings
                .allowed_members
                .as_ref()
                .map(|members| members.iter().copied().collect()),
            settings,
            sender,
            flags: DashMap::new(),
            inner: Mutex::new(GroupInner { core, policy }),
        })
    }

    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    pub fn is_positional(&self) -> bool {
        self.settings.is_positional()
    }

    pub fn max_voices(&self) -> u8 {
        self.settings.max_voices
    }

    pub fn settings(&self) -> &VoiceGroupSettings {
        &self.settings
    }

    fn locked<R>(&self, f: impl FnOnce(&mut GroupCore, &mut dyn VoicePolicy) -> R) -> R {
        let mut inner = self.inner.lock();
        let GroupInner { core, policy } = &mut *inner;
        f(core, policy.as_mut())
    }

    fn sync_flags(&self, core: &GroupCore, member_id: MemberId) {
        if let Some(member) = core.member(member_id) {
            self.flags.insert(member_id, member.flags());
        }
    }

    fn lookup<'a>(&self, core: &'a mut GroupCore, member_id: MemberId) -> Result<&'a mut GroupMember, VoiceError> {
        core.members.get_mut(&member_id).ok_or_else(|| {
            warn!("Group {}: member {} not found", self.group_id, member_id);
            VoiceError::NotMember(member_id)
        })
    }

    fn already(&self, member_id: MemberId, state: &'static str, value: bool) -> VoiceError {
        warn!(
            "Group {}: assertion failed, member {} already has {} = {}",
            self.group_id, member_id, state, value
        );
        VoiceError::AlreadyInState {
            member: member_id,
            state,
            value,
        }
    }

    /// Admits a member.
    ///
    /// `priority` falls back to the group's default priority. Interested
    /// systems learn about the new member through a
    /// [`VoiceControlEvent::MemberAdded`] broadcast.
    pub fn add_member(
        &self,
        member_id: MemberId,
        connection: ConnectionId,
        priority: Option<i32>,
        allowed_speaker: bool,
    ) -> Result<(), VoiceError> {
        if let Some(allowed) = &self.allowed_members {
            if !allowed.contains(&member_id) {
                warn!("Group {}: member {} is not on the admission list", self.group_id, member_id);
                return Err(VoiceError::NotAdmitted(member_id));
            }
        }

        let event = self.locked(|core, policy| {
            if core.members.contains_key(&member_id) {
                warn!("Group {}: member {} is already in the group", self.group_id, member_id);
                return Err(VoiceError::AlreadyMember(member_id));
            }

            let index = core.take_index();
            let priority = priority.unwrap_or(self.settings.default_priority);
            let mut member = GroupMember::new(member_id, connection, index, priority, allowed_speaker);
            member.listen_to_yourself = self.settings.listen_to_yourself;

            core.routes.add_listener(member_id);
            core.members.insert(member_id, member);
            core.stats.members_added += 1;
            self.sync_flags(core, member_id);
            policy.member_added(core, member_id);

            Ok(VoiceControlEvent::MemberAdded {
                group_id: self.group_id,
                member_id,
                priority,
                allowed_speaker,
                positional: policy.is_positional(),
            })
        })?;

        self.sender.send_control_broadcast(&event);
        info!(
            "👤 Member {} joined voice group {} (speaker: {})",
            member_id, self.group_id, allowed_speaker
        );
        Ok(())
    }

    /// Removes a member, first unwinding every route that touches it.
    ///
    /// Returns `false` if the member was not in the group.
    pub fn remove_member(&self, member_id: MemberId) -> bool {
        let removed = self.locked(|core, policy| {
            let Ok(member) = self.lookup(core, member_id) else {
                return false;
            };
            member.expunged = true;
            let (speaking, listening) = (member.speaking, member.listening);

            if speaking {
                if let Some(member) = core.members.get_mut(&member_id) {
                    member.speaking = false;
                }
                policy.change_speaking(core, member_id, false);
            }
            if listening {
                if let Some(member) = core.members.get_mut(&member_id) {
                    member.listening = false;
                }
                policy.change_listening(core, member_id, false);
            }
            policy.member_removed(core, member_id);

            core.release_all_voices(member_id);
            core.release_speaker(member_id);
            let leftovers = core.routes.remove_listener(member_id);
            if !leftovers.is_empty() {
                warn!(
                    "Group {}: {} routes of {} survived removal",
                    self.group_id,
                    leftovers.len(),
                    member_id
                );
            }

            core.members.remove(&member_id);
            core.stats.members_removed += 1;
            self.flags.remove(&member_id);
            true
        });

        if removed {
            self.sender.send_control_broadcast(&VoiceControlEvent::MemberRemoved {
                group_id: self.group_id,
                member_id,
            });
            info!("👋 Member {} left voice group {}", member_id, self.group_id);
        }
        removed
    }

    /// Grants or revokes speaking permission.
    ///
    /// Revoking it from a member that is speaking stops it speaking first.
    pub fn set_allowed_speaker(&self, member_id: MemberId, allow: bool) -> Result<(), VoiceError> {
        self.locked(|core, policy| {
            let member = self.lookup(core, member_id)?;
            if member.allowed_speaker == allow {
                return Err(self.already(member_id, "allowed_speaker", allow));
            }

            if !allow && member.speaking {
                member.speaking = false;
                policy.change_speaking(core, member_id, false);
            }
            if let Some(member) = core.members.get_mut(&member_id) {
                member.allowed_speaker = allow;
            }
            self.sync_flags(core, member_id);
            Ok(())
        })
    }

    /// Starts or stops a member speaking.
    ///
    /// A member without speaking permission that asks to start is logged and
    /// ignored; the call still returns `Ok`.
    pub fn set_member_speaking(&self, member_id: MemberId, start: bool) -> Result<(), VoiceError> {
        self.locked(|core, policy| {
            let member = self.lookup(core, member_id)?;
            if member.speaking == start {
                return Err(self.already(member_id, "speaking", start));
            }
            if start && !member.allowed_speaker {
                warn!(
                    "Group {}: member {} tried to speak without permission",
                    self.group_id, member_id
                );
                return Ok(());
            }

            member.speaking = start;
            policy.change_speaking(core, member_id, start);
            self.sync_flags(core, member_id);
            Ok(())
        })
    }

    /// Starts or stops a member listening.
    ///
    /// A member that stops listening loses every slot it held.
    pub fn set_listener(&self, member_id: MemberId, start: bool) -> Result<(), VoiceError> {
        self.locked(|core, policy| {
            let member = self.lookup(core, member_id)?;
            if member.listening == start {
                return Err(self.already(member_id, "listening", start));
            }

            member.listening = start;
            policy.change_listening(core, member_id, start);
            self.sync_flags(core, member_id);
            Ok(())
        })
    }

    /// Lets a member hear its own voice.
    pub fn set_listen_to_yourself(&self, member_id: MemberId, enabled: bool) -> Result<(), VoiceError> {
        self.locked(|core, policy| {
            let member = self.lookup(core, member_id)?;
            if member.listen_to_yourself == enabled {
                return Ok(());
            }
            member.listen_to_yourself = enabled;
            policy.speaker_preferences_changed(core, member_id);
            Ok(())
        })
    }

    /// Changes a member's priority and re-ranks the speakers it competes with.
    pub fn set_member_priority(&self, member_id: MemberId, priority: i32) -> Result<(), VoiceError> {
        self.locked(|core, policy| {
            let member = self.lookup(core, member_id)?;
            if member.priority == priority {
                return Ok(());
            }
            member.priority = priority;
            policy.speaker_preferences_changed(core, member_id);
            self.sync_flags(core, member_id);
            Ok(())
        })
    }

    /// Installs the authoritative ignore list of `member_id`.
    ///
    /// Updates received earlier are replayed on top of it.
    pub fn apply_ignore_list(&self, member_id: MemberId, ignored: Vec<MemberId>) -> Result<(), VoiceError> {
        self.locked(|core, policy| {
            let member = self.lookup(core, member_id)?;
            member.ignore_list.initialize(ignored);
            policy.recompute_listener_voices(core, member_id);
            Ok(())
        })
    }

    /// Applies an incremental ignore-list update, queueing it if the
    /// authoritative list has not been installed yet.
    pub fn update_ignore_list(
        &self,
        member_id: MemberId,
        added: Vec<MemberId>,
        removed: Vec<MemberId>,
    ) -> Result<(), VoiceError> {
        self.locked(|core, policy| {
            let member = self.lookup(core, member_id)?;
            if member.ignore_list.apply_update(added, removed) {
                policy.recompute_listener_voices(core, member_id);
            } else {
                trace!(
                    "Group {}: queued ignore update for {} until its list arrives",
                    self.group_id,
                    member_id
                );
            }
            Ok(())
        })
    }

    /// Forwards one voice frame to every listener currently holding a slot
    /// for `speaker`.
    ///
    /// The listener set is snapshotted under the lock; the sends happen after
    /// it is released. Frames from unknown members or members without speaking
    /// permission are dropped. Returns the number of frames handed to the
    /// sender.
    pub fn send_voice_frame_to_listeners(&self, speaker: MemberId, frame: &[u8]) -> usize {
        let snapshot = self.locked(|core, _| {
            let speaker_ep = core
                .member(speaker)
                .filter(|member| member.allowed_speaker && !member.expunged)
                .map(GroupMember::endpoint);
            let Some(speaker_ep) = speaker_ep else {
                core.stats.frames_dropped += 1;
                trace!("Group {}: dropped frame from {}", self.group_id, speaker);
                return None;
            };

            let mut targets: SmallVec<[(VoiceEndpoint, VoiceNumber); 8]> = SmallVec::new();
            for listener in core.routes.listeners_of(speaker) {
                if !core.eligible_pair(speaker, listener) {
                    continue;
                }
                let (Some(voice), Some(member)) =
                    (core.routes.voice_number(listener, speaker), core.member(listener))
                else {
                    continue;
                };
                targets.push((member.endpoint(), voice));
            }
            core.stats.frames_forwarded += targets.len() as u64;
            Some((speaker_ep, targets))
        });

        let Some((speaker_ep, targets)) = snapshot else {
            return 0;
        };
        for (listener_ep, voice) in &targets {
            self.sender.send_voice_frame(speaker_ep, *listener_ep, *voice, frame);
        }
        targets.len()
    }

    /// Re-reads a member's location and instance and re-tests proximity
    /// against everything it perceives or is perceived by.
    pub fn update_world_node(&self, member_id: MemberId) -> Result<(), VoiceError> {
        self.locked(|core, policy| policy.update_world_node(core, member_id))
            .inspect_err(|e| warn!("Group {}: update_world_node failed: {}", self.group_id, e))
    }

    /// Records that `perceiver` gained or lost sight of `perceived`.
    pub fn maybe_change_perceived_object(
        &self,
        perceiver: MemberId,
        perceived: MemberId,
        gained: bool,
    ) -> Result<(), VoiceError> {
        self.locked(|core, policy| policy.maybe_change_perceived_object(core, perceiver, perceived, gained))
            .inspect_err(|e| {
                warn!("Group {}: perception change failed: {}", self.group_id, e)
            })
    }

    /// Stops tracking a member spatially and strips it from every peer.
    pub fn remove_tracked_perceiver(&self, member_id: MemberId) -> Result<(), VoiceError> {
        self.locked(|core, policy| policy.remove_tracked_perceiver(core, member_id))
            .inspect_err(|e| {
                warn!("Group {}: remove_tracked_perceiver failed: {}", self.group_id, e)
            })
    }

    /// Expunges every member placed in `instance`.
    ///
    /// Returns the number of members affected.
    pub fn unload_instance(&self, instance: InstanceId) -> Result<usize, VoiceError> {
        self.locked(|core, policy| policy.unload_instance(core, instance))
            .inspect_err(|e| warn!("Group {}: unload_instance failed: {}", self.group_id, e))
    }

    pub fn is_member(&self, member_id: MemberId) -> bool {
        self.flags.contains_key(&member_id)
    }

    pub fn member_flags(&self, member_id: MemberId) -> Option<MemberFlags> {
        self.flags.get(&member_id).map(|flags| *flags)
    }

    pub fn is_allowed_speaker(&self, member_id: MemberId) -> bool {
        self.member_flags(member_id).map(|f| f.allowed_speaker).unwrap_or(false)
    }

    pub fn is_member_speaking(&self, member_id: MemberId) -> bool {
        self.member_flags(member_id).map(|f| f.speaking).unwrap_or(false)
    }

    pub fn is_listening(&self, member_id: MemberId) -> bool {
        self.member_flags(member_id).map(|f| f.listening).unwrap_or(false)
    }

    pub fn member_count(&self) -> usize {
        self.flags.len()
    }

    /// Members in admission order.
    pub fn member_ids(&self) -> Vec<MemberId> {
        self.locked(|core, _| {
            let mut members: Vec<&GroupMember> = core.members.values().collect();
            members.sort_by_key(|member| member.index);
            members.into_iter().map(|member| member.member_id).collect()
        })
    }

    /// Occupied slots of `listener` as `(voice number, speaker)`, by voice number.
    pub fn voice_assignments(&self, listener: MemberId) -> Vec<(VoiceNumber, MemberId)> {
        self.locked(|core, _| core.routes.occupied(listener).into_vec())
    }

    /// Listeners currently holding a slot for `speaker`, sorted by id.
    pub fn listeners_of(&self, speaker: MemberId) -> Vec<MemberId> {
        self.locked(|core, _| {
            let mut listeners: Vec<MemberId> = core.routes.listeners_of(speaker).collect();
            listeners.sort();
            listeners
        })
    }

    /// Speakers within audible range of `member_id`; `None` for broadcast groups.
    pub fn members_in_radius(&self, member_id: MemberId) -> Option<Vec<MemberId>> {
        self.locked(|_, policy| policy.members_in_radius(member_id))
    }

    pub fn stats(&self) -> VoiceGroupStats {
        self.locked(|core, _| core.stats)
    }

    /// Checks the route invariants: the three route views agree, no listener
    /// exceeds `max_voices`, and every route joins a listening member to an
    /// eligible, actively speaking member.
    pub fn verify_routes(&self) -> Result<(), VoiceError> {
        self.locked(|core, _| {
            core.routes.verify().map_err(VoiceError::RouteInconsistency)?;

            for listener in core.members.keys() {
                for (voice, speaker) in core.routes.occupied(*listener) {
                    let listening = core.member(*listener).map(|m| m.listening).unwrap_or(false);
                    let speaking = core
                        .member(speaker)
                        .map(GroupMember::is_active_speaker)
                        .unwrap_or(false);
                    if !listening || !speaking || !core.eligible_pair(speaker, *listener) {
                        return Err(VoiceError::RouteInconsistency(format!(
                            "voice {voice} of {listener} carries {speaker} (listening: {listening}, speaking: {speaking})"
                        )));
                    }
                }
            }

            if core.routes.route_count() > core.members.len() * core.max_voices() as usize {
                return Err(VoiceError::RouteInconsistency(
                    "routes reference members outside the group".to_string(),
                ));
            }
            Ok(())
        })
    }
}
