//! # Proximity Groups
//!
//! Positional groups where each listener draws from its own set of speakers
//! within audible range, nearest first.
//!
//! Range membership is maintained incrementally. Every movement or perception
//! change re-tests only the pairs it touches, and each direction of a pair
//! keeps its own hysteresis history:
//!
//! - a speaker enters a listener's range once closer than `radius - margin`
//! - it leaves once farther than `radius + margin`
//! - members in different instances, or without a known location, are never
//!   in range
//!
//! A speaker can only be in a listener's range while the listener perceives
//! it, so `in_radius` is always a subset of `perceived`.

use crate::config::ProximitySettings;
use crate::error::VoiceError;
use crate::policy::{recompute_voices_from_speakers, GroupCore, VoicePolicy};
use crate::sender::LocationSource;
use crate::types::{InstanceId, MemberId, Vec3};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Spatial tracking for one member of a proximity group.
#[derive(Debug, Clone, Default)]
pub struct ProximityState {
    pub location: Option<Vec3>,
    pub previous_location: Option<Vec3>,
    /// `None` while the member is not placed, e.g. mid-transfer.
    pub instance: Option<InstanceId>,
    /// Members this member's perception currently reports.
    pub perceived: HashSet<MemberId>,
    /// Reverse of `perceived`: members that currently perceive this one.
    pub perceived_by: HashSet<MemberId>,
    /// Perceived members within audible range; the candidate speaker pool.
    pub in_radius: HashSet<MemberId>,
}

/// Proximity policy.
pub struct ProximityPolicy {
    settings: ProximitySettings,
    locator: Arc<dyn LocationSource>,
    tracking: HashMap<MemberId, ProximityState>,
}

impl ProximityPolicy {
    pub fn new(settings: ProximitySettings, locator: Arc<dyn LocationSource>) -> Self {
        Self {
            settings,
            locator,
            tracking: HashMap::new(),
        }
    }

    pub fn settings(&self) -> &ProximitySettings {
        &self.settings
    }

    pub fn state(&self, member_id: MemberId) -> Option<&ProximityState> {
        self.tracking.get(&member_id)
    }

    /// Pulls the member's location and instance from the location source.
    ///
    /// Returns `true` if the member changed instance.
    fn refresh_location(&mut self, member_id: MemberId) -> bool {
        let location = self.locator.current_location(member_id);
        let instance = self.locator.instance_id(member_id);
        let state = self.tracking.entry(member_id).or_default();
        state.previous_location = state.location;
        state.location = location;
        let changed = state.instance != instance;
        state.instance = instance;
        changed
    }

    /// Whether `listener` should have `speaker` in range, given the current
    /// range state of that direction.
    fn should_hear(&self, listener: MemberId, speaker: MemberId) -> bool {
        let (Some(ls), Some(ss)) = (self.tracking.get(&listener), self.tracking.get(&speaker)) else {
            return false;
        };
        if !ls.perceived.contains(&speaker) {
            return false;
        }
        let (Some(here), Some(there)) = (ls.location, ss.location) else {
            return false;
        };
        match (ls.instance, ss.instance) {
            (Some(a), Some(b)) if a == b => {}
            _ => return false,
        }

        let distance = here.distance(there);
        let radius = self.settings.audible_radius;
        let margin = self.settings.hysteresis_margin;
        if ls.in_radius.contains(&speaker) {
            distance <= radius + margin
        } else {
            distance < radius - margin
        }
    }

    /// Re-tests both directions of the pair and recomputes whichever
    /// listener's range changed.
    fn test_proximity(&mut self, core: &mut GroupCore, a: MemberId, b: MemberId) {
        if a == b {
            return;
        }
        for (listener, speaker) in [(a, b), (b, a)] {
            let hears = self.should_hear(listener, speaker);
            let Some(state) = self.tracking.get_mut(&listener) else {
                continue;
            };
            let flipped = if hears {
                state.in_radius.insert(speaker)
            } else {
                state.in_radius.remove(&speaker)
            };
            if flipped {
                trace!(
                    "Group {}: {} {} range of {}",
                    core.group_id,
                    speaker,
                    if hears { "entered" } else { "left" },
                    listener
                );
                self.recompute_listener_voices(core, listener);
            }
        }
    }

    /// Strips `member_id` from every other member's perception and range,
    /// clears its own sets, and recomputes everyone whose range shrank.
    ///
    /// Scans the whole group rather than trusting the reverse index, so a
    /// member that vanished can never linger as a phantom speaker.
    fn strip_perceiver(&mut self, core: &mut GroupCore, member_id: MemberId) {
        let mut affected = Vec::new();
        for (peer, state) in self.tracking.iter_mut() {
            if *peer == member_id {
                continue;
            }
            state.perceived.remove(&member_id);
            state.perceived_by.remove(&member_id);
            if state.in_radius.remove(&member_id) {
                affected.push(*peer);
            }
        }

        let mut had_range = false;
        if let Some(state) = self.tracking.get_mut(&member_id) {
            had_range = !state.in_radius.is_empty();
            state.perceived.clear();
            state.perceived_by.clear();
            state.in_radius.clear();
        }

        affected.sort_by_key(|peer| core.member(*peer).map(|m| m.index).unwrap_or(u64::MAX));
        for peer in affected {
            self.recompute_listener_voices(core, peer);
        }
        if had_range || core.routes.occupied_count(member_id) > 0 {
            self.recompute_listener_voices(core, member_id);
        }
    }

    /// Listeners whose slot assignment may depend on `speaker`, in admission order.
    fn listeners_affected_by(&self, core: &GroupCore, speaker: MemberId) -> Vec<MemberId> {
        let mut affected: HashSet<MemberId> = core.routes.listeners_of(speaker).collect();
        if let Some(state) = self.tracking.get(&speaker) {
            for peer in &state.perceived_by {
                let in_range = self
                    .tracking
                    .get(peer)
                    .map(|p| p.in_radius.contains(&speaker))
                    .unwrap_or(false);
                if in_range {
                    affected.insert(*peer);
                }
            }
        }
        if core.member(speaker).map(|m| m.listen_to_yourself).unwrap_or(false) {
            affected.insert(speaker);
        }

        let mut affected: Vec<MemberId> = affected.into_iter().collect();
        affected.sort_by_key(|peer| core.member(*peer).map(|m| m.index).unwrap_or(u64::MAX));
        affected
    }
}

impl VoicePolicy for ProximityPolicy {
    fn is_positional(&self) -> bool {
        true
    }

    fn member_added(&mut self, core: &mut GroupCore, member_id: MemberId) {
        self.refresh_location(member_id);
        if let Some(state) = self.tracking.get(&member_id) {
            debug!(
                "Proximity group {} tracking {} at {:?} in instance {:?}",
                core.group_id, member_id, state.location, state.instance
            );
        }
    }

    fn member_removed(&mut self, core: &mut GroupCore, member_id: MemberId) {
        self.strip_perceiver(core, member_id);
        self.tracking.remove(&member_id);
    }

    fn change_speaking(&mut self, core: &mut GroupCore, member_id: MemberId, _start: bool) {
        for listener in self.listeners_affected_by(core, member_id) {
            self.recompute_listener_voices(core, listener);
        }
    }

    fn recompute_listener_voices(&mut self, core: &mut GroupCore, listener: MemberId) {
        let Some(state) = self.tracking.get(&listener) else {
            recompute_voices_from_speakers(core, listener, std::iter::empty());
            return;
        };

        let stale: Vec<MemberId> = state
            .in_radius
            .iter()
            .filter(|id| core.member(**id).map(|m| m.expunged).unwrap_or(true))
            .copied()
            .collect();
        if !stale.is_empty() {
            debug!(
                "Group {}: pruning {} expunged members from range of {}",
                core.group_id,
                stale.len(),
                listener
            );
            if let Some(state) = self.tracking.get_mut(&listener) {
                for id in &stale {
                    state.in_radius.remove(id);
                }
            }
        }

        let Some(state) = self.tracking.get(&listener) else {
            return;
        };
        let origin = state.location;
        let mut candidates: Vec<(f64, u64, MemberId)> = state
            .in_radius
            .iter()
            .filter_map(|speaker| {
                let member = core.member(*speaker)?;
                if !member.is_active_speaker() {
                    return None;
                }
                let there = self.tracking.get(speaker).and_then(|s| s.location);
                let distance = match (origin, there) {
                    (Some(a), Some(b)) => a.distance_squared(b),
                    _ => f64::MAX,
                };
                Some((distance, member.index, *speaker))
            })
            .collect();

        if let Some(me) = core.member(listener) {
            if me.listen_to_yourself && me.is_active_speaker() {
                candidates.push((0.0, me.index, listener));
            }
        }

        candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        recompute_voices_from_speakers(core, listener, candidates.into_iter().map(|(_, _, id)| id));
    }

    fn speaker_preferences_changed(&mut self, core: &mut GroupCore, member_id: MemberId) {
        let mut listeners = self.listeners_affected_by(core, member_id);
        if !listeners.contains(&member_id) {
            listeners.push(member_id);
        }
        for listener in listeners {
            self.recompute_listener_voices(core, listener);
        }
    }

    fn update_world_node(&mut self, core: &mut GroupCore, member_id: MemberId) -> Result<(), VoiceError> {
        if !core.members.contains_key(&member_id) {
            return Err(VoiceError::NotMember(member_id));
        }

        if self.refresh_location(member_id) {
            let instance = self.tracking.get(&member_id).and_then(|s| s.instance);
            debug!(
                "Group {}: {} changed instance to {:?}",
                core.group_id, member_id, instance
            );
            self.strip_perceiver(core, member_id);
            if instance.is_some() {
                if let Some(member) = core.members.get_mut(&member_id) {
                    member.expunged = false;
                }
            }
            return Ok(());
        }

        let mut peers: Vec<MemberId> = match self.tracking.get(&member_id) {
            Some(state) => state.perceived.union(&state.perceived_by).copied().collect(),
            None => Vec::new(),
        };
        peers.sort_by_key(|peer| core.member(*peer).map(|m| m.index).unwrap_or(u64::MAX));
        for peer in peers {
            self.test_proximity(core, member_id, peer);
        }
        Ok(())
    }

    fn maybe_change_perceived_object(
        &mut self,
        core: &mut GroupCore,
        perceiver: MemberId,
        perceived: MemberId,
        gained: bool,
    ) -> Result<(), VoiceError> {
        if !core.members.contains_key(&perceiver) {
            return Err(VoiceError::NotMember(perceiver));
        }
        if perceiver == perceived {
            return Ok(());
        }
        if !self.tracking.contains_key(&perceived) {
            trace!(
                "Group {}: {} perceives {} which is not a voice member",
                core.group_id,
                perceiver,
                perceived
            );
            return Ok(());
        }

        if gained {
            if let Some(state) = self.tracking.get_mut(&perceiver) {
                state.perceived.insert(perceived);
            }
            if let Some(state) = self.tracking.get_mut(&perceived) {
                state.perceived_by.insert(perceiver);
            }
            let located = |id: &MemberId| {
                self.tracking
                    .get(id)
                    .map(|s| s.location.is_some())
                    .unwrap_or(false)
            };
            if located(&perceiver) && located(&perceived) {
                self.test_proximity(core, perceiver, perceived);
            }
        } else {
            if let Some(state) = self.tracking.get_mut(&perceived) {
                state.perceived_by.remove(&perceiver);
            }
            let left_range = match self.tracking.get_mut(&perceiver) {
                Some(state) => {
                    state.perceived.remove(&perceived);
                    state.in_radius.remove(&perceived)
                }
                None => false,
            };
            if left_range {
                self.recompute_listener_voices(core, perceiver);
            }
        }
        Ok(())
    }

    fn remove_tracked_perceiver(&mut self, core: &mut GroupCore, member_id: MemberId) -> Result<(), VoiceError> {
        if !self.tracking.contains_key(&member_id) {
            return Err(VoiceError::NotMember(member_id));
        }
        self.strip_perceiver(core, member_id);
        Ok(())
    }

    fn unload_instance(&mut self, core: &mut GroupCore, instance: InstanceId) -> Result<usize, VoiceError> {
        let mut placed: Vec<MemberId> = self
            .tracking
            .iter()
            .filter(|(_, state)| state.instance == Some(instance))
            .map(|(id, _)| *id)
            .collect();
        placed.sort_by_key(|id| core.member(*id).map(|m| m.index).unwrap_or(u64::MAX));

        for member_id in &placed {
            if let Some(member) = core.members.get_mut(member_id) {
                member.expunged = true;
            }
            if let Some(state) = self.tracking.get_mut(member_id) {
                state.instance = None;
                state.previous_location = state.location.take();
            }
            self.strip_perceiver(core, *member_id);
            core.release_all_voices(*member_id);
            core.release_speaker(*member_id);
        }

        if !placed.is_empty() {
            info!(
                "🗺️ Group {}: expunged {} members of unloaded instance {}",
                core.group_id,
                placed.len(),
                instance
            );
        }
        Ok(placed.len())
    }

    fn members_in_radius(&self, member_id: MemberId) -> Option<Vec<MemberId>> {
        let state = self.tracking.get(&member_id)?;
        let mut members: Vec<MemberId> = state.in_radius.iter().copied().collect();
        members.sort();
        Some(members)
    }
}
