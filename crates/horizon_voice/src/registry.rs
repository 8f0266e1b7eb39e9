//! Registry of the voice groups hosted by one server.
//!
//! Groups never share state, so the registry is only a concurrent map plus a
//! few fan-out helpers for events that concern every group at once, such as a
//! member disconnecting or a spatial instance being unloaded.

use crate::config::{VoiceConfig, VoiceGroupSettings};
use crate::error::VoiceError;
use crate::group::VoiceGroup;
use crate::sender::{LocationSource, VoiceSender};
use crate::types::{GroupId, InstanceId, MemberId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Concurrent map of voice groups sharing one sender and location source.
pub struct VoiceGroupRegistry {
    groups: DashMap<GroupId, Arc<VoiceGroup>>,
    sender: Arc<dyn VoiceSender>,
    locator: Option<Arc<dyn LocationSource>>,
}

impl VoiceGroupRegistry {
    pub fn new(sender: Arc<dyn VoiceSender>, locator: Option<Arc<dyn LocationSource>>) -> Self {
        Self {
            groups: DashMap::new(),
            sender,
            locator,
        }
    }

    /// Builds a registry and creates every group listed in `config`.
    pub fn from_config(
        config: &VoiceConfig,
        sender: Arc<dyn VoiceSender>,
        locator: Option<Arc<dyn LocationSource>>,
    ) -> Result<Self, VoiceError> {
        config.validate()?;
        let registry = Self::new(sender, locator);
        for settings in &config.groups {
            registry.create_group(settings.clone())?;
        }
        info!("🎧 Voice registry started with {} groups", registry.len());
        Ok(registry)
    }

    /// Creates a group and registers it under its id.
    pub fn create_group(&self, settings: VoiceGroupSettings) -> Result<Arc<VoiceGroup>, VoiceError> {
        if let Some(group_id) = settings.group_id {
            if self.groups.contains_key(&group_id) {
                return Err(VoiceError::GroupExists(group_id));
            }
        }

        let group = Arc::new(VoiceGroup::new(
            settings,
            Arc::clone(&self.sender),
            self.locator.clone(),
        )?);
        match self.groups.entry(group.group_id()) {
            Entry::Occupied(_) => Err(VoiceError::GroupExists(group.group_id())),
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&group));
                Ok(group)
            }
        }
    }

    pub fn group(&self, group_id: GroupId) -> Option<Arc<VoiceGroup>> {
        self.groups.get(&group_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Like [`group`](Self::group), but reports a missing group as an error.
    pub fn require(&self, group_id: GroupId) -> Result<Arc<VoiceGroup>, VoiceError> {
        self.group(group_id).ok_or(VoiceError::GroupNotFound(group_id))
    }

    /// Unregisters a group after removing each of its members, so every
    /// listener is told its slots closed.
    pub fn remove_group(&self, group_id: GroupId) -> Option<Arc<VoiceGroup>> {
        let (_, group) = self.groups.remove(&group_id)?;
        for member_id in group.member_ids() {
            group.remove_member(member_id);
        }
        info!("🗑️ Removed voice group {}", group_id);
        Some(group)
    }

    /// Registered group ids, sorted.
    pub fn group_ids(&self) -> Vec<GroupId> {
        let mut ids: Vec<GroupId> = self.groups.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<VoiceGroup>> {
        let mut groups: Vec<Arc<VoiceGroup>> =
            self.groups.iter().map(|entry| Arc::clone(entry.value())).collect();
        groups.sort_by_key(|group| group.group_id());
        groups
    }

    /// Removes a member from every group it belongs to.
    ///
    /// Returns the number of groups it left.
    pub fn remove_member_everywhere(&self, member_id: MemberId) -> usize {
        let left = self
            .snapshot()
            .into_iter()
            .filter(|group| group.remove_member(member_id))
            .count();
        debug!("Member {} left {} voice groups", member_id, left);
        left
    }

    /// Re-reads a member's position in every proximity group it belongs to.
    pub fn update_world_node(&self, member_id: MemberId) -> usize {
        let mut updated = 0;
        for group in self.snapshot() {
            if !group.is_positional() || !group.is_member(member_id) {
                continue;
            }
            if group.update_world_node(member_id).is_ok() {
                updated += 1;
            }
        }
        updated
    }

    /// Expunges the members of an unloaded instance from every proximity group.
    ///
    /// Returns the total number of memberships affected.
    pub fn unload_instance(&self, instance: InstanceId) -> usize {
        let mut affected = 0;
        for group in self.snapshot() {
            if !group.is_positional() {
                continue;
            }
            match group.unload_instance(instance) {
                Ok(count) => affected += count,
                Err(e) => warn!("Group {} failed to unload instance {}: {}", group.group_id(), instance, e),
            }
        }
        affected
    }
}
