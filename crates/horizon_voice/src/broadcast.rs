//! Non-positional groups: every listener draws from one group-wide speaker
//! list ordered by priority.

use crate::policy::{recompute_voices_from_speakers, GroupCore, VoicePolicy};
use crate::types::MemberId;
use std::cmp::Reverse;
use tracing::trace;

/// Broadcast policy.
///
/// `current_speakers` holds every member that is speaking, highest priority
/// first, ties going to the member admitted earlier.
#[derive(Debug, Default)]
pub struct BroadcastPolicy {
    current_speakers: Vec<MemberId>,
}

impl BroadcastPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_speakers(&self) -> &[MemberId] {
        &self.current_speakers
    }

    fn sort_speakers(&mut self, core: &GroupCore) {
        self.current_speakers.sort_by_key(|speaker| {
            core.member(*speaker)
                .map(|member| (Reverse(member.priority), member.index))
                .unwrap_or((Reverse(i32::MIN), u64::MAX))
        });
    }

    fn recompute_all_listeners(&mut self, core: &mut GroupCore) {
        for listener in core.listening_members() {
            self.recompute_listener_voices(core, listener);
        }
    }
}

impl VoicePolicy for BroadcastPolicy {
    fn is_positional(&self) -> bool {
        false
    }

    fn member_added(&mut self, core: &mut GroupCore, member_id: MemberId) {
        trace!("Broadcast group {} admitted {}", core.group_id, member_id);
    }

    fn member_removed(&mut self, _core: &mut GroupCore, member_id: MemberId) {
        self.current_speakers.retain(|speaker| *speaker != member_id);
    }

    fn change_speaking(&mut self, core: &mut GroupCore, member_id: MemberId, start: bool) {
        if start {
            if !self.current_speakers.contains(&member_id) {
                self.current_speakers.push(member_id);
            }
        } else {
            self.current_speakers.retain(|speaker| *speaker != member_id);
        }
        self.sort_speakers(core);
        self.recompute_all_listeners(core);
    }

    fn recompute_listener_voices(&mut self, core: &mut GroupCore, listener: MemberId) {
        recompute_voices_from_speakers(core, listener, self.current_speakers.iter().copied());
    }

    fn speaker_preferences_changed(&mut self, core: &mut GroupCore, member_id: MemberId) {
        self.sort_speakers(core);
        if self.current_speakers.contains(&member_id) {
            self.recompute_all_listeners(core);
        } else {
            self.recompute_listener_voices(core, member_id);
        }
    }
}
