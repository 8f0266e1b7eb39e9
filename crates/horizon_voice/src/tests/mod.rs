//! Scenario tests for voice groups, plus the mock sender and location source
//! they share.

pub mod broadcast_test;

use crate::sender::{LocationSource, VoiceControlEvent, VoiceSender};
use crate::types::{InstanceId, MemberId, Vec3, VoiceEndpoint, VoiceNumber};
use parking_lot::Mutex;
use std::collections::HashMap;

/// One call made on the sender.
#[derive(Debug, Clone, PartialEq)]
pub enum SentEvent {
    Allocate {
        speaker: MemberId,
        listener: MemberId,
        voice: VoiceNumber,
        positional: bool,
    },
    Deallocate {
        speaker: MemberId,
        listener: MemberId,
        voice: VoiceNumber,
    },
    Frame {
        speaker: MemberId,
        listener: MemberId,
        voice: VoiceNumber,
        len: usize,
    },
    Control(VoiceControlEvent),
}

/// Mock sender that records every call in order
#[derive(Debug, Default)]
pub struct RecordingSender {
    pub events: Mutex<Vec<SentEvent>>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SentEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Allocations as `(speaker, listener, voice)`.
    pub fn allocations(&self) -> Vec<(MemberId, MemberId, VoiceNumber)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                SentEvent::Allocate {
                    speaker,
                    listener,
                    voice,
                    ..
                } => Some((*speaker, *listener, *voice)),
                _ => None,
            })
            .collect()
    }

    /// Deallocations as `(speaker, listener, voice)`.
    pub fn deallocations(&self) -> Vec<(MemberId, MemberId, VoiceNumber)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                SentEvent::Deallocate {
                    speaker,
                    listener,
                    voice,
                } => Some((*speaker, *listener, *voice)),
                _ => None,
            })
            .collect()
    }

    /// Frames as `(speaker, listener, voice)`.
    pub fn frames(&self) -> Vec<(MemberId, MemberId, VoiceNumber)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                SentEvent::Frame {
                    speaker,
                    listener,
                    voice,
                    ..
                } => Some((*speaker, *listener, *voice)),
                _ => None,
            })
            .collect()
    }

    pub fn control_events(&self) -> Vec<VoiceControlEvent> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                SentEvent::Control(control) => Some(control.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn positional_flags(&self) -> Vec<bool> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                SentEvent::Allocate { positional, .. } => Some(*positional),
                _ => None,
            })
            .collect()
    }
}

impl VoiceSender for RecordingSender {
    fn send_allocate(
        &self,
        speaker: VoiceEndpoint,
        listener: VoiceEndpoint,
        voice: VoiceNumber,
        positional: bool,
    ) {
        self.events.lock().push(SentEvent::Allocate {
            speaker: speaker.member_id,
            listener: listener.member_id,
            voice,
            positional,
        });
    }

    fn send_deallocate(&self, speaker: VoiceEndpoint, listener: VoiceEndpoint, voice: VoiceNumber) {
        self.events.lock().push(SentEvent::Deallocate {
            speaker: speaker.member_id,
            listener: listener.member_id,
            voice,
        });
    }

    fn send_voice_frame(
        &self,
        speaker: VoiceEndpoint,
        listener: VoiceEndpoint,
        voice: VoiceNumber,
        frame: &[u8],
    ) {
        self.events.lock().push(SentEvent::Frame {
            speaker: speaker.member_id,
            listener: listener.member_id,
            voice,
            len: frame.len(),
        });
    }

    fn send_control_broadcast(&self, event: &VoiceControlEvent) {
        self.events.lock().push(SentEvent::Control(event.clone()));
    }
}

/// Location source whose answers the test sets directly
#[derive(Debug, Default)]
pub struct ScriptedLocator {
    places: Mutex<HashMap<MemberId, (Option<Vec3>, Option<InstanceId>)>>,
}

impl ScriptedLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn place(&self, member: MemberId, location: Vec3, instance: Option<InstanceId>) {
        self.places.lock().insert(member, (Some(location), instance));
    }

    pub fn move_to(&self, member: MemberId, location: Vec3) {
        let mut places = self.places.lock();
        let entry = places.entry(member).or_insert((None, None));
        entry.0 = Some(location);
    }

    pub fn set_instance(&self, member: MemberId, instance: Option<InstanceId>) {
        let mut places = self.places.lock();
        let entry = places.entry(member).or_insert((None, None));
        entry.1 = instance;
    }
}

impl LocationSource for ScriptedLocator {
    fn current_location(&self, member_id: MemberId) -> Option<Vec3> {
        self.places.lock().get(&member_id).and_then(|(location, _)| *location)
    }

    fn instance_id(&self, member_id: MemberId) -> Option<InstanceId> {
        self.places.lock().get(&member_id).and_then(|(_, instance)| *instance)
    }
}
