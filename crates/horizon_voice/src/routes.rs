//! # Voice Routes
//!
//! The speaker/listener relation of one group. Three views describe the same
//! set of routes:
//!
//! - per listener, the slot table `voice number -> speaker`
//! - per `(listener, speaker)` pair, the voice number
//! - per speaker, the set of listeners hearing it
//!
//! The slot tables are authoritative. The other two indexes are only touched
//! by [`VoiceRoutes::connect`] and [`VoiceRoutes::disconnect`], which update
//! all three views together.

use crate::types::{MemberId, VoiceNumber};
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};

/// Occupied slots of one listener, ordered by voice number.
pub type Occupants = SmallVec<[(VoiceNumber, MemberId); 8]>;

#[derive(Debug, Default)]
pub struct VoiceRoutes {
    max_voices: u8,
    slots: HashMap<MemberId, Vec<Option<MemberId>>>,
    voice_of: HashMap<(MemberId, MemberId), VoiceNumber>,
    listeners_of: HashMap<MemberId, HashSet<MemberId>>,
}

impl VoiceRoutes {
    pub fn new(max_voices: u8) -> Self {
        Self {
            max_voices,
            ..Default::default()
        }
    }

    pub fn max_voices(&self) -> u8 {
        self.max_voices
    }

    /// Creates the slot table for a new member. Tables are sized once.
    pub fn add_listener(&mut self, listener: MemberId) {
        let capacity = self.max_voices as usize;
        self.slots
            .entry(listener)
            .or_insert_with(|| vec![None; capacity]);
    }

    /// Drops a member's slot table, disconnecting anything still in it.
    ///
    /// Returns the routes that had to be torn down; callers are expected to
    /// have emptied the table already, so anything returned is a leftover.
    pub fn remove_listener(&mut self, listener: MemberId) -> Occupants {
        let leftovers = self.occupied(listener);
        for (voice, _) in &leftovers {
            self.disconnect(listener, *voice);
        }
        self.slots.remove(&listener);
        leftovers
    }

    pub fn voice_number(&self, listener: MemberId, speaker: MemberId) -> Option<VoiceNumber> {
        self.voice_of.get(&(listener, speaker)).copied()
    }

    pub fn speaker_in(&self, listener: MemberId, voice: VoiceNumber) -> Option<MemberId> {
        self.slots
            .get(&listener)
            .and_then(|table| table.get(voice as usize).copied().flatten())
    }

    pub fn occupied(&self, listener: MemberId) -> Occupants {
        self.slots
            .get(&listener)
            .map(|table| {
                table
                    .iter()
                    .enumerate()
                    .filter_map(|(voice, speaker)| speaker.map(|s| (voice as VoiceNumber, s)))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn occupied_count(&self, listener: MemberId) -> usize {
        self.slots
            .get(&listener)
            .map(|table| table.iter().filter(|slot| slot.is_some()).count())
            .unwrap_or(0)
    }

    /// Listeners currently hearing `speaker`, in no particular order.
    pub fn listeners_of(&self, speaker: MemberId) -> impl Iterator<Item = MemberId> + '_ {
        self.listeners_of
            .get(&speaker)
            .into_iter()
            .flat_map(|listeners| listeners.iter().copied())
    }

    /// Routes `speaker` into the lowest free slot of `listener`.
    ///
    /// Returns the existing voice number if the route already exists, and
    /// `None` if the listener has no slot table or no free slot.
    pub fn connect(&mut self, listener: MemberId, speaker: MemberId) -> Option<VoiceNumber> {
        if let Some(voice) = self.voice_number(listener, speaker) {
            return Some(voice);
        }

        let table = self.slots.get_mut(&listener)?;
        let free = table.iter().position(|slot| slot.is_none())?;
        let voice = free as VoiceNumber;

        table[free] = Some(speaker);
        self.voice_of.insert((listener, speaker), voice);
        self.listeners_of.entry(speaker).or_default().insert(listener);
        Some(voice)
    }

    /// Frees slot `voice` of `listener`, returning the speaker that held it.
    pub fn disconnect(&mut self, listener: MemberId, voice: VoiceNumber) -> Option<MemberId> {
        let speaker = self
            .slots
            .get_mut(&listener)
            .and_then(|table| table.get_mut(voice as usize))
            .and_then(|slot| slot.take())?;

        self.voice_of.remove(&(listener, speaker));
        if let Some(listeners) = self.listeners_of.get_mut(&speaker) {
            listeners.remove(&listener);
            if listeners.is_empty() {
                self.listeners_of.remove(&speaker);
            }
        }
        Some(speaker)
    }

    /// Number of live routes across the whole group.
    pub fn route_count(&self) -> usize {
        self.voice_of.len()
    }

    /// Checks that the three views agree and no table exceeds capacity.
    pub fn verify(&self) -> Result<(), String> {
        let mut occupied_total = 0usize;

        for (listener, table) in &self.slots {
            if table.len() != self.max_voices as usize {
                return Err(format!(
                    "listener {listener} has {} slots, expected {}",
                    table.len(),
                    self.max_voices
                ));
            }
            for (voice, speaker) in table.iter().enumerate() {
                let Some(speaker) = speaker else { continue };
                occupied_total += 1;
                if self.voice_of.get(&(*listener, *speaker)) != Some(&(voice as VoiceNumber)) {
                    return Err(format!(
                        "slot {voice} of {listener} holds {speaker} but the pair index disagrees"
                    ));
                }
                let heard_by = self
                    .listeners_of
                    .get(speaker)
                    .map(|listeners| listeners.contains(listener))
                    .unwrap_or(false);
                if !heard_by {
                    return Err(format!(
                        "slot {voice} of {listener} holds {speaker} but {speaker} does not list it"
                    ));
                }
            }
        }

        if occupied_total != self.voice_of.len() {
            return Err(format!(
                "{occupied_total} occupied slots but {} pair entries",
                self.voice_of.len()
            ));
        }

        let listed: usize = self.listeners_of.values().map(HashSet::len).sum();
        if listed != occupied_total {
            return Err(format!(
                "{occupied_total} occupied slots but {listed} speaker->listener entries"
            ));
        }

        Ok(())
    }
}
