use crate::synth::voice::{VoiceSlot, VoiceState};

/// Result of asking the table for a voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    /// A free slot.
    Free(usize),
    /// A sounding slot taken over. Callers must hard-reset it first.
    Stolen(usize),
}

impl Allocation {
    pub fn voice(self) -> usize {
        match self {
            Allocation::Free(voice) | Allocation::Stolen(voice) => voice,
        }
    }
}

/// Fixed-capacity voice slot table.
///
/// Sized once at construction; indices are stable for the table's lifetime.
/// Every accessor validates the index.
#[derive(Debug, Clone)]
pub struct VoiceSlotTable {
    slots: Vec<VoiceSlot>,
    steal_count: u64,
}

impl VoiceSlotTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![VoiceSlot::default(); capacity],
            steal_count: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Pick a slot for a new note: a free one, else the oldest releasing
    /// voice, else the oldest held voice.
    pub fn allocate(&mut self) -> Option<Allocation> {
        // First pass: find free voice index
        if let Some(idx) = self.slots.iter().position(VoiceSlot::is_free) {
            return Some(Allocation::Free(idx));
        }

        // Second pass: steal oldest, releasing voices first
        let steal_idx = self
            .oldest_in(VoiceState::Releasing)
            .or_else(|| self.oldest_in(VoiceState::Active));

        if steal_idx.is_some() {
            self.steal_count += 1;
        }

        steal_idx.map(Allocation::Stolen)
    }

    fn oldest_in(&self, state: VoiceState) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, v)| v.state() == state)
            .min_by_key(|(_, v)| v.age())
            .map(|(idx, _)| idx)
    }

    pub fn get(&self, voice: usize) -> Option<&VoiceSlot> {
        self.slots.get(voice)
    }

    pub fn start(&mut self, voice: usize, note: u8, velocity: u8, age: u64) {
        if let Some(slot) = self.slots.get_mut(voice) {
            slot.start(note, velocity, age);
        }
    }

    /// Returns whether `voice` was held.
    pub fn release(&mut self, voice: usize) -> bool {
        self.slots.get_mut(voice).is_some_and(VoiceSlot::release)
    }

    pub fn free(&mut self, voice: usize) {
        if let Some(slot) = self.slots.get_mut(voice) {
            slot.free();
        }
    }

    pub fn free_all(&mut self) {
        self.slots.iter_mut().for_each(VoiceSlot::free);
    }

    /// Oldest held voice playing `note`.
    pub fn find_held(&self, note: u8) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_held() && v.note() == note)
            .min_by_key(|(_, v)| v.age())
            .map(|(idx, _)| idx)
    }

    /// Indices of all non-free voices.
    pub fn active(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_active())
            .map(|(idx, _)| idx)
    }

    pub fn held(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_held())
            .map(|(idx, _)| idx)
    }

    pub fn num_active(&self) -> usize {
        self.slots.iter().filter(|v| v.is_active()).count()
    }

    pub fn steal_count(&self) -> u64 {
        self.steal_count
    }
}
