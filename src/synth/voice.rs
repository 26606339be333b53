#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoiceState {
    #[default]
    Free,      // Available for allocation
    Active,    // Key held
    Releasing, // Key released, chains still ringing out
}

/// One entry of the voice slot table.
///
/// Holds only bookkeeping; the modulation state of a voice lives in the
/// per-voice arenas of each chain, addressed by the slot's index.
#[derive(Debug, Clone, Copy, Default)]
pub struct VoiceSlot {
    note: u8,
    velocity: u8,
    state: VoiceState,
    age: u64,
}

impl VoiceSlot {
    pub fn start(&mut self, note: u8, velocity: u8, age: u64) {
        self.note = note;
        self.velocity = velocity;
        self.state = VoiceState::Active;
        self.age = age;
    }

    /// Returns whether the voice was held.
    pub fn release(&mut self) -> bool {
        if self.state == VoiceState::Active {
            self.state = VoiceState::Releasing;
            true
        } else {
            false
        }
    }

    pub fn free(&mut self) {
        self.state = VoiceState::Free;
        self.note = 0;
        self.velocity = 0;
    }

    pub fn is_free(&self) -> bool {
        self.state == VoiceState::Free
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, VoiceState::Active | VoiceState::Releasing)
    }

    pub fn is_held(&self) -> bool {
        self.state == VoiceState::Active
    }

    pub fn note(&self) -> u8 {
        self.note
    }

    pub fn velocity(&self) -> u8 {
        self.velocity
    }

    pub fn age(&self) -> u64 {
        self.age
    }

    pub fn state(&self) -> VoiceState {
        self.state
    }
}
