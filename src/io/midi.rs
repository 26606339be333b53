/// Performance messages the engine reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEvent {
    NoteOn { channel: u8, key: u8, velocity: u8 },
    NoteOff { channel: u8, key: u8, velocity: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    /// Centred at 0, range -8192..=8191.
    PitchBend { channel: u8, value: i16 },
    Aftertouch { channel: u8, pressure: u8 },
    AllNotesOff { channel: u8 },
}

/// Controller number of the sustain pedal.
pub const SUSTAIN_PEDAL: u8 = 64;

impl MidiEvent {
    pub fn channel(&self) -> u8 {
        match *self {
            MidiEvent::NoteOn { channel, .. }
            | MidiEvent::NoteOff { channel, .. }
            | MidiEvent::ControlChange { channel, .. }
            | MidiEvent::PitchBend { channel, .. }
            | MidiEvent::Aftertouch { channel, .. }
            | MidiEvent::AllNotesOff { channel } => channel,
        }
    }

    /// Note-on with velocity 0 counts as a note-off, as on the wire.
    pub fn is_note_on(&self) -> bool {
        matches!(self, MidiEvent::NoteOn { velocity, .. } if *velocity > 0)
    }

    pub fn is_note_off(&self) -> bool {
        matches!(
            self,
            MidiEvent::NoteOff { .. } | MidiEvent::NoteOn { velocity: 0, .. }
        )
    }
}

/// A message stamped with its sample offset inside the current block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerformanceEvent {
    pub offset: usize,
    pub event: MidiEvent,
}

impl PerformanceEvent {
    pub fn new(offset: usize, event: MidiEvent) -> Self {
        Self { offset, event }
    }

    pub fn note_on(offset: usize, key: u8, velocity: u8) -> Self {
        Self::new(
            offset,
            MidiEvent::NoteOn {
                channel: 1,
                key,
                velocity,
            },
        )
    }

    pub fn note_off(offset: usize, key: u8) -> Self {
        Self::new(
            offset,
            MidiEvent::NoteOff {
                channel: 1,
                key,
                velocity: 0,
            },
        )
    }

    pub fn controller(offset: usize, controller: u8, value: u8) -> Self {
        Self::new(
            offset,
            MidiEvent::ControlChange {
                channel: 1,
                controller,
                value,
            },
        )
    }
}
