// Purpose - performance events entering the engine, raw MIDI decoding

pub mod converter;
pub mod midi;

pub use midi::{MidiEvent, PerformanceEvent};
