use crate::{
    dsp::envelope::EnvelopePhase,
    io::{converter::unit_from_7bit, midi::MidiEvent},
    modulation::attribute::{AttributeInfo, Attributes},
};

/// Processing context handed to every modulator at prepare time.
///
/// Arenas (per-voice state, scratch buffers) are sized from these values
/// and never grow during processing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrepareSpecs {
    pub sample_rate: f64,
    pub block_size: usize,
    pub polyphony: usize,
}

impl PrepareSpecs {
    pub fn new(sample_rate: f64, block_size: usize, polyphony: usize) -> Self {
        Self {
            sample_rate,
            block_size,
            polyphony,
        }
    }

    /// Specs seen by sources running `divisor` times slower than audio rate.
    pub fn downsampled(&self, divisor: usize) -> Self {
        let divisor = divisor.max(1);
        Self {
            sample_rate: self.sample_rate / divisor as f64,
            block_size: (self.block_size / divisor).max(1),
            polyphony: self.polyphony,
        }
    }
}

/// The note that started a voice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteContext {
    pub voice: usize,
    pub channel: u8,
    pub key: u8,
    /// Velocity in `[0, 1]`.
    pub velocity: f32,
}

impl NoteContext {
    pub fn from_note(voice: usize, key: u8, velocity: u8) -> Self {
        Self {
            voice,
            channel: 1,
            key,
            velocity: unit_from_7bit(velocity),
        }
    }
}

/// Common surface of every modulation source.
pub trait Modulator: Attributes + Send {
    /// Stable name used by state export and the factory.
    fn type_name(&self) -> &'static str;

    /// Called outside the audio callback before processing and on every
    /// sample rate, block size or polyphony change.
    fn prepare(&mut self, _specs: &PrepareSpecs) {}

    /// Controller and note messages, in block order.
    fn handle_event(&mut self, _event: &MidiEvent) {}
}

/// A value computed once per note and held for the voice's lifetime.
pub trait VoiceStartModulator: Modulator {
    /// Unipolar value in `[0, 1]` for the new voice.
    fn start_voice(&mut self, note: &NoteContext) -> f32;
}

/// A value that varies continuously and is shared by all voices.
pub trait TimeVariantModulator: Modulator {
    /// Fill `out` with unipolar values and advance.
    fn render(&mut self, out: &mut [f32]);

    /// Latest rendered value.
    fn current_value(&self) -> f32;

    fn reset(&mut self) {}
}

/// A per-voice (or monophonic shared) time-based source.
pub trait EnvelopeModulator: Modulator {
    /// Begin a note and return its first value.
    fn start_voice(&mut self, note: &NoteContext) -> f32;

    fn stop_voice(&mut self, voice: usize);

    fn reset(&mut self, voice: usize);

    /// Render the state of `voice`. Monophonic envelopes ignore this.
    fn render(&mut self, voice: usize, out: &mut [f32]);

    /// Render the shared state of a monophonic envelope.
    fn render_shared(&mut self, _out: &mut [f32]) {}

    /// Hard reset of the shared state, dropping every held key.
    fn reset_shared(&mut self) {}

    fn is_playing(&self, voice: usize) -> bool;

    fn is_monophonic(&self) -> bool {
        false
    }

    fn phase(&self, voice: usize) -> EnvelopePhase;
}

/// Capability of a chain slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    VoiceStart,
    TimeVariant,
    Envelope,
}

/// A boxed modulator tagged with its capability.
///
/// Chains dispatch on the tag instead of probing the concrete type, so the
/// set of capabilities stays closed while implementations stay open.
pub enum Source {
    VoiceStart(Box<dyn VoiceStartModulator>),
    TimeVariant(Box<dyn TimeVariantModulator>),
    Envelope(Box<dyn EnvelopeModulator>),
}

impl Source {
    pub fn voice_start(modulator: impl VoiceStartModulator + 'static) -> Self {
        Source::VoiceStart(Box::new(modulator))
    }

    pub fn time_variant(modulator: impl TimeVariantModulator + 'static) -> Self {
        Source::TimeVariant(Box::new(modulator))
    }

    pub fn envelope(modulator: impl EnvelopeModulator + 'static) -> Self {
        Source::Envelope(Box::new(modulator))
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            Source::VoiceStart(_) => SourceKind::VoiceStart,
            Source::TimeVariant(_) => SourceKind::TimeVariant,
            Source::Envelope(_) => SourceKind::Envelope,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Source::VoiceStart(m) => m.type_name(),
            Source::TimeVariant(m) => m.type_name(),
            Source::Envelope(m) => m.type_name(),
        }
    }

    pub fn prepare(&mut self, specs: &PrepareSpecs) {
        match self {
            Source::VoiceStart(m) => m.prepare(specs),
            Source::TimeVariant(m) => m.prepare(specs),
            Source::Envelope(m) => m.prepare(specs),
        }
    }

    pub fn handle_event(&mut self, event: &MidiEvent) {
        match self {
            Source::VoiceStart(m) => m.handle_event(event),
            Source::TimeVariant(m) => m.handle_event(event),
            Source::Envelope(m) => m.handle_event(event),
        }
    }

    /// Rendered once per block and shared by every voice.
    pub fn is_monophonic(&self) -> bool {
        match self {
            Source::VoiceStart(_) => false,
            Source::TimeVariant(_) => true,
            Source::Envelope(m) => m.is_monophonic(),
        }
    }

    pub fn as_envelope(&self) -> Option<&dyn EnvelopeModulator> {
        match self {
            Source::Envelope(m) => Some(m.as_ref()),
            _ => None,
        }
    }
}

impl Attributes for Source {
    fn attribute_table(&self) -> &'static [AttributeInfo] {
        match self {
            Source::VoiceStart(m) => m.attribute_table(),
            Source::TimeVariant(m) => m.attribute_table(),
            Source::Envelope(m) => m.attribute_table(),
        }
    }

    fn get_attribute(&self, index: usize) -> f32 {
        match self {
            Source::VoiceStart(m) => m.get_attribute(index),
            Source::TimeVariant(m) => m.get_attribute(index),
            Source::Envelope(m) => m.get_attribute(index),
        }
    }

    fn set_attribute(&mut self, index: usize, value: f32) {
        match self {
            Source::VoiceStart(m) => m.set_attribute(index, value),
            Source::TimeVariant(m) => m.set_attribute(index, value),
            Source::Envelope(m) => m.set_attribute(index, value),
        }
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Source")
            .field(&self.kind())
            .field(&self.type_name())
            .finish()
    }
}
