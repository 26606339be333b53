//! Continuously varying modulators shared by all voices.

use crate::{
    dsp::{
        curve::ms_to_samples,
        lfo::{tempo_synced_frequency, LfoPhase, LfoWaveform},
        ramp::LinearRamp,
    },
    io::{
        converter::{unit_from_7bit, unit_from_pitch_bend},
        midi::MidiEvent,
    },
    modulation::{
        attribute::{AttributeInfo, Attributes},
        source::{Modulator, PrepareSpecs, TimeVariantModulator},
    },
    tempo::{TempoListener, TempoService},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LfoAttribute {
    Frequency = 0,
    Waveform,
    TempoSync,
    /// Note value denominator when synced: 4 = quarter note per cycle.
    NoteValue,
}

const LFO_ATTRIBUTES: &[AttributeInfo] = &[
    AttributeInfo::new("Frequency", 0.01, 40.0, 3.0),
    AttributeInfo::new("Waveform", 0.0, 3.0, 0.0),
    AttributeInfo::toggle("TempoSync", false),
    AttributeInfo::new("NoteValue", 1.0, 32.0, 4.0),
];

/// Free running or tempo-synced low frequency oscillator.
pub struct Lfo {
    frequency: f32,
    waveform: LfoWaveform,
    tempo_sync: bool,
    note_value: f32,

    rate: f32,
    phase: LfoPhase,
    tempo: Option<TempoListener>,
    last_bpm: f64,
    current: f32,
}

impl Default for Lfo {
    fn default() -> Self {
        Self::new(3.0)
    }
}

impl Lfo {
    pub fn new(frequency_hz: f32) -> Self {
        let mut lfo = Self {
            frequency: LFO_ATTRIBUTES[0].clamp(frequency_hz),
            waveform: LfoWaveform::Sine,
            tempo_sync: false,
            note_value: 4.0,
            rate: 44_100.0,
            phase: LfoPhase::default(),
            tempo: None,
            last_bpm: crate::tempo::DEFAULT_BPM,
            current: 0.5,
        };
        lfo.update_increment();
        lfo
    }

    pub fn waveform(mut self, waveform: LfoWaveform) -> Self {
        self.waveform = waveform;
        self
    }

    /// Sync to `1 / note_value` notes per cycle. Needs [`Lfo::attach_tempo`].
    pub fn synced(mut self, note_value: f32) -> Self {
        self.tempo_sync = true;
        self.note_value = LFO_ATTRIBUTES[3].clamp(note_value);
        self.update_increment();
        self
    }

    pub fn attach_tempo(&mut self, service: &mut TempoService) {
        if let Some(previous) = self.tempo.take() {
            service.remove_listener(previous);
        }

        let listener = service.add_listener();
        self.last_bpm = listener.bpm();
        self.tempo = Some(listener);
        self.update_increment();
    }

    pub fn detach_tempo(&mut self, service: &mut TempoService) {
        if let Some(listener) = self.tempo.take() {
            service.remove_listener(listener);
        }
    }

    pub fn is_attached(&self) -> bool {
        self.tempo.is_some()
    }

    /// Frequency actually used for rendering.
    pub fn effective_frequency(&self) -> f32 {
        if self.tempo_sync {
            tempo_synced_frequency(self.last_bpm, self.note_value)
        } else {
            self.frequency
        }
    }

    fn update_increment(&mut self) {
        let frequency = self.effective_frequency();
        self.phase.set_frequency(frequency, self.rate);
    }
}

impl Attributes for Lfo {
    fn attribute_table(&self) -> &'static [AttributeInfo] {
        LFO_ATTRIBUTES
    }

    fn get_attribute(&self, index: usize) -> f32 {
        match index {
            0 => self.frequency,
            1 => self.waveform.as_attribute(),
            2 => self.tempo_sync as u8 as f32,
            3 => self.note_value,
            _ => 0.0,
        }
    }

    fn set_attribute(&mut self, index: usize, value: f32) {
        let Some(info) = LFO_ATTRIBUTES.get(index) else {
            return;
        };
        let value = info.clamp(value);

        match index {
            0 => self.frequency = value,
            1 => self.waveform = LfoWaveform::from_attribute(value),
            2 => self.tempo_sync = value > 0.5,
            3 => self.note_value = value,
            _ => {}
        }

        self.update_increment();
    }
}

impl Modulator for Lfo {
    fn type_name(&self) -> &'static str {
        "Lfo"
    }

    fn prepare(&mut self, specs: &PrepareSpecs) {
        self.rate = specs.sample_rate as f32;
        self.update_increment();
    }
}

impl TimeVariantModulator for Lfo {
    fn render(&mut self, out: &mut [f32]) {
        if let Some(listener) = &self.tempo {
            let bpm = listener.bpm();
            if bpm != self.last_bpm {
                self.last_bpm = bpm;
                self.update_increment();
            }
        }

        for sample in out.iter_mut() {
            *sample = self.phase.next_unipolar(self.waveform);
        }

        if let Some(&last) = out.last() {
            self.current = last;
        }
    }

    fn current_value(&self) -> f32 {
        self.current
    }

    fn reset(&mut self) {
        self.phase.reset();
    }
}

/// Which performance message drives a [`Controller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerSource {
    ControlChange(u8),
    Aftertouch,
    PitchBend,
}

const CONTROLLER_ATTRIBUTES: &[AttributeInfo] = &[
    // 0..=127 selects a controller number, 128 aftertouch, 129 pitch bend.
    AttributeInfo::new("Source", 0.0, 129.0, 1.0),
    AttributeInfo::new("SmoothingTime", 0.0, 2_000.0, 50.0),
    AttributeInfo::new("DefaultValue", 0.0, 1.0, 0.0),
    AttributeInfo::toggle("Inverted", false),
];

/// Follows a MIDI controller, aftertouch or the pitch wheel, smoothed.
pub struct Controller {
    source: ControllerSource,
    smoothing_ms: f32,
    default_value: f32,
    inverted: bool,

    rate: f32,
    ramp: LinearRamp,
    /// An input message has arrived since the last reset.
    received: bool,
}

impl Controller {
    pub fn new(source: ControllerSource) -> Self {
        let default_value = match source {
            ControllerSource::PitchBend => 0.5,
            _ => 0.0,
        };

        Self {
            source,
            smoothing_ms: 50.0,
            default_value,
            inverted: false,
            rate: 44_100.0,
            ramp: LinearRamp::new(default_value),
            received: false,
        }
    }

    pub fn smoothing(mut self, smoothing_ms: f32) -> Self {
        self.smoothing_ms = CONTROLLER_ATTRIBUTES[1].clamp(smoothing_ms);
        self
    }

    pub fn inverted(mut self, inverted: bool) -> Self {
        self.inverted = inverted;
        self
    }

    pub fn source(&self) -> ControllerSource {
        self.source
    }

    fn source_code(&self) -> f32 {
        match self.source {
            ControllerSource::ControlChange(cc) => cc as f32,
            ControllerSource::Aftertouch => 128.0,
            ControllerSource::PitchBend => 129.0,
        }
    }

    fn source_from_code(code: f32) -> ControllerSource {
        match code.round() as i32 {
            128 => ControllerSource::Aftertouch,
            129 => ControllerSource::PitchBend,
            cc => ControllerSource::ControlChange(cc.clamp(0, 127) as u8),
        }
    }

    fn input_value(&self, event: &MidiEvent) -> Option<f32> {
        match (*event, self.source) {
            (MidiEvent::ControlChange { controller, value, .. }, ControllerSource::ControlChange(cc))
                if controller == cc =>
            {
                Some(unit_from_7bit(value))
            }
            (MidiEvent::Aftertouch { pressure, .. }, ControllerSource::Aftertouch) => {
                Some(unit_from_7bit(pressure))
            }
            (MidiEvent::PitchBend { value, .. }, ControllerSource::PitchBend) => {
                Some(unit_from_pitch_bend(value))
            }
            _ => None,
        }
    }

    fn output(&self, value: f32) -> f32 {
        if self.inverted {
            1.0 - value
        } else {
            value
        }
    }
}

impl Attributes for Controller {
    fn attribute_table(&self) -> &'static [AttributeInfo] {
        CONTROLLER_ATTRIBUTES
    }

    fn get_attribute(&self, index: usize) -> f32 {
        match index {
            0 => self.source_code(),
            1 => self.smoothing_ms,
            2 => self.default_value,
            3 => self.inverted as u8 as f32,
            _ => 0.0,
        }
    }

    fn set_attribute(&mut self, index: usize, value: f32) {
        let Some(info) = CONTROLLER_ATTRIBUTES.get(index) else {
            return;
        };
        let value = info.clamp(value);

        match index {
            0 => self.source = Self::source_from_code(value),
            1 => self.smoothing_ms = value,
            2 => self.default_value = value,
            3 => self.inverted = value > 0.5,
            _ => {}
        }

        // Until the first message the output rests at the default.
        if !self.received {
            self.ramp.set_immediate(self.default_value);
        }
    }
}

impl Modulator for Controller {
    fn type_name(&self) -> &'static str {
        "Controller"
    }

    fn prepare(&mut self, specs: &PrepareSpecs) {
        self.rate = specs.sample_rate as f32;
    }

    fn handle_event(&mut self, event: &MidiEvent) {
        if let Some(value) = self.input_value(event) {
            self.received = true;
            let steps = ms_to_samples(self.smoothing_ms, self.rate).round() as usize;
            self.ramp.set_target(value, steps);
        }
    }
}

impl TimeVariantModulator for Controller {
    fn render(&mut self, out: &mut [f32]) {
        if !self.ramp.is_ramping() {
            out.fill(self.output(self.ramp.value()));
            return;
        }

        for sample in out.iter_mut() {
            let value = self.ramp.next();
            *sample = self.output(value);
        }
    }

    fn current_value(&self) -> f32 {
        self.output(self.ramp.value())
    }

    fn reset(&mut self) {
        self.received = false;
        self.ramp.set_immediate(self.default_value);
    }
}
