use crate::{
    dsp::{
        envelope::EnvelopePhase,
        modulate::{apply_gain_intensity, blend, unipolar_to_normalised, BIPOLAR_NEUTRAL, MAGNITUDE_NEUTRAL},
        ramp::{fill_ramp, LinearRamp},
        sanitize::{sanitize_block, sanitize_unipolar},
    },
    io::midi::MidiEvent,
    modulation::{
        attribute::{export_attributes, restore_attributes, Attributes},
        factory::create_source,
        rate::{Interpolation, RateAdapter, RateMode},
        source::{NoteContext, PrepareSpecs, Source, SourceKind},
    },
    state::{StateTree, Stateful},
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/*
Modulation Chains
=================

A chain owns an ordered list of sources and reduces them to one value per
voice per sample. See `dsp/modulate.rs` for the per-source math; this module
is about WHEN each source is evaluated and WHERE its output lives.

Three kinds of source, three lifetimes:

    voice-start   evaluated once at note-on, stored per voice
    envelope      rendered per voice per block (or shared, if monophonic)
    time-variant  rendered once per block, shared by every voice

Per block the engine calls:

    render_monophonic(start, n)        once
    calculate_block(voice, start, n)   for every active voice

and reads the result through `voice_values(voice)`.


Composing Sources as Affine Maps
--------------------------------

Both combination rules are affine in the running value:

    magnitude   v' = v * c                     c = (1 - i) + i * s
    bipolar     v' = v * (1 - i) + s_n * i     s_n = normalised source

so a GROUP of sources folds into one pair (scale, offset):

    v' = v * scale + offset

The shared group is folded once per block into two buffers and then
applied to every voice, which keeps the result identical to evaluating
every source in order for every voice.


Smoothing
---------

  - voice-start products that jump by more than 0.01 between blocks (an
    intensity change, a bypass toggle) are ramped across the block.
  - intensity changes on shared sources ramp over 50 ms.
*/

/// Voice-start changes larger than this are ramped across one block.
const CONSTANT_SMOOTHING_THRESHOLD: f32 = 0.01;

/// Ramp time for intensity changes on shared sources.
const INTENSITY_SMOOTHING_MS: f64 = 50.0;

/// What the chain output means and therefore how sources combine.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChainMode {
    /// Magnitude: sources multiply, neutral value 1.
    #[default]
    Gain,
    /// Bipolar around 0.5: sources blend.
    Pitch,
    /// Bipolar around 0.5: sources blend.
    Pan,
}

impl ChainMode {
    pub fn is_bipolar(self) -> bool {
        !matches!(self, ChainMode::Gain)
    }

    pub fn neutral(self) -> f32 {
        if self.is_bipolar() {
            BIPOLAR_NEUTRAL
        } else {
            MAGNITUDE_NEUTRAL
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ChainMode::Gain => "Gain",
            ChainMode::Pitch => "Pitch",
            ChainMode::Pan => "Pan",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Gain" => Some(ChainMode::Gain),
            "Pitch" => Some(ChainMode::Pitch),
            "Pan" => Some(ChainMode::Pan),
            _ => None,
        }
    }

    /// Apply one source to the affine pair `(scale, offset)`.
    #[inline]
    fn fold(self, scale: &mut f32, offset: &mut f32, value: f32, intensity: f32, bipolar: bool) {
        if self.is_bipolar() {
            let target = unipolar_to_normalised(value, bipolar);
            *scale *= 1.0 - intensity;
            *offset = blend(*offset, target, intensity);
        } else {
            let c = apply_gain_intensity(value, intensity);
            *scale *= c;
            *offset *= c;
        }
    }

    /// Apply one source directly to a running value.
    #[inline]
    fn apply(self, current: f32, value: f32, intensity: f32, bipolar: bool) -> f32 {
        if self.is_bipolar() {
            blend(current, unipolar_to_normalised(value, bipolar), intensity)
        } else {
            current * apply_gain_intensity(value, intensity)
        }
    }
}

/// One source plus its per-chain settings.
pub struct SourceSlot {
    id: String,
    source: Source,
    intensity: f32,
    smoothed_intensity: LinearRamp,
    bypassed: bool,
    bipolar: bool,
}

impl SourceSlot {
    fn new(id: impl Into<String>, source: Source, intensity: f32) -> Self {
        let intensity = clamp_intensity(intensity);
        Self {
            id: id.into(),
            source,
            intensity,
            smoothed_intensity: LinearRamp::new(intensity),
            bypassed: false,
            bipolar: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut Source {
        &mut self.source
    }

    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypassed
    }

    pub fn is_bipolar(&self) -> bool {
        self.bipolar
    }

    fn is_active(&self) -> bool {
        !self.bypassed
    }

    fn is_shared(&self) -> bool {
        self.source.is_monophonic()
    }

    fn export_state(&self) -> StateTree {
        let mut tree = StateTree::new(self.source.type_name(), self.id.as_str())
            .with_property("Intensity", self.intensity)
            .with_property("Bypassed", self.bypassed)
            .with_property("Bipolar", self.bipolar);
        export_attributes(&self.source, &mut tree);
        tree
    }

    fn restore_state(&mut self, tree: &StateTree) {
        restore_attributes(&mut self.source, tree);

        if let Some(intensity) = tree.get_f32("Intensity") {
            self.intensity = clamp_intensity(intensity);
            self.smoothed_intensity.set_immediate(self.intensity);
        }
        if let Some(bypassed) = tree.get_bool("Bypassed") {
            self.bypassed = bypassed;
        }
        if let Some(bipolar) = tree.get_bool("Bipolar") {
            self.bipolar = bipolar;
        }
    }
}

fn clamp_intensity(intensity: f32) -> f32 {
    if intensity.is_nan() {
        1.0
    } else {
        intensity.clamp(0.0, 1.0)
    }
}

/// Ordered list of modulation sources combined into one value per voice.
pub struct ModulationChain {
    name: String,
    mode: ChainMode,
    base: f32,
    bypassed: bool,
    slots: Vec<SourceSlot>,
    rate: RateAdapter,

    specs: Option<PrepareSpecs>,
    polyphony: usize,
    block_size: usize,
    intensity_ramp_ticks: usize,

    /// Raw voice-start values, `polyphony * slots.len()`.
    voice_start_raw: Vec<f32>,
    /// Combined voice-start value per voice.
    voice_constant: Vec<f32>,
    /// Voice-start value used at the end of the previous block.
    previous_constant: Vec<f32>,
    voice_active: Vec<bool>,
    active_voices: usize,

    /// Shared group folded per control tick.
    shared_scale: Vec<f32>,
    shared_offset: Vec<f32>,
    scratch: Vec<f32>,
    ticks: Vec<f32>,
    /// Audio-rate output, `polyphony * block_size`.
    output: Vec<f32>,

    current_voice: Option<usize>,
    current_constant: f32,
}

impl ModulationChain {
    pub fn new(name: impl Into<String>, mode: ChainMode) -> Self {
        Self {
            name: name.into(),
            mode,
            base: mode.neutral(),
            bypassed: false,
            slots: Vec::new(),
            rate: RateAdapter::default(),
            specs: None,
            polyphony: 0,
            block_size: 0,
            intensity_ramp_ticks: 0,
            voice_start_raw: Vec::new(),
            voice_constant: Vec::new(),
            previous_constant: Vec::new(),
            voice_active: Vec::new(),
            active_voices: 0,
            shared_scale: Vec::new(),
            shared_offset: Vec::new(),
            scratch: Vec::new(),
            ticks: Vec::new(),
            output: Vec::new(),
            current_voice: None,
            current_constant: mode.neutral(),
        }
    }

    /// Append a source with full intensity.
    pub fn with_source(mut self, id: impl Into<String>, source: Source) -> Self {
        self.add_source(id, source, 1.0);
        self
    }

    pub fn with_source_intensity(mut self, id: impl Into<String>, source: Source, intensity: f32) -> Self {
        self.add_source(id, source, intensity);
        self
    }

    /// Run the chain's sources at control rate.
    pub fn control_rate(mut self, interpolation: Interpolation) -> Self {
        self.rate = RateAdapter::new(RateMode::Control, interpolation);
        self
    }

    pub fn with_base(mut self, base: f32) -> Self {
        self.base = sanitize_unipolar(base);
        self.current_constant = self.base;
        self
    }

    /// Structural change: re-prepares the chain if it was prepared.
    pub fn add_source(&mut self, id: impl Into<String>, source: Source, intensity: f32) -> usize {
        self.slots.push(SourceSlot::new(id, source, intensity));
        self.reprepare();
        self.slots.len() - 1
    }

    /// Structural change: re-prepares the chain if it was prepared.
    pub fn remove_source(&mut self, slot: usize) -> Option<Source> {
        if slot >= self.slots.len() {
            return None;
        }

        let removed = self.slots.remove(slot);
        self.reprepare();
        Some(removed.source)
    }

    fn reprepare(&mut self) {
        if let Some(specs) = self.specs {
            self.prepare(&specs);
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> ChainMode {
        self.mode
    }

    pub fn neutral(&self) -> f32 {
        self.mode.neutral()
    }

    pub fn num_sources(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, slot: usize) -> Option<&SourceSlot> {
        self.slots.get(slot)
    }

    pub fn slot_mut(&mut self, slot: usize) -> Option<&mut SourceSlot> {
        self.slots.get_mut(slot)
    }

    pub fn find_slot(&self, id: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.id == id)
    }

    pub fn rate(&self) -> &RateAdapter {
        &self.rate
    }

    pub fn divisor(&self) -> usize {
        self.rate.divisor()
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypassed
    }

    pub fn set_bypassed(&mut self, bypassed: bool) {
        self.bypassed = bypassed;
    }

    /// Size every arena and prepare the sources. Not realtime safe.
    pub fn prepare(&mut self, specs: &PrepareSpecs) {
        let divisor = self.rate.prepare(specs.sample_rate, specs.block_size, specs.polyphony);
        let source_specs = specs.downsampled(divisor);

        for slot in self.slots.iter_mut() {
            slot.source.prepare(&source_specs);
        }

        self.specs = Some(*specs);
        self.polyphony = specs.polyphony;
        self.block_size = specs.block_size;
        self.intensity_ramp_ticks = (INTENSITY_SMOOTHING_MS * 0.001 * source_specs.sample_rate).round() as usize;

        let num_ticks = self.rate.num_ticks(specs.block_size);
        let neutral = self.mode.neutral();

        self.voice_start_raw = vec![0.0; specs.polyphony * self.slots.len()];
        self.voice_constant = vec![self.base; specs.polyphony];
        self.previous_constant = vec![self.base; specs.polyphony];
        self.voice_active = vec![false; specs.polyphony];
        self.active_voices = 0;

        self.shared_scale = vec![1.0; num_ticks];
        self.shared_offset = vec![0.0; num_ticks];
        self.scratch = vec![0.0; num_ticks];
        self.ticks = vec![neutral; num_ticks];
        self.output = vec![neutral; specs.polyphony * specs.block_size];

        self.current_voice = None;
        self.current_constant = self.base;

        log::debug!(
            "chain '{}' prepared: {} sources, {} voices, block {}, divisor {}",
            self.name,
            self.slots.len(),
            specs.polyphony,
            specs.block_size,
            divisor
        );
    }

    pub fn is_prepared(&self) -> bool {
        self.specs.is_some()
    }

    /// At least one source is active. When false, callers skip the chain and
    /// use the neutral value.
    pub fn should_be_processed_at_all(&self) -> bool {
        !self.bypassed && self.slots.iter().any(SourceSlot::is_active)
    }

    /// The output can change within a block.
    pub fn has_time_variation(&self) -> bool {
        !self.bypassed
            && self
                .slots
                .iter()
                .any(|s| s.is_active() && s.source.kind() != SourceKind::VoiceStart)
    }

    fn has_poly_envelopes(&self) -> bool {
        self.slots
            .iter()
            .any(|s| s.is_active() && s.source.kind() == SourceKind::Envelope && !s.is_shared())
    }

    fn has_shared_envelopes(&self) -> bool {
        self.slots
            .iter()
            .any(|s| s.is_active() && s.source.kind() == SourceKind::Envelope && s.is_shared())
    }

    fn has_shared_sources(&self) -> bool {
        self.slots.iter().any(|s| s.is_active() && s.is_shared())
    }

    fn valid_voice(&self, voice: usize) -> bool {
        debug_assert!(
            voice < self.polyphony,
            "chain '{}': voice index {} out of range",
            self.name,
            voice
        );
        voice < self.polyphony
    }

    /// Controller and note messages, forwarded to every source.
    pub fn handle_event(&mut self, event: &MidiEvent) {
        for slot in self.slots.iter_mut() {
            slot.source.handle_event(event);
        }
    }

    /// Start `note.voice`: evaluate voice-start sources, start envelopes and
    /// return the chain's first output value for the voice.
    pub fn start_voice(&mut self, note: &NoteContext) -> f32 {
        let voice = note.voice;
        if !self.valid_voice(voice) {
            return self.mode.neutral();
        }

        let num_slots = self.slots.len();
        // (scale, offset) of the polyphonic and shared groups.
        let mut poly = (1.0, 0.0);
        let mut shared = (1.0, 0.0);

        for (index, slot) in self.slots.iter_mut().enumerate() {
            let value = match &mut slot.source {
                Source::VoiceStart(m) => {
                    let value = sanitize_unipolar(m.start_voice(note));
                    self.voice_start_raw[voice * num_slots + index] = value;
                    continue;
                }
                Source::Envelope(m) => sanitize_unipolar(m.start_voice(note)),
                Source::TimeVariant(m) => m.current_value(),
            };

            if slot.is_active() {
                let group = if slot.is_shared() { &mut shared } else { &mut poly };
                self.mode
                    .fold(&mut group.0, &mut group.1, value, slot.intensity, slot.bipolar);
            }
        }

        if !self.voice_active[voice] {
            self.voice_active[voice] = true;
            self.active_voices += 1;
        }

        let constant = self.combine_voice_start(voice);
        self.voice_constant[voice] = constant;
        self.previous_constant[voice] = constant;

        let first = if self.should_be_processed_at_all() {
            sanitize_unipolar((constant * poly.0 + poly.1) * shared.0 + shared.1)
        } else {
            self.mode.neutral()
        };

        self.rate.reset_slot(voice, first);
        first
    }

    /// Note-off for `voice`. Takes effect from the next rendered sample.
    pub fn stop_voice(&mut self, voice: usize) {
        if !self.valid_voice(voice) {
            return;
        }

        for slot in self.slots.iter_mut() {
            if let Source::Envelope(m) = &mut slot.source {
                m.stop_voice(voice);
            }
        }

        self.deactivate(voice);
    }

    /// Hard stop for `voice`, e.g. when it is stolen. Idempotent.
    pub fn reset(&mut self, voice: usize) {
        if !self.valid_voice(voice) {
            return;
        }

        for slot in self.slots.iter_mut() {
            if let Source::Envelope(m) = &mut slot.source {
                m.reset(voice);
            }
        }

        self.deactivate(voice);
        self.rate.reset_slot(voice, self.mode.neutral());
    }

    /// Reset shared sources (LFO phase, controller values, monophonic envelopes).
    pub fn reset_shared(&mut self) {
        for slot in self.slots.iter_mut() {
            match &mut slot.source {
                Source::TimeVariant(m) => m.reset(),
                Source::Envelope(m) => m.reset_shared(),
                Source::VoiceStart(_) => {}
            }
        }
    }

    fn deactivate(&mut self, voice: usize) {
        if self.voice_active[voice] {
            self.voice_active[voice] = false;
            self.active_voices -= 1;
        }
    }

    /// Whether `voice` still produces output.
    ///
    /// Polyphonic envelopes decide when present, and the voice stops as soon
    /// as any of them has finished. A chain driven only by a monophonic
    /// envelope keeps released voices alive while the shared envelope rings
    /// out and no other voice holds it. Other chains report voices between
    /// start and stop.
    pub fn is_playing(&self, voice: usize) -> bool {
        if voice >= self.polyphony {
            return false;
        }

        if self.has_poly_envelopes() {
            return self.slots.iter().filter(|s| s.is_active() && !s.is_shared()).all(|s| {
                s.source.as_envelope().map_or(true, |m| m.is_playing(voice))
            });
        }

        if self.voice_active[voice] {
            return true;
        }

        self.has_shared_envelopes()
            && self.active_voices == 0
            && self.slots.iter().any(|s| {
                s.is_active() && s.source.as_envelope().is_some_and(|m| m.is_playing(voice))
            })
    }

    /// A Gain chain with an active envelope. Such chains decide when a
    /// released voice is freed.
    pub fn decides_voice_lifetime(&self) -> bool {
        self.mode == ChainMode::Gain && (self.has_poly_envelopes() || self.has_shared_envelopes())
    }

    /// Phase of the first active envelope for `voice`, for display.
    pub fn envelope_phase(&self, voice: usize) -> EnvelopePhase {
        self.slots
            .iter()
            .filter(|s| s.is_active())
            .find_map(|s| s.source.as_envelope())
            .map_or(EnvelopePhase::Idle, |m| m.phase(voice))
    }

    pub fn set_intensity(&mut self, slot: usize, intensity: f32) {
        let ramp_ticks = self.intensity_ramp_ticks;
        let Some(s) = self.slots.get_mut(slot) else {
            return;
        };

        s.intensity = clamp_intensity(intensity);
        if s.is_shared() {
            s.smoothed_intensity.set_target(s.intensity, ramp_ticks);
        } else {
            s.smoothed_intensity.set_immediate(s.intensity);
        }

        if s.source.kind() == SourceKind::VoiceStart {
            self.recompute_constants();
        }
    }

    pub fn set_bypassed_source(&mut self, slot: usize, bypassed: bool) {
        let Some(s) = self.slots.get_mut(slot) else {
            return;
        };

        s.bypassed = bypassed;
        if s.source.kind() == SourceKind::VoiceStart {
            self.recompute_constants();
        }
    }

    pub fn set_bipolar(&mut self, slot: usize, bipolar: bool) {
        if let Some(s) = self.slots.get_mut(slot) {
            s.bipolar = bipolar;
            if s.source.kind() == SourceKind::VoiceStart {
                self.recompute_constants();
            }
        }
    }

    /// Set attribute `index` of the source in `slot`.
    pub fn set_source_attribute(&mut self, slot: usize, index: usize, value: f32) {
        if let Some(s) = self.slots.get_mut(slot) {
            s.source.set_attribute(index, value);
        }
    }

    pub fn source_attribute(&self, slot: usize, index: usize) -> Option<f32> {
        self.slots.get(slot).map(|s| s.source.get_attribute(index))
    }

    fn combine_voice_start(&self, voice: usize) -> f32 {
        let num_slots = self.slots.len();
        let raw = &self.voice_start_raw[voice * num_slots..(voice + 1) * num_slots];

        self.slots
            .iter()
            .zip(raw)
            .filter(|(s, _)| s.is_active() && s.source.kind() == SourceKind::VoiceStart)
            .fold(self.base, |current, (s, &value)| {
                self.mode.apply(current, value, s.intensity, s.bipolar)
            })
    }

    fn recompute_constants(&mut self) {
        for voice in 0..self.polyphony {
            if self.voice_active[voice] {
                self.voice_constant[voice] = self.combine_voice_start(voice);
            }
        }
    }

    /// Render shared sources for `[start, start + num_samples)`. Call once per
    /// block before any `calculate_block`.
    pub fn render_monophonic(&mut self, start: usize, num_samples: usize) {
        if !self.is_prepared() || !self.has_shared_sources() || self.bypassed {
            return;
        }

        let Some((start_cr, num_cr)) = self.tick_range(start, num_samples) else {
            return;
        };

        let mode = self.mode;
        let scale = &mut self.shared_scale[start_cr..start_cr + num_cr];
        let offset = &mut self.shared_offset[start_cr..start_cr + num_cr];
        let scratch = &mut self.scratch[..num_cr];

        scale.fill(1.0);
        offset.fill(0.0);

        for slot in self.slots.iter_mut().filter(|s| s.is_active() && s.is_shared()) {
            match &mut slot.source {
                Source::TimeVariant(m) => m.render(scratch),
                Source::Envelope(m) => m.render_shared(scratch),
                Source::VoiceStart(_) => continue,
            }

            let bipolar = slot.bipolar;
            for ((s, o), &value) in scale.iter_mut().zip(offset.iter_mut()).zip(scratch.iter()) {
                let intensity = slot.smoothed_intensity.next();
                mode.fold(s, o, value, intensity, bipolar);
            }
        }
    }

    /// Compute the output of `voice` for `[start, start + num_samples)`.
    pub fn calculate_block(&mut self, voice: usize, start: usize, num_samples: usize) {
        if !self.is_prepared() || !self.valid_voice(voice) {
            return;
        }

        let Some((start_cr, num_cr)) = self.tick_range(start, num_samples) else {
            return;
        };
        let num_samples = num_samples.min(self.block_size - start);

        self.current_voice = Some(voice);
        let out_start = voice * self.block_size + start;

        if !self.should_be_processed_at_all() {
            self.current_constant = self.mode.neutral();
            self.output[out_start..out_start + num_samples].fill(self.current_constant);
            return;
        }

        // Voice-start group, ramped when it jumped.
        let constant = self.voice_constant[voice];
        let previous = self.previous_constant[voice];
        let ticks = &mut self.ticks[..num_cr];

        if (constant - previous).abs() > CONSTANT_SMOOTHING_THRESHOLD {
            fill_ramp(ticks, previous, constant);
        } else {
            ticks.fill(constant);
        }

        self.previous_constant[voice] = constant;
        self.current_constant = constant;

        // Polyphonic envelopes, in slot order.
        let mode = self.mode;
        let scratch = &mut self.scratch[..num_cr];

        for slot in self.slots.iter_mut().filter(|s| s.is_active() && !s.is_shared()) {
            let Source::Envelope(m) = &mut slot.source else {
                continue;
            };

            m.render(voice, scratch);

            let (intensity, bipolar) = (slot.intensity, slot.bipolar);
            for (t, &value) in ticks.iter_mut().zip(scratch.iter()) {
                *t = mode.apply(*t, value, intensity, bipolar);
            }
        }

        // Shared group.
        if self.slots.iter().any(|s| s.is_active() && s.is_shared()) {
            let scale = &self.shared_scale[start_cr..start_cr + num_cr];
            let offset = &self.shared_offset[start_cr..start_cr + num_cr];

            for ((t, &s), &o) in ticks.iter_mut().zip(scale).zip(offset) {
                *t = *t * s + o;
            }
        }

        sanitize_block(ticks, 0.0, 1.0, mode.neutral());

        let out = &mut self.output[out_start..out_start + num_samples];
        self.rate.expand(voice, &self.ticks[..num_cr], out);
    }

    fn tick_range(&self, start: usize, num_samples: usize) -> Option<(usize, usize)> {
        if num_samples == 0 || start >= self.block_size {
            return None;
        }

        let num_samples = num_samples.min(self.block_size - start);
        let start_cr = self.rate.tick_index(start);
        let num_cr = self
            .rate
            .num_ticks(num_samples)
            .min(self.ticks.len().saturating_sub(start_cr));

        (num_cr > 0).then_some((start_cr, num_cr))
    }

    /// Output of the last `calculate_block` voice at `sample_offset`.
    pub fn get_one_modulation_value(&self, sample_offset: usize) -> f32 {
        match self.current_voice {
            Some(voice) if self.has_time_variation() && sample_offset < self.block_size => {
                self.output[voice * self.block_size + sample_offset]
            }
            _ => self.get_constant_modulation_value(),
        }
    }

    /// Voice-start value of the last `calculate_block` voice.
    pub fn get_constant_modulation_value(&self) -> f32 {
        if self.should_be_processed_at_all() {
            self.current_constant
        } else {
            self.mode.neutral()
        }
    }

    /// Audio-rate output of `voice` for the whole block.
    pub fn voice_values(&self, voice: usize) -> &[f32] {
        if voice >= self.polyphony {
            return &[];
        }
        &self.output[voice * self.block_size..(voice + 1) * self.block_size]
    }
}

impl Stateful for ModulationChain {
    fn export_state(&self) -> StateTree {
        let mut tree = StateTree::new("ModulationChain", self.name.as_str())
            .with_property("Mode", self.mode.name())
            .with_property("Base", self.base)
            .with_property("Bypassed", self.bypassed)
            .with_property("ControlRate", self.rate.mode() == RateMode::Control)
            .with_property("HoldInterpolation", self.rate.interpolation() == Interpolation::Hold);

        tree.children = self.slots.iter().map(SourceSlot::export_state).collect();
        tree
    }

    /// Restores settings and rebuilds the source list in the tree's order.
    /// Existing sources with a matching id and type are kept; missing ones
    /// are created through the factory. Structural changes re-prepare.
    fn restore_state(&mut self, tree: &StateTree) {
        if let Some(mode) = tree.get_str("Mode").and_then(ChainMode::from_name) {
            if mode != self.mode {
                log::warn!("chain '{}': mode {:?} in state ignored, chain is {:?}", self.name, mode, self.mode);
            }
        }
        if let Some(base) = tree.get_f32("Base") {
            self.base = sanitize_unipolar(base);
        }
        if let Some(bypassed) = tree.get_bool("Bypassed") {
            self.bypassed = bypassed;
        }
        if let Some(control) = tree.get_bool("ControlRate") {
            self.rate.set_mode(if control { RateMode::Control } else { RateMode::Audio });
        }
        if let Some(hold) = tree.get_bool("HoldInterpolation") {
            self.rate
                .set_interpolation(if hold { Interpolation::Hold } else { Interpolation::Linear });
        }

        let mut previous: Vec<Option<SourceSlot>> = std::mem::take(&mut self.slots).into_iter().map(Some).collect();

        for child in &tree.children {
            let existing = previous.iter_mut().find(|s| {
                matches!(s, Some(slot) if slot.id == child.id && slot.source.type_name() == child.type_name)
            });

            let mut slot = match existing.and_then(Option::take) {
                Some(slot) => slot,
                None => match create_source(&child.type_name) {
                    Some(source) => {
                        log::info!("chain '{}': creating {} '{}'", self.name, child.type_name, child.id);
                        SourceSlot::new(child.id.as_str(), source, 1.0)
                    }
                    None => {
                        log::warn!(
                            "chain '{}': unknown source type '{}', skipping '{}'",
                            self.name,
                            child.type_name,
                            child.id
                        );
                        continue;
                    }
                },
            };

            slot.restore_state(child);
            self.slots.push(slot);
        }

        for dropped in previous.into_iter().flatten() {
            log::info!("chain '{}': removing {} '{}'", self.name, dropped.source.type_name(), dropped.id);
        }

        // Intensity, bypass and rate changes all need fresh arenas.
        self.reprepare();
    }
}

impl std::fmt::Debug for ModulationChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModulationChain")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("sources", &self.slots.iter().map(|s| s.id.as_str()).collect::<Vec<_>>())
            .field("divisor", &self.rate.divisor())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dsp::lfo::LfoWaveform,
        modulation::{
            envelope::AhdsrEnvelope,
            time_variant::{Controller, ControllerSource, Lfo},
            voice_start::{Constant, Velocity},
        },
    };

    const SAMPLE_RATE: f64 = 44_100.0;
    const BLOCK: usize = 64;

    fn prepared(mut chain: ModulationChain) -> ModulationChain {
        chain.prepare(&PrepareSpecs::new(SAMPLE_RATE, BLOCK, 4));
        chain
    }

    fn note(voice: usize, velocity: u8) -> NoteContext {
        NoteContext::from_note(voice, 60, velocity)
    }

    fn block(chain: &mut ModulationChain, voice: usize) -> Vec<f32> {
        chain.render_monophonic(0, BLOCK);
        chain.calculate_block(voice, 0, BLOCK);
        chain.voice_values(voice).to_vec()
    }

    #[test]
    fn empty_chain_is_neutral() {
        let mut gain = prepared(ModulationChain::new("gain", ChainMode::Gain));
        assert!(!gain.should_be_processed_at_all());
        assert_eq!(gain.start_voice(&note(0, 100)), 1.0);
        assert!(block(&mut gain, 0).iter().all(|&v| v == 1.0));

        let mut pan = prepared(ModulationChain::new("pan", ChainMode::Pan));
        assert_eq!(pan.get_constant_modulation_value(), 0.5);
        assert!(block(&mut pan, 0).iter().all(|&v| v == 0.5));
    }

    #[test]
    fn bypassed_sources_are_neutral() {
        let mut chain = prepared(ModulationChain::new("gain", ChainMode::Gain).with_source("vel", Source::voice_start(Velocity::new())));
        chain.set_bypassed_source(0, true);

        assert!(!chain.should_be_processed_at_all());
        assert_eq!(chain.start_voice(&note(0, 0)), 1.0);
    }

    #[test]
    fn velocity_scales_gain() {
        let mut chain = prepared(ModulationChain::new("gain", ChainMode::Gain).with_source("vel", Source::voice_start(Velocity::new())));

        let first = chain.start_voice(&note(0, 127));
        assert_eq!(first, 1.0);

        chain.start_voice(&note(1, 0));
        let values = block(&mut chain, 1);
        assert!(values.iter().all(|&v| v == 0.0));
        assert_eq!(chain.get_constant_modulation_value(), 0.0);
    }

    #[test]
    fn half_intensity_halves_the_effect() {
        let mut chain = prepared(ModulationChain::new("gain", ChainMode::Gain).with_source_intensity(
            "vel",
            Source::voice_start(Velocity::new()),
            0.5,
        ));

        assert_eq!(chain.start_voice(&note(0, 0)), 0.5);
    }

    #[test]
    fn magnitude_sources_multiply() {
        let mut chain = prepared(
            ModulationChain::new("gain", ChainMode::Gain)
                .with_source("a", Source::voice_start(Constant::new(0.5)))
                .with_source("b", Source::voice_start(Constant::new(0.5))),
        );

        assert!((chain.start_voice(&note(0, 100)) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn bipolar_blend_uses_intensity() {
        let mut chain = prepared(ModulationChain::new("pitch", ChainMode::Pitch).with_source_intensity(
            "c",
            Source::voice_start(Constant::new(1.0)),
            0.5,
        ));

        // 0.5 blended halfway toward 1.0.
        assert!((chain.start_voice(&note(0, 100)) - 0.75).abs() < 1e-6);

        chain.set_intensity(0, 0.0);
        chain.start_voice(&note(1, 100));
        assert!((block(&mut chain, 1)[BLOCK - 1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn bipolar_flag_swings_below_centre() {
        let mut chain = prepared(ModulationChain::new("pan", ChainMode::Pan).with_source("c", Source::voice_start(Constant::new(0.0))));
        chain.set_bipolar(0, true);

        assert!(chain.start_voice(&note(0, 100)).abs() < 1e-6);
    }

    #[test]
    fn envelope_drives_voice_output() {
        let mut chain = prepared(ModulationChain::new("gain", ChainMode::Gain).with_source("env", Source::envelope(AhdsrEnvelope::adsr(0.0, 0.0, 0.8, 10.0))));

        assert!((chain.start_voice(&note(0, 100)) - 0.8).abs() < 1e-6);
        assert!(chain.is_playing(0));

        let values = block(&mut chain, 0);
        assert!(values.iter().all(|&v| (v - 0.8).abs() < 1e-6));
        assert!((chain.get_one_modulation_value(10) - 0.8).abs() < 1e-6);

        chain.stop_voice(0);
        for _ in 0..20 {
            block(&mut chain, 0);
        }
        assert!(!chain.is_playing(0));
    }

    #[test]
    fn first_finished_envelope_ends_the_voice() {
        let mut chain = prepared(
            ModulationChain::new("gain", ChainMode::Gain)
                .with_source("short", Source::envelope(AhdsrEnvelope::adsr(0.0, 0.0, 1.0, 5.0)))
                .with_source("long", Source::envelope(AhdsrEnvelope::adsr(0.0, 0.0, 1.0, 5000.0))),
        );
        assert!(chain.decides_voice_lifetime());

        chain.start_voice(&note(0, 100));
        block(&mut chain, 0);
        chain.stop_voice(0);

        for _ in 0..20 {
            block(&mut chain, 0);
        }

        assert!(block(&mut chain, 0).iter().all(|&v| v == 0.0));
        assert!(!chain.is_playing(0));
    }

    #[test]
    fn voice_start_change_is_ramped() {
        let mut chain = prepared(ModulationChain::new("gain", ChainMode::Gain).with_source("c", Source::voice_start(Constant::new(0.0))));
        chain.start_voice(&note(0, 100));
        block(&mut chain, 0);

        chain.set_intensity(0, 0.0);
        let values = block(&mut chain, 0);

        assert!(values[0] < 0.1);
        assert_eq!(values[BLOCK - 1], 1.0);
        assert!(values.windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn lfo_is_shared_between_voices() {
        let mut chain = prepared(ModulationChain::new("gain", ChainMode::Gain).with_source("lfo", Source::time_variant(Lfo::new(5.0).waveform(LfoWaveform::Saw))));

        chain.start_voice(&note(0, 100));
        chain.start_voice(&note(1, 100));

        chain.render_monophonic(0, BLOCK);
        chain.calculate_block(0, 0, BLOCK);
        chain.calculate_block(1, 0, BLOCK);

        assert_eq!(chain.voice_values(0), chain.voice_values(1));
        assert!(chain.has_time_variation());
    }

    #[test]
    fn pitch_wheel_at_rest_is_neutral() {
        let mut chain = prepared(ModulationChain::new("pitch", ChainMode::Pitch).with_source("wheel", Source::time_variant(Controller::new(ControllerSource::PitchBend))));
        chain.set_bipolar(0, true);

        chain.start_voice(&note(0, 100));
        assert!(block(&mut chain, 0).iter().all(|v| (v - 0.5).abs() < 1e-6));
    }

    #[test]
    fn control_rate_matches_audio_rate_on_sustain() {
        let env = || Source::envelope(AhdsrEnvelope::adsr(0.0, 0.0, 0.6, 10.0));

        let mut audio = prepared(ModulationChain::new("a", ChainMode::Gain).with_source("env", env()));
        let mut control = prepared(
            ModulationChain::new("c", ChainMode::Gain)
                .with_source("env", env())
                .control_rate(Interpolation::Linear),
        );
        assert_eq!(control.divisor(), 8);

        audio.start_voice(&note(0, 100));
        control.start_voice(&note(0, 100));

        let a = block(&mut audio, 0);
        let c = block(&mut control, 0);
        for (x, y) in a.iter().zip(&c) {
            assert!((x - y).abs() < 1e-6);
        }
    }

    #[test]
    fn reset_is_idempotent() {
        let mut chain = prepared(ModulationChain::new("gain", ChainMode::Gain).with_source("env", Source::envelope(AhdsrEnvelope::new())));
        chain.start_voice(&note(2, 100));
        block(&mut chain, 2);

        chain.reset(2);
        chain.reset(2);
        assert!(!chain.is_playing(2));
        assert_eq!(chain.envelope_phase(2), EnvelopePhase::Idle);
    }

    #[test]
    fn export_restore_round_trip() {
        let mut chain = ModulationChain::new("gain", ChainMode::Gain)
            .with_source_intensity("vel", Source::voice_start(Velocity::new()), 0.3)
            .with_source("env", Source::envelope(AhdsrEnvelope::adsr(12.0, 80.0, 0.4, 200.0)));
        chain.set_bypassed_source(0, true);

        let tree = chain.export_state();

        let mut restored = ModulationChain::new("gain", ChainMode::Gain);
        restored.restore_state(&tree);

        assert_eq!(restored.num_sources(), 2);
        assert_eq!(restored.export_state(), tree);
        assert_eq!(restored.slot(0).map(SourceSlot::intensity), Some(0.3));
        assert_eq!(restored.slot(0).map(SourceSlot::is_bypassed), Some(true));
    }
}
