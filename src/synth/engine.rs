#[cfg(feature = "rtrb")]
use crate::bridge::{DisplayValue, EngineBridge};
use crate::{
    io::midi::{MidiEvent, PerformanceEvent},
    modulation::{
        chain::ModulationChain,
        source::{NoteContext, PrepareSpecs},
    },
    state::{StateTree, Stateful},
    synth::{
        allocator::{Allocation, VoiceSlotTable},
        message::{ControlMessage, MessageReceiver},
        voice::VoiceSlot,
    },
    MAX_BLOCK_SIZE, MAX_POLYPHONY,
};

/*
Block Processing
================

A host block arrives with a list of events, each at a sample offset. The
engine splits the block at every event so that a note starting at sample 100
is silent before 100 and sounding from 100 on:

    events:     on(60)@0          off(60)@100     on(64)@300
    segments:   [0 ........ 100)  [100 ...... 300)  [300 ...... 512)

For every segment:

    1. apply the events at the segment start (start / stop / controllers)
    2. every chain renders its shared sources once
    3. every chain computes every active voice

Offsets are snapped down to the event raster, a multiple of every chain's
control-rate divisor, so segments always start on a control tick.

After the block, releasing voices that no chain reports as playing are freed.
*/

/// Engine-wide configuration, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub polyphony: usize,
    pub max_block_size: usize,
    /// Minimum event raster in samples. Raised to the largest control-rate
    /// divisor of the chains at prepare time.
    pub event_raster: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            polyphony: 64,
            max_block_size: MAX_BLOCK_SIZE,
            event_raster: 1,
        }
    }
}

impl EngineConfig {
    pub fn polyphony(mut self, polyphony: usize) -> Self {
        self.polyphony = polyphony;
        self
    }

    pub fn max_block_size(mut self, max_block_size: usize) -> Self {
        self.max_block_size = max_block_size;
        self
    }

    pub fn event_raster(mut self, event_raster: usize) -> Self {
        self.event_raster = event_raster;
        self
    }

    fn sanitized(self) -> Self {
        let polyphony = self.polyphony.clamp(1, MAX_POLYPHONY);
        let max_block_size = self.max_block_size.clamp(1, MAX_BLOCK_SIZE);
        let event_raster = self.event_raster.max(1).next_power_of_two();

        if polyphony != self.polyphony {
            log::warn!("polyphony {} clamped to {}", self.polyphony, polyphony);
        }
        if max_block_size != self.max_block_size {
            log::warn!("max block size {} clamped to {}", self.max_block_size, max_block_size);
        }

        Self {
            polyphony,
            max_block_size,
            event_raster,
        }
    }
}

/// Owns the voice slot table and the modulation chains and drives them
/// block by block.
pub struct ModulationEngine {
    config: EngineConfig,
    chains: Vec<ModulationChain>,
    voices: VoiceSlotTable,
    sample_rate: f64,
    block_size: usize,
    raster: usize,
    prepared: bool,
    frame_counter: u64,
    last_started: Option<usize>,
    #[cfg(feature = "rtrb")]
    bridge: Option<EngineBridge>,
}

impl Default for ModulationEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl ModulationEngine {
    pub fn new(config: EngineConfig) -> Self {
        let config = config.sanitized();

        Self {
            config,
            chains: Vec::new(),
            voices: VoiceSlotTable::new(config.polyphony),
            sample_rate: 0.0,
            block_size: 0,
            raster: config.event_raster,
            prepared: false,
            frame_counter: 0,
            last_started: None,
            #[cfg(feature = "rtrb")]
            bridge: None,
        }
    }

    pub fn with_chain(mut self, chain: ModulationChain) -> Self {
        self.add_chain(chain);
        self
    }

    /// Structural change; prepares the chain if the engine is prepared.
    pub fn add_chain(&mut self, mut chain: ModulationChain) -> usize {
        if self.prepared {
            chain.prepare(&self.specs());
        }

        self.chains.push(chain);
        self.update_raster();
        self.chains.len() - 1
    }

    #[cfg(feature = "rtrb")]
    pub fn attach_bridge(&mut self, bridge: EngineBridge) {
        self.bridge = Some(bridge);
    }

    fn specs(&self) -> PrepareSpecs {
        PrepareSpecs::new(self.sample_rate, self.block_size, self.config.polyphony)
    }

    /// Size every arena for `sample_rate` and `block_size`. Must be called
    /// before processing and whenever either changes. Not realtime safe.
    pub fn prepare(&mut self, sample_rate: f64, block_size: usize) {
        let block_size = if block_size == 0 || block_size > self.config.max_block_size {
            let clamped = block_size.clamp(1, self.config.max_block_size);
            log::warn!("block size {} clamped to {}", block_size, clamped);
            clamped
        } else {
            block_size
        };

        let sample_rate = if sample_rate.is_finite() && sample_rate > 0.0 {
            sample_rate
        } else {
            log::warn!("invalid sample rate {}, using 44100", sample_rate);
            44_100.0
        };

        self.sample_rate = sample_rate;
        self.block_size = block_size;

        let specs = self.specs();
        for chain in self.chains.iter_mut() {
            chain.prepare(&specs);
        }

        self.voices.free_all();
        self.last_started = None;
        self.prepared = true;
        self.update_raster();

        log::info!(
            "engine prepared: {} Hz, block {}, {} voices, {} chains, event raster {}",
            sample_rate,
            block_size,
            self.config.polyphony,
            self.chains.len(),
            self.raster
        );
    }

    fn update_raster(&mut self) {
        let largest = self.chains.iter().map(ModulationChain::divisor).max().unwrap_or(1);
        self.raster = self.config.event_raster.max(largest);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn event_raster(&self) -> usize {
        self.raster
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    pub fn chains(&self) -> &[ModulationChain] {
        &self.chains
    }

    pub fn chain(&self, index: usize) -> Option<&ModulationChain> {
        self.chains.get(index)
    }

    pub fn chain_mut(&mut self, index: usize) -> Option<&mut ModulationChain> {
        self.chains.get_mut(index)
    }

    pub fn find_chain(&self, name: &str) -> Option<usize> {
        self.chains.iter().position(|c| c.name() == name)
    }

    pub fn voice(&self, voice: usize) -> Option<&VoiceSlot> {
        self.voices.get(voice)
    }

    pub fn num_active_voices(&self) -> usize {
        self.voices.num_active()
    }

    pub fn steal_count(&self) -> u64 {
        self.voices.steal_count()
    }

    pub fn last_started_voice(&self) -> Option<usize> {
        self.last_started
    }

    /// Output of `chain` for `voice` over the last processed block.
    pub fn voice_values(&self, chain: usize, voice: usize) -> &[f32] {
        match self.chains.get(chain) {
            Some(c) => c.voice_values(voice),
            None => &[],
        }
    }

    /// The voice slot is in use and at least one chain still sounds it.
    pub fn is_playing(&self, voice: usize) -> bool {
        match self.voices.get(voice) {
            Some(slot) if slot.is_held() => true,
            Some(slot) if slot.is_active() => self.voice_sounds(voice),
            _ => false,
        }
    }

    /// Gain chains with envelopes decide, and every one of them must still
    /// play. Without such a chain any playing chain keeps the voice.
    fn voice_sounds(&self, voice: usize) -> bool {
        let mut deciding = self.chains.iter().filter(|c| c.decides_voice_lifetime()).peekable();

        if deciding.peek().is_some() {
            deciding.all(|c| c.is_playing(voice))
        } else {
            self.chains.iter().any(|c| c.is_playing(voice))
        }
    }

    /// Start a note immediately. Returns the voice it landed on.
    pub fn note_on(&mut self, key: u8, velocity: u8) -> Option<usize> {
        let allocation = self.voices.allocate()?;
        let voice = allocation.voice();

        if let Allocation::Stolen(_) = allocation {
            for chain in self.chains.iter_mut() {
                chain.reset(voice);
            }
        }

        self.voices.start(voice, key, velocity, self.frame_counter);

        let note = NoteContext::from_note(voice, key, velocity);
        for chain in self.chains.iter_mut() {
            chain.start_voice(&note);
        }

        self.last_started = Some(voice);
        Some(voice)
    }

    /// Release the oldest held voice playing `key`.
    pub fn note_off(&mut self, key: u8) -> Option<usize> {
        let voice = self.voices.find_held(key)?;
        self.stop_voice(voice);
        Some(voice)
    }

    fn stop_voice(&mut self, voice: usize) {
        if self.voices.release(voice) {
            for chain in self.chains.iter_mut() {
                chain.stop_voice(voice);
            }
        }
    }

    /// Release every held voice.
    pub fn all_notes_off(&mut self) {
        for voice in 0..self.voices.capacity() {
            self.stop_voice(voice);
        }
    }

    /// Hard-stop every voice and reset shared sources. Idempotent.
    pub fn reset(&mut self) {
        for chain in self.chains.iter_mut() {
            for voice in 0..self.config.polyphony {
                chain.reset(voice);
            }
            chain.reset_shared();
        }

        self.voices.free_all();
        self.last_started = None;
    }

    fn handle_event(&mut self, event: &MidiEvent) {
        match *event {
            MidiEvent::NoteOn { key, velocity, .. } if velocity > 0 => {
                self.note_on(key, velocity);
            }
            MidiEvent::NoteOn { key, .. } | MidiEvent::NoteOff { key, .. } => {
                self.note_off(key);
            }
            MidiEvent::AllNotesOff { .. } => {
                for chain in self.chains.iter_mut() {
                    chain.handle_event(event);
                }
                self.all_notes_off();
            }
            _ => {
                for chain in self.chains.iter_mut() {
                    chain.handle_event(event);
                }
            }
        }
    }

    /// Apply one control message. Realtime safe.
    pub fn apply_message(&mut self, message: ControlMessage) {
        match message {
            ControlMessage::SetAttribute {
                chain,
                slot,
                index,
                value,
            } => {
                if let Some(c) = self.chains.get_mut(chain) {
                    c.set_source_attribute(slot, index, value);
                }
            }
            ControlMessage::SetIntensity { chain, slot, intensity } => {
                if let Some(c) = self.chains.get_mut(chain) {
                    c.set_intensity(slot, intensity);
                }
            }
            ControlMessage::SetBypassed { chain, slot, bypassed } => {
                if let Some(c) = self.chains.get_mut(chain) {
                    c.set_bypassed_source(slot, bypassed);
                }
            }
            ControlMessage::AllNotesOff => self.handle_event(&MidiEvent::AllNotesOff { channel: 1 }),
        }
    }

    /// Apply every pending message from `rx`.
    pub fn drain_messages<R: MessageReceiver + ?Sized>(&mut self, rx: &mut R) {
        while let Some(message) = rx.pop() {
            self.apply_message(message);
        }
    }

    /// Process one block of `num_samples` with `events` sorted by offset.
    pub fn process_block(&mut self, events: &[PerformanceEvent], num_samples: usize) {
        debug_assert!(self.prepared, "process_block called before prepare");
        if !self.prepared || num_samples == 0 {
            return;
        }

        let num_samples = num_samples.min(self.block_size);

        #[cfg(feature = "rtrb")]
        if let Some(mut bridge) = self.bridge.take() {
            self.drain_messages(&mut bridge.controls);
            self.bridge = Some(bridge);
        }

        let raster = self.raster;
        let mut start = 0;
        let mut pending = events.iter().peekable();

        while start < num_samples {
            while let Some(event) = pending.next_if(|e| rasterize(e.offset, num_samples, raster) <= start) {
                self.handle_event(&event.event);
            }

            let end = pending
                .peek()
                .map_or(num_samples, |e| rasterize(e.offset, num_samples, raster))
                .max(start + 1)
                .min(num_samples);

            self.render_segment(start, end - start);
            start = end;
        }

        self.free_finished_voices();
        self.publish_display(num_samples);

        self.frame_counter += num_samples as u64;
    }

    fn render_segment(&mut self, start: usize, num_samples: usize) {
        for chain in self.chains.iter_mut() {
            chain.render_monophonic(start, num_samples);

            for voice in self.voices.active() {
                chain.calculate_block(voice, start, num_samples);
            }
        }
    }

    fn free_finished_voices(&mut self) {
        for voice in 0..self.voices.capacity() {
            let releasing = self.voices.get(voice).is_some_and(|v| v.is_active() && !v.is_held());

            if releasing && !self.voice_sounds(voice) {
                self.voices.free(voice);
                if self.last_started == Some(voice) {
                    self.last_started = None;
                }
            }
        }
    }

    #[cfg(feature = "rtrb")]
    fn publish_display(&mut self, num_samples: usize) {
        let (Some(bridge), Some(voice)) = (self.bridge.as_mut(), self.last_started) else {
            return;
        };

        for (index, chain) in self.chains.iter().enumerate() {
            let value = chain
                .voice_values(voice)
                .get(num_samples - 1)
                .copied()
                .unwrap_or_else(|| chain.neutral());

            bridge.publish(DisplayValue {
                chain: index,
                voice,
                value,
                phase: chain.envelope_phase(voice),
            });
        }
    }

    #[cfg(not(feature = "rtrb"))]
    fn publish_display(&mut self, _num_samples: usize) {}
}

/// Snap `offset` down to the raster, keeping it inside the block.
fn rasterize(offset: usize, num_samples: usize, raster: usize) -> usize {
    let offset = offset.min(num_samples.saturating_sub(1));
    offset - offset % raster.max(1)
}

impl Stateful for ModulationEngine {
    fn export_state(&self) -> StateTree {
        let mut tree = StateTree::new("ModulationEngine", "engine")
            .with_property("Polyphony", self.config.polyphony as f32);
        tree.children = self.chains.iter().map(Stateful::export_state).collect();
        tree
    }

    /// Restores chains matched by name. Every voice is stopped.
    fn restore_state(&mut self, tree: &StateTree) {
        if let Some(polyphony) = tree.get_f32("Polyphony") {
            if polyphony as usize != self.config.polyphony {
                log::warn!(
                    "state was saved with polyphony {}, engine has {}",
                    polyphony,
                    self.config.polyphony
                );
            }
        }

        for child in &tree.children {
            match self.chains.iter_mut().find(|c| c.name() == child.id) {
                Some(chain) => chain.restore_state(child),
                None => log::warn!("no chain named '{}', skipping", child.id),
            }
        }

        self.voices.free_all();
        self.last_started = None;
        self.update_raster();
    }
}

impl std::fmt::Debug for ModulationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModulationEngine")
            .field("config", &self.config)
            .field("chains", &self.chains)
            .field("sample_rate", &self.sample_rate)
            .field("block_size", &self.block_size)
            .field("active_voices", &self.voices.num_active())
            .finish()
    }
}
