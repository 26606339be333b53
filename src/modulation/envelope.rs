use crate::{
    dsp::{
        curve::{Curve, CurveConfig},
        envelope::{EnvelopeContext, EnvelopePhase, EnvelopeState, StageParams},
    },
    io::midi::{MidiEvent, SUSTAIN_PEDAL},
    modulation::{
        attribute::{AttributeInfo, Attributes},
        source::{EnvelopeModulator, Modulator, NoteContext, PrepareSpecs},
    },
    synth::mono::{MonoAction, MonophonicAggregator},
};

/// Longest stage time in milliseconds.
pub const MAX_STAGE_MS: f32 = 20_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeAttribute {
    Monophonic = 0,
    Retrigger,
    Attack,
    AttackLevel,
    Hold,
    Decay,
    Sustain,
    Release,
    AttackCurve,
    DecayCurve,
    /// How much velocity shortens the attack (0 = off).
    VelocityToAttack,
}

impl EnvelopeAttribute {
    pub const ALL: [EnvelopeAttribute; 11] = [
        EnvelopeAttribute::Monophonic,
        EnvelopeAttribute::Retrigger,
        EnvelopeAttribute::Attack,
        EnvelopeAttribute::AttackLevel,
        EnvelopeAttribute::Hold,
        EnvelopeAttribute::Decay,
        EnvelopeAttribute::Sustain,
        EnvelopeAttribute::Release,
        EnvelopeAttribute::AttackCurve,
        EnvelopeAttribute::DecayCurve,
        EnvelopeAttribute::VelocityToAttack,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

const ATTRIBUTES: &[AttributeInfo] = &[
    AttributeInfo::toggle("Monophonic", false),
    AttributeInfo::toggle("Retrigger", true),
    AttributeInfo::new("Attack", 0.0, MAX_STAGE_MS, 10.0),
    AttributeInfo::new("AttackLevel", 0.0, 1.0, 1.0),
    AttributeInfo::new("Hold", 0.0, MAX_STAGE_MS, 0.0),
    AttributeInfo::new("Decay", 0.0, MAX_STAGE_MS, 300.0),
    AttributeInfo::new("Sustain", 0.0, 1.0, 0.5),
    AttributeInfo::new("Release", 0.0, MAX_STAGE_MS, 20.0),
    AttributeInfo::new("AttackCurve", 0.0, 1.0, 0.0),
    AttributeInfo::new("DecayCurve", 0.0, 1.0, 1.0),
    AttributeInfo::new("VelocityToAttack", 0.0, 1.0, 0.0),
];

/// Attack/hold/decay/sustain/release envelope modulator.
///
/// Polyphonic mode keeps one [`EnvelopeState`] per voice in a flat arena
/// sized at prepare time. Monophonic mode drives a single shared state
/// through a [`MonophonicAggregator`]; every voice reads the same value.
pub struct AhdsrEnvelope {
    params: StageParams,
    monophonic: bool,
    retrigger: bool,
    velocity_to_attack: f32,

    curves: CurveConfig,
    ctx: EnvelopeContext,

    states: Vec<EnvelopeState>,
    /// Key that started each voice, for monophonic note-offs.
    voice_keys: Vec<Option<u8>>,
    shared: EnvelopeState,
    mono: MonophonicAggregator,
}

impl Default for AhdsrEnvelope {
    fn default() -> Self {
        Self::new()
    }
}

impl AhdsrEnvelope {
    pub fn new() -> Self {
        Self::with_params(StageParams::default())
    }

    pub fn with_params(params: StageParams) -> Self {
        let curves = CurveConfig::default();

        Self {
            params: params.clamped(),
            monophonic: false,
            retrigger: true,
            velocity_to_attack: 0.0,
            curves,
            ctx: EnvelopeContext::new(44_100.0, 0, curves),
            states: Vec::new(),
            voice_keys: Vec::new(),
            shared: EnvelopeState::new(),
            mono: MonophonicAggregator::new(true),
        }
    }

    /// Classic ADSR with times in milliseconds.
    pub fn adsr(attack_ms: f32, decay_ms: f32, sustain: f32, release_ms: f32) -> Self {
        Self::with_params(StageParams::adsr(attack_ms, decay_ms, sustain, release_ms))
    }

    pub fn monophonic(mut self, monophonic: bool) -> Self {
        self.set_monophonic(monophonic);
        self
    }

    pub fn retrigger(mut self, retrigger: bool) -> Self {
        self.set_retrigger(retrigger);
        self
    }

    /// Replace the curve tuning. Takes effect at the next prepare.
    pub fn with_curves(mut self, curves: CurveConfig) -> Self {
        self.curves = curves.sanitized();
        self
    }

    pub fn params(&self) -> &StageParams {
        &self.params
    }

    pub fn set_params(&mut self, params: StageParams) {
        self.params = params.clamped();
        self.refresh_all();
    }

    pub fn is_retrigger(&self) -> bool {
        self.retrigger
    }

    /// Per-sample step of the retrigger ramp at the prepared rate.
    pub fn retrigger_step(&self) -> f32 {
        self.ctx.retrigger_step()
    }

    pub fn pressed_key_count(&self) -> u32 {
        self.mono.pressed_key_count()
    }

    pub fn value(&self, voice: usize) -> f32 {
        self.state(voice).map_or(0.0, EnvelopeState::value)
    }

    fn set_monophonic(&mut self, monophonic: bool) {
        if monophonic == self.monophonic {
            return;
        }

        self.monophonic = monophonic;
        self.shared.reset();
        self.mono.clear();
        for state in self.states.iter_mut() {
            state.reset();
        }
    }

    fn set_retrigger(&mut self, retrigger: bool) {
        self.retrigger = retrigger;
        self.mono.set_retrigger(retrigger);
    }

    fn refresh_all(&mut self) {
        let (params, ctx) = (self.params, self.ctx);

        self.shared.refresh(&params, &ctx);
        for state in self.states.iter_mut() {
            state.refresh(&params, &ctx);
        }
    }

    fn attack_scale(&self, velocity: f32) -> f32 {
        (1.0 - self.velocity_to_attack * velocity.clamp(0.0, 1.0)).max(0.0)
    }

    fn state(&self, voice: usize) -> Option<&EnvelopeState> {
        if self.monophonic {
            return Some(&self.shared);
        }

        debug_assert!(voice < self.states.len(), "voice index {} out of range", voice);
        self.states.get(voice)
    }

    fn apply_mono_action(&mut self, action: MonoAction, attack_scale: f32) {
        let (params, ctx) = (self.params, self.ctx);

        match action {
            MonoAction::Restart => {
                self.shared.start(&params, &ctx, attack_scale, self.retrigger);
            }
            MonoAction::Retrigger => {
                self.shared.start(&params, &ctx, attack_scale, true);
            }
            MonoAction::Legato => {
                self.shared.refresh(&params, &ctx);
            }
            MonoAction::Release => self.shared.stop(),
            MonoAction::None => {}
        }
    }
}

impl Attributes for AhdsrEnvelope {
    fn attribute_table(&self) -> &'static [AttributeInfo] {
        ATTRIBUTES
    }

    fn get_attribute(&self, index: usize) -> f32 {
        let p = &self.params;

        match EnvelopeAttribute::from_index(index) {
            Some(EnvelopeAttribute::Monophonic) => self.monophonic as u8 as f32,
            Some(EnvelopeAttribute::Retrigger) => self.retrigger as u8 as f32,
            Some(EnvelopeAttribute::Attack) => p.attack_ms,
            Some(EnvelopeAttribute::AttackLevel) => p.attack_level,
            Some(EnvelopeAttribute::Hold) => p.hold_ms,
            Some(EnvelopeAttribute::Decay) => p.decay_ms,
            Some(EnvelopeAttribute::Sustain) => p.sustain,
            Some(EnvelopeAttribute::Release) => p.release_ms,
            Some(EnvelopeAttribute::AttackCurve) => p.attack_curve.as_attribute(),
            Some(EnvelopeAttribute::DecayCurve) => p.decay_curve.as_attribute(),
            Some(EnvelopeAttribute::VelocityToAttack) => self.velocity_to_attack,
            None => 0.0,
        }
    }

    fn set_attribute(&mut self, index: usize, value: f32) {
        let (Some(attribute), Some(info)) = (EnvelopeAttribute::from_index(index), ATTRIBUTES.get(index))
        else {
            return;
        };

        let value = info.clamp(value);

        match attribute {
            EnvelopeAttribute::Monophonic => return self.set_monophonic(value > 0.5),
            EnvelopeAttribute::Retrigger => return self.set_retrigger(value > 0.5),
            EnvelopeAttribute::VelocityToAttack => {
                self.velocity_to_attack = value;
                return;
            }
            _ => {}
        }

        let p = &mut self.params;
        match attribute {
            EnvelopeAttribute::Monophonic
            | EnvelopeAttribute::Retrigger
            | EnvelopeAttribute::VelocityToAttack => {}
            EnvelopeAttribute::Attack => p.attack_ms = value,
            EnvelopeAttribute::AttackLevel => p.attack_level = value,
            EnvelopeAttribute::Hold => p.hold_ms = value,
            EnvelopeAttribute::Decay => p.decay_ms = value,
            EnvelopeAttribute::Sustain => p.sustain = value,
            EnvelopeAttribute::Release => p.release_ms = value,
            EnvelopeAttribute::AttackCurve => p.attack_curve = Curve::from_attribute(value),
            EnvelopeAttribute::DecayCurve => p.decay_curve = Curve::from_attribute(value),
        }

        self.refresh_all();
    }
}

impl Modulator for AhdsrEnvelope {
    fn type_name(&self) -> &'static str {
        "AhdsrEnvelope"
    }

    fn prepare(&mut self, specs: &PrepareSpecs) {
        self.ctx = EnvelopeContext::new(specs.sample_rate as f32, specs.block_size, self.curves);

        if self.states.len() != specs.polyphony {
            log::debug!(
                "AhdsrEnvelope: resizing voice arena {} -> {}",
                self.states.len(),
                specs.polyphony
            );
            self.states.clear();
            self.states.resize(specs.polyphony, EnvelopeState::new());
            self.voice_keys.clear();
            self.voice_keys.resize(specs.polyphony, None);
        }

        self.refresh_all();
    }

    fn handle_event(&mut self, event: &MidiEvent) {
        if !self.monophonic {
            return;
        }

        let action = match *event {
            MidiEvent::ControlChange {
                controller: SUSTAIN_PEDAL,
                value,
                ..
            } => self.mono.set_pedal(value >= 64),
            MidiEvent::AllNotesOff { .. } => self.mono.all_notes_off(),
            _ => MonoAction::None,
        };

        self.apply_mono_action(action, 1.0);
    }
}

impl EnvelopeModulator for AhdsrEnvelope {
    fn start_voice(&mut self, note: &NoteContext) -> f32 {
        let attack_scale = self.attack_scale(note.velocity);

        if let Some(key) = self.voice_keys.get_mut(note.voice) {
            *key = Some(note.key);
        }

        if self.monophonic {
            let action = self.mono.note_on(note.key);
            self.apply_mono_action(action, attack_scale);
            return self.shared.value();
        }

        debug_assert!(note.voice < self.states.len(), "voice index {} out of range", note.voice);

        let (params, ctx, retrigger) = (self.params, self.ctx, self.retrigger);
        match self.states.get_mut(note.voice) {
            Some(state) => state.start(&params, &ctx, attack_scale, retrigger),
            None => 0.0,
        }
    }

    fn stop_voice(&mut self, voice: usize) {
        if self.monophonic {
            if let Some(key) = self.voice_keys.get_mut(voice).and_then(Option::take) {
                let action = self.mono.note_off(key);
                self.apply_mono_action(action, 1.0);
            }
            return;
        }

        debug_assert!(voice < self.states.len(), "voice index {} out of range", voice);
        if let Some(state) = self.states.get_mut(voice) {
            state.stop();
        }
    }

    fn reset(&mut self, voice: usize) {
        if self.monophonic {
            // A stolen voice drops its key without a release.
            if let Some(key) = self.voice_keys.get_mut(voice).and_then(Option::take) {
                self.mono.note_off(key);
            }

            // The shared state belongs to every voice; only the last one may reset it.
            if self.mono.pressed_key_count() == 0 {
                self.shared.reset();
            }
            return;
        }

        debug_assert!(voice < self.states.len(), "voice index {} out of range", voice);
        if let Some(state) = self.states.get_mut(voice) {
            state.reset();
        }
    }

    fn render(&mut self, voice: usize, out: &mut [f32]) {
        if self.monophonic {
            return;
        }

        match self.states.get_mut(voice) {
            Some(state) => state.render(out),
            None => out.fill(0.0),
        }
    }

    fn render_shared(&mut self, out: &mut [f32]) {
        self.shared.render(out);
    }

    fn reset_shared(&mut self) {
        self.mono.clear();
        self.shared.reset();
    }

    fn is_playing(&self, voice: usize) -> bool {
        self.state(voice).is_some_and(EnvelopeState::is_playing)
    }

    fn is_monophonic(&self) -> bool {
        self.monophonic
    }

    fn phase(&self, voice: usize) -> EnvelopePhase {
        self.state(voice).map_or(EnvelopePhase::Idle, EnvelopeState::phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: f64 = 44_100.0;

    fn prepared(env: AhdsrEnvelope) -> AhdsrEnvelope {
        let mut env = env;
        env.prepare(&PrepareSpecs::new(SAMPLE_RATE, 512, 4));
        env
    }

    fn note(voice: usize, key: u8) -> NoteContext {
        NoteContext::from_note(voice, key, 100)
    }

    fn render(env: &mut AhdsrEnvelope, voice: usize, samples: usize) -> Vec<f32> {
        let mut out = vec![0.0; samples];
        if env.is_monophonic() {
            env.render_shared(&mut out);
        } else {
            env.render(voice, &mut out);
        }
        out
    }

    #[test]
    fn voices_are_independent() {
        let mut env = prepared(AhdsrEnvelope::adsr(10.0, 100.0, 0.5, 50.0));

        env.start_voice(&note(0, 60));
        render(&mut env, 0, 200);
        env.start_voice(&note(1, 64));

        assert!(env.value(0) > 0.4);
        assert_eq!(env.value(1), 0.0);
        assert_eq!(env.phase(1), EnvelopePhase::Attack);
        assert!(!env.is_playing(2));
    }

    #[test]
    fn zero_attack_returns_sustain() {
        let mut env = prepared(AhdsrEnvelope::adsr(0.0, 0.0, 0.25, 50.0));
        let first = env.start_voice(&note(0, 60));

        assert!((first - 0.25).abs() < 1e-6);
        assert_eq!(env.phase(0), EnvelopePhase::Sustain);
    }

    #[test]
    fn attribute_changes_apply_to_running_voices() {
        let mut env = prepared(AhdsrEnvelope::adsr(0.0, 0.0, 0.5, 50.0));
        env.start_voice(&note(0, 60));

        env.set_attribute(EnvelopeAttribute::Sustain.index(), 0.8);
        let block = render(&mut env, 0, 512);

        assert!(block[0] < 0.8);
        assert!((block[511] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn attribute_values_are_clamped() {
        let mut env = AhdsrEnvelope::new();
        env.set_attribute(EnvelopeAttribute::Attack.index(), -5.0);
        env.set_attribute(EnvelopeAttribute::Sustain.index(), 3.0);
        env.set_attribute(EnvelopeAttribute::Release.index(), 1e9);

        assert_eq!(env.get_attribute(EnvelopeAttribute::Attack.index()), 0.0);
        assert_eq!(env.get_attribute(EnvelopeAttribute::Sustain.index()), 1.0);
        assert_eq!(env.get_attribute(EnvelopeAttribute::Release.index()), MAX_STAGE_MS);
    }

    #[test]
    fn velocity_shortens_attack() {
        let mut env = prepared(AhdsrEnvelope::adsr(10.0, 100.0, 0.5, 50.0));
        env.set_attribute(EnvelopeAttribute::VelocityToAttack.index(), 1.0);

        env.start_voice(&NoteContext::from_note(0, 60, 127));
        env.start_voice(&NoteContext::from_note(1, 60, 0));

        assert_eq!(env.phase(0), EnvelopePhase::Decay);
        assert_eq!(env.phase(1), EnvelopePhase::Attack);
    }

    #[test]
    fn mono_legato_keeps_phase() {
        let mut env = prepared(AhdsrEnvelope::adsr(10.0, 100.0, 0.5, 50.0).monophonic(true).retrigger(false));

        env.start_voice(&note(0, 60));
        render(&mut env, 0, 1000);
        let before = env.phase(0);
        assert_eq!(before, EnvelopePhase::Decay);

        env.start_voice(&note(1, 64));
        assert_eq!(env.phase(1), before);
        assert_eq!(env.pressed_key_count(), 2);
    }

    #[test]
    fn mono_retrigger_ramps() {
        let mut env = prepared(AhdsrEnvelope::adsr(10.0, 100.0, 0.5, 50.0).monophonic(true));

        env.start_voice(&note(0, 60));
        render(&mut env, 0, 1000);

        env.start_voice(&note(1, 64));
        assert_eq!(env.phase(1), EnvelopePhase::Retrigger);
    }

    #[test]
    fn mono_releases_after_last_key() {
        let mut env = prepared(AhdsrEnvelope::adsr(1.0, 10.0, 0.5, 50.0).monophonic(true).retrigger(false));

        env.start_voice(&note(0, 60));
        env.start_voice(&note(1, 64));
        render(&mut env, 0, 500);

        env.stop_voice(0);
        assert_eq!(env.phase(0), EnvelopePhase::Sustain);

        env.stop_voice(1);
        assert_eq!(env.phase(0), EnvelopePhase::Release);

        // A second note-off for the same voice must not disturb anything.
        env.stop_voice(1);
        assert_eq!(env.pressed_key_count(), 0);
    }

    #[test]
    fn mono_sustain_pedal_defers_release() {
        let mut env = prepared(AhdsrEnvelope::adsr(1.0, 10.0, 0.5, 50.0).monophonic(true));

        env.start_voice(&note(0, 60));
        render(&mut env, 0, 500);

        let pedal = |value| MidiEvent::ControlChange {
            channel: 1,
            controller: SUSTAIN_PEDAL,
            value,
        };

        env.handle_event(&pedal(127));
        env.stop_voice(0);
        assert_eq!(env.phase(0), EnvelopePhase::Sustain);

        env.handle_event(&pedal(0));
        assert_eq!(env.phase(0), EnvelopePhase::Release);
    }

    #[test]
    fn mono_reset_waits_for_last_key() {
        let mut env = prepared(AhdsrEnvelope::adsr(1.0, 10.0, 0.5, 50.0).monophonic(true).retrigger(false));

        env.start_voice(&note(0, 60));
        env.start_voice(&note(1, 64));
        render(&mut env, 0, 100);

        env.reset(0);
        assert!(env.is_playing(1));
    }

    #[test]
    fn retrigger_step_matches_ramp_time() {
        let env = prepared(AhdsrEnvelope::new());
        let expected = 1.0 / (1.5e-3 * SAMPLE_RATE as f32);
        assert!((env.retrigger_step() - expected).abs() < 1e-6);
    }
}
