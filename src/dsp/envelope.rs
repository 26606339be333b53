use crate::dsp::{
    curve::{
        attack_coefficients, decay_coefficients, ms_to_samples, release_coefficients, Curve,
        CurveConfig, StageCoefficients,
    },
    ramp::LinearRamp,
    sanitize::sanitize_unipolar,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/*
AHDSR Envelope State Machine
============================

This module implements the per-voice envelope state and the state machine
that advances it. Everything here is plain data and arithmetic: no
allocation, no locking, one `match` per sample.

Vocabulary
----------

  value       The envelope's current output (0.0 to 1.0).

  phase       Which stage the state machine is in (see below).

  attack      Rise from 0 toward the attack level (usually 1.0).

  hold        Stay at the attack level for a fixed time.

  decay       Fall from the attack level toward the sustain level.

  sustain     Stay at the sustain level while the key is held. If the
              sustain level changes, ramp to it across one block.

  release     Fall from wherever we are toward 0 after note-off.

  retrigger   A short, fixed-rate ramp down to 0 before a new attack, used
              when a note starts while the envelope is still sounding.


The State Machine
-----------------

                      start (not sounding)
        ┌──────┐  ─────────────────────────→  ┌────────┐
        │ Idle │                              │ Attack │
        └──────┘  ←──┐                        └────────┘
            ↑        │ value < ε                  │ value ≥ level
            │    ┌─────────┐                  ┌──────┐
            │    │ Release │ ←── stop ─────── │ Hold │ (skipped if hold = 0)
            │    └─────────┘                  └──────┘
            │         ↑                           │ hold elapsed
            │         │ stop                  ┌───────┐
            │         └────────────────────── │ Decay │
            │                                 └───────┘
            │                                     │ value ≤ sustain
            │                                 ┌─────────┐
            │                                 │ Sustain │
            │                                 └─────────┘
            │
            │   start (still sounding, retrigger allowed)
            │        any phase ──→ Retrigger ──(value = 0)──→ Attack

`stop` moves every non-idle phase to Release, starting from the CURRENT
value, so releasing during the attack does not click.


Coefficients
------------

Each state caches its own coefficients (see `dsp/curve.rs`). They are
recomputed by `refresh` whenever the rate or a stage parameter changes, and
at every `start` (where a per-voice attack scaling may apply). Nothing is
ever left stale.


Numeric Guards
--------------

After every update the value is clamped to [0, 1] and values below 1e-10
are flushed to exact zero (`dsp/sanitize.rs`).
*/

/// Release finishes (and the voice may be freed) once the value drops below this.
pub const RELEASE_EPSILON: f32 = 0.0001;

/// Attack completes when the value is this close to the attack level.
const ATTACK_TOLERANCE: f32 = 1e-4;

/// Decay completes when the value is this close to the sustain level.
const DECAY_TOLERANCE: f32 = 1e-5;

/// The phase of a per-voice envelope state.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvelopePhase {
    #[default]
    Idle,
    Attack,
    Hold,
    Decay,
    Sustain,
    Retrigger,
    Release,
}

impl EnvelopePhase {
    /// Small integer code for display snapshots.
    pub fn code(self) -> u8 {
        match self {
            EnvelopePhase::Idle => 0,
            EnvelopePhase::Attack => 1,
            EnvelopePhase::Hold => 2,
            EnvelopePhase::Decay => 3,
            EnvelopePhase::Sustain => 4,
            EnvelopePhase::Retrigger => 5,
            EnvelopePhase::Release => 6,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            1 => EnvelopePhase::Attack,
            2 => EnvelopePhase::Hold,
            3 => EnvelopePhase::Decay,
            4 => EnvelopePhase::Sustain,
            5 => EnvelopePhase::Retrigger,
            6 => EnvelopePhase::Release,
            _ => EnvelopePhase::Idle,
        }
    }
}

/// Stage parameters shared by all voices of one envelope.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageParams {
    pub attack_ms: f32,
    pub attack_level: f32,
    pub hold_ms: f32,
    pub decay_ms: f32,
    pub sustain: f32,
    pub release_ms: f32,
    pub attack_curve: Curve,
    /// Shape of both decay and release.
    pub decay_curve: Curve,
}

impl Default for StageParams {
    fn default() -> Self {
        Self {
            attack_ms: 10.0,
            attack_level: 1.0,
            hold_ms: 0.0,
            decay_ms: 300.0,
            sustain: 0.5,
            release_ms: 20.0,
            attack_curve: Curve::Linear,
            decay_curve: Curve::Exponential,
        }
    }
}

impl StageParams {
    pub fn adsr(attack_ms: f32, decay_ms: f32, sustain: f32, release_ms: f32) -> Self {
        Self {
            attack_ms,
            decay_ms,
            sustain,
            release_ms,
            ..Self::default()
        }
        .clamped()
    }

    /// Copy with every parameter forced into its legal range.
    pub fn clamped(self) -> Self {
        Self {
            attack_ms: finite_or(self.attack_ms, 0.0).max(0.0),
            attack_level: finite_or(self.attack_level, 1.0).clamp(0.0, 1.0),
            hold_ms: finite_or(self.hold_ms, 0.0).max(0.0),
            decay_ms: finite_or(self.decay_ms, 0.0).max(0.0),
            sustain: finite_or(self.sustain, 0.0).clamp(0.0, 1.0),
            release_ms: finite_or(self.release_ms, 0.0).max(0.0),
            ..self
        }
    }
}

fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

/// Rate-dependent context needed to (re)compute coefficients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopeContext {
    /// Rate at which `tick` is called (audio or control rate), in Hz.
    pub rate: f32,
    /// Length of the sustain smoothing ramp, normally one block.
    pub ramp_samples: usize,
    pub curves: CurveConfig,
}

impl EnvelopeContext {
    pub fn new(rate: f32, ramp_samples: usize, curves: CurveConfig) -> Self {
        Self {
            rate: if rate.is_finite() && rate > 0.0 { rate } else { 44_100.0 },
            ramp_samples,
            curves: curves.sanitized(),
        }
    }

    /// Per-sample step of the retrigger ramp.
    pub fn retrigger_step(&self) -> f32 {
        let samples = ms_to_samples(self.curves.retrigger_ms, self.rate);
        if samples < 1.0 {
            1.0
        } else {
            1.0 / samples
        }
    }
}

/// Per-voice envelope state: current value, phase and cached coefficients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopeState {
    phase: EnvelopePhase,
    value: f32,

    attack: StageCoefficients,
    decay: StageCoefficients,
    release: StageCoefficients,

    attack_level: f32,
    sustain: LinearRamp,
    hold_samples: u32,
    hold_remaining: u32,

    /// Linear release step, snapshotted when the release starts.
    release_delta: f32,
    retrigger_step: f32,

    /// Per-voice attack time multiplier (1.0 = unmodulated).
    attack_scale: f32,
}

impl Default for EnvelopeState {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvelopeState {
    pub fn new() -> Self {
        Self {
            phase: EnvelopePhase::Idle,
            value: 0.0,
            attack: StageCoefficients::instant(Curve::Linear),
            decay: StageCoefficients::instant(Curve::Exponential),
            release: StageCoefficients::instant(Curve::Exponential),
            attack_level: 1.0,
            sustain: LinearRamp::new(0.5),
            hold_samples: 0,
            hold_remaining: 0,
            release_delta: 1.0,
            retrigger_step: 1.0,
            attack_scale: 1.0,
        }
    }

    /// Recompute every coefficient from the current parameters.
    ///
    /// A sustain change while sustaining is ramped over `ctx.ramp_samples`.
    pub fn refresh(&mut self, params: &StageParams, ctx: &EnvelopeContext) {
        let params = params.clamped();
        let curves = ctx.curves;

        self.attack_level = params.attack_level;
        self.attack = attack_coefficients(
            params.attack_curve,
            ms_to_samples(params.attack_ms * self.attack_scale, ctx.rate),
            params.attack_level,
            curves.attack_ratio,
        );
        self.decay = decay_coefficients(
            params.decay_curve,
            ms_to_samples(params.decay_ms, ctx.rate),
            params.attack_level,
            params.sustain,
            curves.decay_ratio,
        );
        self.release = release_coefficients(
            params.decay_curve,
            ms_to_samples(params.release_ms, ctx.rate),
            curves.decay_ratio,
        );
        self.hold_samples = ms_to_samples(params.hold_ms, ctx.rate).round() as u32;
        self.retrigger_step = ctx.retrigger_step();

        if self.phase == EnvelopePhase::Sustain && self.sustain.target() != params.sustain {
            self.sustain.set_target(params.sustain, ctx.ramp_samples);
        } else if self.phase != EnvelopePhase::Sustain {
            self.sustain.set_immediate(params.sustain);
        }

        if self.phase == EnvelopePhase::Release && self.release.curve == Curve::Linear {
            self.release_delta = self.value * self.release.delta;
        }
    }

    /// Begin a note. Returns the value for the first sample.
    ///
    /// When the state is still sounding and `retrigger` is set, the state
    /// enters `Retrigger` and keeps its value; otherwise it restarts from 0.
    pub fn start(
        &mut self,
        params: &StageParams,
        ctx: &EnvelopeContext,
        attack_scale: f32,
        retrigger: bool,
    ) -> f32 {
        self.attack_scale = if attack_scale.is_finite() { attack_scale.max(0.0) } else { 1.0 };

        let sounding = self.phase != EnvelopePhase::Idle;

        // Leave Sustain first so `refresh` doesn't schedule a ramp.
        self.phase = EnvelopePhase::Attack;
        self.refresh(params, ctx);

        if sounding && retrigger && self.value > 0.0 {
            self.phase = EnvelopePhase::Retrigger;
            return self.value;
        }

        self.value = 0.0;

        if self.attack.is_instant() {
            self.value = self.attack_level;
            self.enter_after_attack();
        }

        self.value
    }

    /// Note-off: move to Release from the current value. No-op when idle.
    pub fn stop(&mut self) {
        if self.phase == EnvelopePhase::Idle {
            return;
        }

        if self.release.is_instant() {
            self.reset();
            return;
        }

        self.release_delta = self.value * self.release.delta;
        self.phase = EnvelopePhase::Release;
    }

    /// Hard reset to Idle. Idempotent.
    pub fn reset(&mut self) {
        self.phase = EnvelopePhase::Idle;
        self.value = 0.0;
        self.hold_remaining = 0;
        let target = self.sustain.target();
        self.sustain.set_immediate(target);
    }

    /// Advance by one sample and return the new value.
    #[inline]
    pub fn tick(&mut self) -> f32 {
        match self.phase {
            EnvelopePhase::Idle => {
                self.value = 0.0;
            }

            EnvelopePhase::Attack => {
                self.value = match self.attack.curve {
                    Curve::Linear => self.value + self.attack.delta,
                    Curve::Exponential => self.attack.base + self.value * self.attack.coef,
                };

                if self.value >= self.attack_level - ATTACK_TOLERANCE {
                    self.value = self.attack_level;
                    self.enter_after_attack();
                }
            }

            EnvelopePhase::Hold => {
                self.value = self.attack_level;
                self.hold_remaining = self.hold_remaining.saturating_sub(1);

                if self.hold_remaining == 0 {
                    self.enter_decay();
                }
            }

            EnvelopePhase::Decay => {
                self.value = match self.decay.curve {
                    Curve::Linear => self.value - self.decay.delta,
                    Curve::Exponential => self.decay.base + self.value * self.decay.coef,
                };

                let sustain = self.sustain.value();
                if self.value <= sustain + DECAY_TOLERANCE {
                    self.value = sustain;
                    self.phase = EnvelopePhase::Sustain;
                }
            }

            EnvelopePhase::Sustain => {
                self.value = self.sustain.next();
            }

            EnvelopePhase::Retrigger => {
                self.value -= self.retrigger_step;

                if self.value <= 0.0 {
                    self.value = 0.0;
                    self.phase = EnvelopePhase::Attack;
                }
            }

            EnvelopePhase::Release => {
                self.value = match self.release.curve {
                    Curve::Linear => self.value - self.release_delta,
                    Curve::Exponential => self.release.base + self.value * self.release.coef,
                };

                if self.value < RELEASE_EPSILON {
                    self.value = 0.0;
                    self.phase = EnvelopePhase::Idle;
                }
            }
        }

        self.value = sanitize_unipolar(self.value);
        self.value
    }

    /// Render a block of envelope values.
    pub fn render(&mut self, out: &mut [f32]) {
        match self.phase {
            EnvelopePhase::Idle => out.fill(0.0),
            EnvelopePhase::Sustain if !self.sustain.is_ramping() => {
                self.value = sanitize_unipolar(self.sustain.value());
                out.fill(self.value);
            }
            _ => {
                for sample in out.iter_mut() {
                    *sample = self.tick();
                }
            }
        }
    }

    fn enter_after_attack(&mut self) {
        if self.hold_samples > 0 {
            self.hold_remaining = self.hold_samples;
            self.phase = EnvelopePhase::Hold;
        } else {
            self.enter_decay();
        }
    }

    fn enter_decay(&mut self) {
        if self.decay.is_instant() || self.value <= self.sustain.value() {
            self.value = self.sustain.value();
            self.phase = EnvelopePhase::Sustain;
        } else {
            self.phase = EnvelopePhase::Decay;
        }
    }

    pub fn phase(&self) -> EnvelopePhase {
        self.phase
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn is_playing(&self) -> bool {
        self.phase != EnvelopePhase::Idle
    }

    pub fn last_sustain_value(&self) -> f32 {
        self.sustain.value()
    }

    pub fn retrigger_step(&self) -> f32 {
        self.retrigger_step
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: f32 = 44_100.0;

    fn ctx() -> EnvelopeContext {
        EnvelopeContext::new(SAMPLE_RATE, 64, CurveConfig::default())
    }

    fn started(params: StageParams) -> EnvelopeState {
        let mut state = EnvelopeState::new();
        state.start(&params, &ctx(), 1.0, false);
        state
    }

    fn run(state: &mut EnvelopeState, samples: usize) -> f32 {
        let mut last = 0.0;
        for _ in 0..samples {
            last = state.tick();
        }
        last
    }

    #[test]
    fn start_with_attack_returns_zero() {
        let mut state = EnvelopeState::new();
        let first = state.start(&StageParams::adsr(10.0, 100.0, 0.5, 50.0), &ctx(), 1.0, false);

        assert_eq!(first, 0.0);
        assert_eq!(state.phase(), EnvelopePhase::Attack);
    }

    #[test]
    fn zero_attack_and_decay_jumps_to_sustain() {
        let mut state = EnvelopeState::new();
        let first = state.start(&StageParams::adsr(0.0, 0.0, 0.7, 50.0), &ctx(), 1.0, false);

        assert!((first - 0.7).abs() < 1e-6);
        assert_eq!(state.phase(), EnvelopePhase::Sustain);
    }

    #[test]
    fn zero_attack_with_decay_starts_at_peak() {
        let mut state = EnvelopeState::new();
        let first = state.start(&StageParams::adsr(0.0, 100.0, 0.5, 50.0), &ctx(), 1.0, false);

        assert_eq!(first, 1.0);
        assert_eq!(state.phase(), EnvelopePhase::Decay);
    }

    #[test]
    fn linear_attack_takes_stage_length() {
        let mut state = started(StageParams::adsr(10.0, 100.0, 0.5, 50.0));

        run(&mut state, 440);
        assert_eq!(state.phase(), EnvelopePhase::Attack);
        assert!(state.value() > 0.99 && state.value() < 1.0);

        state.tick();
        assert_eq!(state.value(), 1.0);
        assert_eq!(state.phase(), EnvelopePhase::Decay);
    }

    #[test]
    fn hold_keeps_peak() {
        let mut params = StageParams::adsr(1.0, 100.0, 0.5, 50.0);
        params.hold_ms = 10.0;
        let mut state = started(params);

        run(&mut state, 45);
        assert_eq!(state.phase(), EnvelopePhase::Hold);
        run(&mut state, 400);
        assert_eq!(state.phase(), EnvelopePhase::Hold);
        assert_eq!(state.value(), 1.0);
        run(&mut state, 41);
        assert_eq!(state.phase(), EnvelopePhase::Decay);
    }

    #[test]
    fn decay_settles_on_sustain() {
        let mut state = started(StageParams::adsr(1.0, 100.0, 0.501, 50.0));

        run(&mut state, 45 + 4410 + 10);
        assert_eq!(state.phase(), EnvelopePhase::Sustain);
        assert!((state.value() - 0.501).abs() < 1e-6);
    }

    #[test]
    fn exponential_decay_is_monotonic() {
        let mut state = started(StageParams::adsr(0.0, 50.0, 0.3, 50.0));
        let mut previous = state.value();

        for _ in 0..3000 {
            let v = state.tick();
            assert!(v <= previous + 1e-7);
            assert!(v >= 0.3 - 1e-6);
            previous = v;
        }
    }

    #[test]
    fn release_decreases_to_idle_without_undershoot() {
        let mut state = started(StageParams::adsr(1.0, 10.0, 0.8, 50.0));
        run(&mut state, 2000);
        state.stop();
        assert_eq!(state.phase(), EnvelopePhase::Release);

        let mut previous = state.value();
        let mut samples = 0;
        while state.is_playing() {
            let v = state.tick();
            assert!(v >= 0.0);
            assert!(v <= previous);
            previous = v;
            samples += 1;
            assert!(samples <= 2206, "release took too long");
        }

        assert_eq!(state.value(), 0.0);
    }

    #[test]
    fn linear_release_reaches_zero_on_time() {
        let mut params = StageParams::adsr(0.0, 0.0, 1.0, 10.0);
        params.decay_curve = Curve::Linear;
        let mut state = started(params);
        state.stop();

        let mut samples = 0;
        while state.is_playing() && samples < 1000 {
            state.tick();
            samples += 1;
        }

        assert!((samples as i32 - 441).abs() <= 1, "took {} samples", samples);
    }

    #[test]
    fn stop_when_idle_is_noop() {
        let mut state = EnvelopeState::new();
        state.stop();
        assert_eq!(state.phase(), EnvelopePhase::Idle);
    }

    #[test]
    fn reset_is_idempotent() {
        let mut state = started(StageParams::default());
        run(&mut state, 100);

        state.reset();
        let once = state;
        state.reset();

        assert_eq!(state, once);
        assert_eq!(state.phase(), EnvelopePhase::Idle);
        assert_eq!(state.value(), 0.0);
    }

    #[test]
    fn retrigger_ramps_down_at_fixed_step() {
        let params = StageParams::adsr(0.0, 0.0, 1.0, 50.0);
        let mut state = started(params);
        assert_eq!(state.value(), 1.0);

        state.start(&params, &ctx(), 1.0, true);
        assert_eq!(state.phase(), EnvelopePhase::Retrigger);

        let step = state.retrigger_step();
        let mut previous = state.value();
        while state.phase() == EnvelopePhase::Retrigger {
            let v = state.tick();
            assert!((previous - v) <= step + 1e-6);
            previous = v;
        }
    }

    #[test]
    fn sustain_change_is_ramped() {
        let params = StageParams::adsr(0.0, 0.0, 0.5, 50.0);
        let mut state = started(params);

        let mut louder = params;
        louder.sustain = 1.0;
        state.refresh(&louder, &ctx());

        let first = state.tick();
        assert!(first > 0.5 && first < 0.52);
        run(&mut state, 63);
        assert_eq!(state.value(), 1.0);
    }

    #[test]
    fn render_fills_block() {
        let mut state = started(StageParams::adsr(1.0, 1.0, 0.5, 50.0));
        let mut block = [0.0; 256];
        state.render(&mut block);
        assert!(block.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!((block[255] - 0.5).abs() < 1e-6);
    }
}
