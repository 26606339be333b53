#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/*
Envelope Curve Math
===================

Every timed envelope stage (attack, decay, release) moves the output from a
start level toward a target level over a given time. There are two shapes.


Linear
------

A fixed per-sample step:

    delta = (target - start) / (time_seconds * sample_rate)
    value += delta

Attack of 10 ms at 44.1 kHz: 441 samples, delta = 1/441 ≈ 0.002268.


Exponential ("target ratio overshoot")
--------------------------------------

A one-pole recursion aimed slightly PAST the real target:

    value = base + value * coef

The recursion converges toward `aim = base / (1 - coef)`. If we aimed exactly
at the target the curve would only reach it after infinite time, so the aim
is pushed beyond the target by a ratio `r`:

    attack   aim = level + r        (overshoots the peak, crosses it)
    decay    aim = sustain - r      (undershoots sustain, crosses it)
    release  aim = -r               (undershoots zero, crosses it)

The coefficient is chosen so the curve crosses the real target after exactly
`samples` steps for a full-scale (0 → 1) move:

    coef = exp(-ln((1 + r) / r) / samples)
    base = aim * (1 - coef)

Small `r` (0.0001) gives a strongly curved, "natural" decay. Large `r` (0.3)
gives a gently bowed attack that still reaches the peak on time.

    Level
      1 ┤    ╭──╮
        │   ╱    ╲
        │  ╱      ╲___________
        │ ╱                   ╲
      0 ┼╯                     ╲___
        attack decay  sustain  release

The ratio values below are empirically tuned. Changing them changes the
audible shape of every envelope, so they are configuration defaults, not
derived quantities.
*/

/// Target ratio for exponential attack curves.
pub const ATTACK_TARGET_RATIO: f32 = 0.3;

/// Target ratio for exponential decay and release curves.
pub const DECAY_TARGET_RATIO: f32 = 0.0001;

/// Lower bound for any target ratio; `ln((1 + r) / r)` explodes at 0.
pub const MIN_TARGET_RATIO: f32 = 1e-7;

/// Duration of the retrigger ramp in milliseconds.
pub const DEFAULT_RETRIGGER_MS: f32 = 1.5;

/// Shape of a timed envelope stage.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Curve {
    #[default]
    Linear,
    Exponential,
}

impl Curve {
    /// Attribute encoding: values above 0.5 select the exponential shape.
    pub fn from_attribute(value: f32) -> Self {
        if value > 0.5 {
            Curve::Exponential
        } else {
            Curve::Linear
        }
    }

    pub fn as_attribute(self) -> f32 {
        match self {
            Curve::Linear => 0.0,
            Curve::Exponential => 1.0,
        }
    }
}

/// Tuning constants shared by every envelope of an engine.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurveConfig {
    pub attack_ratio: f32,
    pub decay_ratio: f32,
    pub retrigger_ms: f32,
}

impl Default for CurveConfig {
    fn default() -> Self {
        Self {
            attack_ratio: ATTACK_TARGET_RATIO,
            decay_ratio: DECAY_TARGET_RATIO,
            retrigger_ms: DEFAULT_RETRIGGER_MS,
        }
    }
}

impl CurveConfig {
    /// Copy with every field forced into a usable range.
    pub fn sanitized(self) -> Self {
        Self {
            attack_ratio: self.attack_ratio.max(MIN_TARGET_RATIO),
            decay_ratio: self.decay_ratio.max(MIN_TARGET_RATIO),
            retrigger_ms: self.retrigger_ms.max(0.0),
        }
    }
}

/// Precomputed per-sample parameters for one stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageCoefficients {
    pub curve: Curve,
    /// Per-sample step for linear stages.
    pub delta: f32,
    /// Recursion factor for exponential stages.
    pub coef: f32,
    /// Recursion offset for exponential stages.
    pub base: f32,
}

impl StageCoefficients {
    /// A stage that completes on its first sample.
    pub fn instant(curve: Curve) -> Self {
        Self {
            curve,
            delta: 1.0,
            coef: 0.0,
            base: 0.0,
        }
    }

    pub fn is_instant(&self) -> bool {
        self.coef == 0.0 && self.delta >= 1.0
    }
}

/// Convert a stage time to a (fractional) sample count at `rate` Hz.
#[inline]
pub fn ms_to_samples(ms: f32, rate: f32) -> f32 {
    (ms.max(0.0) * 0.001 * rate).max(0.0)
}

/// Exponential recursion factor crossing the target after `samples` steps.
#[inline]
pub fn exponential_coef(samples: f32, ratio: f32) -> f32 {
    if samples <= 0.0 {
        return 0.0;
    }

    let ratio = ratio.max(MIN_TARGET_RATIO);
    (-((1.0 + ratio) / ratio).ln() / samples).exp()
}

/// Attack from 0 toward `level`.
pub fn attack_coefficients(curve: Curve, samples: f32, level: f32, ratio: f32) -> StageCoefficients {
    if samples < 1.0 {
        return StageCoefficients::instant(curve);
    }

    let coef = exponential_coef(samples, ratio);

    StageCoefficients {
        curve,
        delta: level / samples,
        coef,
        base: (level + ratio) * (1.0 - coef),
    }
}

/// Decay from `from` toward `sustain`.
pub fn decay_coefficients(
    curve: Curve,
    samples: f32,
    from: f32,
    sustain: f32,
    ratio: f32,
) -> StageCoefficients {
    if samples < 1.0 {
        return StageCoefficients::instant(curve);
    }

    let coef = exponential_coef(samples, ratio);

    StageCoefficients {
        curve,
        delta: (from - sustain).max(0.0) / samples,
        coef,
        base: (sustain - ratio) * (1.0 - coef),
    }
}

/// Release toward 0. `delta` is per unit of start level; the state machine
/// scales it by the value held when the release begins.
pub fn release_coefficients(curve: Curve, samples: f32, ratio: f32) -> StageCoefficients {
    if samples < 1.0 {
        return StageCoefficients::instant(curve);
    }

    let coef = exponential_coef(samples, ratio);

    StageCoefficients {
        curve,
        delta: 1.0 / samples,
        coef,
        base: -ratio * (1.0 - coef),
    }
}
