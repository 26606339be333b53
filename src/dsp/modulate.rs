//! Intensity application and combination math for modulation chains.

/*
Combining Modulation Sources
============================

A chain collects many sources (envelopes, velocity, LFOs...) and reduces them
to ONE number per sample. How they combine depends on what the number means.

Vocabulary
----------

  intensity   How strongly a source affects the result, 0.0 to 1.0.
              Zero intensity = the source is inaudible.

  magnitude   Quantities that scale something: gain, filter depth.
              Neutral value 1.0. Sources MULTIPLY.

  bipolar     Quantities that swing around a centre: pitch, pan.
              Neutral value is the midpoint. Sources BLEND.

  normalised  Bipolar values are carried on a [0, 1] axis whose midpoint
              0.5 means "no change":
                  normalised = 0.5 + 0.5 * signed     (signed in [-1, 1])


Magnitude (Gain)
----------------

Each source's contribution is faded toward 1.0 by its intensity:

    contribution = (1 - intensity) + intensity * value

    intensity 0.0  → 1.0 always (no effect)
    intensity 1.0  → value (full effect)
    intensity 0.5, value 0.0  → 0.5 (half-way duck)

The chain output is the base value times every contribution:

    out = base * Π contribution


Bipolar (Pitch, Pan)
--------------------

Starting from the base (the midpoint), each source pulls the result toward
its own normalised value by its intensity:

    out = out * (1 - intensity) + source * intensity

A source with intensity 0 leaves `out` untouched; a source with intensity 1
fully determines it.


Pitch Conversion
----------------

Downstream voices need a frequency RATIO. A signed value in [-1, 1] and a
range in semitones give:

    ratio = 2 ^ (signed * semitones / 12)

    signed  0.0          → ratio 1.0   (no change)
    signed  1.0, 12 st   → ratio 2.0   (up an octave)
    signed -1.0, 12 st   → ratio 0.5   (down an octave)


Pan Conversion
--------------

Constant-power pan laws keep loudness steady as the signal moves:

    angle = (signed + 1) * π/4
    left  = cos(angle),  right = sin(angle)
*/

/// Neutral output of a magnitude chain.
pub const MAGNITUDE_NEUTRAL: f32 = 1.0;

/// Neutral output of a bipolar chain on the normalised axis.
pub const BIPOLAR_NEUTRAL: f32 = 0.5;

/// Contribution of one magnitude source: `(1 - intensity) + intensity * value`.
#[inline]
pub fn apply_gain_intensity(value: f32, intensity: f32) -> f32 {
    (1.0 - intensity) + intensity * value
}

/// Blend `current` toward `source` by `intensity`.
#[inline]
pub fn blend(current: f32, source: f32, intensity: f32) -> f32 {
    current * (1.0 - intensity) + source * intensity
}

/// Map a unipolar source value onto the normalised bipolar axis.
///
/// With `bipolar` the full `[0, 1]` range swings around the midpoint
/// (`0 → -1`, `1 → +1`); otherwise the source only pushes upward.
#[inline]
pub fn unipolar_to_normalised(value: f32, bipolar: bool) -> f32 {
    let signed = if bipolar { unipolar_to_bipolar(value) } else { value };
    signed_to_normalised(signed)
}

/// `[-1, 1]` → `[0, 1]`
#[inline]
pub fn signed_to_normalised(signed: f32) -> f32 {
    0.5 + 0.5 * signed
}

/// `[0, 1]` → `[-1, 1]`
#[inline]
pub fn normalised_to_signed(normalised: f32) -> f32 {
    normalised * 2.0 - 1.0
}

/// Convert unipolar signal (0.0 to 1.0) to bipolar (-1.0 to +1.0).
#[inline]
pub fn unipolar_to_bipolar(unipolar: f32) -> f32 {
    (unipolar * 2.0) - 1.0
}

/// Convert bipolar signal (-1.0 to +1.0) to unipolar (0.0 to 1.0).
#[inline]
pub fn bipolar_to_unipolar(bipolar: f32) -> f32 {
    (bipolar + 1.0) * 0.5
}

/// Frequency ratio for a signed pitch value spanning `semitones`.
#[inline]
pub fn pitch_factor(signed: f32, semitones: f32) -> f32 {
    (signed * semitones / 12.0).exp2()
}

/// Constant-power (left, right) gains for a signed pan position.
#[inline]
pub fn pan_gains(signed: f32) -> (f32, f32) {
    let angle = (signed.clamp(-1.0, 1.0) + 1.0) * std::f32::consts::FRAC_PI_4;
    (angle.cos(), angle.sin())
}

/// Calculate the average of a modulation signal over a block.
///
/// Used when a consumer wants one value for the whole block.
#[inline]
pub fn block_average(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f32>() / samples.len() as f32
}
