#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/*
Low Frequency Oscillator Math
=============================

An LFO is an oscillator running below the audio band (0.01 - 40 Hz) whose
output drives parameters instead of speakers. The waveform math is the same
as an audio oscillator: a phase accumulator in [0, 1) advanced by
`frequency / rate` every tick, and a shaping function from phase to value.

    phase += frequency / rate
    if phase >= 1.0 { phase -= 1.0 }

Shapes (bipolar output, -1 to +1):

    SINE      sin(2π·phase)                smooth vibrato / sweeps
    TRIANGLE  1 - 4·|phase - 0.5|          constant rate of change
    SAW       2·phase - 1                  rising ramp, snaps down
    SQUARE    +1 for phase < 0.5, else -1  gated effects

Chains want unipolar [0, 1] source values, so `LfoPhase::next_unipolar`
maps the bipolar shape with (x + 1) / 2. A chain flagged bipolar maps it back.


Tempo Sync
----------

A synced LFO derives its frequency from the tempo and a note value:

    beats_per_cycle = 4 / denominator     (1/4 note = 1 beat)
    frequency       = bpm / 60 / beats_per_cycle
*/

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LfoWaveform {
    #[default]
    Sine,
    Triangle,
    Saw,
    Square,
}

impl LfoWaveform {
    pub fn from_attribute(value: f32) -> Self {
        match value.round() as i32 {
            1 => LfoWaveform::Triangle,
            2 => LfoWaveform::Saw,
            3 => LfoWaveform::Square,
            _ => LfoWaveform::Sine,
        }
    }

    pub fn as_attribute(self) -> f32 {
        match self {
            LfoWaveform::Sine => 0.0,
            LfoWaveform::Triangle => 1.0,
            LfoWaveform::Saw => 2.0,
            LfoWaveform::Square => 3.0,
        }
    }

    /// Bipolar value of this shape at `phase` in `[0, 1)`.
    #[inline]
    pub fn shape(self, phase: f32) -> f32 {
        match self {
            LfoWaveform::Sine => (std::f32::consts::TAU * phase).sin(),
            LfoWaveform::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
            LfoWaveform::Saw => 2.0 * phase - 1.0,
            LfoWaveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
        }
    }
}

/// Phase accumulator shared by all LFO shapes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LfoPhase {
    phase: f32,
    increment: f32,
}

impl LfoPhase {
    pub fn set_frequency(&mut self, frequency_hz: f32, rate: f32) {
        self.increment = if rate > 0.0 && frequency_hz.is_finite() {
            (frequency_hz / rate).clamp(0.0, 0.5)
        } else {
            0.0
        };
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
    }

    pub fn phase(&self) -> f32 {
        self.phase
    }

    /// Current shape value in `[0, 1]`, then advance.
    #[inline]
    pub fn next_unipolar(&mut self, waveform: LfoWaveform) -> f32 {
        let value = (waveform.shape(self.phase) + 1.0) * 0.5;

        self.phase += self.increment;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }

        value
    }
}

/// Frequency of a tempo-synced LFO: one cycle per `1/denominator` note.
#[inline]
pub fn tempo_synced_frequency(bpm: f64, denominator: f32) -> f32 {
    let beats_per_cycle = 4.0 / denominator.max(1.0) as f64;
    (bpm / 60.0 / beats_per_cycle) as f32
}

/// Calculate samples per LFO period.
///
/// # Example
/// ```
/// use saavy_modulation::dsp::lfo::samples_per_period;
/// let samples = samples_per_period(5.0, 48000.0);
/// assert_eq!(samples, 9600.0); // 5 Hz at 48kHz = 9600 samples
/// ```
#[inline]
pub fn samples_per_period(frequency_hz: f32, sample_rate: f32) -> f32 {
    sample_rate / frequency_hz
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shapes_stay_in_range() {
        for waveform in [
            LfoWaveform::Sine,
            LfoWaveform::Triangle,
            LfoWaveform::Saw,
            LfoWaveform::Square,
        ] {
            let mut phase = LfoPhase::default();
            phase.set_frequency(7.0, 1000.0);

            for _ in 0..2000 {
                let v = phase.next_unipolar(waveform);
                assert!((0.0..=1.0).contains(&v), "{:?} produced {}", waveform, v);
            }
        }
    }

    #[test]
    fn phase_wraps() {
        let mut phase = LfoPhase::default();
        phase.set_frequency(250.0, 1000.0);
        for _ in 0..4 {
            phase.next_unipolar(LfoWaveform::Saw);
        }
        assert!(phase.phase() < 1e-6);
    }

    #[test]
    fn quarter_note_at_120_bpm_is_two_hertz() {
        assert!((tempo_synced_frequency(120.0, 4.0) - 2.0).abs() < 1e-6);
        assert!((tempo_synced_frequency(120.0, 1.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_samples_per_period() {
        assert!((samples_per_period(5.0, 48000.0) - 9600.0).abs() < 1e-6);
    }

    #[test]
    fn waveform_attribute_encoding() {
        assert_eq!(LfoWaveform::from_attribute(2.0), LfoWaveform::Saw);
        assert_eq!(LfoWaveform::from_attribute(LfoWaveform::Square.as_attribute()), LfoWaveform::Square);
    }
}
