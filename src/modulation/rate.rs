use crate::dsp::ramp::fill_ramp;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/*
Control Rate
============

Most modulation moves slowly compared to audio. Rendering an envelope 48000
times a second when 6000 would be indistinguishable wastes most of the work,
so a chain can run its sources at a reduced "control rate":

    control_rate = sample_rate / divisor

The divisor is a power of two near sample_rate / 6000 Hz:

    44.1 kHz → 7.35 → 8        48 kHz → 8 → 8
    96 kHz   → 16              22.05 kHz → 3.7 → 4

and it must divide the block size so blocks split into whole ticks. If it
doesn't, it is halved until it does (a block of 100 samples forces 4).

Expanding back to audio rate
----------------------------

Each control tick covers `divisor` audio samples. Two ways to fill them:

    Linear  ramp from the previous tick value to this one
            prev ───╱───╱───╱  (no steps, one tick of latency)

    Hold    repeat the tick value
            ───┐   ┌───┐
               └───┘   └──    (cheapest, stair-stepped)

Linear needs the previous tick value per voice, kept in a small arena.
*/

/// Control ticks aim for roughly this rate.
pub const CONTROL_RATE_TARGET_HZ: f64 = 6_000.0;

/// Largest control-rate divisor.
pub const MAX_DIVISOR: usize = 32;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateMode {
    #[default]
    Audio,
    Control,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interpolation {
    #[default]
    Linear,
    Hold,
}

/// Power-of-two divisor for `sample_rate` that divides `block_size`.
pub fn control_rate_divisor(sample_rate: f64, block_size: usize) -> usize {
    if !sample_rate.is_finite() || sample_rate <= 0.0 || block_size == 0 {
        return 1;
    }

    let ideal = (sample_rate / CONTROL_RATE_TARGET_HZ).max(1.0);
    let exponent = ideal.log2().round().min(MAX_DIVISOR.trailing_zeros() as f64) as u32;
    let mut divisor = 1usize << exponent;

    while divisor > 1 && block_size % divisor != 0 {
        divisor /= 2;
    }

    divisor
}

/// Runs sources at a reduced rate and expands their output to audio rate.
#[derive(Debug, Clone)]
pub struct RateAdapter {
    mode: RateMode,
    interpolation: Interpolation,
    divisor: usize,
    /// Last tick value per voice, plus one shared slot at the end.
    previous: Vec<f32>,
}

impl Default for RateAdapter {
    fn default() -> Self {
        Self::new(RateMode::Audio, Interpolation::Linear)
    }
}

impl RateAdapter {
    pub fn new(mode: RateMode, interpolation: Interpolation) -> Self {
        Self {
            mode,
            interpolation,
            divisor: 1,
            previous: Vec::new(),
        }
    }

    /// Size the arena and choose the divisor. Not realtime safe.
    pub fn prepare(&mut self, sample_rate: f64, block_size: usize, polyphony: usize) -> usize {
        self.divisor = match self.mode {
            RateMode::Audio => 1,
            RateMode::Control => control_rate_divisor(sample_rate, block_size),
        };

        self.previous.clear();
        self.previous.resize(polyphony + 1, 0.0);

        self.divisor
    }

    pub fn mode(&self) -> RateMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: RateMode) {
        self.mode = mode;
    }

    pub fn interpolation(&self) -> Interpolation {
        self.interpolation
    }

    pub fn set_interpolation(&mut self, interpolation: Interpolation) {
        self.interpolation = interpolation;
    }

    pub fn divisor(&self) -> usize {
        self.divisor
    }

    pub fn is_downsampling(&self) -> bool {
        self.divisor > 1
    }

    /// Number of control ticks covering `num_samples` audio samples.
    #[inline]
    pub fn num_ticks(&self, num_samples: usize) -> usize {
        num_samples.div_ceil(self.divisor)
    }

    /// Index of the control tick containing audio sample `offset`.
    #[inline]
    pub fn tick_index(&self, offset: usize) -> usize {
        offset / self.divisor
    }

    /// Slot index used for monophonic (shared) expansion.
    pub fn shared_slot(&self) -> usize {
        self.previous.len().saturating_sub(1)
    }

    /// Restart interpolation for `slot` from `value`.
    pub fn reset_slot(&mut self, slot: usize, value: f32) {
        if let Some(previous) = self.previous.get_mut(slot) {
            *previous = value;
        }
    }

    /// Expand control ticks into `out`, continuing from the last tick of `slot`.
    pub fn expand(&mut self, slot: usize, ticks: &[f32], out: &mut [f32]) {
        if self.divisor == 1 {
            let n = ticks.len().min(out.len());
            out[..n].copy_from_slice(&ticks[..n]);
            if let (Some(previous), Some(&last)) = (self.previous.get_mut(slot), ticks.last()) {
                *previous = last;
            }
            return;
        }

        let divisor = self.divisor;
        let mut previous = self.previous.get(slot).copied().unwrap_or(0.0);

        for (chunk, &tick) in out.chunks_mut(divisor).zip(ticks) {
            previous = match self.interpolation {
                Interpolation::Hold => {
                    chunk.fill(tick);
                    tick
                }
                Interpolation::Linear => {
                    // A partial last chunk stops part way, and the next call
                    // continues from where it stopped.
                    let end = if chunk.len() == divisor {
                        tick
                    } else {
                        previous + (tick - previous) * chunk.len() as f32 / divisor as f32
                    };
                    fill_ramp(chunk, previous, end);
                    end
                }
            };
        }

        if let Some(slot) = self.previous.get_mut(slot) {
            *slot = previous;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divisor_tracks_sample_rate() {
        assert_eq!(control_rate_divisor(44_100.0, 512), 8);
        assert_eq!(control_rate_divisor(48_000.0, 512), 8);
        assert_eq!(control_rate_divisor(96_000.0, 512), 16);
        assert_eq!(control_rate_divisor(22_050.0, 512), 4);
        assert_eq!(control_rate_divisor(384_000.0, 512), 32);
        assert_eq!(control_rate_divisor(6_000.0, 512), 1);
    }

    #[test]
    fn divisor_divides_block() {
        assert_eq!(control_rate_divisor(48_000.0, 100), 4);
        assert_eq!(control_rate_divisor(48_000.0, 33), 1);
    }

    #[test]
    fn audio_mode_is_passthrough() {
        let mut adapter = RateAdapter::new(RateMode::Audio, Interpolation::Linear);
        assert_eq!(adapter.prepare(48_000.0, 64, 2), 1);

        let mut out = [0.0; 3];
        adapter.expand(0, &[0.1, 0.2, 0.3], &mut out);
        assert_eq!(out, [0.1, 0.2, 0.3]);
    }

    #[test]
    fn linear_expansion_is_continuous() {
        let mut adapter = RateAdapter::new(RateMode::Control, Interpolation::Linear);
        adapter.prepare(24_000.0, 64, 1);
        assert_eq!(adapter.divisor(), 4);

        adapter.reset_slot(0, 0.0);
        let mut out = [0.0; 8];
        adapter.expand(0, &[1.0, 1.0], &mut out);

        assert_eq!(out, [0.25, 0.5, 0.75, 1.0, 1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn hold_expansion_repeats_ticks() {
        let mut adapter = RateAdapter::new(RateMode::Control, Interpolation::Hold);
        adapter.prepare(24_000.0, 64, 1);

        let mut out = [0.0; 8];
        adapter.expand(0, &[0.5, 1.0], &mut out);
        assert_eq!(out, [0.5, 0.5, 0.5, 0.5, 1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn expansion_continues_across_calls() {
        let mut adapter = RateAdapter::new(RateMode::Control, Interpolation::Linear);
        adapter.prepare(24_000.0, 64, 1);
        adapter.reset_slot(0, 0.0);

        let mut out = [0.0; 4];
        adapter.expand(0, &[1.0], &mut out);
        adapter.expand(0, &[0.0], &mut out);
        assert_eq!(out, [0.75, 0.5, 0.25, 0.0]);
    }

    #[test]
    fn partial_chunk_continues_from_last_sample() {
        let mut adapter = RateAdapter::new(RateMode::Control, Interpolation::Linear);
        adapter.prepare(24_000.0, 64, 1);
        adapter.reset_slot(0, 0.0);

        let mut head = [0.0; 2];
        adapter.expand(0, &[1.0], &mut head);
        assert_eq!(head, [0.25, 0.5]);

        let mut out = [0.0; 4];
        adapter.expand(0, &[0.5], &mut out);
        assert_eq!(out, [0.5; 4]);
    }

    #[test]
    fn tick_counts() {
        let mut adapter = RateAdapter::new(RateMode::Control, Interpolation::Linear);
        adapter.prepare(48_000.0, 512, 1);
        assert_eq!(adapter.num_ticks(512), 64);
        assert_eq!(adapter.num_ticks(9), 2);
        assert_eq!(adapter.tick_index(17), 2);
    }
}
