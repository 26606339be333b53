//! Linear per-sample ramps used to avoid stepping when a value changes between blocks.

/// Steps a value linearly from `start` toward `target` over `steps` calls to `next`.
///
/// Used for sustain-level changes, smoothed voice-start values and control-rate
/// expansion. Holds no references so it can live inside voice state.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct LinearRamp {
    value: f32,
    target: f32,
    increment: f32,
    remaining: u32,
}

impl LinearRamp {
    pub fn new(value: f32) -> Self {
        Self {
            value,
            target: value,
            increment: 0.0,
            remaining: 0,
        }
    }

    /// Start a ramp from the current value to `target` taking `steps` samples.
    /// Zero steps jumps immediately.
    pub fn set_target(&mut self, target: f32, steps: usize) {
        self.target = target;

        if steps == 0 {
            self.value = target;
            self.increment = 0.0;
            self.remaining = 0;
        } else {
            self.increment = (target - self.value) / steps as f32;
            self.remaining = steps as u32;
        }
    }

    /// Jump to `value` and cancel any running ramp.
    pub fn set_immediate(&mut self, value: f32) {
        self.set_target(value, 0);
    }

    #[inline]
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> f32 {
        if self.remaining > 0 {
            self.remaining -= 1;
            self.value = if self.remaining == 0 {
                self.target
            } else {
                self.value + self.increment
            };
        }
        self.value
    }

    /// Value at fractional position `t` (in samples) ahead of the current value.
    #[inline]
    pub fn subsample(&self, t: f32) -> f32 {
        self.value + self.increment * t
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn is_ramping(&self) -> bool {
        self.remaining > 0
    }
}

/// Fill `out` with a straight line from `start` (exclusive) to `end` (inclusive).
///
/// The first sample is one step past `start`, so consecutive blocks joined
/// end-to-start never repeat a value.
pub fn fill_ramp(out: &mut [f32], start: f32, end: f32) {
    if out.is_empty() {
        return;
    }

    let step = (end - start) / out.len() as f32;
    let mut value = start;

    for sample in out.iter_mut() {
        value += step;
        *sample = value;
    }

    if let Some(last) = out.last_mut() {
        *last = end;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramp_reaches_target_exactly() {
        let mut ramp = LinearRamp::new(0.0);
        ramp.set_target(1.0, 3);

        assert!((ramp.next() - 1.0 / 3.0).abs() < 1e-6);
        assert!((ramp.next() - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(ramp.next(), 1.0);
        assert_eq!(ramp.next(), 1.0);
        assert!(!ramp.is_ramping());
    }

    #[test]
    fn zero_steps_jumps() {
        let mut ramp = LinearRamp::new(0.2);
        ramp.set_target(0.8, 0);
        assert_eq!(ramp.value(), 0.8);
        assert_eq!(ramp.next(), 0.8);
    }

    #[test]
    fn fill_ramp_ends_on_target() {
        let mut out = [0.0; 4];
        fill_ramp(&mut out, 0.0, 1.0);
        assert_eq!(out, [0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn subsample_interpolates_ahead() {
        let mut ramp = LinearRamp::new(0.0);
        ramp.set_target(1.0, 4);
        assert!((ramp.subsample(2.0) - 0.5).abs() < 1e-6);
    }
}
