//! Low-level DSP primitives used by the modulation sources and chains.
//!
//! These components are allocation-free and realtime-safe, making them safe to
//! embed directly inside per-voice arenas. They stay focused on the
//! signal-processing math so the modulation layer can layer on orchestration.

/// Linear and exponential stage coefficients.
pub mod curve;
/// Attack/hold/decay/sustain/release/retrigger state machine.
pub mod envelope;
/// LFO waveforms and phase accumulation.
pub mod lfo;
/// Intensity application and value-space conversions.
pub mod modulate;
/// Linear per-sample ramps.
pub mod ramp;
/// Denormal and NaN scrubbing.
pub mod sanitize;

pub use envelope::EnvelopeState;
