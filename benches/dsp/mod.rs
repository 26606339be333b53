//! Benchmarks for low-level modulation primitives.

mod envelope;
mod modulate;

pub use envelope::bench_envelope;
pub use modulate::bench_modulate;
