//! Real-world scenario benchmarks.
//!
//! These model how an instrument drives the engine: a handful of chains,
//! many voices, notes arriving mid-block.

mod chains;
mod polyphony;

pub use chains::bench_chains;
pub use polyphony::bench_polyphony;
