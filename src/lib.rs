#[cfg(feature = "rtrb")]
pub mod bridge; // Lock-free control and display queues
pub mod dsp;
pub mod io;
pub mod modulation; // Modulation sources and chains
pub mod state; // Property-bag export/restore
pub mod synth; // Voice management and block processing
pub mod tempo;

pub use modulation::{ChainMode, ModulationChain, Source};
pub use synth::engine::{EngineConfig, ModulationEngine};

pub const MAX_BLOCK_SIZE: usize = 2048;
pub const MAX_POLYPHONY: usize = 256;
