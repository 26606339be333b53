//! Modulation sources and the chains that combine them.
//!
//! Sources come in three capabilities (see [`source::Source`]); a
//! [`ModulationChain`] owns an ordered list of them and produces one value
//! per voice per sample, optionally at a reduced control rate.

pub mod attribute;
pub mod chain;
pub mod envelope;
pub mod factory;
pub mod rate;
pub mod source;
pub mod time_variant;
pub mod voice_start;

pub use attribute::{AttributeInfo, Attributes};
pub use chain::{ChainMode, ModulationChain};
pub use envelope::AhdsrEnvelope;
pub use factory::create_source;
pub use rate::{Interpolation, RateMode};
pub use source::{
    EnvelopeModulator, Modulator, NoteContext, PrepareSpecs, Source, SourceKind, TimeVariantModulator,
    VoiceStartModulator,
};
pub use time_variant::{Controller, ControllerSource, Lfo};
pub use voice_start::{Constant, KeyNumber, Velocity};
