use crate::modulation::{
    envelope::AhdsrEnvelope,
    source::Source,
    time_variant::{Controller, ControllerSource, Lfo},
    voice_start::{Constant, KeyNumber, Velocity},
};

/// Every type name [`create_source`] understands.
pub const SOURCE_TYPES: &[&str] = &["Velocity", "KeyNumber", "Constant", "Lfo", "Controller", "AhdsrEnvelope"];

/// Build a source with default attributes from its type name.
///
/// Used when restoring a chain whose structure differs from the saved one;
/// the caller applies the saved attributes afterwards.
pub fn create_source(type_name: &str) -> Option<Source> {
    let source = match type_name {
        "Velocity" => Source::voice_start(Velocity::new()),
        "KeyNumber" => Source::voice_start(KeyNumber::new()),
        "Constant" => Source::voice_start(Constant::default()),
        "Lfo" => Source::time_variant(Lfo::default()),
        // Mod wheel until the saved attributes say otherwise.
        "Controller" => Source::time_variant(Controller::new(ControllerSource::ControlChange(1))),
        "AhdsrEnvelope" => Source::envelope(AhdsrEnvelope::new()),
        _ => {
            log::warn!("unknown modulation source type '{}'", type_name);
            return None;
        }
    };

    Some(source)
}
