//! Modulators evaluated once per note.

use crate::modulation::{
    attribute::{AttributeInfo, Attributes},
    source::{Modulator, NoteContext, VoiceStartModulator},
};

/// Dynamic range of the velocity decibel mode.
const VELOCITY_DB_RANGE: f32 = 100.0;

const VELOCITY_ATTRIBUTES: &[AttributeInfo] = &[
    AttributeInfo::toggle("Inverted", false),
    AttributeInfo::toggle("DecibelMode", false),
];

/// Note velocity, optionally inverted or mapped onto a decibel scale.
#[derive(Debug, Clone, Default)]
pub struct Velocity {
    inverted: bool,
    decibel_mode: bool,
}

impl Velocity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inverted(mut self, inverted: bool) -> Self {
        self.inverted = inverted;
        self
    }

    pub fn decibel_mode(mut self, decibel_mode: bool) -> Self {
        self.decibel_mode = decibel_mode;
        self
    }
}

impl Attributes for Velocity {
    fn attribute_table(&self) -> &'static [AttributeInfo] {
        VELOCITY_ATTRIBUTES
    }

    fn get_attribute(&self, index: usize) -> f32 {
        match index {
            0 => self.inverted as u8 as f32,
            1 => self.decibel_mode as u8 as f32,
            _ => 0.0,
        }
    }

    fn set_attribute(&mut self, index: usize, value: f32) {
        match index {
            0 => self.inverted = value > 0.5,
            1 => self.decibel_mode = value > 0.5,
            _ => {}
        }
    }
}

impl Modulator for Velocity {
    fn type_name(&self) -> &'static str {
        "Velocity"
    }
}

impl VoiceStartModulator for Velocity {
    fn start_voice(&mut self, note: &NoteContext) -> f32 {
        let mut value = note.velocity.clamp(0.0, 1.0);

        if self.inverted {
            value = 1.0 - value;
        }

        if self.decibel_mode {
            value = 10f32.powf((1.0 - value) * -VELOCITY_DB_RANGE / 20.0);
        }

        value
    }
}

const KEY_ATTRIBUTES: &[AttributeInfo] = &[
    AttributeInfo::new("LowKey", 0.0, 127.0, 0.0),
    AttributeInfo::new("HighKey", 0.0, 127.0, 127.0),
];

/// Key number mapped linearly from `[low, high]` onto `[0, 1]`.
#[derive(Debug, Clone)]
pub struct KeyNumber {
    low: f32,
    high: f32,
}

impl Default for KeyNumber {
    fn default() -> Self {
        Self {
            low: 0.0,
            high: 127.0,
        }
    }
}

impl KeyNumber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn range(mut self, low: u8, high: u8) -> Self {
        self.low = low.min(127) as f32;
        self.high = high.min(127) as f32;
        self
    }
}

impl Attributes for KeyNumber {
    fn attribute_table(&self) -> &'static [AttributeInfo] {
        KEY_ATTRIBUTES
    }

    fn get_attribute(&self, index: usize) -> f32 {
        match index {
            0 => self.low,
            1 => self.high,
            _ => 0.0,
        }
    }

    fn set_attribute(&mut self, index: usize, value: f32) {
        match index {
            0 => self.low = KEY_ATTRIBUTES[0].clamp(value),
            1 => self.high = KEY_ATTRIBUTES[1].clamp(value),
            _ => {}
        }
    }
}

impl Modulator for KeyNumber {
    fn type_name(&self) -> &'static str {
        "KeyNumber"
    }
}

impl VoiceStartModulator for KeyNumber {
    fn start_voice(&mut self, note: &NoteContext) -> f32 {
        let span = self.high - self.low;
        if span.abs() < f32::EPSILON {
            return if note.key as f32 >= self.high { 1.0 } else { 0.0 };
        }

        ((note.key as f32 - self.low) / span).clamp(0.0, 1.0)
    }
}

const CONSTANT_ATTRIBUTES: &[AttributeInfo] = &[AttributeInfo::new("Value", 0.0, 1.0, 1.0)];

/// A fixed value, handy as a per-chain offset.
#[derive(Debug, Clone)]
pub struct Constant {
    value: f32,
}

impl Default for Constant {
    fn default() -> Self {
        Self { value: 1.0 }
    }
}

impl Constant {
    pub fn new(value: f32) -> Self {
        Self {
            value: CONSTANT_ATTRIBUTES[0].clamp(value),
        }
    }
}

impl Attributes for Constant {
    fn attribute_table(&self) -> &'static [AttributeInfo] {
        CONSTANT_ATTRIBUTES
    }

    fn get_attribute(&self, index: usize) -> f32 {
        if index == 0 {
            self.value
        } else {
            0.0
        }
    }

    fn set_attribute(&mut self, index: usize, value: f32) {
        if index == 0 {
            self.value = CONSTANT_ATTRIBUTES[0].clamp(value);
        }
    }
}

impl Modulator for Constant {
    fn type_name(&self) -> &'static str {
        "Constant"
    }
}

impl VoiceStartModulator for Constant {
    fn start_voice(&mut self, _note: &NoteContext) -> f32 {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(key: u8, velocity: u8) -> NoteContext {
        NoteContext::from_note(0, key, velocity)
    }

    #[test]
    fn velocity_passthrough_and_inverted() {
        let mut vel = Velocity::new();
        assert_eq!(vel.start_voice(&note(60, 127)), 1.0);

        let mut inv = Velocity::new().inverted(true);
        assert_eq!(inv.start_voice(&note(60, 127)), 0.0);
    }

    #[test]
    fn velocity_decibel_mode() {
        let mut vel = Velocity::new().decibel_mode(true);
        assert!((vel.start_voice(&note(60, 127)) - 1.0).abs() < 1e-6);

        let quiet = vel.start_voice(&note(60, 0));
        assert!(quiet < 1e-4);
    }

    #[test]
    fn key_number_range() {
        let mut key = KeyNumber::new().range(48, 72);
        assert_eq!(key.start_voice(&note(48, 100)), 0.0);
        assert_eq!(key.start_voice(&note(60, 100)), 0.5);
        assert_eq!(key.start_voice(&note(100, 100)), 1.0);
        assert_eq!(key.start_voice(&note(10, 100)), 0.0);
    }

    #[test]
    fn constant_is_clamped() {
        let mut c = Constant::new(3.0);
        assert_eq!(c.start_voice(&note(60, 100)), 1.0);

        c.set_attribute(0, 0.25);
        assert_eq!(c.get_attribute(0), 0.25);
    }
}
