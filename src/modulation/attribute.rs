//! Indexed attribute protocol shared by every modulator.
//!
//! Hosts, scripts and the control queue address parameters by index without
//! knowing the concrete modulator type. Each modulator publishes a static
//! table of [`AttributeInfo`] and maps indices onto its own fields.

use crate::state::StateTree;

/// Name, legal range and default of one attribute.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttributeInfo {
    pub name: &'static str,
    pub min: f32,
    pub max: f32,
    pub default: f32,
}

impl AttributeInfo {
    pub const fn new(name: &'static str, min: f32, max: f32, default: f32) -> Self {
        Self {
            name,
            min,
            max,
            default,
        }
    }

    /// On/off attribute encoded as 0.0 / 1.0.
    pub const fn toggle(name: &'static str, default: bool) -> Self {
        Self::new(name, 0.0, 1.0, if default { 1.0 } else { 0.0 })
    }

    /// Force `value` into range. NaN becomes the default.
    #[inline]
    pub fn clamp(&self, value: f32) -> f32 {
        if value.is_nan() {
            self.default
        } else {
            value.clamp(self.min, self.max)
        }
    }
}

pub trait Attributes {
    fn attribute_table(&self) -> &'static [AttributeInfo];

    /// Current value of attribute `index`. Unknown indices read as 0.
    fn get_attribute(&self, index: usize) -> f32;

    /// Set attribute `index`, clamping into its range. Unknown indices are ignored.
    fn set_attribute(&mut self, index: usize, value: f32);

    fn num_attributes(&self) -> usize {
        self.attribute_table().len()
    }

    fn attribute_info(&self, index: usize) -> Option<AttributeInfo> {
        self.attribute_table().get(index).copied()
    }

    fn attribute_index(&self, name: &str) -> Option<usize> {
        self.attribute_table().iter().position(|a| a.name == name)
    }

    fn default_value(&self, index: usize) -> f32 {
        self.attribute_info(index).map_or(0.0, |a| a.default)
    }
}

/// Write every attribute of `attributes` into `tree` under its name.
pub fn export_attributes<A: Attributes + ?Sized>(attributes: &A, tree: &mut StateTree) {
    for (index, info) in attributes.attribute_table().iter().enumerate() {
        tree.set(info.name, attributes.get_attribute(index));
    }
}

/// Read every known attribute back from `tree`. Missing entries keep their
/// current value; out-of-range entries are clamped with a warning.
pub fn restore_attributes<A: Attributes + ?Sized>(attributes: &mut A, tree: &StateTree) {
    for (index, info) in attributes.attribute_table().iter().enumerate() {
        let Some(value) = tree.get_f32(info.name) else {
            continue;
        };

        let clamped = info.clamp(value);
        if clamped != value {
            log::warn!(
                "{} '{}': {} = {} out of range, clamped to {}",
                tree.type_name,
                tree.id,
                info.name,
                value,
                clamped
            );
        }

        attributes.set_attribute(index, clamped);
    }
}
