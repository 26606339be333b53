//! Hierarchical property bag used to export and restore engine state.
//!
//! The tree is format-agnostic: every node has a type name, an id, a set of
//! named properties and ordered children. With the `serde` feature it can be
//! written to any serde format; the `modtrace` binary and the tests use JSON.

use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
#[derive(Debug, Clone, PartialEq)]
pub enum StateValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl StateValue {
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            StateValue::Number(n) => Some(*n as f32),
            StateValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            StateValue::Text(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StateValue::Bool(b) => Some(*b),
            StateValue::Number(n) => Some(*n > 0.5),
            StateValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StateValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f32> for StateValue {
    fn from(value: f32) -> Self {
        StateValue::Number(value as f64)
    }
}

impl From<bool> for StateValue {
    fn from(value: bool) -> Self {
        StateValue::Bool(value)
    }
}

impl From<&str> for StateValue {
    fn from(value: &str) -> Self {
        StateValue::Text(value.to_string())
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StateTree {
    pub type_name: String,
    pub id: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub properties: BTreeMap<String, StateValue>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub children: Vec<StateTree>,
}

impl StateTree {
    pub fn new(type_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: id.into(),
            properties: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<StateValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn with_child(mut self, child: StateTree) -> Self {
        self.children.push(child);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<StateValue>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&StateValue> {
        self.properties.get(key)
    }

    pub fn get_f32(&self, key: &str) -> Option<f32> {
        self.get(key).and_then(StateValue::as_f32)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(StateValue::as_bool)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(StateValue::as_str)
    }

    pub fn child(&self, type_name: &str, id: &str) -> Option<&StateTree> {
        self.children
            .iter()
            .find(|c| c.type_name == type_name && c.id == id)
    }
}

/// Export/restore through the property bag.
///
/// `restore_state` never fails: missing properties keep their current value,
/// unknown ones are ignored, out-of-range ones are clamped.
pub trait Stateful {
    fn export_state(&self) -> StateTree;

    fn restore_state(&mut self, tree: &StateTree);
}
