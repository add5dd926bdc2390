//! Position-to-name mapping for frame fields.
//!
//! The wire carries positions only; these layouts give the host a name for each
//! slot of a given firmware revision.

use serde::{Deserialize, Serialize};

use super::{ConfigError, Result};
use crate::serial::protocol::{Field, Frame};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldLayout {
    names: Vec<String>,
}

impl FieldLayout {
    pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// `field_0`, `field_1`, ... for configurations without named slots
    pub fn positional(len: usize) -> Self {
        Self::new((0..len).map(|i| format!("field_{}", i)))
    }

    /// Telemetry sent by the first firmware revision
    pub fn v1_inbound() -> Self {
        Self::new([
            "percent_on",
            "set_point",
            "fan_speed",
            "temperature",
            "temp_filtered",
            "time",
            "input_var",
            "avg_err",
            "score",
        ])
    }

    /// Commands accepted by the first firmware revision
    pub fn v1_outbound() -> Self {
        Self::new(["kc", "tau_i", "tau_d", "tau_f", "control_mode", "filter_mode"])
    }

    /// 16-slot revision. Unassigned slots keep positional names.
    pub fn v2() -> Self {
        let mut layout = Self::positional(16);
        for (index, name) in [
            (0, "kc"),
            (1, "tau_i"),
            (2, "tau_d"),
            (3, "tau_f"),
            (4, "control_mode"),
            (5, "filter_mode"),
            (12, "time"),
            (15, "score"),
        ] {
            layout.names[index] = name.to_string();
        }
        layout
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Look up a field of `frame` by name
    pub fn get(&self, frame: &Frame, name: &str) -> Option<Field> {
        self.index_of(name).and_then(|i| frame.get(i))
    }

    /// Pair each field of `frame` with its slot name
    pub fn named<'a>(&'a self, frame: &'a Frame) -> impl Iterator<Item = (&'a str, Field)> + 'a {
        self.names.iter().map(String::as_str).zip(frame.fields().iter().copied())
    }

    /// Build a full frame where only the given slots carry values and every other
    /// slot is the `_` placeholder.
    pub fn frame_from<'n>(&self, values: impl IntoIterator<Item = (&'n str, Field)>) -> Result<Frame> {
        let mut frame = Frame::unchanged(self.len());
        for (name, field) in values {
            let index = self
                .index_of(name)
                .ok_or_else(|| ConfigError::Invalid(format!("unknown field name {:?}", name)))?;
            frame.set(index, field);
        }
        Ok(frame)
    }
}
