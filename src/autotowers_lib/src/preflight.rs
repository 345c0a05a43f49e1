//! Print settings a tower depends on, checked before any G-code is produced.
//!
//! The tower is modelled as a hollow, single-walled column on a brim. Settings that add
//! solid skins, infill, supports or a different adhesion would print something else, and
//! adaptive layer heights make section heights unpredictable.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{TowerError, TowerResult};
use crate::Mm;

/// Which settings container a value is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingSource {
    GlobalStack,
    ActiveExtruder,
}

impl fmt::Display for SettingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingSource::GlobalStack => write!(f, "global"),
            SettingSource::ActiveExtruder => write!(f, "extruder"),
        }
    }
}

/// A setting's current value as reported by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Bool(value) => write!(f, "{}", value),
            SettingValue::Number(value) => write!(f, "{}", value),
            SettingValue::Text(value) => write!(f, "{:?}", value),
        }
    }
}

/// The value a critical setting must have.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Expected {
    Bool(bool),
    Number(f64),
    Text(&'static str),
}

impl Expected {
    pub fn matches(&self, actual: &SettingValue) -> bool {
        match (self, actual) {
            (Expected::Bool(expected), SettingValue::Bool(actual)) => expected == actual,
            (Expected::Number(expected), SettingValue::Number(actual)) => (expected - actual).abs() < 1e-9,
            (Expected::Text(expected), SettingValue::Text(actual)) => expected == actual,
            _ => false,
        }
    }
}

impl fmt::Display for Expected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expected::Bool(value) => write!(f, "{}", value),
            Expected::Number(value) => write!(f, "{}", value),
            Expected::Text(value) => write!(f, "{:?}", value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CriticalSetting {
    pub name: &'static str,
    pub source: SettingSource,
    /// `None` for settings the tower reads but doesn't constrain.
    pub required: Option<Expected>,
}

const fn critical(name: &'static str, source: SettingSource, required: Option<Expected>) -> CriticalSetting {
    CriticalSetting { name, source, required }
}

pub const ADAPTIVE_LAYER_HEIGHT: &str = "adaptive_layer_height_enabled";
pub const LAYER_HEIGHT: &str = "layer_height";
pub const INITIAL_LAYER_HEIGHT: &str = "layer_height_0";

use Expected::{Bool, Number, Text};
use SettingSource::{ActiveExtruder, GlobalStack};

pub static LINEAR_ADVANCE_CRITICAL_SETTINGS: [CriticalSetting; 16] = [
    critical(ADAPTIVE_LAYER_HEIGHT, GlobalStack, Some(Bool(false))),
    critical(LAYER_HEIGHT, GlobalStack, None),
    critical("meshfix_union_all_remove_holes", ActiveExtruder, Some(Bool(false))),
    critical("support_enable", GlobalStack, Some(Bool(false))),
    critical("top_bottom_thickness", GlobalStack, Some(Number(0.0))),
    critical("top_thickness", GlobalStack, Some(Number(0.0))),
    critical("bottom_thickness", GlobalStack, Some(Number(0.0))),
    critical("top_layers", GlobalStack, Some(Number(0.0))),
    critical("bottom_layers", GlobalStack, Some(Number(0.0))),
    critical("wall_thickness", GlobalStack, Some(Number(0.0))),
    critical("wall_line_count", GlobalStack, Some(Number(2.0))),
    critical("infill_sparse_density", GlobalStack, Some(Number(0.0))),
    critical("infill_wall_line_count", GlobalStack, Some(Number(0.0))),
    critical("adhesion_type", GlobalStack, Some(Text("brim"))),
    critical("brim_line_count", GlobalStack, Some(Number(10.0))),
    critical("brim_width", GlobalStack, Some(Number(4.0))),
];

/// A critical setting whose current value isn't the one the tower needs.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingConflict {
    pub name: &'static str,
    pub source: SettingSource,
    pub expected: Expected,
    pub actual: SettingValue,
}

impl fmt::Display for SettingConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) is {}, needs {}", self.name, self.source, self.actual, self.expected)
    }
}

/// Read access to the host's print settings.
pub trait SettingsProvider {
    fn setting(&self, source: SettingSource, name: &str) -> Option<SettingValue>;

    fn number(&self, source: SettingSource, name: &str) -> Option<f64> {
        match self.setting(source, name)? {
            SettingValue::Number(value) => Some(value),
            _ => None,
        }
    }
}

/// Print settings as plain maps, e.g. exported from the slicer into the run configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrintSettings {
    pub global: HashMap<String, SettingValue>,
    pub extruder: HashMap<String, SettingValue>,
}

impl PrintSettings {
    pub fn set(&mut self, source: SettingSource, name: &str, value: SettingValue) -> &mut Self {
        let map = match source {
            SettingSource::GlobalStack => &mut self.global,
            SettingSource::ActiveExtruder => &mut self.extruder,
        };
        map.insert(name.to_owned(), value);
        self
    }
}

impl SettingsProvider for PrintSettings {
    fn setting(&self, source: SettingSource, name: &str) -> Option<SettingValue> {
        let map = match source {
            SettingSource::GlobalStack => &self.global,
            SettingSource::ActiveExtruder => &self.extruder,
        };
        map.get(name).cloned()
    }
}

/// Check `settings` against `table`.
///
/// Adaptive layer heights are reported on their own, before anything else. Every other
/// mismatch is collected into one [`TowerError::ConflictingSettings`]. Settings the provider
/// doesn't know about are skipped.
pub fn check_critical_settings(settings: &dyn SettingsProvider, table: &[CriticalSetting]) -> TowerResult<()> {
    if settings.setting(SettingSource::GlobalStack, ADAPTIVE_LAYER_HEIGHT) == Some(SettingValue::Bool(true)) {
        return Err(TowerError::AdaptiveLayerHeight);
    }

    let mut conflicts = vec![];
    for entry in table {
        let Some(expected) = entry.required else {
            continue;
        };
        let Some(actual) = settings.setting(entry.source, entry.name) else {
            debug!(setting = entry.name, "Critical setting not reported, skipping");
            continue;
        };
        if !expected.matches(&actual) {
            conflicts.push(SettingConflict { name: entry.name, source: entry.source, expected, actual });
        }
    }

    if conflicts.is_empty() {
        Ok(())
    } else {
        Err(TowerError::ConflictingSettings(conflicts))
    }
}

/// Initial and printed layer heights, when the provider has them.
pub fn layer_heights(settings: &dyn SettingsProvider) -> (Option<Mm>, Option<Mm>) {
    (
        settings.number(SettingSource::GlobalStack, INITIAL_LAYER_HEIGHT),
        settings.number(SettingSource::GlobalStack, LAYER_HEIGHT),
    )
}
