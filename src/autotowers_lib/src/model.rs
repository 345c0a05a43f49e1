//! What the user picked for a Linear Advance tower: a preset, or custom K-factor entries.
//!
//! Numeric entries stay text until they're used, the way a dialog hands them over. Parsing
//! them is where bad input shows up, as [`crate::TowerError::InvalidNumber`].

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{parse_number, TowerResult};
use crate::preflight::{layer_heights, SettingsProvider};
use crate::presets::Preset;
use crate::{KFactor, Mm};

/// Height each section is aimed at before rounding to whole layers.
pub const NOMINAL_SECTION_HEIGHT: Mm = 8.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearAdvanceTowerModel {
    /// Directory holding the preset STL files.
    pub stl_dir: PathBuf,
    /// Selected preset. `None`, or an index past the preset table, means a custom tower.
    pub preset_index: Option<usize>,
    pub start_kfactor: String,
    pub end_kfactor: String,
    pub kfactor_change: String,
    /// Label printed on the column.
    pub tower_label: String,
    /// Description carved up the side of the tower.
    pub tower_description: String,
    pub initial_layer_height: Mm,
    pub layer_height: Mm,
}

impl Default for LinearAdvanceTowerModel {
    fn default() -> Self {
        LinearAdvanceTowerModel {
            stl_dir: PathBuf::from("stl"),
            preset_index: Some(0),
            start_kfactor: "0.0".to_owned(),
            end_kfactor: "0.2".to_owned(),
            kfactor_change: "0.02".to_owned(),
            tower_label: String::new(),
            tower_description: "K-factor".to_owned(),
            initial_layer_height: 0.2,
            layer_height: 0.2,
        }
    }
}

impl LinearAdvanceTowerModel {
    pub fn new(stl_dir: impl Into<PathBuf>) -> Self {
        LinearAdvanceTowerModel { stl_dir: stl_dir.into(), ..Default::default() }
    }

    pub fn preset(&self) -> Option<&'static Preset> {
        self.preset_index.and_then(Preset::by_index)
    }

    pub fn preset_selected(&self) -> bool {
        self.preset().is_some()
    }

    pub fn select_preset(&mut self, index: usize) {
        self.preset_index = Some(index);
    }

    pub fn select_custom(&mut self) {
        self.preset_index = None;
    }

    pub fn preset_file_path(&self) -> Option<PathBuf> {
        self.preset().map(|preset| preset.file_path(&self.stl_dir))
    }

    /// Start K-factor as entered, or the preset's when one is selected.
    pub fn start_kfactor_str(&self) -> &str {
        self.preset().map_or(self.start_kfactor.as_str(), |preset| preset.start_kfactor)
    }

    /// K-factor change as entered, or the preset's when one is selected.
    pub fn kfactor_change_str(&self) -> &str {
        self.preset().map_or(self.kfactor_change.as_str(), |preset| preset.kfactor_change)
    }

    pub fn start_kfactor(&self) -> TowerResult<KFactor> {
        parse_number("start K-factor", self.start_kfactor_str())
    }

    /// Only shapes the generated model; the post-processing steps by `kfactor_change` alone.
    pub fn end_kfactor(&self) -> TowerResult<KFactor> {
        parse_number("end K-factor", &self.end_kfactor)
    }

    pub fn kfactor_change(&self) -> TowerResult<KFactor> {
        parse_number("K-factor change", self.kfactor_change_str())
    }

    /// Pick up the layer heights the slicer will actually print with.
    pub fn update_layer_heights(&mut self, settings: &dyn SettingsProvider) {
        let (initial, printed) = layer_heights(settings);
        if let Some(printed) = printed {
            self.layer_height = printed;
        }
        self.initial_layer_height = initial.unwrap_or(self.layer_height);
    }

    /// The nominal section height rounded to a whole number of printed layers, so every
    /// section holds the same number of layers.
    pub fn optimal_section_height(&self) -> Mm {
        if !(self.layer_height > 0.0) {
            return NOMINAL_SECTION_HEIGHT;
        }
        let layers = (NOMINAL_SECTION_HEIGHT / self.layer_height).round().max(1.0);
        layers * self.layer_height
    }

    pub fn custom_tower_name(&self) -> String {
        format!(
            "Custom Linear Advance Tower - {}-{}x{}",
            self.start_kfactor, self.end_kfactor, self.kfactor_change
        )
    }

    /// Named parameters for the mesh template of a custom tower.
    pub fn mesh_parameters(&self) -> TowerResult<MeshParameters> {
        let mut parameters = MeshParameters::default();
        parameters
            .number("Starting_Value", self.start_kfactor()?)
            .number("Ending_Value", self.end_kfactor()?)
            .number("Value_Change", self.kfactor_change()?)
            .number("Section_Height", self.optimal_section_height())
            .text("Column_Label", &self.tower_label)
            .text("Tower_Label", &self.tower_description);
        Ok(parameters)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MeshValue {
    Number(f64),
    Text(String),
}

/// Named values handed to the mesh generator.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct MeshParameters(BTreeMap<String, MeshValue>);

impl MeshParameters {
    pub fn number(&mut self, name: &str, value: f64) -> &mut Self {
        self.0.insert(name.to_owned(), MeshValue::Number(value));
        self
    }

    pub fn text(&mut self, name: &str, value: &str) -> &mut Self {
        self.0.insert(name.to_owned(), MeshValue::Text(value.to_owned()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&MeshValue> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MeshValue)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// `-D name=value` arguments for OpenSCAD, strings quoted.
    pub fn openscad_definitions(&self) -> Vec<String> {
        self.iter()
            .flat_map(|(name, value)| {
                let definition = match value {
                    MeshValue::Number(number) => format!("{}={}", name, number),
                    MeshValue::Text(text) => format!("{}={:?}", name, text),
                };
                ["-D".to_owned(), definition]
            })
            .collect()
    }
}
