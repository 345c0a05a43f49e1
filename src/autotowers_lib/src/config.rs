//! Settings for one post-processing run, read from JSON.
//!
//! ```json
//! {
//!   "tower": { "preset_index": null, "start_kfactor": "0.0", "kfactor_change": "0.05" },
//!   "print_settings": { "global": { "layer_height": 0.16 } },
//!   "enable_lcd_messages": true
//! }
//! ```
//!
//! Every field is optional.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::controller::LinearAdvanceTowerController;
use crate::error::{TowerError, TowerResult};
use crate::model::LinearAdvanceTowerModel;
use crate::preflight::PrintSettings;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostProcessConfig {
    pub tower: LinearAdvanceTowerModel,
    /// When present, checked before processing and used for layer heights.
    pub print_settings: Option<PrintSettings>,
    pub enable_lcd_messages: bool,
    pub enable_advanced_gcode_comments: bool,
}

impl Default for PostProcessConfig {
    fn default() -> Self {
        PostProcessConfig {
            tower: LinearAdvanceTowerModel::default(),
            print_settings: None,
            enable_lcd_messages: false,
            enable_advanced_gcode_comments: true,
        }
    }
}

impl PostProcessConfig {
    pub fn from_json_str(json: &str) -> TowerResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> TowerResult<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| TowerError::io(path, e))?;
        Self::from_json_str(&json)
    }

    /// A controller for this run's tower, with the print settings already checked.
    pub fn controller(&self) -> TowerResult<LinearAdvanceTowerController> {
        let mut controller = LinearAdvanceTowerController::new(self.tower.clone());
        if let Some(settings) = &self.print_settings {
            controller.preflight(settings)?;
        }
        Ok(controller)
    }
}
