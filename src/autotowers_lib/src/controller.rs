//! Glue between the tower dialog, the host that loads meshes, and G-code post-processing.

use std::path::Path;

use tracing::info;

use crate::error::TowerResult;
use crate::la_tower::{self, LinearAdvanceParameters, SectionReport};
use crate::model::{LinearAdvanceTowerModel, MeshParameters};
use crate::preflight::{check_critical_settings, SettingsProvider, LINEAR_ADVANCE_CRITICAL_SETTINGS};
use crate::{GcodeProgram, Mm, TowerGeometry};

/// Mesh template custom towers are generated from.
pub const OPENSCAD_TEMPLATE: &str = "latower.scad";

/// The host side of tower creation: putting a tower mesh on the build plate.
pub trait TowerLoader {
    /// Load a pre-generated tower from an STL file.
    fn load_preset(&mut self, tower_name: &str, stl_path: &Path) -> TowerResult<()>;

    /// Generate a tower from `template` with the given named parameters, then load it.
    fn generate_custom(&mut self, tower_name: &str, template: &str, parameters: &MeshParameters) -> TowerResult<()>;
}

#[derive(Debug, Clone, Default)]
pub struct LinearAdvanceTowerController {
    model: LinearAdvanceTowerModel,
}

impl LinearAdvanceTowerController {
    // The tower has no base; the first section starts on the build plate.
    const BASE_HEIGHT: Mm = 0.0;

    pub fn new(model: LinearAdvanceTowerModel) -> Self {
        LinearAdvanceTowerController { model }
    }

    pub fn model(&self) -> &LinearAdvanceTowerModel {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut LinearAdvanceTowerModel {
        &mut self.model
    }

    /// Refuse print settings that would ruin the tower, then adopt the slicer's layer heights.
    pub fn preflight(&mut self, settings: &dyn SettingsProvider) -> TowerResult<()> {
        check_critical_settings(settings, &LINEAR_ADVANCE_CRITICAL_SETTINGS)?;
        self.model.update_layer_heights(settings);
        Ok(())
    }

    /// The user accepted the dialog: load the selected preset, or generate a custom tower.
    pub fn dialog_accepted(&self, loader: &mut dyn TowerLoader) -> TowerResult<()> {
        match (self.model.preset(), self.model.preset_file_path()) {
            (Some(preset), Some(stl_path)) => {
                let tower_name = format!("Preset {}", preset.name);
                info!(tower = tower_name.as_str(), "Loading preset {}", stl_path.display());
                loader.load_preset(&tower_name, &stl_path)
            }
            _ => {
                let parameters = self.model.mesh_parameters()?;
                let tower_name = self.model.custom_tower_name();
                info!(tower = tower_name.as_str(), "Generating custom tower from {}", OPENSCAD_TEMPLATE);
                loader.generate_custom(&tower_name, OPENSCAD_TEMPLATE, &parameters)
            }
        }
    }

    pub fn parameters(&self, enable_lcd_messages: bool, enable_advanced_gcode_comments: bool) -> TowerResult<LinearAdvanceParameters> {
        Ok(LinearAdvanceParameters {
            geometry: TowerGeometry {
                base_height: Self::BASE_HEIGHT,
                section_height: self.model.optimal_section_height(),
                initial_layer_height: self.model.initial_layer_height,
                layer_height: self.model.layer_height,
            },
            start_kfactor: self.model.start_kfactor()?,
            kfactor_change: self.model.kfactor_change()?,
            enable_lcd_messages,
            enable_advanced_gcode_comments,
        })
    }

    /// Post-process the sliced tower before it's sent to the printer or saved.
    pub fn post_process(
        &self,
        mut program: GcodeProgram,
        enable_lcd_messages: bool,
        enable_advanced_gcode_comments: bool,
    ) -> TowerResult<GcodeProgram> {
        self.post_process_in_place(&mut program, enable_lcd_messages, enable_advanced_gcode_comments)?;
        Ok(program)
    }

    pub fn post_process_in_place(
        &self,
        program: &mut GcodeProgram,
        enable_lcd_messages: bool,
        enable_advanced_gcode_comments: bool,
    ) -> TowerResult<SectionReport> {
        let parameters = self.parameters(enable_lcd_messages, enable_advanced_gcode_comments)?;
        Ok(la_tower::post_process(program, &parameters))
    }
}
