//! Pre-generated Linear Advance towers shipped as STL files.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{parse_number, TowerResult};
use crate::KFactor;

/// A ready-made tower: its STL file and the K-factors it was modelled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Preset {
    pub name: &'static str,
    pub filename: &'static str,
    pub start_kfactor: &'static str,
    pub kfactor_change: &'static str,
}

pub static LINEAR_ADVANCE_PRESETS: [Preset; 2] = [
    Preset {
        name: "K-factor 0.0 - 0.2",
        filename: "Linear Advance Tower - K 0.0-0.2.stl",
        start_kfactor: "0.0",
        kfactor_change: "0.02",
    },
    Preset {
        name: "K-factor 0.0 - 2.0",
        filename: "Linear Advance Tower - K 0.0-2.0.stl",
        start_kfactor: "0.0",
        kfactor_change: "0.2",
    },
];

impl Preset {
    pub fn by_index(index: usize) -> Option<&'static Preset> {
        LINEAR_ADVANCE_PRESETS.get(index)
    }

    pub fn by_name(name: &str) -> Option<&'static Preset> {
        LINEAR_ADVANCE_PRESETS.iter().find(|preset| preset.name == name)
    }

    pub fn start_kfactor(&self) -> TowerResult<KFactor> {
        parse_number("preset start K-factor", self.start_kfactor)
    }

    pub fn kfactor_change(&self) -> TowerResult<KFactor> {
        parse_number("preset K-factor change", self.kfactor_change)
    }

    /// Where the preset's STL lives inside `stl_dir`.
    pub fn file_path(&self, stl_dir: impl AsRef<Path>) -> PathBuf {
        stl_dir.as_ref().join(self.filename)
    }
}
