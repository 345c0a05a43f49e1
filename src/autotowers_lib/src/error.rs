//! Error type shared by the tower model, preflight checks and file processing.
//!
//! Post-processing a [`crate::GcodeProgram`] itself never fails; everything
//! here happens before (settings, numeric entries) or around it (files).

use std::path::PathBuf;
use thiserror::Error;

use crate::preflight::SettingConflict;

/// Result type for tower operations.
pub type TowerResult<T> = Result<T, TowerError>;

/// Errors surfaced to whoever drives a tower pass.
#[derive(Debug, Error)]
pub enum TowerError {
    /// Adaptive layer heights make the height of each layer ambiguous.
    #[error("adaptive layer height must be disabled to print a tower")]
    AdaptiveLayerHeight,

    /// One or more print settings conflict with what the tower needs.
    #[error("{} print setting(s) conflict with the tower: {}", .0.len(), join_conflicts(.0))]
    ConflictingSettings(Vec<SettingConflict>),

    /// A numeric entry could not be parsed.
    #[error("{field} must be a number, got {value:?}")]
    InvalidNumber {
        /// Which entry was rejected.
        field: &'static str,
        /// The rejected text.
        value: String,
    },

    /// The host failed to load or generate the tower mesh.
    #[error("tower loader failed: {0}")]
    Loader(String),

    /// Reading or writing G-code failed.
    #[error("failed to access {path}: {source}")]
    Io {
        /// The file involved.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration file could not be decoded.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl TowerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TowerError::Io { path: path.into(), source }
    }
}

fn join_conflicts(conflicts: &[SettingConflict]) -> String {
    conflicts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse a free-form numeric entry the way the tower dialog accepts them.
pub(crate) fn parse_number(field: &'static str, value: &str) -> TowerResult<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| TowerError::InvalidNumber { field, value: value.to_owned() })
}
