//! JSON configuration documents: processing [`Settings`] and instrument
//! [`Calibration`].
pub mod calibration;
pub mod job;
pub mod settings;

pub use calibration::{Calibration, FrameReference, GridReference, OrientationLimits, Range};
pub use job::{load_job, JobConfig, JobImage, JobMode};
pub use settings::{
    ChartSettings, ImageSettings, OptimizationSettings, PsoSettings, ReferencePoints, SearchSpaceSettings,
    Settings, TestSettings, TransformCalibrationSettings,
};

use crate::image::io::write_json_file;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

fn load_config<T: DeserializeOwned>(path: &Path) -> Result<T, String> {
    let contents = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config {}: {e}", path.display()))?;
    let config: T = serde_json::from_str(&contents)
        .map_err(|e| format!("Failed to parse config {}: {e}", path.display()))?;
    Ok(config)
}

pub fn load_settings(path: &Path) -> Result<Settings, String> {
    load_config(path)
}

pub fn load_calibration(path: &Path) -> Result<Calibration, String> {
    load_config(path)
}

/// Write the calibration document back, pretty-printed.
pub fn save_calibration(path: &Path, calibration: &Calibration) -> Result<(), String> {
    write_json_file(path, calibration)
}
