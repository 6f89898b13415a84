//! Job description read by the `bevel_fit` binary.
use crate::model::ModelType;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    #[default]
    LensFitting,
    LensValidation,
    ProfileDetection,
    GridCalibration,
    AccurateCalibration,
}

/// One image with its stylus orientation.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobImage {
    pub path: PathBuf,
    #[serde(default)]
    pub delta_n: f64,
    #[serde(default)]
    pub h: f64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    pub settings: PathBuf,
    pub calibration: PathBuf,
    #[serde(default)]
    pub mode: JobMode,
    /// Several images run a multi-frame calibration
    pub images: Vec<JobImage>,
    #[serde(default)]
    pub model: Option<ModelType>,
    /// Write the calibration document back after a successful calibration
    #[serde(default)]
    pub save_calibration: bool,
    #[serde(default)]
    pub json_out: Option<PathBuf>,
}

pub fn load_job(path: &Path) -> Result<JobConfig, String> {
    let data = fs::read_to_string(path).map_err(|e| format!("Failed to read job {}: {e}", path.display()))?;
    let job: JobConfig =
        serde_json::from_str(&data).map_err(|e| format!("Failed to parse job {}: {e}", path.display()))?;
    if job.images.is_empty() {
        return Err(format!("Job {} lists no images", path.display()));
    }
    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_defaults_to_lens_fitting() {
        let json = r#"{
            "settings": "s.json",
            "calibration": "c.json",
            "images": [{"path": "frame.png", "deltaN": 12.5}],
            "model": "t_bevel"
        }"#;
        let job: JobConfig = serde_json::from_str(json).unwrap();
        assert_eq!(job.mode, JobMode::LensFitting);
        assert_eq!(job.model, Some(ModelType::TBevel));
        assert_eq!(job.images[0].delta_n, 12.5);
        assert_eq!(job.images[0].h, 0.0);
        assert!(!job.save_calibration);
    }

    #[test]
    fn modes_use_snake_case() {
        let mode: JobMode = serde_json::from_str("\"accurate_calibration\"").unwrap();
        assert_eq!(mode, JobMode::AccurateCalibration);
    }
}
