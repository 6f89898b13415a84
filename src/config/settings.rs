//! Processing settings document.
//!
//! Top-level keys follow the instrument file (`image`, `thresholding`,
//! `profile_cleanup`, `optimization`, `pso`, `search_space`, ...). The `pso`
//! and `search_space` arrays are indexed by model: 0 MiniBevel, 1 TBevel,
//! 2 CustomBevel, 3 MiniBevelExt.
use crate::preprocess::{CleanupParams, ThresholdParams};
use crate::pso::PsoParams;
use serde::{Deserialize, Serialize};

/// Expected input geometry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageSettings {
    /// Image width in pixels
    pub width: usize,
    /// Image height in pixels
    pub height: usize,
    pub n_channels: usize,
    /// Channel fed to the profile extractor and the grid detector
    pub selected_channel: usize,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            width: 560,
            height: 560,
            n_channels: 3,
            selected_channel: 1,
        }
    }
}

/// Section `optimization`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OptimizationSettings {
    /// When false lens fitting stops after preprocessing
    pub enabled: bool,
    pub max_retries: usize,
    pub debug: bool,
    pub check_intersections: bool,
    pub check_intersections_calibration: bool,
    pub check_intersections_validation: bool,
    pub loss_field_margin: i32,
    pub loss_field_margin_calibration: i32,
    pub loss_field_margin_validation: i32,
    /// Columns right of the rightmost profile point covered by the ramp
    pub loss_field_right_offset: i32,
    /// Columns left of the leftmost profile point cleared on empty rows
    pub loss_field_left_offset: i32,
    /// Width of the quadratic ramp left of each profile point
    pub left_gradient_width: i32,
    /// Maximum intersection count of a valid fit
    pub intersection_threshold: usize,
}

impl Default for OptimizationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            debug: false,
            check_intersections: true,
            check_intersections_calibration: false,
            check_intersections_validation: true,
            loss_field_margin: 0,
            loss_field_margin_calibration: 0,
            loss_field_margin_validation: 0,
            loss_field_right_offset: 40,
            loss_field_left_offset: 40,
            left_gradient_width: 10,
            intersection_threshold: 0,
        }
    }
}

/// Swarm tunables of one model (and of the transform calibration).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PsoSettings {
    /// Initial inertia
    pub w0i: f64,
    /// Final inertia
    pub w0f: f64,
    pub cp: f64,
    pub cg: f64,
    pub n_iterations: usize,
    pub n_particles: usize,
    /// Nominal bevel angle, degrees
    pub angle: f64,
    pub debug: bool,
    /// Fixed swarm seed for reproducible runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for PsoSettings {
    fn default() -> Self {
        Self {
            w0i: 0.9,
            w0f: 0.4,
            cp: 1.5,
            cg: 1.5,
            n_iterations: 60,
            n_particles: 400,
            angle: 55.0,
            debug: false,
            seed: None,
        }
    }
}

impl PsoSettings {
    /// Swarm parameters with these coefficients and the given swarm size.
    pub fn params_sized(&self, n_iterations: usize, n_particles: usize) -> PsoParams<f64> {
        PsoParams {
            w0i: self.w0i,
            w0f: self.w0f,
            cp: self.cp,
            cg: self.cg,
            n_iterations,
            n_particles,
            seed: self.seed,
            debug: self.debug,
        }
    }

    pub fn params(&self) -> PsoParams<f64> {
        self.params_sized(self.n_iterations, self.n_particles)
    }
}

/// Slope thresholds used to locate the bevel maxima on the profile.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReferencePoints {
    /// Index distance between the two points of a slope sample
    pub offset: usize,
    pub up_threshold: f64,
    pub lo_threshold: f64,
    pub up_threshold_ref: f64,
    pub lo_threshold_ref: f64,
}

impl Default for ReferencePoints {
    fn default() -> Self {
        Self {
            offset: 6,
            up_threshold: 1.0,
            lo_threshold: 1.0,
            up_threshold_ref: 0.3,
            lo_threshold_ref: 0.3,
        }
    }
}

/// Search-space multipliers and offsets of one model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchSpaceSettings {
    pub reference_points: ReferencePoints,
    /// Half window around the upper maximum for x1, pixels
    pub win_size_x: f64,
    /// Half window around the upper maximum for y1, pixels
    pub win_size_y: f64,
    #[serde(rename = "minMMultiplier")]
    pub min_m_multiplier: f64,
    #[serde(rename = "maxMMultiplier")]
    pub max_m_multiplier: f64,
    /// Offset added to the estimated alpha, radians
    pub min_alpha: f64,
    pub max_alpha: f64,
    #[serde(rename = "minBMultiplier")]
    pub min_b_multiplier: f64,
    #[serde(rename = "maxBMultiplier")]
    pub max_b_multiplier: f64,
    /// S range, pixels
    #[serde(rename = "minS")]
    pub min_s: f64,
    #[serde(rename = "maxS")]
    pub max_s: f64,
    /// E range, pixels
    #[serde(rename = "minE")]
    pub min_e: f64,
    #[serde(rename = "maxE")]
    pub max_e: f64,
    /// Half range of the free bevel angle, degrees
    pub delta_beta: f64,
    /// Per-segment loss weights; missing entries weigh 1
    pub weight: Vec<f64>,
    #[serde(rename = "shrinkOffsetM")]
    pub shrink_offset_m: f64,
    #[serde(rename = "shrinkOffsetB")]
    pub shrink_offset_b: f64,
}

impl Default for SearchSpaceSettings {
    fn default() -> Self {
        Self {
            reference_points: ReferencePoints::default(),
            win_size_x: 10.0,
            win_size_y: 10.0,
            min_m_multiplier: 0.8,
            max_m_multiplier: 1.2,
            min_alpha: -0.2,
            max_alpha: 0.2,
            min_b_multiplier: 0.1,
            max_b_multiplier: 0.6,
            min_s: 5.0,
            max_s: 40.0,
            min_e: 5.0,
            max_e: 40.0,
            delta_beta: 5.0,
            weight: vec![1.0; 6],
            shrink_offset_m: 0.0,
            shrink_offset_b: 0.0,
        }
    }
}

impl SearchSpaceSettings {
    /// Weight of segment `n`.
    #[inline]
    pub fn segment_weight(&self, n: usize) -> f64 {
        self.weight.get(n).copied().unwrap_or(1.0)
    }
}

/// Section `scheimpflug_transformation_calibration` of the settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransformCalibrationSettings {
    pub max_retries: usize,
    /// Relative error accepted by the frame calibration
    pub epsilon: f64,
    /// Loss accepted by the grid calibration
    pub epsilon_grid: f64,
    pub permit_boundary_solutions: bool,
    pub pso: PsoSettings,
}

impl Default for TransformCalibrationSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            epsilon: 0.01,
            epsilon_grid: 0.01,
            permit_boundary_solutions: false,
            pso: PsoSettings {
                n_iterations: 100,
                n_particles: 500,
                ..PsoSettings::default()
            },
        }
    }
}

/// Section `scheimpflug_transformation_chart`: grid detector tunables.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartSettings {
    pub dog_sigma1: f32,
    pub dog_sigma2: f32,
    /// Starting threshold of the adaptive DoG binarization
    pub dog_threshold: f32,
    /// Starting threshold of the adaptive peak search
    pub hough_threshold: f32,
    /// Total number of grid lines (both families)
    pub hough_peaks: usize,
    /// Sub-pixel refinement of the intersections
    pub refine: bool,
    pub debug: bool,
    /// Seed of the voting jitter; entropy when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for ChartSettings {
    fn default() -> Self {
        Self {
            dog_sigma1: 2.0,
            dog_sigma2: 6.0,
            dog_threshold: 0.5,
            hough_threshold: 0.5,
            hough_peaks: 14,
            refine: true,
            debug: false,
            seed: None,
        }
    }
}

/// Section `test`: debug output and bench options.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TestSettings {
    pub store_images: bool,
    pub output_folder: String,
    pub median_blur_filter: bool,
    pub low_pass_filter: bool,
    pub repetitions: usize,
    pub debug: bool,
}

impl Default for TestSettings {
    fn default() -> Self {
        Self {
            store_images: false,
            output_folder: "output".to_string(),
            median_blur_filter: false,
            low_pass_filter: true,
            repetitions: 1,
            debug: false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub image: ImageSettings,
    pub thresholding: ThresholdParams,
    pub profile_cleanup: CleanupParams,
    pub optimization: OptimizationSettings,
    pub pso: [PsoSettings; 4],
    pub search_space: [SearchSpaceSettings; 4],
    pub scheimpflug_transformation_calibration: TransformCalibrationSettings,
    pub scheimpflug_transformation_chart: ChartSettings,
    pub test: TestSettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_document_keeps_defaults() {
        let json = r#"{
            "image": {"width": 640, "selectedChannel": 0},
            "optimization": {"maxRetries": 5, "lossFieldMarginValidation": 2},
            "search_space": [{"minMMultiplier": 0.5, "weight": [1, 2]}, {}, {}, {"deltaBeta": 3}],
            "scheimpflug_transformation_chart": {"hough_peaks": 10}
        }"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.image.width, 640);
        assert_eq!(settings.image.height, 560);
        assert_eq!(settings.image.selected_channel, 0);
        assert_eq!(settings.optimization.max_retries, 5);
        assert_eq!(settings.optimization.loss_field_margin_validation, 2);
        assert_eq!(settings.search_space[0].min_m_multiplier, 0.5);
        assert_eq!(settings.search_space[0].segment_weight(1), 2.0);
        assert_eq!(settings.search_space[0].segment_weight(4), 1.0);
        assert_eq!(settings.search_space[3].delta_beta, 3.0);
        assert_eq!(settings.scheimpflug_transformation_chart.hough_peaks, 10);
        assert_eq!(settings.pso[2], PsoSettings::default());
    }

    #[test]
    fn serialized_keys_use_instrument_names() {
        let value = serde_json::to_value(Settings::default()).unwrap();
        assert!(value["image"]["nChannels"].is_number());
        assert!(value["optimization"]["checkIntersectionsCalibration"].is_boolean());
        assert!(value["search_space"][1]["shrinkOffsetM"].is_number());
        assert!(value["search_space"][0]["referencePoints"]["upThresholdRef"].is_number());
        assert!(value["scheimpflug_transformation_calibration"]["epsilonGrid"].is_number());
        assert!(value["scheimpflug_transformation_chart"]["dog_sigma1"].is_number());
        assert!(value["test"]["outputFolder"].is_string());
    }
}
