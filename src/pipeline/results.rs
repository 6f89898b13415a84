//! Result records returned by [`Htt`](super::Htt).
//!
//! Point lists come in pairs: image-plane pixels and their position in the
//! object-plane window of [`ObjectPlaneView`](crate::render::ObjectPlaneView).
//! Errors are reported in µm.
use crate::engine::{GridErrors, ProcessType};
use crate::error::ReturnCode;
use crate::hough::Line;
use crate::image::ImageU8;
use crate::model::{Measures, ModelType, TestMeasures};
use crate::profile::PixelPoint;
use crate::transform::TransformParams;

#[derive(Clone, Debug)]
pub struct CalibrationGridResult {
    pub valid: bool,
    pub code: ReturnCode,
    /// Calibrated transform, present when `valid`
    pub params: Option<TransformParams>,
    pub loss: f64,
    pub img_lines: Vec<Line>,
    pub img_intersections: Vec<PixelPoint>,
    pub obj_intersections: Vec<PixelPoint>,
    /// Frame resampled on the object plane with the calibrated transform
    pub obj_grid: Option<ImageU8>,
    pub errors: Option<GridErrors>,
    /// Stylus H recovered from the central chart line, degrees
    pub estimated_h: Option<f64>,
}

impl CalibrationGridResult {
    pub(crate) fn failed(code: ReturnCode) -> Self {
        Self {
            valid: false,
            code,
            params: None,
            loss: f64::INFINITY,
            img_lines: Vec::new(),
            img_intersections: Vec::new(),
            obj_intersections: Vec::new(),
            obj_grid: None,
            errors: None,
            estimated_h: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AccurateCalibrationResult {
    pub valid: bool,
    pub code: ReturnCode,
    pub params: Option<TransformParams>,
    pub loss: f64,
    /// Relative frame error of the accepted run
    pub error: f64,
    /// Images that produced a usable fit
    pub used_images: usize,
    /// Single image: orchestrator attempts; several images: swarm runs
    pub attempts: usize,
    /// Frame measured with the calibrated transform
    pub measures: Option<TestMeasures>,
    pub bevel_image: Option<ImageU8>,
}

impl AccurateCalibrationResult {
    pub(crate) fn failed(code: ReturnCode) -> Self {
        Self {
            valid: false,
            code,
            params: None,
            loss: f64::INFINITY,
            error: f64::INFINITY,
            used_images: 0,
            attempts: 0,
            measures: None,
            bevel_image: None,
        }
    }
}

/// One image of a multi-frame calibration with its stylus orientation.
#[derive(Clone, Copy, Debug)]
pub struct CalibrationImage<'a> {
    pub image: &'a ImageU8,
    pub delta_n: f64,
    pub h: f64,
    pub label: &'a str,
}

#[derive(Clone, Debug, Default)]
pub struct LensFittingResult {
    pub valid: bool,
    pub code: ReturnCode,
    pub model_type: Option<ModelType>,
    pub process: Option<ProcessType>,
    pub loss: f64,
    pub iteration: Option<usize>,
    pub measures: Measures,
    /// `B` and `M` of the current calibration frame
    pub real_measures: Measures,
    /// `real - measured` for `B` and `M`, µm
    pub errors: Measures,

    pub img_profile: Vec<PixelPoint>,
    pub img_maxima: Vec<PixelPoint>,
    pub img_bevel: Vec<PixelPoint>,
    pub img_model_points: Vec<PixelPoint>,
    pub img_distance_points: Vec<PixelPoint>,

    pub obj_profile: Vec<PixelPoint>,
    pub obj_maxima: Vec<PixelPoint>,
    pub obj_bevel: Vec<PixelPoint>,
    pub obj_model_points: Vec<PixelPoint>,
    pub obj_distance_points: Vec<PixelPoint>,

    pub bevel_image: Option<ImageU8>,
    pub obj_plane_image: Option<ImageU8>,
    pub obj_bevel_image: Option<ImageU8>,
}

#[derive(Clone, Debug, Default)]
pub struct ProfileDetectionResult {
    pub valid: bool,
    pub code: ReturnCode,
    pub img_profile: Vec<PixelPoint>,
}
