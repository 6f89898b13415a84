//! Calibration document: current and nominal transform parameters, their
//! admissible ranges, the optimizer search space and the reference frames
//! of the accurate calibration.
use crate::transform::{TransformParams, CALIBRATED_PARAMS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Closed interval `[min, max]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Symmetric interval around `centre`.
    pub fn around(centre: f64, half: f64) -> Self {
        Self::new(centre - half, centre + half)
    }

    #[inline]
    pub fn contains(&self, v: f64) -> bool {
        v >= self.min && v <= self.max
    }
}

/// Known geometry of a calibration frame (lengths in mm, angles in degrees).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameReference {
    #[serde(rename = "B")]
    pub b: f64,
    #[serde(rename = "M")]
    pub m: f64,
    pub angle1: f64,
    pub angle2: f64,
}

/// Acquisition pose and regularization of the grid calibration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridReference {
    #[serde(rename = "deltaN")]
    pub delta_n: f64,
    #[serde(rename = "H")]
    pub h: f64,
    /// Weight of the pull towards the nominal parameters; 0 disables it
    pub lambda: f64,
}

impl Default for GridReference {
    fn default() -> Self {
        Self {
            delta_n: 0.0,
            h: 0.0,
            lambda: 0.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameCalibration {
    /// Name of the frame used by single-image calibration and validation
    pub current: String,
    pub frames: BTreeMap<String, FrameReference>,
    pub grid: GridReference,
}

impl Default for FrameCalibration {
    fn default() -> Self {
        let mut frames = BTreeMap::new();
        frames.insert(
            "mini_bevel".to_string(),
            FrameReference {
                b: 0.5,
                m: 2.0,
                angle1: 55.0,
                angle2: 55.0,
            },
        );
        Self {
            current: "mini_bevel".to_string(),
            frames,
            grid: GridReference::default(),
        }
    }
}

/// Admissible stylus orientation, degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrientationLimits {
    #[serde(rename = "deltaN")]
    pub delta_n: Range,
    #[serde(rename = "H")]
    pub h: Range,
}

impl Default for OrientationLimits {
    fn default() -> Self {
        Self {
            delta_n: Range::new(-30.0, 30.0),
            h: Range::new(-30.0, 30.0),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Calibration {
    pub scheimpflug_transformation: TransformParams,
    pub nominal_scheimpflug_transformation: TransformParams,
    pub nominal_range_scheimpflug_transformation: BTreeMap<String, Range>,
    pub search_space_scheimpflug: BTreeMap<String, Range>,
    pub scheimpflug_transformation_calibration: FrameCalibration,
    pub htt: OrientationLimits,
}

fn ranges_around(params: &TransformParams, angle: f64, centre: f64, length: f64) -> BTreeMap<String, Range> {
    CALIBRATED_PARAMS
        .iter()
        .zip(params.calibrated())
        .map(|(&name, v)| {
            let half = match name {
                "cx0" | "cy0" => centre,
                "p1" | "p2" | "tt" => length,
                _ => angle,
            };
            (name.to_string(), Range::around(v, half))
        })
        .collect()
}

impl Default for Calibration {
    fn default() -> Self {
        let nominal = TransformParams::default();
        Self {
            nominal_range_scheimpflug_transformation: ranges_around(&nominal, 3.0, 30.0, 3.0),
            search_space_scheimpflug: ranges_around(&nominal, 2.0, 20.0, 2.0),
            scheimpflug_transformation: nominal.clone(),
            nominal_scheimpflug_transformation: nominal,
            scheimpflug_transformation_calibration: FrameCalibration::default(),
            htt: OrientationLimits::default(),
        }
    }
}

impl Calibration {
    /// Reference geometry of the current frame.
    pub fn current_frame(&self) -> Option<&FrameReference> {
        let section = &self.scheimpflug_transformation_calibration;
        section.frames.get(&section.current)
    }

    /// Optimizer bounds in calibrated-parameter order, `None` when a
    /// parameter has no search range.
    pub fn search_bounds(&self) -> Option<(Vec<f64>, Vec<f64>)> {
        let mut lb = Vec::with_capacity(CALIBRATED_PARAMS.len());
        let mut ub = Vec::with_capacity(CALIBRATED_PARAMS.len());
        for name in CALIBRATED_PARAMS {
            let range = self.search_space_scheimpflug.get(name)?;
            lb.push(range.min);
            ub.push(range.max);
        }
        Some((lb, ub))
    }

    /// Whether each current parameter lies inside its nominal range.
    ///
    /// Parameters without a range are reported as out of range.
    pub fn check_calibrated_params(&self) -> BTreeMap<String, bool> {
        let current = &self.scheimpflug_transformation;
        CALIBRATED_PARAMS
            .iter()
            .map(|&name| {
                let inside = match (self.nominal_range_scheimpflug_transformation.get(name), current.get(name)) {
                    (Some(range), Some(v)) => range.contains(v),
                    _ => false,
                };
                (name.to_string(), inside)
            })
            .collect()
    }

    /// Whether each current parameter sits exactly on a bound of its
    /// nominal range.
    pub fn params_on_nominal_bounds(&self) -> BTreeMap<String, bool> {
        let current = &self.scheimpflug_transformation;
        CALIBRATED_PARAMS
            .iter()
            .map(|&name| {
                let on_bound = match (self.nominal_range_scheimpflug_transformation.get(name), current.get(name)) {
                    (Some(range), Some(v)) => v == range.min || v == range.max,
                    _ => false,
                };
                (name.to_string(), on_bound)
            })
            .collect()
    }

    /// Store calibrated values, keeping pixel pitch and magnification of the
    /// nominal transform.
    pub fn store_calibrated(&mut self, v: &[f64]) {
        let mut params = self.nominal_scheimpflug_transformation.with_calibrated(v);
        params.px = self.nominal_scheimpflug_transformation.px;
        params.magnification = self.nominal_scheimpflug_transformation.magnification;
        self.scheimpflug_transformation = params;
    }
}
