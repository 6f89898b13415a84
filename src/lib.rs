#![doc = include_str!("../README.md")]

// Instrument facade and its result records.
pub mod pipeline;

// Configuration documents and return codes.
pub mod config;
pub mod error;

// Stages.
pub mod engine;
pub mod hough;
pub mod model;
pub mod preprocess;
pub mod render;

// Building blocks.
pub mod image;
pub mod profile;
pub mod pso;
pub mod retry;
pub mod transform;

// --- High-level re-exports -------------------------------------------------

pub use crate::config::{load_calibration, load_settings, save_calibration, Calibration, Settings};
pub use crate::error::{ReturnCode, ReturnCodeReporter};
pub use crate::pipeline::{
    AccurateCalibrationResult, CalibrationGridResult, CalibrationImage, Htt, LensFittingResult, ProfileDetectionResult,
};

// --- Prelude ---------------------------------------------------------------

/// Everything needed to drive the instrument from a frame on disk.
///
/// ```no_run
/// use bevel_calib::prelude::*;
///
/// # fn main() {
/// let mut htt = Htt::new(Settings::default(), Calibration::default());
/// let frame = ImageU8::new(560, 560, 3);
/// let fit = htt.lens_fitting(&frame, 0.0, 0.0, ModelType::TBevel);
/// println!("valid={} code={}", fit.valid, fit.code.value());
/// # }
/// ```
pub mod prelude {
    pub use crate::image::io::load_image;
    pub use crate::image::ImageU8;
    pub use crate::model::{Measures, ModelType};
    pub use crate::transform::{ScheimpflugTransform, TransformParams};
    pub use crate::{load_calibration, load_settings, save_calibration};
    pub use crate::{Calibration, Htt, LensFittingResult, ReturnCode, Settings};
}
