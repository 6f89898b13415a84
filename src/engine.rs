//! Optimization engine: everything that runs the particle swarm.
//!
//! - [`search_space`]: bevel corners and tip on a profile.
//! - [`fitting`]: model initialization from the search space and the
//!   retrying model fit.
//! - [`frames`]: transform calibration against one or several reference
//!   frames.
//! - [`grid`]: transform calibration against the chart intersections.
//!
//! Calibration runs report `valid` plus a 2xx [`ReturnCode`](crate::error::ReturnCode);
//! model fits return `Result<FitOutput, ReturnCode>`.
pub mod fitting;
pub mod frames;
pub mod grid;
pub mod search_space;

pub use fitting::{init_model, optimize_model, FitOutput, ModelInit};
pub use frames::{calibrate_frame, calibrate_frames, FrameCalibrationOutput, FrameSample};
pub use grid::{calibrate_grid, grid_errors, GridCalibrationOutput, GridErrors, GRID_SIDE_MM};
pub use search_space::{search_space, SearchPoints};

use crate::error::ReturnCode;
use crate::pso::PsoStatus;
use serde::{Deserialize, Serialize};

/// What a processing request is for; selects loss-field margin,
/// intersection checking and swarm size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessType {
    LensFitting,
    Calibration,
    Validation,
}

/// Outcome of a calibration loop.
///
/// `last` is the status of the last swarm that ran, `None` when every
/// swarm failed to start.
pub(crate) fn calibration_code(valid: bool, last: Option<PsoStatus>) -> ReturnCode {
    match (valid, last) {
        (true, _) => ReturnCode::CalibrationSuccessful,
        (false, Some(PsoStatus::BoundaryReached)) => ReturnCode::CalibrationFailedSearchSpace,
        (false, Some(PsoStatus::Success)) => ReturnCode::CalibrationFailedConvergence,
        (false, None) => ReturnCode::CalibrationFailedPsoInit,
    }
}
